#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod app_project;

pub use self::app_project::{AppProject, AppProjectSpec};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    Client, Resource,
};
