#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use project_policy_controller_core as core;
pub use project_policy_controller_k8s_api as k8s;

mod admission;
mod args;
mod project;

pub use self::{
    admission::{Admission, AdmissionMetrics},
    args::Args,
};
