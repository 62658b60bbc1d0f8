use crate::{
    k8s::{AppProject, AppProjectSpec, Resource, ResourceExt},
    project,
};
use anyhow::{anyhow, bail, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
pub struct Admission {
    metrics: AdmissionMetrics,
    controller_namespace: Arc<String>,
}

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    reviews: Family<ResultLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: &'static str,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    admission.metrics.observe("invalid");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req)
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    admission.metrics.observe("invalid");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(metrics: AdmissionMetrics, controller_namespace: String) -> Self {
        Self {
            metrics,
            controller_namespace: Arc::new(controller_namespace),
        }
    }

    fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<AppProject>(&req) {
            return self.admit_spec::<AppProjectSpec>(req);
        }

        self.metrics.observe("invalid");
        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    fn admit_spec<T>(&self, req: AdmissionRequest) -> AdmissionResponse
    where
        T: DeserializeOwned,
        Self: Validate<T>,
    {
        let rsp = AdmissionResponse::from(&req);

        let kind = req.kind.kind.clone();
        let (obj, spec) = match parse_spec::<T>(req) {
            Ok(spec) => spec,
            Err(error) => {
                info!(%error, "Failed to parse {} spec", kind);
                self.metrics.observe("denied");
                return rsp.deny(deny_reason(&error));
            }
        };

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        if let Err(error) = self.validate(&ns, &name, spec) {
            info!(error = %deny_reason(&error), %ns, %name, %kind, "Denied");
            self.metrics.observe("denied");
            return rsp.deny(deny_reason(&error));
        }

        self.metrics.observe("allowed");
        rsp
    }
}

trait Validate<T> {
    fn validate(&self, ns: &str, name: &str, spec: T) -> Result<()>;
}

impl Validate<AppProjectSpec> for Admission {
    fn validate(&self, ns: &str, name: &str, spec: AppProjectSpec) -> Result<()> {
        if ns != self.controller_namespace.as_str() {
            bail!(
                "projects must be created in the '{}' namespace",
                self.controller_namespace
            );
        }

        let project = project::from_spec(name, spec)?;
        project.validate()?;
        Ok(())
    }
}

/// Formats an error with its full cause chain, e.g.
/// `invalid sync window at index 0: invalid window kind 'maybe'`.
fn deny_reason(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj, spec))
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reviews = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reviews",
            "Total number of admission reviews, by result",
            reviews.clone(),
        );
        Self { reviews }
    }

    fn observe(&self, result: &'static str) {
        self.reviews.get_or_create(&ResultLabels { result }).inc();
    }

    #[cfg(test)]
    fn count(&self, result: &'static str) -> u64 {
        self.reviews.get_or_create(&ResultLabels { result }).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission() -> Admission {
        Admission::new(AdmissionMetrics::default(), "argocd".to_string())
    }

    fn spec(value: serde_json::Value) -> AppProjectSpec {
        serde_json::from_value(value).expect("spec must deserialize")
    }

    #[test]
    fn accepts_valid_project() {
        let spec = spec(serde_json::json!({
            "sourceRepos": ["*"],
            "destinations": [{ "server": "*", "namespace": "*" }],
            "roles": [{
                "name": "deployer",
                "policies": ["p, proj:team:deployer, applications, sync, team/*, allow"],
                "groups": ["example:deployers"],
            }],
            "syncWindows": [{
                "kind": "allow",
                "schedule": "0 9 * * 1-5",
                "duration": "8h",
                "applications": ["*"],
                "timeZone": "America/New_York",
            }],
        }));
        admission().validate("argocd", "team", spec).unwrap();
    }

    #[test]
    fn denies_invalid_project() {
        let cases = [
            (
                serde_json::json!({ "destinations": [{ "server": "!*", "namespace": "*" }] }),
                "destination server has an invalid format, '!*'",
            ),
            (
                serde_json::json!({
                    "roles": [{
                        "name": "deployer",
                        "policies": ["p, proj:other:deployer, applications, sync, team/*, allow"],
                    }],
                }),
                "policy subject must be: 'proj:team:deployer'",
            ),
            (
                serde_json::json!({
                    "syncWindows": [{ "kind": "deny", "schedule": "* * * * *", "duration": "1h" }],
                }),
                "requires one of application, cluster or namespace",
            ),
            (
                serde_json::json!({
                    "syncWindows": [{
                        "kind": "deny",
                        "schedule": "* * * * *",
                        "duration": "1h",
                        "namespaces": ["*"],
                        "timeZone": "Nowhere/Special",
                    }],
                }),
                "unknown time zone 'Nowhere/Special'",
            ),
            (
                serde_json::json!({
                    "syncWindows": [{
                        "kind": "maybe",
                        "schedule": "* * * * *",
                        "duration": "1h",
                        "applications": ["*"],
                    }],
                }),
                "invalid window kind 'maybe'",
            ),
        ];

        for (value, message) in cases {
            let error = admission()
                .validate("argocd", "team", spec(value))
                .unwrap_err();
            let reason = deny_reason(&error);
            assert!(reason.contains(message), "expected {message:?} in {reason}");
        }
    }

    #[test]
    fn deny_reason_includes_causes() {
        let error = admission()
            .validate(
                "argocd",
                "team",
                spec(serde_json::json!({
                    "syncWindows": [{
                        "kind": "maybe",
                        "schedule": "* * * * *",
                        "duration": "1h",
                        "applications": ["*"],
                    }],
                })),
            )
            .unwrap_err();
        assert_eq!(
            deny_reason(&error),
            "invalid sync window at index 0: invalid window kind 'maybe': must be 'allow' or 'deny'"
        );
    }

    #[test]
    fn denies_projects_outside_controller_namespace() {
        let error = admission()
            .validate("default", "team", AppProjectSpec::default())
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "projects must be created in the 'argocd' namespace"
        );
    }

    #[test]
    fn counts_reviews() {
        let metrics = AdmissionMetrics::default();
        metrics.observe("allowed");
        metrics.observe("denied");
        metrics.observe("denied");
        assert_eq!(metrics.count("allowed"), 1);
        assert_eq!(metrics.count("denied"), 2);
    }
}
