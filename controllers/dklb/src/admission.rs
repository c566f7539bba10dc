//! Validating and mutating admission webhook.
//!
//! On create, persists the fully defaulted pool specification in the
//! `dklb-config` annotation (randomising generated pool names so two objects
//! never collide). On update, rejects changes to the pool's name, role or
//! virtual network.
//!
//! Served over plain HTTP; TLS is terminated in front of the controller.

use crate::config::Config;
use crate::error::ControllerError;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use dklb_spec::annotations::CONFIG;
use dklb_spec::{
    DefaultingContext, PoolIdentity, SpecError, check_immutable, compute_ingress_spec,
    compute_service_spec, is_edgelb_ingress, is_load_balancer, random_suffix,
};
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// An admitted object dklb cares about
enum Admitted {
    Service(Box<Service>),
    Ingress(Box<Ingress>),
}

impl Admitted {
    /// Decode the object of a request, `None` for kinds dklb ignores
    fn decode(gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<Option<Self>, serde_json::Error> {
        let value = serde_json::to_value(obj)?;
        Ok(match (gvk.group.as_str(), gvk.kind.as_str()) {
            ("", "Service") => Some(Self::Service(Box::new(serde_json::from_value(value)?))),
            ("networking.k8s.io", "Ingress") => {
                Some(Self::Ingress(Box::new(serde_json::from_value(value)?)))
            }
            _ => None,
        })
    }

    fn is_managed(&self) -> bool {
        match self {
            Self::Service(svc) => is_load_balancer(svc),
            Self::Ingress(ing) => is_edgelb_ingress(ing),
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Service(svc) => &svc.metadata,
            Self::Ingress(ing) => &ing.metadata,
        }
    }

    /// Pool identity and `dklb-config` value of the defaulted specification
    fn spec(&self, ctx: &DefaultingContext<'_>) -> Result<(PoolIdentity, String), SpecError> {
        match self {
            Self::Service(svc) => {
                let spec = compute_service_spec(svc, ctx)?;
                Ok((spec.pool.identity(), spec.to_annotation_value()?))
            }
            Self::Ingress(ing) => {
                let spec = compute_ingress_spec(ing, ctx)?;
                Ok((spec.pool.identity(), spec.to_annotation_value()?))
            }
        }
    }
}

/// Decide on one admission request.
pub fn admit(cluster_name: &str, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let kind = request.kind.kind.as_str();

    let object = match request.object.as_ref().map(|o| Admitted::decode(&request.kind, o)).transpose() {
        Ok(Some(Some(object))) if object.is_managed() => object,
        Ok(_) => return response,
        Err(e) => {
            warn!(uid = %request.uid, "Cannot decode {}: {}", kind, e);
            return response.deny(format!("cannot decode {}: {}", kind, e));
        }
    };

    match request.operation {
        Operation::Create => {
            let suffix = random_suffix();
            let ctx = DefaultingContext {
                cluster_name,
                random_suffix: Some(&suffix),
            };
            let config = match object.spec(&ctx) {
                Ok((_, config)) => config,
                Err(e) => {
                    info!(uid = %request.uid, "Denying {} {}: {}", kind, request.name, e);
                    return response.deny(e.to_string());
                }
            };
            let meta = object.metadata();
            if dklb_spec::annotations::get(meta, CONFIG) == Some(config.as_str()) {
                return response;
            }
            debug!(uid = %request.uid, "Persisting defaulted configuration of {} {}", kind, request.name);
            match response.clone().with_patch(json_patch::Patch(config_patch(meta, config))) {
                Ok(patched) => patched,
                Err(e) => {
                    error!(uid = %request.uid, "Failed to serialize patch: {}", e);
                    response.deny(format!("patch serialization error: {}", e))
                }
            }
        }
        Operation::Update => {
            let ctx = DefaultingContext {
                cluster_name,
                random_suffix: None,
            };
            let (current, _) = match object.spec(&ctx) {
                Ok(spec) => spec,
                Err(e) => {
                    info!(uid = %request.uid, "Denying {} {}: {}", kind, request.name, e);
                    return response.deny(e.to_string());
                }
            };
            let previous = request
                .old_object
                .as_ref()
                .and_then(|o| Admitted::decode(&request.kind, o).ok().flatten())
                .filter(Admitted::is_managed)
                .and_then(|old| old.spec(&ctx).ok());
            if let Some((previous, _)) = previous
                && let Err(e) = check_immutable(&previous, &current)
            {
                info!(uid = %request.uid, "Denying {} {}: {}", kind, request.name, e);
                return response.deny(e.to_string());
            }
            response
        }
        _ => response,
    }
}

/// JSON patch setting the `dklb-config` annotation
fn config_patch(meta: &ObjectMeta, config: String) -> Vec<PatchOperation> {
    let op = if meta.annotations.is_none() {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: serde_json::json!({ CONFIG: config }),
        }
    } else {
        AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations", CONFIG]),
            value: serde_json::Value::String(config),
        }
    };
    vec![PatchOperation::Add(op)]
}

async fn admission_handler(
    State(config): State<Arc<Config>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(admit(&config.cluster_name, &request).into_review())
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/", post(admission_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(config)
}

/// Serve the webhook until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    config: Arc<Config>,
    cancel: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Admission webhook listening on {}", addr);
    axum::serve(listener, router(config))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Admission webhook stopped");
    Ok(())
}
