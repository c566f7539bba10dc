//! dklb Pool Specifications
//!
//! Turns the annotations of a Kubernetes `Ingress` or `Service` into a fully
//! defaulted and validated EdgeLB pool specification.
//!
//! The same pure functions back both the admission webhook (which persists
//! the defaulted result on the object) and the controller (which translates
//! it into an EdgeLB pool), so the two can never disagree on defaults.

pub mod annotations;
pub mod error;
pub mod ingress;
pub mod naming;
pub mod pool;
pub mod service;

pub use error::SpecError;
pub use ingress::{
    HttpFrontend, HttpMode, HttpsFrontend, IngressPoolSpec, compute_ingress_spec,
    is_edgelb_ingress,
};
pub use naming::{generate_pool_name, random_suffix, validate_pool_name};
pub use pool::{
    CreationStrategy, DefaultingContext, PoolIdentity, PoolRecord, PoolSpec, check_immutable,
};
pub use service::{ServiceFrontend, ServicePoolSpec, compute_service_spec, is_load_balancer};
