//! Annotation keys
//!
//! These strings are a compatibility surface with existing manifests and
//! must not change.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Ingress class annotation
pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
/// Ingress class value claimed by dklb
pub const EDGELB_INGRESS_CLASS: &str = "edgelb";

/// YAML configuration block holding the whole pool specification
pub const CONFIG: &str = "kubernetes.dcos.io/dklb-config";
/// Stops translation of the object while set to "true"
pub const PAUSED: &str = "kubernetes.dcos.io/dklb-paused";
/// Identity of the pool the object was last applied to (written by the controller)
pub const POOL_RECORD: &str = "kubernetes.dcos.io/dklb-pool-record";

pub const POOL_NAME: &str = "kubernetes.dcos.io/edgelb-pool-name";
pub const POOL_ROLE: &str = "kubernetes.dcos.io/edgelb-pool-role";
pub const POOL_NETWORK: &str = "kubernetes.dcos.io/edgelb-pool-network";
pub const POOL_CPUS: &str = "kubernetes.dcos.io/edgelb-pool-cpus";
pub const POOL_MEM: &str = "kubernetes.dcos.io/edgelb-pool-mem";
pub const POOL_SIZE: &str = "kubernetes.dcos.io/edgelb-pool-size";
pub const POOL_CONSTRAINTS: &str = "kubernetes.dcos.io/edgelb-pool-constraints";
pub const POOL_CREATION_STRATEGY: &str = "kubernetes.dcos.io/edgelb-pool-creation-strategy";

/// Prefix of the per-port Service annotations; the suffix is the service port
pub const SERVICE_PORT_MAP_PREFIX: &str = "kubernetes.dcos.io/edgelb-pool-portmap.";

pub const INGRESS_HTTP_PORT: &str = "kubernetes.dcos.io/edgelb-pool-http-port";
pub const INGRESS_HTTP_MODE: &str = "kubernetes.dcos.io/edgelb-pool-http-mode";
pub const INGRESS_HTTPS_PORT: &str = "kubernetes.dcos.io/edgelb-pool-https-port";

/// Value of an annotation, if present.
pub fn get<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Whether translation of the object is paused.
pub fn is_paused(meta: &ObjectMeta) -> bool {
    get(meta, PAUSED).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
