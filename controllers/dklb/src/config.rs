//! Controller configuration.
//!
//! Read once from environment variables at startup and passed explicitly to
//! every component that needs it.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// What to do when a pool disappears between being read and being updated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecreationPolicy {
    /// Create the pool again right away
    #[default]
    Immediate,
    /// Wait until EdgeLB confirms the pool is gone, then create it
    WhenGone,
}

impl FromStr for RecreationPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Immediate" => Ok(Self::Immediate),
            "WhenGone" => Ok(Self::WhenGone),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown recreation policy \"{}\" (expected Immediate or WhenGone)",
                other
            ))),
        }
    }
}

/// EdgeLB connection settings
#[derive(Debug, Clone)]
pub struct EdgeLBConfig {
    pub url: String,
    pub token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub request_timeout: Duration,
}

/// dklb configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the Kubernetes cluster; prefixes generated pool and entry names
    pub cluster_name: String,
    pub edgelb: EdgeLBConfig,
    pub ingress_workers: usize,
    pub service_workers: usize,
    /// Replay every cached object this often; `None` disables resync
    pub resync_period: Option<Duration>,
    pub recreation_policy: RecreationPolicy,
    /// How long `RecreationPolicy::WhenGone` waits for a pool to go away
    pub recreation_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Mesos framework running the Kubernetes nodes that back every pool
    pub backend_framework_name: String,
    /// Admission webhook listen address; `None` disables the webhook
    pub admission_addr: Option<SocketAddr>,
    /// Namespace to watch; all namespaces if `None`
    pub watch_namespace: Option<String>,
}

const DEFAULT_EDGELB_URL: &str = "http://edgelb-api.marathon.l4lb.thisdcos.directory";
const DEFAULT_ADMISSION_ADDR: &str = "0.0.0.0:8443";

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let cluster_name = lookup("DKLB_CLUSTER_NAME")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "DKLB_CLUSTER_NAME environment variable is required".to_string(),
                )
            })?;

        let edgelb = EdgeLBConfig {
            url: lookup("EDGELB_URL").unwrap_or_else(|| DEFAULT_EDGELB_URL.to_string()),
            token: lookup("EDGELB_TOKEN").filter(|t| !t.is_empty()),
            insecure_skip_tls_verify: parse(&lookup, "EDGELB_INSECURE_SKIP_TLS_VERIFY", false)?,
            request_timeout: Duration::from_secs(parse(&lookup, "EDGELB_REQUEST_TIMEOUT_SECS", 3)?),
        };

        let ingress_workers = parse(&lookup, "DKLB_INGRESS_WORKERS", 2)?;
        let service_workers = parse(&lookup, "DKLB_SERVICE_WORKERS", 2)?;
        if ingress_workers == 0 || service_workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "worker counts must be at least 1".to_string(),
            ));
        }

        let resync_secs: u64 = parse(&lookup, "DKLB_RESYNC_PERIOD_SECS", 0)?;
        let admission_disabled: bool = parse(&lookup, "DKLB_ADMISSION_DISABLED", false)?;
        let admission_addr = if admission_disabled {
            None
        } else {
            let raw = lookup("DKLB_ADMISSION_ADDR")
                .unwrap_or_else(|| DEFAULT_ADMISSION_ADDR.to_string());
            let addr = raw.trim().parse::<SocketAddr>().map_err(|e| {
                ControllerError::InvalidConfig(format!("DKLB_ADMISSION_ADDR={:?}: {}", raw, e))
            })?;
            Some(addr)
        };

        Ok(Self {
            backend_framework_name: lookup("DKLB_BACKEND_FRAMEWORK_NAME")
                .unwrap_or_else(|| cluster_name.clone()),
            cluster_name,
            edgelb,
            ingress_workers,
            service_workers,
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            recreation_policy: lookup("DKLB_RECREATION_POLICY")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            recreation_timeout: Duration::from_secs(parse(&lookup, "DKLB_RECREATION_TIMEOUT_SECS", 10)?),
            backoff_base: Duration::from_millis(parse(&lookup, "DKLB_BACKOFF_BASE_MS", 1000)?),
            backoff_max: Duration::from_secs(parse(&lookup, "DKLB_BACKOFF_MAX_SECS", 300)?),
            admission_addr,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))
        }),
    }
}
