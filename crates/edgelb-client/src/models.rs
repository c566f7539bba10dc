//! EdgeLB V2 pool models
//!
//! Only the fields dklb reads or writes are modelled. Everything else the
//! API returns is kept in the `extra` maps so that a read-modify-write cycle
//! does not drop settings made by other tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// API version of every pool this crate creates.
pub const POOL_API_VERSION: &str = "V2";

fn default_api_version() -> String {
    POOL_API_VERSION.to_string()
}

/// An EdgeLB V2 pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub mem: i32,
    #[serde(default)]
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_networks: Vec<VirtualNetwork>,
    #[serde(default)]
    pub haproxy: HAProxy,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Pool {
    /// A pool with the given name and no frontends or backends.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            name: name.into(),
            namespace: None,
            role: String::new(),
            cpus: 0.0,
            mem: 0,
            count: 0,
            constraints: None,
            virtual_networks: Vec::new(),
            haproxy: HAProxy::default(),
            extra: Map::new(),
        }
    }

    /// Copy of the pool with frontends and backends sorted by name.
    ///
    /// Two pools describing the same configuration compare equal once
    /// normalized, regardless of the order the API returned entries in.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut pool = self.clone();
        pool.haproxy.frontends.sort_by(|a, b| a.name.cmp(&b.name));
        pool.haproxy.backends.sort_by(|a, b| a.name.cmp(&b.name));
        pool
    }

    /// Whether the pool carries no frontends and no backends.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.haproxy.frontends.is_empty() && self.haproxy.backends.is_empty()
    }

    /// Name of the first virtual network the pool joins, if any.
    #[must_use]
    pub fn network(&self) -> Option<&str> {
        self.virtual_networks.first().map(|n| n.name.as_str())
    }
}

/// A DC/OS virtual network a pool joins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// HAProxy configuration of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HAProxy {
    #[serde(default)]
    pub frontends: Vec<Frontend>,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// HAProxy statistics endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub bind_port: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Frontend/backend protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

/// A listening frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    pub bind_port: i32,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to_https: Option<RedirectToHttps>,
    #[serde(default)]
    pub link_backend: LinkBackend,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Redirects plain HTTP requests to HTTPS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedirectToHttps {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<RedirectException>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A host/path pair excluded from the HTTPS redirect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectException {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_beg: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a frontend selects backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map: Vec<BackendMapping>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Routes requests matching host and/or path prefix to a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_eq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_beg: Option<String>,
    pub backend: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A group of upstream servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default)]
    pub services: Vec<BackendService>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a backend finds its upstream servers
///
/// Selectors other than Mesos (for example `marathon`) stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesos: Option<MesosSelector>,
    #[serde(default)]
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Selects Mesos tasks by framework and task name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MesosSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name_pattern: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How to reach a selected task
///
/// An endpoint may name its port (`portName`) or select all ports instead
/// of giving a number; those fields stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "type", default)]
    pub kind: EndpointType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Endpoint address resolution mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    #[default]
    AutoIp,
    AgentIp,
    ContainerIp,
    Address,
}

/// Runtime metadata of a deployed pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub frontends: Vec<FrontendMetadata>,
}

/// Addresses a frontend is reachable at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendMetadata {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<FrontendEndpoint>,
}

/// One listening port of a frontend and the addresses serving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendEndpoint {
    pub port: i32,
    #[serde(default)]
    pub public: Vec<String>,
    #[serde(default)]
    pub private: Vec<String>,
}
