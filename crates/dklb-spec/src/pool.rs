//! Pool-level settings shared by Ingress and Service specifications.

use crate::annotations;
use crate::error::SpecError;
use crate::naming::{generate_pool_name, validate_pool_name};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of public agents; public pools are reachable from outside the cluster
pub const PUBLIC_ROLE: &str = "slave_public";
/// Virtual network joined by private pools unless told otherwise
pub const DEFAULT_PRIVATE_NETWORK: &str = "dcos";
pub const DEFAULT_CPUS: f64 = 0.1;
pub const DEFAULT_MEMORY: i32 = 128;
pub const DEFAULT_SIZE: i32 = 1;

/// What to do when the target pool does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreationStrategy {
    /// Create the pool whenever it is missing
    #[default]
    IfNotPresent,
    /// Create the pool only if it was never created for this object
    Once,
    /// Never create the pool; it must be provisioned out of band
    Never,
}

impl FromStr for CreationStrategy {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "IfNotPresent" => Ok(Self::IfNotPresent),
            "Once" => Ok(Self::Once),
            "Never" => Ok(Self::Never),
            other => Err(SpecError::parse(other, "the creation strategy")),
        }
    }
}

impl fmt::Display for CreationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IfNotPresent => "IfNotPresent",
            Self::Once => "Once",
            Self::Never => "Never",
        };
        f.write_str(s)
    }
}

/// Inputs to defaulting that do not come from the object itself.
#[derive(Debug, Clone, Copy)]
pub struct DefaultingContext<'a> {
    /// Name of the Kubernetes cluster, used in generated pool names
    pub cluster_name: &'a str,
    /// Appended to generated pool names; only set at admission time on create
    pub random_suffix: Option<&'a str>,
}

/// Strategies block of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<CreationStrategy>,
}

/// Pool settings as written by the user; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategies: Option<StrategiesConfig>,
}

impl PoolConfig {
    /// Apply the per-field annotations on top of the configuration block.
    pub(crate) fn overlay_annotations(&mut self, meta: &ObjectMeta) -> Result<(), SpecError> {
        if let Some(v) = annotations::get(meta, annotations::POOL_NAME) {
            self.name = Some(v.trim().to_string());
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_ROLE) {
            self.role = Some(v.trim().to_string());
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_NETWORK) {
            self.network = Some(v.trim().to_string());
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_CPUS) {
            let cpus = v
                .trim()
                .parse::<f64>()
                .map_err(|_| SpecError::parse(v, "the amount of cpus to request"))?;
            self.cpus = Some(cpus);
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_MEM) {
            let memory = v
                .trim()
                .parse::<i32>()
                .map_err(|_| SpecError::parse(v, "the amount of memory to request"))?;
            self.memory = Some(memory);
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_SIZE) {
            let size = v
                .trim()
                .parse::<i32>()
                .map_err(|_| SpecError::parse(v, "the size of the edgelb pool"))?;
            self.size = Some(size);
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_CONSTRAINTS) {
            self.constraints = Some(v.to_string());
        }
        if let Some(v) = annotations::get(meta, annotations::POOL_CREATION_STRATEGY) {
            self.strategies.get_or_insert_with(StrategiesConfig::default).creation =
                Some(v.parse()?);
        }
        Ok(())
    }

    /// Fill every missing field with its default.
    pub(crate) fn resolve(self, meta: &ObjectMeta, ctx: &DefaultingContext<'_>) -> PoolSpec {
        let name = self.name.filter(|n| !n.is_empty()).unwrap_or_else(|| {
            generate_pool_name(
                ctx.cluster_name,
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default(),
                ctx.random_suffix,
            )
        });
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| PUBLIC_ROLE.to_string());
        let network = self.network.filter(|n| !n.is_empty()).or_else(|| {
            (role != PUBLIC_ROLE).then(|| DEFAULT_PRIVATE_NETWORK.to_string())
        });

        PoolSpec {
            name,
            role,
            network,
            cpus: self.cpus.unwrap_or(DEFAULT_CPUS),
            memory: self.memory.unwrap_or(DEFAULT_MEMORY),
            size: self.size.unwrap_or(DEFAULT_SIZE),
            constraints: self.constraints.filter(|c| !c.is_empty()),
            creation_strategy: self
                .strategies
                .and_then(|s| s.creation)
                .unwrap_or_default(),
        }
    }
}

/// Fully defaulted pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSpec {
    pub name: String,
    pub role: String,
    pub network: Option<String>,
    pub cpus: f64,
    pub memory: i32,
    pub size: i32,
    pub constraints: Option<String>,
    pub creation_strategy: CreationStrategy,
}

impl PoolSpec {
    /// Fields that may never change once the object has been applied.
    #[must_use]
    pub fn identity(&self) -> PoolIdentity {
        PoolIdentity {
            name: self.name.clone(),
            role: self.role.clone(),
            network: self.network.clone(),
        }
    }

    /// Whether the pool runs on public agents.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.role == PUBLIC_ROLE
    }

    pub(crate) fn validate(&self) -> Result<(), SpecError> {
        validate_pool_name(&self.name)?;
        if self.role.is_empty() {
            return Err(SpecError::Invalid(
                "the role of the edgelb pool must not be empty".to_string(),
            ));
        }
        match (&self.network, self.is_public()) {
            (Some(network), true) => {
                return Err(SpecError::Invalid(format!(
                    "a public edgelb pool cannot join a virtual network (got \"{}\")",
                    network
                )));
            }
            (None, false) => {
                return Err(SpecError::Invalid(
                    "a private edgelb pool must join a virtual network".to_string(),
                ));
            }
            _ => {}
        }
        // Negated comparison also rejects NaN.
        if !(self.cpus >= 0.0) {
            return Err(SpecError::Invalid(format!(
                "the amount of cpus to request must not be negative (got {})",
                self.cpus
            )));
        }
        if self.memory < 0 {
            return Err(SpecError::Invalid(format!(
                "the amount of memory to request must not be negative (got {})",
                self.memory
            )));
        }
        if self.size < 0 {
            return Err(SpecError::Invalid(format!(
                "the size of the edgelb pool must not be negative (got {})",
                self.size
            )));
        }
        Ok(())
    }

    pub(crate) fn to_config(&self) -> PoolConfig {
        PoolConfig {
            name: Some(self.name.clone()),
            role: Some(self.role.clone()),
            network: self.network.clone(),
            cpus: Some(self.cpus),
            memory: Some(self.memory),
            size: Some(self.size),
            constraints: self.constraints.clone(),
            strategies: Some(StrategiesConfig {
                creation: Some(self.creation_strategy),
            }),
        }
    }
}

/// Name, role and virtual network of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolIdentity {
    pub name: String,
    pub role: String,
    pub network: Option<String>,
}

/// Reject changes to the name, role or virtual network of a pool.
pub fn check_immutable(previous: &PoolIdentity, current: &PoolIdentity) -> Result<(), SpecError> {
    if previous.name != current.name {
        return Err(SpecError::Immutable("name"));
    }
    if previous.role != current.role {
        return Err(SpecError::Immutable("role"));
    }
    if previous.network != current.network {
        return Err(SpecError::Immutable("virtual network"));
    }
    Ok(())
}

/// The pool an object was last applied to, persisted as JSON in
/// [`annotations::POOL_RECORD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl PoolRecord {
    /// Read the record from an object's annotations, if present.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Option<Self>, SpecError> {
        annotations::get(meta, annotations::POOL_RECORD)
            .map(|raw| serde_json::from_str(raw).map_err(SpecError::from))
            .transpose()
    }

    /// Annotation value for this record.
    pub fn to_annotation_value(&self) -> Result<String, SpecError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn identity(&self) -> PoolIdentity {
        PoolIdentity {
            name: self.name.clone(),
            role: self.role.clone(),
            network: self.network.clone(),
        }
    }
}

impl From<&PoolSpec> for PoolRecord {
    fn from(spec: &PoolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            role: spec.role.clone(),
            network: spec.network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta(annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    const CTX: DefaultingContext<'static> = DefaultingContext {
        cluster_name: "dev",
        random_suffix: None,
    };

    #[test]
    fn test_defaults() {
        let spec = PoolConfig::default().resolve(&meta(&[]), &CTX);
        assert_eq!(spec.name, "dev--default--web");
        assert_eq!(spec.role, PUBLIC_ROLE);
        assert_eq!(spec.network, None);
        assert_eq!(spec.cpus, DEFAULT_CPUS);
        assert_eq!(spec.memory, DEFAULT_MEMORY);
        assert_eq!(spec.size, DEFAULT_SIZE);
        assert_eq!(spec.creation_strategy, CreationStrategy::IfNotPresent);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_private_role_defaults_network() {
        let config = PoolConfig {
            role: Some("private".to_string()),
            ..Default::default()
        };
        let spec = config.resolve(&meta(&[]), &CTX);
        assert_eq!(spec.network.as_deref(), Some(DEFAULT_PRIVATE_NETWORK));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_public_role_with_network_is_invalid() {
        let config = PoolConfig {
            network: Some("overlay".to_string()),
            ..Default::default()
        };
        let err = config.resolve(&meta(&[]), &CTX).validate().unwrap_err();
        assert!(err.to_string().contains("public edgelb pool cannot join"));
    }

    #[test]
    fn test_annotations_override_config() {
        let mut config = PoolConfig {
            cpus: Some(2.0),
            size: Some(3),
            ..Default::default()
        };
        config
            .overlay_annotations(&meta(&[
                (annotations::POOL_CPUS, "0.5"),
                (annotations::POOL_CREATION_STRATEGY, "Once"),
            ]))
            .unwrap();
        let spec = config.resolve(&meta(&[]), &CTX);
        assert_eq!(spec.cpus, 0.5);
        assert_eq!(spec.size, 3);
        assert_eq!(spec.creation_strategy, CreationStrategy::Once);
    }

    #[test]
    fn test_invalid_cpus_annotation() {
        let err = PoolConfig::default()
            .overlay_annotations(&meta(&[(annotations::POOL_CPUS, "foo")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"foo\""));
        assert!(message.contains("cpus"));
    }

    #[test]
    fn test_negative_values_are_invalid() {
        let mut spec = PoolConfig::default().resolve(&meta(&[]), &CTX);
        spec.memory = -1;
        assert!(spec.validate().is_err());
        spec.memory = 128;
        spec.cpus = -0.1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_check_immutable() {
        let a = PoolIdentity {
            name: "a".to_string(),
            role: PUBLIC_ROLE.to_string(),
            network: None,
        };
        assert!(check_immutable(&a, &a.clone()).is_ok());

        let renamed = PoolIdentity {
            name: "b".to_string(),
            ..a.clone()
        };
        assert_eq!(
            check_immutable(&a, &renamed).unwrap_err().to_string(),
            "the name of the target edgelb pool cannot be changed"
        );

        let moved = PoolIdentity {
            role: "private".to_string(),
            network: Some("dcos".to_string()),
            ..a.clone()
        };
        assert_eq!(
            check_immutable(&a, &moved).unwrap_err().to_string(),
            "the role of the target edgelb pool cannot be changed"
        );
    }

    #[test]
    fn test_pool_record_from_meta() {
        let record = PoolRecord {
            name: "p".to_string(),
            role: PUBLIC_ROLE.to_string(),
            network: None,
        };
        let value = record.to_annotation_value().unwrap();
        let parsed = PoolRecord::from_meta(&meta(&[(annotations::POOL_RECORD, &value)])).unwrap();
        assert_eq!(parsed, Some(record));
        assert_eq!(PoolRecord::from_meta(&meta(&[])).unwrap(), None);
        assert!(PoolRecord::from_meta(&meta(&[(annotations::POOL_RECORD, "{")])).is_err());
    }
}
