//! Pool specification for `Ingress` resources of class `edgelb`.

use crate::annotations;
use crate::error::SpecError;
use crate::pool::{DefaultingContext, PoolConfig, PoolSpec};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HTTP_PORT: i32 = 80;
pub const DEFAULT_HTTPS_PORT: i32 = 443;

/// Whether the Ingress is claimed by dklb, either through the class
/// annotation or `spec.ingressClassName`.
pub fn is_edgelb_ingress(ingress: &Ingress) -> bool {
    let by_annotation = annotations::get(&ingress.metadata, annotations::INGRESS_CLASS)
        .is_some_and(|c| c == annotations::EDGELB_INGRESS_CLASS);
    let by_class_name = ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref())
        .is_some_and(|c| c == annotations::EDGELB_INGRESS_CLASS);
    by_annotation || by_class_name
}

/// Behaviour of the plain HTTP frontend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMode {
    #[default]
    Enabled,
    Disabled,
    /// Answer every request with a redirect to the HTTPS frontend
    Redirect,
}

impl FromStr for HttpMode {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Enabled" => Ok(Self::Enabled),
            "Disabled" => Ok(Self::Disabled),
            "Redirect" => Ok(Self::Redirect),
            other => Err(SpecError::parse(other, "the mode of the http frontend")),
        }
    }
}

impl fmt::Display for HttpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::Redirect => "Redirect",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpFrontendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<HttpMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpsFrontendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressFrontendsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpFrontendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<HttpsFrontendConfig>,
}

/// The `dklb-config` block of an Ingress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(flatten)]
    pub pool: PoolConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontends: Option<IngressFrontendsConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpFrontend {
    pub mode: HttpMode,
    pub port: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpsFrontend {
    pub port: i32,
}

/// Fully defaulted and validated pool specification of an Ingress
#[derive(Debug, Clone, PartialEq)]
pub struct IngressPoolSpec {
    pub pool: PoolSpec,
    pub http: HttpFrontend,
    /// Only served when the Ingress declares TLS
    pub https: HttpsFrontend,
    pub tls: bool,
}

impl IngressPoolSpec {
    /// Value of the `dklb-config` annotation describing this specification.
    pub fn to_annotation_value(&self) -> Result<String, SpecError> {
        let config = IngressConfig {
            pool: self.pool.to_config(),
            frontends: Some(IngressFrontendsConfig {
                http: Some(HttpFrontendConfig {
                    mode: Some(self.http.mode),
                    port: Some(self.http.port),
                }),
                https: Some(HttpsFrontendConfig {
                    port: Some(self.https.port),
                }),
            }),
        };
        Ok(serde_yaml::to_string(&config)?)
    }
}

fn parse_port(value: &str, what: &str) -> Result<i32, SpecError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| SpecError::parse(value, format!("the port of the {} frontend", what)))
}

fn check_port(port: i32, what: &str) -> Result<(), SpecError> {
    if (1..=65535).contains(&port) {
        return Ok(());
    }
    Err(SpecError::Invalid(format!(
        "{} is not a valid port for the {} frontend: it must be between 1 and 65535",
        port, what
    )))
}

/// Parse, default and validate the pool specification of an Ingress.
pub fn compute_ingress_spec(
    ingress: &Ingress,
    ctx: &DefaultingContext<'_>,
) -> Result<IngressPoolSpec, SpecError> {
    let meta = &ingress.metadata;
    let mut config: IngressConfig = match annotations::get(meta, annotations::CONFIG) {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)?,
        _ => IngressConfig::default(),
    };
    config.pool.overlay_annotations(meta)?;

    let frontends = config.frontends.unwrap_or_default();
    let mut http = frontends.http.unwrap_or_default();
    let mut https = frontends.https.unwrap_or_default();
    if let Some(v) = annotations::get(meta, annotations::INGRESS_HTTP_PORT) {
        http.port = Some(parse_port(v, "http")?);
    }
    if let Some(v) = annotations::get(meta, annotations::INGRESS_HTTP_MODE) {
        http.mode = Some(v.parse()?);
    }
    if let Some(v) = annotations::get(meta, annotations::INGRESS_HTTPS_PORT) {
        https.port = Some(parse_port(v, "https")?);
    }

    let pool = config.pool.resolve(meta, ctx);
    pool.validate()?;

    let http = HttpFrontend {
        mode: http.mode.unwrap_or_default(),
        port: http.port.unwrap_or(DEFAULT_HTTP_PORT),
    };
    let https = HttpsFrontend {
        port: https.port.unwrap_or(DEFAULT_HTTPS_PORT),
    };
    let tls = ingress
        .spec
        .as_ref()
        .and_then(|s| s.tls.as_ref())
        .is_some_and(|tls| !tls.is_empty());

    check_port(http.port, "http")?;
    check_port(https.port, "https")?;
    if http.mode == HttpMode::Disabled && !tls {
        return Err(SpecError::Invalid(
            "at least one of the http and https frontends must be enabled".to_string(),
        ));
    }
    if http.mode == HttpMode::Redirect && !tls {
        return Err(SpecError::Invalid(
            "redirecting http to https requires tls to be configured".to_string(),
        ));
    }
    if tls && http.mode != HttpMode::Disabled && http.port == https.port {
        return Err(SpecError::Invalid(format!(
            "the http and https frontends cannot share port {}",
            http.port
        )));
    }

    Ok(IngressPoolSpec {
        pool,
        http,
        https,
        tls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressSpec, IngressTLS};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn ingress(annotations: &[(&str, &str)], tls: bool) -> Ingress {
        let mut all: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        all.insert(
            annotations::INGRESS_CLASS.to_string(),
            annotations::EDGELB_INGRESS_CLASS.to_string(),
        );
        Ingress {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(all),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                tls: tls.then(|| {
                    vec![IngressTLS {
                        hosts: Some(vec!["example.com".to_string()]),
                        secret_name: Some("example-tls".to_string()),
                    }]
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    const CTX: DefaultingContext<'static> = DefaultingContext {
        cluster_name: "dev",
        random_suffix: None,
    };

    #[test]
    fn test_defaults() {
        let ing = ingress(&[], false);
        assert!(is_edgelb_ingress(&ing));
        let spec = compute_ingress_spec(&ing, &CTX).unwrap();
        assert_eq!(spec.http, HttpFrontend { mode: HttpMode::Enabled, port: 80 });
        assert_eq!(spec.https.port, 443);
        assert!(!spec.tls);
    }

    #[test]
    fn test_disabled_http_without_tls_is_invalid() {
        let ing = ingress(&[(annotations::INGRESS_HTTP_MODE, "Disabled")], false);
        let err = compute_ingress_spec(&ing, &CTX).unwrap_err();
        assert!(err.to_string().contains("at least one"));

        let ing = ingress(&[(annotations::INGRESS_HTTP_MODE, "Disabled")], true);
        assert!(compute_ingress_spec(&ing, &CTX).is_ok());
    }

    #[test]
    fn test_redirect_requires_tls() {
        let ing = ingress(&[(annotations::INGRESS_HTTP_MODE, "Redirect")], false);
        assert!(compute_ingress_spec(&ing, &CTX).is_err());
    }

    #[test]
    fn test_invalid_mode() {
        let ing = ingress(&[(annotations::INGRESS_HTTP_MODE, "Sometimes")], false);
        let err = compute_ingress_spec(&ing, &CTX).unwrap_err();
        assert!(err.to_string().contains("\"Sometimes\""));
    }

    #[test]
    fn test_shared_port_is_invalid() {
        let ing = ingress(&[(annotations::INGRESS_HTTPS_PORT, "80")], true);
        assert!(compute_ingress_spec(&ing, &CTX).is_err());
    }

    #[test]
    fn test_config_block() {
        let config = "name: shared\nrole: private\nfrontends:\n  http:\n    port: 8080\n";
        let ing = ingress(&[(annotations::CONFIG, config)], false);
        let spec = compute_ingress_spec(&ing, &CTX).unwrap();
        assert_eq!(spec.pool.name, "shared");
        assert_eq!(spec.pool.network.as_deref(), Some("dcos"));
        assert_eq!(spec.http.port, 8080);

        let value = spec.to_annotation_value().unwrap();
        let persisted = ingress(&[(annotations::CONFIG, &value)], false);
        assert_eq!(compute_ingress_spec(&persisted, &CTX).unwrap(), spec);
    }
}
