//! # Configuration Module
//!
//! This module handles configuration loading for the gateway: the listener, the shared
//! physical namespace, connection settings for both API servers, the redirect rules and the
//! admission, authentication and observability sections.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable override support (`TENANT_GATEWAY_<FIELD>`)
//! - Human-readable durations (`10s`, `5m`) via `humantime`
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::core::error::{RedirectError, RedirectResult};
use crate::routing::rules::RedirectRule;

/// Service-account mount used when running inside the physical cluster
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared physical namespace every tenant namespace is folded into
    pub target_namespace: String,

    /// Suffix appended by the default name mapper, usually the virtual cluster's name
    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,

    /// Connection to the physical API server that receives redirected requests
    ///
    /// Its token or client certificate replaces whatever credentials the caller sent.
    #[serde(default = "ClusterConnection::in_cluster")]
    pub physical_cluster: ClusterConnection,

    /// Connection to the virtual API server that serves everything else
    ///
    /// Passthrough requests keep the caller's own credentials. The token and client
    /// certificate configured here are only used for TokenReview calls.
    pub virtual_cluster: ClusterConnection,

    /// Which requests are redirected
    #[serde(default)]
    pub redirect: RedirectConfig,

    /// Built-in admission plugins for connect requests
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Caller authentication
    #[serde(default)]
    pub authentication: AuthenticationConfig,

    /// Logging and metrics
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_name_suffix() -> String {
    "vcluster".to_string()
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,

    /// Port for the proxied API
    pub port: u16,

    /// Grace period for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8443,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// How to reach and authenticate against one API server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConnection {
    /// Name used in logs and errors
    pub name: String,

    /// Base URL of the API server
    pub server: Url,

    /// PEM bundle used to verify the server certificate
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Bearer token injected into every forwarded request
    #[serde(default)]
    pub token: Option<String>,

    /// File holding the bearer token
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// PEM client certificate
    #[serde(default)]
    pub client_certificate_file: Option<PathBuf>,

    /// PEM (PKCS#8) client key
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,

    /// Skip server certificate verification
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ClusterConnection {
    /// Connection settings for the API server of the cluster this process runs in
    pub fn in_cluster() -> Self {
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Self {
            name: "physical".to_string(),
            // Statically valid URL.
            server: Url::parse("https://kubernetes.default.svc").expect("static url"),
            ca_file: Some(dir.join("ca.crt")),
            token: None,
            token_file: Some(dir.join("token")),
            client_certificate_file: None,
            client_key_file: None,
            insecure_skip_tls_verify: false,
            connect_timeout: default_connect_timeout(),
        }
    }

    /// Plain connection without credentials, mostly for tests and local setups
    pub fn plain(name: impl Into<String>, server: Url) -> Self {
        Self {
            name: name.into(),
            server,
            ca_file: None,
            token: None,
            token_file: None,
            client_certificate_file: None,
            client_key_file: None,
            insecure_skip_tls_verify: false,
            connect_timeout: default_connect_timeout(),
        }
    }

    fn validate(&self, field: &str, errors: &mut Vec<String>) {
        if self.name.is_empty() {
            errors.push(format!("{}.name must not be empty", field));
        }
        match self.server.scheme() {
            "http" | "https" => {}
            scheme => errors.push(format!(
                "{}.server must use http or https, got {}",
                field, scheme
            )),
        }
        if self.token.is_some() && self.token_file.is_some() {
            errors.push(format!(
                "{}: token and token_file are mutually exclusive",
                field
            ));
        }
        if self.client_certificate_file.is_some() != self.client_key_file.is_some() {
            errors.push(format!(
                "{}: client_certificate_file and client_key_file must be set together",
                field
            ));
        }
    }
}

/// Redirect rule configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Requests matching any of these rules go to the physical cluster
    #[serde(default)]
    pub rules: Vec<RedirectRule>,
}

/// Built-in admission plugins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Deny selected connect sub-resources
    #[serde(default)]
    pub deny_connect: Option<DenyConnectConfig>,
}

/// Settings for the deny-connect admission plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyConnectConfig {
    /// Sub-resources to deny (`exec`, `attach`, `portforward`)
    pub subresources: Vec<String>,

    /// Users in any of these groups are never denied
    #[serde(default)]
    pub exempt_groups: Vec<String>,
}

/// Caller authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    /// Validate bearer tokens against the virtual cluster
    pub enabled: bool,

    /// How long a successful token review is reused
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: Duration::from_secs(10),
        }
    }
}

/// Observability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> RedirectResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RedirectError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::parse(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without overrides or validation
    pub fn parse(content: &str) -> RedirectResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RedirectError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> RedirectResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    ///
    /// Keys follow the pattern `TENANT_GATEWAY_<FIELD>`, for example
    /// `TENANT_GATEWAY_TARGET_NAMESPACE=vcluster-a`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> RedirectResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TENANT_GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("TENANT_GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| RedirectError::config(format!("Invalid TENANT_GATEWAY_PORT: {}", e)))?;
        }

        if let Some(namespace) = lookup("TENANT_GATEWAY_TARGET_NAMESPACE") {
            self.target_namespace = namespace;
        }

        if let Some(suffix) = lookup("TENANT_GATEWAY_NAME_SUFFIX") {
            self.name_suffix = suffix;
        }

        if let Some(server) = lookup("TENANT_GATEWAY_PHYSICAL_SERVER") {
            self.physical_cluster.server = Url::parse(&server).map_err(|e| {
                RedirectError::config(format!("Invalid TENANT_GATEWAY_PHYSICAL_SERVER: {}", e))
            })?;
        }

        if let Some(server) = lookup("TENANT_GATEWAY_VIRTUAL_SERVER") {
            self.virtual_cluster.server = Url::parse(&server).map_err(|e| {
                RedirectError::config(format!("Invalid TENANT_GATEWAY_VIRTUAL_SERVER: {}", e))
            })?;
        }

        if let Some(timeout) = lookup("TENANT_GATEWAY_CONNECT_TIMEOUT") {
            let timeout = humantime::parse_duration(&timeout).map_err(|e| {
                RedirectError::config(format!("Invalid TENANT_GATEWAY_CONNECT_TIMEOUT: {}", e))
            })?;
            self.physical_cluster.connect_timeout = timeout;
            self.virtual_cluster.connect_timeout = timeout;
        }

        if let Some(level) = lookup("TENANT_GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(format) = lookup("TENANT_GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = format;
        }

        if let Some(enabled) = lookup("TENANT_GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.enabled = enabled.parse().map_err(|e| {
                RedirectError::config(format!("Invalid TENANT_GATEWAY_METRICS_ENABLED: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem in one error
    pub fn validate(&self) -> RedirectResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }
        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }

        if !is_dns_label(&self.target_namespace) {
            errors.push(format!(
                "target_namespace {:?} is not a valid namespace name",
                self.target_namespace
            ));
        }
        if self.name_suffix.is_empty() {
            errors.push("name_suffix must not be empty".to_string());
        }

        self.physical_cluster.validate("physical_cluster", &mut errors);
        self.virtual_cluster.validate("virtual_cluster", &mut errors);

        if let Some(deny) = &self.admission.deny_connect {
            for subresource in &deny.subresources {
                if !matches!(subresource.as_str(), "exec" | "attach" | "portforward") {
                    errors.push(format!(
                        "admission.deny_connect: unknown connect subresource {:?}",
                        subresource
                    ));
                }
            }
        }

        match self.observability.logging.format.as_str() {
            "json" | "pretty" => {}
            other => errors.push(format!(
                "observability.logging.format must be json or pretty, got {:?}",
                other
            )),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RedirectError::config(errors.join("; ")))
        }
    }
}

/// RFC 1123 label, the rule Kubernetes applies to namespace names
fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
target_namespace: vcluster-host
virtual_cluster:
  name: virtual
  server: https://127.0.0.1:6443
  insecure_skip_tls_verify: true
redirect:
  rules:
    - { group: "", version: v1, resource: pods, sub_resource: "*", verb: "*" }
"#;

    #[test]
    fn test_minimal_config_uses_in_cluster_defaults() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.target_namespace, "vcluster-host");
        assert_eq!(config.name_suffix, "vcluster");
        assert_eq!(config.server.port, 8443);
        assert_eq!(
            config.physical_cluster.server.as_str(),
            "https://kubernetes.default.svc/"
        );
        assert_eq!(
            config.physical_cluster.token_file.as_deref(),
            Some(Path::new("/var/run/secrets/kubernetes.io/serviceaccount/token"))
        );
        assert_eq!(config.redirect.rules.len(), 1);
        assert!(config.authentication.enabled);
    }

    #[test]
    fn test_overrides() {
        let mut config = GatewayConfig::parse(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("TENANT_GATEWAY_PORT", "9443"),
            ("TENANT_GATEWAY_TARGET_NAMESPACE", "shared"),
            ("TENANT_GATEWAY_CONNECT_TIMEOUT", "3s"),
            ("TENANT_GATEWAY_LOG_FORMAT", "pretty"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9443);
        assert_eq!(config.target_namespace, "shared");
        assert_eq!(config.physical_cluster.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.virtual_cluster.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.observability.logging.format, "pretty");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = GatewayConfig::parse(MINIMAL).unwrap();
        let result = config.apply_overrides(|key| {
            (key == "TENANT_GATEWAY_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(RedirectError::Configuration { .. })));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = GatewayConfig::parse(MINIMAL).unwrap();
        config.target_namespace = "Not_A_Namespace".to_string();
        config.virtual_cluster.token = Some("abc".to_string());
        config.virtual_cluster.token_file = Some(PathBuf::from("/tmp/token"));
        config.admission.deny_connect = Some(DenyConnectConfig {
            subresources: vec!["log".to_string()],
            exempt_groups: vec![],
        });

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("target_namespace"));
        assert!(err.contains("mutually exclusive"));
        assert!(err.contains("unknown connect subresource"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = GatewayConfig::parse(include_str!("../../config/gateway.yaml")).unwrap();
        config.validate().unwrap();

        assert_eq!(config.name_suffix, "team-a");
        assert_eq!(config.redirect.rules.len(), 4);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
        assert!(config.admission.deny_connect.is_some());
    }

    #[test]
    fn test_dns_label() {
        assert!(is_dns_label("vcluster-host"));
        assert!(is_dns_label("a1"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-leading"));
        assert!(!is_dns_label("UPPER"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = GatewayConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.virtual_cluster.name, "virtual");
        assert!(config.virtual_cluster.insecure_skip_tls_verify);
    }

    #[tokio::test]
    async fn test_missing_file_is_configuration_error() {
        let result = GatewayConfig::load_from_file("/nonexistent/gateway.yaml").await;
        assert!(matches!(result, Err(RedirectError::Configuration { .. })));
    }
}
