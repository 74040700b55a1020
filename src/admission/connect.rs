//! # Connect Options
//!
//! Pod exec, attach and port-forward requests carry their options in the query string
//! (`?container=app&command=sh&stdin=true`). This module decodes them into typed values for
//! the admission plugins, using the same conversion rules the API server applies.
//!
//! ## Rust Concepts Used
//!
//! - A closed enum (`ConnectSubresource`) instead of string dispatch: unknown sub-resources
//!   simply have no variant
//! - A small trait (`FromParameters`) with one implementation per options type
//! - Generic methods (`ParameterCodec::decode::<T>`) pick the implementation at compile time

use kube::core::GroupVersionKind;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::error::RedirectError;

/// Interactive pod sub-resources that go through admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectSubresource {
    Exec,
    Attach,
    PortForward,
}

impl ConnectSubresource {
    /// Map a sub-resource segment onto a connect action, `None` for anything else
    pub fn from_subresource(subresource: &str) -> Option<Self> {
        match subresource {
            "exec" => Some(Self::Exec),
            "attach" => Some(Self::Attach),
            "portforward" => Some(Self::PortForward),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Attach => "attach",
            Self::PortForward => "portforward",
        }
    }

    /// Kind of the options object this action decodes into
    pub fn kind(&self) -> GroupVersionKind {
        let kind = match self {
            Self::Exec => "PodExecOptions",
            Self::Attach => "PodAttachOptions",
            Self::PortForward => "PodPortForwardOptions",
        };
        GroupVersionKind::gvk("", "v1", kind)
    }
}

/// `core/v1` PodExecOptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodExecOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container: String,
    pub command: Vec<String>,
}

/// `core/v1` PodAttachOptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container: String,
}

/// `core/v1` PodPortForwardOptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodPortForwardOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
}

/// Decoded options of a connect request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConnectOptions {
    Exec(PodExecOptions),
    Attach(PodAttachOptions),
    PortForward(PodPortForwardOptions),
}

impl ConnectOptions {
    pub fn kind(&self) -> GroupVersionKind {
        self.subresource().kind()
    }

    pub fn subresource(&self) -> ConnectSubresource {
        match self {
            Self::Exec(_) => ConnectSubresource::Exec,
            Self::Attach(_) => ConnectSubresource::Attach,
            Self::PortForward(_) => ConnectSubresource::PortForward,
        }
    }
}

/// A query parameter could not be converted to its field type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParameterError {
    pub message: String,
}

impl From<ParameterError> for RedirectError {
    fn from(err: ParameterError) -> Self {
        RedirectError::invalid_parameters(err.message)
    }
}

/// Query parameters as a multimap, in request order per key
#[derive(Debug, Default, Clone)]
pub struct Parameters {
    values: HashMap<String, Vec<String>>,
}

impl Parameters {
    pub fn parse(query: Option<&str>) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                values.entry(key.into_owned()).or_default().push(value.into_owned());
            }
        }
        Self { values }
    }

    pub fn all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.all(key).first().map(String::as_str)
    }

    /// API server bool conversion: present and not `0`/`false` means true
    pub fn flag(&self, key: &str) -> bool {
        match self.first(key) {
            Some(value) => !(value == "0" || value.eq_ignore_ascii_case("false")),
            None => false,
        }
    }
}

/// Types decodable from query parameters
pub trait FromParameters: Sized {
    fn from_parameters(params: &Parameters) -> Result<Self, ParameterError>;
}

impl FromParameters for PodExecOptions {
    fn from_parameters(params: &Parameters) -> Result<Self, ParameterError> {
        Ok(Self {
            stdin: params.flag("stdin"),
            stdout: params.flag("stdout"),
            stderr: params.flag("stderr"),
            tty: params.flag("tty"),
            container: params.first("container").unwrap_or_default().to_string(),
            command: params.all("command").to_vec(),
        })
    }
}

impl FromParameters for PodAttachOptions {
    fn from_parameters(params: &Parameters) -> Result<Self, ParameterError> {
        Ok(Self {
            stdin: params.flag("stdin"),
            stdout: params.flag("stdout"),
            stderr: params.flag("stderr"),
            tty: params.flag("tty"),
            container: params.first("container").unwrap_or_default().to_string(),
        })
    }
}

impl FromParameters for PodPortForwardOptions {
    fn from_parameters(params: &Parameters) -> Result<Self, ParameterError> {
        let mut ports = Vec::new();
        for value in params.all("ports") {
            for port in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let parsed = port.parse::<u16>().map_err(|err| ParameterError {
                    message: format!("cannot convert to []int32: {:?}: {}", port, err),
                })?;
                ports.push(parsed);
            }
        }
        Ok(Self { ports })
    }
}

/// Decoder for connect options carried in the query string
#[derive(Debug, Clone, Default)]
pub struct ParameterCodec;

impl ParameterCodec {
    pub fn decode<T: FromParameters>(&self, query: Option<&str>) -> Result<T, ParameterError> {
        T::from_parameters(&Parameters::parse(query))
    }

    /// Decode the options matching a connect sub-resource
    pub fn decode_connect(
        &self,
        subresource: ConnectSubresource,
        query: Option<&str>,
    ) -> Result<ConnectOptions, ParameterError> {
        Ok(match subresource {
            ConnectSubresource::Exec => ConnectOptions::Exec(self.decode(query)?),
            ConnectSubresource::Attach => ConnectOptions::Attach(self.decode(query)?),
            ConnectSubresource::PortForward => ConnectOptions::PortForward(self.decode(query)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subresource_lookup() {
        assert_eq!(
            ConnectSubresource::from_subresource("exec"),
            Some(ConnectSubresource::Exec)
        );
        assert_eq!(
            ConnectSubresource::from_subresource("portforward"),
            Some(ConnectSubresource::PortForward)
        );
        assert_eq!(ConnectSubresource::from_subresource("log"), None);
        assert_eq!(ConnectSubresource::from_subresource("Exec"), None);
    }

    #[test]
    fn test_decode_exec_options() {
        let codec = ParameterCodec::default();
        let options: PodExecOptions = codec
            .decode(Some("container=app&command=sh&command=-c&command=echo%20hi&stdin=true&tty=1"))
            .unwrap();

        assert_eq!(options.container, "app");
        assert_eq!(options.command, vec!["sh", "-c", "echo hi"]);
        assert!(options.stdin);
        assert!(options.tty);
        assert!(!options.stdout);
        assert!(!options.stderr);
    }

    #[test]
    fn test_bool_conversion_follows_api_server() {
        let params = Parameters::parse(Some("a=false&b=0&c=FALSE&d=yes&e="));
        assert!(!params.flag("a"));
        assert!(!params.flag("b"));
        assert!(!params.flag("c"));
        assert!(params.flag("d"));
        assert!(params.flag("e"));
        assert!(!params.flag("missing"));
    }

    #[test]
    fn test_decode_port_forward() {
        let codec = ParameterCodec::default();
        let options = codec
            .decode_connect(ConnectSubresource::PortForward, Some("ports=8080,9090&ports=443"))
            .unwrap();
        assert_eq!(
            options,
            ConnectOptions::PortForward(PodPortForwardOptions {
                ports: vec![8080, 9090, 443]
            })
        );
        assert_eq!(options.kind().kind, "PodPortForwardOptions");
    }

    #[test]
    fn test_invalid_port_is_parameter_error() {
        let codec = ParameterCodec::default();
        let err = codec
            .decode_connect(ConnectSubresource::PortForward, Some("ports=http"))
            .unwrap_err();
        assert!(err.message.starts_with("cannot convert to []int32"));

        let redirect: RedirectError = err.into();
        assert_eq!(redirect.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_attach_without_query() {
        let codec = ParameterCodec::default();
        let options = codec
            .decode_connect(ConnectSubresource::Attach, None)
            .unwrap();
        assert_eq!(options, ConnectOptions::Attach(PodAttachOptions::default()));
    }

    #[test]
    fn test_options_serialize_camel_case() {
        let options = ConnectOptions::Exec(PodExecOptions {
            stdin: true,
            container: "app".to_string(),
            command: vec!["ls".to_string()],
            ..Default::default()
        });
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["stdin"], true);
        assert_eq!(json["container"], "app");
        assert_eq!(json["command"][0], "ls");
    }
}
