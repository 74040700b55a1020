//! # HTTP Transport to an API Server
//!
//! `ClusterTransport` is a reverse-proxying HTTP/1.1 client bound to one API server: it
//! carries the TLS settings from a `ClusterConnection`, rewrites the target onto the server's
//! base URL, and streams bodies in both directions. Whether it also presents the connection's
//! token and client certificate is fixed by its [`Credentials`].
//!
//! Hop-by-hop headers never cross the proxy. The one exception is an upgrade handshake
//! (`Connection: Upgrade`), used by exec, attach and port-forward: its headers are kept, and a
//! `101 Switching Protocols` answer hands both connections to [`super::upgrade`].
//!
//! ## Rust Concepts Used
//!
//! - `tokio::sync::OnceCell` for build-once, share-forever state without locks on the hot path
//! - Channels bridge a non-`Sync` body stream into the `Sync` stream reqwest expects
//! - `Result` with `?` keeps every construction failure typed as `RedirectError::Transport`

use axum::body::{Body, HttpBody};
use axum::http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONNECTION, HOST, UPGRADE};
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use futures::StreamExt;
use hyper::upgrade::OnUpgrade;
use reqwest::{Certificate, Client, Identity};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info};
use url::Url;

use crate::core::config::ClusterConnection;
use crate::core::error::{RedirectError, RedirectResult};
use crate::protocols::upgrade;

/// Headers scoped to a single connection (RFC 9110 section 7.6.1, plus legacy names)
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Buffered request-body chunks between the inbound connection and the upstream client
const BODY_CHANNEL_CAPACITY: usize = 8;

/// Whether the request asks to switch protocols
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && headers.contains_key(UPGRADE)
}

/// Remove hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Strip hop-by-hop headers but keep the upgrade handshake intact
fn strip_keeping_upgrade(headers: &mut HeaderMap) {
    let protocol = headers.get(UPGRADE).cloned();
    strip_hop_by_hop(headers);
    if let Some(protocol) = protocol {
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, protocol);
    }
}

/// reqwest requires a `Sync` body stream, axum bodies are not; pump through a channel
fn upstream_body(body: Body) -> reqwest::Body {
    let (tx, mut rx) = mpsc::channel::<Result<Bytes, axum::Error>>(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut chunks = body.into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

/// Whose identity a transport presents on proxied requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    /// The connection's token and client certificate; any caller `Authorization` is replaced
    Gateway,
    /// Nothing of the gateway's; the caller's own `Authorization` is forwarded as is
    Caller,
}

/// Proxying client bound to one API server
#[derive(Debug, Clone)]
pub struct ClusterTransport {
    name: String,
    base: Url,
    client: Client,
    bearer: Option<HeaderValue>,
}

impl ClusterTransport {
    /// Build a transport, reading the CA and, for [`Credentials::Gateway`], token and client
    /// identity files
    pub async fn build(
        connection: &ClusterConnection,
        credentials: Credentials,
    ) -> RedirectResult<Self> {
        let fail = |message: String| RedirectError::transport(connection.name.clone(), message);

        let mut builder = Client::builder()
            .http1_only()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connection.connect_timeout)
            .danger_accept_invalid_certs(connection.insecure_skip_tls_verify);

        if let Some(ca_file) = &connection.ca_file {
            let pem = read_file(ca_file).await.map_err(&fail)?;
            let certificates = Certificate::from_pem_bundle(&pem)
                .map_err(|e| fail(format!("invalid CA bundle {}: {}", ca_file.display(), e)))?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        let presents_identity = credentials == Credentials::Gateway;

        if let (true, Some(cert_file), Some(key_file)) = (
            presents_identity,
            &connection.client_certificate_file,
            &connection.client_key_file,
        ) {
            let cert = read_file(cert_file).await.map_err(&fail)?;
            let key = read_file(key_file).await.map_err(&fail)?;
            let identity = Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| fail(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let token = match (&connection.token, &connection.token_file) {
            _ if !presents_identity => None,
            (Some(token), _) => Some(token.trim().to_string()),
            (None, Some(path)) => {
                let raw = read_file(path).await.map_err(&fail)?;
                Some(String::from_utf8_lossy(&raw).trim().to_string())
            }
            (None, None) => None,
        };
        let bearer = token
            .filter(|token| !token.is_empty())
            .map(|token| {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| fail("token contains invalid header characters".to_string()))?;
                value.set_sensitive(true);
                Ok::<_, RedirectError>(value)
            })
            .transpose()?;

        let client = builder
            .build()
            .map_err(|e| fail(format!("failed to build client: {}", e)))?;

        info!(
            cluster = %connection.name,
            server = %connection.server,
            credentials = ?credentials,
            "Built cluster transport"
        );

        Ok(Self {
            name: connection.name.clone(),
            base: connection.server.clone(),
            client,
            bearer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute upstream URL for a request path and query
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base_path, path));
        url.set_query(query);
        url
    }

    /// Forward one request and stream the answer back
    ///
    /// A gateway transport overwrites `Authorization` with its own token; a caller transport
    /// leaves the header exactly as received.
    pub async fn serve(&self, request: Request<Body>) -> RedirectResult<Response<Body>> {
        let (mut parts, body) = request.into_parts();

        let upgrading = is_upgrade_request(&parts.headers);
        let client_upgrade = if upgrading {
            parts.extensions.remove::<OnUpgrade>()
        } else {
            None
        };
        let send_body = !body.is_end_stream();

        let mut headers = std::mem::take(&mut parts.headers);
        if upgrading {
            strip_keeping_upgrade(&mut headers);
        } else {
            strip_hop_by_hop(&mut headers);
        }
        headers.remove(HOST);
        if let Some(bearer) = &self.bearer {
            headers.insert(AUTHORIZATION, bearer.clone());
        }

        let url = self.upstream_url(parts.uri.path(), parts.uri.query());
        debug!(cluster = %self.name, method = %parts.method, url = %url, upgrading, "Forwarding request");

        let mut upstream = self.client.request(parts.method, url).headers(headers);
        if send_body {
            upstream = upstream.body(upstream_body(body));
        }
        let upstream = upstream.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();

        if status == StatusCode::SWITCHING_PROTOCOLS {
            let Some(client_upgrade) = client_upgrade else {
                return Err(RedirectError::upstream(
                    "upstream switched protocols but the client connection cannot be upgraded",
                ));
            };
            strip_keeping_upgrade(&mut response_headers);

            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            *response.headers_mut() = response_headers;

            upgrade::splice(self.name.clone(), client_upgrade, upstream);
            return Ok(response);
        }

        strip_hop_by_hop(&mut response_headers);
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    /// POST a JSON object to `path` and decode the JSON answer
    pub async fn post_json<T, R>(&self, path: &str, body: &T) -> RedirectResult<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.upstream_url(path, None)).json(body);
        if let Some(bearer) = &self.bearer {
            request = request.header(AUTHORIZATION, bearer.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RedirectError::upstream(format!(
                "{} answered {} for {}",
                self.name, status, path
            )));
        }
        Ok(response.json::<R>().await?)
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    tokio::fs::read(path)
        .await
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))
}

/// A transport built on first use and shared afterwards
///
/// A failed build is not cached; the next request tries again.
#[derive(Debug)]
pub struct LazyTransport {
    connection: ClusterConnection,
    credentials: Credentials,
    transport: OnceCell<ClusterTransport>,
}

impl LazyTransport {
    pub fn new(connection: ClusterConnection) -> Self {
        Self::with_credentials(connection, Credentials::Gateway)
    }

    pub fn with_credentials(connection: ClusterConnection, credentials: Credentials) -> Self {
        Self {
            connection,
            credentials,
            transport: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.connection.name
    }

    pub async fn get(&self) -> RedirectResult<&ClusterTransport> {
        self.transport
            .get_or_try_init(|| ClusterTransport::build(&self.connection, self.credentials))
            .await
    }
}
