//! # Authentication Middleware
//!
//! Admission plugins need to know who is asking. This middleware extracts the caller's bearer
//! token, asks a [`TokenAuthenticator`] who it belongs to, and stores the resulting
//! `UserInfo` in the request extensions.
//!
//! Requests without a token continue anonymously; the API server behind the gateway still
//! makes its own authorization decisions. A token that is presented but rejected ends the
//! request with `401 Unauthorized`.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<dyn TokenAuthenticator>` so tests can swap in a fixed authenticator
//! - `DashMap` as a concurrent cache without a global lock
//! - `BoxFuture` for the async middleware future

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use dashmap::DashMap;
use futures::future::BoxFuture;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};
use tracing::debug;

use crate::core::config::ClusterConnection;
use crate::core::error::{RedirectError, RedirectResult};
use crate::core::types::UserInfo;
use crate::protocols::http::LazyTransport;

const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";

/// Cache size at which expired reviews are swept on insert
const CACHE_PRUNE_THRESHOLD: usize = 1024;

/// Resolves a bearer token to the principal it was issued to
#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// `Err(RedirectError::Unauthenticated)` when the token is not valid
    async fn authenticate(&self, token: &str) -> RedirectResult<UserInfo>;
}

/// Authenticator backed by the virtual cluster's TokenReview API
pub struct TokenReviewAuthenticator {
    transport: LazyTransport,
    ttl: Duration,
    cache: DashMap<String, (Instant, UserInfo)>,
}

impl TokenReviewAuthenticator {
    pub fn new(connection: ClusterConnection, ttl: Duration) -> Self {
        Self {
            transport: LazyTransport::new(connection),
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Tokens are cached under their digest, never verbatim
    fn cache_key(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    fn cached(&self, key: &str) -> Option<UserInfo> {
        let entry = self.cache.get(key)?;
        let (stored_at, user) = entry.value();
        if stored_at.elapsed() < self.ttl {
            Some(user.clone())
        } else {
            drop(entry);
            self.cache.remove(key);
            None
        }
    }

    fn remember(&self, key: String, user: UserInfo) {
        if self.cache.len() >= CACHE_PRUNE_THRESHOLD {
            let ttl = self.ttl;
            self.cache.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        }
        self.cache.insert(key, (Instant::now(), user));
    }
}

#[async_trait]
impl TokenAuthenticator for TokenReviewAuthenticator {
    async fn authenticate(&self, token: &str) -> RedirectResult<UserInfo> {
        let key = Self::cache_key(token);
        if let Some(user) = self.cached(&key) {
            return Ok(user);
        }

        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: None,
            },
            ..Default::default()
        };

        let transport = self.transport.get().await?;
        let answer: TokenReview = transport.post_json(TOKEN_REVIEW_PATH, &review).await?;
        let status = answer.status.unwrap_or_default();

        if status.authenticated != Some(true) {
            let reason = status
                .error
                .unwrap_or_else(|| "invalid bearer token".to_string());
            return Err(RedirectError::unauthenticated(reason));
        }

        let user = status.user.unwrap_or_default();
        if !self.ttl.is_zero() {
            self.remember(key, user.clone());
        }
        Ok(user)
    }
}

/// Bearer token from the `Authorization` header, if any
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Clone)]
pub struct AuthenticationLayer {
    authenticator: Arc<dyn TokenAuthenticator>,
}

impl AuthenticationLayer {
    pub fn new(authenticator: Arc<dyn TokenAuthenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthenticationLayer {
    type Service = AuthenticationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticationService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

#[derive(Clone)]
pub struct AuthenticationService<S> {
    inner: S,
    authenticator: Arc<dyn TokenAuthenticator>,
}

impl<S> Service<Request<Body>> for AuthenticationService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = Arc::clone(&self.authenticator);

        Box::pin(async move {
            let token = bearer_token(request.headers()).map(str::to_string);
            if let Some(token) = token {
                match authenticator.authenticate(&token).await {
                    Ok(user) => {
                        debug!(user = ?user.username, "Authenticated request");
                        request.extensions_mut().insert(user);
                    }
                    Err(e) => {
                        debug!(error = %e, "Rejected bearer token");
                        return Ok(e.into_negotiated_response(request.headers()));
                    }
                }
            }

            inner.call(request).await
        })
    }
}
