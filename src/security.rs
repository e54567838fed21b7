use crate::accounts::{Identity, IdentityProvider};
use crate::config::env_parse;
use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthState {
    identities: Arc<dyn IdentityProvider>,
    limiter: Arc<TokenBuckets>,
}

impl AuthState {
    pub fn from_env(identities: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identities,
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    #[cfg(test)]
    pub fn with_limits(
        identities: Arc<dyn IdentityProvider>,
        rate_per_sec: f64,
        capacity: f64,
    ) -> Self {
        Self {
            identities,
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }
}

/// Resolves the caller's bearer token and inserts its [`Identity`] as a
/// request extension, subject to a per-user token bucket.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_token(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "Provide a Bearer token or X-Licita-Key",
        ));
    };

    let identity = match state.identities.resolve(&presented).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            debug!(target = "licita.api", "rejected unknown token");
            return Ok(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Token not recognized",
            ));
        }
        Err(err) => {
            error!(target = "licita.api", "identity provider failed: {err}");
            return Ok(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "identity_unavailable",
                "Could not verify credentials",
            ));
        }
    };

    match state.limiter.consume(identity.user_id).await {
        Ok(permit) => {
            request.extensions_mut().insert::<Identity>(identity);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_token(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && let Some((scheme, token)) = raw.split_once(char::is_whitespace)
        && scheme.eq_ignore_ascii_case("bearer")
    {
        return Some(token.trim().to_string()).filter(|token| !token.is_empty());
    }
    headers
        .get("X-Licita-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<Uuid, BucketState>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env_parse::<f64>("RATE_LIMIT_PER_SEC")
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env_parse::<f64>("RATE_LIMIT_CAPACITY")
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, user_id: Uuid) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(user_id).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        let snapshot = BucketSnapshot {
            capacity: self.capacity,
            tokens: state.tokens,
            rate: self.rate_per_sec,
        };
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit(BucketSnapshot {
                tokens: state.tokens,
                ..snapshot
            }))
        } else {
            let retry_after = ((1.0 - state.tokens) / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                bucket: snapshot,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct BucketSnapshot {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl BucketSnapshot {
    fn apply_headers(&self, headers: &mut http::HeaderMap, remaining: u64) {
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));
    }
}

struct RatePermit(BucketSnapshot);

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.0.tokens.max(0.0).floor() as u64;
        self.0.apply_headers(headers, remaining);
    }
}

struct RateExceeded {
    retry_after: f64,
    bucket: BucketSnapshot,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = (self.retry_after.ceil().max(1.0)) as u64;
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from(retry));
        self.bucket.apply_headers(headers, 0);
    }
}
