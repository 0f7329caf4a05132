//! Database Credential Leases
//!
//! Keeps one short-lived database credential valid for a fixed service
//! principal. All sessions share a single [`LeaseManager`], passed around as
//! an `Arc`; callers only ever see a [`LeaseValue`], never the lease itself.
//!
//! # Refresh
//!
//! A lease whose remaining validity is below the safety margin is refreshed
//! on access. Refreshes are single-flight: callers that arrive while a
//! refresh is running wait for it and reuse its outcome, so the issuer never
//! sees two concurrent mint calls.
//!
//! If a refresh fails while the held lease has not yet expired, the lease is
//! returned with `stale = true`. Only an expired (or missing) lease combined
//! with a failed refresh is an error.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::session::BearerToken;

/// Errors from the credential issuer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    /// The request could not be sent or the connection failed
    #[error("credential request failed: {0}")]
    Request(String),

    /// The issuer answered with a non-success status
    #[error("credential issuer returned HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The issuer's answer could not be understood
    #[error("invalid credential response: {0}")]
    InvalidResponse(String),
}

/// Errors returned to consumers of a lease
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No valid lease is held and refreshing it failed
    #[error("credential unavailable: {0}")]
    Unavailable(#[source] MintError),
}

/// A freshly minted credential
#[derive(Clone, Debug)]
pub struct MintedCredential {
    /// The secret
    pub value: BearerToken,
    /// When the credential stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Mints time-bounded credentials for a service principal
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Mint a new credential
    async fn mint(&self) -> Result<MintedCredential, MintError>;
}

/// The lease held by the manager
#[derive(Clone, Debug)]
struct CredentialLease {
    value: BearerToken,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CredentialLease {
    fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at - now >= margin
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// What a caller gets back from [`LeaseManager::current_value`]
#[derive(Clone, Debug)]
pub struct LeaseValue {
    /// The credential
    pub value: BearerToken,
    /// When it expires
    pub expires_at: DateTime<Utc>,
    /// The last refresh failed and this is the previously held lease
    pub stale: bool,
}

/// Owner of the process-wide credential lease
pub struct LeaseManager {
    issuer: Arc<dyn CredentialIssuer>,
    margin: chrono::Duration,
    lease: RwLock<Option<CredentialLease>>,
    /// Serializes refreshes
    refresh_gate: tokio::sync::Mutex<()>,
    /// Completed refresh attempts, successful or not
    attempts: AtomicU64,
    /// Error of the most recent failed attempt
    last_error: Mutex<Option<MintError>>,
}

impl LeaseManager {
    /// Create a manager that refreshes when less than `margin` validity remains
    pub fn new(issuer: Arc<dyn CredentialIssuer>, margin: Duration) -> Self {
        let margin =
            chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            issuer,
            margin,
            lease: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Number of mint attempts made so far
    #[must_use]
    pub fn refresh_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Return a credential valid for at least the safety margin
    ///
    /// A freshly minted credential whose lifetime is shorter than the margin
    /// is still returned as not stale; the next call refreshes again.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unavailable`] when no unexpired lease is
    /// held and the refresh failed.
    pub async fn current_value(&self) -> Result<LeaseValue, CredentialError> {
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;

        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }

        let attempts = self.attempts.load(Ordering::Acquire);
        if attempts != observed {
            // A refresh finished while we waited and still left no fresh lease
            tracing::debug!(attempt = attempts, "Reusing outcome of concurrent refresh");
            let last_error = self.last_error.lock().clone();
            return match last_error {
                Some(error) => self.fallback(error),
                None => self.held_value(false).ok_or_else(|| {
                    CredentialError::Unavailable(MintError::InvalidResponse(
                        "issued credential is already expired".to_string(),
                    ))
                }),
            };
        }

        self.refresh().await
    }

    /// Lease held right now, if it is still valid for the margin
    fn fresh_value(&self) -> Option<LeaseValue> {
        let lease = self.lease.read();
        lease
            .as_ref()
            .filter(|lease| lease.is_fresh(Utc::now(), self.margin))
            .map(|lease| LeaseValue {
                value: lease.value.clone(),
                expires_at: lease.expires_at,
                stale: false,
            })
    }

    /// Mint a new credential; must be called with the refresh gate held
    async fn refresh(&self) -> Result<LeaseValue, CredentialError> {
        tracing::debug!("Refreshing database credential");
        let result = self.issuer.mint().await;
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(minted) => {
                let lease = CredentialLease {
                    value: minted.value,
                    issued_at: Utc::now(),
                    expires_at: minted.expires_at,
                };
                tracing::info!(
                    attempt,
                    issued_at = %lease.issued_at,
                    expires_at = %lease.expires_at,
                    "Database credential refreshed"
                );
                let value = LeaseValue {
                    value: lease.value.clone(),
                    expires_at: lease.expires_at,
                    stale: false,
                };
                *self.lease.write() = Some(lease);
                *self.last_error.lock() = None;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Database credential refresh failed");
                *self.last_error.lock() = Some(e.clone());
                self.fallback(e)
            }
        }
    }

    /// Serve the held lease as stale, or fail if it has expired
    fn fallback(&self, error: MintError) -> Result<LeaseValue, CredentialError> {
        self.held_value(true)
            .ok_or(CredentialError::Unavailable(error))
    }

    /// Held lease, if it has not expired yet
    fn held_value(&self, stale: bool) -> Option<LeaseValue> {
        let lease = self.lease.read();
        lease
            .as_ref()
            .filter(|lease| !lease.is_expired(Utc::now()))
            .map(|lease| LeaseValue {
                value: lease.value.clone(),
                expires_at: lease.expires_at,
                stale,
            })
    }
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("margin", &self.margin)
            .field("attempts", &self.refresh_attempts())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HTTP issuer
// ============================================================================

/// Issuer response body
#[derive(Debug, Deserialize)]
struct CredentialResponse {
    token: String,
    expiration_time: DateTime<Utc>,
}

/// Mints database credentials through the workspace REST API
///
/// ```text
/// POST {host}/api/2.0/database/credentials
/// Authorization: Bearer <service principal token>
///
/// {"instance_names": ["..."], "request_id": "<uuid>"}
/// ```
#[derive(Clone)]
pub struct HttpCredentialIssuer {
    http_client: reqwest::Client,
    url: String,
    instance_names: Vec<String>,
    principal_token: BearerToken,
}

impl HttpCredentialIssuer {
    /// Create an issuer for one database instance
    ///
    /// # Errors
    ///
    /// Returns [`MintError::Request`] if the HTTP client cannot be built.
    pub fn new(
        host: &str,
        instance_name: impl Into<String>,
        principal_token: BearerToken,
        timeout: Duration,
    ) -> Result<Self, MintError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MintError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            url: format!("{}/api/2.0/database/credentials", host.trim_end_matches('/')),
            instance_names: vec![instance_name.into()],
            principal_token,
        })
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn mint(&self) -> Result<MintedCredential, MintError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(url = %self.url, request_id = %request_id, "Requesting database credential");

        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(self.principal_token.expose())
            .json(&json!({
                "instance_names": self.instance_names,
                "request_id": request_id,
            }))
            .send()
            .await
            .map_err(|e| MintError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MintError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let body: CredentialResponse = response
            .json()
            .await
            .map_err(|e| MintError::InvalidResponse(e.to_string()))?;

        Ok(MintedCredential {
            value: BearerToken::new(body.token),
            expires_at: body.expiration_time,
        })
    }
}

impl fmt::Debug for HttpCredentialIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentialIssuer")
            .field("url", &self.url)
            .field("instance_names", &self.instance_names)
            .finish_non_exhaustive()
    }
}
