//! Background credential refresh
//!
//! Providers whose backend hands out short-lived bearer tokens own a
//! [`SharedCredential`] and keep it current with [`spawn_refresh`]. The
//! request path only ever reads the latest published token; it never waits
//! on a fetch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diragent_core::retry::{BackoffStrategy, ExponentialBackoff};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A bearer token and when it stops being valid
#[derive(Debug, Clone)]
pub struct Credential {
    /// The token
    pub token: SecretString,

    /// Expiry, if the issuer reports one
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A token without a known expiry
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            expires_at: None,
        }
    }

    /// Set the expiry
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// How long until this credential should be replaced
    ///
    /// `skew` before expiry, or `interval` when there is no expiry. Never
    /// negative.
    pub fn refresh_in(&self, now: DateTime<Utc>, skew: Duration, interval: Duration) -> Duration {
        let Some(expires_at) = self.expires_at else {
            return interval;
        };
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
        (expires_at - skew - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Where fresh credentials come from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain a new credential
    async fn fetch(&self) -> anyhow::Result<Credential>;
}

/// The most recently fetched credential, shared between a provider and its
/// refresh task
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl SharedCredential {
    /// An empty handle
    pub fn new() -> Self {
        Self::default()
    }

    /// The current credential, if one has been fetched
    pub async fn get(&self) -> Option<Credential> {
        self.inner.read().await.clone()
    }

    /// The current token, if one has been fetched
    pub async fn token(&self) -> Option<SecretString> {
        self.inner.read().await.as_ref().map(|c| c.token.clone())
    }

    /// Replace the credential
    pub async fn set(&self, credential: Credential) {
        *self.inner.write().await = Some(credential);
    }
}

/// Timing for [`spawn_refresh`]
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Retry policy for failed fetches
    pub retry: ExponentialBackoff,

    /// How long before expiry to refresh
    pub skew: Duration,

    /// Refresh period for credentials without an expiry
    pub interval: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            retry: ExponentialBackoff::default(),
            skew: Duration::from_secs(60),
            interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Keep `shared` populated from `source` until `shutdown` is cancelled
///
/// Failed fetches are retried according to `options.retry`. When a bounded
/// policy gives up, the task waits for the policy's maximum delay and starts
/// over; the previous credential stays published meanwhile.
pub fn spawn_refresh<S>(
    source: Arc<S>,
    shared: SharedCredential,
    options: RefreshOptions,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    S: CredentialSource + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = options.retry.execute(|| source.fetch()) => fetched,
            };

            let wait = match fetched {
                Ok(credential) => {
                    let wait = credential.refresh_in(Utc::now(), options.skew, options.interval);
                    info!(
                        expires_at = ?credential.expires_at,
                        next_refresh = ?wait,
                        "credential refreshed"
                    );
                    shared.set(credential).await;
                    wait
                }
                Err(err) => {
                    warn!(error = %err, "credential refresh gave up");
                    options.retry.max_delay()
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!("credential refresh stopped");
    })
}
