//! Credential lifecycle: a short-lived access credential held in memory and a
//! refresh credential persisted through [`CredentialStorage`].
//!
//! Renewal is single-flight. Every change of the access credential bumps a
//! generation counter; a caller that saw generation `g` fail only performs a
//! renewal if the generation is still `g` once it holds the renewal gate,
//! otherwise it picks up whatever the winning renewal produced.

use crate::error::{ClientError, Result};
use crate::storage::{CredentialStorage, PersistedCredential, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Sessions older than this are discarded regardless of refresh validity.
pub const SESSION_MAX_AGE_DAYS: i64 = 3;

pub fn session_max_age() -> Duration {
    Duration::days(SESSION_MAX_AGE_DAYS)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub user: Option<UserProfile>,
}

impl Credential {
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        user: Option<UserProfile>,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            issued_at: Utc::now(),
            user,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at > session_max_age()
    }

    fn from_persisted(record: PersistedCredential) -> Self {
        Self {
            access_token: None,
            refresh_token: record.refresh_token,
            issued_at: record.issued_at,
            user: record.user,
        }
    }

    fn to_persisted(&self) -> PersistedCredential {
        PersistedCredential {
            refresh_token: self.refresh_token.clone(),
            issued_at: self.issued_at,
            user: self.user.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    SignedOut,
    SignedIn(Option<UserProfile>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewedTokens {
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<RenewedTokens>;
}

/// Renews against `POST {base}/auth/token/refresh/` with a bare client, so the
/// renewal request never passes through the bearer/retry machinery.
pub struct HttpTokenRenewer {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTokenRenewer {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/auth/token/refresh/", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TokenRenewer for HttpTokenRenewer {
    async fn renew(&self, refresh_token: &str) -> Result<RenewedTokens> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "refresh": refresh_token }))
            .send()
            .await?;
        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            debug!(status = status.as_u16(), "refresh credential rejected");
            return Err(ClientError::CredentialExpired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::request_failed(status, body));
        }
        Ok(response.json::<RenewedTokens>().await?)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct AccessSnapshot {
    pub token: Option<String>,
    pub generation: u64,
}

#[derive(Default)]
struct State {
    credential: Option<Credential>,
    generation: u64,
}

struct Shared {
    storage: Arc<dyn CredentialStorage>,
    renewer: Arc<dyn TokenRenewer>,
    state: RwLock<State>,
    renewal_gate: Mutex<()>,
    status_tx: watch::Sender<AuthStatus>,
}

#[derive(Clone)]
pub struct CredentialStore {
    shared: Arc<Shared>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn CredentialStorage>, renewer: Arc<dyn TokenRenewer>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::SignedOut);
        Self {
            shared: Arc::new(Shared {
                storage,
                renewer,
                state: RwLock::new(State::default()),
                renewal_gate: Mutex::new(()),
                status_tx,
            }),
        }
    }

    /// Hydrates from durable storage. The returned credential never carries
    /// an access token; one renewal is needed after every process start.
    pub fn load(&self) -> Result<Option<Credential>> {
        let record = self.shared.storage.read()?;
        let credential = match record.map(Credential::from_persisted) {
            Some(credential) if !credential.is_expired_at(Utc::now()) => credential,
            Some(_) => {
                info!("stored session exceeded maximum age, discarding");
                self.clear()?;
                return Ok(None);
            }
            None => {
                self.clear()?;
                return Ok(None);
            }
        };

        {
            let mut state = self.shared.state.write();
            state.credential = Some(credential.clone());
            state.generation += 1;
        }
        self.publish(AuthStatus::SignedIn(credential.user.clone()));
        Ok(Some(credential))
    }

    /// Applies `update` to the current credential. Only the refresh credential,
    /// issuance time and profile snapshot reach durable storage.
    pub fn save<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(Option<Credential>) -> Option<Credential>,
    {
        let current = self.shared.state.read().credential.clone();
        let Some(next) = update(current) else {
            return self.clear();
        };

        self.shared.storage.write(&next.to_persisted())?;
        {
            let mut state = self.shared.state.write();
            let previous_access = state.credential.as_ref().and_then(|c| c.access_token.clone());
            if previous_access != next.access_token {
                state.generation += 1;
            }
            state.credential = Some(next.clone());
        }
        self.publish(AuthStatus::SignedIn(next.user));
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let was_signed_in = {
            let mut state = self.shared.state.write();
            state.generation += 1;
            state.credential.take().is_some()
        };
        if was_signed_in {
            info!("credentials cleared");
        }
        self.publish(AuthStatus::SignedOut);
        self.shared.storage.remove()
    }

    /// Concurrent callers share one renewal. The caller decides whether a
    /// `CredentialExpired` clears the session.
    pub async fn renew(&self) -> Result<String> {
        let generation = self.shared.state.read().generation;
        self.renew_after(generation).await
    }

    pub(crate) async fn renew_after(&self, observed_generation: u64) -> Result<String> {
        let _gate = self.shared.renewal_gate.lock().await;

        let refresh_token = {
            let state = self.shared.state.read();
            if state.generation != observed_generation {
                debug!("renewal already completed by another caller");
                return state
                    .credential
                    .as_ref()
                    .and_then(|c| c.access_token.clone())
                    .ok_or(ClientError::CredentialExpired);
            }
            match state.credential.as_ref() {
                Some(credential) if credential.is_expired_at(Utc::now()) => None,
                Some(credential) => credential.refresh_token.clone(),
                None => None,
            }
        };
        let Some(refresh_token) = refresh_token else {
            return Err(ClientError::CredentialExpired);
        };

        debug!("renewing access credential");
        let tokens = match self.shared.renewer.renew(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(%err, "access credential renewal failed");
                return Err(err);
            }
        };
        let Some(access) = tokens.access else {
            warn!("renewal response carried no access credential");
            return Err(ClientError::CredentialExpired);
        };

        let renewed = access.clone();
        self.save(move |current| {
            current.map(|mut credential| {
                credential.access_token = Some(renewed);
                if let Some(refresh) = tokens.refresh {
                    credential.refresh_token = Some(refresh);
                }
                credential
            })
        })?;

        // A concurrent clear() wins over the renewal.
        match self.access_token() {
            Some(token) if token == access => Ok(access),
            _ => Err(ClientError::CredentialExpired),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_snapshot().token
    }

    pub(crate) fn access_snapshot(&self) -> AccessSnapshot {
        {
            let state = self.shared.state.read();
            let expired = state
                .credential
                .as_ref()
                .is_some_and(|c| c.is_expired_at(Utc::now()));
            if !expired {
                return AccessSnapshot {
                    token: state.credential.as_ref().and_then(|c| c.access_token.clone()),
                    generation: state.generation,
                };
            }
        }
        info!("session exceeded maximum age, discarding");
        if let Err(err) = self.clear() {
            warn!(%err, "failed to remove expired credential record");
        }
        AccessSnapshot {
            token: None,
            generation: self.shared.state.read().generation,
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.shared.state.read().credential.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.shared
            .state
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.user.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.shared
            .state
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.shared.state.read().credential.is_some()
    }

    /// Sign-in status feed. `SignedOut` is published on every clear, which is
    /// how a forced logout reaches the rest of the process.
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.shared.status_tx.subscribe()
    }

    fn publish(&self, status: AuthStatus) {
        self.shared.status_tx.send_replace(status);
    }
}
