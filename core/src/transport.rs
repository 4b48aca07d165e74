#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

use crate::config::ClientSettings;
use crate::credentials::{CredentialStore, HttpTokenRenewer};
use crate::error::{ClientError, Result};
use crate::storage::CredentialStorage;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Anonymous account endpoints answer 401 themselves and are never retried
/// behind a renewal.
const CREDENTIAL_ISSUING_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/signup",
    "/auth/token/refresh",
    "/auth/google/",
    "/auth/magic-link/",
    "/auth/verify-email",
    "/auth/resend-otp",
    "/auth/password-reset/",
];

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A request relative to the API base URL. Kept as plain data so it can be
/// reissued after a renewal.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Body,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: Body::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_credential_issuing(&self) -> bool {
        CREDENTIAL_ISSUING_PATHS
            .iter()
            .any(|prefix| self.path.starts_with(prefix))
    }
}

#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl Transport {
    pub fn new(http: reqwest::Client, base_url: &str, credentials: CredentialStore) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_settings(
        settings: &ClientSettings,
        storage: Arc<dyn CredentialStorage>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let base_url = settings.base_url.as_str();
        let renewer = Arc::new(HttpTokenRenewer::new(http.clone(), base_url));
        let credentials = CredentialStore::new(storage, renewer);
        Ok(Self::new(http, base_url, credentials))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A 401 triggers one shared renewal and a single reissue. A failed
    /// renewal or a second 401 ends the session.
    pub async fn call(&self, request: &ApiRequest) -> Result<Response> {
        let snapshot = self.credentials.access_snapshot();
        let response = self.send(request, snapshot.token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || request.is_credential_issuing() {
            return ensure_success(response).await;
        }

        debug!(path = %request.path, "authorization failed, renewing access credential");
        let token = match self.credentials.renew_after(snapshot.generation).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%err, path = %request.path, "renewal failed, ending session");
                self.expire_session();
                return Err(ClientError::SessionExpired);
            }
        };

        let retried = self.send(request, Some(&token)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "authorization failed after renewal, ending session");
            self.expire_session();
            return Err(ClientError::SessionExpired);
        }
        ensure_success(retried).await
    }

    pub async fn call_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let response = self.call(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn call_unit(&self, request: &ApiRequest) -> Result<()> {
        self.call(request).await.map(|_| ())
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(fields) => builder.form(fields),
        };
        let response = builder.send().await?;
        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status().as_u16(),
            "api call"
        );
        Ok(response)
    }

    fn expire_session(&self) {
        if let Err(err) = self.credentials.clear() {
            warn!(%err, "failed to clear credentials after session expiry");
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::request_failed(status, body))
}
