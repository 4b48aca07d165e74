#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

use crate::credentials::{Credential, CredentialStore};
use crate::error::{ClientError, Result};
use crate::storage::UserProfile;
use crate::transport::{ApiRequest, Transport};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenPair {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthPayload {
    #[serde(default)]
    tokens: Option<TokenPair>,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct Detail {
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    transport: Transport,
}

impl AuthService {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.transport.credentials()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let request =
            ApiRequest::post("/auth/login").json(json!({ "email": email, "password": password }));
        self.sign_in(&request, Some(email)).await
    }

    pub async fn google_login(&self, id_token: &str) -> Result<UserProfile> {
        let request = ApiRequest::post("/auth/google/login").json(json!({ "token": id_token }));
        self.sign_in(&request, None).await
    }

    pub async fn signup(&self, signup: &SignupRequest) -> Result<String> {
        let mut fields = vec![
            ("email", signup.email.clone()),
            ("password", signup.password.clone()),
        ];
        if let Some(first_name) = &signup.first_name {
            fields.push(("first_name", first_name.clone()));
        }
        if let Some(last_name) = &signup.last_name {
            fields.push(("last_name", last_name.clone()));
        }
        self.detail(&ApiRequest::post("/auth/signup").form(fields)).await
    }

    pub async fn verify_email(&self, email: &str, otp: &str) -> Result<String> {
        let request =
            ApiRequest::post("/auth/verify-email").json(json!({ "email": email, "otp": otp }));
        self.detail(&request).await
    }

    pub async fn resend_otp(&self, email: &str) -> Result<String> {
        let request = ApiRequest::post("/auth/resend-otp").form([("email", email)]);
        self.detail(&request).await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<String> {
        let request =
            ApiRequest::post("/auth/password-reset/request").json(json!({ "email": email }));
        self.detail(&request).await
    }

    /// Sets a new password with the token from the reset mail. The backend
    /// revokes outstanding sessions, so local credentials are not reused.
    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<String> {
        let request = ApiRequest::post("/auth/password-reset/confirm").json(json!({
            "token": token,
            "new_password": new_password,
            "confirm_new_password": new_password,
        }));
        self.detail(&request).await
    }

    pub async fn logout(&self) -> Result<()> {
        if let Some(refresh) = self.credentials().refresh_token() {
            let request = ApiRequest::post("/auth/logout").json(json!({ "refresh": refresh }));
            if let Err(err) = self.transport.call_unit(&request).await {
                warn!(%err, "server-side logout failed");
            }
        }
        self.credentials().clear()?;
        info!("signed out");
        Ok(())
    }

    pub async fn profile(&self) -> Result<UserProfile> {
        self.transport
            .call_json(&ApiRequest::get("/profile"))
            .await
    }

    /// A rejected refresh credential clears storage; network failures are
    /// returned and leave the stored session in place.
    pub async fn restore_session(&self) -> Result<Option<UserProfile>> {
        let credentials = self.credentials();
        let Some(stored) = credentials.load()? else {
            return Ok(None);
        };

        if let Err(err) = credentials.renew().await {
            if matches!(err, ClientError::CredentialExpired) {
                warn!("stored session rejected, signing out");
                credentials.clear()?;
                return Ok(None);
            }
            return Err(err);
        }

        match self.profile().await {
            Ok(user) => {
                let snapshot = user.clone();
                credentials.save(move |current| {
                    current.map(|mut credential| {
                        credential.user = Some(snapshot);
                        credential
                    })
                })?;
                Ok(Some(user))
            }
            Err(err) if err.forces_logout() => Ok(None),
            Err(err) => {
                warn!(%err, "profile refresh failed, keeping stored snapshot");
                Ok(Some(stored.user.unwrap_or_default()))
            }
        }
    }

    async fn detail(&self, request: &ApiRequest) -> Result<String> {
        let detail: Detail = self.transport.call_json(request).await?;
        Ok(detail.detail.unwrap_or_default())
    }

    async fn sign_in(&self, request: &ApiRequest, email: Option<&str>) -> Result<UserProfile> {
        let payload: AuthPayload = self.transport.call_json(request).await?;
        let tokens = payload.tokens.unwrap_or_default();
        let Some(access) = tokens.access else {
            return Err(ClientError::request_failed(StatusCode::OK, "invalid response"));
        };
        let user = payload
            .user
            .or_else(|| email.map(UserProfile::from_email))
            .unwrap_or_default();

        let snapshot = user.clone();
        self.credentials()
            .save(move |_| Some(Credential::issued(access, tokens.refresh, Some(snapshot))))?;
        info!(user = %user.email, "signed in");
        Ok(user)
    }
}
