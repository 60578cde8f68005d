//! Implements AuthPort using grammers Client.
//!
//! Holds a client (shared with TgGateway via Arc in main). Stores the login
//! and password tokens between calls for the interactive auth flow.

use crate::domain::DomainError;
use crate::ports::AuthPort;
use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::Client;
use tokio::sync::Mutex;

/// Auth adapter. Wraps grammers Client for login/2FA.
pub struct GrammersAuthAdapter {
    client: Client,
    api_hash: String,
    login_token: Mutex<Option<LoginToken>>,
    password_token: Mutex<Option<PasswordToken>>,
}

impl GrammersAuthAdapter {
    pub fn new(client: Client, api_hash: String) -> Self {
        Self {
            client,
            api_hash,
            login_token: Mutex::new(None),
            password_token: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AuthPort for GrammersAuthAdapter {
    async fn is_authenticated(&self) -> Result<bool, DomainError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| DomainError::Auth(e.to_string()))
    }

    async fn request_login_code(&self, phone: &str) -> Result<(), DomainError> {
        let token = self
            .client
            .request_login_code(phone, &self.api_hash)
            .await
            .map_err(|e| DomainError::Auth(format!("request_login_code: {e}")))?;
        *self.login_token.lock().await = Some(token);
        *self.password_token.lock().await = None;
        Ok(())
    }

    /// Returns `true` when a 2FA password is additionally required.
    async fn sign_in(&self, code: &str) -> Result<bool, DomainError> {
        let token = self.login_token.lock().await.take().ok_or_else(|| {
            DomainError::Auth("request_login_code must be called before sign_in".into())
        })?;
        match self.client.sign_in(&token, code).await {
            Ok(_user) => Ok(false),
            Err(grammers_client::SignInError::PasswordRequired(pt)) => {
                *self.password_token.lock().await = Some(pt);
                Ok(true)
            }
            Err(grammers_client::SignInError::InvalidCode) => Err(DomainError::Auth(
                "invalid login code, run the auth flow again".into(),
            )),
            Err(grammers_client::SignInError::SignUpRequired) => Err(DomainError::Auth(
                "sign-up required, create an account with the official client first".into(),
            )),
            Err(e) => Err(DomainError::Auth(format!("sign in: {e}"))),
        }
    }

    async fn check_password(&self, password: &str) -> Result<(), DomainError> {
        let pt = self.password_token.lock().await.take().ok_or_else(|| {
            DomainError::Auth("sign_in must return password_required before check_password".into())
        })?;
        self.client
            .check_password(pt, password.as_bytes())
            .await
            .map_err(|e| DomainError::Auth(format!("check_password: {e}")))?;
        Ok(())
    }
}
