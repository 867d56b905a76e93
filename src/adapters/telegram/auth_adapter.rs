//! Implements AuthPort using grammers Client.
//!
//! The login token and, after `PasswordRequired`, the password token are kept
//! between calls as a small state machine.

use crate::domain::{DomainError, SignInResult};
use crate::ports::AuthPort;
use async_trait::async_trait;
use grammers_client::Client;
use grammers_client::SignInError;
use grammers_client::client::{LoginToken, PasswordToken};
use tokio::sync::Mutex;
use tracing::debug;

enum AuthStage {
    Idle,
    CodeSent(LoginToken),
    PasswordNeeded(PasswordToken),
}

/// Auth adapter. Shares the session's client with the message source.
pub struct GrammersAuthAdapter {
    client: Client,
    stage: Mutex<AuthStage>,
}

impl GrammersAuthAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            stage: Mutex::new(AuthStage::Idle),
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

    async fn request_login_code(&self, phone: &str, api_hash: &str) -> Result<(), DomainError> {
        let token = self
            .client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| DomainError::Auth(format!("request login code: {}", e)))?;
        *self.stage.lock().await = AuthStage::CodeSent(token);
        debug!("login code sent");
        Ok(())
    }

    async fn sign_in(&self, code: &str) -> Result<SignInResult, DomainError> {
        let mut stage = self.stage.lock().await;
        let AuthStage::CodeSent(token) = std::mem::replace(&mut *stage, AuthStage::Idle) else {
            return Err(DomainError::Auth("no login code was requested".into()));
        };
        match self.client.sign_in(&token, code).await {
            Ok(_user) => Ok(SignInResult::Success),
            Err(SignInError::PasswordRequired(pt)) => {
                let hint = pt.hint().map(String::from);
                *stage = AuthStage::PasswordNeeded(pt);
                Ok(SignInResult::PasswordRequired { hint })
            }
            Err(SignInError::InvalidCode) => {
                Err(DomainError::Auth("invalid login code".into()))
            }
            Err(SignInError::SignUpRequired) => Err(DomainError::Auth(
                "this phone number has no account; sign up with an official app first".into(),
            )),
            Err(e) => Err(DomainError::Auth(format!("sign in: {}", e))),
        }
    }

    async fn check_password(&self, password: &[u8]) -> Result<(), DomainError> {
        let mut stage = self.stage.lock().await;
        let AuthStage::PasswordNeeded(pt) = std::mem::replace(&mut *stage, AuthStage::Idle) else {
            return Err(DomainError::Auth("no password was requested".into()));
        };
        self.client
            .check_password(pt, password)
            .await
            .map_err(|e| DomainError::Auth(format!("check password: {}", e)))?;
        Ok(())
    }
}
