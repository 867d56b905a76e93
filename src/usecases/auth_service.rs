//! Login / 2FA flow: phone -> code -> password (when two-step verification is on).
//!
//! Runs before any crawl or download so the session file carries an authorized key.

use crate::domain::{DomainError, SignInResult};
use crate::ports::{AuthPort, LoginPrompt};
use std::sync::Arc;
use tracing::info;

pub struct AuthService {
    auth: Arc<dyn AuthPort>,
    prompt: Arc<dyn LoginPrompt>,
    api_hash: String,
}

impl AuthService {
    pub fn new(auth: Arc<dyn AuthPort>, prompt: Arc<dyn LoginPrompt>, api_hash: String) -> Self {
        Self {
            auth,
            prompt,
            api_hash,
        }
    }

    /// Sign in unless the session is already authorized. Returns true when a login happened.
    pub async fn ensure_authorized(&self) -> Result<bool, DomainError> {
        if self.auth.is_authenticated().await? {
            info!("session already authorized");
            return Ok(false);
        }

        let phone = self.prompt.phone()?;
        self.auth.request_login_code(phone.trim(), &self.api_hash).await?;
        info!("login code requested");

        let code = self.prompt.code()?;
        match self.auth.sign_in(code.trim()).await? {
            SignInResult::Success => {}
            SignInResult::PasswordRequired { hint } => {
                let password = self.prompt.password(hint.as_deref())?;
                self.auth.check_password(password.as_bytes()).await?;
            }
        }
        info!("signed in");
        Ok(true)
    }
}
