use crate::domain::errors::GatewayError;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use chrono::{DateTime, Duration, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Gateway sessions last 24 h; refresh well before that.
const TOKEN_LIFETIME_HOURS: i64 = 24;
const REFRESH_MARGIN_HOURS: i64 = 2;

const KEYRING_SERVICE: &str = "riskguard-gateway";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionToken {
    token: String,
    obtained_at: DateTime<Utc>,
}

impl SessionToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.obtained_at + Duration::hours(TOKEN_LIFETIME_HOURS)
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at() - Duration::hours(REFRESH_MARGIN_HOURS)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginKeyRequest<'a> {
    user_name: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginKeyResponse {
    #[serde(default)]
    token: Option<String>,
    success: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    #[serde(default)]
    new_token: Option<String>,
    success: bool,
}

/// Obtains and refreshes the gateway credential for both the REST executor
/// and the stream consumer.
///
/// The secret API key only ever lives in memory; the session token is
/// mirrored into the OS keychain so a restart inside the token's lifetime
/// can resume without a fresh login.
pub struct TokenManager {
    client: ClientWithMiddleware,
    base_url: String,
    username: String,
    api_key: String,
    session: RwLock<Option<SessionToken>>,
    use_keyring: bool,
}

impl TokenManager {
    pub fn new(base_url: String, username: String, api_key: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            username,
            api_key,
            session: RwLock::new(None),
            use_keyring: true,
        }
    }

    /// Headless environments without a keychain service (containers, CI)
    /// fall back to login-on-start.
    pub fn without_keyring(base_url: String, username: String, api_key: String) -> Self {
        Self {
            use_keyring: false,
            ..Self::new(base_url, username, api_key)
        }
    }

    /// The current bearer token, logging in or refreshing as needed.
    pub async fn get(&self) -> Result<String, GatewayError> {
        let now = Utc::now();
        if let Some(session) = self.session.read().await.as_ref()
            && !session.needs_refresh(now)
        {
            return Ok(session.token.clone());
        }

        // Try the keychain copy before a fresh login; it survives restarts.
        if self.session.read().await.is_none()
            && let Some(cached) = self.load_cached().await
            && !cached.needs_refresh(now)
        {
            debug!("resuming gateway session from keychain");
            let token = cached.token.clone();
            *self.session.write().await = Some(cached);
            return Ok(token);
        }

        self.refresh().await
    }

    /// Validates the current token for a fresh one, falling back to a full
    /// re-login. Also the executor's 401 path.
    pub async fn refresh(&self) -> Result<String, GatewayError> {
        let current = self.session.read().await.clone();
        if let Some(session) = current
            && let Ok(token) = self.validate(&session.token).await
        {
            self.store(token.clone()).await;
            return Ok(token);
        }
        let token = self.login().await?;
        self.store(token.clone()).await;
        Ok(token)
    }

    /// Background task: refresh shortly before expiry, forever.
    pub async fn run_refresh_loop(self: Arc<Self>) {
        loop {
            let sleep_for = {
                let session = self.session.read().await;
                match session.as_ref() {
                    Some(s) => {
                        let due = s.expires_at() - Duration::hours(REFRESH_MARGIN_HOURS);
                        (due - Utc::now()).to_std().unwrap_or_default()
                    }
                    None => std::time::Duration::from_secs(60),
                }
            };
            tokio::time::sleep(sleep_for.max(std::time::Duration::from_secs(60))).await;

            match self.refresh().await {
                Ok(_) => info!("gateway session refreshed"),
                Err(e) => warn!(error = %e, "background token refresh failed, will retry"),
            }
        }
    }

    async fn login(&self) -> Result<String, GatewayError> {
        let url = format!("{}/api/Auth/loginKey", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginKeyRequest {
                user_name: &self.username,
                api_key: &self.api_key,
            })
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let body: LoginKeyResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !body.success {
            return Err(GatewayError::Auth {
                code: body.error_code,
                message: body
                    .error_message
                    .unwrap_or_else(|| "login refused".to_string()),
            });
        }
        body.token.ok_or_else(|| {
            GatewayError::Malformed("loginKey success without token".to_string())
        })
    }

    async fn validate(&self, token: &str) -> Result<String, GatewayError> {
        let url = format!("{}/api/Auth/validate", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Http {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !body.success {
            return Err(GatewayError::Auth {
                code: None,
                message: "validate refused".to_string(),
            });
        }
        body.new_token
            .ok_or_else(|| GatewayError::Malformed("validate success without token".to_string()))
    }

    async fn store(&self, token: String) {
        let session = SessionToken {
            token,
            obtained_at: Utc::now(),
        };
        if self.use_keyring {
            let username = self.username.clone();
            let blob = serde_json::to_string(&session).unwrap_or_default();
            let result = tokio::task::spawn_blocking(move || {
                keyring::Entry::new(KEYRING_SERVICE, &username)
                    .and_then(|entry| entry.set_password(&blob))
            })
            .await;
            if let Ok(Err(e)) = result {
                warn!(error = %e, "failed to mirror session token to keychain");
            }
        }
        *self.session.write().await = Some(session);
    }

    async fn load_cached(&self) -> Option<SessionToken> {
        if !self.use_keyring {
            return None;
        }
        let username = self.username.clone();
        let blob = tokio::task::spawn_blocking(move || {
            keyring::Entry::new(KEYRING_SERVICE, &username)
                .and_then(|entry| entry.get_password())
        })
        .await
        .ok()?
        .ok()?;
        serde_json::from_str(&blob).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_margin() {
        let session = SessionToken {
            token: "t".to_string(),
            obtained_at: Utc::now(),
        };
        assert!(!session.needs_refresh(Utc::now()));
        assert!(session.needs_refresh(Utc::now() + Duration::hours(23)));
        assert!(session.needs_refresh(Utc::now() + Duration::hours(48)));
    }
}
