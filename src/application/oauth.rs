use crate::domain::models::{NowProvider, OAuthToken};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::oauth_client::{
    AccessTokenSource, OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse, RefreshGrant,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const LAUNCHPAD_TOKEN_ENDPOINT: &str = "https://launchpad.37signals.com/authorization/token";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub grant: RefreshGrant,
}

impl OAuthConfig {
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            provider: "google".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            grant: RefreshGrant::Standard,
        }
    }

    pub fn todo_service(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            provider: "todo".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: LAUNCHPAD_TOKEN_ENDPOINT.to_string(),
            grant: RefreshGrant::Launchpad,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(OAuthToken),
    Refreshed(OAuthToken),
    ReauthenticationRequired,
}

pub struct OAuthManager {
    config: OAuthConfig,
    credential_store: Arc<dyn CredentialStore>,
    oauth_client: Arc<dyn OAuthHttpClient>,
    now_provider: NowProvider,
}

impl OAuthManager {
    pub fn new(
        config: OAuthConfig,
        credential_store: Arc<dyn CredentialStore>,
        oauth_client: Arc<dyn OAuthHttpClient>,
    ) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_token_valid(&self, token: &OAuthToken) -> bool {
        token.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS)
    }

    pub fn store_token(&self, token: &OAuthToken) -> Result<(), PlannerError> {
        if token.access_token.trim().is_empty() {
            return Err(PlannerError::OAuth("access token must not be empty".to_string()));
        }
        self.credential_store.save_token(token)
    }

    pub async fn ensure_access_token(&self) -> Result<EnsureTokenResult, PlannerError> {
        let Some(stored_token) = self.credential_store.load_token()? else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        if self.is_token_valid(&stored_token) {
            return Ok(EnsureTokenResult::Existing(stored_token));
        }

        let Some(refresh_token) = stored_token.refresh_token.clone() else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        let refreshed = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
                grant: self.config.grant,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let token = self.token_from_response(response, stored_token.refresh_token);
                self.credential_store.save_token(&token)?;
                info!(provider = %self.config.provider, "access token refreshed");
                Ok(EnsureTokenResult::Refreshed(token))
            }
            Err(error @ PlannerError::OAuth(_)) if error.is_transient() => Err(error),
            Err(PlannerError::OAuth(message)) => {
                warn!(provider = %self.config.provider, %message, "token refresh rejected");
                Ok(EnsureTokenResult::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    pub fn clear_stored_token(&self) -> Result<(), PlannerError> {
        self.credential_store.delete_token()
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

#[async_trait]
impl AccessTokenSource for OAuthManager {
    async fn require_access_token(&self) -> Result<String, PlannerError> {
        match self.ensure_access_token().await? {
            EnsureTokenResult::Existing(token) | EnsureTokenResult::Refreshed(token) => {
                Ok(token.access_token)
            }
            EnsureTokenResult::ReauthenticationRequired => Err(PlannerError::Credential(format!(
                "{} connection requires re-authentication",
                self.config.provider
            ))),
        }
    }
}
