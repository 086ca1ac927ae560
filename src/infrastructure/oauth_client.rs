use crate::infrastructure::error::PlannerError;
use async_trait::async_trait;
use reqwest::Client;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshGrant {
    Standard,
    Launchpad,
}

#[derive(Debug, Clone)]
pub struct OAuthRefreshRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub grant: RefreshGrant,
}

#[derive(Debug, Clone)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, PlannerError>;
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn require_access_token(&self) -> Result<String, PlannerError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl ReqwestOAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn refresh_params(request: OAuthRefreshRequest) -> Vec<(&'static str, String)> {
        let grant = match request.grant {
            RefreshGrant::Standard => ("grant_type", "refresh_token".to_string()),
            RefreshGrant::Launchpad => ("type", "refresh".to_string()),
        };
        vec![
            grant,
            ("client_id", request.client_id),
            ("client_secret", request.client_secret),
            ("refresh_token", request.refresh_token),
        ]
    }
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, PlannerError> {
        let endpoint = request.token_endpoint.clone();
        let params = Self::refresh_params(request);
        let response = self
            .client
            .post(&endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|error| PlannerError::OAuth(format!("network error while refreshing token: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| PlannerError::OAuth(format!("failed reading token response: {error}")))?;

        let parsed = serde_json::from_str::<TokenResponsePayload>(&body).map_err(|error| {
            PlannerError::OAuth(format!("invalid token response payload: {error}; body={body}"))
        })?;

        if !status.is_success() || parsed.error.is_some() {
            let code = parsed.error.unwrap_or_else(|| format!("http_{}", status.as_u16()));
            let detail = parsed.error_description.unwrap_or_else(|| body.clone());
            return Err(PlannerError::OAuth(format!("token endpoint error: {code}; {detail}")));
        }

        let access_token = parsed
            .access_token
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PlannerError::OAuth("token response did not include access_token".to_string()))?;
        Ok(OAuthTokenResponse {
            access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in.unwrap_or(0).max(0),
            token_type: parsed.token_type,
            scope: parsed.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(grant: RefreshGrant) -> OAuthRefreshRequest {
        OAuthRefreshRequest {
            token_endpoint: "https://auth.example.test/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            grant,
        }
    }

    #[test]
    fn refresh_params_follow_grant_dialect() {
        let standard = ReqwestOAuthClient::refresh_params(request(RefreshGrant::Standard));
        assert_eq!(standard[0], ("grant_type", "refresh_token".to_string()));

        let launchpad = ReqwestOAuthClient::refresh_params(request(RefreshGrant::Launchpad));
        assert_eq!(launchpad[0], ("type", "refresh".to_string()));
        assert!(launchpad.contains(&("refresh_token", "refresh".to_string())));
    }
}
