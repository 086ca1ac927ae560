use crate::application::oauth::{OAuthConfig, OAuthManager};
use crate::infrastructure::config::{
    oauth_credentials_from_lookup, ConfigBundle, OAuthClientCredentials, OAuthProvider,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::google_calendar_client::{BusyIntervalSource, GoogleCalendarClient};
use crate::infrastructure::oauth_client::{OAuthHttpClient, ReqwestOAuthClient};
use crate::infrastructure::todo_client::{
    RemoteTodoClient, ReqwestTodoClient, TodoSettings, DEFAULT_TODO_API_BASE,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Default)]
pub struct IntegrationContext {
    pub todo: Option<Arc<dyn RemoteTodoClient>>,
    pub calendar: Option<Arc<dyn BusyIntervalSource>>,
}

impl IntegrationContext {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn with_todo(mut self, client: Arc<dyn RemoteTodoClient>) -> Self {
        self.todo = Some(client);
        self
    }

    pub fn with_calendar(mut self, source: Arc<dyn BusyIntervalSource>) -> Self {
        self.calendar = Some(source);
        self
    }

    pub fn from_env(configs: &ConfigBundle) -> Result<Self, PlannerError> {
        Self::from_lookup(configs, |key| std::env::var(key).ok(), |provider, account| {
            let store: Arc<dyn CredentialStore> = Arc::new(match provider {
                OAuthProvider::TodoService => KeyringCredentialStore::for_todo_service(account),
                OAuthProvider::Google => KeyringCredentialStore::for_calendar(account),
            });
            store
        })
    }

    pub fn from_lookup<L, C>(
        configs: &ConfigBundle,
        lookup: L,
        credential_store_for: C,
    ) -> Result<Self, PlannerError>
    where
        L: Fn(&str) -> Option<String>,
        C: Fn(OAuthProvider, &str) -> Arc<dyn CredentialStore>,
    {
        let oauth_client: Arc<dyn OAuthHttpClient> = Arc::new(ReqwestOAuthClient::new());
        let mut context = Self::offline();

        if let Some(todo) = &configs.integrations.todo {
            match oauth_credentials_from_lookup(OAuthProvider::TodoService, &lookup)? {
                Some(credentials) => {
                    let manager = token_manager(
                        |client_id, client_secret| OAuthConfig::todo_service(client_id, client_secret),
                        credentials,
                        credential_store_for(OAuthProvider::TodoService, &todo.account_id),
                        Arc::clone(&oauth_client),
                    );
                    let settings = TodoSettings {
                        base_url: todo
                            .base_url
                            .clone()
                            .unwrap_or_else(|| DEFAULT_TODO_API_BASE.to_string()),
                        account_id: todo.account_id.clone(),
                        user_id: todo.user_id.clone(),
                    };
                    context.todo = Some(Arc::new(ReqwestTodoClient::new(&settings, manager)?));
                }
                None => info!("todo integration configured without client credentials; disabled"),
            }
        }

        if let Some(calendar) = &configs.integrations.calendar {
            match oauth_credentials_from_lookup(OAuthProvider::Google, &lookup)? {
                Some(credentials) => {
                    let manager = token_manager(
                        |client_id, client_secret| OAuthConfig::google(client_id, client_secret),
                        credentials,
                        credential_store_for(OAuthProvider::Google, &calendar.calendar_id),
                        Arc::clone(&oauth_client),
                    );
                    context.calendar = Some(Arc::new(GoogleCalendarClient::new(
                        calendar.calendar_id.clone(),
                        configs.app.timezone()?,
                        manager,
                    )));
                }
                None => info!("calendar integration configured without client credentials; disabled"),
            }
        }

        Ok(context)
    }
}

fn token_manager(
    config: fn(String, String) -> OAuthConfig,
    credentials: OAuthClientCredentials,
    credential_store: Arc<dyn CredentialStore>,
    oauth_client: Arc<dyn OAuthHttpClient>,
) -> Arc<OAuthManager> {
    Arc::new(OAuthManager::new(
        config(credentials.client_id, credentials.client_secret),
        credential_store,
        oauth_client,
    ))
}
