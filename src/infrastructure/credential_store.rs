use crate::domain::models::OAuthToken;
use crate::infrastructure::error::PlannerError;
use std::sync::Mutex;

pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &OAuthToken) -> Result<(), PlannerError>;
    fn load_token(&self) -> Result<Option<OAuthToken>, PlannerError>;
    fn delete_token(&self) -> Result<(), PlannerError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    pub fn for_todo_service(account_id: &str) -> Self {
        Self::new("dayplan.oauth.todo", account_id)
    }

    pub fn for_calendar(account_id: &str) -> Self {
        Self::new("dayplan.oauth.google", account_id)
    }

    fn entry(&self) -> Result<keyring::Entry, PlannerError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| PlannerError::Credential(error.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), PlannerError> {
        let payload = serde_json::to_string(token)
            .map_err(|error| PlannerError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| PlannerError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, PlannerError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(PlannerError::Credential(error.to_string())),
        };

        let token = serde_json::from_str::<OAuthToken>(&payload)
            .map_err(|error| PlannerError::Credential(error.to_string()))?;
        Ok(Some(token))
    }

    fn delete_token(&self) -> Result<(), PlannerError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(PlannerError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<OAuthToken>>,
}

impl InMemoryCredentialStore {
    pub fn with_token(token: OAuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<OAuthToken>>, PlannerError> {
        self.token
            .lock()
            .map_err(|error| PlannerError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), PlannerError> {
        *self.lock()? = Some(token.clone());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, PlannerError> {
        Ok(self.lock()?.clone())
    }

    fn delete_token(&self) -> Result<(), PlannerError> {
        *self.lock()? = None;
        Ok(())
    }
}
