use crate::infrastructure::error::PlannerError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const INTEGRATIONS_JSON: &str = "integrations.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    pub timezone: String,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,
}

impl AppConfig {
    pub fn timezone(&self) -> Result<Tz, PlannerError> {
        self.timezone.trim().parse::<Tz>().map_err(|_| {
            PlannerError::InvalidConfig(format!("unknown timezone {:?} in {APP_JSON}", self.timezone))
        })
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.max(1) * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoIntegrationConfig {
    pub account_id: String,
    pub user_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarIntegrationConfig {
    pub calendar_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    pub schema: u8,
    #[serde(default)]
    pub todo: Option<TodoIntegrationConfig>,
    #[serde(default)]
    pub calendar: Option<CalendarIntegrationConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub integrations: IntegrationsConfig,
}

fn default_sync_interval_minutes() -> u64 {
    DEFAULT_SYNC_INTERVAL_MINUTES
}

fn default_files() -> [(&'static str, serde_json::Value); 2] {
    [
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "syncIntervalMinutes": DEFAULT_SYNC_INTERVAL_MINUTES
            }),
        ),
        (
            INTEGRATIONS_JSON,
            serde_json::json!({
                "schema": 1,
                "todo": null,
                "calendar": null
            }),
        ),
    ]
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), PlannerError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, PlannerError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            PlannerError::InvalidConfig(format!("missing schema in {}", path.display()))
        })?;
    if schema != SUPPORTED_SCHEMA {
        return Err(PlannerError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PlannerError> {
    let value = read_config(path)?;
    serde_json::from_value(value).map_err(|error| {
        PlannerError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, PlannerError> {
    let app: AppConfig = read_typed(&config_dir.join(APP_JSON))?;
    app.timezone()?;
    if app.sync_interval_minutes == 0 {
        return Err(PlannerError::InvalidConfig(
            "syncIntervalMinutes must be at least 1".to_string(),
        ));
    }

    let integrations: IntegrationsConfig = read_typed(&config_dir.join(INTEGRATIONS_JSON))?;
    if let Some(todo) = &integrations.todo {
        if todo.account_id.trim().is_empty() || todo.user_id.trim().is_empty() {
            return Err(PlannerError::InvalidConfig(
                "todo.accountId and todo.userId must not be empty".to_string(),
            ));
        }
    }
    if let Some(calendar) = &integrations.calendar {
        if calendar.calendar_id.trim().is_empty() {
            return Err(PlannerError::InvalidConfig(
                "calendar.calendarId must not be empty".to_string(),
            ));
        }
    }

    Ok(ConfigBundle { app, integrations })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    TodoService,
    Google,
}

impl OAuthProvider {
    fn keys(self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            Self::TodoService => (&["DAYPLAN_TODO_CLIENT_ID"], &["DAYPLAN_TODO_CLIENT_SECRET"]),
            Self::Google => (
                &["DAYPLAN_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
                &["DAYPLAN_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
            ),
        }
    }
}

pub fn oauth_credentials_from_env(
    provider: OAuthProvider,
) -> Result<Option<OAuthClientCredentials>, PlannerError> {
    oauth_credentials_from_lookup(provider, |key| std::env::var(key).ok())
}

/// `Ok(None)` when the provider is not configured at all; a half-configured
/// provider is an error.
pub fn oauth_credentials_from_lookup<F>(
    provider: OAuthProvider,
    lookup: F,
) -> Result<Option<OAuthClientCredentials>, PlannerError>
where
    F: Fn(&str) -> Option<String>,
{
    let (id_keys, secret_keys) = provider.keys();
    let client_id = optional_lookup_value(&lookup, id_keys);
    let client_secret = optional_lookup_value(&lookup, secret_keys);

    match (client_id, client_secret) {
        (None, None) => Ok(None),
        (Some(client_id), Some(client_secret)) => Ok(Some(OAuthClientCredentials {
            client_id,
            client_secret,
        })),
        (Some(_), None) => Err(missing_key("client secret", secret_keys)),
        (None, Some(_)) => Err(missing_key("client id", id_keys)),
    }
}

fn missing_key(field_name: &str, keys: &[&str]) -> PlannerError {
    PlannerError::InvalidConfig(format!(
        "missing {field_name} (set one of: {})",
        keys.join(", ")
    ))
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
