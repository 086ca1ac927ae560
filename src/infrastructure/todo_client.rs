use crate::domain::models::{ExternalTodoSnapshot, RemoteContainer};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::oauth_client::AccessTokenSource;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::LINK;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const DEFAULT_TODO_API_BASE: &str = "https://3.basecampapi.com/";
const USER_AGENT: &str = "dayplan planner core";

#[async_trait]
pub trait RemoteTodoClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<RemoteContainer>, PlannerError>;

    async fn list_items_assigned_to_current_user(
        &self,
        container: &RemoteContainer,
    ) -> Result<Vec<ExternalTodoSnapshot>, PlannerError>;

    /// `Ok(false)` when the service answered but refused the change.
    async fn push_completion(&self, item_id: &str, container_id: &str)
    -> Result<bool, PlannerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoSettings {
    pub base_url: String,
    pub account_id: String,
    pub user_id: String,
}

pub struct ReqwestTodoClient {
    client: Client,
    account_root: Url,
    user_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, serde::Deserialize)]
struct ProjectPayload {
    id: u64,
    name: Option<String>,
    #[serde(default)]
    dock: Vec<DockPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct DockPayload {
    id: u64,
    name: String,
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, serde::Deserialize)]
struct TodolistPayload {
    id: u64,
}

#[derive(Debug, serde::Deserialize)]
struct TodoPayload {
    id: u64,
    content: String,
    due_on: Option<NaiveDate>,
    #[serde(default)]
    completed: bool,
    app_url: Option<String>,
    #[serde(default)]
    assignees: Vec<AssigneePayload>,
}

#[derive(Debug, serde::Deserialize)]
struct AssigneePayload {
    id: u64,
}

impl ReqwestTodoClient {
    pub fn new(
        settings: &TodoSettings,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, PlannerError> {
        Ok(Self {
            client: Client::new(),
            account_root: account_root(settings)?,
            user_id: settings.user_id.trim().to_string(),
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PlannerError> {
        self.account_root.join(path).map_err(|error| {
            PlannerError::InvalidConfig(format!("invalid todo api path {path}: {error}"))
        })
    }

    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        first_page: Url,
    ) -> Result<Vec<T>, PlannerError> {
        let access_token = self.tokens.require_access_token().await?;
        let mut results = Vec::new();
        let mut next = Some(first_page);

        while let Some(url) = next.take() {
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&access_token)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .send()
                .await
                .map_err(|error| {
                    PlannerError::CollaboratorUnavailable(format!(
                        "network error while fetching {url}: {error}"
                    ))
                })?;

            let status = response.status();
            let link = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned);
            let body = response.text().await.map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "network error while reading {url}: {error}"
                ))
            })?;
            if !status.is_success() {
                return Err(http_error(status, &body));
            }

            let page: Vec<T> = serde_json::from_str(&body).map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "invalid todo api payload from {url}: {error}"
                ))
            })?;
            results.extend(page);

            next = link
                .as_deref()
                .and_then(next_page_url)
                .map(|raw| next_page_link(&self.account_root, &raw))
                .transpose()?;
        }

        Ok(results)
    }

    async fn fetch_project(&self, project_id: &str) -> Result<ProjectPayload, PlannerError> {
        let access_token = self.tokens.require_access_token().await?;
        let url = self.endpoint(&format!("projects/{project_id}.json"))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "network error while fetching project {project_id}: {error}"
                ))
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            PlannerError::CollaboratorUnavailable(format!(
                "network error while reading project {project_id}: {error}"
            ))
        })?;
        if !status.is_success() {
            return Err(http_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|error| {
            PlannerError::CollaboratorUnavailable(format!(
                "invalid project payload for {project_id}: {error}"
            ))
        })
    }
}

#[async_trait]
impl RemoteTodoClient for ReqwestTodoClient {
    async fn list_containers(&self) -> Result<Vec<RemoteContainer>, PlannerError> {
        let projects: Vec<ProjectPayload> = self.fetch_all_pages(self.endpoint("projects.json")?).await?;
        Ok(projects
            .into_iter()
            .map(|project| {
                let id = project.id.to_string();
                RemoteContainer {
                    name: project.name.unwrap_or_else(|| id.clone()),
                    id,
                }
            })
            .collect())
    }

    async fn list_items_assigned_to_current_user(
        &self,
        container: &RemoteContainer,
    ) -> Result<Vec<ExternalTodoSnapshot>, PlannerError> {
        let project = self.fetch_project(&container.id).await?;
        let Some(todoset) = project
            .dock
            .iter()
            .find(|tool| tool.name == "todoset" && tool.enabled)
        else {
            debug!(project = %container.id, "project has no enabled todoset");
            return Ok(Vec::new());
        };

        let todolists: Vec<TodolistPayload> = self
            .fetch_all_pages(self.endpoint(&format!(
                "buckets/{}/todosets/{}/todolists.json",
                container.id, todoset.id
            ))?)
            .await?;

        let mut snapshots = Vec::new();
        for todolist in todolists {
            let todos: Vec<TodoPayload> = self
                .fetch_all_pages(self.endpoint(&format!(
                    "buckets/{}/todolists/{}/todos.json",
                    container.id, todolist.id
                ))?)
                .await?;
            snapshots.extend(
                todos
                    .into_iter()
                    .filter(|todo| is_assigned_to(todo, &self.user_id))
                    .map(|todo| snapshot_from_payload(todo, &container.id)),
            );
        }
        debug!(
            project = %container.id,
            assigned = snapshots.len(),
            "fetched assigned todos"
        );
        Ok(snapshots)
    }

    async fn push_completion(
        &self,
        item_id: &str,
        container_id: &str,
    ) -> Result<bool, PlannerError> {
        let access_token = self.tokens.require_access_token().await?;
        let url = self.endpoint(&format!("buckets/{container_id}/todos/{item_id}.json"))?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&serde_json::json!({ "completed": true }))
            .send()
            .await
            .map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "network error while completing todo {item_id}: {error}"
                ))
            })?;
        Ok(response.status().is_success())
    }
}

fn account_root(settings: &TodoSettings) -> Result<Url, PlannerError> {
    let account_id = settings.account_id.trim();
    if account_id.is_empty() {
        return Err(PlannerError::InvalidConfig(
            "todo.accountId must not be empty".to_string(),
        ));
    }
    let base = if settings.base_url.ends_with('/') {
        settings.base_url.clone()
    } else {
        format!("{}/", settings.base_url)
    };
    Url::parse(&base)
        .and_then(|base| base.join(&format!("{account_id}/")))
        .map_err(|error| PlannerError::InvalidConfig(format!("invalid todo.baseUrl: {error}")))
}

// The bearer token only ever travels to the configured service origin.
fn next_page_link(account_root: &Url, raw: &str) -> Result<Url, PlannerError> {
    let url = Url::parse(raw).map_err(|error| {
        PlannerError::CollaboratorUnavailable(format!("invalid next page link {raw}: {error}"))
    })?;
    if url.origin() != account_root.origin() {
        return Err(PlannerError::CollaboratorUnavailable(format!(
            "next page link {raw} leaves {}",
            account_root.origin().ascii_serialization()
        )));
    }
    Ok(url)
}

fn http_error(status: StatusCode, body: &str) -> PlannerError {
    let detail = if body.trim().is_empty() {
        String::new()
    } else {
        format!("; body={body}")
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PlannerError::CollaboratorUnavailable(format!(
            "todo api temporarily unavailable: http {}{detail}",
            status.as_u16()
        ))
    } else {
        PlannerError::CollaboratorUnavailable(format!(
            "todo api error: http {}{detail}",
            status.as_u16()
        ))
    }
}

fn is_assigned_to(todo: &TodoPayload, user_id: &str) -> bool {
    todo.assignees
        .iter()
        .any(|assignee| assignee.id.to_string() == user_id)
}

fn snapshot_from_payload(todo: TodoPayload, project_id: &str) -> ExternalTodoSnapshot {
    ExternalTodoSnapshot {
        external_id: todo.id.to_string(),
        title: todo.content,
        due_date: todo.due_on,
        completed: todo.completed,
        project_id: project_id.to_string(),
        url: todo.app_url,
    }
}

pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|value| value.strip_suffix('>'))
            .map(ToOwned::to_owned)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_url_reads_rel_next_only() {
        let header = "<https://3.basecampapi.com/1/projects.json?page=1>; rel=\"prev\", \
                      <https://3.basecampapi.com/1/projects.json?page=3>; rel=\"next\"";
        assert_eq!(
            next_page_url(header),
            Some("https://3.basecampapi.com/1/projects.json?page=3".to_string())
        );
        assert_eq!(
            next_page_url("<https://example.test/p?page=1>; rel=\"prev\""),
            None
        );
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn next_page_link_stays_on_the_service_origin() {
        let root = Url::parse("https://3.basecampapi.com/999/").expect("root");

        let same = next_page_link(&root, "https://3.basecampapi.com/999/projects.json?page=2")
            .expect("same origin link");
        assert_eq!(same.query(), Some("page=2"));

        for foreign in [
            "https://attacker.example/999/projects.json?page=2",
            "http://3.basecampapi.com/999/projects.json?page=2",
            "https://3.basecampapi.com:8443/999/projects.json?page=2",
        ] {
            assert!(matches!(
                next_page_link(&root, foreign),
                Err(PlannerError::CollaboratorUnavailable(_))
            ));
        }
        assert!(next_page_link(&root, "not a url").is_err());
    }

    #[test]
    fn account_root_joins_account_id_under_base() {
        let settings = TodoSettings {
            base_url: "https://3.basecampapi.com".to_string(),
            account_id: "999".to_string(),
            user_id: "42".to_string(),
        };
        let root = account_root(&settings).expect("valid root");
        assert_eq!(root.as_str(), "https://3.basecampapi.com/999/");
        assert_eq!(
            root.join("buckets/7/todos/8.json").expect("join").as_str(),
            "https://3.basecampapi.com/999/buckets/7/todos/8.json"
        );

        let missing = TodoSettings {
            account_id: " ".to_string(),
            ..settings
        };
        assert!(matches!(account_root(&missing), Err(PlannerError::InvalidConfig(_))));
    }

    #[test]
    fn todo_payload_maps_to_snapshot_and_filters_by_assignee() {
        let payload: TodoPayload = serde_json::from_value(serde_json::json!({
            "id": 8123,
            "content": "Review contract",
            "due_on": "2026-02-20",
            "completed": false,
            "app_url": "https://3.basecamp.com/999/buckets/7/todos/8123",
            "assignees": [{ "id": 42, "name": "Someone" }]
        }))
        .expect("todo payload");

        assert!(is_assigned_to(&payload, "42"));
        assert!(!is_assigned_to(&payload, "43"));

        let snapshot = snapshot_from_payload(payload, "7");
        assert_eq!(snapshot.external_id, "8123");
        assert_eq!(snapshot.project_id, "7");
        assert_eq!(snapshot.due_date, NaiveDate::from_ymd_opt(2026, 2, 20));
        assert!(!snapshot.completed);
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(http_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!http_error(StatusCode::NOT_FOUND, "missing").is_transient());
    }
}
