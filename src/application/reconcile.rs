use crate::application::ledger;
use crate::domain::models::{
    ExternalLink, ExternalTodoSnapshot, NowProvider, Task, TaskGroup, TaskSource,
};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::task_store::{TaskStore, TaskTransaction};
use crate::infrastructure::todo_client::RemoteTodoClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingItems {
    Archive,
    /// The remote view is known to be incomplete; nothing is archived.
    Keep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub synced: usize,
    pub created: usize,
    pub updated: usize,
    pub completed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub containers_processed: usize,
    pub containers_skipped: usize,
    pub outcome: ReconcileOutcome,
}

/// Applies one remote snapshot set to the mirrored tasks. Runs inside the
/// caller's transaction; re-running with the same input changes nothing.
pub fn reconcile(
    tx: &mut dyn TaskTransaction,
    snapshots: &[ExternalTodoSnapshot],
    now: DateTime<Utc>,
    missing: MissingItems,
) -> Result<ReconcileOutcome, PlannerError> {
    let mut outcome = ReconcileOutcome::default();
    let mut present: HashSet<&str> = HashSet::new();
    let mut applied: HashSet<&str> = HashSet::new();

    for snapshot in snapshots {
        let external_id = snapshot.external_id.trim();
        if external_id.is_empty() {
            warn!(title = %snapshot.title, "remote item without id ignored");
            continue;
        }
        present.insert(external_id);
        if applied.contains(external_id) {
            continue;
        }

        match tx.task_by_external_id(external_id)? {
            None => {
                let mut task = Task::new(
                    snapshot.title.trim(),
                    TaskGroup::DEFAULT,
                    TaskSource::External(ExternalLink {
                        external_id: external_id.to_string(),
                        project_id: snapshot.project_id.clone(),
                        url: snapshot.url.clone(),
                    }),
                    snapshot.due_date,
                    now,
                );
                if let Err(message) = task.validate() {
                    warn!(external_id, %message, "remote item rejected");
                    continue;
                }
                if snapshot.completed {
                    task.mark_completed(now);
                    outcome.completed += 1;
                }
                ledger::insert_at_end(tx, task)?;
                outcome.created += 1;
            }
            Some(mut task) => {
                let mut changed = apply_remote_fields(&mut task, snapshot);
                if changed {
                    outcome.updated += 1;
                }
                // Completion only flows remote -> local; an open remote item
                // never reopens a locally completed task.
                if snapshot.completed && !task.is_completed() {
                    task.mark_completed(now);
                    outcome.completed += 1;
                    changed = true;
                }
                if changed {
                    task.updated_at = now;
                    tx.update_task(&task)?;
                }
            }
        }
        applied.insert(external_id);
        outcome.synced += 1;
    }

    if missing == MissingItems::Archive {
        for task in tx.external_tasks()? {
            let vanished = task
                .external_id()
                .is_some_and(|external_id| !present.contains(external_id));
            if task.is_active() && vanished {
                ledger::archive(tx, &task.id, now)?;
                outcome.archived += 1;
            }
        }
    }

    Ok(outcome)
}

fn apply_remote_fields(task: &mut Task, snapshot: &ExternalTodoSnapshot) -> bool {
    let mut changed = false;
    let title = snapshot.title.trim();
    if !title.is_empty() && task.title != title {
        task.title = title.to_string();
        changed = true;
    }
    if task.due_date != snapshot.due_date {
        task.due_date = snapshot.due_date;
        changed = true;
    }
    if let TaskSource::External(link) = &mut task.source {
        if link.url != snapshot.url {
            link.url = snapshot.url.clone();
            changed = true;
        }
    }
    changed
}

pub struct ReconciliationEngine<S: TaskStore> {
    store: Arc<S>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<S: TaskStore> ReconciliationEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn reconcile(
        &self,
        snapshots: &[ExternalTodoSnapshot],
    ) -> Result<ReconcileOutcome, PlannerError> {
        let now = (self.now_provider)();
        self.store
            .write(|tx| reconcile(tx, snapshots, now, MissingItems::Archive))
    }

    /// Pulls every container and reconciles the union. A container that keeps
    /// failing is skipped; when none succeed nothing is archived.
    pub async fn sync_from_remote(
        &self,
        client: &dyn RemoteTodoClient,
    ) -> Result<SyncReport, PlannerError> {
        let containers = self.with_retry(|| client.list_containers()).await?;

        let mut snapshots = Vec::new();
        let mut containers_processed = 0;
        let mut containers_skipped = 0;
        for container in &containers {
            match self
                .with_retry(|| client.list_items_assigned_to_current_user(container))
                .await
            {
                Ok(items) => {
                    containers_processed += 1;
                    snapshots.extend(items);
                }
                Err(error) => {
                    containers_skipped += 1;
                    warn!(
                        container_id = %container.id,
                        container = %container.name,
                        %error,
                        "skipping container after fetch failure"
                    );
                }
            }
        }

        let missing = if containers_processed == 0 && containers_skipped > 0 {
            warn!(
                containers_skipped,
                "every container failed; archive pass skipped"
            );
            MissingItems::Keep
        } else {
            MissingItems::Archive
        };

        let now = (self.now_provider)();
        let outcome = self
            .store
            .write(|tx| reconcile(tx, &snapshots, now, missing))?;
        info!(
            containers_processed,
            containers_skipped,
            synced = outcome.synced,
            created = outcome.created,
            updated = outcome.updated,
            completed = outcome.completed,
            archived = outcome.archived,
            "remote todo sync finished"
        );

        Ok(SyncReport {
            containers_processed,
            containers_skipped,
            outcome,
        })
    }

    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, PlannerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlannerError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(u32::from(attempt)));
                    warn!(attempt = attempt + 1, delay_ms = delay, %error, "retrying remote call");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}
