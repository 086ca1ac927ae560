use crate::application::bootstrap::bootstrap_workspace;
use crate::application::integrations::IntegrationContext;
use crate::application::ledger;
use crate::application::reconcile::{ReconcileOutcome, ReconciliationEngine, SyncReport};
use crate::application::scheduler::{self, DayContext};
use crate::domain::layout::{compute_layout, LayoutInterval, PositionedInterval};
use crate::domain::models::{
    BusyInterval, CalendarEvent, DailyGoal, ExternalTodoSnapshot, NowProvider, Task, TaskGroup,
    TaskSource, TimeBlock,
};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::sqlite_task_store::SqliteTaskStore;
use crate::infrastructure::task_store::{TaskStore, TaskTransaction};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct AppState<S: TaskStore> {
    store: Arc<S>,
    integrations: IntegrationContext,
    timezone: Tz,
    sync_interval: Duration,
    now_provider: NowProvider,
}

impl AppState<SqliteTaskStore> {
    pub fn open(workspace_root: &Path) -> Result<Self, PlannerError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        init_logging(&bootstrap.logs_dir)?;
        let integrations = IntegrationContext::from_env(&bootstrap.configs)?;
        let state = Self::new(
            Arc::new(SqliteTaskStore::new(&bootstrap.database_path)),
            integrations,
            bootstrap.configs.app.timezone()?,
        )
        .with_sync_interval(bootstrap.configs.app.sync_interval());
        info!(
            workspace = %bootstrap.workspace_root.display(),
            todo = state.integrations.todo.is_some(),
            calendar = state.integrations.calendar.is_some(),
            "app state ready"
        );
        Ok(state)
    }
}

impl<S: TaskStore> AppState<S> {
    pub fn new(store: Arc<S>, integrations: IntegrationContext, timezone: Tz) -> Self {
        Self {
            store,
            integrations,
            timezone,
            sync_interval: Duration::from_secs(15 * 60),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_sync_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn integrations(&self) -> &IntegrationContext {
        &self.integrations
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn command_error(&self, command: &str, error: &PlannerError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }

    fn logged<T>(&self, command: &str, result: Result<T, PlannerError>) -> Result<T, PlannerError> {
        if let Err(error) = &result {
            self.command_error(command, error);
        }
        result
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.timezone).date_naive()
    }

    fn resolve_date(&self, date: Option<String>) -> Result<NaiveDate, PlannerError> {
        match date
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(value) => parse_date_input(value, "date"),
            None => Ok(self.today()),
        }
    }

    async fn external_busy(&self, date: NaiveDate) -> Vec<BusyInterval> {
        let Some(calendar) = self.integrations.calendar.as_ref() else {
            return Vec::new();
        };
        match calendar.list_busy_intervals_for_date(date).await {
            Ok(busy) => busy,
            Err(error) => {
                warn!(%date, %error, "calendar busy intervals unavailable");
                Vec::new()
            }
        }
    }

    async fn calendar_events(&self, date: NaiveDate) -> Vec<CalendarEvent> {
        let Some(calendar) = self.integrations.calendar.as_ref() else {
            return Vec::new();
        };
        match calendar.list_events_for_date(date).await {
            Ok(events) => events,
            Err(error) => {
                warn!(%date, %error, "calendar events unavailable");
                Vec::new()
            }
        }
    }

    fn engine(&self) -> ReconciliationEngine<S> {
        ReconciliationEngine::new(Arc::clone(&self.store))
            .with_now_provider(Arc::clone(&self.now_provider))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCompletion {
    NotApplicable,
    Pushed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteTaskResponse {
    pub task: Task,
    pub remote_completion: RemoteCompletion,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub group: TaskGroup,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayEntryKind {
    TimeBlock,
    CalendarEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayEntry {
    pub kind: DayEntryKind,
    pub id: String,
    pub title: String,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub entries: Vec<PositionedInterval<DayEntry>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub groups: Vec<GroupView>,
    pub daily_goal: DailyGoal,
    pub day: DayView,
    pub todo_connected: bool,
    pub calendar_connected: bool,
}

pub async fn create_task_impl<S: TaskStore>(
    state: &AppState<S>,
    title: String,
    group: Option<String>,
    due_date: Option<String>,
) -> Result<Task, PlannerError> {
    state.logged("create_task", create_task(state, title, group, due_date).await)
}

async fn create_task<S: TaskStore>(
    state: &AppState<S>,
    title: String,
    group: Option<String>,
    due_date: Option<String>,
) -> Result<Task, PlannerError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PlannerError::validation("title must not be empty"));
    }
    let group = match group.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_group(value)?,
        None => TaskGroup::DEFAULT,
    };
    let due_date = parse_optional_date(due_date.as_deref(), "due_date")?;

    let date = state.today();
    let busy = if group.is_scheduled() {
        state.external_busy(date).await
    } else {
        Vec::new()
    };
    let now = state.now();

    let task = state.store.write(|tx| {
        let task = ledger::insert_at_end(
            tx,
            Task::new(title, group, TaskSource::Personal, due_date, now),
        )?;
        if group.is_scheduled() {
            scheduler::schedule_into_free_slot(tx, &task.id, DayContext::new(date, &busy))?;
        }
        Ok(task)
    })?;

    info!(task_id = %task.id, group = %task.group, position = task.position, "task created");
    Ok(task)
}

/// `due_date: Some("")` clears the date; `None` leaves it unchanged.
pub fn update_task_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    title: Option<String>,
    due_date: Option<String>,
) -> Result<Task, PlannerError> {
    state.logged("update_task", update_task(state, task_id, title, due_date))
}

fn update_task<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    title: Option<String>,
    due_date: Option<String>,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let title = match title.as_deref().map(str::trim) {
        Some("") => return Err(PlannerError::validation("title must not be empty")),
        other => other.map(ToOwned::to_owned),
    };
    let due_date = due_date
        .as_deref()
        .map(|value| parse_optional_date(Some(value), "due_date"))
        .transpose()?;
    let now = state.now();

    let task = state.store.write(|tx| {
        let mut task = ledger::require_task(tx, task_id)?;
        let mut changed = false;
        if let Some(title) = title {
            changed |= task.title != title;
            task.title = title;
        }
        if let Some(due_date) = due_date {
            changed |= task.due_date != due_date;
            task.due_date = due_date;
        }
        if changed {
            task.updated_at = now;
            task.validate().map_err(PlannerError::Validation)?;
            tx.update_task(&task)?;
        }
        Ok(task)
    })?;

    info!(task_id = %task.id, "task updated");
    Ok(task)
}

pub fn delete_task_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    state.logged("delete_task", delete_task(state, task_id))
}

fn delete_task<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let deleted = state.store.write(|tx| ledger::delete(tx, task_id))?;
    info!(task_id, group = %deleted.group, "task deleted");
    Ok(deleted)
}

/// Completes locally, then mirrors the completion to the remote service for
/// external tasks. The push never rolls back the local write.
pub async fn complete_task_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<CompleteTaskResponse, PlannerError> {
    state.logged("complete_task", complete_task(state, task_id).await)
}

async fn complete_task<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<CompleteTaskResponse, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let now = state.now();

    let (task, newly_completed) = state.store.write(|tx| {
        let mut task = ledger::require_task(tx, task_id)?;
        if task.is_archived() {
            return Err(PlannerError::validation(format!(
                "archived task {task_id} cannot be completed"
            )));
        }
        if task.is_completed() {
            return Ok((task, false));
        }
        task.mark_completed(now);
        tx.update_task(&task)?;
        Ok((task, true))
    })?;
    info!(task_id, newly_completed, "task completed");

    let remote_completion = match (&task.source, state.integrations.todo.as_ref()) {
        (TaskSource::External(link), Some(client)) if newly_completed => {
            match client
                .push_completion(&link.external_id, &link.project_id)
                .await
            {
                Ok(true) => RemoteCompletion::Pushed,
                Ok(false) => {
                    warn!(task_id, external_id = %link.external_id, "remote refused completion");
                    RemoteCompletion::Failed
                }
                Err(error) => {
                    warn!(task_id, external_id = %link.external_id, %error, "remote completion push failed");
                    RemoteCompletion::Failed
                }
            }
        }
        _ => RemoteCompletion::NotApplicable,
    };

    Ok(CompleteTaskResponse {
        task,
        remote_completion,
    })
}

pub async fn uncomplete_task_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    state.logged("uncomplete_task", uncomplete_task(state, task_id).await)
}

async fn uncomplete_task<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let restore_to = state
        .store
        .read(|tx| ledger::require_task(tx, task_id))?
        .completed_from_group
        .unwrap_or(TaskGroup::DEFAULT);

    let date = state.today();
    let busy = if restore_to.is_scheduled() {
        state.external_busy(date).await
    } else {
        Vec::new()
    };
    let now = state.now();

    let task = state.store.write(|tx| {
        let mut task = ledger::require_task(tx, task_id)?;
        if !task.is_completed() {
            return Ok(task);
        }
        let target = task.completed_from_group.unwrap_or(TaskGroup::DEFAULT);
        task.completed_at = None;
        task.completed_from_group = None;
        task.updated_at = now;
        tx.update_task(&task)?;
        if task.is_active() && task.group != target {
            task = ledger::move_to_group(tx, task_id, target, DayContext::new(date, &busy), now)?;
        }
        Ok(task)
    })?;

    info!(task_id, group = %task.group, "task uncompleted");
    Ok(task)
}

pub fn archive_task_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    state.logged("archive_task", archive_task(state, task_id))
}

fn archive_task<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let now = state.now();
    let task = state.store.write(|tx| ledger::archive(tx, task_id, now))?;
    info!(task_id, group = %task.group, "task archived");
    Ok(task)
}

pub fn list_archived_tasks_impl<S: TaskStore>(state: &AppState<S>) -> Result<Vec<Task>, PlannerError> {
    state.logged("list_archived_tasks", list_archived_tasks(state))
}

fn list_archived_tasks<S: TaskStore>(
    state: &AppState<S>,
) -> Result<Vec<Task>, PlannerError> {
    state.store.read(|tx| tx.archived_tasks())
}

pub async fn move_task_to_group_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    group: String,
) -> Result<Task, PlannerError> {
    state.logged("move_task_to_group", move_task_to_group(state, task_id, group).await)
}

async fn move_task_to_group<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    group: String,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let group = parse_group(&group)?;
    let date = state.today();
    let busy = if group.is_scheduled() {
        state.external_busy(date).await
    } else {
        Vec::new()
    };
    let now = state.now();

    let task = state.store.write(|tx| {
        ledger::move_to_group(tx, task_id, group, DayContext::new(date, &busy), now)
    })?;
    info!(task_id, group = %task.group, position = task.position, "task moved");
    Ok(task)
}

pub fn move_task_to_position_impl<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    position: i64,
) -> Result<Task, PlannerError> {
    state.logged("move_task_to_position", move_task_to_position(state, task_id, position))
}

fn move_task_to_position<S: TaskStore>(
    state: &AppState<S>,
    task_id: String,
    position: i64,
) -> Result<Task, PlannerError> {
    let task_id = require_id(&task_id, "task_id")?;
    let index = usize::try_from(position).map_err(|_| {
        PlannerError::validation(format!("position must be non-negative, got {position}"))
    })?;
    let task = state
        .store
        .write(|tx| ledger::move_to_position(tx, task_id, index))?;
    debug!(task_id, position = task.position, "task reordered");
    Ok(task)
}

pub fn update_time_block_impl<S: TaskStore>(
    state: &AppState<S>,
    block_id: String,
    start_minutes: i64,
    duration_minutes: Option<i64>,
) -> Result<TimeBlock, PlannerError> {
    state.logged("update_time_block", update_time_block(state, block_id, start_minutes, duration_minutes))
}

fn update_time_block<S: TaskStore>(
    state: &AppState<S>,
    block_id: String,
    start_minutes: i64,
    duration_minutes: Option<i64>,
) -> Result<TimeBlock, PlannerError> {
    let block_id = require_id(&block_id, "block_id")?;
    let block = state
        .store
        .write(|tx| scheduler::move_block(tx, block_id, start_minutes, duration_minutes))?;
    info!(
        block_id,
        start = %block.start_time(),
        end = %block.end_time(),
        "time block updated"
    );
    Ok(block)
}

pub fn resize_time_block_impl<S: TaskStore>(
    state: &AppState<S>,
    block_id: String,
    duration_minutes: i64,
) -> Result<TimeBlock, PlannerError> {
    state.logged("resize_time_block", resize_time_block(state, block_id, duration_minutes))
}

fn resize_time_block<S: TaskStore>(
    state: &AppState<S>,
    block_id: String,
    duration_minutes: i64,
) -> Result<TimeBlock, PlannerError> {
    let block_id = require_id(&block_id, "block_id")?;
    state
        .store
        .write(|tx| scheduler::resize_block(tx, block_id, duration_minutes))
}

pub fn compute_layout_impl<T>(
    intervals: Vec<LayoutInterval<T>>,
) -> Result<Vec<PositionedInterval<T>>, PlannerError> {
    compute_layout(intervals).map_err(PlannerError::Validation)
}

pub fn list_groups_impl<S: TaskStore>(state: &AppState<S>) -> Result<Vec<GroupView>, PlannerError> {
    state.logged("list_groups", list_groups(state))
}

fn list_groups<S: TaskStore>(state: &AppState<S>) -> Result<Vec<GroupView>, PlannerError> {
    state.store.read(|tx| {
        TaskGroup::ALL
            .into_iter()
            .map(|group| {
                ledger::verify_dense(tx, group)?;
                Ok(GroupView {
                    group,
                    tasks: tx.active_tasks_in_group(group)?,
                })
            })
            .collect()
    })
}

pub fn list_time_blocks_impl<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<Vec<TimeBlock>, PlannerError> {
    state.logged("list_time_blocks", list_time_blocks(state, date))
}

fn list_time_blocks<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<Vec<TimeBlock>, PlannerError> {
    let date = state.resolve_date(date)?;
    state.store.read(|tx| tx.time_blocks_for_date(date))
}

pub async fn day_view_impl<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<DayView, PlannerError> {
    state.logged("day_view", day_view(state, date).await)
}

async fn day_view<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<DayView, PlannerError> {
    let date = state.resolve_date(date)?;
    let events = state.calendar_events(date).await;

    let mut intervals = state.store.read(|tx| block_intervals(tx, date))?;
    intervals.extend(
        events
            .into_iter()
            .filter(|event| event.end_minutes > event.start_minutes)
            .map(|event| {
                LayoutInterval::new(
                    event.start_minutes,
                    event.end_minutes,
                    DayEntry {
                        kind: DayEntryKind::CalendarEvent,
                        id: event.id,
                        title: event.title,
                        task_id: None,
                    },
                )
            }),
    );

    Ok(DayView {
        date,
        entries: compute_layout_impl(intervals)?,
    })
}

fn block_intervals(
    tx: &dyn TaskTransaction,
    date: NaiveDate,
) -> Result<Vec<LayoutInterval<DayEntry>>, PlannerError> {
    tx.time_blocks_for_date(date)?
        .into_iter()
        .map(|block| {
            let title = tx
                .task(&block.task_id)?
                .map(|task| task.title)
                .unwrap_or_default();
            Ok(LayoutInterval::new(
                block.start_minutes,
                block.end_minutes(),
                DayEntry {
                    kind: DayEntryKind::TimeBlock,
                    id: block.id,
                    title,
                    task_id: Some(block.task_id),
                },
            ))
        })
        .collect()
}

pub async fn plan_view_impl<S: TaskStore>(state: &AppState<S>) -> Result<PlanView, PlannerError> {
    state.logged("plan_view", plan_view(state).await)
}

async fn plan_view<S: TaskStore>(state: &AppState<S>) -> Result<PlanView, PlannerError> {
    let day = day_view(state, None).await?;
    let groups = list_groups(state)?;
    let daily_goal = daily_goal_for(state, Some(day.date.to_string()))?;
    Ok(PlanView {
        groups,
        daily_goal,
        day,
        todo_connected: state.integrations.todo.is_some(),
        calendar_connected: state.integrations.calendar.is_some(),
    })
}

pub fn daily_goal_for_impl<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<DailyGoal, PlannerError> {
    state.logged("daily_goal_for", daily_goal_for(state, date))
}

fn daily_goal_for<S: TaskStore>(
    state: &AppState<S>,
    date: Option<String>,
) -> Result<DailyGoal, PlannerError> {
    let date = state.resolve_date(date)?;
    let now = state.now();
    state.store.write(|tx| {
        if let Some(goal) = tx.daily_goal(date)? {
            return Ok(goal);
        }
        let goal = DailyGoal {
            date,
            content: String::new(),
            updated_at: now,
        };
        tx.upsert_daily_goal(&goal)?;
        Ok(goal)
    })
}

pub fn update_daily_goal_impl<S: TaskStore>(
    state: &AppState<S>,
    date: String,
    content: String,
) -> Result<DailyGoal, PlannerError> {
    state.logged("update_daily_goal", update_daily_goal(state, date, content))
}

fn update_daily_goal<S: TaskStore>(
    state: &AppState<S>,
    date: String,
    content: String,
) -> Result<DailyGoal, PlannerError> {
    let date = parse_date_input(date.trim(), "date")?;
    let goal = DailyGoal {
        date,
        content,
        updated_at: state.now(),
    };
    state.store.write(|tx| tx.upsert_daily_goal(&goal))?;
    info!(%date, "daily goal updated");
    Ok(goal)
}

pub fn reconcile_impl<S: TaskStore>(
    state: &AppState<S>,
    snapshots: Vec<ExternalTodoSnapshot>,
) -> Result<ReconcileOutcome, PlannerError> {
    state.logged("reconcile", reconcile_snapshots(state, snapshots))
}

fn reconcile_snapshots<S: TaskStore>(
    state: &AppState<S>,
    snapshots: Vec<ExternalTodoSnapshot>,
) -> Result<ReconcileOutcome, PlannerError> {
    let outcome = state.engine().reconcile(&snapshots)?;
    info!(
        synced = outcome.synced,
        created = outcome.created,
        archived = outcome.archived,
        "reconciled snapshots"
    );
    Ok(outcome)
}

pub async fn sync_external_impl<S: TaskStore>(state: &AppState<S>) -> Result<SyncReport, PlannerError> {
    state.logged("sync_external", sync_external(state).await)
}

async fn sync_external<S: TaskStore>(
    state: &AppState<S>,
) -> Result<SyncReport, PlannerError> {
    let Some(client) = state.integrations.todo.as_ref() else {
        return Err(PlannerError::CollaboratorUnavailable(
            "todo integration is not configured".to_string(),
        ));
    };
    state.engine().sync_from_remote(client.as_ref()).await
}

pub fn spawn_sync_loop<S>(state: Arc<AppState<S>>, interval: Duration) -> JoinHandle<()>
where
    S: TaskStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sync_external(&state).await {
                Ok(report) => debug!(
                    processed = report.containers_processed,
                    skipped = report.containers_skipped,
                    "background sync pass finished"
                ),
                Err(error) => warn!(%error, "background sync pass failed"),
            }
        }
    })
}

fn require_id<'a>(value: &'a str, field_name: &str) -> Result<&'a str, PlannerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PlannerError::validation(format!(
            "{field_name} must not be empty"
        )));
    }
    Ok(value)
}

fn parse_group(value: &str) -> Result<TaskGroup, PlannerError> {
    value.parse::<TaskGroup>().map_err(PlannerError::Validation)
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, PlannerError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        PlannerError::validation(format!("{field_name} must be YYYY-MM-DD: {error}"))
    })
}

fn parse_optional_date(
    value: Option<&str>,
    field_name: &str,
) -> Result<Option<NaiveDate>, PlannerError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| parse_date_input(value, field_name))
        .transpose()
}
