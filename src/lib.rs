pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    archive_task_impl, complete_task_impl, compute_layout_impl, create_task_impl,
    daily_goal_for_impl, day_view_impl, delete_task_impl, list_archived_tasks_impl,
    list_groups_impl, list_time_blocks_impl, move_task_to_group_impl,
    move_task_to_position_impl, plan_view_impl, reconcile_impl, resize_time_block_impl,
    spawn_sync_loop, sync_external_impl, uncomplete_task_impl, update_daily_goal_impl,
    update_task_impl, update_time_block_impl, AppState, CompleteTaskResponse, DayEntry,
    DayEntryKind, DayView, GroupView, PlanView, RemoteCompletion,
};
pub use application::integrations::IntegrationContext;
pub use application::reconcile::{ReconcileOutcome, SyncReport};
pub use domain::layout::{LayoutInterval, PositionedInterval};
pub use domain::models::{
    CalendarEvent, DailyGoal, ExternalLink, ExternalTodoSnapshot, Task, TaskGroup, TaskSource,
    TimeBlock,
};
pub use infrastructure::error::PlannerError;
pub use infrastructure::sqlite_task_store::SqliteTaskStore;
pub use infrastructure::task_store::{InMemoryTaskStore, TaskStore};

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Planner {
    pub state: Arc<AppState<SqliteTaskStore>>,
    pub sync_task: Option<JoinHandle<()>>,
}

impl Planner {
    pub fn shutdown(self) {
        if let Some(sync_task) = self.sync_task {
            sync_task.abort();
        }
    }
}

/// Opens the workspace at `workspace_root` and starts the background sync
/// loop when a todo service is configured. Must run inside a tokio runtime.
pub fn start(workspace_root: &Path) -> Result<Planner, PlannerError> {
    let state = Arc::new(AppState::open(workspace_root)?);
    let sync_task = state
        .integrations()
        .todo
        .is_some()
        .then(|| spawn_sync_loop(Arc::clone(&state), state.sync_interval()));
    Ok(Planner { state, sync_task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn start_without_integrations_runs_offline() {
        let path = std::env::temp_dir().join(format!("dayplan-start-tests-{}", std::process::id()));
        let planner = start(&path).expect("start planner");
        assert!(planner.sync_task.is_none());

        let groups = list_groups_impl(&planner.state).expect("list groups");
        assert_eq!(groups.len(), TaskGroup::ALL.len());

        planner.shutdown();
        let _ = fs::remove_dir_all(&path);
    }
}
