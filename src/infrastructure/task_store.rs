use crate::domain::models::{DailyGoal, Task, TaskGroup, TimeBlock};
use crate::infrastructure::error::PlannerError;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub trait TaskTransaction {
    fn task(&self, task_id: &str) -> Result<Option<Task>, PlannerError>;
    fn task_by_external_id(&self, external_id: &str) -> Result<Option<Task>, PlannerError>;
    fn active_tasks_in_group(&self, group: TaskGroup) -> Result<Vec<Task>, PlannerError>;
    fn external_tasks(&self) -> Result<Vec<Task>, PlannerError>;
    fn archived_tasks(&self) -> Result<Vec<Task>, PlannerError>;
    fn insert_task(&mut self, task: &Task) -> Result<(), PlannerError>;
    fn update_task(&mut self, task: &Task) -> Result<(), PlannerError>;
    fn delete_task(&mut self, task_id: &str) -> Result<bool, PlannerError>;
    fn set_position(&mut self, task_id: &str, position: u32) -> Result<(), PlannerError>;

    fn time_block(&self, block_id: &str) -> Result<Option<TimeBlock>, PlannerError>;
    fn time_block_for_task(
        &self,
        task_id: &str,
        date: NaiveDate,
    ) -> Result<Option<TimeBlock>, PlannerError>;
    fn time_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, PlannerError>;
    /// Rejects a second block for the same (task, date) with `Conflict`.
    fn insert_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError>;
    fn update_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError>;
    fn delete_time_block(&mut self, block_id: &str) -> Result<bool, PlannerError>;
    fn delete_time_blocks_for_task(&mut self, task_id: &str) -> Result<usize, PlannerError>;

    fn daily_goal(&self, date: NaiveDate) -> Result<Option<DailyGoal>, PlannerError>;
    fn upsert_daily_goal(&mut self, goal: &DailyGoal) -> Result<(), PlannerError>;
}

pub trait TaskStore: Send + Sync {
    fn read<T>(
        &self,
        operation: impl FnOnce(&dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError>;

    /// Runs `operation` as one all-or-nothing transaction. Writers are
    /// serialized, so two renumbers of one group never interleave.
    fn write<T>(
        &self,
        operation: impl FnOnce(&mut dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError>;
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    tasks: HashMap<String, Task>,
    blocks: HashMap<String, TimeBlock>,
    goals: HashMap<NaiveDate, DailyGoal>,
}

impl StoreState {
    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by(|left, right| {
            left.position
                .cmp(&right.position)
                .then(left.created_at.cmp(&right.created_at))
                .then(left.id.cmp(&right.id))
        });
        tasks
    }

    fn ensure_unique_external_id(&self, task: &Task) -> Result<(), PlannerError> {
        let Some(external_id) = task.external_id() else {
            return Ok(());
        };
        let taken = self
            .tasks
            .values()
            .any(|other| other.id != task.id && other.external_id() == Some(external_id));
        if taken {
            return Err(PlannerError::Conflict(format!(
                "external_id already mirrored: {external_id}"
            )));
        }
        Ok(())
    }
}

impl TaskTransaction for StoreState {
    fn task(&self, task_id: &str) -> Result<Option<Task>, PlannerError> {
        Ok(self.tasks.get(task_id).cloned())
    }

    fn task_by_external_id(&self, external_id: &str) -> Result<Option<Task>, PlannerError> {
        Ok(self
            .tasks
            .values()
            .find(|task| task.external_id() == Some(external_id))
            .cloned())
    }

    fn active_tasks_in_group(&self, group: TaskGroup) -> Result<Vec<Task>, PlannerError> {
        Ok(Self::sorted(
            self.tasks
                .values()
                .filter(|task| task.is_active() && task.group == group)
                .cloned()
                .collect(),
        ))
    }

    fn external_tasks(&self) -> Result<Vec<Task>, PlannerError> {
        let mut tasks = self
            .tasks
            .values()
            .filter(|task| task.external_id().is_some())
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then(left.id.cmp(&right.id))
        });
        Ok(tasks)
    }

    fn archived_tasks(&self) -> Result<Vec<Task>, PlannerError> {
        let mut tasks = self
            .tasks
            .values()
            .filter(|task| task.is_archived())
            .cloned()
            .collect::<Vec<_>>();
        tasks.sort_by(|left, right| {
            right
                .archived_at
                .cmp(&left.archived_at)
                .then(left.id.cmp(&right.id))
        });
        Ok(tasks)
    }

    fn insert_task(&mut self, task: &Task) -> Result<(), PlannerError> {
        if self.tasks.contains_key(&task.id) {
            return Err(PlannerError::Conflict(format!("task id already exists: {}", task.id)));
        }
        self.ensure_unique_external_id(task)?;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> Result<(), PlannerError> {
        if !self.tasks.contains_key(&task.id) {
            return Err(PlannerError::NotFound(format!("task {}", task.id)));
        }
        self.ensure_unique_external_id(task)?;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete_task(&mut self, task_id: &str) -> Result<bool, PlannerError> {
        self.blocks.retain(|_, block| block.task_id != task_id);
        Ok(self.tasks.remove(task_id).is_some())
    }

    fn set_position(&mut self, task_id: &str, position: u32) -> Result<(), PlannerError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))?;
        task.position = position;
        Ok(())
    }

    fn time_block(&self, block_id: &str) -> Result<Option<TimeBlock>, PlannerError> {
        Ok(self.blocks.get(block_id).cloned())
    }

    fn time_block_for_task(
        &self,
        task_id: &str,
        date: NaiveDate,
    ) -> Result<Option<TimeBlock>, PlannerError> {
        Ok(self
            .blocks
            .values()
            .find(|block| block.task_id == task_id && block.date == date)
            .cloned())
    }

    fn time_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, PlannerError> {
        let mut blocks = self
            .blocks
            .values()
            .filter(|block| block.date == date)
            .cloned()
            .collect::<Vec<_>>();
        blocks.sort_by(|left, right| {
            left.start_minutes
                .cmp(&right.start_minutes)
                .then(left.id.cmp(&right.id))
        });
        Ok(blocks)
    }

    fn insert_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError> {
        if !self.tasks.contains_key(&block.task_id) {
            return Err(PlannerError::NotFound(format!("task {}", block.task_id)));
        }
        if self
            .blocks
            .values()
            .any(|existing| existing.task_id == block.task_id && existing.date == block.date)
        {
            return Err(PlannerError::Conflict(format!(
                "task {} already has a time block on {}",
                block.task_id, block.date
            )));
        }
        self.blocks.insert(block.id.clone(), block.clone());
        Ok(())
    }

    fn update_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError> {
        if !self.blocks.contains_key(&block.id) {
            return Err(PlannerError::NotFound(format!("time block {}", block.id)));
        }
        self.blocks.insert(block.id.clone(), block.clone());
        Ok(())
    }

    fn delete_time_block(&mut self, block_id: &str) -> Result<bool, PlannerError> {
        Ok(self.blocks.remove(block_id).is_some())
    }

    fn delete_time_blocks_for_task(&mut self, task_id: &str) -> Result<usize, PlannerError> {
        let before = self.blocks.len();
        self.blocks.retain(|_, block| block.task_id != task_id);
        Ok(before - self.blocks.len())
    }

    fn daily_goal(&self, date: NaiveDate) -> Result<Option<DailyGoal>, PlannerError> {
        Ok(self.goals.get(&date).cloned())
    }

    fn upsert_daily_goal(&mut self, goal: &DailyGoal) -> Result<(), PlannerError> {
        self.goals.insert(goal.date, goal.clone());
        Ok(())
    }
}

/// Copy-on-write store: a write runs against a clone of the state and the
/// clone replaces the original only when the operation succeeds.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl TaskStore for InMemoryTaskStore {
    fn read<T>(
        &self,
        operation: impl FnOnce(&dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let state = self
            .state
            .lock()
            .map_err(poisoned)?;
        operation(&*state)
    }

    fn write<T>(
        &self,
        operation: impl FnOnce(&mut dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let mut state = self
            .state
            .lock()
            .map_err(poisoned)?;
        let mut draft = state.clone();
        let output = operation(&mut draft)?;
        *state = draft;
        Ok(output)
    }
}

fn poisoned<G>(error: PoisonError<G>) -> PlannerError {
    PlannerError::InvariantBreach(format!("task store lock poisoned: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ExternalLink, TaskSource};
    use chrono::{DateTime, Utc};

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    fn external(external_id: &str) -> Task {
        Task::new(
            "Mirrored",
            TaskGroup::Inbox,
            TaskSource::External(ExternalLink {
                external_id: external_id.to_string(),
                project_id: "proj".to_string(),
                url: None,
            }),
            None,
            fixed_time(),
        )
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let store = InMemoryTaskStore::default();
        let task = external("todo-1");

        let result: Result<(), PlannerError> = store.write(|tx| {
            tx.insert_task(&task)?;
            Err(PlannerError::validation("abort after insert"))
        });
        assert!(result.is_err());

        let found = store.read(|tx| tx.task(&task.id)).expect("read");
        assert!(found.is_none());
    }

    #[test]
    fn duplicate_external_id_is_a_conflict() {
        let store = InMemoryTaskStore::default();
        store
            .write(|tx| tx.insert_task(&external("todo-1")))
            .expect("first insert");

        let result = store.write(|tx| tx.insert_task(&external("todo-1")));
        assert!(matches!(result, Err(PlannerError::Conflict(_))));
    }

    #[test]
    fn duplicate_block_for_task_and_date_is_a_conflict() {
        let store = InMemoryTaskStore::default();
        let task = external("todo-1");
        let block = TimeBlock {
            id: "blk-1".to_string(),
            task_id: task.id.clone(),
            date: day(),
            start_minutes: 420,
            duration_minutes: 30,
        };
        store
            .write(|tx| {
                tx.insert_task(&task)?;
                tx.insert_time_block(&block)
            })
            .expect("seed");

        let duplicate = TimeBlock {
            id: "blk-2".to_string(),
            start_minutes: 500,
            ..block.clone()
        };
        let result = store.write(|tx| tx.insert_time_block(&duplicate));
        assert!(matches!(result, Err(PlannerError::Conflict(_))));

        let next_day = TimeBlock {
            id: "blk-3".to_string(),
            date: day().succ_opt().expect("next day"),
            ..block
        };
        store
            .write(|tx| tx.insert_time_block(&next_day))
            .expect("other date is allowed");
    }

    #[test]
    fn deleting_task_drops_its_blocks() {
        let store = InMemoryTaskStore::default();
        let task = external("todo-1");
        let block = TimeBlock {
            id: "blk-1".to_string(),
            task_id: task.id.clone(),
            date: day(),
            start_minutes: 420,
            duration_minutes: 30,
        };
        store
            .write(|tx| {
                tx.insert_task(&task)?;
                tx.insert_time_block(&block)
            })
            .expect("seed");

        let removed = store.write(|tx| tx.delete_task(&task.id)).expect("delete");
        assert!(removed);
        let blocks = store.read(|tx| tx.time_blocks_for_date(day())).expect("read");
        assert!(blocks.is_empty());
    }

    #[test]
    fn poisoned_store_reports_invariant_breach() {
        let store = InMemoryTaskStore::default();
        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.write(|_| -> Result<(), PlannerError> { panic!("writer crashed") });
        }));
        assert!(crashed.is_err());

        let read = store.read(|tx| tx.active_tasks_in_group(TaskGroup::Inbox));
        assert!(matches!(read, Err(PlannerError::InvariantBreach(_))));
        let write = store.write(|tx| tx.insert_task(&external("todo-9")));
        assert!(matches!(write, Err(PlannerError::InvariantBreach(_))));
    }
}
