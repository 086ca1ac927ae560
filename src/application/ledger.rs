//! Dense per-group ranking. Every function runs inside the caller's store
//! transaction, so an error anywhere leaves all positions as they were.

use crate::application::scheduler::{self, DayContext};
use crate::domain::models::{Task, TaskGroup};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::task_store::TaskTransaction;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

pub fn end_position(tx: &dyn TaskTransaction, group: TaskGroup) -> Result<u32, PlannerError> {
    Ok(tx
        .active_tasks_in_group(group)?
        .iter()
        .map(|task| task.position + 1)
        .max()
        .unwrap_or(0))
}

pub fn insert_at_end(tx: &mut dyn TaskTransaction, mut task: Task) -> Result<Task, PlannerError> {
    task.validate().map_err(PlannerError::Validation)?;
    task.position = end_position(tx, task.group)?;
    tx.insert_task(&task)?;
    Ok(task)
}

pub fn renumber(tx: &mut dyn TaskTransaction, group: TaskGroup) -> Result<(), PlannerError> {
    let ordered = tx.active_tasks_in_group(group)?;
    for (index, task) in ordered.iter().enumerate() {
        let position = rank(index)?;
        if task.position != position {
            tx.set_position(&task.id, position)?;
        }
    }
    Ok(())
}

pub fn move_to_group(
    tx: &mut dyn TaskTransaction,
    task_id: &str,
    new_group: TaskGroup,
    day: DayContext<'_>,
    now: DateTime<Utc>,
) -> Result<Task, PlannerError> {
    let mut task = require_active(tx, task_id)?;
    if task.group == new_group {
        return Ok(task);
    }

    let old_group = task.group;
    if old_group.is_scheduled() {
        tx.delete_time_blocks_for_task(&task.id)?;
    }

    task.position = end_position(tx, new_group)?;
    task.group = new_group;
    task.updated_at = now;
    tx.update_task(&task)?;

    if new_group.is_scheduled() {
        scheduler::schedule_into_free_slot(tx, &task.id, day)?;
    }

    renumber(tx, old_group)?;
    debug!(task_id, from = %old_group, to = %new_group, "task moved between groups");
    Ok(task)
}

pub fn move_to_position(
    tx: &mut dyn TaskTransaction,
    task_id: &str,
    new_index: usize,
) -> Result<Task, PlannerError> {
    let task = require_active(tx, task_id)?;
    let mut ordered = tx.active_tasks_in_group(task.group)?;
    let current_index = ordered
        .iter()
        .position(|candidate| candidate.id == task.id)
        .ok_or_else(|| {
            PlannerError::InvariantBreach(format!(
                "active task {task_id} missing from its group {}",
                task.group
            ))
        })?;

    let target_index = new_index.min(ordered.len() - 1);
    if target_index == current_index {
        return Ok(task);
    }

    let moving = ordered.remove(current_index);
    ordered.insert(target_index, moving);
    for (index, candidate) in ordered.iter().enumerate() {
        let position = rank(index)?;
        if candidate.position != position {
            tx.set_position(&candidate.id, position)?;
        }
    }

    tx.task(task_id)?
        .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))
}

/// Takes a task out of ranking. The archived row keeps its last position;
/// the rest of its group closes the gap.
pub fn archive(
    tx: &mut dyn TaskTransaction,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<Task, PlannerError> {
    let mut task = require_task(tx, task_id)?;
    if task.is_archived() {
        return Ok(task);
    }
    task.archived_at = Some(now);
    task.updated_at = now;
    tx.update_task(&task)?;
    tx.delete_time_blocks_for_task(&task.id)?;
    renumber(tx, task.group)?;
    Ok(task)
}

pub fn delete(tx: &mut dyn TaskTransaction, task_id: &str) -> Result<Task, PlannerError> {
    let task = require_task(tx, task_id)?;
    tx.delete_task(&task.id)?;
    if task.is_active() {
        renumber(tx, task.group)?;
    }
    Ok(task)
}

/// Checks that the active positions of `group` are exactly `0..n`. A breach
/// is reported, never repaired here.
pub fn verify_dense(tx: &dyn TaskTransaction, group: TaskGroup) -> Result<(), PlannerError> {
    let mut positions = tx
        .active_tasks_in_group(group)?
        .into_iter()
        .map(|task| task.position)
        .collect::<Vec<_>>();
    positions.sort_unstable();

    let dense = positions
        .iter()
        .enumerate()
        .all(|(index, position)| u32::try_from(index).is_ok_and(|index| index == *position));
    if !dense {
        error!(group = %group, ?positions, "dense rank invariant broken");
        return Err(PlannerError::InvariantBreach(format!(
            "group {group} has positions {positions:?}, expected 0..{}",
            positions.len()
        )));
    }
    Ok(())
}

pub fn require_task(tx: &dyn TaskTransaction, task_id: &str) -> Result<Task, PlannerError> {
    tx.task(task_id)?
        .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))
}

fn require_active(tx: &dyn TaskTransaction, task_id: &str) -> Result<Task, PlannerError> {
    let task = require_task(tx, task_id)?;
    if task.is_archived() {
        return Err(PlannerError::validation(format!(
            "task {task_id} is archived and no longer ranked"
        )));
    }
    Ok(task)
}

fn rank(index: usize) -> Result<u32, PlannerError> {
    u32::try_from(index)
        .map_err(|_| PlannerError::InvariantBreach(format!("group rank overflow at {index}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskSource;
    use crate::domain::schedule::DAY_START_MINUTES;
    use crate::infrastructure::sqlite_task_store::SqliteTaskStore;
    use crate::infrastructure::storage::initialize_database;
    use crate::infrastructure::task_store::{InMemoryTaskStore, TaskStore};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn day() -> DayContext<'static> {
        DayContext::new(NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"), &[])
    }

    fn create(store: &InMemoryTaskStore, title: &str, group: TaskGroup) -> Task {
        let task = Task::new(title, group, TaskSource::Personal, None, fixed_time());
        store
            .write(|tx| insert_at_end(tx, task))
            .expect("insert task")
    }

    fn titles(store: &InMemoryTaskStore, group: TaskGroup) -> Vec<(String, u32)> {
        store
            .read(|tx| tx.active_tasks_in_group(group))
            .expect("read group")
            .into_iter()
            .map(|task| (task.title, task.position))
            .collect()
    }

    #[test]
    fn insert_appends_after_highest_active_position() {
        let store = InMemoryTaskStore::default();
        let first = create(&store, "a", TaskGroup::Inbox);
        let second = create(&store, "b", TaskGroup::Inbox);
        let other_group = create(&store, "c", TaskGroup::Home);

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(other_group.position, 0);
    }

    #[test]
    fn insert_rejects_blank_title_before_writing() {
        let store = InMemoryTaskStore::default();
        let blank = Task::new("  ", TaskGroup::Inbox, TaskSource::Personal, None, fixed_time());
        let result = store.write(|tx| insert_at_end(tx, blank));
        assert!(matches!(result, Err(PlannerError::Validation(_))));
        assert!(titles(&store, TaskGroup::Inbox).is_empty());
    }

    #[test]
    fn move_to_group_round_trip_manages_block_and_renumbers() {
        let store = InMemoryTaskStore::default();
        let a = create(&store, "a", TaskGroup::Inbox);
        create(&store, "b", TaskGroup::Inbox);
        create(&store, "c", TaskGroup::Inbox);

        let moved = store
            .write(|tx| move_to_group(tx, &a.id, TaskGroup::Today, day(), fixed_time()))
            .expect("move into today");
        assert_eq!(moved.position, 0);
        assert_eq!(
            titles(&store, TaskGroup::Inbox),
            vec![("b".to_string(), 0), ("c".to_string(), 1)]
        );
        let block = store
            .read(|tx| tx.time_block_for_task(&a.id, day().date))
            .expect("read block")
            .expect("block created on entering today");
        assert_eq!(block.start_minutes, DAY_START_MINUTES);

        store
            .write(|tx| move_to_group(tx, &a.id, TaskGroup::Inbox, day(), fixed_time()))
            .expect("move back");
        assert_eq!(
            titles(&store, TaskGroup::Inbox),
            vec![("b".to_string(), 0), ("c".to_string(), 1), ("a".to_string(), 2)]
        );
        let blocks = store
            .read(|tx| tx.time_blocks_for_date(day().date))
            .expect("read blocks");
        assert!(blocks.is_empty());
    }

    #[test]
    fn move_to_same_group_is_a_no_op() {
        let store = InMemoryTaskStore::default();
        let a = create(&store, "a", TaskGroup::Calls);
        let unchanged = store
            .write(|tx| move_to_group(tx, &a.id, TaskGroup::Calls, day(), fixed_time()))
            .expect("no-op move");
        assert_eq!(unchanged, a);
    }

    #[test]
    fn move_to_position_reorders_and_clamps_past_end() {
        let store = InMemoryTaskStore::default();
        let a = create(&store, "a", TaskGroup::Computer);
        create(&store, "b", TaskGroup::Computer);
        let c = create(&store, "c", TaskGroup::Computer);

        store
            .write(|tx| move_to_position(tx, &c.id, 0))
            .expect("move to front");
        assert_eq!(
            titles(&store, TaskGroup::Computer),
            vec![("c".to_string(), 0), ("a".to_string(), 1), ("b".to_string(), 2)]
        );

        let moved = store
            .write(|tx| move_to_position(tx, &a.id, 99))
            .expect("move past end");
        assert_eq!(moved.position, 2);
        assert_eq!(
            titles(&store, TaskGroup::Computer),
            vec![("c".to_string(), 0), ("b".to_string(), 1), ("a".to_string(), 2)]
        );
    }

    #[test]
    fn archive_keeps_stale_position_and_closes_gap() {
        let store = InMemoryTaskStore::default();
        create(&store, "a", TaskGroup::Today);
        let b = create(&store, "b", TaskGroup::Today);
        create(&store, "c", TaskGroup::Today);

        let archived = store
            .write(|tx| archive(tx, &b.id, fixed_time()))
            .expect("archive");
        assert_eq!(archived.position, 1);
        assert_eq!(
            titles(&store, TaskGroup::Today),
            vec![("a".to_string(), 0), ("c".to_string(), 1)]
        );
        let block = store
            .read(|tx| tx.time_block_for_task(&b.id, day().date))
            .expect("read block");
        assert!(block.is_none());
        let still_there = store.read(|tx| tx.task(&b.id)).expect("read task");
        assert!(still_there.is_some_and(|task| task.is_archived()));
    }

    #[test]
    fn archived_task_cannot_be_moved() {
        let store = InMemoryTaskStore::default();
        let a = create(&store, "a", TaskGroup::Home);
        store.write(|tx| archive(tx, &a.id, fixed_time())).expect("archive");

        let result = store.write(|tx| move_to_position(tx, &a.id, 0));
        assert!(matches!(result, Err(PlannerError::Validation(_))));
    }

    #[test]
    fn verify_dense_reports_gaps() {
        let store = InMemoryTaskStore::default();
        let a = create(&store, "a", TaskGroup::Outside);
        create(&store, "b", TaskGroup::Outside);
        store.write(|tx| tx.set_position(&a.id, 5)).expect("corrupt rank");

        let result = store.read(|tx| verify_dense(tx, TaskGroup::Outside));
        assert!(matches!(result, Err(PlannerError::InvariantBreach(_))));
    }

    fn contend_on_one_group<S: TaskStore>(store: &S) {
        let ids: Vec<String> = (0..10)
            .map(|index| {
                let task = Task::new(
                    format!("task {index}"),
                    TaskGroup::Inbox,
                    TaskSource::Personal,
                    None,
                    fixed_time(),
                );
                store.write(|tx| insert_at_end(tx, task)).expect("insert task").id
            })
            .collect();

        std::thread::scope(|scope| {
            for worker in 0..6 {
                let ids = &ids;
                scope.spawn(move || {
                    for round in 0..25 {
                        let task_id = &ids[(worker * 7 + round) % ids.len()];
                        if round % 5 == 4 {
                            let target = if (worker + round) % 2 == 0 {
                                TaskGroup::Inbox
                            } else {
                                TaskGroup::Someday
                            };
                            store
                                .write(|tx| move_to_group(tx, task_id, target, day(), fixed_time()))
                                .expect("move group");
                        } else {
                            store
                                .write(|tx| move_to_position(tx, task_id, (worker + round) % 10))
                                .expect("move position");
                        }
                    }
                });
            }
        });

        let mut active = 0;
        for group in [TaskGroup::Inbox, TaskGroup::Someday] {
            store
                .read(|tx| verify_dense(tx, group))
                .expect("group stays dense");
            active += store
                .read(|tx| tx.active_tasks_in_group(group))
                .expect("read group")
                .len();
        }
        assert_eq!(active, ids.len());
    }

    #[test]
    fn concurrent_writers_keep_in_memory_group_dense() {
        contend_on_one_group(&InMemoryTaskStore::default());
    }

    #[test]
    fn concurrent_writers_keep_sqlite_group_dense() {
        let dir = std::env::temp_dir().join(format!(
            "dayplan-ledger-tests-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("dayplan.sqlite");
        initialize_database(&path).expect("initialize schema");

        contend_on_one_group(&SqliteTaskStore::new(&path));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[derive(Debug, Clone)]
    enum Operation {
        Create(usize),
        MoveGroup(usize, usize),
        MovePosition(usize, usize),
        Archive(usize),
        Delete(usize),
    }

    fn operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            (0usize..TaskGroup::ALL.len()).prop_map(Operation::Create),
            (0usize..64, 0usize..TaskGroup::ALL.len())
                .prop_map(|(task, group)| Operation::MoveGroup(task, group)),
            (0usize..64, 0usize..10)
                .prop_map(|(task, index)| Operation::MovePosition(task, index)),
            (0usize..64).prop_map(Operation::Archive),
            (0usize..64).prop_map(Operation::Delete),
        ]
    }

    fn active_ids(store: &InMemoryTaskStore) -> Vec<String> {
        TaskGroup::ALL
            .into_iter()
            .flat_map(|group| {
                store
                    .read(|tx| tx.active_tasks_in_group(group))
                    .expect("read group")
            })
            .map(|task| task.id)
            .collect()
    }

    // Feature: dayplan, Property 1: active positions stay dense under any operation sequence
    proptest! {
        #[test]
        fn property1_positions_stay_dense(operations in proptest::collection::vec(operation(), 1..40)) {
            let store = InMemoryTaskStore::default();
            for operation in operations {
                let ids = active_ids(&store);
                let pick = |index: usize| ids.get(index % ids.len().max(1)).cloned();
                match operation {
                    Operation::Create(group) => {
                        create(&store, "generated", TaskGroup::ALL[group]);
                    }
                    Operation::MoveGroup(task, group) => {
                        if let Some(task_id) = pick(task) {
                            store
                                .write(|tx| move_to_group(tx, &task_id, TaskGroup::ALL[group], day(), fixed_time()))
                                .expect("move group");
                        }
                    }
                    Operation::MovePosition(task, index) => {
                        if let Some(task_id) = pick(task) {
                            store
                                .write(|tx| move_to_position(tx, &task_id, index))
                                .expect("move position");
                        }
                    }
                    Operation::Archive(task) => {
                        if let Some(task_id) = pick(task) {
                            store.write(|tx| archive(tx, &task_id, fixed_time())).expect("archive");
                        }
                    }
                    Operation::Delete(task) => {
                        if let Some(task_id) = pick(task) {
                            store.write(|tx| delete(tx, &task_id)).expect("delete");
                        }
                    }
                }

                for group in TaskGroup::ALL {
                    prop_assert!(store.read(|tx| verify_dense(tx, group)).is_ok());
                }
            }
        }
    }
}
