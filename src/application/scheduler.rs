use crate::domain::models::{next_id, BusyInterval, TimeBlock};
use crate::domain::schedule::{
    find_earliest_free_slot, normalize_block, DEFAULT_BLOCK_DURATION_MINUTES,
    GRID_INCREMENT_MINUTES,
};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::task_store::TaskTransaction;
use chrono::NaiveDate;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DayContext<'a> {
    pub date: NaiveDate,
    pub external_busy: &'a [BusyInterval],
}

impl<'a> DayContext<'a> {
    pub fn new(date: NaiveDate, external_busy: &'a [BusyInterval]) -> Self {
        Self {
            date,
            external_busy,
        }
    }
}

pub fn busy_intervals(
    tx: &dyn TaskTransaction,
    day: DayContext<'_>,
    excluding_task: Option<&str>,
) -> Result<Vec<BusyInterval>, PlannerError> {
    let mut busy = tx
        .time_blocks_for_date(day.date)?
        .into_iter()
        .filter(|block| Some(block.task_id.as_str()) != excluding_task)
        .map(|block| BusyInterval {
            start_minutes: block.start_minutes,
            end_minutes: block.end_minutes(),
        })
        .collect::<Vec<_>>();
    busy.extend_from_slice(day.external_busy);
    Ok(busy)
}

/// Creates the block of `task_id` on `date`, replacing any earlier block of
/// that task on the same date.
pub fn create_block(
    tx: &mut dyn TaskTransaction,
    task_id: &str,
    date: NaiveDate,
    start_minutes: i64,
    duration_minutes: i64,
) -> Result<TimeBlock, PlannerError> {
    let task = tx
        .task(task_id)?
        .ok_or_else(|| PlannerError::NotFound(format!("task {task_id}")))?;
    if task.is_archived() {
        return Err(PlannerError::validation(format!(
            "archived task {task_id} cannot be scheduled"
        )));
    }

    let (start_minutes, duration_minutes) =
        normalize_block(start_minutes, duration_minutes).map_err(PlannerError::Validation)?;
    if let Some(previous) = tx.time_block_for_task(task_id, date)? {
        tx.delete_time_block(&previous.id)?;
    }

    let block = TimeBlock {
        id: next_id("blk"),
        task_id: task_id.to_string(),
        date,
        start_minutes,
        duration_minutes,
    };
    block.validate().map_err(PlannerError::Validation)?;
    tx.insert_time_block(&block)?;
    debug!(
        task_id,
        %date,
        start = block.start_minutes,
        duration = block.duration_minutes,
        "time block created"
    );
    Ok(block)
}

pub fn schedule_into_free_slot(
    tx: &mut dyn TaskTransaction,
    task_id: &str,
    day: DayContext<'_>,
) -> Result<TimeBlock, PlannerError> {
    let busy = busy_intervals(tx, day, Some(task_id))?;
    let start = find_earliest_free_slot(DEFAULT_BLOCK_DURATION_MINUTES, &busy);
    create_block(
        tx,
        task_id,
        day.date,
        i64::from(start),
        i64::from(DEFAULT_BLOCK_DURATION_MINUTES),
    )
}

pub fn move_block(
    tx: &mut dyn TaskTransaction,
    block_id: &str,
    new_start: i64,
    new_duration: Option<i64>,
) -> Result<TimeBlock, PlannerError> {
    let mut block = require_block(tx, block_id)?;
    let duration = new_duration.unwrap_or(i64::from(block.duration_minutes));
    let (start_minutes, duration_minutes) =
        normalize_block(new_start, duration).map_err(PlannerError::Validation)?;
    block.start_minutes = start_minutes;
    block.duration_minutes = duration_minutes;
    tx.update_time_block(&block)?;
    Ok(block)
}

pub fn resize_block(
    tx: &mut dyn TaskTransaction,
    block_id: &str,
    new_duration: i64,
) -> Result<TimeBlock, PlannerError> {
    let mut block = require_block(tx, block_id)?;
    let floored = new_duration.max(i64::from(GRID_INCREMENT_MINUTES));
    let (_, duration_minutes) = normalize_block(i64::from(block.start_minutes), floored)
        .map_err(PlannerError::Validation)?;
    block.duration_minutes = duration_minutes;
    tx.update_time_block(&block)?;
    Ok(block)
}

fn require_block(tx: &dyn TaskTransaction, block_id: &str) -> Result<TimeBlock, PlannerError> {
    tx.time_block(block_id)?
        .ok_or_else(|| PlannerError::NotFound(format!("time block {block_id}")))
}
