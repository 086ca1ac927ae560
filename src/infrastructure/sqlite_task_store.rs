use crate::domain::models::{
    DailyGoal, ExternalLink, Task, TaskGroup, TaskSource, TimeBlock,
};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::storage::open_connection;
use crate::infrastructure::task_store::{TaskStore, TaskTransaction};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};

const TASK_COLUMNS: &str = "id, title, source, group_name, position, due_date, completed_at, \
     completed_from_group, archived_at, external_id, external_project_id, external_url, \
     created_at, updated_at";
const BLOCK_COLUMNS: &str = "id, task_id, date, start_minutes, duration_minutes";

#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    db_path: PathBuf,
}

impl SqliteTaskStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, PlannerError> {
        open_connection(&self.db_path)
    }
}

impl TaskStore for SqliteTaskStore {
    fn read<T>(
        &self,
        operation: impl FnOnce(&dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let connection = self.connect()?;
        let session = SqliteSession {
            connection: &connection,
        };
        operation(&session)
    }

    fn write<T>(
        &self,
        operation: impl FnOnce(&mut dyn TaskTransaction) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        let mut connection = self.connect()?;
        // Writers take the lock up front and queue on the busy timeout.
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let output = {
            let mut session = SqliteSession {
                connection: &*transaction,
            };
            operation(&mut session)?
        };
        transaction.commit()?;
        Ok(output)
    }
}

struct SqliteSession<'c> {
    connection: &'c Connection,
}

struct TaskRow {
    id: String,
    title: String,
    source: String,
    group_name: String,
    position: i64,
    due_date: Option<String>,
    completed_at: Option<String>,
    completed_from_group: Option<String>,
    archived_at: Option<String>,
    external_id: Option<String>,
    external_project_id: Option<String>,
    external_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            source: row.get(2)?,
            group_name: row.get(3)?,
            position: row.get(4)?,
            due_date: row.get(5)?,
            completed_at: row.get(6)?,
            completed_from_group: row.get(7)?,
            archived_at: row.get(8)?,
            external_id: row.get(9)?,
            external_project_id: row.get(10)?,
            external_url: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_task(self) -> Result<Task, PlannerError> {
        let source = match self.source.as_str() {
            "personal" => TaskSource::Personal,
            "external" => TaskSource::External(ExternalLink {
                external_id: self.external_id.ok_or_else(|| {
                    corrupt_row(&self.id, "external task without external_id")
                })?,
                project_id: self.external_project_id.unwrap_or_default(),
                url: self.external_url,
            }),
            other => return Err(corrupt_row(&self.id, &format!("unknown source '{other}'"))),
        };
        let position = u32::try_from(self.position)
            .map_err(|_| corrupt_row(&self.id, &format!("negative position {}", self.position)))?;

        Ok(Task {
            group: parse_group(&self.id, &self.group_name)?,
            position,
            source,
            due_date: self.due_date.as_deref().map(parse_date).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            completed_from_group: self
                .completed_from_group
                .as_deref()
                .map(|raw| parse_group(&self.id, raw))
                .transpose()?,
            archived_at: self.archived_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            title: self.title,
        })
    }
}

struct BlockRow {
    id: String,
    task_id: String,
    date: String,
    start_minutes: u32,
    duration_minutes: u32,
}

impl BlockRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            date: row.get(2)?,
            start_minutes: row.get(3)?,
            duration_minutes: row.get(4)?,
        })
    }

    fn into_block(self) -> Result<TimeBlock, PlannerError> {
        Ok(TimeBlock {
            date: parse_date(&self.date)?,
            id: self.id,
            task_id: self.task_id,
            start_minutes: self.start_minutes,
            duration_minutes: self.duration_minutes,
        })
    }
}

impl SqliteSession<'_> {
    fn query_tasks(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Task>, PlannerError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks {clause}");
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement
            .query_map(params, TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn query_blocks(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TimeBlock>, PlannerError> {
        let sql = format!("SELECT {BLOCK_COLUMNS} FROM time_blocks {clause}");
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement
            .query_map(params, BlockRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(BlockRow::into_block).collect()
    }
}

impl TaskTransaction for SqliteSession<'_> {
    fn task(&self, task_id: &str) -> Result<Option<Task>, PlannerError> {
        Ok(self.query_tasks("WHERE id = ?1", params![task_id])?.pop())
    }

    fn task_by_external_id(&self, external_id: &str) -> Result<Option<Task>, PlannerError> {
        Ok(self
            .query_tasks("WHERE external_id = ?1", params![external_id])?
            .pop())
    }

    fn active_tasks_in_group(&self, group: TaskGroup) -> Result<Vec<Task>, PlannerError> {
        self.query_tasks(
            "WHERE archived_at IS NULL AND group_name = ?1 ORDER BY position, created_at, id",
            params![group.as_str()],
        )
    }

    fn external_tasks(&self) -> Result<Vec<Task>, PlannerError> {
        self.query_tasks("WHERE external_id IS NOT NULL ORDER BY created_at, id", [])
    }

    fn archived_tasks(&self) -> Result<Vec<Task>, PlannerError> {
        self.query_tasks("WHERE archived_at IS NOT NULL ORDER BY archived_at DESC, id", [])
    }

    fn insert_task(&mut self, task: &Task) -> Result<(), PlannerError> {
        let (external_id, project_id, url) = external_columns(task);
        self.connection
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    task.id,
                    task.title,
                    task.source.as_str(),
                    task.group.as_str(),
                    task.position,
                    task.due_date.map(|date| date.to_string()),
                    task.completed_at.map(|value| value.to_rfc3339()),
                    task.completed_from_group.map(TaskGroup::as_str),
                    task.archived_at.map(|value| value.to_rfc3339()),
                    external_id,
                    project_id,
                    url,
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|error| {
                conflict_or(error, || {
                    format!(
                        "task {} collides with an existing id or external_id",
                        task.id
                    )
                })
            })?;
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> Result<(), PlannerError> {
        let (external_id, project_id, url) = external_columns(task);
        let changed = self
            .connection
            .execute(
                "UPDATE tasks SET
                   title = ?2, source = ?3, group_name = ?4, position = ?5, due_date = ?6,
                   completed_at = ?7, completed_from_group = ?8, archived_at = ?9,
                   external_id = ?10, external_project_id = ?11, external_url = ?12,
                   updated_at = ?13
                 WHERE id = ?1",
                params![
                    task.id,
                    task.title,
                    task.source.as_str(),
                    task.group.as_str(),
                    task.position,
                    task.due_date.map(|date| date.to_string()),
                    task.completed_at.map(|value| value.to_rfc3339()),
                    task.completed_from_group.map(TaskGroup::as_str),
                    task.archived_at.map(|value| value.to_rfc3339()),
                    external_id,
                    project_id,
                    url,
                    task.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|error| {
                conflict_or(error, || format!("task {} collides with an existing external_id", task.id))
            })?;
        if changed == 0 {
            return Err(PlannerError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    fn delete_task(&mut self, task_id: &str) -> Result<bool, PlannerError> {
        self.connection
            .execute("DELETE FROM time_blocks WHERE task_id = ?1", params![task_id])?;
        let removed = self
            .connection
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(removed > 0)
    }

    fn set_position(&mut self, task_id: &str, position: u32) -> Result<(), PlannerError> {
        let changed = self.connection.execute(
            "UPDATE tasks SET position = ?2 WHERE id = ?1",
            params![task_id, position],
        )?;
        if changed == 0 {
            return Err(PlannerError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    fn time_block(&self, block_id: &str) -> Result<Option<TimeBlock>, PlannerError> {
        Ok(self.query_blocks("WHERE id = ?1", params![block_id])?.pop())
    }

    fn time_block_for_task(
        &self,
        task_id: &str,
        date: NaiveDate,
    ) -> Result<Option<TimeBlock>, PlannerError> {
        Ok(self
            .query_blocks(
                "WHERE task_id = ?1 AND date = ?2",
                params![task_id, date.to_string()],
            )?
            .pop())
    }

    fn time_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, PlannerError> {
        self.query_blocks(
            "WHERE date = ?1 ORDER BY start_minutes, id",
            params![date.to_string()],
        )
    }

    fn insert_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError> {
        self.connection
            .execute(
                &format!("INSERT INTO time_blocks ({BLOCK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    block.id,
                    block.task_id,
                    block.date.to_string(),
                    block.start_minutes,
                    block.duration_minutes,
                ],
            )
            .map_err(|error| {
                conflict_or(error, || {
                    format!(
                        "task {} already has a time block on {}",
                        block.task_id, block.date
                    )
                })
            })?;
        Ok(())
    }

    fn update_time_block(&mut self, block: &TimeBlock) -> Result<(), PlannerError> {
        let changed = self.connection.execute(
            "UPDATE time_blocks SET date = ?2, start_minutes = ?3, duration_minutes = ?4
             WHERE id = ?1",
            params![
                block.id,
                block.date.to_string(),
                block.start_minutes,
                block.duration_minutes,
            ],
        )?;
        if changed == 0 {
            return Err(PlannerError::NotFound(format!("time block {}", block.id)));
        }
        Ok(())
    }

    fn delete_time_block(&mut self, block_id: &str) -> Result<bool, PlannerError> {
        let removed = self
            .connection
            .execute("DELETE FROM time_blocks WHERE id = ?1", params![block_id])?;
        Ok(removed > 0)
    }

    fn delete_time_blocks_for_task(&mut self, task_id: &str) -> Result<usize, PlannerError> {
        Ok(self
            .connection
            .execute("DELETE FROM time_blocks WHERE task_id = ?1", params![task_id])?)
    }

    fn daily_goal(&self, date: NaiveDate) -> Result<Option<DailyGoal>, PlannerError> {
        let row: Option<(String, String)> = self
            .connection
            .query_row(
                "SELECT content, updated_at FROM daily_goals WHERE date = ?1",
                params![date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((content, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(DailyGoal {
            date,
            content,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    fn upsert_daily_goal(&mut self, goal: &DailyGoal) -> Result<(), PlannerError> {
        self.connection.execute(
            "INSERT INTO daily_goals (date, content, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET
               content = excluded.content,
               updated_at = excluded.updated_at",
            params![goal.date.to_string(), goal.content, goal.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

fn external_columns(task: &Task) -> (Option<&str>, Option<&str>, Option<&str>) {
    match &task.source {
        TaskSource::External(link) => (
            Some(link.external_id.as_str()),
            Some(link.project_id.as_str()),
            link.url.as_deref(),
        ),
        TaskSource::Personal => (None, None, None),
    }
}

fn conflict_or(error: rusqlite::Error, message: impl FnOnce() -> String) -> PlannerError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            PlannerError::Conflict(message())
        }
        _ => PlannerError::from(error),
    }
}

fn corrupt_row(task_id: &str, detail: &str) -> PlannerError {
    PlannerError::InvalidConfig(format!("corrupt task row {task_id}: {detail}"))
}

fn parse_group(task_id: &str, raw: &str) -> Result<TaskGroup, PlannerError> {
    raw.parse::<TaskGroup>()
        .map_err(|error| corrupt_row(task_id, &error))
}

fn parse_date(raw: &str) -> Result<NaiveDate, PlannerError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|error| PlannerError::InvalidConfig(format!("invalid stored date '{raw}': {error}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PlannerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            PlannerError::InvalidConfig(format!("invalid stored timestamp '{raw}': {error}"))
        })
}
