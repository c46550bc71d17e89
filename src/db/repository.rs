//! Database repository for document reads and writes.
//!
//! Every write runs in one transaction together with its revision bump, and
//! the change is published after commit. Single-document writes are
//! last-write-wins.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::broadcast;

use super::{format_timestamp, parse_timestamp};
use crate::errors::AppError;
use crate::models::{
    image_columns, AttendanceLog, ChangeEvent, ChangeKind, Collection, ImageDocument, ImageRef,
    ImageRefType, LeaveStatus, LeaveType, ProfileSnapshot, RevisionInfo, Task, TaskPriority,
    TaskState, TaskStats, TaskStatus, UserProfile, UserRole,
};

/// Capacity of the change feed; slower subscribers skip ahead.
const CHANGE_FEED_CAPACITY: usize = 256;

const TASK_COLUMNS: &str = "id, title, description, priority, status, created_by, created_at, \
     assigned_to, assignee_name, assignee_avatar_url, assignee_avatar_id, \
     completed_at, proof_image_url, proof_id, completion_comment";

const ATTENDANCE_COLUMNS: &str = "id, user_id, user_name, user_avatar_url, user_avatar_id, \
     leave_type, start_date_time, end_date_time, reason, proof_image_url, proof_id, status, created_at";

/// Ids removed by a range deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedDocuments {
    pub tasks: Vec<String>,
    pub attendance: Vec<String>,
    pub images: Vec<String>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    /// Subscribe to committed document changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("revision_id")?)
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.try_get("revision_id")?,
            generated_at: row.try_get("generated_at")?,
        })
    }

    /// Bump the revision inside `tx`, commit, then publish one change.
    async fn commit_change(
        &self,
        mut tx: Transaction<'_, Sqlite>,
        collection: Collection,
        document_id: &str,
        kind: ChangeKind,
    ) -> Result<i64, AppError> {
        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;
        self.publish(revision_id, collection, document_id, kind);
        Ok(revision_id)
    }

    fn publish(&self, revision_id: i64, collection: Collection, document_id: &str, kind: ChangeKind) {
        // No subscribers is not an error
        let _ = self.changes.send(ChangeEvent {
            revision_id,
            collection,
            document_id: document_id.to_string(),
            kind,
        });
    }

    // ==================== PROFILE OPERATIONS ====================

    /// Get a profile by user ID.
    pub async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, email, avatar_url, avatar_id, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Insert a profile unless one already exists for this user.
    ///
    /// Returns whether this call created it.
    pub async fn insert_profile_if_absent(&self, profile: &UserProfile) -> Result<bool, AppError> {
        let (avatar_url, avatar_id) = image_columns(profile.avatar.as_ref());
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO users (id, name, email, avatar_url, avatar_id, role, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(avatar_url)
        .bind(avatar_id)
        .bind(profile.role.as_str())
        .bind(format_timestamp(&profile.created_at))
        .execute(&mut *tx)
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            self.commit_change(tx, Collection::Users, &profile.id, ChangeKind::Created)
                .await?;
        }
        Ok(created)
    }

    /// Replace the name and, when given, the avatar of a profile.
    pub async fn update_profile(
        &self,
        id: &str,
        name: &str,
        avatar: Option<&ImageRef>,
    ) -> Result<UserProfile, AppError> {
        let existing = self
            .get_profile(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", id)))?;

        let avatar = avatar.cloned().or(existing.avatar);
        let (avatar_url, avatar_id) = image_columns(avatar.as_ref());

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE users SET name = ?, avatar_url = ?, avatar_id = ? WHERE id = ?")
            .bind(name)
            .bind(avatar_url)
            .bind(avatar_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        self.commit_change(tx, Collection::Users, id, ChangeKind::Updated)
            .await?;

        Ok(UserProfile {
            name: name.to_string(),
            avatar,
            ..existing
        })
    }

    // ==================== TASK OPERATIONS ====================

    /// List tasks, newest first.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks WHERE status = ? ORDER BY created_at DESC, id",
                    TASK_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM tasks ORDER BY created_at DESC, id",
                    TASK_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(task_from_row).collect()
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Insert a new task document.
    pub async fn insert_task(&self, task: &Task) -> Result<(), AppError> {
        let state = StateColumns::of(&task.state);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(state.status)
        .bind(&task.created_by)
        .bind(format_timestamp(&task.created_at))
        .bind(state.assigned_to)
        .bind(state.assignee_name)
        .bind(state.assignee_avatar_url)
        .bind(state.assignee_avatar_id)
        .bind(state.completed_at)
        .bind(state.proof_image_url)
        .bind(state.proof_id)
        .bind(state.completion_comment)
        .execute(&mut *tx)
        .await?;

        self.commit_change(tx, Collection::Tasks, &task.id, ChangeKind::Created)
            .await?;
        Ok(())
    }

    /// Overwrite the lifecycle fields of a task.
    ///
    /// Unconditional: whatever was stored is replaced, so the last writer wins.
    pub async fn save_task_state(&self, task: &Task) -> Result<(), AppError> {
        let state = StateColumns::of(&task.state);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE tasks SET
                status = ?, assigned_to = ?, assignee_name = ?, assignee_avatar_url = ?,
                assignee_avatar_id = ?, completed_at = ?, proof_image_url = ?, proof_id = ?,
                completion_comment = ?
            WHERE id = ?"#,
        )
        .bind(state.status)
        .bind(state.assigned_to)
        .bind(state.assignee_name)
        .bind(state.assignee_avatar_url)
        .bind(state.assignee_avatar_id)
        .bind(state.completed_at)
        .bind(state.proof_image_url)
        .bind(state.proof_id)
        .bind(state.completion_comment)
        .bind(&task.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }

        self.commit_change(tx, Collection::Tasks, &task.id, ChangeKind::Updated)
            .await?;
        Ok(())
    }

    /// Dashboard counters for one user.
    pub async fn task_stats(&self, user_id: &str) -> Result<TaskStats, AppError> {
        let row = sqlx::query(
            r#"SELECT
                COALESCE(SUM(CASE WHEN status = 'finished' THEN 1 ELSE 0 END), 0) AS finished,
                COALESCE(SUM(CASE WHEN status = 'in_progress' AND assigned_to = ? THEN 1 ELSE 0 END), 0) AS in_progress_mine,
                COALESCE(SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END), 0) AS available
            FROM tasks"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskStats {
            finished: row.try_get("finished")?,
            in_progress_mine: row.try_get("in_progress_mine")?,
            available: row.try_get("available")?,
        })
    }

    // ==================== ATTENDANCE OPERATIONS ====================

    /// List all leave records, newest first.
    pub async fn list_attendance(&self) -> Result<Vec<AttendanceLog>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attendance_logs ORDER BY created_at DESC, id",
            ATTENDANCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    /// List one user's leave records, newest first.
    pub async fn list_attendance_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<AttendanceLog>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attendance_logs WHERE user_id = ? ORDER BY created_at DESC, id",
            ATTENDANCE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    /// Leave records that have not ended by `instant`, regardless of approval status.
    pub async fn list_attendance_ending_from(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<AttendanceLog>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM attendance_logs WHERE end_date_time >= ? ORDER BY created_at DESC, id",
            ATTENDANCE_COLUMNS
        ))
        .bind(format_timestamp(&instant))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attendance_from_row).collect()
    }

    /// Get a leave record by ID.
    pub async fn get_attendance(&self, id: &str) -> Result<Option<AttendanceLog>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM attendance_logs WHERE id = ?",
            ATTENDANCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(attendance_from_row).transpose()
    }

    /// Insert a new leave record.
    pub async fn insert_attendance(&self, log: &AttendanceLog) -> Result<(), AppError> {
        let (avatar_url, avatar_id) = image_columns(log.user_avatar.as_ref());
        let (proof_url, proof_id) = image_columns(log.proof_image.as_ref());

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO attendance_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ATTENDANCE_COLUMNS
        ))
        .bind(&log.id)
        .bind(&log.user_id)
        .bind(&log.user_name)
        .bind(avatar_url)
        .bind(avatar_id)
        .bind(log.leave_type.as_str())
        .bind(format_timestamp(&log.start_date))
        .bind(format_timestamp(&log.end_date))
        .bind(&log.reason)
        .bind(proof_url)
        .bind(proof_id)
        .bind(log.status.as_str())
        .bind(format_timestamp(&log.created_at))
        .execute(&mut *tx)
        .await?;

        self.commit_change(tx, Collection::AttendanceLogs, &log.id, ChangeKind::Created)
            .await?;
        Ok(())
    }

    // ==================== LEGACY IMAGE OPERATIONS ====================

    /// Get a legacy image document by ID.
    pub async fn get_image(&self, id: &str) -> Result<Option<ImageDocument>, AppError> {
        let row = sqlx::query(
            "SELECT id, content, ref_type, related_id, created_at FROM image_store WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(image_from_row).transpose()
    }

    /// Seed a legacy image document; new writes only store hosted URLs.
    #[cfg(test)]
    pub async fn insert_image(&self, image: &ImageDocument) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO image_store (id, content, ref_type, related_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&image.id)
        .bind(&image.content)
        .bind(image.ref_type.as_str())
        .bind(&image.related_id)
        .bind(format_timestamp(&image.created_at))
        .execute(&mut *tx)
        .await?;

        self.commit_change(tx, Collection::ImageStore, &image.id, ChangeKind::Created)
            .await?;
        Ok(())
    }

    // ==================== BULK DELETIONS ====================

    /// Delete every finished task completed at or before `cutoff`, in one transaction.
    ///
    /// Returns the deleted tasks. Nothing is written when none match.
    pub async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status = 'finished' AND completed_at <= ?",
            TASK_COLUMNS
        ))
        .bind(format_timestamp(&cutoff))
        .fetch_all(&mut *tx)
        .await?;

        let tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>, _>>()?;
        if tasks.is_empty() {
            return Ok(tasks);
        }

        for task in &tasks {
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(&task.id)
                .execute(&mut *tx)
                .await?;
        }

        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        for task in &tasks {
            self.publish(revision_id, Collection::Tasks, &task.id, ChangeKind::Deleted);
        }

        Ok(tasks)
    }

    /// Delete tasks and leave records created within `[start, end]`, plus the legacy
    /// images they reference, in one transaction.
    ///
    /// Image ids are deduplicated and counted whether or not the image document still exists.
    pub async fn delete_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DeletedDocuments, AppError> {
        let start = format_timestamp(&start);
        let end = format_timestamp(&end);
        let mut tx = self.pool.begin().await?;

        let task_rows =
            sqlx::query("SELECT id, proof_id FROM tasks WHERE created_at >= ? AND created_at <= ?")
                .bind(&start)
                .bind(&end)
                .fetch_all(&mut *tx)
                .await?;

        let attendance_rows = sqlx::query(
            "SELECT id, proof_id FROM attendance_logs WHERE created_at >= ? AND created_at <= ?",
        )
        .bind(&start)
        .bind(&end)
        .fetch_all(&mut *tx)
        .await?;

        let mut deleted = DeletedDocuments::default();
        let mut image_ids = BTreeSet::new();

        for row in &task_rows {
            deleted.tasks.push(row.try_get("id")?);
            if let Some(proof_id) = row.try_get::<Option<String>, _>("proof_id")? {
                image_ids.insert(proof_id);
            }
        }
        for row in &attendance_rows {
            deleted.attendance.push(row.try_get("id")?);
            if let Some(proof_id) = row.try_get::<Option<String>, _>("proof_id")? {
                image_ids.insert(proof_id);
            }
        }
        image_ids.retain(|id| !id.trim().is_empty());
        deleted.images = image_ids.into_iter().collect();

        if deleted.tasks.is_empty() && deleted.attendance.is_empty() && deleted.images.is_empty() {
            return Ok(deleted);
        }

        for id in &deleted.tasks {
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for id in &deleted.attendance {
            sqlx::query("DELETE FROM attendance_logs WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for id in &deleted.images {
            sqlx::query("DELETE FROM image_store WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let revision_id = bump_revision(&mut tx).await?;
        tx.commit().await?;

        for id in &deleted.tasks {
            self.publish(revision_id, Collection::Tasks, id, ChangeKind::Deleted);
        }
        for id in &deleted.attendance {
            self.publish(revision_id, Collection::AttendanceLogs, id, ChangeKind::Deleted);
        }
        for id in &deleted.images {
            self.publish(revision_id, Collection::ImageStore, id, ChangeKind::Deleted);
        }

        Ok(deleted)
    }
}

/// Increment the revision once for a whole batch.
async fn bump_revision(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, AppError> {
    let now = format_timestamp(&Utc::now());
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.try_get("revision_id")?)
}

/// Storage columns for a task's lifecycle state.
struct StateColumns<'a> {
    status: &'static str,
    assigned_to: Option<&'a str>,
    assignee_name: Option<&'a str>,
    assignee_avatar_url: Option<&'a str>,
    assignee_avatar_id: Option<&'a str>,
    completed_at: Option<String>,
    proof_image_url: Option<&'a str>,
    proof_id: Option<&'a str>,
    completion_comment: Option<&'a str>,
}

impl<'a> StateColumns<'a> {
    fn of(state: &'a TaskState) -> Self {
        let mut columns = StateColumns {
            status: TaskStatus::Available.as_str(),
            assigned_to: None,
            assignee_name: None,
            assignee_avatar_url: None,
            assignee_avatar_id: None,
            completed_at: None,
            proof_image_url: None,
            proof_id: None,
            completion_comment: None,
        };

        match state {
            TaskState::Available => {}
            TaskState::InProgress {
                assigned_to,
                assignee_snapshot,
            } => {
                columns.status = TaskStatus::InProgress.as_str();
                columns.set_assignee(assigned_to, assignee_snapshot);
            }
            TaskState::Finished {
                assigned_to,
                assignee_snapshot,
                completed_at,
                proof_image,
                completion_comment,
            } => {
                columns.status = TaskStatus::Finished.as_str();
                columns.set_assignee(assigned_to, assignee_snapshot);
                let (proof_url, proof_id) = image_columns(Some(proof_image));
                columns.completed_at = Some(format_timestamp(completed_at));
                columns.proof_image_url = proof_url;
                columns.proof_id = proof_id;
                columns.completion_comment = Some(completion_comment.as_str());
            }
        }

        columns
    }

    fn set_assignee(&mut self, assigned_to: &'a str, snapshot: &'a ProfileSnapshot) {
        let (avatar_url, avatar_id) = image_columns(snapshot.avatar.as_ref());
        self.assigned_to = Some(assigned_to);
        self.assignee_name = Some(snapshot.display_name.as_str());
        self.assignee_avatar_url = avatar_url;
        self.assignee_avatar_id = avatar_id;
    }
}

// Helper functions for row conversion

fn profile_from_row(row: &SqliteRow) -> Result<UserProfile, AppError> {
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(UserProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        avatar: ImageRef::resolve(row.try_get("avatar_url")?, row.try_get("avatar_id")?),
        role: UserRole::parse(&role).unwrap_or(UserRole::User),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, AppError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let created_at: String = row.try_get("created_at")?;

    let status = TaskStatus::parse(&status)
        .ok_or_else(|| AppError::Internal(format!("Task {} has unknown status {}", id, status)))?;

    let state = match status {
        TaskStatus::Available => TaskState::Available,
        TaskStatus::InProgress => {
            let (assigned_to, assignee_snapshot) = assignee_from_row(row, &id)?;
            TaskState::InProgress {
                assigned_to,
                assignee_snapshot,
            }
        }
        TaskStatus::Finished => {
            let (assigned_to, assignee_snapshot) = assignee_from_row(row, &id)?;
            let completed_at: Option<String> = row.try_get("completed_at")?;
            let completed_at = completed_at
                .ok_or_else(|| AppError::Internal(format!("Finished task {} has no completedAt", id)))?;
            let proof_image =
                ImageRef::resolve(row.try_get("proof_image_url")?, row.try_get("proof_id")?)
                    .ok_or_else(|| AppError::Internal(format!("Finished task {} has no proof", id)))?;
            let completion_comment: Option<String> = row.try_get("completion_comment")?;
            TaskState::Finished {
                assigned_to,
                assignee_snapshot,
                completed_at: parse_timestamp(&completed_at)?,
                proof_image,
                completion_comment: completion_comment.unwrap_or_default(),
            }
        }
    };

    Ok(Task {
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        priority: TaskPriority::parse(&priority).unwrap_or_default(),
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp(&created_at)?,
        state,
        id,
    })
}

fn assignee_from_row(row: &SqliteRow, task_id: &str) -> Result<(String, ProfileSnapshot), AppError> {
    let assigned_to: Option<String> = row.try_get("assigned_to")?;
    let assigned_to = assigned_to
        .ok_or_else(|| AppError::Internal(format!("Task {} is assigned to nobody", task_id)))?;
    let name: Option<String> = row.try_get("assignee_name")?;
    Ok((
        assigned_to,
        ProfileSnapshot {
            display_name: name.unwrap_or_else(|| "Unknown".to_string()),
            avatar: ImageRef::resolve(
                row.try_get("assignee_avatar_url")?,
                row.try_get("assignee_avatar_id")?,
            ),
        },
    ))
}

fn attendance_from_row(row: &SqliteRow) -> Result<AttendanceLog, AppError> {
    let leave_type: String = row.try_get("leave_type")?;
    let status: String = row.try_get("status")?;
    let start: String = row.try_get("start_date_time")?;
    let end: String = row.try_get("end_date_time")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AttendanceLog {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        user_avatar: ImageRef::resolve(row.try_get("user_avatar_url")?, row.try_get("user_avatar_id")?),
        leave_type: LeaveType::parse(&leave_type).unwrap_or(LeaveType::Other),
        start_date: parse_timestamp(&start)?,
        end_date: parse_timestamp(&end)?,
        reason: row.try_get("reason")?,
        proof_image: ImageRef::resolve(row.try_get("proof_image_url")?, row.try_get("proof_id")?),
        status: LeaveStatus::parse(&status).unwrap_or(LeaveStatus::Pending),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn image_from_row(row: &SqliteRow) -> Result<ImageDocument, AppError> {
    let ref_type: String = row.try_get("ref_type")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(ImageDocument {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        ref_type: ImageRefType::parse(&ref_type).ok_or_else(|| {
            AppError::Internal(format!("Image has unknown ref type {}", ref_type))
        })?,
        related_id: row.try_get("related_id")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), dir)
    }

    fn snapshot(name: &str) -> ProfileSnapshot {
        ProfileSnapshot {
            display_name: name.to_string(),
            avatar: Some(ImageRef::Legacy {
                id: format!("avatar-{}", name),
            }),
        }
    }

    fn task_created_at(created_at: DateTime<Utc>) -> Task {
        Task::new(
            "Title".to_string(),
            "Description".to_string(),
            TaskPriority::Low,
            "creator".to_string(),
            created_at,
        )
    }

    fn finished_task(completed_at: DateTime<Utc>, proof: ImageRef) -> Task {
        let mut task = task_created_at(completed_at - Duration::days(1));
        task.claim("u1", snapshot("ana")).unwrap();
        task.finish(proof, "done", completed_at).unwrap();
        task
    }

    fn leave_created_at(created_at: DateTime<Utc>, proof: ImageRef) -> AttendanceLog {
        AttendanceLog {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            user_name: "Ana".to_string(),
            user_avatar: None,
            leave_type: LeaveType::Sick,
            start_date: created_at,
            end_date: created_at + Duration::days(1),
            reason: "flu".to_string(),
            proof_image: Some(proof),
            status: LeaveStatus::Pending,
            created_at,
        }
    }

    fn legacy(id: &str) -> ImageRef {
        ImageRef::Legacy { id: id.to_string() }
    }

    #[tokio::test]
    async fn test_task_state_round_trips_through_storage() {
        let (repo, _dir) = repo().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut task = task_created_at(now);
        repo.insert_task(&task).await.unwrap();

        task.claim("u1", snapshot("ana")).unwrap();
        repo.save_task_state(&task).await.unwrap();
        assert_eq!(repo.get_task(&task.id).await.unwrap(), Some(task.clone()));

        task.finish(legacy("proof-1"), "done", now).unwrap();
        repo.save_task_state(&task).await.unwrap();
        let stored = repo.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored, task);
        assert_eq!(stored.proof_image(), Some(&legacy("proof-1")));
    }

    #[tokio::test]
    async fn test_concurrent_claims_last_writer_wins() {
        let (repo, _dir) = repo().await;
        let task = task_created_at(Utc::now());
        repo.insert_task(&task).await.unwrap();

        // Two actors read the same available task and both claim it
        let mut first = repo.get_task(&task.id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.claim("u1", snapshot("ana")).unwrap();
        second.claim("u2", snapshot("bo")).unwrap();
        repo.save_task_state(&first).await.unwrap();
        repo.save_task_state(&second).await.unwrap();

        let stored = repo.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.assignee(), Some("u2"));
    }

    #[tokio::test]
    async fn test_save_missing_task_is_not_found() {
        let (repo, _dir) = repo().await;
        let task = task_created_at(Utc::now());
        let err = repo.save_task_state(&task).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_and_filtered() {
        let (repo, _dir) = repo().await;
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let older = task_created_at(base);
        let mut newer = task_created_at(base + Duration::hours(1));
        repo.insert_task(&older).await.unwrap();
        newer.claim("u1", snapshot("ana")).unwrap();
        repo.insert_task(&newer).await.unwrap();

        let all = repo.list_tasks(None).await.unwrap();
        assert_eq!(
            all.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec![newer.id.as_str(), older.id.as_str()]
        );

        let available = repo.list_tasks(Some(TaskStatus::Available)).await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, older.id);

        let stats = repo.task_stats("u1").await.unwrap();
        assert_eq!(
            stats,
            TaskStats {
                finished: 0,
                in_progress_mine: 1,
                available: 1
            }
        );
    }

    #[tokio::test]
    async fn test_profile_is_created_once() {
        let (repo, _dir) = repo().await;
        let now = Utc::now();
        let profile = UserProfile {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            avatar: None,
            role: UserRole::User,
            created_at: now,
        };
        assert!(repo.insert_profile_if_absent(&profile).await.unwrap());

        let renamed = UserProfile {
            name: "Someone Else".to_string(),
            ..profile.clone()
        };
        assert!(!repo.insert_profile_if_absent(&renamed).await.unwrap());
        assert_eq!(repo.get_profile("u1").await.unwrap().unwrap().name, "Ana");

        let hosted = ImageRef::Hosted {
            url: "https://img.example/ana.png".to_string(),
        };
        let updated = repo.update_profile("u1", "Ana B", Some(&hosted)).await.unwrap();
        assert_eq!(updated.name, "Ana B");
        assert_eq!(repo.get_profile("u1").await.unwrap().unwrap().avatar, Some(hosted));
    }

    #[tokio::test]
    async fn test_attendance_ending_from_ignores_status() {
        let (repo, _dir) = repo().await;
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();

        let mut current = leave_created_at(now - Duration::days(1), legacy("p1"));
        current.status = LeaveStatus::Rejected;
        let past = AttendanceLog {
            end_date: now - Duration::hours(1),
            ..leave_created_at(now - Duration::days(3), legacy("p2"))
        };
        repo.insert_attendance(&current).await.unwrap();
        repo.insert_attendance(&past).await.unwrap();

        let away = repo.list_attendance_ending_from(now).await.unwrap();
        assert_eq!(away.len(), 1);
        assert!(away[0].covers(now));
        assert_eq!(away[0].id, current.id);
        assert_eq!(away[0].status, LeaveStatus::Rejected);

        let mine = repo.list_attendance_for_user("u1").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, current.id);
    }

    #[tokio::test]
    async fn test_delete_finished_before_cutoff() {
        let (repo, _dir) = repo().await;
        let now = Utc::now();
        let old = finished_task(now - Duration::days(31), legacy("old-proof"));
        let recent = finished_task(now - Duration::days(29), legacy("new-proof"));
        let mut active = task_created_at(now - Duration::days(40));
        active.claim("u2", snapshot("bo")).unwrap();
        for task in [&old, &recent, &active] {
            repo.insert_task(task).await.unwrap();
        }

        let deleted = repo
            .delete_finished_before(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, old.id);
        assert!(repo.get_task(&old.id).await.unwrap().is_none());
        assert!(repo.get_task(&recent.id).await.unwrap().is_some());
        assert!(repo.get_task(&active.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_finished_before_on_empty_store_writes_nothing() {
        let (repo, _dir) = repo().await;
        let before = repo.get_revision_id().await.unwrap();
        let deleted = repo.delete_finished_before(Utc::now()).await.unwrap();
        assert!(deleted.is_empty());
        assert_eq!(repo.get_revision_id().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_delete_created_between_dedupes_images() {
        let (repo, _dir) = repo().await;
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap() + Duration::milliseconds(999);

        let inside_task = finished_task(start + Duration::days(2), legacy("shared"));
        let inside_leave = leave_created_at(start + Duration::days(3), legacy("shared"));
        let hosted_leave = leave_created_at(
            start + Duration::days(4),
            ImageRef::Hosted {
                url: "https://img.example/x.png".to_string(),
            },
        );
        let outside = task_created_at(end + Duration::milliseconds(1));

        repo.insert_task(&inside_task).await.unwrap();
        repo.insert_attendance(&inside_leave).await.unwrap();
        repo.insert_attendance(&hosted_leave).await.unwrap();
        repo.insert_task(&outside).await.unwrap();
        repo.insert_image(&ImageDocument {
            id: "shared".to_string(),
            content: "data:image/png;base64,AAAA".to_string(),
            ref_type: ImageRefType::TaskProof,
            related_id: inside_task.id.clone(),
            created_at: start,
        })
        .await
        .unwrap();

        let deleted = repo.delete_created_between(start, end).await.unwrap();
        assert_eq!(deleted.tasks, vec![inside_task.id.clone()]);
        assert_eq!(deleted.attendance.len(), 2);
        assert_eq!(deleted.images, vec!["shared".to_string()]);

        assert!(repo.get_image("shared").await.unwrap().is_none());
        assert!(repo.get_task(&outside.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_change_feed_publishes_writes() {
        let (repo, _dir) = repo().await;
        let mut feed = repo.subscribe();
        let task = task_created_at(Utc::now());
        repo.insert_task(&task).await.unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.collection, Collection::Tasks);
        assert_eq!(event.document_id, task.id);
        assert_eq!(event.kind, ChangeKind::Created);
        assert_eq!(event.revision_id, repo.get_revision_id().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_writes_get_distinct_revisions() {
        let (repo, _dir) = repo().await;
        let repo = std::sync::Arc::new(repo);
        let start = repo.get_revision_id().await.unwrap();
        let mut feed = repo.subscribe();

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.insert_task(&task_created_at(Utc::now())).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let mut revisions = BTreeSet::new();
        for _ in 0..8 {
            revisions.insert(feed.recv().await.unwrap().revision_id);
        }
        let expected: BTreeSet<i64> = (start + 1..=start + 8).collect();
        assert_eq!(revisions, expected);
        assert_eq!(repo.get_revision_id().await.unwrap(), start + 8);
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_revision_untouched() {
        let (repo, _dir) = repo().await;
        let task = task_created_at(Utc::now());
        repo.insert_task(&task).await.unwrap();
        let revision = repo.get_revision_id().await.unwrap();

        // Duplicate primary key fails inside the transaction
        assert!(repo.insert_task(&task).await.is_err());
        assert_eq!(repo.get_revision_id().await.unwrap(), revision);
    }
}
