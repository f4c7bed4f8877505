use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::error::{OrchestratorError, Result};
use crate::history::{HistorySession, PageRequest};
use crate::store::WorkspaceStore;
use crate::workspace::{NewWorkspace, StatusUpdate, Workspace, WorkspaceFilters, WorkspaceStatus};

/// [`WorkspaceStore`] backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require_workspace(&self, id: i64) -> Result<Workspace> {
        self.find_workspace(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl WorkspaceStore for SqliteStore {
    async fn find_workspace(&self, id: i64) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_workspace_by_name(
        &self,
        project_id: i64,
        name: &str,
    ) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE project_id = ? AND name = ?",
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_running_workspace_for_user(&self, user_id: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE user_id = ? AND status = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(WorkspaceStatus::Running)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, new), fields(name = %new.name, slug = %new.slug))]
    async fn insert_workspace(&self, new: &NewWorkspace) -> Result<Workspace> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO workspaces (name, slug, user_id, project_id, tech, status, container_ref, connection_uri, host_port, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.slug)
        .bind(&new.user_id)
        .bind(new.project_id)
        .bind(&new.tech)
        .bind(new.status)
        .bind(&new.container_ref)
        .bind(&new.connection_uri)
        .bind(new.host_port.map(i64::from))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        self.require_workspace(result.last_insert_rowid()).await
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_workspace_status(&self, id: i64, update: &StatusUpdate) -> Result<Workspace> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            "UPDATE workspaces
             SET status = ?, container_ref = ?, connection_uri = ?, host_port = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(update.status)
        .bind(&update.container_ref)
        .bind(&update.connection_uri)
        .bind(update.host_port.map(i64::from))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        self.require_workspace(id).await
    }

    #[instrument(skip(self))]
    async fn rename_workspace(&self, id: i64, name: &str) -> Result<Workspace> {
        let result = sqlx::query("UPDATE workspaces SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        self.require_workspace(id).await
    }

    #[instrument(skip(self))]
    async fn delete_workspace(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM history_sessions WHERE workspace_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn open_history_session(
        &self,
        user_id: &str,
        workspace_id: i64,
    ) -> Result<HistorySession> {
        if let Some(open) = find_open_session(&self.pool, workspace_id).await? {
            return Ok(open);
        }

        let inserted = sqlx::query(
            "INSERT INTO history_sessions (workspace_id, user_id, enter_at) VALUES (?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            // Lost a race with another opener; theirs is the open session
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {}
            Err(e) => return Err(e.into()),
        }

        find_open_session(&self.pool, workspace_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("history for {workspace_id}")))
    }

    #[instrument(skip(self))]
    async fn close_history_session(
        &self,
        user_id: &str,
        workspace_id: i64,
    ) -> Result<Option<HistorySession>> {
        let Some(open) = find_open_session(&self.pool, workspace_id).await? else {
            return Ok(None);
        };
        if open.user_id != user_id {
            debug!(opened_by = %open.user_id, "closing a session opened by another user");
        }

        let exit_at = Utc::now().timestamp_millis();
        sqlx::query("UPDATE history_sessions SET exit_at = ? WHERE id = ? AND exit_at IS NULL")
            .bind(exit_at)
            .bind(open.id)
            .execute(&self.pool)
            .await?;

        Ok(Some(HistorySession {
            exit_at: from_millis(Some(exit_at)),
            ..open
        }))
    }

    async fn list_workspaces(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM workspaces WHERE 1=1");

        if let Some(user_id) = &filters.user_id {
            query.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(project_id) = filters.project_id {
            query.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(status) = filters.status {
            query.push(" AND status = ").push_bind(status);
        }

        query.push(" ORDER BY created_at DESC, id DESC");

        let rows = query
            .build_query_as::<WorkspaceRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_workspaces_with_containers(&self) -> Result<Vec<Workspace>> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces
             WHERE (container_ref IS NOT NULL AND container_ref <> '') OR status = ?
             ORDER BY id",
        )
        .bind(WorkspaceStatus::Running)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_history(
        &self,
        workspace_id: i64,
        page: PageRequest,
    ) -> Result<Vec<HistorySession>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM history_sessions WHERE workspace_id = ?
             ORDER BY enter_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(workspace_id)
        .bind(i64::from(page.page_size))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_history(&self, workspace_id: i64) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM history_sessions WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn find_open_session(pool: &SqlitePool, workspace_id: i64) -> Result<Option<HistorySession>> {
    let row = sqlx::query_as::<_, HistoryRow>(
        "SELECT * FROM history_sessions WHERE workspace_id = ? AND exit_at IS NULL",
    )
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Turn constraint violations on writes into domain conflicts.
fn map_write_error(err: sqlx::Error) -> OrchestratorError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = db.message();
            let reason = if message.contains("workspaces.user_id") {
                "user already has a running workspace"
            } else if message.contains("workspaces.slug") {
                "workspace slug already exists"
            } else {
                "workspace name already exists in this project"
            };
            return OrchestratorError::Conflict(reason.to_string());
        }
        if db.is_check_violation() {
            return OrchestratorError::Conflict(format!(
                "workspace state rejected by store: {}",
                db.message()
            ));
        }
    }
    err.into()
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: i64,
    name: String,
    slug: String,
    user_id: String,
    project_id: i64,
    tech: String,
    status: WorkspaceStatus,
    container_ref: Option<String>,
    connection_uri: Option<String>,
    host_port: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    workspace_id: i64,
    user_id: String,
    enter_at: i64,
    exit_at: Option<i64>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            user_id: row.user_id,
            project_id: row.project_id,
            tech: row.tech,
            status: row.status,
            container_ref: row.container_ref,
            connection_uri: row.connection_uri,
            host_port: row.host_port.and_then(|p| u16::try_from(p).ok()),
            created_at: from_millis(Some(row.created_at)).unwrap_or_default(),
            updated_at: from_millis(Some(row.updated_at)).unwrap_or_default(),
        }
    }
}

impl From<HistoryRow> for HistorySession {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            user_id: row.user_id,
            enter_at: from_millis(Some(row.enter_at)).unwrap_or_default(),
            exit_at: from_millis(row.exit_at),
        }
    }
}
