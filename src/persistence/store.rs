//! PostgreSQL write-through store
//!
//! Components keep their working state in memory; the executor writes
//! snapshots through here so the external dashboard and a restarted process
//! can see where every command stands. Rows carry the full entity as JSONB
//! next to the columns worth indexing.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::domain::{ApprovalRequest, Budget, Command, NegotiationThread};
use crate::error::Result;
use crate::queue::DeadLetter;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct WorkflowStore {
    pool: PgPool,
}

impl WorkflowStore {
    /// Create a new store with its own connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool (zero-cost reuse)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Budgets ====================

    pub async fn upsert_budget(&self, budget: &Budget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budgets (id, command_id, status, data, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(budget.id)
        .bind(budget.command_id)
        .bind(budget.status.to_string())
        .bind(serde_json::to_value(budget)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_budget(&self, id: Uuid) -> Result<Option<Budget>> {
        let row = sqlx::query("SELECT data FROM budgets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .transpose()
    }

    // ==================== Commands ====================

    pub async fn upsert_command(&self, command: &Command) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO commands (id, status, current_step, data, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(command.id)
        .bind(command.status.to_string())
        .bind(command.current_step.to_string())
        .bind(serde_json::to_value(command)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_command(&self, id: Uuid) -> Result<Option<Command>> {
        let row = sqlx::query("SELECT data FROM commands WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .transpose()
    }

    /// Commands still in flight (dashboard landing view)
    pub async fn active_commands(&self) -> Result<Vec<Command>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM commands
            WHERE status NOT IN ('completed', 'failed')
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .collect()
    }

    // ==================== Approvals ====================

    pub async fn upsert_approval(&self, request: &ApprovalRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests (id, command_id, kind, status, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(request.id)
        .bind(request.command_id)
        .bind(request.kind.to_string())
        .bind(request.status.to_string())
        .bind(serde_json::to_value(request)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT data FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .transpose()
    }

    /// Requests awaiting a decision (the approval inbox)
    pub async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            "SELECT data FROM approval_requests WHERE status = 'pending' ORDER BY updated_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .collect()
    }

    // ==================== Negotiation threads ====================

    pub async fn upsert_thread(&self, thread: &NegotiationThread) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO negotiation_threads (id, opportunity_id, command_id, status, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(thread.id)
        .bind(thread.opportunity_id)
        .bind(thread.command_id)
        .bind(thread.status.to_string())
        .bind(serde_json::to_value(thread)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_thread(&self, id: Uuid) -> Result<Option<NegotiationThread>> {
        let row = sqlx::query("SELECT data FROM negotiation_threads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| serde_json::from_value(r.get("data")).map_err(Into::into))
            .transpose()
    }

    // ==================== Dead letters ====================

    pub async fn insert_dead_letter(&self, dead: &DeadLetter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (job_id, queue_name, error_message, attempts, payload, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(dead.job.id)
        .bind(&dead.job.queue)
        .bind(&dead.error)
        .bind(dead.job.attempts_made as i32)
        .bind(&dead.job.payload)
        .bind(dead.failed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn dead_letter_count(&self, queue_name: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM dead_letters WHERE queue_name = $1")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}
