use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::domain::{
    BatchExecution, BatchId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, FuelRecord,
    RecordId, Template, Violation,
};

use super::traits::Storage;

/// PostgreSQL implementation of the Storage trait.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a new PostgresStorage instance with a connection pool.
    pub async fn connect(
        database_url: &str,
        min_connections: u32,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_status(s: &str) -> anyhow::Result<ExecutionStatus> {
    ExecutionStatus::from_str(s).ok_or_else(|| anyhow::anyhow!("unknown status {s:?} in storage"))
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> FuelRecord {
    FuelRecord {
        record_id: RecordId::new(row.get::<String, _>("record_id")),
        batch_id: BatchId(row.get("batch_id")),
        event_date: row.get("event_date"),
        event_time: row.get("event_time"),
        station_code: row.get("station_code"),
        product: row.get("product"),
        volume_liters: row.get::<Option<Decimal>, _>("volume_liters"),
        consumer_type: row.get("consumer_type"),
        plate_number: row.get("plate_number"),
        national_id: row.get("national_id"),
        plate_color: row.get("plate_color"),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn count_records(&self, batch_id: BatchId) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM fuel_records
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn fetch_records_after(
        &self,
        batch_id: BatchId,
        after: Option<&RecordId>,
        limit: u32,
    ) -> anyhow::Result<Vec<FuelRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, batch_id, event_date, event_time, station_code,
                   product, volume_liters, consumer_type, plate_number,
                   national_id, plate_color
            FROM fuel_records
            WHERE batch_id = $1
              AND ($2::text IS NULL OR record_id > $2)
            ORDER BY record_id
            LIMIT $3
            "#,
        )
        .bind(batch_id.0)
        .bind(after.map(|r| r.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn resolve_template(&self, template_id: i32) -> anyhow::Result<Option<Template>> {
        let row = sqlx::query(
            r#"
            SELECT template_id, name, rules
            FROM rule_templates
            WHERE template_id = $1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rules: serde_json::Value = row.get("rules");
        Ok(Some(Template {
            template_id: row.get("template_id"),
            name: row.get("name"),
            rules: serde_json::from_value(rules)?,
        }))
    }

    async fn insert_execution(&self, execution: &Execution) -> anyhow::Result<()> {
        let batch_ids: Vec<i32> = execution.batch_ids.iter().map(|b| b.0).collect();

        sqlx::query(
            r#"
            INSERT INTO executions (execution_id, template_id, batch_ids, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(execution.execution_id.as_str())
        .bind(execution.template_id)
        .bind(&batch_ids)
        .bind(execution.status.as_str())
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> anyhow::Result<Option<Execution>> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, template_id, batch_ids, status,
                   total_batches_completed, total_violations, per_rule_counts,
                   progress, started_at, completed_at, elapsed_ms, created_at
            FROM executions
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let batch_ids: Vec<i32> = row.get("batch_ids");
        let status: String = row.get("status");
        let per_rule_counts: Option<serde_json::Value> = row.get("per_rule_counts");

        Ok(Some(Execution {
            execution_id: ExecutionId::new(row.get::<String, _>("execution_id")),
            template_id: row.get("template_id"),
            batch_ids: batch_ids.into_iter().map(BatchId).collect(),
            status: parse_status(&status)?,
            total_batches_completed: row.get::<i32, _>("total_batches_completed") as u32,
            total_violations: row.get::<i64, _>("total_violations") as u64,
            per_rule_counts: per_rule_counts
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
            progress: row.get("progress"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            elapsed_ms: row.get::<Option<i64>, _>("elapsed_ms").map(|v| v as u64),
            created_at: row.get("created_at"),
        }))
    }

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2,
                started_at = CASE
                    WHEN $2 = 'PROCESSING' AND started_at IS NULL THEN now()
                    ELSE started_at
                END,
                updated_at = now()
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> anyhow::Result<()> {
        let per_rule_counts = serde_json::to_value(&outcome.per_rule_counts)?;

        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2,
                total_violations = $3,
                per_rule_counts = $4,
                total_batches_completed = $5,
                elapsed_ms = $6,
                completed_at = now(),
                updated_at = now()
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(outcome.status.as_str())
        .bind(outcome.total_violations as i64)
        .bind(per_rule_counts)
        .bind(outcome.completed_batches as i32)
        .bind(outcome.elapsed_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_progress(&self, id: &ExecutionId, message: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET progress = $2, updated_at = now()
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_batch_execution(
        &self,
        id: &ExecutionId,
        batch_id: BatchId,
        status: ExecutionStatus,
    ) -> anyhow::Result<i64> {
        // One row per (execution, batch); a re-run resets the pair.
        let row_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO batch_executions (execution_id, batch_id, status, started_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (execution_id, batch_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                violations_found = 0,
                started_at = now(),
                finished_at = NULL
            RETURNING id
            "#,
        )
        .bind(id.as_str())
        .bind(batch_id.0)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row_id)
    }

    async fn get_batch_execution(&self, row_id: i64) -> anyhow::Result<Option<BatchExecution>> {
        let row = sqlx::query(
            r#"
            SELECT id, execution_id, batch_id, status, violations_found
            FROM batch_executions
            WHERE id = $1
            "#,
        )
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        Ok(Some(BatchExecution {
            id: row.get("id"),
            execution_id: ExecutionId::new(row.get::<String, _>("execution_id")),
            batch_id: BatchId(row.get("batch_id")),
            status: parse_status(&status)?,
            violations_found: row.get::<i64, _>("violations_found") as u64,
        }))
    }

    async fn update_batch_execution(
        &self,
        row_id: i64,
        status: ExecutionStatus,
        violations_found: u64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE batch_executions
            SET status = $2,
                violations_found = $3,
                finished_at = CASE WHEN $2 IN ('COMPLETED', 'FAILED') THEN now() ELSE finished_at END
            WHERE id = $1
            "#,
        )
        .bind(row_id)
        .bind(status.as_str())
        .bind(violations_found as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_violations(&self, id: &ExecutionId) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM violations
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_violations(&self, violations: &[Violation]) -> anyhow::Result<()> {
        // One transaction per flushed buffer: bounded size, single commit.
        let mut tx = self.pool.begin().await?;

        for violation in violations {
            let (criteria_rule_id, accumulation_rule_id) = match violation.rule_kind {
                crate::domain::RuleKind::Threshold | crate::domain::RuleKind::Membership => {
                    (Some(violation.rule_id.as_str()), None)
                }
                crate::domain::RuleKind::Accumulation => (None, Some(violation.rule_id.as_str())),
            };

            sqlx::query(
                r#"
                INSERT INTO violations (
                    execution_id, record_id, batch_id, template_id,
                    criteria_rule_id, accumulation_rule_id,
                    code, occurred_at, violation_value
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(violation.execution_id.as_str())
            .bind(violation.record_id.as_str())
            .bind(violation.batch_id.0)
            .bind(violation.template_id)
            .bind(criteria_rule_id)
            .bind(accumulation_rule_id)
            .bind(&violation.code)
            .bind(violation.occurred_at)
            .bind(violation.value.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn sweep_stale(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff_secs = older_than.num_seconds();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE batch_executions b
            SET status = 'FAILED', finished_at = now()
            FROM executions e
            WHERE b.execution_id = e.execution_id
              AND b.status = 'PROCESSING'
              AND e.status = 'PROCESSING'
              AND e.updated_at < now() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(cutoff_secs.to_string())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'FAILED', updated_at = now()
            WHERE status = 'PROCESSING'
              AND updated_at < now() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(cutoff_secs.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
