//! PostgreSQL message store.
//!
//! Queries are built at runtime with `sqlx::query` so the crate compiles
//! without a live database. Schema lives in `migrations/`.

use super::{default_lease_timeout, MessageRepository, ReceptionAwarenessRepository};
use crate::error::{As4Error, Result};
use crate::logging::log_database_operation;
use crate::models::{
    InException, InMessage, LeaseStatus, MessageKind, MessageUpdate, Operation, OutException,
    OutMessage, OutMessageFilter, ReceptionAwareness,
};
use crate::state_machine::{ReceptionEvent, ReliabilityState};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::warn;

/// Applied in order; every statement is idempotent
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "20250101000000_create_as4_tables",
        include_str!("../../migrations/20250101000000_create_as4_tables.sql"),
    ),
    (
        "20250301000000_lease_tracking",
        include_str!("../../migrations/20250301000000_lease_tracking.sql"),
    ),
];

const OUT_MESSAGE_COLUMNS: &str = "ebms_message_id, ref_to_ebms_message_id, kind, pmode_id, url, \
     content_type, content, operation, status, inserted_at";

const RECEPTION_AWARENESS_COLUMNS: &str = "internal_message_id, ref_to_ebms_message_id, \
     current_retry_count, total_retry_count, retry_interval, last_send_time, is_completed, \
     state, lease, leased_at";

/// Reception awareness records store their next attempt time so due records
/// are selected in SQL. Retry intervals use the `d.hh:mm:ss` notation, which
/// is parsed here rather than in the database.
#[derive(Debug, Clone)]
pub struct PgDatastore {
    pool: PgPool,
    lease_timeout: Duration,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_timeout: default_lease_timeout(),
        }
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or upgrade the message store tables
    pub async fn run_migrations(&self) -> Result<()> {
        for &(name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            log_database_operation("migrate", None, Some(name), "success", None);
        }
        Ok(())
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| As4Error::persistence(format!("decode {column}"), e))
}

fn to_count(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| As4Error::persistence("encode retry count", value.to_string()))
}

fn from_count(row: &PgRow, column: &str) -> Result<u32> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| As4Error::persistence(format!("decode {column}"), value.to_string()))
}

fn in_message_from_row(row: &PgRow) -> Result<InMessage> {
    Ok(InMessage {
        ebms_message_id: row.try_get("ebms_message_id")?,
        ref_to_ebms_message_id: row.try_get("ref_to_ebms_message_id")?,
        kind: parse_column::<MessageKind>(row, "kind")?,
        pmode_id: row.try_get("pmode_id")?,
        content_type: row.try_get("content_type")?,
        content: row.try_get("content")?,
        operation: parse_column(row, "operation")?,
        status: parse_column(row, "status")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

fn out_message_from_row(row: &PgRow) -> Result<OutMessage> {
    Ok(OutMessage {
        ebms_message_id: row.try_get("ebms_message_id")?,
        ref_to_ebms_message_id: row.try_get("ref_to_ebms_message_id")?,
        kind: parse_column::<MessageKind>(row, "kind")?,
        pmode_id: row.try_get("pmode_id")?,
        url: row.try_get("url")?,
        content_type: row.try_get("content_type")?,
        content: row.try_get("content")?,
        operation: parse_column(row, "operation")?,
        status: parse_column(row, "status")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

fn reception_awareness_from_row(row: &PgRow) -> Result<ReceptionAwareness> {
    Ok(ReceptionAwareness {
        internal_message_id: row.try_get("internal_message_id")?,
        ref_to_ebms_message_id: row.try_get("ref_to_ebms_message_id")?,
        current_retry_count: from_count(row, "current_retry_count")?,
        total_retry_count: from_count(row, "total_retry_count")?,
        retry_interval: row.try_get("retry_interval")?,
        last_send_time: row.try_get("last_send_time")?,
        is_completed: row.try_get("is_completed")?,
        state: parse_column::<ReliabilityState>(row, "state")?,
        lease: parse_column::<LeaseStatus>(row, "lease")?,
        leased_at: row.try_get("leased_at")?,
    })
}

#[async_trait]
impl MessageRepository for PgDatastore {
    async fn insert_in_message(&self, message: InMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO in_messages (ebms_message_id, ref_to_ebms_message_id, kind, pmode_id, \
             content_type, content, operation, status, inserted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&message.ebms_message_id)
        .bind(&message.ref_to_ebms_message_id)
        .bind(message.kind.as_str())
        .bind(&message.pmode_id)
        .bind(&message.content_type)
        .bind(&message.content)
        .bind(message.operation.as_str())
        .bind(message.status.as_str())
        .bind(message.inserted_at)
        .execute(&self.pool)
        .await?;

        log_database_operation(
            "insert",
            Some("in_messages"),
            Some(&message.ebms_message_id),
            "success",
            None,
        );
        Ok(())
    }

    async fn get_in_message(&self, ebms_message_id: &str) -> Result<Option<InMessage>> {
        let row = sqlx::query(
            "SELECT ebms_message_id, ref_to_ebms_message_id, kind, pmode_id, content_type, \
             content, operation, status, inserted_at FROM in_messages WHERE ebms_message_id = $1",
        )
        .bind(ebms_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(in_message_from_row).transpose()
    }

    async fn update_in_message(
        &self,
        ebms_message_id: &str,
        update: &MessageUpdate,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE in_messages SET operation = COALESCE($2, operation), \
             status = COALESCE($3, status) WHERE ebms_message_id = $1",
        )
        .bind(ebms_message_id)
        .bind(update.operation.map(|o| o.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_out_message(&self, message: OutMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO out_messages (ebms_message_id, ref_to_ebms_message_id, kind, pmode_id, \
             url, content_type, content, operation, status, inserted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&message.ebms_message_id)
        .bind(&message.ref_to_ebms_message_id)
        .bind(message.kind.as_str())
        .bind(&message.pmode_id)
        .bind(&message.url)
        .bind(&message.content_type)
        .bind(&message.content)
        .bind(message.operation.as_str())
        .bind(message.status.as_str())
        .bind(message.inserted_at)
        .execute(&self.pool)
        .await?;

        log_database_operation(
            "insert",
            Some("out_messages"),
            Some(&message.ebms_message_id),
            "success",
            None,
        );
        Ok(())
    }

    async fn get_out_message(&self, ebms_message_id: &str) -> Result<Option<OutMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {OUT_MESSAGE_COLUMNS} FROM out_messages WHERE ebms_message_id = $1"
        ))
        .bind(ebms_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(out_message_from_row).transpose()
    }

    async fn update_out_messages_where(
        &self,
        filter: &OutMessageFilter,
        update: &MessageUpdate,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE out_messages SET operation = COALESCE($1, operation), \
             status = COALESCE($2, status), \
             leased_from = CASE WHEN $1::text IS NULL THEN leased_from END, \
             leased_at = CASE WHEN $1::text IS NULL THEN leased_at END \
             WHERE ($3::text[] IS NULL OR ebms_message_id = ANY($3)) \
             AND ($4::text IS NULL OR operation = $4)",
        )
        .bind(update.operation.map(|o| o.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(filter.ebms_message_ids.as_deref())
        .bind(filter.operation.map(|o| o.as_str()))
        .execute(&self.pool)
        .await?;

        log_database_operation(
            "update_where",
            Some("out_messages"),
            None,
            "success",
            Some(format!("{} rows", result.rows_affected()).as_str()),
        );
        Ok(result.rows_affected())
    }

    async fn update_out_message_payload(
        &self,
        ebms_message_id: &str,
        url: Option<&str>,
        content_type: &str,
        content: &[u8],
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE out_messages SET url = $2, content_type = $3, content = $4 \
             WHERE ebms_message_id = $1",
        )
        .bind(ebms_message_id)
        .bind(url)
        .bind(content_type)
        .bind(content)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn lease_out_messages(
        &self,
        operation: Operation,
        limit: usize,
    ) -> Result<Vec<OutMessage>> {
        let Some(in_progress) = operation.in_progress() else {
            warn!(operation = %operation, "Operation cannot be leased");
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let rows = sqlx::query(&format!(
            "UPDATE out_messages SET operation = $2, leased_from = $1, leased_at = $3 \
             WHERE ebms_message_id IN ( \
                 SELECT ebms_message_id FROM out_messages \
                 WHERE operation = $1 \
                    OR (operation = $2 AND leased_from = $1 AND leased_at <= $4) \
                 ORDER BY inserted_at LIMIT $5 FOR UPDATE SKIP LOCKED) \
             RETURNING {OUT_MESSAGE_COLUMNS}"
        ))
        .bind(operation.as_str())
        .bind(in_progress.as_str())
        .bind(now)
        .bind(now - self.lease_timeout)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(out_message_from_row).collect()
    }

    async fn insert_in_exception(&self, exception: InException) -> Result<()> {
        sqlx::query(
            "INSERT INTO in_exceptions (ebms_ref_to_message_id, pmode_id, exception, \
             message_body, operation, inserted_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&exception.ebms_ref_to_message_id)
        .bind(&exception.pmode_id)
        .bind(&exception.exception)
        .bind(&exception.message_body)
        .bind(exception.operation.as_str())
        .bind(exception.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_out_exception(&self, exception: OutException) -> Result<()> {
        sqlx::query(
            "INSERT INTO out_exceptions (ebms_ref_to_message_id, pmode_id, exception, \
             message_body, operation, inserted_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&exception.ebms_ref_to_message_id)
        .bind(&exception.pmode_id)
        .bind(&exception.exception)
        .bind(&exception.message_body)
        .bind(exception.operation.as_str())
        .bind(exception.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_in_exceptions(&self, ebms_ref_to_message_id: &str) -> Result<Vec<InException>> {
        let rows = sqlx::query(
            "SELECT ebms_ref_to_message_id, pmode_id, exception, message_body, operation, \
             inserted_at FROM in_exceptions WHERE ebms_ref_to_message_id = $1 ORDER BY id",
        )
        .bind(ebms_ref_to_message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(InException {
                    ebms_ref_to_message_id: row.try_get("ebms_ref_to_message_id")?,
                    pmode_id: row.try_get("pmode_id")?,
                    exception: row.try_get("exception")?,
                    message_body: row.try_get("message_body")?,
                    operation: parse_column(row, "operation")?,
                    inserted_at: row.try_get("inserted_at")?,
                })
            })
            .collect()
    }

    async fn get_out_exceptions(
        &self,
        ebms_ref_to_message_id: &str,
    ) -> Result<Vec<OutException>> {
        let rows = sqlx::query(
            "SELECT ebms_ref_to_message_id, pmode_id, exception, message_body, operation, \
             inserted_at FROM out_exceptions WHERE ebms_ref_to_message_id = $1 ORDER BY id",
        )
        .bind(ebms_ref_to_message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OutException {
                    ebms_ref_to_message_id: row.try_get("ebms_ref_to_message_id")?,
                    pmode_id: row.try_get("pmode_id")?,
                    exception: row.try_get("exception")?,
                    message_body: row.try_get("message_body")?,
                    operation: parse_column(row, "operation")?,
                    inserted_at: row.try_get("inserted_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ReceptionAwarenessRepository for PgDatastore {
    async fn insert_reception_awareness(&self, record: ReceptionAwareness) -> Result<()> {
        let next_attempt_at = record.next_attempt_at()?;
        sqlx::query(&format!(
            "INSERT INTO reception_awareness ({RECEPTION_AWARENESS_COLUMNS}, next_attempt_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(&record.internal_message_id)
        .bind(&record.ref_to_ebms_message_id)
        .bind(to_count(record.current_retry_count)?)
        .bind(to_count(record.total_retry_count)?)
        .bind(&record.retry_interval)
        .bind(record.last_send_time)
        .bind(record.is_completed)
        .bind(record.state.to_string())
        .bind(record.lease.as_str())
        .bind(record.leased_at)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_reception_awareness(
        &self,
        internal_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>> {
        let row = sqlx::query(&format!(
            "SELECT {RECEPTION_AWARENESS_COLUMNS} FROM reception_awareness \
             WHERE internal_message_id = $1"
        ))
        .bind(internal_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reception_awareness_from_row).transpose()
    }

    async fn find_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
    ) -> Result<Option<ReceptionAwareness>> {
        let row = sqlx::query(&format!(
            "SELECT {RECEPTION_AWARENESS_COLUMNS} FROM reception_awareness \
             WHERE ref_to_ebms_message_id = $1 AND is_completed = FALSE LIMIT 1"
        ))
        .bind(ref_to_ebms_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reception_awareness_from_row).transpose()
    }

    async fn save_reception_awareness(&self, record: &ReceptionAwareness) -> Result<bool> {
        let next_attempt_at = record.next_attempt_at()?;
        let result = sqlx::query(
            "UPDATE reception_awareness SET current_retry_count = $2, total_retry_count = $3, \
             retry_interval = $4, last_send_time = $5, is_completed = $6, state = $7, lease = $8, \
             leased_at = $9, next_attempt_at = $10 \
             WHERE internal_message_id = $1 AND is_completed = FALSE",
        )
        .bind(&record.internal_message_id)
        .bind(to_count(record.current_retry_count)?)
        .bind(to_count(record.total_retry_count)?)
        .bind(&record.retry_interval)
        .bind(record.last_send_time)
        .bind(record.is_completed)
        .bind(record.state.to_string())
        .bind(record.lease.as_str())
        .bind(record.leased_at)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self
            .get_reception_awareness(&record.internal_message_id)
            .await?
        {
            Some(_) => Ok(false),
            None => Err(As4Error::record_not_found(
                "ReceptionAwareness",
                &record.internal_message_id,
            )),
        }
    }

    async fn lease_due_reception_awareness(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReceptionAwareness>> {
        let rows = sqlx::query(&format!(
            "UPDATE reception_awareness SET lease = 'busy', leased_at = $1 \
             WHERE internal_message_id IN ( \
                 SELECT internal_message_id FROM reception_awareness \
                 WHERE is_completed = FALSE \
                   AND (lease = 'pending' \
                        OR (lease = 'busy' AND (leased_at IS NULL OR leased_at <= $2))) \
                   AND (next_attempt_at IS NULL OR next_attempt_at <= $1) \
                 ORDER BY next_attempt_at NULLS FIRST LIMIT $3 FOR UPDATE SKIP LOCKED) \
             RETURNING {RECEPTION_AWARENESS_COLUMNS}"
        ))
        .bind(now)
        .bind(now - self.lease_timeout)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reception_awareness_from_row).collect()
    }

    async fn release_reception_awareness(&self, internal_message_ids: &[String]) -> Result<u64> {
        if internal_message_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE reception_awareness SET lease = 'pending', leased_at = NULL \
             WHERE internal_message_id = ANY($1) AND lease = 'busy'",
        )
        .bind(internal_message_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn complete_for_ebms_message(
        &self,
        ref_to_ebms_message_id: &str,
        event: ReceptionEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ReceptionAwareness>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RECEPTION_AWARENESS_COLUMNS} FROM reception_awareness \
             WHERE ref_to_ebms_message_id = $1 AND is_completed = FALSE LIMIT 1 FOR UPDATE"
        ))
        .bind(ref_to_ebms_message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut record = reception_awareness_from_row(&row)?;
        if record.complete_out_of_band(event, now).is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "UPDATE reception_awareness SET is_completed = TRUE, state = $2, lease = $3, \
             leased_at = NULL WHERE internal_message_id = $1",
        )
        .bind(&record.internal_message_id)
        .bind(record.state.to_string())
        .bind(record.lease.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn migrated(pool: PgPool) -> PgDatastore {
        let store = PgDatastore::new(pool);
        store.run_migrations().await.unwrap();
        store
    }

    #[sqlx::test]
    async fn test_due_record_behind_older_undue_records_is_leased(pool: PgPool) {
        let store = migrated(pool).await;
        let now = Utc::now();

        // sent earlier, but a one day interval keeps them from being due
        for n in 0..8 {
            store
                .insert_reception_awareness(ReceptionAwareness::new(
                    format!("slow-{n}"),
                    format!("out-slow-{n}"),
                    3,
                    "1.00:00:00",
                    now - Duration::hours(2),
                ))
                .await
                .unwrap();
        }
        store
            .insert_reception_awareness(ReceptionAwareness::new(
                "fast",
                "out-fast",
                3,
                "00:00:05",
                now - Duration::minutes(1),
            ))
            .await
            .unwrap();

        let leased = store.lease_due_reception_awareness(now, 1).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].internal_message_id, "fast");
        assert_eq!(leased[0].lease, LeaseStatus::Busy);
    }

    #[sqlx::test]
    async fn test_expired_lease_is_reclaimed(pool: PgPool) {
        let store = migrated(pool).await.with_lease_timeout(Duration::minutes(5));
        let now = Utc::now();
        store
            .insert_reception_awareness(ReceptionAwareness::new(
                "ra-1",
                "out-1",
                3,
                "0",
                now - Duration::minutes(1),
            ))
            .await
            .unwrap();

        assert_eq!(store.lease_due_reception_awareness(now, 10).await.unwrap().len(), 1);
        assert!(store
            .lease_due_reception_awareness(now + Duration::minutes(4), 10)
            .await
            .unwrap()
            .is_empty());

        let reclaimed = store
            .lease_due_reception_awareness(now + Duration::minutes(6), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].internal_message_id, "ra-1");
    }
}
