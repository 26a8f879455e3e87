use async_trait::async_trait;
use deadpool_postgres::{Object as DbConn, Pool, PoolError};
use model::{Order, StoredOrder};
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::{OrdersRepository, RepositoryError, check_primary_key};

const UPSERT_ORDER: &str = r#"
    INSERT INTO orders (
        order_uid, track_number, entry, delivery, payment, items, locale,
        internal_signature, customer_id, delivery_service, shardkey, sm_id,
        date_created, oof_shard
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
    ON CONFLICT (order_uid) DO UPDATE SET
        track_number = EXCLUDED.track_number,
        entry = EXCLUDED.entry,
        delivery = EXCLUDED.delivery,
        payment = EXCLUDED.payment,
        items = EXCLUDED.items,
        locale = EXCLUDED.locale,
        internal_signature = EXCLUDED.internal_signature,
        customer_id = EXCLUDED.customer_id,
        delivery_service = EXCLUDED.delivery_service,
        shardkey = EXCLUDED.shardkey,
        sm_id = EXCLUDED.sm_id,
        date_created = EXCLUDED.date_created,
        oof_shard = EXCLUDED.oof_shard
"#;

const SELECT_ORDERS: &str = r#"
    SELECT order_uid, track_number, entry, delivery, payment, items, locale,
           internal_signature, customer_id, delivery_service, shardkey, sm_id,
           date_created, oof_shard
    FROM orders
"#;

/// PostgreSQL implementation of the OrdersRepository trait.
///
/// Holds a connection pool, so one instance can be shared by the consumer
/// and every request handler.
#[derive(Clone)]
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<DbConn, RepositoryError> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn upsert(&self, order: &Order) -> Result<(), RepositoryError> {
        check_primary_key(order)?;
        let row = StoredOrder::from_order(order)
            .map_err(|e| RepositoryError::ConstraintViolation(e.to_string()))?;

        let conn = self.conn().await?;
        // A single statement: Postgres applies it atomically.
        conn.execute(
            UPSERT_ORDER,
            &[
                &row.order_uid,
                &row.track_number,
                &row.entry,
                &Json(&row.delivery),
                &Json(&row.payment),
                &Json(&row.items),
                &row.locale,
                &row.internal_signature,
                &row.customer_id,
                &row.delivery_service,
                &row.shardkey,
                &row.sm_id,
                &row.date_created,
                &row.oof_shard,
            ],
        )
        .await
        .map_err(db_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, order_uid: &str) -> Result<Order, RepositoryError> {
        let conn = self.conn().await?;
        let query = format!("{SELECT_ORDERS} WHERE order_uid = $1");
        let row = conn
            .query_opt(query.as_str(), &[&order_uid])
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let conn = self.conn().await?;
        let query = format!("{SELECT_ORDERS} ORDER BY date_created, order_uid");
        let rows = conn.query(query.as_str(), &[]).await.map_err(db_error)?;
        rows.iter().map(order_from_row).collect()
    }
}

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let stored = StoredOrder {
        order_uid: column(row, "order_uid")?,
        track_number: column(row, "track_number")?,
        entry: column(row, "entry")?,
        delivery: document(row, "delivery")?,
        payment: document(row, "payment")?,
        items: document(row, "items")?,
        locale: column(row, "locale")?,
        internal_signature: column(row, "internal_signature")?,
        customer_id: column(row, "customer_id")?,
        delivery_service: column(row, "delivery_service")?,
        shardkey: column(row, "shardkey")?,
        sm_id: column(row, "sm_id")?,
        date_created: column(row, "date_created")?,
        oof_shard: column(row, "oof_shard")?,
    };
    Ok(stored.into_order()?)
}

fn column<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    name: &str,
) -> Result<T, RepositoryError> {
    row.try_get(name)
        .map_err(|e| RepositoryError::Corrupt(format!("column {name}: {e}")))
}

fn document(row: &Row, name: &str) -> Result<Value, RepositoryError> {
    let value: Option<Json<Value>> = column(row, name)?;
    Ok(value.map(|Json(v)| v).unwrap_or(Value::Null))
}

fn pool_error(err: PoolError) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}

fn db_error(err: tokio_postgres::Error) -> RepositoryError {
    classify(err.code(), err.to_string())
}

/// Integrity (class 23) and data (class 22) errors are permanent for the
/// given row; everything else, including a missing SQLSTATE on a dropped
/// connection, is treated as the store being unavailable.
pub(crate) fn classify(code: Option<&SqlState>, message: String) -> RepositoryError {
    match code.map(SqlState::code) {
        Some(c) if c.starts_with("23") || c.starts_with("22") => {
            RepositoryError::ConstraintViolation(message)
        }
        _ => RepositoryError::Unavailable(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_integrity_errors() {
        for state in [
            SqlState::UNIQUE_VIOLATION,
            SqlState::CHECK_VIOLATION,
            SqlState::NOT_NULL_VIOLATION,
            SqlState::INVALID_TEXT_REPRESENTATION,
        ] {
            assert!(matches!(
                classify(Some(&state), "bad row".into()),
                RepositoryError::ConstraintViolation(_)
            ));
        }
    }

    #[test]
    fn test_classify_connectivity_errors() {
        assert!(matches!(
            classify(Some(&SqlState::ADMIN_SHUTDOWN), "shutdown".into()),
            RepositoryError::Unavailable(_)
        ));
        assert!(matches!(
            classify(Some(&SqlState::CONNECTION_FAILURE), "gone".into()),
            RepositoryError::Unavailable(_)
        ));
        assert!(matches!(
            classify(None, "connection closed".into()),
            RepositoryError::Unavailable(_)
        ));
    }
}
