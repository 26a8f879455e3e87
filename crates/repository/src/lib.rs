//! # Data Repository Layer
//!
//! The storage adapter for orders. One row per order keyed by `order_uid`;
//! scalar fields are typed columns, delivery/payment/items are JSON documents
//! (see [`model::StoredOrder`]). [`PgOrdersRepository`] is the PostgreSQL
//! implementation, [`InMemoryOrdersRepository`] an in-process one with the
//! same visibility guarantees.

use async_trait::async_trait;
use model::{ModelError, Order};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOrdersRepository;
pub use postgres::PgOrdersRepository;

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The store could not be reached or the connection was lost.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// The row was rejected by the store, e.g. an empty primary key.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    /// No row for the requested key.
    #[error("Not found")]
    NotFound,
    /// A stored row could not be turned back into an order.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<ModelError> for RepositoryError {
    fn from(err: ModelError) -> Self {
        RepositoryError::Corrupt(err.to_string())
    }
}

/// # OrdersRepository
///
/// Insert-or-replace storage of whole orders.
///
/// Implementations must be safe for concurrent use and make every `upsert`
/// atomic: a reader sees either the previous version of the row or the new
/// one, never a mix.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Inserts the order, or replaces every field of the existing row with the same `order_uid`.
    async fn upsert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Loads one order; [`RepositoryError::NotFound`] when absent.
    async fn get_by_id(&self, order_uid: &str) -> Result<Order, RepositoryError>;

    /// Loads every stored order, oldest `date_created` first.
    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError>;
}

/// Rejects keys the `orders` table would refuse anyway.
pub(crate) fn check_primary_key(order: &Order) -> Result<(), RepositoryError> {
    if order.order_uid.trim().is_empty() {
        return Err(RepositoryError::ConstraintViolation(
            "order_uid must not be empty".into(),
        ));
    }
    Ok(())
}
