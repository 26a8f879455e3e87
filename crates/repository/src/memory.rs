use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use model::{Order, StoredOrder};
use tokio::sync::RwLock;

use crate::{OrdersRepository, RepositoryError, check_primary_key};

/// Thread-safe in-memory order store.
///
/// Rows are kept in their storage encoding, so reads go through the same
/// document decoding as the PostgreSQL implementation. A write holds the
/// lock for the whole row swap, which gives all-or-nothing visibility.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrdersRepository {
    rows: Arc<RwLock<HashMap<String, StoredOrder>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrdersRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrdersRepository for InMemoryOrdersRepository {
    async fn upsert(&self, order: &Order) -> Result<(), RepositoryError> {
        self.check_available()?;
        check_primary_key(order)?;
        let row = StoredOrder::from_order(order)
            .map_err(|e| RepositoryError::ConstraintViolation(e.to_string()))?;

        self.rows.write().await.insert(row.order_uid.clone(), row);
        Ok(())
    }

    async fn get_by_id(&self, order_uid: &str) -> Result<Order, RepositoryError> {
        self.check_available()?;
        let row = self.rows.read().await.get(order_uid).cloned();
        match row {
            Some(row) => Ok(row.into_order()?),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError> {
        self.check_available()?;
        let mut rows: Vec<StoredOrder> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| {
            a.date_created
                .cmp(&b.date_created)
                .then_with(|| a.order_uid.cmp(&b.order_uid))
        });
        rows.into_iter()
            .map(|row| row.into_order().map_err(RepositoryError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use model::fixtures::sample_order;

    #[tokio::test]
    async fn test_get_missing_order() {
        let repo = InMemoryOrdersRepository::new();
        assert_eq!(repo.get_by_id("nonexistent").await, Err(RepositoryError::NotFound));
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_get_order() {
        let repo = InMemoryOrdersRepository::new();
        let order = sample_order("order123");
        repo.upsert(&order).await.unwrap();
        assert_eq!(repo.get_by_id("order123").await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let repo = InMemoryOrdersRepository::new();
        let order = sample_order("order123");
        repo.upsert(&order).await.unwrap();
        let once = repo.get_all().await.unwrap();

        repo.upsert(&order).await.unwrap();
        assert_eq!(repo.get_all().await.unwrap(), once);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_every_field() {
        let repo = InMemoryOrdersRepository::new();
        let mut order = sample_order("order123");
        repo.upsert(&order).await.unwrap();

        order.track_number = "NEWTRACK".to_string();
        order.locale = "ru".to_string();
        order.items.clear();
        order.payment.amount = 1;
        repo.upsert(&order).await.unwrap();

        let got = repo.get_by_id("order123").await.unwrap();
        assert_eq!(got, order);
        assert!(got.items.is_empty());
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_key_is_constraint_violation() {
        let repo = InMemoryOrdersRepository::new();
        let order = sample_order("");
        assert!(matches!(
            repo.upsert(&order).await,
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_all_ordered_by_creation() {
        let repo = InMemoryOrdersRepository::new();
        let older = sample_order("b-older");
        let mut newer = sample_order("a-newer");
        newer.date_created = older.date_created + Duration::hours(1);

        repo.upsert(&newer).await.unwrap();
        repo.upsert(&older).await.unwrap();

        let uids: Vec<_> = repo
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_uid)
            .collect();
        assert_eq!(uids, vec!["b-older", "a-newer"]);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let repo = InMemoryOrdersRepository::new();
        repo.set_unavailable(true);
        assert!(matches!(
            repo.upsert(&sample_order("order123")).await,
            Err(RepositoryError::Unavailable(_))
        ));
        repo.set_unavailable(false);
        assert!(repo.upsert(&sample_order("order123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_see_partial_rows() {
        let repo = InMemoryOrdersRepository::new();
        let first = sample_order("order123");
        let mut second = sample_order("order123");
        second.track_number = "SECOND".to_string();
        second.delivery.city = "Second City".to_string();
        repo.upsert(&first).await.unwrap();

        let writer = {
            let repo = repo.clone();
            let (first, second) = (first.clone(), second.clone());
            tokio::spawn(async move {
                for i in 0..200 {
                    let next = if i % 2 == 0 { &second } else { &first };
                    repo.upsert(next).await.unwrap();
                }
            })
        };

        for _ in 0..200 {
            let got = repo.get_by_id("order123").await.unwrap();
            assert!(got == first || got == second);
        }
        writer.await.unwrap();
    }
}
