//! Storage encoding of orders.
//!
//! Order-level fields map to typed columns; delivery, payment and items have
//! no query surface of their own and are kept as self-contained JSON documents.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{Delivery, Item, ModelError, Order, Payment};

/// One row of the `orders` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Value,
    pub payment: Value,
    pub items: Value,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

impl StoredOrder {
    pub fn from_order(order: &Order) -> Result<Self, ModelError> {
        Ok(Self {
            order_uid: order.order_uid.clone(),
            track_number: order.track_number.clone(),
            entry: order.entry.clone(),
            delivery: to_document("delivery", &order.delivery)?,
            payment: to_document("payment", &order.payment)?,
            items: to_document("items", &order.items)?,
            locale: order.locale.clone(),
            internal_signature: order.internal_signature.clone(),
            customer_id: order.customer_id.clone(),
            delivery_service: order.delivery_service.clone(),
            shardkey: order.shardkey.clone(),
            sm_id: order.sm_id,
            date_created: order.date_created,
            oof_shard: order.oof_shard.clone(),
        })
    }

    /// Rebuilds the order, expanding the nested documents.
    ///
    /// A stored `items` of `null` is read back as an empty list.
    pub fn into_order(self) -> Result<Order, ModelError> {
        let delivery: Delivery = from_document("delivery", self.delivery)?;
        let payment: Payment = from_document("payment", self.payment)?;
        let items: Vec<Item> = match self.items {
            Value::Null => Vec::new(),
            items => from_document("items", items)?,
        };

        Ok(Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery,
            payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        })
    }
}

fn to_document<T: serde::Serialize>(name: &str, value: &T) -> Result<Value, ModelError> {
    serde_json::to_value(value)
        .map_err(|e| ModelError::MalformedPayload(format!("failed to encode {name}: {e}")))
}

fn from_document<T: serde::de::DeserializeOwned>(name: &str, value: Value) -> Result<T, ModelError> {
    if value.is_null() {
        return Err(ModelError::MalformedPayload(format!("stored {name} is null")));
    }
    serde_json::from_value(value)
        .map_err(|e| ModelError::MalformedPayload(format!("failed to decode {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_order;
    use serde_json::json;

    #[test]
    fn test_stored_order_round_trip() {
        let order = sample_order("order123");
        let stored = StoredOrder::from_order(&order).unwrap();
        assert_eq!(stored.delivery["city"], json!("Kiryat Mozkin"));
        assert_eq!(stored.into_order().unwrap(), order);
    }

    #[test]
    fn test_empty_items_stored_as_array() {
        let mut order = sample_order("order123");
        order.items.clear();
        let stored = StoredOrder::from_order(&order).unwrap();
        assert_eq!(stored.items, json!([]));
    }

    #[test]
    fn test_null_items_read_back_empty() {
        let mut stored = StoredOrder::from_order(&sample_order("order123")).unwrap();
        stored.items = Value::Null;
        assert!(stored.into_order().unwrap().items.is_empty());
    }

    #[test]
    fn test_corrupt_payment_document() {
        let mut stored = StoredOrder::from_order(&sample_order("order123")).unwrap();
        stored.payment = json!("not a payment");
        assert!(matches!(stored.into_order(), Err(ModelError::MalformedPayload(_))));
    }
}
