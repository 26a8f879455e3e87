//! Order domain model shared by every crate in the workspace.
//!
//! An [`Order`] owns exactly one [`Delivery`], one [`Payment`] and an ordered
//! list of [`Item`]s. The transport encoding (JSON on the queue and over HTTP)
//! lives in [`codec`], the storage encoding (typed columns plus nested JSON
//! documents) in [`storage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub mod codec;
pub mod error;
pub mod storage;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use codec::{decode, encode};
pub use error::ModelError;
pub use storage::StoredOrder;

/// Recipient contact and address of an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Transaction identifiers and amounts in minor currency units.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Unix timestamp, seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A single line of an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// Discount, percent.
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}

/// The aggregate root, keyed by `order_uid`.
///
/// `delivery` and `payment` are mandatory on the wire; every scalar falls
/// back to its zero value when absent. `items` is never null: a missing or
/// `null` list decodes as empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    #[serde(default)]
    pub order_uid: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Item>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i64,
    #[serde(default)]
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub oof_shard: String,
}

/// Treats an explicit JSON `null` list the same as a missing one.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
