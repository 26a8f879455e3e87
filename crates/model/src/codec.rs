//! Transport encoding of orders.
//!
//! `decode(encode(o)) == o` holds for every order that passes
//! [`Order::validate`].

use chrono::SubsecRound;

use crate::{ModelError, Order};

/// Fractional-second digits kept for `date_created`, matching `TIMESTAMPTZ`.
const TIMESTAMP_DIGITS: u16 = 6;

/// Serializes an order to its JSON wire form.
pub fn encode(order: &Order) -> Result<Vec<u8>, ModelError> {
    serde_json::to_vec(order).map_err(|e| ModelError::MalformedPayload(e.to_string()))
}

/// Parses and validates an order from its JSON wire form.
///
/// Unknown fields are ignored. Fails with [`ModelError::MalformedPayload`] when
/// the document is not JSON, lacks `delivery`/`payment`, or has an empty
/// `order_uid`, and with [`ModelError::InvalidField`] when a numeric field is
/// out of range. `date_created` is truncated to microseconds so the decoded
/// order is exactly what storage will hand back.
pub fn decode(bytes: &[u8]) -> Result<Order, ModelError> {
    let mut order: Order =
        serde_json::from_slice(bytes).map_err(|e| ModelError::MalformedPayload(e.to_string()))?;
    order.validate()?;
    order.date_created = order.date_created.trunc_subsecs(TIMESTAMP_DIGITS);
    Ok(order)
}

impl Order {
    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.order_uid.trim().is_empty() {
            return Err(ModelError::MalformedPayload("order_uid is empty".into()));
        }

        non_negative("sm_id", self.sm_id)?;

        let p = &self.payment;
        non_negative("payment.amount", p.amount)?;
        non_negative("payment.payment_dt", p.payment_dt)?;
        non_negative("payment.delivery_cost", p.delivery_cost)?;
        non_negative("payment.goods_total", p.goods_total)?;
        non_negative("payment.custom_fee", p.custom_fee)?;

        for (i, item) in self.items.iter().enumerate() {
            let field = |name: &str| format!("items[{i}].{name}");
            non_negative(field("chrt_id"), item.chrt_id)?;
            non_negative(field("price"), item.price)?;
            non_negative(field("sale"), item.sale)?;
            non_negative(field("total_price"), item.total_price)?;
            non_negative(field("nm_id"), item.nm_id)?;
            non_negative(field("status"), item.status)?;
            if item.sale > 100 {
                return Err(ModelError::invalid(field("sale"), item.sale));
            }
        }
        Ok(())
    }
}

fn non_negative(field: impl Into<String>, value: i64) -> Result<(), ModelError> {
    if value < 0 {
        Err(ModelError::invalid(field, value))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{random_order, sample_order};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_round_trip_sample() {
        let order = sample_order("b563feb7b2b84b6test");
        let bytes = encode(&order).unwrap();
        assert_eq!(decode(&bytes).unwrap(), order);
    }

    #[test]
    fn test_round_trip_random_orders() {
        for _ in 0..64 {
            let order = random_order();
            let bytes = encode(&order).unwrap();
            assert_eq!(decode(&bytes).unwrap(), order);
        }
    }

    #[test]
    fn test_round_trip_keeps_empty_items() {
        let mut order = sample_order("abc123");
        order.items.clear();
        let bytes = encode(&order).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["items"], json!([]));
        assert!(decode(&bytes).unwrap().items.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let bytes = payload(json!({
            "order_uid": "abc123",
            "delivery": {"name": "A", "floor": 3},
            "payment": {"amount": 10},
            "items": [],
            "loyalty_tier": "gold"
        }));
        let order = decode(&bytes).unwrap();
        assert_eq!(order.order_uid, "abc123");
        assert_eq!(order.payment.amount, 10);
    }

    #[test]
    fn test_date_created_truncated_to_microseconds() {
        let bytes = payload(json!({
            "order_uid": "abc123",
            "delivery": {},
            "payment": {},
            "date_created": "2021-11-26T06:22:19.123456789Z"
        }));
        let order = decode(&bytes).unwrap();
        assert_eq!(order.date_created.to_rfc3339(), "2021-11-26T06:22:19.123456+00:00");

        // Decoding is stable once the extra digits are gone.
        let again = decode(&encode(&order).unwrap()).unwrap();
        assert_eq!(again, order);
    }

    #[test]
    fn test_missing_delivery_is_malformed() {
        let bytes = payload(json!({"order_uid": "abc123", "payment": {}, "items": []}));
        assert!(matches!(decode(&bytes), Err(ModelError::MalformedPayload(_))));
    }

    #[test]
    fn test_null_payment_is_malformed() {
        let bytes = payload(json!({"order_uid": "abc123", "delivery": {}, "payment": null}));
        assert!(matches!(decode(&bytes), Err(ModelError::MalformedPayload(_))));
    }

    #[test]
    fn test_empty_order_uid_is_malformed() {
        let bytes = payload(json!({"order_uid": "  ", "delivery": {}, "payment": {}}));
        assert_eq!(
            decode(&bytes),
            Err(ModelError::MalformedPayload("order_uid is empty".into()))
        );
        let bytes = payload(json!({"delivery": {}, "payment": {}}));
        assert!(matches!(decode(&bytes), Err(ModelError::MalformedPayload(_))));
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(decode(b"not an order"), Err(ModelError::MalformedPayload(_))));
    }

    #[test]
    fn test_negative_amount_names_field() {
        let bytes = payload(json!({
            "order_uid": "abc123",
            "delivery": {},
            "payment": {"amount": -1}
        }));
        assert_eq!(
            decode(&bytes),
            Err(ModelError::InvalidField {
                field: "payment.amount".into(),
                value: "-1".into()
            })
        );
    }

    #[test]
    fn test_negative_item_price_names_index() {
        let mut order = sample_order("abc123");
        let mut second = order.items[0].clone();
        second.total_price = -50;
        order.items.push(second);

        match order.validate() {
            Err(ModelError::InvalidField { field, .. }) => assert_eq!(field, "items[1].total_price"),
            other => panic!("unexpected result: {other:?}"),
        }

        order.items[0].price = -1;
        match order.validate() {
            Err(ModelError::InvalidField { field, .. }) => assert_eq!(field, "items[0].price"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_sale_above_hundred_is_invalid() {
        let mut order = sample_order("abc123");
        order.items[0].sale = 101;
        assert!(matches!(order.validate(), Err(ModelError::InvalidField { .. })));
    }

    #[test]
    fn test_float_amount_is_malformed() {
        let bytes = payload(json!({
            "order_uid": "abc123",
            "delivery": {},
            "payment": {"amount": 18.17}
        }));
        assert!(matches!(decode(&bytes), Err(ModelError::MalformedPayload(_))));
    }
}
