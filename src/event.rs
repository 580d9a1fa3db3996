// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Event Payloads
//!
//! This module defines the business payload carried by the delivery core.
//! The JSON field names are a wire contract shared with other consumers of
//! the same broker, so they are pinned to camelCase regardless of the Rust
//! field names. Monetary amounts serialize as plain JSON numbers with their
//! exact decimal representation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single order line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub unit_price: Decimal,
}

/// Event emitted when an order has been created.
///
/// Immutable once published; the transport layer serializes it opaquely and
/// never interprets the business fields. The order id doubles as the
/// correlation id on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> OrderCreated {
        OrderCreated {
            order_id: "order-1".to_owned(),
            customer_id: "customer-9".to_owned(),
            items: vec![OrderItem {
                product_id: "sku-42".to_owned(),
                product_name: "Mechanical Keyboard".to_owned(),
                quantity: 3,
                unit_price: "49.99".parse().unwrap(),
            }],
            total_amount: "149.97".parse().unwrap(),
            shipping_address: "221B Baker Street".to_owned(),
            created_at: "2024-01-15T10:30:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn serializes_with_the_documented_field_names() {
        let payload = serde_json::to_string(&sample_event()).unwrap();

        let got: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let want: serde_json::Value = serde_json::from_str(
            r#"{
                "orderId": "order-1",
                "customerId": "customer-9",
                "items": [
                    {
                        "productId": "sku-42",
                        "productName": "Mechanical Keyboard",
                        "quantity": 3,
                        "unitPrice": 49.99
                    }
                ],
                "totalAmount": 149.97,
                "shippingAddress": "221B Baker Street",
                "createdAt": "2024-01-15T10:30:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(got, want);
    }

    #[test]
    fn deserializes_amounts_without_float_drift() {
        let event: OrderCreated = serde_json::from_str(
            r#"{
                "orderId": "order-1",
                "customerId": "customer-9",
                "items": [],
                "totalAmount": 0.30,
                "shippingAddress": "nowhere",
                "createdAt": "2024-01-15T10:30:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(event.total_amount, "0.30".parse::<Decimal>().unwrap());
        assert_eq!(event.total_amount.to_string(), "0.30");
    }
}
