use super::{GoodsId, OrderId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Payment state of an order.
///
/// Encoded on the wire as `0` (unpaid), `1` (paid) and `2` (cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderStatus {
    #[default]
    Unpaid,
    Paid,
    Cancelled,
}

impl TryFrom<u8> for OrderStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OrderStatus::Unpaid),
            1 => Ok(OrderStatus::Paid),
            2 => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Unpaid => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Cancelled => 2,
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Unpaid => "unpaid",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Where and to whom an order ships.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShippingInfo {
    #[serde(rename = "signer")]
    pub address: String,
    #[serde(rename = "signer_name")]
    pub name: String,
    #[serde(rename = "signer_mobile")]
    pub mobile: String,
    #[serde(rename = "signer_post")]
    pub post_code: String,
}

/// A stored order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Human-facing serial number, also used as the message key.
    pub order_sn: String,
    pub pay_type: i32,
    pub goods_id: GoodsId,
    pub goods_nums: i32,
    pub status: OrderStatus,
    pub total_price: f64,
    pub shipping: ShippingInfo,
}

/// Payload for creating a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub pay_type: i32,
    pub goods_id: GoodsId,
    pub goods_nums: i32,
    pub total_price: f64,
    pub shipping: ShippingInfo,
}

impl Order {
    /// Builds an unpaid order from `params`.
    pub fn new(id: OrderId, order_sn: String, params: NewOrder) -> Self {
        Self {
            id,
            user_id: params.user_id,
            order_sn,
            pay_type: params.pay_type,
            goods_id: params.goods_id,
            goods_nums: params.goods_nums,
            status: OrderStatus::Unpaid,
            total_price: params.total_price,
            shipping: params.shipping,
        }
    }
}
