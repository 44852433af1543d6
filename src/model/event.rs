use super::{GoodsId, Order, OrderId, OrderStatus, ShippingInfo, UserId};
use serde::{Deserialize, Serialize};

/// The order snapshot carried by a delayed cancellation message.
///
/// Field names are the JSON wire names other services already read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: OrderId,
    pub user_id: UserId,
    #[serde(rename = "order")]
    pub order_sn: String,
    pub pay_type: i32,
    pub goods_id: GoodsId,
    pub goods_nums: i32,
    pub status: OrderStatus,
    pub total_price: f64,
    #[serde(flatten)]
    pub shipping: ShippingInfo,
}

impl From<&Order> for OrderEvent {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            order_sn: order.order_sn.clone(),
            pay_type: order.pay_type,
            goods_id: order.goods_id,
            goods_nums: order.goods_nums,
            status: order.status,
            total_price: order.total_price,
            shipping: order.shipping.clone(),
        }
    }
}

impl OrderEvent {
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> OrderEvent {
        OrderEvent {
            id: OrderId(42),
            user_id: UserId(7),
            order_sn: "20240101-42".to_string(),
            pay_type: 1,
            goods_id: GoodsId(3),
            goods_nums: 2,
            status: OrderStatus::Unpaid,
            total_price: 19.9,
            shipping: ShippingInfo {
                address: "1 Main St".to_string(),
                name: "Lee".to_string(),
                mobile: "13800000000".to_string(),
                post_code: "100000".to_string(),
            },
        }
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["order"], "20240101-42");
        assert_eq!(json["status"], 0);
        assert_eq!(json["signer"], "1 Main St");
        assert_eq!(json["signer_post"], "100000");
        assert!(json.get("shipping").is_none());
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let body = serde_json::to_vec(&event()).unwrap();
        assert_eq!(OrderEvent::decode(&body).unwrap(), event());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(OrderEvent::decode(b"not json").is_err());
        assert!(OrderEvent::decode(br#"{"id": 1}"#).is_err());
        let bad_status = br#"{"id":1,"user_id":1,"order":"x","pay_type":0,"goods_id":1,"goods_nums":1,"status":9,"total_price":1.0,"signer":"","signer_name":"","signer_mobile":"","signer_post":""}"#;
        assert!(OrderEvent::decode(bad_status).is_err());
    }
}
