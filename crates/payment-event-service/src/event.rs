//! 支付事件信封与幂等键推导
//!
//! 将支付服务商的 webhook 报文解析为已知事件种类的带标签联合体，
//! 每个变体只携带该种类确定存在的字段；未知种类落入显式的 `Unhandled`
//! 变体（确认但忽略），而不是对松散类型字段做默认值猜测。
//!
//! 幂等键从事件种类 + 服务商对象 ID 确定性推导：同一笔购买无论被投递
//! 多少次、以何种顺序到达，推导出的键都相同。

use std::collections::HashMap;

use serde_json::Value;

use crate::error::PaymentEventError;

/// 结账会话完成事件载荷
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    /// 服务商侧的会话 ID
    pub session_id: String,
    /// 创建会话时附加的业务元数据（首选的价格/收件人来源）
    pub metadata: HashMap<String, String>,
    /// 服务商记录的客户联系邮箱（元数据缺失时的回退）
    pub customer_email: Option<String>,
    /// 购买行项目自身的价格标识符（元数据缺失时的回退）
    pub line_item_price: Option<String>,
}

impl CheckoutSession {
    /// 推导幂等键
    pub fn event_key(&self) -> String {
        format!("cs_{}", self.session_id)
    }

    /// 解析本次购买的价目表标识符：元数据优先，行项目回退
    pub fn catalog_identifier(&self) -> Option<&str> {
        self.metadata
            .get("price_id")
            .map(String::as_str)
            .or(self.line_item_price.as_deref())
    }

    /// 解析收款用户：元数据中的显式邮箱优先，客户联系邮箱回退
    pub fn recipient(&self) -> Option<&str> {
        self.metadata
            .get("user_email")
            .map(String::as_str)
            .or(self.customer_email.as_deref())
    }
}

/// 账单支付成功事件载荷
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    /// 服务商侧的账单 ID
    pub invoice_id: String,
    pub metadata: HashMap<String, String>,
    pub customer_email: Option<String>,
    pub line_item_price: Option<String>,
}

impl Invoice {
    /// 推导幂等键
    pub fn event_key(&self) -> String {
        format!("inv_{}", self.invoice_id)
    }

    pub fn catalog_identifier(&self) -> Option<&str> {
        self.metadata
            .get("price_id")
            .map(String::as_str)
            .or(self.line_item_price.as_deref())
    }

    pub fn recipient(&self) -> Option<&str> {
        self.metadata
            .get("user_email")
            .map(String::as_str)
            .or(self.customer_email.as_deref())
    }
}

/// 支付事件（带标签联合体）
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    /// checkout.session.completed
    CheckoutCompleted(CheckoutSession),
    /// invoice.paid
    InvoicePaid(Invoice),
    /// 已订阅 webhook 但本服务不处理的事件种类
    Unhandled { event_type: String },
}

impl PaymentEvent {
    /// 从原始报文字节解析事件
    ///
    /// 只接受顶层携带 `type` 与 `data.object` 的信封结构。
    /// 已知种类缺失对象 ID 视为报文畸形（4xx，提供商重试）；
    /// 其余字段全部按可选处理，缺失与否交由处理器按归因规则裁决。
    pub fn parse(body: &[u8]) -> Result<Self, PaymentEventError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| PaymentEventError::MalformedPayload(e.to_string()))?;

        let event_type = value["type"]
            .as_str()
            .ok_or_else(|| PaymentEventError::MalformedPayload("缺少 type 字段".to_string()))?;

        let object = &value["data"]["object"];

        match event_type {
            "checkout.session.completed" => {
                let session_id = require_id(object, "checkout session")?;
                Ok(Self::CheckoutCompleted(CheckoutSession {
                    session_id,
                    metadata: extract_metadata(object),
                    customer_email: extract_customer_email(object),
                    line_item_price: extract_line_item_price(object),
                }))
            }
            "invoice.paid" => {
                let invoice_id = require_id(object, "invoice")?;
                Ok(Self::InvoicePaid(Invoice {
                    invoice_id,
                    metadata: extract_metadata(object),
                    customer_email: extract_customer_email(object),
                    line_item_price: extract_line_item_price(object),
                }))
            }
            other => Ok(Self::Unhandled {
                event_type: other.to_string(),
            }),
        }
    }

    /// 推导幂等键；未处理种类没有键
    pub fn event_key(&self) -> Option<String> {
        match self {
            Self::CheckoutCompleted(s) => Some(s.event_key()),
            Self::InvoicePaid(i) => Some(i.event_key()),
            Self::Unhandled { .. } => None,
        }
    }
}

/// 读取对象 ID，缺失即报文畸形
fn require_id(object: &Value, entity: &str) -> Result<String, PaymentEventError> {
    object["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PaymentEventError::MalformedPayload(format!("{entity} 缺少 id 字段")))
}

/// 提取 metadata 键值对，仅保留字符串值
fn extract_metadata(object: &Value) -> HashMap<String, String> {
    object["metadata"]
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// 提取客户联系邮箱：对象自身的 customer_email 优先，customer_details 回退
fn extract_customer_email(object: &Value) -> Option<String> {
    object["customer_email"]
        .as_str()
        .or_else(|| object["customer_details"]["email"].as_str())
        .map(str::to_string)
}

/// 提取首个行项目的价格标识符
fn extract_line_item_price(object: &Value) -> Option<String> {
    object["lines"]["data"][0]["price"]["id"]
        .as_str()
        .or_else(|| object["line_items"]["data"][0]["price"]["id"].as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout_body(session_id: &str) -> Vec<u8> {
        serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": session_id,
                "metadata": { "price_id": "price_starter_7d", "user_email": "user@x.com" },
                "customer_details": { "email": "fallback@x.com" }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_parse_checkout_completed() {
        let event = PaymentEvent::parse(&checkout_body("abc123")).unwrap();

        let PaymentEvent::CheckoutCompleted(session) = event else {
            panic!("应解析为 CheckoutCompleted");
        };
        assert_eq!(session.session_id, "abc123");
        assert_eq!(session.catalog_identifier(), Some("price_starter_7d"));
        assert_eq!(session.recipient(), Some("user@x.com"));
    }

    #[test]
    fn test_parse_invoice_paid() {
        let body = serde_json::json!({
            "type": "invoice.paid",
            "data": { "object": {
                "id": "in_555",
                "customer_email": "subscriber@x.com",
                "lines": { "data": [ { "price": { "id": "price_pro_monthly" } } ] }
            }}
        })
        .to_string();

        let event = PaymentEvent::parse(body.as_bytes()).unwrap();

        let PaymentEvent::InvoicePaid(invoice) = event else {
            panic!("应解析为 InvoicePaid");
        };
        assert_eq!(invoice.invoice_id, "in_555");
        // 元数据缺失时回退到行项目价格与客户邮箱
        assert_eq!(invoice.catalog_identifier(), Some("price_pro_monthly"));
        assert_eq!(invoice.recipient(), Some("subscriber@x.com"));
    }

    #[test]
    fn test_parse_unknown_type_is_unhandled() {
        let body = serde_json::json!({
            "type": "customer.updated",
            "data": { "object": { "id": "cus_1" } }
        })
        .to_string();

        let event = PaymentEvent::parse(body.as_bytes()).unwrap();
        assert_eq!(
            event,
            PaymentEvent::Unhandled {
                event_type: "customer.updated".to_string()
            }
        );
        assert!(event.event_key().is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PaymentEvent::parse(b"not json").is_err());
        assert!(PaymentEvent::parse(b"{}").is_err());
    }

    #[test]
    fn test_parse_known_type_without_id_is_malformed() {
        let body = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "metadata": {} } }
        })
        .to_string();

        let err = PaymentEvent::parse(body.as_bytes()).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_PAYLOAD");
    }

    #[test]
    fn test_event_key_is_deterministic_per_object_id() {
        let a = PaymentEvent::parse(&checkout_body("abc123")).unwrap();
        let b = PaymentEvent::parse(&checkout_body("abc123")).unwrap();
        let c = PaymentEvent::parse(&checkout_body("xyz789")).unwrap();

        // 同一对象 ID 推导出相同键，不同对象 ID 推导出不同键
        assert_eq!(a.event_key(), Some("cs_abc123".to_string()));
        assert_eq!(a.event_key(), b.event_key());
        assert_ne!(a.event_key(), c.event_key());
    }

    #[test]
    fn test_checkout_and_invoice_keys_never_collide() {
        let session = CheckoutSession {
            session_id: "555".to_string(),
            metadata: HashMap::new(),
            customer_email: None,
            line_item_price: None,
        };
        let invoice = Invoice {
            invoice_id: "555".to_string(),
            metadata: HashMap::new(),
            customer_email: None,
            line_item_price: None,
        };

        // 事件种类参与推导，相同的原始 ID 也不会撞键
        assert_ne!(session.event_key(), invoice.event_key());
    }

    #[test]
    fn test_recipient_metadata_takes_precedence() {
        let event = PaymentEvent::parse(&checkout_body("abc123")).unwrap();
        let PaymentEvent::CheckoutCompleted(session) = event else {
            unreachable!();
        };
        // metadata.user_email 存在时不使用 customer_details 回退
        assert_eq!(session.recipient(), Some("user@x.com"));
        assert_eq!(session.customer_email.as_deref(), Some("fallback@x.com"));
    }

    #[test]
    fn test_missing_recipient_and_price_are_none_not_defaults() {
        let body = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "id": "bare" } }
        })
        .to_string();

        let event = PaymentEvent::parse(body.as_bytes()).unwrap();
        let PaymentEvent::CheckoutCompleted(session) = event else {
            unreachable!();
        };
        assert!(session.catalog_identifier().is_none());
        assert!(session.recipient().is_none());
    }
}
