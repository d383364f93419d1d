//! 信用额度领域模型
//!
//! 包含价目表条目、账本流水、幂等记录与余额快照等核心实体定义。
//! 账本采用仅追加设计：任何修正都以新的冲抵流水表达，绝不改写历史记录。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use credit_shared::config::CatalogEntryConfig;
use credit_shared::error::CreditError;

/// 流水来源标签
pub mod sources {
    /// 运营手工调整
    pub const MANUAL: &str = "manual";
    /// 滚存上限触发的系统冲抵流水
    pub const ROLLOVER_CAP_ADJUSTMENT: &str = "rollover_cap_adjustment";
}

// ---------------------------------------------------------------------------
// 价目表
// ---------------------------------------------------------------------------

/// 可购买项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ItemKind {
    /// 套餐 - 订阅计划或限时通行证
    Plan,
    /// 加油包 - 一次性补充额度，永不过期
    Topup,
}

/// 计费方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum BillingMode {
    /// 单次支付
    OneTime,
    /// 周期扣费
    Recurring,
}

/// 价目表条目
///
/// 描述一个价格标识符对应的购买内容。价目表在进程启动时从配置构建，
/// 之后只读——不存在运行期热更新，避免处理事件途中语义漂移。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// 支付服务商侧的价格标识符（唯一键）
    pub identifier: String,
    pub kind: ItemKind,
    /// 购买后入账的额度，必须为正
    pub credit_amount: i64,
    pub billing_mode: BillingMode,
    /// 相对有效期（天），仅单次支付的限时通行证设置
    pub expires_in_days: Option<i64>,
    /// 滚存上限，仅周期订阅设置——每次入账后账户累计余额不超过该值
    pub rollover_cap: Option<i64>,
}

impl CatalogItem {
    /// 从原始配置条目解析
    pub fn from_config(entry: &CatalogEntryConfig) -> Result<Self, CreditError> {
        let kind = match entry.kind.as_str() {
            "plan" => ItemKind::Plan,
            "topup" => ItemKind::Topup,
            other => {
                return Err(CreditError::InvalidCatalogItem {
                    identifier: entry.identifier.clone(),
                    reason: format!("未知的 kind: {other}"),
                });
            }
        };

        let billing_mode = match entry.billing_mode.as_str() {
            "one_time" => BillingMode::OneTime,
            "recurring" => BillingMode::Recurring,
            other => {
                return Err(CreditError::InvalidCatalogItem {
                    identifier: entry.identifier.clone(),
                    reason: format!("未知的 billing_mode: {other}"),
                });
            }
        };

        let item = Self {
            identifier: entry.identifier.clone(),
            kind,
            credit_amount: entry.credit_amount,
            billing_mode,
            expires_in_days: entry.expires_in_days,
            rollover_cap: entry.rollover_cap,
        };
        item.validate()?;
        Ok(item)
    }

    /// 校验条目自身的不变量
    ///
    /// - credit_amount 必须为正
    /// - expires_in_days 与 rollover_cap 互斥，至多设置一个
    /// - 加油包两者皆不可设置
    /// - 相对有效期仅对单次支付有意义；滚存上限仅对周期订阅有意义
    pub fn validate(&self) -> Result<(), CreditError> {
        let invalid = |reason: String| CreditError::InvalidCatalogItem {
            identifier: self.identifier.clone(),
            reason,
        };

        if self.identifier.is_empty() {
            return Err(invalid("identifier 为空".to_string()));
        }
        if self.credit_amount <= 0 {
            return Err(invalid(format!(
                "credit_amount 必须大于 0，实际 {}",
                self.credit_amount
            )));
        }
        if self.expires_in_days.is_some() && self.rollover_cap.is_some() {
            return Err(invalid(
                "expires_in_days 与 rollover_cap 不可同时设置".to_string(),
            ));
        }
        if self.kind == ItemKind::Topup
            && (self.expires_in_days.is_some() || self.rollover_cap.is_some())
        {
            return Err(invalid(
                "加油包不可设置有效期或滚存上限".to_string(),
            ));
        }
        if let Some(days) = self.expires_in_days {
            if days <= 0 {
                return Err(invalid(format!("expires_in_days 必须大于 0，实际 {days}")));
            }
            if self.billing_mode != BillingMode::OneTime {
                return Err(invalid(
                    "expires_in_days 仅适用于单次支付的限时通行证".to_string(),
                ));
            }
        }
        if let Some(cap) = self.rollover_cap {
            if cap <= 0 {
                return Err(invalid(format!("rollover_cap 必须大于 0，实际 {cap}")));
            }
            if self.billing_mode != BillingMode::Recurring {
                return Err(invalid(
                    "rollover_cap 仅适用于周期订阅".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// 是否为订阅类购买（周期扣费的套餐）
    ///
    /// 订阅购买成功后需要向下游同步 premium 标记
    pub fn is_subscription(&self) -> bool {
        self.kind == ItemKind::Plan && self.billing_mode == BillingMode::Recurring
    }

    /// 按入账时间计算该条目产生流水的过期时间点
    pub fn expires_at_from(&self, credited_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in_days.map(|days| credited_at + Duration::days(days))
    }
}

// ---------------------------------------------------------------------------
// 账本流水
// ---------------------------------------------------------------------------

/// 账本流水记录（仅追加，不可变）
///
/// delta 为有符号额度变化：入账为正，系统冲抵（滚存上限）与手工扣减为负。
/// expires_at 到期后该条流水不再参与余额计算。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    /// 用户标识（邮箱或稳定用户 ID）
    pub user_key: String,
    /// 有符号额度变化
    pub delta: i64,
    /// 来源标签：价格标识符或 sources 模块中的系统标签
    pub source: String,
    /// 回溯到价目表条目的标识符
    pub catalog_identifier: String,
    /// 过期时间（null 表示永不过期）
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// 构建一条入账流水（id 由存储层生成）
    pub fn deposit(
        user_key: impl Into<String>,
        item: &CatalogItem,
        credited_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_key: user_key.into(),
            delta: item.credit_amount,
            source: item.identifier.clone(),
            catalog_identifier: item.identifier.clone(),
            expires_at: item.expires_at_from(credited_at),
            created_at: credited_at,
        }
    }

    /// 构建一条手工调整流水
    pub fn manual(
        user_key: impl Into<String>,
        delta: i64,
        reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_key: user_key.into(),
            delta,
            source: sources::MANUAL.to_string(),
            catalog_identifier: reference.into(),
            expires_at: None,
            created_at,
        }
    }

    /// 构建一条滚存上限冲抵流水（delta 为负，把余额压回上限）
    pub fn rollover_adjustment(
        user_key: impl Into<String>,
        overflow: i64,
        catalog_identifier: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            user_key: user_key.into(),
            delta: -overflow,
            source: sources::ROLLOVER_CAP_ADJUSTMENT.to_string(),
            catalog_identifier: catalog_identifier.into(),
            expires_at: None,
            created_at,
        }
    }

    /// 截至 as_of 时刻该条流水是否已过期
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= as_of)
    }
}

// ---------------------------------------------------------------------------
// 幂等记录
// ---------------------------------------------------------------------------

/// 已处理事件记录
///
/// event_key 全局唯一；其插入与对应的账本写入处于同一事务，
/// 构成"恰好一次"入账的闸门。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEvent {
    pub event_key: String,
    pub processed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// 余额
// ---------------------------------------------------------------------------

/// 余额快照（派生值，非持久化实体）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub user_key: String,
    /// 可用额度，非负
    pub amount: i64,
    /// 该快照的计算时点
    pub as_of: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topup_item() -> CatalogItem {
        CatalogItem {
            identifier: "price_pack_50".to_string(),
            kind: ItemKind::Topup,
            credit_amount: 50,
            billing_mode: BillingMode::OneTime,
            expires_in_days: None,
            rollover_cap: None,
        }
    }

    fn pass_item() -> CatalogItem {
        CatalogItem {
            identifier: "price_starter_7d".to_string(),
            kind: ItemKind::Plan,
            credit_amount: 12,
            billing_mode: BillingMode::OneTime,
            expires_in_days: Some(7),
            rollover_cap: None,
        }
    }

    fn subscription_item() -> CatalogItem {
        CatalogItem {
            identifier: "price_pro_monthly".to_string(),
            kind: ItemKind::Plan,
            credit_amount: 30,
            billing_mode: BillingMode::Recurring,
            expires_in_days: None,
            rollover_cap: Some(60),
        }
    }

    #[test]
    fn test_catalog_item_validate_ok() {
        assert!(topup_item().validate().is_ok());
        assert!(pass_item().validate().is_ok());
        assert!(subscription_item().validate().is_ok());
    }

    #[test]
    fn test_catalog_item_rejects_non_positive_amount() {
        let mut item = topup_item();
        item.credit_amount = 0;
        assert!(item.validate().is_err());

        item.credit_amount = -5;
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_catalog_item_rejects_both_expiry_and_cap() {
        let mut item = subscription_item();
        item.expires_in_days = Some(30);
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_catalog_item_topup_has_neither() {
        let mut item = topup_item();
        item.expires_in_days = Some(7);
        assert!(item.validate().is_err());

        let mut item = topup_item();
        item.rollover_cap = Some(100);
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_catalog_item_cap_requires_recurring() {
        let mut item = pass_item();
        item.expires_in_days = None;
        item.rollover_cap = Some(60);
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_catalog_item_expiry_requires_one_time() {
        let mut item = subscription_item();
        item.rollover_cap = None;
        item.expires_in_days = Some(7);
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_from_config_parses_and_validates() {
        let entry = CatalogEntryConfig {
            identifier: "price_starter_7d".to_string(),
            kind: "plan".to_string(),
            credit_amount: 12,
            billing_mode: "one_time".to_string(),
            expires_in_days: Some(7),
            rollover_cap: None,
        };

        let item = CatalogItem::from_config(&entry).unwrap();
        assert_eq!(item.kind, ItemKind::Plan);
        assert_eq!(item.billing_mode, BillingMode::OneTime);
        assert_eq!(item.credit_amount, 12);

        let bad = CatalogEntryConfig {
            kind: "bundle".to_string(),
            ..entry
        };
        assert!(CatalogItem::from_config(&bad).is_err());
    }

    #[test]
    fn test_is_subscription() {
        assert!(subscription_item().is_subscription());
        assert!(!pass_item().is_subscription());
        assert!(!topup_item().is_subscription());
    }

    #[test]
    fn test_deposit_entry_carries_expiry() {
        let now = Utc::now();
        let entry = LedgerEntry::deposit("user@x.com", &pass_item(), now);

        assert_eq!(entry.delta, 12);
        assert_eq!(entry.source, "price_starter_7d");
        assert_eq!(entry.expires_at, Some(now + Duration::days(7)));

        // 永不过期的加油包
        let entry = LedgerEntry::deposit("user@x.com", &topup_item(), now);
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn test_ledger_entry_expiry_boundary() {
        let now = Utc::now();
        let mut entry = LedgerEntry::deposit("user@x.com", &pass_item(), now);

        // 到期时刻之前有效，到达时刻即过期
        entry.expires_at = Some(now);
        assert!(entry.is_expired(now));

        entry.expires_at = Some(now + Duration::seconds(1));
        assert!(!entry.is_expired(now));

        entry.expires_at = None;
        assert!(!entry.is_expired(now + Duration::days(365 * 10)));
    }

    #[test]
    fn test_rollover_adjustment_is_negative() {
        let now = Utc::now();
        let entry = LedgerEntry::rollover_adjustment("user@x.com", 30, "price_pro_monthly", now);

        assert_eq!(entry.delta, -30);
        assert_eq!(entry.source, sources::ROLLOVER_CAP_ADJUSTMENT);
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn test_serde_camel_case() {
        let now = Utc::now();
        let entry = LedgerEntry::deposit("user@x.com", &pass_item(), now);
        let json = serde_json::to_string(&entry).unwrap();

        assert!(json.contains("userKey"));
        assert!(json.contains("catalogIdentifier"));
        assert!(json.contains("expiresAt"));
        assert!(json.contains("createdAt"));
    }
}
