//! 内存存储实现
//!
//! 供单元/集成测试与本地联调使用，不依赖外部数据库。
//! 幂等闸门由 DashMap 的 entry 原子插入承担，与 PostgreSQL 实现的
//! 唯一约束语义对齐：并发调用同一 event_key 时恰有一个赢家。

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use credit_shared::error::Result;

use crate::balance::{compute_balance, rollover_overflow};
use crate::models::LedgerEntry;

use super::{CreditStore, RecordOutcome};

/// 内存信用额度存储
#[derive(Default)]
pub struct MemoryCreditStore {
    /// event_key -> 处理时间
    processed: DashMap<String, DateTime<Utc>>,
    /// user_key -> 该用户的全部流水
    entries: DashMap<String, Vec<LedgerEntry>>,
    /// 自增流水 ID
    next_id: AtomicI64,
}

impl MemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl CreditStore for MemoryCreditStore {
    async fn is_processed(&self, event_key: &str) -> Result<bool> {
        Ok(self.processed.contains_key(event_key))
    }

    async fn record_credit(
        &self,
        event_key: &str,
        entry: &LedgerEntry,
        rollover_cap: Option<i64>,
    ) -> Result<RecordOutcome> {
        // 闸门：entry 插入是分片锁内的原子操作，败者直接返回
        match self.processed.entry(event_key.to_string()) {
            Entry::Occupied(_) => return Ok(RecordOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(entry.created_at);
            }
        }

        // 持有该用户流水的独占引用，入账与滚存冲抵在同一临界区内完成
        let mut user_entries = self.entries.entry(entry.user_key.clone()).or_default();

        let entry_id = self.allocate_id();
        let mut stored = entry.clone();
        stored.id = entry_id;
        user_entries.push(stored);

        let mut balance_after = compute_balance(&user_entries, entry.created_at);

        if let Some(cap) = rollover_cap
            && let Some(overflow) = rollover_overflow(balance_after, cap)
        {
            let mut adjustment = LedgerEntry::rollover_adjustment(
                entry.user_key.clone(),
                overflow,
                entry.catalog_identifier.clone(),
                entry.created_at,
            );
            adjustment.id = self.allocate_id();
            user_entries.push(adjustment);
            balance_after = cap;
        }

        Ok(RecordOutcome::Recorded {
            entry_id,
            balance_after,
        })
    }

    async fn mark_processed(&self, event_key: &str) -> Result<bool> {
        match self.processed.entry(event_key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn entries_for_user(&self, user_key: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .get(user_key)
            .map(|v| v.value().clone())
            .unwrap_or_default())
    }

    async fn append_manual(&self, entry: &LedgerEntry) -> Result<i64> {
        let mut user_entries = self.entries.entry(entry.user_key.clone()).or_default();
        let id = self.allocate_id();
        let mut stored = entry.clone();
        stored.id = id;
        user_entries.push(stored);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingMode, CatalogItem, ItemKind};
    use std::sync::Arc;

    fn topup_entry(user: &str, amount: i64) -> LedgerEntry {
        let item = CatalogItem {
            identifier: "price_pack".to_string(),
            kind: ItemKind::Topup,
            credit_amount: amount,
            billing_mode: BillingMode::OneTime,
            expires_in_days: None,
            rollover_cap: None,
        };
        LedgerEntry::deposit(user, &item, Utc::now())
    }

    #[tokio::test]
    async fn test_record_credit_then_duplicate() {
        let store = MemoryCreditStore::new();
        let entry = topup_entry("user@x.com", 50);

        let first = store.record_credit("cs_abc", &entry, None).await.unwrap();
        assert!(matches!(
            first,
            RecordOutcome::Recorded {
                balance_after: 50,
                ..
            }
        ));

        let second = store.record_credit("cs_abc", &entry, None).await.unwrap();
        assert_eq!(second, RecordOutcome::Duplicate);

        // 重复投递未追加流水
        let entries = store.entries_for_user("user@x.com").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_rollover_cap_creates_adjustment() {
        let store = MemoryCreditStore::new();

        let sub = CatalogItem {
            identifier: "price_pro_monthly".to_string(),
            kind: ItemKind::Plan,
            credit_amount: 30,
            billing_mode: BillingMode::Recurring,
            expires_in_days: None,
            rollover_cap: Some(60),
        };

        for i in 0..3 {
            let entry = LedgerEntry::deposit("sub@x.com", &sub, Utc::now());
            let outcome = store
                .record_credit(&format!("inv_{i}"), &entry, sub.rollover_cap)
                .await
                .unwrap();
            let RecordOutcome::Recorded { balance_after, .. } = outcome else {
                panic!("应为 Recorded");
            };
            // 第三次入账被压回上限
            assert_eq!(balance_after, ((i + 1) * 30).min(60));
        }

        let entries = store.entries_for_user("sub@x.com").await.unwrap();
        // 3 笔入账 + 1 笔冲抵，历史完整保留
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries
                .iter()
                .filter(|e| e.source == crate::models::sources::ROLLOVER_CAP_ADJUSTMENT)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_mark_processed_is_insert_if_absent() {
        let store = MemoryCreditStore::new();

        assert!(store.mark_processed("cs_sub_session").await.unwrap());
        assert!(!store.mark_processed("cs_sub_session").await.unwrap());
        assert!(store.is_processed("cs_sub_session").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_delivery_single_winner() {
        let store = Arc::new(MemoryCreditStore::new());
        let entry = topup_entry("race@x.com", 25);

        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                let entry = entry.clone();
                async move { store.record_credit("cs_race", &entry, None).await }
            },
            {
                let store = store.clone();
                let entry = entry.clone();
                async move { store.record_credit("cs_race", &entry, None).await }
            }
        );

        let outcomes = [a.unwrap(), b.unwrap()];
        let recorded = outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Recorded { .. }))
            .count();
        let duplicates = outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Duplicate))
            .count();

        // 恰有一个赢家，败者未写入
        assert_eq!(recorded, 1);
        assert_eq!(duplicates, 1);
        assert_eq!(store.entries_for_user("race@x.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_manual_bypasses_gate() {
        let store = MemoryCreditStore::new();
        let entry = LedgerEntry::manual("ops@x.com", -10, "correction-7", Utc::now());

        let id = store.append_manual(&entry).await.unwrap();
        assert!(id > 0);

        let entries = store.entries_for_user("ops@x.com").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].delta, -10);
    }
}
