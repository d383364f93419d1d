//! PostgreSQL 存储实现
//!
//! 幂等记录与账本写入在同一数据库事务内完成。`processed_events.event_key`
//! 上的唯一约束配合 `ON CONFLICT DO NOTHING` 构成 insert-if-absent 闸门：
//! 并发投递同一事件时由数据库仲裁出唯一赢家，无需任何进程内锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use credit_shared::error::Result;

use crate::models::LedgerEntry;

use super::{CreditStore, RecordOutcome};

/// PostgreSQL 信用额度存储
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中计算截至 as_of 的余额
    ///
    /// 与 balance 模块的内存实现同一套规则：未过期流水求和，下限 0。
    async fn balance_in_tx(
        tx: &mut sqlx::PgConnection,
        user_key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT AS balance
            FROM ledger_entries
            WHERE user_key = $1
              AND created_at <= $2
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(user_key)
        .bind(as_of)
        .fetch_one(tx)
        .await?;

        let balance: i64 = row.get("balance");
        Ok(balance.max(0))
    }

    /// 在事务中追加一条流水，返回新记录 ID
    async fn append_in_tx(tx: &mut sqlx::PgConnection, entry: &LedgerEntry) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (user_key, delta, source, catalog_identifier, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&entry.user_key)
        .bind(entry.delta)
        .bind(&entry.source)
        .bind(&entry.catalog_identifier)
        .bind(entry.expires_at)
        .bind(entry.created_at)
        .fetch_one(tx)
        .await?;

        Ok(row.get("id"))
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    async fn is_processed(&self, event_key: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_key = $1)",
        )
        .bind(event_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record_credit(
        &self,
        event_key: &str,
        entry: &LedgerEntry,
        rollover_cap: Option<i64>,
    ) -> Result<RecordOutcome> {
        let mut tx = self.pool.begin().await?;

        // 闸门：唯一约束仲裁并发赢家
        let marked = sqlx::query(
            r#"
            INSERT INTO processed_events (event_key, processed_at)
            VALUES ($1, $2)
            ON CONFLICT (event_key) DO NOTHING
            "#,
        )
        .bind(event_key)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            // 败者未写入任何内容，事务随 drop 回滚
            debug!(event_key, "事件已处理，跳过");
            return Ok(RecordOutcome::Duplicate);
        }

        let entry_id = Self::append_in_tx(&mut tx, entry).await?;
        let mut balance_after = Self::balance_in_tx(&mut tx, &entry.user_key, entry.created_at).await?;

        // 滚存上限：超出部分以负向冲抵流水压回，账本保持仅追加可审计
        if let Some(cap) = rollover_cap
            && let Some(overflow) = crate::balance::rollover_overflow(balance_after, cap)
        {
            let adjustment = LedgerEntry::rollover_adjustment(
                entry.user_key.clone(),
                overflow,
                entry.catalog_identifier.clone(),
                entry.created_at,
            );
            Self::append_in_tx(&mut tx, &adjustment).await?;
            balance_after = cap;
        }

        tx.commit().await?;

        Ok(RecordOutcome::Recorded {
            entry_id,
            balance_after,
        })
    }

    async fn mark_processed(&self, event_key: &str) -> Result<bool> {
        let marked = sqlx::query(
            r#"
            INSERT INTO processed_events (event_key, processed_at)
            VALUES ($1, $2)
            ON CONFLICT (event_key) DO NOTHING
            "#,
        )
        .bind(event_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(marked.rows_affected() > 0)
    }

    async fn entries_for_user(&self, user_key: &str) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_key, delta, source, catalog_identifier, expires_at, created_at
            FROM ledger_entries
            WHERE user_key = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn append_manual(&self, entry: &LedgerEntry) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = Self::append_in_tx(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_store_implements_trait() {
        // 类型检查：确保 PgCreditStore 满足 trait object 约束
        fn _assert_store<T: super::CreditStore>() {}
        _assert_store::<super::PgCreditStore>();
    }
}
