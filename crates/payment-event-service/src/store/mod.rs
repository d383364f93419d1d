//! 信用额度存储层
//!
//! 账本与幂等记录是全系统仅有的两份共享可变状态，且都是仅插入结构。
//! `CreditStore` trait 把"恰好一次入账"所需的原子性收拢到一个方法里：
//! 幂等记录插入与账本写入要么同事务成功，要么都不发生——并发投递同一
//! 事件时只有一个调用者赢得闸门，败者得到 `Duplicate` 而不是错误。

mod memory;
mod postgres;

pub use memory::MemoryCreditStore;
pub use postgres::PgCreditStore;

use async_trait::async_trait;

use credit_shared::error::Result;

use crate::models::LedgerEntry;

/// 原子入账的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// 本次调用赢得幂等闸门并完成全部写入
    Recorded { entry_id: i64, balance_after: i64 },
    /// 幂等键已存在，本次调用未做任何写入
    Duplicate,
}

/// 信用额度存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// 幂等预检
    ///
    /// 只是跳过后续工作的读优化；恰好一次的保证来自 `record_credit` /
    /// `mark_processed` 的原子插入，而不是这次读取。
    async fn is_processed(&self, event_key: &str) -> Result<bool>;

    /// 原子入账
    ///
    /// 在同一原子作用域内：插入幂等记录（insert-if-absent）、追加账本流水、
    /// 重算余额，并在给定滚存上限且余额超出时追加一条负向冲抵流水。
    /// 幂等键已存在时返回 `Duplicate` 且不产生任何写入。
    async fn record_credit(
        &self,
        event_key: &str,
        entry: &LedgerEntry,
        rollover_cap: Option<i64>,
    ) -> Result<RecordOutcome>;

    /// 仅登记幂等记录，不产生账本流水
    ///
    /// 用于需要吸收重复投递、但本身不入账的事件
    /// （如周期订阅的结账会话——入账发生在对应账单事件）。
    /// 返回 true 表示本次新登记，false 表示键已存在。
    async fn mark_processed(&self, event_key: &str) -> Result<bool>;

    /// 读取用户的全部账本流水（按创建时间升序）
    async fn entries_for_user(&self, user_key: &str) -> Result<Vec<LedgerEntry>>;

    /// 追加一条不经过幂等闸门的流水（运营手工调整）
    async fn append_manual(&self, entry: &LedgerEntry) -> Result<i64>;
}
