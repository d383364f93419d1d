//! 余额引擎
//!
//! 从账本流水派生用户当前可用额度。每次都从头重算而不是维护增量计数器：
//! 任何账本修正（人工冲抵、bug 修复补录）重算后即刻生效，
//! 也天然支持按任意历史时点的审计查询。

use chrono::{DateTime, Utc};

use crate::models::LedgerEntry;

/// 计算截至 as_of 时刻的可用余额
///
/// 1. 仅纳入 created_at <= as_of 的流水
/// 2. 无过期时间的流水全部计入；有过期时间的仅在 expires_at > as_of 时计入
/// 3. 求和后下限截断为 0——负向修正不应向用户暴露负余额
pub fn compute_balance(entries: &[LedgerEntry], as_of: DateTime<Utc>) -> i64 {
    let raw: i64 = entries
        .iter()
        .filter(|e| e.created_at <= as_of)
        .filter(|e| !e.is_expired(as_of))
        .map(|e| e.delta)
        .sum();

    raw.max(0)
}

/// 计算滚存溢出量
///
/// 周期订阅入账后，账户累计余额不得超过套餐的滚存上限。
/// 返回超出部分（需要以负向冲抵流水压回），未超出时返回 None。
pub fn rollover_overflow(balance_after_deposit: i64, cap: i64) -> Option<i64> {
    let overflow = balance_after_deposit - cap;
    (overflow > 0).then_some(overflow)
}
