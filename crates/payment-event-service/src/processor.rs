//! 支付事件处理器
//!
//! 实现事件的完整处理流程：验签 -> 推导幂等键 -> 幂等预检 ->
//! 价目归因 -> 收款人归因 -> 原子入账 -> 下游通知 -> 确认。
//!
//! 失败语义与对提供商的应答绑定：
//! - 验签/解析失败：拒绝（4xx），账本未被触碰，提供商重投安全
//! - 无法归因（未知价格、无法确定收款人）：确认 + 高声告警，阻止重投——
//!   配置缺失不会因为重试而痊愈，留给人工对账处理而不是静默入账到占位用户
//! - 存储故障：错误上抛（5xx），事务未提交，重投安全
//! - 通知失败：本地吞掉，绝不影响已提交的入账结果

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::error::PaymentEventError;
use crate::event::PaymentEvent;
use crate::models::LedgerEntry;
use crate::notifier::PremiumNotifier;
use crate::signature;
use crate::store::{CreditStore, RecordOutcome};

/// 事件处理结局
///
/// 三种结局都意味着向提供商确认成功（HTTP 2xx）；
/// 需要提供商重投的失败以 `PaymentEventError` 表达。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 赢得幂等闸门并完成入账
    Credited {
        event_key: String,
        entry_id: i64,
        balance_after: i64,
    },
    /// 同一事件的重复投递，未做任何写入
    Duplicate { event_key: String },
    /// 已确认但不产生账本变化
    Acknowledged { reason: AckReason },
}

/// 确认但不入账的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckReason {
    /// 本服务不处理的事件种类
    UnhandledEventType { event_type: String },
    /// 价格标识符未注册到价目表（配置缺失，重试无意义）
    UnknownCatalogIdentifier { event_key: String },
    /// 无法从事件中确定收款用户
    UnknownRecipient { event_key: String },
    /// 周期订阅的结账会话：入账由该订阅的账单事件承担
    SubscriptionCheckout { event_key: String },
}

/// 支付事件处理器
///
/// 每个入站事件由独立的无状态请求处理；处理器自身只持有只读的价目表、
/// 存储与通知器句柄，正确性完全依赖存储层的原子性保证。
/// 使用 trait object 而非泛型参数，避免泛型沿 Router/AppState 传播。
pub struct PaymentEventProcessor {
    catalog: Arc<Catalog>,
    store: Arc<dyn CreditStore>,
    notifier: Arc<dyn PremiumNotifier>,
    signing_secret: String,
}

impl PaymentEventProcessor {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn CreditStore>,
        notifier: Arc<dyn PremiumNotifier>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            notifier,
            signing_secret: signing_secret.into(),
        }
    }

    /// 处理一次 webhook 投递
    ///
    /// 验签必须针对原始请求体字节进行，因此入参是 `&[u8]` 而非已解析结构。
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<ProcessOutcome, PaymentEventError> {
        // 1. 验签：失败关闭，未通过的报文绝不触达账本
        signature::verify_signature(raw_body, signature_header, &self.signing_secret)?;

        // 2. 解析为带标签联合体
        let event = PaymentEvent::parse(raw_body)?;

        let (event_key, identifier, recipient, is_checkout) = match &event {
            PaymentEvent::CheckoutCompleted(s) => {
                (s.event_key(), s.catalog_identifier(), s.recipient(), true)
            }
            PaymentEvent::InvoicePaid(i) => {
                (i.event_key(), i.catalog_identifier(), i.recipient(), false)
            }
            PaymentEvent::Unhandled { event_type } => {
                info!(event_type, "收到未处理种类的事件，确认并忽略");
                return Ok(ProcessOutcome::Acknowledged {
                    reason: AckReason::UnhandledEventType {
                        event_type: event_type.clone(),
                    },
                });
            }
        };

        info!(event_key, "收到支付事件");

        // 3. 幂等预检：纯粹的读优化，闸门本体在 record_credit 的原子插入
        if self.store.is_processed(&event_key).await? {
            info!(event_key, "事件已处理，跳过");
            return Ok(ProcessOutcome::Duplicate { event_key });
        }

        // 4. 价目归因：查不到是配置问题，确认以阻止重投，高声告警留给人工对账
        let Some(identifier) = identifier else {
            error!(event_key, "事件未携带价格标识符，需人工对账");
            return Ok(ProcessOutcome::Acknowledged {
                reason: AckReason::UnknownCatalogIdentifier { event_key },
            });
        };
        let Some(item) = self.catalog.resolve(identifier) else {
            error!(event_key, identifier, "价格标识符未注册到价目表，需人工对账");
            return Ok(ProcessOutcome::Acknowledged {
                reason: AckReason::UnknownCatalogIdentifier { event_key },
            });
        };

        // 5. 收款人归因：宁可告警留待人工，也不静默入账到占位用户
        let Some(recipient) = recipient else {
            error!(event_key, identifier, "无法确定收款用户，需人工对账");
            return Ok(ProcessOutcome::Acknowledged {
                reason: AckReason::UnknownRecipient { event_key },
            });
        };
        let recipient = recipient.to_string();

        // 6. 周期订阅的结账会话不入账：额度由该订阅的首张账单事件入账，
        //    避免同一笔购买经由两种事件种类各记一次
        if is_checkout && item.is_subscription() {
            let newly_marked = self.store.mark_processed(&event_key).await?;
            if !newly_marked {
                return Ok(ProcessOutcome::Duplicate { event_key });
            }
            self.notify_premium(&recipient).await;
            info!(event_key, user_key = %recipient, "订阅结账已确认，等待账单事件入账");
            return Ok(ProcessOutcome::Acknowledged {
                reason: AckReason::SubscriptionCheckout { event_key },
            });
        }

        // 7. 原子入账：幂等记录 + 账本流水（+ 滚存冲抵）同事务提交
        let entry = LedgerEntry::deposit(recipient.clone(), item, Utc::now());
        let outcome = self
            .store
            .record_credit(&event_key, &entry, item.rollover_cap)
            .await?;

        let RecordOutcome::Recorded {
            entry_id,
            balance_after,
        } = outcome
        else {
            // 并发投递中败者的路径：赢家已完成写入
            info!(event_key, "并发重复投递，本次未写入");
            return Ok(ProcessOutcome::Duplicate { event_key });
        };

        // 8. 下游通知：严格在事务提交之后，失败只记日志
        if item.is_subscription() {
            self.notify_premium(&recipient).await;
        }

        info!(
            event_key,
            user_key = %recipient,
            identifier,
            delta = entry.delta,
            entry_id,
            balance_after,
            "入账完成"
        );

        Ok(ProcessOutcome::Credited {
            event_key,
            entry_id,
            balance_after,
        })
    }

    /// 尽力而为的 premium 同步
    ///
    /// 失败被吞掉：若因通知失败而对提供商应答失败，重投会造成重复入账
    async fn notify_premium(&self, user_email: &str) {
        if let Err(e) = self.notifier.mark_premium(user_email).await {
            warn!(
                user_email,
                error = %e,
                "premium 下游通知失败，已忽略（不影响入账结果）"
            );
        }
    }
}
