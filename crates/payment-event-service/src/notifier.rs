//! 会员状态下游通知
//!
//! 订阅购买入账后，向外部系统同步用户的 premium 标记。
//! 调用是尽力而为的：带超时、带少量重试，最终失败只记日志——
//! 绝不回滚已提交的账本写入，否则提供商重投会造成重复入账。

use async_trait::async_trait;
use tracing::{debug, info};

use credit_shared::config::PremiumConfig;
use credit_shared::error::{CreditError, Result};
use credit_shared::retry::{RetryPolicy, retry_with_policy};

/// 下游通知接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PremiumNotifier: Send + Sync {
    /// 向外部系统标记用户为 premium
    async fn mark_premium(&self, user_email: &str) -> Result<()>;
}

/// HTTP 表单通知实现
///
/// 以表单编码 POST `{user_email, is_premium: "true"}` 到配置的端点。
/// 超时由 reqwest 客户端承担，通知调用发生在账本事务提交之后，
/// 不持有任何事务或锁。
pub struct HttpPremiumNotifier {
    client: reqwest::Client,
    endpoint_url: String,
    policy: RetryPolicy,
}

impl HttpPremiumNotifier {
    pub fn new(config: &PremiumConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CreditError::Internal(format!("HTTP 客户端构建失败: {e}")))?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            policy: RetryPolicy::fast(config.max_retries),
        })
    }

    async fn send_once(&self, user_email: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .form(&[("user_email", user_email), ("is_premium", "true")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CreditError::ExternalServiceTimeout {
                        service: "premium-notifier".to_string(),
                    }
                } else {
                    CreditError::ExternalService {
                        service: "premium-notifier".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(CreditError::ExternalService {
                service: "premium-notifier".to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PremiumNotifier for HttpPremiumNotifier {
    async fn mark_premium(&self, user_email: &str) -> Result<()> {
        retry_with_policy(
            &self.policy,
            "mark_premium",
            CreditError::is_retryable,
            || self.send_once(user_email),
        )
        .await?;

        info!(user_email, "premium 标记已同步到下游");
        Ok(())
    }
}

/// 空实现
///
/// premium.enabled 为 false 时使用，也用于测试。
pub struct NoopNotifier;

#[async_trait]
impl PremiumNotifier for NoopNotifier {
    async fn mark_premium(&self, user_email: &str) -> Result<()> {
        debug!(user_email, "premium 通知未启用，跳过");
        Ok(())
    }
}
