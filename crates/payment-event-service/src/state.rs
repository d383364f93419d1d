//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use crate::processor::PaymentEventProcessor;
use crate::store::CreditStore;

/// Axum 应用共享状态
///
/// 处理器与存储通过 Arc 在 handler 间共享；
/// 存储单独暴露给余额查询与手工调整接口，不经过事件处理器。
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PaymentEventProcessor>,
    pub store: Arc<dyn CreditStore>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(processor: Arc<PaymentEventProcessor>, store: Arc<dyn CreditStore>) -> Self {
        Self { processor, store }
    }
}
