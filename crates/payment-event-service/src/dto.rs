//! REST API 请求/响应 DTO 定义

use serde::{Deserialize, Serialize};
use validator::Validate;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

/// 手工调整额度请求
///
/// delta 为有符号额度：正数补发，负数扣减。零值在 handler 中拒绝。
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ManualCreditRequest {
    #[validate(length(min = 1, max = 320, message = "用户标识不能为空且不超过320字符"))]
    pub user_key: String,
    pub delta: i64,
    #[validate(length(min = 1, max = 500, message = "调整原因不能为空且不超过500字符"))]
    pub reason: String,
}

/// 手工调整额度响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualCreditResponse {
    pub entry_id: i64,
    pub balance_after: i64,
    /// 系统生成的调整参考号，写入流水的 catalog_identifier 便于回溯
    pub reference: String,
}

/// webhook 处理结果响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// received | credited | duplicate | ignored
    pub status: String,
}
