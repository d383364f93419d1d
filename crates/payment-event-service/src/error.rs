//! 支付事件服务专用错误类型
//!
//! 错误分类与对提供商的应答语义绑定：
//! - 验签失败 / 报文畸形 -> 4xx，提供商会重试（我们未写入任何状态，重试安全）
//! - 存储层瞬时故障 -> 5xx，提供商会重试（事务未提交，重试安全）
//! - 无法归因（未知价格、无法确定收款人）**不是错误**，由处理器以确认结局
//!   表达，阻止无意义的重投——参见 processor 模块的 ProcessOutcome。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use credit_shared::error::CreditError;

/// 支付事件处理错误
#[derive(Debug, thiserror::Error)]
pub enum PaymentEventError {
    /// 签名头缺失、格式非法或校验不通过。验签失败关闭：
    /// 这类请求绝不能触达账本。
    #[error("签名校验失败")]
    SignatureInvalid,

    /// 报文无法解析为已知的事件信封结构
    #[error("报文解析失败: {0}")]
    MalformedPayload(String),

    /// 参数验证失败（管理接口的请求体校验）
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 用户不存在（余额查询允许，账本为空即余额为 0；此变体用于管理接口）
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 透传共享库错误（数据库等），对提供商表现为可重试的 5xx
    #[error(transparent)]
    Storage(#[from] CreditError),
}

impl PaymentEventError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SignatureInvalid => StatusCode::BAD_REQUEST,
            Self::MalformedPayload(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(e) => e.code(),
        }
    }
}

impl IntoResponse for PaymentEventError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(error = %e, "存储层操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for PaymentEventError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, PaymentEventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PaymentEventError::SignatureInvalid.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PaymentEventError::MalformedPayload("不是 JSON".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PaymentEventError::Storage(CreditError::Internal("x".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_passthrough() {
        let err = PaymentEventError::Storage(CreditError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(err.error_code(), "DATABASE_ERROR");

        assert_eq!(
            PaymentEventError::SignatureInvalid.error_code(),
            "SIGNATURE_INVALID"
        );
    }

    #[test]
    fn test_storage_error_is_retryable_for_provider() {
        // 存储层瞬时故障必须以 5xx 应答，让提供商重投
        let err = PaymentEventError::Storage(CreditError::Database(sqlx::Error::PoolTimedOut));
        assert!(err.status_code().is_server_error());

        // 验签失败是请求方问题，4xx
        assert!(PaymentEventError::SignatureInvalid.status_code().is_client_error());
    }
}
