//! HTTP 处理器与路由
//!
//! webhook 入口必须以原始字节接收请求体（`Bytes` 而非 `Json` 提取器），
//! 验签针对投递的确切字节进行；任何先解析再序列化的做法都会破坏签名。

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::balance::compute_balance;
use crate::dto::{ApiResponse, ManualCreditRequest, ManualCreditResponse, WebhookResponse};
use crate::error::PaymentEventError;
use crate::models::{Balance, LedgerEntry};
use crate::processor::ProcessOutcome;
use crate::state::AppState;

/// 支付服务商投递签名的请求头
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// 构建服务路由
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/payment", post(payment_webhook))
        .route("/api/users/{user_key}/balance", get(user_balance))
        .route("/api/admin/credits/manual", post(manual_credit))
}

/// 接收支付事件投递
///
/// POST /webhooks/payment
///
/// 三种确认结局（入账/重复/忽略）都应答 200，提供商停止重投；
/// 验签失败 400、存储故障 500 由 `PaymentEventError` 的响应映射承担。
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, PaymentEventError> {
    // 缺失签名头与签名不合法同等对待：失败关闭
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(PaymentEventError::SignatureInvalid)?;

    let outcome = state.processor.process(&body, signature).await?;

    let status = match outcome {
        ProcessOutcome::Credited { .. } => "credited",
        ProcessOutcome::Duplicate { .. } => "duplicate",
        ProcessOutcome::Acknowledged { .. } => "ignored",
    };

    Ok(Json(WebhookResponse {
        status: status.to_string(),
    }))
}

/// 查询用户当前可用余额
///
/// GET /api/users/{user_key}/balance
///
/// 每次从账本全量重算：人工修正落账后立即生效，无缓存失效问题。
/// 账本为空的用户余额为 0，不视为错误。
pub async fn user_balance(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
) -> Result<Json<ApiResponse<Balance>>, PaymentEventError> {
    let entries = state.store.entries_for_user(&user_key).await?;
    let as_of = Utc::now();

    let balance = Balance {
        amount: compute_balance(&entries, as_of),
        user_key,
        as_of,
    };

    Ok(Json(ApiResponse::success(balance)))
}

/// 手工调整用户额度
///
/// POST /api/admin/credits/manual
///
/// 以 source = "manual" 追加流水，带系统生成的参考号便于回溯。
/// 不经过幂等闸门——运营操作的去重由人与参考号承担。
pub async fn manual_credit(
    State(state): State<AppState>,
    Json(req): Json<ManualCreditRequest>,
) -> Result<Json<ApiResponse<ManualCreditResponse>>, PaymentEventError> {
    req.validate()?;

    if req.delta == 0 {
        return Err(PaymentEventError::Validation(
            "delta 不能为 0".to_string(),
        ));
    }

    let reference = Uuid::new_v4().to_string();
    let now = Utc::now();
    let entry = LedgerEntry::manual(req.user_key.clone(), req.delta, reference.clone(), now);

    let entry_id = state.store.append_manual(&entry).await?;

    let entries = state.store.entries_for_user(&req.user_key).await?;
    let balance_after = compute_balance(&entries, now);

    info!(
        user_key = %req.user_key,
        delta = req.delta,
        reference = %reference,
        reason = %req.reason,
        entry_id,
        balance_after,
        "手工额度调整完成"
    );

    Ok(Json(ApiResponse::success(ManualCreditResponse {
        entry_id,
        balance_after,
        reference,
    })))
}

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "payment-event-service"
    }))
}
