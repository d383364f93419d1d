//! 支付事件处理服务入口
//!
//! 启动顺序：加载配置 -> 校验（密钥/价目表缺失即拒绝启动）-> 初始化日志
//! -> 连接数据库并执行迁移 -> 组装处理器 -> 启动 HTTP 服务。

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use credit_shared::config::AppConfig;
use credit_shared::database::Database;

use payment_event_service::catalog::Catalog;
use payment_event_service::handlers::{self, health_check};
use payment_event_service::notifier::{HttpPremiumNotifier, NoopNotifier, PremiumNotifier};
use payment_event_service::processor::PaymentEventProcessor;
use payment_event_service::state::AppState;
use payment_event_service::store::PgCreditStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("payment-event-service")
        .map_err(|e| anyhow::anyhow!("配置加载失败: {e}"))?;

    // 硬前提缺失（签名密钥、价目表）直接拒绝启动
    config.validate()?;

    init_tracing(&config);

    info!(
        "Starting payment-event-service on {}",
        config.server_addr()
    );

    // 价目表在启动时一次性构建并全量校验，之后只读注入
    let catalog = Arc::new(Catalog::from_config(&config.catalog)?);

    let db = Database::connect(&config.database).await?;
    sqlx::migrate!("../../migrations").run(db.pool()).await?;

    let store = Arc::new(PgCreditStore::new(db.pool().clone()));

    let notifier: Arc<dyn PremiumNotifier> = if config.premium.enabled {
        Arc::new(HttpPremiumNotifier::new(&config.premium)?)
    } else {
        info!("premium 下游通知未启用");
        Arc::new(NoopNotifier)
    };

    let processor = Arc::new(PaymentEventProcessor::new(
        catalog,
        store.clone(),
        notifier,
        config.webhook.signing_secret.clone(),
    ));

    let state = AppState::new(processor, store);

    let app = Router::new()
        .merge(handlers::routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db;
                move || readiness_check(db_for_ready.clone())
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接并等待已有请求处理完毕。
    // 处理到一半被打断的投递会被提供商重投，由幂等闸门吸收。
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}

/// 初始化结构化日志
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));

    if config.observability.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "payment-event-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
