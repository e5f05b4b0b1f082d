use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::state::AppState;
use crate::{health, scheduler, webhook};

/// GitHub 推送事件的请求体上限为 25MB
const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook::receive))
        .route("/health", get(health::health_check))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}

/// 启动定时任务与 HTTP 服务，直到收到退出信号
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let jobs = scheduler::spawn_all(&state);

    let addr = state.config.bind_address.clone();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::error!("监听地址 {addr} 已被占用");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!("Webhook 服务启动：http://{addr}/webhook");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for job in jobs {
        job.abort();
    }
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("监听 Ctrl+C 失败：{e}");
            std::future::pending::<()>().await;
        }
    };

    // 容器环境下通过 SIGTERM 停止
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("监听 SIGTERM 失败：{e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("收到退出信号，正在停止服务");
}
