pub mod signature;

use crate::build::{BranchTarget, DispatchMode, TriggerSource};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use serde::Deserialize;
use std::sync::Arc;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// 推送事件中唯一关心的字段；ping 等其它事件没有 `ref`
#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: Option<serde_json::Value>,
}

/// 表单格式的投递：JSON 放在 `payload` 字段里
#[derive(Debug, Deserialize)]
struct FormDelivery {
    payload: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum PayloadError {
    #[error("请求体不是有效的 JSON：{0}")]
    Json(#[from] serde_json::Error),

    #[error("表单解析失败：{0}")]
    Form(#[from] serde_urlencoded::de::Error),

    #[error("表单缺少 payload 字段")]
    MissingFormPayload,
}

/// 推送事件入口
///
/// 签名校验失败返回 400；通过校验后一律返回 200，构建结果只通过邮件和日志体现。
/// 同步目标在构建完成后才响应，异步目标在后台执行。
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Err(e) = signature::verify(state.config.webhook_secret.as_bytes(), &headers, &body) {
        tracing::warn!("Webhook 签名校验失败：{e}");
        return StatusCode::BAD_REQUEST;
    }

    tracing::info!(
        event = header_str(&headers, EVENT_HEADER),
        delivery = header_str(&headers, DELIVERY_HEADER),
        "收到 Webhook 事件"
    );

    let event = match decode_payload(&headers, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("无法解析 Webhook 请求体：{e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some(git_ref) = event.git_ref.as_ref().and_then(serde_json::Value::as_str) else {
        tracing::debug!("事件不包含字符串类型的 ref 字段，忽略");
        return StatusCode::OK;
    };

    let branch = branch_from_ref(git_ref);
    match state.config.target_for_branch(branch) {
        Some(target) => dispatch(&state, target.clone()).await,
        None => tracing::info!("没有需要构建的分支：{branch}"),
    }

    StatusCode::OK
}

/// 签名覆盖原始请求体，解码放在校验之后
fn decode_payload(headers: &HeaderMap, body: &[u8]) -> Result<PushEvent, PayloadError> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

    if is_form {
        let form: FormDelivery = serde_urlencoded::from_bytes(body)?;
        let payload = form.payload.ok_or(PayloadError::MissingFormPayload)?;
        Ok(serde_json::from_str(&payload)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}

/// 构建总在独立任务中执行：客户端断开导致请求被取消时，构建仍会跑完并发送通知。
/// 同步目标等待该任务结束后再响应。
async fn dispatch(state: &AppState, target: BranchTarget) {
    let mode = target.webhook_dispatch;
    let deployer = Arc::clone(&state.deployer);
    let build = tokio::spawn(async move {
        deployer.attempt_build(TriggerSource::Webhook, &target).await;
    });

    if mode == DispatchMode::Sync
        && let Err(e) = build.await
    {
        tracing::error!("构建任务异常退出：{e}");
    }
}

/// `refs/heads/main` -> `main`，取最后一个 `/` 之后的部分
pub fn branch_from_ref(git_ref: &str) -> &str {
    let trimmed = git_ref.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}
