//! 控制面句柄：外部调用采集引擎的唯一入口
//!
//! 所有调用都「软失败」：引擎不可用时返回默认（空）响应，不向调用方抛错。

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use super::message::{
    ClearResponse, ClearStatus, ControlRequest, ControlResponse, StartResponse, StopResponse,
    StopStatus,
};
use crate::core::{CollectionState, ProgressSnapshot};

/// 发往采集 actor 的调用，每个都带一次性回复通道
#[derive(Debug)]
pub(crate) enum ControlCall {
    Start {
        url: String,
        page_limit: u32,
        reply: oneshot::Sender<StartResponse>,
    },
    Stop {
        reply: oneshot::Sender<StopResponse>,
    },
    Progress {
        reply: oneshot::Sender<ProgressSnapshot>,
    },
    Clear {
        reply: oneshot::Sender<ClearResponse>,
    },
}

/// 可克隆的控制面句柄
#[derive(Debug, Clone)]
pub struct ControlSurface {
    tx: mpsc::Sender<ControlCall>,
}

impl ControlSurface {
    pub(crate) fn new(tx: mpsc::Sender<ControlCall>) -> Self {
        Self { tx }
    }

    /// 采集 actor 是否仍在运行
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// actor 不在时返回 fallback()
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlCall,
        fallback: impl FnOnce() -> T,
    ) -> T {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).await.is_err() {
            tracing::warn!("Collector is not running, returning fallback response");
            return fallback();
        }
        rx.await.unwrap_or_else(|_| {
            tracing::warn!("Collector dropped the reply, returning fallback response");
            fallback()
        })
    }

    /// 开始采集；立即确认，不等待采集完成
    pub async fn start_collection(&self, url: &str, page_limit: u32) -> StartResponse {
        let url = url.to_string();
        self.call(
            |reply| ControlCall::Start {
                url,
                page_limit,
                reply,
            },
            StartResponse::default,
        )
        .await
    }

    /// 停止采集；在 Finishing 完成后返回当前页与已收集的订单号
    pub async fn stop_collection(&self) -> StopResponse {
        self.call(
            |reply| ControlCall::Stop { reply },
            || {
                let idle = CollectionState::new();
                StopResponse {
                    status: StopStatus::Stopped,
                    current_page: idle.current_page,
                    order_numbers: Vec::new(),
                }
            },
        )
        .await
    }

    pub async fn get_progress(&self) -> ProgressSnapshot {
        self.call(
            |reply| ControlCall::Progress { reply },
            || CollectionState::new().snapshot(),
        )
        .await
    }

    pub async fn clear_cache(&self) -> ClearResponse {
        self.call(
            |reply| ControlCall::Clear { reply },
            || ClearResponse {
                status: ClearStatus::Unavailable,
            },
        )
        .await
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::StartCollection { url, page_limit } => {
                ControlResponse::Start(self.start_collection(&url, page_limit).await)
            }
            ControlRequest::StopCollection => ControlResponse::Stop(self.stop_collection().await),
            ControlRequest::GetProgress => ControlResponse::Progress(self.get_progress().await),
            ControlRequest::ClearCache => ControlResponse::Clear(self.clear_cache().await),
        }
    }

    /// 原始消息通道入口：无法解析的请求返回 `{"status":"invalid_request"}`
    pub async fn handle_json(&self, raw: &str) -> Value {
        let request: ControlRequest = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Invalid control request: {}", e);
                return json!({ "status": "invalid_request" });
            }
        };
        let response = self.handle(request).await;
        serde_json::to_value(&response).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize control response: {}", e);
            json!({ "status": "invalid_request" })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StartStatus;

    #[tokio::test]
    async fn test_closed_collector_returns_defaults() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let surface = ControlSurface::new(tx);
        assert!(!surface.is_connected());

        assert_eq!(surface.start_collection("u", 0).await.status, StartStatus::Unavailable);
        let stop = surface.stop_collection().await;
        assert!(stop.order_numbers.is_empty());
        assert_eq!(stop.current_page, 1);
        let progress = surface.get_progress().await;
        assert!(!progress.is_collecting);
        assert_eq!(progress.current_page, 1);
        assert_eq!(surface.clear_cache().await.status, ClearStatus::Unavailable);
        assert_eq!(
            surface.handle_json(r#"{"action":"clearCache"}"#).await,
            json!({"status": "unavailable"})
        );
        assert_eq!(
            surface.handle_json(r#"{"action":"getProgress"}"#).await["currentPage"],
            json!(1)
        );
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (tx, _rx) = mpsc::channel(1);
        let surface = ControlSurface::new(tx);
        assert_eq!(
            surface.handle_json("not json").await,
            json!({"status": "invalid_request"})
        );
        assert_eq!(
            surface.handle_json(r#"{"action":"startCollection"}"#).await,
            json!({"status": "invalid_request"})
        );
    }
}
