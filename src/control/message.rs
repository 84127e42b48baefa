//! 控制面消息协议
//!
//! 请求按 `action` 字段区分（camelCase），每个命令有独立的响应类型。

use serde::{Deserialize, Serialize};

use crate::core::ProgressSnapshot;

/// UI（侧边栏 / 弹窗 / CLI）发往采集引擎的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    StartCollection {
        url: String,
        /// 0 表示不限页数
        #[serde(default, rename = "pageLimit")]
        page_limit: u32,
    },
    StopCollection,
    GetProgress,
    ClearCache,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    /// 已有一轮在进行，本次请求被忽略
    AlreadyRunning,
    /// 采集 actor 已退出
    #[default]
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub status: StartStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    #[default]
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub status: StopStatus,
    pub current_page: u32,
    pub order_numbers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearStatus {
    #[default]
    CacheCleared,
    /// 采集 actor 已退出，未做任何清除
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResponse {
    pub status: ClearStatus,
}

/// getProgress 的响应即进度快照
pub type ProgressResponse = ProgressSnapshot;

/// 任一命令的响应（原始 JSON 通道使用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Start(StartResponse),
    Stop(StopResponse),
    Progress(ProgressResponse),
    Clear(ClearResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parsing() {
        let req: ControlRequest = serde_json::from_value(json!({
            "action": "startCollection",
            "url": "https://www.walmart.com/orders",
            "pageLimit": 2
        }))
        .unwrap();
        assert_eq!(
            req,
            ControlRequest::StartCollection {
                url: "https://www.walmart.com/orders".into(),
                page_limit: 2
            }
        );

        let req: ControlRequest =
            serde_json::from_value(json!({"action": "startCollection", "url": "u"})).unwrap();
        assert_eq!(req, ControlRequest::StartCollection { url: "u".into(), page_limit: 0 });

        for (action, expected) in [
            ("stopCollection", ControlRequest::StopCollection),
            ("getProgress", ControlRequest::GetProgress),
            ("clearCache", ControlRequest::ClearCache),
        ] {
            let req: ControlRequest = serde_json::from_value(json!({ "action": action })).unwrap();
            assert_eq!(req, expected);
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_value::<ControlRequest>(json!({"action": "explode"})).is_err());
        assert!(serde_json::from_value::<ControlRequest>(json!({"method": "getProgress"})).is_err());
    }

    #[test]
    fn test_response_shapes() {
        let start = serde_json::to_value(StartResponse { status: StartStatus::AlreadyRunning }).unwrap();
        assert_eq!(start, json!({"status": "already_running"}));

        let stop = serde_json::to_value(StopResponse {
            status: StopStatus::Stopped,
            current_page: 3,
            order_numbers: vec!["A".into()],
        })
        .unwrap();
        assert_eq!(stop, json!({"status": "stopped", "currentPage": 3, "orderNumbers": ["A"]}));

        let clear = serde_json::to_value(ControlResponse::Clear(ClearResponse::default())).unwrap();
        assert_eq!(clear, json!({"status": "cache_cleared"}));
    }
}
