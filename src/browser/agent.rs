//! 页面代理（Page Agent）契约
//!
//! 代理运行在被控标签页内：提取一页订单号、点击「下一页」、抓取单个订单发票。
//! 返回结构与消息通道上的 JSON 一致（camelCase）。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::TabId;
use crate::core::AgentFailure;
use crate::export::OrderInvoice;

/// collectOrderNumbers 的响应：一页订单号、附加字段（订单号 -> 标题）与是否有下一页
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub order_numbers: Vec<String>,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl OrderPage {
    pub fn new<I, S>(order_numbers: I, has_next_page: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            order_numbers: order_numbers.into_iter().map(Into::into).collect(),
            additional_fields: BTreeMap::new(),
            has_next_page,
        }
    }

    pub fn with_field(mut self, order_number: &str, label: &str) -> Self {
        self.additional_fields
            .insert(order_number.to_string(), label.to_string());
        self
    }
}

/// clickNextButton 的响应
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickResult {
    pub success: bool,
}

/// 页面代理 trait
#[async_trait]
pub trait PageAgent: Send + Sync {
    /// 等待订单卡片渲染后提取当前页订单号
    async fn collect_order_numbers(&self, tab: TabId) -> Result<OrderPage, AgentFailure>;

    /// 点击分页控件的「下一页」
    async fn click_next_button(&self, tab: TabId) -> Result<ClickResult, AgentFailure>;

    /// 在订单详情页抓取发票数据
    async fn scrape_invoice(&self, tab: TabId) -> Result<OrderInvoice, AgentFailure>;

    /// 屏蔽图片加载以加速详情页；默认无操作
    async fn block_images(&self, _tab: TabId) -> Result<(), AgentFailure> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_page_wire_format() {
        let raw = r#"{"orderNumbers":["A","B"],"additionalFields":{"A":"Delivered Jan 2"},"hasNextPage":true}"#;
        let page: OrderPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.order_numbers, vec!["A", "B"]);
        assert_eq!(page.additional_fields.get("A").map(String::as_str), Some("Delivered Jan 2"));
        assert!(page.has_next_page);
    }

    #[test]
    fn test_order_page_missing_optional_fields() {
        let page: OrderPage = serde_json::from_str(r#"{"orderNumbers":[]}"#).unwrap();
        assert!(page.additional_fields.is_empty());
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_order_page_requires_order_numbers() {
        assert!(serde_json::from_str::<OrderPage>(r#"{"hasNextPage":true}"#).is_err());
    }
}
