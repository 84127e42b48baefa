//! 采集状态：累计订单号、页游标、重试计数与页级缓存
//!
//! CollectionState 只由采集 actor 持有和修改；对外只暴露 ProgressSnapshot 投影。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::browser::{OrderPage, TabId};

/// 单页缓存记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub has_next_page: bool,
    pub order_numbers: Vec<String>,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
    /// 写入时间（Unix 毫秒），落盘字段名为 `timestamp`
    #[serde(rename = "timestamp", alias = "cachedAt")]
    pub cached_at: i64,
}

impl PageRecord {
    pub fn from_page(page: &OrderPage, cached_at: i64) -> Self {
        Self {
            has_next_page: page.has_next_page,
            order_numbers: page.order_numbers.clone(),
            additional_fields: page.additional_fields.clone(),
            cached_at,
        }
    }
}

/// 一轮或多轮采集的内存状态
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub order_numbers: BTreeSet<String>,
    /// 订单号 -> 附加信息（如订单标题），后写覆盖
    pub additional_fields: BTreeMap<String, String>,
    /// 1 起始的页游标，单轮内只增不减
    pub current_page: u32,
    pub is_collecting: bool,
    pub active_tab: Option<TabId>,
    pub retry_count: u32,
    /// 0 表示不限页数
    pub page_limit: u32,
    pub pages_cached: BTreeMap<u32, PageRecord>,
    /// 最近一次完整持久化的时间
    pub cache_timestamp: Option<i64>,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            order_numbers: BTreeSet::new(),
            additional_fields: BTreeMap::new(),
            current_page: 1,
            is_collecting: false,
            active_tab: None,
            retry_count: 0,
            page_limit: 0,
            pages_cached: BTreeMap::new(),
            cache_timestamp: None,
        }
    }
}

impl CollectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新一轮开始：重置游标与重试计数，保留累计结果
    pub fn reset(&mut self) {
        self.current_page = 1;
        self.retry_count = 0;
    }

    /// 清空累计结果与页缓存（用户清缓存或缓存过期）
    pub fn clear_all(&mut self) {
        self.order_numbers.clear();
        self.additional_fields.clear();
        self.pages_cached.clear();
    }

    /// 将一页结果并入累计集合，并写入当前页的缓存记录
    pub fn record_page(&mut self, page: &OrderPage, now_ms: i64) {
        self.order_numbers
            .extend(page.order_numbers.iter().cloned());
        self.additional_fields.extend(
            page.additional_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.pages_cached
            .insert(self.current_page, PageRecord::from_page(page, now_ms));
    }

    /// 命中页缓存时把该页记录并回累计集合（不改写记录本身），返回其 has_next_page；
    /// 已有的附加字段不被旧记录覆盖
    pub fn merge_cached_page(&mut self, page: u32) -> Option<bool> {
        let record = self.pages_cached.get(&page)?;
        self.order_numbers
            .extend(record.order_numbers.iter().cloned());
        for (k, v) in &record.additional_fields {
            self.additional_fields
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        Some(record.has_next_page)
    }

    /// 当前页是否还在页数上限以内
    pub fn within_limit(&self) -> bool {
        self.page_limit == 0 || self.current_page <= self.page_limit
    }

    /// 有下一页且上限允许再前进一页
    pub fn can_advance(&self, has_next_page: bool) -> bool {
        has_next_page && (self.page_limit == 0 || self.current_page < self.page_limit)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current_page: self.current_page,
            page_limit: self.page_limit,
            order_numbers: self.order_numbers.iter().cloned().collect(),
            additional_fields: self.additional_fields.clone(),
            is_collecting: self.is_collecting,
            pages_cached: self.pages_cached.clone(),
        }
    }
}

/// 对外的进度快照（getProgress 的数据来源）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub current_page: u32,
    pub page_limit: u32,
    pub order_numbers: Vec<String>,
    pub additional_fields: BTreeMap<String, String>,
    pub is_collecting: bool,
    pub pages_cached: BTreeMap<u32, PageRecord>,
}
