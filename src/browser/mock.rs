//! 脚本化浏览器（用于测试，无需 Chrome）
//!
//! 同时实现 TabDriver 与 PageAgent：按页号返回预设的订单页，可注入失败、挂起与标签页关闭，
//! 并记录所有调用，便于断言「哪些页被请求过」。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::browser::{ClickResult, OrderPage, PageAgent, TabDriver, TabEvent, TabId};
use crate::core::{AgentFailure, TabError};
use crate::export::OrderInvoice;

#[derive(Debug, Default)]
struct Script {
    pages: HashMap<u32, OrderPage>,
    /// 页号 -> 剩余失败次数
    extract_failures: HashMap<u32, u32>,
    always_fail: HashSet<u32>,
    hang_pages: HashSet<u32>,
    /// 提取这些页时等待 release_gate 后才返回
    gated_pages: HashSet<u32>,
    /// 提取这些页时标签页被关闭
    closing_pages: HashSet<u32>,
    click_failures: u32,
    fail_open: bool,
    invoices: HashMap<String, OrderInvoice>,
    hang_urls: HashSet<String>,

    /// 标签页当前显示的页号
    shown_page: u32,
    open_tabs: HashSet<TabId>,
    tab_urls: HashMap<TabId, String>,

    extract_calls: Vec<u32>,
    click_calls: Vec<u32>,
    opened_urls: Vec<String>,
    navigations: Vec<String>,
    closed_tabs: Vec<TabId>,
    scrape_calls: Vec<String>,
    blocked_images: u32,
}

#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    script: Mutex<Script>,
    next_tab: AtomicU32,
    gate: Notify,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 第 page 页的内容
    pub fn with_page(self, page: u32, content: OrderPage) -> Self {
        self.script().pages.insert(page, content);
        self
    }

    /// 第 page 页前 times 次提取失败
    pub fn failing_page(self, page: u32, times: u32) -> Self {
        self.script().extract_failures.insert(page, times);
        self
    }

    pub fn always_failing_page(self, page: u32) -> Self {
        self.script().always_fail.insert(page);
        self
    }

    /// 第 page 页的提取永不返回
    pub fn hanging_page(self, page: u32) -> Self {
        self.script().hang_pages.insert(page);
        self
    }

    /// 第 page 页的提取挂起，直到调用 release_gate
    pub fn gated_page(self, page: u32) -> Self {
        self.script().gated_pages.insert(page);
        self
    }

    /// 放行一次被挂起的提取（先放行后等待也有效）
    pub fn release_gate(&self) {
        self.gate.notify_one();
    }

    /// 提取第 page 页时标签页被用户关闭
    pub fn closing_on_page(self, page: u32) -> Self {
        self.script().closing_pages.insert(page);
        self
    }

    /// 接下来 times 次翻页点击被拒绝
    pub fn failing_clicks(self, times: u32) -> Self {
        self.script().click_failures = times;
        self
    }

    pub fn failing_open(self) -> Self {
        self.script().fail_open = true;
        self
    }

    /// 导航到 url 后 scrape_invoice 返回的数据
    pub fn with_invoice(self, url: &str, invoice: OrderInvoice) -> Self {
        self.script().invoices.insert(url.to_string(), invoice);
        self
    }

    /// 在 url 上 scrape_invoice 永不返回
    pub fn hanging_url(self, url: &str) -> Self {
        self.script().hang_urls.insert(url.to_string());
        self
    }

    /// 模拟用户关闭所有标签页
    pub fn simulate_tab_closed(&self) {
        self.script().open_tabs.clear();
    }

    /// 提取调用时标签页所在的页号，按调用顺序
    pub fn extract_calls(&self) -> Vec<u32> {
        self.script().extract_calls.clone()
    }

    /// 成功点击「下一页」后到达的页号
    pub fn click_calls(&self) -> Vec<u32> {
        self.script().click_calls.clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.script().opened_urls.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.script().navigations.clone()
    }

    pub fn closed_tabs(&self) -> Vec<TabId> {
        self.script().closed_tabs.clone()
    }

    pub fn scrape_calls(&self) -> Vec<String> {
        self.script().scrape_calls.clone()
    }

    pub fn blocked_images(&self) -> u32 {
        self.script().blocked_images
    }

    pub fn open_tab_count(&self) -> usize {
        self.script().open_tabs.len()
    }
}

#[async_trait]
impl TabDriver for ScriptedBrowser {
    async fn open(&self, url: &str) -> Result<TabId, TabError> {
        let mut script = self.script();
        script.opened_urls.push(url.to_string());
        if script.fail_open {
            return Err(TabError::CreateFailed("scripted failure".into()));
        }
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::SeqCst) + 1);
        script.open_tabs.insert(tab);
        script.tab_urls.insert(tab, url.to_string());
        script.shown_page = 1;
        Ok(tab)
    }

    async fn navigate(&self, tab: TabId, url: &str) -> Result<(), TabError> {
        let mut script = self.script();
        if !script.open_tabs.contains(&tab) {
            return Err(TabError::AlreadyClosed);
        }
        script.navigations.push(url.to_string());
        script.tab_urls.insert(tab, url.to_string());
        Ok(())
    }

    async fn wait_for_load(&self, tab: TabId) -> Result<TabEvent, TabError> {
        if self.script().open_tabs.contains(&tab) {
            Ok(TabEvent::Loaded)
        } else {
            Ok(TabEvent::Closed)
        }
    }

    async fn close(&self, tab: TabId) -> Result<(), TabError> {
        let mut script = self.script();
        if !script.open_tabs.remove(&tab) {
            return Err(TabError::AlreadyClosed);
        }
        script.closed_tabs.push(tab);
        Ok(())
    }
}

#[async_trait]
impl PageAgent for ScriptedBrowser {
    async fn collect_order_numbers(&self, tab: TabId) -> Result<OrderPage, AgentFailure> {
        let (hang, gated) = {
            let mut script = self.script();
            if !script.open_tabs.contains(&tab) {
                return Err(AgentFailure::TabClosed);
            }
            let page = script.shown_page;
            script.extract_calls.push(page);

            if script.closing_pages.contains(&page) {
                script.open_tabs.clear();
                return Err(AgentFailure::TabClosed);
            } else if script.hang_pages.contains(&page) {
                (true, None)
            } else if script.gated_pages.contains(&page) {
                (false, script.pages.get(&page).cloned())
            } else if script.always_fail.contains(&page) {
                return Err(AgentFailure::NoResponse);
            } else {
                if let Some(left) = script.extract_failures.get_mut(&page) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(AgentFailure::Agent("order cards not found".into()));
                    }
                }
                return script
                    .pages
                    .get(&page)
                    .cloned()
                    .ok_or_else(|| AgentFailure::Agent(format!("no script for page {page}")));
            }
        };
        if hang {
            futures_util::future::pending::<()>().await;
        }
        self.gate.notified().await;
        gated.ok_or(AgentFailure::NoResponse)
    }

    async fn click_next_button(&self, tab: TabId) -> Result<ClickResult, AgentFailure> {
        let mut script = self.script();
        if !script.open_tabs.contains(&tab) {
            return Err(AgentFailure::TabClosed);
        }
        if script.click_failures > 0 {
            script.click_failures -= 1;
            return Ok(ClickResult { success: false });
        }
        script.shown_page += 1;
        let page = script.shown_page;
        script.click_calls.push(page);
        Ok(ClickResult { success: true })
    }

    async fn scrape_invoice(&self, tab: TabId) -> Result<OrderInvoice, AgentFailure> {
        let (hang, result) = {
            let mut script = self.script();
            if !script.open_tabs.contains(&tab) {
                return Err(AgentFailure::TabClosed);
            }
            let url = script.tab_urls.get(&tab).cloned().unwrap_or_default();
            script.scrape_calls.push(url.clone());
            let result = script
                .invoices
                .get(&url)
                .cloned()
                .ok_or_else(|| AgentFailure::Agent(format!("no order data at {url}")));
            (script.hang_urls.contains(&url), result)
        };
        if hang {
            futures_util::future::pending::<()>().await;
        }
        result
    }

    async fn block_images(&self, _tab: TabId) -> Result<(), AgentFailure> {
        self.script().blocked_images += 1;
        Ok(())
    }
}
