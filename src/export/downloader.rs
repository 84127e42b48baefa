//! 发票批量下载：复用一个后台标签页，逐个打开订单详情页并抓取发票数据
//!
//! 每个订单先查 InvoiceCache；未命中时依次尝试两种详情页 URL（带/不带 `?storePurchase=true`），
//! 单次尝试受超时约束。两种 URL 都失败的订单记入 DownloadReport::failed。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::browser::{PageAgent, TabDriver, TabEvent, TabId};
use crate::cache::InvoiceCache;
use crate::config::ExportSection;
use crate::core::{AgentFailure, Clock, TabError};
use crate::export::OrderInvoice;

/// 不少于该长度的订单号通常是门店订单，优先尝试 storePurchase 详情页
const STORE_PURCHASE_MIN_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Tab(#[from] TabError),

    #[error(transparent)]
    Agent(#[from] AgentFailure),
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// 订单列表页，详情页为 `<orders_url>/<订单号>`
    pub orders_url: String,
    pub settle_delay: Duration,
    pub inter_order_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from_config(&ExportSection::default())
    }
}

impl DownloadSettings {
    pub fn from_config(section: &ExportSection) -> Self {
        Self {
            orders_url: section.orders_url.trim_end_matches('/').to_string(),
            settle_delay: Duration::from_millis(section.settle_delay_ms),
            inter_order_delay: Duration::from_millis(section.inter_order_delay_ms),
            attempt_timeout: Duration::from_secs(section.download_timeout_secs),
        }
    }
}

/// 一次批量下载的结果
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// 按请求顺序排列的成功结果
    pub invoices: Vec<OrderInvoice>,
    pub failed: Vec<String>,
    /// 其中命中缓存的数量
    pub from_cache: usize,
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// 详情页候选 URL，按尝试顺序
pub fn candidate_urls(orders_url: &str, order_number: &str) -> [String; 2] {
    let plain = format!("{orders_url}/{order_number}");
    let store = format!("{plain}?storePurchase=true");
    if order_number.len() >= STORE_PURCHASE_MIN_LEN {
        [store, plain]
    } else {
        [plain, store]
    }
}

pub struct InvoiceDownloader {
    tabs: Arc<dyn TabDriver>,
    agent: Arc<dyn PageAgent>,
    cache: InvoiceCache,
    clock: Arc<dyn Clock>,
    settings: DownloadSettings,
}

impl InvoiceDownloader {
    pub fn new(
        tabs: Arc<dyn TabDriver>,
        agent: Arc<dyn PageAgent>,
        cache: InvoiceCache,
        clock: Arc<dyn Clock>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            tabs,
            agent,
            cache,
            clock,
            settings,
        }
    }

    /// 顺序下载；每个订单开始前检查取消
    pub async fn download(
        &self,
        order_numbers: &[String],
        cancel: &CancellationToken,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        let mut tab: Option<TabId> = None;

        for (i, order_number) in order_numbers.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(done = i, total = order_numbers.len(), "Invoice download cancelled");
                report.cancelled = true;
                break;
            }
            if i > 0 {
                self.clock.sleep(self.settings.inter_order_delay).await;
            }
            tracing::info!("Downloading order {} ({}/{})", order_number, i + 1, order_numbers.len());

            if let Some(invoice) = self.cache.get(order_number).await {
                tracing::debug!(order_number, "Using cached invoice");
                report.from_cache += 1;
                report.invoices.push(invoice);
                continue;
            }

            match self.fetch(&mut tab, order_number).await {
                Some(invoice) => {
                    self.cache.put(order_number, &invoice).await;
                    report.invoices.push(invoice);
                }
                None => {
                    tracing::warn!(order_number, "Failed to download invoice");
                    report.failed.push(order_number.clone());
                }
            }
        }

        if let Some(tab) = tab {
            match self.tabs.close(tab).await {
                Ok(()) | Err(TabError::AlreadyClosed) => {}
                Err(e) => tracing::warn!(%tab, "Failed to close download tab: {}", e),
            }
        }

        tracing::info!(
            downloaded = report.invoices.len(),
            cached = report.from_cache,
            failed = report.failed.len(),
            "Invoice download finished"
        );
        report
    }

    async fn fetch(&self, tab: &mut Option<TabId>, order_number: &str) -> Option<OrderInvoice> {
        for (attempt, url) in candidate_urls(&self.settings.orders_url, order_number)
            .iter()
            .enumerate()
        {
            let result =
                match tokio::time::timeout(self.settings.attempt_timeout, self.attempt(tab, url))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => Err(DownloadError::Timeout(self.settings.attempt_timeout)),
                };
            match result {
                Ok(mut invoice) => {
                    if invoice.order_number.is_empty() {
                        invoice.order_number = order_number.to_string();
                    }
                    return Some(invoice);
                }
                Err(e) => tracing::warn!(order_number, attempt = attempt + 1, %url, "Attempt failed: {}", e),
            }
        }
        None
    }

    async fn attempt(&self, tab: &mut Option<TabId>, url: &str) -> Result<OrderInvoice, DownloadError> {
        let current = match *tab {
            Some(t) => match self.tabs.navigate(t, url).await {
                Ok(()) => t,
                Err(e) => {
                    tracing::debug!(%t, "Download tab unusable ({}), opening a new one", e);
                    self.tabs.open(url).await?
                }
            },
            None => self.tabs.open(url).await?,
        };
        *tab = Some(current);

        if self.tabs.wait_for_load(current).await? == TabEvent::Closed {
            *tab = None;
            return Err(AgentFailure::TabClosed.into());
        }

        if let Err(e) = self.agent.block_images(current).await {
            tracing::debug!("Blocking images failed: {}", e);
        }
        self.clock.sleep(self.settings.settle_delay).await;

        Ok(self.agent.scrape_invoice(current).await?)
    }
}
