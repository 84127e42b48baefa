//! 基于 headless_chrome 的标签页驱动与页面代理
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! headless_chrome 是同步 API，所有调用都放进 spawn_blocking。
//! 页面内逻辑（等待元素、提取订单卡片、点击下一页、抓取发票）以注入脚本实现，脚本返回 JSON 字符串。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;

use crate::browser::{ClickResult, OrderPage, PageAgent, TabDriver, TabEvent, TabId};
use crate::config::BrowserSection;
use crate::core::{AgentFailure, TabError};
use crate::export::OrderInvoice;

/// 脚本共用的 waitForElement：超时抛出 "not found after"
const WAIT_FOR_ELEMENT_JS: &str = r#"
async function waitForElement(selector) {
  const start = Date.now();
  while (Date.now() - start < __TIMEOUT__) {
    const el = document.querySelector(selector);
    if (el) return el;
    await new Promise((r) => setTimeout(r, __POLL__));
  }
  throw new Error(`Element ${selector} not found after __TIMEOUT__ms`);
}
"#;

const COLLECT_ORDERS_JS: &str = r#"
(async () => {
  __WAIT__
  try {
    await waitForElement('h1');
    await waitForElement('[data-testid^="order-"]');
  } catch (e) {
    if (String(e.message).includes('not found after')) {
      return JSON.stringify({ orderNumbers: [], additionalFields: {}, hasNextPage: false });
    }
    throw e;
  }
  const orderNumbers = [];
  const additionalFields = {};
  document.querySelectorAll('[data-testid^="order-"]').forEach((card) => {
    const title = card.querySelector('h2');
    const button = card.querySelector('button[data-automation-id^="view-order-details-link-"]');
    if (title && button) {
      const num = button.getAttribute('data-automation-id').replace('view-order-details-link-', '');
      if (num) {
        orderNumbers.push(num);
        additionalFields[num] = title.textContent.trim();
      }
    }
  });
  const hasNextPage = !!document.querySelector('button[aria-label="Next Page"]');
  return JSON.stringify({ orderNumbers, additionalFields, hasNextPage });
})()
"#;

const CLICK_NEXT_JS: &str = r#"
(async () => {
  __WAIT__
  try {
    await waitForElement('h1');
    const next = await waitForElement('button[aria-label="Next Page"]');
    next.click();
    return JSON.stringify({ success: true });
  } catch (e) {
    return JSON.stringify({ success: false });
  }
})()
"#;

const BLOCK_IMAGES_JS: &str = r#"
(() => {
  const style = document.createElement('style');
  style.textContent = 'img, picture, video { display: none !important; }';
  document.head.appendChild(style);
  document.querySelectorAll('img, picture').forEach((el) => el.remove());
  return 'ok';
})()
"#;

const SCRAPE_INVOICE_JS: &str = r#"
(async () => {
  __WAIT__
  await waitForElement('.print-bill-item, .print-items-list');
  const text = (root, sel) => root.querySelector(sel)?.innerText?.trim() || '';
  const items = [];
  document.querySelectorAll('.print-bill-item').forEach((item) => {
    const productName = text(item, '.print-item-title');
    let productLink = 'N/A';
    for (const visible of document.querySelectorAll('[data-testid="productName"]')) {
      if (visible.innerText.trim() === productName) {
        const link = visible.closest('[data-testid="itemStack"]')?.querySelector('a[link-identifier]');
        if (link) { productLink = link.href; break; }
      }
    }
    items.push({
      productName,
      productLink,
      deliveryStatus: text(item, '.print-bill-type') || 'Delivery',
      quantity: text(item, '.print-bill-qty'),
      price: text(item, '.print-bill-price'),
    });
  });
  let orderNumber = '';
  for (const sel of ['.order-number-bar', '[data-testid="orderInfoCard"]', 'h1', '.print-bill-id']) {
    const m = (document.querySelector(sel)?.textContent || '').match(/#\s*([\d-]+)/);
    if (m) { orderNumber = m[1]; break; }
  }
  let tax = '$0.00';
  for (const el of document.querySelectorAll('.print-fees-item')) {
    if (el.textContent.includes('Tax')) {
      const amount = el.querySelector('.ml2');
      if (amount) { tax = amount.innerText; break; }
    }
  }
  return JSON.stringify({
    orderNumber,
    orderDate: text(document, '.print-bill-date').replace('order', '').trim(),
    orderTotal: text(document, '.bill-order-total-payment'),
    deliveryCharges: text(document, '.print-delivery-charges') || '$0.00',
    tax,
    tip: text(document, '.print-bill-payment-section .tip-amount') || '$0.00',
    items,
  });
})()
"#;

struct Inner {
    browser: Browser,
    tabs: Mutex<HashMap<TabId, Arc<Tab>>>,
    next_id: AtomicU32,
    wait_js: String,
}

/// headless Chrome 浏览器：同时是 TabDriver 和 PageAgent
#[derive(Clone)]
pub struct HeadlessBrowser {
    inner: Arc<Inner>,
}

impl HeadlessBrowser {
    pub fn launch(section: &BrowserSection) -> Result<Self, TabError> {
        let options = LaunchOptions::default_builder()
            .headless(section.headless)
            .build()
            .map_err(|e| TabError::Driver(format!("Invalid launch options: {}", e)))?;
        let browser =
            Browser::new(options).map_err(|e| TabError::Driver(format!("Chrome launch failed: {}", e)))?;
        tracing::info!(headless = section.headless, "Chrome launched");

        let wait_js = WAIT_FOR_ELEMENT_JS
            .replace("__TIMEOUT__", &section.element_timeout_ms.to_string())
            .replace("__POLL__", &section.poll_interval_ms.to_string());

        Ok(Self {
            inner: Arc::new(Inner {
                browser,
                tabs: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(1),
                wait_js,
            }),
        })
    }

    fn tab(&self, id: TabId) -> Option<Arc<Tab>> {
        self.inner
            .tabs
            .lock()
            .ok()
            .and_then(|tabs| tabs.get(&id).cloned())
    }

    fn script(&self, template: &str) -> String {
        template.replace("__WAIT__", &self.inner.wait_js)
    }

    /// 在标签页中执行脚本，脚本须返回 JSON 字符串
    async fn eval_json<T>(&self, id: TabId, js: String) -> Result<T, AgentFailure>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tab = self.tab(id).ok_or(AgentFailure::TabClosed)?;
        let raw = tokio::task::spawn_blocking(move || {
            tab.evaluate(&js, true)
                .map(|obj| obj.value)
                .map_err(|e| AgentFailure::Agent(e.to_string()))
        })
        .await
        .map_err(|e| AgentFailure::Agent(format!("Task join: {}", e)))??;

        let text = raw
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or(AgentFailure::NoResponse)?;
        serde_json::from_str(text).map_err(|e| AgentFailure::Malformed(e.to_string()))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, TabError>
    where
        F: FnOnce() -> Result<T, TabError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| TabError::Driver(format!("Task join: {}", e)))?
    }
}

#[async_trait]
impl TabDriver for HeadlessBrowser {
    async fn open(&self, url: &str) -> Result<TabId, TabError> {
        let inner = self.inner.clone();
        let url = url.to_string();
        let tab = self
            .blocking(move || {
                let tab = inner
                    .browser
                    .new_tab()
                    .map_err(|e| TabError::CreateFailed(e.to_string()))?;
                tab.navigate_to(&url)
                    .map_err(|e| TabError::NavigationFailed(e.to_string()))?;
                Ok(tab)
            })
            .await?;

        let id = TabId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .tabs
            .lock()
            .map_err(|_| TabError::Driver("tab registry poisoned".into()))?
            .insert(id, tab);
        tracing::debug!(%id, "Tab opened");
        Ok(id)
    }

    async fn navigate(&self, id: TabId, url: &str) -> Result<(), TabError> {
        let tab = self.tab(id).ok_or(TabError::AlreadyClosed)?;
        let url = url.to_string();
        self.blocking(move || {
            tab.navigate_to(&url)
                .map(|_| ())
                .map_err(|e| TabError::NavigationFailed(e.to_string()))
        })
        .await
    }

    async fn wait_for_load(&self, id: TabId) -> Result<TabEvent, TabError> {
        let Some(tab) = self.tab(id) else {
            return Ok(TabEvent::Closed);
        };
        self.blocking(move || {
            tab.wait_until_navigated()
                .map(|_| TabEvent::Loaded)
                .map_err(|e| TabError::Driver(e.to_string()))
        })
        .await
    }

    async fn close(&self, id: TabId) -> Result<(), TabError> {
        let tab = self
            .inner
            .tabs
            .lock()
            .map_err(|_| TabError::Driver("tab registry poisoned".into()))?
            .remove(&id)
            .ok_or(TabError::AlreadyClosed)?;
        self.blocking(move || {
            tab.close(true)
                .map(|_| ())
                .map_err(|e| TabError::Driver(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl PageAgent for HeadlessBrowser {
    async fn collect_order_numbers(&self, tab: TabId) -> Result<OrderPage, AgentFailure> {
        self.eval_json(tab, self.script(COLLECT_ORDERS_JS)).await
    }

    async fn click_next_button(&self, tab: TabId) -> Result<ClickResult, AgentFailure> {
        let result: ClickResult = self.eval_json(tab, self.script(CLICK_NEXT_JS)).await?;
        // 给单页应用一点时间开始切换
        if result.success {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(result)
    }

    async fn scrape_invoice(&self, tab: TabId) -> Result<OrderInvoice, AgentFailure> {
        self.eval_json(tab, self.script(SCRAPE_INVOICE_JS)).await
    }

    async fn block_images(&self, id: TabId) -> Result<(), AgentFailure> {
        let tab = self.tab(id).ok_or(AgentFailure::TabClosed)?;
        tokio::task::spawn_blocking(move || {
            tab.evaluate(BLOCK_IMAGES_JS, false)
                .map(|_| ())
                .map_err(|e| AgentFailure::Agent(e.to_string()))
        })
        .await
        .map_err(|e| AgentFailure::Agent(format!("Task join: {}", e)))?
    }
}
