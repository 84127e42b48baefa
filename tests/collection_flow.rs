//! 采集流程集成测试：ControlSurface + 脚本化浏览器 + 内存存储 + 手动时钟

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use invoice_exporter::browser::{OrderPage, ScriptedBrowser};
use invoice_exporter::cache::{KeyValueStore, MemoryStore, PersistentCache, DEFAULT_CACHE_KEY};
use invoice_exporter::control::{ClearStatus, StartStatus, StopStatus};
use invoice_exporter::core::{CollectionPolicy, ManualClock, ProgressSnapshot};
use invoice_exporter::{spawn_collector, CollectorDeps, ControlSurface};

const ORDERS_URL: &str = "https://www.walmart.com/orders";
const NOW: i64 = 1_700_000_000_000;

struct Harness {
    browser: Arc<ScriptedBrowser>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    surface: ControlSurface,
}

fn harness(browser: ScriptedBrowser) -> Harness {
    harness_with_store(browser, Arc::new(MemoryStore::new()))
}

fn harness_with_store(browser: ScriptedBrowser, store: Arc<MemoryStore>) -> Harness {
    let browser = Arc::new(browser);
    let clock = Arc::new(ManualClock::new(NOW));
    let surface = spawn_collector(CollectorDeps {
        tabs: browser.clone(),
        agent: browser.clone(),
        cache: PersistentCache::new(store.clone(), clock.clone()),
        clock: clock.clone(),
        policy: CollectionPolicy::default(),
    });
    Harness {
        browser,
        store,
        clock,
        surface,
    }
}

/// 轮询直到本轮结束
async fn wait_idle(surface: &ControlSurface) -> ProgressSnapshot {
    for _ in 0..400 {
        let progress = surface.get_progress().await;
        if !progress.is_collecting {
            return progress;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("collection did not finish");
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_page_limit_two_scenario() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A", "B"], true).with_field("A", "Delivered on Jan 2"))
            .with_page(2, OrderPage::new(["C"], true))
            .with_page(3, OrderPage::new(["D"], false)),
    );

    let started = h.surface.start_collection(ORDERS_URL, 2).await;
    assert_eq!(started.status, StartStatus::Started);

    let progress = wait_idle(&h.surface).await;
    assert_eq!(progress.order_numbers, vec!["A", "B", "C"]);
    assert_eq!(progress.current_page, 2);
    assert_eq!(progress.page_limit, 2);
    assert_eq!(progress.additional_fields["A"], "Delivered on Jan 2");
    assert_eq!(h.browser.extract_calls(), vec![1, 2]);
    assert_eq!(h.browser.opened_urls(), vec![ORDERS_URL]);
    assert_eq!(h.browser.closed_tabs().len(), 1);
    assert_eq!(h.browser.open_tab_count(), 0);

    // 累计集合等于各页缓存的并集
    let union: BTreeSet<String> = progress
        .pages_cached
        .values()
        .flat_map(|r| r.order_numbers.iter().cloned())
        .collect();
    assert_eq!(union, set(&["A", "B", "C"]));
    assert_eq!(progress.pages_cached.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_persisted_after_run() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .with_page(2, OrderPage::new(["B"], false)),
    );
    h.surface.start_collection(ORDERS_URL, 0).await;
    wait_idle(&h.surface).await;

    let blob = h.store.get(DEFAULT_CACHE_KEY).await.unwrap().unwrap();
    assert_eq!(blob["orderNumbers"], json!(["A", "B"]));
    assert_eq!(blob["timestamp"], json!(NOW));
    assert_eq!(blob["pagesCached"]["1"]["orderNumbers"], json!(["A"]));
    assert_eq!(blob["pagesCached"]["2"]["hasNextPage"], json!(false));
    assert_eq!(blob["pagesCached"]["2"]["timestamp"], json!(NOW));
}

#[tokio::test]
async fn test_page_failing_every_attempt_is_tried_four_times() {
    let h = harness(ScriptedBrowser::new().always_failing_page(1));

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(h.browser.extract_calls(), vec![1, 1, 1, 1]);
    assert!(progress.order_numbers.is_empty());
    assert_eq!(progress.current_page, 1);
    assert_eq!(h.browser.closed_tabs().len(), 1);
    // 一次稳定等待 + 三次重试退避
    assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(100); 4]);
}

#[tokio::test]
async fn test_retry_budget_resets_per_page() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .with_page(2, OrderPage::new(["B"], false))
            .failing_page(1, 3)
            .failing_page(2, 3),
    );

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(h.browser.extract_calls(), vec![1, 1, 1, 1, 2, 2, 2, 2]);
    assert_eq!(progress.order_numbers, vec!["A", "B"]);
}

#[tokio::test]
async fn test_rejected_click_is_retried() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .with_page(2, OrderPage::new(["B"], false))
            .failing_clicks(2),
    );

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(progress.order_numbers, vec!["A", "B"]);
    assert_eq!(h.browser.click_calls(), vec![2]);
    assert_eq!(h.browser.extract_calls(), vec![1, 2]);
}

#[tokio::test]
async fn test_limit_never_exceeded() {
    let mut browser = ScriptedBrowser::new();
    for page in 1..=6 {
        browser = browser.with_page(page, OrderPage::new([format!("O{page}")], true));
    }
    let h = harness(browser);

    h.surface.start_collection(ORDERS_URL, 3).await;
    let progress = wait_idle(&h.surface).await;

    assert!(h.browser.extract_calls().iter().all(|&p| p <= 3));
    assert_eq!(progress.order_numbers, vec!["O1", "O2", "O3"]);
    assert_eq!(progress.current_page, 3);
}

#[tokio::test]
async fn test_cursor_is_monotonic() {
    let mut browser = ScriptedBrowser::new();
    for page in 1..=4 {
        browser = browser.with_page(page, OrderPage::new([format!("O{page}")], page < 4));
    }
    let h = harness(browser);

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    let calls = h.browser.extract_calls();
    assert_eq!(calls, vec![1, 2, 3, 4]);
    assert!(calls.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(progress.current_page, 4);
}

#[tokio::test]
async fn test_cached_pages_are_not_refetched() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .with_page(2, OrderPage::new(["B"], false)),
    );
    h.surface.start_collection(ORDERS_URL, 0).await;
    wait_idle(&h.surface).await;
    assert_eq!(h.browser.extract_calls(), vec![1, 2]);

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    // 第二轮只重新抓取第 1 页，第 2 页命中缓存
    assert_eq!(h.browser.extract_calls(), vec![1, 2, 1]);
    assert_eq!(progress.order_numbers, vec!["A", "B"]);
    assert_eq!(h.browser.opened_urls().len(), 2);
    assert_eq!(h.browser.closed_tabs().len(), 2);
}

#[tokio::test]
async fn test_page_one_is_always_fresh() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            DEFAULT_CACHE_KEY,
            json!({
                "orderNumbers": ["OLD"],
                "additionalFields": {},
                "pagesCached": {
                    "1": {"hasNextPage": false, "orderNumbers": ["OLD"], "additionalFields": {}, "cachedAt": NOW}
                },
                "timestamp": NOW
            }),
        )
        .await
        .unwrap();

    let h = harness_with_store(
        ScriptedBrowser::new().with_page(1, OrderPage::new(["NEW"], false)),
        store,
    );

    let before = h.surface.get_progress().await;
    assert!(before.pages_cached.contains_key(&1));

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(h.browser.extract_calls(), vec![1]);
    assert_eq!(progress.order_numbers, vec!["NEW", "OLD"]);
    assert_eq!(progress.pages_cached[&1].order_numbers, vec!["NEW"]);
}

#[tokio::test]
async fn test_cached_page_orders_join_accumulated_set() {
    // 缓存记录里的订单号不在顶层 orderNumbers 中
    let store = Arc::new(MemoryStore::new());
    store
        .set(
            DEFAULT_CACHE_KEY,
            json!({
                "orderNumbers": [],
                "pagesCached": {
                    "2": {"hasNextPage": false, "orderNumbers": ["X"], "additionalFields": {"X": "Shipped"}, "timestamp": NOW}
                },
                "timestamp": NOW
            }),
        )
        .await
        .unwrap();

    let h = harness_with_store(
        ScriptedBrowser::new().with_page(1, OrderPage::new(["A"], true)),
        store,
    );
    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(h.browser.extract_calls(), vec![1]);
    assert_eq!(progress.order_numbers, vec!["A", "X"]);
    assert_eq!(progress.additional_fields["X"], "Shipped");

    let union: BTreeSet<String> = progress
        .pages_cached
        .values()
        .flat_map(|r| r.order_numbers.iter().cloned())
        .collect();
    let accumulated: BTreeSet<String> = progress.order_numbers.iter().cloned().collect();
    assert!(accumulated.is_superset(&union));

    let blob = h.store.get(DEFAULT_CACHE_KEY).await.unwrap().unwrap();
    assert_eq!(blob["orderNumbers"], json!(["A", "X"]));
}

#[tokio::test]
async fn test_clear_cache_during_run_keeps_collecting() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .with_page(2, OrderPage::new(["B"], false))
            .gated_page(2),
    );

    h.surface.start_collection(ORDERS_URL, 0).await;
    let browser = h.browser.clone();
    wait_for(move || browser.extract_calls().contains(&2)).await;
    assert!(h.store.get(DEFAULT_CACHE_KEY).await.unwrap().is_some());

    let cleared = h.surface.clear_cache().await;
    assert_eq!(cleared.status, ClearStatus::CacheCleared);
    assert!(h.store.get(DEFAULT_CACHE_KEY).await.unwrap().is_none());

    let mid = h.surface.get_progress().await;
    assert!(mid.is_collecting);
    assert!(mid.order_numbers.is_empty());
    assert!(mid.pages_cached.is_empty());

    h.browser.release_gate();
    let progress = wait_idle(&h.surface).await;
    assert_eq!(progress.order_numbers, vec!["B"]);
    assert_eq!(progress.current_page, 2);

    // 下一次保存覆盖被清空的缓存，只含清空之后抓取的页
    let blob = h.store.get(DEFAULT_CACHE_KEY).await.unwrap().unwrap();
    assert_eq!(blob["orderNumbers"], json!(["B"]));
    assert_eq!(
        blob["pagesCached"].as_object().unwrap().keys().collect::<Vec<_>>(),
        vec!["2"]
    );
}

#[tokio::test]
async fn test_stop_mid_fetch_of_page_three() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A", "B"], true))
            .with_page(2, OrderPage::new(["C"], true))
            .hanging_page(3),
    );

    h.surface.start_collection(ORDERS_URL, 0).await;
    let browser = h.browser.clone();
    wait_for(move || browser.extract_calls().contains(&3)).await;

    let stopped = h.surface.stop_collection().await;
    assert_eq!(stopped.status, StopStatus::Stopped);
    assert_eq!(stopped.current_page, 3);
    assert_eq!(stopped.order_numbers, vec!["A", "B", "C"]);
    assert_eq!(h.browser.closed_tabs().len(), 1);

    let progress = h.surface.get_progress().await;
    assert!(!progress.is_collecting);
    assert_eq!(progress.order_numbers, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_stop_when_idle_changes_nothing() {
    let h = harness(ScriptedBrowser::new());
    let stopped = h.surface.stop_collection().await;
    assert_eq!(stopped.status, StopStatus::Stopped);
    assert_eq!(stopped.current_page, 1);
    assert!(stopped.order_numbers.is_empty());
    assert!(h.browser.closed_tabs().is_empty());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_start_rejected() {
    let h = harness(ScriptedBrowser::new().hanging_page(1));

    assert_eq!(h.surface.start_collection(ORDERS_URL, 0).await.status, StartStatus::Started);
    assert_eq!(
        h.surface.start_collection(ORDERS_URL, 5).await.status,
        StartStatus::AlreadyRunning
    );

    let progress = h.surface.get_progress().await;
    assert!(progress.is_collecting);
    assert_eq!(progress.page_limit, 0);
    assert_eq!(h.browser.opened_urls().len(), 1);

    h.surface.stop_collection().await;
}

#[tokio::test]
async fn test_clear_cache_while_idle() {
    let h = harness(ScriptedBrowser::new().with_page(1, OrderPage::new(["A"], false)));
    h.surface.start_collection(ORDERS_URL, 0).await;
    wait_idle(&h.surface).await;

    let cleared = h.surface.handle_json(r#"{"action":"clearCache"}"#).await;
    assert_eq!(cleared, json!({"status": "cache_cleared"}));

    let progress = h.surface.get_progress().await;
    assert!(progress.order_numbers.is_empty());
    assert!(progress.pages_cached.is_empty());
    assert!(h.store.get(DEFAULT_CACHE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_cache_is_not_rehydrated() {
    let store = Arc::new(MemoryStore::new());
    let old = NOW - 25 * 60 * 60 * 1000;
    store
        .set(
            DEFAULT_CACHE_KEY,
            json!({
                "orderNumbers": ["OLD"],
                "pagesCached": {"2": {"hasNextPage": false, "orderNumbers": ["OLD"], "timestamp": old}},
                "timestamp": old
            }),
        )
        .await
        .unwrap();

    let h = harness_with_store(ScriptedBrowser::new(), store);
    let progress = h.surface.get_progress().await;

    assert_eq!(progress, ProgressSnapshot { current_page: 1, ..ProgressSnapshot::default() });
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_tab_closed_by_user_ends_run() {
    let h = harness(
        ScriptedBrowser::new()
            .with_page(1, OrderPage::new(["A"], true))
            .closing_on_page(2),
    );

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert_eq!(progress.order_numbers, vec!["A"]);
    assert_eq!(h.browser.extract_calls(), vec![1, 2]);
    assert!(h.browser.closed_tabs().is_empty());
}

#[tokio::test]
async fn test_tab_creation_failure_ends_run() {
    let h = harness(ScriptedBrowser::new().failing_open());

    assert_eq!(h.surface.start_collection(ORDERS_URL, 0).await.status, StartStatus::Started);
    let progress = wait_idle(&h.surface).await;

    assert!(progress.order_numbers.is_empty());
    assert!(h.browser.extract_calls().is_empty());
    assert!(h.browser.closed_tabs().is_empty());
}

#[tokio::test]
async fn test_empty_page_finishes_run() {
    let h = harness(ScriptedBrowser::new().with_page(1, OrderPage::new(Vec::<String>::new(), false)));

    h.surface.start_collection(ORDERS_URL, 0).await;
    let progress = wait_idle(&h.surface).await;

    assert!(progress.order_numbers.is_empty());
    assert!(progress.pages_cached.contains_key(&1));
}

#[tokio::test]
async fn test_json_channel() {
    let h = harness(ScriptedBrowser::new().with_page(1, OrderPage::new(["A"], false)));

    let started = h
        .surface
        .handle_json(r#"{"action":"startCollection","url":"https://www.walmart.com/orders","pageLimit":1}"#)
        .await;
    assert_eq!(started, json!({"status": "started"}));
    wait_idle(&h.surface).await;

    let progress = h.surface.handle_json(r#"{"action":"getProgress"}"#).await;
    assert_eq!(progress["orderNumbers"], json!(["A"]));
    assert_eq!(progress["isCollecting"], json!(false));
    assert_eq!(progress["pageLimit"], json!(1));
    assert_eq!(progress["pagesCached"]["1"]["hasNextPage"], json!(false));

    let bad = h.surface.handle_json(r#"{"method":"getOrderData"}"#).await;
    assert_eq!(bad, json!({"status": "invalid_request"}));
}
