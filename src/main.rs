//! Invoice Exporter - 命令行入口
//!
//! 流程：启动 headless Chrome → 分页采集订单号（轮询进度）→ 逐个下载发票 → 导出 CSV。
//! Ctrl+C 会发送 stopCollection 并取消后续的发票下载；已采集的订单号保留在缓存中。
//!
//! 运行方式：
//! ```bash
//! INVOICE_PAGE_LIMIT=3 INVOICE_EXPORT_MODE=combined cargo run --features browser
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use invoice_exporter::browser::HeadlessBrowser;
use invoice_exporter::cache::{create_store, InvoiceCache, PersistentCache};
use invoice_exporter::config::load_config_or_default;
use invoice_exporter::core::{Clock, CollectionPolicy, SystemClock};
use invoice_exporter::export::{CsvSink, DownloadSettings, ExportMode, ExportSink, InvoiceDownloader};
use invoice_exporter::{observability, spawn_collector, CollectorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config_or_default(config_path);

    let page_limit: u32 = std::env::var("INVOICE_PAGE_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mode = match std::env::var("INVOICE_EXPORT_MODE").as_deref() {
        Ok("combined") => ExportMode::Combined,
        _ => ExportMode::PerOrder,
    };

    let browser = Arc::new(
        tokio::task::spawn_blocking({
            let section = cfg.browser.clone();
            move || HeadlessBrowser::launch(&section)
        })
        .await
        .context("Browser launch task failed")?
        .context("Failed to launch Chrome")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = create_store(&cfg.cache);

    let surface = spawn_collector(CollectorDeps {
        tabs: browser.clone(),
        agent: browser.clone(),
        cache: PersistentCache::from_config(store.clone(), clock.clone(), &cfg.cache),
        clock: clock.clone(),
        policy: CollectionPolicy::from_config(&cfg.collection),
    });

    let cancel = CancellationToken::new();
    {
        let surface = surface.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, stopping");
                cancel.cancel();
                let stopped = surface.stop_collection().await;
                tracing::info!(
                    page = stopped.current_page,
                    orders = stopped.order_numbers.len(),
                    "Collection stopped"
                );
            }
        });
    }

    let started = surface.start_collection(&cfg.export.orders_url, page_limit).await;
    tracing::info!(status = ?started.status, page_limit, "Collection requested");

    let progress = loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let progress = surface.get_progress().await;
        tracing::info!(
            page = progress.current_page,
            orders = progress.order_numbers.len(),
            "Collecting..."
        );
        if !progress.is_collecting {
            break progress;
        }
    };
    tracing::info!(
        orders = progress.order_numbers.len(),
        pages = progress.pages_cached.len(),
        "Collection finished"
    );

    if cancel.is_cancelled() || progress.order_numbers.is_empty() {
        return Ok(());
    }

    let downloader = InvoiceDownloader::new(
        browser.clone(),
        browser.clone(),
        InvoiceCache::new(store.clone(), clock.clone())
            .with_ttl(Duration::from_secs(cfg.cache.expiration_hours * 60 * 60)),
        clock.clone(),
        DownloadSettings::from_config(&cfg.export),
    );
    let report = downloader.download(&progress.order_numbers, &cancel).await;
    if !report.failed.is_empty() {
        tracing::warn!("Failed orders: {}", report.failed.join(", "));
    }

    let sink = CsvSink::new(&cfg.export.output_dir);
    let files = sink
        .export(&report.invoices, mode)
        .context("Export failed")?;
    for file in files {
        tracing::info!("Wrote {}", file.display());
    }

    Ok(())
}
