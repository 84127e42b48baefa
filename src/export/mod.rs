//! 发票下载与导出

pub mod downloader;
pub mod invoice;
pub mod sink;

pub use downloader::{candidate_urls, DownloadError, DownloadReport, DownloadSettings, InvoiceDownloader};
pub use invoice::{format_amount, format_quantity, parse_numeric_value, ExportMode, InvoiceItem, OrderInvoice};
pub use sink::{CsvSink, ExportError, ExportSink};
