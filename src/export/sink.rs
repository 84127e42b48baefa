//! 导出：把发票记录写成表格文件
//!
//! CsvSink 两种布局：
//! - PerOrder：每个订单 `Order_<订单号>.csv`，商品表 + 空行 + 汇总行
//! - Combined：全部订单写入 `Walmart_Orders.csv`，每行带订单号与日期

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::export::{format_amount, format_quantity, parse_numeric_value, ExportMode, OrderInvoice};

const ITEM_HEADERS: [&str; 5] = ["Product Name", "Quantity", "Price", "Delivery Status", "Product Link"];
const COMBINED_HEADERS: [&str; 7] = [
    "Order Number",
    "Order Date",
    "Product Name",
    "Quantity",
    "Price",
    "Delivery Status",
    "Product Link",
];
const COMBINED_FILE: &str = "Walmart_Orders.csv";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// 导出目标
pub trait ExportSink: Send + Sync {
    /// 返回写出的文件路径
    fn export(&self, invoices: &[OrderInvoice], mode: ExportMode) -> Result<Vec<PathBuf>, ExportError>;
}

/// CSV 导出，写入 output_dir
#[derive(Debug, Clone)]
pub struct CsvSink {
    output_dir: PathBuf,
}

impl CsvSink {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn writer(&self, file_name: &str) -> Result<(csv::Writer<std::fs::File>, PathBuf), ExportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| ExportError::Io {
            path: self.output_dir.clone(),
            source: e,
        })?;
        let path = self.output_dir.join(file_name);
        // 汇总行只有两列，需要 flexible
        let writer = csv::WriterBuilder::new().flexible(true).from_path(&path)?;
        Ok((writer, path))
    }

    fn write_order(&self, invoice: &OrderInvoice) -> Result<PathBuf, ExportError> {
        let (mut wtr, path) = self.writer(&format!("Order_{}.csv", safe_name(&invoice.order_number)))?;
        wtr.write_record(ITEM_HEADERS)?;
        for item in &invoice.items {
            let quantity = format_quantity(parse_numeric_value(&item.quantity));
            let price = format_amount(parse_numeric_value(&item.price));
            wtr.write_record([
                item.product_name.as_str(),
                quantity.as_str(),
                price.as_str(),
                item.delivery_status.as_str(),
                item.product_link.as_str(),
            ])?;
        }
        wtr.write_record([""])?;
        for (label, value) in invoice.summary_rows() {
            wtr.write_record([label, value.as_str()])?;
        }
        wtr.flush().map_err(|e| ExportError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    fn write_combined(&self, invoices: &[OrderInvoice]) -> Result<PathBuf, ExportError> {
        let (mut wtr, path) = self.writer(COMBINED_FILE)?;
        wtr.write_record(COMBINED_HEADERS)?;
        for invoice in invoices {
            for item in &invoice.items {
                let quantity = format_quantity(parse_numeric_value(&item.quantity));
                let price = format_amount(parse_numeric_value(&item.price));
                wtr.write_record([
                    invoice.order_number.as_str(),
                    invoice.order_date.as_str(),
                    item.product_name.as_str(),
                    quantity.as_str(),
                    price.as_str(),
                    item.delivery_status.as_str(),
                    item.product_link.as_str(),
                ])?;
            }
        }
        wtr.flush().map_err(|e| ExportError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

impl ExportSink for CsvSink {
    fn export(&self, invoices: &[OrderInvoice], mode: ExportMode) -> Result<Vec<PathBuf>, ExportError> {
        if invoices.is_empty() {
            tracing::info!("No invoices to export");
            return Ok(Vec::new());
        }
        let paths = match mode {
            ExportMode::PerOrder => invoices
                .iter()
                .map(|invoice| self.write_order(invoice))
                .collect::<Result<Vec<_>, _>>()?,
            ExportMode::Combined => vec![self.write_combined(invoices)?],
        };
        tracing::info!(files = paths.len(), ?mode, "Exported invoices to {:?}", self.output_dir);
        Ok(paths)
    }
}

fn safe_name(order_number: &str) -> String {
    order_number
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
