//! 订单发票记录与导出模式

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// 单个商品行；数量与价格保留页面上的原始文本，导出时再转数值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceItem {
    pub product_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub quantity: String,
    #[serde(deserialize_with = "string_or_number")]
    pub price: String,
    pub delivery_status: String,
    pub product_link: String,
}

/// getOrderData 的响应：一个订单的明细与汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderInvoice {
    pub order_number: String,
    pub order_date: String,
    pub items: Vec<InvoiceItem>,
    #[serde(deserialize_with = "string_or_number")]
    pub delivery_charges: String,
    #[serde(deserialize_with = "string_or_number")]
    pub tax: String,
    #[serde(deserialize_with = "string_or_number")]
    pub tip: String,
    #[serde(deserialize_with = "string_or_number")]
    pub order_total: String,
}

impl OrderInvoice {
    pub fn new(order_number: impl Into<String>, order_date: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            order_date: order_date.into(),
            ..Self::default()
        }
    }

    pub fn with_item(mut self, item: InvoiceItem) -> Self {
        self.items.push(item);
        self
    }

    /// 汇总行：(标签, 值)，金额类字段已转数值
    pub fn summary_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Order Number", self.order_number.clone()),
            ("Order Date", self.order_date.clone()),
            ("Delivery Charges", format_amount(parse_numeric_value(&self.delivery_charges))),
            ("Tax", format_amount(parse_numeric_value(&self.tax))),
            ("Tip", format_amount(parse_numeric_value(&self.tip))),
            ("Order Total", format_amount(parse_numeric_value(&self.order_total))),
        ]
    }
}

/// 导出模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// 每个订单一个文件：商品表 + 空行 + 汇总
    #[default]
    PerOrder,
    /// 所有订单合并为一个文件，每行带订单号与日期
    Combined,
}

/// 去掉货币符号、千分位等非数字字符后解析；无法解析时为 0
pub fn parse_numeric_value(raw: &str) -> f64 {
    static NON_NUMERIC: OnceLock<Option<Regex>> = OnceLock::new();
    let cleaned = match NON_NUMERIC
        .get_or_init(|| Regex::new(r"[^0-9.\-]+").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(raw, "").into_owned(),
        None => raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect(),
    };
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// 金额单元格：两位小数
pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}

/// 数量单元格：整数不带小数点
pub fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// 页面脚本有时把数量/金额作为数字返回
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
        Raw::Null(()) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_value() {
        assert_eq!(parse_numeric_value("$1,234.50"), 1234.5);
        assert_eq!(parse_numeric_value("-$3.00"), -3.0);
        assert_eq!(parse_numeric_value("Qty 2"), 2.0);
        assert_eq!(parse_numeric_value(""), 0.0);
        assert_eq!(parse_numeric_value("Free"), 0.0);
        assert_eq!(parse_numeric_value("1.2.3"), 0.0);
    }

    #[test]
    fn test_invoice_accepts_numbers_and_nulls() {
        let raw = r#"{
            "orderNumber": "200012345",
            "orderDate": "Jan 02, 2024",
            "items": [{"productName": "Milk", "quantity": 2, "price": "$3.48", "deliveryStatus": "Delivered", "productLink": "https://example.com/ip/1"}],
            "deliveryCharges": null,
            "tax": 0.21,
            "orderTotal": "$7.17"
        }"#;
        let invoice: OrderInvoice = serde_json::from_str(raw).unwrap();
        assert_eq!(invoice.items[0].quantity, "2");
        assert_eq!(invoice.delivery_charges, "");
        assert_eq!(invoice.tax, "0.21");
        assert_eq!(invoice.tip, "");
    }

    #[test]
    fn test_summary_rows() {
        let mut invoice = OrderInvoice::new("1", "Jan 1");
        invoice.tax = "$0.5".into();
        invoice.order_total = "$10".into();
        let rows = invoice.summary_rows();
        assert_eq!(rows[0], ("Order Number", "1".to_string()));
        assert_eq!(rows[2], ("Delivery Charges", "0.00".to_string()));
        assert_eq!(rows[3], ("Tax", "0.50".to_string()));
        assert_eq!(rows[5], ("Order Total", "10.00".to_string()));
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(2.0), "2");
        assert_eq!(format_quantity(1.5), "1.5");
    }
}
