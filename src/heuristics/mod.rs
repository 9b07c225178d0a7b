// src/heuristics/mod.rs

mod fields;
mod line_items;
mod values;

pub use line_items::{Candidate, category_for, finalize_items, is_summary_line, validate_candidate};
pub use values::{detect_currency, normalize_date, parse_amount};

use crate::config::ExtractionSection;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// A single invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub category: Option<String>,
    /// 1-based, dense.
    pub line_number: usize,
}

/// Vendor or bill-to contact block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub tax_id: Option<String>,
}

impl Party {
    /// Any way to reach the party besides its name.
    pub fn has_contact(&self) -> bool {
        self.address.is_some()
            || self.phone.is_some()
            || self.email.is_some()
            || self.website.is_some()
            || self.tax_id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amounts {
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    /// Percent, e.g. `8.25`.
    pub tax_rate: Option<f64>,
    pub discount: Option<f64>,
    pub total: Option<f64>,
    pub amount_paid: Option<f64>,
    pub balance_due: Option<f64>,
    /// ISO 4217 code.
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub method: Option<String>,
    pub terms: Option<String>,
    pub bank_details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_number: Option<String>,
    pub order_date: Option<String>,
    pub reference: Option<String>,
}

/// All structured data we can extract from an invoice.
///
/// Absence of a value means "not found"; a weak extraction is a sparse
/// record with low `confidence`, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceData {
    pub invoice_number: Option<String>,
    /// ISO `YYYY-MM-DD` when the source date could be read, else as written.
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub vendor: Party,
    pub bill_to: Party,
    pub amounts: Amounts,
    pub items: Vec<LineItem>,
    pub payment_details: PaymentDetails,
    pub order_info: OrderInfo,
    pub notes: Option<String>,
    /// Aggregate 0-100.
    pub confidence: f64,
}

impl InvoiceData {
    /// A record with nothing found except the fallback currency.
    pub fn empty(default_currency: &str) -> Self {
        InvoiceData {
            amounts: Amounts {
                currency: Some(default_currency.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// How many scalar fields were successfully extracted, out of the ones
    /// that carry weight in the extraction score.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.invoice_number.is_some(),
            self.date.is_some(),
            self.due_date.is_some(),
            self.vendor.name.is_some(),
            self.vendor.has_contact(),
            self.bill_to.name.is_some(),
            self.amounts.subtotal.is_some(),
            self.amounts.tax.is_some(),
            self.amounts.total.is_some(),
            self.payment_details.terms.is_some(),
            !self.items.is_empty(),
        ];
        let total = filled.len();
        (filled.iter().filter(|&&v| v).count(), total)
    }
}

/// Extract structured invoice data from normalized text.
pub fn extract_invoice(text: &str, cfg: &ExtractionSection) -> InvoiceData {
    let mut data = InvoiceData::default();
    fields::extract_fields(text, cfg, &mut data);
    data.items = line_items::extract_line_items(text, cfg.max_line_items);
    data.amounts.currency =
        Some(detect_currency(text).unwrap_or_else(|| cfg.default_currency.clone()));

    let (filled, total) = data.coverage();
    debug!(filled, total, items = data.items.len(), "Fields extracted");
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    const SAMPLE: &str = "Invoice #INV-2024-001\nDate: 03/15/2024\nAcme Corp\nWidget A  2  25.00  50.00\nSubtotal: $50.00\nTax: $4.00\nTotal: $54.00";

    #[test]
    fn test_sample_invoice() {
        let data = extract_invoice(&normalize(SAMPLE), &ExtractionSection::default());

        assert_eq!(data.invoice_number.as_deref(), Some("INV-2024-001"));
        assert_eq!(data.date.as_deref(), Some("2024-03-15"));
        assert_eq!(data.vendor.name.as_deref(), Some("Acme Corp"));
        assert_eq!(data.amounts.subtotal, Some(50.0));
        assert_eq!(data.amounts.tax, Some(4.0));
        assert_eq!(data.amounts.total, Some(54.0));
        assert_eq!(data.amounts.currency.as_deref(), Some("USD"));

        assert_eq!(data.items.len(), 1);
        let item = &data.items[0];
        assert_eq!(item.description, "Widget A");
        assert_eq!(item.quantity, 2.0);
        assert_eq!(item.unit_price, 25.0);
        assert_eq!(item.amount, 50.0);
        assert_eq!(item.line_number, 1);
    }

    #[test]
    fn test_blank_text_is_sparse_not_error() {
        let cfg = ExtractionSection {
            default_currency: "EUR".to_string(),
            ..Default::default()
        };
        let data = extract_invoice("", &cfg);
        assert!(data.invoice_number.is_none());
        assert!(data.vendor.name.is_none());
        assert!(data.items.is_empty());
        assert_eq!(data.amounts.currency.as_deref(), Some("EUR"));
        assert_eq!(data, InvoiceData::empty("EUR"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut data = InvoiceData::empty("USD");
        data.invoice_number = Some("A-1".to_string());
        data.bill_to.tax_id = Some("X".to_string());
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["invoiceNumber"], "A-1");
        assert_eq!(json["billTo"]["taxId"], "X");
        assert!(json["amounts"]["balanceDue"].is_null());
        assert!(json["paymentDetails"].is_object());
    }

    #[test]
    fn test_lookalike_lines_do_not_leak() {
        let text = normalize(
            "Acme Corp\n\
             Suite 12 4000 Harbor Road\n\
             Invoice #A-77\n\
             Widget A 2 25.00 50.00\n\
             Sort code 12 34 56\n\
             Tel 555 123 4567\n\
             Subtotal: $50.00\n\
             Total Tax 4.00\n\
             Total: $54.00",
        );
        let data = extract_invoice(&text, &ExtractionSection::default());

        assert_eq!(data.amounts.total, Some(54.0));
        assert_eq!(data.amounts.tax, Some(4.0));
        assert_eq!(data.amounts.subtotal, Some(50.0));
        assert_eq!(data.date, None);
        let descriptions: Vec<&str> = data.items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Widget A"]);
    }

    #[test]
    fn test_full_document() {
        let text = normalize(
            "Northwind Traders LLC\n\
             42 Harbor Road, Springfield\n\
             Phone: (555) 123-4567\n\
             billing@northwind.example\n\
             www.northwind.example\n\
             Tax ID: 98-7654321\n\
             \n\
             Bill To:\n\
             Contoso Ltd\n\
             9 Main Street\n\
             \n\
             Invoice Number: NW-7781\n\
             Invoice Date: 2024-02-01\n\
             Due Date: March 2, 2024\n\
             PO Number: PO-5531\n\
             Description Qty Unit Price Amount\n\
             Cloud Hosting Plan 1 120.00 120.00\n\
             Security Audit 2 hrs 90.00 180.00\n\
             Logo Design 250.00\n\
             Subtotal: 550.00\n\
             Discount (5%): -27.50\n\
             VAT (20%): 104.50\n\
             Total: €627.00\n\
             Payment Terms: Net 30\n\
             Notes: Thank you for your business",
        );
        let data = extract_invoice(&text, &ExtractionSection::default());

        assert_eq!(data.vendor.name.as_deref(), Some("Northwind Traders LLC"));
        assert_eq!(data.vendor.phone.as_deref(), Some("(555) 123-4567"));
        assert_eq!(data.vendor.email.as_deref(), Some("billing@northwind.example"));
        assert_eq!(data.vendor.website.as_deref(), Some("www.northwind.example"));
        assert_eq!(data.vendor.tax_id.as_deref(), Some("98-7654321"));
        assert_eq!(data.vendor.address.as_deref(), Some("42 Harbor Road, Springfield"));
        assert_eq!(data.bill_to.name.as_deref(), Some("Contoso Ltd"));
        assert_eq!(data.bill_to.address.as_deref(), Some("9 Main Street"));

        assert_eq!(data.invoice_number.as_deref(), Some("NW-7781"));
        assert_eq!(data.date.as_deref(), Some("2024-02-01"));
        assert_eq!(data.due_date.as_deref(), Some("2024-03-02"));
        assert_eq!(data.order_info.order_number.as_deref(), Some("PO-5531"));

        assert_eq!(data.amounts.subtotal, Some(550.0));
        assert_eq!(data.amounts.discount, Some(27.5));
        assert_eq!(data.amounts.tax, Some(104.5));
        assert_eq!(data.amounts.tax_rate, Some(20.0));
        assert_eq!(data.amounts.total, Some(627.0));
        assert_eq!(data.amounts.currency.as_deref(), Some("EUR"));
        assert_eq!(data.payment_details.terms.as_deref(), Some("Net 30"));
        assert_eq!(data.notes.as_deref(), Some("Thank you for your business"));

        let descriptions: Vec<&str> = data.items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Cloud Hosting Plan", "Security Audit", "Logo Design"]);
        let categories: Vec<Option<&str>> = data.items.iter().map(|i| i.category.as_deref()).collect();
        assert_eq!(categories, vec![Some("hosting"), Some("security"), Some("design")]);
        assert_eq!(data.items[1].quantity, 2.0);
        assert_eq!(data.items[2].quantity, 1.0);
        assert_eq!(data.items[2].unit_price, 250.0);
    }
}
