// src/metrics.rs

use crate::heuristics::InvoiceData;
use serde::Serialize;

const REQUIRED_WEIGHT: f64 = 15.0;
const OPTIONAL_WEIGHT: f64 = 5.0;
const ITEMS_WEIGHT: f64 = 10.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub processing_time_ms: u64,
    pub pages_processed: usize,
    pub average_confidence: f64,
    pub data_extraction_score: f64,
    pub consensus_score: f64,
}

impl ProcessingMetrics {
    pub fn compute(data: &InvoiceData, average_confidence: f64, pages_processed: usize, processing_time_ms: u64) -> Self {
        let data_extraction_score = data_extraction_score(data);
        Self {
            processing_time_ms,
            pages_processed,
            average_confidence,
            data_extraction_score,
            consensus_score: consensus_score(average_confidence, data_extraction_score),
        }
    }
}

/// Weighted presence of fields, 0-100.
///
/// invoice number, date, vendor name and total carry 15 each; due date,
/// tax, subtotal, bill-to name, any vendor contact and payment terms 5
/// each; a non-empty item list 10.
pub fn data_extraction_score(data: &InvoiceData) -> f64 {
    let required = [
        data.invoice_number.is_some(),
        data.date.is_some(),
        data.vendor.name.is_some(),
        data.amounts.total.is_some(),
    ];
    let optional = [
        data.due_date.is_some(),
        data.amounts.tax.is_some(),
        data.amounts.subtotal.is_some(),
        data.bill_to.name.is_some(),
        data.vendor.has_contact(),
        data.payment_details.terms.is_some(),
    ];
    let count = |flags: &[bool]| flags.iter().filter(|&&f| f).count() as f64;

    let mut score = count(&required) * REQUIRED_WEIGHT + count(&optional) * OPTIONAL_WEIGHT;
    if !data.items.is_empty() {
        score += ITEMS_WEIGHT;
    }
    score
}

pub fn consensus_score(average_confidence: f64, data_extraction_score: f64) -> f64 {
    (0.6 * average_confidence + 0.4 * data_extraction_score).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::LineItem;

    #[test]
    fn test_empty_record_scores_zero() {
        let data = InvoiceData::empty("USD");
        assert_eq!(data_extraction_score(&data), 0.0);
        let metrics = ProcessingMetrics::compute(&data, 0.0, 1, 12);
        assert_eq!(metrics.consensus_score, 0.0);
        assert_eq!(metrics.pages_processed, 1);
    }

    #[test]
    fn test_full_record_scores_hundred() {
        let mut data = InvoiceData::empty("USD");
        data.invoice_number = Some("1".into());
        data.date = Some("2024-01-01".into());
        data.due_date = Some("2024-02-01".into());
        data.vendor.name = Some("Acme".into());
        data.vendor.email = Some("a@b.example".into());
        data.bill_to.name = Some("Buyer".into());
        data.amounts.total = Some(10.0);
        data.amounts.subtotal = Some(9.0);
        data.amounts.tax = Some(1.0);
        data.payment_details.terms = Some("Net 30".into());
        data.items.push(LineItem {
            description: "Thing".into(),
            quantity: 1.0,
            unit_price: 9.0,
            amount: 9.0,
            category: None,
            line_number: 1,
        });
        assert_eq!(data_extraction_score(&data), 100.0);
    }

    #[test]
    fn test_weights() {
        let mut data = InvoiceData::default();
        data.invoice_number = Some("1".into());
        data.amounts.tax = Some(1.0);
        assert_eq!(data_extraction_score(&data), 20.0);
    }

    #[test]
    fn test_consensus_blend_is_clamped() {
        assert!((consensus_score(80.0, 50.0) - 68.0).abs() < 1e-9);
        assert_eq!(consensus_score(150.0, 150.0), 100.0);
        assert_eq!(consensus_score(-10.0, 0.0), 0.0);
    }
}
