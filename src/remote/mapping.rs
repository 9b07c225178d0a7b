// src/remote/mapping.rs

use super::client::{Entity, WireDocument, WireRow};
use crate::config::ExtractionSection;
use crate::heuristics::{
    Candidate, InvoiceData, detect_currency, finalize_items, is_summary_line, normalize_date,
    parse_amount,
};
use tracing::debug;

/// Where a recognised entity type lands in `InvoiceData`.
#[derive(Debug, Clone, Copy)]
enum Target {
    InvoiceNumber,
    Date,
    DueDate,
    VendorName,
    VendorAddress,
    VendorPhone,
    VendorEmail,
    VendorWebsite,
    VendorTaxId,
    BillToName,
    BillToAddress,
    BillToPhone,
    BillToEmail,
    BillToTaxId,
    Subtotal,
    Tax,
    Total,
    AmountPaid,
    BalanceDue,
    Currency,
    PaymentTerms,
    OrderNumber,
    OrderDate,
}

const ENTITY_TABLE: &[(&str, Target)] = &[
    ("invoice_id", Target::InvoiceNumber),
    ("invoice_date", Target::Date),
    ("due_date", Target::DueDate),
    ("supplier_name", Target::VendorName),
    ("supplier_address", Target::VendorAddress),
    ("supplier_phone", Target::VendorPhone),
    ("supplier_email", Target::VendorEmail),
    ("supplier_website", Target::VendorWebsite),
    ("supplier_tax_id", Target::VendorTaxId),
    ("receiver_name", Target::BillToName),
    ("receiver_address", Target::BillToAddress),
    ("receiver_phone", Target::BillToPhone),
    ("receiver_email", Target::BillToEmail),
    ("receiver_tax_id", Target::BillToTaxId),
    ("net_amount", Target::Subtotal),
    ("total_tax_amount", Target::Tax),
    ("total_amount", Target::Total),
    ("amount_paid_since_last_invoice", Target::AmountPaid),
    ("amount_due", Target::BalanceDue),
    ("currency", Target::Currency),
    ("payment_terms", Target::PaymentTerms),
    ("purchase_order", Target::OrderNumber),
    ("purchase_order_date", Target::OrderDate),
];

fn target_for(kind: &str) -> Option<Target> {
    ENTITY_TABLE
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, target)| *target)
}

/// Entity text: `mentionText` when present, else the anchored document text.
fn entity_text(entity: &Entity, text: &str) -> Option<String> {
    let raw = match entity.mention_text.as_deref() {
        Some(m) if !m.trim().is_empty() => m.trim().to_string(),
        _ => entity.text_anchor.as_ref()?.resolve(text),
    };
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn date_value(entity: &Entity, raw: &str, cfg: &ExtractionSection) -> String {
    entity
        .normalized_value
        .as_ref()
        .and_then(|n| n.text.as_deref())
        .and_then(|n| normalize_date(n, cfg.date_order))
        .or_else(|| normalize_date(raw, cfg.date_order))
        .unwrap_or_else(|| raw.to_string())
}

fn apply(target: Target, entity: &Entity, raw: String, data: &mut InvoiceData, cfg: &ExtractionSection) {
    fn set(slot: &mut Option<String>, value: String) {
        slot.get_or_insert(value);
    }
    fn set_money(slot: &mut Option<f64>, raw: &str) {
        if slot.is_none() {
            *slot = parse_amount(raw).map(f64::abs);
        }
    }

    match target {
        Target::InvoiceNumber => set(&mut data.invoice_number, raw),
        Target::Date => set(&mut data.date, date_value(entity, &raw, cfg)),
        Target::DueDate => set(&mut data.due_date, date_value(entity, &raw, cfg)),
        Target::OrderDate => set(&mut data.order_info.order_date, date_value(entity, &raw, cfg)),
        Target::VendorName => set(&mut data.vendor.name, raw),
        Target::VendorAddress => set(&mut data.vendor.address, raw),
        Target::VendorPhone => set(&mut data.vendor.phone, raw),
        Target::VendorEmail => set(&mut data.vendor.email, raw),
        Target::VendorWebsite => set(&mut data.vendor.website, raw),
        Target::VendorTaxId => set(&mut data.vendor.tax_id, raw),
        Target::BillToName => set(&mut data.bill_to.name, raw),
        Target::BillToAddress => set(&mut data.bill_to.address, raw),
        Target::BillToPhone => set(&mut data.bill_to.phone, raw),
        Target::BillToEmail => set(&mut data.bill_to.email, raw),
        Target::BillToTaxId => set(&mut data.bill_to.tax_id, raw),
        Target::Subtotal => set_money(&mut data.amounts.subtotal, &raw),
        Target::Tax => set_money(&mut data.amounts.tax, &raw),
        Target::Total => set_money(&mut data.amounts.total, &raw),
        Target::AmountPaid => set_money(&mut data.amounts.amount_paid, &raw),
        Target::BalanceDue => set_money(&mut data.amounts.balance_due, &raw),
        Target::Currency => {
            let code = detect_currency(&raw).or_else(|| {
                let upper = raw.to_ascii_uppercase();
                (upper.len() == 3 && upper.chars().all(|c| c.is_ascii_alphabetic())).then_some(upper)
            });
            if let Some(code) = code {
                set(&mut data.amounts.currency, code);
            }
        }
        Target::PaymentTerms => set(&mut data.payment_details.terms, raw),
        Target::OrderNumber => set(&mut data.order_info.order_number, raw),
    }
}

/// Translate a processed document into `InvoiceData`. Returns the record
/// and the mean entity confidence (0-100) over recognised entities.
pub(crate) fn to_invoice(doc: &WireDocument, cfg: &ExtractionSection) -> (InvoiceData, f64) {
    let mut data = InvoiceData::default();
    let mut confidences = Vec::new();

    for entity in &doc.entities {
        let Some(target) = target_for(&entity.kind) else {
            if entity.kind != "line_item" {
                debug!(kind = %entity.kind, "Ignoring unmapped entity type");
            }
            continue;
        };
        let Some(raw) = entity_text(entity, &doc.text) else {
            continue;
        };
        confidences.push(entity.confidence.clamp(0.0, 1.0) * 100.0);
        apply(target, entity, raw, &mut data, cfg);
    }

    let mut candidates = table_candidates(doc);
    if candidates.is_empty() {
        candidates = line_item_entities(doc);
    }
    data.items = finalize_items(candidates, cfg.max_line_items);

    if data.amounts.currency.is_none() {
        data.amounts.currency =
            Some(detect_currency(&doc.text).unwrap_or_else(|| cfg.default_currency.clone()));
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };
    data.confidence = confidence;
    (data, confidence)
}

/// Body rows of the first table on the first page.
fn table_candidates(doc: &WireDocument) -> Vec<Candidate> {
    let Some(table) = doc.pages.first().and_then(|p| p.tables.first()) else {
        return Vec::new();
    };
    table
        .body_rows
        .iter()
        .filter_map(|row| row_candidate(&cell_texts(row, &doc.text)))
        .collect()
}

fn cell_texts(row: &WireRow, text: &str) -> Vec<String> {
    row.cells
        .iter()
        .map(|cell| {
            cell.layout
                .as_ref()
                .and_then(|l| l.text_anchor.as_ref())
                .map(|a| a.resolve(text))
                .unwrap_or_default()
        })
        .collect()
}

fn is_description_like(cell: &str) -> bool {
    cell.chars().filter(|c| c.is_alphabetic()).count() >= 3 && parse_amount_strict(cell).is_none()
}

/// A cell that is a number and nothing else, once currency marks are gone.
fn parse_amount_strict(cell: &str) -> Option<f64> {
    let stripped: String = cell
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£' | '¥' | '₹'))
        .collect();
    let core = stripped.trim_start_matches(|c: char| c.is_ascii_uppercase());
    if core.is_empty() || !core.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '(' | ')')) {
        return None;
    }
    parse_amount(core)
}

/// A row with a description-like cell and a trailing positive amount.
/// Numbers between them read as quantity, then unit price.
pub(crate) fn row_candidate(cells: &[String]) -> Option<Candidate> {
    let line = cells.iter().filter(|c| !c.is_empty()).cloned().collect::<Vec<_>>().join(" ");
    if line.is_empty() || is_summary_line(&line) {
        return None;
    }

    let filled: Vec<&str> = cells.iter().map(String::as_str).filter(|c| !c.is_empty()).collect();
    let (last, rest) = filled.split_last()?;
    let amount = parse_amount_strict(last).filter(|a| *a > 0.0)?;
    let desc_at = rest.iter().position(|c| is_description_like(c))?;

    let numbers: Vec<f64> = rest[desc_at + 1..]
        .iter()
        .filter_map(|c| parse_amount_strict(c))
        .collect();
    let (quantity, unit_price) = match numbers.as_slice() {
        [q, p, ..] => (Some(*q), Some(*p)),
        [q] => (Some(*q), None),
        [] => (None, None),
    };

    Some(Candidate {
        description: rest[desc_at].to_string(),
        quantity,
        unit_price,
        amount,
    })
}

/// `line_item` entities with `line_item/*` properties, for processors that
/// return no table layout.
fn line_item_entities(doc: &WireDocument) -> Vec<Candidate> {
    doc.entities
        .iter()
        .filter(|e| e.kind == "line_item")
        .filter_map(|e| {
            let prop = |name: &str| {
                e.properties
                    .iter()
                    .find(|p| p.kind == name)
                    .and_then(|p| entity_text(p, &doc.text))
            };
            let description = prop("line_item/description")?;
            if is_summary_line(&description) {
                return None;
            }
            let amount = prop("line_item/amount").and_then(|a| parse_amount(&a)).filter(|a| *a > 0.0)?;
            Some(Candidate {
                description,
                quantity: prop("line_item/quantity").and_then(|q| parse_amount(&q)),
                unit_price: prop("line_item/unit_price").and_then(|p| parse_amount(&p)),
                amount,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::client::ProcessResponse;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_row_candidate_shapes() {
        let c = row_candidate(&cells(&["Widget A", "2", "$25.00", "$50.00"])).unwrap();
        assert_eq!(c.description, "Widget A");
        assert_eq!(c.quantity, Some(2.0));
        assert_eq!(c.unit_price, Some(25.0));
        assert_eq!(c.amount, 50.0);

        let c = row_candidate(&cells(&["SKU-1", "Consulting", "", "1,200.00"])).unwrap();
        assert_eq!(c.description, "Consulting");
        assert_eq!(c.quantity, None);
        assert_eq!(c.amount, 1200.0);
    }

    #[test]
    fn test_row_candidate_rejections() {
        assert!(row_candidate(&cells(&["Subtotal", "", "450.00"])).is_none());
        assert!(row_candidate(&cells(&["Widget A", "2", "n/a"])).is_none());
        assert!(row_candidate(&cells(&["Widget A", "0.00"])).is_none());
        assert!(row_candidate(&cells(&["12", "50.00"])).is_none());
        assert!(row_candidate(&[]).is_none());
    }

    const RESPONSE: &str = r#"{
      "document": {
        "text": "INV-77\nGlobex Inc\nPlan 100.00\nSupport 50.00\nTotal 150.00",
        "entities": [
          {"type": "invoice_id", "mentionText": "INV-77", "confidence": 0.9},
          {"type": "supplier_name", "confidence": 0.7,
           "textAnchor": {"textSegments": [{"startIndex": "7", "endIndex": "17"}]}},
          {"type": "invoice_date", "mentionText": "5 Jan 2024", "confidence": 0.8,
           "normalizedValue": {"text": "2024-01-05"}},
          {"type": "total_amount", "mentionText": "$150.00", "confidence": 0.6},
          {"type": "mystery_field", "mentionText": "ignored", "confidence": 0.1}
        ],
        "pages": [{
          "tables": [{
            "headerRows": [],
            "bodyRows": [
              {"cells": [
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "18", "endIndex": "22"}]}}},
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "23", "endIndex": "29"}]}}}
              ]},
              {"cells": [
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "30", "endIndex": "37"}]}}},
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "38", "endIndex": "43"}]}}}
              ]},
              {"cells": [
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "44", "endIndex": "49"}]}}},
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": "50", "endIndex": "56"}]}}}
              ]}
            ]
          }]
        }]
      }
    }"#;

    #[test]
    fn test_entities_and_table_mapped() {
        let resp: ProcessResponse = serde_json::from_str(RESPONSE).unwrap();
        let (data, confidence) = to_invoice(&resp.document, &ExtractionSection::default());

        assert_eq!(data.invoice_number.as_deref(), Some("INV-77"));
        assert_eq!(data.vendor.name.as_deref(), Some("Globex Inc"));
        assert_eq!(data.date.as_deref(), Some("2024-01-05"));
        assert_eq!(data.amounts.total, Some(150.0));
        assert_eq!(data.amounts.currency.as_deref(), Some("USD"));
        assert!((confidence - 75.0).abs() < 1e-9);
        assert_eq!(data.confidence, confidence);

        let descriptions: Vec<&str> = data.items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Plan", "Support"]);
        assert_eq!(data.items[1].line_number, 2);
    }

    #[test]
    fn test_no_entities_zero_confidence_default_currency() {
        let doc = WireDocument::default();
        let cfg = ExtractionSection {
            default_currency: "GBP".to_string(),
            ..Default::default()
        };
        let (data, confidence) = to_invoice(&doc, &cfg);
        assert_eq!(confidence, 0.0);
        assert!(data.items.is_empty());
        assert_eq!(data, InvoiceData::empty("GBP"));
    }

    #[test]
    fn test_line_item_entities_without_tables() {
        let json = r#"{"document": {"text": "", "entities": [
            {"type": "line_item", "confidence": 0.9, "properties": [
                {"type": "line_item/description", "mentionText": "Annual licence"},
                {"type": "line_item/quantity", "mentionText": "3"},
                {"type": "line_item/amount", "mentionText": "300.00"}
            ]},
            {"type": "line_item", "confidence": 0.9, "properties": [
                {"type": "line_item/description", "mentionText": "Total"},
                {"type": "line_item/amount", "mentionText": "300.00"}
            ]}
        ]}}"#;
        let resp: ProcessResponse = serde_json::from_str(json).unwrap();
        let (data, confidence) = to_invoice(&resp.document, &ExtractionSection::default());
        assert_eq!(confidence, 0.0);
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].description, "Annual licence");
        assert_eq!(data.items[0].quantity, 3.0);
        assert_eq!(data.items[0].unit_price, 100.0);
    }
}
