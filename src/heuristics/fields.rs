use super::line_items::{is_header, is_summary_line};
use super::values::{CURRENCY_CODES, normalize_date, parse_amount};
use super::{InvoiceData, Party};
use crate::config::ExtractionSection;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Amount after a label. The value lands in the `v` group. Only a known
/// upper-case currency code may sit between label and amount.
const MONEY: &str = r"(?:(?-i:{CODES})\s?)?[$€£¥₹]?\s?(?P<v>\(?-?(?:\d{1,3}(?:,\d{3})+|\d+)(?:[.,]\d{1,2})?\)?)";
const DATE: &str = r"(?P<v>\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|[A-Za-z]{3,9}\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}|\d{1,2}(?:st|nd|rd|th)?\s+[A-Za-z]{3,9}\.?,?\s+\d{4}|\d{1,2}-[A-Za-z]{3}-\d{2,4})";
const IDENT: &str = r"(?P<v>[A-Z0-9][A-Z0-9\-/]*)";

#[derive(Debug, Clone, Copy)]
enum Field {
    InvoiceNumber,
    Date,
    DueDate,
    VendorName,
    VendorPhone,
    VendorEmail,
    VendorWebsite,
    VendorTaxId,
    Subtotal,
    Tax,
    TaxRate,
    Discount,
    Total,
    AmountPaid,
    BalanceDue,
    PaymentMethod,
    PaymentTerms,
    BankDetails,
    OrderNumber,
    OrderDate,
    Reference,
    Notes,
}

enum Value {
    Text(String),
    Number(f64),
}

/// Which part of the document a rule searches.
#[derive(Clone, Copy)]
enum Scope {
    Document,
    /// Text above the bill-to block, where the issuer introduces itself.
    Vendor,
}

struct FieldRule {
    field: Field,
    scope: Scope,
    patterns: Vec<Regex>,
    post: fn(&str, &ExtractionSection) -> Option<Value>,
}

impl Field {
    fn text_slot(self, d: &mut InvoiceData) -> Option<&mut Option<String>> {
        Some(match self {
            Field::InvoiceNumber => &mut d.invoice_number,
            Field::Date => &mut d.date,
            Field::DueDate => &mut d.due_date,
            Field::VendorName => &mut d.vendor.name,
            Field::VendorPhone => &mut d.vendor.phone,
            Field::VendorEmail => &mut d.vendor.email,
            Field::VendorWebsite => &mut d.vendor.website,
            Field::VendorTaxId => &mut d.vendor.tax_id,
            Field::PaymentMethod => &mut d.payment_details.method,
            Field::PaymentTerms => &mut d.payment_details.terms,
            Field::BankDetails => &mut d.payment_details.bank_details,
            Field::OrderNumber => &mut d.order_info.order_number,
            Field::OrderDate => &mut d.order_info.order_date,
            Field::Reference => &mut d.order_info.reference,
            Field::Notes => &mut d.notes,
            _ => return None,
        })
    }

    fn number_slot(self, d: &mut InvoiceData) -> Option<&mut Option<f64>> {
        Some(match self {
            Field::Subtotal => &mut d.amounts.subtotal,
            Field::Tax => &mut d.amounts.tax,
            Field::TaxRate => &mut d.amounts.tax_rate,
            Field::Discount => &mut d.amounts.discount,
            Field::Total => &mut d.amounts.total,
            Field::AmountPaid => &mut d.amounts.amount_paid,
            Field::BalanceDue => &mut d.amounts.balance_due,
            _ => return None,
        })
    }

    fn is_set(self, d: &mut InvoiceData) -> bool {
        if let Some(slot) = self.text_slot(d) {
            return slot.is_some();
        }
        self.number_slot(d).is_some_and(|slot| slot.is_some())
    }

    fn store(self, d: &mut InvoiceData, value: Value) {
        match value {
            Value::Text(s) => {
                if let Some(slot) = self.text_slot(d) {
                    *slot = Some(s);
                }
            }
            Value::Number(n) => {
                if let Some(slot) = self.number_slot(d) {
                    *slot = Some(n);
                }
            }
        }
    }
}

impl FieldRule {
    /// First capture, across patterns in order, that the post function accepts.
    fn first_match(&self, haystack: &str, cfg: &ExtractionSection) -> Option<Value> {
        self.patterns.iter().find_map(|re| {
            re.captures_iter(haystack)
                .find_map(|c| (self.post)(c.name("v")?.as_str().trim(), cfg))
        })
    }
}

fn field_rule(
    field: Field,
    scope: Scope,
    patterns: &[&str],
    post: fn(&str, &ExtractionSection) -> Option<Value>,
) -> FieldRule {
    let patterns = patterns
        .iter()
        .map(|p| {
            let p = p
                .replace("{MONEY}", MONEY)
                .replace("{CODES}", CURRENCY_CODES)
                .replace("{DATE}", DATE)
                .replace("{IDENT}", IDENT);
            Regex::new(&p).unwrap()
        })
        .collect();
    FieldRule {
        field,
        scope,
        patterns,
        post,
    }
}

static RULES: Lazy<Vec<FieldRule>> = Lazy::new(|| {
    use Field::*;
    use Scope::*;
    vec![
        field_rule(
            InvoiceNumber,
            Document,
            &[
                r"(?im)\binvoice\s*(?:no\.?|number|num\.?|#)\s*[:#]?\s*{IDENT}",
                r"(?im)\binv(?:oice)?\s*(?:id)?\s*[:#]\s*{IDENT}",
                r"(?im)^\s*#\s*{IDENT}",
                r"(?m)\b(?P<v>INV[-/]?\d[A-Z0-9\-/]*)",
            ],
            post_identifier,
        ),
        field_rule(
            Date,
            Document,
            &[
                r"(?im)^\s*(?:invoice\s+|issue\s+|bill(?:ing)?\s+)?date(?:\s+of\s+issue)?\s*[:\-]?\s*{DATE}",
                r"(?i)\b(?:invoice\s+date|date\s+issued|issued\s+on|issue\s+date|dated)\s*[:\-]?\s*{DATE}",
            ],
            post_date,
        ),
        field_rule(Date, Document, &[r"(?i){DATE}"], post_valid_date),
        field_rule(
            DueDate,
            Document,
            &[r"(?i)\b(?:due\s+date|payment\s+due|due\s+by|due\s+on|date\s+due|due)\s*[:\-]?\s*{DATE}"],
            post_date,
        ),
        field_rule(
            VendorName,
            Vendor,
            &[r"(?im)^\s*(?:from|vendor|seller|supplier|bill(?:ed)?\s+from|issued\s+by|sold\s+by|company)\s*:\s*(?P<v>[^\n]+)$"],
            post_name,
        ),
        field_rule(
            VendorPhone,
            Vendor,
            &[
                r"(?i)\b(?:phone|telephone|tel|mobile|cell|ph)\.?\s*[:\-]?\s*(?P<v>\+?[\d(][\d ().\-]{6,}\d)",
                r"(?P<v>\(\d{3}\) ?\d{3}-\d{4}|\+\d{1,3}[ \-]\d[\d \-]{6,}\d)",
            ],
            post_phone,
        ),
        field_rule(
            VendorEmail,
            Vendor,
            &[r"(?i)(?P<v>[A-Z0-9._%+\-]+@[A-Z0-9\-]+(?:\.[A-Z0-9\-]+)*\.[A-Z]{2,})"],
            post_text,
        ),
        field_rule(
            VendorWebsite,
            Vendor,
            &[
                r"(?i)(?P<v>https?://[^\s,;]+)",
                r"(?i)\b(?P<v>www\.[A-Z0-9\-]+(?:\.[A-Z0-9\-]+)+(?:/[^\s,;]*)?)",
            ],
            post_url,
        ),
        field_rule(
            VendorTaxId,
            Vendor,
            &[r"(?i)\b(?:tax\s*id|tax\s*(?:no\.?|number)|vat\s*(?:reg(?:istration)?\.?\s*)?(?:no\.?|number|id)|gstin|gst\s*(?:reg(?:istration)?\.?\s*)?(?:no\.?|number)|(?:tin|ein|abn)\b)\s*[:#]?\s*(?P<v>[A-Z0-9][A-Z0-9\- ]{3,20}[A-Z0-9])"],
            post_tax_id,
        ),
        field_rule(
            Subtotal,
            Document,
            &[
                r"(?im)^\s*sub\s*-?\s*total\s*(?:\([^)\n]*\))?\s*[:\-]?\s*{MONEY}",
                r"(?i)\bsub\s*-?\s*total\s*[:\-]?\s*{MONEY}",
            ],
            post_money,
        ),
        field_rule(
            Tax,
            Document,
            &[r"(?im)^\s*(?:sales\s+|total\s+)?(?:tax|vat|gst|hst|pst)(?:\s+amount)?\s*(?:\(\s*\d{1,2}(?:\.\d+)?\s*%\s*\)|@?\s*\d{1,2}(?:\.\d+)?\s*%)?\s*[:\-]?\s*{MONEY}"],
            post_money,
        ),
        field_rule(
            TaxRate,
            Document,
            &[r"(?im)^\s*(?:sales\s+)?(?:tax|vat|gst|hst|pst)(?:\s+rate)?\s*[:\-]?\s*[(@]?\s*(?P<v>\d{1,2}(?:\.\d+)?)\s*%"],
            post_percent,
        ),
        field_rule(
            Discount,
            Document,
            &[r"(?im)^\s*(?:less\s+)?discount\s*(?:\(?\s*\d{1,3}(?:\.\d+)?\s*%\s*\)?)?\s*[:\-]?\s*-?\s*{MONEY}"],
            post_abs_money,
        ),
        field_rule(
            Total,
            Document,
            &[
                r"(?im)^\s*(?:grand\s+|invoice\s+)?total(?:\s+(?:amount|payable|due|incl(?:uding)?\.?\s*(?:tax|vat|gst)))?\s*(?:\([^)\n]*\))?\s*[:\-]?\s*{MONEY}",
                r"(?im)^\s*amount\s+(?:due|payable)\s*[:\-]?\s*{MONEY}",
                r"(?i)\btotal\s*[:\-]?\s*{MONEY}",
            ],
            post_money,
        ),
        field_rule(
            AmountPaid,
            Document,
            &[r"(?im)^\s*(?:amount\s+paid|paid(?:\s+to\s+date)?|payments?(?:\s+received)?|deposit)\s*[:\-]?\s*-?\s*{MONEY}"],
            post_abs_money,
        ),
        field_rule(
            BalanceDue,
            Document,
            &[r"(?im)^\s*(?:balance(?:\s+due)?|amount\s+due|amount\s+outstanding)\s*[:\-]?\s*{MONEY}"],
            post_money,
        ),
        field_rule(
            PaymentMethod,
            Document,
            &[r"(?im)^\s*(?:payment\s+method|method\s+of\s+payment|pay(?:ment)?\s+(?:by|via))\s*[:\-]?\s*(?P<v>[^\n]+)$"],
            post_text,
        ),
        field_rule(
            PaymentTerms,
            Document,
            &[
                r"(?im)^\s*(?:payment\s+)?terms\s*[:\-]\s*(?P<v>[^\n]+)$",
                r"(?i)\b(?P<v>net\s*\d{1,3}|due\s+(?:up)?on\s+receipt|payable\s+on\s+receipt|cash\s+on\s+delivery)\b",
            ],
            post_text,
        ),
        field_rule(
            BankDetails,
            Document,
            &[r"(?im)^\s*(?P<v>(?:bank(?:\s+(?:name|details|account))?|iban|swift|bic|account\s+(?:no\.?|number)|routing\s+(?:no\.?|number)|sort\s+code)\s*[:\-]\s*[^\n]+)$"],
            post_text,
        ),
        field_rule(
            OrderNumber,
            Document,
            &[r"(?i)\b(?:p\.?\s?o\.?|purchase\s+order|order)\s*(?:no\.?|number|#)?\s*[:#]\s*{IDENT}"],
            post_identifier,
        ),
        field_rule(
            OrderDate,
            Document,
            &[r"(?i)\b(?:order|po|purchase\s+order)\s+date\s*[:\-]?\s*{DATE}"],
            post_date,
        ),
        field_rule(
            Reference,
            Document,
            &[r"(?i)\bref(?:erence)?\.?\s*(?:no\.?|number|#)?\s*[:#]\s*{IDENT}"],
            post_identifier,
        ),
        field_rule(
            Notes,
            Document,
            &[r"(?im)^\s*(?:notes?|memo|comments?|remarks?)\s*[:\-]\s*(?P<v>[^\n]+)$"],
            post_text,
        ),
    ]
});

static BILL_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:bill(?:ed)?|sold|invoice)\s*to\b\s*:?|(?:customer|client|buyer)\s*:)\s*(?P<rest>.*)$")
        .unwrap()
});
static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z .#/]{1,30}:").unwrap());
static CONTACT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:phone|tel|telephone|mobile|cell|fax|e-?mail)\b").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[A-Z0-9._%+\-]+@[A-Z0-9\-]+(?:\.[A-Z0-9\-]+)*\.[A-Z]{2,}").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\d{3}\) ?\d{3}-\d{4}|\+\d{1,3}[ \-]\d[\d \-]{6,}\d|\d{3}[ .\-]\d{3}[ .\-]\d{4}").unwrap()
});
static WEBSITE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)").unwrap());
static MONEY_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d\.\d{2}$").unwrap());
static TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:tax\s+)?(?:invoice|receipt|statement|bill|quote|quotation|estimate|credit\s+note|page)\b")
        .unwrap()
});
static COMPANY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:inc|llc|l\.l\.c|ltd|limited|corp|corporation|co|company|gmbh|plc|pty|pte|llp|lp|ag|bv|sa|srl|oy|ab)\.?$",
    )
    .unwrap()
});

const MAX_BLOCK_LINES: usize = 6;
const MAX_ADDRESS_LINES: usize = 3;

/// Fill the scalar fields of `data` from normalized text.
pub(crate) fn extract_fields(text: &str, cfg: &ExtractionSection, data: &mut InvoiceData) {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let bill_to = bill_to_block(&lines);
    let vendor_lines = match &bill_to {
        Some((start, _)) => &lines[..*start],
        None => &lines[..],
    };
    let vendor_text = vendor_lines.join("\n");
    if let Some((_, party)) = bill_to {
        data.bill_to = party;
    }

    for rule in RULES.iter() {
        if rule.field.is_set(data) {
            continue;
        }
        let haystack = match rule.scope {
            Scope::Document => text,
            Scope::Vendor => vendor_text.as_str(),
        };
        if let Some(value) = rule.first_match(haystack, cfg) {
            debug!(field = ?rule.field, "Field matched");
            rule.field.store(data, value);
        }
    }

    let bill_to_name = data.bill_to.name.clone();
    if data
        .vendor
        .name
        .as_deref()
        .is_some_and(|n| same_name(n, bill_to_name.as_deref()))
    {
        data.vendor.name = None;
    }
    if data.vendor.name.is_none() {
        data.vendor.name = vendor_name_fallback(vendor_lines, bill_to_name.as_deref());
    }
    if let Some(name) = data.vendor.name.as_deref() {
        data.vendor.address = address_after(vendor_lines, name);
    }
}

fn same_name(a: &str, b: Option<&str>) -> bool {
    b.is_some_and(|b| a.trim().eq_ignore_ascii_case(b.trim()))
}

/// The bill-to block: its first line index and the party it names.
fn bill_to_block(lines: &[&str]) -> Option<(usize, Party)> {
    let (start, rest) = lines.iter().enumerate().find_map(|(i, line)| {
        BILL_TO
            .captures(line)
            .map(|c| (i, c["rest"].trim().to_string()))
    })?;

    let mut block: Vec<String> = Vec::new();
    if !rest.is_empty() {
        block.push(rest);
    }
    for line in &lines[start + 1..] {
        if line.is_empty() {
            if block.is_empty() {
                continue;
            }
            break;
        }
        let ends = (LABEL.is_match(line) && !CONTACT_LABEL.is_match(line))
            || MONEY_TAIL.is_match(line)
            || BILL_TO.is_match(line);
        if ends || block.len() >= MAX_BLOCK_LINES {
            break;
        }
        block.push(line.to_string());
    }

    let mut party = Party::default();
    let mut address = Vec::new();
    for line in block {
        if let Some(m) = EMAIL.find(&line) {
            party.email.get_or_insert_with(|| m.as_str().to_string());
            continue;
        }
        if let Some(m) = PHONE.find(&line) {
            party.phone.get_or_insert_with(|| m.as_str().to_string());
            continue;
        }
        if CONTACT_LABEL.is_match(&line) {
            continue;
        }
        if party.name.is_none() {
            party.name = Some(line);
        } else {
            address.push(line);
        }
    }
    if !address.is_empty() {
        party.address = Some(address.join(", "));
    }
    Some((start, party))
}

fn is_name_line(line: &str) -> bool {
    let len = line.chars().count();
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    (2..=80).contains(&len)
        && letters >= 2
        && digits <= 2
        && !line.starts_with(|c: char| c.is_ascii_digit())
        && !line.contains([':', '@'])
        && !WEBSITE.is_match(line)
        && !TITLE_PREFIX.is_match(line)
        && !MONEY_TAIL.is_match(line)
        && line.split_whitespace().count() <= 8
        && !is_header(line)
        && !is_summary_line(line)
}

/// Company-suffixed line first, then the first line that reads like a name.
fn vendor_name_fallback(lines: &[&str], bill_to_name: Option<&str>) -> Option<String> {
    let candidates: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| is_name_line(l) && !same_name(l, bill_to_name))
        .collect();
    candidates
        .iter()
        .find(|l| COMPANY_SUFFIX.is_match(l))
        .or_else(|| candidates.first())
        .map(|l| l.to_string())
}

fn is_address_line(line: &str) -> bool {
    !line.is_empty()
        && !LABEL.is_match(line)
        && !line.contains('@')
        && !WEBSITE.is_match(line)
        && !PHONE.is_match(line)
        && !MONEY_TAIL.is_match(line)
        && !TITLE_PREFIX.is_match(line)
        && (line.contains(',') || line.chars().any(|c| c.is_ascii_digit()))
}

/// Address lines directly under the vendor name.
fn address_after(lines: &[&str], name: &str) -> Option<String> {
    let idx = lines.iter().position(|l| l.contains(name))?;
    let parts: Vec<&str> = lines[idx + 1..]
        .iter()
        .copied()
        .take_while(|l| is_address_line(l))
        .take(MAX_ADDRESS_LINES)
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn post_identifier(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let id = raw.trim_end_matches(['-', '/', '.', ',']);
    (id.chars().any(|c| c.is_ascii_digit()) && id.len() <= 40).then(|| Value::Text(id.to_string()))
}

fn post_date(raw: &str, cfg: &ExtractionSection) -> Option<Value> {
    let date = normalize_date(raw, cfg.date_order).unwrap_or_else(|| raw.to_string());
    Some(Value::Text(date))
}

/// Unlabeled matches count only when they are real calendar dates.
fn post_valid_date(raw: &str, cfg: &ExtractionSection) -> Option<Value> {
    normalize_date(raw, cfg.date_order).map(Value::Text)
}

fn post_money(raw: &str, _: &ExtractionSection) -> Option<Value> {
    parse_amount(raw).map(Value::Number)
}

fn post_abs_money(raw: &str, _: &ExtractionSection) -> Option<Value> {
    parse_amount(raw).map(|v| Value::Number(v.abs()))
}

fn post_percent(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let rate: f64 = raw.parse().ok()?;
    (rate > 0.0 && rate <= 100.0).then_some(Value::Number(rate))
}

fn post_text(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let text = raw.trim();
    (!text.is_empty()).then(|| Value::Text(text.to_string()))
}

fn post_name(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let name = raw.trim();
    let ok = (2..=80).contains(&name.chars().count()) && name.chars().any(|c| c.is_alphabetic());
    ok.then(|| Value::Text(name.to_string()))
}

fn post_phone(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits).then(|| Value::Text(raw.trim().to_string()))
}

fn post_url(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let url = raw.trim_end_matches(['.', ',', ')']);
    (url.len() > 4).then(|| Value::Text(url.to_string()))
}

fn post_tax_id(raw: &str, _: &ExtractionSection) -> Option<Value> {
    let id = raw.trim();
    let alnum = id.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    (alnum >= 5 && id.chars().any(|c| c.is_ascii_digit())).then(|| Value::Text(id.to_string()))
}
