use super::LineItem;
use super::values::parse_amount;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

const MAX_AMOUNT: f64 = 1_000_000.0;
const MAX_QUANTITY: f64 = 10_000.0;
const CENT: f64 = 0.01;

const MONEY: &str = r"[$€£¥₹]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{2})?";
const MONEY_CENTS: &str = r"[$€£¥₹]?(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2}";
const QTY: &str = r"\d{1,5}(?:\.\d{1,3})?";

/// The layouts a line item can take, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `Consulting 3 x 80.00 = 240.00`
    QtyTimesPrice,
    /// `Widget A 2 25.00 50.00`; the amount carries cents.
    QtyUnitAmount,
    /// `SKU-1001 USB Cable 12.50`
    CodeDescAmount,
    /// `Logo Design 250.00`
    DescAmount,
}

/// A line that looks like an item, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub description: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub amount: f64,
}

struct ShapeRule {
    shape: Shape,
    pattern: Regex,
    parse: fn(&Captures) -> Option<Candidate>,
}

static SHAPES: Lazy<Vec<ShapeRule>> = Lazy::new(|| {
    vec![
        ShapeRule {
            shape: Shape::QtyTimesPrice,
            pattern: Regex::new(&format!(
                r"(?i)^(?P<desc>.+?)\s+(?P<qty>{QTY})\s*[x×*@]\s*(?P<unit>{MONEY})\s*=\s*(?P<amount>{MONEY})$"
            ))
            .unwrap(),
            parse: parse_priced,
        },
        ShapeRule {
            shape: Shape::QtyUnitAmount,
            pattern: Regex::new(&format!(
                r"^(?P<desc>.+?)\s+(?P<qty>{QTY})\s+(?:(?i:pcs|pc|ea|each|hrs?|hours?|units?|days?)\s+)?(?P<unit>{MONEY})\s+(?P<amount>{MONEY_CENTS})$"
            ))
            .unwrap(),
            parse: parse_priced,
        },
        ShapeRule {
            shape: Shape::CodeDescAmount,
            pattern: Regex::new(&format!(
                r"^(?P<code>[A-Z0-9][A-Z0-9\-]{{2,}})\s+(?P<desc>.+?)\s+(?P<amount>{MONEY_CENTS})$"
            ))
            .unwrap(),
            parse: parse_coded,
        },
        ShapeRule {
            shape: Shape::DescAmount,
            pattern: Regex::new(&format!(r"^(?P<desc>.+?)\s+(?P<amount>{MONEY_CENTS})$")).unwrap(),
            parse: parse_plain,
        },
    ]
});

static SUMMARY_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:sub\s*-?\s*total|total|tax|vat|gst|hst|pst|freight|shipping|discount|credit|balance|due|paid|payment|deposit|handling|service\s+charge|surcharge|rounding)\b",
    )
    .unwrap()
});

/// The keyword opens the line.
static SUMMARY_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[-*•\s]*(?:less\s+)?(?:grand\s+|invoice\s+|net\s+)?(?:sub\s*-?\s*total|total|(?:sales\s+)?tax|vat|gst|hst|pst|freight|shipping|discount|credit|balance|amount\s+(?:due|paid)|due|paid|payment|deposit|handling|service\s+charge|surcharge|rounding)\b",
    )
    .unwrap()
});

/// The keyword labels the trailing amount, as in `Invoice Total 54.00`.
static SUMMARY_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:sub\s*-?\s*total|total|tax|vat|gst|balance\s+due|amount\s+due|due)\s*(?:\([^)]*\))?\s*:?\s*[$€£¥₹]?\s*[\d,]+(?:\.\d{2})?$",
    )
    .unwrap()
});

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\-=_*.~|+]{3,}$").unwrap());
static TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:tax\s+|commercial\s+|pro\s*-?\s*forma\s+)?(?:invoice|receipt|statement|bill|credit\s+note|quotation|estimate)$",
    )
    .unwrap()
});
const COLUMN_WORDS: &[&str] = &[
    "description", "item", "items", "qty", "quantity", "unit", "price", "rate", "amount", "total",
    "hours", "hrs", "no", "#", "sku", "code", "product", "service", "services", "details", "line",
    "cost", "each", "tax", "vat", "discount", "net", "uom", "%",
];

static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:thank\s*you|thanks|continued|page\s*\d+(?:\s*(?:of|/)\s*\d+)?|carried\s+forward|brought\s+forward|balance\s+forward|see\s+(?:attached|reverse)|e\s*&\s*o\s*e)\b",
    )
    .unwrap()
});

static CATEGORIES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("software", r"\b(?:software|licen[cs]es?|subscriptions?|saas|apps?|application)\b"),
        ("hardware", r"\b(?:hardware|laptops?|computers?|monitors?|keyboards?|mouse|cables?|printers?|devices?|routers?)\b"),
        ("service", r"\b(?:services?|consult(?:ing|ancy)?|support|maintenance|installation|training|advisory|labou?r|repairs?)\b"),
        ("hosting", r"\b(?:hosting|cloud|domains?|servers?|bandwidth|storage|vps|cdn)\b"),
        ("development", r"\b(?:development|programming|coding|integration|api|implementation)\b"),
        ("security", r"\b(?:security|audit|firewall|antivirus|penetration|pentest|ssl|certificates?)\b"),
        ("design", r"\b(?:design|logo|graphics?|branding|ui|ux|mockups?)\b"),
        ("marketing", r"\b(?:marketing|seo|advertising|ads|campaigns?|social\s+media|promotion)\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(&format!("(?i){pattern}")).unwrap()))
    .collect()
});

fn parse_priced(c: &Captures) -> Option<Candidate> {
    Some(Candidate {
        description: clean_description(&c["desc"]),
        quantity: Some(c["qty"].parse().ok()?),
        unit_price: Some(parse_amount(&c["unit"])?),
        amount: parse_amount(&c["amount"])?,
    })
}

fn parse_coded(c: &Captures) -> Option<Candidate> {
    if !c["code"].chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    parse_plain(c)
}

fn parse_plain(c: &Captures) -> Option<Candidate> {
    Some(Candidate {
        description: clean_description(&c["desc"]),
        quantity: None,
        unit_price: None,
        amount: parse_amount(&c["amount"])?,
    })
}

fn clean_description(raw: &str) -> String {
    raw.trim_start_matches(['-', '*', '•', ' ']).trim().to_string()
}

/// Column titles, rules and document titles.
pub(super) fn is_header(line: &str) -> bool {
    if SEPARATOR.is_match(line) || TITLE.is_match(line) {
        return true;
    }
    let words: Vec<String> = line
        .split_whitespace()
        .map(|w| w.trim_matches([':', '.', '(', ')', '|']).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    !words.is_empty() && words.iter().all(|w| COLUMN_WORDS.contains(&w.as_str()))
}

/// A line restating an aggregate. Keyword presence alone is not enough: the
/// keyword has to open the line or label its trailing amount.
pub fn is_summary_line(line: &str) -> bool {
    SUMMARY_KEYWORD.is_match(line) && (SUMMARY_START.is_match(line) || SUMMARY_END.is_match(line))
}

fn match_shapes(line: &str) -> Option<(Shape, Candidate)> {
    SHAPES.iter().find_map(|rule| {
        let caps = rule.pattern.captures(line)?;
        (rule.parse)(&caps).map(|c| (rule.shape, c))
    })
}

/// Bounds every emitted item must satisfy.
pub fn validate_candidate(c: &Candidate) -> bool {
    let desc = c.description.trim();
    let len = desc.chars().count();
    if !(3..=200).contains(&len) || !desc.chars().any(char::is_alphabetic) {
        return false;
    }
    if desc.ends_with(':') || BOILERPLATE.is_match(desc) {
        return false;
    }
    if !(c.amount.is_finite() && c.amount > 0.0 && c.amount <= MAX_AMOUNT) {
        return false;
    }
    if c.quantity.is_some_and(|q| !(q > 0.0 && q <= MAX_QUANTITY)) {
        return false;
    }
    !c.unit_price.is_some_and(|p| p < 0.0)
}

/// Quantity times unit price lands within 1% (or a cent) of the amount.
fn prices_agree(c: &Candidate) -> bool {
    match (c.quantity, c.unit_price) {
        (Some(q), Some(p)) => (q * p - c.amount).abs() <= (c.amount * 0.01).max(CENT),
        _ => true,
    }
}

/// Remove, one at a time from the end, candidates whose amount equals the
/// sum of all the others. What remains has no such candidate.
fn drop_restated_totals(items: &mut Vec<Candidate>) {
    loop {
        let total: f64 = items.iter().map(|c| c.amount).sum();
        let Some(idx) = items
            .iter()
            .rposition(|c| (c.amount - (total - c.amount)).abs() <= CENT)
        else {
            break;
        };
        let dropped = items.remove(idx);
        debug!(description = %dropped.description, amount = dropped.amount, "Dropped restated total");
    }
}

pub fn category_for(description: &str) -> Option<String> {
    CATEGORIES
        .iter()
        .find(|(_, re)| re.is_match(description))
        .map(|(name, _)| name.to_string())
}

/// Validate, drop restated totals, cap, and number the survivors.
pub fn finalize_items(candidates: Vec<Candidate>, max_items: usize) -> Vec<LineItem> {
    let mut kept: Vec<Candidate> = candidates.into_iter().filter(validate_candidate).collect();
    drop_restated_totals(&mut kept);
    if kept.len() > max_items {
        kept.truncate(max_items);
        drop_restated_totals(&mut kept);
    }

    kept.into_iter()
        .enumerate()
        .map(|(i, c)| {
            let quantity = c.quantity.unwrap_or(1.0);
            LineItem {
                category: category_for(&c.description),
                unit_price: c.unit_price.unwrap_or(c.amount / quantity),
                description: c.description,
                quantity,
                amount: c.amount,
                line_number: i + 1,
            }
        })
        .collect()
}

pub(crate) fn extract_line_items(text: &str, max_items: usize) -> Vec<LineItem> {
    let mut candidates = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || is_header(line) {
            continue;
        }
        let Some((shape, candidate)) = match_shapes(line) else {
            continue;
        };
        if is_summary_line(line) {
            debug!(line, "Skipped summary line");
            continue;
        }
        if !prices_agree(&candidate) {
            debug!(line, "Skipped line whose prices disagree");
            continue;
        }
        debug!(?shape, description = %candidate.description, amount = candidate.amount, "Line item candidate");
        candidates.push(candidate);
    }
    finalize_items(candidates, max_items)
}
