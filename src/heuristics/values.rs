use crate::config::DateOrder;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,4})[/.\-](\d{1,2})[/.\-](\d{1,4})$").unwrap());
static ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d)(?:st|nd|rd|th)\b").unwrap());
/// ISO 4217 codes recognized in text, as a regex alternation.
pub(super) const CURRENCY_CODES: &str = "USD|EUR|GBP|CAD|AUD|NZD|JPY|CNY|INR|CHF|SEK|NOK|DKK|SGD|HKD|MXN|BRL|ZAR";

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"\b({CURRENCY_CODES})\b")).unwrap());
static CURRENCY_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(US|CA|C|AU|A|NZ|HK|S)\$|[$€£¥₹]").unwrap());

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Normalize a written date to ISO `YYYY-MM-DD`.
///
/// Numeric dates are ordered by whichever component cannot be a month
/// (greater than 12); when both could be, `order` decides. Two-digit years
/// are read as 20xx. Returns `None` when the text is not a real date.
pub fn normalize_date(raw: &str, order: DateOrder) -> Option<String> {
    let cleaned = ORDINAL.replace_all(raw.trim(), "$1");
    let cleaned = cleaned.trim_end_matches(['.', ',']).trim();

    let date = if let Some(c) = NUMERIC_DATE.captures(cleaned) {
        numeric_date(&c[1], &c[2], &c[3], order)?
    } else {
        named_month_date(cleaned)?
    };
    Some(date.format("%Y-%m-%d").to_string())
}

fn numeric_date(a: &str, b: &str, c: &str, order: DateOrder) -> Option<NaiveDate> {
    let (na, nb, nc): (u32, u32, u32) = (a.parse().ok()?, b.parse().ok()?, c.parse().ok()?);

    if a.len() == 4 {
        return NaiveDate::from_ymd_opt(na as i32, nb, nc);
    }
    let year = match c.len() {
        2 => 2000 + nc as i32,
        4 => nc as i32,
        _ => return None,
    };
    let (day, month) = if na > 12 {
        (na, nb)
    } else if nb > 12 {
        (nb, na)
    } else {
        match order {
            DateOrder::DayFirst => (na, nb),
            DateOrder::MonthFirst => (nb, na),
        }
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `March 2, 2024`, `2 Mar 2024`, `02-Mar-2024`.
fn named_month_date(text: &str) -> Option<NaiveDate> {
    let mut month = None;
    let mut numbers = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '/' | '.')) {
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| c.is_ascii_digit()) {
            numbers.push(token);
        } else if month.is_none() {
            let prefix = token.get(..3)?.to_ascii_lowercase();
            let index = MONTHS.iter().position(|m| *m == prefix)?;
            month = Some(index as u32 + 1);
        } else {
            return None;
        }
    }
    let month = month?;
    let [x, y] = numbers.as_slice() else {
        return None;
    };
    let (day, year) = if x.len() == 4 { (y, x) } else { (x, y) };
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day.parse().ok()?)
}

/// First explicit currency code in the text, else the first symbol.
pub fn detect_currency(text: &str) -> Option<String> {
    if let Some(c) = CURRENCY_CODE.captures(text) {
        return Some(c[1].to_string());
    }
    let m = CURRENCY_SYMBOL.captures(text)?;
    let code = match m.get(1).map(|p| p.as_str()) {
        Some("US") => "USD",
        Some("CA" | "C") => "CAD",
        Some("AU" | "A") => "AUD",
        Some("NZ") => "NZD",
        Some("HK") => "HKD",
        Some("S") => "SGD",
        _ => match m.get(0)?.as_str() {
            "€" => "EUR",
            "£" => "GBP",
            "¥" => "JPY",
            "₹" => "INR",
            _ => "USD",
        },
    };
    Some(code.to_string())
}

/// Parse a monetary value: currency symbols and codes, thousands separators
/// and surrounding noise are stripped. `(12.50)` reads as negative.
/// A lone comma followed by exactly two digits is a decimal comma.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let mut digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
        .collect();
    if digits.is_empty() {
        return None;
    }

    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');
    digits = match (last_dot, last_comma) {
        // 1.234,56
        (Some(d), Some(c)) if c > d => digits.replace('.', "").replace(',', "."),
        (None, Some(c)) if digits.len() - c == 3 && digits.matches(',').count() == 1 => {
            digits.replace(',', ".")
        }
        _ => digits.replace(',', ""),
    };

    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unambiguous_dates() {
        assert_eq!(normalize_date("03/15/2024", DateOrder::DayFirst).as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("15/03/2024", DateOrder::MonthFirst).as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("2024-02-01", DateOrder::MonthFirst).as_deref(), Some("2024-02-01"));
        assert_eq!(normalize_date("15.03.24", DateOrder::DayFirst).as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn test_ambiguous_dates_follow_configured_order() {
        assert_eq!(normalize_date("04/05/2024", DateOrder::DayFirst).as_deref(), Some("2024-05-04"));
        assert_eq!(normalize_date("04/05/2024", DateOrder::MonthFirst).as_deref(), Some("2024-04-05"));
    }

    #[test]
    fn test_month_name_dates() {
        assert_eq!(normalize_date("March 2, 2024", DateOrder::DayFirst).as_deref(), Some("2024-03-02"));
        assert_eq!(normalize_date("2nd Mar 2024", DateOrder::DayFirst).as_deref(), Some("2024-03-02"));
        assert_eq!(normalize_date("02-Mar-2024", DateOrder::DayFirst).as_deref(), Some("2024-03-02"));
        assert_eq!(normalize_date("September 30th, 2023", DateOrder::DayFirst).as_deref(), Some("2023-09-30"));
    }

    #[test]
    fn test_invalid_dates() {
        assert_eq!(normalize_date("31/02/2024", DateOrder::DayFirst), None);
        assert_eq!(normalize_date("13/13/2024", DateOrder::DayFirst), None);
        assert_eq!(normalize_date("Widget 2 2024", DateOrder::DayFirst), None);
        assert_eq!(normalize_date("", DateOrder::DayFirst), None);
    }

    #[test]
    fn test_currency_codes_win_over_symbols() {
        assert_eq!(detect_currency("Total $54.00 (CAD)").as_deref(), Some("CAD"));
        assert_eq!(detect_currency("Total €54.00").as_deref(), Some("EUR"));
        assert_eq!(detect_currency("Total £54.00").as_deref(), Some("GBP"));
        assert_eq!(detect_currency("Total: US$54.00").as_deref(), Some("USD"));
        assert_eq!(detect_currency("Total: A$54.00").as_deref(), Some("AUD"));
        assert_eq!(detect_currency("Total: $54.00").as_deref(), Some("USD"));
        assert_eq!(detect_currency("Total 54.00"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("€ 99"), Some(99.0));
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("12,50"), Some(12.5));
        assert_eq!(parse_amount("12,500"), Some(12500.0));
        assert_eq!(parse_amount("-30.00"), Some(-30.0));
        assert_eq!(parse_amount("(7.25)"), Some(-7.25));
        assert_eq!(parse_amount("USD"), None);
    }
}
