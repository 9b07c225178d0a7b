// src/normalize.rs

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on fixed-point passes. Real input settles in two or three.
const MAX_PASSES: usize = 8;

static CURRENCY_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"([$€£¥₹])[ ]+(\d)").unwrap());
static DECIMAL_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)[ ]?\.[ ](\d{2})\b").unwrap());
static DECIMAL_GAP_BEFORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)[ ]\.(\d{2})\b").unwrap());
static SPACED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})[ ]?([/\-.])[ ]?(\d{1,2})[ ]?([/\-.])[ ]?(\d{2,4})\b").unwrap()
});
static SPACED_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z0-9._%+\-]+)[ ]?@[ ]?([A-Za-z0-9\-]+)[ ]?\.[ ]?([A-Za-z]{2,})\b").unwrap()
});
static SPACED_PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([ ]?(\d{3})[ ]?\)[ ]?(\d{3})[ ]?-[ ]?(\d{4})\b").unwrap());

/// Deterministic cleanup of extracted text. `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let mut current = unify_line_endings(text);
    for _ in 0..MAX_PASSES {
        let next = pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn pass(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for raw in text.split('\n') {
        let line = fix_line(&collapse_whitespace(raw));
        if line.is_empty() {
            if !blank_run && !lines.is_empty() {
                lines.push(String::new());
            }
            blank_run = true;
        } else {
            lines.push(line);
            blank_run = false;
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn collapse_whitespace(line: &str) -> String {
    line.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn fix_line(line: &str) -> String {
    let line = fix_confusions(line);
    let line = CURRENCY_GAP.replace_all(&line, "$1$2");
    let line = DECIMAL_GAP.replace_all(&line, "$1.$2");
    let line = DECIMAL_GAP_BEFORE.replace_all(&line, "$1.$2");
    let line = SPACED_DATE.replace_all(&line, "$1$2$3$4$5");
    let line = SPACED_EMAIL.replace_all(&line, "$1@$2.$3");
    let line = SPACED_PHONE.replace_all(&line, "($1) $2-$3");
    line.trim().to_string()
}

/// Digit/letter look-alikes. A token that reads as a number once its
/// look-alikes are mapped becomes that number; inside lowercase words the
/// reverse mapping applies.
fn fix_confusions(line: &str) -> String {
    line.split(' ')
        .map(|token| fix_alpha_context(&fix_numeric_token(token)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fix_numeric_token(token: &str) -> String {
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let numeric_shape = token.chars().all(|c| {
        c.is_ascii_digit() || matches!(c, 'O' | 'o' | 'l' | 'I' | 'S' | '.' | ',' | '$' | '€' | '£' | '-' | '/')
    });
    if !has_digit || !numeric_shape || token.chars().count() < 2 {
        return token.to_string();
    }
    token
        .chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'l' | 'I' => '1',
            'S' => '5',
            c => c,
        })
        .collect()
}

fn fix_alpha_context(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let mut out = chars.clone();
    for i in 1..chars.len().saturating_sub(1) {
        if out[i - 1].is_ascii_lowercase() && chars[i + 1].is_ascii_lowercase() {
            out[i] = match chars[i] {
                '0' => 'o',
                '1' => 'l',
                '5' => 's',
                c => c,
            };
        }
    }
    out.into_iter().collect()
}
