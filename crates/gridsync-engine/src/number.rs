//! Lenient numeric parsing and display.
//!
//! Cell values arrive from clients as free text. Everywhere the engine needs a
//! number (formula parameters, trigger conditions, column summaries) it reads
//! the longest numeric prefix of the text, so `"12 kg"` is `12` and `"abc"`
//! has no numeric value at all.

use regex::Regex;
use std::sync::OnceLock;

fn numeric_prefix_re() -> &'static Regex {
    static NUMERIC_RE: OnceLock<Regex> = OnceLock::new();
    NUMERIC_RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)")
            .expect("numeric prefix regex must compile")
    })
}

/// Parse the longest numeric prefix of `text`, ignoring leading whitespace.
/// Returns `None` when the text does not start with a number.
pub fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let prefix = numeric_prefix_re().find(trimmed)?.as_str();
    match prefix.trim_start_matches(['+', '-']) {
        "Infinity" => Some(if prefix.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        _ => prefix.parse::<f64>().ok(),
    }
}

/// Numeric value of `text`, with anything non-numeric counting as zero.
pub fn parse_float_or_zero(text: &str) -> f64 {
    match parse_float(text) {
        Some(n) if !n.is_nan() => n,
        _ => 0.0,
    }
}

/// Format a number the way clients print it: integers without a fraction,
/// everything else in shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}
