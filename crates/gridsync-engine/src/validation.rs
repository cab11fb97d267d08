//! Validation filter for incoming edits.
//!
//! Validation never rejects a write. An invalid value is forwarded with
//! `inValidMessage` set to the rule's message.

use std::sync::OnceLock;

use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::locks::LockMap;
use crate::model::{ChangeOverlay, UserId};
use crate::scheme::{ValidationKind, ValidationRule, ValidationRules};

const INN_10: [u32; 9] = [2, 4, 10, 3, 5, 9, 4, 6, 8];
const INN_11: [u32; 10] = [7, 2, 4, 10, 3, 5, 9, 4, 6, 8];
const INN_12: [u32; 11] = [3, 7, 2, 4, 10, 3, 5, 9, 4, 6, 8];

/// Result of filtering an edit.
#[derive(Clone, Debug, PartialEq)]
pub struct Validated {
    pub locks: LockMap,
    pub changes: ChangeOverlay,
}

fn check_digit(digits: &[u32], coefficients: &[u32]) -> u32 {
    let n: u32 = coefficients.iter().zip(digits).map(|(c, d)| c * d).sum();
    (n % 11) % 10
}

/// Check a Russian taxpayer id. Returns the error message, or `None` if valid.
pub fn validate_inn(inn: &str) -> Option<&'static str> {
    if inn.is_empty() {
        return Some("ИНН пуст");
    }
    if !inn.chars().all(|c| c.is_ascii_digit()) {
        return Some("ИНН может состоять только из цифр");
    }
    let digits: Vec<u32> = inn.chars().filter_map(|c| c.to_digit(10)).collect();
    let valid = match digits.len() {
        10 => check_digit(&digits, &INN_10) == digits[9],
        12 => check_digit(&digits, &INN_11) == digits[10] && check_digit(&digits, &INN_12) == digits[11],
        _ => return Some("ИНН может состоять только из 10 или 12 цифр"),
    };
    if valid {
        None
    } else {
        Some("Неправильное контрольное число")
    }
}

/// Compiled validation patterns keyed by source. Unparsable patterns are
/// kept as `None` so they are reported once.
fn patterns() -> &'static DashMap<String, Option<Regex>> {
    static PATTERNS: OnceLock<DashMap<String, Option<Regex>>> = OnceLock::new();
    PATTERNS.get_or_init(DashMap::new)
}

fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(hit) = patterns().get(pattern) {
        return hit.value().clone();
    }
    let built = match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "ignoring unparsable validation pattern");
            None
        }
    };
    patterns().insert(pattern.to_string(), built.clone());
    built
}

/// Does `value` pass `rule`? Rules without a type fall back to their pattern;
/// rules without either pass everything.
pub fn check_rule(rule: &ValidationRule, value: &str) -> bool {
    let kind = match rule.kind {
        Some(kind) => kind,
        None if rule.reg_exp.is_some() => ValidationKind::RegExp,
        None => return true,
    };
    match kind {
        ValidationKind::RegExp => {
            let Some(pattern) = rule.reg_exp.as_deref() else {
                return true;
            };
            let pattern = pattern.replace("//", "/");
            compiled(&pattern).is_none_or(|re| re.is_match(value))
        }
        ValidationKind::Inn => value.is_empty() || validate_inn(value).is_none(),
        ValidationKind::Other => true,
    }
}

/// The rule for a cell: a typed per-cell override beats the column rule.
pub fn rule_for<'a>(rules: &'a ValidationRules, row: &str, col: &str) -> Option<&'a ValidationRule> {
    let custom = rules
        .custom_cells
        .get(row)
        .and_then(|cols| cols.get(col))
        .filter(|rule| rule.kind.is_some());
    custom.or_else(|| rules.cols.get(col))
}

/// Filter an incoming edit: release locks on edited cells, stamp the author
/// and annotate values that fail their rule.
pub fn check_validators(
    rules: Option<&ValidationRules>,
    locks: &LockMap,
    incoming: &ChangeOverlay,
    user_id: &UserId,
) -> Validated {
    let empty = ValidationRules::default();
    let rules = rules.unwrap_or(&empty);
    let mut locks = locks.clone();
    let mut changes = ChangeOverlay::new();

    for (row_id, cols) in incoming {
        for (col, change) in cols {
            locks.release_cell(row_id, col);

            let mut out = change.clone();
            out.user_id = Some(user_id.clone());
            let failed = rule_for(rules, row_id, col)
                .filter(|rule| !rule.is_empty())
                .filter(|rule| !check_rule(rule, &change.value.to_string()));
            if let Some(rule) = failed {
                out.in_valid_message = rule.error_message.clone();
            }
            changes
                .entry(row_id.clone())
                .or_default()
                .insert(col.clone(), out);
        }
    }

    Validated { locks, changes }
}
