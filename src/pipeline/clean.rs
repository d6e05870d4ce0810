//! Value cleaning: deterministic per-cell rules.
//!
//! ## Rule Order
//!
//! 1. Trim and strip surrounding quote characters.
//! 2. Strip currency symbols and thousands separators from numeric-looking
//!    cells; numeric columns also lose unit suffixes (`SF`, `/SF/YR`, ...).
//! 3. `(123)` and `123-` become `-123`.
//! 4. `vacancy_q` only: percentages become decimal fractions.
//! 5. `N/A`, `-` and friends become empty, also behind a currency sign,
//!    brackets or `%` (`$ -`, `(-)`, `-%`).
//!
//! Later rules assume earlier ones ran: the percent rule sees `-5.4%`, never
//! `(5.4%)`. Applying the rules to their own output changes nothing.

use crate::output::{CanonicalColumn, CanonicalRecord, CanonicalResult};
use crate::pipeline::map::MappedTable;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean every record of a mapped table.
pub fn clean(mapped: &MappedTable) -> CanonicalResult {
    CanonicalResult::new(mapped.records.iter().map(clean_record).collect())
}

/// Clean every record of an already-canonical result (generated output).
pub fn clean_result(result: &CanonicalResult) -> CanonicalResult {
    CanonicalResult::new(result.records.iter().map(clean_record).collect())
}

pub fn clean_record(record: &CanonicalRecord) -> CanonicalRecord {
    let mut cleaned = CanonicalRecord::default();
    for column in CanonicalColumn::ALL {
        *cleaned.get_mut(column) = clean_value(column, record.get(column));
    }
    cleaned
}

/// Apply rules 1–5 to one cell of `column`.
pub fn clean_value(column: CanonicalColumn, raw: &str) -> String {
    let s = strip_quotes(raw);
    let s = strip_currency_and_separators(&s, column.is_numeric());
    let s = normalize_negative(&s);
    let s = if column == CanonicalColumn::VacancyQ {
        percent_to_decimal(&s)
    } else {
        s
    };
    blank_missing(s)
}

// ── Rule 1: Quotes ───────────────────────────────────────────────────────

const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '`'];

fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches(QUOTES).trim().to_string()
}

// ── Rule 2: Currency, separators, units ──────────────────────────────────

static RE_UNIT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:/\s*)?(?:sq\.?\s*ft\.?|sf|psf|nnn|yr|year|mo)\.?(?:\s*/\s*(?:sf|yr|year|mo)\.?)*\s*$")
        .unwrap()
});

fn looks_numeric(value: &str) -> bool {
    let core: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | '%' | '(' | ')' | '+' | '-' | ' '))
        .collect();
    !core.is_empty()
        && core.chars().any(|c| c.is_ascii_digit())
        && core.chars().all(|c| c.is_ascii_digit() || c == '.')
        && core.matches('.').count() <= 1
}

fn strip_currency_and_separators(value: &str, numeric_column: bool) -> String {
    let candidate = if numeric_column {
        RE_UNIT_SUFFIX.replace(value, "").into_owned()
    } else {
        value.to_string()
    };
    if !looks_numeric(&candidate) {
        return value.to_string();
    }
    candidate
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',') && !c.is_whitespace())
        .collect()
}

// ── Rule 3: Negative notation ────────────────────────────────────────────

fn normalize_negative(value: &str) -> String {
    if !looks_numeric(value) {
        return value.to_string();
    }
    if let Some(inner) = value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        let inner = inner.trim();
        return match inner.strip_prefix('-') {
            Some(already) => format!("-{already}"),
            None => format!("-{inner}"),
        };
    }
    if let Some(body) = value.strip_suffix('-') {
        if !body.starts_with('-') && !body.is_empty() {
            return format!("-{body}");
        }
    }
    value.to_string()
}

// ── Rule 4: Percent → decimal fraction ───────────────────────────────────

fn percent_to_decimal(value: &str) -> String {
    if let Some(number) = value.strip_suffix('%') {
        return percent_to_fraction(number.trim()).unwrap_or_else(|| value.to_string());
    }
    // A bare number above 1 in a rate column is a percentage missing its sign.
    match value.parse::<f64>() {
        Ok(n) if n.abs() > 1.0 && n.abs() <= 100.0 => {
            percent_to_fraction(value).unwrap_or_else(|| value.to_string())
        }
        _ => value.to_string(),
    }
}

/// Divide a decimal string by 100 by moving the decimal point.
///
/// `"5.4"` → `"0.054"`, `"12"` → `"0.12"`, `"-100"` → `"-1"`.
pub fn percent_to_fraction(number: &str) -> Option<String> {
    let (sign, digits) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number.strip_prefix('+').unwrap_or(number)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty()
        || !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let all_digits = format!("{int_part}{frac_part}");
    let point = int_part.len() as isize - 2;
    let (int_out, frac_out) = if point <= 0 {
        (
            String::from("0"),
            format!("{}{}", "0".repeat(point.unsigned_abs()), all_digits),
        )
    } else {
        let (i, f) = all_digits.split_at(point as usize);
        (i.to_string(), f.to_string())
    };

    let int_out = int_out.trim_start_matches('0');
    let int_out = if int_out.is_empty() { "0" } else { int_out };
    let frac_out = frac_out.trim_end_matches('0');
    let magnitude = if frac_out.is_empty() {
        int_out.to_string()
    } else {
        format!("{int_out}.{frac_out}")
    };
    let sign = if magnitude == "0" { "" } else { sign };
    Some(format!("{sign}{magnitude}"))
}

// ── Rule 5: Missing values ───────────────────────────────────────────────

const MISSING: &[&str] = &["n/a", "na", "-", "--", "—", "–", "n.a.", "nm"];

/// Currency, brackets and `%` around a placeholder (`$ -`, `(-)`, `-%`)
/// do not make it a value.
fn blank_missing(value: String) -> String {
    let bare: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | '(' | ')' | '%') && !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if bare.is_empty() || MISSING.contains(&bare.as_str()) {
        String::new()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CanonicalColumn::*;

    #[test]
    fn percentages_become_fractions() {
        assert_eq!(clean_value(VacancyQ, "5.4%"), "0.054");
        assert_eq!(clean_value(VacancyQ, "12%"), "0.12");
        assert_eq!(clean_value(VacancyQ, "0.5 %"), "0.005");
        assert_eq!(clean_value(VacancyQ, "100%"), "1");
        assert_eq!(clean_value(VacancyQ, "7.3"), "0.073");
        assert_eq!(clean_value(VacancyQ, "0.054"), "0.054");
    }

    #[test]
    fn negative_notation() {
        assert_eq!(clean_value(NetAbsorptionQ, "(1,234)"), "-1234");
        assert_eq!(clean_value(NetAbsorptionQ, "500-"), "-500");
        assert_eq!(clean_value(VacancyQ, "(5.4%)"), "-0.054");
        assert_eq!(clean_value(NetAbsorptionQ, "-42"), "-42");
    }

    #[test]
    fn missing_values_become_empty() {
        for raw in ["N/A", "-", "", "   ", "--", "—", "na", "$-", "$ -", "(-)", "-%"] {
            assert_eq!(clean_value(RentQ, raw), "", "raw {raw:?}");
            assert_eq!(clean_value(VacancyQ, raw), "", "raw {raw:?}");
        }
        assert_eq!(clean_value(PrimarySubmarket, "$ -"), "");
    }

    #[test]
    fn literal_zero_is_kept() {
        assert_eq!(clean_value(DeliveredQ, "0"), "0");
    }

    #[test]
    fn currency_units_and_quotes() {
        assert_eq!(clean_value(RentQ, "$7.25"), "7.25");
        assert_eq!(clean_value(RentQ, "\"$7.25/SF/YR\""), "7.25");
        assert_eq!(clean_value(TotalInventoryQ, "12,345,678 SF"), "12345678");
        assert_eq!(clean_value(RentQ, "€ 6,50"), "650");
    }

    #[test]
    fn text_columns_keep_their_words() {
        assert_eq!(clean_value(PrimarySubmarket, " \"North Fort Worth\" "), "North Fort Worth");
        assert_eq!(clean_value(PrimarySubmarket, "Southwest SF"), "Southwest SF");
        assert_eq!(clean_value(PropertyType, "Class A"), "Class A");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let samples = [
            "5.4%", "12%", "(1,234)", "500-", "N/A", "-", "   ", "$7.25/SF", "\"North\"",
            "0.054", "(5.4%)", "1,000,000", "57.5", "Total", "0", "$-", "$ -", "(-)", "-%",
        ];
        for column in CanonicalColumn::ALL {
            for raw in samples {
                let once = clean_value(column, raw);
                assert_eq!(clean_value(column, &once), once, "{column} {raw:?}");
            }
        }
    }

    #[test]
    fn fraction_shift() {
        assert_eq!(percent_to_fraction("5.40").as_deref(), Some("0.054"));
        assert_eq!(percent_to_fraction("-12").as_deref(), Some("-0.12"));
        assert_eq!(percent_to_fraction("0").as_deref(), Some("0"));
        assert_eq!(percent_to_fraction("abc"), None);
    }
}
