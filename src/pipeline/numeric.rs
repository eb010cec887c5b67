//! Textual number formats accepted by the cleaning stage.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static PLAIN_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").expect("valid regex"));
static PLAIN_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d+$").expect("valid regex"));
static PT_BR_DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d{1,3}(\.\d{3})+|\d+)(,\d+)?$").expect("valid regex")
});
static PT_BR_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?(\d{1,3}(\.\d{3})+|\d+)$").expect("valid regex"));

/// How numeric text in the raw store is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormat {
    /// `1234.56`, no grouping.
    #[default]
    Plain,
    /// `1.234,56`: `.` groups thousands, `,` separates decimals.
    PtBr,
}

impl NumberFormat {
    /// Parses a finite decimal. Exponents, `NaN` and `inf` are rejected.
    pub fn parse_decimal(&self, text: &str) -> Option<f64> {
        let text = text.trim();
        let canonical = match self {
            NumberFormat::Plain if PLAIN_DECIMAL.is_match(text) => text.to_string(),
            NumberFormat::PtBr if PT_BR_DECIMAL.is_match(text) => {
                text.replace('.', "").replace(',', ".")
            }
            _ => return None,
        };
        canonical.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Parses a non-negative whole count.
    pub fn parse_count(&self, text: &str) -> Option<i64> {
        let text = text.trim();
        let canonical = match self {
            NumberFormat::Plain if PLAIN_COUNT.is_match(text) => text.to_string(),
            NumberFormat::PtBr if PT_BR_COUNT.is_match(text) => text.replace('.', ""),
            _ => return None,
        };
        canonical.parse::<i64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_decimals() {
        let f = NumberFormat::Plain;
        assert_eq!(f.parse_decimal("1234.5"), Some(1234.5));
        assert_eq!(f.parse_decimal(" -12 "), Some(-12.0));
        assert_eq!(f.parse_decimal("1,234.5"), None);
        assert_eq!(f.parse_decimal("1e3"), None);
        assert_eq!(f.parse_decimal("NaN"), None);
        assert_eq!(f.parse_decimal("inf"), None);
        assert_eq!(f.parse_decimal("abc"), None);
        assert_eq!(f.parse_decimal(""), None);
    }

    #[test]
    fn plain_counts() {
        let f = NumberFormat::Plain;
        assert_eq!(f.parse_count("42"), Some(42));
        assert_eq!(f.parse_count("-1"), None);
        assert_eq!(f.parse_count("4.0"), None);
        assert_eq!(f.parse_count("99999999999999999999"), None);
    }

    #[test]
    fn pt_br_numbers() {
        let f = NumberFormat::PtBr;
        assert_eq!(f.parse_decimal("1.234,56"), Some(1234.56));
        assert_eq!(f.parse_decimal("1234,5"), Some(1234.5));
        assert_eq!(f.parse_decimal("12.345.678"), Some(12345678.0));
        assert_eq!(f.parse_decimal("1.23,4"), None);
        assert_eq!(f.parse_count("1.234"), Some(1234));
        assert_eq!(f.parse_count("1234"), Some(1234));
        assert_eq!(f.parse_count("1.234,0"), None);
    }
}
