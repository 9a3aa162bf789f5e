/// Placeholder pandas writes for missing cells.
const NAN_TOKEN: &str = "nan";

/// Trims a raw cell; missing, blank and `nan` cells become the empty string.
pub fn clean_value(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case(NAN_TOKEN) => v.to_string(),
        _ => String::new(),
    }
}

/// Lowercased, trimmed text used for grouping and matching.
pub fn normalize_text(raw: Option<&str>) -> String {
    clean_value(raw).to_lowercase()
}

pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_value_normalizes_placeholders() {
        assert_eq!(clean_value(None), "");
        assert_eq!(clean_value(Some("   ")), "");
        assert_eq!(clean_value(Some("nan")), "");
        assert_eq!(clean_value(Some("NaN")), "");
        assert_eq!(clean_value(Some(" N/A ")), "N/A");
    }

    #[test]
    fn normalize_text_lowercases() {
        assert_eq!(normalize_text(Some("  ADVICEPRO Monthly ")), "advicepro monthly");
    }

    #[test]
    fn percentage_of_zero_is_zero() {
        assert_eq!(percentage(3, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
