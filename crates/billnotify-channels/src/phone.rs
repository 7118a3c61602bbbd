//! Brazilian phone-number normalization for chat delivery.

use std::sync::LazyLock;

use regex::Regex;

static NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9]").expect("static regex"));

/// Normalize a Brazilian number to international form `55DDDNUMBER`.
///
/// Accepts `(77) 99861-6740`, `77998616740`, `5577998616740`, trunk-prefixed
/// `077998616740` and carrier-prefixed `15...` forms. Returns `None` when the
/// input has no digits.
pub fn normalize_br(raw: &str) -> Option<String> {
    let digits = NON_DIGITS.replace_all(raw, "");
    if digits.is_empty() {
        return None;
    }

    let normalized = match digits.len() {
        13 if digits.starts_with("55") => digits.to_string(),
        10 | 11 => format!("55{digits}"),
        12 if digits.starts_with('0') => format!("55{}", &digits[1..]),
        13 if digits.starts_with("15") => format!("55{}", &digits[2..]),
        _ => format!("55{digits}"),
    };
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats() {
        assert_eq!(normalize_br("(77) 99861-6740").as_deref(), Some("5577998616740"));
        assert_eq!(normalize_br("77998616740").as_deref(), Some("5577998616740"));
        assert_eq!(normalize_br("5577998616740").as_deref(), Some("5577998616740"));
        assert_eq!(normalize_br("7732216740").as_deref(), Some("557732216740"));
        assert_eq!(normalize_br("077998616740").as_deref(), Some("5577998616740"));
        assert_eq!(normalize_br("1577998616740").as_deref(), Some("5577998616740"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize_br(""), None);
        assert_eq!(normalize_br("() -"), None);
    }
}
