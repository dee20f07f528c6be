use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Scale codes as they appear in agency tables: either the label
/// ("thousands") or the power-of-ten scalar id ("3").
static SCALE_RULES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for code in ["units", "unit", "unitless", "ones", "0"] {
        m.insert(code, 1.0);
    }
    m.insert("tens", 1e1);
    m.insert("1", 1e1);
    m.insert("hundreds", 1e2);
    m.insert("2", 1e2);
    m.insert("thousands", 1e3);
    m.insert("3", 1e3);
    m.insert("tens of thousands", 1e4);
    m.insert("4", 1e4);
    m.insert("hundreds of thousands", 1e5);
    m.insert("5", 1e5);
    m.insert("millions", 1e6);
    m.insert("6", 1e6);
    m.insert("tens of millions", 1e7);
    m.insert("7", 1e7);
    m.insert("hundreds of millions", 1e8);
    m.insert("8", 1e8);
    m.insert("billions", 1e9);
    m.insert("9", 1e9);
    // Percentages become fractions
    for code in ["percentage", "percent", "%"] {
        m.insert(code, 1e-2);
    }
    m
});

/// Multiplier for a scale code, or `None` when there is no rule for it.
pub fn resolve_multiplier(code: &str) -> Option<f64> {
    SCALE_RULES.get(code.trim().to_lowercase().as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_scalar_ids() {
        assert_eq!(resolve_multiplier("thousands"), Some(1000.0));
        assert_eq!(resolve_multiplier(" Millions "), Some(1e6));
        assert_eq!(resolve_multiplier("6"), Some(1e6));
        assert_eq!(resolve_multiplier("units"), Some(1.0));
        assert_eq!(resolve_multiplier("percentage"), Some(0.01));
    }

    #[test]
    fn test_unknown_code_has_no_rule() {
        assert_eq!(resolve_multiplier("dozens"), None);
        assert_eq!(resolve_multiplier(""), None);
    }
}
