//! Deterministic primary-axis rule.
//!
//! Used when a document is registered without an operator-provided axis. The
//! rule is keyword based and never consults a model; model output only ever
//! enters through the suggestion overlay.

use crate::enums::PrimaryAxisSource;

pub const AXIS_JURISDICTION: &str = "jurisdiction";
pub const AXIS_PRODUCT_SCOPE: &str = "product_scope";
pub const AXIS_THEME: &str = "theme";

const PRODUCT_KEYWORDS: &[&str] = &[
    "battery",
    "batteries",
    "aluminium",
    "cement clinker",
    "steel",
    "fertilizer",
    "hydrogen",
];

const THEME_KEYWORDS: &[&str] = &[
    "disclosure",
    "reporting",
    "framework",
    "standard",
    "taxonomy",
    "csrd",
    "esrs",
];

/// Metadata the rule looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisSignals<'a> {
    pub jurisdiction: Option<&'a str>,
    pub title: Option<&'a str>,
    pub regulation_family: Option<&'a str>,
    pub instrument_type: Option<&'a str>,
}

/// Derive a primary axis from document metadata.
///
/// First match wins: a non-blank jurisdiction, then product keywords, then
/// theme keywords. Falls back to `theme`.
#[must_use]
pub fn derive_primary_axis(signals: &AxisSignals<'_>) -> (&'static str, PrimaryAxisSource) {
    let source = PrimaryAxisSource::DeterministicRule;

    if signals.jurisdiction.is_some_and(|j| !j.trim().is_empty()) {
        return (AXIS_JURISDICTION, source);
    }

    let haystack = [signals.title, signals.regulation_family, signals.instrument_type]
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if PRODUCT_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        return (AXIS_PRODUCT_SCOPE, source);
    }
    if THEME_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        return (AXIS_THEME, source);
    }
    (AXIS_THEME, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("EU"), Some("Battery Regulation"), AXIS_JURISDICTION)]
    #[case(Some("   "), Some("Battery Regulation"), AXIS_PRODUCT_SCOPE)]
    #[case(None, Some("Rules for Cement Clinker imports"), AXIS_PRODUCT_SCOPE)]
    #[case(None, Some("ESRS E1 climate"), AXIS_THEME)]
    #[case(None, Some("Untitled"), AXIS_THEME)]
    #[case(None, None, AXIS_THEME)]
    fn rule_precedence(
        #[case] jurisdiction: Option<&str>,
        #[case] title: Option<&str>,
        #[case] expected: &str,
    ) {
        let (axis, source) = derive_primary_axis(&AxisSignals {
            jurisdiction,
            title,
            ..AxisSignals::default()
        });
        assert_eq!(axis, expected);
        assert_eq!(source, PrimaryAxisSource::DeterministicRule);
    }

    #[test]
    fn keywords_found_in_any_field() {
        let (axis, _) = derive_primary_axis(&AxisSignals {
            title: Some("Delegated act"),
            regulation_family: Some("Green HYDROGEN"),
            ..AxisSignals::default()
        });
        assert_eq!(axis, AXIS_PRODUCT_SCOPE);
    }
}
