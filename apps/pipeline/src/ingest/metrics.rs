/// Spelled-out multipliers that quantify a claim without any digit.
const WORD_MULTIPLIERS: &[&str] = &[
    "doubled",
    "tripled",
    "quadrupled",
    "halved",
    "twofold",
    "threefold",
    "fourfold",
    "fivefold",
    "tenfold",
];

/// Whether a sentence carries a quantified claim.
///
/// Counts as a metric:
/// - any digit, which covers "3x" and "~40" as well
/// - `%`
/// - `$`, `€`, `£`
/// - `~` in front of a word estimate ("~ten hours")
/// - a spelled-out multiplier ("doubled", "tenfold")
pub fn detect_metric(text: &str) -> bool {
    let has_digit = text.chars().any(|c| c.is_ascii_digit());
    let has_percent = text.contains('%');
    let has_currency = text.contains('$') || text.contains('€') || text.contains('£');
    let has_estimate = text
        .split('~')
        .skip(1)
        .any(|rest| rest.starts_with(char::is_alphanumeric));
    let has_word_multiplier = text
        .split(|c: char| !c.is_alphabetic())
        .any(|word| WORD_MULTIPLIERS.iter().any(|m| word.eq_ignore_ascii_case(m)));

    has_digit || has_percent || has_currency || has_estimate || has_word_multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_is_metric() {
        assert!(detect_metric("Increased email open rates by 24% at Acme Co."));
    }

    #[test]
    fn test_currency_is_metric() {
        assert!(detect_metric("Generated €200k in new revenue"));
        assert!(detect_metric("Cut hosting spend by £ forty thousand"));
    }

    #[test]
    fn test_wordy_estimates_and_multipliers_are_metrics() {
        assert!(detect_metric("Saved the support team ~ten hours a week"));
        assert!(detect_metric("Tripled newsletter revenue at Acme Co."));
        assert!(detect_metric("Grew the partner channel tenfold"));
        assert!(detect_metric("Delivered releases 3x faster"));
    }

    #[test]
    fn test_lookalike_words_are_not_metrics() {
        assert!(!detect_metric("Ran a double-blind usability study"));
        assert!(!detect_metric("Kept the release train on track ~ as planned"));
        assert!(!detect_metric("Significantly improved team morale"));
        assert!(!detect_metric("Worked on many projects"));
    }
}
