/// Normalised form used to detect re-ingestion of the same sentence.
///
/// Lowercases, collapses whitespace and drops trailing sentence punctuation, so
/// "Led the  team." and "led the team" share a key. Inner punctuation is kept:
/// "24%" and "24" are different claims.
pub fn dedup_key(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(['.', '!', '?', ';', ','])
        .trim_end()
        .to_string()
}
