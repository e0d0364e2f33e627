//! Deterministic entity-id generation.

pub use ontograph_graph::is_valid_entity_id;

/// Derives a snake-case identifier from a mention: lowercase, non-word
/// characters stripped, whitespace collapsed to `_`, leading/trailing `_`
/// trimmed, and an `e` prefix when the result would start with a digit.
/// Idempotent, so re-deriving from an already-generated id is a no-op.
/// Returns an empty string for mentions with no usable characters; callers
/// drop those rows.
pub fn entity_id_from_mention(mention: &str) -> String {
    let lowered = mention.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            cleaned.push(c);
        } else {
            cleaned.push(' ');
        }
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("e{trimmed}")
    } else {
        trimmed.to_string()
    }
}
