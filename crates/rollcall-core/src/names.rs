//! Identity key normalization shared by enrollment, roster and the attendance log.

/// Trim surrounding whitespace and lowercase.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}
