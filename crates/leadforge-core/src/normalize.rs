//! Field-name normalization.
//!
//! Every comparison between raw vendor keys, aliases, field keys, and labels
//! goes through [`normalize`] so that spelling variants collapse to the same
//! comparison key.

/// Collapse a raw field name into its comparison key.
///
/// Lower-cases the input and drops every character that is not an ASCII
/// letter or digit. Deterministic, total, and idempotent:
/// `"Email Address"`, `"email_address"`, and `"EmailAddress"` all become
/// `"emailaddress"`.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            c.is_ascii_alphanumeric().then_some(c)
        })
        .collect()
}
