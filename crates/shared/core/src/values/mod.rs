use chrono::{DateTime, Utc};

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Trading symbol (e.g. "BTC"), always stored in canonical form
pub type Symbol = String;

/// Canonical symbol form used for every map key: trimmed and upper-cased
pub fn canonical_symbol(raw: &str) -> Symbol {
    raw.trim().to_ascii_uppercase()
}
