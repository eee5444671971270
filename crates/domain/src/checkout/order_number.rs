use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of human-facing order numbers.
///
/// Numbers only need to be unlikely to collide; the store enforces
/// uniqueness and checkout retries with a fresh number on a collision.
pub trait OrderNumberGenerator: Send + Sync {
    fn next_number(&self, now: DateTime<Utc>) -> String;
}

/// `ORD-YYYYMMDD-XXXXXXXX`: the UTC date and eight random upper-case hex
/// characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatedOrderNumbers;

impl OrderNumberGenerator for DatedOrderNumbers {
    fn next_number(&self, now: DateTime<Utc>) -> String {
        let random = Uuid::new_v4().simple().to_string();
        format!(
            "ORD-{}-{}",
            now.format("%Y%m%d"),
            random[..8].to_ascii_uppercase()
        )
    }
}
