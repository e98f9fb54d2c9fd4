//! Shared timestamp/id helpers used across stores and the RPC layer.

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Returns the current UTC instant. All `created`/`accessed`/`modified`
/// fields in this crate are `DateTime<Utc>` so they compare directly.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Short id suffix used for relation filenames (`relation-<type>-<name>-<shortid>.json`).
pub fn new_short_id() -> String {
    Ulid::new().to_string().to_lowercase()[20..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_id_is_unique() {
        let id1 = new_event_id();
        let id2 = new_event_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_event_id_is_valid_ulid() {
        let id = new_event_id();
        assert!(Ulid::from_string(&id).is_ok());
    }

    #[test]
    fn test_now_utc_monotonic_enough() {
        let a = now_utc();
        let b = now_utc();
        assert!(b >= a);
    }

    #[test]
    fn test_new_short_id_length() {
        let id = new_short_id();
        assert_eq!(id.len(), 6);
    }
}
