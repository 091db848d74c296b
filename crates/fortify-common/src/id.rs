use chrono::{Datelike, Utc};
use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_BUCKET: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Configure the Snowflake generator. Both ids must be in `0..=31`.
///
/// Calling this is optional; [`next_id`] falls back to `(1, 1)`.
pub fn init(machine_id: i32, node_id: i32) {
    let mut bucket = ID_BUCKET.lock().unwrap_or_else(|p| p.into_inner());
    *bucket = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Next Snowflake id as a decimal string (primary key of every table).
pub fn next_id() -> String {
    let mut bucket = ID_BUCKET.lock().unwrap_or_else(|p| p.into_inner());
    bucket
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
        .to_string()
}

/// Human-facing document number such as `MC-2026-7251839301`.
///
/// The suffix is the low ten digits of a fresh Snowflake id, so numbers
/// issued by one process never collide.
pub fn document_number(prefix: &str) -> String {
    let id = next_id();
    let tail = &id[id.len().saturating_sub(10)..];
    format!("{prefix}-{}-{tail}", Utc::now().year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_numeric() {
        init(1, 1);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(id.parse::<i64>().is_ok(), "not numeric: {id}");
            assert!(seen.insert(id), "duplicate id");
        }
    }

    #[test]
    fn document_number_has_prefix_and_year() {
        let n = document_number("TC");
        let parts: Vec<&str> = n.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TC");
        assert_eq!(parts[1], Utc::now().year().to_string());
        assert!(!parts[2].is_empty());
    }
}
