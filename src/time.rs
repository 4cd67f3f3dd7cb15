use chrono::{DateTime, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Millis-since-epoch to a UTC datetime; out-of-range values clamp to epoch.
pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// RFC 3339 rendering for reports and manifests.
pub fn fmt_ms(ms: i64) -> String {
    to_date(ms).to_rfc3339()
}

/// `YYYYMMDD_HHMMSS` stamp used for stored file names and backup folders.
pub fn stamp(ms: i64) -> String {
    to_date(ms).format("%Y%m%d_%H%M%S").to_string()
}

/// Half-open `[start, end)` window of the UTC day containing `ms`.
pub fn day_bounds(ms: i64) -> (i64, i64) {
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    let start = ms.div_euclid(DAY_MS) * DAY_MS;
    (start, start + DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn to_date_epoch() {
        let d = to_date(0);
        assert_eq!(d.timestamp_millis(), 0);
    }

    #[test]
    fn stamp_shape() {
        // 2024-03-05 07:09:11 UTC
        let s = stamp(1_709_622_551_000);
        assert_eq!(s, "20240305_070911");
        assert_eq!(s.len(), 15);
    }

    #[test]
    fn day_bounds_cover_timestamp() {
        let ms = 1_709_622_551_123;
        let (start, end) = day_bounds(ms);
        assert!(start <= ms && ms < end);
        assert_eq!(end - start, 86_400_000);
        assert_eq!(start % 86_400_000, 0);
    }

    #[test]
    fn day_bounds_before_epoch() {
        let (start, end) = day_bounds(-1);
        assert!(start <= -1 && -1 < end);
        assert_eq!(end, 0);
    }
}
