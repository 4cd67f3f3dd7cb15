use uuid::Uuid;

/// Time-ordered id for new rows. UUIDv7 sorts by creation time, which keeps
/// `ORDER BY id` stable for export dumps.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_parseable_and_v7() {
        let id = new_uuid_v7();
        let parsed = Uuid::parse_str(&id).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn ids_sort_by_creation() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert!(a <= b);
    }
}
