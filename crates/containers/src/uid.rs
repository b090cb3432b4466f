use xxhash_rust::xxh3::xxh3_128;

/// Derives a stable measurement UID from a record's canonical byte form.
///
/// The canonical form is the sorted-key JSON serialization of the parsed
/// record, so the digest is independent of key ordering and whitespace in
/// the source container. Used wherever the archive does not carry a
/// filename-provided UID.
pub fn trivial_id(record: &serde_json::Value) -> String {
    // Serializing a `Value` cannot fail: object keys are always strings.
    let canonical = serde_json::to_vec(record).expect("JSON value serialization is infallible");
    format!("{:032x}", xxh3_128(&canonical))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn uid_is_stable() {
        let record = json!({"test_name": "tor", "report_id": "abc"});
        assert_eq!(trivial_id(&record), trivial_id(&record));
    }

    #[test]
    fn uid_ignores_source_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": {"x": true, "y": null}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"b": {"y": null, "x": true}, "a": 1}"#).unwrap();
        assert_eq!(trivial_id(&a), trivial_id(&b));
    }

    #[test]
    fn uid_distinguishes_records()  {
        let a = json!({"report_id": "one"});
        let b = json!({"report_id": "two"});
        assert_ne!(trivial_id(&a), trivial_id(&b));
    }
}
