//! Revision digests.
//!
//! A revision is a hex SHA-1 digest summarizing a set of related records;
//! clients compare revisions to detect change without diffing content.
//! Inputs are always sorted first so the digest is independent of map
//! iteration order.

use sha1::{Digest, Sha1};

/// Compute the aggregate revision of a service's instance set:
/// `hex(SHA1(service_revision ‖ concat(sort(instance_revisions))))`.
pub fn compute_revision(
    service_revision: &str,
    instance_revisions: impl IntoIterator<Item = String>,
) -> String {
    let mut revisions: Vec<String> = instance_revisions.into_iter().collect();
    revisions.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(service_revision.as_bytes());
    for revision in &revisions {
        hasher.update(revision.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Merge several already-computed revisions into one:
/// `hex(SHA1(concat(sort(revisions))))`.
///
/// Also the digest of a rule bucket, computed over its rules' revisions.
pub fn composite_revision(mut revisions: Vec<String>) -> String {
    revisions.sort_unstable();

    let mut hasher = Sha1::new();
    for revision in &revisions {
        hasher.update(revision.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_is_hex_sha1() {
        let digest = compute_revision("svc", vec!["a".to_string()]);
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn instance_order_does_not_matter() {
        let forward = compute_revision("svc", vec!["a".to_string(), "b".to_string()]);
        let reverse = compute_revision("svc", vec!["b".to_string(), "a".to_string()]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn service_revision_matters() {
        let one = compute_revision("svc-1", vec!["a".to_string()]);
        let two = compute_revision("svc-2", vec!["a".to_string()]);
        assert_ne!(one, two);
    }

    #[test]
    fn matches_manual_digest() {
        // sha1("svc" ++ "a" ++ "b" ++ "c") computed by hand.
        let mut hasher = Sha1::new();
        hasher.update(b"svcabc");
        let expected = hex::encode(hasher.finalize());

        let got = compute_revision(
            "svc",
            vec!["c".to_string(), "a".to_string(), "b".to_string()],
        );
        assert_eq!(got, expected);
    }

    #[test]
    fn composite_sorts_inputs() {
        let one = composite_revision(vec!["x".to_string(), "y".to_string()]);
        let two = composite_revision(vec!["y".to_string(), "x".to_string()]);
        assert_eq!(one, two);
    }
}
