use std::collections::BTreeMap;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{Resolution, Service};

/// Stable fields only. The synthetic id is excluded so that rebuilding an
/// entry with a fresh id does not count as a change.
#[derive(Serialize)]
struct DigestView<'a> {
    name: &'a str,
    service_type: &'a str,
    domain: &'a str,
    endpoint: Option<&'a Resolution>,
    txt: BTreeMap<&'a str, &'a str>,
}

/// Computes a SHA-256 digest of the service collection.
/// Order matters: the collection is an ordered list.
pub fn compute_digest(services: &[Service]) -> String {
    let views: Vec<DigestView<'_>> = services
        .iter()
        .map(|s| DigestView {
            name: &s.name,
            service_type: &s.service_type,
            domain: &s.domain,
            endpoint: s.endpoint.as_ref(),
            txt: s.txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
        })
        .collect();

    let mut hasher = Sha256::new();
    for view in &views {
        // Serializing borrowed strings and maps cannot fail.
        if let Ok(json) = serde_json::to_vec(view) {
            hasher.update(&json);
        }
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use shared::types::{BrowseResult, Endpoint};
    use super::*;

    fn service(name: &str) -> Service {
        Service::from_result(&BrowseResult::new(Endpoint::service(name, "_test._tcp", "local"))).unwrap()
    }

    #[test]
    fn test_digest_ignores_ids() {
        let a = service("Printer");
        let b = service("Printer");
        assert_ne!(a.id, b.id);

        assert_eq!(compute_digest(&[a]), compute_digest(&[b]));
    }

    #[test]
    fn test_digest_depends_on_order() {
        let a = service("Printer");
        let b = service("Scanner");

        assert_ne!(
            compute_digest(&[a.clone(), b.clone()]),
            compute_digest(&[b, a]),
            "reordering the list is a visible change"
        );
    }

    #[test]
    fn test_digest_changes_on_modification() {
        let a = service("Printer");
        let mut b = a.clone();
        b.service_type = "_new._tcp".to_string();

        assert_ne!(compute_digest(&[a]), compute_digest(&[b]));
    }

    #[test]
    fn test_digest_stable_across_txt_iteration_order() {
        let mut a = service("Printer");
        let mut b = a.clone();
        a.txt = HashMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);
        b.txt = HashMap::from([
            ("c".to_string(), "3".to_string()),
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);

        assert_eq!(compute_digest(&[a]), compute_digest(&[b]));
    }

    #[test]
    fn test_empty_digest() {
        assert_eq!(compute_digest(&[]), hex::encode(Sha256::digest(b"")));
    }
}
