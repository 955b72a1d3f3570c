use std::collections::HashMap;
use shared::protocol::ty_domain;
use shared::types::{BrowseResult, ChangeEvent, Endpoint, Resolution};
use crate::config::Descriptor;

/// One raw observation from the mDNS daemon, already detached from
/// mdns-sd types.
#[derive(Debug, Clone)]
pub enum Sighting {
    Found {
        fullname: String,
    },
    Resolved {
        fullname: String,
        resolution: Resolution,
        txt: HashMap<String, String>,
    },
    Removed {
        fullname: String,
    },
}

/// The source's view of every instance currently advertised for one
/// service type. Each sighting updates it and yields the delta against the
/// previous state.
pub struct BrowseSnapshot {
    service_type: String,
    domain: String,
    ty_domain: String,
    descriptor: Descriptor,
    results: HashMap<String, BrowseResult>,
}

impl BrowseSnapshot {
    pub fn new(service_type: &str, domain: &str, descriptor: Descriptor) -> Self {
        Self {
            service_type: service_type.trim_end_matches('.').to_string(),
            domain: domain.trim_matches('.').to_string(),
            ty_domain: ty_domain(service_type, domain),
            descriptor,
            results: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Full current snapshot, ordered by instance full name
    pub fn results(&self) -> Vec<BrowseResult> {
        let mut names: Vec<&String> = self.results.keys().collect();
        names.sort();
        names.into_iter().map(|n| self.results[n].clone()).collect()
    }

    /// Record a sighting and return the changes it caused
    pub fn observe(&mut self, sighting: Sighting) -> Vec<ChangeEvent> {
        match sighting {
            Sighting::Found { fullname } => {
                if self.results.contains_key(&fullname) {
                    return vec![ChangeEvent::Identical];
                }
                let result = BrowseResult::new(self.endpoint_for(&fullname));
                self.results.insert(fullname, result.clone());
                vec![ChangeEvent::Added(result)]
            }
            Sighting::Resolved { fullname, resolution, txt } => {
                let mut result = BrowseResult::new(self.endpoint_for(&fullname))
                    .with_resolution(resolution);
                if self.descriptor.includes_txt() {
                    result = result.with_txt(txt);
                }

                match self.results.insert(fullname, result.clone()) {
                    None => vec![ChangeEvent::Added(result)],
                    Some(old) if old == result => vec![ChangeEvent::Identical],
                    Some(old) => vec![ChangeEvent::Changed { old, new: result }],
                }
            }
            Sighting::Removed { fullname } => match self.results.remove(&fullname) {
                Some(old) => vec![ChangeEvent::Removed(old)],
                None => Vec::new(),
            },
        }
    }

    fn endpoint_for(&self, fullname: &str) -> Endpoint {
        parse_endpoint(fullname, &self.ty_domain, &self.service_type, &self.domain)
    }
}

/// Split "Printer._test._tcp.local." into a service endpoint. Names that do
/// not end in the browsed type and domain come back opaque.
pub fn parse_endpoint(fullname: &str, ty_domain: &str, service_type: &str, domain: &str) -> Endpoint {
    let instance = fullname
        .strip_suffix(ty_domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|name| !name.is_empty());

    match instance {
        Some(name) => Endpoint::service(name, service_type, domain),
        None => Endpoint::Opaque(fullname.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULLNAME: &str = "Printer._test._tcp.local.";

    fn resolved(fullname: &str, port: u16) -> Sighting {
        Sighting::Resolved {
            fullname: fullname.to_string(),
            resolution: Resolution {
                hostname: "printer.local.".to_string(),
                addresses: vec!["192.168.1.20".parse().unwrap()],
                port,
            },
            txt: HashMap::from([("rp".to_string(), "queue".to_string())]),
        }
    }

    fn snapshot(descriptor: Descriptor) -> BrowseSnapshot {
        BrowseSnapshot::new("_test._tcp", "local", descriptor)
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint(FULLNAME, "_test._tcp.local.", "_test._tcp", "local"),
            Endpoint::service("Printer", "_test._tcp", "local")
        );
        assert_eq!(
            parse_endpoint("Office Printer (2)._test._tcp.local.", "_test._tcp.local.", "_test._tcp", "local"),
            Endpoint::service("Office Printer (2)", "_test._tcp", "local")
        );
    }

    #[test]
    fn test_parse_foreign_name_is_opaque() {
        assert_eq!(
            parse_endpoint("Printer._ipp._tcp.local.", "_test._tcp.local.", "_test._tcp", "local"),
            Endpoint::Opaque("Printer._ipp._tcp.local.".to_string())
        );
        assert_eq!(
            parse_endpoint("_test._tcp.local.", "_test._tcp.local.", "_test._tcp", "local"),
            Endpoint::Opaque("_test._tcp.local.".to_string())
        );
    }

    #[test]
    fn test_found_then_resolved() {
        let mut snapshot = snapshot(Descriptor::Bonjour);

        let changes = snapshot.observe(Sighting::Found { fullname: FULLNAME.to_string() });
        assert!(matches!(&changes[..], [ChangeEvent::Added(r)] if r.resolution.is_none()));

        let changes = snapshot.observe(resolved(FULLNAME, 631));
        match &changes[..] {
            [ChangeEvent::Changed { old, new }] => {
                assert!(old.resolution.is_none());
                assert_eq!(new.resolution.as_ref().unwrap().port, 631);
            }
            other => panic!("unexpected changes: {:?}", other),
        }
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_repeat_sightings_are_identical() {
        let mut snapshot = snapshot(Descriptor::Bonjour);
        snapshot.observe(resolved(FULLNAME, 631));

        assert_eq!(snapshot.observe(resolved(FULLNAME, 631)), vec![ChangeEvent::Identical]);
        assert_eq!(
            snapshot.observe(Sighting::Found { fullname: FULLNAME.to_string() }),
            vec![ChangeEvent::Identical]
        );
    }

    #[test]
    fn test_port_change_is_changed() {
        let mut snapshot = snapshot(Descriptor::Bonjour);
        snapshot.observe(resolved(FULLNAME, 631));

        let changes = snapshot.observe(resolved(FULLNAME, 9100));
        assert!(matches!(&changes[..], [ChangeEvent::Changed { .. }]));
    }

    #[test]
    fn test_remove() {
        let mut snapshot = snapshot(Descriptor::Bonjour);
        snapshot.observe(resolved(FULLNAME, 631));

        let changes = snapshot.observe(Sighting::Removed { fullname: FULLNAME.to_string() });
        assert!(matches!(&changes[..], [ChangeEvent::Removed(_)]));
        assert!(snapshot.is_empty());

        let changes = snapshot.observe(Sighting::Removed { fullname: FULLNAME.to_string() });
        assert!(changes.is_empty(), "nothing to remove");
    }

    #[test]
    fn test_txt_kept_only_with_txt_descriptor() {
        let mut plain = snapshot(Descriptor::Bonjour);
        let mut with_txt = snapshot(Descriptor::BonjourWithTxtRecord);

        plain.observe(resolved(FULLNAME, 631));
        with_txt.observe(resolved(FULLNAME, 631));

        assert!(plain.results()[0].txt.is_none());
        assert_eq!(
            with_txt.results()[0].txt.as_ref().unwrap().get("rp").map(String::as_str),
            Some("queue")
        );
    }

    #[test]
    fn test_results_sorted_by_name() {
        let mut snapshot = snapshot(Descriptor::Bonjour);
        snapshot.observe(Sighting::Found { fullname: "Scanner._test._tcp.local.".to_string() });
        snapshot.observe(Sighting::Found { fullname: "Camera._test._tcp.local.".to_string() });

        let names: Vec<String> = snapshot
            .results()
            .iter()
            .map(|r| r.endpoint.to_string())
            .collect();
        assert_eq!(names, vec!["Camera._test._tcp.local", "Scanner._test._tcp.local"]);
    }
}
