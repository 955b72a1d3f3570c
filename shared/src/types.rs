use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Identity of a discovered service. Two services are the same service
/// across updates if and only if both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub name: String,
    pub domain: String,
}

impl ServiceKey {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (domain: {})", self.name, self.domain)
    }
}

/// Address information obtained once an instance has been resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Target host, e.g. "printer.local."
    pub hostname: String,

    /// Addresses published for the host
    pub addresses: Vec<IpAddr>,

    /// Service port
    pub port: u16,
}

/// The service-shaped endpoint: an instance of a type in a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Instance name, e.g. "Printer"
    pub name: String,

    /// Service type, e.g. "_test._tcp"
    pub service_type: String,

    /// Discovery domain, e.g. "local"
    pub domain: String,
}

/// Endpoint reported by a discovery source. Only the `Service` shape carries
/// a service identity; everything else is dropped by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Service(ServiceEndpoint),
    HostPort { host: String, port: u16 },
    Opaque(String),
}

impl Endpoint {
    pub fn service(
        name: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Endpoint::Service(ServiceEndpoint {
            name: name.into(),
            service_type: service_type.into(),
            domain: domain.into(),
        })
    }

    pub fn as_service(&self) -> Option<&ServiceEndpoint> {
        match self {
            Endpoint::Service(service) => Some(service),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Service(s) => write!(f, "{}.{}.{}", s.name, s.service_type, s.domain),
            Endpoint::HostPort { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Opaque(raw) => write!(f, "{}", raw),
        }
    }
}

/// One entry of a discovery snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseResult {
    pub endpoint: Endpoint,

    /// Present once the instance has been resolved
    pub resolution: Option<Resolution>,

    /// TXT record, only when the browse descriptor asks for it
    pub txt: Option<HashMap<String, String>>,
}

impl BrowseResult {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            resolution: None,
            txt: None,
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_txt(mut self, txt: HashMap<String, String>) -> Self {
        self.txt = Some(txt);
        self
    }

    /// Identity of the result, if its endpoint is service shaped
    pub fn key(&self) -> Option<ServiceKey> {
        self.endpoint
            .as_service()
            .map(|s| ServiceKey::new(s.name.clone(), s.domain.clone()))
    }
}

/// One delta between two consecutive discovery snapshots.
///
/// New variants may appear; consumers treat unknown ones as no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChangeEvent {
    Added(BrowseResult),
    Removed(BrowseResult),
    Changed { old: BrowseResult, new: BrowseResult },
    Identical,
}

/// A discovered service as shown to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Synthetic identifier for list diffing. Never part of the identity.
    pub id: Uuid,

    /// Instance name, e.g. "Printer"
    pub name: String,

    /// Service type, e.g. "_test._tcp"
    pub service_type: String,

    /// Discovery domain, e.g. "local"
    pub domain: String,

    /// Resolved address, absent until resolution completes
    pub endpoint: Option<Resolution>,

    /// TXT record key-value pairs
    #[serde(default)]
    pub txt: HashMap<String, String>,
}

impl Service {
    /// Builds a service from a browse result. Returns `None` when the
    /// result's endpoint is not service shaped.
    pub fn from_result(result: &BrowseResult) -> Option<Self> {
        let endpoint = result.endpoint.as_service()?;
        Some(Self {
            id: Uuid::new_v4(),
            name: endpoint.name.clone(),
            service_type: endpoint.service_type.clone(),
            domain: endpoint.domain.clone(),
            endpoint: result.resolution.clone(),
            txt: result.txt.clone().unwrap_or_default(),
        })
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.name.clone(), self.domain.clone())
    }

    pub fn matches(&self, key: &ServiceKey) -> bool {
        self.name == key.name && self.domain == key.domain
    }

    /// Compares everything except the synthetic id
    pub fn same_description(&self, other: &Service) -> bool {
        self.name == other.name
            && self.domain == other.domain
            && self.service_type == other.service_type
            && self.endpoint == other.endpoint
            && self.txt == other.txt
    }
}

/// Lifecycle of a discovery source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SourceState {
    NotStarted,
    Setup,
    Ready,
    /// Transient failure; the source keeps retrying
    Waiting(String),
    /// No further events will arrive
    Failed(String),
    Cancelled,
}
