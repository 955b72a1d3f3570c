use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use shared::protocol::ty_domain;
use shared::types::{BrowseResult, ChangeEvent, Resolution, SourceState};
use crate::config::{BrowserConfig, Descriptor};
use crate::logger::{DiagnosticSink, LogLevel};
use super::error::SourceError;
use super::snapshot::{BrowseSnapshot, Sighting};

/// Full snapshot after a sighting plus the delta that produced it
#[derive(Debug, Clone)]
pub struct BrowseUpdate {
    pub snapshot: Vec<BrowseResult>,
    pub changes: Vec<ChangeEvent>,
}

/// Create the mDNS daemon, optionally bound to a single interface
pub fn create_daemon(interface: Option<&str>) -> Result<ServiceDaemon, SourceError> {
    let daemon = ServiceDaemon::new().map_err(|e| SourceError::DaemonInit(e.to_string()))?;

    if let Some(interface) = interface {
        let restrict = daemon
            .disable_interface(mdns_sd::IfKind::All)
            .and_then(|_| daemon.enable_interface(interface));
        if let Err(e) = restrict {
            return Err(SourceError::Interface {
                interface: interface.to_string(),
                reason: e.to_string(),
            });
        }
    }

    Ok(daemon)
}

/// Watches one service type and turns mDNS events into change batches.
///
/// Started once via `run`, which consumes the source. Holds no reference to
/// the registry; batches leave through the channel handed to `run`.
pub struct DiscoverySource {
    daemon: ServiceDaemon,
    config: BrowserConfig,
    descriptor: Descriptor,
    state_tx: watch::Sender<SourceState>,
    log: Arc<dyn DiagnosticSink>,
}

impl DiscoverySource {
    pub fn new(
        daemon: ServiceDaemon,
        config: BrowserConfig,
        descriptor: Descriptor,
        log: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SourceState::NotStarted);
        Self {
            daemon,
            config,
            descriptor,
            state_tx,
            log,
        }
    }

    /// Subscribe to state transitions
    pub fn state(&self) -> watch::Receiver<SourceState> {
        self.state_tx.subscribe()
    }

    pub async fn run(
        self,
        tx: mpsc::Sender<BrowseUpdate>,
        cancel: CancellationToken,
    ) -> Result<(), SourceError> {
        let ty_domain = ty_domain(&self.config.service_type, &self.config.domain);
        self.log.log(
            LogLevel::Info,
            &format!("Starting Bonjour service browsing for type: {}", ty_domain),
        );
        self.log.log(
            LogLevel::Info,
            match self.descriptor {
                Descriptor::BonjourWithTxtRecord => "Using .bonjourWithTXTRecord",
                Descriptor::Bonjour => "Using .bonjour",
            },
        );
        self.set_state(SourceState::Setup);

        let receiver = match self.browse_with_retry(&ty_domain, &cancel).await {
            Ok(Some(receiver)) => receiver,
            Ok(None) => {
                self.set_state(SourceState::Cancelled);
                return Ok(());
            }
            Err(e) => {
                self.set_state(SourceState::Failed(e.to_string()));
                return Err(e);
            }
        };

        let mut snapshot = BrowseSnapshot::new(
            &self.config.service_type,
            &self.config.domain,
            self.descriptor,
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                event = receiver.recv_async() => {
                    match event {
                        Ok(event) => {
                            if !self.handle_event(event, &mut snapshot, &tx).await {
                                break;
                            }
                        }
                        Err(e) => {
                            self.set_state(SourceState::Failed(e.to_string()));
                            return Err(SourceError::Disconnected);
                        }
                    }
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(&ty_domain) {
            tracing::debug!("Failed to stop browsing {}: {}", ty_domain, e);
        }
        self.set_state(SourceState::Cancelled);
        Ok(())
    }

    /// `Ok(None)` means cancellation arrived while waiting to retry
    async fn browse_with_retry(
        &self,
        ty_domain: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<flume::Receiver<ServiceEvent>>, SourceError> {
        let attempts = self.config.max_browse_attempts.max(1);
        let retry_interval = Duration::from_secs(self.config.retry_interval_secs);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.daemon.browse(ty_domain) {
                Ok(receiver) => return Ok(Some(receiver)),
                Err(e) => e.to_string(),
            };

            if attempt >= attempts {
                return Err(SourceError::Browse {
                    service_type: ty_domain.to_string(),
                    attempts: attempt,
                    reason: error,
                });
            }

            self.set_state(SourceState::Waiting(error));

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(retry_interval) => {}
            }
        }
    }

    /// Returns false once the batch channel has no receiver left
    async fn handle_event(
        &self,
        event: ServiceEvent,
        snapshot: &mut BrowseSnapshot,
        tx: &mpsc::Sender<BrowseUpdate>,
    ) -> bool {
        if let ServiceEvent::SearchStarted(_) = &event {
            if !matches!(*self.state_tx.borrow(), SourceState::Ready) {
                self.set_state(SourceState::Ready);
            }
            return true;
        }

        let Some(sighting) = sighting_from_event(event) else {
            return true;
        };

        let changes = snapshot.observe(sighting);
        if changes.is_empty() {
            return true;
        }

        self.log.log(
            LogLevel::Debug,
            &format!(
                "Browse results changed. Total results: {}, Changes: {}",
                snapshot.len(),
                changes.len()
            ),
        );

        let update = BrowseUpdate {
            snapshot: snapshot.results(),
            changes,
        };
        if let Err(e) = tx.send(update).await {
            tracing::error!("Failed to send browse update: {}", e);
            return false;
        }
        true
    }

    fn set_state(&self, state: SourceState) {
        let (level, message) = describe_state(&state);
        self.log.log(level, &message);
        self.state_tx.send_replace(state);
    }
}

fn describe_state(state: &SourceState) -> (LogLevel, String) {
    match state {
        SourceState::NotStarted => (LogLevel::Debug, "Browser not started".to_string()),
        SourceState::Setup => (LogLevel::Debug, "Browser setup".to_string()),
        SourceState::Ready => (LogLevel::Info, "Browser is ready".to_string()),
        SourceState::Waiting(e) => (LogLevel::Warning, format!("Browser waiting: {}", e)),
        SourceState::Failed(e) => (LogLevel::Error, format!("Browser failed with error: {}", e)),
        SourceState::Cancelled => (LogLevel::Warning, "Browser cancelled".to_string()),
    }
}

/// Translate an mdns-sd event into a sighting. Search lifecycle events
/// carry no instance and yield `None`.
fn sighting_from_event(event: ServiceEvent) -> Option<Sighting> {
    match event {
        ServiceEvent::ServiceFound(_typ, fullname) => Some(Sighting::Found { fullname }),
        ServiceEvent::ServiceResolved(info) => Some(resolved_sighting(&info)),
        ServiceEvent::ServiceRemoved(_typ, fullname) => Some(Sighting::Removed { fullname }),
        ServiceEvent::SearchStopped(typ) => {
            tracing::debug!("Search stopped: {}", typ);
            None
        }
        _ => None,
    }
}

fn resolved_sighting(info: &ServiceInfo) -> Sighting {
    // The daemon keeps addresses in a set; sort so repeated resolutions compare equal.
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    Sighting::Resolved {
        fullname: info.get_fullname().to_string(),
        resolution: Resolution {
            hostname: info.get_hostname().to_string(),
            addresses,
            port: info.get_port(),
        },
        txt,
    }
}

#[cfg(test)]
mod tests {
    use crate::logger::testing::RecordingSink;
    use super::*;

    fn discovery_source(daemon: &ServiceDaemon, config: BrowserConfig) -> (DiscoverySource, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let source = DiscoverySource::new(daemon.clone(), config, Descriptor::Bonjour, sink.clone());
        (source, sink)
    }

    /// A daemon whose command channel is already closed, so `browse` fails
    fn stopped_daemon() -> ServiceDaemon {
        let daemon = ServiceDaemon::new().unwrap();
        let status = daemon.shutdown().unwrap();
        status.recv_timeout(Duration::from_secs(5)).unwrap();
        daemon
    }

    fn printer_info() -> ServiceInfo {
        ServiceInfo::new(
            "_test._tcp.local.",
            "Printer",
            "printer.local.",
            "192.168.1.21,192.168.1.20",
            631,
            HashMap::from([("rp".to_string(), "queue".to_string())]),
        )
        .unwrap()
    }

    #[test]
    fn test_resolved_event_becomes_sighting() {
        let sighting = sighting_from_event(ServiceEvent::ServiceResolved(printer_info())).unwrap();

        match sighting {
            Sighting::Resolved { fullname, resolution, txt } => {
                assert_eq!(fullname, "Printer._test._tcp.local.");
                assert_eq!(resolution.hostname, "printer.local.");
                assert_eq!(resolution.port, 631);
                let expected: Vec<IpAddr> = vec![
                    "192.168.1.20".parse().unwrap(),
                    "192.168.1.21".parse().unwrap(),
                ];
                assert_eq!(resolution.addresses, expected, "addresses sorted");
                assert_eq!(txt.get("rp").map(String::as_str), Some("queue"));
            }
            other => panic!("unexpected sighting: {:?}", other),
        }
    }

    #[test]
    fn test_found_and_removed_events() {
        let found = sighting_from_event(ServiceEvent::ServiceFound(
            "_test._tcp.local.".to_string(),
            "Printer._test._tcp.local.".to_string(),
        ));
        assert!(matches!(found, Some(Sighting::Found { fullname }) if fullname == "Printer._test._tcp.local."));

        let removed = sighting_from_event(ServiceEvent::ServiceRemoved(
            "_test._tcp.local.".to_string(),
            "Printer._test._tcp.local.".to_string(),
        ));
        assert!(matches!(removed, Some(Sighting::Removed { .. })));
    }

    #[test]
    fn test_search_events_carry_no_sighting() {
        assert!(sighting_from_event(ServiceEvent::SearchStarted("_test._tcp.local.".to_string())).is_none());
        assert!(sighting_from_event(ServiceEvent::SearchStopped("_test._tcp.local.".to_string())).is_none());
    }

    #[test]
    fn test_state_log_levels() {
        assert_eq!(describe_state(&SourceState::Ready).0, LogLevel::Info);
        assert_eq!(describe_state(&SourceState::Setup).0, LogLevel::Debug);
        assert_eq!(describe_state(&SourceState::Cancelled).0, LogLevel::Warning);

        let (level, message) = describe_state(&SourceState::Failed("socket closed".to_string()));
        assert_eq!(level, LogLevel::Error);
        assert_eq!(message, "Browser failed with error: socket closed");

        let (level, message) = describe_state(&SourceState::Waiting("no network".to_string()));
        assert_eq!(level, LogLevel::Warning);
        assert_eq!(message, "Browser waiting: no network");
    }

    #[tokio::test]
    async fn test_cancel_stops_source_and_releases_channel() {
        let daemon = ServiceDaemon::new().unwrap();
        let (source, sink) = discovery_source(&daemon, BrowserConfig::default());
        let state = source.state();
        assert_eq!(*state.borrow(), SourceState::NotStarted);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(source.run(tx, cancel.clone()));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(*state.borrow(), SourceState::Cancelled);
        assert!(rx.recv().await.is_none(), "batch channel released");
        assert!(sink.contains(LogLevel::Info, "Starting Bonjour service browsing for type: _test._tcp.local."));
        assert!(sink.contains(LogLevel::Info, "Using .bonjour"));

        let _ = daemon.shutdown();
    }

    #[tokio::test]
    async fn test_browse_fails_after_retries() {
        let daemon = stopped_daemon();
        let config = BrowserConfig {
            max_browse_attempts: 2,
            retry_interval_secs: 0,
            ..BrowserConfig::default()
        };
        let (source, sink) = discovery_source(&daemon, config);
        let state = source.state();

        let (tx, mut rx) = mpsc::channel(16);
        let result = source.run(tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(SourceError::Browse { attempts: 2, .. })));
        assert!(matches!(*state.borrow(), SourceState::Failed(_)));
        assert!(sink.contains(LogLevel::Warning, "Browser waiting"));
        assert!(sink.contains(LogLevel::Error, "Browser failed with error"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_to_retry() {
        let daemon = stopped_daemon();
        let config = BrowserConfig {
            retry_interval_secs: 3600,
            ..BrowserConfig::default()
        };
        let (source, _) = discovery_source(&daemon, config);
        let mut state = source.state();

        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(source.run(tx, cancel.clone()));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, SourceState::Waiting(_))),
        )
        .await
        .unwrap()
        .unwrap();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(*state.borrow(), SourceState::Cancelled);
    }
}
