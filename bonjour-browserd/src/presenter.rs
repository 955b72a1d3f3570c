use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::types::Service;
use crate::logger::{DiagnosticSink, LogLevel};
use crate::registry_manager::ServiceSnapshot;

const TITLE: &str = "Bonjour Services";
const EMPTY_TEXT: &str = "No services found";

/// Render the list: a title, then one row per service (name, then
/// "type.domain" underneath).
pub fn render(services: &[Service]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", TITLE);
    let _ = writeln!(out, "{}", "=".repeat(TITLE.len()));

    if services.is_empty() {
        let _ = writeln!(out, "  {}", EMPTY_TEXT);
        return out;
    }

    for service in services {
        let _ = writeln!(out, "  {}", service.name);
        let _ = writeln!(out, "    {}.{}", service.service_type, service.domain);
    }
    out
}

/// Read-only consumer of published snapshots
pub struct Presenter {
    log: Arc<dyn DiagnosticSink>,
    last_digest: Option<String>,
    last_count: Option<usize>,
}

impl Presenter {
    pub fn new(log: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            log,
            last_digest: None,
            last_count: None,
        }
    }

    /// Render `snapshot` unless it matches the last one rendered.
    /// Returns whether anything was written.
    pub fn present(&mut self, snapshot: &ServiceSnapshot, out: &mut impl Write) -> io::Result<bool> {
        if self.last_digest.as_deref() == Some(snapshot.digest.as_str()) {
            return Ok(false);
        }

        let count = snapshot.services.len();
        if self.last_count.is_some_and(|last| last != count) {
            self.log.log(
                LogLevel::Info,
                &format!("Service count changed to: {}", count),
            );
        }

        out.write_all(render(&snapshot.services).as_bytes())?;
        out.flush()?;

        self.last_digest = Some(snapshot.digest.clone());
        self.last_count = Some(count);
        Ok(true)
    }
}

/// Render the current list to stdout and again after every change
pub async fn run(
    mut rx: watch::Receiver<ServiceSnapshot>,
    log: Arc<dyn DiagnosticSink>,
    cancel: CancellationToken,
) {
    let mut presenter = Presenter::new(log.clone());
    log.log(LogLevel::Info, "Service list presenter started");

    loop {
        let snapshot = rx.borrow_and_update().clone();
        if let Err(e) = presenter.present(&snapshot, &mut io::stdout()) {
            tracing::warn!("Failed to render service list: {}", e);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::types::{BrowseResult, Endpoint};
    use crate::logger::testing::RecordingSink;
    use super::*;

    fn service(name: &str) -> Service {
        Service::from_result(&BrowseResult::new(Endpoint::service(name, "_test._tcp", "local"))).unwrap()
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render(&[]), "Bonjour Services\n================\n  No services found\n");
    }

    #[test]
    fn test_render_rows_in_order() {
        let text = render(&[service("Scanner"), service("Printer")]);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            &lines[2..],
            &["  Scanner", "    _test._tcp.local", "  Printer", "    _test._tcp.local"]
        );
    }

    #[test]
    fn test_present_skips_identical_snapshots() {
        let sink = Arc::new(RecordingSink::default());
        let mut presenter = Presenter::new(sink.clone());
        let mut out = Vec::new();

        let first = ServiceSnapshot::new(&[service("Printer")], 1);
        // Rebuilt entries get fresh ids but describe the same list.
        let same = ServiceSnapshot::new(&[service("Printer")], 2);

        assert!(presenter.present(&first, &mut out).unwrap());
        assert!(!presenter.present(&same, &mut out).unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), render(&first.services));
    }

    #[test]
    fn test_count_change_is_logged() {
        let sink = Arc::new(RecordingSink::default());
        let mut presenter = Presenter::new(sink.clone());
        let mut out = Vec::new();

        presenter.present(&ServiceSnapshot::empty(), &mut out).unwrap();
        presenter
            .present(&ServiceSnapshot::new(&[service("Printer"), service("Scanner")], 1), &mut out)
            .unwrap();

        assert!(sink.contains(LogLevel::Info, "Service count changed to: 2"));
        assert_eq!(sink.lines().len(), 1);
    }
}
