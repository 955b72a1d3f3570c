use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use anyhow::{anyhow, Result};
use shared::types::{ChangeEvent, Service, ServiceKey, SourceState};
use crate::logger::{DiagnosticSink, LogLevel};
use crate::registry::digest::compute_digest;
use crate::registry::store::{Observer, ServiceRegistry, SubscriptionId};
pub use crate::mdns::browser::BrowseUpdate;

/// Immutable view of the collection published after every change
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub services: Arc<[Service]>,
    pub digest: String,
    /// Number of changing batches applied so far
    pub revision: u64,
}

impl ServiceSnapshot {
    pub fn new(services: &[Service], revision: u64) -> Self {
        Self {
            services: Arc::from(services),
            digest: compute_digest(services),
            revision,
        }
    }

    pub fn empty() -> Self {
        Self::new(&[], 0)
    }
}

/// Commands sent to the registry thread
enum RegistryCommand {
    Apply(Vec<ChangeEvent>, oneshot::Sender<bool>),
    GetAll(oneshot::Sender<Vec<Service>>),
    GetOne(ServiceKey, oneshot::Sender<Option<Service>>),
    Subscribe(Observer, oneshot::Sender<SubscriptionId>),
    Unsubscribe(SubscriptionId, oneshot::Sender<bool>),
    Shutdown,
}

/// Handle to the registry thread, the only writer of the collection
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Move the registry onto its own thread. Every change is published to
    /// `snapshot_tx` before the applying command replies.
    pub fn spawn(mut registry: ServiceRegistry, snapshot_tx: watch::Sender<ServiceSnapshot>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        let mut revision = 0u64;
        registry.subscribe(move |services| {
            revision += 1;
            snapshot_tx.send_replace(ServiceSnapshot::new(services, revision));
        });

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Apply(changes, reply) => {
                        let changed = registry.apply_changes(&changes);
                        let _ = reply.send(changed);
                    }
                    RegistryCommand::GetAll(reply) => {
                        let _ = reply.send(registry.current_services().to_vec());
                    }
                    RegistryCommand::GetOne(key, reply) => {
                        let _ = reply.send(registry.get(&key).cloned());
                    }
                    RegistryCommand::Subscribe(observer, reply) => {
                        let _ = reply.send(registry.subscribe(observer));
                    }
                    RegistryCommand::Unsubscribe(id, reply) => {
                        let _ = reply.send(registry.unsubscribe(id));
                    }
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    // The command may hold a non-Sync observer, so the send error is not
    // converted with `?` directly.
    async fn send(&self, cmd: RegistryCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("Registry thread is not running"))
    }

    /// Apply one batch in order. Returns true if the collection changed.
    pub async fn apply_changes(&self, changes: Vec<ChangeEvent>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Apply(changes, reply)).await?;
        Ok(rx.await?)
    }

    /// Current collection, in insertion order
    pub async fn current_services(&self) -> Result<Vec<Service>> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::GetAll(reply)).await?;
        Ok(rx.await?)
    }

    pub async fn get(&self, key: ServiceKey) -> Result<Option<Service>> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::GetOne(key, reply)).await?;
        Ok(rx.await?)
    }

    /// Register an observer that runs on the registry thread after each
    /// changing batch
    pub async fn subscribe(
        &self,
        observer: impl FnMut(&[Service]) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Subscribe(Box::new(observer), reply)).await?;
        Ok(rx.await?)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Unsubscribe(id, reply)).await?;
        Ok(rx.await?)
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}

/// Bridge loop: feeds discovery batches to the registry one at a time.
///
/// Cancellation is checked before every batch, so nothing is applied once
/// the token fires. Ends when cancelled or when the source goes away.
pub async fn run(
    registry: RegistryHandle,
    mut rx: mpsc::Receiver<BrowseUpdate>,
    mut source_state: watch::Receiver<SourceState>,
    log: Arc<dyn DiagnosticSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut source_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!("Registry bridge shutting down");
                break;
            }

            changed = source_state.changed(), if source_open => {
                if changed.is_err() {
                    source_open = false;
                    continue;
                }
                let state = source_state.borrow_and_update().clone();
                match state {
                    SourceState::Failed(e) => log.log(
                        LogLevel::Info,
                        &format!("Discovery stopped ({}); keeping last known services", e),
                    ),
                    SourceState::Waiting(e) => log.log(
                        LogLevel::Debug,
                        &format!("Discovery waiting ({}); no changes pending", e),
                    ),
                    _ => {}
                }
            }

            update = rx.recv() => {
                let Some(update) = update else {
                    tracing::debug!("Discovery source closed its channel");
                    break;
                };
                tracing::debug!(
                    "Applying {} changes ({} results in snapshot)",
                    update.changes.len(),
                    update.snapshot.len()
                );
                if let Err(e) = registry.apply_changes(update.changes).await {
                    tracing::error!("Failed to apply browse changes: {}", e);
                }
            }
        }
    }

    Ok(())
}
