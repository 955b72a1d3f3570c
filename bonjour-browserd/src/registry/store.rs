use std::sync::Arc;
use shared::types::{BrowseResult, ChangeEvent, Service, ServiceKey};
use crate::logger::{DiagnosticSink, LogLevel};

/// Callback invoked with the full collection after it changed
pub type Observer = Box<dyn FnMut(&[Service]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Canonical, de-duplicated, insertion-ordered collection of discovered
/// services.
///
/// No two entries ever share a (name, domain) key. The registry has a
/// single writer; it is owned by the registry thread and holds no lock.
pub struct ServiceRegistry {
    services: Vec<Service>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
    log: Arc<dyn DiagnosticSink>,
}

impl ServiceRegistry {
    pub fn new(log: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            services: Vec::new(),
            observers: Vec::new(),
            next_subscription: 0,
            log,
        }
    }

    pub fn current_services(&self) -> &[Service] {
        &self.services
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&Service> {
        self.services.iter().find(|s| s.matches(key))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Register an observer. It runs synchronously on the thread applying
    /// each batch that changes the collection.
    pub fn subscribe(&mut self, observer: impl FnMut(&[Service]) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns false if the subscription was not registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    /// Apply one batch of changes, strictly in the order given.
    ///
    /// Observers are notified once, after the whole batch, and only if the
    /// collection changed. Returns whether it changed.
    pub fn apply_changes(&mut self, changes: &[ChangeEvent]) -> bool {
        let mut changed = false;

        for change in changes {
            changed |= match change {
                ChangeEvent::Added(result) => self.add_service(result),
                ChangeEvent::Removed(result) => self.remove_service(result),
                ChangeEvent::Changed { new, .. } => self.update_service(new),
                ChangeEvent::Identical => false,
                other => {
                    self.log.log(
                        LogLevel::Debug,
                        &format!("Ignoring unrecognized change: {:?}", other),
                    );
                    false
                }
            };
        }

        if changed {
            self.notify();
        }

        changed
    }

    fn add_service(&mut self, result: &BrowseResult) -> bool {
        let Some(service) = Service::from_result(result) else {
            self.log.log(
                LogLevel::Warning,
                &format!("addService: endpoint is not a service: {}", result.endpoint),
            );
            return false;
        };

        let key = service.key();
        if self.services.iter().any(|s| s.matches(&key)) {
            self.log.log(
                LogLevel::Debug,
                &format!("Service already exists: {}", service.name),
            );
            return false;
        }

        self.log.log(
            LogLevel::Info,
            &format!(
                "Service added: {} (type: {}, domain: {})",
                service.name, service.service_type, service.domain
            ),
        );
        self.services.push(service);
        true
    }

    fn remove_service(&mut self, result: &BrowseResult) -> bool {
        let Some(key) = result.key() else {
            self.log.log(
                LogLevel::Warning,
                &format!("removeService: endpoint is not a service: {}", result.endpoint),
            );
            return false;
        };

        let before = self.services.len();
        self.services.retain(|s| !s.matches(&key));

        if self.services.len() < before {
            self.log.log(LogLevel::Info, &format!("Service removed: {}", key));
            true
        } else {
            self.log.log(
                LogLevel::Debug,
                &format!("Attempted to remove non-existent service: {}", key.name),
            );
            false
        }
    }

    fn update_service(&mut self, result: &BrowseResult) -> bool {
        let Some(mut service) = Service::from_result(result) else {
            self.log.log(
                LogLevel::Warning,
                &format!("updateService: endpoint is not a service: {}", result.endpoint),
            );
            return false;
        };

        let key = service.key();
        let Some(existing) = self.services.iter_mut().find(|s| s.matches(&key)) else {
            self.log.log(
                LogLevel::Debug,
                &format!("Attempted to update non-existent service: {}", key.name),
            );
            return false;
        };

        if existing.same_description(&service) {
            self.log.log(
                LogLevel::Debug,
                &format!("Service unchanged: {}", existing.name),
            );
            return false;
        }

        // Keep the row id stable so presenters can diff by it.
        service.id = existing.id;
        *existing = service;

        self.log.log(
            LogLevel::Info,
            &format!(
                "Service updated: {} (type: {}, domain: {})",
                existing.name, existing.service_type, existing.domain
            ),
        );
        true
    }

    fn notify(&mut self) {
        let services = &self.services;
        for (_, observer) in self.observers.iter_mut() {
            observer(services);
        }
    }
}
