//! The worker: configuration, host capabilities and the event dispatch table.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use turnos_common::{Clock, SystemClock};
use url::Url;

use crate::cache::CacheProvider;
use crate::clients::{Client, ClientMatchOptions, ClientsHost};
use crate::config::WorkerConfig;
use crate::fetch::{FetchEvent, FetchOutcome};
use crate::lifecycle::{Lifecycle, LifecycleEvent, WorkerState};
use crate::message::{ControlMessage, MessageEvent, MessageOutcome, VersionReply};
use crate::net::NetworkFetcher;
use crate::notification::{
    NotificationClickEvent, NotificationDescriptor, NotificationService, PushEvent,
};
use crate::request::{Request, Response};
use crate::{Result, ServiceWorkerError};

// ==================== Events ====================

/// The six event kinds a worker handles, by platform name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::Message => "message",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

/// An event delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Message(MessageEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
            WorkerEvent::Message(_) => EventKind::Message,
        }
    }
}

/// Caches removed during activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    Focused(Client),
    Opened(Client),
    /// No matching window and the host cannot open one.
    NothingOpened,
}

/// Handler result, one variant per event kind.
#[derive(Debug)]
pub enum EventOutcome {
    Installed,
    Activated(ActivateReport),
    Fetch(FetchOutcome),
    Push(NotificationDescriptor),
    NotificationClick(ClickOutcome),
    Message(MessageOutcome),
}

// ==================== Capabilities ====================

/// Host capabilities the worker runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub caches: Arc<dyn CacheProvider>,
    pub network: Arc<dyn NetworkFetcher>,
    pub notifications: Arc<dyn NotificationService>,
    pub clients: Arc<dyn ClientsHost>,
    pub clock: Arc<dyn Clock>,
}

impl Capabilities {
    pub fn new(
        caches: Arc<dyn CacheProvider>,
        network: Arc<dyn NetworkFetcher>,
        notifications: Arc<dyn NotificationService>,
        clients: Arc<dyn ClientsHost>,
    ) -> Self {
        Self {
            caches,
            network,
            notifications,
            clients,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

// ==================== Worker ====================

/// One version of the Turnos worker.
pub struct ServiceWorker {
    pub(crate) config: Arc<WorkerConfig>,
    pub(crate) caps: Capabilities,
    lifecycle: RwLock<Lifecycle>,
}

impl ServiceWorker {
    /// Validate the configuration and create a worker in the parsed state.
    pub fn new(
        config: WorkerConfig,
        caps: Capabilities,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LifecycleEvent>)> {
        config.validate()?;
        let (lifecycle, events) = Lifecycle::new(config.cache_name.clone());
        Ok((
            Self {
                config: Arc::new(config),
                caps,
                lifecycle: RwLock::new(lifecycle),
            },
            events,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The current cache name, which is also the worker version.
    pub fn version(&self) -> &str {
        &self.config.cache_name
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state()
    }

    pub async fn is_active(&self) -> bool {
        self.lifecycle.read().await.is_active()
    }

    /// Single entry point: route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        let kind = event.kind();
        debug!(event = kind.as_str(), version = %self.version(), "Dispatching event");

        let outcome = match event {
            WorkerEvent::Install => self.handle_install().await.map(|_| EventOutcome::Installed),
            WorkerEvent::Activate => self.handle_activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(event) => self.handle_fetch(event).await.map(EventOutcome::Fetch),
            WorkerEvent::Push(event) => self.handle_push(event).await.map(EventOutcome::Push),
            WorkerEvent::NotificationClick(event) => self
                .handle_notification_click(event)
                .await
                .map(EventOutcome::NotificationClick),
            WorkerEvent::Message(event) => {
                self.handle_message(event).await.map(EventOutcome::Message)
            }
        };

        if let Err(ref e) = outcome {
            warn!(event = kind.as_str(), category = e.category(), error = %e, "Handler failed");
        }
        outcome
    }

    /// Install and, since install requests skip-waiting, activate right away.
    pub async fn start(&self) -> Result<ActivateReport> {
        self.handle_install().await?;
        if !self.lifecycle.read().await.skip_waiting_requested() {
            return Err(ServiceWorkerError::state("installed worker is waiting"));
        }
        self.handle_activate().await
    }

    // ==================== install ====================

    async fn handle_install(&self) -> Result<()> {
        self.lifecycle.write().await.transition(WorkerState::Installing)?;
        info!(cache = %self.version(), "Installing worker");

        match self.precache().await {
            Ok(count) => {
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.transition(WorkerState::Installed)?;
                lifecycle.skip_waiting();
                info!(cache = %self.version(), count, "Worker installed");
                Ok(())
            }
            Err(e) => {
                error!(cache = %self.version(), error = %e, "Install failed");
                self.lifecycle.write().await.transition(WorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    /// Fetch the whole pre-fetch list, then store it as one batch.
    async fn precache(&self) -> Result<usize> {
        let cache_name = &self.config.cache_name;
        self.caps.caches.open(cache_name).await?;

        let urls = self.config.precache_requests()?;
        let batch = try_join_all(urls.into_iter().map(|url| self.prefetch(url))).await?;
        let count = batch.len();
        self.caps.caches.put_all(cache_name, batch).await?;
        Ok(count)
    }

    async fn prefetch(&self, url: Url) -> Result<(Request, Response)> {
        let request = Request::get(url);
        let response = self.caps.network.fetch(&request).await.map_err(|e| {
            ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.is_ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("status {}", response.status.as_u16()),
            });
        }
        Ok((request, response))
    }

    // ==================== activate ====================

    async fn handle_activate(&self) -> Result<ActivateReport> {
        self.lifecycle.write().await.transition(WorkerState::Activating)?;
        self.run_activation().await
    }

    /// Activation work; the caller has already moved the worker to `Activating`.
    async fn run_activation(&self) -> Result<ActivateReport> {
        info!(cache = %self.version(), "Activating worker");

        match self.cleanup_and_claim().await {
            Ok(report) => {
                self.lifecycle.write().await.transition(WorkerState::Activated)?;
                info!(cache = %self.version(), deleted = report.deleted.len(), "Worker activated");
                Ok(report)
            }
            Err(e) => {
                error!(cache = %self.version(), error = %e, "Activation failed");
                self.lifecycle.write().await.transition(WorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    async fn cleanup_and_claim(&self) -> Result<ActivateReport> {
        let mut report = ActivateReport::default();
        for name in self.caps.caches.keys().await? {
            if name == self.config.cache_name {
                continue;
            }
            if self.caps.caches.delete(&name).await? {
                info!(cache = %name, "Deleted stale cache");
                report.deleted.push(name);
            }
        }

        self.caps.clients.claim().await?;
        Ok(report)
    }

    // ==================== push ====================

    async fn handle_push(&self, event: PushEvent) -> Result<NotificationDescriptor> {
        let descriptor = NotificationDescriptor::from_push(
            event.data.as_deref(),
            &self.config.notifications,
            self.caps.clock.now_millis(),
        );

        self.caps.notifications.show_notification(&descriptor).await?;
        info!(title = %descriptor.title, tag = %descriptor.tag, "Notification shown");
        Ok(descriptor)
    }

    // ==================== notificationclick ====================

    async fn handle_notification_click(
        &self,
        event: NotificationClickEvent,
    ) -> Result<ClickOutcome> {
        let tag = &event.notification.tag;
        if let Err(e) = self.caps.notifications.close_notification(tag).await {
            warn!(tag = %tag, error = %e, "Closing notification failed");
        }

        if event.is_dismiss() {
            debug!(tag = %tag, "Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let windows = self
            .caps
            .clients
            .match_all(ClientMatchOptions::all_windows())
            .await?;
        if let Some(window) = windows.iter().find(|c| self.config.is_same_origin(&c.url)) {
            let focused = self.caps.clients.focus(&window.id).await?;
            info!(client = %focused.id, "Focused panel window");
            return Ok(ClickOutcome::Focused(focused));
        }

        let target = self.config.resolve(&event.notification.data.url)?;
        match self.caps.clients.open_window(&target).await? {
            Some(client) => {
                info!(url = %target, client = %client.id, "Opened panel window");
                Ok(ClickOutcome::Opened(client))
            }
            None => {
                warn!(url = %target, "Host cannot open windows");
                Ok(ClickOutcome::NothingOpened)
            }
        }
    }

    // ==================== message ====================

    async fn handle_message(&self, event: MessageEvent) -> Result<MessageOutcome> {
        match ControlMessage::parse(&event.data) {
            Some(ControlMessage::SkipWaiting) => {
                // Check and claim the activation under one guard.
                let promoted = {
                    let mut lifecycle = self.lifecycle.write().await;
                    lifecycle.skip_waiting();
                    if lifecycle.state() == WorkerState::Installed {
                        lifecycle.transition(WorkerState::Activating)?;
                        true
                    } else {
                        false
                    }
                };
                if promoted {
                    self.run_activation().await?;
                }
                Ok(MessageOutcome::SkippedWaiting)
            }
            Some(ControlMessage::GetVersion) => {
                let Some(port) = event.ports.first() else {
                    warn!("GET_VERSION without a reply port");
                    return Ok(MessageOutcome::Ignored);
                };
                let reply = VersionReply {
                    version: self.config.cache_name.clone(),
                };
                if let Err(e) = port.post_message(serde_json::to_value(&reply)?) {
                    warn!(error = %e, "GET_VERSION reply dropped");
                }
                Ok(MessageOutcome::VersionSent(reply.version))
            }
            None => {
                debug!(data = %event.data, "Ignoring unknown message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("version", &self.config.cache_name)
            .field("scope", &self.config.scope.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("sync"), None);
    }

    #[test]
    fn test_event_kind_of_events() {
        assert_eq!(WorkerEvent::Install.kind(), EventKind::Install);
        assert_eq!(
            WorkerEvent::Push(PushEvent::empty()).kind(),
            EventKind::Push
        );
        assert_eq!(
            WorkerEvent::Message(MessageEvent::new(serde_json::Value::Null)).kind(),
            EventKind::Message
        );
    }
}
