//! Clients API: the pages a worker can see, focus, open and claim.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A page or worker visible to the service worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// An uncontrolled, unfocused window client.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }

    fn accepts(&self, client: &Client) -> bool {
        if !self.include_uncontrolled && !client.controlled {
            return false;
        }
        match self.client_type {
            ClientType::All => true,
            t => client.client_type == t,
        }
    }
}

/// Host capability backing the `clients` global.
#[async_trait]
pub trait ClientsHost: Send + Sync {
    async fn match_all(&self, options: ClientMatchOptions) -> Result<Vec<Client>>;

    /// Bring a window client to the foreground.
    async fn focus(&self, id: &str) -> Result<Client>;

    /// Open a new window. `None` when the host cannot open windows.
    async fn open_window(&self, url: &Url) -> Result<Option<Client>>;

    /// Take control of every client in scope.
    async fn claim(&self) -> Result<()>;
}

/// Clients kept in process memory.
#[derive(Debug)]
pub struct MemoryClients {
    clients: RwLock<HashMap<String, Client>>,
    /// Insertion order, so `match_all` is stable.
    order: RwLock<Vec<String>>,
    can_open_windows: bool,
    next_id: AtomicU64,
}

impl Default for MemoryClients {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClients {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            can_open_windows: true,
            next_id: AtomicU64::new(1),
        }
    }

    /// A host without `clients.openWindow`.
    pub fn without_window_opening() -> Self {
        Self {
            can_open_windows: false,
            ..Self::new()
        }
    }

    pub async fn add(&self, client: Client) {
        let id = client.id.clone();
        if self.clients.write().await.insert(id.clone(), client).is_none() {
            self.order.write().await.push(id);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.order.write().await.retain(|c| c != id);
        self.clients.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl ClientsHost for MemoryClients {
    async fn match_all(&self, options: ClientMatchOptions) -> Result<Vec<Client>> {
        let order = self.order.read().await;
        let clients = self.clients.read().await;
        Ok(order
            .iter()
            .filter_map(|id| clients.get(id))
            .filter(|c| options.accepts(c))
            .cloned()
            .collect())
    }

    async fn focus(&self, id: &str) -> Result<Client> {
        let mut clients = self.clients.write().await;
        let target = clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::Client(format!("no client {id}")))?;
        if target.client_type != ClientType::Window {
            return Err(ServiceWorkerError::Client(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in clients.values_mut() {
            client.focused = client.id == id;
        }
        debug!(client = id, "Focused client");
        clients
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::Client(format!("no client {id}")))
    }

    async fn open_window(&self, url: &Url) -> Result<Option<Client>> {
        if !self.can_open_windows {
            return Ok(None);
        }

        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            focused: true,
            ..Client::window(id.clone(), url.clone())
        };

        let mut clients = self.clients.write().await;
        for other in clients.values_mut() {
            other.focused = false;
        }
        clients.insert(id.clone(), client.clone());
        drop(clients);
        self.order.write().await.push(id);

        debug!(url = %url, client = %client.id, "Opened window");
        Ok(Some(client))
    }

    async fn claim(&self) -> Result<()> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.controlled = true;
        }
        debug!(count = clients.len(), "Claimed clients");
        Ok(())
    }
}
