//! Clients API: the application windows the worker can control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::Serialize;
use url::Url;

/// Unique identifier for a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(String);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (open application instance).
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Shell generation of the worker controlling this client, if any.
    pub controller: Option<String>,
}

impl Client {
    /// An uncontrolled window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: ClientId::new(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// What a window request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "window", content = "client", rename_all = "lowercase")]
pub enum WindowAction {
    /// An existing window at the URL was focused.
    Focused(ClientId),
    /// A new window was opened.
    Opened(ClientId),
}

/// Clients known to the worker.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) -> ClientId {
        let id = client.id.clone();
        self.clients.insert(id.clone(), client);
        id
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Window clients, optionally including ones no worker controls.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.client_type == ClientType::Window)
            .filter(|c| include_uncontrolled || c.controller.is_some())
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Take control of every window client. Returns how many changed controller.
    pub fn claim(&mut self, controller: &str) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.client_type != ClientType::Window {
                continue;
            }
            if client.controller.as_deref() != Some(controller) {
                client.controller = Some(controller.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    /// Focus a window already at `url`, or open a new focused one.
    pub fn open_or_focus(&mut self, url: &Url, controller: Option<&str>) -> WindowAction {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        if let Some(existing) = self
            .clients
            .values_mut()
            .find(|c| c.client_type == ClientType::Window && &c.url == url)
        {
            existing.focused = true;
            return WindowAction::Focused(existing.id.clone());
        }

        let mut client = Client::window(url.clone());
        client.focused = true;
        client.controller = controller.map(str::to_string);
        WindowAction::Opened(self.add(client))
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
