//! The shared client registry.
//!
//! A reader/writer lock guards the map: concurrent reads, exclusive
//! writes. Clearing-before-reload drops the removed clients outside any
//! lock so it cannot deadlock against the removal path, which takes the
//! write lock itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use fw_core::benchmark::BenchmarkStore;

use crate::retrieve::MonitoredClient;
use crate::settings::{ClientSettings, SettingsError};

/// Registry change notifications, fired after the mutation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { client: String },
    Removed { client: String },
    Cleared { count: usize },
}

/// All monitored clients, keyed by validated client name.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<MonitoredClient>>>,
    benchmarks: Arc<BenchmarkStore>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            clients: RwLock::new(HashMap::new()),
            benchmarks: Arc::new(BenchmarkStore::new()),
            events,
        }
    }

    /// The benchmark store shared by every client in this registry.
    pub fn benchmarks(&self) -> Arc<BenchmarkStore> {
        Arc::clone(&self.benchmarks)
    }

    /// Subscribes to registry change events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Adds a client. Settings are validated here, and a duplicate name is
    /// an explicit error.
    pub fn add(&self, settings: ClientSettings) -> Result<Arc<MonitoredClient>, SettingsError> {
        let name = settings.validate()?;
        let client = Arc::new(MonitoredClient::new(settings, Arc::clone(&self.benchmarks))?);

        {
            let mut clients = write(&self.clients);
            if clients.contains_key(name.as_str()) {
                return Err(SettingsError::DuplicateName(name.to_string()));
            }
            clients.insert(name.to_string(), Arc::clone(&client));
        }

        let _ = self.events.send(RegistryEvent::Added {
            client: name.to_string(),
        });
        Ok(client)
    }

    /// Looks up a client by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<MonitoredClient>> {
        read(&self.clients).get(name).cloned()
    }

    /// Removes a client, cancelling its retrieval.
    pub fn remove(&self, name: &str) -> Option<Arc<MonitoredClient>> {
        let removed = write(&self.clients).remove(name);
        if let Some(client) = &removed {
            client.cancel_token().cancel();
            let _ = self.events.send(RegistryEvent::Removed {
                client: name.to_string(),
            });
        }
        removed
    }

    /// Registered client names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.clients).keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.clients).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.clients).is_empty()
    }

    /// Clears every client ahead of a configuration reload.
    ///
    /// The map is swapped out under a brief write lock; cancellation and
    /// teardown of the removed clients happen outside any lock.
    pub fn clear_for_reload(&self) -> usize {
        let drained = {
            let mut clients = write(&self.clients);
            std::mem::take(&mut *clients)
        };
        let count = drained.len();
        for client in drained.values() {
            client.cancel_token().cancel();
        }
        drop(drained);

        if count > 0 {
            let _ = self.events.send(RegistryEvent::Cleared { count });
        }
        count
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
