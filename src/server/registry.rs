//! # Registro de Conexiones
//! src/server/registry.rs
//!
//! Colección de conexiones vivas protegida por un único Mutex. Las
//! conexiones se identifican por el id que también usa el multiplexor como
//! token.

use super::connection::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            // El 0 queda libre para tokens internos del multiplexor
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserva un id para una conexión nueva
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.lock().insert(connection.id(), connection);
    }

    /// Inserta solo si hay menos de `limit` conexiones
    pub fn try_insert(&self, connection: Arc<Connection>, limit: usize) -> bool {
        let mut connections = self.lock();
        if connections.len() >= limit {
            return false;
        }
        connections.insert(connection.id(), connection);
        true
    }

    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Saca del registro las conexiones inactivas por más de `timeout`
    ///
    /// Cada conexión expirada se devuelve a un solo caller, aunque varios
    /// barridos corran a la vez.
    pub fn remove_expired(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        let mut connections = self.lock();
        let expired: Vec<u64> = connections
            .values()
            .filter(|conn| conn.is_expired(timeout))
            .map(|conn| conn.id())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| connections.remove(&id))
            .collect()
    }

    /// Vacía el registro (apagado del servidor)
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.lock().drain().map(|(_, conn)| conn).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
