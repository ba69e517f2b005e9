//! # Multiplexor de I/O
//! src/server/multiplexer/mod.rs
//!
//! Abstracción sobre el mecanismo del sistema operativo que espera a que
//! varios sockets estén listos. El resto del servidor solo ve [`IoEvent`]s;
//! no sabe si detrás hay un modelo de readiness o de completion.
//!
//! | Modelo | Qué reporta | Quién lee |
//! |---|---|---|
//! | [`ReadinessMultiplexer`] | "el socket se puede leer/escribir" | el worker |
//! | [`CompletionMultiplexer`] | "la lectura pedida produjo N bytes" | el multiplexor |
//!
//! En ambos modelos el interés se arma una sola vez: después de cada evento
//! la conexión queda sin interés hasta que su tarea termine y llame a
//! [`Multiplexer::rearm`]. Así un evento nunca produce más de una tarea.

pub mod completion;
pub mod readiness;

pub use completion::CompletionMultiplexer;
pub use readiness::ReadinessMultiplexer;

use super::connection::Connection;
use crate::config::IoModel;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Interés a registrar para una conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl From<Interest> for mio::Interest {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
        }
    }
}

/// Qué ocurrió en una conexión
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoEventKind {
    /// Hay datos para leer (o el peer cerró)
    Readable,

    /// El socket acepta más bytes
    Writable,

    /// Una lectura emitida terminó; vacío significa EOF
    Received(Vec<u8>),

    /// Error de socket reportado por el sistema
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEvent {
    pub connection_id: u64,
    pub kind: IoEventKind,
}

impl IoEvent {
    pub fn new(connection_id: u64, kind: IoEventKind) -> Self {
        Self {
            connection_id,
            kind,
        }
    }
}

/// Contrato común de los multiplexores
pub trait Multiplexer: Send + Sync {
    /// Registra una conexión nueva con su primer interés
    fn register(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()>;

    /// Vuelve a armar el interés de una conexión ya registrada
    fn rearm(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()>;

    /// Quita la conexión; no falla si ya no estaba
    fn unregister(&self, connection: &Connection);

    /// Espera eventos como máximo `timeout`
    fn wait(&self, timeout: Duration) -> io::Result<Vec<IoEvent>>;

    /// Nombre del modelo (para logs y /stats)
    fn model(&self) -> IoModel;
}

/// Construye el multiplexor del modelo pedido
pub fn create(model: IoModel, read_chunk: usize) -> io::Result<Arc<dyn Multiplexer>> {
    Ok(match model {
        IoModel::Readiness => Arc::new(ReadinessMultiplexer::new()?),
        IoModel::Completion => Arc::new(CompletionMultiplexer::new(read_chunk)?),
    })
}

/// Cantidad de eventos que se sacan del sistema por espera
pub(crate) const EVENTS_CAPACITY: usize = 1024;
