//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Núcleo concurrente del servidor de archivos:
//! 1. `connection`: estado de cada cliente y su máquina de estados
//! 2. `registry`: conexiones vivas indexadas por id
//! 3. `multiplexer`: notificación de I/O (readiness o completion)
//! 4. `pipeline`: cuerpo de las tareas de lectura, dispatch y escritura
//! 5. `tcp`: arranque, threads y apagado

pub mod connection;
pub mod multiplexer;
mod pipeline;
pub mod registry;
pub mod tcp;

// Re-exportar para facilitar el uso
pub use connection::{Connection, ConnectionLease, ConnectionState};
pub use multiplexer::{Interest, IoEvent, IoEventKind, Multiplexer};
pub use registry::ConnectionRegistry;
pub use tcp::{Server, ServerHandle};
