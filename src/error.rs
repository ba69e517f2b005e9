//! # Errores del Servidor
//! src/error.rs
//!
//! Errores que pueden impedir que el servidor arranque o siga corriendo.
//! Los errores de un request o de una conexión individual nunca llegan
//! aquí: se resuelven con una respuesta HTTP o cerrando esa conexión.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
