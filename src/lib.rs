//! # File Server
//! src/lib.rs
//!
//! Servidor HTTP de archivos concurrente: un acceptor, un event loop sobre
//! un multiplexor de I/O y un pool fijo de workers que consume una cola
//! acotada de tareas.
//!
//! ## Arquitectura
//!
//! El servidor está dividido en módulos especializados:
//! - `http`: Parsing de requests, serialización de responses y multipart
//! - `server`: Conexiones, multiplexor, pipeline de tareas y threads
//! - `tasks`: Cola acotada, pool de workers y límites de concurrencia
//! - `router`: Enrutamiento de peticiones a handlers
//! - `storage`: Almacenamiento de archivos (disco o memoria)
//! - `metrics`: Recolección de métricas y observabilidad
//! - `config`: Configuración por CLI y variables de entorno
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use file_server::config::Config;
//! use file_server::server::Server;
//!
//! let config = Config::default();
//! let server = Server::bind(config).expect("Error al iniciar servidor");
//! server.run().expect("Error fatal");
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod router;
pub mod server;
pub mod storage;
pub mod tasks;

pub use error::{Result, ServerError};
