//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Codec HTTP implementado desde cero, sin librerías de alto nivel:
//!
//! - Parsing tolerante de requests y detección de request completo (framing)
//! - Construcción y serialización de responses
//! - Códigos de estado
//! - Percent-encoding de nombres de archivo
//! - Decodificación de uploads `multipart/form-data`
//!
//! Todas las funciones son puras: reciben bytes y devuelven estructuras (o
//! al revés). Nada aquí toca sockets.
//!
//! ### Formato de Request
//!
//! ```text
//! GET /download/report.txt HTTP/1.1\r\n
//! Header-Name: Header-Value\r\n
//! \r\n
//! ```
//!
//! ### Formato de Response
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Length: 2\r\n
//! Connection: close\r\n
//! Content-Type: text/plain; charset=utf-8\r\n
//! Server: file-server/0.1.0\r\n
//! \r\n
//! hi
//! ```

pub mod multipart; // Decodificador multipart/form-data
pub mod request;   // Parsing de HTTP requests
pub mod response;  // Construcción de HTTP responses
pub mod status;    // Códigos de estado HTTP
pub mod url;       // Percent-encoding

// Re-exportamos los tipos principales para facilitar su uso
pub use multipart::{MultipartError, UploadedFilePart};
pub use request::{Frame, ProtocolError, Request};
pub use response::Response;
pub use status::StatusCode;
