//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! API para construir respuestas de forma programática y serializarlas a
//! bytes listos para el socket.
//!
//! ## Formato de una respuesta
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
//!
//! `Content-Length` siempre se calcula del body al serializar; lo que el
//! caller haya puesto en ese header se ignora. Cada conexión atiende un solo
//! request, así que siempre se emite `Connection: close`.
//!
//! ## Ejemplo de uso
//!
//! ```
//! use file_server::http::{Response, StatusCode};
//!
//! let response = Response::new(StatusCode::Ok)
//!     .with_header("Content-Type", "application/json")
//!     .with_body(r#"{"message": "Hello"}"#);
//!
//! let bytes = response.to_bytes();
//! assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! ```

use super::StatusCode;
use std::collections::BTreeMap;

/// Versión que aparece en la status line
pub const HTTP_VERSION: &str = "1.1";

/// Content-Type cuando el caller no puso ninguno
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Valor del header `Server` en todas las respuestas
pub const SERVER_NAME: &str = concat!("file-server/", env!("CARGO_PKG_VERSION"));

/// Representa una respuesta HTTP completa
#[derive(Debug, Clone)]
pub struct Response {
    /// Código de estado HTTP (200, 404, etc.)
    status: StatusCode,

    /// Headers HTTP. Ordenados para que la salida sea determinista.
    headers: BTreeMap<String, String>,

    /// Cuerpo de la respuesta (binario, puede ser vacío)
    body: Vec<u8>,
}

impl Response {
    /// Crea una nueva respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Agrega un header a la respuesta (si ya existe, se sobrescribe)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    /// Agrega un header a una respuesta existente (versión mutable)
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Establece el cuerpo de la respuesta desde un string
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    /// Establece el cuerpo de la respuesta desde bytes
    ///
    /// Útil para descargas binarias: los bytes se envían sin re-codificar.
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Respuesta de texto plano UTF-8
    ///
    /// # Ejemplo
    /// ```
    /// use file_server::http::{Response, StatusCode};
    ///
    /// let response = Response::text(StatusCode::NotFound, "File not found: a.txt");
    /// assert_eq!(response.body(), b"File not found: a.txt");
    /// ```
    pub fn text(status: StatusCode, body: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", DEFAULT_CONTENT_TYPE)
            .with_body(body)
    }

    /// Respuesta JSON
    pub fn json(status: StatusCode, body: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(body)
    }

    /// Respuesta de error en texto plano con el defecto concreto en el body
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::text(status, message)
    }

    /// Convierte la respuesta a bytes listos para enviar por el socket
    ///
    /// Orden de emisión:
    /// 1. Status line `HTTP/1.1 <code> <texto>`
    /// 2. `Content-Length` calculado del body
    /// 3. `Connection: close`
    /// 4. `Content-Type` (por defecto texto UTF-8; charset agregado si es textual)
    /// 5. `Server`
    /// 6. El resto de headers tal cual
    /// 7. Línea vacía y body sin modificar
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = String::with_capacity(128 + self.headers.len() * 32);

        head.push_str(&format!(
            "HTTP/{} {} {}\r\n",
            HTTP_VERSION,
            self.status.as_u16(),
            self.status.reason_phrase()
        ));
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n");
        head.push_str(&format!("Content-Type: {}\r\n", self.effective_content_type()));
        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));

        for (name, value) in &self.headers {
            if is_managed_header(name) {
                continue;
            }
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        head.push_str("\r\n");

        let mut result = head.into_bytes();
        result.extend_from_slice(&self.body);
        result
    }

    /// Content-Type tal como se va a emitir
    pub fn effective_content_type(&self) -> String {
        let content_type = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Content-Type"))
            .map(|(_, value)| value.as_str());

        match content_type {
            None => DEFAULT_CONTENT_TYPE.to_string(),
            Some(value) if is_textual(value) && !value.contains("charset=") => {
                format!("{}; charset=utf-8", value)
            }
            Some(value) => value.to_string(),
        }
    }

    /// Obtiene el código de estado de la respuesta
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Obtiene una referencia a los headers
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Obtiene un header específico
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|value| value.as_str())
    }

    /// Obtiene una referencia al body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Headers que `to_bytes` emite por su cuenta
fn is_managed_header(name: &str) -> bool {
    ["Content-Type", "Content-Length", "Connection", "Server"]
        .iter()
        .any(|managed| name.eq_ignore_ascii_case(managed))
}

/// Tipos que llevan charset explícito
fn is_textual(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("text/")
        || matches!(
            mime.as_str(),
            "application/json" | "application/javascript" | "application/xml"
        )
}
