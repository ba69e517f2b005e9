//! # Parsing de Requests HTTP
//! src/http/request.rs
//!
//! Parser tolerante: nunca falla. Los campos que faltan quedan vacíos y es
//! el dispatcher quien decide si el request es utilizable.
//!
//! ## Formato de un Request
//!
//! ```text
//! POST /upload HTTP/1.1\r\n
//! Content-Type: multipart/form-data; boundary=XyZ\r\n
//! Content-Length: 123\r\n
//! \r\n
//! <body binario>
//! ```
//!
//! ## Componentes
//!
//! 1. **Request Line**: `METHOD /path VERSION`
//! 2. **Headers**: Pares `Name: Value` (uno por línea, se ignoran líneas sin `:`)
//! 3. **Separador**: `\r\n\r\n` (o `\n\n` por tolerancia)
//! 4. **Body**: Todos los bytes que llegaron después del separador
//!
//! Además expone [`frame`], que indica si un buffer parcial ya contiene un
//! request completo según su `Content-Length`.

use std::collections::HashMap;
use thiserror::Error;

/// Errores de protocolo (se responden con 400)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// La request line no tiene método o path
    #[error("Malformed request line: '{0}'")]
    MalformedRequestLine(String),

    /// `Content-Length` no es un entero no negativo
    #[error("Invalid Content-Length header: '{0}'")]
    InvalidContentLength(String),
}

/// Representa un request HTTP parseado
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Método HTTP tal como llegó (ej: "GET")
    method: String,

    /// Path en origin-form, incluyendo query si la hay
    path: String,

    /// Versión HTTP (ej: "HTTP/1.1")
    version: String,

    /// Headers HTTP; en duplicados gana la última ocurrencia
    headers: HashMap<String, String>,

    /// Body crudo, exactamente los bytes recibidos tras el separador
    body: Vec<u8>,
}

/// Resultado de examinar un buffer parcial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Falta el separador o faltan bytes de body.
    /// `expected` es el tamaño total cuando ya se conoce por los headers.
    Incomplete { expected: Option<usize> },

    /// El request ocupa los primeros `n` bytes del buffer
    Complete(usize),
}

/// Busca el fin de los headers
///
/// Retorna `(posición del separador, largo del separador)`. Prefiere
/// `\r\n\r\n` y cae a `\n\n`.
pub fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = find_subslice(buffer, b"\r\n\r\n") {
        return Some((pos, 4));
    }
    find_subslice(buffer, b"\n\n").map(|pos| (pos, 2))
}

/// Determina si el buffer contiene un request completo
///
/// # Ejemplo
/// ```
/// use file_server::http::request::{frame, Frame};
///
/// let partial = b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";
/// assert_eq!(frame(partial).unwrap(), Frame::Incomplete { expected: Some(49) });
///
/// let full = b"GET /files HTTP/1.1\r\n\r\n";
/// assert_eq!(frame(full).unwrap(), Frame::Complete(full.len()));
/// ```
pub fn frame(buffer: &[u8]) -> Result<Frame, ProtocolError> {
    let (header_end, separator_len) = match find_header_end(buffer) {
        Some(found) => found,
        None => return Ok(Frame::Incomplete { expected: None }),
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let mut content_length = 0usize;

    for line in head.lines().skip(1) {
        if let Some((name, value)) = split_header_line(line) {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
            }
        }
    }

    // Un Content-Length que no entra en memoria tampoco entra en el buffer
    let total = (header_end + separator_len)
        .checked_add(content_length)
        .ok_or_else(|| ProtocolError::InvalidContentLength(content_length.to_string()))?;
    if buffer.len() >= total {
        Ok(Frame::Complete(total))
    } else {
        Ok(Frame::Incomplete { expected: Some(total) })
    }
}

impl Request {
    /// Parsea un request desde bytes
    ///
    /// No valida nada: una request line con menos de tres tokens deja los
    /// campos faltantes vacíos, y el body es todo lo que sigue al separador.
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use file_server::http::Request;
    ///
    /// let raw = b"GET /download/report.txt HTTP/1.1\r\nHost: localhost\r\n\r\n";
    /// let request = Request::parse(raw);
    ///
    /// assert_eq!(request.method(), "GET");
    /// assert_eq!(request.path(), "/download/report.txt");
    /// assert_eq!(request.header("Host"), Some("localhost"));
    /// ```
    pub fn parse(buffer: &[u8]) -> Self {
        let (head_bytes, body) = match find_header_end(buffer) {
            Some((pos, len)) => (&buffer[..pos], buffer[pos + len..].to_vec()),
            None => (buffer, Vec::new()),
        };

        let head = String::from_utf8_lossy(head_bytes);
        let mut lines = head.lines();

        let mut request = Request {
            body,
            ..Default::default()
        };

        // 1. Request line: hasta tres tokens separados por espacios
        if let Some(line) = lines.next() {
            let mut tokens = line.split_whitespace();
            request.method = tokens.next().unwrap_or_default().to_string();
            request.path = tokens.next().unwrap_or_default().to_string();
            request.version = tokens.next().unwrap_or_default().to_string();
        }

        // 2. Headers
        for line in lines {
            if let Some((name, value)) = split_header_line(line) {
                request.headers.insert(name.to_string(), value.to_string());
            }
        }

        request
    }

    /// Verifica que la request line tenga método y path
    pub fn validate_request_line(&self) -> Result<(), ProtocolError> {
        if self.method.is_empty() || self.path.is_empty() || !self.path.starts_with('/') {
            return Err(ProtocolError::MalformedRequestLine(
                format!("{} {} {}", self.method, self.path, self.version).trim().to_string(),
            ));
        }
        Ok(())
    }

    // === Métodos públicos para acceder a los campos ===

    /// Obtiene el método HTTP del request
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Obtiene el path del request (con query)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path sin query string, usado para enrutar
    pub fn route_path(&self) -> &str {
        match self.path.find('?') {
            Some(pos) => &self.path[..pos],
            None => &self.path,
        }
    }

    /// Obtiene la versión HTTP
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Obtiene todos los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene un header específico
    ///
    /// Busca primero con el nombre exacto y luego sin distinguir mayúsculas.
    pub fn header(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.headers.get(name) {
            return Some(value.as_str());
        }
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Obtiene el body del request
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Separa una línea de header en el primer ':'; ambos lados recortados
fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches('\r');
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    if name.is_empty() {
        return None;
    }
    Some((name, line[colon + 1..].trim()))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let request = Request::parse(b"GET /files HTTP/1.1\r\n\r\n");

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "/files");
        assert_eq!(request.version(), "HTTP/1.1");
        assert!(request.body().is_empty());
    }

    #[test]
    fn test_parse_with_headers_trimmed() {
        let raw = b"GET / HTTP/1.1\r\n  Host :  localhost:8080 \r\nUser-Agent: test\r\n\r\n";
        let request = Request::parse(raw);

        assert_eq!(request.header("Host"), Some("localhost:8080"));
        assert_eq!(request.header("User-Agent"), Some("test"));
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let raw = b"GET / HTTP/1.1\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n";
        let request = Request::parse(raw);

        assert_eq!(request.header("X-Tag"), Some("two"));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let raw = b"POST /upload HTTP/1.1\r\ncontent-type: text/plain\r\n\r\n";
        let request = Request::parse(raw);

        assert_eq!(request.header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_lines_without_colon_are_ignored() {
        let raw = b"GET / HTTP/1.1\r\ngarbage line\r\nHost: x\r\n\r\n";
        let request = Request::parse(raw);

        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.header("Host"), Some("x"));
    }

    #[test]
    fn test_body_is_everything_after_separator() {
        let raw = b"POST /upload HTTP/1.1\r\nContent-Length: 8\r\n\r\n\r\n\r\n\x00\xffab";
        let request = Request::parse(raw);

        assert_eq!(request.body(), b"\r\n\r\n\x00\xffab");
    }

    #[test]
    fn test_lenient_lf_separator() {
        let raw = b"POST /upload HTTP/1.1\nHost: x\n\nbody";
        let request = Request::parse(raw);

        assert_eq!(request.header("Host"), Some("x"));
        assert_eq!(request.body(), b"body");
    }

    #[test]
    fn test_missing_tokens_leave_fields_empty() {
        let request = Request::parse(b"GET\r\n\r\n");

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "");
        assert_eq!(request.version(), "");
        assert!(request.validate_request_line().is_err());
    }

    #[test]
    fn test_empty_request() {
        let request = Request::parse(b"");
        assert!(matches!(
            request.validate_request_line(),
            Err(ProtocolError::MalformedRequestLine(_))
        ));
    }

    #[test]
    fn test_route_path_strips_query() {
        let request = Request::parse(b"GET /files?sort=name HTTP/1.1\r\n\r\n");
        assert_eq!(request.route_path(), "/files");
        assert_eq!(request.path(), "/files?sort=name");
    }

    #[test]
    fn test_frame_without_separator_is_incomplete() {
        assert_eq!(
            frame(b"GET /files HTTP/1.1\r\nHost: x").unwrap(),
            Frame::Incomplete { expected: None }
        );
    }

    #[test]
    fn test_frame_waits_for_declared_body() {
        let head = b"POST /upload HTTP/1.1\r\ncontent-length: 4\r\n\r\n";
        let mut buffer = head.to_vec();
        buffer.extend_from_slice(b"ab");
        assert_eq!(
            frame(&buffer).unwrap(),
            Frame::Incomplete { expected: Some(head.len() + 4) }
        );

        buffer.extend_from_slice(b"cd");
        assert_eq!(frame(&buffer).unwrap(), Frame::Complete(buffer.len()));
    }

    #[test]
    fn test_frame_ignores_trailing_bytes() {
        let raw = b"GET /files HTTP/1.1\r\n\r\nextra";
        assert_eq!(frame(raw).unwrap(), Frame::Complete(raw.len() - 5));
    }

    #[test]
    fn test_frame_rejects_bad_content_length() {
        let raw = b"POST /upload HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert_eq!(
            frame(raw),
            Err(ProtocolError::InvalidContentLength("lots".to_string()))
        );
    }

    #[test]
    fn test_frame_rejects_content_length_overflow() {
        let raw = b"POST /upload HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        assert_eq!(
            frame(raw),
            Err(ProtocolError::InvalidContentLength(
                "18446744073709551615".to_string()
            ))
        );
    }
}
