//! # Decodificador multipart/form-data
//! src/http/multipart.rs
//!
//! Extrae los archivos de un body `multipart/form-data`.
//!
//! ```text
//! --XyZ\r\n
//! Content-Disposition: form-data; name="file"; filename="a.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! x\r\n
//! --XyZ--\r\n
//! ```
//!
//! El nombre se toma preferentemente de `filename*=UTF-8''<percent-encoded>`
//! y si no existe de `filename="<literal>"`. Las partes sin nombre de
//! archivo (campos de formulario normales) se ignoran.

use super::request::find_header_end;
use super::url;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Un archivo extraído de un segmento multipart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFilePart {
    /// Nombre decodificado (UTF-8)
    pub filename: String,

    /// Bytes crudos del archivo
    pub data: Vec<u8>,
}

/// Errores del decodificador (se responden con 400)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    /// Falta el header Content-Type
    #[error("Missing Content-Type header; expected multipart/form-data")]
    MissingContentType,

    /// El Content-Type no es multipart/form-data
    #[error("Content-Type must be multipart/form-data, got '{0}'")]
    NotMultipart(String),

    /// No se encontró `boundary=` en el Content-Type
    #[error("Could not parse multipart boundary from Content-Type")]
    MissingBoundary,

    /// El body no contiene ninguna parte con filename
    #[error("No file parts found in multipart body")]
    NoFileParts,
}

fn boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)boundary\s*=\s*(?:"([^"]+)"|([^;\s]+))"#).expect("boundary regex")
    })
}

fn extended_filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)filename\*\s*=\s*"?([^']*)'[^']*'([^;"\r\n]+)"#).expect("filename* regex")
    })
}

fn plain_filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s"]+))"#).expect("filename regex")
    })
}

/// Extrae el boundary de un header Content-Type
///
/// # Ejemplo
/// ```
/// use file_server::http::multipart::boundary_from_content_type;
///
/// let ct = r#"multipart/form-data; boundary="----abc""#;
/// assert_eq!(boundary_from_content_type(ct).unwrap(), "----abc");
/// ```
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    if !content_type.to_ascii_lowercase().contains("multipart/form-data") {
        return Err(MultipartError::NotMultipart(content_type.to_string()));
    }

    let captures = boundary_regex()
        .captures(content_type)
        .ok_or(MultipartError::MissingBoundary)?;

    let boundary = captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    if boundary.is_empty() {
        return Err(MultipartError::MissingBoundary);
    }
    Ok(boundary)
}

/// Decodifica el body completo de un upload
///
/// Combina [`boundary_from_content_type`] y [`split_parts`]; falla si no
/// hay ninguna parte de archivo.
pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Vec<UploadedFilePart>, MultipartError> {
    let content_type = content_type.ok_or(MultipartError::MissingContentType)?;
    let boundary = boundary_from_content_type(content_type)?;

    let parts = split_parts(body, &boundary);
    if parts.is_empty() {
        return Err(MultipartError::NoFileParts);
    }
    Ok(parts)
}

/// Divide el body en los marcadores `--<boundary>` y extrae cada archivo
///
/// El payload de cada parte va desde la primera línea en blanco hasta el
/// siguiente marcador, sin incluir el `\r\n` que lo precede.
pub fn split_parts(body: &[u8], boundary: &str) -> Vec<UploadedFilePart> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let markers = find_all(body, &delimiter);
    let mut parts = Vec::new();

    for pair in markers.windows(2) {
        let segment = &body[pair[0] + delimiter.len()..pair[1]];

        // "--" tras el marcador = cierre del multipart
        if segment.starts_with(b"--") {
            break;
        }

        if let Some(part) = parse_segment(segment) {
            parts.push(part);
        }
    }

    parts
}

fn parse_segment(segment: &[u8]) -> Option<UploadedFilePart> {
    let segment = strip_leading_newline(segment);
    let (header_end, separator_len) = find_header_end(segment)?;

    let headers = String::from_utf8_lossy(&segment[..header_end]);
    let filename = extract_filename(&headers)?;
    if filename.is_empty() {
        // Input de archivo sin selección
        return None;
    }

    let payload = strip_trailing_newline(&segment[header_end + separator_len..]);

    Some(UploadedFilePart {
        filename,
        data: payload.to_vec(),
    })
}

/// Obtiene el nombre de archivo de los headers de una parte
///
/// La forma extendida (RFC 5987) tiene prioridad sobre la simple.
pub fn extract_filename(headers: &str) -> Option<String> {
    if let Some(captures) = extended_filename_regex().captures(headers) {
        // El charset declarado se respeta conceptualmente; los bytes se leen como UTF-8
        let encoded = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        return Some(url::decode(encoded.trim()));
    }

    plain_filename_regex().captures(headers).map(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() || haystack.len() < needle.len() {
        return positions;
    }

    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            positions.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    positions
}

fn strip_leading_newline(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_prefix(b"\r\n")
        .or_else(|| bytes.strip_prefix(b"\n"))
        .unwrap_or(bytes)
}

fn strip_trailing_newline(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with(parts: &[(&str, &[u8])], boundary: &str) -> Vec<u8> {
        let mut body = Vec::new();
        for (disposition, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    #[test]
    fn test_boundary_unquoted() {
        let ct = "multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxk";
        assert_eq!(
            boundary_from_content_type(ct).unwrap(),
            "----WebKitFormBoundary7MA4YWxk"
        );
    }

    #[test]
    fn test_boundary_followed_by_params() {
        let ct = "multipart/form-data; boundary=abc; charset=utf-8";
        assert_eq!(boundary_from_content_type(ct).unwrap(), "abc");
    }

    #[test]
    fn test_not_multipart() {
        assert!(matches!(
            boundary_from_content_type("application/json"),
            Err(MultipartError::NotMultipart(_))
        ));
    }

    #[test]
    fn test_missing_boundary() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data"),
            Err(MultipartError::MissingBoundary)
        );
    }

    #[test]
    fn test_single_part() {
        let body = body_with(&[(r#"form-data; name="file"; filename="a.txt""#, b"x")], "B");
        let parts = split_parts(&body, "B");

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "a.txt");
        assert_eq!(parts[0].data, b"x");
    }

    #[test]
    fn test_two_parts_binary_payload() {
        let body = body_with(
            &[
                (r#"form-data; name="f1"; filename="one.bin""#, b"\x00\r\n\xff"),
                (r#"form-data; name="f2"; filename="two.bin""#, b"second"),
            ],
            "sep",
        );
        let parts = split_parts(&body, "sep");

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].data, b"\x00\r\n\xff");
        assert_eq!(parts[1].filename, "two.bin");
        assert_eq!(parts[1].data, b"second");
    }

    #[test]
    fn test_extended_filename_preferred() {
        let disposition =
            r#"form-data; name="file"; filename="fallback.txt"; filename*=UTF-8''%E4%BA%BA%E6%89%8D.dwg"#;
        let body = body_with(&[(disposition, b"dwg")], "B");
        let parts = split_parts(&body, "B");

        assert_eq!(parts[0].filename, "人才.dwg");
    }

    #[test]
    fn test_plain_filename_is_literal_utf8() {
        let headers = "Content-Disposition: form-data; name=\"file\"; filename=\"año 2024.txt\"";
        assert_eq!(extract_filename(headers), Some("año 2024.txt".to_string()));
    }

    #[test]
    fn test_form_fields_are_skipped() {
        let body = body_with(
            &[
                (r#"form-data; name="comment""#, b"hello"),
                (r#"form-data; name="file"; filename="a.txt""#, b"x"),
            ],
            "B",
        );
        let parts = split_parts(&body, "B");

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "a.txt");
    }

    #[test]
    fn test_decode_without_file_parts() {
        let body = body_with(&[(r#"form-data; name="comment""#, b"hello")], "B");
        assert_eq!(
            decode(Some("multipart/form-data; boundary=B"), &body),
            Err(MultipartError::NoFileParts)
        );
    }

    #[test]
    fn test_decode_missing_content_type() {
        assert_eq!(decode(None, b""), Err(MultipartError::MissingContentType));
    }

    #[test]
    fn test_boundary_text_inside_payload_needs_dashes() {
        // "B" aparece en el contenido pero sin el prefijo "--"
        let body = body_with(&[(r#"form-data; name="f"; filename="b.txt""#, b"BBB-B")], "B");
        let parts = split_parts(&body, "B");
        assert_eq!(parts[0].data, b"BBB-B");
    }
}
