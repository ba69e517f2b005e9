//! # Validación de Nombres de Archivo
//! src/router/filename.rs
//!
//! Los nombres que llegan en el path (ya decodificados) o en un upload se
//! validan antes de llegar al storage. Un nombre inválido nunca se corrige
//! en silencio: se rechaza con la regla concreta que violó.
//!
//! Orden de las reglas:
//! 1. No vacío
//! 2. Sin `..`, `/` ni `\`
//! 3. Sin `<>:"|?*` ni caracteres de control
//! 4. Sin `.` al inicio o al final
//! 5. Como máximo 255 bytes

use thiserror::Error;

/// Largo máximo de un nombre en bytes (UTF-8)
pub const MAX_FILENAME_BYTES: usize = 255;

/// Caracteres prohibidos además de los de control
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Regla violada por un nombre de archivo (el Display es el body del 400)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("Filename must not be empty")]
    Empty,

    #[error("Filename contains dangerous characters ('..', '/' or '\\')")]
    Dangerous,

    #[error("Filename contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("Filename must not start or end with '.'")]
    LeadingOrTrailingDot,

    #[error("Filename is too long ({0} bytes, maximum is 255)")]
    TooLong(usize),
}

/// Valida un nombre de archivo
///
/// # Ejemplo
/// ```
/// use file_server::router::filename::{validate_filename, FilenameError};
///
/// assert!(validate_filename("report.txt").is_ok());
/// assert_eq!(validate_filename("../../etc/passwd"), Err(FilenameError::Dangerous));
/// ```
pub fn validate_filename(name: &str) -> Result<(), FilenameError> {
    if name.is_empty() {
        return Err(FilenameError::Empty);
    }

    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(FilenameError::Dangerous);
    }

    if let Some(c) = name
        .chars()
        .find(|c| INVALID_CHARS.contains(c) || c.is_control())
    {
        return Err(FilenameError::InvalidCharacter(c));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(FilenameError::LeadingOrTrailingDot);
    }

    if name.len() > MAX_FILENAME_BYTES {
        return Err(FilenameError::TooLong(name.len()));
    }

    Ok(())
}
