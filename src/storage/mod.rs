//! # Almacenamiento de Archivos
//! src/storage/mod.rs
//!
//! Interfaz entre el servidor y el lugar donde viven los archivos. El núcleo
//! del servidor nunca toca el filesystem directamente: solo llama a
//! [`FileStorage`] con nombres ya validados. Los nombres que llegan en un
//! upload pasan antes por [`sanitize_filename`].
//!
//! Implementaciones:
//! - [`DiskStorage`]: un directorio en disco (escritura atómica)
//! - [`MemoryStorage`]: en memoria, para tests

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use thiserror::Error;

/// Metadatos de un archivo almacenado
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Fecha local con formato `%Y-%m-%d %H:%M:%S`
    pub last_modified: String,
    pub mime_type: String,
}

/// Errores del almacenamiento
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error on '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return StorageError::NotFound(name.to_string());
        }
        StorageError::Io {
            name: name.to_string(),
            source,
        }
    }
}

/// Operaciones que el servidor necesita del almacenamiento
pub trait FileStorage: Send + Sync {
    /// Guarda (o reemplaza) un archivo
    fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Lee el contenido completo de un archivo
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Indica si el archivo existe
    fn exists(&self, name: &str) -> bool;

    /// Borra un archivo
    fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Lista los archivos ordenados por nombre
    fn list(&self) -> Result<Vec<FileInfo>, StorageError>;
}

/// Tipo MIME según la extensión del archivo
///
/// # Ejemplo
/// ```
/// use file_server::storage::mime_type_for;
///
/// assert_eq!(mime_type_for("plano.DWG"), "application/acad");
/// assert_eq!(mime_type_for("sin_extension"), "application/octet-stream");
/// ```
pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => return "application/octet-stream",
    };

    match ext.as_str() {
        "pdf" => "application/pdf",
        "dwg" => "application/acad",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Nombre usado cuando no queda nada después de limpiar
pub const UNNAMED_FILE: &str = "unnamed_file";

/// Caracteres que no pueden llegar al nombre guardado
const REPLACED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Limpia el nombre que trae un upload antes de guardarlo
///
/// Reemplaza `<>:"/\|?*` y los caracteres de control por `_` y quita los
/// puntos al inicio y al final. Si no queda nada usa [`UNNAMED_FILE`].
///
/// # Ejemplo
/// ```
/// use file_server::storage::sanitize_filename;
///
/// assert_eq!(sanitize_filename("report:v2.txt"), "report_v2.txt");
/// assert_eq!(sanitize_filename("..."), "unnamed_file");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if REPLACED_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches('.');
    if trimmed.is_empty() {
        UNNAMED_FILE.to_string()
    } else {
        trimmed.to_string()
    }
}
