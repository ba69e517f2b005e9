//! # Almacenamiento en Memoria
//! src/storage/memory.rs
//!
//! Mapa protegido por un Mutex. Pensado para tests y pruebas de carga donde
//! no queremos tocar el disco.

use super::{mime_type_for, FileInfo, FileStorage, StorageError};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

struct StoredFile {
    data: Vec<u8>,
    modified: SystemTime,
}

/// Storage en memoria
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, StoredFile>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cantidad de archivos guardados
    pub fn len(&self) -> usize {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStorage for MemoryStorage {
    fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.insert(
            name.to_string(),
            StoredFile {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(name)
            .map(|file| file.data.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.contains_key(name)
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .iter()
            .map(|(name, file)| FileInfo {
                name: name.clone(),
                size: file.data.len() as u64,
                last_modified: DateTime::<Local>::from(file.modified)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                mime_type: mime_type_for(name).to_string(),
            })
            .collect())
    }
}
