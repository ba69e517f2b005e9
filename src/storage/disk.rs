//! # Almacenamiento en Disco
//! src/storage/disk.rs
//!
//! Guarda los archivos en un directorio plano. Las escrituras van primero a
//! un archivo temporal y luego se renombran (atómico en sistemas Unix), así
//! un lector concurrente nunca ve un archivo a medio escribir.

use super::{mime_type_for, FileInfo, FileStorage, StorageError};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Prefijo de los temporales; `list` los oculta
const TEMP_PREFIX: &str = ".upload-";

/// Storage respaldado por un directorio
pub struct DiskStorage {
    /// Directorio base
    root: PathBuf,

    /// Contador para nombres de temporales únicos
    temp_counter: AtomicU64,
}

impl DiskStorage {
    /// Crea el storage y el directorio si no existe
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Directorio base del storage
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{}{}-{}.tmp", TEMP_PREFIX, std::process::id(), n))
    }
}

impl FileStorage for DiskStorage {
    fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.temp_path();

        let write_temp = || -> std::io::Result<()> {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(data)?;
            writer.flush()?;
            Ok(())
        };

        if let Err(e) = write_temp().and_then(|_| fs::rename(&temp_path, self.path_of(name))) {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::io(name, e));
        }

        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path_of(name)).map_err(|e| StorageError::io(name, e))
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        fs::remove_file(self.path_of(name)).map_err(|e| StorageError::io(name, e))
    }

    fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
        let root_name = self.root.display().to_string();
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&root_name, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&root_name, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }

            // Un archivo borrado entre read_dir y metadata simplemente no se lista
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            let last_modified = metadata
                .modified()
                .map(|time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();

            files.push(FileInfo {
                mime_type: mime_type_for(&name).to_string(),
                size: metadata.len(),
                last_modified,
                name,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
