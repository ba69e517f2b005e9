//! # Handlers de Archivos
//! src/router/handlers.rs
//!
//! Un handler por endpoint. Todos reciben el estado compartido, el request y
//! el parámetro de path (la parte que sigue al prefijo de la ruta, todavía
//! percent-encoded).
//!
//! | Endpoint | Handler |
//! |---|---|
//! | `GET /files` | [`list_files`] |
//! | `GET /download/<name>` | [`download_file`] |
//! | `POST /upload` | [`upload_files`] |
//! | `DELETE /delete/<name>` | [`delete_file`] |
//! | `GET /stats` | [`stats`] |

use super::filename::validate_filename;
use crate::config::{Config, IoModel};
use crate::http::{multipart, url, Request, Response, StatusCode};
use crate::metrics::MetricsCollector;
use crate::storage::{mime_type_for, sanitize_filename, FileStorage, StorageError};
use crate::tasks::{ConcurrencyLimiter, TaskQueue};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Estado compartido por todos los handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn FileStorage>,
    pub metrics: MetricsCollector,
    pub uploads: ConcurrencyLimiter,
    pub downloads: ConcurrencyLimiter,
    pub retry_after_ms: u64,
    pub io_model: IoModel,
    /// Cola del servidor, para reportar su ocupación en /stats
    pub queue: Option<TaskQueue>,
}

impl AppState {
    pub fn new(storage: Arc<dyn FileStorage>, config: &Config) -> Self {
        Self {
            storage,
            metrics: MetricsCollector::new(),
            uploads: ConcurrencyLimiter::new("uploads", config.max_uploads),
            downloads: ConcurrencyLimiter::new("downloads", config.max_downloads),
            retry_after_ms: config.retry_after_ms,
            io_model: config.io_model,
            queue: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_queue(mut self, queue: TaskQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// 503 con `Retry-After` en segundos (redondeado hacia arriba)
    fn busy(&self, limiter: &ConcurrencyLimiter) -> Response {
        self.metrics.transfer_rejected();
        warn!(
            "Too many concurrent {} ({} active), answering 503",
            limiter.name(),
            limiter.active()
        );

        let retry_secs = self.retry_after_ms.div_ceil(1000).max(1);
        Response::error(
            StatusCode::ServiceUnavailable,
            &format!("Too many concurrent {}, retry later", limiter.name()),
        )
        .with_header("Retry-After", &retry_secs.to_string())
    }
}

#[derive(Serialize)]
struct FileEntry {
    filename: String,
    size: u64,
    last_modified: String,
    mime_type: String,
    download_url: String,
    delete_url: String,
}

#[derive(Serialize)]
struct FileListing {
    status: &'static str,
    message: &'static str,
    count: usize,
    files: Vec<FileEntry>,
}

/// `GET /files`
pub fn list_files(state: &AppState, _request: &Request, _param: &str) -> Response {
    let files = match state.storage.list() {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list files: {}", e);
            return Response::error(StatusCode::InternalServerError, "Failed to list files");
        }
    };

    let files: Vec<FileEntry> = files
        .into_iter()
        .map(|info| {
            let encoded = url::encode(&info.name);
            FileEntry {
                download_url: format!("/download/{}", encoded),
                delete_url: format!("/delete/{}", encoded),
                filename: info.name,
                size: info.size,
                last_modified: info.last_modified,
                mime_type: info.mime_type,
            }
        })
        .collect();

    let listing = FileListing {
        status: "success",
        message: "File list retrieved",
        count: files.len(),
        files,
    };

    match serde_json::to_string_pretty(&listing) {
        Ok(body) => Response::json(StatusCode::Ok, &body),
        Err(e) => {
            warn!("Failed to serialize file list: {}", e);
            Response::error(StatusCode::InternalServerError, "Failed to list files")
        }
    }
}

/// Decodifica y valida el nombre que viene en el path
fn filename_from_param(param: &str) -> Result<String, Response> {
    let name = url::decode(param);
    validate_filename(&name).map_err(|e| {
        debug!("Rejected filename {:?}: {}", name, e);
        Response::error(StatusCode::BadRequest, &e.to_string())
    })?;
    Ok(name)
}

/// `GET /download/<name>`
pub fn download_file(state: &AppState, _request: &Request, param: &str) -> Response {
    let name = match filename_from_param(param) {
        Ok(name) => name,
        Err(response) => return response,
    };

    let _permit = match state.downloads.try_acquire() {
        Some(permit) => permit,
        None => return state.busy(&state.downloads),
    };

    if !state.storage.exists(&name) {
        return Response::error(StatusCode::NotFound, &format!("File not found: {}", name));
    }

    match state.storage.read(&name) {
        Ok(data) => {
            state.metrics.file_downloaded();
            info!("Download {} ({} bytes)", name, data.len());

            Response::new(StatusCode::Ok)
                .with_header("Content-Type", mime_type_for(&name))
                .with_header(
                    "Content-Disposition",
                    &format!("attachment; filename=\"{}\"", url::encode(&name)),
                )
                .with_body_bytes(data)
        }
        Err(StorageError::NotFound(_)) => {
            Response::error(StatusCode::NotFound, &format!("File not found: {}", name))
        }
        Err(e) => {
            warn!("Failed to read {}: {}", name, e);
            Response::error(
                StatusCode::InternalServerError,
                &format!("Failed to read file: {}", name),
            )
        }
    }
}

/// `DELETE /delete/<name>`
pub fn delete_file(state: &AppState, _request: &Request, param: &str) -> Response {
    let name = match filename_from_param(param) {
        Ok(name) => name,
        Err(response) => return response,
    };

    if !state.storage.exists(&name) {
        return Response::error(StatusCode::NotFound, &format!("File not found: {}", name));
    }

    match state.storage.delete(&name) {
        Ok(()) => {
            state.metrics.file_deleted();
            info!("Deleted {}", name);
            Response::text(StatusCode::Ok, &format!("File deleted: {}", name))
        }
        Err(StorageError::NotFound(_)) => {
            Response::error(StatusCode::NotFound, &format!("File not found: {}", name))
        }
        Err(e) => {
            warn!("Failed to delete {}: {}", name, e);
            Response::error(
                StatusCode::InternalServerError,
                &format!("Failed to delete file: {}", name),
            )
        }
    }
}

/// Resultado de guardar cada parte de un upload
#[derive(Debug, Default)]
struct UploadReport {
    saved: Vec<String>,
    failed: Vec<String>,
    rejected: Vec<(String, String)>,
}

impl UploadReport {
    fn status(&self) -> StatusCode {
        let problems = !self.failed.is_empty() || !self.rejected.is_empty();

        match (self.saved.is_empty(), problems) {
            (false, false) => StatusCode::Ok,
            (false, true) => StatusCode::MultiStatus,
            (true, _) if !self.failed.is_empty() => StatusCode::InternalServerError,
            (true, _) => StatusCode::BadRequest,
        }
    }

    fn body(&self) -> String {
        let mut lines = Vec::new();

        if !self.saved.is_empty() {
            lines.push(format!(
                "Uploaded {} file(s): {}",
                self.saved.len(),
                self.saved.join(", ")
            ));
        }
        if !self.failed.is_empty() {
            lines.push(format!(
                "Failed to save {} file(s): {}",
                self.failed.len(),
                self.failed.join(", ")
            ));
        }
        if !self.rejected.is_empty() {
            let rejected: Vec<String> = self
                .rejected
                .iter()
                .map(|(name, reason)| format!("{} ({})", name, reason))
                .collect();
            lines.push(format!(
                "Rejected {} file(s): {}",
                rejected.len(),
                rejected.join(", ")
            ));
        }

        lines.join("\n")
    }
}

/// `POST /upload`
///
/// El nombre de cada parte se limpia con [`sanitize_filename`] y se guarda
/// por separado; la respuesta lista los nombres guardados. Solo se rechazan
/// los nombres que siguen siendo inválidos después de limpiarlos (`..`
/// interno o más de 255 bytes).
///
/// | Resultado | Status |
/// |---|---|
/// | todas guardadas | 200 |
/// | algunas guardadas | 207 |
/// | ninguna guardada, alguna falló en el storage | 500 |
/// | todas con nombre inválido | 400 |
pub fn upload_files(state: &AppState, request: &Request, _param: &str) -> Response {
    let _permit = match state.uploads.try_acquire() {
        Some(permit) => permit,
        None => return state.busy(&state.uploads),
    };

    let parts = match multipart::decode(request.header("Content-Type"), request.body()) {
        Ok(parts) => parts,
        Err(e) => {
            debug!("Rejected upload: {}", e);
            return Response::error(StatusCode::BadRequest, &e.to_string());
        }
    };

    let mut report = UploadReport::default();

    for part in parts {
        let name = sanitize_filename(&part.filename);
        if name != part.filename {
            debug!("Upload name {:?} stored as {:?}", part.filename, name);
        }

        if let Err(e) = validate_filename(&name) {
            report.rejected.push((part.filename, e.to_string()));
            continue;
        }

        match state.storage.save(&name, &part.data) {
            Ok(()) => {
                state.metrics.file_uploaded();
                info!("Upload {} ({} bytes)", name, part.data.len());
                report.saved.push(name);
            }
            Err(e) => {
                warn!("Failed to save {}: {}", name, e);
                report.failed.push(name);
            }
        }
    }

    Response::text(report.status(), &report.body())
}

/// `GET /stats`
pub fn stats(state: &AppState, _request: &Request, _param: &str) -> Response {
    let mut body = match serde_json::to_value(state.metrics.snapshot()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to serialize metrics: {}", e);
            return Response::error(StatusCode::InternalServerError, "Failed to collect stats");
        }
    };

    if let Some(object) = body.as_object_mut() {
        object.insert("status".to_string(), json!("success"));
        object.insert("io_model".to_string(), json!(state.io_model.to_string()));
        object.insert(
            "tasks".to_string(),
            json!(state.queue.as_ref().map(|queue| queue.stats())),
        );
        object.insert(
            "limits".to_string(),
            json!({
                "uploads": { "active": state.uploads.active(), "max": state.uploads.max() },
                "downloads": { "active": state.downloads.active(), "max": state.downloads.max() },
            }),
        );
    }

    Response::json(StatusCode::Ok, &body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileInfo, MemoryStorage};

    /// Storage que falla al guardar ciertos nombres
    struct FailingStorage {
        inner: MemoryStorage,
        fail_on: &'static str,
    }

    impl FileStorage for FailingStorage {
        fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
            if name == self.fail_on {
                return Err(StorageError::Io {
                    name: name.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.save(name, data)
        }
        fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.read(name)
        }
        fn exists(&self, name: &str) -> bool {
            self.inner.exists(name)
        }
        fn delete(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete(name)
        }
        fn list(&self) -> Result<Vec<FileInfo>, StorageError> {
            self.inner.list()
        }
    }

    fn state_with(storage: Arc<dyn FileStorage>) -> AppState {
        AppState::new(storage, &Config::default())
    }

    fn memory_state() -> (AppState, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (state_with(storage.clone()), storage)
    }

    fn upload_request(parts: &[(&str, &[u8])]) -> Request {
        let mut body = Vec::new();
        for (name, data) in parts {
            body.extend_from_slice(b"--XyZ\r\n");
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\r\n", name)
                    .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--XyZ--\r\n");

        let mut raw = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);
        Request::parse(&raw)
    }

    fn body_text(response: &Response) -> String {
        String::from_utf8_lossy(response.body()).to_string()
    }

    #[test]
    fn test_download_existing() {
        let (state, storage) = memory_state();
        storage.save("report.txt", b"hi").unwrap();

        let response = download_file(&state, &Request::default(), "report.txt");
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body(), b"hi");
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(
            response.header("Content-Disposition"),
            Some("attachment; filename=\"report.txt\"")
        );
    }

    #[test]
    fn test_download_percent_encoded_name() {
        let (state, storage) = memory_state();
        storage.save("my file.pdf", b"%PDF").unwrap();

        let response = download_file(&state, &Request::default(), "my%20file.pdf");
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            response.header("Content-Disposition"),
            Some("attachment; filename=\"my%20file.pdf\"")
        );
    }

    #[test]
    fn test_download_missing() {
        let (state, _) = memory_state();
        let response = download_file(&state, &Request::default(), "nope.txt");
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[test]
    fn test_download_dangerous_name() {
        let (state, _) = memory_state();
        let response = download_file(&state, &Request::default(), "..%2F..%2Fetc%2Fpasswd");
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(body_text(&response).contains("dangerous"));
    }

    #[test]
    fn test_download_limit() {
        let (state, storage) = memory_state();
        storage.save("a.txt", b"x").unwrap();

        let permits: Vec<_> = (0..state.downloads.max())
            .map(|_| state.downloads.try_acquire().unwrap())
            .collect();

        let response = download_file(&state, &Request::default(), "a.txt");
        assert_eq!(response.status(), StatusCode::ServiceUnavailable);
        assert_eq!(response.header("Retry-After"), Some("5"));

        drop(permits);
        let response = download_file(&state, &Request::default(), "a.txt");
        assert_eq!(response.status(), StatusCode::Ok);
    }

    #[test]
    fn test_delete() {
        let (state, storage) = memory_state();
        storage.save("gone.txt", b"x").unwrap();

        let response = delete_file(&state, &Request::default(), "gone.txt");
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(!storage.exists("gone.txt"));

        let response = delete_file(&state, &Request::default(), "gone.txt");
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[test]
    fn test_delete_traversal_never_reaches_storage() {
        let (state, storage) = memory_state();
        let response = delete_file(&state, &Request::default(), "../../etc/passwd");

        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(body_text(&response).contains("dangerous"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_upload_single() {
        let (state, storage) = memory_state();
        let response = upload_files(&state, &upload_request(&[("a.txt", b"x")]), "");

        assert_eq!(response.status(), StatusCode::Ok);
        assert!(body_text(&response).contains("a.txt"));
        assert_eq!(storage.read("a.txt").unwrap(), b"x");
    }

    #[test]
    fn test_upload_partial_failure() {
        let storage = Arc::new(FailingStorage {
            inner: MemoryStorage::new(),
            fail_on: "bad.bin",
        });
        let state = state_with(storage.clone());

        let request = upload_request(&[("good.txt", b"ok"), ("bad.bin", b"no")]);
        let response = upload_files(&state, &request, "");
        let body = body_text(&response);

        assert_eq!(response.status(), StatusCode::MultiStatus);
        assert!(body.contains("Uploaded 1 file(s): good.txt"));
        assert!(body.contains("Failed to save 1 file(s): bad.bin"));
        assert!(storage.exists("good.txt"));
    }

    #[test]
    fn test_upload_total_failure() {
        let storage = Arc::new(FailingStorage {
            inner: MemoryStorage::new(),
            fail_on: "a.txt",
        });
        let response = upload_files(&state_with(storage), &upload_request(&[("a.txt", b"x")]), "");
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn test_upload_sanitizes_names() {
        let (state, storage) = memory_state();

        let request = upload_request(&[("report:v2.txt", b"x"), (".hidden", b"y")]);
        let response = upload_files(&state, &request, "");

        assert_eq!(response.status(), StatusCode::Ok);
        assert!(body_text(&response).contains("Uploaded 2 file(s): report_v2.txt, hidden"));
        assert_eq!(storage.read("report_v2.txt").unwrap(), b"x");
        assert_eq!(storage.read("hidden").unwrap(), b"y");
        assert!(!storage.exists("report:v2.txt"));
    }

    #[test]
    fn test_upload_invalid_names() {
        let (state, storage) = memory_state();

        let response = upload_files(&state, &upload_request(&[("a..b", b"x")]), "");
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(storage.is_empty());

        let long = format!("{}.txt", "a".repeat(300));
        let request = upload_request(&[("ok.txt", b"x"), (long.as_str(), b"y")]);
        let response = upload_files(&state, &request, "");
        assert_eq!(response.status(), StatusCode::MultiStatus);
        assert!(body_text(&response).contains("Rejected 1 file(s)"));
        assert!(storage.exists("ok.txt"));
    }

    #[test]
    fn test_upload_not_multipart() {
        let (state, _) = memory_state();
        let request = Request::parse(b"POST /upload HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{}");

        let response = upload_files(&state, &request, "");
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(body_text(&response).contains("multipart/form-data"));
    }

    #[test]
    fn test_list_files_json() {
        let (state, storage) = memory_state();
        storage.save("b c.txt", b"hello").unwrap();

        let response = list_files(&state, &Request::default(), "");
        assert_eq!(response.status(), StatusCode::Ok);

        let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["count"], 1);
        assert_eq!(json["files"][0]["filename"], "b c.txt");
        assert_eq!(json["files"][0]["size"], 5);
        assert_eq!(json["files"][0]["mime_type"], "text/plain");
        assert_eq!(json["files"][0]["download_url"], "/download/b%20c.txt");
        assert_eq!(json["files"][0]["delete_url"], "/delete/b%20c.txt");
    }

    #[test]
    fn test_stats_json() {
        let (state, _) = memory_state();
        let state = state.with_queue(TaskQueue::new(7));
        state.metrics.record_request(200, std::time::Duration::from_millis(1));

        let response = stats(&state, &Request::default(), "");
        let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["io_model"], "readiness");
        assert_eq!(json["requests"]["total"], 1);
        assert_eq!(json["tasks"]["capacity"], 7);
        assert_eq!(json["limits"]["uploads"]["max"], 100);
    }
}
