//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración del servidor de archivos con soporte para argumentos CLI y
//! variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./file_server --port 8080 \
//!   --upload-dir ./uploads \
//!   --workers 8 \
//!   --io-model completion
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=0.0.0.0 UPLOAD_DIR=/srv/files ./file_server
//! ```

use clap::{Parser, ValueEnum};
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Estrategia de multiplexación de I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IoModel {
    /// El multiplexor avisa que el socket está listo; el worker lee
    Readiness,
    /// El multiplexor hace la lectura y entrega los bytes leídos
    Completion,
}

impl fmt::Display for IoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoModel::Readiness => write!(f, "readiness"),
            IoModel::Completion => write!(f, "completion"),
        }
    }
}

/// Configuración del servidor de archivos
#[derive(Debug, Clone, Parser)]
#[command(name = "file_server")]
#[command(about = "Servidor HTTP concurrente de archivos")]
#[command(version)]
pub struct Config {
    /// Puerto en el que escucha el servidor (0 = efímero)
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    /// Directorio donde se guardan los archivos
    #[arg(long = "upload-dir", default_value = "uploads", env = "UPLOAD_DIR")]
    pub upload_dir: String,

    // === Workers y cola ===

    /// Número de workers que drenan la cola de tareas
    #[arg(short, long, default_value = "8", env = "WORKERS")]
    pub workers: usize,

    /// Capacidad máxima de la cola de tareas
    #[arg(long = "queue-capacity", default_value = "50000", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Conexiones ===

    /// Máximo de conexiones vivas; las que excedan se cierran al aceptarlas
    #[arg(long = "max-connections", default_value = "10000", env = "MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Tiempo de inactividad tras el cual se cierra una conexión
    #[arg(long = "connection-timeout-ms", default_value = "30000", env = "CONNECTION_TIMEOUT_MS")]
    pub connection_timeout_ms: u64,

    /// Timeout de cada espera del multiplexor
    #[arg(long = "poll-timeout-ms", default_value = "100", env = "POLL_TIMEOUT_MS")]
    pub poll_timeout_ms: u64,

    /// Intervalo mínimo entre barridos de conexiones expiradas
    #[arg(long = "sweep-interval-ms", default_value = "1000", env = "SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    // === Buffers ===

    /// Bytes leídos del socket por llamada
    #[arg(long = "read-buffer-size", default_value = "65536", env = "READ_BUFFER_SIZE")]
    pub read_buffer_size: usize,

    /// Tamaño máximo del buffer de lectura de una conexión
    #[arg(long = "max-request-bytes", default_value = "104923136", env = "MAX_REQUEST_BYTES")]
    pub max_request_bytes: usize,

    // === Límites de transferencias ===

    /// Uploads procesándose a la vez
    #[arg(long = "max-uploads", default_value = "100", env = "MAX_UPLOADS")]
    pub max_uploads: usize,

    /// Downloads procesándose a la vez
    #[arg(long = "max-downloads", default_value = "200", env = "MAX_DOWNLOADS")]
    pub max_downloads: usize,

    /// Tiempo de reintento sugerido en milisegundos cuando se responde 503
    #[arg(long = "retry-after-ms", default_value = "5000", env = "RETRY_AFTER_MS")]
    pub retry_after_ms: u64,

    // === Runtime ===

    /// Estrategia del multiplexor de I/O
    #[arg(long = "io-model", value_enum, default_value_t = IoModel::Readiness, env = "IO_MODEL")]
    pub io_model: IoModel,

    /// Nivel de log (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use file_server::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Nivel de log interpretado
    pub fn tracing_level(&self) -> Result<tracing::Level, String> {
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| format!("Unknown log level '{}'", self.log_level))
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Workers must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be >= 1".to_string());
        }
        if self.max_connections == 0 {
            return Err("Max connections must be >= 1".to_string());
        }

        if self.connection_timeout_ms == 0 {
            return Err("Connection timeout must be > 0".to_string());
        }
        if self.poll_timeout_ms == 0 {
            return Err("Poll timeout must be > 0".to_string());
        }

        if self.read_buffer_size == 0 {
            return Err("Read buffer size must be > 0".to_string());
        }
        if self.max_request_bytes < self.read_buffer_size {
            return Err("Max request bytes must be >= read buffer size".to_string());
        }

        if self.max_uploads == 0 {
            return Err("Max uploads must be >= 1".to_string());
        }
        if self.max_downloads == 0 {
            return Err("Max downloads must be >= 1".to_string());
        }

        self.tracing_level()?;

        Ok(())
    }

    /// Emite un resumen de la configuración por el logger
    pub fn log_summary(&self) {
        info!("File server configuration");
        info!("  address:            {}", self.address());
        info!("  upload dir:         {}", self.upload_dir);
        info!("  io model:           {}", self.io_model);
        info!(
            "  workers / queue:    {} / {}",
            self.workers, self.queue_capacity
        );
        info!(
            "  max connections:    {} (idle timeout {} ms)",
            self.max_connections, self.connection_timeout_ms
        );
        info!(
            "  read buffer / cap:  {} / {} bytes",
            self.read_buffer_size, self.max_request_bytes
        );
        info!(
            "  uploads / downloads: {} / {} (Retry-After {} ms)",
            self.max_uploads, self.max_downloads, self.retry_after_ms
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            upload_dir: "uploads".to_string(),
            workers: 8,
            queue_capacity: 50_000,
            max_connections: 10_000,
            connection_timeout_ms: 30_000,
            poll_timeout_ms: 100,
            sweep_interval_ms: 1_000,
            read_buffer_size: 64 * 1024,
            max_request_bytes: 100 * 1024 * 1024 + 64 * 1024,
            max_uploads: 100,
            max_downloads: 200,
            retry_after_ms: 5_000,
            io_model: IoModel::Readiness,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_capacity, 50_000);
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));
        assert_eq!(config.io_model, IoModel::Readiness);
    }

    #[test]
    fn test_default_matches_cli_defaults() {
        let parsed = Config::try_parse_from(["file_server"]).unwrap();
        let default = Config::default();

        assert_eq!(parsed.port, default.port);
        assert_eq!(parsed.upload_dir, default.upload_dir);
        assert_eq!(parsed.max_request_bytes, default.max_request_bytes);
        assert_eq!(parsed.io_model, default.io_model);
    }

    #[test]
    fn test_parse_io_model() {
        let parsed = Config::try_parse_from(["file_server", "--io-model", "completion"]).unwrap();
        assert_eq!(parsed.io_model, IoModel::Completion);

        assert!(Config::try_parse_from(["file_server", "--io-model", "iocp"]).is_err());
    }

    #[test]
    fn test_address_custom() {
        let mut config = Config::default();
        config.host = "0.0.0.0".to_string();
        config.port = 3000;
        assert_eq!(config.address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_validate_success() {
        assert!(Config::default().validate().is_ok());
    }

    // ==================== Validation ====================

    #[test]
    fn test_validate_invalid_workers() {
        let mut config = Config::default();
        config.workers = 0;
        assert!(config.validate().unwrap_err().contains("Workers"));
    }

    #[test]
    fn test_validate_invalid_queue_capacity() {
        let mut config = Config::default();
        config.queue_capacity = 0;
        assert!(config.validate().unwrap_err().contains("Queue capacity"));
    }

    #[test]
    fn test_validate_invalid_timeout() {
        let mut config = Config::default();
        config.connection_timeout_ms = 0;
        assert!(config.validate().unwrap_err().contains("Connection timeout"));
    }

    #[test]
    fn test_validate_request_cap_below_read_buffer() {
        let mut config = Config::default();
        config.read_buffer_size = 1024;
        config.max_request_bytes = 512;
        assert!(config.validate().unwrap_err().contains("Max request bytes"));
    }

    #[test]
    fn test_validate_transfer_limits() {
        let mut config = Config::default();
        config.max_uploads = 0;
        assert!(config.validate().unwrap_err().contains("Max uploads"));

        let mut config = Config::default();
        config.max_downloads = 0;
        assert!(config.validate().unwrap_err().contains("Max downloads"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.log_level = "DEBUG".to_string();
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::DEBUG);

        config.log_level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("log level"));
    }

    #[test]
    fn test_log_summary_does_not_panic() {
        Config::default().log_summary();
    }
}
