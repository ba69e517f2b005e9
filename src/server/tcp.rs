//! # Servidor TCP Concurrente
//! src/server/tcp.rs
//!
//! Arranque y apagado del servidor. Threads:
//!
//! - `acceptor`: acepta sockets y los entrega al pipeline
//! - `event-loop`: espera eventos del multiplexor y encola tareas
//! - `worker-N`: ejecutan las tareas de la cola
//!
//! El apagado deja de aceptar, cierra la cola, espera a todos los threads y
//! cierra los sockets que queden.

use super::multiplexer;
use super::pipeline::ServerContext;
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::metrics::MetricsCollector;
use crate::router::{AppState, Router};
use crate::storage::{DiskStorage, FileStorage};
use crate::tasks::{TaskQueue, WorkerPool};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Servidor ligado a su puerto pero todavía sin threads
pub struct Server {
    config: Config,
    listener: TcpListener,
    storage: Arc<dyn FileStorage>,
}

impl Server {
    /// Valida la configuración, abre el directorio de uploads y hace bind
    pub fn bind(config: Config) -> Result<Self> {
        config.validate().map_err(ServerError::Config)?;
        let storage = DiskStorage::new(&config.upload_dir)?;
        Self::bind_with_storage(config, Arc::new(storage))
    }

    /// Igual que [`Server::bind`] pero con un storage propio
    pub fn bind_with_storage(config: Config, storage: Arc<dyn FileStorage>) -> Result<Self> {
        config.validate().map_err(ServerError::Config)?;

        let addr = config.address();
        let listener =
            TcpListener::bind(&addr).map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            config,
            listener,
            storage,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Lanza workers, event loop y acceptor
    pub fn start(self) -> Result<ServerHandle> {
        let Server {
            config,
            listener,
            storage,
        } = self;

        let local_addr = listener.local_addr()?;
        let metrics = MetricsCollector::new();
        let queue = TaskQueue::new(config.queue_capacity);
        let multiplexer = multiplexer::create(config.io_model, config.read_buffer_size)?;
        let state = AppState::new(storage, &config)
            .with_metrics(metrics.clone())
            .with_queue(queue.clone());

        let workers = config.workers;
        let idle_interval = config.poll_timeout();
        let ctx = Arc::new(ServerContext::new(
            config,
            queue.clone(),
            multiplexer,
            Router::file_server(),
            state,
        ));

        let pool = WorkerPool::start(workers, queue, ctx.clone(), idle_interval)?;

        let mut handle = ServerHandle {
            ctx: Arc::clone(&ctx),
            local_addr,
            metrics,
            acceptor: None,
            event_loop: None,
            pool: Some(pool),
        };

        handle.event_loop = Some(spawn("event-loop", {
            let ctx = Arc::clone(&ctx);
            move || event_loop(ctx)
        })?);

        handle.acceptor = Some(spawn("acceptor", {
            let ctx = Arc::clone(&ctx);
            move || accept_loop(ctx, listener)
        })?);

        info!(
            "Listening on {} ({} workers, {} I/O)",
            local_addr,
            handle.pool.as_ref().map_or(0, WorkerPool::size),
            ctx.multiplexer.model()
        );

        Ok(handle)
    }

    /// Arranca y bloquea el thread actual hasta que el servidor se detenga
    pub fn run(self) -> Result<()> {
        self.start()?.join();
        Ok(())
    }
}

/// Control de un servidor en marcha
///
/// Soltar el handle apaga el servidor.
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    metrics: MetricsCollector,
    acceptor: Option<JoinHandle<()>>,
    event_loop: Option<JoinHandle<()>>,
    pool: Option<WorkerPool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Conexiones registradas en este momento
    pub fn connection_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Detiene el servidor y espera a que todos los threads terminen
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Espera a que el acceptor termine y luego apaga el resto
    pub fn join(mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("Acceptor thread terminated abnormally");
            }
        }
        self.stop();
    }

    fn stop(&mut self) {
        if self.ctx.running.swap(false, Ordering::AcqRel) {
            info!("Shutting down server on {}", self.local_addr);
        }

        if let Some(acceptor) = self.acceptor.take() {
            // El acceptor está bloqueado en accept(): una conexión lo despierta
            let _ = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1));
            if acceptor.join().is_err() {
                error!("Acceptor thread terminated abnormally");
            }
        }

        if let Some(event_loop) = self.event_loop.take() {
            if event_loop.join().is_err() {
                error!("Event loop thread terminated abnormally");
            }
        }

        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }

        self.ctx.close_all();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| ServerError::Spawn {
            name: name.to_string(),
            source,
        })
}

/// Dirección para conectarse a uno mismo (bind a 0.0.0.0 o ::)
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

fn accept_loop(ctx: Arc<ServerContext>, listener: TcpListener) {
    debug!("Acceptor started");

    for stream in listener.incoming() {
        if !ctx.is_running() {
            break;
        }

        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                ctx.admit(stream, peer);
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    debug!("Acceptor stopped");
}

fn event_loop(ctx: Arc<ServerContext>) {
    let timeout = ctx.config.poll_timeout();
    debug!("Event loop started ({} model)", ctx.multiplexer.model());

    while ctx.is_running() {
        match ctx.multiplexer.wait(timeout) {
            Ok(events) => {
                for event in events {
                    ctx.dispatch_event(event);
                }
            }
            Err(e) => {
                error!("Multiplexer wait failed: {}", e);
                thread::sleep(timeout);
            }
        }
    }

    debug!("Event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoModel;
    use crate::storage::MemoryStorage;
    use std::io::{Read, Write};

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 2,
            ..Config::default()
        }
    }

    fn start(config: Config) -> (ServerHandle, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let server = Server::bind_with_storage(config, storage.clone()).unwrap();
        (server.start().unwrap(), storage)
    }

    fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(raw).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn test_wake_addr() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(wake_addr(any), "127.0.0.1:8080".parse().unwrap());

        let local: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(wake_addr(local), local);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            workers: 0,
            ..test_config()
        };
        let result = Server::bind_with_storage(config, Arc::new(MemoryStorage::new()));
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_observability_headers() {
        let (handle, _) = start(test_config());
        let text = roundtrip(handle.local_addr(), b"GET /files HTTP/1.0\r\n\r\n");

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("X-Connection-Id:"));
        assert!(text.contains("X-Worker-Thread: worker-"));
        assert!(text.contains("X-Worker-Pid:"));

        handle.shutdown();
    }

    #[test]
    fn test_download_runs_as_task() {
        let (handle, storage) = start(test_config());
        storage.save("notes.txt", b"hello").unwrap();

        let text = roundtrip(handle.local_addr(), b"GET /download/notes.txt HTTP/1.1\r\n\r\n");
        assert!(text.contains("200 OK"));
        assert!(text.ends_with("hello"));

        handle.shutdown();
    }

    #[test]
    fn test_parse_error_answers_400() {
        let (handle, _) = start(test_config());
        let text = roundtrip(handle.local_addr(), b"GARBAGE\r\n\r\n");
        assert!(text.contains("400 Bad Request"));

        let snapshot = handle.metrics().snapshot();
        assert_eq!(snapshot.requests.protocol_errors, 1);
        handle.shutdown();
    }

    #[test]
    fn test_peer_closed_immediately() {
        let (handle, _) = start(test_config());
        let addr = handle.local_addr();

        let client = TcpStream::connect(addr).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        let mut client = client;
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // Sin request el servidor cierra sin responder
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());

        handle.shutdown();
    }

    #[test]
    fn test_completion_model_serves_requests() {
        let config = Config {
            io_model: IoModel::Completion,
            ..test_config()
        };
        let (handle, storage) = start(config);
        storage.save("a.txt", b"x").unwrap();

        let text = roundtrip(handle.local_addr(), b"GET /files HTTP/1.1\r\n\r\n");
        assert!(text.contains("200 OK"));
        assert!(text.contains("\"a.txt\""));

        handle.shutdown();
    }

    #[test]
    fn test_shutdown_closes_open_connections() {
        let (handle, _) = start(test_config());

        let mut idle = TcpStream::connect(handle.local_addr()).unwrap();
        idle.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // Esperar a que el acceptor la registre
        for _ in 0..100 {
            if handle.connection_count() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.connection_count(), 1);

        let metrics = handle.metrics().clone();
        handle.shutdown();

        let mut buf = Vec::new();
        assert_eq!(idle.read_to_end(&mut buf).unwrap(), 0);
        assert_eq!(metrics.active_connections(), 0);
    }
}
