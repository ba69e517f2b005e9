//! # Pipeline de Conexiones
//! src/server/pipeline.rs
//!
//! Estado compartido por los threads del servidor y el cuerpo de cada tarea.
//!
//! ```text
//! evento Readable / Received
//!        │
//!        ▼
//!   ReadRequest ──(incompleto)──► rearm(Read)
//!        │
//!   (completo) ──► /files, /stats ─────────────┐
//!        │                                     ▼
//!        └──► UploadFile / DownloadFile / ──► respond ──► WriteResponse ──► close
//!             DeleteFile                               │
//!                                         (WouldBlock) └─► rearm(Write)
//! ```
//!
//! Toda tarea recibe la reserva de su conexión y la suelta antes de volver a
//! armar el multiplexor; el siguiente evento de esa conexión solo puede
//! llegar después.

use super::connection::{
    Connection, ConnectionLease, ConnectionState, ReadOutcome, WriteProgress,
};
use super::multiplexer::{Interest, IoEvent, IoEventKind, Multiplexer};
use super::registry::ConnectionRegistry;
use crate::config::Config;
use crate::http::request::{find_header_end, frame, Frame};
use crate::http::{Request, Response, StatusCode};
use crate::metrics::MetricsCollector;
use crate::router::{AppState, Handler, Resolution, Router};
use crate::tasks::{Task, TaskKind, TaskQueue, WorkerHooks};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Todo lo que comparten acceptor, event loop y workers
pub(crate) struct ServerContext {
    pub(crate) config: Config,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) queue: TaskQueue,
    pub(crate) multiplexer: Arc<dyn Multiplexer>,
    pub(crate) router: Router,
    pub(crate) state: AppState,
    pub(crate) running: AtomicBool,
    started: Instant,
    /// Milisegundos desde `started` del último barrido
    last_sweep_ms: AtomicU64,
}

impl ServerContext {
    pub(crate) fn new(
        config: Config,
        queue: TaskQueue,
        multiplexer: Arc<dyn Multiplexer>,
        router: Router,
        state: AppState,
    ) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            queue,
            multiplexer,
            router,
            state,
            running: AtomicBool::new(true),
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn metrics(&self) -> &MetricsCollector {
        &self.state.metrics
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ==================== Acceptor ====================

    /// Incorpora un socket recién aceptado
    ///
    /// Si ya hay `max_connections` vivas el socket se cierra sin registrarlo.
    pub(crate) fn admit(self: &Arc<Self>, stream: TcpStream, peer: String) {
        let limit = self.config.max_connections;

        if self.registry.len() >= limit {
            self.metrics().connection_rejected();
            warn!("Connection limit ({}) reached, rejecting {}", limit, peer);
            return;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Failed to make socket from {} non-blocking: {}", peer, e);
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let id = self.registry.next_id();
        let conn = Arc::new(Connection::new(
            id,
            peer,
            mio::net::TcpStream::from_std(stream),
        ));

        if !self.registry.try_insert(Arc::clone(&conn), limit) {
            self.metrics().connection_rejected();
            warn!("Connection limit ({}) reached, rejecting {}", limit, conn.peer_addr());
            conn.close();
            return;
        }

        self.metrics().connection_accepted();
        conn.transition(ConnectionState::Reading);
        debug!("Accepted connection {} from {}", id, conn.peer_addr());

        if let Err(e) = self.multiplexer.register(&conn, Interest::Read) {
            warn!("Failed to register connection {}: {}", id, e);
            self.close_connection(&conn);
        }
    }

    // ==================== Event loop ====================

    /// Traduce un evento del multiplexor en (como mucho) una tarea
    pub(crate) fn dispatch_event(self: &Arc<Self>, event: IoEvent) {
        let conn = match self.registry.get(event.connection_id) {
            Some(conn) if !conn.is_closed() => conn,
            _ => return,
        };

        match event.kind {
            IoEventKind::Failed => {
                debug!("Socket error on connection {}", conn.id());
                self.close_connection(&conn);
            }
            IoEventKind::Readable => {
                if let Some(lease) = conn.try_lease() {
                    if lease.state() == ConnectionState::Writing {
                        self.queue_write(lease);
                    } else {
                        self.queue_read(lease, None);
                    }
                }
            }
            IoEventKind::Writable => {
                if let Some(lease) = conn.try_lease() {
                    self.queue_write(lease);
                }
            }
            IoEventKind::Received(bytes) => match conn.try_lease() {
                Some(lease) => self.queue_read(lease, Some(bytes)),
                None => {
                    // La lectura se emitió con la conexión libre; no se pierden los bytes
                    debug!("Completion for busy connection {}", conn.id());
                    if !conn.append_read(&bytes, self.config.max_request_bytes) {
                        self.close_connection(&conn);
                    }
                }
            },
        }
    }

    fn queue_read(self: &Arc<Self>, lease: ConnectionLease, received: Option<Vec<u8>>) {
        let ctx = Arc::clone(self);
        self.queue.push(Task::new(TaskKind::ReadRequest, lease, move |lease| {
            ctx.read_request(lease, received)
        }));
    }

    fn queue_write(self: &Arc<Self>, lease: ConnectionLease) {
        let ctx = Arc::clone(self);
        self.queue.push(Task::new(TaskKind::WriteResponse, lease, move |lease| {
            ctx.write_response(lease)
        }));
    }

    // ==================== Lectura ====================

    /// Cuerpo de `ReadRequest`
    ///
    /// `received` trae los bytes de una lectura completada (modelo
    /// completion); sin ellos se lee del socket hasta que bloquee.
    pub(crate) fn read_request(self: &Arc<Self>, lease: ConnectionLease, received: Option<Vec<u8>>) {
        if !lease.transition(ConnectionState::Reading) {
            return;
        }

        let limit = self.config.max_request_bytes;
        let outcome = match received {
            Some(bytes) if bytes.is_empty() => ReadOutcome::Eof(0),
            Some(bytes) => {
                if lease.append_read(&bytes, limit) {
                    ReadOutcome::Data(bytes.len())
                } else {
                    ReadOutcome::LimitExceeded
                }
            }
            None => lease.read_available(self.config.read_buffer_size, limit),
        };

        match outcome {
            ReadOutcome::Data(n) => {
                self.metrics().add_bytes_received(n);
                self.frame_request(lease, false);
            }
            ReadOutcome::Eof(n) => {
                self.metrics().add_bytes_received(n);
                self.frame_request(lease, true);
            }
            ReadOutcome::LimitExceeded => {
                warn!(
                    "Connection {} exceeded the request limit of {} bytes",
                    lease.id(),
                    limit
                );
                self.close_leased(lease);
            }
            ReadOutcome::Failed(e) => {
                debug!("Read error on connection {}: {}", lease.id(), e);
                self.close_leased(lease);
            }
        }
    }

    /// Decide si el buffer ya tiene un request completo
    fn frame_request(self: &Arc<Self>, lease: ConnectionLease, eof: bool) {
        let limit = self.config.max_request_bytes;
        let framing = lease.inspect_read_buffer(|buffer| {
            frame(buffer).map(|framed| (framed, find_header_end(buffer).is_some(), buffer.len()))
        });

        match framing {
            Err(e) => {
                self.metrics().protocol_error();
                debug!("Protocol error on connection {}: {}", lease.id(), e);
                let response = Response::error(StatusCode::BadRequest, &e.to_string());
                self.respond(lease, response, Instant::now());
            }
            Ok((Frame::Complete(n), _, _)) => {
                let raw = lease.take_read(n);
                self.process_request(lease, raw);
            }
            Ok((Frame::Incomplete { expected: Some(total) }, _, _)) if total > limit => {
                warn!(
                    "Connection {} declared a {} byte request (limit {})",
                    lease.id(),
                    total,
                    limit
                );
                self.close_leased(lease);
            }
            Ok((Frame::Incomplete { .. }, has_head, len)) if eof => {
                if has_head {
                    // El peer cerró antes de mandar todo el body: se usa lo recibido
                    let raw = lease.take_read(len);
                    self.process_request(lease, raw);
                } else {
                    debug!("Connection {} closed before a complete request", lease.id());
                    self.close_leased(lease);
                }
            }
            Ok((Frame::Incomplete { .. }, _, _)) => self.rearm(lease, Interest::Read),
        }
    }

    // ==================== Dispatch ====================

    /// Parsea y despacha un request completo
    fn process_request(self: &Arc<Self>, lease: ConnectionLease, raw: Vec<u8>) {
        let started = Instant::now();
        let request = Request::parse(&raw);

        if let Err(e) = request.validate_request_line() {
            self.metrics().protocol_error();
            let response = Response::error(StatusCode::BadRequest, &e.to_string());
            return self.respond(lease, response, started);
        }

        debug!(
            "{} {} on connection {} ({} body bytes)",
            request.method(),
            request.path(),
            lease.id(),
            request.body().len()
        );

        let matched: Result<(Handler, String, Option<TaskKind>), Response> =
            match self.router.resolve(request.method(), request.route_path()) {
                Resolution::Matched { route, param } => {
                    Ok((route.handler(), param.to_string(), route.task_kind()))
                }
                other => Err(other
                    .unmatched_response()
                    .unwrap_or_else(|| Response::error(StatusCode::NotFound, "Not Found"))),
            };

        match matched {
            Err(response) => self.respond(lease, response, started),
            Ok((handler, param, None)) => {
                let response = handler(&self.state, &request, &param);
                self.respond(lease, response, started);
            }
            Ok((handler, param, Some(kind))) => {
                let ctx = Arc::clone(self);
                let task = Task::new(kind, lease, move |lease| {
                    let response = handler(&ctx.state, &request, &param);
                    ctx.respond(lease, response, started);
                });

                // La operación tiene que ejecutarse: si la cola está llena corre aquí
                if let Err(task) = self.queue.try_push(task) {
                    debug!("Task queue full, running {} inline", kind);
                    task.run();
                }
            }
        }
    }

    // ==================== Escritura ====================

    /// Encola la respuesta en la conexión y empieza a enviarla
    pub(crate) fn respond(self: &Arc<Self>, lease: ConnectionLease, mut response: Response, started: Instant) {
        response.add_header("X-Connection-Id", &lease.id().to_string());
        if let Some(name) = thread::current().name() {
            response.add_header("X-Worker-Thread", name);
        }
        response.add_header("X-Worker-Pid", &std::process::id().to_string());

        let status = response.status();
        self.metrics().record_request(status.as_u16(), started.elapsed());
        debug!("Connection {} → {}", lease.id(), status);

        lease.queue_response(response.to_bytes());
        if !lease.transition(ConnectionState::Writing) {
            self.close_leased(lease);
            return;
        }

        self.write_response(lease);
    }

    /// Cuerpo de `WriteResponse`
    pub(crate) fn write_response(self: &Arc<Self>, lease: ConnectionLease) {
        match lease.flush_write() {
            Ok(WriteProgress::Complete(n)) => {
                self.metrics().add_bytes_sent(n);
                self.close_leased(lease);
            }
            Ok(WriteProgress::Pending(n)) => {
                self.metrics().add_bytes_sent(n);
                lease.transition(ConnectionState::Writing);
                self.rearm(lease, Interest::Write);
            }
            Err(e) => {
                debug!("Write error on connection {}: {}", lease.id(), e);
                self.close_leased(lease);
            }
        }
    }

    // ==================== Ciclo de vida ====================

    /// Suelta la reserva y vuelve a armar el interés
    fn rearm(&self, lease: ConnectionLease, interest: Interest) {
        let conn = lease.release();
        if let Err(e) = self.multiplexer.rearm(&conn, interest) {
            debug!("Failed to rearm connection {}: {}", conn.id(), e);
            self.close_connection(&conn);
        }
    }

    fn close_leased(&self, lease: ConnectionLease) {
        let conn = lease.release();
        self.close_connection(&conn);
    }

    /// Cierra una conexión y la saca del registro
    ///
    /// Retorna `true` solo para quien cerró efectivamente el socket.
    pub(crate) fn close_connection(&self, conn: &Arc<Connection>) -> bool {
        self.multiplexer.unregister(conn);
        let closed = conn.close();
        self.registry.remove(conn.id());

        if closed {
            self.metrics().connection_closed();
        }
        closed
    }

    /// Cierra las conexiones inactivas
    ///
    /// Corre como mucho una vez por `sweep_interval`, sin importar cuántos
    /// workers lo llamen.
    pub(crate) fn sweep_expired(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Acquire);

        if now.saturating_sub(last) < self.config.sweep_interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let timeout = self.config.connection_timeout();
        for conn in self.registry.remove_expired(timeout) {
            warn!(
                "Connection {} ({}) idle for {:?} in state {}, closing",
                conn.id(),
                conn.peer_addr(),
                conn.idle_for(),
                conn.state()
            );
            self.metrics().connection_expired();
            self.close_connection(&conn);
        }
    }

    /// Cierra todas las conexiones que queden (apagado)
    pub(crate) fn close_all(&self) {
        let remaining = self.registry.drain();
        if !remaining.is_empty() {
            info!("Closing {} remaining connection(s)", remaining.len());
        }

        for conn in remaining {
            self.close_connection(&conn);
        }
    }
}

impl WorkerHooks for ServerContext {
    fn on_panic(&self, kind: TaskKind, connection: &Arc<Connection>, _message: &str) {
        self.metrics().task_panicked();
        warn!("Closing connection {} after a panic in {}", connection.id(), kind);
        self.close_connection(connection);
    }

    fn on_idle(&self) {
        self.sweep_expired();
    }
}
