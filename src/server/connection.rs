//! # Conexión
//! src/server/connection.rs
//!
//! Estado de una sesión con un cliente: socket, buffers y máquina de estados.
//!
//! ```text
//! Connecting → Reading → Writing → Closing → Closed
//!                 ↺          ↺
//! ```
//!
//! Una conexión se comparte (`Arc`) entre el registro, el multiplexor y la
//! tarea que la esté procesando. Solo una tarea a la vez puede trabajar sobre
//! ella: quien la procesa debe tener su [`ConnectionLease`], que se obtiene
//! con [`Connection::try_lease`] y se libera al soltarlo.
//!
//! `Closed` es terminal. El socket se toma de la conexión al cerrarla, por lo
//! que [`Connection::close`] cierra el descriptor exactamente una vez.

use mio::net::TcpStream;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Estados de una conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Reading = 1,
    Writing = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Reading,
            2 => ConnectionState::Writing,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Transiciones permitidas
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Connecting, Reading)
                | (Reading, Reading)
                | (Reading, Writing)
                | (Writing, Writing)
                | (Connecting, Closing)
                | (Reading, Closing)
                | (Writing, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Reading => "reading",
            ConnectionState::Writing => "writing",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Resultado de leer lo disponible en el socket
#[derive(Debug)]
pub enum ReadOutcome {
    /// Se leyó hasta `WouldBlock`; contiene los bytes leídos en esta llamada
    Data(usize),

    /// El peer cerró su lado; contiene los bytes leídos antes del EOF
    Eof(usize),

    /// El buffer superó el máximo permitido
    LimitExceeded,

    /// Error de socket (reset, abort...)
    Failed(io::Error),
}

/// Progreso de una escritura
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Todo el buffer de salida fue enviado
    Complete(usize),

    /// El socket no acepta más bytes por ahora
    Pending(usize),
}

#[derive(Default)]
struct Buffers {
    read: Vec<u8>,
    write: Vec<u8>,
    /// Bytes de `write` ya enviados
    written: usize,
}

/// Una sesión con un cliente
pub struct Connection {
    id: u64,
    peer_addr: String,
    state: AtomicU8,
    created_at: Instant,
    /// Milisegundos desde `created_at` hasta la última actividad
    last_activity_ms: AtomicU64,
    in_flight: AtomicBool,
    buffers: Mutex<Buffers>,
    socket: Mutex<Option<TcpStream>>,
}

impl Connection {
    pub fn new(id: u64, peer_addr: String, socket: TcpStream) -> Self {
        Self {
            id,
            peer_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            buffers: Mutex::new(Buffers::default()),
            socket: Mutex::new(Some(socket)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Intenta pasar al estado `next`
    ///
    /// Retorna `false` si la transición no es válida desde el estado actual.
    /// Toda transición exitosa actualiza la última actividad.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            if !ConnectionState::from_u8(current).can_transition_to(next) {
                return false;
            }

            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.touch();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Marca actividad en la conexión
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Tiempo desde la última actividad
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    /// Reserva la conexión para una tarea
    ///
    /// Retorna `None` si otra tarea ya la tiene.
    pub fn try_lease(self: &Arc<Self>) -> Option<ConnectionLease> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConnectionLease {
                connection: Arc::clone(self),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ejecuta `f` sobre el socket; falla con `NotConnected` si ya se cerró
    pub fn with_socket<R>(&self, f: impl FnOnce(&mut TcpStream) -> io::Result<R>) -> io::Result<R> {
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        match socket.as_mut() {
            Some(stream) => f(stream),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    /// Lee del socket hasta que bloquee, acumulando en el buffer de lectura
    ///
    /// `chunk` es el tamaño de cada lectura y `limit` el máximo que puede
    /// acumular el buffer.
    pub fn read_available(&self, chunk: usize, limit: usize) -> ReadOutcome {
        let mut scratch = vec![0u8; chunk.max(1)];
        let mut total = 0;

        loop {
            match self.with_socket(|stream| stream.read(&mut scratch)) {
                Ok(0) => return ReadOutcome::Eof(total),
                Ok(n) => {
                    total += n;
                    self.touch();
                    if !self.append_read(&scratch[..n], limit) {
                        return ReadOutcome::LimitExceeded;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Data(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Agrega bytes ya leídos al buffer de lectura
    ///
    /// Retorna `false` si el buffer supera `limit`.
    pub fn append_read(&self, bytes: &[u8], limit: usize) -> bool {
        let mut buffers = self.buffers();
        buffers.read.extend_from_slice(bytes);
        self.touch();
        buffers.read.len() <= limit
    }

    /// Copia del buffer de lectura
    pub fn read_buffer(&self) -> Vec<u8> {
        self.buffers().read.clone()
    }

    pub fn read_buffer_len(&self) -> usize {
        self.buffers().read.len()
    }

    /// Aplica `f` al buffer de lectura sin copiarlo
    pub fn inspect_read_buffer<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.buffers().read)
    }

    /// Saca los primeros `n` bytes del buffer de lectura
    pub fn take_read(&self, n: usize) -> Vec<u8> {
        let mut buffers = self.buffers();
        let n = n.min(buffers.read.len());
        buffers.read.drain(..n).collect()
    }

    /// Reemplaza el buffer de salida
    pub fn queue_response(&self, bytes: Vec<u8>) {
        let mut buffers = self.buffers();
        buffers.write = bytes;
        buffers.written = 0;
    }

    /// Bytes pendientes de envío
    pub fn pending_write(&self) -> usize {
        let buffers = self.buffers();
        buffers.write.len() - buffers.written
    }

    /// Envía lo que se pueda del buffer de salida
    pub fn flush_write(&self) -> io::Result<WriteProgress> {
        let mut buffers = self.buffers();
        let mut sent = 0;

        while buffers.written < buffers.write.len() {
            let start = buffers.written;
            let result = self.with_socket(|stream| stream.write(&buffers.write[start..]));

            match result {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    buffers.written += n;
                    sent += n;
                    self.touch();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteProgress::Pending(sent));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(WriteProgress::Complete(sent))
    }

    /// Cierra la conexión y libera el socket
    ///
    /// Retorna `true` solo para la llamada que realmente cerró el socket.
    pub fn close(&self) -> bool {
        self.transition(ConnectionState::Closing);

        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.state.store(ConnectionState::Closed as u8, Ordering::Release);

        match socket {
            Some(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                drop(stream);

                let mut buffers = self.buffers();
                buffers.read = Vec::new();
                buffers.write = Vec::new();
                buffers.written = 0;

                debug!("Connection {} ({}) closed", self.id, self.peer_addr);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

/// Derecho exclusivo a procesar una conexión
///
/// Mientras exista, ninguna otra tarea puede obtener la misma conexión. Se
/// libera al soltarse, incluso si la tarea que lo tenía se descarta sin
/// ejecutar.
pub struct ConnectionLease {
    connection: Arc<Connection>,
}

impl ConnectionLease {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Libera la reserva y devuelve la conexión
    pub fn release(self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }
}

impl Deref for ConnectionLease {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.connection.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    /// Par de sockets conectados: (conexión del servidor, cliente)
    pub(crate) fn connected_pair(id: u64) -> (Arc<Connection>, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();

        let connection = Connection::new(id, peer.to_string(), TcpStream::from_std(server_side));
        (Arc::new(connection), client)
    }

    #[test]
    fn test_transitions() {
        use ConnectionState::*;

        assert!(Connecting.can_transition_to(Reading));
        assert!(Reading.can_transition_to(Reading));
        assert!(Reading.can_transition_to(Writing));
        assert!(Writing.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Writing.can_transition_to(Reading));
        assert!(!Connecting.can_transition_to(Writing));
        assert!(!Closed.can_transition_to(Reading));
        assert!(!Closed.can_transition_to(Closing));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let (conn, _client) = connected_pair(1);
        assert!(!conn.transition(ConnectionState::Writing));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.transition(ConnectionState::Reading));
        assert!(conn.transition(ConnectionState::Writing));
        assert_eq!(conn.state(), ConnectionState::Writing);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let (conn, _client) = connected_pair(2);

        let lease = conn.try_lease().unwrap();
        assert!(conn.try_lease().is_none());
        assert!(conn.is_in_flight());

        drop(lease);
        assert!(!conn.is_in_flight());
        assert!(conn.try_lease().is_some());
    }

    #[test]
    fn test_close_exactly_once() {
        let (conn, _client) = connected_pair(3);

        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert!(!conn.transition(ConnectionState::Reading));
    }

    #[test]
    fn test_read_available_and_limit() {
        use std::io::Write as _;

        let (conn, mut client) = connected_pair(4);
        client.write_all(b"GET /files HTTP/1.1\r\n\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        match conn.read_available(8, 1024) {
            ReadOutcome::Data(n) => assert_eq!(n, 23),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(conn.read_buffer(), b"GET /files HTTP/1.1\r\n\r\n");

        client.write_all(b"0123456789").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(conn.read_available(8, 25), ReadOutcome::LimitExceeded));
    }

    #[test]
    fn test_eof_after_peer_close() {
        let (conn, client) = connected_pair(5);
        drop(client);
        std::thread::sleep(Duration::from_millis(50));

        assert!(matches!(conn.read_available(64, 1024), ReadOutcome::Eof(0)));
    }

    #[test]
    fn test_take_read_keeps_remainder() {
        let (conn, _client) = connected_pair(6);
        assert!(conn.append_read(b"abcdef", 1024));

        assert_eq!(conn.take_read(4), b"abcd");
        assert_eq!(conn.read_buffer(), b"ef");
    }

    #[test]
    fn test_flush_write_complete() {
        use std::io::Read as _;

        let (conn, mut client) = connected_pair(7);
        conn.queue_response(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());

        assert_eq!(conn.flush_write().unwrap(), WriteProgress::Complete(19));
        assert_eq!(conn.pending_write(), 0);

        let mut received = [0u8; 19];
        client.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"HTTP/1.1 200 OK\r\n\r\n");
    }

    #[test]
    fn test_idle_time_grows() {
        let (conn, _client) = connected_pair(8);
        std::thread::sleep(Duration::from_millis(30));

        assert!(conn.is_expired(Duration::from_millis(10)));
        conn.touch();
        assert!(!conn.is_expired(Duration::from_secs(5)));
    }
}
