//! # Multiplexor por Completion
//! src/server/multiplexer/completion.rs
//!
//! Emula un modelo de completion (estilo IOCP / io_uring) sobre `mio`:
//! registrar o re-armar con interés de lectura equivale a "emitir" una
//! lectura. Cuando el socket está listo, el propio thread del multiplexor
//! lee un bloque y publica `Received(bytes)`. Los workers nunca leen del
//! socket en este modelo.
//!
//! Las escrituras las sigue haciendo el worker; el interés de escritura se
//! reporta como `Writable`.
//!
//! Solo se lee si hay una lectura emitida. Mientras una tarea procesa la
//! conexión no hay ninguna, así que el multiplexor jamás toca el buffer de
//! una conexión reservada.

use super::{Interest, IoEvent, IoEventKind, Multiplexer, EVENTS_CAPACITY};
use crate::config::IoModel;
use crate::server::connection::Connection;
use mio::{Events, Poll, Registry, Token};
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::trace;

/// Operación pendiente de una conexión
struct Pending {
    connection: Weak<Connection>,
    read_issued: bool,
}

pub struct CompletionMultiplexer {
    poll: Mutex<(Poll, Events)>,
    registry: Registry,
    pending: Mutex<HashMap<u64, Pending>>,
    read_chunk: usize,
}

impl CompletionMultiplexer {
    pub fn new(read_chunk: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;

        Ok(Self {
            poll: Mutex::new((poll, Events::with_capacity(EVENTS_CAPACITY))),
            registry,
            pending: Mutex::new(HashMap::new()),
            read_chunk: read_chunk.max(1),
        })
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, connection: &Arc<Connection>, interest: Interest, first: bool) -> io::Result<()> {
        self.pending().insert(
            connection.id(),
            Pending {
                connection: Arc::downgrade(connection),
                read_issued: interest == Interest::Read,
            },
        );

        let token = Token(connection.id() as usize);
        connection.with_socket(|stream| {
            if first {
                self.registry.register(stream, token, interest.into())
            } else {
                self.registry.reregister(stream, token, interest.into())
            }
        })
    }

    /// Completa la lectura emitida de una conexión
    fn complete_read(&self, id: u64) -> Option<IoEvent> {
        let connection = {
            let mut pending = self.pending();
            let entry = pending.get_mut(&id)?;
            if !entry.read_issued {
                return None;
            }
            match entry.connection.upgrade() {
                Some(connection) => connection,
                None => {
                    pending.remove(&id);
                    return None;
                }
            }
        };

        let mut chunk = vec![0u8; self.read_chunk];
        let result = loop {
            match connection.with_socket(|stream| stream.read(&mut chunk)) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let kind = match result {
            Ok(n) => {
                chunk.truncate(n);
                IoEventKind::Received(chunk)
            }
            // Aviso espurio: la lectura sigue emitida
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(_) => IoEventKind::Failed,
        };

        if let Some(entry) = self.pending().get_mut(&id) {
            entry.read_issued = false;
        }
        Some(IoEvent::new(id, kind))
    }
}

impl Multiplexer for CompletionMultiplexer {
    fn register(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()> {
        self.arm(connection, interest, true)
    }

    fn rearm(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()> {
        self.arm(connection, interest, false)
    }

    fn unregister(&self, connection: &Connection) {
        self.pending().remove(&connection.id());
        let _ = connection.with_socket(|stream| self.registry.deregister(stream));
    }

    fn wait(&self, timeout: Duration) -> io::Result<Vec<IoEvent>> {
        let mut guard = self.poll.lock().unwrap_or_else(PoisonError::into_inner);
        let (poll, events) = &mut *guard;

        match poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut completed = Vec::new();
        for event in events.iter() {
            let id = event.token().0 as u64;
            trace!("completion source event for connection {}: {:?}", id, event);

            if event.is_readable() || event.is_read_closed() {
                if let Some(done) = self.complete_read(id) {
                    completed.push(done);
                }
            } else if event.is_error() {
                completed.push(IoEvent::new(id, IoEventKind::Failed));
            } else if event.is_writable() || event.is_write_closed() {
                completed.push(IoEvent::new(id, IoEventKind::Writable));
            }
        }

        Ok(completed)
    }

    fn model(&self) -> IoModel {
        IoModel::Completion
    }
}
