//! # Multiplexor por Readiness
//! src/server/multiplexer/readiness.rs
//!
//! epoll/kqueue vía `mio`. Las notificaciones son por flanco: el worker que
//! recibe un `Readable` debe leer hasta `WouldBlock`. Al re-armar con
//! `reregister` el sistema vuelve a evaluar el socket, así que los datos que
//! llegaron mientras la tarea corría generan un evento nuevo.

use super::{Interest, IoEvent, IoEventKind, Multiplexer, EVENTS_CAPACITY};
use crate::config::IoModel;
use crate::server::connection::Connection;
use mio::{Events, Poll, Registry, Token};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

pub struct ReadinessMultiplexer {
    /// Solo el thread del event loop espera sobre el poll
    poll: Mutex<(Poll, Events)>,

    /// Clon del registry para registrar desde cualquier thread
    registry: Registry,
}

impl ReadinessMultiplexer {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;

        Ok(Self {
            poll: Mutex::new((poll, Events::with_capacity(EVENTS_CAPACITY))),
            registry,
        })
    }
}

impl Multiplexer for ReadinessMultiplexer {
    fn register(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()> {
        let token = Token(connection.id() as usize);
        connection.with_socket(|stream| self.registry.register(stream, token, interest.into()))
    }

    fn rearm(&self, connection: &Arc<Connection>, interest: Interest) -> io::Result<()> {
        let token = Token(connection.id() as usize);
        connection.with_socket(|stream| self.registry.reregister(stream, token, interest.into()))
    }

    fn unregister(&self, connection: &Connection) {
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

        let mut ready = Vec::with_capacity(events.iter().count());
        for event in events.iter() {
            let id = event.token().0 as u64;
            trace!("readiness event for connection {}: {:?}", id, event);

            let kind = if event.is_error() {
                IoEventKind::Failed
            } else if event.is_readable() || event.is_read_closed() {
                IoEventKind::Readable
            } else if event.is_writable() || event.is_write_closed() {
                IoEventKind::Writable
            } else {
                continue;
            };
            ready.push(IoEvent::new(id, kind));
        }

        Ok(ready)
    }

    fn model(&self) -> IoModel {
        IoModel::Readiness
    }
}
