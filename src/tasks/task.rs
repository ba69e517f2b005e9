//! # Tareas
//! src/tasks/task.rs
//!
//! Una tarea es trabajo diferido sobre una sola conexión. La crea quien
//! observó el evento de I/O y la consume exactamente un worker.

use crate::server::connection::{Connection, ConnectionLease};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tipo de trabajo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ReadRequest,
    WriteResponse,
    UploadFile,
    DownloadFile,
    DeleteFile,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::ReadRequest => "read_request",
            TaskKind::WriteResponse => "write_response",
            TaskKind::UploadFile => "upload_file",
            TaskKind::DownloadFile => "download_file",
            TaskKind::DeleteFile => "delete_file",
        };
        write!(f, "{}", name)
    }
}

type Work = Box<dyn FnOnce(ConnectionLease) + Send + 'static>;

/// Unidad de trabajo ligada a una conexión
pub struct Task {
    kind: TaskKind,
    lease: ConnectionLease,
    work: Work,
    enqueued_at: Instant,
}

impl Task {
    /// Crea una tarea que ejecutará `work` con la reserva de la conexión
    pub fn new<F>(kind: TaskKind, lease: ConnectionLease, work: F) -> Self
    where
        F: FnOnce(ConnectionLease) + Send + 'static,
    {
        Self {
            kind,
            lease,
            work: Box::new(work),
            enqueued_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn connection(&self) -> &Arc<Connection> {
        self.lease.connection()
    }

    /// Tiempo que la tarea lleva esperando
    pub fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Ejecuta la tarea
    ///
    /// Sobre una conexión ya cerrada no hace nada.
    pub fn run(self) {
        if self.lease.is_closed() {
            return;
        }
        (self.work)(self.lease);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("connection", &self.lease.id())
            .field("waited", &self.waited())
            .finish()
    }
}
