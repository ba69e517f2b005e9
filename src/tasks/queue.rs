//! # Cola de Tareas
//! src/tasks/queue.rs
//!
//! Cola FIFO acotada y thread-safe. Separa a quien detecta eventos de I/O de
//! los workers que ejecutan el trabajo.
//!
//! - `push` nunca bloquea: si la cola está llena la tarea se descarta
//!   (política de descarte de carga) y solo se cuenta
//! - `try_push` devuelve la tarea al caller si no cabe
//! - `pop` bloquea hasta que haya una tarea o la cola se cierre

use super::task::Task;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Capacidad por defecto
pub const DEFAULT_CAPACITY: usize = 50_000;

struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

/// Resultado de una espera con timeout
#[derive(Debug)]
pub enum Pop {
    Task(Task),
    Timeout,
    Closed,
}

/// Cola de tareas
pub struct TaskQueue {
    /// Tareas pendientes y bandera de cierre
    state: Arc<Mutex<QueueState>>,

    /// Condvar para despertar workers
    condvar: Arc<Condvar>,

    /// Capacidad máxima de la cola
    max_capacity: usize,

    /// Tareas descartadas por cola llena
    dropped: Arc<AtomicU64>,
}

impl TaskQueue {
    /// Crea una nueva cola con capacidad máxima
    pub fn new(max_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            })),
            condvar: Arc::new(Condvar::new()),
            max_capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encola una tarea; si no cabe (o la cola está cerrada) se descarta
    pub fn push(&self, task: Task) {
        if let Err(task) = self.try_push(task) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Task queue full, dropping {} for connection {}",
                task.kind(),
                task.connection().id()
            );
        }
    }

    /// Encola una tarea o la devuelve si no hay lugar
    pub fn try_push(&self, task: Task) -> Result<(), Task> {
        let mut state = self.lock();

        if state.closed || state.tasks.len() >= self.max_capacity {
            return Err(task);
        }

        state.tasks.push_back(task);

        // Notificar a un worker esperando
        self.condvar.notify_one();

        Ok(())
    }

    /// Desencola la tarea más antigua
    ///
    /// Bloquea hasta que haya una tarea. Retorna `None` cuando la cola se
    /// cerró.
    pub fn pop(&self) -> Option<Task> {
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }

            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Igual que [`pop`](Self::pop) pero esperando como máximo `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                return Pop::Closed;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Pop::Task(task);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Pop::Timeout;
            }

            state = self
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Cierra la cola y despierta a todos los workers
    ///
    /// Las tareas pendientes se descartan (y con ellas sus reservas).
    pub fn shutdown(&self) {
        let pending: Vec<Task> = {
            let mut state = self.lock();
            state.closed = true;
            state.tasks.drain(..).collect()
        };
        self.condvar.notify_all();
        drop(pending);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Retorna el tamaño actual de la cola
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Verifica si la cola está vacía
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retorna la capacidad máxima
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Verifica si la cola está llena
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_capacity
    }

    /// Tareas descartadas desde el arranque
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Obtiene estadísticas de la cola
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.max_capacity,
            dropped: self.dropped(),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Clone for TaskQueue {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            condvar: Arc::clone(&self.condvar),
            max_capacity: self.max_capacity,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// Estadísticas de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::tests::connected_pair;
    use crate::server::connection::Connection;
    use crate::tasks::task::TaskKind;
    use std::thread;

    fn task_for(conn: &Arc<Connection>, kind: TaskKind) -> Task {
        Task::new(kind, conn.try_lease().unwrap(), |_| {})
    }

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new(10);
        let (a, _ca) = connected_pair(1);
        let (b, _cb) = connected_pair(2);

        queue.push(task_for(&a, TaskKind::ReadRequest));
        queue.push(task_for(&b, TaskKind::WriteResponse));

        assert_eq!(queue.pop().unwrap().connection().id(), 1);
        assert_eq!(queue.pop().unwrap().connection().id(), 2);
    }

    #[test]
    fn test_push_drops_when_full() {
        let queue = TaskQueue::new(1);
        let (a, _ca) = connected_pair(1);
        let (b, _cb) = connected_pair(2);

        queue.push(task_for(&a, TaskKind::ReadRequest));
        queue.push(task_for(&b, TaskKind::ReadRequest));

        assert_eq!(queue.len(), 1);
        assert!(queue.is_full());
        assert_eq!(queue.dropped(), 1);
        // La reserva de la tarea descartada se liberó
        assert!(!b.is_in_flight());
    }

    #[test]
    fn test_try_push_returns_task() {
        let queue = TaskQueue::new(1);
        let (a, _ca) = connected_pair(1);
        let (b, _cb) = connected_pair(2);

        assert!(queue.try_push(task_for(&a, TaskKind::ReadRequest)).is_ok());
        let rejected = queue.try_push(task_for(&b, TaskKind::UploadFile)).unwrap_err();

        assert_eq!(rejected.kind(), TaskKind::UploadFile);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_pop_timeout() {
        let queue = TaskQueue::new(1);
        assert!(matches!(queue.pop_timeout(Duration::from_millis(10)), Pop::Timeout));
    }

    #[test]
    fn test_shutdown_releases_blocked_pop() {
        let queue = TaskQueue::new(10);
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop().is_none())
        };

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        assert!(waiter.join().unwrap());
        assert!(queue.is_closed());
        assert!(matches!(queue.pop_timeout(Duration::from_millis(10)), Pop::Closed));
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let queue = TaskQueue::new(10);
        let (a, _ca) = connected_pair(1);
        queue.push(task_for(&a, TaskKind::ReadRequest));

        queue.shutdown();
        assert!(queue.is_empty());
        assert!(!a.is_in_flight());
    }

    #[test]
    fn test_clone_shares_state() {
        let queue = TaskQueue::new(10);
        let other = queue.clone();
        let (a, _ca) = connected_pair(1);

        other.push(task_for(&a, TaskKind::ReadRequest));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().depth, 1);
    }
}
