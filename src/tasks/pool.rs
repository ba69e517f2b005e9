//! # Pool de Workers
//! src/tasks/pool.rs
//!
//! N threads fijos que drenan la [`TaskQueue`]. Cada tarea corre aislada con
//! `catch_unwind`: un panic dentro de una tarea cierra solo esa conexión y
//! el worker sigue vivo.
//!
//! Cuando un worker no encuentra trabajo durante `idle_interval` (o al
//! terminar una tarea) llama a [`WorkerHooks::on_idle`], que el servidor usa
//! para barrer conexiones expiradas.

use super::queue::{Pop, TaskQueue};
use super::task::TaskKind;
use crate::error::ServerError;
use crate::server::connection::Connection;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Puntos de extensión del pool
pub trait WorkerHooks: Send + Sync + 'static {
    /// Una tarea hizo panic; la conexión debe cerrarse
    fn on_panic(&self, kind: TaskKind, connection: &Arc<Connection>, message: &str);

    /// El worker está ocioso o acaba de terminar una tarea
    fn on_idle(&self);
}

/// Pool de workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    queue: TaskQueue,
}

impl WorkerPool {
    /// Lanza `workers` threads sobre `queue`
    pub fn start(
        workers: usize,
        queue: TaskQueue,
        hooks: Arc<dyn WorkerHooks>,
        idle_interval: Duration,
    ) -> Result<Self, ServerError> {
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let name = format!("worker-{}", i);
            let queue = queue.clone();
            let hooks = Arc::clone(&hooks);

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(queue, hooks, idle_interval))
                .map_err(|source| ServerError::Spawn { name, source })?;

            handles.push(handle);
        }

        Ok(Self { handles, queue })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Cierra la cola y espera a que todos los workers terminen
    pub fn shutdown(self) {
        self.queue.shutdown();

        for handle in self.handles {
            if handle.join().is_err() {
                error!("A worker thread terminated abnormally");
            }
        }
    }
}

/// Loop principal del worker
fn worker_loop(queue: TaskQueue, hooks: Arc<dyn WorkerHooks>, idle_interval: Duration) {
    let name = thread::current().name().unwrap_or("worker").to_string();
    debug!("Worker {} started", name);

    loop {
        match queue.pop_timeout(idle_interval) {
            Pop::Task(task) => {
                let kind = task.kind();
                let connection = Arc::clone(task.connection());
                debug!(
                    "Worker {} picked up {} for connection {} (waited {:?})",
                    name,
                    kind,
                    connection.id(),
                    task.waited()
                );

                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "Worker {} caught panic in {} for connection {}: {}",
                        name,
                        kind,
                        connection.id(),
                        message
                    );
                    hooks.on_panic(kind, &connection, &message);
                }

                hooks.on_idle();
            }
            Pop::Timeout => hooks.on_idle(),
            Pop::Closed => break,
        }
    }

    debug!("Worker {} stopped", name);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::tests::connected_pair;
    use crate::tasks::task::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        panics: Mutex<Vec<(TaskKind, u64, String)>>,
        idle_calls: AtomicUsize,
    }

    impl WorkerHooks for RecordingHooks {
        fn on_panic(&self, kind: TaskKind, connection: &Arc<Connection>, message: &str) {
            connection.close();
            self.panics
                .lock()
                .unwrap()
                .push((kind, connection.id(), message.to_string()));
        }

        fn on_idle(&self) {
            self.idle_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tasks_run_on_workers() {
        let queue = TaskQueue::new(100);
        let hooks = Arc::new(RecordingHooks::default());
        let pool = WorkerPool::start(2, queue.clone(), hooks.clone(), Duration::from_millis(10)).unwrap();
        assert_eq!(pool.size(), 2);

        let done = Arc::new(AtomicUsize::new(0));
        let mut clients = Vec::new();
        for id in 0..5 {
            let (conn, client) = connected_pair(id);
            clients.push((conn.clone(), client));

            let done = Arc::clone(&done);
            queue.push(Task::new(TaskKind::ReadRequest, conn.try_lease().unwrap(), move |_| {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 5 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(done.load(Ordering::SeqCst), 5);
        pool.shutdown();
    }

    #[test]
    fn test_panic_is_contained() {
        let queue = TaskQueue::new(100);
        let hooks = Arc::new(RecordingHooks::default());
        let pool = WorkerPool::start(1, queue.clone(), hooks.clone(), Duration::from_millis(10)).unwrap();

        let (bad, _c1) = connected_pair(7);
        queue.push(Task::new(TaskKind::UploadFile, bad.try_lease().unwrap(), |_| {
            panic!("boom");
        }));

        let (good, _c2) = connected_pair(8);
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        queue.push(Task::new(TaskKind::ReadRequest, good.try_lease().unwrap(), move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..100 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(bad.is_closed());
        assert!(!bad.is_in_flight());

        let panics = hooks.panics.lock().unwrap();
        assert_eq!(panics.len(), 1);
        assert_eq!(panics[0], (TaskKind::UploadFile, 7, "boom".to_string()));
        drop(panics);

        pool.shutdown();
    }

    #[test]
    fn test_idle_hook_called() {
        let queue = TaskQueue::new(10);
        let hooks = Arc::new(RecordingHooks::default());
        let pool = WorkerPool::start(1, queue, hooks.clone(), Duration::from_millis(5)).unwrap();

        thread::sleep(Duration::from_millis(60));
        pool.shutdown();

        assert!(hooks.idle_calls.load(Ordering::SeqCst) >= 2);
    }
}
