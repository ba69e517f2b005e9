//! # Tareas y Workers
//! src/tasks/mod.rs
//!
//! - [`Task`]: trabajo diferido sobre una conexión
//! - [`TaskQueue`]: cola FIFO acotada
//! - [`WorkerPool`]: threads que ejecutan las tareas
//! - [`ConcurrencyLimiter`]: tope de uploads/downloads simultáneos

pub mod limiter;
pub mod pool;
pub mod queue;
pub mod task;

pub use limiter::{ConcurrencyLimiter, Permit};
pub use pool::{WorkerHooks, WorkerPool};
pub use queue::{Pop, QueueStats, TaskQueue};
pub use task::{Task, TaskKind};
