//! # Límite de Concurrencia
//! src/tasks/limiter.rs
//!
//! Semáforo no bloqueante para acotar cuántos uploads o downloads se
//! procesan a la vez. Quien no obtiene permiso responde 503 en lugar de
//! esperar: un worker bloqueado aquí dejaría de atender otras conexiones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct LimiterInner {
    name: &'static str,
    max: usize,
    active: AtomicUsize,
}

/// Semáforo con `try_acquire`
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

impl ConcurrencyLimiter {
    pub fn new(name: &'static str, max: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                name,
                max,
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Obtiene un permiso si queda alguno libre
    pub fn try_acquire(&self) -> Option<Permit> {
        self.inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.inner.max).then_some(active + 1)
            })
            .ok()
            .map(|_| Permit {
                inner: Arc::clone(&self.inner),
            })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Permisos en uso
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }
}

/// Permiso; se devuelve al soltarlo
#[derive(Debug)]
pub struct Permit {
    inner: Arc<LimiterInner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}
