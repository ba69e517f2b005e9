//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Recolecta métricas del servidor en tiempo real. Los contadores son
//! atómicos y se actualizan sin tomar ningún lock; solo las latencias y el
//! histograma de códigos de estado viven detrás de un Mutex.
//!
//! Es un valor del proceso que se pasa a quien lo necesita (clonar comparte
//! los mismos contadores); no hay estado global.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Máximo de latencias a guardar (para calcular percentiles)
const MAX_LATENCIES: usize = 10_000;

/// Contadores atómicos
#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    connections_expired: AtomicU64,
    connections_closed: AtomicU64,
    total_requests: AtomicU64,
    protocol_errors: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    files_uploaded: AtomicU64,
    files_downloaded: AtomicU64,
    files_deleted: AtomicU64,
    transfers_rejected: AtomicU64,
    task_panics: AtomicU64,
}

/// Datos que requieren lock
#[derive(Default)]
struct LatencyData {
    /// Requests por código de estado
    status_codes: BTreeMap<u16, u64>,

    /// Últimas latencias registradas (en microsegundos)
    latencies: VecDeque<u64>,
}

/// Collector de métricas thread-safe
#[derive(Clone)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
    latency: Arc<Mutex<LatencyData>>,
    start_time: Instant,
}

impl MetricsCollector {
    /// Crea un nuevo collector de métricas
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            latency: Arc::new(Mutex::new(LatencyData {
                status_codes: BTreeMap::new(),
                latencies: VecDeque::with_capacity(MAX_LATENCIES),
            })),
            start_time: Instant::now(),
        }
    }

    fn latency(&self) -> MutexGuard<'_, LatencyData> {
        self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conexiones ====================

    pub fn connection_accepted(&self) {
        self.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.counters.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_expired(&self) {
        self.counters.connections_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.counters.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Conexiones aceptadas que todavía no se cerraron
    pub fn active_connections(&self) -> u64 {
        let accepted = self.counters.connections_accepted.load(Ordering::Relaxed);
        let closed = self.counters.connections_closed.load(Ordering::Relaxed);
        accepted.saturating_sub(closed)
    }

    // ==================== Requests ====================

    /// Registra un request respondido
    pub fn record_request(&self, status_code: u16, latency: Duration) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut data = self.latency();
        *data.status_codes.entry(status_code).or_insert(0) += 1;

        // Si tenemos demasiadas latencias, eliminar las más antiguas
        if data.latencies.len() >= MAX_LATENCIES {
            data.latencies.pop_front();
        }
        data.latencies.push_back(latency.as_micros() as u64);
    }

    pub fn protocol_error(&self) {
        self.counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, n: usize) {
        self.counters.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, n: usize) {
        self.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    // ==================== Archivos ====================

    pub fn file_uploaded(&self) {
        self.counters.files_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_downloaded(&self) {
        self.counters.files_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_deleted(&self) {
        self.counters.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Upload o download rechazado por el límite de concurrencia
    pub fn transfer_rejected(&self) {
        self.counters.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_panicked(&self) {
        self.counters.task_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.counters.total_requests.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Obtiene un snapshot de las métricas
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let (status_codes, latency) = {
            let data = self.latency();
            let status_codes = data
                .status_codes
                .iter()
                .map(|(code, count)| (code.to_string(), *count))
                .collect();
            (status_codes, LatencySummary::from_samples(&data.latencies))
        };

        MetricsSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            connections: ConnectionStats {
                active: self.active_connections(),
                accepted: load(&c.connections_accepted),
                rejected: load(&c.connections_rejected),
                expired: load(&c.connections_expired),
            },
            requests: RequestStats {
                total: load(&c.total_requests),
                protocol_errors: load(&c.protocol_errors),
                status_codes,
            },
            transfers: TransferStats {
                uploads: load(&c.files_uploaded),
                downloads: load(&c.files_downloaded),
                deletions: load(&c.files_deleted),
                rejected: load(&c.transfers_rejected),
                bytes_received: load(&c.bytes_received),
                bytes_sent: load(&c.bytes_sent),
            },
            task_panics: load(&c.task_panics),
            latency_us: latency,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot de métricas (se serializa tal cual en /stats)
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub requests: RequestStats,
    pub transfers: TransferStats,
    pub task_panics: u64,
    pub latency_us: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub active: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub protocol_errors: u64,
    pub status_codes: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub uploads: u64,
    pub downloads: u64,
    pub deletions: u64,
    pub rejected: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub avg: u64,
    pub samples: usize,
}

impl LatencySummary {
    /// Calcula percentiles de latencia
    fn from_samples(latencies: &VecDeque<u64>) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<u64> = latencies.iter().copied().collect();
        sorted.sort_unstable();

        let len = sorted.len();
        let sum: u64 = sorted.iter().sum();

        Self {
            p50: sorted[len * 50 / 100],
            p95: sorted[len * 95 / 100],
            p99: sorted[len * 99 / 100],
            avg: sum / len as u64,
            samples: len,
        }
    }
}
