//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Recolección y agregación de métricas del servidor:
//! - Conexiones aceptadas, rechazadas, expiradas y activas
//! - Requests por código de estado
//! - Latencias (p50, p95, p99)
//! - Bytes y archivos transferidos

pub mod collector;

pub use collector::{LatencySummary, MetricsCollector, MetricsSnapshot};
