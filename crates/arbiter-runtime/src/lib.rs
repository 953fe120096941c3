//! `arbiter-runtime` – wires the node core, telemetry, monitor, analyzer and
//! optimizer into one tick-driven loop.
//!
//! # Modules
//!
//! - [`engine`] – [`ArbiterEngine`]: owns the trees, the parameter arena and
//!   every instrumentation component; [`ArbiterEngine::tick`] advances the
//!   whole loop by one step and publishes output events on the
//!   [`EventBus`][arbiter_middleware::EventBus].
//! - [`config`] – [`EngineConfig`]: one serde document bundling every
//!   component's settings.
//! - [`logging`] – [`init_tracing`]: global `tracing` subscriber with an
//!   optional OTLP span exporter (`OTEL_EXPORTER_OTLP_ENDPOINT`).

pub mod config;
pub mod engine;
pub mod logging;

pub use config::EngineConfig;
pub use engine::{ArbiterEngine, EngineTickReport, TreeOutcome};
pub use logging::{LogFormat, TracerProviderGuard, init_tracing};
