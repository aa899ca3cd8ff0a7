//! Shared application state.

use std::sync::Arc;

use axum::extract::State;

use clamav_exporter_core::ClamdCollector;

pub(crate) struct ExporterState {
    pub(crate) collector: ClamdCollector,
    /// Path the metrics are served on, linked from the landing page.
    pub(crate) telemetry_path: String,
}

pub(crate) type SharedState = Arc<ExporterState>;

pub(crate) type AppState = State<SharedState>;
