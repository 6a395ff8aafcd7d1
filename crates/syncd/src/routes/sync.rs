//! Manual cycle trigger.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderRepository;
use sync::CycleReport;

use crate::error::ApiError;
use crate::runner::CycleRunner;

/// Shared application state accessible from all handlers.
pub struct AppState<R>
where
    R: OrderRepository,
{
    pub runner: Arc<CycleRunner<R>>,
}

/// POST /sync: runs one cycle and returns its report.
#[tracing::instrument(skip(state))]
pub async fn run<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<Json<CycleReport>, ApiError> {
    let report = state.runner.run().await?;
    Ok(Json(report))
}
