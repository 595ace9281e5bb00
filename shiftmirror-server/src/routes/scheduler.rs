//! Scheduler introspection

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use shiftmirror_core::scheduler::JobSnapshot;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/scheduler", get(status))
}

#[derive(Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobSnapshot>,
}

/// GET /scheduler - Whether it runs and what is queued next
async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(SchedulerStatus {
        running: state.scheduler.is_running(),
        jobs: state.scheduler.jobs().await,
    })
}
