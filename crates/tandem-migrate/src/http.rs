//! Operator control surface
//!
//! A small axum router that drives one [`Scheduler`]: four routes switch the
//! write pattern, four start and stop the validation runs. The host process
//! nests it under an operator-only prefix.
//!
//! Every route answers HTTP 200 with a [`Reply`] body; outcomes travel in
//! `code` (0 success, 4 bad request, 5 system error). Failure detail is
//! logged, never returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use tandem_store::pool::WritePattern;

use crate::entity::Entity;
use crate::scheduler::Scheduler;

/// Uniform response body for every operator route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// 0 success, 4 bad request, 5 system error
    pub code: i32,
    pub msg: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            code: 0,
            msg: "OK".to_string(),
        }
    }

    pub fn bad_request() -> Self {
        Self {
            code: 4,
            msg: "bad request".to_string(),
        }
    }

    /// For hosts wiring fallible work into the router
    pub fn system_error() -> Self {
        Self {
            code: 5,
            msg: "system error".to_string(),
        }
    }
}

/// Body for `POST /incr/start`; both fields are milliseconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartIncrRequest {
    /// Watermark: only rows updated at or after this timestamp are compared
    pub utime: i64,
    /// Sleep between polls once the scan has caught up; must be positive
    pub interval: i64,
}

/// Build the operator router over a scheduler
pub fn scheduler_router<R: Entity>(scheduler: Arc<Scheduler<R>>) -> Router {
    Router::new()
        .route("/src_only", post(set_src_only::<R>))
        .route("/src_first", post(set_src_first::<R>))
        .route("/dst_first", post(set_dst_first::<R>))
        .route("/dst_only", post(set_dst_only::<R>))
        .route("/full/start", post(full_start::<R>))
        .route("/full/stop", post(full_stop::<R>))
        .route("/incr/start", post(incr_start::<R>))
        .route("/incr/stop", post(incr_stop::<R>))
        .with_state(scheduler)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Handlers
// ============================================================================

async fn set_src_only<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.set_pattern(WritePattern::SrcOnly).await;
    Json(Reply::ok())
}

async fn set_src_first<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.set_pattern(WritePattern::SrcFirst).await;
    Json(Reply::ok())
}

async fn set_dst_first<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.set_pattern(WritePattern::DstFirst).await;
    Json(Reply::ok())
}

async fn set_dst_only<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.set_pattern(WritePattern::DstOnly).await;
    Json(Reply::ok())
}

async fn full_start<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.start_full().await;
    Json(Reply::ok())
}

async fn full_stop<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.stop_full().await;
    Json(Reply::ok())
}

async fn incr_start<R: Entity>(
    State(scheduler): State<Arc<Scheduler<R>>>,
    body: Result<Json<StartIncrRequest>, JsonRejection>,
) -> Json<Reply> {
    let Json(req) = match body {
        Ok(json) => json,
        Err(rejection) => {
            warn!(error = %rejection, "rejected incremental start body");
            return Json(Reply::bad_request());
        }
    };
    // A zero interval would make an exhausted scan re-poll the stores in a
    // tight loop; the shortest supported cadence is 1ms.
    if req.utime < 0 || req.interval <= 0 {
        warn!(
            utime = req.utime,
            interval = req.interval,
            "rejected incremental start parameters"
        );
        return Json(Reply::bad_request());
    }
    scheduler
        .start_incremental(req.utime, Duration::from_millis(req.interval as u64))
        .await;
    Json(Reply::ok())
}

async fn incr_stop<R: Entity>(State(scheduler): State<Arc<Scheduler<R>>>) -> Json<Reply> {
    scheduler.stop_incremental().await;
    Json(Reply::ok())
}
