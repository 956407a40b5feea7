//! Order lookup endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use common::OrderId;
use domain::{OrderService, StoreRetrier};
use order_store::AggregateStore;
use retry::{CancellationToken, RetryError};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub service: Arc<OrderService<S>>,
    pub retrier: StoreRetrier,
    /// Deadline for one request's whole retry loop.
    pub request_timeout: Duration,
}

impl<S> AppState<S> {
    pub fn new(
        service: Arc<OrderService<S>>,
        retrier: StoreRetrier,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            retrier,
            request_timeout,
        }
    }
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    let id: OrderId = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid order id: {raw}")))?;
    if !id.is_valid() {
        return Err(ApiError::BadRequest(format!("invalid order id: {raw}")));
    }
    Ok(id)
}

/// GET /order/{id} — returns the order aggregate as JSON.
#[tracing::instrument(skip(state))]
pub async fn get<S: AggregateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_order_id(&id)?;
    let service = &*state.service;
    let cancel = CancellationToken::new();

    let result = tokio::select! {
        result = state.retrier.run(&cancel, |_| service.get(id)) => result,
        () = tokio::time::sleep(state.request_timeout) => {
            cancel.cancel();
            tracing::warn!(order_id = %id, "request deadline exceeded");
            Err(RetryError::Cancelled)
        }
    };

    let outcome = if result.is_ok() { "found" } else { "error" };
    metrics::counter!("order_lookups_total", "outcome" => outcome).increment(1);

    let aggregate = result?;
    Ok(Json(&*aggregate).into_response())
}
