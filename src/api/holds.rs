use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::engine::{CreateHold, Page};
use crate::model::*;

use super::{ApiError, ApiResult, AppState, transaction};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/holds", post(create_hold).get(list_holds))
        .route("/holds/{id}", get(get_hold).delete(release_hold))
        .route("/holds/{id}/release", post(release_hold))
        .route("/holds/{id}/confirm", post(confirm_hold))
        .route("/holds/{id}/extend", post(extend_hold))
        .route("/availability", get(available_dates))
        .route("/availability/check", post(check_availability))
}

#[derive(Debug, Serialize)]
struct HoldBody {
    hold: Hold,
}

#[derive(Debug, Serialize)]
struct CreatedBody {
    hold: Hold,
    holds: Vec<Hold>,
}

/// 201 when this call created the holds, 200 when the token matched an earlier request.
async fn create_hold(
    State(state): State<AppState>,
    payload: Result<Json<CreateHold>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedBody>)> {
    let Json(req) = payload?;
    let outcome = transaction(&state, move |engine| async move { engine.create_hold(req).await }).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(CreatedBody {
            hold: outcome.hold,
            holds: outcome.holds,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct ListHoldsQuery {
    #[serde(alias = "customer_email")]
    customer: Option<String>,
    status: Option<HoldStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_holds(
    State(state): State<AppState>,
    query: Result<Query<ListHoldsQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Hold>>> {
    let Query(q) = query?;
    let customer = q
        .customer
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("customer is required".into()))?;
    let page = state
        .engine
        .list_holds_for_customer(&customer, q.status, q.limit, q.offset)
        .await;
    Ok(Json(page))
}

async fn get_hold(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<HoldBody>> {
    let Path(id) = id?;
    let hold = state.engine.get_hold(id).await?;
    Ok(Json(HoldBody { hold }))
}

async fn release_hold(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<HoldBody>> {
    let Path(id) = id?;
    let hold = transaction(&state, move |engine| async move { engine.release_hold(id).await }).await?;
    Ok(Json(HoldBody { hold }))
}

#[derive(Debug, Deserialize)]
struct ConfirmBody {
    order_id: String,
    line_item_id: String,
}

async fn confirm_hold(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<ConfirmBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let allocation = transaction(&state, move |engine| async move {
        engine
            .confirm_hold(id, &body.order_id, &body.line_item_id)
            .await
    })
    .await?;
    Ok(Json(json!({ "allocation": allocation })))
}

#[derive(Debug, Default, Deserialize)]
struct ExtendBody {
    additional_minutes: Option<i64>,
}

/// The body is optional; an empty one extends by the default amount.
async fn extend_hold(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    body: Bytes,
) -> ApiResult<Json<HoldBody>> {
    let Path(id) = id?;
    let ExtendBody { additional_minutes } = if body.iter().all(u8::is_ascii_whitespace) {
        ExtendBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let hold = transaction(&state, move |engine| async move {
        engine.extend_hold(id, additional_minutes).await
    })
    .await?;
    Ok(Json(HoldBody { hold }))
}

#[derive(Debug, Deserialize)]
struct CheckBody {
    resource_id: Ulid,
    dates: Vec<Day>,
    quantity: u32,
}

async fn check_availability(
    State(state): State<AppState>,
    payload: Result<Json<CheckBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    let dates = state
        .engine
        .check_availability(body.resource_id, &body.dates, body.quantity)
        .await?;
    let available = dates.iter().all(|d| d.is_available);
    Ok(Json(json!({
        "resource_id": body.resource_id,
        "available": available,
        "dates": dates,
    })))
}

#[derive(Debug, Deserialize)]
struct AvailableDatesQuery {
    resource_id: Ulid,
    start_date: Day,
    end_date: Day,
    min_capacity: Option<u32>,
}

async fn available_dates(
    State(state): State<AppState>,
    query: Result<Query<AvailableDatesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(q) = query?;
    let dates = state
        .engine
        .available_dates(q.resource_id, q.start_date, q.end_date, q.min_capacity.unwrap_or(1))
        .await?;
    Ok(Json(json!({ "resource_id": q.resource_id, "dates": dates })))
}
