use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use ulid::Ulid;

use crate::engine::{
    HealthReport, NewBlackout, NewResource, Page, ResourceFilter, ResourcePatch,
};
use crate::model::*;

use super::{ApiError, ApiResult, AppState, transaction};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/resources", get(list_resources).post(create_resource))
        .route(
            "/admin/resources/{id}",
            get(get_resource).patch(update_resource).delete(delete_resource),
        )
        .route("/admin/resources/{id}/restore", post(restore_resource))
        .route(
            "/admin/resources/{id}/capacity",
            get(list_capacity).post(initialize_capacity),
        )
        .route("/admin/resources/{id}/holds", get(active_holds))
        .route("/admin/resources/{id}/allocations", get(resource_allocations))
        .route("/admin/blackouts", get(list_blackouts).post(add_blackout))
        .route("/admin/blackouts/{id}", delete(remove_blackout))
        .route("/admin/orders/{order_id}/allocations", get(order_allocations))
        .route("/admin/health", get(health))
}

fn resource_body(resource: Resource) -> Json<Value> {
    Json(json!({ "resource": resource }))
}

// ── Resources ────────────────────────────────────────────

async fn list_resources(
    State(state): State<AppState>,
    filter: Result<Query<ResourceFilter>, QueryRejection>,
) -> ApiResult<Json<Page<Resource>>> {
    let Query(filter) = filter?;
    Ok(Json(state.engine.list_resources(&filter)))
}

async fn create_resource(
    State(state): State<AppState>,
    payload: Result<Json<NewResource>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(new) = payload?;
    let resource =
        transaction(&state, move |engine| async move { engine.create_resource(new).await }).await?;
    Ok((StatusCode::CREATED, resource_body(resource)))
}

async fn get_resource(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    Ok(resource_body(state.engine.get_resource(id)?))
}

async fn update_resource(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<ResourcePatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let resource = transaction(&state, move |engine| async move {
        engine.update_resource(id, patch).await
    })
    .await?;
    Ok(resource_body(resource))
}

async fn delete_resource(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let resource =
        transaction(&state, move |engine| async move { engine.delete_resource(id).await }).await?;
    Ok(resource_body(resource))
}

async fn restore_resource(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let resource =
        transaction(&state, move |engine| async move { engine.restore_resource(id).await }).await?;
    Ok(resource_body(resource))
}

// ── Capacity ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DateRange {
    start_date: Day,
    end_date: Day,
}

async fn list_capacity(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    range: Result<Query<DateRange>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let Query(range) = range?;
    let records = state
        .engine
        .list_capacity(id, range.start_date, range.end_date)
        .await?;
    Ok(Json(json!({ "records": records })))
}

#[derive(Debug, Deserialize)]
struct InitCapacity {
    start_date: Day,
    end_date: Day,
    max_capacity: u32,
}

async fn initialize_capacity(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<InitCapacity>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let records = transaction(&state, move |engine| async move {
        engine
            .initialize_capacity_range(id, body.start_date, body.end_date, body.max_capacity)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "records": records }))))
}

#[derive(Debug, Deserialize)]
struct DateFilter {
    date: Option<Day>,
}

/// ACTIVE holds on one ledger row; `date` is required.
async fn active_holds(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    filter: Result<Query<DateFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let Query(filter) = filter?;
    let date = filter
        .date
        .ok_or_else(|| ApiError::BadRequest("date is required".into()))?;
    state.engine.get_resource(id)?;
    let holds = state.engine.list_active_holds(id, date).await;
    Ok(Json(json!({ "resource_id": id, "date": date, "holds": holds })))
}

async fn resource_allocations(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    filter: Result<Query<DateFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let Query(filter) = filter?;
    let allocations = state.engine.allocations_for_resource(id, filter.date);
    Ok(Json(json!({ "resource_id": id, "allocations": allocations })))
}

// ── Blackouts ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BlackoutFilter {
    resource_id: Option<Ulid>,
    from: Option<Day>,
    to: Option<Day>,
}

async fn list_blackouts(
    State(state): State<AppState>,
    filter: Result<Query<BlackoutFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(f) = filter?;
    let blackouts = state.engine.list_blackouts(f.resource_id, f.from, f.to);
    Ok(Json(json!({ "blackouts": blackouts })))
}

async fn add_blackout(
    State(state): State<AppState>,
    payload: Result<Json<NewBlackout>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(new) = payload?;
    let blackout =
        transaction(&state, move |engine| async move { engine.add_blackout(new).await }).await?;
    Ok((StatusCode::CREATED, Json(json!({ "blackout": blackout }))))
}

async fn remove_blackout(
    State(state): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id?;
    let blackout =
        transaction(&state, move |engine| async move { engine.remove_blackout(id).await }).await?;
    Ok(Json(json!({ "blackout": blackout })))
}

// ── Orders, health ───────────────────────────────────────

async fn order_allocations(
    State(state): State<AppState>,
    order_id: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(order_id) = order_id?;
    let allocations = state.engine.allocations_for_order(&order_id);
    Ok(Json(json!({ "order_id": order_id, "allocations": allocations })))
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.engine.health().await)
}
