// handlers/protected/data/table.rs - /api/data/:table

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde_json::Value;

use crate::access::Caller;
use crate::api::Paginated;
use crate::filter::parse_query;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::DataService;
use crate::state::AppState;

/// GET /api/data/:table - list with filters, sort, pagination and relations
pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<Paginated> {
    let Query(params) = params?;
    let filter_data = parse_query(&params)?;
    let page = DataService::new(&state, &caller).list(&table, filter_data).await?;
    Ok(ApiResponse::success(page))
}

/// POST /api/data/:table - create one (object) or many (array)
pub async fn post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let created = DataService::new(&state, &caller).create(&table, body).await?;
    Ok(ApiResponse::created(created))
}

/// PUT /api/data/:table - bulk update, each object carrying its primary key
pub async fn put(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let updated = DataService::new(&state, &caller).update_many(&table, body).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/data/:table - bulk delete by keys or objects
pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let deleted = DataService::new(&state, &caller).delete_many(&table, body).await?;
    Ok(ApiResponse::success(deleted))
}
