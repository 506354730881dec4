// handlers/protected/data/record.rs - /api/data/:table/:id

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde_json::Value;

use crate::access::Caller;
use crate::filter::{parse_query, FilterData};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::DataService;
use crate::state::AppState;

/// GET /api/data/:table/:id - honours `fields` and `relations`
pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((table, id)): Path<(String, String)>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(params) = params?;
    let parsed = parse_query(&params)?;
    let filter_data = FilterData {
        select: parsed.select,
        relations: parsed.relations,
        ..Default::default()
    };
    let record = DataService::new(&state, &caller).get(&table, &id, filter_data).await?;
    Ok(ApiResponse::success(record))
}

/// PUT/PATCH /api/data/:table/:id - partial update
pub async fn put(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((table, id)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = payload?;
    let record = DataService::new(&state, &caller).update(&table, &id, body).await?;
    Ok(ApiResponse::success(record))
}

/// DELETE /api/data/:table/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let record = DataService::new(&state, &caller).delete(&table, &id).await?;
    Ok(ApiResponse::success(record))
}
