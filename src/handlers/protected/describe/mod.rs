// handlers/protected/describe/mod.rs - Introspected schema, filtered for the caller

use axum::{
    extract::{Path, State},
    Extension,
};

use crate::access::Caller;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{DescribeService, TableDescription, TableSummary};
use crate::state::AppState;

/// GET /api/describe - tables the caller may read
pub async fn list_get(State(state): State<AppState>, Extension(caller): Extension<Caller>) -> ApiResult<Vec<TableSummary>> {
    let tables = DescribeService::new(&state, &caller).list().await?;
    Ok(ApiResponse::success(tables))
}

/// GET /api/describe/:table
pub async fn table_get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
) -> ApiResult<TableDescription> {
    let description = DescribeService::new(&state, &caller).describe(&table).await?;
    Ok(ApiResponse::success(description))
}
