// handlers/protected/find/mod.rs - JSON-body queries

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};

use crate::access::Caller;
use crate::api::Paginated;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::DataService;
use crate::state::AppState;

/// POST /api/find/:table - `{ select, where, order, limit, offset, page, relations }`
pub async fn find_post(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(table): Path<String>,
    payload: Result<Json<FilterData>, JsonRejection>,
) -> ApiResult<Paginated> {
    let Json(filter_data) = payload?;
    let page = DataService::new(&state, &caller).list(&table, filter_data).await?;
    Ok(ApiResponse::success(page))
}
