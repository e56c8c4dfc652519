//! 分析 API 处理器

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use chrono::Utc;

use super::error::ApiError;
use super::query::AggregationQuery;
use super::router::AnalyticsState;
use super::types::{HealthResponse, HeatmapParams, TopTalkersParams};
use crate::kusto::{FlowAggregateRow, ResultCursor};

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        time: Utc::now(),
    })
}

/// GET /api/top-talkers
pub async fn top_talkers(
    State(state): State<AnalyticsState>,
    params: Result<Query<TopTalkersParams>, QueryRejection>,
) -> Result<Json<Vec<FlowAggregateRow>>, ApiError> {
    let Query(params) = params?;
    let query = params.validate().inspect_err(|e| {
        tracing::debug!("top-talkers 参数无效: {}", e);
    })?;
    run(&state, AggregationQuery::TopTalkers(query)).await
}

/// GET /api/heatmap
pub async fn heatmap(
    State(state): State<AnalyticsState>,
    params: Result<Query<HeatmapParams>, QueryRejection>,
) -> Result<Json<Vec<FlowAggregateRow>>, ApiError> {
    let Query(params) = params?;
    let query = params.validate().inspect_err(|e| {
        tracing::debug!("heatmap 参数无效: {}", e);
    })?;
    run(&state, AggregationQuery::Heatmap(query)).await
}

/// 执行查询并物化全部结果行
///
/// 失败时不返回任何行
async fn run(
    state: &AnalyticsState,
    query: AggregationQuery,
) -> Result<Json<Vec<FlowAggregateRow>>, ApiError> {
    let started = std::time::Instant::now();

    let rows = state
        .engine
        .execute(&query)
        .await
        .and_then(ResultCursor::materialize);

    match rows {
        Ok(rows) => {
            tracing::info!(
                "{} 查询完成: {} 行, 耗时 {} ms",
                query.name(),
                rows.len(),
                started.elapsed().as_millis()
            );
            Ok(Json(rows))
        }
        Err(e) => {
            tracing::error!("{} 查询失败: {}", query.name(), e);
            Err(e.into())
        }
    }
}
