//! 分析 API 请求/响应类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::query::{HeatmapQuery, TopTalkersQuery};
use super::scope::ScopePredicate;
use super::window::QueryWindow;

const DEFAULT_TOP: u32 = 50;
const DEFAULT_TOP_SOURCES: u32 = 20;
const DEFAULT_TOP_DESTS: u32 = 20;

/// GET /api/top-talkers 查询参数
///
/// 数值参数以字符串接收，以便统一返回参数错误
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTalkersParams {
    pub top: Option<String>,
    pub scope: Option<String>,
    pub window: Option<String>,
}

impl TopTalkersParams {
    pub fn validate(self) -> Result<TopTalkersQuery, ApiError> {
        let top = parse_count("top", self.top.as_deref(), DEFAULT_TOP)?;
        let window = parse_window(self.window.as_deref())?;
        let scope = match self.scope.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                ScopePredicate::parse(raw).map_err(|e| ApiError::InvalidParameter(e.to_string()))?,
            ),
        };
        Ok(TopTalkersQuery { top, scope, window })
    }
}

/// GET /api/heatmap 查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapParams {
    pub top_sources: Option<String>,
    pub top_dests: Option<String>,
    pub window: Option<String>,
}

impl HeatmapParams {
    pub fn validate(self) -> Result<HeatmapQuery, ApiError> {
        Ok(HeatmapQuery {
            top_sources: parse_count("topSources", self.top_sources.as_deref(), DEFAULT_TOP_SOURCES)?,
            top_dests: parse_count("topDests", self.top_dests.as_deref(), DEFAULT_TOP_DESTS)?,
            window: parse_window(self.window.as_deref())?,
        })
    }
}

/// 解析正整数参数，缺省时使用默认值
fn parse_count(name: &str, raw: Option<&str>, default: u32) -> Result<u32, ApiError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: i64 = raw.trim().parse().map_err(|_| {
        ApiError::InvalidParameter(format!("{} must be a positive integer", name))
    })?;
    if value <= 0 || value > i64::from(u32::MAX) {
        return Err(ApiError::InvalidParameter(format!(
            "{} must be a positive integer, got {}",
            name, value
        )));
    }
    Ok(value as u32)
}

fn parse_window(raw: Option<&str>) -> Result<QueryWindow, ApiError> {
    match raw {
        None => Ok(QueryWindow::default()),
        Some(raw) => QueryWindow::parse(raw).map_err(|e| ApiError::InvalidParameter(e.to_string())),
    }
}

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub time: DateTime<Utc>,
}

/// 错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}
