//! 分析 API 错误

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::types::ErrorResponse;
use crate::kusto::KustoError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 调用方参数未通过校验
    #[error("{0}")]
    InvalidParameter(String),

    /// 调用方 API Key 缺失或错误
    #[error("Invalid API key")]
    Unauthorized,

    /// 引擎拒绝或执行查询失败
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    /// 获取访问 ADX 的令牌失败
    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),
}

impl ApiError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::Unauthorized => "authentication_error",
            Self::QueryExecution(_) => "query_execution_error",
            Self::UpstreamAuth(_) => "upstream_auth_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::QueryExecution(_) | Self::UpstreamAuth(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<KustoError> for ApiError {
    fn from(err: KustoError) -> Self {
        match err {
            KustoError::Credential(msg) => Self::UpstreamAuth(msg),
            other => Self::QueryExecution(other.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidParameter(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.error_type(), self.to_string());
        (self.status_code(), Json(body)).into_response()
    }
}
