//! Kusto 客户端错误

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KustoError {
    /// 引擎拒绝或执行失败（语法、超时、资源限制、权限）
    #[error("{0}")]
    Query(String),

    /// 响应无法按 v2 协议解析
    #[error("malformed engine response: {0}")]
    Protocol(String),

    /// 与引擎之间的网络错误
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 获取访问令牌失败
    #[error("{0}")]
    Credential(String),
}
