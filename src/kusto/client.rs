//! ADX v2 REST 查询执行器

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::credential::Credential;
use super::cursor::{ResultCursor, one_api_message};
use super::error::KustoError;
use crate::common::truncate_str_safe;

/// 请求头中的应用名
const APP_NAME: &str = "flow-analytics";

#[derive(Serialize)]
struct QueryRequest<'a> {
    db: &'a str,
    csl: &'a str,
    properties: Value,
}

/// Kusto 查询客户端
///
/// 不做查询改写，也不重试：查询形态错误不是瞬时故障
pub struct KustoClient {
    client: Client,
    cluster_uri: String,
    credential: Credential,
    server_timeout: Duration,
}

impl KustoClient {
    pub fn new(
        client: Client,
        cluster_uri: impl Into<String>,
        credential: Credential,
        server_timeout: Duration,
    ) -> Self {
        let cluster_uri = cluster_uri.into().trim_end_matches('/').to_string();
        Self {
            client,
            cluster_uri,
            credential,
            server_timeout,
        }
    }

    pub fn cluster_uri(&self) -> &str {
        &self.cluster_uri
    }

    /// 在指定数据库上执行查询，返回主结果游标
    ///
    /// 连接与响应体只在本次调用内持有，任何返回路径都会释放
    pub async fn execute_query(
        &self,
        database: &str,
        query: &str,
    ) -> Result<ResultCursor, KustoError> {
        let token = self.credential.token().await?;
        let request_id = format!("{};{}", APP_NAME, uuid::Uuid::new_v4());

        let body = QueryRequest {
            db: database,
            csl: query,
            properties: serde_json::json!({
                "Options": { "servertimeout": format_timespan(self.server_timeout) }
            }),
        };

        tracing::debug!(request_id = %request_id, database, "提交 ADX 查询:\n{}", query);

        let response = self
            .client
            .post(format!("{}/v2/rest/query", self.cluster_uri))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("x-ms-client-request-id", &request_id)
            .header("x-ms-app", APP_NAME)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = error_message(&bytes).unwrap_or_else(|| {
                let text = String::from_utf8_lossy(&bytes);
                format!("HTTP {}: {}", status, truncate_str_safe(&text, 1024))
            });
            tracing::warn!(request_id = %request_id, "ADX 拒绝查询: HTTP {}", status);
            return Err(KustoError::Query(message));
        }

        ResultCursor::from_v2_response(&bytes)
    }
}

/// 解析错误响应体 `{"error": {"code", "message", "@message"}}`
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    one_api_message(&value)
}

/// 格式化为 Kusto timespan 文本 `hh:mm:ss`
fn format_timespan(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
