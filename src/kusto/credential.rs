//! 访问 ADX 的凭据
//!
//! 支持两种方式：
//! - 静态 Bearer Token（本地调试、CI）
//! - 托管标识：从 Azure 实例元数据服务（IMDS）或 App Service 标识端点获取 Token，
//!   在过期前 5 分钟内自动刷新

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::error::KustoError;

/// IMDS Token 端点
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// 提前刷新的时间窗口
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// 凭据
pub enum Credential {
    Static(String),
    ManagedIdentity(ManagedIdentity),
}

impl Credential {
    /// 获取可用的访问令牌
    pub async fn token(&self) -> Result<String, KustoError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ManagedIdentity(identity) => identity.token().await,
        }
    }
}

/// 托管标识端点类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEndpoint {
    /// 虚拟机 / AKS：IMDS
    Imds(String),
    /// App Service / Container Apps：IDENTITY_ENDPOINT + IDENTITY_HEADER
    AppService { endpoint: String, header: String },
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix 时间戳，IMDS 以字符串返回，部分端点为数字
    expires_on: Value,
}

/// 托管标识凭据
pub struct ManagedIdentity {
    client: Client,
    endpoint: IdentityEndpoint,
    /// Token 受众，即 ADX 集群地址
    resource: String,
    client_id: Option<String>,
    cache: RwLock<Option<CachedToken>>,
}

impl ManagedIdentity {
    pub fn new(
        client: Client,
        endpoint: IdentityEndpoint,
        resource: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            resource: resource.into(),
            client_id,
            cache: RwLock::new(None),
        }
    }

    /// 根据运行环境选择端点：存在 IDENTITY_ENDPOINT 时使用 App Service 端点，否则使用 IMDS
    pub fn detect_endpoint() -> IdentityEndpoint {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) if !endpoint.is_empty() => {
                IdentityEndpoint::AppService { endpoint, header }
            }
            _ => IdentityEndpoint::Imds(IMDS_ENDPOINT.to_string()),
        }
    }

    /// 获取 Token，缓存未过期时直接返回
    pub async fn token(&self) -> Result<String, KustoError> {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        tracing::debug!("托管标识 Token 已刷新，过期时间: {}", fresh.expires_at);
        *self.cache.write() = Some(fresh);
        Ok(token)
    }

    async fn fetch(&self) -> Result<CachedToken, KustoError> {
        let mut params: Vec<(&str, &str)> = vec![("resource", self.resource.as_str())];
        if let Some(ref client_id) = self.client_id {
            params.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::Imds(url) => self
                .client
                .get(url)
                .header("Metadata", "true")
                .query(&[("api-version", "2018-02-01")]),
            IdentityEndpoint::AppService { endpoint, header } => self
                .client
                .get(endpoint)
                .header("X-IDENTITY-HEADER", header)
                .query(&[("api-version", "2019-08-01")]),
        }
        .query(&params);

        let response = request
            .send()
            .await
            .map_err(|e| KustoError::Credential(format!("identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KustoError::Credential(format!(
                "identity endpoint returned HTTP {}: {}",
                status,
                crate::common::truncate_str_safe(&body, 512)
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| KustoError::Credential(format!("invalid token response: {}", e)))?;

        let expires_at = parse_expires_on(&parsed.expires_on).ok_or_else(|| {
            KustoError::Credential(format!("invalid expires_on: {}", parsed.expires_on))
        })?;

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at,
        })
    }
}

fn parse_expires_on(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}
