use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置
///
/// 启动时构建一次，之后以只读方式通过路由状态共享
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// ADX 集群地址，例如 https://mycluster.westeurope.kusto.windows.net
    #[serde(default)]
    pub adx_uri: String,

    /// ADX 数据库名
    #[serde(default)]
    pub adx_db: String,

    /// 静态 Bearer Token（可选，配置后不再使用托管标识）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adx_token: Option<String>,

    /// 用户分配托管标识的 Client ID（可选，未配置时使用系统分配标识）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_identity_client_id: Option<String>,

    /// 允许的 CORS 来源，逗号分隔，"*" 表示任意来源
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    /// 分析接口 API 密钥（可选，配置后需要 x-api-key 或 Bearer 认证）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// ADX 请求的客户端超时（秒），实际取值不低于服务端超时加余量
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// 服务端查询超时（秒），随请求下发给 ADX
    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// 本地 FlowBin 数据文件（可选，配置后使用内存引擎代替 ADX）
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture_path: Option<PathBuf>,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

/// 客户端超时相对服务端查询超时的最小余量
const QUERY_TIMEOUT_MARGIN_SECS: u64 = 30;

fn default_server_timeout_secs() -> u64 {
    240
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            adx_uri: String::new(),
            adx_db: String::new(),
            adx_token: None,
            managed_identity_client_id: None,
            cors_origins: default_cors_origins(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            server_timeout_secs: default_server_timeout_secs(),
            proxy_url: None,
            fixture_path: None,
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置，文件不存在时返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 用环境变量覆盖配置
    ///
    /// 支持 ADX_URI, ADX_DB, ADX_TOKEN, AZURE_CLIENT_ID, CORS_ORIGINS, API_KEY
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = lookup("ADX_URI") {
            self.adx_uri = v;
        }
        if let Some(v) = lookup("ADX_DB") {
            self.adx_db = v;
        }
        if let Some(v) = lookup("ADX_TOKEN") {
            self.adx_token = Some(v);
        }
        if let Some(v) = lookup("AZURE_CLIENT_ID") {
            self.managed_identity_client_id = Some(v);
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors_origins = v;
        }
        if let Some(v) = lookup("API_KEY") {
            self.api_key = Some(v);
        }
    }

    /// ADX 客户端超时：引擎仍在执行的查询不会被客户端先行放弃
    pub fn query_timeout(&self) -> Duration {
        let floor = self
            .server_timeout_secs
            .saturating_add(QUERY_TIMEOUT_MARGIN_SECS);
        Duration::from_secs(self.request_timeout_secs.max(floor))
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 解析后的 CORS 来源列表，None 表示允许任意来源
    pub fn allowed_origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }

    /// 校验连接 ADX 所需的配置
    pub fn validate_engine(&self) -> anyhow::Result<()> {
        if self.fixture_path.is_some() {
            return Ok(());
        }
        if self.adx_uri.trim().is_empty() {
            anyhow::bail!("未配置 adxUri（或环境变量 ADX_URI）");
        }
        if self.adx_db.trim().is_empty() {
            anyhow::bail!("未配置 adxDb（或环境变量 ADX_DB）");
        }
        Ok(())
    }
}
