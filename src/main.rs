mod analytics;
mod common;
mod http_client;
mod kusto;
mod model;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use analytics::{InMemoryEngine, QueryEngine, cors_layer, create_analytics_router};
use http_client::{build_adx_client, build_identity_client};
use kusto::{Credential, IdentityEndpoint, KustoClient, ManagedIdentity};
use model::config::Config;

/// 网络流量分析 API 服务
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = Config::default_config_path())]
    config: String,

    /// 使用本地 JSON 流量数据代替 ADX
    #[arg(long)]
    fixture: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply_env();
    if let Some(path) = args.fixture {
        config.fixture_path = Some(path);
    }
    config.validate_engine()?;

    if let Some(path) = config.config_path() {
        tracing::debug!("配置文件: {}", path.display());
    }

    let engine = Arc::new(build_engine(&config)?);
    tracing::info!("查询引擎: {}", engine.describe());
    if config.api_key.is_none() {
        tracing::warn!("未配置 apiKey，分析 API 不校验调用方");
    }

    let app = Router::new()
        .nest(
            "/api",
            create_analytics_router(engine, config.api_key.clone()),
        )
        .layer(cors_layer(config.allowed_origins()))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;
    tracing::info!("服务已启动: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

fn build_engine(config: &Config) -> anyhow::Result<QueryEngine> {
    if let Some(path) = &config.fixture_path {
        return Ok(QueryEngine::Memory(InMemoryEngine::load(path)?));
    }

    let client = build_adx_client(config.proxy_url.as_deref(), config.query_timeout())?;
    let credential = build_credential(config, ManagedIdentity::detect_endpoint())?;

    let kusto = KustoClient::new(
        client,
        config.adx_uri.clone(),
        credential,
        Duration::from_secs(config.server_timeout_secs),
    );
    Ok(QueryEngine::kusto(kusto, config.adx_db.clone()))
}

/// 配置了静态 Token 时直接使用，否则走托管标识（不经过 `proxyUrl`）
fn build_credential(config: &Config, endpoint: IdentityEndpoint) -> anyhow::Result<Credential> {
    if let Some(token) = &config.adx_token {
        return Ok(Credential::Static(token.clone()));
    }

    Ok(Credential::ManagedIdentity(ManagedIdentity::new(
        build_identity_client()?,
        endpoint,
        config.adx_uri.clone(),
        config.managed_identity_client_id.clone(),
    )))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("监听退出信号失败: {}", e);
    }
}
