//! 分析 API 路由

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};

use http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::common::auth;

use super::engine::QueryEngine;
use super::error::ApiError;
use super::handlers::{health, heatmap, top_talkers};

/// 分析 API 状态
#[derive(Clone)]
pub struct AnalyticsState {
    pub engine: Arc<QueryEngine>,
    /// 未配置时不校验调用方
    pub api_key: Option<Arc<str>>,
}

/// 分析 API 认证中间件
async fn analytics_auth_middleware(
    State(state): State<AnalyticsState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    match auth::extract_api_key(&request) {
        Some(key) if auth::constant_time_eq(&key, expected) => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

/// CORS 中间件层
///
/// `origins` 为 None 时允许任意来源，否则只允许列出的来源，无法解析的条目被忽略
pub fn cors_layer(origins: Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any);

    match origins {
        None => layer.allow_origin(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| {
                    HeaderValue::from_str(o)
                        .inspect_err(|_| tracing::warn!("忽略无效的 CORS 来源: {}", o))
                        .ok()
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(origins))
        }
    }
}

/// 创建分析 API 路由
///
/// # 端点
/// - `GET /top-talkers` - 按 (源, 目标, 端口) 的 Top N 流量
/// - `GET /heatmap` - 源 × 目标字节数子矩阵
/// - `GET /health` - 健康检查（不需要认证）
///
/// 返回 Router<()>，可直接 nest 到主应用的 `/api` 下
pub fn create_analytics_router(engine: Arc<QueryEngine>, api_key: Option<String>) -> Router {
    let state = AnalyticsState {
        engine,
        api_key: api_key.map(Arc::from),
    };

    Router::new()
        .route("/top-talkers", get(top_talkers))
        .route("/heatmap", get(heatmap))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            analytics_auth_middleware,
        ))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use axum::http::StatusCode;
    use chrono::{TimeDelta, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::analytics::memory::InMemoryEngine;
    use crate::analytics::model::FlowBin;

    fn bin(minutes_ago: i64, src: &str, dst: &str, port: u16, bytes: i64) -> FlowBin {
        FlowBin {
            five_min_bin: Utc::now() - TimeDelta::minutes(minutes_ago),
            src_vm: src.to_string(),
            dst_vm: dst.to_string(),
            dst_port: port,
            bytes,
            flows: 1,
        }
    }

    fn app(bins: Vec<FlowBin>, api_key: Option<&str>) -> Router {
        let engine = Arc::new(QueryEngine::Memory(InMemoryEngine::new(bins)));
        Router::new().nest(
            "/api",
            create_analytics_router(engine, api_key.map(str::to_string)),
        )
    }

    /// 不同源、目标、端口混合的数据集，部分落在窗口外
    fn mixed_dataset() -> Vec<FlowBin> {
        let mut bins = Vec::new();
        for i in 0..12u16 {
            let src = format!("vm{:02}", i % 7);
            let dst = format!("vm{:02}", (i * 3) % 11);
            let port = [80, 443, 22, 1433][(i % 4) as usize];
            bins.push(bin(i64::from(i) * 4, &src, &dst, port, 1_000 * i64::from(i + 1)));
            // 窗口外的大流量不能影响结果
            bins.push(bin(90 + i64::from(i), &src, &dst, port, 10_000_000));
        }
        bins
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(vec![], Some("secret")), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["time"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_single_record_end_to_end() {
        let app = app(vec![bin(10, "vm01", "vm02", 443, 1000)], None);
        let (status, body) = get_json(app, "/api/top-talkers?top=5&window=PT1H").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{"SrcVm": "vm01", "DstVm": "vm02", "DstPort": 443, "Bytes": 1000, "Flows": 1}])
        );
    }

    #[tokio::test]
    async fn test_empty_window_returns_empty_arrays() {
        let bins = vec![bin(120, "vm01", "vm02", 443, 1000)];

        let (status, body) = get_json(app(bins.clone(), None), "/api/top-talkers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = get_json(app(bins, None), "/api/heatmap").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_top_talkers_bound_and_order() {
        for k in [1, 3, 5, 50] {
            let uri = format!("/api/top-talkers?top={}", k);
            let (status, body) = get_json(app(mixed_dataset(), None), &uri).await;
            assert_eq!(status, StatusCode::OK);

            let rows = body.as_array().unwrap();
            assert!(rows.len() <= k);
            let bytes: Vec<i64> = rows.iter().map(|r| r["Bytes"].as_i64().unwrap()).collect();
            assert!(bytes.windows(2).all(|w| w[0] >= w[1]), "not descending: {:?}", bytes);
            // 窗口外的记录不参与聚合
            assert!(bytes.iter().all(|b| *b < 10_000_000));
        }
    }

    #[tokio::test]
    async fn test_top_talkers_window_filter() {
        let bins = vec![
            bin(10, "vm01", "vm02", 443, 100),
            bin(40, "vm03", "vm04", 443, 200),
        ];
        let (_, body) = get_json(app(bins, None), "/api/top-talkers?window=PT30M").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["SrcVm"], "vm01");
    }

    #[tokio::test]
    async fn test_top_talkers_scope_filter() {
        let uri = "/api/top-talkers?top=50&scope=DstPort%20%3D%3D%20443";
        let (status, body) = get_json(app(mixed_dataset(), None), uri).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r["DstPort"] == 443));
    }

    #[tokio::test]
    async fn test_heatmap_cardinality_bounds() {
        for (m, n) in [(1, 1), (2, 3), (5, 2), (20, 20)] {
            let uri = format!("/api/heatmap?topSources={}&topDests={}", m, n);
            let (status, body) = get_json(app(mixed_dataset(), None), &uri).await;
            assert_eq!(status, StatusCode::OK);

            let rows = body.as_array().unwrap();
            let sources: HashSet<&str> = rows.iter().map(|r| r["SrcVm"].as_str().unwrap()).collect();
            let dests: HashSet<&str> = rows.iter().map(|r| r["DstVm"].as_str().unwrap()).collect();
            assert!(sources.len() <= m);
            assert!(dests.len() <= n);
            for row in rows {
                let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
                assert_eq!(keys.len(), 3);
            }
        }
    }

    #[tokio::test]
    async fn test_repeated_requests_are_identical() {
        let app = app(mixed_dataset(), None);
        let (_, first) = get_json(app.clone(), "/api/top-talkers?top=10").await;
        let (_, second) = get_json(app.clone(), "/api/top-talkers?top=10").await;
        assert_eq!(first, second);

        let (_, first) = get_json(app.clone(), "/api/heatmap?topSources=3&topDests=3").await;
        let (_, second) = get_json(app, "/api/heatmap?topSources=3&topDests=3").await;
        let as_set = |v: &Value| -> HashSet<String> {
            v.as_array().unwrap().iter().map(|r| r.to_string()).collect()
        };
        assert_eq!(as_set(&first), as_set(&second));
    }

    #[tokio::test]
    async fn test_non_positive_counts_rejected() {
        for uri in [
            "/api/top-talkers?top=0",
            "/api/top-talkers?top=-3",
            "/api/top-talkers?top=ten",
            "/api/heatmap?topSources=0",
            "/api/heatmap?topDests=-1",
        ] {
            let (status, body) = get_json(app(mixed_dataset(), None), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"]["type"], "invalid_parameter");
        }
    }

    #[tokio::test]
    async fn test_injection_rejected() {
        for uri in [
            "/api/top-talkers?scope=1%3D1%3B%20drop%20table%20FlowLogsRaw",
            "/api/top-talkers?scope=true%20%7C%20take%2010",
            "/api/top-talkers?scope=SrcVm%20%3D%3D%20%22a%22%3B%20FlowLogsRaw",
            "/api/top-talkers?window=1h%3B%20FlowLogsRaw",
            "/api/top-talkers?window=PT1H%20%7C%20union%20FlowLogsRaw",
            "/api/heatmap?window=PT1D",
        ] {
            let (status, body) = get_json(app(mixed_dataset(), None), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"]["type"], "invalid_parameter");
        }
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (status, body) = get_json(app(vec![], Some("secret")), "/api/top-talkers").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["type"], "authentication_error");

        let response = app(vec![], Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/api/heatmap")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(vec![], Some("secret"))
            .oneshot(
                Request::builder()
                    .uri("/api/heatmap")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cors_restricted_origins() {
        let app = app(vec![], None).layer(cors_layer(Some(vec![
            "https://dash.example.com".to_string(),
        ])));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("origin", "https://dash.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://dash.example.com"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("origin", "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_method() {
        let response = app(vec![], Some("secret"))
            .layer(cors_layer(None))
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/top-talkers")
                    .header("origin", "https://dash.example.com")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-methods"], "*");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_oversized_window_rejected() {
        for uri in [
            "/api/top-talkers?window=PT3000000000H",
            "/api/heatmap?window=PT9000H",
        ] {
            let (status, body) = get_json(app(mixed_dataset(), None), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"]["type"], "invalid_parameter");
        }

        let (status, _) = get_json(app(mixed_dataset(), None), "/api/top-talkers?window=PT8760H").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_query_string_uses_json_error_body() {
        for uri in [
            "/api/top-talkers?top=1&top=2",
            "/api/heatmap?window=PT1H&window=PT2H",
        ] {
            let (status, body) = get_json(app(mixed_dataset(), None), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"]["type"], "invalid_parameter");
            assert!(body["error"]["message"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn test_engine_failure_surfaces_as_5xx() {
        use crate::kusto::{Credential, KustoClient};
        use std::time::Duration;

        // 无法连接的集群：查询失败，不返回任何行
        let client = KustoClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            Credential::Static("t".to_string()),
            Duration::from_secs(10),
        );
        let engine = Arc::new(QueryEngine::kusto(client, "netflow"));
        let app = Router::new().nest("/api", create_analytics_router(engine, None));

        let (status, body) = get_json(app, "/api/top-talkers?top=5").await;
        assert!(status.is_server_error());
        assert_eq!(body["error"]["type"], "query_execution_error");
    }
}
