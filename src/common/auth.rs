//! API Key 提取与比较

use axum::{body::Body, http::Request};
use subtle::ConstantTimeEq;

/// 从请求中提取 API Key
///
/// 支持 `x-api-key` header 和 `Authorization: Bearer <key>` header
pub fn extract_api_key(request: &Request<Body>) -> Option<String> {
    let headers = request.headers();

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// 常量时间字符串比较，防止时序攻击
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_x_api_key() {
        let request = Request::builder()
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&request).as_deref(), Some("secret"));
    }

    #[test]
    fn test_extract_from_bearer() {
        let request = Request::builder()
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&request).as_deref(), Some("secret"));
    }

    #[test]
    fn test_extract_missing() {
        let request = Request::builder()
            .header("authorization", "Basic abc")
            .body(Body::empty())
            .unwrap();
        assert!(extract_api_key(&request).is_none());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
