use super::limiter::RateLimiter;
use super::types::{RateLimitDecision, UNKNOWN_CLIENT};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Resolve the client identity from the connection address
pub fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = limiter.admit(&client_key(&request));

    if !decision.allowed {
        return rate_limit_exceeded_response(&decision);
    }

    let response = next.run(request).await;
    add_rate_limit_headers(response, &decision)
}

/// Create a 429 Too Many Requests response with rate limit headers
pub fn rate_limit_exceeded_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or_default();

    let mut headers = HeaderMap::new();
    insert_rate_limit_headers(&mut headers, decision);
    headers.insert("Retry-After", HeaderValue::from(retry_after));

    let body = json!({
        "error": "Too many requests",
        "message": format!("Rate limit exceeded. Try again after {} seconds.", retry_after),
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, decision: &RateLimitDecision) -> Response {
    insert_rate_limit_headers(response.headers_mut(), decision);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_client_key_from_connect_info() {
        let mut request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_key(&request), UNKNOWN_CLIENT);

        let addr: SocketAddr = "192.168.1.7:53000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_key(&request), "192.168.1.7");
    }

    #[tokio::test]
    async fn test_rate_limit_response() {
        let response = rate_limit_exceeded_response(&RateLimitDecision::denied(100, 30));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("Retry-After").unwrap(), "30");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Too many requests");
        assert_eq!(
            json["message"],
            "Rate limit exceeded. Try again after 30 seconds."
        );
    }

    #[test]
    fn test_add_rate_limit_headers() {
        let response = add_rate_limit_headers(
            StatusCode::OK.into_response(),
            &RateLimitDecision::allowed(5, 4),
        );

        assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "5");
        assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "4");
    }
}
