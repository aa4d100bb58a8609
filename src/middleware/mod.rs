//! # HTTP Middleware
//!
//! Cross-cutting concerns applied to every request: structured request
//! logging and the counters behind the metrics endpoint.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;

use actix_web::dev::ServiceRequest;
use actix_web::http::header;

/// True when the request asks to upgrade to a WebSocket, which is how voice
/// sessions arrive. Upgrades are long-lived, so both middlewares treat them
/// differently from plain HTTP requests.
pub(crate) fn is_websocket_upgrade(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_websocket_upgrade_detection() {
        let req = TestRequest::get()
            .uri("/ws")
            .insert_header((header::UPGRADE, "websocket"))
            .to_srv_request();
        assert!(is_websocket_upgrade(&req));

        let req = TestRequest::get().uri("/api/v1/health").to_srv_request();
        assert!(!is_websocket_upgrade(&req));
    }
}
