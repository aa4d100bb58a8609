//! Per-request counters feeding the metrics endpoint: a global request and
//! error count plus per-endpoint totals keyed by "METHOD /path". WebSocket
//! upgrades get their own "WS /path" key so session connects are not mixed
//! into the GET statistics (their duration covers the whole connection, not
//! one request).

use super::is_websocket_upgrade;
use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Metrics key for one request: "WS /path" for WebSocket upgrades,
/// "METHOD /path" for everything else.
fn endpoint_key(req: &ServiceRequest) -> String {
    if is_websocket_upgrade(req) {
        format!("WS {}", req.uri().path())
    } else {
        format!("{} {}", req.method(), req.uri().path())
    }
}

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let endpoint = endpoint_key(&req);

        if let Some(app_state) = req.app_data::<web::Data<AppState>>() {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Ok(response) = &result {
                if let Some(app_state) = response.request().app_data::<web::Data<AppState>>() {
                    app_state.record_endpoint_request(&endpoint, duration_ms, is_error);

                    if is_error {
                        app_state.increment_error_count();
                    }
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header;
    use actix_web::test::TestRequest;

    #[test]
    fn test_endpoint_keys_distinguish_upgrades() {
        let req = TestRequest::get()
            .uri("/ws")
            .insert_header((header::UPGRADE, "websocket"))
            .to_srv_request();
        assert_eq!(endpoint_key(&req), "WS /ws");

        let req = TestRequest::put().uri("/api/v1/config").to_srv_request();
        assert_eq!(endpoint_key(&req), "PUT /api/v1/config");
    }
}
