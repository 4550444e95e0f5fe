//! `/healthcheck` short-circuit.
//!
//! Probes (load balancers, kubelet) must get an answer without presenting a
//! token, so this runs as the outermost middleware: it answers before auth,
//! scope resolution, exchange or discovery ever see the request.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

pub const HEALTHCHECK_PATH: &str = "/healthcheck";

pub fn apply(router: Router) -> Router {
    router.layer(middleware::from_fn(healthcheck_middleware))
}

async fn healthcheck_middleware(req: Request<Body>, next: Next) -> Response {
    if req.uri().path() == HEALTHCHECK_PATH {
        return (StatusCode::OK, "ok").into_response();
    }

    next.run(req).await
}
