//! The forwarding handler: everything that happens to an authenticated
//! request between the middleware stack and the downstream socket.
//!
//! Per request:
//! 1. resolve the path to its downstream scope set
//! 2. exchange the caller's assertion for a downstream token (cached / OBO)
//! 3. ask discovery for the current instance list, pick one round-robin
//! 4. rewrite `Authorization` and forward, streaming both bodies
//!
//! Failure at any step rejects the request; nothing here retries. The only
//! header this gateway rewrites is `Authorization` (plus hop-by-hop headers,
//! which must not cross a proxy).

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::services::exchange::UserAssertion;
use crate::state::AppState;

/// Hop-by-hop headers per RFC 9110 §7.6.1; meaningful only for one transport
/// link, so they are stripped in both directions.
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub async fn forward(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, AppError> {
    let assertion = req
        .extensions()
        .get::<UserAssertion>()
        .cloned()
        // Only reachable if the auth middleware was not applied. Treat as a
        // wiring bug, not as an anonymous request.
        .ok_or(AppError::Internal)?;

    let path = req.uri().path().to_string();

    let scopes = state.scopes.resolve(&path)?;
    tracing::debug!(path = %path, scopes = ?scopes, "resolved downstream scopes");

    let token = state.exchanger.exchange(&assertion, &scopes).await?;

    let snapshot = state.discovery.get().await?;
    let instance = state
        .pick_instance(&snapshot.instances)
        .ok_or(AppError::NoHealthyUpstream)?;

    let target = build_target_url(req.uri(), &instance.host, instance.port);
    tracing::debug!(target = %target, instance = %instance.id, "forwarding request");

    let (parts, body) = req.into_parts();

    let mut outbound = state
        .http
        .request(parts.method, &target)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .timeout(state.config.upstream_timeout);

    for (name, value) in filter_headers(&parts.headers) {
        outbound = outbound.header(name, value);
    }
    outbound = outbound.header(
        header::AUTHORIZATION,
        format!("Bearer {}", token.access_token),
    );

    let upstream = outbound.send().await.map_err(|e| {
        if e.is_timeout() {
            AppError::Upstream {
                message: format!("upstream timed out: {e}"),
            }
        } else {
            AppError::Upstream {
                message: format!("upstream request failed: {e}"),
            }
        }
    })?;

    Ok(relay_response(upstream))
}

/// Copy request headers except hop-by-hop ones, `Host` (reqwest sets it from
/// the target) and `Authorization` (replaced with the exchanged token).
fn filter_headers(headers: &HeaderMap) -> impl Iterator<Item = (&header::HeaderName, &header::HeaderValue)> {
    headers.iter().filter(|(name, _)| {
        *name != header::HOST
            && *name != header::AUTHORIZATION
            && !HOP_BY_HOP.contains(name)
    })
}

fn build_target_url(uri: &Uri, host: &str, port: u16) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    // IPv6 literals (e.g. from DNS discovery) need brackets in authority form.
    if host.contains(':') {
        format!("http://[{host}]:{port}{path_and_query}")
    } else {
        format!("http://{host}:{port}{path_and_query}")
    }
}

fn relay_response(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP.contains(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    let body = Body::from_stream(upstream.bytes_stream());

    (status, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_keeps_path_and_query() {
        let uri: Uri = "https://gateway.local/api/orders/42?expand=items"
            .parse()
            .unwrap();

        assert_eq!(
            build_target_url(&uri, "orders.internal", 8080),
            "http://orders.internal:8080/api/orders/42?expand=items"
        );
    }

    #[test]
    fn target_url_brackets_ipv6_hosts() {
        let uri: Uri = "http://gateway.local/api/test".parse().unwrap();

        let target = build_target_url(&uri, "2001:db8::1", 8080);

        assert_eq!(target, "http://[2001:db8::1]:8080/api/test");
        assert!(url::Url::parse(&target).is_ok());
    }

    #[test]
    fn target_url_defaults_to_root() {
        let uri: Uri = "http://gateway.local".parse().unwrap();

        assert_eq!(
            build_target_url(&uri, "orders.internal", 8080),
            "http://orders.internal:8080/"
        );
    }

    #[test]
    fn filter_drops_host_authorization_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "gateway.local".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer user".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        let kept: Vec<&header::HeaderName> = filter_headers(&headers).map(|(n, _)| n).collect();

        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&&header::ACCEPT));
        assert!(kept.iter().any(|n| n.as_str() == "x-request-id"));
    }
}
