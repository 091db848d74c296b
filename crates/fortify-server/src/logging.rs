use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Trace id stored in request extensions and echoed in every envelope.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

const MAX_BODY_LOG_CHARS: usize = 200;

/// Cuts at most `max` bytes, snapping back to a char boundary.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

/// Bodies on these paths carry credentials and are never logged.
fn is_sensitive(path: &str) -> bool {
    path.starts_with("/v1/auth/") || path.starts_with("/v1/users")
}

/// Sensor readings and GPS breadcrumbs arrive continuously from devices.
/// Their successful round trips are logged at debug level.
fn is_telemetry(method: &Method, path: &str) -> bool {
    *method == Method::POST
        && (path.ends_with("/readings") || path.ends_with("/tracking"))
}

/// Request/response logging middleware.
///
/// Assigns the trace id every envelope echoes, logs one line per request and
/// one per response, and returns the id in `X-Trace-Id`.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    // Handlers read it back through `Extension<TraceId>`
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    // Swagger UI assets are noise
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    let query = uri.query().unwrap_or("");
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let sensitive = is_sensitive(&path);
    let telemetry = is_telemetry(&method, &path);

    // Buffer the body so it can be both logged and handed to the handler
    let has_body = !sensitive && matches!(method.as_str(), "POST" | "PUT" | "PATCH");
    let (req, req_body_snippet) = if has_body {
        let (parts, body) = req.into_parts();
        let body_bytes = axum::body::to_bytes(body, 1024 * 1024)
            .await
            .unwrap_or_default();
        let snippet = if body_bytes.is_empty() {
            String::new()
        } else {
            truncate_body(&body_bytes, MAX_BODY_LOG_CHARS)
        };
        (Request::from_parts(parts, Body::from(body_bytes)), snippet)
    } else {
        (req, String::new())
    };

    let url = if query.is_empty() {
        path.clone()
    } else {
        format!("{path}?{query}")
    };

    if telemetry {
        tracing::debug!(
            trace_id = %trace_id,
            method = %method,
            path = %url,
            body = %req_body_snippet,
            "--> telemetry"
        );
    } else if req_body_snippet.is_empty() {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %url,
            ua = %user_agent,
            "--> request"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %url,
            body = %req_body_snippet,
            ua = %user_agent,
            "--> request"
        );
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status();

    // Envelopes are small; other content (YAML, Swagger JSON) is passed through unlogged
    let (parts, body) = response.into_parts();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let body_snippet = if !sensitive && is_json && !body_bytes.is_empty() {
        truncate_body(&body_bytes, MAX_BODY_LOG_CHARS)
    } else {
        String::new()
    };

    // Failures always surface, whatever the route
    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            body = %body_snippet,
            "<-- response"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            body = %body_snippet,
            "<-- response"
        );
    } else if telemetry {
        tracing::debug!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            "<-- telemetry"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            status = status_code,
            elapsed = %elapsed,
            "<-- response"
        );
    }

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_sixteen_hex_chars() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body(b"short", 10), "short");
        assert_eq!(truncate_body("héllo".as_bytes(), 2), "h...");
        assert_eq!(truncate_body(&[0xff, 0xfe], 10), "<non-utf8 body>");
    }

    #[test]
    fn device_uploads_are_telemetry() {
        assert!(is_telemetry(&Method::POST, "/v1/sensors/s-1/readings"));
        assert!(is_telemetry(&Method::POST, "/v1/logistics/trips/t-1/tracking"));
        assert!(!is_telemetry(&Method::GET, "/v1/sensors/s-1/readings"));
        assert!(!is_telemetry(&Method::POST, "/v1/sensors"));
        assert!(is_sensitive("/v1/auth/login"));
        assert!(!is_sensitive("/v1/mills"));
    }

    #[test]
    fn elapsed_units() {
        assert_eq!(format_elapsed(999), "999µs");
        assert_eq!(format_elapsed(15_000), "15ms");
        assert_eq!(format_elapsed(2_500_000), "2.5s");
    }

    #[test]
    fn credential_paths_are_sensitive() {
        assert!(is_sensitive("/v1/auth/login"));
        assert!(is_sensitive("/v1/users/123"));
        assert!(!is_sensitive("/v1/mills"));
    }
}
