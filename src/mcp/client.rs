//! In-process client for the HTTP API.
//!
//! Requests are dispatched straight into the router with `oneshot`, so the
//! tool server shares validation and status codes with the HTTP API without
//! opening a socket.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use thiserror::Error;
use tower::ServiceExt;

const UPLOAD_BOUNDARY: &str = "shelflife-upload-boundary";

/// Failure of a tool call that is not an API-level rejection.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The API answered with a 5xx status.
    #[error("Server error {status}: {body}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Tool arguments did not match the tool's schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// No tool with this name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The request could not be built or the response not read.
    #[error("Request failed: {0}")]
    Request(String),
}

/// Result type of tool calls.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Client for the HTTP API, dispatching into a router.
#[derive(Clone)]
pub struct ApiClient {
    router: Router,
}

impl ApiClient {
    /// Wrap an application router.
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// GET with query parameters.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> ToolResult<Value> {
        self.send(Method::GET, &with_query(path, query), None).await
    }

    /// POST with query parameters and an optional JSON body.
    pub async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> ToolResult<Value> {
        self.send(Method::POST, &with_query(path, query), body).await
    }

    /// PUT with a JSON body.
    pub async fn put(&self, path: &str, body: Value) -> ToolResult<Value> {
        self.send(Method::PUT, path, Some(body)).await
    }

    /// POST a file as the multipart field `file`.
    pub async fn upload(&self, path: &str, filename: &str, content: &str) -> ToolResult<Value> {
        let body = format!(
            "--{UPLOAD_BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/csv\r\n\r\n\
             {content}\r\n\
             --{UPLOAD_BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={UPLOAD_BOUNDARY}"),
            )
            .body(Body::from(body))
            .map_err(|e| ToolError::Request(e.to_string()))?;
        self.dispatch(request).await
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> ToolResult<Value> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| ToolError::Request(e.to_string()))?;
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> ToolResult<Value> {
        let uri = request.uri().to_string();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| ToolError::Request(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ToolError::Request(e.to_string()))?
            .to_bytes();

        tracing::debug!(uri = %uri, status = status.as_u16(), "API call");
        handle(status, &bytes)
    }
}

/// Translate an API response into a tool value.
///
/// 204 becomes `{"ok": true}`, 4xx a structured error value and 5xx a
/// [`ToolError::Server`].
fn handle(status: StatusCode, body: &[u8]) -> ToolResult<Value> {
    if status == StatusCode::NO_CONTENT {
        return Ok(json!({ "ok": true }));
    }

    let text = String::from_utf8_lossy(body);
    if status.is_server_error() {
        return Err(ToolError::Server {
            status: status.as_u16(),
            body: text.into_owned(),
        });
    }

    if status.is_client_error() {
        let detail = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("detail").cloned())
            .unwrap_or_else(|| Value::String(text.into_owned()));
        return Ok(json!({
            "error": true,
            "status": status.as_u16(),
            "detail": detail,
        }));
    }

    serde_json::from_slice(body).map_err(|e| ToolError::Request(e.to_string()))
}

/// Whether a tool value is an API error.
pub fn is_error(value: &Value) -> bool {
    value.get("error").and_then(Value::as_bool).unwrap_or(false)
}

/// A path segment, percent-encoded.
pub fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn with_query(path: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    format!("{}?{}", path, pairs.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_no_content() {
        let value = handle(StatusCode::NO_CONTENT, b"").unwrap();
        assert_eq!(value, json!({ "ok": true }));
    }

    #[test]
    fn test_handle_client_error() {
        let value = handle(StatusCode::CONFLICT, br#"{"detail":"Book already exists"}"#).unwrap();
        assert_eq!(
            value,
            json!({ "error": true, "status": 409, "detail": "Book already exists" })
        );
        assert!(is_error(&value));
    }

    #[test]
    fn test_handle_client_error_without_json() {
        let value = handle(StatusCode::BAD_REQUEST, b"bad input").unwrap();
        assert_eq!(value["detail"], "bad input");
    }

    #[test]
    fn test_handle_server_error() {
        let err = handle(StatusCode::INTERNAL_SERVER_ERROR, b"boom").unwrap_err();
        assert!(matches!(err, ToolError::Server { status: 500, .. }));
    }

    #[test]
    fn test_handle_success() {
        let value = handle(StatusCode::OK, br#"[{"id":1}]"#).unwrap();
        assert_eq!(value, json!([{ "id": 1 }]));
        assert!(!is_error(&value));
    }

    #[test]
    fn test_with_query() {
        assert_eq!(with_query("/api/books", &[]), "/api/books");
        assert_eq!(
            with_query("/api/books", &[("q", "a b&c".to_string()), ("limit", "5".to_string())]),
            "/api/books?q=a%20b%26c&limit=5"
        );
        assert_eq!(segment("Dune: Messiah/2"), "Dune%3A%20Messiah%2F2");
    }
}
