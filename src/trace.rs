//! Per-request trace ids carried in the `X-Trace-Id` header.

use hyper::http::HeaderMap;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

const MAX_LEN: usize = 64;

/// Reuse the caller's trace id when it is well formed, otherwise mint one.
pub fn from_headers(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_valid(id))
        .map(str::to_string)
        .unwrap_or_else(generate)
}

/// A fresh 16-character hex id.
pub fn generate() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

fn is_valid(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
