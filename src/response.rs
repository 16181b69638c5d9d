//! HTTP response builders.
//!
//! Every JSON body uses the same envelope: `{"code": <u16>, "msg": <string>}`,
//! plus `"data"` on success.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::Code;

/// Response body type used throughout tollgate.
pub type Body = Full<Bytes>;

/// Full response type used throughout tollgate.
pub type HttpResponse = Response<Body>;

/// Build a JSON response with the given status code and body.
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> crate::Result<HttpResponse> {
    let json = serde_json::to_vec(body)?;
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Build a 200 OK response wrapping `data` in the success envelope.
pub fn ok<T: Serialize>(data: &T) -> crate::Result<HttpResponse> {
    json(
        StatusCode::OK,
        &serde_json::json!({
            "code": Code::Success.as_u16(),
            "msg": "success",
            "data": data,
        }),
    )
}

/// Build a failure envelope with an explicit status and business code.
pub fn fail(status: StatusCode, code: Code, msg: &str) -> HttpResponse {
    let body = serde_json::json!({ "code": code.as_u16(), "msg": msg });
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Build a 204 No Content response.
pub fn no_content() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}
