use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

/// Tags each request with `x-request-id`, keeping a valid client-supplied one.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .cloned()
        .unwrap_or_else(generate_request_id);

    req.headers_mut().insert("x-request-id", request_id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert("x-request-id", request_id);
    response
}

fn generate_request_id() -> HeaderValue {
    // A hyphenated UUID is always a valid header value
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}
