use axum::{
    body::{to_bytes, Body},
    extract::Query,
    http::{
        header::CONTENT_TYPE, request::Parts, HeaderName, HeaderValue, Request, StatusCode,
    },
    response::{IntoResponse, Response},
};
use identity::TokenClaims;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::outcome::{CallOutcome, CallState};
use crate::{AppState, RouteBinding};

/// Largest request body forwarded to a compute unit
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Invoke the route's compute unit for an authorized call
pub async fn invoke_route(
    state: AppState,
    binding: Arc<RouteBinding>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let (Some(claims), Some(mut outcome)) = (
        parts.extensions.get::<TokenClaims>().cloned(),
        parts.extensions.get::<CallOutcome>().cloned(),
    ) else {
        warn!("{} reached without authorizer claims", binding.label());
        return GatewayError::Unauthorized.into_response();
    };

    outcome.advance(CallState::Invoking);
    let result = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => {
            let event = proxy_event(&parts, &binding, &claims, &outcome, &bytes);
            match state.runtime.invoke(&binding.function, event).await {
                Ok(value) => proxy_response(&value),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(GatewayError::ComputeFailed(format!(
            "Request body could not be read: {}",
            e
        ))),
    };

    let mut response = match result {
        Ok(response) => {
            outcome.advance(CallState::Succeeded);
            response
        }
        Err(e) => {
            warn!("{} failed: {}", binding.function, e);
            outcome.advance(CallState::Failed);
            match e {
                GatewayError::ComputeFailed(_) => e,
                other => GatewayError::ComputeFailed(other.to_string()),
            }
            .into_response()
        }
    };
    response.extensions_mut().insert(outcome);
    response
}

/// The event a compute unit receives for a proxied call
fn proxy_event(
    parts: &Parts,
    binding: &RouteBinding,
    claims: &TokenClaims,
    outcome: &CallOutcome,
    body: &[u8],
) -> Value {
    let headers: Map<String, Value> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();
    let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .map(|Query(params)| params)
        .filter(|params| !params.is_empty());
    let body = (!body.is_empty()).then(|| String::from_utf8_lossy(body).into_owned());
    let scope = claims
        .scopes
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");

    json!({
        "resource": binding.path,
        "path": parts.uri.path(),
        "httpMethod": parts.method.as_str(),
        "headers": headers,
        "queryStringParameters": query,
        "body": body,
        "requestContext": {
            "requestId": outcome.request_id.to_string(),
            "resourcePath": binding.path,
            "httpMethod": binding.http_method.as_str(),
            "authorizer": {
                "claims": {
                    "sub": claims.sub,
                    "email": claims.email,
                    "iss": claims.iss,
                    "client_id": claims.client_id,
                    "token_use": claims.token_use.to_string(),
                    "scope": scope,
                }
            }
        }
    })
}

/// Turn a handler's `{statusCode, headers, body}` result into a response
fn proxy_response(value: &Value) -> GatewayResult<Response> {
    let status = match value.get("statusCode") {
        None => StatusCode::OK,
        Some(code) => code
            .as_u64()
            .and_then(|c| u16::try_from(c).ok())
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or_else(|| {
                GatewayError::ComputeFailed(format!("Invalid statusCode {}", code))
            })?,
    };
    let body = match value.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(Value::Object(extra)) = value.get("headers") {
        for (name, value) in extra {
            let Some(value) = value.as_str() else {
                continue;
            };
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| GatewayError::ComputeFailed(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::ComputeFailed(e.to_string()))?;
            headers.insert(name, value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_and_string_body() {
        let response = proxy_response(&json!({"body": "[]"})).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_explicit_status_and_headers() {
        let response = proxy_response(&json!({
            "statusCode": 201,
            "headers": {"x-item": "a"},
            "body": {"ok": true}
        }))
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-item").unwrap(), "a");
    }

    #[test]
    fn test_invalid_status_fails() {
        assert!(matches!(
            proxy_response(&json!({"statusCode": 99999})),
            Err(GatewayError::ComputeFailed(_))
        ));
    }
}
