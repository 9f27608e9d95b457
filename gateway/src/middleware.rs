use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use identity::types::{TokenClaims, TokenUse};
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::outcome::{CallOutcome, CallState};
use crate::RouteState;

/// Header carrying the terminal call state on every routed response
pub const OUTCOME_HEADER: &str = "x-call-outcome";

/// Token validation in front of a declared method
///
/// # Authorization Flow
///
/// 1. Read the token from the `Authorization` header (`Bearer` prefix optional)
/// 2. Resolve it through the user directories; unknown or expired tokens
///    are rejected with 401
/// 3. Reject with 401 when the issuer is not bound to the route's authorizer
///    or the token is a refresh token
/// 4. When the method requires scopes, require an access token holding at
///    least one of them, otherwise 403
/// 5. Hand the claims and the call outcome to the invoking handler
///
/// Rejections never reach the compute unit.
pub async fn authorizer_middleware(
    State(route): State<RouteState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let mut outcome = CallOutcome::received(route.binding.label());
    info!(
        "AUTHORIZER: {} {} for {}",
        request.method(),
        request.uri(),
        route.binding.label()
    );
    outcome.advance(CallState::Authenticating);

    let authenticated = authenticate(&route, request.headers()).await;
    match authenticated {
        Ok(claims) => {
            debug!(
                "AUTHORIZER: {} token of {} accepted, scopes {:?}",
                claims.token_use, claims.sub, claims.scopes
            );
            outcome.advance(CallState::Authorized);
            request.extensions_mut().insert(claims);
            request.extensions_mut().insert(outcome);
            next.run(request).await
        }
        Err(rejection) => {
            outcome.advance(rejection);
            let error = match rejection {
                CallState::RejectedBadScope => GatewayError::Forbidden,
                _ => GatewayError::Unauthorized,
            };
            let mut response = error.into_response();
            response.extensions_mut().insert(outcome);
            response
        }
    }
}

async fn authenticate(route: &RouteState, headers: &HeaderMap) -> Result<TokenClaims, CallState> {
    let Some(token) = bearer_token(headers) else {
        warn!("AUTHORIZER: no token presented");
        return Err(CallState::RejectedNoToken);
    };

    let Some(claims) = route.app.resolve_token(token).await else {
        warn!("AUTHORIZER: token not recognized by any directory");
        return Err(CallState::RejectedNoToken);
    };

    let authorizer = &route.binding.authorizer;
    if !authorizer.accepts_issuer(&claims.iss) {
        warn!(
            "AUTHORIZER: issuer {} is not bound to authorizer {}",
            claims.iss, authorizer.authorizer_id
        );
        return Err(CallState::RejectedNoToken);
    }

    if claims.token_use == TokenUse::Refresh {
        warn!("AUTHORIZER: refresh token of {} presented as a bearer", claims.sub);
        return Err(CallState::RejectedNoToken);
    }

    let scopes = &route.binding.scopes;
    if !scopes.is_empty() {
        let scoped = claims.token_use == TokenUse::Access
            && claims.has_any_scope(scopes.iter().map(String::as_str));
        if !scoped {
            warn!(
                "AUTHORIZER: {} token of {} lacks every scope of {:?}",
                claims.token_use, claims.sub, scopes
            );
            return Err(CallState::RejectedBadScope);
        }
    }

    Ok(claims)
}

/// The token in the `Authorization` header, with or without `Bearer`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Response processing hook
///
/// Stamps the terminal state of routed calls onto the response.
pub async fn response_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let mut response = next.run(request).await;

    let state = response
        .extensions()
        .get::<CallOutcome>()
        .map(|outcome| outcome.state());
    if let Some(state) = state {
        response
            .headers_mut()
            .insert(OUTCOME_HEADER, HeaderValue::from_static(state.as_str()));
    }
    debug!(
        "RESPONSE MIDDLEWARE: {} {} -> {} ({})",
        method,
        uri,
        response.status(),
        state.map(|s| s.as_str()).unwrap_or("unrouted")
    );

    response
}
