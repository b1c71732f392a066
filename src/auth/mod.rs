// Header helpers for route auth predicates
//
// Routes decide for themselves what a valid credential is; these helpers only
// pull a token out of the upgrade request.

use axum::http::HeaderMap;


/// Subprotocol prefix browsers use to smuggle a token through the WebSocket
/// handshake, e.g. `Sec-WebSocket-Protocol: token.<value>`
pub const PROTOCOL_TOKEN_PREFIX: &str = "token.";

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Extract token from the `Sec-WebSocket-Protocol` header
///
/// Browsers cannot set Authorization on a WebSocket handshake, so clients
/// offer a `token.<value>` subprotocol instead. Other offered subprotocols
/// are ignored.
pub fn extract_protocol_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let offered = headers
        .get("sec-websocket-protocol")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    let token = offered
        .split(',')
        .map(str::trim)
        .find_map(|protocol| protocol.strip_prefix(PROTOCOL_TOKEN_PREFIX))
        .ok_or(TokenError::Missing)?;

    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// The full `token.<value>` subprotocol offered by the client, if any.
///
/// The upgrade response must select this protocol or the client aborts the
/// handshake.
pub fn offered_token_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get("sec-websocket-protocol")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|protocol| protocol.starts_with(PROTOCOL_TOKEN_PREFIX))
        .map(str::to_string)
}

/// Bearer token if present, otherwise the subprotocol token
pub fn extract_token(headers: &HeaderMap) -> Result<String, TokenError> {
    match extract_bearer_token(headers) {
        Err(TokenError::Missing) => extract_protocol_token(headers),
        other => other,
    }
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if !parts[0].eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();

    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum TokenError {
    /// Authorization header or token subprotocol not present
    #[error("Authorization token not provided")]
    Missing,
    /// Invalid format (not "Bearer <token>" or non-ASCII header)
    #[error("Invalid authorization token format")]
    InvalidFormat,
    /// Token is empty string
    #[error("Authorization token is empty")]
    Empty,
}
