//! Request identity: session users and service origins.
//!
//! Session authentication happens upstream — a session layer owned by the
//! surrounding application authenticates the browser and attaches a
//! [`SessionUser`] extension before requests reach these routes. The
//! handlers only check that the attached identity owns the addressed
//! path; this layer never leaks whether a foreign resource exists.
//!
//! Service-origin endpoints (introspection, fingerprint lookup) carry no
//! session. Their caller identity is resolved from transport facts by
//! [`credhub_authn::origin`], assembled here from headers and the socket
//! address.

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use credhub_authn::{RequestMeta, origin::ORIGIN_HEADER, rate_limit::Method};
use credhub_store::UserId;

use crate::error::ApiError;

/// Header carrying the mTLS client certificate common name, populated by
/// the TLS-terminating ingress.
pub const CLIENT_CERT_CN_HEADER: &str = "x-client-cert-cn";

/// Forwarded-for chain; the first hop is the caller.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The authenticated session identity, attached by the upstream session
/// layer.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// The logged-in user.
    pub user_id: UserId,
}

/// Requires a session whose user owns the addressed `path_user_id`.
///
/// # Errors
///
/// `Unauthorized` without a session, `Forbidden` on an owner mismatch.
pub fn require_owner(
    session: Option<&SessionUser>,
    path_user_id: &str,
) -> Result<UserId, ApiError> {
    let session = session.ok_or(ApiError::Unauthorized)?;
    if session.user_id.as_str() != path_user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(session.user_id.clone())
}

/// The peer socket address, when the server was started with connect
/// info. Infallible: routers driven without a real connection (tests,
/// `oneshot`) simply see no address.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0)))
    }
}

/// Assembles transport facts for origin resolution.
///
/// The forwarded-for chain only ever feeds the caller-identity fallback;
/// proxy trust is decided on the socket peer, which the caller cannot
/// forge.
pub fn request_meta(headers: &HeaderMap, client_addr: ClientAddr) -> RequestMeta {
    let header_str =
        |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    let peer_addr = client_addr.0.map(|addr| addr.ip());

    // First hop of the forwarded-for chain, falling back to the socket.
    let remote_addr = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .and_then(|hop| hop.trim().parse().ok())
        .or(peer_addr);

    RequestMeta {
        origin_header: header_str(ORIGIN_HEADER),
        client_cert_cn: header_str(CLIENT_CERT_CN_HEADER),
        remote_addr,
        peer_addr,
    }
}

/// How a resolved origin was derived, for rate-limit tagging.
pub fn origin_method(origin: Option<&str>) -> Method {
    match origin {
        Some(origin) if origin.starts_with("ip:") => Method::Ip,
        Some(_) => Method::ServiceOrigin,
        None => Method::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use credhub_store::Id;

    use super::*;

    #[test]
    fn owner_check_distinguishes_missing_and_mismatched() {
        let user = Id::generate();
        let session = SessionUser { user_id: user.clone() };

        assert!(matches!(require_owner(None, user.as_str()), Err(ApiError::Unauthorized)));
        assert!(matches!(
            require_owner(Some(&session), Id::generate().as_str()),
            Err(ApiError::Forbidden)
        ));
        assert_eq!(require_owner(Some(&session), user.as_str()).unwrap(), user);
    }

    #[test]
    fn forwarded_for_beats_socket_address() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, "10.1.2.3, 172.16.0.1".parse().unwrap());
        let addr = ClientAddr(Some("192.168.0.9:4000".parse::<SocketAddr>().unwrap()));

        let meta = request_meta(&headers, addr);
        assert_eq!(meta.remote_addr, Some("10.1.2.3".parse().unwrap()));
        // The forwarded hop never replaces the socket peer.
        assert_eq!(meta.peer_addr, Some("192.168.0.9".parse().unwrap()));

        let meta = request_meta(&HeaderMap::new(), addr);
        assert_eq!(meta.remote_addr, Some("192.168.0.9".parse().unwrap()));
    }
}
