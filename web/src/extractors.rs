//! Request metadata extractors.
//!
//! - `CorrelationId`: the id set by the correlation middleware, or one taken
//!   from the `X-Correlation-ID` header, or a fresh UUID v4
//! - `ClientIp`: client address from proxy headers or the connection
//! - `UserAgent`: the `User-Agent` header, if any
//! - `RequestMeta`: all of the above plus method, URL and `x-uid`, as the
//!   [`RequestInfo`] used for failure reporting
//!
//! None of them can fail.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use txapi_core::RequestInfo;
use uuid::Uuid;

use crate::middleware::CORRELATION_ID_HEADER;

/// Header carrying the authenticated user id.
pub const UID_HEADER: &str = "x-uid";

/// Correlation id for request tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Read the id from request parts without generating one.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        parts.extensions.get::<Self>().copied().or_else(|| {
            parts
                .headers
                .get(CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Self)
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts).unwrap_or_else(|| Self(Uuid::new_v4())))
    }
}

/// Client IP address, when one can be determined.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Connection IP (only when served with connect info)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(extract_client_ip(
            &parts.headers,
            parts.extensions.get::<ConnectInfo<SocketAddr>>(),
        )))
    }
}

fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<IpAddr> {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    forwarded
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
}

/// `User-Agent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(header_string(&parts.headers, "User-Agent")))
    }
}

/// Request metadata for failure reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta(pub RequestInfo);

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CorrelationId(id) = CorrelationId::from_request_parts(parts, state).await?;
        let ClientIp(ip) = ClientIp::from_request_parts(parts, state).await?;
        let UserAgent(user_agent) = UserAgent::from_request_parts(parts, state).await?;

        let url = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

        let mut info = RequestInfo::new(parts.method.as_str(), url).with_id(id.to_string());
        info.uid = header_string(&parts.headers, UID_HEADER);
        info.ip = ip;
        info.user_agent = user_agent;
        Ok(Self(info))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}
