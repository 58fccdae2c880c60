//! Request metadata used for failure reporting.

use std::net::IpAddr;

/// What the failure path needs to know about the inbound request.
///
/// Built by the transport layer; the core never parses raw requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Correlation id of the request.
    pub id: String,
    /// HTTP method.
    pub method: String,
    /// Request path and query.
    pub url: String,
    /// Authenticated user id (`x-uid` header), if any.
    pub uid: Option<String>,
    /// Client address.
    pub ip: Option<IpAddr>,
    /// `User-Agent` header, if any.
    pub user_agent: Option<String>,
}

impl RequestInfo {
    /// Create request metadata for a method and URL.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the authenticated user id.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the client address.
    #[must_use]
    pub const fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}
