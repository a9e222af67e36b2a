use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

const MAX_USER_AGENT_LEN: usize = 500;

/// Client details recorded on the usage session opened at login
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Read the client address and user agent from request headers.
    ///
    /// Proxy headers win over the socket address, since the service is
    /// normally deployed behind a reverse proxy.
    pub fn extract_from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: client_ip_from_headers(headers),
            user_agent: user_agent(headers),
        }
    }

    pub fn with_peer_addr(mut self, peer: Option<IpAddr>) -> Self {
        if self.ip_address.is_none() {
            self.ip_address = peer.filter(|ip| !ip.is_unspecified()).map(|ip| ip.to_string());
        }
        self
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self::extract_from_headers(&parts.headers).with_peer_addr(peer))
    }
}

fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|list| list.split(',').next());

    let real_ip = headers.get("x-real-ip").and_then(|h| h.to_str().ok());

    [forwarded_for, real_ip]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find_map(|candidate| match candidate.parse::<IpAddr>() {
            Ok(ip) if !ip.is_unspecified() => Some(ip.to_string()),
            _ => None,
        })
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|ua| {
            if ua.len() > MAX_USER_AGENT_LEN {
                let mut end = MAX_USER_AGENT_LEN - 3;
                while !ua.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &ua[..end])
            } else {
                ua.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.195, 70.41.3.18".parse().unwrap(),
        );
        headers.insert("x-real-ip", "198.51.100.17".parse().unwrap());

        let context = RequestContext::extract_from_headers(&headers);
        assert_eq!(context.ip_address.as_deref(), Some("203.0.113.195"));
    }

    #[test]
    fn test_real_ip_used_when_forwarded_for_is_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.17".parse().unwrap());

        let context = RequestContext::extract_from_headers(&headers);
        assert_eq!(context.ip_address.as_deref(), Some("198.51.100.17"));
    }

    #[test]
    fn test_peer_addr_fallback() {
        let context = RequestContext::extract_from_headers(&HeaderMap::new())
            .with_peer_addr(Some("10.0.0.7".parse().unwrap()));
        assert_eq!(context.ip_address.as_deref(), Some("10.0.0.7"));

        let context = RequestContext::extract_from_headers(&HeaderMap::new())
            .with_peer_addr(Some("0.0.0.0".parse().unwrap()));
        assert_eq!(context.ip_address, None);
    }

    #[tokio::test]
    async fn test_extractor_uses_connect_info() {
        let mut request = axum::http::Request::builder()
            .header("user-agent", "curl/8.0")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.10:4242".parse::<SocketAddr>().unwrap()));
        let (mut parts, _) = request.into_parts();

        let context = RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(context.ip_address.as_deref(), Some("192.0.2.10"));
        assert_eq!(context.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_user_agent_truncated() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "a".repeat(600).parse().unwrap());

        let ua = RequestContext::extract_from_headers(&headers)
            .user_agent
            .unwrap();
        assert_eq!(ua.len(), MAX_USER_AGENT_LEN);
        assert!(ua.ends_with("..."));
    }
}
