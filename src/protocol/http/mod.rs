//! HTTP CONNECT Protocol implementation
//!
//! `CONNECT host:port` opens a tunnel; any other method is forwarded to the
//! host named by its absolute URI or `Host` header, replaying the request
//! bytes as received.

mod state;

pub use state::{ConnectionEstablished, ReadyToTransfer, WaitRequest};

use crate::error::{Error, Result};
use crate::session::State;

use super::ProxyProtocol;

pub const HTTP_200: &str = "HTTP/1.1 200 OK\r\n\r\n";

pub const HTTP_500: &str = "HTTP/1.1 500 Internal Server Error\r\n\
                            Connection : Closed\r\n\
                            \r\n";

/// HTTP CONNECT protocol handler
pub struct HttpProtocol;

impl ProxyProtocol for HttpProtocol {
    fn initial_state(&self) -> Box<dyn State> {
        Box::new(WaitRequest)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Other,
}

impl Method {
    fn parse(s: &str) -> Self {
        const METHODS: [(&str, Method); 8] = [
            ("GET", Method::Get),
            ("POST", Method::Post),
            ("PUT", Method::Put),
            ("DELETE", Method::Delete),
            ("HEAD", Method::Head),
            ("OPTIONS", Method::Options),
            ("PATCH", Method::Patch),
            ("CONNECT", Method::Connect),
        ];

        METHODS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, method)| *method)
            .unwrap_or(Method::Other)
    }
}

/// Request line plus the headers the proxy cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead<'a> {
    pub method: Method,
    pub uri: &'a str,
    pub version: &'a str,
    pub host: Option<&'a str>,
}

impl<'a> RequestHead<'a> {
    /// Parse the head of the first request buffer.
    ///
    /// Only what arrived in `data` is considered; headers split across
    /// reads are not reassembled.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let end = data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap_or(data.len());
        let head = std::str::from_utf8(&data[..end])
            .map_err(|_| Error::Protocol("http request head is not valid UTF-8".into()))?;

        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Protocol(format!(
                "Invalid HTTP request line: {:?}",
                request_line
            )));
        };

        if !version.starts_with("HTTP/") {
            return Err(Error::Protocol(format!("Invalid HTTP version: {}", version)));
        }

        let host = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("host"))
            .map(|(_, value)| value.trim());

        Ok(Self {
            method: Method::parse(method),
            uri,
            version,
            host,
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::Connect
    }

    /// `host[:port]` naming the target
    fn authority(&self) -> &'a str {
        if self.is_connect() {
            return self.uri;
        }

        if let Some((_, rest)) = self.uri.split_once("://") {
            let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
            // drop userinfo
            return authority.rsplit('@').next().unwrap_or_default();
        }

        self.host.unwrap_or_default()
    }

    /// Target host, without IPv6 brackets. Empty if none was given.
    pub fn get_host(&self) -> String {
        split_authority(self.authority()).0.to_string()
    }

    /// Target port as text. CONNECT requires one; other methods default
    /// to the scheme's port.
    pub fn get_service(&self) -> String {
        match split_authority(self.authority()).1 {
            Some(port) => port.to_string(),
            None if self.is_connect() => String::new(),
            None if self
                .uri
                .get(..8)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://")) =>
            {
                "443".to_string()
            }
            None => "80".to_string(),
        }
    }
}

fn split_authority(authority: &str) -> (&str, Option<&str>) {
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':').filter(|p| !p.is_empty())),
            None => ("", None),
        };
    }

    match authority.split_once(':') {
        // more than one colon and no brackets: bare IPv6, no port
        Some((_, port)) if port.contains(':') => (authority, None),
        Some((host, port)) => (host, Some(port).filter(|p| !p.is_empty())),
        None => (authority, None),
    }
}
