//! Address type for upstream targets

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

/// Network address representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Build an address from the textual host/service pair kept in a
    /// session context. IP literals (with or without IPv6 brackets) become
    /// socket addresses, anything else is resolved later.
    pub fn from_host_service(host: &str, service: &str) -> Result<Self> {
        let port: u16 = service
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("{}:{}", host, service)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidAddress(format!(":{}", service)));
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Address::Socket(SocketAddr::new(ip, port))),
            Err(_) => Ok(Address::Domain(host.to_string(), port)),
        }
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the host part as string
    pub fn host(&self) -> String {
        match self {
            Address::Socket(addr) => addr.ip().to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// Get the port as a service string
    pub fn service(&self) -> String {
        self.port().to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_from_host_service_domain() {
        let addr = Address::from_host_service("example.com", "443").unwrap();
        assert_eq!(addr, Address::domain("example.com", 443));
        assert_eq!(addr.to_string(), "example.com:443");
    }

    #[test]
    fn test_from_host_service_ip_literals() {
        let v4 = Address::from_host_service("10.0.0.1", "80").unwrap();
        assert_eq!(v4, Address::Socket("10.0.0.1:80".parse().unwrap()));

        let v6 = Address::from_host_service("[::1]", "8080").unwrap();
        assert_eq!(
            v6,
            Address::Socket(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 8080))
        );
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.service(), "8080");
    }

    #[test]
    fn test_from_host_service_rejects_bad_input() {
        assert!(Address::from_host_service("example.com", "https").is_err());
        assert!(Address::from_host_service("example.com", "70000").is_err());
        assert!(Address::from_host_service("", "80").is_err());
    }
}
