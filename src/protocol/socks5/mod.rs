//! SOCKS5 Protocol implementation
//!
//! Only the no-authentication method and the CONNECT command are served.

mod state;

pub use state::{AuthRequest, ConnectionEstablished, ConnectionRequest, ReadyToTransfer};

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::common::Address;
use crate::error::{Error, Result};
use crate::session::State;

use super::ProxyProtocol;

pub const SOCKS5_VERSION: u8 = 0x05;
pub const AUTH_NONE: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 protocol handler
pub struct Socks5Protocol;

impl ProxyProtocol for Socks5Protocol {
    fn initial_state(&self) -> Box<dyn State> {
        Box::new(AuthRequest)
    }

    fn name(&self) -> &'static str {
        "socks5"
    }
}

/// Client greeting: `[version, nmethods, methods...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::Protocol("socks5 greeting too short".into()));
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(Error::Protocol(format!(
                "Unsupported SOCKS version: {}",
                buf[0]
            )));
        }

        let nmethods = buf[1] as usize;
        if nmethods == 0 || buf.len() != 2 + nmethods {
            return Err(Error::Protocol(format!(
                "socks5 greeting: {} methods announced, {} bytes received",
                nmethods,
                buf.len()
            )));
        }

        Ok(Self {
            methods: buf[2..].to_vec(),
        })
    }

    pub fn offers(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

/// Method selection reply: `[version, method]`
pub fn method_reply(method: u8) -> [u8; 2] {
    [SOCKS5_VERSION, method]
}

/// CONNECT request: `[version, command, reserved, atyp, addr..., port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub address: Address,
}

impl ConnectRequest {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::Protocol("bad request packet".into()));
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(Error::Protocol(format!(
                "bad request packet: version {}",
                buf[0]
            )));
        }
        if buf[1] != CMD_CONNECT {
            return Err(Error::Protocol(format!(
                "bad request packet: unsupported command {}",
                buf[1]
            )));
        }
        if buf[2] != 0 {
            return Err(Error::Protocol("bad request packet: reserved byte set".into()));
        }

        let body = &buf[4..];
        let address = match buf[3] {
            ATYP_IPV4 => {
                let (ip, port) = split_exact::<4>(body)?;
                Address::Socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port))
            }
            ATYP_IPV6 => {
                let (ip, port) = split_exact::<16>(body)?;
                Address::Socket(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port))
            }
            ATYP_DOMAIN => {
                let len = body.first().copied().unwrap_or(0) as usize;
                if len == 0 || body.len() != 1 + len + 2 {
                    return Err(Error::Protocol("bad remote address format".into()));
                }
                let domain = std::str::from_utf8(&body[1..1 + len])
                    .map_err(|_| Error::Protocol("bad remote address format".into()))?;
                let port = u16::from_be_bytes([body[1 + len], body[2 + len]]);
                Address::Domain(domain.to_string(), port)
            }
            atyp => {
                return Err(Error::Protocol(format!(
                    "bad remote address format: address type {}",
                    atyp
                )));
            }
        };

        Ok(Self { address })
    }

    /// Encode the reply for this request: same address, status in place
    /// of the command byte
    pub fn reply(&self, code: ReplyCode) -> Vec<u8> {
        let mut out = vec![SOCKS5_VERSION, code as u8, 0x00];
        match &self.address {
            Address::Socket(SocketAddr::V4(addr)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&addr.ip().octets());
            }
            Address::Socket(SocketAddr::V6(addr)) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&addr.ip().octets());
            }
            Address::Domain(domain, _) => {
                out.push(ATYP_DOMAIN);
                out.push(domain.len() as u8);
                out.extend_from_slice(domain.as_bytes());
            }
        }
        out.extend_from_slice(&self.address.port().to_be_bytes());
        out
    }
}

fn split_exact<const N: usize>(body: &[u8]) -> Result<([u8; N], u16)> {
    if body.len() != N + 2 {
        return Err(Error::Protocol("bad remote address format".into()));
    }
    let mut ip = [0u8; N];
    ip.copy_from_slice(&body[..N]);
    Ok((ip, u16::from_be_bytes([body[N], body[N + 1]])))
}

/// Reply status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
}

impl ReplyCode {
    /// Status reported to the client when the upstream connect fails
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Resolve { .. } | Error::NoAddress(_) => ReplyCode::HostUnreachable,
            Error::Io(e) => match e.kind() {
                ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
                ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionReset => ReplyCode::ConnectionRefused,
                ErrorKind::TimedOut => ReplyCode::TtlExpired,
                _ => ReplyCode::GeneralFailure,
            },
            _ => ReplyCode::GeneralFailure,
        }
    }
}
