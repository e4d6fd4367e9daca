use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::BridgeError;

/// Where a bridge listener accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddr {
    /// TCP address for the channel at 0-based `index`: `base_port + index`.
    pub fn for_channel(ip: IpAddr, base_port: u16, index: usize) -> Result<Self, BridgeError> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| base_port.checked_add(offset))
            .map(|port| ListenAddr::Tcp(SocketAddr::new(ip, port)))
            .ok_or_else(|| BridgeError::InvalidAddr(format!("{ip}:{base_port}+{index}")))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{addr}"),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for ListenAddr {
    type Err = BridgeError;

    /// `unix:<path>` or an absolute path is a Unix socket; anything else must
    /// be `ip:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(BridgeError::InvalidAddr(s.to_string()));
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') {
            return Ok(ListenAddr::Unix(PathBuf::from(s)));
        }
        s.parse::<SocketAddr>()
            .map(ListenAddr::Tcp)
            .map_err(|_| BridgeError::InvalidAddr(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn parses_tcp() {
        let addr: ListenAddr = "127.0.0.1:1300".parse().unwrap();
        assert_eq!(
            addr,
            ListenAddr::Tcp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1300))
        );
        assert_eq!(addr.to_string(), "127.0.0.1:1300");
    }

    #[test]
    fn parses_unix_forms() {
        let prefixed: ListenAddr = "unix:/tmp/ch1.sock".parse().unwrap();
        let bare: ListenAddr = "/tmp/ch1.sock".parse().unwrap();
        assert_eq!(prefixed, bare);
        assert_eq!(prefixed.to_string(), "unix:/tmp/ch1.sock");
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-an-addr".parse::<ListenAddr>().is_err());
        assert!("unix:".parse::<ListenAddr>().is_err());
        assert!("localhost:1300".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn channel_ports_count_up_from_base() {
        let ip = IpAddr::from(Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            ListenAddr::for_channel(ip, 1300, 5).unwrap(),
            ListenAddr::Tcp(SocketAddr::new(ip, 1305))
        );
        assert!(ListenAddr::for_channel(ip, u16::MAX, 1).is_err());
    }
}
