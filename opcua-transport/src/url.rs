//! `opc.tcp://` endpoint URLs

use opcua_core::{UaError, UaResult};
use std::fmt;
use std::str::FromStr;

/// Default port of the UA-TCP protocol
pub const DEFAULT_PORT: u16 = 4840;

const SCHEME: &str = "opc.tcp://";

/// Parsed endpoint URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    pub host: String,
    pub port: u16,
    /// Path including the leading `/`, empty if none
    pub path: String,
}

impl EndpointUrl {
    /// `host:port` for socket connection
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for EndpointUrl {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| UaError::Config(format!("invalid endpoint url {:?}: {}", s, reason));
        let scheme_len = SCHEME.len();
        if s.len() < scheme_len || !s[..scheme_len].eq_ignore_ascii_case(SCHEME) {
            return Err(invalid("scheme must be opc.tcp"));
        }
        let rest = &s[scheme_len..];
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            let port = match after.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid("bad port"))?,
                None if after.is_empty() => DEFAULT_PORT,
                None => return Err(invalid("bad port")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
                None => (authority, DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", SCHEME, self.socket_address(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_port_and_path() {
        let url: EndpointUrl = "opc.tcp://plc.local:48010/UA/Server".parse().unwrap();
        assert_eq!(url.host, "plc.local");
        assert_eq!(url.port, 48010);
        assert_eq!(url.path, "/UA/Server");
        assert_eq!(url.socket_address(), "plc.local:48010");
    }

    #[test]
    fn test_default_port() {
        let url: EndpointUrl = "opc.tcp://10.0.0.5".parse().unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.to_string(), "opc.tcp://10.0.0.5:4840");
    }

    #[test]
    fn test_ipv6() {
        let url: EndpointUrl = "opc.tcp://[::1]:4841/".parse().unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.socket_address(), "[::1]:4841");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!("http://host:80".parse::<EndpointUrl>().is_err());
        assert!("opc.tcp://:4840".parse::<EndpointUrl>().is_err());
        assert!("opc.tcp://host:port".parse::<EndpointUrl>().is_err());
    }
}
