//! Endpoint addresses: a numeric IPv4 host plus a port.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Numeric host meaning "every local interface". Only valid for binding.
pub const HOST_ANY: u32 = 0;
/// Numeric host of the loopback interface (127.0.0.1).
pub const HOST_LOCALHOST: u32 = 0x7F00_0001;
/// Numeric host of the limited broadcast address.
pub const HOST_BROADCAST: u32 = u32::MAX;
/// Port meaning "let the engine pick one".
pub const PORT_ANY: u16 = 0;

/// Host/port pair identifying one transport endpoint.
///
/// The host is kept in host byte order, so `Address::new(HOST_LOCALHOST, p)`
/// and `Address::resolve("127.0.0.1", p)` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address {
    host: u32,
    port: u16,
}

impl Address {
    pub const fn new(host: u32, port: u16) -> Self {
        Self { host, port }
    }

    /// Wildcard host on the given port; used to bind on every interface.
    pub const fn any(port: u16) -> Self {
        Self::new(HOST_ANY, port)
    }

    pub const fn localhost(port: u16) -> Self {
        Self::new(HOST_LOCALHOST, port)
    }

    /// Resolve a hostname (or dotted IPv4 literal) through the platform resolver.
    /// Only IPv4 results are considered.
    pub fn resolve(host: &str, port: u16) -> Result<Self, AddressError> {
        let mut address = Self::new(HOST_ANY, port);
        address.set_host(host)?;
        Ok(address)
    }

    /// Parse and resolve a `"host:port"` endpoint string.
    pub fn from_endpoint(endpoint: &str) -> Result<Self, AddressError> {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| AddressError::Malformed(endpoint.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::Malformed(endpoint.to_string()))?;
        Self::resolve(host, port)
    }

    /// Replace the host with the first IPv4 address `hostname` resolves to.
    pub fn set_host(&mut self, hostname: &str) -> Result<(), AddressError> {
        if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
            self.host = u32::from(ip);
            return Ok(());
        }
        let candidates = (hostname, self.port)
            .to_socket_addrs()
            .map_err(|source| AddressError::Resolution {
                host: hostname.to_string(),
                source,
            })?;
        let ip = candidates
            .filter_map(|candidate| match candidate.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| AddressError::Resolution {
                host: hostname.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no IPv4 address for host"),
            })?;
        self.host = u32::from(ip);
        Ok(())
    }

    pub fn set_host_numeric(&mut self, host: u32) {
        self.host = host;
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn host(&self) -> u32 {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    pub fn is_any(&self) -> bool {
        self.host == HOST_ANY
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl TryFrom<SocketAddr> for Address {
    type Error = AddressError;

    /// IPv4 endpoints, including IPv4-mapped IPv6 ones.
    fn try_from(addr: SocketAddr) -> Result<Self, AddressError> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(Self::new(u32::from(ip), v6.port())),
                None => Err(AddressError::Malformed(addr.to_string())),
            },
        }
    }
}

impl From<Address> for SocketAddrV4 {
    fn from(addr: Address) -> Self {
        SocketAddrV4::new(addr.ip(), addr.port)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        SocketAddr::V4(addr.into())
    }
}

/// Error building an address from a hostname or endpoint string.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("failed to resolve hostname {host:?}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed endpoint {0:?}, expected host:port")]
    Malformed(String),
}
