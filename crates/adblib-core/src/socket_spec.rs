//! Socket specifications used by forward and reverse requests

use std::fmt;
use std::str::FromStr;

/// Endpoint of a forward/reverse rule, e.g. `tcp:8080` or `localabstract:foo`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketSpec {
    Tcp(u16),
    VSock { cid: u32, port: u32 },
    AcceptFd(u32),
    Local(String),
    LocalReserved(String),
    LocalFileSystem(String),
    LocalAbstract(String),
    /// Any string not recognized above, kept verbatim
    PassThrough(String),
}

impl SocketSpec {
    pub fn to_query_string(&self) -> String {
        match self {
            SocketSpec::Tcp(port) => format!("tcp:{}", port),
            SocketSpec::VSock { cid, port } => format!("vsock:{}:{}", cid, port),
            SocketSpec::AcceptFd(fd) => format!("acceptfd:{}", fd),
            SocketSpec::Local(path) => format!("local:{}", path),
            SocketSpec::LocalReserved(name) => format!("localreserved:{}", name),
            SocketSpec::LocalFileSystem(name) => format!("localfilesystem:{}", name),
            SocketSpec::LocalAbstract(name) => format!("localabstract:{}", name),
            SocketSpec::PassThrough(raw) => raw.clone(),
        }
    }

    /// Parse a query string; never fails, unknown forms become `PassThrough`
    pub fn from_query_string(raw: &str) -> Self {
        Self::parse_known(raw).unwrap_or_else(|| SocketSpec::PassThrough(raw.to_string()))
    }

    fn parse_known(raw: &str) -> Option<Self> {
        let (scheme, rest) = raw.split_once(':')?;
        let spec = match scheme {
            "tcp" => SocketSpec::Tcp(parse_canonical(rest)?),
            "vsock" => {
                let (cid, port) = rest.split_once(':')?;
                SocketSpec::VSock {
                    cid: parse_canonical(cid)?,
                    port: parse_canonical(port)?,
                }
            }
            "acceptfd" => SocketSpec::AcceptFd(parse_canonical(rest)?),
            "local" => SocketSpec::Local(rest.to_string()),
            "localreserved" => SocketSpec::LocalReserved(rest.to_string()),
            "localfilesystem" => SocketSpec::LocalFileSystem(rest.to_string()),
            "localabstract" => SocketSpec::LocalAbstract(rest.to_string()),
            _ => return None,
        };
        Some(spec)
    }
}

/// Parse a number only if it prints back identically (no `+1`, no `007`)
fn parse_canonical<T: FromStr + ToString>(s: &str) -> Option<T> {
    let value: T = s.parse().ok()?;
    (value.to_string() == s).then_some(value)
}

impl fmt::Display for SocketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

impl FromStr for SocketSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_query_string(s))
    }
}
