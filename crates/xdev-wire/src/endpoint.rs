//! Candidate server endpoints and endpoint-list validation.
//!
//! An [`EndpointList`] is the ordered set of servers a client may connect
//! to. All list-shape rules are enforced here, synchronously, so that a bad
//! configuration never survives until connect time.

use std::fmt;

use crate::error::WireError;

/// Default X protocol port.
pub const DEFAULT_PORT: u16 = 33060;

/// Highest administrator-assignable endpoint priority.
pub const MAX_PRIORITY: u8 = 100;

/// Network address of one candidate server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// TCP host and port.
    Tcp {
        /// Hostname or IP address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// Unix domain socket path.
    Socket {
        /// Filesystem path of the socket.
        path: String,
    },
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Socket { path } => write!(f, "unix://{path}"),
        }
    }
}

/// One candidate server the client may connect to, with an optional
/// administrator-assigned priority in `0..=100` (higher is preferred).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: Address,
    priority: Option<u8>,
}

impl Endpoint {
    /// Create a TCP endpoint with no explicit priority.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: Address::Tcp {
                host: host.into(),
                port,
            },
            priority: None,
        }
    }

    /// Create a unix-socket endpoint with no explicit priority.
    pub fn socket(path: impl Into<String>) -> Self {
        Self {
            address: Address::Socket { path: path.into() },
            priority: None,
        }
    }

    /// Assign an explicit priority. Values above [`MAX_PRIORITY`] are a
    /// configuration error.
    pub fn with_priority(mut self, priority: u8) -> Result<Self, WireError> {
        if priority > MAX_PRIORITY {
            return Err(WireError::Config(format!(
                "endpoint priority {priority} out of range (0..={MAX_PRIORITY})"
            )));
        }
        self.priority = Some(priority);
        Ok(self)
    }

    /// The network address.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The explicit priority, if one was assigned.
    #[must_use]
    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    /// Whether this endpoint is a unix socket.
    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self.address, Address::Socket { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.priority {
            Some(p) => write!(f, "{} (priority {p})", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Validated, ordered list of candidate endpoints.
///
/// Invariants enforced at construction:
/// - the list is non-empty;
/// - either every endpoint carries an explicit priority or none does;
/// - socket endpoints appear alone: no multi-entry lists and no explicit
///   priorities alongside a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
}

impl EndpointList {
    /// Validate and build an endpoint list.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, WireError> {
        if endpoints.is_empty() {
            return Err(WireError::Config(
                "at least one endpoint is required".into(),
            ));
        }

        let with_priority = endpoints.iter().filter(|e| e.priority.is_some()).count();
        if with_priority != 0 && with_priority != endpoints.len() {
            return Err(WireError::Config(
                "either all endpoints must have a priority or none of them".into(),
            ));
        }

        if endpoints.iter().any(Endpoint::is_socket) {
            if endpoints.len() > 1 {
                return Err(WireError::Config(
                    "a socket endpoint cannot be combined with other endpoints".into(),
                ));
            }
            if with_priority != 0 {
                return Err(WireError::Config(
                    "a socket endpoint cannot carry an explicit priority".into(),
                ));
            }
        }

        Ok(Self { endpoints })
    }

    /// Build a single-endpoint list.
    pub fn single(endpoint: Endpoint) -> Result<Self, WireError> {
        Self::new(vec![endpoint])
    }

    /// The endpoints in configuration order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of candidate endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the list is empty (never true for a constructed list).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_out_of_range_rejected() {
        let err = Endpoint::tcp("a", DEFAULT_PORT).with_priority(101);
        assert!(matches!(err, Err(WireError::Config(_))));
        assert!(Endpoint::tcp("a", DEFAULT_PORT).with_priority(100).is_ok());
    }

    #[test]
    fn mixed_priorities_rejected() {
        let eps = vec![
            Endpoint::tcp("a", 33060).with_priority(50).unwrap(),
            Endpoint::tcp("b", 33060),
        ];
        assert!(matches!(
            EndpointList::new(eps),
            Err(WireError::Config(_))
        ));
    }

    #[test]
    fn all_or_no_priorities_accepted() {
        let all = vec![
            Endpoint::tcp("a", 33060).with_priority(50).unwrap(),
            Endpoint::tcp("b", 33060).with_priority(60).unwrap(),
        ];
        assert!(EndpointList::new(all).is_ok());

        let none = vec![Endpoint::tcp("a", 33060), Endpoint::tcp("b", 33060)];
        assert!(EndpointList::new(none).is_ok());
    }

    #[test]
    fn socket_must_stand_alone() {
        let mixed = vec![Endpoint::socket("/tmp/x.sock"), Endpoint::tcp("a", 33060)];
        assert!(matches!(
            EndpointList::new(mixed),
            Err(WireError::Config(_))
        ));

        let with_prio = Endpoint::socket("/tmp/x.sock").with_priority(10).unwrap();
        assert!(matches!(
            EndpointList::new(vec![with_prio]),
            Err(WireError::Config(_))
        ));

        assert!(EndpointList::single(Endpoint::socket("/tmp/x.sock")).is_ok());
    }

    #[test]
    fn empty_list_rejected() {
        assert!(matches!(
            EndpointList::new(Vec::new()),
            Err(WireError::Config(_))
        ));
    }
}
