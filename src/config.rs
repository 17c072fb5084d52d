//! Client configuration and endpoint parsing.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::GraphError;
use crate::types::{BoltDict, BoltValue};

/// Rows requested per PULL when iterating interactively.
pub const DEFAULT_FETCH_SIZE: i64 = 1000;

/// Credentials sent in the LOGON message (or as HTTP basic auth).
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    None,
    Basic { user: String, password: String },
}

impl AuthToken {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    /// The LOGON auth dictionary.
    pub fn to_bolt(&self) -> BoltDict {
        match self {
            Self::None => BoltDict::from([("scheme".to_string(), BoltValue::from("none"))]),
            Self::Basic { user, password } => BoltDict::from([
                ("scheme".to_string(), BoltValue::from("basic")),
                ("principal".to_string(), BoltValue::from(user.as_str())),
                ("credentials".to_string(), BoltValue::from(password.as_str())),
            ]),
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { user, .. } => write!(f, "Basic({user}, ***)"),
        }
    }
}

/// Session-level settings shared by every connection a `Graph` opens.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) user_agent: String,
    pub(crate) auth: AuthToken,
    pub(crate) database: Option<String>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) fetch_size: i64,
    pub(crate) lenient_hydration: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: concat!("graphr/", env!("CARGO_PKG_VERSION")).to_string(),
            auth: AuthToken::None,
            database: None,
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            lenient_hydration: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn auth(mut self, auth: AuthToken) -> Self {
        self.auth = auth;
        self
    }

    /// Targets a named database instead of the server default.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bounds every wait for a server response. On expiry all pending results
    /// fail and the connection is discarded.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Rows per PULL; `-1` pulls everything at once.
    pub fn fetch_size(mut self, n: i64) -> Self {
        self.fetch_size = if n <= 0 { -1 } else { n };
        self
    }

    /// Substitute `Null` (with a warning) for values the hydrator cannot type.
    pub fn lenient_hydration(mut self, lenient: bool) -> Self {
        self.lenient_hydration = lenient;
        self
    }

    pub fn get_fetch_size(&self) -> i64 {
        self.fetch_size
    }

    pub fn get_read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn get_database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

/// Wire protocol selected by an endpoint's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Bolt,
    Http,
}

/// A parsed server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses `bolt://`, `neo4j://`, `bolt+s://`, `neo4j+s://`, `http://` or
    /// `https://` URIs. Credentials in the URI are returned separately.
    pub fn parse(uri: &str) -> Result<(Self, Option<AuthToken>), GraphError> {
        let url = Url::parse(uri)
            .map_err(|e| GraphError::InvalidArgument(format!("invalid URI {uri:?}: {e}")))?;
        let (protocol, secure, default_port) = match url.scheme() {
            "bolt" | "neo4j" => (Protocol::Bolt, false, 7687),
            "bolt+s" | "bolt+ssc" | "neo4j+s" | "neo4j+ssc" => (Protocol::Bolt, true, 7687),
            "http" => (Protocol::Http, false, 7474),
            "https" => (Protocol::Http, true, 7473),
            other => {
                return Err(GraphError::InvalidArgument(format!(
                    "unsupported URI scheme {other:?}"
                )));
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost")
            .to_string();
        let auth = match (url.username(), url.password()) {
            ("", _) => None,
            (user, password) => Some(AuthToken::basic(user, password.unwrap_or(""))),
        };
        let endpoint = Self {
            protocol,
            secure,
            host,
            port: url.port().unwrap_or(default_port),
        };
        Ok((endpoint, auth))
    }

    /// `host:port`, suitable for a socket connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL for the HTTP transactional API.
    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match (self.protocol, self.secure) {
            (Protocol::Bolt, false) => "bolt",
            (Protocol::Bolt, true) => "bolt+s",
            (Protocol::Http, false) => "http",
            (Protocol::Http, true) => "https",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}
