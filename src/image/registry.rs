use crate::errors::ImageError;
use regex::Regex;
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    str,
    str::FromStr,
};
use url::Url;

/// Network location of a Docker Registry v2 server
///
/// This is a domain name or address, with an optional port. The protocol is
/// guessed the same way Docker does it: a domain with a dot in it is reached
/// over https, anything else (`localhost:5000`, `registry:5000`) over plain
/// http. The guess can be overridden with [Registry::with_https].
///
/// For information on running your own registry server for development, see <https://docs.docker.com/registry/deploying/>
#[derive(Clone)]
pub struct Registry {
    serialized: String,
    domain_pos: Range<usize>,
    port: Option<u16>,
    is_https: bool,
}

impl Registry {
    /// Returns a reference to the existing string representation of a
    /// [Registry], the domain and optional port
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [Registry]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Registry::regex_str(),)).unwrap();
        }
        let captures = match RE.captures(s) {
            None => return Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(captures) => captures,
        };
        let domain = match captures.name("reg_d") {
            None => return Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            Some(domain) => domain,
        };
        let port = match captures.name("reg_p") {
            None => None,
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| ImageError::InvalidReferenceFormat(s.to_owned()))?,
            ),
        };
        Ok(Registry {
            serialized: s.to_owned(),
            domain_pos: domain.range(),
            is_https: domain.as_str().contains('.'),
            port,
        })
    }

    /// Build a registry location from separate host and port values
    pub fn from_parts(host: &str, port: Option<u16>) -> Result<Self, ImageError> {
        match port {
            None => Registry::parse(host),
            Some(port) => Registry::parse(&format!("{}:{}", host, port)),
        }
    }

    /// Returns a copy of this registry with the protocol fixed explicitly
    pub fn with_https(mut self, is_https: bool) -> Self {
        self.is_https = is_https;
        self
    }

    /// Returns a reference to the domain portion of the string
    pub fn domain_str(&self) -> &str {
        &self.serialized[self.domain_pos.clone()]
    }

    /// Returns the port, if present
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Are we using https to connect to the registry?
    pub fn is_https(&self) -> bool {
        self.is_https
    }

    /// The protocol to use, either "http" or "https"
    pub fn protocol_str(&self) -> &str {
        if self.is_https() {
            "https"
        } else {
            "http"
        }
    }

    /// Root URL that all `/v2/` request paths are resolved against
    pub fn base_url(&self) -> Result<Url, ImageError> {
        Ok(Url::parse(&format!(
            "{}://{}/",
            self.protocol_str(),
            self.serialized
        ))?)
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<reg>", // Main registry match group
            /*  */ "(?P<reg_d>", // registry domain match group
            /* -- */ "(?:", // First domain component
            /* -- -- */ "[a-zA-Z0-9]|",
            /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- */ ")",
            /* -- */ "(?:", // Optional additional domain components
            /* -- -- */ "\\.",
            /* -- -- */ "(?:",
            /* -- -- -- */ "[a-zA-Z0-9]|",
            /* -- -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- -- */ ")",
            /* -- */ ")*",
            /*  */ ")", // end registry domain match group
            /*  */ "(?:", // Optional port number
            /* -- */ "[:]",
            /* -- */ "(?P<reg_p>", // Registry port group
            /* -- -- */ "[0-9]{1,5}",
            /* -- */ ")",
            /*  */ ")?",
            ")",
        )
    }
}

impl Eq for Registry {}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized) && self.is_https == other.is_https
    }
}

impl FromStr for Registry {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Registry::parse(s)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol_str(), self)
    }
}

impl Hash for Registry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
        self.is_https.hash(state);
    }
}

impl Ord for Registry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized
            .cmp(&other.serialized)
            .then(self.is_https.cmp(&other.is_https))
    }
}

impl PartialOrd for Registry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
