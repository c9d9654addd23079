//! Minimal `http://` URL parsing
//!
//! ```rust
//! use libcellular::network::application::http::Url;
//!
//! let url = Url::parse("http://user:pw@harvest.example.com:8080/v1/items?limit=5").unwrap();
//! assert_eq!(url.host, "harvest.example.com");
//! assert_eq!(url.port, 8080);
//! assert_eq!(url.target, "/v1/items?limit=5");
//! assert_eq!(url.userinfo, Some("user:pw"));
//! ```

/// Default port of the `http` scheme
pub const DEFAULT_PORT: u16 = 80;

/// Components of an `http://` URL, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    /// Path and query; `/` when the URL has neither
    pub target: &'a str,
    /// `user:password` before the host
    pub userinfo: Option<&'a str>,
}

/// Reasons a URL is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlError {
    /// Anything but `http://`
    UnsupportedScheme,
    /// Empty host
    MissingHost,
    /// Port is not a number in 1..=65535
    InvalidPort,
}

#[cfg(feature = "defmt")]
impl defmt::Format for UrlError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            UrlError::UnsupportedScheme => defmt::write!(f, "UnsupportedScheme"),
            UrlError::MissingHost => defmt::write!(f, "MissingHost"),
            UrlError::InvalidPort => defmt::write!(f, "InvalidPort"),
        }
    }
}

impl<'a> Url<'a> {
    pub fn parse(input: &'a str) -> Result<Self, UrlError> {
        let input = input.trim();
        let (scheme, rest) = input.split_once("://").ok_or(UrlError::UnsupportedScheme)?;
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(UrlError::UnsupportedScheme);
        }

        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, target) = rest.split_at(split);
        let target = if target.is_empty() { "/" } else { target };

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| UrlError::InvalidPort)?;
                if port == 0 {
                    return Err(UrlError::InvalidPort);
                }
                (host, port)
            }
            None => (hostport, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(UrlError::MissingHost);
        }

        Ok(Self {
            host,
            port,
            target,
            userinfo,
        })
    }
}
