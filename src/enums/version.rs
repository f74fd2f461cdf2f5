use std::fmt;

/// Enum representing HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    Http11,
}

impl Version {
    /// Convert the minor-version number reported by httparse
    ///
    /// # Panics
    ///
    /// Panics on versions other than 0 and 1, which httparse never
    /// produces for a successfully parsed request.
    pub fn from_httparse(v: u8) -> Version {
        match v {
            0 => Version::Http10,
            1 => Version::Http11,
            x => panic!("unexpected http version 1.{}", x),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}
