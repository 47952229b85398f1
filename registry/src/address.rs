use std::borrow::Borrow;
use std::fmt;

const SCHEME_SEPARATOR: &str = "://";

/// Strip an optional `scheme://` prefix from a server address
///
/// Master listings report addresses like `tw-0.6+udp://1.2.3.4:8303` while
/// game clients usually only know `1.2.3.4:8303`; both must resolve to the
/// same server.
pub fn normalize(address: &str) -> &str {
    match address.find(SCHEME_SEPARATOR) {
        Some(index) => &address[index + SCHEME_SEPARATOR.len()..],
        None => address,
    }
}

/// Canonical identity of a game server (a normalized address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey(String);

impl ServerKey {
    pub fn new(address: &str) -> Self {
        Self(normalize(address).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ServerKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerKey {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_bare_address_unchanged() {
        assert_eq!(normalize("1.13.79.127:8304"), "1.13.79.127:8304");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_scheme_stripped() {
        assert_eq!(normalize("tw-0.6+udp://1.13.79.127:8304"), "1.13.79.127:8304");
        assert_eq!(normalize("tw-0.7+udp://[::1]:8303"), "[::1]:8303");
    }

    #[test]
    fn test_only_first_separator_stripped() {
        assert_eq!(normalize("a://b://c"), "b://c");
    }

    #[test]
    fn test_variants_collide() {
        let bare = ServerKey::new("10.0.0.1:8303");
        let udp = ServerKey::new("tw-0.6+udp://10.0.0.1:8303");
        let other = ServerKey::new("tw-0.7+udp://10.0.0.1:8303");

        assert_eq!(bare, udp);
        assert_eq!(udp, other);
        assert_eq!(bare.to_string(), "10.0.0.1:8303");
    }

    #[test]
    fn test_lookup_by_str() {
        let mut keys = HashMap::new();
        keys.insert(ServerKey::new("tw-0.6+udp://10.0.0.1:8303"), 1);

        assert_eq!(keys.get("10.0.0.1:8303"), Some(&1));
        assert_eq!(keys.get(normalize("udp://10.0.0.1:8303")), Some(&1));
    }
}
