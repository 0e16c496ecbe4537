//! Full names -- `<namespace>.<local>` addressing of Components.
//!
//! Either part may be empty on the wire; receivers fill missing parts with
//! their defaults. The local name `COORDINATOR` always refers to the
//! Coordinator of the namespace.

use std::fmt;

use crate::ProtocolError;

/// Reserved local name of a namespace's Coordinator.
pub const COORDINATOR_LOCAL_NAME: &str = "COORDINATOR";

/// A component address: namespace and local name, each possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FullName {
    pub namespace: String,
    pub local: String,
}

impl FullName {
    /// Build a full name from both parts. Neither part may contain a dot.
    pub fn new(namespace: &str, local: &str) -> Result<Self, ProtocolError> {
        if namespace.contains('.') || local.contains('.') {
            return Err(ProtocolError::InvalidName(format!(
                "segment contains a dot: {namespace}.{local}"
            )));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            local: local.to_owned(),
        })
    }

    /// A name without a namespace; the first Coordinator fills it in.
    pub fn local_only(local: &str) -> Result<Self, ProtocolError> {
        Self::new("", local)
    }

    /// The Coordinator of `namespace`.
    pub fn coordinator(namespace: &str) -> Result<Self, ProtocolError> {
        Self::new(namespace, COORDINATOR_LOCAL_NAME)
    }

    /// Parse `namespace.local`, `local`, or the empty string.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw.split_once('.') {
            None => Ok(Self {
                namespace: String::new(),
                local: raw.to_owned(),
            }),
            Some((namespace, local)) => {
                if local.contains('.') {
                    return Err(ProtocolError::InvalidName(format!(
                        "more than one dot in {raw:?}"
                    )));
                }
                Ok(Self {
                    namespace: namespace.to_owned(),
                    local: local.to_owned(),
                })
            }
        }
    }

    /// Parse a name frame read from the wire.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        let s = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::InvalidName("name frame is not UTF-8".into()))?;
        Self::parse(s)
    }

    /// Wire representation of this name.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Copy with an empty namespace replaced by `default`.
    pub fn with_namespace_default(&self, default: &str) -> Self {
        if self.namespace.is_empty() {
            Self {
                namespace: default.to_owned(),
                local: self.local.clone(),
            }
        } else {
            self.clone()
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.local == COORDINATOR_LOCAL_NAME
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.local.is_empty()
    }
}

impl fmt::Display for FullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{}.{}", self.namespace, self.local)
        }
    }
}

impl std::str::FromStr for FullName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_parts() {
        let name = FullName::parse("N1.pump").unwrap();
        assert_eq!(name.namespace, "N1");
        assert_eq!(name.local, "pump");
        assert_eq!(name.to_string(), "N1.pump");
    }

    #[test]
    fn test_parse_local_only() {
        let name = FullName::parse("COORDINATOR").unwrap();
        assert_eq!(name.namespace, "");
        assert_eq!(name.local, "COORDINATOR");
        assert!(name.is_coordinator());
        assert_eq!(name.to_string(), "COORDINATOR");
    }

    #[test]
    fn test_parse_empty() {
        let name = FullName::parse("").unwrap();
        assert!(name.is_empty());
        assert_eq!(name.to_bytes(), b"");
    }

    #[test]
    fn test_parse_too_many_dots() {
        assert!(FullName::parse("a.b.c").is_err());
    }

    #[test]
    fn test_new_rejects_dotted_segments() {
        assert!(FullName::new("a.b", "c").is_err());
        assert!(FullName::new("a", "b.c").is_err());
    }

    #[test]
    fn test_namespace_default_fills_empty_only() {
        let bare = FullName::local_only("logger").unwrap();
        assert_eq!(bare.with_namespace_default("N1").to_string(), "N1.logger");

        let full = FullName::new("N2", "logger").unwrap();
        assert_eq!(full.with_namespace_default("N1").to_string(), "N2.logger");
    }

    #[test]
    fn test_bytes_roundtrip() {
        for raw in ["", "c1", "N1.c1", "N1.COORDINATOR"] {
            let name = FullName::parse(raw).unwrap();
            assert_eq!(FullName::from_bytes(&name.to_bytes()).unwrap(), name);
        }
    }

    #[test]
    fn test_from_bytes_rejects_invalid_utf8() {
        assert!(FullName::from_bytes(&[0xff, 0xfe]).is_err());
    }
}
