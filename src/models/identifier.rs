// src/models/identifier.rs
//! DID strings and the method tags this engine understands.
//!
//! A DID has the form `did:<method>:<method-specific-id>`. Parsing here only
//! checks the generic syntax and that the method is one of the supported
//! ones; each provider validates the method-specific id against its own
//! address grammar.

use crate::error::{DidError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

static DID_SYNTAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^did:([a-z0-9]+):((?:[A-Za-z0-9._-]|%[0-9A-Fa-f]{2})+(?::(?:[A-Za-z0-9._-]|%[0-9A-Fa-f]{2})+)*)$")
        .expect("static DID regex")
});

/// DID method tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DidMethod {
    /// Ethereum-style chain, `did:ethr:0x…`
    Ethr,
    /// Generic key-based scheme, `did:key:z…`
    Key,
    /// Identity-pallet ledger, `did:kilt:<ss58>`. The only registry-backed method.
    Kilt,
    /// EVM-compatible parachain, `did:moonbeam:0x…`
    Moonbeam,
}

impl DidMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidMethod::Ethr => "ethr",
            DidMethod::Key => "key",
            DidMethod::Kilt => "kilt",
            DidMethod::Moonbeam => "moonbeam",
        }
    }

    /// Whether documents of this method are anchored in an on-chain registry.
    pub fn has_registry(&self) -> bool {
        matches!(self, DidMethod::Kilt)
    }
}

impl fmt::Display for DidMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DidMethod {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ethr" => Ok(DidMethod::Ethr),
            "key" => Ok(DidMethod::Key),
            "kilt" => Ok(DidMethod::Kilt),
            "moonbeam" => Ok(DidMethod::Moonbeam),
            other => Err(DidError::validation(format!(
                "unsupported DID method '{other}'"
            ))),
        }
    }
}

/// A syntactically valid DID of a supported method.
///
/// # Format
/// ```text
/// did:<method>:<method-specific-id>
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    method: DidMethod,
    method_specific_id: String,
}

impl Did {
    /// Builds a DID from its parts. The id is not checked against the method grammar.
    pub fn new(method: DidMethod, method_specific_id: impl Into<String>) -> Self {
        Did {
            method,
            method_specific_id: method_specific_id.into(),
        }
    }

    /// Parses a DID string.
    ///
    /// # Errors
    /// `Validation` if the string does not follow the DID syntax or names an
    /// unsupported method.
    pub fn parse(did: &str) -> Result<Self> {
        let captures = DID_SYNTAX
            .captures(did)
            .ok_or_else(|| DidError::validation(format!("malformed DID '{did}'")))?;
        let method = captures[1].parse::<DidMethod>()?;
        Ok(Did {
            method,
            method_specific_id: captures[2].to_string(),
        })
    }

    pub fn method(&self) -> DidMethod {
        self.method
    }

    pub fn method_specific_id(&self) -> &str {
        &self.method_specific_id
    }

    /// DID URL pointing at a fragment of this DID's document.
    pub fn with_fragment(&self, fragment: &str) -> String {
        format!("{self}#{fragment}")
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method, self.method_specific_id)
    }
}

impl FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self> {
        Did::parse(s)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Did::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_methods() {
        let did = Did::parse("did:kilt:5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY").unwrap();
        assert_eq!(did.method(), DidMethod::Kilt);
        assert_eq!(
            did.method_specific_id(),
            "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"
        );

        let did = Did::parse("did:ethr:sepolia:0xb9c5714089478a327f09197987f16f9e5d936e8a").unwrap();
        assert_eq!(did.method(), DidMethod::Ethr);
        assert_eq!(
            did.to_string(),
            "did:ethr:sepolia:0xb9c5714089478a327f09197987f16f9e5d936e8a"
        );
    }

    #[test]
    fn test_fragment_url() {
        let did = Did::new(DidMethod::Key, "z6Mk");
        assert_eq!(did.with_fragment("z6Mk"), "did:key:z6Mk#z6Mk");
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        assert!(matches!(
            Did::parse("did:invalid:address"),
            Err(DidError::Validation(_))
        ));
        for bad in ["", "did:", "did:kilt:", "did:kilt:abc def", "kilt:abc", "did:KILT:abc"] {
            assert!(matches!(Did::parse(bad), Err(DidError::Validation(_))), "{bad}");
        }
    }
}
