use crate::error::{Error, Result};

/// Version byte carried by serialized access grants.
pub const GRANT_VERSION: u8 = 0;

/// A parsed access grant: a self-contained capability that can open a
/// project on the object store.
///
/// The wire form is base58-check with version byte zero; the payload is the
/// serialized capability (macaroon-style caveats included). The payload is
/// opaque to the gateway; backends interpret it when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    serialized: String,
    payload: Vec<u8>,
}

impl Access {
    /// Parse a serialized access grant.
    pub fn parse(serialized: &str) -> Result<Self> {
        let decoded = bs58::decode(serialized)
            .with_check(None)
            .into_vec()
            .map_err(|err| Error::InvalidAccess(err.to_string()))?;
        match decoded.split_first() {
            Some((&GRANT_VERSION, payload)) => Ok(Self {
                serialized: serialized.to_string(),
                payload: payload.to_vec(),
            }),
            Some((version, _)) => Err(Error::InvalidAccess(format!(
                "unexpected version {version}"
            ))),
            None => Err(Error::InvalidAccess("empty".to_string())),
        }
    }

    /// The wire form this grant was parsed from.
    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    /// The opaque capability payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Base58-check encode with the given version byte.
    fn encode(version: u8, payload: &[u8]) -> String {
        bs58::encode(payload)
            .with_check_version(version)
            .into_string()
    }

    #[test]
    fn parse_roundtrip() {
        let serialized = encode(GRANT_VERSION, b"capability bytes");
        let access = Access::parse(&serialized).unwrap();
        assert_eq!(access.serialized(), serialized);
        assert_eq!(access.payload(), b"capability bytes");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Access::parse("BADACCESS"),
            Err(Error::InvalidAccess(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let serialized = encode(1, b"not a grant");
        assert!(matches!(
            Access::parse(&serialized),
            Err(Error::InvalidAccess(_))
        ));
    }
}
