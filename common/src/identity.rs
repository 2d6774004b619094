use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TrackerError;

/// Public identity of a registered actor. Its address is the lowercase hex
/// of the verifying key.
#[derive(Debug, Clone, Copy)]
pub struct ActorId(pub VerifyingKey);

impl ActorId {
    pub fn address(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn from_address(address: &str) -> Result<Self, TrackerError> {
        let bytes = hex::decode(address.trim().trim_start_matches("0x"))
            .map_err(|e| TrackerError::InvalidPayload(format!("actor address: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            TrackerError::InvalidPayload("actor address must be 32 bytes".into())
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| TrackerError::InvalidPayload(format!("actor address: {e}")))?;
        Ok(ActorId(key))
    }
}

impl PartialEq for ActorId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}
impl Eq for ActorId {}

impl PartialOrd for ActorId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ActorId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}
impl Hash for ActorId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl FromStr for ActorId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_address(s)
    }
}

impl Serialize for ActorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.address())
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ActorId::from_address(&s).map_err(serde::de::Error::custom)
    }
}

/// Role an actor plays in the supply chain. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Manufacturer,
    Distributor,
    Provider,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Manufacturer => "Manufacturer",
            Role::Distributor => "Distributor",
            Role::Provider => "Provider",
        };
        f.write_str(s)
    }
}

/// A registered supply-chain participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    pub company_name: String,
    pub contact_email: String,
    pub registered_at: DateTime<Utc>,
}

/// Signature over a transition request, together with the claimed signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub signer: ActorId,
    #[serde(with = "signature_hex")]
    pub signature: Signature,
}

impl Authorization {
    pub fn verify(&self, message: &[u8]) -> bool {
        #[cfg(feature = "dev")]
        {
            let _ = message;
            #[allow(clippy::needless_return)]
            return true;
        }
        #[cfg(not(feature = "dev"))]
        {
            use ed25519_dalek::Verifier;
            self.signer.0.verify(message, &self.signature).is_ok()
        }
    }
}

mod signature_hex {
    use ed25519_dalek::Signature;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(sig.to_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Signature, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Signature::from_bytes(&bytes))
    }
}

/// Deterministic signing key for a named dev actor.
#[cfg(feature = "dev")]
pub fn dev_signing_key(name: &str) -> ed25519_dalek::SigningKey {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let salt = name.trim().to_lowercase();
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), b"pharmachain-dev-actor");
    let mut seed = [0u8; 32];
    hk.expand(b"pharmachain-signing-key-v1", &mut seed)
        .expect("HKDF expand should not fail for 32 bytes");
    ed25519_dalek::SigningKey::from_bytes(&seed)
}
