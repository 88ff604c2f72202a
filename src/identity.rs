use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use sha2::{Digest, Sha256};

use crate::error::{Result, TabulaError};

// Multihash identity code + 32-byte length. Using the identity hash means a
// profile ID embeds the public key, so foreign log signatures are verifiable
// from the ID alone.
const MULTIHASH_IDENTITY: u8 = 0x00;
const ED25519_PUBKEY_LEN: u8 = 32;

/// A user identity: a username, a stable profile ID derived from the public
/// key, and, for the local user, the signing key itself. Profiles built from
/// a bare ID are read-only and can only verify.
pub struct Profile {
    pub username: String,
    pub id: String,
    keypair: Option<Keypair>,
}

impl Profile {
    /// Creates a signing profile from a 32-byte secret seed
    pub fn from_seed(username: &str, seed: [u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(&seed)
            .map_err(|e| TabulaError::IllegalArgument(format!("Invalid key seed: {}", e)))?;
        let public = PublicKey::from(&secret);
        let id = encode_profile_id(&public);

        Ok(Self {
            username: username.to_string(),
            id,
            keypair: Some(Keypair { secret, public }),
        })
    }

    /// Creates a verify-only profile for a remote user
    pub fn readonly(username: &str, id: &str) -> Self {
        Self {
            username: username.to_string(),
            id: id.to_string(),
            keypair: None,
        }
    }

    pub fn can_sign(&self) -> bool {
        self.keypair.is_some()
    }

    /// Signs the message with the profile's private key, or returns an
    /// `IllegalState` error for read-only profiles.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match &self.keypair {
            Some(keypair) => Ok(keypair.sign(message).to_bytes().to_vec()),
            None => Err(TabulaError::IllegalState(format!(
                "Profile {} does not hold a private key",
                self.username
            ))),
        }
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        decode_profile_id(&self.id)
    }
}

/// Renders an ed25519 public key as a base58btc identity multihash
pub fn encode_profile_id(public: &PublicKey) -> String {
    let mut bytes = Vec::with_capacity(2 + ED25519_PUBKEY_LEN as usize);
    bytes.push(MULTIHASH_IDENTITY);
    bytes.push(ED25519_PUBKEY_LEN);
    bytes.extend_from_slice(public.as_bytes());
    bs58::encode(bytes).into_string()
}

/// Recovers the public key embedded in a profile ID
pub fn decode_profile_id(id: &str) -> Result<PublicKey> {
    let bytes = bs58::decode(id)
        .into_vec()
        .map_err(|e| TabulaError::IllegalArgument(format!("Invalid profile ID {}: {}", id, e)))?;

    if bytes.len() != 2 + ED25519_PUBKEY_LEN as usize
        || bytes[0] != MULTIHASH_IDENTITY
        || bytes[1] != ED25519_PUBKEY_LEN
    {
        return Err(TabulaError::IllegalArgument(format!(
            "Profile ID {} is not an identity multihash",
            id
        )));
    }

    PublicKey::from_bytes(&bytes[2..])
        .map_err(|e| TabulaError::IllegalArgument(format!("Invalid profile ID {}: {}", id, e)))
}

/// Verifies an ed25519 signature against the public key embedded in
/// `profile_id`. The failure is the fatal `SignatureInvalid` sentinel.
pub fn verify_signature(profile_id: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    let public = decode_profile_id(profile_id)?;
    let signature = Signature::try_from(signature)
        .map_err(|e| TabulaError::SignatureInvalid(format!("Malformed signature: {}", e)))?;

    public
        .verify(message, &signature)
        .map_err(|_| TabulaError::SignatureInvalid(format!("Author {}", profile_id)))
}

/// Hashes arbitrary input down to a 32-byte seed. Used by tests and callers
/// that derive throwaway keys from strings.
pub fn seed_from_string(input: &str) -> [u8; 32] {
    let digest = Sha256::digest(input.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_profile() -> Profile {
        Profile::from_seed("peer", seed_from_string("test peer key")).unwrap()
    }

    #[test]
    fn profile_id_round_trips_public_key() {
        let profile = test_profile();
        let public = decode_profile_id(&profile.id).unwrap();
        assert_eq!(encode_profile_id(&public), profile.id);
    }

    #[test]
    fn sign_and_verify() {
        let profile = test_profile();
        let signature = profile.sign(b"message").unwrap();
        verify_signature(&profile.id, b"message", &signature).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let profile = test_profile();
        let signature = profile.sign(b"message").unwrap();
        match verify_signature(&profile.id, b"other", &signature) {
            Err(TabulaError::SignatureInvalid(_)) => (),
            other => panic!("Expected signature failure, got {:?}", other),
        }
    }

    #[test]
    fn readonly_profile_cannot_sign() {
        let profile = test_profile();
        let readonly = Profile::readonly("peer", &profile.id);
        assert!(readonly.sign(b"message").is_err());
    }
}
