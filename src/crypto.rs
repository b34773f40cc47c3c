/// Key derivation, encryption and signing primitives for the wallet core.
///
/// Everything here is deterministic and side-effect free apart from fresh
/// salt/nonce/entropy generation at wallet creation time.
use argon2::{Algorithm, Argon2, Params, Version};
use bech32::{Bech32m, Hrp};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt;
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
const ADDRESS_HASH_LEN: usize = 20;
const ADDRESS_HRP: &str = "pc";
const ED25519_DERIVE_DOMAIN: &[u8] = b"PACTUS_WALLET_ED25519_DERIVE_V1";

/// Password-derived symmetric key. Only ever used for vault encryption,
/// never for address derivation.
pub type EncryptionKey = Zeroizing<[u8; KEY_LEN]>;

/// Argon2id parameters persisted alongside the ciphertext so they can evolve
/// without breaking previously created wallets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub salt: [u8; SALT_LEN],
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost_kib: 64 * 1024, // 64 MiB
            t_cost: 3,
            p_cost: 1,
            salt: [0u8; SALT_LEN],
        }
    }
}

impl KdfParams {
    pub fn new(m_cost_kib: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost_kib,
            t_cost,
            p_cost,
            salt: [0u8; SALT_LEN],
        }
    }

    /// Copy of these cost parameters with a freshly generated random salt.
    pub fn with_fresh_salt(&self) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self { salt, ..*self }
    }
}

/// Index into the wallet key tree: m/44'/21888'/3'/<index>'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationPath {
    index: u32,
}

impl DerivationPath {
    pub fn address_index(index: u32) -> Self {
        Self { index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m/44'/21888'/3'/{}'", self.index)
    }
}

/// Decrypted master seed from which all account keys are derived.
/// Held in memory only while the session is unlocked; zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    seed: Zeroizing<Vec<u8>>,
}

impl MasterKey {
    /// Generate a fresh master key along with its BIP39 recovery phrase.
    pub fn generate(word_count: u32) -> WalletResult<(Self, String)> {
        let mnemonic = generate_bip39_mnemonic(word_count)?;
        let key = Self::from_mnemonic(&mnemonic)?;
        Ok((key, mnemonic))
    }

    /// Rebuild the master key from a BIP39 recovery phrase. The same phrase
    /// always yields the same seed and therefore the same addresses.
    pub fn from_mnemonic(mnemonic: &str) -> WalletResult<Self> {
        use bip39::{Language, Mnemonic};

        let parsed = Mnemonic::parse_in_normalized(Language::English, mnemonic)
            .map_err(|e| WalletError::ValidationError(format!("Invalid mnemonic: {}", e)))?;
        let seed = parsed.to_seed("");
        Ok(Self {
            seed: Zeroizing::new(seed.to_vec()),
        })
    }

    /// Rehydrate from seed bytes stored inside a decrypted wallet record.
    pub fn from_seed_bytes(seed: Vec<u8>) -> WalletResult<Self> {
        if seed.is_empty() {
            return Err(WalletError::CryptoError(
                "Master seed cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            seed: Zeroizing::new(seed),
        })
    }

    pub fn seed_bytes(&self) -> &[u8] {
        &self.seed
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// Derive the vault encryption key from a password. Deterministic: the same
/// password and parameters always produce the same key.
pub fn derive_encryption_key(
    password: &SecretString,
    params: &KdfParams,
) -> WalletResult<EncryptionKey> {
    let argon_params = Params::new(
        params.m_cost_kib,
        params.t_cost,
        params.p_cost,
        Some(KEY_LEN),
    )
    .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(
            password.expose_secret().as_bytes(),
            &params.salt,
            key.as_mut(),
        )
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

/// AES-256-GCM encryption of a wallet record body.
pub fn encrypt(
    key: &EncryptionKey,
    nonce_bytes: [u8; NONCE_LEN],
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

/// Authenticated decryption. A wrong password (wrong key) fails the GCM tag
/// check and surfaces as `AuthenticationFailed`, never as garbage plaintext.
pub fn decrypt(
    key: &EncryptionKey,
    nonce_bytes: [u8; NONCE_LEN],
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::AuthenticationFailed);
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::AuthenticationFailed)?;
    let plaintext_len = plaintext.len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Generate a random AEAD nonce. Nonce reuse under one key is ruled out by
/// deriving a fresh nonce for every persist.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive the public key and bech32m address for a derivation path.
/// Pure function: the same (master key, path) pair always yields the same
/// address string.
pub fn derive_address(master: &MasterKey, path: &DerivationPath) -> WalletResult<(String, String)> {
    let signing_key = derive_signing_key(master, path)?;
    let verifying_key = signing_key.verifying_key();
    let public_key_hex = hex::encode(verifying_key.to_bytes());
    let address = encode_address(&verifying_key)?;
    Ok((public_key_hex, address))
}

/// Sign a message with the keypair at the given path.
pub fn sign(master: &MasterKey, path: &DerivationPath, message: &[u8]) -> WalletResult<Signature> {
    let signing_key = derive_signing_key(master, path)?;
    Ok(signing_key.sign(message))
}

/// Verify a signature against the keypair at the given path.
pub fn verify(
    master: &MasterKey,
    path: &DerivationPath,
    message: &[u8],
    signature: &Signature,
) -> WalletResult<bool> {
    let signing_key = derive_signing_key(master, path)?;
    Ok(signing_key
        .verifying_key()
        .verify(message, signature)
        .is_ok())
}

fn derive_signing_key(master: &MasterKey, path: &DerivationPath) -> WalletResult<SigningKey> {
    let mut hmac = Hmac::<Sha512>::new_from_slice(ED25519_DERIVE_DOMAIN)
        .map_err(|e| WalletError::CryptoError(format!("HMAC error: {}", e)))?;
    Mac::update(&mut hmac, master.seed_bytes());
    Mac::update(&mut hmac, path.to_string().as_bytes());
    let digest = hmac.finalize();

    let private_bytes: [u8; 32] = digest.into_bytes()[..32]
        .try_into()
        .map_err(|_| WalletError::CryptoError("Key derivation failed".to_string()))?;
    Ok(SigningKey::from_bytes(&private_bytes))
}

fn encode_address(verifying_key: &VerifyingKey) -> WalletResult<String> {
    let digest = blake3::hash(verifying_key.as_bytes());
    let payload = &digest.as_bytes()[..ADDRESS_HASH_LEN];

    let hrp = Hrp::parse(ADDRESS_HRP)
        .map_err(|e| WalletError::CryptoError(format!("Invalid address prefix: {e}")))?;
    bech32::encode::<Bech32m>(hrp, payload)
        .map_err(|e| WalletError::CryptoError(format!("Address encoding failed: {e}")))
}

/// Generate a BIP39 mnemonic with the given word count.
fn generate_bip39_mnemonic(word_count: u32) -> WalletResult<String> {
    use bip39::Mnemonic;

    let entropy_bits = match word_count {
        12 => 128,
        15 => 160,
        18 => 192,
        21 => 224,
        24 => 256,
        _ => {
            return Err(WalletError::ValidationError(
                "Invalid word count: must be 12, 15, 18, 21, or 24".to_string(),
            ))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
    OsRng
        .try_fill_bytes(&mut entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;

    Ok(mnemonic.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kdf() -> KdfParams {
        KdfParams::new(8 * 1024, 1, 1).with_fresh_salt()
    }

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    #[test]
    fn encryption_key_is_deterministic() {
        let params = test_kdf();
        let key1 = derive_encryption_key(&secret("hunter2"), &params).unwrap();
        let key2 = derive_encryption_key(&secret("hunter2"), &params).unwrap();
        assert_eq!(key1.as_ref(), key2.as_ref());

        let other = derive_encryption_key(&secret("hunter3"), &params).unwrap();
        assert_ne!(key1.as_ref(), other.as_ref());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let params = test_kdf();
        let key = derive_encryption_key(&secret("round trip"), &params).unwrap();
        let nonce = generate_nonce();

        let ciphertext = encrypt(&key, nonce, b"wallet record body").unwrap();
        let plaintext = decrypt(&key, nonce, &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"wallet record body");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let params = test_kdf();
        let key = derive_encryption_key(&secret("correct"), &params).unwrap();
        let wrong = derive_encryption_key(&secret("incorrect"), &params).unwrap();
        let nonce = generate_nonce();

        let ciphertext = encrypt(&key, nonce, b"secret payload").unwrap();
        let err = decrypt(&wrong, nonce, &ciphertext).unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
    }

    #[test]
    fn truncated_ciphertext_fails_authentication() {
        let params = test_kdf();
        let key = derive_encryption_key(&secret("short"), &params).unwrap();
        let err = decrypt(&key, generate_nonce(), &[0u8; 4]).unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let master = MasterKey::from_seed_bytes(vec![7u8; 64]).unwrap();
        let path = DerivationPath::address_index(0);

        let (pk1, addr1) = derive_address(&master, &path).unwrap();
        let (pk2, addr2) = derive_address(&master, &path).unwrap();
        assert_eq!(pk1, pk2);
        assert_eq!(addr1, addr2);
        assert!(addr1.starts_with("pc1"));
    }

    #[test]
    fn distinct_paths_yield_distinct_addresses() {
        let master = MasterKey::from_seed_bytes(vec![3u8; 64]).unwrap();
        let (_, addr0) = derive_address(&master, &DerivationPath::address_index(0)).unwrap();
        let (_, addr1) = derive_address(&master, &DerivationPath::address_index(1)).unwrap();
        assert_ne!(addr0, addr1);
    }

    #[test]
    fn mnemonic_restores_same_addresses() {
        let (master, mnemonic) = MasterKey::generate(12).unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 12);

        let restored = MasterKey::from_mnemonic(&mnemonic).unwrap();
        let path = DerivationPath::address_index(5);
        assert_eq!(
            derive_address(&master, &path).unwrap(),
            derive_address(&restored, &path).unwrap()
        );
    }

    #[test]
    fn invalid_word_count_rejected() {
        let err = MasterKey::generate(13).unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(_)));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let master = MasterKey::from_seed_bytes((0u8..64).collect()).unwrap();
        let path = DerivationPath::address_index(2);
        let message = b"transfer 100 to pc1...";

        let signature = sign(&master, &path, message).unwrap();
        assert!(verify(&master, &path, message, &signature).unwrap());
        assert!(!verify(&master, &path, b"tampered", &signature).unwrap());

        // A different path must not verify the same signature.
        let other = DerivationPath::address_index(3);
        assert!(!verify(&master, &other, message, &signature).unwrap());
    }
}
