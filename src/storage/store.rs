//! Encrypted persistence of the wallet record.
//!
//! The on-disk envelope keeps the KDF parameters, nonce, revision and an
//! integrity checksum in the clear; everything else — accounts, addresses,
//! seed material — lives inside the AES-GCM ciphertext.

use std::sync::Arc;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::backend::{StorageBackend, StorageHandle};
use crate::crypto::{
    self, DerivationPath, EncryptionKey, KdfParams, MasterKey, NONCE_LEN,
};
use crate::errors::{StorageError, WalletError, WalletResult};

const RECORD_MAGIC: &[u8; 8] = b"PACTUSWL";
const RECORD_VERSION: u16 = 1;

/// One derived address. Re-deriving from (master key, derivation path)
/// always reproduces the same address string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressEntry {
    pub address: String,
    pub public_key: String,
    pub derivation_path: String,
    pub created_at: DateTime<Utc>,
}

/// One derivation-index grouping. Labels are human strings and not unique;
/// derivation indices are unique and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub label: String,
    pub derivation_index: u32,
    pub addresses: Vec<AddressEntry>,
}

impl Account {
    pub fn derivation_path(&self) -> DerivationPath {
        DerivationPath::address_index(self.derivation_index)
    }
}

/// Decrypted wallet record, minus secret material. Safe to keep cached in
/// memory while the session is locked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRecord {
    pub wallet_id: String,
    pub wallet_name: String,
    pub schema_version: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Next index to allocate. Monotonic; deleting an account never frees
    /// its index for reuse.
    pub next_derivation_index: u32,
    pub accounts: Vec<Account>,
}

impl WalletRecord {
    fn new(wallet_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            wallet_id: Uuid::new_v4().to_string(),
            wallet_name: wallet_name.into(),
            schema_version: RECORD_VERSION,
            created_at: now,
            updated_at: now,
            next_derivation_index: 0,
            accounts: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn find_by_address(&self, address: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.addresses.iter().any(|a| a.address == address))
    }
}

/// Secret material encrypted alongside the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct RecordSecrets {
    /// BIP39 recovery phrase, kept for export while unlocked.
    pub mnemonic_phrase: Option<String>,
    /// Master seed all account keys derive from.
    pub seed_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordBody {
    record: WalletRecord,
    secrets: RecordSecrets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordEnvelope {
    magic: [u8; 8],
    version: u16,
    /// Incremented on every successful persist. A mismatch against the
    /// store's cached revision means an external writer got there first.
    revision: u64,
    nonce: [u8; NONCE_LEN],
    kdf: KdfParams,
    checksum: [u8; 32],
    ciphertext: Vec<u8>,
}

/// Result of creating a fresh wallet. The mnemonic is surfaced exactly once
/// for the user to back up.
#[derive(Debug)]
pub struct CreatedWallet {
    pub record: WalletRecord,
    pub mnemonic: String,
}

/// Result of opening (decrypting) the stored wallet.
#[derive(Debug)]
pub struct OpenedWallet {
    pub record: WalletRecord,
    pub secrets: RecordSecrets,
    pub master: MasterKey,
    pub encryption_key: EncryptionKey,
}

#[derive(Debug, Default)]
struct StoreState {
    last_revision: Option<u64>,
}

/// Owns load/save of the encrypted wallet record through a storage backend.
#[derive(Debug)]
pub struct WalletStore {
    backend: Arc<dyn StorageBackend>,
    handle: StorageHandle,
    state: Mutex<StoreState>,
}

impl WalletStore {
    pub fn new(backend: Arc<dyn StorageBackend>, handle: StorageHandle) -> Self {
        Self {
            backend,
            handle,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn exists(&self) -> bool {
        self.backend.exists(&self.handle)
    }

    /// Initialize an empty record under a fresh mnemonic, salt and nonce.
    /// Fails if a wallet already exists under this handle.
    pub fn create_new(
        &self,
        wallet_name: &str,
        password: &SecretString,
        kdf: KdfParams,
        word_count: u32,
    ) -> WalletResult<CreatedWallet> {
        if self.exists() {
            return Err(WalletError::AlreadyExists(format!(
                "wallet '{}'",
                wallet_name
            )));
        }

        let (master, mnemonic) = MasterKey::generate(word_count)?;
        let record = WalletRecord::new(wallet_name);
        let secrets = RecordSecrets {
            mnemonic_phrase: Some(mnemonic.clone()),
            seed_bytes: master.seed_bytes().to_vec(),
        };

        self.write_envelope(&record, &secrets, password, kdf, 1)?;
        log::info!("created wallet record '{}'", record.wallet_id);
        Ok(CreatedWallet { record, mnemonic })
    }

    /// Initialize a record from an existing recovery phrase. Derivation
    /// restarts at index zero; previously used addresses reappear as the
    /// caller re-derives them.
    pub fn restore(
        &self,
        wallet_name: &str,
        mnemonic: &str,
        password: &SecretString,
        kdf: KdfParams,
    ) -> WalletResult<WalletRecord> {
        if self.exists() {
            return Err(WalletError::AlreadyExists(format!(
                "wallet '{}'",
                wallet_name
            )));
        }

        let master = MasterKey::from_mnemonic(mnemonic)?;
        let record = WalletRecord::new(wallet_name);
        let secrets = RecordSecrets {
            mnemonic_phrase: Some(mnemonic.to_string()),
            seed_bytes: master.seed_bytes().to_vec(),
        };

        self.write_envelope(&record, &secrets, password, kdf, 1)?;
        log::info!("restored wallet record '{}'", record.wallet_id);
        Ok(record)
    }

    /// Load and decrypt the stored record. A wrong password surfaces as
    /// `AuthenticationFailed`; a revision behind or ahead of the cached copy
    /// surfaces as `StaleRecord` (the stored copy wins either way).
    pub fn open(&self, password: &SecretString) -> WalletResult<OpenedWallet> {
        let envelope = self.read_envelope()?;

        {
            let mut state = self.state.lock();
            if let Some(cached) = state.last_revision {
                if envelope.revision != cached {
                    state.last_revision = Some(envelope.revision);
                    return Err(WalletError::StaleRecord);
                }
            }
        }

        let encryption_key = crypto::derive_encryption_key(password, &envelope.kdf)?;
        let plaintext = crypto::decrypt(&encryption_key, envelope.nonce, &envelope.ciphertext)?;

        if blake3_checksum(&plaintext) != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Wallet record integrity verification failed".to_string(),
            ));
        }

        let body: RecordBody = serde_json::from_slice(&plaintext)?;
        let master = MasterKey::from_seed_bytes(body.secrets.seed_bytes.clone())?;

        self.state.lock().last_revision = Some(envelope.revision);

        Ok(OpenedWallet {
            record: body.record,
            secrets: body.secrets,
            master,
            encryption_key,
        })
    }

    /// Serialize, encrypt and write the record, bumping the revision.
    /// Refuses with `StaleRecord` when the stored revision no longer matches
    /// the one this store last saw.
    pub fn persist(
        &self,
        record: &WalletRecord,
        secrets: &RecordSecrets,
        encryption_key: &EncryptionKey,
    ) -> WalletResult<()> {
        let envelope = self.read_envelope()?;

        let cached = self.state.lock().last_revision;
        if let Some(cached) = cached {
            if envelope.revision != cached {
                return Err(WalletError::StaleRecord);
            }
        }

        let next_revision = envelope.revision + 1;
        let body = RecordBody {
            record: record.clone(),
            secrets: secrets.clone(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&body)?);
        let checksum = blake3_checksum(&plaintext);
        let nonce = crypto::generate_nonce();
        let ciphertext = crypto::encrypt(encryption_key, nonce, &plaintext)?;

        let updated = RecordEnvelope {
            magic: *RECORD_MAGIC,
            version: RECORD_VERSION,
            revision: next_revision,
            nonce,
            kdf: envelope.kdf,
            checksum,
            ciphertext,
        };
        self.save_envelope(&updated)?;
        self.state.lock().last_revision = Some(next_revision);
        log::debug!("persisted wallet record at revision {}", next_revision);
        Ok(())
    }

    /// Re-encrypt the record under a new password and a fresh salt.
    pub fn change_password(
        &self,
        current_password: &SecretString,
        new_password: &SecretString,
    ) -> WalletResult<()> {
        let opened = self.open(current_password)?;
        let envelope = self.read_envelope()?;

        let kdf = envelope.kdf.with_fresh_salt();
        let mut record = opened.record;
        record.touch();
        self.write_envelope(
            &record,
            &opened.secrets,
            new_password,
            kdf,
            envelope.revision + 1,
        )?;
        self.state.lock().last_revision = Some(envelope.revision + 1);
        log::info!("wallet password changed");
        Ok(())
    }

    fn write_envelope(
        &self,
        record: &WalletRecord,
        secrets: &RecordSecrets,
        password: &SecretString,
        kdf: KdfParams,
        revision: u64,
    ) -> WalletResult<()> {
        let kdf = if kdf.salt == [0u8; crypto::SALT_LEN] {
            kdf.with_fresh_salt()
        } else {
            kdf
        };
        let encryption_key = crypto::derive_encryption_key(password, &kdf)?;

        let body = RecordBody {
            record: record.clone(),
            secrets: secrets.clone(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&body)?);
        let checksum = blake3_checksum(&plaintext);
        let nonce = crypto::generate_nonce();
        let ciphertext = crypto::encrypt(&encryption_key, nonce, &plaintext)?;

        let envelope = RecordEnvelope {
            magic: *RECORD_MAGIC,
            version: RECORD_VERSION,
            revision,
            nonce,
            kdf,
            checksum,
            ciphertext,
        };
        self.save_envelope(&envelope)?;
        self.state.lock().last_revision = Some(revision);
        Ok(())
    }

    fn read_envelope(&self) -> WalletResult<RecordEnvelope> {
        let bytes = self.backend.load(&self.handle).map_err(WalletError::from)?;
        let envelope: RecordEnvelope = serde_json::from_slice(&bytes).map_err(|_| {
            WalletError::Storage(StorageError::ReadFailure(
                "wallet record envelope is malformed".to_string(),
            ))
        })?;

        if &envelope.magic != RECORD_MAGIC {
            return Err(WalletError::ValidationError(
                "Invalid wallet record marker".to_string(),
            ));
        }
        if envelope.version != RECORD_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported wallet record version: {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }

    fn save_envelope(&self, envelope: &RecordEnvelope) -> WalletResult<()> {
        let serialized = serde_json::to_vec(envelope)?;
        self.backend
            .save(&self.handle, &serialized)
            .map_err(WalletError::from)
    }
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    fn test_kdf() -> KdfParams {
        KdfParams::new(8 * 1024, 1, 1)
    }

    fn store_on(backend: Arc<dyn StorageBackend>) -> WalletStore {
        WalletStore::new(backend, StorageHandle::new("primary"))
    }

    #[test]
    fn create_and_open_round_trip() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        let created = store
            .create_new("Savings", &secret("correct horse"), test_kdf(), 12)
            .unwrap();
        assert!(store.exists());
        assert_eq!(created.mnemonic.split_whitespace().count(), 12);

        let opened = store.open(&secret("correct horse")).unwrap();
        assert_eq!(opened.record, created.record);
        assert_eq!(opened.secrets.mnemonic_phrase, Some(created.mnemonic));
        assert!(!opened.secrets.seed_bytes.is_empty());
    }

    #[test]
    fn wrong_password_is_authentication_failure() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        store
            .create_new("Guarded", &secret("hunter2"), test_kdf(), 12)
            .unwrap();

        let err = store.open(&secret("incorrect")).unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
    }

    #[test]
    fn open_missing_record_is_not_found() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        let err = store.open(&secret("any")).unwrap_err();
        assert!(matches!(
            err,
            WalletError::Storage(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_is_detected() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = StorageHandle::new("primary");
        let store = WalletStore::new(backend.clone(), handle.clone());
        store
            .create_new("Tamper", &secret("tamper test"), test_kdf(), 12)
            .unwrap();

        let mut bytes = backend.load(&handle).unwrap();
        let mut envelope: RecordEnvelope = serde_json::from_slice(&bytes).unwrap();
        envelope.ciphertext[0] ^= 0xFF;
        bytes = serde_json::to_vec(&envelope).unwrap();
        backend.save(&handle, &bytes).unwrap();

        let err = store.open(&secret("tamper test")).unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
    }

    #[test]
    fn persist_bumps_revision_and_updates_record() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        store
            .create_new("Revisions", &secret("pw"), test_kdf(), 12)
            .unwrap();

        let opened = store.open(&secret("pw")).unwrap();
        let mut record = opened.record;
        record.wallet_name = "Renamed".to_string();
        store
            .persist(&record, &opened.secrets, &opened.encryption_key)
            .unwrap();

        let reopened = store.open(&secret("pw")).unwrap();
        assert_eq!(reopened.record.wallet_name, "Renamed");
    }

    #[test]
    fn external_writer_triggers_stale_record() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let ours = store_on(backend.clone());
        let theirs = store_on(backend.clone());

        ours.create_new("Shared", &secret("pw"), test_kdf(), 12)
            .unwrap();
        let opened = ours.open(&secret("pw")).unwrap();

        // Another process writes behind our back.
        let external = theirs.open(&secret("pw")).unwrap();
        theirs
            .persist(
                &external.record,
                &external.secrets,
                &external.encryption_key,
            )
            .unwrap();

        let err = ours
            .persist(&opened.record, &opened.secrets, &opened.encryption_key)
            .unwrap_err();
        assert!(matches!(err, WalletError::StaleRecord));

        // The external write wins: open signals once, then succeeds.
        let err = ours.open(&secret("pw")).unwrap_err();
        assert!(matches!(err, WalletError::StaleRecord));
        assert!(ours.open(&secret("pw")).is_ok());
    }

    #[test]
    fn change_password_re_encrypts() {
        let store = store_on(Arc::new(MemoryBackend::new()));
        store
            .create_new("Password Change", &secret("old password"), test_kdf(), 12)
            .unwrap();

        store
            .change_password(&secret("old password"), &secret("new password"))
            .unwrap();

        assert!(matches!(
            store.open(&secret("old password")).unwrap_err(),
            WalletError::AuthenticationFailed
        ));
        assert!(store.open(&secret("new password")).is_ok());
    }

    #[test]
    fn restore_reproduces_seed() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let first = WalletStore::new(backend.clone(), StorageHandle::new("a"));
        let created = first
            .create_new("Original", &secret("pw"), test_kdf(), 12)
            .unwrap();
        let original = first.open(&secret("pw")).unwrap();

        let second = WalletStore::new(backend, StorageHandle::new("b"));
        second
            .restore("Restored", &created.mnemonic, &secret("other pw"), test_kdf())
            .unwrap();
        let restored = second.open(&secret("other pw")).unwrap();

        assert_eq!(original.secrets.seed_bytes, restored.secrets.seed_bytes);
    }
}
