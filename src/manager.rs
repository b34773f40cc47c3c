use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::SecretString;

use crate::chain_client::{AccountInfo, ChainClient, NetworkStatus};
use crate::config_store::{ConfigStore, WalletConfig};
use crate::crypto::{self, DerivationPath, KdfParams};
use crate::errors::{WalletError, WalletResult};
use crate::session::{SessionKeys, SessionManager};
use crate::storage::{
    Account, AddressEntry, FileBackend, StorageBackend, StorageHandle, WalletRecord, WalletStore,
};
use crate::validation::InputValidator;

/// Single entry point for wallet consumers.
///
/// Construct one instance with its dependencies and pass it by reference;
/// there is no process-wide singleton. Key-using operations are gated by the
/// session; persistence and chain access are delegated to the store and the
/// chain client.
#[derive(Debug)]
pub struct WalletManager {
    store: WalletStore,
    session: SessionManager,
    chain: ChainClient,
    validator: InputValidator,
    /// Decrypted record cached after the first open. Addresses are not
    /// secret, so the cache survives `lock()`; only key material is dropped.
    record: RwLock<Option<WalletRecord>>,
    max_derivation_index: u32,
}

impl WalletManager {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        handle: StorageHandle,
        config: &WalletConfig,
    ) -> WalletResult<Self> {
        let store = WalletStore::new(backend, handle);
        let session = SessionManager::new(
            duration_from_minutes(config.session.auto_lock_minutes),
            config.session.max_failed_attempts.max(1),
        );
        let chain = ChainClient::new(
            config.network.primary_endpoint.clone(),
            Duration::from_secs(config.network.request_timeout_secs),
        )?;
        let validator = InputValidator::new()?;

        Ok(Self {
            store,
            session,
            chain,
            validator,
            record: RwLock::new(None),
            max_derivation_index: config.derivation.max_index,
        })
    }

    /// Wire a manager over file-backed storage rooted at `root_dir`,
    /// loading (or creating) the persisted configuration next to it.
    pub fn initialize(root_dir: impl AsRef<Path>) -> WalletResult<Self> {
        let environment =
            std::env::var("PACTUS_WALLET_ENV").unwrap_or_else(|_| "production".to_string());
        let config_store = ConfigStore::new(root_dir.as_ref().join("wallet.config"));
        let config = config_store.load_or_default(environment)?;
        let backend = Arc::new(FileBackend::new(root_dir.as_ref())?);
        Self::new(backend, StorageHandle::new("wallet"), &config)
    }

    pub fn wallet_exists(&self) -> bool {
        self.store.exists()
    }

    pub fn wallet_name(&self) -> Option<String> {
        self.record
            .read()
            .as_ref()
            .map(|record| record.wallet_name.clone())
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    /// Create a fresh wallet and return its recovery phrase. The session
    /// starts locked; call `unlock` before deriving addresses.
    pub fn create_wallet(
        &self,
        name: &str,
        password: &SecretString,
        kdf: KdfParams,
        word_count: u32,
    ) -> WalletResult<String> {
        self.validator.validate_label(name)?;
        let created = self.store.create_new(name, password, kdf, word_count)?;
        *self.record.write() = Some(created.record);
        Ok(created.mnemonic)
    }

    /// Recreate a wallet from its recovery phrase. Derivation restarts at
    /// index zero, reproducing the original addresses as they are derived.
    pub fn restore_wallet(
        &self,
        name: &str,
        mnemonic: &str,
        password: &SecretString,
        kdf: KdfParams,
    ) -> WalletResult<()> {
        self.validator.validate_label(name)?;
        let record = self.store.restore(name, mnemonic, password, kdf)?;
        *self.record.write() = Some(record);
        Ok(())
    }

    /// Decrypt the stored record and move the session to `Unlocked`.
    /// A wrong password leaves the session locked and counts as a failed
    /// attempt.
    pub fn unlock(&self, password: &SecretString) -> WalletResult<()> {
        self.session.ensure_unlock_permitted()?;

        match self.store.open(password) {
            Ok(opened) => {
                *self.record.write() = Some(opened.record);
                self.session.unlock(SessionKeys {
                    master: opened.master,
                    secrets: opened.secrets,
                    encryption_key: opened.encryption_key,
                });
                Ok(())
            }
            Err(WalletError::AuthenticationFailed) => {
                match self.session.register_failed_attempt() {
                    Ok(remaining) => {
                        log::warn!("unlock failed, {} attempts remaining", remaining);
                        Err(WalletError::AuthenticationFailed)
                    }
                    Err(throttled) => Err(throttled),
                }
            }
            Err(other) => Err(other),
        }
    }

    pub fn lock(&self) {
        self.session.lock();
    }

    /// Derive the next address under a new account. All-or-nothing: the
    /// in-memory record only changes after the updated record has been
    /// persisted successfully.
    pub fn create_address(&self, label: &str) -> WalletResult<AddressEntry> {
        self.validator.validate_label(label)?;

        // The record lock is held across persist so that record operations
        // stay serialized relative to persistence.
        let mut record_guard = self.record.write();
        let current = match record_guard.as_ref() {
            Some(record) => record.clone(),
            // Wallet never opened in this process; the session cannot be
            // unlocked either.
            None => return Err(WalletError::SessionLocked),
        };

        let (updated, entry) = self.session.with_unlocked(|keys| {
            let index = current.next_derivation_index;
            if index >= self.max_derivation_index {
                return Err(WalletError::DerivationExhausted);
            }

            let path = DerivationPath::address_index(index);
            let (public_key, address) = crypto::derive_address(&keys.master, &path)?;
            let entry = AddressEntry {
                address,
                public_key,
                derivation_path: path.to_string(),
                created_at: Utc::now(),
            };

            let mut updated = current.clone();
            updated.accounts.push(Account {
                label: label.to_string(),
                derivation_index: index,
                addresses: vec![entry.clone()],
            });
            updated.next_derivation_index = index + 1;
            updated.touch();

            self.store
                .persist(&updated, &keys.secrets, &keys.encryption_key)?;
            Ok((updated, entry))
        })?;

        *record_guard = Some(updated);
        log::info!("derived address {} for '{}'", entry.address, label);
        Ok(entry)
    }

    /// All derived addresses in derivation order. Read-only; works in either
    /// session state. Empty until the record has been opened once.
    pub fn list_addresses(&self) -> Vec<AddressEntry> {
        self.record
            .read()
            .as_ref()
            .map(|record| {
                record
                    .accounts
                    .iter()
                    .flat_map(|account| account.addresses.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.record
            .read()
            .as_ref()
            .map(|record| record.accounts.clone())
            .unwrap_or_default()
    }

    /// Sign a transaction payload with the key behind `address`.
    pub fn sign_transaction(&self, address: &str, payload: &[u8]) -> WalletResult<String> {
        let path = {
            let record_guard = self.record.read();
            let record = match record_guard.as_ref() {
                Some(record) => record,
                None => return Err(WalletError::SessionLocked),
            };
            record
                .find_by_address(address)
                .ok_or_else(|| WalletError::AddressNotFound(address.to_string()))?
                .derivation_path()
        };

        let signature = self
            .session
            .with_unlocked(|keys| crypto::sign(&keys.master, &path, payload))?;
        Ok(hex::encode(signature.to_bytes()))
    }

    /// Export the recovery phrase. Requires an unlocked session; does not
    /// extend the inactivity deadline.
    pub fn export_mnemonic(&self) -> WalletResult<String> {
        self.session.peek_unlocked(|keys| {
            keys.secrets
                .mnemonic_phrase
                .clone()
                .ok_or_else(|| WalletError::NotFound("recovery phrase not stored".to_string()))
        })
    }

    /// Re-encrypt the wallet under a new password. Locks the session: the
    /// cached encryption key is stale after the change.
    pub fn change_password(
        &self,
        current_password: &SecretString,
        new_password: &SecretString,
    ) -> WalletResult<()> {
        self.store.change_password(current_password, new_password)?;
        self.session.lock();
        Ok(())
    }

    /// Broadcast a signed transaction. Single attempt; a failure (or a
    /// cancelled call) does not imply the node rejected it.
    pub async fn broadcast(&self, signed_tx_hex: &str) -> WalletResult<String> {
        match self.chain.submit_transaction(signed_tx_hex).await {
            Ok(tx_id) => {
                log::info!("broadcast accepted: {}", tx_id);
                Ok(tx_id)
            }
            Err(err) => {
                log::warn!("broadcast failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// Refresh the spendable balance for an address.
    pub async fn balance(&self, address: &str) -> WalletResult<u64> {
        self.validator.validate_address(address)?;
        Ok(self.chain.get_balance(address).await?)
    }

    pub async fn account_info(&self, address: &str) -> WalletResult<AccountInfo> {
        self.validator.validate_address(address)?;
        Ok(self.chain.get_account_info(address).await?)
    }

    pub async fn network_status(&self) -> WalletResult<NetworkStatus> {
        Ok(self.chain.get_network_status().await?)
    }
}

fn duration_from_minutes(minutes: u32) -> Duration {
    let clamped = minutes.max(1) as u64;
    Duration::from_secs(clamped.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::storage::MemoryBackend;
    use parking_lot::Mutex;

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    fn test_kdf() -> KdfParams {
        KdfParams::new(8 * 1024, 1, 1)
    }

    fn test_manager(backend: Arc<dyn StorageBackend>) -> WalletManager {
        let config = WalletConfig::new("test");
        WalletManager::new(backend, StorageHandle::new("primary"), &config).unwrap()
    }

    /// Backend that starts failing writes after a fixed number of saves.
    #[derive(Debug)]
    struct FlakyBackend {
        inner: MemoryBackend,
        saves_left: Mutex<u32>,
    }

    impl FlakyBackend {
        fn new(saves_left: u32) -> Self {
            Self {
                inner: MemoryBackend::new(),
                saves_left: Mutex::new(saves_left),
            }
        }
    }

    impl StorageBackend for FlakyBackend {
        fn save(&self, handle: &StorageHandle, blob: &[u8]) -> Result<(), StorageError> {
            let mut left = self.saves_left.lock();
            if *left == 0 {
                return Err(StorageError::WriteFailure("disk full".to_string()));
            }
            *left -= 1;
            self.inner.save(handle, blob)
        }

        fn load(&self, handle: &StorageHandle) -> Result<Vec<u8>, StorageError> {
            self.inner.load(handle)
        }

        fn delete(&self, handle: &StorageHandle) -> Result<(), StorageError> {
            self.inner.delete(handle)
        }
    }

    #[test]
    fn create_unlock_derive_lock_sign_cycle() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        assert!(manager.is_locked());

        manager.unlock(&secret("p1")).unwrap();
        let entry = manager.create_address("main").unwrap();
        assert!(entry.address.starts_with("pc1"));

        manager.lock();
        let err = manager
            .sign_transaction(&entry.address, b"payload")
            .unwrap_err();
        assert!(matches!(err, WalletError::SessionLocked));

        manager.unlock(&secret("p1")).unwrap();
        let signature = manager.sign_transaction(&entry.address, b"payload").unwrap();
        assert_eq!(signature.len(), 128); // 64-byte Ed25519 signature, hex
    }

    #[test]
    fn wrong_password_leaves_session_locked() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();

        let err = manager.unlock(&secret("p2")).unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
        assert!(manager.is_locked());
    }

    #[test]
    fn sequential_addresses_use_distinct_indices() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();

        let first = manager.create_address("first").unwrap();
        let second = manager.create_address("second").unwrap();
        assert_ne!(first.address, second.address);

        let accounts = manager.accounts();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].derivation_index, 0);
        assert_eq!(accounts[1].derivation_index, 1);
    }

    #[test]
    fn create_address_rolls_back_when_persist_fails() {
        // One successful save allowed: wallet creation consumes it, the
        // address persist fails.
        let manager = test_manager(Arc::new(FlakyBackend::new(1)));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();

        let err = manager.create_address("main").unwrap_err();
        assert!(matches!(
            err,
            WalletError::Storage(StorageError::WriteFailure(_))
        ));
        assert!(manager.list_addresses().is_empty());

        // The failed attempt must not have consumed the index.
        let manager2 = test_manager(Arc::new(MemoryBackend::new()));
        manager2
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager2.unlock(&secret("p1")).unwrap();
        let entry = manager2.create_address("main").unwrap();
        assert_eq!(manager2.accounts()[0].derivation_index, 0);
        assert!(entry.address.starts_with("pc1"));
    }

    #[test]
    fn addresses_remain_listed_while_locked() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();
        manager.create_address("main").unwrap();

        manager.lock();
        assert_eq!(manager.list_addresses().len(), 1);
    }

    #[test]
    fn create_address_requires_unlocked_session() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();

        let err = manager.create_address("main").unwrap_err();
        assert!(matches!(err, WalletError::SessionLocked));
    }

    #[test]
    fn signing_unknown_address_fails() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();
        manager.create_address("main").unwrap();

        let err = manager
            .sign_transaction("pc1qunknownaddressqqqqqqqqqqqqqqqqqqqqqqqq", b"payload")
            .unwrap_err();
        assert!(matches!(err, WalletError::AddressNotFound(_)));
    }

    #[test]
    fn derivation_cap_is_enforced() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mut config = WalletConfig::new("test");
        config.derivation.max_index = 1;
        let manager =
            WalletManager::new(backend, StorageHandle::new("primary"), &config).unwrap();

        manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();
        manager.create_address("first").unwrap();

        let err = manager.create_address("second").unwrap_err();
        assert!(matches!(err, WalletError::DerivationExhausted));
    }

    #[test]
    fn export_mnemonic_requires_unlock() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        let mnemonic = manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();

        assert!(matches!(
            manager.export_mnemonic().unwrap_err(),
            WalletError::SessionLocked
        ));

        manager.unlock(&secret("p1")).unwrap();
        assert_eq!(manager.export_mnemonic().unwrap(), mnemonic);
    }

    #[test]
    fn change_password_locks_session() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        manager
            .create_wallet("Main", &secret("old password"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("old password")).unwrap();

        manager
            .change_password(&secret("old password"), &secret("new password"))
            .unwrap();
        assert!(manager.is_locked());

        manager.unlock(&secret("new password")).unwrap();
        manager.lock();
        assert!(matches!(
            manager.unlock(&secret("old password")).unwrap_err(),
            WalletError::AuthenticationFailed
        ));
    }

    #[test]
    fn restored_wallet_reproduces_addresses() {
        let manager = test_manager(Arc::new(MemoryBackend::new()));
        let mnemonic = manager
            .create_wallet("Main", &secret("p1"), test_kdf(), 12)
            .unwrap();
        manager.unlock(&secret("p1")).unwrap();
        let original = manager.create_address("main").unwrap();

        let restored = test_manager(Arc::new(MemoryBackend::new()));
        restored
            .restore_wallet("Restored", &mnemonic, &secret("p2"), test_kdf())
            .unwrap();
        restored.unlock(&secret("p2")).unwrap();
        let rederived = restored.create_address("main").unwrap();

        assert_eq!(original.address, rederived.address);
        assert_eq!(original.public_key, rederived.public_key);
    }
}
