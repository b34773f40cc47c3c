// lib.rs - Core library structure for the wallet

pub mod chain_client;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod manager;
pub mod session;
pub mod storage;
pub mod validation;

// Re-export common types
pub use chain_client::{AccountInfo, BalanceResponse, ChainClient, NetworkStatus, TransactionInfo};
pub use config_store::{
    ConfigStore, DerivationConfig, NetworkConfig, SessionConfig, WalletConfig,
};
pub use crypto::{DerivationPath, KdfParams, MasterKey};
pub use errors::{ChainError, StorageError, WalletError, WalletResult};
pub use manager::WalletManager;
pub use session::{SessionKeys, SessionManager};
pub use storage::{
    Account, AddressEntry, FileBackend, MemoryBackend, StorageBackend, StorageHandle, WalletRecord,
    WalletStore,
};
pub use validation::InputValidator;
