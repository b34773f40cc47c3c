pub mod backend;
pub mod store;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, StorageHandle};
pub use store::{
    Account, AddressEntry, CreatedWallet, OpenedWallet, RecordSecrets, WalletRecord, WalletStore,
};
