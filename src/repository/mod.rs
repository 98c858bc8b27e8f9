// Repository 抽象层：trait + 内存实现
pub mod account_repository;
pub mod eoa_repository;
pub mod token_list_repository;
pub mod transaction_repository;
pub mod wallet_repository;

pub use account_repository::{AccountRepository, InMemoryAccountRepository};
pub use eoa_repository::{
    ExternallyOwnedAccount, ExternallyOwnedAccountRepository,
    InMemoryExternallyOwnedAccountRepository, PrivateKey,
};
pub use token_list_repository::{InMemoryTokenListItemRepository, TokenListItemRepository};
pub use transaction_repository::{InMemoryTransactionRepository, TransactionRepository};
pub use wallet_repository::{InMemoryWalletRepository, WalletRepository};
