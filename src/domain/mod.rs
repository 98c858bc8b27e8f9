//! Domain 模块
//!
//! 钱包、账户、交易聚合及其状态机，以及owner之间的消息协议

pub mod account;
pub mod ids;
pub mod message;
pub mod signature;
pub mod token;
pub mod transaction;
pub mod transaction_status;
pub mod wallet;
pub mod wallet_state;

// 重新导出常用类型
pub use account::Account;
pub use ids::{AccountId, ParseAccountIdError, PortfolioId, TokenId, TransactionId, WalletId};
pub use message::{
    IncomingMessage, OutgoingMessage, OutgoingPayload, SendTransactionMessage, TransactionDecision,
};
pub use signature::{EcdsaSignatureBounds, EthSignature, OwnerSignature};
pub use token::{Token, TokenAmount, TokenInt, TokenListItem, TokenListItemStatus};
pub use transaction::{EthereumCall, FeeEstimate, Transaction, TransactionType, WalletOperation};
pub use transaction_status::TransactionStatus;
pub use wallet::{Owner, OwnerRole, Portfolio, Wallet};
pub use wallet_state::WalletState;
