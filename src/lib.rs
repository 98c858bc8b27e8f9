//! multisig-core - 多签以太坊钱包领域核心
//!
//! 钱包部署状态机、多签交易签名/确认/提交状态机、owner之间的消息协议、
//! 账户余额同步和配对管理。持久化、链节点、中继和推送服务通过 trait 注入。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use config::CoreConfig;
pub use error::{DomainError, DomainErrorCode, DomainResult};

pub mod prelude {
    pub use crate::{
        config::CoreConfig,
        domain::{
            Account, AccountId, IncomingMessage, OutgoingMessage, Owner, OwnerRole, Token,
            TokenAmount, TokenInt, Transaction, TransactionId, TransactionStatus, Wallet,
            WalletId, WalletState,
        },
        error::{DomainError, DomainResult},
        infrastructure::{CancellationToken, DomainEvent, EventBus, InMemoryEventBus},
        service::{
            AccountUpdateDomainService, CommunicationDomainService, DeploymentDomainService,
            TransactionDomainService,
        },
    };
}
