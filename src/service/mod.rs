pub mod account_update_service; // 余额同步
pub mod communication_service;
pub mod deployment_service; // 钱包部署状态机驱动
pub mod encryption_service;
pub mod ethereum_node;
pub mod notification_service;
pub mod relay_service;
pub mod transaction_service;

pub use account_update_service::{AccountUpdateDomainService, BalanceSyncReport};
pub use communication_service::CommunicationDomainService;
pub use deployment_service::DeploymentDomainService;
pub use encryption_service::{EncryptionService, EthersEncryptionService};
pub use ethereum_node::{
    Erc20ContractProxy, EthereumNodeService, EthersNodeService, ReceiptStatus, TransactionReceipt,
};
pub use notification_service::{
    ConfirmationRequest, DeletePairRequest, NotificationService, SendMessageRequest,
};
pub use relay_service::{
    EstimateTransactionRequest, SafeCreationRequest, SafeCreationTransaction,
    SubmitTransactionRequest, TransactionRelayService,
};
pub use transaction_service::TransactionDomainService;
