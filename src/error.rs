//! 领域错误定义
//!
//! 单目标操作（部署一个钱包、提交一笔交易）返回 `DomainError`；
//! 批量/后台操作在内部吞掉单项错误，只记录日志。

use thiserror::Error;

use crate::domain::{OwnerRole, TransactionStatus, WalletState};

/// 错误码（稳定的字符串标识，供上层展示/埋点）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainErrorCode {
    WalletNotFound,
    OwnerNotConfigured,
    OwnerAlreadyExists,
    ExternallyOwnedAccountNotFound,
    AccountNotFound,
    TransactionNotFound,
    InvalidWalletState,
    InvalidTransactionStatus,
    MissingTransactionField,
    InsufficientFunds,
    InvalidConfirmationCount,
    SignatureThresholdNotMet,
    FeeEstimateMissing,
    InvalidSafeCreationResponse,
    InvalidAddress,
    Cancelled,
    Network,
    Repository,
    Signing,
}

impl DomainErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletNotFound => "wallet_not_found",
            Self::OwnerNotConfigured => "owner_not_configured",
            Self::OwnerAlreadyExists => "owner_already_exists",
            Self::ExternallyOwnedAccountNotFound => "eoa_not_found",
            Self::AccountNotFound => "account_not_found",
            Self::TransactionNotFound => "transaction_not_found",
            Self::InvalidWalletState => "invalid_wallet_state",
            Self::InvalidTransactionStatus => "invalid_transaction_status",
            Self::MissingTransactionField => "missing_transaction_field",
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidConfirmationCount => "invalid_confirmation_count",
            Self::SignatureThresholdNotMet => "signature_threshold_not_met",
            Self::FeeEstimateMissing => "fee_estimate_missing",
            Self::InvalidSafeCreationResponse => "invalid_safe_creation_response",
            Self::InvalidAddress => "invalid_address",
            Self::Cancelled => "cancelled",
            Self::Network => "network",
            Self::Repository => "repository",
            Self::Signing => "signing",
        }
    }
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("owner not configured: {0}")]
    OwnerNotConfigured(OwnerRole),

    #[error("owner already exists: {0}")]
    OwnerAlreadyExists(String),

    #[error("externally owned account not found for address {0}")]
    ExternallyOwnedAccountNotFound(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("operation '{operation}' is not allowed in wallet state {state}")]
    InvalidWalletState {
        state: WalletState,
        operation: &'static str,
    },

    #[error("invalid transaction status transition: {from} -> {to}")]
    InvalidTransactionStatus {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("transaction field not set: {0}")]
    MissingTransactionField(&'static str),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("invalid confirmation count {count} for {owners} owners")]
    InvalidConfirmationCount { count: usize, owners: usize },

    #[error("signature threshold not met: have {have}, need {need}")]
    SignatureThresholdNotMet { have: usize, need: usize },

    #[error("fee estimate is not known")]
    FeeEstimateMissing,

    #[error("relay returned invalid safe creation response: {0}")]
    InvalidSafeCreationResponse(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {0:#}")]
    Network(#[source] anyhow::Error),

    #[error("repository error: {0:#}")]
    Repository(#[source] anyhow::Error),

    #[error("signing error: {0:#}")]
    Signing(#[source] anyhow::Error),
}

impl DomainError {
    pub fn code(&self) -> DomainErrorCode {
        match self {
            Self::WalletNotFound(_) => DomainErrorCode::WalletNotFound,
            Self::OwnerNotConfigured(_) => DomainErrorCode::OwnerNotConfigured,
            Self::OwnerAlreadyExists(_) => DomainErrorCode::OwnerAlreadyExists,
            Self::ExternallyOwnedAccountNotFound(_) => {
                DomainErrorCode::ExternallyOwnedAccountNotFound
            }
            Self::AccountNotFound(_) => DomainErrorCode::AccountNotFound,
            Self::TransactionNotFound(_) => DomainErrorCode::TransactionNotFound,
            Self::InvalidWalletState { .. } => DomainErrorCode::InvalidWalletState,
            Self::InvalidTransactionStatus { .. } => DomainErrorCode::InvalidTransactionStatus,
            Self::MissingTransactionField(_) => DomainErrorCode::MissingTransactionField,
            Self::InsufficientFunds { .. } => DomainErrorCode::InsufficientFunds,
            Self::InvalidConfirmationCount { .. } => DomainErrorCode::InvalidConfirmationCount,
            Self::SignatureThresholdNotMet { .. } => DomainErrorCode::SignatureThresholdNotMet,
            Self::FeeEstimateMissing => DomainErrorCode::FeeEstimateMissing,
            Self::InvalidSafeCreationResponse(_) => DomainErrorCode::InvalidSafeCreationResponse,
            Self::InvalidAddress(_) => DomainErrorCode::InvalidAddress,
            Self::Cancelled => DomainErrorCode::Cancelled,
            Self::Network(_) => DomainErrorCode::Network,
            Self::Repository(_) => DomainErrorCode::Repository,
            Self::Signing(_) => DomainErrorCode::Signing,
        }
    }

    /// 网络类错误可以从同一状态重试；其余错误需要放弃当前流程
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn network(err: anyhow::Error) -> Self {
        Self::Network(err)
    }

    pub fn repository(err: anyhow::Error) -> Self {
        Self::Repository(err)
    }

    pub fn signing(err: anyhow::Error) -> Self {
        Self::Signing(err)
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
