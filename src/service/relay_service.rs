//! 交易中继服务接口
//!
//! 中继负责计算多签钱包的部署地址、广播部署交易、估算手续费和代付提交交易。

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256};

use crate::domain::{EthSignature, FeeEstimate, TokenInt, WalletOperation};

/// 部署请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCreationRequest {
    pub owners: Vec<Address>,
    pub confirmation_count: usize,
    pub payment_token: Address,
}

/// 中继返回的部署参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCreationTransaction {
    /// 预计算的钱包地址
    pub safe: Address,
    /// 部署所需的最低资金
    pub payment: TokenInt,
    /// 支付部署费用的代币，必须与请求一致
    pub payment_token: Address,
    pub master_copy: Option<Address>,
    pub contract_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateTransactionRequest {
    pub safe: Address,
    pub to: Address,
    pub value: TokenInt,
    pub data: Vec<u8>,
    pub operation: WalletOperation,
    pub gas_token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTransactionRequest {
    pub safe: Address,
    pub to: Address,
    pub value: TokenInt,
    pub data: Vec<u8>,
    pub operation: WalletOperation,
    pub signatures: Vec<EthSignature>,
    pub fee_estimate: FeeEstimate,
    pub nonce: Option<String>,
}

#[async_trait]
pub trait TransactionRelayService: Send + Sync {
    async fn create_safe_creation_transaction(
        &self,
        request: SafeCreationRequest,
    ) -> Result<SafeCreationTransaction>;

    /// 通知中继开始部署（资金已到位）
    async fn start_safe_creation(&self, safe: Address) -> Result<()>;

    /// 部署交易哈希；尚未广播时返回 None
    async fn safe_creation_transaction_hash(&self, safe: Address) -> Result<Option<H256>>;

    async fn estimate_transaction(&self, request: EstimateTransactionRequest) -> Result<FeeEstimate>;

    /// 提交已签名交易，返回链上交易哈希
    async fn submit_transaction(&self, request: SubmitTransactionRequest) -> Result<H256>;
}
