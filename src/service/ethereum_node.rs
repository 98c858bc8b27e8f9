//! 以太坊节点与 ERC20 合约访问
//!
//! 领域服务只依赖这里的 trait；`EthersNodeService` 是基于 ethers-rs HTTP provider 的实现。

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, Bytes, TransactionRequest, H256, U64},
};

use crate::domain::TokenInt;

const ERC20_BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// 交易收据状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub hash: H256,
    pub status: ReceiptStatus,
}

#[async_trait]
pub trait EthereumNodeService: Send + Sync {
    /// 原生币余额
    async fn get_balance(&self, address: Address) -> Result<TokenInt>;

    /// 交易收据；尚未打包时返回 None
    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;
}

#[async_trait]
pub trait Erc20ContractProxy: Send + Sync {
    async fn balance_of(&self, account: Address, contract: Address) -> Result<TokenInt>;
}

// ============ ethers-rs 实现 ============

pub struct EthersNodeService {
    provider: Provider<Http>,
}

impl EthersNodeService {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url).context("Failed to create Ethereum provider")?;
        Ok(Self { provider })
    }
}

/// balanceOf(address) 调用数据
pub fn balance_of_calldata(account: Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&ERC20_BALANCE_OF_SELECTOR);
    data.extend_from_slice(H256::from(account).as_bytes());
    data
}

#[async_trait]
impl EthereumNodeService for EthersNodeService {
    async fn get_balance(&self, address: Address) -> Result<TokenInt> {
        let balance = self
            .provider
            .get_balance(address, None)
            .await
            .context("Failed to fetch balance")?;

        tracing::debug!(address = %address, balance_wei = %balance, "Fetched native balance");
        Ok(balance)
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .context("Failed to fetch transaction receipt")?;

        Ok(receipt.map(|r| TransactionReceipt {
            hash,
            status: if r.status == Some(U64::one()) {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Failed
            },
        }))
    }
}

#[async_trait]
impl Erc20ContractProxy for EthersNodeService {
    async fn balance_of(&self, account: Address, contract: Address) -> Result<TokenInt> {
        let request = TransactionRequest::new()
            .to(contract)
            .data(Bytes::from(balance_of_calldata(account)));

        let output = self
            .provider
            .call(&request.into(), None)
            .await
            .context("Failed to call balanceOf")?;

        if output.len() < 32 {
            anyhow::bail!("balanceOf returned {} bytes, expected 32", output.len());
        }
        Ok(TokenInt::from_big_endian(&output[..32]))
    }
}
