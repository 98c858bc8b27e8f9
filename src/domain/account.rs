//! 钱包代币账户
//!
//! 每个 (代币, 钱包) 对至多一个账户，余额以代币最小单位存储。

use serde::{Deserialize, Serialize};

use super::{
    ids::{AccountId, TokenId, WalletId},
    token::TokenInt,
};
use crate::error::{DomainError, DomainResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// 余额；None 表示尚未同步过
    pub balance: Option<TokenInt>,
    pub minimum_deployment_transaction_amount: TokenInt,
    /// 最近一次成功同步余额的时间
    pub balance_updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// 最近一次同步失败的原因（成功后清空）
    pub last_sync_error: Option<String>,
}

impl Account {
    pub fn new(token_id: TokenId, wallet_id: WalletId) -> Self {
        Self {
            id: AccountId::new(token_id, wallet_id),
            balance: None,
            minimum_deployment_transaction_amount: TokenInt::zero(),
            balance_updated_at: None,
            last_sync_error: None,
        }
    }

    pub fn with_balance(mut self, balance: TokenInt) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn wallet_id(&self) -> WalletId {
        self.id.wallet_id
    }

    pub fn token_id(&self) -> &TokenId {
        &self.id.token_id
    }

    pub fn update(&mut self, new_amount: TokenInt) {
        self.balance = Some(new_amount);
        self.balance_updated_at = Some(chrono::Utc::now());
        self.last_sync_error = None;
    }

    /// 同步失败只记录原因，余额保持不变
    pub fn record_sync_failure(&mut self, reason: impl Into<String>) {
        self.last_sync_error = Some(reason.into());
    }

    pub fn add(&mut self, amount: TokenInt) {
        let current = self.balance.unwrap_or_default();
        self.balance = Some(current.saturating_add(amount));
    }

    pub fn withdraw(&mut self, amount: TokenInt) -> DomainResult<()> {
        match self.balance {
            Some(current) if current >= amount => {
                self.balance = Some(current - amount);
                Ok(())
            }
            current => Err(DomainError::InsufficientFunds {
                required: amount.to_string(),
                available: current.unwrap_or_default().to_string(),
            }),
        }
    }

    pub fn update_minimum_deployment_amount(&mut self, amount: TokenInt) {
        self.minimum_deployment_transaction_amount = amount;
    }
}
