// 账户数据访问 Repository

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Account, AccountId, WalletId};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// 保存账户；同一 (代币, 钱包) 只保留一条
    async fn save(&self, account: &Account) -> Result<()>;

    async fn remove(&self, account: &Account) -> Result<()>;

    /// AccountId 已包含钱包ID
    async fn find(&self, id: &AccountId) -> Result<Option<Account>>;

    async fn filter_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Account>>;

    async fn all(&self) -> Result<Vec<Account>>;
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn save(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn remove(&self, account: &Account) -> Result<()> {
        self.accounts.write().await.remove(&account.id);
        Ok(())
    }

    async fn find(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn filter_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.wallet_id() == wallet_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }
}
