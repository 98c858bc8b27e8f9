// 外部账户（持有私钥）Repository

use std::{collections::HashMap, fmt};

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 私钥（使用Zeroize保护，Debug不输出内容）
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(***)")
    }
}

/// 本设备管理的外部账户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternallyOwnedAccount {
    pub address: Address,
    pub private_key: PrivateKey,
}

impl ExternallyOwnedAccount {
    pub fn new(address: Address, private_key: PrivateKey) -> Self {
        Self {
            address,
            private_key,
        }
    }
}

#[async_trait]
pub trait ExternallyOwnedAccountRepository: Send + Sync {
    async fn save(&self, account: &ExternallyOwnedAccount) -> Result<()>;

    async fn remove(&self, address: &Address) -> Result<()>;

    async fn find_by_address(&self, address: &Address) -> Result<Option<ExternallyOwnedAccount>>;
}

#[derive(Default)]
pub struct InMemoryExternallyOwnedAccountRepository {
    accounts: RwLock<HashMap<Address, ExternallyOwnedAccount>>,
}

impl InMemoryExternallyOwnedAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExternallyOwnedAccountRepository for InMemoryExternallyOwnedAccountRepository {
    async fn save(&self, account: &ExternallyOwnedAccount) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.address, account.clone());
        Ok(())
    }

    async fn remove(&self, address: &Address) -> Result<()> {
        self.accounts.write().await.remove(address);
        Ok(())
    }

    async fn find_by_address(&self, address: &Address) -> Result<Option<ExternallyOwnedAccount>> {
        Ok(self.accounts.read().await.get(address).cloned())
    }
}
