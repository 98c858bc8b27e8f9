// 交易数据访问 Repository

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::H256;
use tokio::sync::RwLock;

use crate::domain::{Transaction, TransactionId, TransactionStatus, WalletId};

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn save(&self, transaction: &Transaction) -> Result<()>;

    async fn remove(&self, transaction_id: TransactionId) -> Result<()>;

    async fn find_by_id(&self, transaction_id: TransactionId) -> Result<Option<Transaction>>;

    /// 按 ERC191 摘要查找
    async fn find_by_hash(&self, hash: &H256) -> Result<Option<Transaction>>;

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>>;

    async fn find_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>>;
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> Result<()> {
        self.transactions
            .write()
            .await
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn remove(&self, transaction_id: TransactionId) -> Result<()> {
        self.transactions.write().await.remove(&transaction_id);
        Ok(())
    }

    async fn find_by_id(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(&transaction_id).cloned())
    }

    async fn find_by_hash(&self, hash: &H256) -> Result<Option<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .find(|tx| tx.matches_hash(hash))
            .cloned())
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.status() == status)
            .cloned()
            .collect())
    }

    async fn find_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect())
    }
}
