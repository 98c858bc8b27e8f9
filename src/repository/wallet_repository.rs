// 钱包数据访问 Repository

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Portfolio, Wallet, WalletId, WalletState};

// ============ Repository Trait ============

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// 当前选中的钱包
    async fn selected_wallet(&self) -> Result<Option<Wallet>>;

    /// 根据 ID 查询钱包
    async fn find_by_id(&self, wallet_id: WalletId) -> Result<Option<Wallet>>;

    /// 保存钱包（新建或覆盖）
    async fn save(&self, wallet: &Wallet) -> Result<()>;

    /// 删除钱包
    async fn remove(&self, wallet_id: WalletId) -> Result<()>;

    /// 按部署状态过滤
    async fn filter_by_states(&self, states: &[WalletState]) -> Result<Vec<Wallet>>;

    /// 钱包集合
    async fn portfolio(&self) -> Result<Portfolio>;

    /// 切换选中的钱包
    async fn select(&self, wallet_id: WalletId) -> Result<()>;
}

// ============ 内存实现 ============

#[derive(Default)]
struct WalletStore {
    wallets: HashMap<WalletId, Wallet>,
    portfolio: Portfolio,
}

#[derive(Default)]
pub struct InMemoryWalletRepository {
    store: RwLock<WalletStore>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn selected_wallet(&self) -> Result<Option<Wallet>> {
        let store = self.store.read().await;
        Ok(store
            .portfolio
            .selected_wallet()
            .and_then(|id| store.wallets.get(&id).cloned()))
    }

    async fn find_by_id(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.store.read().await.wallets.get(&wallet_id).cloned())
    }

    async fn save(&self, wallet: &Wallet) -> Result<()> {
        let mut store = self.store.write().await;
        store.portfolio.add_wallet(wallet.id);
        store.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn remove(&self, wallet_id: WalletId) -> Result<()> {
        let mut store = self.store.write().await;
        store.wallets.remove(&wallet_id);
        store.portfolio.remove_wallet(wallet_id);
        Ok(())
    }

    async fn filter_by_states(&self, states: &[WalletState]) -> Result<Vec<Wallet>> {
        let store = self.store.read().await;
        let mut wallets: Vec<Wallet> = store
            .wallets
            .values()
            .filter(|w| states.contains(&w.state()))
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.created_at);
        Ok(wallets)
    }

    async fn portfolio(&self) -> Result<Portfolio> {
        Ok(self.store.read().await.portfolio.clone())
    }

    async fn select(&self, wallet_id: WalletId) -> Result<()> {
        self.store.write().await.portfolio.select_wallet(wallet_id)?;
        Ok(())
    }
}
