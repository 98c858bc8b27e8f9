//! 账户余额同步服务
//!
//! 为当前选中的钱包同步原生币、白名单代币和手续费代币的链上余额。
//! 单个代币查询失败只记录在该账户上，不影响其他代币；每次调用只发布一次
//! `AccountsBalancesUpdated` 事件。同一钱包的同步串行执行。

use std::{sync::Arc, time::Duration};

use ethers::types::Address;
use futures::future::join_all;
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    domain::{Account, AccountId, Token, TokenInt, Wallet, WalletId},
    error::{DomainError, DomainResult},
    infrastructure::{
        cancellation::CancellationToken,
        event_bus::{DomainEvent, EventBus},
        keyed_lock::KeyedLock,
    },
    repository::{AccountRepository, TokenListItemRepository, WalletRepository},
    service::ethereum_node::{Erc20ContractProxy, EthereumNodeService},
};

/// 一次同步的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceSyncReport {
    pub updated: usize,
    pub failed: usize,
}

pub struct AccountUpdateDomainService {
    wallet_repository: Arc<dyn WalletRepository>,
    account_repository: Arc<dyn AccountRepository>,
    token_list_repository: Arc<dyn TokenListItemRepository>,
    node_service: Arc<dyn EthereumNodeService>,
    erc20_proxy: Arc<dyn Erc20ContractProxy>,
    event_bus: Arc<dyn EventBus>,
    sync_locks: KeyedLock<WalletId>,
}

impl AccountUpdateDomainService {
    pub fn new(
        wallet_repository: Arc<dyn WalletRepository>,
        account_repository: Arc<dyn AccountRepository>,
        token_list_repository: Arc<dyn TokenListItemRepository>,
        node_service: Arc<dyn EthereumNodeService>,
        erc20_proxy: Arc<dyn Erc20ContractProxy>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            wallet_repository,
            account_repository,
            token_list_repository,
            node_service,
            erc20_proxy,
            event_bus,
            sync_locks: KeyedLock::new(),
        }
    }

    /// 同步选中钱包的全部白名单代币和原生币余额；未选中钱包时返回 None
    pub async fn update_accounts_balances(&self) -> DomainResult<Option<BalanceSyncReport>> {
        let Some(wallet) = self.selected_wallet().await? else {
            tracing::debug!("No wallet selected, skipping balance sync");
            return Ok(None);
        };

        let _guard = self.sync_locks.lock(wallet.id).await;

        let tokens = self.tracked_tokens(&wallet).await?;
        let report = self.sync_tokens(&wallet, &tokens).await?;
        self.publish_updated(wallet.id, report).await;

        tracing::info!(
            wallet_id = %wallet.id,
            tokens = tokens.len(),
            updated = report.updated,
            failed = report.failed,
            "Account balances synced"
        );
        Ok(Some(report))
    }

    /// 同步单个代币的余额；未选中钱包时返回 None
    pub async fn update_account_balance(
        &self,
        token: &Token,
    ) -> DomainResult<Option<BalanceSyncReport>> {
        let Some(wallet) = self.selected_wallet().await? else {
            return Ok(None);
        };

        let _guard = self.sync_locks.lock(wallet.id).await;

        let report = self.sync_tokens(&wallet, std::slice::from_ref(token)).await?;
        self.publish_updated(wallet.id, report).await;
        Ok(Some(report))
    }

    /// 后台周期同步，直到被取消
    pub async fn run_periodic_sync(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Balance sync service started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            if let Err(e) = self.update_accounts_balances().await {
                tracing::error!(error = ?e, "Failed to sync account balances");
            }
        }

        tracing::info!("Balance sync service stopped");
    }

    /// 原生币、白名单代币、可支付手续费的代币以及钱包当前的手续费代币，去重
    async fn tracked_tokens(&self, wallet: &Wallet) -> DomainResult<Vec<Token>> {
        let whitelisted = self
            .token_list_repository
            .whitelisted()
            .await
            .map_err(DomainError::repository)?;
        let payment = self
            .token_list_repository
            .payment_tokens()
            .await
            .map_err(DomainError::repository)?;

        let mut tokens = vec![Token::ether()];
        let candidates = whitelisted
            .into_iter()
            .chain(payment)
            .map(|item| item.token)
            .chain(std::iter::once(wallet.fee_payment_token.clone()));
        for token in candidates {
            if !tokens.iter().any(|t| t.id() == token.id()) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    async fn selected_wallet(&self) -> DomainResult<Option<Wallet>> {
        self.wallet_repository
            .selected_wallet()
            .await
            .map_err(DomainError::repository)
    }

    /// 创建缺失账户，并发查询余额后逐个保存
    async fn sync_tokens(&self, wallet: &Wallet, tokens: &[Token]) -> DomainResult<BalanceSyncReport> {
        let mut accounts = Vec::with_capacity(tokens.len());
        for token in tokens {
            let id = AccountId::new(token.id(), wallet.id);
            let account = match self
                .account_repository
                .find(&id)
                .await
                .map_err(DomainError::repository)?
            {
                Some(account) => account,
                None => {
                    let account = Account::new(token.id(), wallet.id);
                    self.account_repository
                        .save(&account)
                        .await
                        .map_err(DomainError::repository)?;
                    tracing::debug!(account_id = %id, "Account created");
                    account
                }
            };
            accounts.push((token, account));
        }

        let mut report = BalanceSyncReport::default();
        let Some(address) = wallet.address() else {
            tracing::debug!(wallet_id = %wallet.id, "Wallet has no address yet, skipping fetch");
            return Ok(report);
        };

        let results = join_all(
            accounts
                .iter()
                .map(|(token, _)| self.fetch_balance(token, address)),
        )
        .await;

        for ((token, mut account), result) in accounts.into_iter().zip(results) {
            match result {
                Ok(balance) => {
                    account.update(balance);
                    report.updated += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        wallet_id = %wallet.id,
                        token = %token.code,
                        error = ?e,
                        "Failed to fetch balance, keeping previous value"
                    );
                    account.record_sync_failure(format!("{e:#}"));
                    report.failed += 1;
                }
            }
            self.account_repository
                .save(&account)
                .await
                .map_err(DomainError::repository)?;
        }

        Ok(report)
    }

    async fn fetch_balance(&self, token: &Token, address: Address) -> anyhow::Result<TokenInt> {
        if token.is_ether() {
            self.node_service.get_balance(address).await
        } else {
            self.erc20_proxy.balance_of(address, token.address).await
        }
    }

    async fn publish_updated(&self, wallet_id: WalletId, report: BalanceSyncReport) {
        let event = DomainEvent::AccountsBalancesUpdated {
            wallet_id,
            updated: report.updated,
            failed: report.failed,
        };
        if let Err(e) = self.event_bus.publish(event).await {
            tracing::error!(wallet_id = %wallet_id, error = ?e, "Failed to publish balance event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{TokenListItem, TokenListItemStatus},
        infrastructure::event_bus::InMemoryEventBus,
        repository::{
            InMemoryAccountRepository, InMemoryTokenListItemRepository, InMemoryWalletRepository,
        },
    };

    #[derive(Default)]
    struct FakeChain {
        ether: Mutex<Option<TokenInt>>,
        erc20: Mutex<HashMap<Address, TokenInt>>,
    }

    #[async_trait]
    impl EthereumNodeService for FakeChain {
        async fn get_balance(&self, _address: Address) -> Result<TokenInt> {
            self.ether
                .lock()
                .unwrap()
                .ok_or_else(|| anyhow!("node unavailable"))
        }

        async fn get_transaction_receipt(
            &self,
            _hash: ethers::types::H256,
        ) -> Result<Option<crate::service::ethereum_node::TransactionReceipt>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl Erc20ContractProxy for FakeChain {
        async fn balance_of(&self, _account: Address, contract: Address) -> Result<TokenInt> {
            self.erc20
                .lock()
                .unwrap()
                .get(&contract)
                .copied()
                .ok_or_else(|| anyhow!("call reverted"))
        }
    }

    struct Fixture {
        service: AccountUpdateDomainService,
        wallets: Arc<InMemoryWalletRepository>,
        accounts: Arc<InMemoryAccountRepository>,
        chain: Arc<FakeChain>,
        bus: Arc<InMemoryEventBus>,
        gno: Token,
    }

    async fn fixture() -> Fixture {
        let wallets = Arc::new(InMemoryWalletRepository::new());
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let tokens = Arc::new(InMemoryTokenListItemRepository::new());
        let chain = Arc::new(FakeChain::default());
        let bus = Arc::new(InMemoryEventBus::default());

        let gno = Token::new("GNO", "Gnosis", 18, Address::repeat_byte(0x11));
        tokens
            .save(&TokenListItem::new(gno.clone(), TokenListItemStatus::Whitelisted))
            .await
            .unwrap();

        let service = AccountUpdateDomainService::new(
            wallets.clone(),
            accounts.clone(),
            tokens,
            chain.clone(),
            chain.clone(),
            bus.clone(),
        );
        Fixture {
            service,
            wallets,
            accounts,
            chain,
            bus,
            gno,
        }
    }

    async fn deployed_wallet(wallets: &InMemoryWalletRepository) -> Wallet {
        let mut wallet = Wallet::new(WalletId::new(), Address::repeat_byte(0x01));
        wallet.start_deployment().unwrap();
        wallet
            .assign_deployment_address(Address::repeat_byte(0xaa), TokenInt::from(1))
            .unwrap();
        wallets.save(&wallet).await.unwrap();
        wallet
    }

    #[tokio::test]
    async fn test_no_selected_wallet_is_noop() {
        let f = fixture().await;
        assert_eq!(f.service.update_accounts_balances().await.unwrap(), None);
        assert!(f.accounts.all().await.unwrap().is_empty());
        assert!(f.bus.get_event_history(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_previous_balance() {
        let f = fixture().await;
        let wallet = deployed_wallet(&f.wallets).await;
        *f.chain.ether.lock().unwrap() = Some(TokenInt::from(100));

        let report = f.service.update_accounts_balances().await.unwrap().unwrap();
        assert_eq!(report, BalanceSyncReport { updated: 1, failed: 1 });

        let ether = f
            .accounts
            .find(&AccountId::new(Token::ether().id(), wallet.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ether.balance, Some(TokenInt::from(100)));

        let gno = f
            .accounts
            .find(&AccountId::new(f.gno.id(), wallet.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gno.balance, None);
        assert!(gno.last_sync_error.is_some());

        let events = f.bus.get_event_history(10, 0).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_single_token_update() {
        let f = fixture().await;
        let wallet = deployed_wallet(&f.wallets).await;
        f.chain
            .erc20
            .lock()
            .unwrap()
            .insert(f.gno.address, TokenInt::from(7));

        let report = f.service.update_account_balance(&f.gno).await.unwrap().unwrap();
        assert_eq!(report.updated, 1);
        let accounts = f.accounts.filter_by_wallet(wallet.id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].balance, Some(TokenInt::from(7)));
    }

    #[tokio::test]
    async fn test_wallet_without_address_creates_accounts_only() {
        let f = fixture().await;
        let wallet = Wallet::new(WalletId::new(), Address::repeat_byte(0x01));
        f.wallets.save(&wallet).await.unwrap();

        let report = f.service.update_accounts_balances().await.unwrap().unwrap();
        assert_eq!(report, BalanceSyncReport::default());
        assert_eq!(f.accounts.filter_by_wallet(wallet.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_periodic_sync_stops_on_cancel() {
        let f = fixture().await;
        deployed_wallet(&f.wallets).await;
        let service = Arc::new(f.service);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            service
                .clone()
                .run_periodic_sync(Duration::from_millis(5), cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(!f.bus.get_event_history(100, 0).await.unwrap().is_empty());
    }
}
