//! 多签钱包部署服务
//!
//! 部署流程：
//! 1. 向中继申请部署参数（预计算地址 + 最低部署金额）
//! 2. 轮询部署地址余额，直到达到最低部署金额
//! 3. 通知中继广播部署交易，轮询交易哈希
//! 4. 轮询收据，成功后钱包进入 ReadyToUse
//!
//! 每一步都从钱包当前状态恢复；网络错误返回可重试的 `DomainError`，钱包停留在当前状态。
//! 取消只停止本地观察，已广播的部署交易不会被撤回。

use std::sync::Arc;

use ethers::types::{Address, H256};

use crate::{
    config::DeploymentConfig,
    domain::{
        Account, AccountId, OutgoingMessage, OwnerRole, Token, Wallet, WalletId, WalletState,
    },
    error::{DomainError, DomainResult},
    infrastructure::{
        cancellation::CancellationToken,
        event_bus::{DomainEvent, EventBus},
        retry::{repeat_until, retry_async, RetryError},
    },
    repository::{AccountRepository, WalletRepository},
    service::{
        communication_service::CommunicationDomainService,
        ethereum_node::{EthereumNodeService, ReceiptStatus},
        relay_service::{SafeCreationRequest, SafeCreationTransaction, TransactionRelayService},
    },
    utils::hex_format::address_to_hex,
};

pub struct DeploymentDomainService {
    wallet_repository: Arc<dyn WalletRepository>,
    account_repository: Arc<dyn AccountRepository>,
    node_service: Arc<dyn EthereumNodeService>,
    relay_service: Arc<dyn TransactionRelayService>,
    communication: Arc<CommunicationDomainService>,
    event_bus: Arc<dyn EventBus>,
    config: DeploymentConfig,
}

fn network_error(err: RetryError<anyhow::Error>) -> DomainError {
    match err {
        RetryError::Cancelled => DomainError::Cancelled,
        RetryError::Failed(e) => DomainError::network(e),
    }
}

impl DeploymentDomainService {
    pub fn new(
        wallet_repository: Arc<dyn WalletRepository>,
        account_repository: Arc<dyn AccountRepository>,
        node_service: Arc<dyn EthereumNodeService>,
        relay_service: Arc<dyn TransactionRelayService>,
        communication: Arc<CommunicationDomainService>,
        event_bus: Arc<dyn EventBus>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            wallet_repository,
            account_repository,
            node_service,
            relay_service,
            communication,
            event_bus,
            config,
        }
    }

    /// 从钱包当前状态执行完整部署流程，返回结束时的状态。
    /// 部署交易失败时钱包回到 Draft 并返回 `Ok(WalletState::Draft)`。
    pub async fn deploy(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<WalletState> {
        loop {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            let wallet = self.load(wallet_id).await?;
            match wallet.state() {
                WalletState::Draft | WalletState::Deploying => {
                    self.start_deployment(wallet_id, cancel).await?;
                }
                WalletState::WaitingForFirstDeposit | WalletState::NotEnoughFunds => {
                    self.await_funding(wallet_id, cancel).await?;
                }
                WalletState::CreationStarted => {
                    self.start_creation(wallet_id, cancel).await?;
                }
                WalletState::TransactionHashIsKnown | WalletState::FinalizingDeployment => {
                    return self.await_mining(wallet_id, cancel).await;
                }
                WalletState::ReadyToUse => return Ok(WalletState::ReadyToUse),
            }
        }
    }

    /// Draft -> Deploying -> WaitingForFirstDeposit
    ///
    /// 在 Deploying 状态下调用会重新向中继申请部署参数。
    pub async fn start_deployment(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<Wallet> {
        let mut wallet = self.load(wallet_id).await?;
        if wallet.state() == WalletState::Draft {
            wallet.start_deployment()?;
            self.save(&wallet).await?;
            self.publish(DomainEvent::DeploymentStarted { wallet_id }).await;
        } else if wallet.state() != WalletState::Deploying {
            return Err(DomainError::InvalidWalletState {
                state: wallet.state(),
                operation: "start_deployment",
            });
        }

        let request = SafeCreationRequest {
            owners: wallet.all_owners().iter().map(|o| o.address).collect(),
            confirmation_count: wallet.confirmation_count(),
            payment_token: wallet.fee_payment_token.address,
        };
        let creation = retry_async(
            &self.config.retry_config(),
            "create_safe_creation_transaction",
            cancel,
            |_| self.relay_service.create_safe_creation_transaction(request.clone()),
        )
        .await
        .map_err(network_error)?;

        if let Err(e) = self.validate_creation(&request, &creation) {
            tracing::warn!(
                wallet_id = %wallet_id,
                error = %e,
                "Rejected safe creation response from relay"
            );
            return Err(e);
        }

        wallet.assign_deployment_address(creation.safe, creation.payment)?;
        wallet.master_copy_address = creation.master_copy;
        wallet.contract_version = creation.contract_version;
        self.save(&wallet).await?;

        let mut account = self.native_account(wallet_id).await?;
        account.update_minimum_deployment_amount(creation.payment);
        self.save_account(&account).await?;

        tracing::info!(
            wallet_id = %wallet_id,
            address = %creation.safe,
            minimum_amount = %creation.payment,
            "Wallet deployment configured"
        );
        self.publish(DomainEvent::WalletConfigured {
            wallet_id,
            address: creation.safe,
            minimum_deployment_amount: creation.payment.to_string(),
        })
        .await;

        Ok(wallet)
    }

    /// 中继返回的部署参数必须与请求一致，且使用已知的 master copy
    fn validate_creation(
        &self,
        request: &SafeCreationRequest,
        creation: &SafeCreationTransaction,
    ) -> DomainResult<()> {
        if creation.payment_token != request.payment_token {
            return Err(DomainError::InvalidSafeCreationResponse(format!(
                "payment token {} does not match requested {}",
                address_to_hex(&creation.payment_token),
                address_to_hex(&request.payment_token)
            )));
        }
        match creation.master_copy {
            Some(master_copy) if self.config.is_known_master_copy(&master_copy) => {}
            Some(master_copy) => {
                return Err(DomainError::InvalidSafeCreationResponse(format!(
                    "unknown master copy {}",
                    address_to_hex(&master_copy)
                )));
            }
            None => {
                return Err(DomainError::InvalidSafeCreationResponse(
                    "master copy is missing".to_string(),
                ));
            }
        }
        if creation.safe.is_zero() {
            return Err(DomainError::InvalidSafeCreationResponse(
                "safe address is zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 轮询部署地址余额，直到达到最低部署金额（-> CreationStarted）
    pub async fn await_funding(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        repeat_until(self.config.balance_poll_interval(), cancel, || {
            self.check_funding(wallet_id, cancel)
        })
        .await?;

        tracing::info!(wallet_id = %wallet_id, "Wallet deployment funded");
        self.publish(DomainEvent::DeploymentFunded { wallet_id }).await;
        Ok(())
    }

    async fn check_funding(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<()>> {
        let mut wallet = self.load(wallet_id).await?;
        if wallet.has_enough_funds() {
            return Ok(Some(()));
        }
        let address = self.deployment_address(&wallet, "await_funding")?;

        let balance = retry_async(&self.config.retry_config(), "get_balance", cancel, |_| {
            self.node_service.get_balance(address)
        })
        .await
        .map_err(network_error)?;

        let state = wallet.observe_balance(balance)?;
        self.save(&wallet).await?;

        let mut account = self.native_account(wallet_id).await?;
        account.update(balance);
        self.save_account(&account).await?;

        tracing::debug!(
            wallet_id = %wallet_id,
            balance = %balance,
            state = %state,
            "Deployment balance observed"
        );
        Ok((state == WalletState::CreationStarted).then_some(()))
    }

    /// 通知中继广播部署交易并等待交易哈希（-> TransactionHashIsKnown）
    pub async fn start_creation(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<H256> {
        let mut wallet = self.load(wallet_id).await?;
        if !wallet.has_enough_funds() {
            return Err(DomainError::InvalidWalletState {
                state: wallet.state(),
                operation: "start_creation",
            });
        }
        let address = self.deployment_address(&wallet, "start_creation")?;
        let retry = self.config.retry_config();

        retry_async(&retry, "start_safe_creation", cancel, |_| {
            self.relay_service.start_safe_creation(address)
        })
        .await
        .map_err(network_error)?;

        let hash = repeat_until(self.config.hash_poll_interval(), cancel, || async {
            retry_async(&retry, "safe_creation_transaction_hash", cancel, |_| {
                self.relay_service.safe_creation_transaction_hash(address)
            })
            .await
            .map_err(network_error)
        })
        .await?;

        wallet.assign_creation_transaction(hash)?;
        self.save(&wallet).await?;

        tracing::info!(
            wallet_id = %wallet_id,
            transaction_hash = ?hash,
            "Wallet creation transaction broadcast"
        );
        Ok(hash)
    }

    /// 等待部署交易收据：成功 -> ReadyToUse；失败 -> 回到 Draft
    pub async fn await_mining(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> DomainResult<WalletState> {
        let mut wallet = self.load(wallet_id).await?;
        if wallet.state() == WalletState::TransactionHashIsKnown {
            let hash = wallet
                .creation_transaction_hash()
                .ok_or(DomainError::InvalidWalletState {
                    state: wallet.state(),
                    operation: "await_mining",
                })?;
            let retry = self.config.retry_config();
            let receipt = repeat_until(self.config.receipt_poll_interval(), cancel, || async {
                retry_async(&retry, "get_transaction_receipt", cancel, |_| {
                    self.node_service.get_transaction_receipt(hash)
                })
                .await
                .map_err(network_error)
            })
            .await?;

            if receipt.status == ReceiptStatus::Failed {
                return self.fail_deployment(wallet, "creation transaction reverted").await;
            }
            wallet.mark_deployment_mined()?;
            self.save(&wallet).await?;
        }

        wallet.finish_deployment()?;
        self.save(&wallet).await?;

        let address = self.deployment_address(&wallet, "await_mining")?;
        tracing::info!(wallet_id = %wallet_id, address = %address, "Wallet deployed");
        self.publish(DomainEvent::WalletDeployed { wallet_id, address })
            .await;
        self.notify_safe_created(&wallet, address).await;

        Ok(wallet.state())
    }

    /// 显式取消部署，钱包回到 Draft
    pub async fn abort_deployment(&self, wallet_id: WalletId) -> DomainResult<()> {
        let mut wallet = self.load(wallet_id).await?;
        if wallet.state() == WalletState::Draft {
            return Ok(());
        }
        wallet.abort_deployment()?;
        self.save(&wallet).await?;

        tracing::info!(wallet_id = %wallet_id, "Wallet deployment aborted");
        self.publish(DomainEvent::DeploymentAborted { wallet_id }).await;
        Ok(())
    }

    async fn fail_deployment(&self, mut wallet: Wallet, reason: &str) -> DomainResult<WalletState> {
        wallet.abort_deployment()?;
        self.save(&wallet).await?;

        tracing::error!(wallet_id = %wallet.id, reason, "Wallet deployment failed");
        self.publish(DomainEvent::DeploymentFailed {
            wallet_id: wallet.id,
            reason: reason.to_string(),
        })
        .await;
        Ok(wallet.state())
    }

    /// 有浏览器插件owner时通知其钱包已创建；失败只记录日志
    async fn notify_safe_created(&self, wallet: &Wallet, safe: Address) {
        let Some(extension) = wallet.owner(OwnerRole::BrowserExtension) else {
            return;
        };
        let device = match wallet.owner_address(OwnerRole::ThisDevice) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(wallet_id = %wallet.id, error = %e, "Cannot notify extension");
                return;
            }
        };

        let message = OutgoingMessage::safe_created(extension.address, device, safe);
        if let Err(e) = self.communication.send_message(&message).await {
            tracing::warn!(
                wallet_id = %wallet.id,
                error = %e,
                "Failed to notify browser extension about wallet creation"
            );
        }
    }

    fn deployment_address(&self, wallet: &Wallet, operation: &'static str) -> DomainResult<Address> {
        wallet.address().ok_or(DomainError::InvalidWalletState {
            state: wallet.state(),
            operation,
        })
    }

    async fn load(&self, wallet_id: WalletId) -> DomainResult<Wallet> {
        self.wallet_repository
            .find_by_id(wallet_id)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::WalletNotFound(wallet_id.to_string()))
    }

    async fn save(&self, wallet: &Wallet) -> DomainResult<()> {
        self.wallet_repository
            .save(wallet)
            .await
            .map_err(DomainError::repository)
    }

    async fn native_account(&self, wallet_id: WalletId) -> DomainResult<Account> {
        let id = AccountId::new(Token::ether().id(), wallet_id);
        Ok(self
            .account_repository
            .find(&id)
            .await
            .map_err(DomainError::repository)?
            .unwrap_or_else(|| Account::new(id.token_id.clone(), wallet_id)))
    }

    async fn save_account(&self, account: &Account) -> DomainResult<()> {
        self.account_repository
            .save(account)
            .await
            .map_err(DomainError::repository)
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.event_bus.publish(event).await {
            tracing::error!(event_type, error = ?e, "Failed to publish deployment event");
        }
    }
}
