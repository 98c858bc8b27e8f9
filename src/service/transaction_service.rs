//! 多签交易服务
//!
//! 草稿编辑 -> 手续费估算（含余额检查）-> 本设备签名 -> 第二签名方确认 -> 中继提交 -> 收据跟踪。
//! 第二签名方的确认/拒绝消息按交易摘要匹配，匹配不到的消息直接忽略。

use std::{collections::HashMap, sync::Arc, time::Duration};

use ethers::types::{Address, H256};
use serde_json::{Map, Value};
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    domain::{
        AccountId, EthSignature, IncomingMessage, OutgoingMessage, OwnerRole, OwnerSignature,
        Token, TokenAmount, TokenId, TokenInt, Transaction, TransactionDecision, TransactionId,
        TransactionStatus, TransactionType, Wallet, WalletId, WalletOperation,
    },
    error::{DomainError, DomainResult},
    infrastructure::{
        cancellation::CancellationToken,
        event_bus::{DomainEvent, EventBus},
    },
    repository::{
        AccountRepository, ExternallyOwnedAccountRepository, TransactionRepository,
        WalletRepository,
    },
    service::{
        communication_service::CommunicationDomainService,
        encryption_service::EncryptionService,
        ethereum_node::{EthereumNodeService, ReceiptStatus},
        relay_service::{EstimateTransactionRequest, SubmitTransactionRequest, TransactionRelayService},
    },
    utils::hex_format::address_to_hex,
};

pub struct TransactionDomainService {
    wallet_repository: Arc<dyn WalletRepository>,
    account_repository: Arc<dyn AccountRepository>,
    transaction_repository: Arc<dyn TransactionRepository>,
    eoa_repository: Arc<dyn ExternallyOwnedAccountRepository>,
    relay_service: Arc<dyn TransactionRelayService>,
    node_service: Arc<dyn EthereumNodeService>,
    encryption_service: Arc<dyn EncryptionService>,
    communication: Arc<CommunicationDomainService>,
    event_bus: Arc<dyn EventBus>,
}

impl TransactionDomainService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet_repository: Arc<dyn WalletRepository>,
        account_repository: Arc<dyn AccountRepository>,
        transaction_repository: Arc<dyn TransactionRepository>,
        eoa_repository: Arc<dyn ExternallyOwnedAccountRepository>,
        relay_service: Arc<dyn TransactionRelayService>,
        node_service: Arc<dyn EthereumNodeService>,
        encryption_service: Arc<dyn EncryptionService>,
        communication: Arc<CommunicationDomainService>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            wallet_repository,
            account_repository,
            transaction_repository,
            eoa_repository,
            relay_service,
            node_service,
            encryption_service,
            communication,
            event_bus,
        }
    }

    // ============ 草稿 ============

    /// 为选中的钱包新建某代币的草稿交易，金额初始为 0
    pub async fn new_draft_transaction(&self, token: &Token) -> DomainResult<TransactionId> {
        let wallet = self.selected_wallet().await?;
        let sender = wallet.address().ok_or(DomainError::InvalidWalletState {
            state: wallet.state(),
            operation: "new_draft_transaction",
        })?;

        let mut transaction = Transaction::new(
            TransactionId::new(),
            TransactionType::Outgoing,
            wallet.id,
            AccountId::new(token.id(), wallet.id),
        );
        transaction.set_sender(Some(sender))?;
        transaction.set_amount(Some(TokenAmount::new(TokenInt::zero(), token.clone())))?;
        transaction.set_operation(Some(WalletOperation::Call))?;
        self.save(&transaction).await?;

        tracing::debug!(
            transaction_id = %transaction.id,
            wallet_id = %wallet.id,
            token = %token.code,
            "Draft transaction created"
        );
        Ok(transaction.id)
    }

    /// 修改草稿的金额和接收方
    pub async fn update_transaction(
        &self,
        transaction_id: TransactionId,
        amount: TokenInt,
        recipient: Address,
    ) -> DomainResult<()> {
        let mut transaction = self.load(transaction_id).await?;
        let token = transaction
            .amount()
            .map(|a| a.token.clone())
            .ok_or(DomainError::MissingTransactionField("amount"))?;
        transaction.set_amount(Some(TokenAmount::new(amount, token)))?;
        transaction.set_recipient(Some(recipient))?;
        self.save(&transaction).await
    }

    /// 删除草稿；非草稿交易不能删除
    pub async fn remove_draft_transaction(&self, transaction_id: TransactionId) -> DomainResult<()> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status() != TransactionStatus::Draft {
            return Err(DomainError::InvalidTransactionStatus {
                from: transaction.status(),
                to: TransactionStatus::Draft,
            });
        }
        self.transaction_repository
            .remove(transaction_id)
            .await
            .map_err(DomainError::repository)
    }

    // ============ 估算 ============

    /// 请求手续费估算并检查余额，返回余额是否充足。
    /// 余额不足时交易回到 Draft。
    pub async fn estimate_transaction(&self, transaction_id: TransactionId) -> DomainResult<bool> {
        let mut transaction = self.load(transaction_id).await?;
        let wallet = self.load_wallet(transaction.wallet_id).await?;

        transaction.request_estimate()?;
        self.save(&transaction).await?;

        // Estimating 之后的任何失败都回到 Draft
        let estimating = transaction.clone();
        let sufficient = match self.complete_estimate(&mut transaction, &wallet).await {
            Ok(sufficient) => sufficient,
            Err(e) => {
                self.abandon_estimate(estimating).await;
                return Err(e);
            }
        };

        if !sufficient {
            tracing::info!(
                transaction_id = %transaction_id,
                "Insufficient funds for amount and fee"
            );
        }
        Ok(sufficient)
    }

    async fn complete_estimate(
        &self,
        transaction: &mut Transaction,
        wallet: &Wallet,
    ) -> DomainResult<bool> {
        let request = self.estimate_request(transaction, wallet)?;
        let estimate = self
            .relay_service
            .estimate_transaction(request)
            .await
            .map_err(DomainError::network)?;

        // 金额代币与手续费代币可能不同，两者都要查余额
        let mut token_ids: Vec<TokenId> = transaction.required_funds().into_keys().collect();
        let fee_token = estimate.gas_token.id();
        if !token_ids.contains(&fee_token) {
            token_ids.push(fee_token);
        }

        let mut available = HashMap::new();
        for token_id in token_ids {
            let balance = self.balance(&token_id, transaction.wallet_id).await?;
            available.insert(token_id, balance);
        }

        let sufficient = transaction.apply_estimate(estimate, &available)?;
        self.save(transaction).await?;
        Ok(sufficient)
    }

    /// 尽力把交易从 Estimating 退回 Draft；失败只记录日志
    async fn abandon_estimate(&self, mut transaction: Transaction) {
        let result = match transaction.estimate_failed() {
            Ok(()) => self.save(&transaction).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(
                transaction_id = %transaction.id,
                error = %e,
                "Failed to return transaction to draft after estimation error"
            );
        }
    }

    fn estimate_request(
        &self,
        transaction: &Transaction,
        wallet: &Wallet,
    ) -> DomainResult<EstimateTransactionRequest> {
        let safe = transaction
            .sender()
            .ok_or(DomainError::MissingTransactionField("sender"))?;
        let call = transaction
            .ethereum_call()
            .ok_or(DomainError::MissingTransactionField("recipient"))?;
        Ok(EstimateTransactionRequest {
            safe,
            to: call.to,
            value: call.value,
            data: call.data,
            operation: transaction.operation().unwrap_or(WalletOperation::Call),
            gas_token: wallet.fee_payment_token.address,
        })
    }

    async fn balance(&self, token_id: &TokenId, wallet_id: WalletId) -> DomainResult<TokenInt> {
        let account = self
            .account_repository
            .find(&AccountId::new(token_id.clone(), wallet_id))
            .await
            .map_err(DomainError::repository)?;
        Ok(account.and_then(|a| a.balance).unwrap_or_default())
    }

    // ============ 签名与确认 ============

    /// 本设备签名。配置了第二签名方时进入 AwaitingConfirmation 并发送确认请求，
    /// 否则直接进入 ReadyToSubmit。
    pub async fn sign_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> DomainResult<TransactionStatus> {
        let mut transaction = self.load(transaction_id).await?;
        let wallet = self.load_wallet(transaction.wallet_id).await?;
        let device = wallet.owner_address(OwnerRole::ThisDevice)?;
        let eoa = self
            .eoa_repository
            .find_by_address(&device)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::ExternallyOwnedAccountNotFound(address_to_hex(&device)))?;

        let hash = self
            .encryption_service
            .hash_of_transaction(&transaction)
            .map_err(DomainError::signing)?;
        let signature = self
            .encryption_service
            .sign_hash(&hash, &eoa.private_key)
            .map_err(DomainError::signing)?;
        transaction.sign_locally(hash, OwnerSignature::new(device, signature.clone()))?;

        match wallet.two_factor_owner() {
            Some(co_signer) => {
                // 确认请求送达之后才落库，推送失败时存储中仍是 ReadyToSign，可直接重签
                let safe = transaction
                    .sender()
                    .ok_or(DomainError::MissingTransactionField("sender"))?;
                transaction.await_confirmation()?;
                self.communication
                    .request_confirmation(co_signer.address, safe, hash, signature)
                    .await?;
                self.save(&transaction).await?;
            }
            None => {
                transaction.mark_ready_to_submit(wallet.confirmation_count())?;
                self.save(&transaction).await?;
            }
        }

        tracing::info!(
            transaction_id = %transaction_id,
            status = %transaction.status(),
            "Transaction signed"
        );
        Ok(transaction.status())
    }

    /// 处理第二签名方的推送消息。无法解析、类型不支持或找不到匹配交易时返回 `Ok(None)`，
    /// 否则返回被更新的交易。
    pub async fn handle_message(
        &self,
        payload: &Map<String, Value>,
    ) -> DomainResult<Option<TransactionId>> {
        let Some(message) = IncomingMessage::create(payload) else {
            tracing::debug!("Ignoring unrecognized message");
            return Ok(None);
        };

        match message {
            IncomingMessage::TransactionConfirmed(decision) => {
                self.apply_decision(decision, true).await
            }
            IncomingMessage::TransactionRejected(decision) => {
                self.apply_decision(decision, false).await
            }
            IncomingMessage::SendTransaction(m) => {
                tracing::debug!(hash = ?m.hash, "Ignoring sendTransaction message on this device");
                Ok(None)
            }
        }
    }

    async fn apply_decision(
        &self,
        decision: TransactionDecision,
        confirmed: bool,
    ) -> DomainResult<Option<TransactionId>> {
        let Some(mut transaction) = self
            .transaction_repository
            .find_by_hash(&decision.hash)
            .await
            .map_err(DomainError::repository)?
        else {
            tracing::debug!(hash = ?decision.hash, "No transaction matches decision hash");
            return Ok(None);
        };
        if transaction.status() != TransactionStatus::AwaitingConfirmation {
            return Ok(None);
        }

        let wallet = self.load_wallet(transaction.wallet_id).await?;
        let Some(signer) = self.verified_co_signer(&wallet, &decision.hash, &decision.signature)
        else {
            return Ok(None);
        };

        let applied = if confirmed {
            transaction.apply_confirmation(
                &decision.hash,
                OwnerSignature::new(signer, decision.signature),
                wallet.confirmation_count(),
            )?
        } else {
            transaction.apply_rejection(&decision.hash)?
        };
        if !applied {
            return Ok(None);
        }
        self.save(&transaction).await?;

        let event = if confirmed {
            DomainEvent::TransactionStatusUpdated {
                transaction_ids: vec![transaction.id],
            }
        } else {
            DomainEvent::TransactionRejected {
                transaction_id: transaction.id,
            }
        };
        self.publish(event).await;

        tracing::info!(
            transaction_id = %transaction.id,
            status = %transaction.status(),
            "Co-signer decision applied"
        );
        Ok(Some(transaction.id))
    }

    /// 签名者必须是钱包配置的第二签名方
    fn verified_co_signer(
        &self,
        wallet: &Wallet,
        hash: &H256,
        signature: &EthSignature,
    ) -> Option<Address> {
        let expected = wallet.two_factor_owner()?.address;
        match self.encryption_service.recover_address(hash, signature) {
            Ok(signer) if signer == expected => Some(signer),
            Ok(signer) => {
                tracing::warn!(
                    wallet_id = %wallet.id,
                    signer = %signer,
                    "Decision signed by unexpected address"
                );
                None
            }
            Err(e) => {
                tracing::warn!(wallet_id = %wallet.id, error = ?e, "Failed to recover decision signer");
                None
            }
        }
    }

    // ============ 提交与跟踪 ============

    /// 通过中继提交交易（ReadyToSubmit -> Pending），返回链上交易哈希。
    /// 中继失败时交易保持 ReadyToSubmit，可重试。
    pub async fn submit_transaction(&self, transaction_id: TransactionId) -> DomainResult<H256> {
        let mut transaction = self.load(transaction_id).await?;
        let wallet = self.load_wallet(transaction.wallet_id).await?;
        if !transaction.is_submittable() {
            return Err(DomainError::InvalidTransactionStatus {
                from: transaction.status(),
                to: TransactionStatus::Pending,
            });
        }

        let safe = transaction
            .sender()
            .ok_or(DomainError::MissingTransactionField("sender"))?;
        let call = transaction
            .ethereum_call()
            .ok_or(DomainError::MissingTransactionField("recipient"))?;
        let fee_estimate = transaction
            .fee_estimate()
            .cloned()
            .ok_or(DomainError::FeeEstimateMissing)?;
        let request = SubmitTransactionRequest {
            safe,
            to: call.to,
            value: call.value,
            data: call.data,
            operation: transaction.operation().unwrap_or(WalletOperation::Call),
            signatures: transaction
                .signatures()
                .iter()
                .map(|s| s.signature.clone())
                .collect(),
            fee_estimate,
            nonce: transaction.nonce().map(str::to_string),
        };

        let transaction_hash = self
            .relay_service
            .submit_transaction(request)
            .await
            .map_err(DomainError::network)?;

        transaction.submit(transaction_hash, wallet.confirmation_count())?;
        self.save(&transaction).await?;

        tracing::info!(
            transaction_id = %transaction_id,
            transaction_hash = ?transaction_hash,
            "Transaction submitted"
        );
        self.publish(DomainEvent::TransactionSubmitted {
            transaction_id,
            wallet_id: wallet.id,
            transaction_hash,
        })
        .await;
        self.notify_transaction_sent(&wallet, &transaction, transaction_hash)
            .await;

        Ok(transaction_hash)
    }

    /// 通知第二签名方交易已提交；失败只记录日志
    async fn notify_transaction_sent(
        &self,
        wallet: &Wallet,
        transaction: &Transaction,
        transaction_hash: H256,
    ) {
        let (Some(co_signer), Some(hash)) = (wallet.two_factor_owner(), transaction.hash()) else {
            return;
        };
        let Ok(device) = wallet.owner_address(OwnerRole::ThisDevice) else {
            return;
        };
        let message =
            OutgoingMessage::transaction_sent(co_signer.address, device, hash, transaction_hash);
        if let Err(e) = self.communication.send_message(&message).await {
            tracing::warn!(
                transaction_id = %transaction.id,
                error = %e,
                "Failed to notify co-signer about submitted transaction"
            );
        }
    }

    /// 查询所有 Pending 交易的收据并结束已上链的交易，返回状态发生变化的交易。
    /// 单笔查询或保存失败只记录日志，该交易留待下一轮。
    pub async fn update_pending_transactions(&self) -> DomainResult<Vec<TransactionId>> {
        let pending = self
            .transaction_repository
            .find_by_status(TransactionStatus::Pending)
            .await
            .map_err(DomainError::repository)?;

        let mut updated = Vec::new();
        for mut transaction in pending {
            let Some(hash) = transaction.transaction_hash() else {
                continue;
            };
            let receipt = match self.node_service.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        error = ?e,
                        "Failed to fetch transaction receipt"
                    );
                    continue;
                }
            };

            let result = match transaction.process(receipt.status == ReceiptStatus::Success) {
                Ok(()) => self.save(&transaction).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Failed to record transaction receipt"
                );
                continue;
            }
            tracing::info!(
                transaction_id = %transaction.id,
                status = %transaction.status(),
                "Transaction processed"
            );
            updated.push(transaction.id);
        }

        if !updated.is_empty() {
            self.publish(DomainEvent::TransactionStatusUpdated {
                transaction_ids: updated.clone(),
            })
            .await;
        }
        Ok(updated)
    }

    /// 后台周期检查 Pending 交易，直到被取消
    pub async fn run_pending_monitor(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Transaction monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            match self.update_pending_transactions().await {
                Ok(updated) if !updated.is_empty() => {
                    tracing::info!(count = updated.len(), "Processed pending transactions");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to process pending transactions");
                }
            }
        }

        tracing::info!("Transaction monitor stopped");
    }

    // ============ 归档 ============

    pub async fn discard_transaction(&self, transaction_id: TransactionId) -> DomainResult<()> {
        let mut transaction = self.load(transaction_id).await?;
        transaction.discard()?;
        self.save(&transaction).await
    }

    /// Discarded -> Draft
    pub async fn reset_transaction(&self, transaction_id: TransactionId) -> DomainResult<()> {
        let mut transaction = self.load(transaction_id).await?;
        transaction.reset()?;
        self.save(&transaction).await
    }

    /// 选中钱包的交易列表（不含编辑中的草稿、已归档和已拒绝的交易），最新的在前
    pub async fn all_transactions(&self) -> DomainResult<Vec<Transaction>> {
        let wallet = self.selected_wallet().await?;
        let mut transactions: Vec<Transaction> = self
            .transaction_repository
            .find_by_wallet(wallet.id)
            .await
            .map_err(DomainError::repository)?
            .into_iter()
            .filter(|tx| {
                !matches!(
                    tx.status(),
                    TransactionStatus::Draft
                        | TransactionStatus::Estimating
                        | TransactionStatus::Discarded
                        | TransactionStatus::Rejected
                )
            })
            .collect();
        transactions.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(transactions)
    }

    // ============ 内部 ============

    async fn selected_wallet(&self) -> DomainResult<Wallet> {
        self.wallet_repository
            .selected_wallet()
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::WalletNotFound("no wallet selected".to_string()))
    }

    async fn load_wallet(&self, wallet_id: WalletId) -> DomainResult<Wallet> {
        self.wallet_repository
            .find_by_id(wallet_id)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::WalletNotFound(wallet_id.to_string()))
    }

    async fn load(&self, transaction_id: TransactionId) -> DomainResult<Transaction> {
        self.transaction_repository
            .find_by_id(transaction_id)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::TransactionNotFound(transaction_id.to_string()))
    }

    async fn save(&self, transaction: &Transaction) -> DomainResult<()> {
        self.transaction_repository
            .save(transaction)
            .await
            .map_err(DomainError::repository)
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.event_bus.publish(event).await {
            tracing::error!(event_type, error = ?e, "Failed to publish transaction event");
        }
    }
}
