//! 测试辅助模块
//! 提供链节点、中继、推送服务的模拟实现，以及组装好所有领域服务的测试环境

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use multisig_core::{
    config::DeploymentConfig,
    domain::{
        Account, AccountId, EthSignature, FeeEstimate, Owner, OwnerRole, Token, TokenInt,
        TokenListItem, TokenListItemStatus, Transaction, TransactionId, TransactionStatus, Wallet,
        WalletId,
    },
    infrastructure::{DomainEvent, EventBus, EventHandler, InMemoryEventBus},
    repository::{
        AccountRepository, ExternallyOwnedAccount, ExternallyOwnedAccountRepository,
        InMemoryAccountRepository, InMemoryExternallyOwnedAccountRepository,
        InMemoryTokenListItemRepository, InMemoryTransactionRepository, InMemoryWalletRepository,
        PrivateKey, TokenListItemRepository, TransactionRepository, WalletRepository,
    },
    service::{
        AccountUpdateDomainService, CommunicationDomainService, ConfirmationRequest,
        DeletePairRequest, DeploymentDomainService, EncryptionService, Erc20ContractProxy,
        EstimateTransactionRequest, EthereumNodeService, EthersEncryptionService, NotificationService,
        ReceiptStatus, SafeCreationRequest, SafeCreationTransaction, SendMessageRequest,
        SubmitTransactionRequest, TransactionDomainService, TransactionReceipt,
        TransactionRelayService,
    },
    utils::hash_to_hex,
};
use serde_json::{json, Map, Value};

pub const DEVICE_KEY: [u8; 32] = [0x11; 32];
pub const EXTENSION_KEY: [u8; 32] = [0x22; 32];

pub fn device_address() -> Address {
    EthersEncryptionService::address_of(&PrivateKey::new(DEVICE_KEY.to_vec())).unwrap()
}

pub fn extension_address() -> Address {
    EthersEncryptionService::address_of(&PrivateKey::new(EXTENSION_KEY.to_vec())).unwrap()
}

pub fn safe_address() -> Address {
    Address::repeat_byte(0x5a)
}

pub fn gno() -> Token {
    Token::new("GNO", "Gnosis", 18, Address::repeat_byte(0x60))
}

/// 不在白名单中的手续费代币
pub fn rdn() -> Token {
    Token::new("RDN", "Raiden", 18, Address::repeat_byte(0x61))
}

pub fn master_copy() -> Address {
    Address::repeat_byte(0x4c)
}

/// 轮询和重试间隔都很短的部署配置
pub fn fast_deployment_config() -> DeploymentConfig {
    DeploymentConfig {
        balance_poll_ms: 1,
        retry_max_attempts: 3,
        retry_delay_ms: 1,
        hash_poll_ms: 1,
        receipt_poll_ms: 1,
        known_master_copies: vec![master_copy()],
    }
}

// ============ 链节点 ============

#[derive(Default)]
pub struct MockNode {
    /// 每次查询余额依次返回的值；用尽后重复最后一个
    pub balances: Mutex<HashMap<Address, Vec<TokenInt>>>,
    pub erc20_balances: Mutex<HashMap<Address, TokenInt>>,
    pub failing_balance_calls: Mutex<u32>,
    pub receipts: Mutex<HashMap<H256, ReceiptStatus>>,
    pub balance_calls: Mutex<u32>,
}

impl MockNode {
    pub fn set_balance(&self, address: Address, balance: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(address, vec![TokenInt::from(balance)]);
    }

    pub fn set_balance_sequence(&self, address: Address, balances: &[u64]) {
        self.balances.lock().unwrap().insert(
            address,
            balances.iter().map(|b| TokenInt::from(*b)).collect(),
        );
    }

    pub fn set_erc20_balance(&self, contract: Address, balance: u64) {
        self.erc20_balances
            .lock()
            .unwrap()
            .insert(contract, TokenInt::from(balance));
    }

    pub fn fail_next_balance_calls(&self, count: u32) {
        *self.failing_balance_calls.lock().unwrap() = count;
    }

    pub fn set_receipt(&self, hash: H256, status: ReceiptStatus) {
        self.receipts.lock().unwrap().insert(hash, status);
    }
}

#[async_trait]
impl EthereumNodeService for MockNode {
    async fn get_balance(&self, address: Address) -> Result<TokenInt> {
        *self.balance_calls.lock().unwrap() += 1;
        {
            let mut failing = self.failing_balance_calls.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(anyhow!("connection reset"));
            }
        }
        let mut balances = self.balances.lock().unwrap();
        let sequence = balances
            .get_mut(&address)
            .ok_or_else(|| anyhow!("unknown address"))?;
        if sequence.len() > 1 {
            Ok(sequence.remove(0))
        } else {
            sequence.first().copied().ok_or_else(|| anyhow!("no balance"))
        }
    }

    async fn get_transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(&hash)
            .map(|status| TransactionReceipt {
                hash,
                status: *status,
            }))
    }
}

#[async_trait]
impl Erc20ContractProxy for MockNode {
    async fn balance_of(&self, _account: Address, contract: Address) -> Result<TokenInt> {
        self.erc20_balances
            .lock()
            .unwrap()
            .get(&contract)
            .copied()
            .ok_or_else(|| anyhow!("execution reverted"))
    }
}

// ============ 中继 ============

pub struct MockRelay {
    pub creation: Mutex<Option<SafeCreationTransaction>>,
    pub creation_requests: Mutex<Vec<SafeCreationRequest>>,
    /// 查询部署交易哈希时先返回几次 None
    pub pending_hash_polls: Mutex<u32>,
    pub creation_hash: H256,
    pub creation_started: Mutex<HashSet<Address>>,
    pub fee_estimate: Mutex<Option<FeeEstimate>>,
    pub submitted: Mutex<Vec<SubmitTransactionRequest>>,
    pub submit_hash: H256,
    pub fail_submit: Mutex<bool>,
}

impl Default for MockRelay {
    fn default() -> Self {
        Self {
            creation: Mutex::new(Some(SafeCreationTransaction {
                safe: safe_address(),
                payment: TokenInt::from(100),
                payment_token: Token::ether().address,
                master_copy: Some(master_copy()),
                contract_version: Some("1.0.0".to_string()),
            })),
            creation_requests: Mutex::new(Vec::new()),
            pending_hash_polls: Mutex::new(1),
            creation_hash: H256::repeat_byte(0xc1),
            creation_started: Mutex::new(HashSet::new()),
            fee_estimate: Mutex::new(Some(fee_estimate(10))),
            submitted: Mutex::new(Vec::new()),
            submit_hash: H256::repeat_byte(0xe5),
            fail_submit: Mutex::new(false),
        }
    }
}

/// gasPrice = 1 的手续费估算，总额等于 `total`
pub fn fee_estimate(total: u64) -> FeeEstimate {
    FeeEstimate {
        tx_gas: TokenInt::from(total),
        data_gas: TokenInt::zero(),
        operational_gas: TokenInt::zero(),
        gas_price: TokenInt::one(),
        gas_token: Token::ether(),
    }
}

#[async_trait]
impl TransactionRelayService for MockRelay {
    async fn create_safe_creation_transaction(
        &self,
        request: SafeCreationRequest,
    ) -> Result<SafeCreationTransaction> {
        self.creation_requests.lock().unwrap().push(request);
        self.creation
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("relay unavailable"))
    }

    async fn start_safe_creation(&self, safe: Address) -> Result<()> {
        self.creation_started.lock().unwrap().insert(safe);
        Ok(())
    }

    async fn safe_creation_transaction_hash(&self, safe: Address) -> Result<Option<H256>> {
        if !self.creation_started.lock().unwrap().contains(&safe) {
            return Err(anyhow!("creation not started"));
        }
        let mut pending = self.pending_hash_polls.lock().unwrap();
        if *pending > 0 {
            *pending -= 1;
            return Ok(None);
        }
        Ok(Some(self.creation_hash))
    }

    async fn estimate_transaction(&self, _request: EstimateTransactionRequest) -> Result<FeeEstimate> {
        self.fee_estimate
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("estimation failed"))
    }

    async fn submit_transaction(&self, request: SubmitTransactionRequest) -> Result<H256> {
        if *self.fail_submit.lock().unwrap() {
            return Err(anyhow!("relay rejected transaction"));
        }
        self.submitted.lock().unwrap().push(request);
        Ok(self.submit_hash)
    }
}

// ============ 推送服务 ============

#[derive(Default)]
pub struct RecordingNotifications {
    pub deleted: Mutex<Vec<DeletePairRequest>>,
    pub sent: Mutex<Vec<SendMessageRequest>>,
    pub confirmations: Mutex<Vec<ConfirmationRequest>>,
    pub fail_confirmations: Mutex<bool>,
}

#[async_trait]
impl NotificationService for RecordingNotifications {
    async fn delete_pair(&self, request: DeletePairRequest) -> Result<()> {
        self.deleted.lock().unwrap().push(request);
        Ok(())
    }

    async fn send(&self, request: SendMessageRequest) -> Result<()> {
        self.sent.lock().unwrap().push(request);
        Ok(())
    }

    async fn request_confirmation(&self, request: ConfirmationRequest) -> Result<()> {
        if *self.fail_confirmations.lock().unwrap() {
            return Err(anyhow!("push service unavailable"));
        }
        self.confirmations.lock().unwrap().push(request);
        Ok(())
    }
}

// ============ 可注入故障的存储 ============

/// 打开开关后所有读写都失败的账户存储
pub struct FaultyAccountRepository {
    pub inner: Arc<InMemoryAccountRepository>,
    pub failing: AtomicBool,
}

impl FaultyAccountRepository {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("account storage unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for FaultyAccountRepository {
    async fn save(&self, account: &Account) -> Result<()> {
        self.check()?;
        self.inner.save(account).await
    }

    async fn remove(&self, account: &Account) -> Result<()> {
        self.check()?;
        self.inner.remove(account).await
    }

    async fn find(&self, id: &AccountId) -> Result<Option<Account>> {
        self.check()?;
        self.inner.find(id).await
    }

    async fn filter_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Account>> {
        self.check()?;
        self.inner.filter_by_wallet(wallet_id).await
    }

    async fn all(&self) -> Result<Vec<Account>> {
        self.check()?;
        self.inner.all().await
    }
}

/// 对指定交易的保存返回错误的交易存储
pub struct FaultyTransactionRepository {
    pub inner: Arc<InMemoryTransactionRepository>,
    pub failing_saves: Mutex<HashSet<TransactionId>>,
}

impl FaultyTransactionRepository {
    pub fn fail_saves_of(&self, id: TransactionId) {
        self.failing_saves.lock().unwrap().insert(id);
    }

    pub fn clear_failures(&self) {
        self.failing_saves.lock().unwrap().clear();
    }
}

#[async_trait]
impl TransactionRepository for FaultyTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> Result<()> {
        if self.failing_saves.lock().unwrap().contains(&transaction.id) {
            return Err(anyhow!("transaction storage unavailable"));
        }
        self.inner.save(transaction).await
    }

    async fn remove(&self, transaction_id: TransactionId) -> Result<()> {
        self.inner.remove(transaction_id).await
    }

    async fn find_by_id(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.find_by_id(transaction_id).await
    }

    async fn find_by_hash(&self, hash: &H256) -> Result<Option<Transaction>> {
        self.inner.find_by_hash(hash).await
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        self.inner.find_by_status(status).await
    }

    async fn find_by_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        self.inner.find_by_wallet(wallet_id).await
    }
}

// ============ 事件记录 ============

#[derive(Default)]
pub struct EventRecorder {
    pub events: Mutex<Vec<DomainEvent>>,
}

impl EventRecorder {
    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(DomainEvent::event_type)
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn event_types(&self) -> Vec<&'static str> {
        vec![]
    }
}

// ============ 测试环境 ============

pub struct TestContext {
    pub wallets: Arc<InMemoryWalletRepository>,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub tokens: Arc<InMemoryTokenListItemRepository>,
    pub transactions: Arc<InMemoryTransactionRepository>,
    /// 交易服务实际使用的存储，包裹上面两个
    pub account_faults: Arc<FaultyAccountRepository>,
    pub transaction_faults: Arc<FaultyTransactionRepository>,
    pub eoas: Arc<InMemoryExternallyOwnedAccountRepository>,
    pub node: Arc<MockNode>,
    pub relay: Arc<MockRelay>,
    pub notifications: Arc<RecordingNotifications>,
    pub encryption: Arc<EthersEncryptionService>,
    pub bus: Arc<InMemoryEventBus>,
    pub events: Arc<EventRecorder>,
    pub account_update: Arc<AccountUpdateDomainService>,
    pub communication: Arc<CommunicationDomainService>,
    pub deployment: DeploymentDomainService,
    pub transaction_service: TransactionDomainService,
}

impl TestContext {
    pub async fn new() -> Self {
        let wallets = Arc::new(InMemoryWalletRepository::new());
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let tokens = Arc::new(InMemoryTokenListItemRepository::new());
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let account_faults = Arc::new(FaultyAccountRepository {
            inner: accounts.clone(),
            failing: AtomicBool::new(false),
        });
        let transaction_faults = Arc::new(FaultyTransactionRepository {
            inner: transactions.clone(),
            failing_saves: Mutex::new(HashSet::new()),
        });
        let eoas = Arc::new(InMemoryExternallyOwnedAccountRepository::new());
        let node = Arc::new(MockNode::default());
        let relay = Arc::new(MockRelay::default());
        let notifications = Arc::new(RecordingNotifications::default());
        let encryption = Arc::new(EthersEncryptionService::new());
        let bus = Arc::new(InMemoryEventBus::default());
        let events = Arc::new(EventRecorder::default());
        bus.subscribe(events.clone()).await;

        eoas.save(&ExternallyOwnedAccount::new(
            device_address(),
            PrivateKey::new(DEVICE_KEY.to_vec()),
        ))
        .await
        .unwrap();
        tokens
            .save(&TokenListItem::new(gno(), TokenListItemStatus::Whitelisted))
            .await
            .unwrap();

        let account_update = Arc::new(AccountUpdateDomainService::new(
            wallets.clone(),
            accounts.clone(),
            tokens.clone(),
            node.clone(),
            node.clone(),
            bus.clone(),
        ));
        let communication = Arc::new(CommunicationDomainService::new(
            wallets.clone(),
            eoas.clone(),
            encryption.clone(),
            notifications.clone(),
        ));
        let deployment = DeploymentDomainService::new(
            wallets.clone(),
            accounts.clone(),
            node.clone(),
            relay.clone(),
            communication.clone(),
            bus.clone(),
            fast_deployment_config(),
        );
        let transaction_service = TransactionDomainService::new(
            wallets.clone(),
            account_faults.clone(),
            transaction_faults.clone(),
            eoas.clone(),
            relay.clone(),
            node.clone(),
            encryption.clone(),
            communication.clone(),
            bus.clone(),
        );

        Self {
            wallets,
            accounts,
            tokens,
            transactions,
            account_faults,
            transaction_faults,
            eoas,
            node,
            relay,
            notifications,
            encryption,
            bus,
            events,
            account_update,
            communication,
            deployment,
            transaction_service,
        }
    }

    /// 保存一个草稿钱包；可选配置浏览器插件owner（此时阈值为 2）
    pub async fn draft_wallet(&self, with_extension: bool) -> Wallet {
        let mut wallet = Wallet::new(WalletId::new(), device_address());
        if with_extension {
            wallet
                .add_owner(Owner::new(extension_address(), OwnerRole::BrowserExtension))
                .unwrap();
            wallet.change_confirmation_count(2).unwrap();
        }
        self.wallets.save(&wallet).await.unwrap();
        wallet
    }

    /// 直接通过领域方法把钱包推进到 ReadyToUse
    pub async fn ready_wallet(&self, with_extension: bool) -> Wallet {
        self.ready_wallet_at(with_extension, safe_address()).await
    }

    pub async fn ready_wallet_at(&self, with_extension: bool, address: Address) -> Wallet {
        let mut wallet = self.draft_wallet(with_extension).await;
        wallet.start_deployment().unwrap();
        wallet
            .assign_deployment_address(address, TokenInt::from(1))
            .unwrap();
        wallet.observe_balance(TokenInt::from(1)).unwrap();
        wallet
            .assign_creation_transaction(H256::repeat_byte(0xc1))
            .unwrap();
        wallet.mark_deployment_mined().unwrap();
        wallet.finish_deployment().unwrap();
        self.wallets.save(&wallet).await.unwrap();
        wallet
    }

    pub async fn fund(&self, wallet_id: WalletId, token: &Token, balance: u64) {
        let account =
            Account::new(token.id(), wallet_id).with_balance(TokenInt::from(balance));
        self.accounts.save(&account).await.unwrap();
    }

    pub async fn published(&self) -> Vec<&'static str> {
        self.bus
            .get_event_history(usize::MAX, 0)
            .await
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| e.event.event_type())
            .collect()
    }
}

/// 第二签名方对交易摘要的决定消息
pub fn decision_payload(message_type: &str, hash: H256, key: &[u8; 32]) -> Map<String, Value> {
    let signature = EthersEncryptionService::new()
        .sign_hash(&hash, &PrivateKey::new(key.to_vec()))
        .unwrap();
    signature_payload(message_type, hash, &signature)
}

pub fn signature_payload(message_type: &str, hash: H256, signature: &EthSignature) -> Map<String, Value> {
    let value = json!({
        "type": message_type,
        "hash": hash_to_hex(&hash),
        "r": signature.r,
        "s": signature.s,
        "v": signature.v.to_string(),
    });
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
