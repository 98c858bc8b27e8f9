//! 多签交易聚合
//!
//! 交易由本设备owner创建和签名，配置了第二签名方时需要通过消息交换取得确认，
//! 签名数达到钱包阈值且手续费已估算后才能提交。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use super::{
    ids::{AccountId, TokenId, TransactionId, WalletId},
    signature::OwnerSignature,
    token::{Token, TokenAmount, TokenInt},
    transaction_status::TransactionStatus,
};
use crate::error::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Incoming,
    Outgoing,
}

/// 多签合约的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletOperation {
    Call = 0,
    DelegateCall = 1,
    Create = 2,
}

impl WalletOperation {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Call),
            1 => Some(Self::DelegateCall),
            2 => Some(Self::Create),
            _ => None,
        }
    }
}

/// 中继服务返回的手续费估算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub tx_gas: TokenInt,
    pub data_gas: TokenInt,
    pub operational_gas: TokenInt,
    pub gas_price: TokenInt,
    pub gas_token: Token,
}

impl FeeEstimate {
    /// (txGas + dataGas + operationalGas) * gasPrice
    pub fn total(&self) -> TokenInt {
        self.tx_gas
            .saturating_add(self.data_gas)
            .saturating_add(self.operational_gas)
            .saturating_mul(self.gas_price)
    }

    pub fn total_amount(&self) -> TokenAmount {
        TokenAmount::new(self.total(), self.gas_token.clone())
    }
}

const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// 多签合约实际执行的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumCall {
    pub to: Address,
    pub value: TokenInt,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub wallet_id: WalletId,
    pub account_id: AccountId,
    status: TransactionStatus,
    sender: Option<Address>,
    recipient: Option<Address>,
    amount: Option<TokenAmount>,
    fee_estimate: Option<FeeEstimate>,
    data: Option<Vec<u8>>,
    operation: Option<WalletOperation>,
    nonce: Option<String>,
    /// 待签名的 ERC191 摘要
    hash: Option<H256>,
    /// 链上交易哈希
    transaction_hash: Option<H256>,
    signatures: Vec<OwnerSignature>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    rejected_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        transaction_type: TransactionType,
        wallet_id: WalletId,
        account_id: AccountId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            transaction_type,
            wallet_id,
            account_id,
            status: TransactionStatus::Draft,
            sender: None,
            recipient: None,
            amount: None,
            fee_estimate: None,
            data: None,
            operation: None,
            nonce: None,
            hash: None,
            transaction_hash: None,
            signatures: Vec::new(),
            created_at: now,
            updated_at: now,
            rejected_at: None,
            submitted_at: None,
            processed_at: None,
        }
    }

    // ============ 查询 ============

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn sender(&self) -> Option<Address> {
        self.sender
    }

    pub fn recipient(&self) -> Option<Address> {
        self.recipient
    }

    pub fn amount(&self) -> Option<&TokenAmount> {
        self.amount.as_ref()
    }

    pub fn fee_estimate(&self) -> Option<&FeeEstimate> {
        self.fee_estimate.as_ref()
    }

    pub fn fee(&self) -> Option<TokenAmount> {
        self.fee_estimate.as_ref().map(FeeEstimate::total_amount)
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn operation(&self) -> Option<WalletOperation> {
        self.operation
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn hash(&self) -> Option<H256> {
        self.hash
    }

    pub fn transaction_hash(&self) -> Option<H256> {
        self.transaction_hash
    }

    pub fn signatures(&self) -> &[OwnerSignature] {
        &self.signatures
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn rejected_at(&self) -> Option<DateTime<Utc>> {
        self.rejected_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn is_signed_by(&self, address: &Address) -> bool {
        self.signatures.iter().any(|s| &s.address == address)
    }

    pub fn is_submittable(&self) -> bool {
        self.status == TransactionStatus::ReadyToSubmit && self.fee_estimate.is_some()
    }

    pub fn matches_hash(&self, hash: &H256) -> bool {
        self.hash.as_ref() == Some(hash)
    }

    /// 原生币直接转账；ERC20 转为对代币合约的 transfer(recipient, amount) 调用
    pub fn ethereum_call(&self) -> Option<EthereumCall> {
        let recipient = self.recipient?;
        let amount = self.amount.as_ref()?;
        if amount.token.is_ether() {
            return Some(EthereumCall {
                to: recipient,
                value: amount.amount,
                data: self.data.clone().unwrap_or_default(),
            });
        }
        let mut data = Vec::with_capacity(4 + 64);
        data.extend_from_slice(&ERC20_TRANSFER_SELECTOR);
        data.extend_from_slice(H256::from(recipient).as_bytes());
        let mut encoded_amount = [0u8; 32];
        amount.amount.to_big_endian(&mut encoded_amount);
        data.extend_from_slice(&encoded_amount);
        Some(EthereumCall {
            to: amount.token.address,
            value: TokenInt::zero(),
            data,
        })
    }

    // ============ 草稿编辑 ============

    pub fn set_sender(&mut self, sender: Option<Address>) -> DomainResult<()> {
        self.assert_draft()?;
        self.sender = sender;
        self.touch();
        Ok(())
    }

    pub fn set_recipient(&mut self, recipient: Option<Address>) -> DomainResult<()> {
        self.assert_draft()?;
        self.recipient = recipient;
        self.touch();
        Ok(())
    }

    pub fn set_amount(&mut self, amount: Option<TokenAmount>) -> DomainResult<()> {
        self.assert_draft()?;
        self.amount = amount;
        self.touch();
        Ok(())
    }

    pub fn set_data(&mut self, data: Option<Vec<u8>>) -> DomainResult<()> {
        self.assert_draft()?;
        self.data = data;
        self.touch();
        Ok(())
    }

    pub fn set_operation(&mut self, operation: Option<WalletOperation>) -> DomainResult<()> {
        self.assert_draft()?;
        self.operation = operation;
        self.touch();
        Ok(())
    }

    pub fn set_nonce(&mut self, nonce: Option<String>) -> DomainResult<()> {
        self.assert_draft()?;
        self.nonce = nonce;
        self.touch();
        Ok(())
    }

    // ============ 手续费估算 ============

    /// Draft -> Estimating，要求发送方、接收方和金额已设置
    pub fn request_estimate(&mut self) -> DomainResult<()> {
        if self.sender.is_none() {
            return Err(DomainError::MissingTransactionField("sender"));
        }
        if self.recipient.is_none() {
            return Err(DomainError::MissingTransactionField("recipient"));
        }
        if self.amount.is_none() {
            return Err(DomainError::MissingTransactionField("amount"));
        }
        self.transition(TransactionStatus::Estimating)
    }

    /// 按代币汇总的所需资金（金额 + 手续费）
    pub fn required_funds(&self) -> HashMap<TokenId, TokenInt> {
        let mut required: HashMap<TokenId, TokenInt> = HashMap::new();
        let parts = self
            .amount
            .iter()
            .cloned()
            .chain(self.fee());
        for part in parts {
            let entry = required.entry(part.token.id()).or_default();
            *entry = entry.saturating_add(part.amount);
        }
        required
    }

    /// 每个代币的可用余额都覆盖所需资金；未知余额视为 0
    pub fn has_sufficient_funds(&self, available: &HashMap<TokenId, TokenInt>) -> bool {
        self.required_funds().iter().all(|(token, needed)| {
            available.get(token).copied().unwrap_or_default() >= *needed
        })
    }

    /// 记录估算结果并执行余额检查：充足进入 ReadyToSign，不足退回 Draft。
    /// 返回余额是否充足。
    pub fn apply_estimate(
        &mut self,
        estimate: FeeEstimate,
        available: &HashMap<TokenId, TokenInt>,
    ) -> DomainResult<bool> {
        self.assert_status(TransactionStatus::Estimating, TransactionStatus::ReadyToSign)?;
        self.fee_estimate = Some(estimate);
        if self.has_sufficient_funds(available) {
            self.transition(TransactionStatus::ReadyToSign)?;
            Ok(true)
        } else {
            self.transition(TransactionStatus::Draft)?;
            Ok(false)
        }
    }

    /// 估算失败，Estimating -> Draft
    pub fn estimate_failed(&mut self) -> DomainResult<()> {
        self.assert_status(TransactionStatus::Estimating, TransactionStatus::Draft)?;
        self.transition(TransactionStatus::Draft)
    }

    // ============ 签名与确认 ============

    /// 本设备签名：ReadyToSign -> SignedLocally
    pub fn sign_locally(&mut self, hash: H256, signature: OwnerSignature) -> DomainResult<()> {
        self.assert_status(TransactionStatus::ReadyToSign, TransactionStatus::SignedLocally)?;
        self.hash = Some(hash);
        self.add_signature(signature)?;
        self.transition(TransactionStatus::SignedLocally)
    }

    pub fn add_signature(&mut self, signature: OwnerSignature) -> DomainResult<()> {
        if !self.status.accepts_signatures() {
            return Err(DomainError::InvalidTransactionStatus {
                from: self.status,
                to: self.status,
            });
        }
        if !self.is_signed_by(&signature.address) {
            self.signatures.push(signature);
            self.touch();
        }
        Ok(())
    }

    /// SignedLocally -> AwaitingConfirmation
    pub fn await_confirmation(&mut self) -> DomainResult<()> {
        self.transition(TransactionStatus::AwaitingConfirmation)
    }

    /// 签名数达到阈值后进入 ReadyToSubmit
    pub fn mark_ready_to_submit(&mut self, threshold: usize) -> DomainResult<()> {
        self.assert_threshold(threshold)?;
        self.transition(TransactionStatus::ReadyToSubmit)
    }

    /// 处理第二签名方的确认。状态不是 AwaitingConfirmation 或哈希不匹配时忽略，返回 false。
    pub fn apply_confirmation(
        &mut self,
        hash: &H256,
        signature: OwnerSignature,
        threshold: usize,
    ) -> DomainResult<bool> {
        if !self.is_awaiting(hash) {
            return Ok(false);
        }
        self.add_signature(signature)?;
        self.mark_ready_to_submit(threshold)?;
        Ok(true)
    }

    /// 处理第二签名方的拒绝，规则同 [`Self::apply_confirmation`]
    pub fn apply_rejection(&mut self, hash: &H256) -> DomainResult<bool> {
        if !self.is_awaiting(hash) {
            return Ok(false);
        }
        self.transition(TransactionStatus::Rejected)?;
        self.rejected_at = Some(Utc::now());
        Ok(true)
    }

    fn is_awaiting(&self, hash: &H256) -> bool {
        self.status == TransactionStatus::AwaitingConfirmation && self.matches_hash(hash)
    }

    // ============ 提交与上链 ============

    /// ReadyToSubmit -> Pending，记录链上交易哈希
    pub fn submit(&mut self, transaction_hash: H256, threshold: usize) -> DomainResult<()> {
        self.assert_status(TransactionStatus::ReadyToSubmit, TransactionStatus::Pending)?;
        if self.fee_estimate.is_none() {
            return Err(DomainError::FeeEstimateMissing);
        }
        self.assert_threshold(threshold)?;
        self.transition(TransactionStatus::Pending)?;
        self.transaction_hash = Some(transaction_hash);
        self.submitted_at = Some(Utc::now());
        Ok(())
    }

    /// 节点拒绝广播：ReadyToSubmit -> Failed
    pub fn submission_failed(&mut self) -> DomainResult<()> {
        self.assert_status(TransactionStatus::ReadyToSubmit, TransactionStatus::Failed)?;
        self.transition(TransactionStatus::Failed)?;
        self.processed_at = Some(Utc::now());
        Ok(())
    }

    /// 根据收据结束 Pending 交易
    pub fn process(&mut self, success: bool) -> DomainResult<()> {
        let target = if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        self.assert_status(TransactionStatus::Pending, target)?;
        self.transition(target)?;
        self.processed_at = Some(Utc::now());
        Ok(())
    }

    // ============ 归档 ============

    pub fn discard(&mut self) -> DomainResult<()> {
        self.transition(TransactionStatus::Discarded)
    }

    /// Discarded -> Draft，清空签名、哈希和时间戳
    pub fn reset(&mut self) -> DomainResult<()> {
        self.transition(TransactionStatus::Draft)?;
        let now = Utc::now();
        self.signatures.clear();
        self.hash = None;
        self.transaction_hash = None;
        self.fee_estimate = None;
        self.created_at = now;
        self.updated_at = now;
        self.rejected_at = None;
        self.submitted_at = None;
        self.processed_at = None;
        Ok(())
    }

    // ============ 内部 ============

    fn transition(&mut self, target: TransactionStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(&target) {
            return Err(DomainError::InvalidTransactionStatus {
                from: self.status,
                to: target,
            });
        }
        tracing::debug!(
            transaction_id = %self.id,
            from = %self.status,
            to = %target,
            "Transaction status transition"
        );
        self.status = target;
        self.touch();
        Ok(())
    }

    fn assert_status(&self, expected: TransactionStatus, target: TransactionStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::InvalidTransactionStatus {
                from: self.status,
                to: target,
            });
        }
        Ok(())
    }

    fn assert_draft(&self) -> DomainResult<()> {
        self.assert_status(TransactionStatus::Draft, TransactionStatus::Draft)
    }

    fn assert_threshold(&self, threshold: usize) -> DomainResult<()> {
        if self.signatures.len() < threshold {
            return Err(DomainError::SignatureThresholdNotMet {
                have: self.signatures.len(),
                need: threshold,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signature::EthSignature;

    fn device() -> Address {
        Address::repeat_byte(0x01)
    }

    fn extension() -> Address {
        Address::repeat_byte(0x02)
    }

    fn estimate(fee: u64) -> FeeEstimate {
        FeeEstimate {
            tx_gas: TokenInt::from(fee),
            data_gas: TokenInt::zero(),
            operational_gas: TokenInt::zero(),
            gas_price: TokenInt::one(),
            gas_token: Token::ether(),
        }
    }

    fn balances(eth: u64) -> HashMap<TokenId, TokenInt> {
        HashMap::from([(Token::ether().id(), TokenInt::from(eth))])
    }

    fn draft(amount: u64) -> Transaction {
        let wallet_id = WalletId::new();
        let mut tx = Transaction::new(
            TransactionId::new(),
            TransactionType::Outgoing,
            wallet_id,
            AccountId::new(Token::ether().id(), wallet_id),
        );
        tx.set_sender(Some(Address::repeat_byte(0xaa))).unwrap();
        tx.set_recipient(Some(Address::repeat_byte(0xbb))).unwrap();
        tx.set_amount(Some(TokenAmount::ether(amount))).unwrap();
        tx
    }

    fn signature(address: Address) -> OwnerSignature {
        OwnerSignature::new(address, EthSignature::new("1", "2", 27))
    }

    fn signed(hash: H256) -> Transaction {
        let mut tx = draft(10);
        tx.request_estimate().unwrap();
        assert!(tx.apply_estimate(estimate(5), &balances(100)).unwrap());
        tx.sign_locally(hash, signature(device())).unwrap();
        tx
    }

    #[test]
    fn test_fee_total() {
        let fee = FeeEstimate {
            tx_gas: TokenInt::from(10),
            data_gas: TokenInt::from(20),
            operational_gas: TokenInt::from(5),
            gas_price: TokenInt::from(3),
            gas_token: Token::ether(),
        };
        assert_eq!(fee.total(), TokenInt::from(105));
    }

    #[test]
    fn test_request_estimate_requires_fields() {
        let wallet_id = WalletId::new();
        let mut tx = Transaction::new(
            TransactionId::new(),
            TransactionType::Outgoing,
            wallet_id,
            AccountId::new(Token::ether().id(), wallet_id),
        );
        assert!(matches!(
            tx.request_estimate(),
            Err(DomainError::MissingTransactionField("sender"))
        ));
        assert_eq!(tx.status(), TransactionStatus::Draft);
    }

    #[test]
    fn test_insufficient_funds_returns_to_draft() {
        // 余额 100，金额 50，手续费 60
        let mut tx = draft(50);
        tx.request_estimate().unwrap();
        let sufficient = tx.apply_estimate(estimate(60), &balances(100)).unwrap();
        assert!(!sufficient);
        assert_eq!(tx.status(), TransactionStatus::Draft);
        assert!(!tx.is_submittable());
        assert!(tx.sign_locally(H256::zero(), signature(device())).is_err());
    }

    #[test]
    fn test_sufficient_funds_exact_balance() {
        let mut tx = draft(40);
        tx.request_estimate().unwrap();
        assert!(tx.apply_estimate(estimate(60), &balances(100)).unwrap());
        assert_eq!(tx.status(), TransactionStatus::ReadyToSign);
    }

    #[test]
    fn test_fee_in_other_token_checked_separately() {
        let gno = Token::new("GNO", "Gnosis", 18, Address::repeat_byte(0x11));
        let mut tx = draft(50);
        tx.request_estimate().unwrap();
        let fee = FeeEstimate {
            gas_token: gno.clone(),
            ..estimate(60)
        };
        let mut available = balances(50);
        assert!(!tx.apply_estimate(fee.clone(), &available).unwrap());

        available.insert(gno.id(), TokenInt::from(60));
        tx.request_estimate().unwrap();
        assert!(tx.apply_estimate(fee, &available).unwrap());
    }

    #[test]
    fn test_editing_only_in_draft() {
        let mut tx = draft(10);
        tx.request_estimate().unwrap();
        assert!(tx.set_recipient(None).is_err());
        tx.estimate_failed().unwrap();
        assert!(tx.set_recipient(None).is_ok());
    }

    #[test]
    fn test_confirmation_flow() {
        let hash = H256::repeat_byte(0x12);
        let mut tx = signed(hash);
        tx.await_confirmation().unwrap();

        // 哈希不匹配被忽略
        let applied = tx
            .apply_confirmation(&H256::repeat_byte(0x13), signature(extension()), 2)
            .unwrap();
        assert!(!applied);
        assert_eq!(tx.status(), TransactionStatus::AwaitingConfirmation);

        assert!(tx.apply_confirmation(&hash, signature(extension()), 2).unwrap());
        assert_eq!(tx.status(), TransactionStatus::ReadyToSubmit);
        assert!(tx.is_submittable());

        // 确认后拒绝无效
        assert!(!tx.apply_rejection(&hash).unwrap());
        assert_eq!(tx.status(), TransactionStatus::ReadyToSubmit);
    }

    #[test]
    fn test_rejection_is_terminal() {
        let hash = H256::repeat_byte(0x12);
        let mut tx = signed(hash);
        tx.await_confirmation().unwrap();
        assert!(tx.apply_rejection(&hash).unwrap());
        assert_eq!(tx.status(), TransactionStatus::Rejected);
        assert!(tx.rejected_at().is_some());
        assert!(!tx.apply_confirmation(&hash, signature(extension()), 2).unwrap());
    }

    #[test]
    fn test_threshold_enforced() {
        let mut tx = signed(H256::repeat_byte(0x12));
        assert!(matches!(
            tx.mark_ready_to_submit(2),
            Err(DomainError::SignatureThresholdNotMet { have: 1, need: 2 })
        ));
        tx.mark_ready_to_submit(1).unwrap();
        tx.submit(H256::repeat_byte(0x99), 1).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Pending);
        assert!(tx.submitted_at().is_some());
    }

    #[test]
    fn test_duplicate_signature_ignored() {
        let mut tx = signed(H256::repeat_byte(0x12));
        tx.add_signature(signature(device())).unwrap();
        assert_eq!(tx.signatures().len(), 1);
    }

    #[test]
    fn test_process_and_reset() {
        let mut tx = signed(H256::repeat_byte(0x12));
        tx.mark_ready_to_submit(1).unwrap();
        tx.submit(H256::repeat_byte(0x99), 1).unwrap();
        tx.process(false).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Failed);
        assert!(tx.processed_at().is_some());

        assert!(tx.reset().is_err());
        tx.discard().unwrap();
        tx.reset().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Draft);
        assert!(tx.signatures().is_empty());
        assert!(tx.transaction_hash().is_none());
        assert!(tx.processed_at().is_none());
        // 草稿内容保留
        assert!(tx.amount().is_some());
    }

    #[test]
    fn test_ethereum_call_for_erc20_transfer() {
        let gno = Token::new("GNO", "Gnosis", 18, Address::repeat_byte(0x11));
        let mut tx = draft(1);
        tx.set_amount(Some(TokenAmount::new(258u64, gno.clone())))
            .unwrap();

        let call = tx.ethereum_call().unwrap();
        assert_eq!(call.to, gno.address);
        assert!(call.value.is_zero());
        assert_eq!(call.data.len(), 68);
        assert_eq!(&call.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&call.data[16..36], Address::repeat_byte(0xbb).as_bytes());
        assert_eq!(&call.data[66..], &[0x01, 0x02]);

        let ether_call = draft(5).ethereum_call().unwrap();
        assert_eq!(ether_call.to, Address::repeat_byte(0xbb));
        assert_eq!(ether_call.value, TokenInt::from(5));
        assert!(ether_call.data.is_empty());
    }

    #[test]
    fn test_wallet_operation_codes() {
        assert_eq!(WalletOperation::DelegateCall.as_u8(), 1);
        assert_eq!(WalletOperation::from_u8(2), Some(WalletOperation::Create));
        assert_eq!(WalletOperation::from_u8(3), None);
    }
}
