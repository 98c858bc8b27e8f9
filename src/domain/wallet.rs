//! 多签钱包聚合
//!
//! 钱包拥有一组按角色区分的owner、部署状态、部署地址和最低部署金额。
//! 所有状态变更都经过 [`WalletState::can_transition_to`] 校验。

use std::{collections::BTreeMap, fmt};

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use super::{
    ids::{PortfolioId, WalletId},
    token::{Token, TokenInt},
    wallet_state::WalletState,
};
use crate::{
    error::{DomainError, DomainResult},
    utils::hex_format::address_to_hex,
};

/// Owner角色，每个角色最多一个owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRole {
    ThisDevice,
    BrowserExtension,
    Keycard,
    PaperWallet,
}

impl OwnerRole {
    /// 可作为第二签名方（2FA）的角色
    pub fn is_two_factor(&self) -> bool {
        matches!(self, Self::BrowserExtension | Self::Keycard)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThisDevice => "this_device",
            Self::BrowserExtension => "browser_extension",
            Self::Keycard => "keycard",
            Self::PaperWallet => "paper_wallet",
        }
    }
}

impl fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub address: Address,
    pub role: OwnerRole,
}

impl Owner {
    pub fn new(address: Address, role: OwnerRole) -> Self {
        Self { address, role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    state: WalletState,
    owners: BTreeMap<OwnerRole, Owner>,
    address: Option<Address>,
    minimum_deployment_amount: Option<TokenInt>,
    creation_transaction_hash: Option<H256>,
    confirmation_count: usize,
    pub fee_payment_token: Token,
    pub master_copy_address: Option<Address>,
    pub contract_version: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Wallet {
    /// 新建草稿钱包，本设备为第一个owner
    pub fn new(id: WalletId, device_owner: Address) -> Self {
        let now = chrono::Utc::now();
        let mut owners = BTreeMap::new();
        owners.insert(
            OwnerRole::ThisDevice,
            Owner::new(device_owner, OwnerRole::ThisDevice),
        );
        Self {
            id,
            state: WalletState::Draft,
            owners,
            address: None,
            minimum_deployment_amount: None,
            creation_transaction_hash: None,
            confirmation_count: 1,
            fee_payment_token: Token::ether(),
            master_copy_address: None,
            contract_version: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn minimum_deployment_amount(&self) -> Option<TokenInt> {
        self.minimum_deployment_amount
    }

    pub fn creation_transaction_hash(&self) -> Option<H256> {
        self.creation_transaction_hash
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmation_count
    }

    pub fn is_ready_to_use(&self) -> bool {
        self.state == WalletState::ReadyToUse
    }

    // ============ Owners ============

    pub fn owner(&self, role: OwnerRole) -> Option<&Owner> {
        self.owners.get(&role)
    }

    pub fn owner_address(&self, role: OwnerRole) -> DomainResult<Address> {
        self.owner(role)
            .map(|o| o.address)
            .ok_or(DomainError::OwnerNotConfigured(role))
    }

    pub fn all_owners(&self) -> Vec<&Owner> {
        self.owners.values().collect()
    }

    pub fn contains_owner(&self, address: &Address) -> bool {
        self.owners.values().any(|o| &o.address == address)
    }

    /// 已配置的第二签名方（浏览器插件或Keycard）
    pub fn two_factor_owner(&self) -> Option<&Owner> {
        self.owners.values().find(|o| o.role.is_two_factor())
    }

    pub fn add_owner(&mut self, owner: Owner) -> DomainResult<()> {
        self.assert_can_change_owners("add_owner")?;
        if self.owners.contains_key(&owner.role) || self.contains_owner(&owner.address) {
            return Err(DomainError::OwnerAlreadyExists(address_to_hex(&owner.address)));
        }
        self.owners.insert(owner.role, owner);
        self.touch();
        Ok(())
    }

    pub fn replace_owner(&mut self, owner: Owner) -> DomainResult<()> {
        self.assert_can_change_owners("replace_owner")?;
        if !self.owners.contains_key(&owner.role) {
            return Err(DomainError::OwnerNotConfigured(owner.role));
        }
        let taken_by_other = self
            .owners
            .values()
            .any(|o| o.role != owner.role && o.address == owner.address);
        if taken_by_other {
            return Err(DomainError::OwnerAlreadyExists(address_to_hex(&owner.address)));
        }
        self.owners.insert(owner.role, owner);
        self.touch();
        Ok(())
    }

    pub fn remove_owner(&mut self, role: OwnerRole) -> DomainResult<Owner> {
        self.assert_can_change_owners("remove_owner")?;
        let removed = self
            .owners
            .remove(&role)
            .ok_or(DomainError::OwnerNotConfigured(role))?;
        self.confirmation_count = self.confirmation_count.min(self.owners.len()).max(1);
        self.touch();
        Ok(removed)
    }

    pub fn change_confirmation_count(&mut self, count: usize) -> DomainResult<()> {
        self.assert_state(WalletState::Draft, "change_confirmation_count")?;
        if count == 0 || count > self.owners.len() {
            return Err(DomainError::InvalidConfirmationCount {
                count,
                owners: self.owners.len(),
            });
        }
        self.confirmation_count = count;
        self.touch();
        Ok(())
    }

    pub fn change_fee_payment_token(&mut self, token: Token) -> DomainResult<()> {
        self.assert_state(WalletState::Draft, "change_fee_payment_token")?;
        self.fee_payment_token = token;
        self.touch();
        Ok(())
    }

    // ============ 部署状态机 ============

    /// Draft -> Deploying，要求本设备owner已配置
    pub fn start_deployment(&mut self) -> DomainResult<()> {
        self.owner_address(OwnerRole::ThisDevice)?;
        if self.confirmation_count > self.owners.len() {
            return Err(DomainError::InvalidConfirmationCount {
                count: self.confirmation_count,
                owners: self.owners.len(),
            });
        }
        self.transition(WalletState::Deploying, "start_deployment")
    }

    /// Deploying -> WaitingForFirstDeposit：记录预计算地址和最低部署金额
    pub fn assign_deployment_address(
        &mut self,
        address: Address,
        minimum_amount: TokenInt,
    ) -> DomainResult<()> {
        if !self.state.can_change_address() {
            return Err(self.invalid("assign_deployment_address"));
        }
        self.address = Some(address);
        self.minimum_deployment_amount = Some(minimum_amount);
        self.transition(
            WalletState::WaitingForFirstDeposit,
            "assign_deployment_address",
        )
    }

    /// 根据部署地址的当前余额推进状态，返回新状态
    pub fn observe_balance(&mut self, balance: TokenInt) -> DomainResult<WalletState> {
        if !self.state.is_waiting_for_funds() {
            return Err(self.invalid("observe_balance"));
        }
        let minimum = self.minimum_deployment_amount.unwrap_or_default();
        let next = if balance >= minimum {
            WalletState::CreationStarted
        } else {
            WalletState::NotEnoughFunds
        };
        self.transition(next, "observe_balance")?;
        Ok(next)
    }

    pub fn has_enough_funds(&self) -> bool {
        self.state == WalletState::CreationStarted
    }

    /// CreationStarted -> TransactionHashIsKnown
    pub fn assign_creation_transaction(&mut self, hash: H256) -> DomainResult<()> {
        if !self.state.can_change_transaction_hash() {
            return Err(self.invalid("assign_creation_transaction"));
        }
        self.creation_transaction_hash = Some(hash);
        self.transition(
            WalletState::TransactionHashIsKnown,
            "assign_creation_transaction",
        )
    }

    /// TransactionHashIsKnown -> FinalizingDeployment
    pub fn mark_deployment_mined(&mut self) -> DomainResult<()> {
        self.transition(WalletState::FinalizingDeployment, "mark_deployment_mined")
    }

    /// FinalizingDeployment -> ReadyToUse（终态，地址此后不可变）
    pub fn finish_deployment(&mut self) -> DomainResult<()> {
        self.transition(WalletState::ReadyToUse, "finish_deployment")
    }

    /// 取消部署回到 Draft，清空部署地址和资金要求；Draft 下为空操作
    pub fn abort_deployment(&mut self) -> DomainResult<()> {
        if self.state == WalletState::Draft {
            return Ok(());
        }
        self.transition(WalletState::Draft, "abort_deployment")?;
        self.address = None;
        self.minimum_deployment_amount = None;
        self.creation_transaction_hash = None;
        Ok(())
    }

    fn transition(&mut self, target: WalletState, operation: &'static str) -> DomainResult<()> {
        if !self.state.can_transition_to(&target) {
            return Err(self.invalid(operation));
        }
        tracing::debug!(
            wallet_id = %self.id,
            from = %self.state,
            to = %target,
            "Wallet state transition"
        );
        self.state = target;
        self.touch();
        Ok(())
    }

    fn assert_state(&self, state: WalletState, operation: &'static str) -> DomainResult<()> {
        if self.state != state {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn assert_can_change_owners(&self, operation: &'static str) -> DomainResult<()> {
        if !self.state.can_change_owners() {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> DomainError {
        DomainError::InvalidWalletState {
            state: self.state,
            operation,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

/// 钱包集合，同一时间只有一个被选中的钱包
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: PortfolioId,
    wallets: Vec<WalletId>,
    selected_wallet: Option<WalletId>,
}

impl Portfolio {
    pub fn new(id: PortfolioId) -> Self {
        Self {
            id,
            wallets: Vec::new(),
            selected_wallet: None,
        }
    }

    pub fn wallets(&self) -> &[WalletId] {
        &self.wallets
    }

    pub fn selected_wallet(&self) -> Option<WalletId> {
        self.selected_wallet
    }

    /// 添加钱包；第一个钱包自动被选中
    pub fn add_wallet(&mut self, id: WalletId) {
        if !self.wallets.contains(&id) {
            self.wallets.push(id);
        }
        if self.selected_wallet.is_none() {
            self.selected_wallet = Some(id);
        }
    }

    pub fn remove_wallet(&mut self, id: WalletId) {
        self.wallets.retain(|w| *w != id);
        if self.selected_wallet == Some(id) {
            self.selected_wallet = self.wallets.first().copied();
        }
    }

    pub fn select_wallet(&mut self, id: WalletId) -> DomainResult<()> {
        if !self.wallets.contains(&id) {
            return Err(DomainError::WalletNotFound(id.to_string()));
        }
        self.selected_wallet = Some(id);
        Ok(())
    }
}
