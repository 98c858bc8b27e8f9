//! 钱包部署状态机
//!
//! ```text
//! Draft -> Deploying -> WaitingForFirstDeposit <-> NotEnoughFunds
//!       -> CreationStarted -> TransactionHashIsKnown -> FinalizingDeployment -> ReadyToUse
//! ```
//! ReadyToUse 之前的任何状态都可以通过显式取消回到 Draft。

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    /// 草稿：正在配置owner
    Draft,
    /// 已确认部署，等待计算部署地址
    Deploying,
    /// 部署地址已知，等待首笔充值
    WaitingForFirstDeposit,
    /// 部署地址余额低于最低部署金额
    NotEnoughFunds,
    /// 余额充足，已请求广播部署交易
    CreationStarted,
    /// 部署交易哈希已知
    TransactionHashIsKnown,
    /// 部署交易已上链，等待确认
    FinalizingDeployment,
    /// 部署完成（终态）
    ReadyToUse,
}

impl WalletState {
    pub const ALL: [WalletState; 8] = [
        Self::Draft,
        Self::Deploying,
        Self::WaitingForFirstDeposit,
        Self::NotEnoughFunds,
        Self::CreationStarted,
        Self::TransactionHashIsKnown,
        Self::FinalizingDeployment,
        Self::ReadyToUse,
    ];

    pub fn is_final(&self) -> bool {
        matches!(self, Self::ReadyToUse)
    }

    /// 部署流程进行中（可取消）
    pub fn is_deploying(&self) -> bool {
        !matches!(self, Self::Draft | Self::ReadyToUse)
    }

    pub fn can_change_owners(&self) -> bool {
        matches!(self, Self::Draft | Self::ReadyToUse)
    }

    pub fn can_change_address(&self) -> bool {
        matches!(self, Self::Deploying)
    }

    pub fn can_change_transaction_hash(&self) -> bool {
        matches!(self, Self::CreationStarted)
    }

    pub fn is_waiting_for_funds(&self) -> bool {
        matches!(self, Self::WaitingForFirstDeposit | Self::NotEnoughFunds)
    }

    /// 合法的状态转换
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use WalletState::*;

        match (self, target) {
            (Draft, Deploying) => true,
            (Deploying, WaitingForFirstDeposit) => true,
            (WaitingForFirstDeposit, NotEnoughFunds)
            | (NotEnoughFunds, NotEnoughFunds)
            | (WaitingForFirstDeposit, CreationStarted)
            | (NotEnoughFunds, CreationStarted) => true,
            (CreationStarted, TransactionHashIsKnown) => true,
            (TransactionHashIsKnown, FinalizingDeployment) => true,
            (FinalizingDeployment, ReadyToUse) => true,

            // 显式取消
            (from, Draft) if from.is_deploying() => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Deploying => "deploying",
            Self::WaitingForFirstDeposit => "waiting_for_first_deposit",
            Self::NotEnoughFunds => "not_enough_funds",
            Self::CreationStarted => "creation_started",
            Self::TransactionHashIsKnown => "transaction_hash_is_known",
            Self::FinalizingDeployment => "finalizing_deployment",
            Self::ReadyToUse => "ready_to_use",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.as_str() == s)
    }
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
