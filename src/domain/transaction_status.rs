//! 交易状态机
//!
//! ```text
//! Draft -> Estimating -> ReadyToSign -> SignedLocally -> [AwaitingConfirmation] -> ReadyToSubmit
//!       -> Pending -> Success | Failed
//! AwaitingConfirmation -> Rejected
//! * -> Discarded -> Draft
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// 编辑中
    Draft,

    /// 手续费估算中
    Estimating,

    /// 估算完成且余额充足，等待本设备签名
    ReadyToSign,

    /// 本设备已签名
    SignedLocally,

    /// 等待第二签名方（浏览器插件/2FA）确认
    AwaitingConfirmation,

    /// 签名数已达阈值，可以提交
    ReadyToSubmit,

    /// 已提交到链上，等待打包
    Pending,

    /// 已打包且执行成功
    Success,

    /// 执行失败或被节点拒绝
    Failed,

    /// 第二签名方拒绝
    Rejected,

    /// 已归档
    Discarded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 11] = [
        Self::Draft,
        Self::Estimating,
        Self::ReadyToSign,
        Self::SignedLocally,
        Self::AwaitingConfirmation,
        Self::ReadyToSubmit,
        Self::Pending,
        Self::Success,
        Self::Failed,
        Self::Rejected,
        Self::Discarded,
    ];

    /// 流程已结束（只能再被归档）
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Rejected)
    }

    /// 发送前的本地阶段
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Draft
                | Self::Estimating
                | Self::ReadyToSign
                | Self::SignedLocally
                | Self::AwaitingConfirmation
                | Self::ReadyToSubmit
        )
    }

    /// 签名列表可修改的阶段
    pub fn accepts_signatures(&self) -> bool {
        matches!(
            self,
            Self::ReadyToSign | Self::SignedLocally | Self::AwaitingConfirmation
        )
    }

    /// 验证状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use TransactionStatus::*;

        match (self, target) {
            (Draft, Estimating) => true,

            // 估算失败或余额不足时回到草稿
            (Estimating, ReadyToSign) | (Estimating, Draft) => true,
            (ReadyToSign, SignedLocally) | (ReadyToSign, Draft) => true,

            (SignedLocally, AwaitingConfirmation) | (SignedLocally, ReadyToSubmit) => true,
            (AwaitingConfirmation, ReadyToSubmit) | (AwaitingConfirmation, Rejected) => true,

            // 节点直接拒绝广播
            (ReadyToSubmit, Pending) | (ReadyToSubmit, Failed) => true,
            (Pending, Success) | (Pending, Failed) => true,

            (Discarded, Draft) => true,
            (Discarded, _) => false,
            (_, Discarded) => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Estimating => "estimating",
            Self::ReadyToSign => "ready_to_sign",
            Self::SignedLocally => "signed_locally",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::ReadyToSubmit => "ready_to_submit",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Discarded => "discarded",
        }
    }

    /// 从存储字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
