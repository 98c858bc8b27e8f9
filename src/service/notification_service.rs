//! 推送通知服务接口（与浏览器插件等第二签名方通信）

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256};

use crate::domain::EthSignature;

/// 解除配对：签名内容为 "GNO" + 对端地址字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePairRequest {
    /// 与签名内容一致的原始字符串
    pub other: String,
    pub signature: EthSignature,
}

/// 发送已签名的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub to: Vec<Address>,
    pub from: Address,
    pub message: String,
    pub signature: EthSignature,
}

/// 请求第二签名方确认交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub to: Vec<Address>,
    pub safe: Address,
    pub hash: H256,
    pub signature: EthSignature,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn delete_pair(&self, request: DeletePairRequest) -> Result<()>;

    async fn send(&self, request: SendMessageRequest) -> Result<()>;

    async fn request_confirmation(&self, request: ConfirmationRequest) -> Result<()>;
}
