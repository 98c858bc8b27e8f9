//! 与第二签名方的通信
//!
//! 消息都用本设备owner的私钥签名后交给推送通知服务。

use std::sync::Arc;

use ethers::types::{Address, H256};

use crate::{
    domain::{EthSignature, OutgoingMessage, OwnerRole, WalletId},
    error::{DomainError, DomainResult},
    repository::{ExternallyOwnedAccount, ExternallyOwnedAccountRepository, WalletRepository},
    service::{
        encryption_service::EncryptionService,
        notification_service::{
            ConfirmationRequest, DeletePairRequest, NotificationService, SendMessageRequest,
        },
    },
    utils::hex_format::{address_to_hex, parse_address},
};

const DELETE_PAIR_PREFIX: &str = "GNO";

pub struct CommunicationDomainService {
    wallet_repository: Arc<dyn WalletRepository>,
    eoa_repository: Arc<dyn ExternallyOwnedAccountRepository>,
    encryption_service: Arc<dyn EncryptionService>,
    notification_service: Arc<dyn NotificationService>,
}

impl CommunicationDomainService {
    pub fn new(
        wallet_repository: Arc<dyn WalletRepository>,
        eoa_repository: Arc<dyn ExternallyOwnedAccountRepository>,
        encryption_service: Arc<dyn EncryptionService>,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            wallet_repository,
            eoa_repository,
            encryption_service,
            notification_service,
        }
    }

    /// 解除与对端设备的配对。签名内容为 "GNO" + 对端地址字符串，
    /// 按调用方传入的原样拼接（对端按同一字符串验签），只校验它是合法地址。
    pub async fn delete_pair(&self, wallet_id: WalletId, other: &str) -> DomainResult<()> {
        if parse_address(other).is_none() {
            return Err(DomainError::InvalidAddress(other.to_string()));
        }
        let wallet = self
            .wallet_repository
            .find_by_id(wallet_id)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::WalletNotFound(wallet_id.to_string()))?;
        let device = wallet.owner_address(OwnerRole::ThisDevice)?;
        let eoa = self.externally_owned_account(&device).await?;

        let message = format!("{}{}", DELETE_PAIR_PREFIX, other);
        let signature = self
            .encryption_service
            .sign(message.as_bytes(), &eoa.private_key)
            .map_err(DomainError::signing)?;

        self.notification_service
            .delete_pair(DeletePairRequest {
                other: other.to_string(),
                signature,
            })
            .await
            .map_err(DomainError::network)?;

        tracing::info!(wallet_id = %wallet_id, other, "Pair deleted");
        Ok(())
    }

    /// 用发送方私钥签名消息正文后发送
    pub async fn send_message(&self, message: &OutgoingMessage) -> DomainResult<()> {
        let eoa = self.externally_owned_account(&message.from).await?;
        let body = message.string_value();
        let signature = self
            .encryption_service
            .sign(body.as_bytes(), &eoa.private_key)
            .map_err(DomainError::signing)?;

        self.notification_service
            .send(SendMessageRequest {
                to: vec![message.to],
                from: message.from,
                message: body,
                signature,
            })
            .await
            .map_err(DomainError::network)?;

        tracing::debug!(
            message_type = message.message_type(),
            to = %message.to,
            "Message sent"
        );
        Ok(())
    }

    /// 请求第二签名方确认交易，附带本设备对交易摘要的签名
    pub async fn request_confirmation(
        &self,
        to: Address,
        safe: Address,
        hash: H256,
        signature: EthSignature,
    ) -> DomainResult<()> {
        self.notification_service
            .request_confirmation(ConfirmationRequest {
                to: vec![to],
                safe,
                hash,
                signature,
            })
            .await
            .map_err(DomainError::network)?;

        tracing::debug!(to = %to, safe = %safe, hash = ?hash, "Confirmation requested");
        Ok(())
    }

    async fn externally_owned_account(&self, address: &Address) -> DomainResult<ExternallyOwnedAccount> {
        self.eoa_repository
            .find_by_address(address)
            .await
            .map_err(DomainError::repository)?
            .ok_or_else(|| DomainError::ExternallyOwnedAccountNotFound(address_to_hex(address)))
    }
}
