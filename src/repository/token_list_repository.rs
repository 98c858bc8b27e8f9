// 代币列表 Repository

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{TokenId, TokenListItem};

#[async_trait]
pub trait TokenListItemRepository: Send + Sync {
    /// 白名单代币，按 sorting_id 排序
    async fn whitelisted(&self) -> Result<Vec<TokenListItem>>;

    /// 可支付手续费的代币（不论白名单状态），排序同上
    async fn payment_tokens(&self) -> Result<Vec<TokenListItem>>;

    async fn find(&self, token_id: &TokenId) -> Result<Option<TokenListItem>>;

    async fn save(&self, item: &TokenListItem) -> Result<()>;

    async fn all(&self) -> Result<Vec<TokenListItem>>;
}

#[derive(Default)]
pub struct InMemoryTokenListItemRepository {
    items: RwLock<HashMap<TokenId, TokenListItem>>,
}

impl InMemoryTokenListItemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered(&self, predicate: impl Fn(&TokenListItem) -> bool) -> Vec<TokenListItem> {
        let mut items: Vec<TokenListItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| predicate(*item))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.sorting_id
                .unwrap_or(u32::MAX)
                .cmp(&b.sorting_id.unwrap_or(u32::MAX))
                .then_with(|| a.token.code.cmp(&b.token.code))
        });
        items
    }
}

#[async_trait]
impl TokenListItemRepository for InMemoryTokenListItemRepository {
    async fn whitelisted(&self) -> Result<Vec<TokenListItem>> {
        Ok(self.filtered(TokenListItem::is_whitelisted).await)
    }

    async fn payment_tokens(&self) -> Result<Vec<TokenListItem>> {
        Ok(self.filtered(|item| item.can_pay_transaction_fee).await)
    }

    async fn find(&self, token_id: &TokenId) -> Result<Option<TokenListItem>> {
        Ok(self.items.read().await.get(token_id).cloned())
    }

    async fn save(&self, item: &TokenListItem) -> Result<()> {
        self.items.write().await.insert(item.id(), item.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<TokenListItem>> {
        Ok(self.items.read().await.values().cloned().collect())
    }
}
