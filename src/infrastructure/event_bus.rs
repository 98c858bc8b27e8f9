// Event Bus 框架
// 领域事件发布/订阅：同步分发给本地订阅者，保留有限长度的事件历史

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{TransactionId, WalletId};

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    AccountsBalancesUpdated {
        wallet_id: WalletId,
        updated: usize,
        failed: usize,
    },
    DeploymentStarted {
        wallet_id: WalletId,
    },
    WalletConfigured {
        wallet_id: WalletId,
        address: Address,
        minimum_deployment_amount: String,
    },
    DeploymentFunded {
        wallet_id: WalletId,
    },
    WalletDeployed {
        wallet_id: WalletId,
        address: Address,
    },
    DeploymentFailed {
        wallet_id: WalletId,
        reason: String,
    },
    DeploymentAborted {
        wallet_id: WalletId,
    },
    TransactionSubmitted {
        transaction_id: TransactionId,
        wallet_id: WalletId,
        transaction_hash: H256,
    },
    TransactionStatusUpdated {
        transaction_ids: Vec<TransactionId>,
    },
    TransactionRejected {
        transaction_id: TransactionId,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AccountsBalancesUpdated { .. } => "AccountsBalancesUpdated",
            Self::DeploymentStarted { .. } => "DeploymentStarted",
            Self::WalletConfigured { .. } => "WalletConfigured",
            Self::DeploymentFunded { .. } => "DeploymentFunded",
            Self::WalletDeployed { .. } => "WalletDeployed",
            Self::DeploymentFailed { .. } => "DeploymentFailed",
            Self::DeploymentAborted { .. } => "DeploymentAborted",
            Self::TransactionSubmitted { .. } => "TransactionSubmitted",
            Self::TransactionStatusUpdated { .. } => "TransactionStatusUpdated",
            Self::TransactionRejected { .. } => "TransactionRejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event: DomainEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

// ============ Event Handler Trait ============

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<()>;

    /// 订阅的事件类型；空列表表示订阅全部
    fn event_types(&self) -> Vec<&'static str>;
}

// ============ Event Bus 接口 ============

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件，返回前已分发给所有订阅者
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// 订阅事件
    async fn subscribe(&self, handler: Arc<dyn EventHandler>);

    /// 获取事件历史（最新的在前）
    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>>;
}

// ============ 内存 Event Bus 实现 ============

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

pub struct InMemoryEventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    history: RwLock<VecDeque<EventEnvelope>>,
    capacity: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
            capacity,
        }
    }

    async fn record(&self, envelope: EventEnvelope) {
        let mut history = self.history.write().await;
        if self.capacity == 0 {
            return;
        }
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(envelope);
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };
        let event_type = envelope.event.event_type();
        tracing::debug!(event_id = %envelope.event_id, event_type, "Publishing domain event");

        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            let types = handler.event_types();
            if !types.is_empty() && !types.contains(&event_type) {
                continue;
            }
            // 订阅者失败不影响发布方
            if let Err(e) = handler.handle(&envelope.event).await {
                tracing::error!(error = ?e, event_type, "Event handler error");
            }
        }

        self.record(envelope).await;
        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    async fn get_event_history(&self, limit: usize, offset: usize) -> Result<Vec<EventEnvelope>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
