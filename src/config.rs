//! 配置管理模块
//! 支持从环境变量（含 .env）和 TOML 配置文件加载配置

use std::{path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::{infrastructure::retry::RetryConfig, utils::hex_format::parse_address};

/// 核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub balance_sync: BalanceSyncConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub transaction_monitor: TransactionMonitorConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    #[serde(default)]
    pub ansi: bool,
}

/// 余额同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSyncConfig {
    /// 后台周期同步间隔（秒）
    pub interval_secs: u64,
}

/// 钱包部署配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// 等待首笔充值时查询余额的间隔（毫秒）
    pub balance_poll_ms: u64,
    /// 单次网络调用的最大尝试次数
    pub retry_max_attempts: u32,
    /// 网络调用失败后的重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// 等待部署交易哈希的轮询间隔（毫秒）
    pub hash_poll_ms: u64,
    /// 等待部署交易收据的轮询间隔（毫秒）
    pub receipt_poll_ms: u64,
    /// 可接受的 Safe master copy 合约地址
    #[serde(default = "default_master_copies")]
    pub known_master_copies: Vec<Address>,
}

/// 待上链交易监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMonitorConfig {
    pub interval_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Gnosis Safe 1.0.0 / 1.1.1 master copy
const MAINNET_MASTER_COPIES: [&str; 2] = [
    "0xb6029EA3B2c51D09a50B53CA8012FeEB05bDa35A",
    "0x34CfAC646f301356fAa8B21e94227e3583Fe3F5F",
];

fn default_master_copies() -> Vec<Address> {
    MAINNET_MASTER_COPIES
        .iter()
        .filter_map(|a| parse_address(a))
        .collect()
}

/// 逗号分隔的地址列表；无法解析的条目被忽略
fn env_addresses(key: &str) -> Option<Vec<Address>> {
    let value = std::env::var(key).ok()?;
    Some(
        value
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .filter_map(parse_address)
            .collect(),
    )
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            ansi: env_or("LOG_ANSI", false),
        }
    }
}

impl Default for BalanceSyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: env_or("BALANCE_SYNC_INTERVAL_SECS", 30),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            balance_poll_ms: env_or("DEPLOYMENT_BALANCE_POLL_MS", 2_000),
            retry_max_attempts: env_or("DEPLOYMENT_RETRY_MAX_ATTEMPTS", 10),
            retry_delay_ms: env_or("DEPLOYMENT_RETRY_DELAY_MS", 2_000),
            hash_poll_ms: env_or("DEPLOYMENT_HASH_POLL_MS", 2_000),
            receipt_poll_ms: env_or("DEPLOYMENT_RECEIPT_POLL_MS", 5_000),
            known_master_copies: env_addresses("DEPLOYMENT_MASTER_COPIES")
                .unwrap_or_else(default_master_copies),
        }
    }
}

impl Default for TransactionMonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: env_or("TX_MONITOR_INTERVAL_SECS", 10),
        }
    }
}

impl BalanceSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl DeploymentConfig {
    /// 网络调用的固定间隔重试策略
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_ms)
    }

    pub fn hash_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hash_poll_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    pub fn is_known_master_copy(&self, address: &Address) -> bool {
        self.known_master_copies.contains(address)
    }
}

impl TransactionMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl CoreConfig {
    /// 从环境变量加载配置（先读取 .env）
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            logging: LoggingConfig::default(),
            balance_sync: BalanceSyncConfig::default(),
            deployment: DeploymentConfig::default(),
            transaction_monitor: TransactionMonitorConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: CoreConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                // 文件中缺失的段落回退到环境变量默认值
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.balance_sync.interval_secs == 0 {
            anyhow::bail!("BALANCE_SYNC_INTERVAL_SECS must be greater than 0");
        }

        let deployment = &self.deployment;
        if deployment.retry_max_attempts == 0 {
            anyhow::bail!("DEPLOYMENT_RETRY_MAX_ATTEMPTS must be greater than 0");
        }
        if deployment.balance_poll_ms == 0
            || deployment.hash_poll_ms == 0
            || deployment.receipt_poll_ms == 0
        {
            anyhow::bail!("Deployment poll intervals must be greater than 0");
        }
        if deployment.known_master_copies.is_empty() {
            anyhow::bail!("DEPLOYMENT_MASTER_COPIES must list at least one address");
        }

        if self.transaction_monitor.interval_secs == 0 {
            anyhow::bail!("TX_MONITOR_INTERVAL_SECS must be greater than 0");
        }

        Ok(())
    }
}
