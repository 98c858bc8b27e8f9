//! 代币与金额

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use super::ids::TokenId;
use crate::utils::hex_format::address_to_hex;

/// 代币最小单位整数（任意精度，链上为 uint256）
pub type TokenInt = U256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub code: String,
    pub name: String,
    pub decimals: u32,
    /// 合约地址；原生币为零地址
    pub address: Address,
    pub logo_url: Option<String>,
}

impl Token {
    pub fn new(code: impl Into<String>, name: impl Into<String>, decimals: u32, address: Address) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            decimals,
            address,
            logo_url: None,
        }
    }

    /// 原生币 ETH
    pub fn ether() -> Self {
        Self::new("ETH", "Ether", 18, Address::zero())
    }

    pub fn id(&self) -> TokenId {
        TokenId::new(address_to_hex(&self.address))
    }

    pub fn is_ether(&self) -> bool {
        self.address.is_zero()
    }
}

/// 带代币的金额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub amount: TokenInt,
    pub token: Token,
}

impl TokenAmount {
    pub fn new(amount: impl Into<TokenInt>, token: Token) -> Self {
        Self {
            amount: amount.into(),
            token,
        }
    }

    pub fn ether(amount: impl Into<TokenInt>) -> Self {
        Self::new(amount, Token::ether())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenListItemStatus {
    Regular,
    Whitelisted,
    Blacklisted,
}

/// 代币列表条目（钱包是否跟踪该代币余额）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenListItem {
    pub token: Token,
    pub status: TokenListItemStatus,
    pub sorting_id: Option<u32>,
    /// 可用于支付交易手续费
    #[serde(default)]
    pub can_pay_transaction_fee: bool,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TokenListItem {
    pub fn new(token: Token, status: TokenListItemStatus) -> Self {
        Self {
            token,
            status,
            sorting_id: None,
            can_pay_transaction_fee: false,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn with_fee_payment(mut self) -> Self {
        self.can_pay_transaction_fee = true;
        self
    }

    pub fn id(&self) -> TokenId {
        self.token.id()
    }

    pub fn is_whitelisted(&self) -> bool {
        self.status == TokenListItemStatus::Whitelisted
    }
}
