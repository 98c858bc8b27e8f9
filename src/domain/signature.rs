//! ECDSA 签名值与边界校验

use ethers::types::{Address, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// secp256k1 曲线阶 n
pub static SECP256K1_N: Lazy<U256> = Lazy::new(|| {
    U256::from_dec_str(
        "115792089237316195423570985008687907852837564279074904382605163141518161494337",
    )
    .unwrap_or_else(|_| U256::MAX)
});

/// 以太坊签名 {r, s, v}，r/s 为十进制字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

impl EthSignature {
    pub fn new(r: impl Into<String>, s: impl Into<String>, v: u8) -> Self {
        Self {
            r: r.into(),
            s: s.into(),
            v,
        }
    }
}

/// 签名分量取值范围：0 <= r < n，0 <= s <= n/2，v ∈ {27, 28}
pub struct EcdsaSignatureBounds;

impl EcdsaSignatureBounds {
    pub fn is_within_bounds(r: &str, s: &str, v: i64) -> bool {
        let (Some(r), Some(s)) = (parse_decimal(r), parse_decimal(s)) else {
            return false;
        };
        Self::is_within_bounds_u256(r, s, v)
    }

    pub fn is_within_bounds_u256(r: U256, s: U256, v: i64) -> bool {
        let n = *SECP256K1_N;
        r < n && s < n / 2 + 1 && (27..=28).contains(&v)
    }
}

/// 严格十进制解析（空串返回 None）
pub fn parse_decimal(value: &str) -> Option<U256> {
    if value.is_empty() {
        return None;
    }
    U256::from_dec_str(value).ok()
}

/// 某个owner对交易的签名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSignature {
    pub address: Address,
    pub signature: EthSignature,
}

impl OwnerSignature {
    pub fn new(address: Address, signature: EthSignature) -> Self {
        Self { address, signature }
    }
}
