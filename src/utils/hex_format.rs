//! 0x 前缀十六进制编解码工具
//!
//! 对外输出统一使用小写十六进制；解析时 0x 前缀可选。

use ethers::types::{Address, H256};

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn address_to_hex(address: &Address) -> String {
    bytes_to_hex(address.as_bytes())
}

pub fn hash_to_hex(hash: &H256) -> String {
    bytes_to_hex(hash.as_bytes())
}

/// 解析十六进制字节串，非法字符或奇数长度返回 None
pub fn parse_hex_bytes(value: &str) -> Option<Vec<u8>> {
    let stripped = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    hex::decode(stripped).ok()
}

/// 解析20字节地址
pub fn parse_address(value: &str) -> Option<Address> {
    let bytes = parse_hex_bytes(value)?;
    if bytes.len() != Address::len_bytes() {
        return None;
    }
    Some(Address::from_slice(&bytes))
}

/// 解析32字节哈希
pub fn parse_hash(value: &str) -> Option<H256> {
    let bytes = parse_hex_bytes(value)?;
    if bytes.len() != H256::len_bytes() {
        return None;
    }
    Some(H256::from_slice(&bytes))
}
