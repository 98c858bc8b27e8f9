//! owner之间的消息协议
//!
//! 收到的消息（推送payload）按固定顺序逐类型严格解析，任何字段缺失、
//! 十六进制或数字格式错误、签名越界都会使该类型解析失败。
//! 发出的消息序列化为按key排序的JSON，供接收方确定性验签。

use std::collections::BTreeMap;

use ethers::types::{Address, H256};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    signature::{parse_decimal, EcdsaSignatureBounds, EthSignature},
    token::TokenInt,
    transaction::WalletOperation,
};
use crate::utils::hex_format::{address_to_hex, hash_to_hex, parse_address, parse_hash, parse_hex_bytes};

pub const CONFIRM_TRANSACTION_TYPE: &str = "confirmTransaction";
pub const REJECT_TRANSACTION_TYPE: &str = "rejectTransaction";
pub const SEND_TRANSACTION_TYPE: &str = "sendTransaction";
pub const SAFE_CREATED_TYPE: &str = "safeCreation";
pub const TRANSACTION_SENT_TYPE: &str = "sendTransactionHash";

// ============ 收到的消息 ============

/// 对交易的确认或拒绝：ERC191 摘要 + 签名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDecision {
    pub hash: H256,
    pub signature: EthSignature,
}

/// 第二签名方发起的完整交易提案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTransactionMessage {
    pub hash: H256,
    pub safe: Address,
    pub to: Address,
    pub value: TokenInt,
    pub data: Vec<u8>,
    pub operation: WalletOperation,
    pub tx_gas: TokenInt,
    pub data_gas: TokenInt,
    pub operational_gas: TokenInt,
    pub gas_price: TokenInt,
    pub gas_token: Address,
    pub nonce: u64,
    pub signature: EthSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    TransactionConfirmed(TransactionDecision),
    TransactionRejected(TransactionDecision),
    SendTransaction(SendTransactionMessage),
}

impl IncomingMessage {
    /// 依次尝试 confirmed -> rejected -> sendTransaction，返回第一个解析成功的
    pub fn create(payload: &Map<String, Value>) -> Option<Self> {
        parse_decision(payload, CONFIRM_TRANSACTION_TYPE)
            .map(Self::TransactionConfirmed)
            .or_else(|| parse_decision(payload, REJECT_TRANSACTION_TYPE).map(Self::TransactionRejected))
            .or_else(|| parse_send_transaction(payload).map(Self::SendTransaction))
    }

    /// 非对象payload直接返回 None
    pub fn from_value(payload: &Value) -> Option<Self> {
        payload.as_object().and_then(Self::create)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::TransactionConfirmed(_) => CONFIRM_TRANSACTION_TYPE,
            Self::TransactionRejected(_) => REJECT_TRANSACTION_TYPE,
            Self::SendTransaction(_) => SEND_TRANSACTION_TYPE,
        }
    }

    pub fn hash(&self) -> &H256 {
        match self {
            Self::TransactionConfirmed(d) | Self::TransactionRejected(d) => &d.hash,
            Self::SendTransaction(m) => &m.hash,
        }
    }

    pub fn signature(&self) -> &EthSignature {
        match self {
            Self::TransactionConfirmed(d) | Self::TransactionRejected(d) => &d.signature,
            Self::SendTransaction(m) => &m.signature,
        }
    }
}

#[derive(Deserialize)]
struct RawDecision {
    #[serde(rename = "type")]
    kind: String,
    hash: String,
    r: String,
    s: String,
    v: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSendTransaction {
    #[serde(rename = "type")]
    kind: String,
    hash: String,
    safe: String,
    to: String,
    value: String,
    data: String,
    operation: String,
    tx_gas: String,
    data_gas: String,
    operational_gas: String,
    gas_price: String,
    gas_token: String,
    nonce: String,
    r: String,
    s: String,
    v: String,
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &Map<String, Value>) -> Option<T> {
    serde_json::from_value(Value::Object(payload.clone())).ok()
}

fn parse_signature(r: String, s: String, v: &str) -> Option<EthSignature> {
    let v: i64 = v.parse().ok()?;
    if !EcdsaSignatureBounds::is_within_bounds(&r, &s, v) {
        return None;
    }
    Some(EthSignature::new(r, s, u8::try_from(v).ok()?))
}

fn parse_decision(payload: &Map<String, Value>, expected_type: &str) -> Option<TransactionDecision> {
    let raw: RawDecision = decode(payload)?;
    if raw.kind != expected_type {
        return None;
    }
    let hash = parse_hash(&raw.hash)?;
    let signature = parse_signature(raw.r, raw.s, &raw.v)?;
    Some(TransactionDecision { hash, signature })
}

fn parse_send_transaction(payload: &Map<String, Value>) -> Option<SendTransactionMessage> {
    let raw: RawSendTransaction = decode(payload)?;
    if raw.kind != SEND_TRANSACTION_TYPE {
        return None;
    }
    let operation = raw
        .operation
        .parse::<u8>()
        .ok()
        .and_then(WalletOperation::from_u8)?;
    Some(SendTransactionMessage {
        hash: parse_hash(&raw.hash)?,
        safe: parse_address(&raw.safe)?,
        to: parse_address(&raw.to)?,
        value: parse_decimal(&raw.value)?,
        data: parse_hex_bytes(&raw.data)?,
        operation,
        tx_gas: parse_decimal(&raw.tx_gas)?,
        data_gas: parse_decimal(&raw.data_gas)?,
        operational_gas: parse_decimal(&raw.operational_gas)?,
        gas_price: parse_decimal(&raw.gas_price)?,
        gas_token: parse_address(&raw.gas_token)?,
        nonce: raw.nonce.parse().ok()?,
        signature: parse_signature(raw.r, raw.s, &raw.v)?,
    })
}

// ============ 发出的消息 ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingPayload {
    /// 钱包部署完成
    SafeCreated { safe: Address },
    /// 交易已提交到链上
    TransactionSent { hash: H256, transaction_hash: H256 },
}

/// 设备发给其他owner的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Address,
    pub from: Address,
    pub payload: OutgoingPayload,
}

impl OutgoingMessage {
    pub fn safe_created(to: Address, from: Address, safe: Address) -> Self {
        Self {
            to,
            from,
            payload: OutgoingPayload::SafeCreated { safe },
        }
    }

    pub fn transaction_sent(to: Address, from: Address, hash: H256, transaction_hash: H256) -> Self {
        Self {
            to,
            from,
            payload: OutgoingPayload::TransactionSent {
                hash,
                transaction_hash,
            },
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self.payload {
            OutgoingPayload::SafeCreated { .. } => SAFE_CREATED_TYPE,
            OutgoingPayload::TransactionSent { .. } => TRANSACTION_SENT_TYPE,
        }
    }

    /// 按key排序的紧凑JSON
    pub fn string_value(&self) -> String {
        let mut fields: BTreeMap<&'static str, String> = BTreeMap::new();
        fields.insert("type", self.message_type().to_string());
        match &self.payload {
            OutgoingPayload::SafeCreated { safe } => {
                fields.insert("safe", address_to_hex(safe));
            }
            OutgoingPayload::TransactionSent {
                hash,
                transaction_hash,
            } => {
                fields.insert("hash", hash_to_hex(hash));
                fields.insert("chainHash", hash_to_hex(transaction_hash));
            }
        }
        // 字符串map的序列化不会失败
        serde_json::to_string(&fields).unwrap_or_default()
    }
}
