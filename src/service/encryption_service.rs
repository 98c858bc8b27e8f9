//! 签名服务
//!
//! 交易摘要、ECDSA 签名和签名者恢复。`EthersEncryptionService` 基于 ethers-rs 的 secp256k1 实现。

use anyhow::{anyhow, Context, Result};
use ethers::{
    signers::LocalWallet,
    types::{Address, Signature, H256},
    utils::keccak256,
};

use crate::{
    domain::{signature::parse_decimal, EthSignature, Transaction, WalletOperation},
    repository::PrivateKey,
};

pub trait EncryptionService: Send + Sync {
    /// 交易的 ERC191 摘要（owner 签名的对象）
    fn hash_of_transaction(&self, transaction: &Transaction) -> Result<H256>;

    /// 对 keccak256(message) 签名
    fn sign(&self, message: &[u8], key: &PrivateKey) -> Result<EthSignature> {
        self.sign_hash(&H256::from(keccak256(message)), key)
    }

    fn sign_hash(&self, hash: &H256, key: &PrivateKey) -> Result<EthSignature>;

    /// 从签名恢复签名者地址
    fn recover_address(&self, hash: &H256, signature: &EthSignature) -> Result<Address>;
}

#[derive(Debug, Default, Clone)]
pub struct EthersEncryptionService;

impl EthersEncryptionService {
    pub fn new() -> Self {
        Self
    }

    /// 私钥对应的地址
    pub fn address_of(key: &PrivateKey) -> Result<Address> {
        let wallet = LocalWallet::from_bytes(key.as_bytes()).context("Invalid private key")?;
        Ok(ethers::signers::Signer::address(&wallet))
    }
}

impl EncryptionService for EthersEncryptionService {
    fn hash_of_transaction(&self, transaction: &Transaction) -> Result<H256> {
        let safe = transaction
            .sender()
            .ok_or_else(|| anyhow!("Transaction sender is not set"))?;
        let call = transaction
            .ethereum_call()
            .ok_or_else(|| anyhow!("Transaction recipient or amount is not set"))?;
        let estimate = transaction
            .fee_estimate()
            .ok_or_else(|| anyhow!("Transaction fee estimate is not set"))?;
        let operation = transaction.operation().unwrap_or(WalletOperation::Call);
        let nonce = match transaction.nonce() {
            Some(n) => parse_decimal(n).ok_or_else(|| anyhow!("Invalid nonce: {}", n))?,
            None => Default::default(),
        };

        // abi.encodePacked(0x19, 0x00, safe, to, value, data, operation, txGas, dataGas, gasPrice, gasToken, nonce)
        let mut packed = Vec::with_capacity(2 + 20 * 3 + 32 * 5 + 1 + call.data.len());
        packed.extend_from_slice(&[0x19, 0x00]);
        packed.extend_from_slice(safe.as_bytes());
        packed.extend_from_slice(call.to.as_bytes());
        packed.extend_from_slice(&u256_bytes(call.value));
        packed.extend_from_slice(&call.data);
        packed.push(operation.as_u8());
        packed.extend_from_slice(&u256_bytes(estimate.tx_gas));
        packed.extend_from_slice(&u256_bytes(estimate.data_gas));
        packed.extend_from_slice(&u256_bytes(estimate.gas_price));
        packed.extend_from_slice(estimate.gas_token.address.as_bytes());
        packed.extend_from_slice(&u256_bytes(nonce));

        Ok(H256::from(keccak256(packed)))
    }

    fn sign_hash(&self, hash: &H256, key: &PrivateKey) -> Result<EthSignature> {
        let wallet = LocalWallet::from_bytes(key.as_bytes()).context("Invalid private key")?;
        let signature = wallet.sign_hash(*hash).context("Failed to sign hash")?;
        let v = u8::try_from(signature.v).context("Signature v out of range")?;
        Ok(EthSignature::new(
            signature.r.to_string(),
            signature.s.to_string(),
            v,
        ))
    }

    fn recover_address(&self, hash: &H256, signature: &EthSignature) -> Result<Address> {
        let r = parse_decimal(&signature.r).ok_or_else(|| anyhow!("Invalid signature r"))?;
        let s = parse_decimal(&signature.s).ok_or_else(|| anyhow!("Invalid signature s"))?;
        let signature = Signature {
            r,
            s,
            v: u64::from(signature.v),
        };
        signature
            .recover(*hash)
            .context("Failed to recover signer address")
    }
}

fn u256_bytes(value: ethers::types::U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    bytes
}
