pub mod hex_format;

pub use hex_format::{address_to_hex, bytes_to_hex, hash_to_hex};
