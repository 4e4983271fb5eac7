use ethereum_types::{H256, H512};
use sha3::{Digest, Keccak256, Keccak512};

pub fn keccak_256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

pub fn keccak_512(data: &[u8]) -> H512 {
    let mut hasher = Keccak512::new();
    hasher.update(data);
    H512::from_slice(&hasher.finalize())
}

/// Keccak-256 over exactly one 32-byte hash.
pub fn keccak_256_32(input: &H256) -> H256 {
    keccak_256(input.as_bytes())
}

/// Keccak-512 over exactly one 64-byte hash.
pub fn keccak_512_64(input: &H512) -> H512 {
    keccak_512(input.as_bytes())
}
