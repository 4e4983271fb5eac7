//! Apache-2 licensed MeowPow implementation.

// The dataset layer follows the Ethash design from
// https://github.com/ethereum/wiki/wiki/Ethash with MeowPow's epoch length;
// the mixing engine follows https://github.com/ifdefelse/ProgPOW with
// MeowPow's lane/register/round constants.

mod keccak;
mod miller_rabin;
mod progpow;

pub mod dag;

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::{H256, H512, U256};

pub use dag::{ContextCache, EpochContext, FullEpochContext};
pub use keccak::{keccak_256, keccak_512};
pub use progpow::{
    L1_CACHE_NUM_ITEMS, L1_CACHE_SIZE, NUM_CACHE_ACCESSES, NUM_LANES, NUM_MATH_OPERATIONS,
    NUM_REGS, PERIOD_LENGTH,
};

const LIGHT_CACHE_INIT_ITEMS: usize = 16777216 / LIGHT_CACHE_ITEM_SIZE; // 2 to the power of 24, in items.
const LIGHT_CACHE_GROWTH_ITEMS: usize = 131072 / LIGHT_CACHE_ITEM_SIZE; // 2 to the power of 17, in items.
const FULL_DATASET_INIT_ITEMS: usize = 1073741824 / FULL_DATASET_ITEM_SIZE; // 2 to the power of 30, in items.
const FULL_DATASET_GROWTH_ITEMS: usize = 8388608 / FULL_DATASET_ITEM_SIZE; // 2 to the power of 23, in items.
const LIGHT_CACHE_ROUNDS: usize = 3;
const FULL_DATASET_ITEM_PARENTS: u32 = 32;

pub const EPOCH_LENGTH: usize = 15000;
pub const LIGHT_CACHE_ITEM_SIZE: usize = 64;
pub const FULL_DATASET_ITEM_SIZE: usize = 128;
pub const NUM_DATASET_ACCESSES: usize = 32;

/// A full-dataset item: two Keccak-512 wide halves.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Hash1024(pub [u8; FULL_DATASET_ITEM_SIZE]);

impl Hash1024 {
    pub fn zero() -> Self {
        Self([0u8; FULL_DATASET_ITEM_SIZE])
    }
}

impl Default for Hash1024 {
    fn default() -> Self {
        Self::zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("block height {0} is negative")]
    NegativeHeight(i64),
    #[error("context built for epoch {context_epoch} used with height {height} (epoch {height_epoch})")]
    EpochMismatch {
        context_epoch: usize,
        height: i64,
        height_epoch: usize,
    },
    #[error("allocation of {0} bytes failed")]
    OutOfMemory(usize),
}

/// Get the epoch number a block height belongs to.
pub fn epoch_number(height: i64) -> Result<usize, Error> {
    if height < 0 {
        return Err(Error::NegativeHeight(height));
    }
    Ok(height as usize / EPOCH_LENGTH)
}

/// Number of 64-byte items in the light cache for the given epoch.
pub fn light_cache_num_items(epoch: usize) -> usize {
    let upper_bound = LIGHT_CACHE_INIT_ITEMS + epoch * LIGHT_CACHE_GROWTH_ITEMS;
    miller_rabin::find_largest_prime(upper_bound as u64) as usize
}

/// Number of 128-byte items in the full dataset for the given epoch.
pub fn full_dataset_num_items(epoch: usize) -> usize {
    let upper_bound = FULL_DATASET_INIT_ITEMS + epoch * FULL_DATASET_GROWTH_ITEMS;
    miller_rabin::find_largest_prime(upper_bound as u64) as usize
}

/// Get the seed hash for a given epoch: keccak-256 folded over the zero hash
/// once per elapsed epoch, so `seed(0)` is the zero hash itself.
pub fn calculate_epoch_seed(epoch: usize) -> H256 {
    let mut seed = H256::zero();
    for _ in 0..epoch {
        seed = keccak::keccak_256_32(&seed);
    }
    seed
}

const FNV_PRIME: u32 = 0x01000193;
const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;

fn fnv1(u: u32, v: u32) -> u32 {
    u.wrapping_mul(FNV_PRIME) ^ v
}

fn fnv1a(u: u32, v: u32) -> u32 {
    (u ^ v).wrapping_mul(FNV_PRIME)
}

fn to_words(hash: &H512) -> [u32; 16] {
    let mut words = [0u32; 16];
    LittleEndian::read_u32_into(hash.as_bytes(), &mut words);
    words
}

fn from_words(words: &[u32; 16]) -> H512 {
    let mut hash = H512::zero();
    LittleEndian::write_u32_into(words, hash.as_bytes_mut());
    hash
}

/// Build the light cache for the given seed. The chain part is strictly
/// sequential: item 0 hashes the seed, item k hashes item k-1. The mutation
/// passes then rewrite every item from a data-dependent partner, in order.
pub fn build_light_cache(cache: &mut [H512], seed: H256) {
    let n = cache.len();
    cache[0] = keccak_512(seed.as_bytes());
    for i in 1..n {
        cache[i] = keccak::keccak_512_64(&cache[i - 1]);
    }

    for _ in 0..LIGHT_CACHE_ROUNDS {
        for i in 0..n {
            // First index: the item's first word, little-endian.
            let t = LittleEndian::read_u32(&cache[i].as_bytes()[..4]);
            let v = t as usize % n;
            // Second index: the previous item, wrapping at 0.
            let w = (n + i - 1) % n;
            cache[i] = keccak::keccak_512_64(&(cache[v] ^ cache[w]));
        }
    }
}

/// Calculate one 64-byte half of a full-dataset item from the light cache.
pub fn calc_dataset_item_512(cache: &[H512], index: u32) -> H512 {
    let n = cache.len();
    let seed = index;

    let mut mix = to_words(&cache[index as usize % n]);
    mix[0] ^= seed;
    let mut mix = to_words(&keccak::keccak_512_64(&from_words(&mix)));

    for j in 0..FULL_DATASET_ITEM_PARENTS {
        let t = fnv1(seed ^ j, mix[j as usize % 16]);
        let parent = to_words(&cache[t as usize % n]);
        for k in 0..16 {
            mix[k] = fnv1(mix[k], parent[k]);
        }
    }

    keccak::keccak_512_64(&from_words(&mix))
}

/// Calculate a full-dataset item from the light cache. Pure: the same
/// (cache, index) always yields the same bytes, which is what makes lazy
/// per-item materialization sound.
pub fn calc_dataset_item_1024(cache: &[H512], index: u32) -> Hash1024 {
    let mut item = Hash1024::zero();
    item.0[..64].copy_from_slice(calc_dataset_item_512(cache, index * 2).as_bytes());
    item.0[64..].copy_from_slice(calc_dataset_item_512(cache, index * 2 + 1).as_bytes());
    item
}

/// The L1 cache read by the mixing engine: the first 64 full-dataset items
/// flattened to 2048 little-endian words.
pub(crate) fn build_l1_cache(cache: &[H512]) -> Box<[u32]> {
    let mut l1 = vec![0u32; L1_CACHE_NUM_ITEMS];
    let items = L1_CACHE_SIZE / FULL_DATASET_ITEM_SIZE;
    for i in 0..items {
        let item = calc_dataset_item_1024(cache, i as u32);
        LittleEndian::read_u32_into(&item.0, &mut l1[i * 32..(i + 1) * 32]);
    }
    l1.into_boxed_slice()
}

/// Calculate the mix digest and final hash for one (header, nonce) attempt,
/// computing dataset items on demand from the context's light cache.
pub fn hash_one(
    context: &EpochContext,
    height: i64,
    header_hash: H256,
    nonce: u64,
) -> Result<(H256, H256), Error> {
    let height = context.check_height(height)?;
    Ok(progpow::hash_inner(
        height,
        header_hash,
        nonce,
        context.l1_cache(),
        context.full_dataset_num_items() as u32,
        |index| calc_dataset_item_1024(context.light_cache(), index),
    ))
}

/// Check a proof of work: the mix digest must match the one recomputed for
/// (header, nonce), and the final hash derived from it must not exceed the
/// boundary. A failed check is an expected outcome, not an error.
pub fn verify(
    context: &EpochContext,
    height: i64,
    header_hash: H256,
    mix_digest: H256,
    nonce: u64,
    boundary: H256,
) -> Result<bool, Error> {
    context.check_height(height)?;
    // Cheap rejection first: the final hash only depends on the supplied mix
    // digest, so the boundary can be checked without touching the dataset.
    if !verify_final_hash(header_hash, mix_digest, nonce, boundary) {
        return Ok(false);
    }
    let (mix, _) = hash_one(context, height, header_hash, nonce)?;
    Ok(mix == mix_digest)
}

/// Boundary check alone, from the supplied mix digest. Both the final hash
/// and the boundary are compared as big-endian 256-bit integers.
pub fn verify_final_hash(header_hash: H256, mix_digest: H256, nonce: u64, boundary: H256) -> bool {
    let seed = progpow::calculate_seed(header_hash, nonce);
    let final_hash = progpow::calculate_final_hash(&seed, &mix_digest);
    U256::from_big_endian(final_hash.as_bytes()) <= U256::from_big_endian(boundary.as_bytes())
}
