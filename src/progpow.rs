//! The lane-parallel mixing engine consuming the per-epoch dataset.
//!
//! The instruction sequence is regenerated once per period (every
//! `PERIOD_LENGTH` blocks) from a KISS99 stream, so within one period every
//! hash executes the same random program against different data.

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::{H256, H512};

use crate::keccak::{keccak_256, keccak_512};
use crate::{fnv1a, Hash1024, FNV_OFFSET_BASIS};

pub const PERIOD_LENGTH: u64 = 6;
pub const NUM_LANES: usize = 8;
pub const NUM_REGS: usize = 16;
pub const NUM_CACHE_ACCESSES: usize = 6;
pub const NUM_MATH_OPERATIONS: usize = 9;
pub const L1_CACHE_SIZE: usize = 8 * 1024;
pub const L1_CACHE_NUM_ITEMS: usize = L1_CACHE_SIZE / 4;

/// KISS99 by George Marsaglia. Fast, and the period is long enough for the
/// handful of draws each program needs.
#[derive(Clone)]
struct Kiss99 {
    z: u32,
    w: u32,
    jsr: u32,
    jcong: u32,
}

impl Kiss99 {
    fn next(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xffff)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xffff)
            .wrapping_add(self.w >> 16);
        let mwc = (self.z << 16).wrapping_add(self.w);
        self.jsr ^= self.jsr << 17;
        self.jsr ^= self.jsr >> 13;
        self.jsr ^= self.jsr << 5;
        self.jcong = 69069u32.wrapping_mul(self.jcong).wrapping_add(1234567);
        (mwc ^ self.jcong).wrapping_add(self.jsr)
    }
}

/// Initial register file for one lane, drawn from a lane-salted KISS99.
fn fill_mix(seed: u64, lane_id: u32) -> [u32; NUM_REGS] {
    let z = fnv1a(FNV_OFFSET_BASIS, seed as u32);
    let w = fnv1a(z, (seed >> 32) as u32);
    let jsr = fnv1a(w, lane_id);
    let jcong = fnv1a(jsr, lane_id);
    let mut rng = Kiss99 { z, w, jsr, jcong };

    let mut regs = [0u32; NUM_REGS];
    for reg in regs.iter_mut() {
        *reg = rng.next();
    }
    regs
}

/// Per-period program state: the KISS99 stream plus shuffled register
/// sequences guaranteeing every register is written before any is reused.
#[derive(Clone)]
struct MixRngState {
    rng: Kiss99,
    dst_seq: [u8; NUM_REGS],
    src_seq: [u8; NUM_REGS],
    dst_counter: usize,
    src_counter: usize,
}

impl MixRngState {
    fn new(seed: u64) -> Self {
        let z = fnv1a(FNV_OFFSET_BASIS, seed as u32);
        let w = fnv1a(z, (seed >> 32) as u32);
        let jsr = fnv1a(w, seed as u32);
        let jcong = fnv1a(jsr, (seed >> 32) as u32);
        let mut rng = Kiss99 { z, w, jsr, jcong };

        let mut dst_seq = [0u8; NUM_REGS];
        let mut src_seq = [0u8; NUM_REGS];
        for i in 0..NUM_REGS {
            dst_seq[i] = i as u8;
            src_seq[i] = i as u8;
        }
        // Fisher-Yates, destination sequence first.
        for i in (2..=NUM_REGS as u32).rev() {
            dst_seq.swap(i as usize - 1, (rng.next() % i) as usize);
            src_seq.swap(i as usize - 1, (rng.next() % i) as usize);
        }

        Self {
            rng,
            dst_seq,
            src_seq,
            dst_counter: 0,
            src_counter: 0,
        }
    }

    fn next_dst(&mut self) -> usize {
        let dst = self.dst_seq[self.dst_counter % NUM_REGS] as usize;
        self.dst_counter += 1;
        dst
    }

    fn next_src(&mut self) -> usize {
        let src = self.src_seq[self.src_counter % NUM_REGS] as usize;
        self.src_counter += 1;
        src
    }
}

/// One of the nine-operation math palette, selected by the program stream.
fn random_math(a: u32, b: u32, selector: u32) -> u32 {
    match selector % NUM_MATH_OPERATIONS as u32 {
        0 => a.wrapping_add(b),
        1 => a.wrapping_mul(b),
        2 => ((a as u64 * b as u64) >> 32) as u32,
        3 => a.min(b),
        4 => a.rotate_left(b),
        5 => a.rotate_right(b),
        6 => a ^ b,
        7 => a.leading_zeros() + b.leading_zeros(),
        _ => a.count_ones() + b.count_ones(),
    }
}

/// Merge new data into an accumulator. All four variants retain the
/// accumulator's entropy even when the incoming word has little.
fn random_merge(a: &mut u32, b: u32, selector: u32) {
    let x = ((selector >> 16) % 31) + 1;
    match selector % 4 {
        0 => *a = a.wrapping_mul(33).wrapping_add(b),
        1 => *a = (*a ^ b).wrapping_mul(33),
        2 => *a = a.rotate_left(x) ^ b,
        _ => *a = a.rotate_right(x) ^ b,
    }
}

type MixLanes = [[u32; NUM_REGS]; NUM_LANES];

/// One round: a dataset item read addressed by a rotating lane's register 0,
/// the interleaved cache/math program, then the item's words merged four per
/// lane. `state` is taken by value: every round replays the same program.
fn round<F>(r: u32, mix: &mut MixLanes, mut state: MixRngState, l1: &[u32], num_items: u32, lookup: &F)
where
    F: Fn(u32) -> Hash1024,
{
    let item_index = mix[r as usize % NUM_LANES][0] % num_items;
    let item = lookup(item_index);
    let mut words = [0u32; 32];
    LittleEndian::read_u32_into(&item.0, &mut words);

    let max_operations = NUM_CACHE_ACCESSES.max(NUM_MATH_OPERATIONS);
    for i in 0..max_operations {
        if i < NUM_CACHE_ACCESSES {
            let src = state.next_src();
            let dst = state.next_dst();
            let sel = state.rng.next();
            for lane in mix.iter_mut() {
                let offset = lane[src] as usize % L1_CACHE_NUM_ITEMS;
                random_merge(&mut lane[dst], l1[offset], sel);
            }
        }
        if i < NUM_MATH_OPERATIONS {
            // Two distinct source registers.
            let src_rnd = state.rng.next() % (NUM_REGS * (NUM_REGS - 1)) as u32;
            let src1 = (src_rnd % NUM_REGS as u32) as usize;
            let mut src2 = (src_rnd / NUM_REGS as u32) as usize;
            if src2 >= src1 {
                src2 += 1;
            }
            let sel1 = state.rng.next();
            let dst = state.next_dst();
            let sel2 = state.rng.next();
            for lane in mix.iter_mut() {
                let data = random_math(lane[src1], lane[src2], sel1);
                random_merge(&mut lane[dst], data, sel2);
            }
        }
    }

    // Dataset merge: four words per lane, lanes rotated by the round number,
    // the first word always into register 0.
    let words_per_lane = 32 / NUM_LANES;
    let mut dsts = [0usize; 4];
    let mut sels = [0u32; 4];
    for i in 0..words_per_lane {
        dsts[i] = if i == 0 { 0 } else { state.next_dst() };
        sels[i] = state.rng.next();
    }
    for (l, lane) in mix.iter_mut().enumerate() {
        let offset = ((l ^ r as usize) % NUM_LANES) * words_per_lane;
        for i in 0..words_per_lane {
            random_merge(&mut lane[dsts[i]], words[offset + i], sels[i]);
        }
    }
}

/// The 64-byte per-attempt seed: keccak-512 over header hash and the nonce
/// in little-endian byte order.
pub(crate) fn calculate_seed(header_hash: H256, nonce: u64) -> H512 {
    let mut input = [0u8; 40];
    input[..32].copy_from_slice(header_hash.as_bytes());
    input[32..].copy_from_slice(&nonce.to_le_bytes());
    keccak_512(&input)
}

pub(crate) fn calculate_final_hash(seed: &H512, mix_digest: &H256) -> H256 {
    let mut input = [0u8; 96];
    input[..64].copy_from_slice(seed.as_bytes());
    input[64..].copy_from_slice(mix_digest.as_bytes());
    keccak_256(&input)
}

fn hash_mix<F>(height: u64, seed: &H512, l1: &[u32], num_items: u32, lookup: &F) -> H256
where
    F: Fn(u32) -> Hash1024,
{
    // Low 64 bits of the seed drive lane initialization; the instruction
    // stream is seeded from the period number alone.
    let seed64 = LittleEndian::read_u64(&seed.as_bytes()[..8]);

    let mut mix: MixLanes = [[0u32; NUM_REGS]; NUM_LANES];
    for (l, lane) in mix.iter_mut().enumerate() {
        *lane = fill_mix(seed64, l as u32);
    }

    let state = MixRngState::new(height / PERIOD_LENGTH);
    for r in 0..crate::NUM_DATASET_ACCESSES as u32 {
        round(r, &mut mix, state.clone(), l1, num_items, lookup);
    }

    // Reduce each lane to one word, then compress with the seed.
    let mut input = [0u8; 96];
    input[..64].copy_from_slice(seed.as_bytes());
    for (l, lane) in mix.iter().enumerate() {
        let mut h = FNV_OFFSET_BASIS;
        for reg in lane {
            h = fnv1a(h, *reg);
        }
        LittleEndian::write_u32(&mut input[64 + 4 * l..64 + 4 * (l + 1)], h);
    }
    keccak_256(&input)
}

pub(crate) fn hash_inner<F>(
    height: u64,
    header_hash: H256,
    nonce: u64,
    l1: &[u32],
    num_items: u32,
    lookup: F,
) -> (H256, H256)
where
    F: Fn(u32) -> Hash1024,
{
    let seed = calculate_seed(header_hash, nonce);
    let mix_digest = hash_mix(height, &seed, l1, num_items, &lookup);
    let final_hash = calculate_final_hash(&seed, &mix_digest);
    (mix_digest, final_hash)
}
