//! Per-epoch context lifecycle: light cache construction, lazy full-dataset
//! materialization, and a swap-guarded cache for reuse across calls.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use ethereum_types::{H256, H512};
use log::{debug, info};

use crate::{
    build_l1_cache, build_light_cache, calc_dataset_item_1024, calculate_epoch_seed,
    full_dataset_num_items, light_cache_num_items, Error, Hash1024, FULL_DATASET_ITEM_SIZE,
    LIGHT_CACHE_ITEM_SIZE,
};

/// Immutable per-epoch state: the light cache and the L1 slice derived from
/// it. Sufficient for hashing and verification; dataset items are computed
/// on demand.
pub struct EpochContext {
    epoch_number: usize,
    light_cache: Vec<H512>,
    l1_cache: Box<[u32]>,
    full_dataset_num_items: usize,
}

impl EpochContext {
    /// Build the context for an epoch. The cache chain is sequential, so this
    /// takes on the order of a second; callers are expected to reuse the
    /// result for the whole epoch.
    pub fn new(epoch: usize) -> Result<Self, Error> {
        let num_items = light_cache_num_items(epoch);
        let seed = calculate_epoch_seed(epoch);

        let started = Instant::now();
        let mut light_cache = Vec::new();
        light_cache
            .try_reserve_exact(num_items)
            .map_err(|_| Error::OutOfMemory(num_items * LIGHT_CACHE_ITEM_SIZE))?;
        light_cache.resize(num_items, H512::zero());
        build_light_cache(&mut light_cache, seed);
        let l1_cache = build_l1_cache(&light_cache);
        info!(
            "built light cache for epoch {}: {} items in {} ms",
            epoch,
            num_items,
            started.elapsed().as_millis()
        );

        Ok(Self {
            epoch_number: epoch,
            light_cache,
            l1_cache,
            full_dataset_num_items: full_dataset_num_items(epoch),
        })
    }

    pub fn epoch_number(&self) -> usize {
        self.epoch_number
    }

    pub fn light_cache_num_items(&self) -> usize {
        self.light_cache.len()
    }

    pub fn full_dataset_num_items(&self) -> usize {
        self.full_dataset_num_items
    }

    pub fn is_valid_for_height(&self, height: i64) -> bool {
        crate::epoch_number(height) == Ok(self.epoch_number)
    }

    /// Mix digest and final hash for one attempt, light mode.
    pub fn hash_one(&self, height: i64, header_hash: H256, nonce: u64) -> Result<(H256, H256), Error> {
        crate::hash_one(self, height, header_hash, nonce)
    }

    pub(crate) fn light_cache(&self) -> &[H512] {
        &self.light_cache
    }

    pub(crate) fn l1_cache(&self) -> &[u32] {
        &self.l1_cache
    }

    pub(crate) fn check_height(&self, height: i64) -> Result<u64, Error> {
        let height_epoch = crate::epoch_number(height)?;
        if height_epoch != self.epoch_number {
            return Err(Error::EpochMismatch {
                context_epoch: self.epoch_number,
                height,
                height_epoch,
            });
        }
        Ok(height as u64)
    }
}

/// An epoch context carrying the full dataset. Slots start empty and each
/// item is generated on first access; the generator is pure, so a race on
/// first access wastes one computation but both threads observe the same
/// bytes.
pub struct FullEpochContext {
    context: EpochContext,
    items: Vec<OnceLock<Hash1024>>,
}

impl FullEpochContext {
    pub fn new(epoch: usize) -> Result<Self, Error> {
        let context = EpochContext::new(epoch)?;
        let num_items = context.full_dataset_num_items();

        let mut items = Vec::new();
        items
            .try_reserve_exact(num_items)
            .map_err(|_| Error::OutOfMemory(num_items * FULL_DATASET_ITEM_SIZE))?;
        items.resize_with(num_items, OnceLock::new);
        debug!(
            "allocated full dataset for epoch {}: {} items, all pending",
            epoch, num_items
        );

        Ok(Self { context, items })
    }

    pub fn context(&self) -> &EpochContext {
        &self.context
    }

    /// Compute-or-join access to one dataset item.
    pub fn dataset_item(&self, index: u32) -> Hash1024 {
        *self.items[index as usize]
            .get_or_init(|| calc_dataset_item_1024(self.context.light_cache(), index))
    }

    /// Number of items generated so far.
    pub fn generated_num_items(&self) -> usize {
        self.items.iter().filter(|slot| slot.get().is_some()).count()
    }

    /// Materialize every remaining item.
    pub fn generate_all(&self) {
        let started = Instant::now();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(num_cpus::get())
                .build_global()
                .is_ok();
            info!(
                "generating full dataset for epoch {}: {} items on {} threads",
                self.context.epoch_number(),
                self.items.len(),
                num_cpus::get()
            );
            self.items.par_iter().enumerate().for_each(|(i, slot)| {
                slot.get_or_init(|| calc_dataset_item_1024(self.context.light_cache(), i as u32));
            });
        }

        #[cfg(not(feature = "parallel"))]
        {
            info!(
                "generating full dataset for epoch {}: {} items",
                self.context.epoch_number(),
                self.items.len()
            );
            for (i, slot) in self.items.iter().enumerate() {
                slot.get_or_init(|| calc_dataset_item_1024(self.context.light_cache(), i as u32));
            }
        }

        info!(
            "full dataset for epoch {} ready in {} ms",
            self.context.epoch_number(),
            started.elapsed().as_millis()
        );
    }

    /// Mix digest and final hash for one attempt, reading memoized items.
    pub fn hash_one(&self, height: i64, header_hash: H256, nonce: u64) -> Result<(H256, H256), Error> {
        let height = self.context.check_height(height)?;
        Ok(crate::progpow::hash_inner(
            height,
            header_hash,
            nonce,
            self.context.l1_cache(),
            self.context.full_dataset_num_items() as u32,
            |index| self.dataset_item(index),
        ))
    }
}

/// Holds the most recently used epoch context. Construction happens under
/// the write lock, so a reader sees either the previous context or the
/// finished new one; a superseded context is freed once the last `Arc`
/// clone is dropped.
pub struct ContextCache {
    slot: RwLock<Option<Arc<EpochContext>>>,
}

impl ContextCache {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Get the context for an epoch, building and caching it on a miss.
    pub fn get(&self, epoch: usize) -> Result<Arc<EpochContext>, Error> {
        {
            let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(context) = slot.as_ref() {
                if context.epoch_number() == epoch {
                    return Ok(Arc::clone(context));
                }
            }
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have built it while we waited.
        if let Some(context) = slot.as_ref() {
            if context.epoch_number() == epoch {
                return Ok(Arc::clone(context));
            }
            debug!(
                "replacing cached context for epoch {} with epoch {}",
                context.epoch_number(),
                epoch
            );
        }
        let context = Arc::new(EpochContext::new(epoch)?);
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Get the context for the epoch a block height belongs to.
    pub fn get_for_height(&self, height: i64) -> Result<Arc<EpochContext>, Error> {
        self.get(crate::epoch_number(height)?)
    }
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new()
    }
}
