//! Result cache keyed by CFG identity.
//!
//! Re-running a fixpoint for a procedure that was already analyzed is pure
//! waste, so converged results are cached per CFG. The cache is an explicit
//! object owned by the host session -- its lifetime is "one compilation /
//! one set of CFGs" -- rather than process-wide state, so isolated caches
//! can be constructed freely. Requests for *different* CFGs may run on
//! independent threads; requests for the *same* CFG serialize on its slot,
//! guaranteeing at most one computation per identity.

use fxhash::FxHashMap;
use std::sync::{Arc, Mutex};

use crate::ir::ProcBody;

/// Identity of one procedure's CFG: the address of its pinned allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CfgId(usize);

impl CfgId {
    pub fn of(body: &Arc<ProcBody>) -> CfgId {
        CfgId(Arc::as_ptr(body) as usize)
    }
}

pub struct ResultCache<R> {
    slots: Mutex<FxHashMap<CfgId, Arc<Mutex<Option<Arc<R>>>>>>,
}

impl<R> Default for ResultCache<R> {
    fn default() -> Self {
        ResultCache {
            slots: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<R> ResultCache<R> {
    pub fn new() -> ResultCache<R> {
        ResultCache::default()
    }

    /// Compute-if-absent. A failed computation leaves the slot empty, so a
    /// later request computes again; the cache itself never retries.
    pub fn get_or_compute<E>(
        &self,
        key: CfgId,
        compute: impl FnOnce() -> Result<R, E>,
    ) -> Result<Arc<R>, E> {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots.entry(key).or_default().clone()
        };
        let mut guard = slot.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }
        let result = Arc::new(compute()?);
        *guard = Some(result.clone());
        Ok(result)
    }

    /// Drop one procedure's cached result.
    pub fn evict(&self, key: CfgId) {
        self.slots.lock().unwrap().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
