//! Per-program lazy compilation cache.
//!
//! Entries move `Absent -> Pending -> Ready` or `Absent -> Pending -> Failed`
//! and never leave `Ready` or `Failed`. A failed entry is not retried and is
//! reported to the executor exactly like one that is still compiling.

use std::collections::HashMap;

use crate::FunctionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Pending,
    Ready,
    Failed,
}

enum Entry<M> {
    Pending,
    Ready(M),
    Failed,
}

/// What the caller of [`CompileCache::request`] has to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<M> {
    /// The entry just became `Pending`; exactly one compile must be started.
    Schedule,
    /// Compiling, or failed for good.
    Wait,
    Run(M),
}

pub struct CompileCache<M> {
    entries: HashMap<FunctionId, Entry<M>>,
}

impl<M> Default for CompileCache<M> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<M: Clone> CompileCache<M> {
    pub fn request(&mut self, fn_id: FunctionId) -> Lookup<M> {
        if self.begin(fn_id) {
            return Lookup::Schedule;
        }
        match &self.entries[&fn_id] {
            Entry::Ready(module) => Lookup::Run(module.clone()),
            Entry::Pending | Entry::Failed => Lookup::Wait,
        }
    }
}

impl<M> CompileCache<M> {
    /// Marks an absent entry as pending. Returns false if the entry already existed.
    pub fn begin(&mut self, fn_id: FunctionId) -> bool {
        if self.entries.contains_key(&fn_id) {
            return false;
        }
        self.entries.insert(fn_id, Entry::Pending);
        true
    }

    /// `Pending -> Ready`. Anything else is left untouched and reported as false.
    pub fn complete(&mut self, fn_id: FunctionId, module: M) -> bool {
        match self.entries.get_mut(&fn_id) {
            Some(entry) if matches!(entry, Entry::Pending) => {
                *entry = Entry::Ready(module);
                true
            }
            _ => false,
        }
    }

    /// `Pending -> Failed`.
    pub fn fail(&mut self, fn_id: FunctionId) -> bool {
        match self.entries.get_mut(&fn_id) {
            Some(entry) if matches!(entry, Entry::Pending) => {
                *entry = Entry::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, fn_id: FunctionId) -> CacheState {
        match self.entries.get(&fn_id) {
            None => CacheState::Absent,
            Some(Entry::Pending) => CacheState::Pending,
            Some(Entry::Ready(_)) => CacheState::Ready,
            Some(Entry::Failed) => CacheState::Failed,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
