use crate::address::Addr;
use crate::analysis::FunctionInfo;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Everything the pipeline has learned about one function, keyed by its
/// canonical entry address.
#[derive(Debug, Clone, Default)]
pub struct FunctionRecord {
    pub metadata: Option<FunctionInfo>,
    pub graph: Option<String>,
    pub decompiled: Option<String>,
}

/// Per session store of analysis results.
///
/// Keys are canonical [`Addr`] values, so `0x1000` and `0x00001000` land
/// on the same record. The cache intentionally survives pipe reopens: the
/// target address space does not change when the tool process does.
#[derive(Default)]
pub struct AnalysisCache {
    records: Mutex<HashMap<Addr, FunctionRecord>>,
}

impl AnalysisCache {
    pub fn record(&self, entry: Addr) -> Option<FunctionRecord> {
        self.lock().get(&entry).cloned()
    }

    pub fn metadata(&self, entry: Addr) -> Option<FunctionInfo> {
        self.lock().get(&entry).and_then(|r| r.metadata.clone())
    }

    pub fn graph(&self, entry: Addr) -> Option<String> {
        self.lock().get(&entry).and_then(|r| r.graph.clone())
    }

    pub fn decompiled(&self, entry: Addr) -> Option<String> {
        self.lock().get(&entry).and_then(|r| r.decompiled.clone())
    }

    pub fn store_metadata(&self, entry: Addr, metadata: FunctionInfo) {
        self.lock().entry(entry).or_default().metadata = Some(metadata);
    }

    pub fn store_graph(&self, entry: Addr, graph: String) {
        self.lock().entry(entry).or_default().graph = Some(graph);
    }

    pub fn store_decompiled(&self, entry: Addr, listing: String) {
        self.lock().entry(entry).or_default().decompiled = Some(listing);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Addr, FunctionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
