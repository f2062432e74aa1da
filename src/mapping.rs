use crate::address::Addr;
use crate::error::Error;
use crate::memory::{MemoryProvider, Perms};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Region already presented to the tool: where it sits in the target
/// address space and which snapshot file backs it.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRegion {
    pub base: Addr,
    pub size: u64,
    pub perms: Perms,
    pub path: PathBuf,
}

impl MappedRegion {
    pub fn end(&self) -> Addr {
        self.base.add(self.size)
    }

    pub fn contains(&self, addr: Addr) -> bool {
        addr.in_range(self.base, self.size)
    }
}

/// Registry of target regions mapped into the tool address space.
///
/// Snapshot files live in a directory unique to this session, named by
/// the region base, and are written at most once. The in memory registry
/// answers whether the running tool process has seen a region; after a
/// reopen it is reset while the files stay reusable.
pub struct RangeMapper {
    dir: PathBuf,
    mapped: Mutex<HashMap<Addr, MappedRegion>>,
}

impl RangeMapper {
    pub fn new(parent: &Path) -> Result<Self, Error> {
        let dir = parent.join(format!("r2bridge-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            mapped: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Region of the current tool process containing `addr`, if any.
    pub fn find(&self, addr: Addr) -> Option<MappedRegion> {
        self.lock().values().find(|r| r.contains(addr)).cloned()
    }

    /// Make sure the region containing `addr` is visible to the tool.
    ///
    /// Returns the region and whether it was mapped just now. A freshly
    /// mapped region is the signal for the pipeline to run its whole
    /// region analysis pass.
    pub fn ensure_mapped(
        &self,
        provider: &dyn MemoryProvider,
        addr: Addr,
        exchange: impl FnOnce(&str) -> Result<String, Error>,
    ) -> Result<(MappedRegion, bool), Error> {
        if let Some(region) = self.find(addr) {
            return Ok((region, false));
        }

        let snapshot = provider.region_for(addr)?;
        if let Some(region) = self.lock().get(&snapshot.base) {
            return Ok((region.clone(), false));
        }

        let path = self.dir.join(format!("{}", snapshot.base));
        if !path.exists() {
            fs::write(&path, &snapshot.data)?;
        }
        exchange(&format!(
            "on {} {} {}",
            path.display(),
            snapshot.base,
            snapshot.perms
        ))?;
        log::info!(
            target: "r2bridge",
            "mapped region {} (size {:#x}, {})",
            snapshot.base,
            snapshot.size,
            snapshot.perms
        );

        let region = MappedRegion {
            base: snapshot.base,
            size: snapshot.size,
            perms: snapshot.perms,
            path,
        };
        self.lock().insert(region.base, region.clone());
        Ok((region, true))
    }

    /// Drop knowledge of what the tool has seen. Called after the tool
    /// process is replaced: snapshot files stay valid, mappings do not.
    pub fn forget_all(&self) {
        self.lock().clear();
    }

    pub fn mapped_count(&self) -> usize {
        self.lock().len()
    }

    /// Remove the snapshot directory. Called on session close.
    pub fn remove_dir(&self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            log::warn!(target: "r2bridge", "snapshot dir cleanup: {e}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Addr, MappedRegion>> {
        self.mapped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
