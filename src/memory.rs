use crate::address::Addr;
use crate::error::Error;
use nix::sys::signal;
use nix::unistd::Pid;
use proc_maps::get_process_maps;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::os::unix::fs::FileExt;

/// Memory protection of a region, in the `r-x` notation the analysis tool
/// takes for its map commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Perms {
    pub fn rx() -> Self {
        Self {
            read: true,
            write: false,
            exec: true,
        }
    }
}

impl Display for Perms {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.exec { 'x' } else { '-' },
        )
    }
}

/// Snapshot of a single mapped region of the target address space.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub base: Addr,
    pub size: u64,
    pub perms: Perms,
    pub data: Vec<u8>,
}

impl MemoryRegion {
    pub fn end(&self) -> Addr {
        self.base.add(self.size)
    }

    pub fn contains(&self, addr: Addr) -> bool {
        addr.in_range(self.base, self.size)
    }
}

/// Source of target memory regions.
///
/// The analysis side only ever asks one question: which region contains
/// this address, and what are its bytes right now. Implementations exist
/// for live local processes and for tests; anything able to answer the
/// question (an instrumentation agent, a core dump) can stand behind it.
pub trait MemoryProvider: Send + Sync {
    fn region_for(&self, addr: Addr) -> Result<MemoryRegion, Error>;
}

/// Provider that never resolves a region. Used when a session runs on a
/// plain file target with no live process behind it.
pub struct NoProvider;

impl MemoryProvider for NoProvider {
    fn region_for(&self, addr: Addr) -> Result<MemoryRegion, Error> {
        Err(Error::RegionUnavailable(addr))
    }
}

/// Provider backed by a live local process, using the `/proc/{pid}` maps
/// and mem files.
pub struct ProcPidProvider {
    pid: Pid,
}

impl ProcPidProvider {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    fn assert_alive(&self) -> Result<(), Error> {
        // signal 0 probes existence without delivery
        signal::kill(self.pid, None).map_err(|e| Error::MemoryAccess(e.into()))
    }
}

impl MemoryProvider for ProcPidProvider {
    fn region_for(&self, addr: Addr) -> Result<MemoryRegion, Error> {
        self.assert_alive()?;

        let maps = get_process_maps(self.pid.as_raw()).map_err(Error::MemoryAccess)?;
        let range = maps
            .into_iter()
            .find(|r| addr.in_range(Addr::from(r.start()), r.size() as u64))
            .ok_or(Error::RegionUnavailable(addr))?;

        let base = Addr::from(range.start());
        let size = range.size() as u64;
        let perms = Perms {
            read: range.is_read(),
            write: range.is_write(),
            exec: range.is_exec(),
        };

        let mem = File::open(format!("/proc/{}/mem", self.pid))
            .map_err(Error::MemoryAccess)?;
        let mut data = vec![0u8; size as usize];
        mem.read_exact_at(&mut data, base.as_u64())
            .map_err(Error::MemoryAccess)?;

        Ok(MemoryRegion {
            base,
            size,
            perms,
            data,
        })
    }
}
