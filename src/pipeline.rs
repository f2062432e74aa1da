//! Background analysis pipeline.
//!
//! One worker thread per session executes mapping and analysis jobs. Only
//! one job is in flight at a time: requesters take the busy flag before
//! submitting and the worker returns it once the tool work is done, right
//! before delivering the result. A request that finds the flag taken is
//! rejected with [`Error::Busy`] right away.

use crate::address::Addr;
use crate::analysis::{
    parse_count, parse_entry, parse_function_list, region_pass_commands, AnalysisOutcome,
    FunctionInfo,
};
use crate::session::SessionCore;
use crate::weak_error;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) enum Job {
    Analyze {
        addr: Addr,
        /// `None` for seek triggered analysis, delivered to the session
        /// hook instead of a caller.
        reply: Option<SyncSender<AnalysisOutcome>>,
    },
    Graph {
        addr: Addr,
        reply: SyncSender<String>,
    },
    Decompile {
        addr: Addr,
        reply: SyncSender<String>,
    },
    Shutdown,
}

pub(crate) fn spawn_worker(core: Arc<SessionCore>) -> (Sender<Job>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let worker = std::thread::spawn(move || worker_loop(core, rx));
    (tx, worker)
}

fn worker_loop(core: Arc<SessionCore>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Shutdown => break,
            Job::Analyze { addr, reply } => {
                let outcome = run_analysis(&core, addr);
                core.release_busy();
                match reply {
                    Some(reply) => _ = reply.send(outcome),
                    None => core.hook().on_analysis(&outcome),
                }
            }
            Job::Graph { addr, reply } => {
                let graph = run_graph(&core, addr).unwrap_or_default();
                core.release_busy();
                _ = reply.send(graph);
            }
            Job::Decompile { addr, reply } => {
                let listing = run_decompile(&core, addr).unwrap_or_default();
                core.release_busy();
                _ = reply.send(listing);
            }
        }
    }
}

/// Full analysis at `addr`.
///
/// Seek, map the containing region, run the whole region pass when the
/// region is fresh, then resolve and describe the enclosing function.
/// Every failure is logged and degrades the outcome instead of killing
/// the worker, the default outcome means analysis went nowhere.
fn run_analysis(core: &SessionCore, addr: Addr) -> AnalysisOutcome {
    let mut outcome = AnalysisOutcome {
        requested: addr,
        ..Default::default()
    };

    if !navigate(core, addr) {
        return outcome;
    }

    let (region, fresh) = match core.ensure_mapped(addr) {
        Ok(mapped) => mapped,
        Err(e) => {
            log::warn!(target: "r2bridge", "analysis at {addr}: {e:#}");
            return outcome;
        }
    };
    outcome.region = Some(region.clone());

    if fresh {
        for cmd in region_pass_commands(region.base, region.end()) {
            if weak_error!(core.exchange(&cmd)).is_none() {
                return outcome;
            }
        }
        // the json function listing is avoided here, it stalls the tool
        // right after a region pass
        if let Some(listing) = weak_error!(core.exchange_plain("afl")) {
            outcome.discovered = parse_function_list(&listing);
            log::info!(
                target: "r2bridge",
                "region pass at {} found {} functions",
                region.base,
                outcome.discovered.len()
            );
        }
    }

    let entry = match weak_error!(core.exchange("?v $F")).as_deref().and_then(parse_entry) {
        Some(entry) => entry,
        None => return outcome,
    };
    outcome.entry = Some(entry);

    match core.cache.metadata(entry) {
        Some(cached) => outcome.metadata = Some(cached),
        None => {
            weak_error!(core.exchange("af"));
            let described: Option<Vec<FunctionInfo>> = core
                .exchange_plain("afij")
                .and_then(|raw| Ok(serde_json::from_str(&raw)?))
                .map_err(|e| log::warn!(target: "r2bridge", "function info at {entry}: {e:#}"))
                .ok();
            if let Some(info) = described.and_then(|infos| infos.into_iter().next()) {
                core.cache.store_metadata(entry, info.clone());
                outcome.metadata = Some(info);
            }
        }
    }

    if outcome.metadata.is_some() {
        if let Some(count) = weak_error!(core.exchange("pi~?")) {
            outcome.instructions = parse_count(&count);
        }
    }

    outcome
}

/// Basic block graph of the function at `addr`, cached by entry address.
fn run_graph(core: &SessionCore, addr: Addr) -> Option<String> {
    if !navigate(core, addr) {
        return None;
    }

    let entry = weak_error!(core.exchange("?v $F")).as_deref().and_then(parse_entry);
    if let Some(entry) = entry {
        if let Some(cached) = core.cache.graph(entry) {
            return Some(cached);
        }
    }

    let graph = weak_error!(core.exchange("agf"))?;
    if let Some(entry) = entry {
        core.cache.store_graph(entry, graph.clone());
    }
    Some(graph)
}

/// Decompiled listing of the function at `addr`, cached by entry address.
fn run_decompile(core: &SessionCore, addr: Addr) -> Option<String> {
    if !navigate(core, addr) {
        return None;
    }

    let entry = weak_error!(core.exchange("?v $F")).as_deref().and_then(parse_entry);
    if let Some(entry) = entry {
        if let Some(cached) = core.cache.decompiled(entry) {
            return Some(cached);
        }
    }

    let listing = weak_error!(core.exchange(core.decompile_cmd()))?;
    if let Some(entry) = entry {
        core.cache.store_decompiled(entry, listing.clone());
    }
    Some(listing)
}

/// Bring the seek to `addr` unless it is already there.
fn navigate(core: &SessionCore, addr: Addr) -> bool {
    if core.current_seek() == Some(addr) {
        return true;
    }
    weak_error!(core.seek_to(addr)).is_some()
}
