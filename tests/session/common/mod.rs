use r2bridge::address::Addr;
use r2bridge::analysis::AnalysisOutcome;
use r2bridge::config::Config;
use r2bridge::error::{BrokenReason, Error};
use r2bridge::memory::{MemoryProvider, MemoryRegion, Perms};
use r2bridge::session::{Session, SessionHook};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Base of the region the fixture provider serves.
pub const REGION_BASE: u64 = 0x7f00_0000;
pub const REGION_SIZE: u64 = 0x1000;
/// Entry of the function the fake tool reports inside that region.
pub const ENTRY: u64 = 0x7f00_0000;

/// Shell script standing in for the analysis tool.
///
/// It speaks the exact wire protocol: one banner byte on start, then one
/// sentinel terminated reply per command line. Every received line is
/// appended to a journal file for assertions. Seek state is tracked so
/// `s` queries behave, analysis replies are read from files the test can
/// rewrite while the session runs.
pub struct FakeTool {
    pub dir: PathBuf,
    pub tool: PathBuf,
    journal: PathBuf,
}

impl FakeTool {
    pub fn install() -> Self {
        Self::install_with("pdc pdg")
    }

    pub fn install_with(decompilers: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("r2b-fake-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let journal = dir.join("journal");
        fs::write(&journal, "").unwrap();
        fs::write(dir.join("entry"), "0x0").unwrap();
        fs::write(dir.join("afij"), "[]").unwrap();
        fs::write(dir.join("afl"), "").unwrap();

        let dir_text = dir.display().to_string();
        let script = format!(
            r#"#!/bin/sh
SEEK=0x0
printf '\0'
while IFS= read -r line; do
  printf '%s\n' "$line" >> "{journal}"
  case "$line" in
    '?V') printf '5.8.8 0 @ linux-x86-64\n\0' ;;
    'e cmd.pdc=?') printf '{decompilers}\n\0' ;;
    's') printf '%s\n\0' "$SEEK" ;;
    's '*) SEEK="${{line#s }}"; printf '\0' ;;
    '?e '*) printf '%s\n\0' "${{line#?e }}" ;;
    '?v $F') cat "{dir}/entry"; printf '\n\0' ;;
    'af') if [ -f "{dir}/af.slow" ]; then sleep 1; fi; printf '\0' ;;
    'afij') if [ -f "{dir}/afij.hang" ]; then sleep 60; else cat "{dir}/afij"; printf '\n\0'; fi ;;
    'afl') cat "{dir}/afl"; printf '\n\0' ;;
    'agf') printf 'graph@%s\n\0' "$SEEK" ;;
    'pdc') printf 'pdc@%s\n\0' "$SEEK" ;;
    'pddo') printf 'pddo@%s\n\0' "$SEEK" ;;
    'pi~?') printf '7\n\0' ;;
    'ej') printf '{{"asm.arch":"x86","scr.color":0}}\n\0' ;;
    'die') exit 0 ;;
    'hang') sleep 60 ;;
    *) printf '\0' ;;
  esac
done
"#,
            journal = journal.display(),
            dir = dir_text,
            decompilers = decompilers,
        );

        let tool = dir.join("fake-radare2");
        fs::write(&tool, script).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, tool, journal }
    }

    pub fn config(&self) -> Config {
        Config {
            tool_path: Some(self.tool.clone()),
            read_timeout_ms: 50,
            read_retry_limit: 400,
            snapshot_dir: Some(self.dir.join("snapshots")),
            ..Config::default()
        }
    }

    /// Configuration with a read budget small enough to observe timeouts.
    pub fn impatient_config(&self) -> Config {
        Config {
            read_retry_limit: 5,
            ..self.config()
        }
    }

    pub fn journal(&self) -> Vec<String> {
        fs::read_to_string(&self.journal)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count_journaled(&self, prefix: &str) -> usize {
        self.journal()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Exact command occurrences, `count_journaled("aa")` would also count
    /// `aac*` and `aar`.
    pub fn count_exact(&self, cmd: &str) -> usize {
        self.journal().iter().filter(|line| *line == cmd).count()
    }

    pub fn set_entry(&self, addr: u64) {
        fs::write(self.dir.join("entry"), format!("{:#x}", addr)).unwrap();
    }

    pub fn set_afij(&self, json: &str) {
        fs::write(self.dir.join("afij"), json).unwrap();
    }

    pub fn set_afl(&self, listing: &str) {
        fs::write(self.dir.join("afl"), listing).unwrap();
    }

    pub fn make_af_slow(&self) {
        fs::write(self.dir.join("af.slow"), "").unwrap();
    }

    pub fn make_afij_hang(&self) {
        fs::write(self.dir.join("afij.hang"), "").unwrap();
    }
}

impl Drop for FakeTool {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Fake tool that reports one function at [`ENTRY`] inside the fixture
/// region.
pub fn prepared_tool() -> FakeTool {
    let tool = FakeTool::install();
    tool.set_entry(ENTRY);
    tool.set_afij(&fixture_afij());
    tool.set_afl(&fixture_afl());
    tool
}

/// Fixture function description the fake tool serves for `afij`.
pub fn fixture_afij() -> String {
    format!(
        r#"[{{"offset": {ENTRY}, "name": "sym.target", "size": 64, "nbbs": 3,
"calltype": "amd64",
"callrefs": [{{"addr": {ref_addr}, "type": "CALL", "at": {ref_at}}}],
"codexrefs": []}}]"#,
        ref_addr = ENTRY + 0x44,
        ref_at = ENTRY + 0x8,
    )
}

pub fn fixture_afl() -> String {
    format!(
        "{:#x}    3 64           sym.target\n{:#x}    1 12           sym.helper\n",
        ENTRY,
        ENTRY + 0x40
    )
}

/// Provider serving one fixed region snapshot.
pub struct FixedRegions {
    regions: Vec<MemoryRegion>,
}

impl FixedRegions {
    pub fn one() -> Self {
        Self {
            regions: vec![MemoryRegion {
                base: Addr::from(REGION_BASE),
                size: REGION_SIZE,
                perms: Perms::rx(),
                data: vec![0x90; REGION_SIZE as usize],
            }],
        }
    }
}

impl MemoryProvider for FixedRegions {
    fn region_for(&self, addr: Addr) -> Result<MemoryRegion, Error> {
        self.regions
            .iter()
            .find(|r| r.contains(addr))
            .cloned()
            .ok_or(Error::RegionUnavailable(addr))
    }
}

pub enum HookEvent {
    Broken(BrokenReason),
    EnvChanged,
    Analysis(AnalysisOutcome),
}

/// Hook forwarding every session event into a channel the test polls.
pub struct TestHooks {
    events: Sender<HookEvent>,
}

impl TestHooks {
    pub fn new() -> (Self, Receiver<HookEvent>) {
        let (tx, rx) = channel();
        (Self { events: tx }, rx)
    }
}

impl SessionHook for TestHooks {
    fn on_broken(&self, reason: BrokenReason) {
        _ = self.events.send(HookEvent::Broken(reason));
    }

    fn on_env_changed(&self) {
        _ = self.events.send(HookEvent::EnvChanged);
    }

    fn on_analysis(&self, outcome: &AnalysisOutcome) {
        _ = self.events.send(HookEvent::Analysis(outcome.clone()));
    }
}

/// Session against the fake tool with the fixture provider and hooks.
pub fn open_fixture_session(tool: &FakeTool) -> (Session, Receiver<HookEvent>) {
    let (hooks, events) = TestHooks::new();
    let session = Session::builder("/bin/true")
        .with_config(tool.config())
        .with_provider(FixedRegions::one())
        .with_hook(hooks)
        .open()
        .unwrap();
    (session, events)
}
