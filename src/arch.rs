//! Translation between target descriptions reported by instrumentation
//! agents and the architecture vocabulary of the analysis tool.

/// Target machine as an agent reports it: agent style architecture name,
/// optional bit width, platform name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    pub arch: String,
    pub bits: Option<u32>,
    pub platform: String,
}

impl TargetDescription {
    pub fn new(arch: impl Into<String>, bits: Option<u32>, platform: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            bits,
            platform: platform.into(),
        }
    }

    /// Description of the machine this process runs on, in the same agent
    /// style vocabulary remote descriptions use.
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            "x86" => "ia32",
            other => other,
        };
        let platform = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Self::new(arch, None, platform)
    }
}

/// Architecture settings in the tool's own vocabulary, ready to be applied
/// to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProfile {
    pub arch: String,
    pub bits: u32,
    pub os: String,
}

impl ToolProfile {
    /// Translate an agent style description. `arm64` and `x64` carry their
    /// own width and ignore the reported one; everything else keeps the
    /// reported width and defaults to 32.
    pub fn from_target(target: &TargetDescription) -> Self {
        let (arch, bits) = match target.arch.as_str() {
            "arm64" => ("arm".to_string(), 64),
            "x64" => ("x86".to_string(), 64),
            "ia32" => ("x86".to_string(), target.bits.unwrap_or(32)),
            other => (other.to_string(), target.bits.unwrap_or(32)),
        };
        Self {
            arch,
            bits,
            os: target.platform.clone(),
        }
    }

    /// Command batch that applies this profile, both to the disassembler
    /// and to the analysis engine.
    pub fn apply_commands(&self) -> String {
        format!(
            "e asm.arch={}; e asm.bits={}; e asm.os={}; e anal.arch={};",
            self.arch, self.bits, self.os, self.arch
        )
    }
}

/// Analysis defaults applied once right after a session opens.
pub const OPEN_DEFAULTS: &str =
    "e anal.autoname=true; e anal.hasnext=true; e asm.anal=true; e anal.fcnprefix=sub";
