use crate::address::Addr;
use crate::mapping::MappedRegion;
use serde::{Deserialize, Serialize};

/// One code reference attached to a function: target address, reference
/// kind and the instruction it originates from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRef {
    #[serde(default)]
    pub addr: u64,
    #[serde(default)]
    pub at: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Function metadata as the tool reports it for the current seek.
///
/// Every field is defaulted: the tool omits keys freely depending on
/// version and analysis depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub nbbs: u64,
    #[serde(default)]
    pub calltype: String,
    #[serde(default)]
    pub callrefs: Vec<CodeRef>,
    #[serde(default)]
    pub codexrefs: Vec<CodeRef>,
}

impl FunctionInfo {
    pub fn entry(&self) -> Addr {
        Addr::from(self.offset)
    }
}

/// Function discovered by a whole region analysis pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFunction {
    pub addr: Addr,
    pub name: String,
}

/// Result of one pipeline run, delivered exactly once per request.
///
/// A failed run delivers the default value: no region, no entry, empty
/// metadata, zero instructions.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    /// Address the analysis was requested for.
    pub requested: Addr,
    /// Region the address resolved into, when mapping succeeded.
    pub region: Option<MappedRegion>,
    /// Canonical entry address of the enclosing function, when one exists.
    pub entry: Option<Addr>,
    pub metadata: Option<FunctionInfo>,
    /// Instruction count at the current seek, zero when unknown.
    pub instructions: u64,
    /// Functions found by the region pass. Empty when the region was
    /// already known and the pass was skipped.
    pub discovered: Vec<DiscoveredFunction>,
}

/// Command batch of a whole region analysis pass. The analysis scope is
/// pinned to the freshly mapped region so the pass does not wander into
/// firmware sized address space around it.
pub fn region_pass_commands(base: Addr, end: Addr) -> Vec<String> {
    vec![
        format!(
            "e anal.from = {}; e anal.to = {}; e anal.in = raw",
            base.as_u64(),
            end.as_u64()
        ),
        "aa".to_string(),
        "aac*".to_string(),
        "aar".to_string(),
        "afr".to_string(),
    ]
}

/// Parse the plain text function listing: one function per line, address
/// first, name last. The json variant of the listing is avoided on
/// purpose, requesting it right after a region pass stalls the tool.
pub fn parse_function_list(listing: &str) -> Vec<DiscoveredFunction> {
    listing
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let addr = tokens.next()?.parse::<Addr>().ok()?;
            let name = tokens.next_back()?;
            Some(DiscoveredFunction {
                addr,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Parse the resolved function entry. Zero means the seek is outside any
/// known function and is reported as `None`.
pub fn parse_entry(output: &str) -> Option<Addr> {
    output
        .trim()
        .parse::<Addr>()
        .ok()
        .filter(|addr| !addr.is_null())
}

/// Parse an instruction count, unknown counts as zero.
pub fn parse_count(output: &str) -> u64 {
    output.trim().parse::<u64>().unwrap_or(0)
}

/// Whether the decompiler plugin listing contains the external decompiler.
pub fn detect_r2dec(listing: &str) -> bool {
    listing.split_whitespace().any(|token| token == "pdd")
}
