use crate::weak_error;
use once_cell::sync;
use regex::Regex;
use std::fmt::{Display, Formatter};

/// Analysis tool SemVer version.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Version(pub (u32, u32, u32));

impl Version {
    /// Parse the tool version from its version report, strings like:
    /// "5.8.8 0 @ linux-x86-64\nbirth: git.5.8.8".
    pub fn tool_parse(s: &str) -> Option<Self> {
        static V_RE: sync::Lazy<Regex> =
            sync::Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("must compile"));

        if let Some((_, [major, minor, patch])) = V_RE.captures_iter(s).next().map(|c| c.extract())
        {
            let major = weak_error!(major.parse::<u32>())?;
            let minor = weak_error!(minor.parse::<u32>())?;
            let patch = weak_error!(patch.parse::<u32>())?;
            return Some(Version((major, minor, patch)));
        }
        None
    }
}

impl Default for Version {
    fn default() -> Self {
        // the first supported version is default
        Version((3, 0, 0))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Version((major, minor, patch)) = self;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Check the version report of a freshly spawned tool, return true if the
/// version is supported, false otherwise. False positive.
pub fn probe_report(report: &str) -> bool {
    match Version::tool_parse(report) {
        Some(version) => version >= Version::default(),
        None => true,
    }
}
