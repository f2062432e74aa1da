//! Handling of payloads arriving from an instrumentation agent embedded
//! in the target process.
//!
//! Agent messages share one transport with everything else the agent
//! sends, so payloads are tagged: only those starting with the `r2` tag
//! concern this crate.

use crate::arch::TargetDescription;
use crate::session::Session;

const TAG: &str = "r2 ";

/// Parsed agent payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Target machine announcement: `r2 init <arch> [bits] [platform]`.
    /// Translated into an architecture profile for the session.
    Init(TargetDescription),
    /// Any other payload under the tag: a command to forward verbatim.
    Raw { cmd: String },
}

impl Envelope {
    /// Parse one payload. `None` means the payload is not addressed to
    /// this crate and should be left to other consumers.
    pub fn parse(payload: &str) -> Option<Envelope> {
        let rest = payload.strip_prefix(TAG)?;
        let mut tokens = rest.split_whitespace();
        match tokens.next()? {
            "init" => {
                let arch = tokens.next()?.to_string();
                let mut rest = tokens.peekable();
                let bits = rest.peek().and_then(|t| t.parse::<u32>().ok());
                if bits.is_some() {
                    rest.next();
                }
                let platform = rest
                    .next()
                    .map(str::to_string)
                    .unwrap_or_else(|| TargetDescription::host().platform);
                Some(Envelope::Init(TargetDescription {
                    arch,
                    bits,
                    platform,
                }))
            }
            _ => Some(Envelope::Raw {
                cmd: rest.trim().to_string(),
            }),
        }
    }
}

/// Reply channel back to the agent. A command that failed is reported as
/// `None`, the agent side shows the difference between an empty response
/// and no response.
pub trait Responder {
    fn respond(&self, reply: Option<String>);
}

impl<F: Fn(Option<String>)> Responder for F {
    fn respond(&self, reply: Option<String>) {
        self(reply)
    }
}

/// Handle one agent payload against `session`. Returns whether the
/// payload was addressed to this crate.
///
/// Commands run through the synchronous path: when one of them seeks,
/// the triggered mapping is finished before the reply goes out, so the
/// agent can immediately follow up with commands against the mapped
/// region.
pub fn dispatch(session: &Session, payload: &str, responder: &dyn Responder) -> bool {
    let Some(envelope) = Envelope::parse(payload) else {
        return false;
    };

    match envelope {
        Envelope::Init(target) => {
            log::info!(
                target: "r2bridge",
                "agent init: arch {} bits {:?} platform {}",
                target.arch,
                target.bits,
                target.platform
            );
            if let Err(e) = session.apply_profile(&target) {
                log::warn!(target: "r2bridge", "agent init failed: {e:#}");
            }
        }
        Envelope::Raw { cmd } => {
            let reply = match session.cmd_sync(&cmd) {
                Ok(out) => Some(out),
                Err(e) => {
                    log::warn!(target: "r2bridge", "agent command `{cmd}` failed: {e:#}");
                    None
                }
            };
            responder.respond(reply);
        }
    }
    true
}
