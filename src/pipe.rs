use crate::error::{BrokenReason, Error};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;
use timeout_readwrite::TimeoutReader;

/// Response terminator appended by the tool after every command.
const SENTINEL: u8 = 0x00;
/// Responses are drained in chunks of this size.
const RESPONSE_CHUNK: usize = 4096;
/// Pause between retries of an incomplete read.
const READ_PAUSE: Duration = Duration::from_millis(1);

/// Raw stdio connection to one tool subprocess.
///
/// One command in, one sentinel terminated response out. `Pipe` holds no
/// locking and no recovery policy, the session layers both on top.
pub struct Pipe {
    child: Child,
    stdin: ChildStdin,
    stdout: TimeoutReader<ChildStdout>,
    read_retry_limit: u32,
}

impl Pipe {
    /// Spawn the tool against `target` and wait out its startup banner.
    ///
    /// The tool is started in quiet mode with the zero byte terminator
    /// enabled, writable, with no script evaluation on startup. Its first
    /// output byte announces readiness and carries no payload.
    pub fn open(
        tool: &Path,
        target: &str,
        read_timeout: Duration,
        read_retry_limit: u32,
    ) -> Result<Self, Error> {
        let mut child = Command::new(tool)
            .arg("-w")
            .arg("-q0")
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(Error::Spawn)?;

        let stdin = child.stdin.take().ok_or(Error::Stdio)?;
        let stdout = child.stdout.take().ok_or(Error::Stdio)?;

        let mut pipe = Pipe {
            child,
            stdin,
            stdout: TimeoutReader::new(stdout, read_timeout),
            read_retry_limit,
        };
        pipe.discard_banner().map_err(Error::PipeBroken)?;

        log::debug!(target: "r2bridge", "tool process spawned, pid {}", pipe.pid());
        Ok(pipe)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Send one command and read its complete response.
    ///
    /// Inner newlines are folded into `;` so the line oriented protocol
    /// sees exactly one command. The response is drained until a chunk
    /// ends with the sentinel byte; the sentinel and a single trailing
    /// newline are stripped and the rest is decoded lossily.
    pub fn exchange(&mut self, cmd: &str) -> Result<String, BrokenReason> {
        let line = sanitize(cmd);
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| {
                log::warn!(target: "r2bridge", "command write: {e}");
                BrokenReason::WriteFailed
            })?;

        let mut response = Vec::new();
        let mut chunk = [0u8; RESPONSE_CHUNK];
        let mut retries = 0u32;
        loop {
            match self.stdout.read(&mut chunk) {
                Ok(0) => return Err(BrokenReason::ClosedByTool),
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if chunk[n - 1] == SENTINEL {
                        break;
                    }
                }
                Err(e) if retryable(&e) => {
                    retries += 1;
                    if retries > self.read_retry_limit {
                        log::warn!(target: "r2bridge", "response wait exhausted after {retries} attempts");
                        return Err(BrokenReason::ReadTimeout);
                    }
                    std::thread::sleep(READ_PAUSE);
                }
                Err(e) => {
                    log::warn!(target: "r2bridge", "response read: {e}");
                    return Err(BrokenReason::ReadFailed);
                }
            }
        }

        response.pop();
        if response.last() == Some(&b'\n') {
            response.pop();
        }
        log::trace!(target: "r2bridge", "`{}` -> {} bytes", line.trim_end(), response.len());
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Kill the subprocess and reap it. When the direct kill fails the
    /// shutdown falls back to a process table sweep by executable name.
    pub fn shutdown(&mut self, tool_name: &str) {
        if let Ok(Some(status)) = self.child.try_wait() {
            log::debug!(target: "r2bridge", "tool process already exited: {status}");
            return;
        }
        if self.child.kill().is_err() {
            kill_by_name(tool_name);
        }
        let _ = self.child.wait();
    }

    fn discard_banner(&mut self) -> Result<(), BrokenReason> {
        let mut banner = [0u8; 1];
        let mut retries = 0u32;
        loop {
            match self.stdout.read(&mut banner) {
                Ok(0) => return Err(BrokenReason::ClosedByTool),
                Ok(_) => return Ok(()),
                Err(e) if retryable(&e) => {
                    retries += 1;
                    if retries > self.read_retry_limit {
                        return Err(BrokenReason::ReadTimeout);
                    }
                    std::thread::sleep(READ_PAUSE);
                }
                Err(e) => {
                    log::warn!(target: "r2bridge", "banner read: {e}");
                    return Err(BrokenReason::ReadFailed);
                }
            }
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn sanitize(cmd: &str) -> String {
    let mut line = cmd.trim().replace('\n', ";");
    line.push('\n');
    line
}

fn retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Last resort cleanup for tool processes the session lost track of.
fn kill_by_name(name: &str) {
    let system = sysinfo::System::new_all();
    for process in system.processes_by_name(name) {
        log::warn!(target: "r2bridge", "killing stray tool process {}", process.pid());
        process.kill();
    }
}
