//! Child processes for `run_cmd`, the command oracle, and detached launches.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may lag behind a reaped or killed child.
const READER_GRACE: Duration = Duration::from_millis(500);

/// One output stream, kept up to a byte cap.
#[derive(Debug, Default)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    /// Bytes read past the cap and discarded.
    pub dropped: usize,
}

impl CapturedStream {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// `[<label> truncated N bytes]` line, or empty when nothing was dropped.
    pub fn notice(&self, label: &str) -> String {
        if self.dropped == 0 {
            return String::new();
        }
        format!("\n[{label} truncated {} bytes]\n", self.dropped)
    }

    fn push(&mut self, chunk: &[u8], cap: usize) {
        let keep = chunk.len().min(cap.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

/// Drains one pipe on its own thread into a shared buffer.
///
/// The buffer can be taken while the thread is still blocked, which happens
/// when a grandchild inherited the pipe and outlives the child.
struct StreamReader {
    shared: Arc<Mutex<CapturedStream>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(
        mut reader: R,
        cap: usize,
        label: &'static str,
        done: Sender<()>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(CapturedStream::default()));
        let sink = Arc::clone(&shared);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(&chunk[..n], cap),
                    Err(err) => {
                        debug!(stream = label, err = %err, "stopped reading child output");
                        break;
                    }
                }
            }
            let _ = done.send(());
        });
        Self { shared }
    }

    fn take(self) -> CapturedStream {
        std::mem::take(&mut *self.shared.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Result of a bounded child run.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn dropped_bytes(&self) -> usize {
        self.stdout.dropped + self.stderr.dropped
    }
}

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// Both pipes are drained on reader threads while the child runs, so a chatty
/// child cannot block on a full pipe. At most `cap` bytes of each stream are
/// kept. On unix the child leads its own process group; at the deadline the
/// whole group is killed and the run is reported with `timed_out`. The same
/// happens when the child exits but something it started keeps the output
/// pipes open past the deadline. Readers get a short grace period after
/// that; whatever they collected by then is returned.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, cap = cap))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    cap: usize,
) -> Result<CommandOutput> {
    let deadline = Instant::now() + timeout;
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;
    let pid = child.id();

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("child stdin missing"))?;
        pipe.write_all(input).context("write child stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr missing"))?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout = StreamReader::spawn(stdout, cap, "stdout", done_tx.clone());
    let stderr = StreamReader::spawn(stderr, cap, "stderr", done_tx);

    let (status, mut timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(pid, "command exceeded its timeout; killing its process group");
            kill_process_group(pid);
            if let Err(err) = child.kill() {
                debug!(pid, err = %err, "child already gone");
            }
            (child.wait().context("reap killed command")?, true)
        }
    };

    let drain_until = if timed_out {
        Instant::now() + READER_GRACE
    } else {
        deadline.max(Instant::now() + READER_GRACE)
    };
    let mut open = wait_for_readers(&done_rx, 2, drain_until);
    if open > 0 && !timed_out {
        warn!(pid, "command exited but left processes holding its output; killing them");
        kill_process_group(pid);
        timed_out = true;
        open = wait_for_readers(&done_rx, open, Instant::now() + READER_GRACE);
    }
    if open > 0 {
        warn!(pid, open, "output readers still blocked; returning partial output");
    }

    let output = CommandOutput {
        status,
        stdout: stdout.take(),
        stderr: stderr.take(),
        timed_out,
    };
    if output.dropped_bytes() > 0 {
        warn!(dropped = output.dropped_bytes(), "command output truncated");
    }
    debug!(exit_code = ?output.status.code(), timed_out, "command finished");
    Ok(output)
}

/// Number of readers still open once `until` passes.
fn wait_for_readers(done: &Receiver<()>, mut open: usize, until: Instant) -> usize {
    while open > 0 {
        let left = until.saturating_duration_since(Instant::now());
        match done.recv_timeout(left) {
            Ok(()) => open -= 1,
            Err(_) => break,
        }
    }
    open
}

/// SIGKILL every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("kill -s KILL -- -{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(pgid, "killed process group"),
        Ok(_) => debug!(pgid, "process group already gone"),
        Err(err) => warn!(pgid, err = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Spawn a process that outlives the request and return its pid.
///
/// A reaper thread waits on the child so it never lingers as a zombie.
#[instrument(skip_all)]
pub fn spawn_detached(mut cmd: Command) -> Result<u32> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let mut child = cmd.spawn().context("spawn detached process")?;
    let pid = child.id();
    thread::spawn(move || {
        if let Err(err) = child.wait() {
            warn!(pid, err = %err, "failed to reap detached process");
        }
    });
    debug!(pid, "spawned detached process");
    Ok(pid)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn reports_both_streams_and_exit_code() {
        let output = run_command_with_timeout(
            sh("echo out; echo err 1>&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout.lossy(), "out\n");
        assert_eq!(output.stderr.lossy(), "err\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn bytes_past_the_cap_are_dropped_and_counted() {
        let output =
            run_command_with_timeout(sh("printf 'abcdefghij'"), None, Duration::from_secs(5), 4)
                .expect("run");
        assert_eq!(output.stdout.bytes, b"abcd");
        assert_eq!(output.stdout.dropped, 6);
        assert_eq!(output.dropped_bytes(), 6);
        assert!(output.stdout.notice("cmd stdout").contains("truncated 6 bytes"));
        assert!(output.stderr.notice("cmd stderr").is_empty());
    }

    #[test]
    fn overdue_commands_are_killed() {
        let output =
            run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(200), 1024)
                .expect("run");
        assert!(output.timed_out);
    }

    /// Verifies a shell's own children die with it at the deadline.
    #[test]
    fn deadline_kills_grandchildren_holding_the_pipes() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6; echo done"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!output.stdout.lossy().contains("done"));
    }

    #[test]
    fn background_children_cannot_hold_the_run_open() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 6 & echo started"),
            None,
            Duration::from_secs(1),
            1024,
        )
        .expect("run");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(output.status.code(), Some(0));
        assert_eq!(output.stdout.lossy(), "started\n");
        assert!(output.timed_out);
    }

    #[test]
    fn prompt_reaches_child_stdin() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout.lossy(), "hello");
    }
}
