//! Launch, drain, join and terminate one child process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use p2ptest_core::platform::LIBRARY_PATH_VAR;
use p2ptest_core::{obs, HarnessError, ProcessOutcome, ProcessSpec, ProcessState, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::aggregator::FailureAggregator;
use crate::log_sink::LogSink;

/// How long to keep draining output after the process has been reaped.
///
/// A grandchild that inherited the pipes can hold them open indefinitely;
/// after this window the readers are cancelled.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on reaping a process after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches [`SupervisedProcess`]es that log into one directory and report
/// into one [`FailureAggregator`].
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    log_dir: PathBuf,
    aggregator: Arc<FailureAggregator>,
    drain_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(log_dir: impl Into<PathBuf>, aggregator: Arc<FailureAggregator>) -> Self {
        Self {
            log_dir: log_dir.into(),
            aggregator,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn aggregator(&self) -> &Arc<FailureAggregator> {
        &self.aggregator
    }

    /// Start `spec` and begin draining its merged output into `<tag>.log`.
    ///
    /// stdin is closed, stdout and stderr both feed the log, and the
    /// environment is the inherited one plus `spec.env`. On unix the child
    /// leads its own process group so termination reaches its descendants.
    ///
    /// A failed launch is not recorded here; see [`Self::record_launch_failure`].
    pub fn launch(&self, spec: &ProcessSpec, scenario: Option<&str>) -> Result<SupervisedProcess> {
        spec.validate()?;
        let mut sink = LogSink::open(&self.log_dir, &spec.tag)?;

        if let Some(value) = spec.env.get(LIBRARY_PATH_VAR) {
            sink.write_line(&format!("{LIBRARY_PATH_VAR} = '{value}'"))?;
        }
        sink.write_line(&format!("Executing: {}", spec.display_command()))?;

        let mut command = build_command(spec);
        #[cfg(unix)]
        let merged = {
            let (receiver, stdout, stderr) = merged_output()?;
            command.stdout(stdout).stderr(stderr);
            receiver
        };
        let spawned = command.spawn();
        // Our copies of the write end must close for the reader to see EOF.
        drop(command);
        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let _ = sink.write_line(&format!("Failed to launch: {source}"));
                return Err(HarnessError::Launch {
                    tag: spec.tag.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        obs::emit_process_launched(&spec.tag, pid, spec.infrastructure);

        let (log, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        #[cfg(unix)]
        readers.push(spawn_reader(spec.tag.clone(), merged, log.clone()));
        #[cfg(not(unix))]
        let child = {
            let mut child = child;
            if let Some(stdout) = child.stdout.take() {
                readers.push(spawn_reader(spec.tag.clone(), stdout, log.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(spawn_reader(spec.tag.clone(), stderr, log.clone()));
            }
            child
        };
        let writer = sink.spawn_writer(rx);

        Ok(SupervisedProcess {
            spec: spec.clone(),
            scenario: scenario.map(str::to_string),
            started_at: Utc::now(),
            started: Instant::now(),
            child,
            pid,
            state: ProcessState::Running,
            log,
            readers,
            writer,
            aggregator: Arc::clone(&self.aggregator),
            drain_timeout: self.drain_timeout,
        })
    }

    /// Record the outcome of a process that never started, so that every
    /// spec contributes exactly one entry.
    pub fn record_launch_failure(
        &self,
        spec: &ProcessSpec,
        error: &HarnessError,
        scenario: Option<&str>,
    ) -> ProcessOutcome {
        obs::emit_process_launch_failed(&spec.tag, error);
        let outcome = match scenario {
            Some(name) => ProcessOutcome::launch_failed(spec, error).with_scenario(name),
            None => ProcessOutcome::launch_failed(spec, error),
        };
        self.aggregator.record(outcome.clone());
        outcome
    }
}

fn build_command(spec: &ProcessSpec) -> Command {
    let mut command = std::process::Command::new(spec.program().unwrap_or_default());
    command
        .args(spec.args())
        .envs(&spec.env)
        .stdin(Stdio::null());
    #[cfg(not(unix))]
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    command
}

/// One pipe shared by stdout and stderr, so the log keeps the order in
/// which the child wrote to either stream.
#[cfg(unix)]
fn merged_output() -> Result<(tokio::net::unix::pipe::Receiver, Stdio, Stdio)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (read, write) = nix::unistd::pipe().map_err(std::io::Error::from)?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(std::io::Error::from)?;
    }
    let write_err = write.try_clone()?;
    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(read)?;
    Ok((receiver, Stdio::from(write), Stdio::from(write_err)))
}

/// Forward every line of `pipe` to the log channel until end of input.
fn spawn_reader<R>(tag: String, pipe: R, log: UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if log.send(line.trim_end().to_string()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(tag = %tag, error = %e, "output stream read failed");
                    break;
                }
            }
        }
    })
}

/// One running child owned exclusively by its supervisor.
///
/// Consumed by [`join`](Self::join) or
/// [`terminate_gracefully`](Self::terminate_gracefully), each of which
/// records exactly one [`ProcessOutcome`]. Dropping it without joining kills
/// the child.
#[derive(Debug)]
pub struct SupervisedProcess {
    spec: ProcessSpec,
    scenario: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
    child: Child,
    pid: Option<u32>,
    state: ProcessState,
    log: UnboundedSender<String>,
    readers: Vec<JoinHandle<()>>,
    writer: JoinHandle<LogSink>,
    aggregator: Arc<FailureAggregator>,
    drain_timeout: Duration,
}

impl SupervisedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Append a supervisor line to this process's log.
    fn log_line(&self, text: impl Into<String>) {
        let _ = self.log.send(text.into());
    }

    fn transition(&mut self, next: ProcessState) {
        if self.state.can_transition_to(next) {
            debug!(tag = %self.spec.tag, from = ?self.state, to = ?next, "process state");
            self.state = next;
        } else {
            debug!(tag = %self.spec.tag, from = ?self.state, to = ?next, "ignoring state change");
        }
    }

    /// Wait for the process to exit, killing it if `timeout` elapses first.
    ///
    /// A killed process is recorded as timed out with no exit code.
    pub async fn join(mut self, timeout: Duration) -> ProcessOutcome {
        let waited = tokio::time::timeout(timeout, self.child.wait()).await;
        let (status, timed_out) = match waited {
            Ok(Ok(status)) => {
                self.transition(ProcessState::Exited);
                (Some(status), false)
            }
            Ok(Err(e)) => {
                warn!(tag = %self.spec.tag, error = %e, "waiting on process failed");
                self.log_line(format!("Wait failed: {e}.  Killing"));
                (self.force_kill().await, false)
            }
            Err(_) => {
                obs::emit_process_timed_out(&self.spec.tag, timeout);
                self.log_line(format!(
                    "Still running after {} seconds.  Killing",
                    timeout.as_secs_f64()
                ));
                (self.force_kill().await, true)
            }
        };

        self.finish(status, timed_out).await
    }

    /// Ask the process to stop, then [`join`](Self::join) with `grace`.
    ///
    /// If the grace period runs out the forced kill in `join` takes over.
    pub async fn terminate_gracefully(mut self, grace: Duration) -> ProcessOutcome {
        self.log_line("Attempting graceful shutdown");
        obs::emit_termination_requested(&self.spec.tag, grace);
        if let Err(e) = self.request_termination() {
            warn!(tag = %self.spec.tag, error = %e, "termination request failed");
        }
        self.transition(ProcessState::TerminationRequested);
        self.join(grace).await
    }

    #[cfg(unix)]
    fn request_termination(&mut self) -> Result<()> {
        signal_group(self.pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn request_termination(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    async fn force_kill(&mut self) -> Option<ExitStatus> {
        #[cfg(unix)]
        {
            if let Err(e) = signal_group(self.pid, nix::sys::signal::Signal::SIGKILL) {
                debug!(tag = %self.spec.tag, error = %e, "group kill failed");
            }
        }
        if let Err(e) = self.child.start_kill() {
            debug!(tag = %self.spec.tag, error = %e, "kill failed");
        }
        self.transition(ProcessState::ForceKilled);

        let reaped = tokio::time::timeout(KILL_REAP_TIMEOUT, self.child.wait()).await;
        match reaped {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(tag = %self.spec.tag, error = %e, "reaping killed process failed");
                None
            }
            Err(_) => {
                warn!(tag = %self.spec.tag, "killed process was not reaped in time");
                None
            }
        }
    }

    /// Drain remaining output, write the exit line, close the log and
    /// record the outcome.
    async fn finish(self, status: Option<ExitStatus>, timed_out: bool) -> ProcessOutcome {
        let SupervisedProcess {
            spec,
            scenario,
            started_at,
            started,
            pid,
            log,
            mut readers,
            writer,
            aggregator,
            drain_timeout,
            ..
        } = self;

        let drained =
            tokio::time::timeout(drain_timeout, futures::future::join_all(readers.iter_mut()))
                .await;
        if drained.is_err() {
            // A descendant still holds the pipe; it must not outlive us.
            #[cfg(unix)]
            {
                if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGKILL) {
                    debug!(tag = %spec.tag, error = %e, "group kill after drain failed");
                }
            }
            for reader in &readers {
                reader.abort();
            }
            let _ = log.send("Output still open after exit; discarding the rest".to_string());
        }

        let _ = log.send(describe_exit(status));
        drop(log);
        if let Err(e) = writer.await {
            warn!(tag = %spec.tag, error = %e, "log writer failed");
        }

        let outcome = ProcessOutcome {
            tag: spec.tag.clone(),
            exit_code: if timed_out {
                None
            } else {
                status.and_then(|s| s.code())
            },
            signal: status.and_then(exit_signal),
            timed_out,
            launch_error: None,
            infrastructure: spec.infrastructure,
            scenario,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        obs::emit_process_exited(
            &outcome.tag,
            outcome.exit_code,
            outcome.duration_ms,
            outcome.is_failure(),
        );
        aggregator.record(outcome.clone());
        outcome
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(HarnessError::Signal(format!("{signal:?} to group {pid}: {e}"))),
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => match (status.code(), exit_signal(status)) {
            (Some(code), _) => format!("Exited with code {code}"),
            (None, Some(signal)) => format!("Terminated by signal {signal}"),
            (None, None) => "Exited with unknown status".to_string(),
        },
        None => "Exit status unavailable".to_string(),
    }
}
