//! Long-lived shell sessions: `exec_command` starts one, `write_stdin` feeds
//! it and collects whatever it printed since the last call.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{is_cancelled, CancelSignal};
use serde::Deserialize;

use super::shell::kill_process_group;
use super::{truncate_to_byte_limit, Sandbox, ToolError, ToolLimits, ToolOutput, EXEC_COMMAND, WRITE_STDIN};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long to keep draining pipes after the process has exited.
const EXIT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ExecCommandArgs {
    #[serde(alias = "command")]
    cmd: String,
    #[serde(default, alias = "cwd")]
    workdir: Option<String>,
    #[serde(default)]
    yield_time_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct WriteStdinArgs {
    session_id: u32,
    #[serde(default)]
    chars: String,
    #[serde(default)]
    yield_time_ms: Option<u64>,
}

struct ExecSession {
    child: Child,
    stdin: Option<ChildStdin>,
    output: mpsc::Receiver<Vec<u8>>,
    command: String,
}

impl ExecSession {
    fn kill(mut self) {
        tracing::debug!(pid = self.child.id(), command = %self.command, "killing exec session");
        self.stdin.take();
        kill_process_group(&mut self.child);
    }
}

/// Running sessions keyed by the id handed to the model. Shared between
/// clones of [`super::NativeTools`]; the last clone dropped kills whatever is
/// still running.
#[derive(Default)]
pub(crate) struct ExecSessions {
    next_id: AtomicU32,
    running: Mutex<HashMap<u32, ExecSession>>,
}

impl std::fmt::Debug for ExecSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<u32> = self.running().keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("ExecSessions").field("running", &ids).finish()
    }
}

impl Drop for ExecSessions {
    fn drop(&mut self) {
        self.kill_all();
    }
}

struct Collected {
    output: String,
    exit_code: Option<i32>,
    exited: bool,
}

impl ExecSessions {
    fn running(&self) -> MutexGuard<'_, HashMap<u32, ExecSession>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.running().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn kill_all(&self) {
        let sessions: Vec<ExecSession> = self.running().drain().map(|(_, session)| session).collect();
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "stopping exec sessions");
        }
        for session in sessions {
            session.kill();
        }
    }

    pub(crate) fn exec_command(
        &self,
        sandbox: &Sandbox,
        limits: &ToolLimits,
        args: ExecCommandArgs,
        cancel: &CancelSignal,
    ) -> Result<ToolOutput, ToolError> {
        if args.cmd.trim().is_empty() {
            return Err(ToolError::invalid(EXEC_COMMAND, "cmd must not be empty"));
        }
        if self.running().len() >= limits.exec_max_sessions {
            return Err(ToolError::Failed(format!(
                "too many running sessions ({}); finish one with write_stdin first",
                limits.exec_max_sessions
            )));
        }
        let workdir = match &args.workdir {
            Some(workdir) => {
                let resolved = sandbox.resolve_existing(workdir)?;
                if !resolved.is_dir() {
                    return Err(ToolError::Failed(format!("workdir '{workdir}' is not a directory")));
                }
                resolved
            }
            None => sandbox.root().to_path_buf(),
        };
        if is_cancelled(cancel) {
            return Err(ToolError::Cancelled);
        }

        let started = Instant::now();
        let mut session = spawn(&args.cmd, &workdir)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(session_id = id, pid = session.child.id(), workdir = %workdir.display(), "exec session started");

        let yield_time = yield_time(args.yield_time_ms, limits);
        let collected = collect(&mut session, yield_time, limits.shell_max_output_bytes, cancel);
        self.finish(id, session, collected, started, &args.cmd)
    }

    pub(crate) fn write_stdin(&self, limits: &ToolLimits, args: WriteStdinArgs, cancel: &CancelSignal) -> Result<ToolOutput, ToolError> {
        let mut session = self.running().remove(&args.session_id).ok_or_else(|| {
            ToolError::invalid(WRITE_STDIN, format!("no running session with id {}", args.session_id))
        })?;
        let started = Instant::now();

        if !args.chars.is_empty() {
            let written = match session.stdin.as_mut() {
                Some(stdin) => stdin.write_all(args.chars.as_bytes()).and_then(|()| stdin.flush()),
                None => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed")),
            };
            if let Err(error) = written {
                tracing::debug!(session_id = args.session_id, %error, "session stdin write failed");
                session.stdin.take();
            }
        }

        let yield_time = yield_time(args.yield_time_ms, limits);
        let collected = collect(&mut session, yield_time, limits.shell_max_output_bytes, cancel);
        let command = session.command.clone();
        self.finish(args.session_id, session, collected, started, &command)
    }

    /// Reinserts a session that is still running; a cancelled call kills it.
    fn finish(
        &self,
        id: u32,
        session: ExecSession,
        collected: Result<Collected, ToolError>,
        started: Instant,
        command: &str,
    ) -> Result<ToolOutput, ToolError> {
        let collected = match collected {
            Ok(collected) => collected,
            Err(error) => {
                session.kill();
                return Err(error);
            }
        };
        let session_id = if collected.exited {
            None
        } else {
            self.running().insert(id, session);
            Some(id)
        };

        let content = render(&collected, session_id, started.elapsed());
        let state = match (session_id, collected.exit_code) {
            (Some(id), _) => format!("session {id} running"),
            (None, Some(code)) => format!("exit_code={code}"),
            (None, None) => "terminated by signal".to_string(),
        };
        let head: String = command.lines().next().unwrap_or_default().chars().take(60).collect();
        Ok(ToolOutput::new(content, format!("exec `{head}` ({state})")))
    }
}

fn yield_time(requested: Option<u64>, limits: &ToolLimits) -> Duration {
    let millis = requested
        .unwrap_or(limits.exec_yield_ms)
        .min(limits.exec_max_yield_ms.max(1));
    Duration::from_millis(millis)
}

fn spawn(cmd: &str, workdir: &std::path::Path) -> Result<ExecSession, ToolError> {
    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|error| ToolError::Failed(format!("failed to launch bash: {error}")))?;
    let (sender, output) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        forward(stdout, sender.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward(stderr, sender);
    }
    Ok(ExecSession {
        stdin: child.stdin.take(),
        child,
        output,
        command: cmd.to_string(),
    })
}

/// Copies `pipe` into `sender` chunk by chunk until the pipe closes.
fn forward(mut pipe: impl Read + Send + 'static, sender: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buffer = [0_u8; 8192];
        loop {
            match pipe.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    if sender.send(buffer[..read].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Gathers output until `yield_time` passes or the process exits. Once it has
/// exited the pipes are drained briefly so trailing output is not lost.
fn collect(
    session: &mut ExecSession,
    yield_time: Duration,
    max_bytes: usize,
    cancel: &CancelSignal,
) -> Result<Collected, ToolError> {
    let mut bytes = Vec::new();
    let deadline = Instant::now() + yield_time;
    let mut exit: Option<Option<i32>> = None;

    loop {
        if is_cancelled(cancel) {
            return Err(ToolError::Cancelled);
        }
        match session.output.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }
        match session.child.try_wait() {
            Ok(Some(status)) => {
                exit = Some(status.code());
                let drain_until = Instant::now() + EXIT_DRAIN;
                while let Ok(chunk) = session
                    .output
                    .recv_timeout(drain_until.saturating_duration_since(Instant::now()))
                {
                    bytes.extend_from_slice(&chunk);
                }
                break;
            }
            Ok(None) => {}
            Err(error) => return Err(ToolError::Failed(format!("failed waiting for session: {error}"))),
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    let mut output = String::from_utf8_lossy(&bytes).into_owned();
    if truncate_to_byte_limit(&mut output, max_bytes) {
        output.push_str(&format!("\n[truncated: {max_bytes} of {} bytes]", bytes.len()));
    }
    Ok(Collected {
        output,
        exit_code: exit.flatten(),
        exited: exit.is_some(),
    })
}

fn render(collected: &Collected, session_id: Option<u32>, wall_time: Duration) -> String {
    let mut sections = vec![format!("Wall time: {:.3} seconds", wall_time.as_secs_f64())];
    if collected.exited {
        sections.push(match collected.exit_code {
            Some(code) => format!("Exit code: {code}"),
            None => "Exit code: terminated by signal".to_string(),
        });
    }
    if let Some(id) = session_id {
        sections.push(format!("Session ID: {id} (still running)"));
    }
    sections.push("Output:".to_string());
    sections.push(if collected.output.is_empty() {
        "(no output)".to_string()
    } else {
        collected.output.clone()
    });
    sections.join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::Ordering;

    use agent_provider::new_cancel_signal;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(dir.path()).expect("sandbox");
        (dir, sandbox)
    }

    fn exec(cmd: &str, yield_time_ms: u64) -> ExecCommandArgs {
        ExecCommandArgs {
            cmd: cmd.to_string(),
            workdir: None,
            yield_time_ms: Some(yield_time_ms),
        }
    }

    fn stdin(session_id: u32, chars: &str) -> WriteStdinArgs {
        WriteStdinArgs {
            session_id,
            chars: chars.to_string(),
            yield_time_ms: Some(500),
        }
    }

    fn session_id(output: &ToolOutput) -> u32 {
        let line = output
            .content
            .lines()
            .find_map(|line| line.strip_prefix("Session ID: "))
            .expect("session id line");
        line.split_whitespace().next().expect("id").parse().expect("numeric id")
    }

    #[test]
    fn short_commands_finish_within_the_first_call() {
        let (_dir, sandbox) = sandbox();
        let sessions = ExecSessions::default();

        let output = sessions
            .exec_command(&sandbox, &ToolLimits::default(), exec("echo hi; exit 3", 5_000), &new_cancel_signal())
            .expect("runs");

        assert!(output.content.contains("Exit code: 3"), "{}", output.content);
        assert!(output.content.ends_with("Output:\nhi\n"), "{}", output.content);
        assert_eq!(output.summary, "exec `echo hi; exit 3` (exit_code=3)");
        assert!(sessions.ids().is_empty());
    }

    #[test]
    fn interactive_session_keeps_state_between_writes() {
        let (_dir, sandbox) = sandbox();
        let sessions = ExecSessions::default();
        let limits = ToolLimits::default();
        let cancel = new_cancel_signal();

        let started = sessions
            .exec_command(&sandbox, &limits, exec("while read -r line; do echo \"got $line\"; done", 100), &cancel)
            .expect("starts");
        let id = session_id(&started);
        assert_eq!(sessions.ids(), vec![id]);

        let reply = sessions.write_stdin(&limits, stdin(id, "first\n"), &cancel).expect("write");
        assert!(reply.content.contains("got first"), "{}", reply.content);
        assert!(reply.content.contains(&format!("Session ID: {id} (still running)")));

        let again = sessions.write_stdin(&limits, stdin(id, "second\n"), &cancel).expect("write");
        assert!(again.content.contains("got second"), "{}", again.content);
        assert!(!again.content.contains("got first"), "{}", again.content);

        sessions.kill_all();
        assert!(sessions.ids().is_empty());
        assert_matches!(
            sessions.write_stdin(&limits, stdin(id, "again\n"), &cancel),
            Err(ToolError::InvalidArguments { tool: WRITE_STDIN, .. })
        );
    }

    #[test]
    fn session_ends_when_its_input_closes_the_loop() {
        let (_dir, sandbox) = sandbox();
        let sessions = ExecSessions::default();
        let limits = ToolLimits::default();
        let cancel = new_cancel_signal();

        let started = sessions
            .exec_command(&sandbox, &limits, exec("read -r name; echo \"bye $name\"", 100), &cancel)
            .expect("starts");
        let id = session_id(&started);

        let finished = sessions.write_stdin(&limits, stdin(id, "ada\n"), &cancel).expect("write");
        assert!(finished.content.contains("Exit code: 0"), "{}", finished.content);
        assert!(finished.content.contains("bye ada"), "{}", finished.content);
        assert!(sessions.ids().is_empty());
    }

    #[test]
    fn cancelling_a_wait_kills_the_session() {
        let (_dir, sandbox) = sandbox();
        let sessions = ExecSessions::default();
        let limits = ToolLimits::default();
        let cancel = new_cancel_signal();

        let started = sessions
            .exec_command(&sandbox, &limits, exec("sleep 30", 50), &cancel)
            .expect("starts");
        let id = session_id(&started);

        cancel.store(true, Ordering::Release);
        let error = sessions.write_stdin(&limits, stdin(id, ""), &cancel).unwrap_err();
        assert_eq!(error, ToolError::Cancelled);
        assert!(sessions.ids().is_empty());
    }

    #[test]
    fn session_count_is_bounded_and_workdir_is_sandboxed() {
        let (_dir, sandbox) = sandbox();
        let sessions = ExecSessions::default();
        let limits = ToolLimits {
            exec_max_sessions: 1,
            ..ToolLimits::default()
        };
        let cancel = new_cancel_signal();

        sessions
            .exec_command(&sandbox, &limits, exec("sleep 30", 10), &cancel)
            .expect("first session");
        assert_matches!(
            sessions.exec_command(&sandbox, &limits, exec("sleep 30", 10), &cancel),
            Err(ToolError::Failed(message)) if message.contains("too many running sessions")
        );
        sessions.kill_all();

        let escaping = ExecCommandArgs {
            workdir: Some("..".to_string()),
            ..exec("pwd", 10)
        };
        assert_matches!(
            sessions.exec_command(&sandbox, &limits, escaping, &cancel),
            Err(ToolError::SandboxViolation { .. })
        );
    }
}
