use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{is_cancelled, CancelSignal};
use serde::Deserialize;
use wait_timeout::ChildExt;

use super::{truncate_to_byte_limit, Sandbox, ToolError, ToolLimits, ToolOutput, SHELL};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READER_GRACE: Duration = Duration::from_secs(2);
const SUMMARY_COMMAND_CHARS: usize = 60;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ShellArgs {
    command: String,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default, alias = "cwd")]
    workdir: Option<String>,
}

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    total: usize,
}

/// Runs `bash -c <command>`, killing its whole process group on timeout or
/// cancellation. Exit code zero is success; anything else comes back as
/// [`ToolError::Failed`] carrying the same report.
pub(crate) fn run(sandbox: &Sandbox, limits: &ToolLimits, args: ShellArgs, cancel: &CancelSignal) -> Result<ToolOutput, ToolError> {
    if args.command.trim().is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: SHELL,
            message: "command must not be empty".to_string(),
        });
    }
    let timeout = args
        .timeout_sec
        .unwrap_or(limits.shell_timeout_sec)
        .clamp(1, limits.shell_max_timeout_sec.max(1));
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

    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(&args.command)
        .current_dir(&workdir)
        .stdin(Stdio::null())
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
    let stdout = spawn_reader(child.stdout.take(), limits.shell_max_output_bytes);
    let stderr = spawn_reader(child.stderr.take(), limits.shell_max_output_bytes);
    tracing::debug!(pid = child.id(), timeout, workdir = %workdir.display(), "shell command started");

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let ending = loop {
        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => break Ending::Exited(status),
            Ok(None) => {}
            Err(error) => {
                kill_process_group(&mut child);
                return Err(ToolError::Failed(format!("failed waiting for command: {error}")));
            }
        }
        if is_cancelled(cancel) {
            kill_process_group(&mut child);
            break Ending::Cancelled;
        }
        if Instant::now() >= deadline {
            kill_process_group(&mut child);
            break Ending::TimedOut;
        }
    };

    let status_label = match &ending {
        Ending::Cancelled => {
            tracing::info!(pid = child.id(), "shell command cancelled");
            return Err(ToolError::Cancelled);
        }
        Ending::TimedOut => format!("timeout after {timeout}s"),
        Ending::Exited(status) => format_exit_status(*status),
    };

    let stdout = stdout.recv_timeout(READER_GRACE).unwrap_or_default();
    let stderr = stderr.recv_timeout(READER_GRACE).unwrap_or_default();
    let mut content = format!(
        "status: {status_label}\nstdout:\n{}\nstderr:\n{}",
        render_stream(&stdout),
        render_stream(&stderr)
    );
    if truncate_to_byte_limit(&mut content, limits.shell_max_output_bytes) {
        content.push_str("\n[truncated]");
    }

    match ending {
        Ending::Exited(status) if status.success() => Ok(ToolOutput::new(
            content,
            format!("shell `{}` ({status_label})", summarize_command(&args.command)),
        )),
        _ => Err(ToolError::Failed(content)),
    }
}

/// Drains `pipe` on its own thread so a chatty child never blocks on a full
/// pipe. Keeps at most `cap` bytes but counts everything.
fn spawn_reader(pipe: Option<impl Read + Send + 'static>, cap: usize) -> mpsc::Receiver<Captured> {
    let (sender, receiver) = mpsc::channel();
    let Some(mut pipe) = pipe else {
        let _ = sender.send(Captured::default());
        return receiver;
    };

    thread::spawn(move || {
        let mut captured = Captured::default();
        let mut buffer = [0_u8; 8192];
        loop {
            match pipe.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    captured.total += read;
                    let room = cap.saturating_sub(captured.bytes.len());
                    captured.bytes.extend_from_slice(&buffer[..read.min(room)]);
                }
            }
        }
        let _ = sender.send(captured);
    });
    receiver
}

fn render_stream(captured: &Captured) -> String {
    let mut text = String::from_utf8_lossy(&captured.bytes).into_owned();
    if captured.total > captured.bytes.len() {
        text.push_str(&format!("\n[truncated: {} of {} bytes]", captured.bytes.len(), captured.total));
    }
    text
}

pub(super) fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: signalling a process group we created; no memory is shared.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}

fn summarize_command(command: &str) -> String {
    let first_line = command.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() > SUMMARY_COMMAND_CHARS || command.lines().nth(1).is_some() {
        let head: String = first_line.chars().take(SUMMARY_COMMAND_CHARS).collect();
        format!("{head}…")
    } else {
        first_line.to_string()
    }
}
