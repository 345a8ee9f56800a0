//! Child process execution with line streaming.
//!
//! Both runners merge stdout and stderr into one stream and hand each line
//! to a callback as it arrives. A non-zero exit is a result, not an error;
//! only failing to spawn or read is reported as `Err`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::types::CommandResult;

/// Progress of a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEvent<'a> {
    Spawned(u32),
    Line(&'a str),
}

/// Prompt sudo is told to print, so a password request can be told apart
/// from command output.
pub const SUDO_PROMPT_MARKER: &str = "SUDO_USER_PASSWORD_PROMPT";

/// Exit code of a finished process; signals map to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Run `cmd` with `sh -c`, adding `env` to the inherited environment.
pub fn run_shell(
    cmd: &str,
    env: &BTreeMap<String, String>,
    mut on_event: impl FnMut(CommandEvent<'_>),
) -> io::Result<CommandResult> {
    let (reader, writer) = io::pipe()?;

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(writer.try_clone()?)
        .stderr(writer);

    let mut child = command.spawn()?;
    // The parent's copies of the write end must go, or reads never hit EOF.
    drop(command);
    on_event(CommandEvent::Spawned(child.id()));

    let mut logs = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = trim_line(&text);
        on_event(CommandEvent::Line(line));
        logs.push(line.to_string());
    }

    let status = child.wait()?;
    Ok(CommandResult {
        exit_code: exit_code(status),
        logs,
    })
}

/// Splits pty output into lines and answers the sudo prompt.
///
/// Reads arrive as raw bytes and may end inside a UTF-8 sequence, so only
/// complete lines are decoded.
struct PromptWatcher<'p> {
    password: Option<&'p str>,
    answered: bool,
    pending: Vec<u8>,
}

enum PromptAction {
    None,
    Answer,
    /// Asked again after a password was sent; the password is wrong
    Abort,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn emit_bytes(bytes: &[u8], emit: &mut impl FnMut(&str)) {
    let line = String::from_utf8_lossy(bytes);
    emit(trim_line(&line));
}

impl<'p> PromptWatcher<'p> {
    fn new(password: Option<&'p str>) -> Self {
        Self {
            password,
            answered: false,
            pending: Vec::new(),
        }
    }

    /// Feed a chunk, emitting complete lines. The marker is removed from the
    /// stream wherever it appears.
    fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(&str)) -> PromptAction {
        self.pending.extend_from_slice(chunk);
        let mut action = PromptAction::None;

        if let Some(at) = find(&self.pending, SUDO_PROMPT_MARKER.as_bytes()) {
            self.pending.drain(at..at + SUDO_PROMPT_MARKER.len());
            action = if self.answered || self.password.is_none() {
                PromptAction::Abort
            } else {
                self.answered = true;
                PromptAction::Answer
            };
        }

        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            emit_bytes(&line, &mut emit);
        }
        action
    }

    fn finish(&mut self, mut emit: impl FnMut(&str)) {
        let rest = std::mem::take(&mut self.pending);
        if !trim_line(&String::from_utf8_lossy(&rest)).is_empty() {
            emit_bytes(&rest, &mut emit);
        }
    }
}

#[allow(unsafe_code)]
fn spawn_on_pty(mut command: Command, slave: &OwnedFd) -> io::Result<Child> {
    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave.try_clone()?));

    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    command.spawn()
}

/// Kill and wait for a child we are giving up on, so it is not left behind.
fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        log::debug!("killing pid {}: {err}", child.id());
    }
    if let Err(err) = child.wait() {
        log::debug!("waiting for pid {}: {err}", child.id());
    }
}

/// Run `cmd` as root through sudo on a pseudo-terminal.
///
/// When sudo prints its prompt the password is written once. A second prompt
/// means the password was rejected and the child is killed. Without a
/// password sudo runs non-interactively and fails if it would need one.
pub fn run_privileged(
    cmd: &str,
    password: Option<&str>,
    mut on_event: impl FnMut(CommandEvent<'_>),
) -> io::Result<CommandResult> {
    let pty = nix::pty::openpty(None, None).map_err(io::Error::from)?;

    let mut command = Command::new("sudo");
    if password.is_some() {
        command.args(["-p", SUDO_PROMPT_MARKER]);
    } else {
        command.arg("-n");
    }
    command.args(["sh", "-c", cmd]);

    let mut child = spawn_on_pty(command, &pty.slave)?;
    drop(pty.slave);
    on_event(CommandEvent::Spawned(child.id()));

    let mut master = File::from(pty.master);
    let mut watcher = PromptWatcher::new(password);
    let mut logs = Vec::new();
    let mut buf = [0_u8; 4096];

    loop {
        let n = match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // Linux reports a closed pty slave as EIO.
            Err(err) if err.raw_os_error() == Some(libc::EIO) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                reap(&mut child);
                return Err(err);
            }
        };

        let action = watcher.feed(&buf[..n], |line| {
            on_event(CommandEvent::Line(line));
            logs.push(line.to_string());
        });
        match action {
            PromptAction::None => {}
            PromptAction::Answer => {
                if let Some(password) = password
                    && let Err(err) = writeln!(master, "{password}")
                {
                    reap(&mut child);
                    return Err(err);
                }
            }
            PromptAction::Abort => {
                log::warn!("sudo asked for a password again, aborting");
                child.kill()?;
            }
        }
    }
    watcher.finish(|line| {
        on_event(CommandEvent::Line(line));
        logs.push(line.to_string());
    });

    let status = child.wait()?;
    Ok(CommandResult {
        exit_code: exit_code(status),
        logs,
    })
}

// ============================================================================
// Tests
// ============================================================================
