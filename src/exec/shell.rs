use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tempfile::NamedTempFile;

use super::process::{ScopedProcess, Waited};
use super::{
    EXIT_INTERRUPTED, EXIT_TIMEOUT, Engine, ExecStatus, ExecutionResult, interrupt,
};
use crate::config::ExecConfig;
use crate::extract::{Command, Heredoc};

/// Runs commands through `bash --noprofile --norc -c` with a cleared
/// environment, in a fresh process group, with output captured to
/// anonymous temp files.
pub struct ShellEngine {
    shell: String,
    path: String,
    pass_env: Vec<String>,
    max_output_bytes: usize,
    stop: &'static AtomicBool,
    scratch_dir: Option<PathBuf>,
}

impl ShellEngine {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            path: config.path.clone(),
            pass_env: config.pass_env.clone(),
            max_output_bytes: config.max_output_bytes,
            stop: interrupt::flag(),
            scratch_dir: None,
        }
    }

    /// Poll `stop` instead of the process-wide signal flag.
    pub fn with_interrupt(mut self, stop: &'static AtomicBool) -> Self {
        self.stop = stop;
        self
    }

    /// Write heredoc scripts under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn command(&self, line: &str) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.shell);
        cmd.args(["--noprofile", "--norc", "-c", line])
            .env_clear()
            .env("PATH", &self.path)
            .stdin(Stdio::null());
        for name in &self.pass_env {
            if let Some(value) = std::env::var_os(name) {
                cmd.env(name, value);
            }
        }
        cmd
    }

    fn write_script(&self, heredoc: &Heredoc) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stig-gate-").suffix(".heredoc");
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(heredoc.body.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(file)
    }

    fn run_line(&self, line: &str, rendered: String, timeout: Duration) -> ExecutionResult {
        let (stdout_file, stderr_file) = match (tempfile::tempfile(), tempfile::tempfile()) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => {
                let reason = format!("cannot create capture file: {e}");
                return ExecutionResult::spawn_error(rendered, reason);
            }
        };

        let mut cmd = self.command(line);
        match (stdout_file.try_clone(), stderr_file.try_clone()) {
            (Ok(out), Ok(err)) => {
                cmd.stdout(out).stderr(err);
            }
            (Err(e), _) | (_, Err(e)) => {
                let reason = format!("cannot create capture file: {e}");
                return ExecutionResult::spawn_error(rendered, reason);
            }
        }

        let mut process = match ScopedProcess::spawn(&mut cmd) {
            Ok(p) => p,
            Err(e) => {
                let reason = format!("failed to start {}: {e}", self.shell);
                return ExecutionResult::spawn_error(rendered, reason);
            }
        };
        log::debug!("spawned: {line}");

        let waited = process.wait(timeout, self.stop);
        // Background descendants may still hold the capture files.
        process.kill_group();
        drop(process);

        let stdout = self.read_capture(stdout_file, "stdout");
        let mut stderr = self.read_capture(stderr_file, "stderr");

        let (exit_code, status) = match waited {
            Ok(Waited::Exited(status)) => (
                status
                    .code()
                    .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)),
                ExecStatus::Completed,
            ),
            Ok(Waited::TimedOut) => {
                push_line(&mut stderr, &format!("timed out after {}s", timeout.as_secs_f64()));
                (EXIT_TIMEOUT, ExecStatus::TimedOut)
            }
            Ok(Waited::Interrupted) => {
                push_line(&mut stderr, "interrupted");
                (EXIT_INTERRUPTED, ExecStatus::Killed)
            }
            Err(e) => {
                let reason = format!("waiting on command failed: {e}");
                return ExecutionResult::spawn_error(rendered, reason);
            }
        };

        ExecutionResult {
            command: rendered,
            exit_code,
            stdout,
            stderr,
            status,
        }
    }

    /// Read at most `max_output_bytes` of a capture file, marking truncation.
    fn read_capture(&self, mut file: File, stream: &str) -> String {
        let limit = self.max_output_bytes;
        let mut buf = Vec::new();
        let read = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| (&mut file).take(limit as u64 + 1).read_to_end(&mut buf));
        if let Err(e) = read {
            log::warn!("reading captured {stream} failed: {e}");
        }
        let truncated = buf.len() > limit;
        buf.truncate(limit);
        let mut out = String::from_utf8_lossy(&buf).into_owned();
        if truncated {
            let _ = write!(out, "\n[truncated: {stream} exceeded {limit} bytes]");
        }
        out
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

impl Engine for ShellEngine {
    fn run(&self, command: &Command, timeout: Duration) -> ExecutionResult {
        let rendered = command.to_string();
        match command {
            Command::Plain(line) => self.run_line(line, rendered, timeout),
            Command::Heredoc(heredoc) => {
                let script = match self.write_script(heredoc) {
                    Ok(f) => f,
                    Err(e) => {
                        let reason = format!("cannot write heredoc body: {e}");
                        return ExecutionResult::spawn_error(rendered, reason);
                    }
                };
                let line = heredoc.invocation(script.path());
                self.run_line(&line, rendered, timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::{EXIT_SPAWN_ERROR, EXIT_TIMEOUT};
    use nix::sys::signal;
    use nix::unistd::Pid;
    use std::time::Instant;

    fn engine() -> ShellEngine {
        let quiet: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(false)));
        ShellEngine::new(&Config::default_config().exec).with_interrupt(quiet)
    }

    fn run(cmd: &str) -> ExecutionResult {
        engine().run(&Command::Plain(cmd.into()), Duration::from_secs(10))
    }

    fn heredoc(head: &str, trailer: &str, body: &str) -> Command {
        Command::Heredoc(Heredoc {
            head: head.into(),
            marker: "<<EOF".into(),
            tag: "EOF".into(),
            trailer: trailer.into(),
            body: body.into(),
        })
    }

    fn running(pid: i32) -> bool {
        if signal::kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        // An unreaped zombie is not running.
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            && let Some((_, rest)) = stat.rsplit_once(") ")
        {
            return !rest.starts_with('Z');
        }
        true
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let r = run("echo hello");
        assert_eq!(r.exit_code, 0);
        assert_eq!(r.status, ExecStatus::Completed);
        assert_eq!(r.stdout, "hello\n");
        assert_eq!(r.command, "echo hello");
    }

    #[test]
    fn captures_stderr_and_nonzero_exit() {
        let r = run("echo oops >&2; exit 3");
        assert_eq!(r.exit_code, 3);
        assert_eq!(r.stderr, "oops\n");
        assert_eq!(r.status, ExecStatus::Completed);
    }

    #[test]
    fn environment_is_cleared() {
        let r = run("env");
        assert!(r.stdout.lines().any(|l| l == "PATH=/usr/bin:/bin:/usr/sbin:/sbin:/usr/libexec"));
        assert!(!r.stdout.lines().any(|l| l.starts_with("CARGO")));
        assert!(!r.stdout.lines().any(|l| l.starts_with("BASH_ENV=")));
    }

    #[test]
    fn timeout_kills_process_group() {
        let start = Instant::now();
        let r = engine().run(
            &Command::Plain("sleep 30 & echo $!; sleep 30".into()),
            Duration::from_millis(300),
        );
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(r.exit_code, EXIT_TIMEOUT);
        assert_eq!(r.status, ExecStatus::TimedOut);
        assert!(r.stderr.contains("timed out"));

        let bg: i32 = r.stdout.trim().parse().expect("background pid");
        let gone = (0..50).any(|_| {
            if !running(bg) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(40));
            false
        });
        assert!(gone, "background process {bg} survived the timeout");
    }

    #[test]
    fn background_child_killed_after_normal_exit() {
        let r = run("sleep 30 & echo $!");
        assert_eq!(r.exit_code, 0);
        let bg: i32 = r.stdout.trim().parse().expect("background pid");
        let gone = (0..50).any(|_| {
            if !running(bg) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(40));
            false
        });
        assert!(gone, "background process {bg} outlived the command");
    }

    #[test]
    fn interrupt_kills_and_reports() {
        let raised: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(true)));
        let e = ShellEngine::new(&Config::default_config().exec).with_interrupt(raised);
        let r = e.run(&Command::Plain("sleep 30".into()), Duration::from_secs(10));
        assert_eq!(r.exit_code, EXIT_INTERRUPTED);
        assert_eq!(r.status, ExecStatus::Killed);
    }

    #[test]
    fn missing_shell_is_spawn_error() {
        let mut config = Config::default_config().exec;
        config.shell = "/nonexistent/bash".into();
        let r = ShellEngine::new(&config)
            .run(&Command::Plain("true".into()), Duration::from_secs(1));
        assert_eq!(r.exit_code, EXIT_SPAWN_ERROR);
        assert_eq!(r.status, ExecStatus::SpawnError);
        assert!(r.stderr.contains("/nonexistent/bash"));
    }

    #[test]
    fn output_is_bounded() {
        let mut config = Config::default_config().exec;
        config.max_output_bytes = 10;
        let r = ShellEngine::new(&config).run(
            &Command::Plain("printf '%0100d' 0".into()),
            Duration::from_secs(5),
        );
        assert!(r.stdout.starts_with("0000000000\n[truncated"));
    }

    #[test]
    fn heredoc_runs_with_body_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine().with_scratch_dir(dir.path());
        let r = e.run(&heredoc("cat", "", "one\ntwo"), Duration::from_secs(5));
        assert_eq!(r.stdout, "one\ntwo\n");
        assert_eq!(r.command, "cat <<EOF\none\ntwo\nEOF");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn heredoc_trailer_applies() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine().with_scratch_dir(dir.path());
        let r = e.run(&heredoc("cat", "| grep -c o", "one\ntwo\nsix"), Duration::from_secs(5));
        assert_eq!(r.stdout.trim(), "2");
    }

    #[test]
    fn heredoc_script_removed_on_failure_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine().with_scratch_dir(dir.path());

        let r = e.run(&heredoc("bash -c 'exit 5'", "", "x"), Duration::from_secs(5));
        assert_eq!(r.exit_code, 5);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let r = e.run(&heredoc("sleep 30;", "", "x"), Duration::from_millis(200));
        assert_eq!(r.exit_code, EXIT_TIMEOUT);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
