//! Script execution for task resources

use anyhow::{Context, Result, bail};
use declarative::Context as RunContext;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Interpreter used when a task names none
pub const DEFAULT_INTERPRETER: &str = "/bin/sh";

/// A script and how to run it
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
    /// Program and arguments; the script body is fed on stdin
    pub interpreter: &'a str,
    pub body: &'a str,
    pub dir: Option<&'a Path>,
    pub env: &'a BTreeMap<String, String>,
}

/// What a finished script produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Exit code, `-1` when killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a script to completion, killing it if `ctx` is cancelled
pub fn run_script(ctx: &RunContext, script: &Script<'_>) -> Result<Output> {
    let mut words = script.interpreter.split_whitespace();
    let Some(program) = words.next() else {
        bail!("Empty interpreter");
    };

    let mut command = Command::new(program);
    command
        .args(words)
        .envs(script.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = script.dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to execute: {}", script.interpreter))?;
    log::trace!("spawned {} (pid {})", script.interpreter, child.id());

    if let Some(mut stdin) = child.stdin.take() {
        // A script that exits without reading its input closes the pipe early
        if let Err(err) = stdin.write_all(script.body.as_bytes()) {
            log::debug!("{}: stdin closed early: {err}", script.interpreter);
        }
    }

    let stdout = child.stdout.take().map(collect);
    let stderr = child.stderr.take().map(collect);

    let status = loop {
        if let Some(status) = child.try_wait().context("Failed to wait for script")? {
            break status;
        }
        if ctx.sleep(dag::POLL_INTERVAL).is_err() {
            let _ = child.kill();
            let _ = child.wait();
            bail!("cancelled");
        }
    };

    Ok(Output {
        status: exit_code(status),
        stdout: stdout.map(join).unwrap_or_default(),
        stderr: stderr.map(join).unwrap_or_default(),
    })
}

fn collect(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn script<'a>(body: &'a str, env: &'a BTreeMap<String, String>) -> Script<'a> {
        Script {
            interpreter: DEFAULT_INTERPRETER,
            body,
            dir: None,
            env,
        }
    }

    #[test]
    fn test_captures_output_and_status() {
        let env = BTreeMap::from([("GREETING".to_string(), "hi".to_string())]);
        let out = run_script(&RunContext::new(), &script("echo $GREETING; echo oops >&2; exit 3", &env))
            .unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.status, 3);
        assert!(!out.success());
    }

    #[test]
    fn test_runs_in_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = BTreeMap::new();
        let mut s = script("pwd", &env);
        s.dir = Some(dir.path());
        let out = run_script(&RunContext::new(), &s).unwrap();
        let printed = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(printed, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_cancel_kills_script() {
        let ctx = RunContext::new();
        let canceller = ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let env = BTreeMap::new();
        let started = Instant::now();
        let err = run_script(&ctx, &script("sleep 10", &env)).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_interpreter() {
        let env = BTreeMap::new();
        let mut s = script("true", &env);
        s.interpreter = "/nonexistent/interpreter";
        assert!(run_script(&RunContext::new(), &s).is_err());
    }
}
