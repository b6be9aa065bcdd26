use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use crossterm::style::Stylize;

use crate::error::{Error, Result};

mod sanitize;

pub use sanitize::sanitize_line;

const RUN_SCOPE: &str = "run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Step,
    Info,
    Command,
    Output,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub enum ExecEvent {
    AttemptStarted {
        id: String,
    },
    Log {
        id: String,
        level: LogLevel,
        line: String,
    },
    AttemptFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    RunDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Terminal sink: colored progress, a summary at the end, and an error log
/// file for every failed attempt.
#[derive(Default)]
pub struct StdoutSink {
    error_log_root: Option<PathBuf>,
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    attempts_ok: usize,
    attempts_failed: Vec<String>,
    attempt_logs: BTreeMap<String, VecDeque<String>>,
    error_logs_dir: Option<PathBuf>,
    error_log_paths: Vec<PathBuf>,
}

impl StdoutSink {
    pub fn with_error_logs(root: impl Into<PathBuf>) -> Self {
        Self {
            error_log_root: Some(root.into()),
            state: Mutex::default(),
        }
    }

    fn write_error_log(
        &self,
        state: &mut StdoutSinkState,
        id: &str,
        error: Option<&str>,
        elapsed_ms: u128,
    ) -> Result<Option<PathBuf>> {
        let Some(root) = self.error_log_root.as_ref() else {
            return Ok(None);
        };
        let dir = match state.error_logs_dir.as_ref() {
            Some(d) => d.clone(),
            None => {
                let d = root.join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
                fs::create_dir_all(&d).map_err(|e| {
                    Error::msg(format!("failed to create error logs dir {}: {e}", d.display()))
                })?;
                state.error_logs_dir = Some(d.clone());
                d
            }
        };
        let path = dir.join(format!("{}.log", sanitize_filename_component(id)));

        let mut body = format!("attempt: {id}\nstatus: failed\nelapsed_ms: {elapsed_ms}\n");
        if let Some(e) = error.filter(|e| !e.trim().is_empty()) {
            body.push_str(&format!("error: {e}\n"));
        }
        body.push_str("\nlogs:\n");
        for line in state.attempt_logs.get(id).into_iter().flatten() {
            body.push_str(line);
            body.push('\n');
        }
        fs::write(&path, body)
            .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
        state.error_log_paths.push(path.clone());
        Ok(Some(path))
    }
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::AttemptStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started_at.get_or_insert_with(Instant::now);
                    s.attempt_logs.remove(&id);
                }
                println!("{}", format!("=== Building {id} ===").blue());
            }
            ExecEvent::Log { id, level, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.started_at.get_or_insert_with(Instant::now);
                    append_log_line(&mut s.attempt_logs, &id, &line);
                }
                match level {
                    LogLevel::Step => println!("{}", line.as_str().blue()),
                    LogLevel::Info => println!("{}", line.as_str().green()),
                    LogLevel::Command => println!("{}", format!("Running: {line}").yellow()),
                    LogLevel::Output => println!("[{id}] {line}"),
                    LogLevel::Warn => println!("{}", format!("WARN: {line}").yellow()),
                    LogLevel::Error => println!("{}", format!("Error: {line}").red()),
                }
            }
            ExecEvent::AttemptFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                let mut written = None;
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.attempts_ok += 1;
                        s.attempt_logs.remove(&id);
                    } else {
                        s.attempts_failed.push(id.clone());
                        match self.write_error_log(&mut s, &id, error.as_deref(), elapsed_ms) {
                            Ok(p) => written = p,
                            Err(e) => println!("WARN: failed to write error log for {id}: {e}"),
                        }
                    }
                }
                let took = format_elapsed_hms((elapsed_ms / 1000) as u64);
                if ok {
                    println!("{}", format!("DONE: {id} ({took})").green());
                } else {
                    println!(
                        "{}",
                        format!("FAIL: {id} ({took}) {}", error.unwrap_or_default()).red()
                    );
                }
                if let Some(p) = written {
                    println!("ERROR_LOG: {id} => {}", p.display());
                }
            }
            ExecEvent::RunDone { ok, error } => {
                let Ok(mut s) = self.state.lock() else {
                    return;
                };
                let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                let mut summary = String::from("SUMMARY:\n");
                summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                summary.push_str(&format!(
                    "  attempts: ok={} failed={}\n",
                    s.attempts_ok,
                    s.attempts_failed.len()
                ));
                summary.push_str(&format!(
                    "  build time: {}\n",
                    format_elapsed_hms(wall.as_secs())
                ));
                if !s.attempts_failed.is_empty() {
                    summary.push_str(&format!(
                        "  failed_attempts: {}\n",
                        s.attempts_failed.join(", ")
                    ));
                }
                for p in &s.error_log_paths {
                    summary.push_str(&format!("  error_log: {}\n", p.display()));
                }
                if let Some(e) = error {
                    summary.push_str(&format!("  error: {e}\n"));
                }
                *s = StdoutSinkState::default();
                if ok {
                    print!("{}", summary.as_str().green());
                } else {
                    print!("{}", summary.as_str().red());
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    current_attempt: Option<String>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_attempt: None,
        }
    }

    pub fn set_attempt(&mut self, id: impl Into<String>) {
        self.current_attempt = Some(id.into());
    }

    pub fn clear_attempt(&mut self) {
        self.current_attempt = None;
    }

    fn scope(&self) -> String {
        self.current_attempt
            .clone()
            .unwrap_or_else(|| RUN_SCOPE.into())
    }

    pub fn emit_log(&self, level: LogLevel, msg: &str) {
        self.sink.emit(ExecEvent::Log {
            id: self.scope(),
            level,
            line: msg.to_string(),
        });
    }

    pub fn log(&self, msg: &str) {
        self.emit_log(LogLevel::Info, msg);
    }

    pub fn step(&self, msg: &str) {
        self.emit_log(LogLevel::Step, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.emit_log(LogLevel::Warn, msg);
    }

    pub fn error(&self, msg: &str) {
        self.emit_log(LogLevel::Error, msg);
    }

    /// Run a subprocess, streaming its sanitized stdout/stderr as log lines.
    /// A non-zero exit status is an error.
    pub fn run_cmd(&self, mut cmd: Command) -> Result<()> {
        let shown = describe_command(&cmd);
        self.emit_log(LogLevel::Command, &shown);
        if self.dry_run {
            self.log(&format!("DRY-RUN: skipped {shown}"));
            return Ok(());
        }
        tracing::debug!(command = %shown, "spawning");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn '{shown}': {e}")))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_line(&line);
            if !line.trim().is_empty() {
                self.emit_log(LogLevel::Output, &line);
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed for '{shown}': {e}")))?;
        tracing::debug!(command = %shown, %status, "finished");
        if !status.success() {
            return Err(Error::msg(format!("command '{shown}' failed: {status}")));
        }
        Ok(())
    }
}

pub fn describe_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match r.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                // Progress bars redraw with '\r'; keep only the final frame.
                let text = String::from_utf8_lossy(&buf);
                let last = text
                    .trim_end_matches(['\n', '\r'])
                    .rsplit('\r')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if tx.send(last).is_err() {
                    break;
                }
            }
        }
    }
}

fn append_log_line(logs: &mut BTreeMap<String, VecDeque<String>>, id: &str, line: &str) {
    const MAX_LINES: usize = 4000;
    let q = logs.entry(id.to_string()).or_default();
    while q.len() >= MAX_LINES {
        q.pop_front();
    }
    q.push_back(sanitize_line(line));
}

fn sanitize_filename_component(raw: &str) -> String {
    let out: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() { "attempt".into() } else { out }
}

pub fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}h {minutes}m {seconds}s")
}
