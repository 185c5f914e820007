use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Child;
use std::process::ChildStdin;
use std::process::Command;
use std::process::Stdio;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use flowsync_core::RunnerSettings;
use serde_json::json;

use crate::contracts::OutboundMessage;
use crate::contracts::RunEnd;
use crate::contracts::RunStatus;
use crate::contracts::Subscription;
use crate::contracts::Transport;
use crate::contracts::TransportError;
use crate::contracts::TransportEvent;
use crate::extractor::truncate_line;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Fully resolved command line for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub cwd: Option<PathBuf>,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

type Subscribers = Arc<Mutex<Vec<Sender<TransportEvent>>>>;

/// Runs a flow as a child process and streams its output line by line.
pub struct SubprocessTransport {
    program: String,
    base_args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    subscribers: Subscribers,
    child: Option<Arc<Mutex<Child>>>,
    stdin: Option<ChildStdin>,
    waiter: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            cwd: None,
            env: vec![
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ],
            subscribers: Arc::default(),
            child: None,
            stdin: None,
            waiter: None,
        }
    }

    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self::new(settings.program.clone(), settings.base_args.clone())
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn request(&self, path: &Path, args: &[String]) -> ExecRequest {
        let mut full_args = self.base_args.clone();
        full_args.push(path.display().to_string());
        full_args.extend(args.iter().cloned());
        ExecRequest {
            cwd: self.cwd.clone(),
            program: self.program.clone(),
            args: full_args,
            env: self.env.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.waiter
            .as_ref()
            .is_some_and(|waiter| !waiter.is_finished())
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|child| lock(child).id())
    }
}

impl Transport for SubprocessTransport {
    fn run(&mut self, path: &Path, args: &[String]) -> Result<(), TransportError> {
        if self.is_running() {
            return Err(TransportError::AlreadyRunning);
        }
        let request = self.request(path, args);
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .envs(request.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            program: request.program.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(program = %request.program, args = ?request.args, pid, "spawned run");
        broadcast(
            &self.subscribers,
            TransportEvent::RunStatus(json!({"state": "started", "pid": pid})),
        );

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, TransportEvent::Stdout, &self.subscribers));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, TransportEvent::Stderr, &self.subscribers));
        }
        self.stdin = child.stdin.take();

        let child = Arc::new(Mutex::new(child));
        self.child = Some(Arc::clone(&child));
        let subscribers = Arc::clone(&self.subscribers);
        self.waiter = Some(thread::spawn(move || {
            let return_code = wait_for_exit(&child);
            for reader in readers {
                let _ = reader.join();
            }
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(return_code, elapsed_ms, "run exited");
            broadcast(
                &subscribers,
                TransportEvent::RunEnd(RunEnd {
                    status: if return_code == 0 {
                        RunStatus::Ok
                    } else {
                        RunStatus::Error
                    },
                    return_code,
                    elapsed_ms,
                }),
            );
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.stdin = None;
        let Some(child) = self.child.as_ref() else {
            return Err(TransportError::NotRunning);
        };
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        match lock(child).kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn subscribe(&mut self) -> Subscription {
        let (tx, subscription) = Subscription::channel();
        lock(&self.subscribers).push(tx);
        subscription
    }

    fn write_stdin(&mut self, text: &str) -> Result<(), TransportError> {
        // Failures go back to the caller only; subscribers just see acks.
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(TransportError::NotRunning);
        };
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())?;
        broadcast(&self.subscribers, TransportEvent::StdinAck { request_id: None });
        Ok(())
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> Result<(), TransportError> {
        let pid = self
            .pid()
            .filter(|_| self.is_running())
            .ok_or(TransportError::NotRunning)?;
        let status = Command::new("kill")
            .arg("-INT")
            .arg(pid.to_string())
            .status()?;
        if !status.success() {
            tracing::warn!(pid, ?status, "interrupt signal was not delivered");
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("interrupt"))
    }

    /// Structured messages travel as one JSON line on stdin.
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let line = serde_json::to_string(message.payload())?;
        self.write_stdin(&line)
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends to every live subscriber, dropping the ones that hung up.
fn broadcast(subscribers: &Subscribers, event: TransportEvent) {
    lock(subscribers).retain(|tx| tx.send(event.clone()).is_ok());
}

fn spawn_reader<R>(
    stream: R,
    wrap: fn(String) -> TransportEvent,
    subscribers: &Subscribers,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let subscribers = Arc::clone(subscribers);
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = truncate_line(String::from_utf8_lossy(&buf).into_owned());
                    broadcast(&subscribers, wrap(line));
                }
                Err(err) => {
                    tracing::debug!(error = %err, "output stream closed");
                    break;
                }
            }
        }
    })
}

/// Polls instead of blocking in `wait` so `stop` can still take the lock.
fn wait_for_exit(child: &Mutex<Child>) -> i32 {
    loop {
        match lock(child).try_wait() {
            Ok(Some(status)) => return status.code().unwrap_or(-1),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to poll child process");
                return -1;
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}
