//! Server process supervision.
//!
//! Spawns the installed executable, reads its merged output line by line on
//! a background task, and drives a small forward-only state machine:
//! not started → starting → started, back to not started on stop. The
//! caller blocks in `start` until the readiness log line is seen, the start
//! timeout elapses, or the process dies first.

mod log_parser;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{InstallationConfig, JavaHomeOption};
use crate::error::{Error, Result};
use crate::install::{purge_scratch_directory, remove_dir_if_present, Installation};
use log_parser::{LineClassifier, LogEvent};

/// Lifecycle of the supervised process. Transitions only move forward,
/// and `stop` returns the machine to `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    NotStarted,
    Starting,
    Started,
}

/// Everything discovered about the running process so far, published to
/// waiters through a watch channel.
#[derive(Debug, Clone, Default)]
struct StartupStatus {
    state: ServerState,
    pid: Option<u32>,
    http_port: Option<u16>,
    transport_port: Option<u16>,
    /// Both output pipes reached EOF, i.e. the process is gone
    output_closed: bool,
}

struct RunningProcess {
    child: Child,
    reader: JoinHandle<()>,
}

/// Supervises one server process. A handle is single-use per start/stop
/// cycle; `stop` is always safe, even if `start` never completed.
pub struct ElasticServer {
    installation: Installation,
    es_java_opts: Option<String>,
    java_home: JavaHomeOption,
    start_timeout: Duration,
    clean_on_stop: bool,
    status_tx: watch::Sender<StartupStatus>,
    status_rx: watch::Receiver<StartupStatus>,
    process: Option<RunningProcess>,
}

impl ElasticServer {
    pub fn new(installation: Installation, config: &InstallationConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(StartupStatus::default());
        Self {
            installation,
            es_java_opts: config.es_java_opts.clone(),
            java_home: config.java_home.clone(),
            start_timeout: config.start_timeout,
            clean_on_stop: config.clean_on_stop,
            status_tx,
            status_rx,
            process: None,
        }
    }

    /// Spawn the server and block until it reports readiness.
    ///
    /// On timeout or premature process death the child is shut down and a
    /// startup error is returned; the two causes are distinguished so the
    /// caller knows whether to look for a hang or a crash in the logs.
    pub async fn start(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Err(Error::Config(
                "server is already running; stop it before starting again".into(),
            ));
        }
        purge_scratch_directory().await;
        self.status_tx.send_replace(StartupStatus {
            state: ServerState::Starting,
            ..StartupStatus::default()
        });

        let executable = self.installation.executable();
        info!("starting {}", executable.display());
        let mut command = Command::new(&executable);
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(opts) = &self.es_java_opts {
            command.env("ES_JAVA_OPTS", opts);
        }
        if let Some(java_home) = self.java_home.resolve() {
            command.env("JAVA_HOME", java_home);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status_tx.send_replace(StartupStatus::default());
                return Err(e.into());
            }
        };
        let reader = spawn_output_reader(
            child.stdout.take(),
            child.stderr.take(),
            self.status_tx.clone(),
        );
        self.process = Some(RunningProcess { child, reader });

        match self.wait_for_started().await {
            Ok(()) => {
                info!("server started");
                Ok(())
            }
            Err(e) => {
                // Do not leak a half-started process
                let _ = self.stop().await;
                Err(e)
            }
        }
    }

    async fn wait_for_started(&mut self) -> Result<()> {
        info!("waiting for the server to start ...");
        let deadline = tokio::time::Instant::now() + self.start_timeout;
        let mut status_rx = self.status_rx.clone();
        loop {
            {
                let status = status_rx.borrow_and_update();
                if status.state == ServerState::Started {
                    return Ok(());
                }
                if status.output_closed {
                    return Err(Error::StartupFailed);
                }
            }
            match tokio::time::timeout_at(deadline, status_rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(Error::StartupFailed),
                Err(_) => {
                    return Err(Error::StartupTimeout {
                        timeout: self.start_timeout,
                    })
                }
            }
        }
    }

    /// Shut the process down and return the lifecycle to `NotStarted`.
    ///
    /// POSIX gets a graceful interrupt signal to the discovered PID so the
    /// node can close its files; Windows has no equivalent, so the process
    /// is killed outright. Also wipes the installation directory when
    /// clean-on-stop was requested.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut process) = self.process.take() {
            info!("stopping the server ...");
            terminate(&mut process.child, self.status_rx.borrow().pid);
            let exit = process.child.wait().await?;
            info!("server exited with {exit}");
            let _ = process.reader.await;
        }
        self.status_tx.send_replace(StartupStatus::default());
        if self.clean_on_stop {
            info!(
                "removing installation directory {}",
                self.installation.root().display()
            );
            remove_dir_if_present(self.installation.root()).await?;
        }
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.status_rx.borrow().state
    }

    pub fn is_started(&self) -> bool {
        self.state() == ServerState::Started
    }

    /// HTTP port parsed from the logs. Meaningful only once the server is
    /// started; earlier reads see whatever has been discovered so far.
    pub fn http_port(&self) -> Option<u16> {
        self.status_rx.borrow().http_port
    }

    /// Transport port parsed from the logs; same caveat as [`Self::http_port`].
    pub fn transport_port(&self) -> Option<u16> {
        self.status_rx.borrow().transport_port
    }

    /// Server process id parsed from the logs.
    pub fn pid(&self) -> Option<u32> {
        self.status_rx.borrow().pid
    }
}

impl Drop for ElasticServer {
    fn drop(&mut self) {
        if let Some(process) = &mut self.process {
            warn!("server was still running when its handle was dropped; killing the process");
            let _ = process.child.start_kill();
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            Ok(()) => return,
            Err(e) => warn!("failed to signal pid {pid}: {e}; killing the child process"),
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

/// Read both output pipes to EOF, logging every line and feeding the
/// classifier until the started state is reached. Classification failures
/// on later lines are irrelevant; the lines are still logged.
fn spawn_output_reader(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    status_tx: watch::Sender<StartupStatus>,
) -> JoinHandle<()> {
    let classifier = Arc::new(LineClassifier::new());
    tokio::spawn(async move {
        let stdout_task =
            stdout.map(|pipe| tokio::spawn(pump_lines(pipe, classifier.clone(), status_tx.clone())));
        let stderr_task =
            stderr.map(|pipe| tokio::spawn(pump_lines(pipe, classifier.clone(), status_tx.clone())));
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        status_tx.send_modify(|status| status.output_closed = true);
    })
}

async fn pump_lines<R>(
    pipe: R,
    classifier: Arc<LineClassifier>,
    status_tx: watch::Sender<StartupStatus>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "esbox::es", "{line}");
        if status_tx.borrow().state == ServerState::Started {
            continue;
        }
        if let Some(event) = classifier.classify(&line) {
            apply_event(&status_tx, event);
        }
    }
}

fn apply_event(status_tx: &watch::Sender<StartupStatus>, event: LogEvent) {
    match event {
        LogEvent::Started => {
            status_tx.send_modify(|status| status.state = ServerState::Started);
        }
        LogEvent::Pid(pid) => {
            info!("detected server PID: {pid}");
            status_tx.send_modify(|status| status.pid = Some(pid));
        }
        LogEvent::HttpPort(port) => {
            info!("detected server HTTP port: {port}");
            status_tx.send_modify(|status| status.http_port = Some(port));
        }
        LogEvent::TransportPort(port) => {
            info!("detected server transport port: {port}");
            status_tx.send_modify(|status| status.transport_port = Some(port));
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::config::{InstallationConfig, InstallationSource};
    use crate::version::VersionBehavior;

    fn fake_installation(dir: &Path, script_body: &str) -> Installation {
        let root = dir.join("elasticsearch-6.8.0");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        let executable = root.join("bin/elasticsearch");
        std::fs::write(&executable, script_body).unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();
        let behavior = VersionBehavior::for_version(&crate::Version::new(6, 8, 0)).unwrap();
        Installation::new(root, behavior)
    }

    fn test_config(start_timeout: Duration) -> InstallationConfig {
        let mut config =
            InstallationConfig::from_source(InstallationSource::Version("6.8.0".into())).unwrap();
        config.start_timeout = start_timeout;
        config
    }

    const READY_SCRIPT: &str = r#"#!/bin/sh
trap 'exit 0' INT TERM
echo "[node-0] initializing ..."
echo "version[6.8.0], pid[$$], build[default/tar/abc]"
echo "[o.e.t.TransportService] [node-0] publish_address {127.0.0.1:9300}, bound_addresses {[::1]:9300}"
echo "[o.e.h.HttpServer] [node-0] publish_address {127.0.0.1:9200}, bound_addresses {[::1]:9200}"
echo "[node-0] started"
while :; do sleep 0.1; done
"#;

    #[tokio::test]
    async fn start_detects_readiness_pid_and_ports() {
        let dir = TempDir::new().unwrap();
        let installation = fake_installation(dir.path(), READY_SCRIPT);
        let config = test_config(Duration::from_secs(10));
        let mut server = ElasticServer::new(installation, &config);

        server.start().await.unwrap();
        assert!(server.is_started());
        assert_eq!(server.http_port(), Some(9200));
        assert_eq!(server.transport_port(), Some(9300));
        assert!(server.pid().is_some());

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::NotStarted);
        assert!(dir.path().join("elasticsearch-6.8.0").exists());
    }

    #[tokio::test]
    async fn silent_process_times_out_promptly() {
        let dir = TempDir::new().unwrap();
        let installation = fake_installation(
            dir.path(),
            "#!/bin/sh\ntrap 'exit 0' INT TERM\necho booting\nwhile :; do sleep 0.1; done\n",
        );
        let config = test_config(Duration::from_millis(500));
        let mut server = ElasticServer::new(installation, &config);

        let begun = std::time::Instant::now();
        let result = server.start().await;
        assert!(matches!(result, Err(Error::StartupTimeout { .. })));
        assert!(begun.elapsed() < Duration::from_secs(5));
        // start already shut the child down
        assert_eq!(server.state(), ServerState::NotStarted);
    }

    #[tokio::test]
    async fn early_exit_is_distinguished_from_timeout() {
        let dir = TempDir::new().unwrap();
        let installation = fake_installation(
            dir.path(),
            "#!/bin/sh\necho 'fatal error while booting'\nexit 1\n",
        );
        let config = test_config(Duration::from_secs(10));
        let mut server = ElasticServer::new(installation, &config);

        let result = server.start().await;
        assert!(matches!(result, Err(Error::StartupFailed)));
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let dir = TempDir::new().unwrap();
        let installation = fake_installation(dir.path(), READY_SCRIPT);
        let config = test_config(Duration::from_secs(1));
        let mut server = ElasticServer::new(installation, &config);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn clean_on_stop_removes_the_installation() {
        let dir = TempDir::new().unwrap();
        let installation = fake_installation(dir.path(), READY_SCRIPT);
        let mut config = test_config(Duration::from_secs(10));
        config.clean_on_stop = true;
        let mut server = ElasticServer::new(installation, &config);

        server.start().await.unwrap();
        server.stop().await.unwrap();
        assert!(!dir.path().join("elasticsearch-6.8.0").exists());
    }
}
