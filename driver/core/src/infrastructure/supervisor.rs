// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Helper Supervision
//!
//! Owns the external `weed mount` process of one active mount: spawns it,
//! forwards its output into the log, waits for the mount to show up in the
//! mount table and drives a bounded SIGTERM-then-SIGKILL shutdown.
//!
//! Each process gets a reaper task that waits for the exit, unmounts the
//! target (a dead helper cannot be trusted to have done so) and publishes the
//! exit on a watch channel.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements process lifecycle management for mount helpers

use crate::domain::mount_table::{best_effort, is_corrupted_mount, MountTable};
use crate::domain::node_config::MountTimeouts;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("mount helper for {target:?} exited before the mount appeared")]
    ExitedEarly { target: PathBuf },

    #[error("timed out after {timeout:?} waiting for mount at {target:?}")]
    MountTimeout { target: PathBuf, timeout: Duration },

    #[error("failed to check mount at {target:?}: {source}")]
    Probe {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("mount helper (pid {pid}) still running after SIGKILL")]
    StopTimeout { pid: u32 },
}

/// Lifecycle of a supervised helper process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotRunning,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long `start` waits for the mount to appear
    pub mount_timeout: Duration,
    pub poll_interval: Duration,
    /// Wait after SIGTERM before escalating
    pub graceful_stop: Duration,
    /// Wait after SIGKILL before giving up
    pub forceful_stop: Duration,
    /// Pause between process exit and the cleanup unmount
    pub settle_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_timeouts(&MountTimeouts::default())
    }
}

impl SupervisorConfig {
    pub fn from_timeouts(timeouts: &MountTimeouts) -> Self {
        Self {
            mount_timeout: timeouts.mount_wait(),
            poll_interval: timeouts.poll_interval(),
            graceful_stop: timeouts.graceful_stop(),
            forceful_stop: timeouts.forceful_stop(),
            settle_delay: Duration::from_millis(100),
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct MountSupervisor {
    table: Arc<dyn MountTable>,
    config: SupervisorConfig,
}

impl MountSupervisor {
    pub fn new(table: Arc<dyn MountTable>, config: SupervisorConfig) -> Self {
        Self { table, config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch `command args...` and wait until `mount_path` is a mount point.
    ///
    /// On any failure after the spawn the process is stopped before the
    /// error is returned, so no helper is left behind.
    pub async fn start(
        &self,
        volume_id: &str,
        command: &str,
        args: &[String],
        mount_path: &Path,
    ) -> Result<Arc<MountProcess>, SupervisorError> {
        info!(volume_id, "Starting mount helper: {} {}", command, args.join(" "));

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| SupervisorError::ExitedEarly {
            target: mount_path.to_path_buf(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, volume_id.to_string(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, volume_id.to_string(), "stderr"));
        }

        let (done_tx, done_rx) = watch::channel(false);
        let process = Arc::new(MountProcess {
            pid,
            volume_id: volume_id.to_string(),
            target: mount_path.to_path_buf(),
            state: Arc::new(Mutex::new(ProcessState::Starting)),
            reaped: Arc::new(AtomicBool::new(false)),
            done: done_rx,
            forceful_stop: self.config.forceful_stop,
        });

        tokio::spawn(reap(
            child,
            Arc::clone(&process),
            Arc::clone(&self.table),
            done_tx,
            self.config.settle_delay,
        ));

        match self.wait_for_mount(&process).await {
            Ok(()) => {
                process.transition(ProcessState::Starting, ProcessState::Running);
                info!(volume_id, pid, "Mount helper ready at {:?}", mount_path);
                Ok(process)
            }
            Err(e) => {
                error!(volume_id, pid, "Mount at {:?} failed: {}", mount_path, e);
                if let Err(stop_err) = process.stop(self.config.graceful_stop).await {
                    error!(volume_id, pid, "Failed to stop mount helper: {}", stop_err);
                }
                Err(e)
            }
        }
    }

    async fn wait_for_mount(&self, process: &MountProcess) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + self.config.mount_timeout;
        let mut done = process.done.clone();

        loop {
            if process.has_exited() {
                return Err(SupervisorError::ExitedEarly {
                    target: process.target.clone(),
                });
            }

            match self.table.is_mount_point(&process.target) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // FUSE may not answer until the helper finished its handshake
                Err(e) if is_corrupted_mount(&e) => {}
                Err(source) => {
                    return Err(SupervisorError::Probe {
                        target: process.target.clone(),
                        source,
                    })
                }
            }

            if Instant::now() >= deadline {
                return Err(SupervisorError::MountTimeout {
                    target: process.target.clone(),
                    timeout: self.config.mount_timeout,
                });
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = done.changed() => {}
            }
        }
    }
}

// ============================================================================
// Process Handle
// ============================================================================

/// Handle to one running mount helper.
pub struct MountProcess {
    pid: u32,
    volume_id: String,
    target: PathBuf,
    state: Arc<Mutex<ProcessState>>,
    /// Set as soon as the exit status is collected; the PID may be reused after that
    reaped: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
    forceful_stop: Duration,
}

impl std::fmt::Debug for MountProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountProcess")
            .field("pid", &self.pid)
            .field("volume_id", &self.volume_id)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

impl MountProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    /// True once the process has exited and its mount has been cleaned up.
    pub fn has_exited(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait up to `limit` for the exit. Returns whether it happened.
    pub async fn wait_exit(&self, limit: Duration) -> bool {
        let mut done = self.done.clone();
        let exited = matches!(timeout(limit, done.wait_for(|exited| *exited)).await, Ok(Ok(_)));
        exited
    }

    /// SIGTERM, wait `grace`, SIGKILL, wait the forceful bound.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the process has exited by either path
    /// * `Err(SupervisorError::StopTimeout)` if it survived SIGKILL
    pub async fn stop(&self, grace: Duration) -> Result<(), SupervisorError> {
        if self.has_exited() {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            if *state != ProcessState::Stopped {
                *state = ProcessState::Stopping;
            }
        }

        debug!(volume_id = %self.volume_id, pid = self.pid, "Sending SIGTERM to mount helper");
        self.signal(libc::SIGTERM);
        if self.wait_exit(grace).await {
            return Ok(());
        }

        warn!(
            volume_id = %self.volume_id,
            pid = self.pid,
            "Mount helper ignored SIGTERM for {:?}, sending SIGKILL",
            grace
        );
        self.signal(libc::SIGKILL);
        if self.wait_exit(self.forceful_stop).await {
            return Ok(());
        }

        error!(volume_id = %self.volume_id, pid = self.pid, "Mount helper survived SIGKILL");
        Err(SupervisorError::StopTimeout { pid: self.pid })
    }

    fn signal(&self, signal: libc::c_int) {
        if self.reaped.load(Ordering::SeqCst) {
            return;
        }
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if rc != 0 {
            warn!(
                pid = self.pid,
                "Sending signal {} failed: {}",
                signal,
                io::Error::last_os_error()
            );
        }
    }

    fn transition(&self, from: ProcessState, to: ProcessState) {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
        }
    }
}

async fn reap(
    mut child: Child,
    process: Arc<MountProcess>,
    table: Arc<dyn MountTable>,
    done: watch::Sender<bool>,
    settle_delay: Duration,
) {
    let volume_id = process.volume_id.as_str();
    match child.wait().await {
        Ok(status) if status.success() => {
            info!(volume_id, pid = process.pid, "Mount helper exited for {:?}", process.target)
        }
        Ok(status) => warn!(
            volume_id,
            pid = process.pid,
            "Mount helper for {:?} exited with {}",
            process.target,
            status
        ),
        Err(e) => error!(volume_id, pid = process.pid, "Failed to wait for mount helper: {}", e),
    }
    process.reaped.store(true, Ordering::SeqCst);

    sleep(settle_delay).await;
    let leftover = match table.is_mount_point(&process.target) {
        Ok(mounted) => mounted,
        Err(e) => is_corrupted_mount(&e),
    };
    if leftover {
        best_effort("unmount after helper exit", table.unmount(&process.target));
    }

    *process.state.lock() = ProcessState::Stopped;
    let _ = done.send(true);
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, volume_id: String, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(volume_id = %volume_id, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!(volume_id = %volume_id, stream, "Error reading mount helper output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mount_table::InMemoryMountTable;
    use tempfile::TempDir;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            mount_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            graceful_stop: Duration::from_millis(300),
            forceful_stop: Duration::from_secs(1),
            settle_delay: Duration::from_millis(10),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    /// Mark `path` mounted shortly after the helper starts.
    fn mount_later(table: &Arc<InMemoryMountTable>, path: &Path) {
        let table = Arc::clone(table);
        let path = path.to_path_buf();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            table.add_mount(path);
        });
    }

    #[tokio::test]
    async fn test_start_waits_for_mount_and_stop_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stage");
        std::fs::create_dir_all(&target).unwrap();

        let table = Arc::new(InMemoryMountTable::new());
        let supervisor = MountSupervisor::new(table.clone(), fast_config());
        mount_later(&table, &target);

        let process = supervisor
            .start("vol-1", "sh", &sh("exec sleep 30"), &target)
            .await
            .unwrap();
        assert_eq!(process.state(), ProcessState::Running);
        assert!(table.is_mounted(&target));

        process.stop(Duration::from_secs(2)).await.unwrap();
        assert!(process.has_exited());
        assert_eq!(process.state(), ProcessState::Stopped);
        // the reaper unmounts after the exit
        assert!(!table.is_mounted(&target));
    }

    #[tokio::test]
    async fn test_early_exit_fails_fast() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stage");
        std::fs::create_dir_all(&target).unwrap();

        let table = Arc::new(InMemoryMountTable::new());
        let supervisor = MountSupervisor::new(table, fast_config());

        let started = Instant::now();
        let err = supervisor
            .start("vol-1", "sh", &sh("echo boom >&2; exit 3"), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ExitedEarly { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mount_timeout_stops_process() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stage");
        std::fs::create_dir_all(&target).unwrap();

        let table = Arc::new(InMemoryMountTable::new());
        let config = SupervisorConfig {
            mount_timeout: Duration::from_millis(200),
            ..fast_config()
        };
        let supervisor = MountSupervisor::new(table, config);

        let err = supervisor
            .start("vol-1", "sh", &sh("exec sleep 30"), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::MountTimeout { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let table = Arc::new(InMemoryMountTable::new());
        let supervisor = MountSupervisor::new(table, fast_config());
        let err = supervisor
            .start("vol-1", "/nonexistent/weed", &[], Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_sigkill() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stage");
        std::fs::create_dir_all(&target).unwrap();

        let table = Arc::new(InMemoryMountTable::new());
        let supervisor = MountSupervisor::new(table.clone(), fast_config());
        mount_later(&table, &target);

        let process = supervisor
            .start("vol-1", "sh", &sh("trap '' TERM; exec sleep 30"), &target)
            .await
            .unwrap();

        let grace = Duration::from_millis(300);
        let started = Instant::now();
        process.stop(grace).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= grace, "stopped before the grace period: {:?}", elapsed);
        assert!(elapsed < grace + Duration::from_secs(1) + Duration::from_millis(500));
        assert!(process.has_exited());
        assert!(!table.is_mounted(&target));
    }

    #[tokio::test]
    async fn test_stop_after_exit_is_noop() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stage");
        std::fs::create_dir_all(&target).unwrap();

        let table = Arc::new(InMemoryMountTable::new());
        let supervisor = MountSupervisor::new(table.clone(), fast_config());
        mount_later(&table, &target);

        let process = supervisor
            .start("vol-1", "sh", &sh("sleep 0.3"), &target)
            .await
            .unwrap();
        assert!(process.wait_exit(Duration::from_secs(5)).await);
        assert_eq!(process.state(), ProcessState::Stopped);
        process.stop(Duration::from_millis(10)).await.unwrap();
        assert!(!table.is_mounted(&target));
    }
}
