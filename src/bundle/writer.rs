use std::{
    path::PathBuf,
    sync::mpsc,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use tokio::sync::oneshot;

use crate::spatial::{export_scene, write_map, SceneGraph, SpaceMap};

enum WriteJob {
    Scene {
        graph: SceneGraph,
        path: PathBuf,
        asset_ref: String,
    },
    Map {
        map: SpaceMap,
        path: PathBuf,
        asset_ref: String,
    },
}

enum WriterCommand {
    Write(WriteJob),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// A snapshot write that failed on the writer thread.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub asset_ref: String,
    pub message: String,
}

/// Per-session background thread for scene and map files.
///
/// Jobs run strictly in submission order, so two snapshots never interleave
/// partial writes. Failures come back through [`SnapshotWriter::drain_failures`]
/// so only the recorder ever appends to the session log.
pub struct SnapshotWriter {
    sender: mpsc::Sender<WriterCommand>,
    failures: mpsc::Receiver<WriteFailure>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn spawn(asset_root: Option<PathBuf>) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<WriterCommand>();
        let (failure_tx, failure_rx) = mpsc::channel::<WriteFailure>();

        let worker = thread::Builder::new()
            .name("arlog-snapshots".into())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        WriterCommand::Write(job) => {
                            if let Err(failure) = run_job(job, asset_root.as_deref()) {
                                error!(
                                    "Snapshot write failed for {}: {}",
                                    failure.asset_ref, failure.message
                                );
                                let _ = failure_tx.send(failure);
                            }
                        }
                        WriterCommand::Flush(reply) => {
                            let _ = reply.send(());
                        }
                        WriterCommand::Shutdown => break,
                    }
                }
                debug!("Snapshot writer thread shutting down");
            })
            .context("failed to spawn snapshot writer thread")?;

        Ok(Self {
            sender: command_tx,
            failures: failure_rx,
            worker: Some(worker),
        })
    }

    pub fn write_scene(&self, graph: SceneGraph, path: PathBuf, asset_ref: String) -> Result<()> {
        self.submit(WriteJob::Scene {
            graph,
            path,
            asset_ref,
        })
    }

    pub fn write_map(&self, map: SpaceMap, path: PathBuf, asset_ref: String) -> Result<()> {
        self.submit(WriteJob::Map {
            map,
            path,
            asset_ref,
        })
    }

    fn submit(&self, job: WriteJob) -> Result<()> {
        self.sender
            .send(WriterCommand::Write(job))
            .map_err(|err| anyhow!("snapshot writer thread is gone: {err}"))
    }

    /// Resolves once every job submitted before this call has finished.
    pub fn flush(&self) -> oneshot::Receiver<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(reply_tx)).is_err() {
            error!("Snapshot writer thread is gone; nothing to flush");
        }
        reply_rx
    }

    pub fn drain_failures(&self) -> Vec<WriteFailure> {
        self.failures.try_iter().collect()
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            if let Err(err) = self.sender.send(WriterCommand::Shutdown) {
                error!("Failed to send shutdown to snapshot writer: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join snapshot writer: {join_err:?}");
            }
        }
    }
}

fn run_job(job: WriteJob, asset_root: Option<&std::path::Path>) -> Result<(), WriteFailure> {
    match job {
        WriteJob::Scene {
            graph,
            path,
            asset_ref,
        } => match export_scene(&graph, &path, asset_root) {
            Ok(report) => {
                info!(
                    "Scene snapshot {} written ({} nodes, {} textures copied, {} skipped, {} failed)",
                    asset_ref,
                    graph.node_count(),
                    report.textures_copied,
                    report.textures_skipped,
                    report.textures_failed
                );
                Ok(())
            }
            Err(err) => Err(WriteFailure {
                asset_ref,
                message: format!("{err:#}"),
            }),
        },
        WriteJob::Map {
            map,
            path,
            asset_ref,
        } => match write_map(&path, &map) {
            Ok(()) => {
                info!(
                    "Map snapshot {} written ({} points, {} anchors)",
                    asset_ref,
                    map.point_count(),
                    map.anchors.len()
                );
                Ok(())
            }
            Err(err) => Err(WriteFailure {
                asset_ref,
                message: format!("{err:#}"),
            }),
        },
    }
}
