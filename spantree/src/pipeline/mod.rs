//! Staged report pipeline built from active objects.
//!
//! Each stage pairs a private queue with a dedicated thread. A
//! submitted task's latch is sized to the stage count; every stage
//! renders one report line, writes it to the task's destination
//! descriptor, arrives on the latch, and (in chained mode) forwards
//! the task to the next stage. The final arrival wakes the submitter.
//!
//! Two composition modes exist because both appear in practice:
//! chained (canonical; output lines follow stage order) and fan-out
//! (every stage fed independently; only latch completion is ordered).

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use spantree_graph::SpanningTree;
use tracing::{debug, error};

use crate::config::PipelineMode;
use crate::error::PipelineError;
use crate::fdio;
use crate::sync::latch::CompletionLatch;

/// A pipeline stage is data: a name and the line it renders. Four
/// near-identical stages do not need a trait hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub name: &'static str,
    pub render: fn(&SpanningTree) -> String,
}

/// The canonical report chain, in output order.
pub fn report_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            name: "total-weight",
            render: |tree| format!("TotalWeight: {}\n", tree.total_weight()),
        },
        StageSpec {
            name: "longest-distance",
            render: |tree| format!("LongestDistance: {}\n", tree.longest_distance()),
        },
        StageSpec {
            name: "average-distance",
            render: |tree| format!("AverageDistance: {}\n", tree.average_distance()),
        },
        StageSpec {
            name: "shortest-distance",
            render: |tree| format!("ShortestDistance: {}\n", tree.shortest_distance()),
        },
    ]
}

/// One report request travelling through the stages.
pub struct ReportTask {
    pub tree: SpanningTree,
    pub dest: RawFd,
    pub latch: CompletionLatch,
}

enum StageMsg {
    Work(Arc<ReportTask>),
    /// Shuts the stage down. Never forwarded to the next stage.
    Stop,
}

struct Stage {
    name: &'static str,
    tx: flume::Sender<StageMsg>,
}

/// The staged pipeline. Construction spawns one thread per stage;
/// [`Pipeline::shutdown`] stops and joins them.
pub struct Pipeline {
    stages: Vec<Stage>,
    mode: PipelineMode,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Builds and starts a pipeline over the given stages.
    pub fn start(specs: Vec<StageSpec>, mode: PipelineMode) -> Self {
        let mut stages = Vec::with_capacity(specs.len());
        let mut handles = Vec::with_capacity(specs.len());

        // Build back to front so each stage thread owns the sender of
        // its successor.
        let mut next_tx: Option<flume::Sender<StageMsg>> = None;
        for spec in specs.into_iter().rev() {
            let (tx, rx) = flume::unbounded::<StageMsg>();
            let forward = match mode {
                PipelineMode::Chained => next_tx.clone(),
                PipelineMode::FanOut => None,
            };
            let handle = std::thread::Builder::new()
                .name(format!("pipeline-{}", spec.name))
                .spawn(move || stage_loop(spec, rx, forward))
                .expect("failed to spawn pipeline stage thread");
            stages.push(Stage {
                name: spec.name,
                tx: tx.clone(),
            });
            handles.push(handle);
            next_tx = Some(tx);
        }
        stages.reverse();
        handles.reverse();

        Self {
            stages,
            mode,
            handles: Mutex::new(handles),
        }
    }

    /// Starts the canonical four-stage report pipeline.
    pub fn start_report(mode: PipelineMode) -> Self {
        Self::start(report_stages(), mode)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Submits a report for `tree`, writing lines to `dest`. Returns
    /// the latch the caller blocks on; it completes after every stage
    /// has processed the task.
    pub fn submit(&self, tree: SpanningTree, dest: RawFd) -> Result<CompletionLatch, PipelineError> {
        let latch = CompletionLatch::new(self.stages.len());
        let task = Arc::new(ReportTask {
            tree,
            dest,
            latch: latch.clone(),
        });
        match self.mode {
            PipelineMode::Chained => {
                let first = self.stages.first().ok_or(PipelineError::ShuttingDown)?;
                first
                    .tx
                    .send(StageMsg::Work(task))
                    .map_err(|_| PipelineError::StageClosed)?;
            }
            PipelineMode::FanOut => {
                for stage in &self.stages {
                    stage
                        .tx
                        .send(StageMsg::Work(Arc::clone(&task)))
                        .map_err(|_| PipelineError::StageClosed)?;
                }
            }
        }
        Ok(latch)
    }

    /// Sends every stage its stop sentinel and joins the threads.
    /// Tasks still queued behind the sentinel are dropped unprocessed.
    pub fn shutdown(&self) {
        for stage in &self.stages {
            let _ = stage.tx.send(StageMsg::Stop);
        }
        let mut handles = self.handles.lock().expect("pipeline handles poisoned");
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!("pipeline stage thread panicked");
            }
        }
    }
}

fn stage_loop(spec: StageSpec, rx: flume::Receiver<StageMsg>, forward: Option<flume::Sender<StageMsg>>) {
    debug!(stage = spec.name, "pipeline stage started");
    while let Ok(msg) = rx.recv() {
        let task = match msg {
            StageMsg::Work(task) => task,
            StageMsg::Stop => break,
        };
        let line = (spec.render)(&task.tree);
        if let Err(err) = fdio::write_all(task.dest, line.as_bytes()) {
            error!(stage = spec.name, error = %err, "failed to write report line");
        }
        task.latch.arrive();
        if let Some(next) = &forward {
            if next.send(StageMsg::Work(task)).is_err() {
                error!(stage = spec.name, "next stage queue closed, dropping task");
            }
        }
    }
    debug!(stage = spec.name, "pipeline stage stopped");
}
