//! Dump orchestration
//!
//! Runs one dump through its stages:
//!
//! ```text
//! Idle -> Introspecting -> Generating -> Formatting -> Diffing -> Persisting -> Done
//! ```
//!
//! Any stage can fail the run, which then reports the stage together with
//! the cause. Diffing and persisting happen under the store lock; artifacts
//! are staged first and only moved into place after the snapshot is recorded
//! and retention applied.

use crate::artifact::StagedArtifacts;
use crate::catalog::CatalogAdapter;
use crate::config::RunConfig;
use crate::error::{DumpResult, RunFailure};
use crate::format::{FormattedOutput, Formatter};
use crate::generator::{render_model, RenderContext};
use crate::introspection::Introspector;
use crate::snapshot::{NewSnapshot, SnapshotStore, SnapshotSummary};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpStage {
    Idle,
    Introspecting,
    Generating,
    Formatting,
    Diffing,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for DumpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DumpStage::Idle => "idle",
            DumpStage::Introspecting => "introspecting",
            DumpStage::Generating => "generating",
            DumpStage::Formatting => "formatting",
            DumpStage::Diffing => "diffing",
            DumpStage::Persisting => "persisting",
            DumpStage::Done => "done",
            DumpStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct DumpOutcome {
    pub snapshot: SnapshotSummary,
    pub content_hash: String,
    /// False when the content hash equals the previous snapshot's
    pub changed: bool,
    pub previous_hash: Option<String>,
    pub evicted: usize,
    pub object_count: usize,
    pub artifacts: Vec<PathBuf>,
    pub stages: Vec<DumpStage>,
}

struct Persisted {
    snapshot: SnapshotSummary,
    previous_hash: Option<String>,
    evicted: usize,
    artifacts: Vec<PathBuf>,
}

pub struct Dumper<'a> {
    adapter: &'a dyn CatalogAdapter,
    store: &'a dyn SnapshotStore,
    config: &'a RunConfig,
}

fn enter(trace: &mut Vec<DumpStage>, stage: DumpStage) {
    debug!("Dump stage: {}", stage);
    trace.push(stage);
}

impl<'a> Dumper<'a> {
    pub fn new(
        adapter: &'a dyn CatalogAdapter,
        store: &'a dyn SnapshotStore,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            adapter,
            store,
            config,
        }
    }

    /// Run one dump to completion
    pub async fn run(&self) -> Result<DumpOutcome, RunFailure> {
        let mut trace = vec![DumpStage::Idle];
        match self.execute(&mut trace).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let stage = trace.last().copied().unwrap_or(DumpStage::Idle);
                error!(code = error.code(), stage = %stage, "Dump failed: {}", error);
                Err(RunFailure { stage, error })
            }
        }
    }

    async fn execute(&self, trace: &mut Vec<DumpStage>) -> DumpResult<DumpOutcome> {
        let dialect = self.adapter.dialect();
        self.config
            .validate_for(dialect, &self.adapter.capabilities())?;

        enter(trace, DumpStage::Introspecting);
        let model = Introspector::new(self.adapter, self.config).introspect().await?;

        enter(trace, DumpStage::Generating);
        let ctx = RenderContext::new(model.namespace.clone(), self.config.toggles.clone());
        let fragments = render_model(&model, &ctx)?;

        enter(trace, DumpStage::Formatting);
        let output = Formatter::new(self.config.output_mode, &model).format(&fragments)?;

        enter(trace, DumpStage::Diffing);
        let lock = self.store.lock().await?;
        let persisted = self.persist(&output, &model.engine_version, trace).await;
        let released = lock.release().await;
        let persisted = persisted?;
        if let Err(e) = released {
            warn!("Failed to release snapshot store lock: {}", e);
        }

        let content_hash = persisted.snapshot.content_hash.clone();
        let changed = persisted.previous_hash.as_deref() != Some(content_hash.as_str());
        info!(
            "Dumped {} objects from {} {} as snapshot #{} ({})",
            model.len(),
            dialect,
            model.namespace,
            persisted.snapshot.sequence,
            if changed { "changed" } else { "unchanged" }
        );

        enter(trace, DumpStage::Done);
        Ok(DumpOutcome {
            snapshot: persisted.snapshot,
            content_hash,
            changed,
            previous_hash: persisted.previous_hash,
            evicted: persisted.evicted,
            object_count: model.len(),
            artifacts: persisted.artifacts,
            stages: trace.clone(),
        })
    }

    /// Diff against the newest snapshot and persist; caller holds the store lock
    async fn persist(
        &self,
        output: &FormattedOutput,
        engine_version: &str,
        trace: &mut Vec<DumpStage>,
    ) -> DumpResult<Persisted> {
        let previous_hash = self.store.latest().await?.map(|s| s.content_hash);
        let hash = output.content_hash();
        if previous_hash.as_deref() == Some(hash.as_str()) {
            debug!("Schema unchanged since last snapshot ({})", hash);
        }

        enter(trace, DumpStage::Persisting);
        let staged = StagedArtifacts::stage(output, self.config)?;

        let snapshot = match self
            .store
            .create(NewSnapshot::from_output(output, engine_version))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                staged.discard();
                return Err(e);
            }
        };

        let evicted = match self.store.delete_oldest(self.config.retention).await {
            Ok(evicted) => evicted,
            Err(e) => {
                staged.discard();
                self.compensate(&snapshot.id).await;
                return Err(e);
            }
        };

        let artifacts = match staged.commit() {
            Ok(paths) => paths,
            Err(e) => {
                self.compensate(&snapshot.id).await;
                return Err(e);
            }
        };

        Ok(Persisted {
            snapshot: snapshot.summary(),
            previous_hash,
            evicted,
            artifacts,
        })
    }

    /// Remove a snapshot whose artifacts never made it to disk
    async fn compensate(&self, id: &uuid::Uuid) {
        warn!("Removing snapshot {} after failed persist", id);
        if let Err(e) = self.store.delete(*id).await {
            error!("Compensating delete of snapshot {} failed: {}", id, e);
        }
    }
}
