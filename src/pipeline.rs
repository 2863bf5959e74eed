//! Ordered stage sequences over [`FileRecord`]s.
//!
//! A [`Pipeline`] is a list of [`Transform`] values applied in order. Mode
//! dependent behaviour is expressed by declaring one sequence per
//! [`BuildMode`] and choosing between them with [`Pipeline::for_mode`], never
//! by patching a pipeline at runtime.

use crate::config::BuildMode;
use crate::graph::TaskError;
use crate::record::FileRecord;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{stage} failed for {}: {source}", .path.display())]
pub struct PipelineError {
    pub stage: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: TaskError,
}

/// One step of a pipeline.
pub trait Transform: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn apply(&self, record: FileRecord) -> Result<FileRecord, TaskError>;
}

/// Closures can be used as anonymous stages.
pub struct FnTransform<F> {
    name: &'static str,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(FileRecord) -> Result<FileRecord, TaskError> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(FileRecord) -> Result<FileRecord, TaskError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, record: FileRecord) -> Result<FileRecord, TaskError> {
        (self.f)(record)
    }
}

/// Stages may borrow collaborators (renderers, minifiers) for `'a`.
#[derive(Default)]
pub struct Pipeline<'a> {
    stages: Vec<Box<dyn Transform + 'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(stages: Vec<Box<dyn Transform + 'a>>) -> Self {
        Self { stages }
    }

    /// Pick the development or distribution sequence.
    pub fn for_mode(
        mode: BuildMode,
        development: Vec<Box<dyn Transform + 'a>>,
        distribution: Vec<Box<dyn Transform + 'a>>,
    ) -> Self {
        match mode {
            BuildMode::Development => Self::new(development),
            BuildMode::Distribution => Self::new(distribution),
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Apply every stage in order, stopping at the first failure.
    pub fn run(&self, record: FileRecord) -> Result<FileRecord, PipelineError> {
        self.stages.iter().try_fold(record, |record, stage| {
            let path = record.path.clone();
            stage.apply(record).map_err(|source| PipelineError {
                stage: stage.name(),
                path,
                source,
            })
        })
    }
}
