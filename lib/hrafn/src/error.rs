use thiserror::Error;

use crate::codec::DecodeError;

/// One variant per failure class. Each maps to a distinct exit code so
/// drivers can tell which phase gave up; there is no retry anywhere, a
/// failing phase aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode: {0:#}")]
    Decode(anyhow::Error),
    #[error("distribute: {0:#}")]
    Distribute(anyhow::Error),
    #[error("sort: {0:#}")]
    Sort(anyhow::Error),
    #[error("merge: {0:#}")]
    Merge(anyhow::Error),
    #[error("rewrite: {0:#}")]
    Rewrite(anyhow::Error),
    #[error("verify: {0:#}")]
    Verify(anyhow::Error),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Decode(_) => 2,
            PipelineError::Distribute(_) => 3,
            PipelineError::Sort(_) => 4,
            PipelineError::Merge(_) => 5,
            PipelineError::Rewrite(_) => 6,
            PipelineError::Verify(_) => 7,
        }
    }

    /// Failures during the scan phase split into decode errors (bad
    /// input bytes) and everything else (I/O, transport).
    pub(crate) fn from_scan(e: anyhow::Error) -> Self {
        if e.chain().any(|c| c.downcast_ref::<DecodeError>().is_some()) {
            PipelineError::Decode(e)
        } else {
            PipelineError::Distribute(e)
        }
    }
}
