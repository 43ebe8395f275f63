use crate::{FunctionId, ProgramId};

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to initialize executor: {0:#}")]
    Initialization(anyhow::Error),

    #[error("executor rejected program bytecode ({len} bytes)")]
    Load { len: usize },

    #[error("executor out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("failed to compile function {fn_id}: {reason:#}")]
    Compilation {
        fn_id: FunctionId,
        reason: anyhow::Error,
    },

    #[error("callback for unregistered program {program_id}")]
    IntegrityViolation { program_id: ProgramId },

    #[error("callback from foreign executor handle {handle:#x}")]
    ForeignExecutor { handle: u32 },

    #[error("host has been torn down")]
    TornDown,

    #[error(transparent)]
    Executor(#[from] anyhow::Error),
}

impl HostError {
    pub(crate) fn compilation(fn_id: FunctionId, reason: impl Into<anyhow::Error>) -> Self {
        Self::Compilation {
            fn_id,
            reason: reason.into(),
        }
    }

    /// Recovers a host error that was raised inside a callback and surfaced as a trap.
    pub(crate) fn from_trap(err: anyhow::Error) -> Self {
        match err.downcast::<HostError>() {
            Ok(err) => err,
            Err(err) => Self::Executor(err),
        }
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation { .. } | Self::ForeignExecutor { .. }
        )
    }
}
