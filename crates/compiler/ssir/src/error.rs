use thiserror::Error;

use crate::analyse::structured::StructureError;
use crate::cfg::{BasicBlock, DebugLoc};
use crate::verify::VerifyError;
use crate::Function;

/// The reasons a pass can fail.
///
/// Structural failures are reported before a pass mutates anything and can be recovered from by
/// cleaning up the input (see [crate::transform::dead_block_elimination]) and running the pass
/// again. A [PassError::InternalInvariant] means a pass produced invalid IR.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum PassError {
    #[error(
        "module contains unreachable blocks during merge return (in `{function}`); run dead block \
         elimination before merge return"
    )]
    UnreachableBlocks {
        function: Function,
        block: BasicBlock,
        position: Option<DebugLoc>,
    },
    #[error("malformed construct headed by {header:?} in `{function}`: {reason}")]
    MalformedConstruct {
        function: Function,
        header: BasicBlock,
        reason: &'static str,
    },
    #[error("unsupported control flow at {block:?} in `{function}`: {reason}")]
    Unsupported {
        function: Function,
        block: BasicBlock,
        reason: &'static str,
    },
    #[error("internal invariant violated in `{function}`: {source}")]
    InternalInvariant {
        function: Function,
        source: VerifyError,
    },
}

impl PassError {
    pub fn from_structure(function: Function, err: StructureError) -> Self {
        match err {
            StructureError::UnreachableBlock { block, position } => PassError::UnreachableBlocks {
                function,
                block,
                position,
            },
            StructureError::DanglingTarget { block, .. } => PassError::MalformedConstruct {
                function,
                header: block,
                reason: "a branch or merge target is not part of the function",
            },
            StructureError::MalformedConstruct { header, reason } => {
                PassError::MalformedConstruct {
                    function,
                    header,
                    reason,
                }
            }
            StructureError::Unsupported { block, reason } => PassError::Unsupported {
                function,
                block,
                reason,
            },
        }
    }

    pub fn function(&self) -> Function {
        match self {
            PassError::UnreachableBlocks { function, .. }
            | PassError::MalformedConstruct { function, .. }
            | PassError::Unsupported { function, .. }
            | PassError::InternalInvariant { function, .. } => *function,
        }
    }

    /// The source position the failure should be reported at, if known.
    pub fn position(&self) -> Option<DebugLoc> {
        match self {
            PassError::UnreachableBlocks { position, .. } => *position,
            _ => None,
        }
    }
}
