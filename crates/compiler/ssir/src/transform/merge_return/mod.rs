//! Rewrites functions so that they have a single return.
//!
//! Functions in modules that do not require structured control flow simply have all their
//! returns branch to a new exit block (see [unstructured]). For shaders every early return has to
//! leave the structured constructs around it through their merge blocks; [structured] threads a
//! return flag outward through the enclosing constructs for that.

mod structured;
mod unstructured;

use tracing::{debug, instrument, trace};

use crate::analyse::structured::{check_structure, StructuredCfg};
use crate::cfg::{Body, Cfg};
use crate::dependencies::reachable_functions;
use crate::error::PassError;
use crate::transform::pass::{Diagnostics, Pass, Status};
use crate::transform::ssa_repair::{promote_variable, repair_ssa};
use crate::write::text::write_function;
use crate::{Capability, Function, Module};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Strategy {
    Structured,
    Unstructured,
}

/// Decides how [body] has to be restructured, or `None` if it already has a single return that
/// needs no restructuring.
fn select_strategy(body: &Body, is_shader: bool) -> Option<Strategy> {
    let return_blocks = body.return_blocks();

    match return_blocks.as_slice() {
        [] => None,
        [_] if !is_shader => None,
        [return_block] => {
            let structured = StructuredCfg::analyse(body);
            let in_construct = structured.containing_construct(*return_block).is_some();
            let is_last = body.layout.last() == Some(return_block);

            if !in_construct && is_last {
                None
            } else {
                Some(Strategy::Structured)
            }
        }
        _ if is_shader => Some(Strategy::Structured),
        _ => Some(Strategy::Unstructured),
    }
}

/// Gives every function in the call tree of [module] a single return.
///
/// All functions that need restructuring are checked before the first one is touched, and the
/// transformed bodies only replace the originals once every function was transformed
/// successfully. On failure [module] and [cfg] are left as they were.
#[instrument(skip_all, fields(module = %module.name))]
pub fn merge_return(module: &mut Module, cfg: &mut Cfg) -> Result<Status, PassError> {
    let is_shader = module.is_shader();
    let allow_pointer_phis = module.capabilities.has(Capability::VariablePointers);

    let mut planned: Vec<(Function, Strategy)> = Vec::new();

    for function in reachable_functions(module, cfg) {
        let body = &cfg.function_body[function];

        let Some(strategy) = select_strategy(body, is_shader) else {
            trace!(function = %function, "function needs no restructuring");

            continue;
        };

        debug!(
            function = %function,
            return_blocks = body.return_blocks().len(),
            strategy = ?strategy,
            "merging returns"
        );

        if strategy == Strategy::Structured {
            check_structure(body).map_err(|err| PassError::from_structure(function, err))?;
        }

        planned.push((function, strategy));
    }

    if planned.is_empty() {
        return Ok(Status::SuccessWithoutChange);
    }

    let mut types = module.ty.clone();
    let mut transformed = Vec::with_capacity(planned.len());

    for (function, strategy) in planned {
        let mut body = cfg.function_body[function].clone();

        trace!(function = %function, "before merge return:\n{}", write_function(&types, function, &body));

        let return_value = match strategy {
            Strategy::Structured => structured::merge_return(&mut body, &mut types)
                .map_err(|err| PassError::from_structure(function, err))?,
            Strategy::Unstructured => {
                unstructured::merge_return(&mut body);

                None
            }
        };

        repair_ssa(&mut body, &types, allow_pointer_phis);

        if let Some(return_value) = return_value {
            promote_variable(&mut body, return_value);
        }

        trace!(function = %function, "after merge return:\n{}", write_function(&types, function, &body));

        transformed.push((function, body));
    }

    module.ty = types;

    for (function, body) in transformed {
        cfg.function_body.insert(function, body);
    }

    Ok(Status::SuccessWithChange)
}

/// Pass wrapper around [merge_return].
#[derive(Clone, Copy, Default, Debug)]
pub struct MergeReturn;

impl Pass for MergeReturn {
    fn name(&self) -> &'static str {
        "merge-return"
    }

    fn run(
        &mut self,
        module: &mut Module,
        cfg: &mut Cfg,
        _diagnostics: &mut Diagnostics,
    ) -> Result<Status, PassError> {
        merge_return(module, cfg)
    }
}
