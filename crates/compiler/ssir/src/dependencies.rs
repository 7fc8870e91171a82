use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::cfg::{Cfg, Op};
use crate::{Function, Module};

fn sort_functions(functions: &mut [Function]) {
    functions.sort_by(|a, b| {
        (a.module.as_str(), a.name.as_str()).cmp(&(b.module.as_str(), b.name.as_str()))
    });
}

/// The functions with a body that a pass over [module] should visit.
///
/// For a module with entry points these are the entry points and every function they (transitively)
/// call, in breadth-first order. A module without entry points is a library: all of its function
/// bodies are visited, ordered by name.
pub fn reachable_functions(module: &Module, cfg: &Cfg) -> Vec<Function> {
    if module.entry_points.is_empty() {
        let mut functions: Vec<Function> = cfg.function_body.keys().collect();

        sort_functions(&mut functions);

        return functions;
    }

    let mut entry_points: Vec<Function> = module.entry_points.iter().map(|(f, _)| f).collect();

    sort_functions(&mut entry_points);

    let mut seen = FxHashSet::default();
    let mut queue: VecDeque<Function> = VecDeque::new();
    let mut functions = Vec::new();

    for function in entry_points {
        if cfg.function_body.contains(function) && seen.insert(function) {
            queue.push_back(function);
        }
    }

    while let Some(function) = queue.pop_front() {
        functions.push(function);

        let body = &cfg.function_body[function];

        for bb in &body.layout {
            for statement in &body.basic_blocks[*bb].statements {
                if let Op::OpCall(op_call) = &statement.op {
                    let callee = op_call.function;

                    if cfg.function_body.contains(callee) && seen.insert(callee) {
                        queue.push_back(callee);
                    }
                }
            }
        }
    }

    functions
}
