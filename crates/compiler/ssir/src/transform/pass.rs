use std::fmt;

use tracing::{debug, error};

use crate::cfg::{Cfg, DebugLoc};
use crate::error::PassError;
use crate::verify::verify_body;
use crate::Module;

/// The outcome of a pass that did not fail.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Status {
    SuccessWithoutChange,
    SuccessWithChange,
}

impl Status {
    pub fn changed(changed: bool) -> Self {
        if changed {
            Status::SuccessWithChange
        } else {
            Status::SuccessWithoutChange
        }
    }

    pub fn combine(self, other: Status) -> Status {
        if self == Status::SuccessWithChange || other == Status::SuccessWithChange {
            Status::SuccessWithChange
        } else {
            Status::SuccessWithoutChange
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    pub severity: Severity,
    /// The name of the pass that produced the message.
    pub source: &'static str,
    pub position: Option<DebugLoc>,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.severity, self.source)?;

        if let Some(position) = &self.position {
            write!(f, " {}", position)?;
        }

        write!(f, ": {}", self.text)
    }
}

/// Forwards messages to an optional consumer callback.
///
/// Messages only inform; passes never branch on whether a consumer is installed.
#[derive(Default)]
pub struct Diagnostics {
    consumer: Option<Box<dyn FnMut(&Message)>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics { consumer: None }
    }

    pub fn with_consumer(consumer: impl FnMut(&Message) + 'static) -> Self {
        Diagnostics {
            consumer: Some(Box::new(consumer)),
        }
    }

    pub fn emit(&mut self, message: Message) {
        if let Some(consumer) = &mut self.consumer {
            consumer(&message);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("has_consumer", &self.consumer.is_some())
            .finish()
    }
}

pub trait Pass {
    /// Name of this pass, as accepted by [crate::transform::PassConfig::from_skip_list].
    fn name(&self) -> &'static str;

    fn run(
        &mut self,
        module: &mut Module,
        cfg: &mut Cfg,
        diagnostics: &mut Diagnostics,
    ) -> Result<Status, PassError>;
}

/// Runs a sequence of passes over a module.
///
/// The first failing pass stops the pipeline: its error is reported to the [Diagnostics] and
/// returned, and the passes after it do not run.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify: bool,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager {
            passes: Vec::new(),
            verify: false,
        }
    }

    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Whether to check the SSA invariants of every function after each pass.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + use<'_> {
        self.passes.iter().map(|pass| pass.name())
    }

    pub fn run(
        &mut self,
        module: &mut Module,
        cfg: &mut Cfg,
        diagnostics: &mut Diagnostics,
    ) -> Result<Status, PassError> {
        let verify = self.verify;
        let mut status = Status::SuccessWithoutChange;

        for pass in &mut self.passes {
            let name = pass.name();

            debug!(pass = name, "running pass");

            let result = pass.run(module, cfg, diagnostics).and_then(|pass_status| {
                if verify {
                    verify_module(cfg)?;
                }

                Ok(pass_status)
            });

            match result {
                Ok(pass_status) => {
                    debug!(pass = name, status = ?pass_status, "pass finished");

                    status = status.combine(pass_status);
                }
                Err(err) => {
                    error!(pass = name, function = %err.function(), "pass failed: {}", err);

                    diagnostics.emit(Message {
                        severity: Severity::Error,
                        source: name,
                        position: err.position(),
                        text: err.to_string(),
                    });

                    return Err(err);
                }
            }
        }

        Ok(status)
    }
}

fn verify_module(cfg: &Cfg) -> Result<(), PassError> {
    for (function, body) in cfg.function_body.iter() {
        verify_body(body).map_err(|source| PassError::InternalInvariant {
            function: *function,
            source,
        })?;
    }

    Ok(())
}
