//! Generic ordered-stage execution engine.
//!
//! A [`ProcessController`] maps a business code to a [`ProcessTemplate`], an
//! ordered list of [`BusinessProcess`] stages. Running a context executes the
//! stages in order against the same mutable [`ProcessContext`], stopping early
//! when a stage raises the break flag. The engine knows nothing about the
//! carried model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub const STAGE_DURATION_SECONDS: &str = "pipeline_stage_duration_seconds";
pub const STAGE_BREAKS: &str = "pipeline_stage_breaks_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespStatus {
    Success,
    Fail,
    ClientBadParameters,
    ServiceError,
}

impl RespStatus {
    pub fn code(&self) -> &'static str {
        match self {
            RespStatus::Success => "00000",
            RespStatus::Fail => "99999",
            RespStatus::ClientBadParameters => "A0001",
            RespStatus::ServiceError => "C0001",
        }
    }

    pub fn default_msg(&self) -> &'static str {
        match self {
            RespStatus::Success => "success",
            RespStatus::Fail => "failed",
            RespStatus::ClientBadParameters => "client bad parameters",
            RespStatus::ServiceError => "service error",
        }
    }
}

impl fmt::Display for RespStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub status: RespStatus,
    pub msg: String,
}

impl ProcessResult {
    pub fn success() -> Self {
        Self::from_status(RespStatus::Success)
    }

    pub fn from_status(status: RespStatus) -> Self {
        Self {
            status,
            msg: status.default_msg().to_string(),
        }
    }

    pub fn with_msg(status: RespStatus, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RespStatus::Success
    }
}

impl Default for ProcessResult {
    fn default() -> Self {
        Self::success()
    }
}

/// Per-execution envelope. Owned by exactly one run.
#[derive(Debug)]
pub struct ProcessContext<T> {
    pub code: String,
    pub model: T,
    pub need_break: bool,
    pub response: ProcessResult,
}

impl<T> ProcessContext<T> {
    pub fn new(code: impl Into<String>, model: T) -> Self {
        Self {
            code: code.into(),
            model,
            need_break: false,
            response: ProcessResult::success(),
        }
    }

    /// Stop the chain after the current stage, recording why.
    pub fn break_with(&mut self, status: RespStatus, msg: impl Into<String>) {
        self.need_break = true;
        self.response = ProcessResult::with_msg(status, msg);
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ProcessError {
    pub fn stage(
        stage: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ProcessError::Stage {
            stage,
            source: source.into(),
        }
    }
}

/// One step of a pipeline. Stages may mutate the model, raise the break flag,
/// or pass through. An `Err` aborts the whole run.
#[async_trait]
pub trait BusinessProcess<T: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, context: &mut ProcessContext<T>) -> Result<(), ProcessError>;
}

pub struct ProcessTemplate<T: Send> {
    processes: Vec<Arc<dyn BusinessProcess<T>>>,
}

impl<T: Send> ProcessTemplate<T> {
    pub fn new(processes: Vec<Arc<dyn BusinessProcess<T>>>) -> Self {
        Self { processes }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.processes.iter().map(|p| p.name()).collect()
    }
}

pub struct ProcessController<T: Send> {
    templates: HashMap<String, ProcessTemplate<T>>,
}

pub struct ProcessControllerBuilder<T: Send> {
    templates: HashMap<String, ProcessTemplate<T>>,
}

impl<T: Send> Default for ProcessControllerBuilder<T> {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }
}

impl<T: Send> ProcessControllerBuilder<T> {
    pub fn template(mut self, code: impl Into<String>, template: ProcessTemplate<T>) -> Self {
        self.templates.insert(code.into(), template);
        self
    }

    pub fn build(self) -> ProcessController<T> {
        ProcessController {
            templates: self.templates,
        }
    }
}

impl<T: Send> ProcessController<T> {
    pub fn builder() -> ProcessControllerBuilder<T> {
        ProcessControllerBuilder::default()
    }

    pub fn template(&self, code: &str) -> Option<&ProcessTemplate<T>> {
        self.templates.get(code)
    }

    /// Run the template selected by `context.code`.
    ///
    /// A blank or unknown code, or an empty template, returns the context with
    /// a `ClientBadParameters` result and no stage invoked.
    pub async fn process(
        &self,
        mut context: ProcessContext<T>,
    ) -> Result<ProcessContext<T>, ProcessError> {
        let code = context.code.trim();
        if code.is_empty() {
            context.response =
                ProcessResult::with_msg(RespStatus::ClientBadParameters, "business code is blank");
            return Ok(context);
        }

        let template = match self.templates.get(code) {
            Some(template) if !template.is_empty() => template,
            _ => {
                let msg = format!("no process template for business code {code}");
                context.response = ProcessResult::with_msg(RespStatus::ClientBadParameters, msg);
                return Ok(context);
            }
        };

        for process in &template.processes {
            let stage = process.name();
            let start = Instant::now();
            let result = process.process(&mut context).await;
            metrics::histogram!(STAGE_DURATION_SECONDS, &[("stage", stage)])
                .record(start.elapsed().as_secs_f64());
            result?;

            if context.need_break {
                debug!(stage, status = %context.response.status, "pipeline stopped early");
                metrics::counter!(STAGE_BREAKS, &[("stage", stage)]).increment(1);
                break;
            }
        }

        Ok(context)
    }
}
