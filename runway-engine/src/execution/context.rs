// Run Execution Context
// Read-only state shared by every instance of one pipeline run

use crate::spec::TriggerKind;

use std::collections::{HashMap, HashSet};

/// Run-scoped, read-only context: ref, trigger kind, variables and manual
/// approval signals. Created at run start, shared via Arc, discarded at run
/// end. Never a process-wide singleton.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Branch or ref the run executes against.
    pub git_ref: String,
    /// What caused this run.
    pub trigger: TriggerKind,
    /// Variables (credentials, tokens) passed opaquely to commands and
    /// publish sinks.
    pub variables: HashMap<String, String>,
    /// Job template names that received an explicit approval signal.
    approvals: HashSet<String>,
}

impl ExecutionContext {
    pub fn new(git_ref: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            git_ref: git_ref.into(),
            trigger,
            variables: HashMap::new(),
            approvals: HashSet::new(),
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Record an approval signal for a manual job, by template name.
    pub fn approve(mut self, job_name: impl Into<String>) -> Self {
        self.approvals.insert(job_name.into());
        self
    }

    pub fn with_approvals(mut self, approvals: impl IntoIterator<Item = String>) -> Self {
        self.approvals.extend(approvals);
        self
    }

    /// Whether the named job template has an approval signal.
    pub fn is_approved(&self, job_name: &str) -> bool {
        self.approvals.contains(job_name)
    }
}
