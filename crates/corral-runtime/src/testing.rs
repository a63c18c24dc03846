//! Scripted command runner for backend unit tests.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Records every spec and answers from per-stage queues (default: success, empty output).
#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
}

impl RecordingRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call with this stage.
    pub(crate) fn respond(&self, stage: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .push_back(output);
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn stages(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.stage).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&spec.stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        self.calls.lock().unwrap().push(spec);
        Ok(response)
    }
}
