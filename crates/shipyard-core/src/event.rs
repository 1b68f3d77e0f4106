//! The external stimulus that starts a run.

use crate::pipeline::EventKind;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An event arriving from outside (code host, release tooling, an operator).
///
/// Events are constructed once and never mutated; builders consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerEvent {
    kind: EventKind,
    git_ref: Option<String>,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    actor: Option<String>,
    received_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            git_ref: None,
            inputs: BTreeMap::new(),
            actor: None,
            received_at: Utc::now(),
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Push).with_ref(branch)
    }

    pub fn pull_request(target_branch: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest).with_ref(target_branch)
    }

    pub fn release(tag: impl Into<String>) -> Self {
        Self::new(EventKind::ReleaseCreated).with_ref(tag)
    }

    pub fn manual_dispatch() -> Self {
        Self::new(EventKind::ManualDispatch)
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    pub fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).map(String::as_str)
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
