//! Conditional gates: pure predicates over run metadata.
//!
//! A predicate never performs I/O and never looks at the clock, so the same
//! predicate evaluated against the same [`GateContext`] always yields the same
//! answer.

use crate::event::TriggerEvent;
use crate::pipeline::EventKind;
use crate::run::MatrixBinding;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Matrix axis consulted by [`Predicate::Platform`].
pub const PLATFORM_AXIS: &str = "os";

/// Boolean predicate authored under `if:` on a group or step. Variants are
/// written as single-key maps:
///
/// ```yaml
/// if:
///   any:
///     - event: release_created
///     - all:
///         - event: manual_dispatch
///         - input: { name: publish, equals: "true" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Never,
    Event(EventKind),
    Input { name: String, equals: String },
    Platform(String),
    Matrix { axis: String, equals: String },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// `(manual_dispatch AND inputs.publish == "true") OR release_created`.
    pub fn publish_gate() -> Self {
        Predicate::Any(vec![
            Predicate::Event(EventKind::ReleaseCreated),
            Predicate::All(vec![
                Predicate::Event(EventKind::ManualDispatch),
                Predicate::Input {
                    name: "publish".to_string(),
                    equals: "true".to_string(),
                },
            ]),
        ])
    }
}

/// Snapshot of the metadata a gate may inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateContext {
    pub event_kind: EventKind,
    pub git_ref: Option<String>,
    pub inputs: BTreeMap<String, String>,
    pub platform: String,
    pub matrix: BTreeMap<String, String>,
}

impl GateContext {
    /// Context for group-level gates, evaluated before matrix expansion.
    pub fn for_event(event: &TriggerEvent, inputs: BTreeMap<String, String>) -> Self {
        Self {
            event_kind: event.kind(),
            git_ref: event.git_ref().map(str::to_string),
            inputs,
            platform: std::env::consts::OS.to_string(),
            matrix: BTreeMap::new(),
        }
    }

    /// Narrow the context to one job instance's matrix binding.
    pub fn with_binding(mut self, binding: &MatrixBinding) -> Self {
        for (axis, value) in binding.iter() {
            self.matrix.insert(axis.to_string(), value.to_string());
        }
        if let Some(platform) = binding.get(PLATFORM_AXIS) {
            self.platform = platform.to_string();
        }
        self
    }
}

/// Evaluate a predicate against a context.
pub fn satisfied(predicate: &Predicate, ctx: &GateContext) -> bool {
    match predicate {
        Predicate::Always => true,
        Predicate::Never => false,
        Predicate::Event(kind) => ctx.event_kind == *kind,
        Predicate::Input { name, equals } => ctx.inputs.get(name) == Some(equals),
        Predicate::Platform(platform) => ctx.platform.eq_ignore_ascii_case(platform),
        Predicate::Matrix { axis, equals } => ctx.matrix.get(axis) == Some(equals),
        Predicate::All(preds) => preds.iter().all(|p| satisfied(p, ctx)),
        Predicate::Any(preds) => preds.iter().any(|p| satisfied(p, ctx)),
        Predicate::Not(inner) => !satisfied(inner, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: EventKind, inputs: &[(&str, &str)]) -> GateContext {
        GateContext {
            event_kind: kind,
            git_ref: Some("main".to_string()),
            inputs: inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            platform: "linux".to_string(),
            matrix: BTreeMap::new(),
        }
    }

    #[test]
    fn test_publish_gate_truth_table() {
        let gate = Predicate::publish_gate();
        assert!(!satisfied(&gate, &ctx(EventKind::Push, &[])));
        assert!(!satisfied(&gate, &ctx(EventKind::PullRequest, &[("publish", "true")])));
        assert!(satisfied(&gate, &ctx(EventKind::ReleaseCreated, &[])));
        assert!(satisfied(&gate, &ctx(EventKind::ManualDispatch, &[("publish", "true")])));
        assert!(!satisfied(&gate, &ctx(EventKind::ManualDispatch, &[("publish", "false")])));
        assert!(!satisfied(&gate, &ctx(EventKind::ManualDispatch, &[])));
    }

    #[test]
    fn test_satisfied_is_repeatable() {
        let gate = Predicate::publish_gate();
        let snapshot = ctx(EventKind::ManualDispatch, &[("publish", "true")]);
        let first = satisfied(&gate, &snapshot);
        for _ in 0..10 {
            assert_eq!(satisfied(&gate, &snapshot), first);
        }
    }

    #[test]
    fn test_platform_follows_os_axis() {
        let binding = MatrixBinding::from_pairs([("os", "windows"), ("toolchain", "stable")]);
        let gate_ctx = ctx(EventKind::Push, &[]).with_binding(&binding);

        assert!(satisfied(&Predicate::Platform("Windows".into()), &gate_ctx));
        assert!(satisfied(
            &Predicate::Matrix {
                axis: "toolchain".into(),
                equals: "stable".into()
            },
            &gate_ctx
        ));
        assert!(satisfied(
            &Predicate::Not(Box::new(Predicate::Platform("linux".into()))),
            &gate_ctx
        ));
    }

    #[test]
    fn test_parse_from_yaml() {
        let yaml = r#"
any:
  - event: release_created
  - all:
      - event: manual_dispatch
      - input: { name: publish, equals: "true" }
"#;
        let parsed: Predicate = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .unwrap();
        pretty_assertions::assert_eq!(parsed, Predicate::publish_gate());
    }
}
