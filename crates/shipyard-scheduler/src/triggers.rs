//! Trigger matching and evaluation.

use serde::Serialize;
use shipyard_core::event::TriggerEvent;
use shipyard_core::pipeline::{EventKind, PipelineDefinition, TriggerConfig};
use std::collections::BTreeMap;
use tracing::debug;

/// Input name that release events pre-satisfy.
pub const PUBLISH_INPUT: &str = "publish";

/// Whether a run starts, and the metadata it starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDecision {
    pub start: bool,
    /// `event.kind`, `event.ref` and `inputs.<name>` entries.
    pub bindings: BTreeMap<String, String>,
    /// Why the event was rejected, when `start` is false.
    pub reason: Option<String>,
}

impl RunDecision {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            start: false,
            bindings: BTreeMap::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether an event starts a run of a pipeline.
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an event against the pipeline's triggers. A pipeline without
    /// triggers accepts every event kind.
    pub fn evaluate(&self, pipeline: &PipelineDefinition, event: &TriggerEvent) -> RunDecision {
        let trigger = if pipeline.triggers.is_empty() {
            None
        } else {
            let candidates: Vec<&TriggerConfig> = pipeline
                .triggers
                .iter()
                .filter(|t| t.kind == event.kind())
                .collect();
            if candidates.is_empty() {
                return RunDecision::reject(format!(
                    "pipeline has no {} trigger",
                    event.kind()
                ));
            }
            match candidates.into_iter().find(|t| self.filters_match(t, event)) {
                Some(t) => Some(t),
                None => {
                    return RunDecision::reject(format!(
                        "{} ref {} does not match any trigger filter",
                        event.kind(),
                        event.git_ref().unwrap_or("<none>")
                    ));
                }
            }
        };

        let mut bindings = BTreeMap::new();
        bindings.insert("event.kind".to_string(), event.kind().to_string());
        if let Some(git_ref) = event.git_ref() {
            bindings.insert("event.ref".to_string(), git_ref.to_string());
        }

        if let Some(trigger) = trigger {
            for (name, input) in &trigger.inputs {
                match (event.input(name), &input.default) {
                    (Some(value), _) => {
                        bindings.insert(format!("inputs.{}", name), value.to_string());
                    }
                    (None, Some(default)) => {
                        bindings.insert(format!("inputs.{}", name), default.clone());
                    }
                    (None, None) if input.required => {
                        return RunDecision::reject(format!("required input {} not provided", name));
                    }
                    (None, None) => {}
                }
            }
        }
        for (name, value) in event.inputs() {
            bindings
                .entry(format!("inputs.{}", name))
                .or_insert_with(|| value.clone());
        }

        if event.kind() == EventKind::ReleaseCreated {
            bindings.insert(format!("inputs.{}", PUBLISH_INPUT), "true".to_string());
        }

        debug!(
            pipeline = %pipeline.name,
            event = %event.kind(),
            bindings = bindings.len(),
            "Trigger accepted"
        );

        RunDecision {
            start: true,
            bindings,
            reason: None,
        }
    }

    fn filters_match(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        let git_ref = event.git_ref().unwrap_or_default();
        match event.kind() {
            EventKind::Push | EventKind::PullRequest => {
                self.branch_matches(&trigger.branches, git_ref)
            }
            EventKind::ReleaseCreated => self.tag_matches(&trigger.tags, git_ref),
            EventKind::ManualDispatch => true,
        }
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn tag_matches(&self, patterns: &[String], tag: &str) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|p| self.glob_match(p, tag))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text == prefix
                || text
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let prefix_slash = format!("{}/", prefix);
            if text.starts_with(&prefix_slash) {
                return !text[prefix_slash.len()..].contains('/');
            }
            return false;
        }
        if pattern.contains('*') {
            let parts: Vec<&str> = pattern.split('*').collect();
            if parts.len() == 2 {
                return text.len() >= parts[0].len() + parts[1].len()
                    && text.starts_with(parts[0])
                    && text.ends_with(parts[1]);
            }
        }
        pattern == text
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::InputDefinition;

    fn pipeline(yaml_triggers: &str) -> PipelineDefinition {
        const GROUPS: &str = "groups:\n  - name: g\n    steps:\n      - { name: s, run: 'true' }\n";
        let yaml = format!("name: p\ntriggers:\n{}\n{}", yaml_triggers, GROUPS);
        PipelineDefinition::from_yaml(&yaml).unwrap()
    }

    fn release_pipeline() -> PipelineDefinition {
        pipeline(
            r#"  - type: push
    branches: [main, "release/*"]
  - type: pull_request
  - type: release_created
    tags: ["v*"]
  - type: manual_dispatch
    inputs:
      publish:
        default: "false""#,
        )
    }

    #[test]
    fn test_branch_match_glob() {
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator.branch_matches(&["main".to_string()], "main"));
        assert!(!evaluator.branch_matches(&["main".to_string()], "develop"));
        assert!(evaluator.branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(evaluator.branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
        assert!(evaluator.branch_matches(&[], "any-branch"));
    }

    #[test]
    fn test_double_star_stays_under_its_directory() {
        let evaluator = TriggerEvaluator::new();
        let patterns = ["release/**".to_string()];
        assert!(evaluator.branch_matches(&patterns, "release"));
        assert!(evaluator.branch_matches(&patterns, "release/1.4"));
        assert!(!evaluator.branch_matches(&patterns, "release-candidate"));
        assert!(!evaluator.branch_matches(&patterns, "releases"));
    }

    #[test]
    fn test_star_prefix_and_suffix_do_not_overlap() {
        let evaluator = TriggerEvaluator::new();
        assert!(!evaluator.glob_match("a*a", "a"));
        assert!(evaluator.glob_match("a*a", "aa"));
        assert!(evaluator.glob_match("v*.0", "v1.4.0"));
        assert!(!evaluator.tag_matches(&["v*v".to_string()], "v"));
    }

    #[test]
    fn test_push_to_lookalike_branch_is_rejected() {
        let pipeline = pipeline("  - type: push\n    branches: [\"release/**\"]");
        let evaluator = TriggerEvaluator::new();
        assert!(
            !evaluator
                .evaluate(&pipeline, &TriggerEvent::push("release-candidate"))
                .start
        );
        assert!(
            evaluator
                .evaluate(&pipeline, &TriggerEvent::push("release/2.0"))
                .start
        );
    }

    #[test]
    fn test_push_starts_with_bindings() {
        let decision =
            TriggerEvaluator::new().evaluate(&release_pipeline(), &TriggerEvent::push("main"));
        assert!(decision.start);
        assert_eq!(decision.bindings.get("event.kind").map(String::as_str), Some("push"));
        assert_eq!(decision.bindings.get("event.ref").map(String::as_str), Some("main"));
        assert!(!decision.bindings.contains_key("inputs.publish"));
    }

    #[test]
    fn test_push_to_unmatched_branch_is_rejected() {
        let decision =
            TriggerEvaluator::new().evaluate(&release_pipeline(), &TriggerEvent::push("feature/x"));
        assert!(!decision.start);
        assert!(decision.reason.unwrap().contains("feature/x"));
    }

    #[test]
    fn test_pull_request_always_starts() {
        let decision = TriggerEvaluator::new()
            .evaluate(&release_pipeline(), &TriggerEvent::pull_request("anything"));
        assert!(decision.start);
    }

    #[test]
    fn test_release_pre_satisfies_publish() {
        let decision =
            TriggerEvaluator::new().evaluate(&release_pipeline(), &TriggerEvent::release("v1.2.0"));
        assert!(decision.start);
        assert_eq!(decision.bindings.get("inputs.publish").map(String::as_str), Some("true"));

        let rejected = TriggerEvaluator::new()
            .evaluate(&release_pipeline(), &TriggerEvent::release("nightly"));
        assert!(!rejected.start);
    }

    #[test]
    fn test_manual_dispatch_input_defaults() {
        let evaluator = TriggerEvaluator::new();
        let defaulted = evaluator.evaluate(&release_pipeline(), &TriggerEvent::manual_dispatch());
        assert_eq!(defaulted.bindings.get("inputs.publish").map(String::as_str), Some("false"));

        let explicit = evaluator.evaluate(
            &release_pipeline(),
            &TriggerEvent::manual_dispatch().with_input("publish", "true"),
        );
        assert_eq!(explicit.bindings.get("inputs.publish").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_required_input_missing() {
        let mut p = release_pipeline();
        p.triggers[3].inputs.insert(
            "version".to_string(),
            InputDefinition {
                description: None,
                default: None,
                required: true,
            },
        );
        let decision = TriggerEvaluator::new().evaluate(&p, &TriggerEvent::manual_dispatch());
        assert!(!decision.start);
        assert_eq!(
            decision.reason.as_deref(),
            Some("required input version not provided")
        );
    }

    #[test]
    fn test_no_triggers_accepts_everything() {
        let mut p = release_pipeline();
        p.triggers.clear();
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator.evaluate(&p, &TriggerEvent::push("x")).start);
        assert!(evaluator.evaluate(&p, &TriggerEvent::release("x")).start);
    }

    #[test]
    fn test_missing_kind_rejected() {
        let p = pipeline("  - type: push");
        let decision = TriggerEvaluator::new().evaluate(&p, &TriggerEvent::manual_dispatch());
        assert!(!decision.start);
    }
}
