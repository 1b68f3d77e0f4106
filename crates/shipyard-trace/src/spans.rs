//! Span creation for pipeline operations.

use tracing::{Level, Span, span};

/// Span attributes shared by run, group, job and step spans.
#[derive(Debug, Clone, Default)]
pub struct CiAttributes {
    pub pipeline_name: Option<String>,
    pub run_id: Option<String>,
    pub event: Option<String>,
    pub git_ref: Option<String>,
    pub group_name: Option<String>,
    pub job_id: Option<String>,
    pub binding: Option<String>,
    pub step_name: Option<String>,
}

impl CiAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = Some(name.into());
        self
    }

    pub fn run(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    pub fn event(mut self, kind: impl Into<String>, git_ref: Option<&str>) -> Self {
        self.event = Some(kind.into());
        self.git_ref = git_ref.map(str::to_string);
        self
    }

    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }

    pub fn job(mut self, id: impl Into<String>, binding: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self.binding = Some(binding.into());
        self
    }

    pub fn step(mut self, name: impl Into<String>) -> Self {
        self.step_name = Some(name.into());
        self
    }
}

/// Create a span for a pipeline run.
pub fn run_span(attrs: &CiAttributes) -> Span {
    span!(
        Level::INFO,
        "run.execute",
        ci.pipeline.name = attrs.pipeline_name.as_deref().unwrap_or(""),
        ci.run.id = attrs.run_id.as_deref().unwrap_or(""),
        ci.event = attrs.event.as_deref().unwrap_or(""),
        vcs.ref = attrs.git_ref.as_deref().unwrap_or(""),
    )
}

/// Create a span for a job group.
pub fn group_span(attrs: &CiAttributes) -> Span {
    span!(
        Level::INFO,
        "group.execute",
        ci.run.id = attrs.run_id.as_deref().unwrap_or(""),
        ci.group.name = attrs.group_name.as_deref().unwrap_or(""),
    )
}

/// Create a span for one job instance.
pub fn job_span(attrs: &CiAttributes) -> Span {
    span!(
        Level::INFO,
        "job.execute",
        ci.run.id = attrs.run_id.as_deref().unwrap_or(""),
        ci.group.name = attrs.group_name.as_deref().unwrap_or(""),
        ci.job.id = attrs.job_id.as_deref().unwrap_or(""),
        ci.job.binding = attrs.binding.as_deref().unwrap_or(""),
    )
}

/// Create a span for a step.
pub fn step_span(attrs: &CiAttributes) -> Span {
    span!(
        Level::INFO,
        "step.execute",
        ci.group.name = attrs.group_name.as_deref().unwrap_or(""),
        ci.job.binding = attrs.binding.as_deref().unwrap_or(""),
        ci.step.name = attrs.step_name.as_deref().unwrap_or(""),
    )
}

/// Create a span for artifact store operations.
pub fn artifact_span(operation: &str, key: &str) -> Span {
    span!(
        Level::DEBUG,
        "artifact.operation",
        operation = operation,
        artifact.key = key,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_attributes_builder() {
        let attrs = CiAttributes::new()
            .pipeline("native-release")
            .run("run_456")
            .event("push", Some("main"))
            .group("build-native")
            .job("job_1", "os=linux")
            .step("compile");

        assert_eq!(attrs.pipeline_name.as_deref(), Some("native-release"));
        assert_eq!(attrs.git_ref.as_deref(), Some("main"));
        assert_eq!(attrs.binding.as_deref(), Some("os=linux"));
        assert_eq!(attrs.step_name.as_deref(), Some("compile"));
    }

    #[test]
    fn test_spans_without_subscriber_are_disabled() {
        let attrs = CiAttributes::new().group("verify");
        assert!(group_span(&attrs).is_disabled());
        assert!(artifact_span("put", "verify/report").is_disabled());
    }
}
