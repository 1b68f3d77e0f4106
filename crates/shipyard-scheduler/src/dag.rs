//! DAG resolution for job groups.

use crate::matrix::MatrixExpander;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use shipyard_core::error::ConfigError;
use shipyard_core::pipeline::{JobGroupDefinition, PipelineDefinition};
use shipyard_core::run::JobInstance;
use std::collections::HashMap;

/// A node in the job graph: a group and its expanded instances.
#[derive(Debug, Clone)]
pub struct GroupNode {
    pub name: String,
    pub definition: JobGroupDefinition,
    pub instances: Vec<JobInstance>,
}

impl GroupNode {
    /// Axes this group's instances are bound over, in declaration order.
    pub fn axes(&self) -> Vec<&str> {
        self.definition
            .matrix
            .as_ref()
            .map(|m| m.axes.iter().map(|a| a.name.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Directed acyclic graph of job groups. Edges point from a dependency to
/// its dependents.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<GroupNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl JobGraph {
    /// Groups with no dependencies.
    pub fn roots(&self) -> Vec<&GroupNode> {
        self.order
            .iter()
            .filter(|&&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|&idx| &self.graph[idx])
            .collect()
    }

    /// Groups that directly depend on `name`.
    pub fn successors(&self, name: &str) -> Vec<&GroupNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .map(|n| &self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Groups `name` directly depends on.
    pub fn predecessors(&self, name: &str) -> Vec<&GroupNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .map(|n| &self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn group(&self, name: &str) -> Option<&GroupNode> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Groups in a stable topological order: dependencies first, ties broken
    /// by declaration order.
    pub fn topological_order(&self) -> Vec<&GroupNode> {
        self.order.iter().map(|&idx| &self.graph[idx]).collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Total number of job instances across all groups.
    pub fn instance_count(&self) -> usize {
        self.graph.node_weights().map(|n| n.instances.len()).sum()
    }
}

/// Builder for constructing job graphs. All structural validation happens
/// here, before any instance is scheduled.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a graph from a pipeline definition.
    pub fn build(&self, pipeline: &PipelineDefinition) -> Result<JobGraph, ConfigError> {
        if pipeline.groups.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let expander = MatrixExpander::new().with_default_timeout(pipeline.timeout_minutes);

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for group in &pipeline.groups {
            if name_to_index.contains_key(&group.name) {
                return Err(ConfigError::DuplicateGroup(group.name.clone()));
            }
            if group.steps.is_empty() {
                return Err(ConfigError::InvalidPipeline(format!(
                    "group {} declares no steps",
                    group.name
                )));
            }
            let node = GroupNode {
                name: group.name.clone(),
                definition: group.clone(),
                instances: expander.expand(group)?,
            };
            let idx = graph.add_node(node);
            name_to_index.insert(group.name.clone(), idx);
        }

        for group in &pipeline.groups {
            let group_idx = name_to_index[&group.name];
            for dep in &group.depends_on {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| {
                    ConfigError::UnknownDependency {
                        group: group.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                if graph.find_edge(*dep_idx, group_idx).is_none() {
                    graph.add_edge(*dep_idx, group_idx, ());
                }
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ConfigError::CycleDetected(cycle_members(&graph)));
        }

        let order = stable_order(&graph);

        Ok(JobGraph {
            graph,
            name_to_index,
            order,
        })
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Names of every group that sits on a cycle, in declaration order.
fn cycle_members(graph: &DiGraph<GroupNode, ()>) -> Vec<String> {
    let mut members: Vec<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some())
        .flatten()
        .collect();
    members.sort();
    members.into_iter().map(|idx| graph[idx].name.clone()).collect()
}

/// Kahn's algorithm, always taking the earliest-declared ready group.
fn stable_order(graph: &DiGraph<GroupNode, ()>) -> Vec<NodeIndex> {
    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| {
            (
                idx,
                graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count(),
            )
        })
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(next) = graph
        .node_indices()
        .filter(|idx| pending.get(idx) == Some(&0))
        .min()
    {
        pending.remove(&next);
        for succ in graph.neighbors_directed(next, petgraph::Direction::Outgoing) {
            if let Some(count) = pending.get_mut(&succ) {
                *count -= 1;
            }
        }
        order.push(next);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::StepDefinition;

    fn make_group(name: &str, depends_on: Vec<&str>) -> JobGroupDefinition {
        JobGroupDefinition {
            name: name.to_string(),
            display_name: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            condition: None,
            env: Default::default(),
            steps: vec![StepDefinition::new("run", "true")],
            matrix: None,
            timeout_minutes: None,
            fail_fast: false,
        }
    }

    fn make_pipeline(groups: Vec<JobGroupDefinition>) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".to_string(),
            version: "1".to_string(),
            description: None,
            triggers: vec![],
            variables: Default::default(),
            groups,
            timeout_minutes: 60,
            concurrency: None,
        }
    }

    fn names(nodes: Vec<&GroupNode>) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_linear_dag() {
        let pipeline = make_pipeline(vec![
            make_group("verify", vec![]),
            make_group("build", vec!["verify"]),
            make_group("package", vec!["build"]),
        ]);

        let dag = DagBuilder::new().build(&pipeline).unwrap();

        assert_eq!(names(dag.roots()), vec!["verify"]);
        assert_eq!(names(dag.topological_order()), vec!["verify", "build", "package"]);
        assert_eq!(dag.instance_count(), 3);
    }

    #[test]
    fn test_fan_out_fan_in() {
        let pipeline = make_pipeline(vec![
            make_group("deploy", vec!["test-unit", "test-integration"]),
            make_group("build", vec![]),
            make_group("test-unit", vec!["build"]),
            make_group("test-integration", vec!["build"]),
        ]);

        let dag = DagBuilder::new().build(&pipeline).unwrap();

        assert_eq!(dag.successors("build").len(), 2);
        assert_eq!(dag.predecessors("deploy").len(), 2);
        assert_eq!(
            names(dag.topological_order()),
            vec!["build", "test-unit", "test-integration", "deploy"]
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let pipeline = make_pipeline(vec![
            make_group("setup", vec![]),
            make_group("a", vec!["setup", "b"]),
            make_group("b", vec!["a"]),
        ]);

        let err = DagBuilder::new().build(&pipeline).unwrap_err();
        assert_eq!(err, ConfigError::CycleDetected(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let pipeline = make_pipeline(vec![make_group("a", vec!["a"])]);
        let err = DagBuilder::new().build(&pipeline).unwrap_err();
        assert_eq!(err, ConfigError::CycleDetected(vec!["a".into()]));
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let pipeline = make_pipeline(vec![make_group("a", vec![]), make_group("a", vec![])]);
        let err = DagBuilder::new().build(&pipeline).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateGroup("a".into()));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let pipeline = make_pipeline(vec![make_group("a", vec!["ghost"])]);
        let err = DagBuilder::new().build(&pipeline).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownDependency {
                group: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = DagBuilder::new().build(&make_pipeline(vec![])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyPipeline);
    }

    #[test]
    fn test_pipeline_timeout_flows_to_instances() {
        let mut pipeline = make_pipeline(vec![make_group("a", vec![])]);
        pipeline.timeout_minutes = 5;
        let dag = DagBuilder::new().build(&pipeline).unwrap();
        assert_eq!(dag.group("a").unwrap().instances[0].timeout_seconds, 300);
    }
}
