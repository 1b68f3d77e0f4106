//! Matrix expansion for parallel job generation.

use shipyard_core::error::ConfigError;
use shipyard_core::ids::JobId;
use shipyard_core::pipeline::{JobGroupDefinition, MatrixConfig, matrix_value_string};
use shipyard_core::run::{JobInstance, MatrixBinding};
use std::collections::BTreeMap;

const DEFAULT_TIMEOUT_MINUTES: u32 = 60;

/// One combination before it becomes a [`JobInstance`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct Combination {
    binding: MatrixBinding,
    variables: BTreeMap<String, String>,
}

/// Expander for matrix configurations.
///
/// Expansion is a pure function of the group definition: the cartesian
/// product is built in axis declaration order (first axis varies slowest),
/// then `include` entries are merged or appended in the order written.
pub struct MatrixExpander {
    default_timeout_minutes: u32,
}

impl MatrixExpander {
    pub fn new() -> Self {
        Self {
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }

    /// Timeout applied to groups that do not set `timeout_minutes`.
    pub fn with_default_timeout(mut self, minutes: u32) -> Self {
        self.default_timeout_minutes = minutes;
        self
    }

    /// Expand a group into its ordered job instances.
    pub fn expand(&self, group: &JobGroupDefinition) -> Result<Vec<JobInstance>, ConfigError> {
        let combinations = match &group.matrix {
            None => vec![Combination {
                binding: MatrixBinding::empty(),
                variables: BTreeMap::new(),
            }],
            Some(matrix) => self.combinations(&group.name, matrix)?,
        };

        let timeout_seconds =
            u64::from(group.timeout_minutes.unwrap_or(self.default_timeout_minutes)) * 60;

        Ok(combinations
            .into_iter()
            .enumerate()
            .map(|(index, combo)| JobInstance {
                id: JobId::new(),
                group: group.name.clone(),
                index,
                display_name: self.format_display_name(&group.name, &combo.binding),
                binding: combo.binding,
                variables: combo.variables,
                timeout_seconds,
            })
            .collect())
    }

    fn combinations(
        &self,
        group: &str,
        matrix: &MatrixConfig,
    ) -> Result<Vec<Combination>, ConfigError> {
        if matrix.axes.is_empty() && matrix.include.is_empty() {
            return Err(ConfigError::EmptyMatrix(group.to_string()));
        }

        let mut axis_names: Vec<&str> = Vec::with_capacity(matrix.axes.len());
        for axis in &matrix.axes {
            if axis.values.is_empty() {
                return Err(ConfigError::EmptyMatrixAxis {
                    group: group.to_string(),
                    axis: axis.name.clone(),
                });
            }
            if axis_names.contains(&axis.name.as_str()) {
                return Err(ConfigError::InvalidPipeline(format!(
                    "group {} declares matrix axis {} twice",
                    group, axis.name
                )));
            }
            axis_names.push(&axis.name);
        }

        let mut result: Vec<Combination> = if matrix.axes.is_empty() {
            Vec::new()
        } else {
            let mut product = vec![MatrixBinding::empty()];
            for axis in &matrix.axes {
                let mut next = Vec::with_capacity(product.len() * axis.values.len());
                for binding in &product {
                    for value in &axis.values {
                        let mut extended = binding.clone();
                        extended.push(axis.name.clone(), matrix_value_string(value));
                        next.push(extended);
                    }
                }
                product = next;
            }
            product
                .into_iter()
                .map(|binding| Combination {
                    binding,
                    variables: BTreeMap::new(),
                })
                .collect()
        };
        self.ensure_unique(group, &result)?;

        for include in &matrix.include {
            let (binding, variables) = self.split_include(group, &axis_names, include)?;
            let names_every_axis = !axis_names.is_empty() && binding.len() == axis_names.len();

            match result.iter_mut().find(|c| c.binding == binding) {
                Some(existing) if names_every_axis => existing.variables.extend(variables),
                Some(_) => {
                    return Err(ConfigError::DuplicateCombination {
                        group: group.to_string(),
                        binding: binding.to_string(),
                    });
                }
                None => result.push(Combination { binding, variables }),
            }
        }

        Ok(result)
    }

    /// Separate an include entry into the axis binding and derived variables.
    /// Without declared axes, every key of the entry is part of the binding.
    fn split_include(
        &self,
        group: &str,
        axis_names: &[&str],
        include: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(MatrixBinding, BTreeMap<String, String>), ConfigError> {
        if include.is_empty() {
            return Err(ConfigError::InvalidInclude {
                group: group.to_string(),
                message: "include entry is empty".to_string(),
            });
        }

        if axis_names.is_empty() {
            let binding = MatrixBinding::from_pairs(
                include.iter().map(|(k, v)| (k.clone(), matrix_value_string(v))),
            );
            return Ok((binding, BTreeMap::new()));
        }

        let mut binding = MatrixBinding::empty();
        for axis in axis_names {
            if let Some(value) = include.get(*axis) {
                binding.push(*axis, matrix_value_string(value));
            }
        }
        if binding.is_empty() {
            return Err(ConfigError::InvalidInclude {
                group: group.to_string(),
                message: format!("entry names none of the axes {}", axis_names.join(", ")),
            });
        }

        let variables = include
            .iter()
            .filter(|(k, _)| !axis_names.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), matrix_value_string(v)))
            .collect();

        Ok((binding, variables))
    }

    fn ensure_unique(&self, group: &str, combos: &[Combination]) -> Result<(), ConfigError> {
        for (i, combo) in combos.iter().enumerate() {
            if combos[..i].iter().any(|c| c.binding == combo.binding) {
                return Err(ConfigError::DuplicateCombination {
                    group: group.to_string(),
                    binding: combo.binding.to_string(),
                });
            }
        }
        Ok(())
    }

    fn format_display_name(&self, group: &str, binding: &MatrixBinding) -> String {
        if binding.is_empty() {
            return group.to_string();
        }
        format!("{} ({})", group, binding)
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shipyard_core::pipeline::{MatrixAxis, StepDefinition};

    fn group(matrix: Option<MatrixConfig>) -> JobGroupDefinition {
        JobGroupDefinition {
            name: "build".to_string(),
            display_name: None,
            depends_on: vec![],
            condition: None,
            env: Default::default(),
            steps: vec![StepDefinition::new("compile", "make")],
            matrix,
            timeout_minutes: None,
            fail_fast: false,
        }
    }

    fn axis(name: &str, values: serde_json::Value) -> MatrixAxis {
        MatrixAxis {
            name: name.to_string(),
            values: values.as_array().cloned().unwrap_or_default(),
        }
    }

    fn matrix(axes: Vec<MatrixAxis>, include: Vec<serde_json::Value>) -> MatrixConfig {
        MatrixConfig {
            axes,
            include: include
                .into_iter()
                .map(|v| serde_json::from_value(v).unwrap())
                .collect(),
            fail_fast: false,
            max_parallel: None,
        }
    }

    fn bindings(instances: &[JobInstance]) -> Vec<String> {
        instances.iter().map(|i| i.binding.to_string()).collect()
    }

    #[test]
    fn test_no_matrix_single_instance() {
        let instances = MatrixExpander::new().expand(&group(None)).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(instances[0].binding.is_empty());
        assert_eq!(instances[0].display_name, "build");
        assert_eq!(instances[0].timeout_seconds, 3600);
    }

    #[test]
    fn test_cartesian_product_order() {
        let m = matrix(
            vec![
                axis("os", serde_json::json!(["linux", "macos"])),
                axis("version", serde_json::json!(["18", 20, "22"])),
            ],
            vec![],
        );
        let instances = MatrixExpander::new().expand(&group(Some(m))).unwrap();

        assert_eq!(
            bindings(&instances),
            vec![
                "os=linux, version=18",
                "os=linux, version=20",
                "os=linux, version=22",
                "os=macos, version=18",
                "os=macos, version=20",
                "os=macos, version=22",
            ]
        );
        assert_eq!(instances[4].index, 4);
        assert_eq!(instances[4].display_name, "build (os=macos, version=20)");
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let m = matrix(
            vec![axis("os", serde_json::json!(["macos", "windows", "linux"]))],
            vec![serde_json::json!({"os": "linux", "lib": "libx.so"})],
        );
        let g = group(Some(m));
        let expander = MatrixExpander::new();

        let first = expander.expand(&g).unwrap();
        let second = expander.expand(&g).unwrap();
        let strip = |v: &[JobInstance]| {
            v.iter()
                .map(|i| (i.index, i.binding.clone(), i.variables.clone(), i.display_name.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn test_include_merges_into_full_match() {
        let m = matrix(
            vec![axis("os", serde_json::json!(["macos", "linux"]))],
            vec![
                serde_json::json!({
                    "os": "macos",
                    "lib_filename": "lib.dylib",
                    "toolchain": "stable"
                }),
                serde_json::json!({"os": "linux", "lib_filename": "lib.so"}),
            ],
        );
        let instances = MatrixExpander::new().expand(&group(Some(m))).unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[0].variables.get("lib_filename").map(String::as_str),
            Some("lib.dylib")
        );
        assert_eq!(
            instances[0].variables.get("toolchain").map(String::as_str),
            Some("stable")
        );
        assert_eq!(
            instances[1].matrix_values().get("os").map(String::as_str),
            Some("linux")
        );
    }

    #[test]
    fn test_include_appends_new_or_partial_combination() {
        let m = matrix(
            vec![
                axis("os", serde_json::json!(["linux"])),
                axis("toolchain", serde_json::json!(["stable"])),
            ],
            vec![
                serde_json::json!({"os": "windows", "toolchain": "nightly"}),
                serde_json::json!({"os": "linux", "experimental": true}),
            ],
        );
        let instances = MatrixExpander::new().expand(&group(Some(m))).unwrap();

        assert_eq!(
            bindings(&instances),
            vec!["os=linux, toolchain=stable", "os=windows, toolchain=nightly", "os=linux"]
        );
        assert_eq!(
            instances[2].variables.get("experimental").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_include_only_matrix() {
        let m = matrix(
            vec![],
            vec![serde_json::json!({"os": "linux"}), serde_json::json!({"os": "macos"})],
        );
        let instances = MatrixExpander::new().expand(&group(Some(m))).unwrap();
        assert_eq!(bindings(&instances), vec!["os=linux", "os=macos"]);
    }

    #[test]
    fn test_empty_axis_rejected() {
        let m = matrix(vec![axis("os", serde_json::json!([]))], vec![]);
        let err = MatrixExpander::new().expand(&group(Some(m))).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyMatrixAxis {
                group: "build".into(),
                axis: "os".into()
            }
        );
    }

    #[test]
    fn test_empty_matrix_rejected() {
        let err = MatrixExpander::new()
            .expand(&group(Some(matrix(vec![], vec![]))))
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptyMatrix("build".into()));
    }

    #[test]
    fn test_include_without_axis_rejected() {
        let m = matrix(
            vec![axis("os", serde_json::json!(["linux"]))],
            vec![serde_json::json!({"lib": "x"})],
        );
        let err = MatrixExpander::new().expand(&group(Some(m))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInclude { .. }));
    }

    #[test]
    fn test_duplicate_values_rejected() {
        let m = matrix(vec![axis("os", serde_json::json!(["linux", "linux"]))], vec![]);
        let err = MatrixExpander::new().expand(&group(Some(m))).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateCombination {
                group: "build".into(),
                binding: "os=linux".into()
            }
        );
    }

    #[test]
    fn test_group_timeout_overrides_default() {
        let mut g = group(None);
        g.timeout_minutes = Some(2);
        let instances = MatrixExpander::new().with_default_timeout(30).expand(&g).unwrap();
        assert_eq!(instances[0].timeout_seconds, 120);

        let instances = MatrixExpander::new()
            .with_default_timeout(30)
            .expand(&group(None))
            .unwrap();
        assert_eq!(instances[0].timeout_seconds, 1800);
    }
}
