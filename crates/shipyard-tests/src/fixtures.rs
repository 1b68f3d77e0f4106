//! Test fixtures for creating sample pipelines.
//!
//! Every fixture runs under plain `sh` so tests need nothing beyond a POSIX
//! shell on the host.

use shipyard_core::PipelineDefinition;

/// The release pipeline: verify on three platforms, build a native library
/// per platform, package it with the binding layer and publish behind a
/// gate. `FAIL_OS` names a platform whose verify step fails.
pub const RELEASE_PIPELINE: &str = r#"
name: native-release
triggers:
  - type: push
    branches: [main, "release/*"]
  - type: pull_request
    branches: [main]
  - type: release_created
    tags: ["v*"]
  - type: manual_dispatch
    inputs:
      publish:
        default: "false"
groups:
  - name: verify
    matrix:
      axes:
        - name: os
          values: [macos, windows, linux]
    steps:
      - name: test
        run: test "$MATRIX_OS" != "${FAIL_OS:-none}"

  - name: build-native
    depends_on: [verify]
    matrix:
      axes:
        - name: os
          values: [macos, windows, linux]
      include:
        - { os: macos, lib_filename: libnative.dylib }
        - { os: windows, lib_filename: native.dll }
        - { os: linux, lib_filename: libnative.so }
    steps:
      - name: compile
        run: printf 'native-%s' "$MATRIX_OS" > ${{ matrix.lib_filename }}
        produces:
          - name: native-lib
            path: ${{ matrix.lib_filename }}

  - name: package
    depends_on: [build-native]
    matrix:
      axes:
        - name: os
          values: [macos, windows, linux]
      include:
        - { os: macos, lib_filename: libnative.dylib }
        - { os: windows, lib_filename: native.dll }
        - { os: linux, lib_filename: libnative.so }
    steps:
      - name: fetch
        run: test -f wrappers/python/${{ matrix.lib_filename }}
        consumes:
          - group: build-native
            name: native-lib
            path: wrappers/python/${{ matrix.lib_filename }}
      - name: build-wheel
        run: cat wrappers/python/${{ matrix.lib_filename }} > package.whl
        produces:
          - name: wheel
            path: package.whl
      - name: test-wheel
        run: grep -q "native-$MATRIX_OS" package.whl
        continue_on_error: true
      - name: publish
        run: echo "uploaded as $TWINE_USERNAME"
        credentials: [TWINE_USERNAME, TWINE_PASSWORD]
        if:
          any:
            - event: release_created
            - all:
                - event: manual_dispatch
                - input: { name: publish, equals: "true" }
"#;

/// Factory for creating test pipelines.
pub struct PipelineFixture;

impl PipelineFixture {
    fn parse(yaml: &str) -> PipelineDefinition {
        match PipelineDefinition::from_yaml(yaml) {
            Ok(pipeline) => pipeline,
            Err(e) => panic!("fixture pipeline does not parse: {}", e),
        }
    }

    pub fn release() -> PipelineDefinition {
        Self::parse(RELEASE_PIPELINE)
    }

    /// The release pipeline with `build-native` made to depend on `package`.
    pub fn release_with_cycle() -> PipelineDefinition {
        let mut pipeline = Self::release();
        for group in &mut pipeline.groups {
            if group.name == "build-native" {
                group.depends_on.push("package".to_string());
            }
        }
        pipeline
    }

    /// Two independent producers feeding one consumer.
    pub fn fan_in() -> PipelineDefinition {
        Self::parse(
            r#"
name: fan-in
groups:
  - name: docs
    steps:
      - name: render
        run: echo docs > docs.txt
        produces:
          - { name: docs, path: docs.txt }
  - name: lib
    steps:
      - name: compile
        run: echo lib > lib.txt
        produces:
          - { name: lib, path: lib.txt }
  - name: bundle
    depends_on: [docs, lib]
    steps:
      - name: assemble
        run: cat docs.txt lib.txt > bundle.txt
        consumes:
          - { group: docs, name: docs, path: docs.txt }
          - { group: lib, name: lib, path: lib.txt }
        produces:
          - { name: bundle, path: bundle.txt }
"#,
        )
    }

    /// One matrix group whose `fail` instance exits immediately and whose
    /// other instances sleep for `sleep_seconds` across two steps.
    pub fn fail_fast(sleep_seconds: u32) -> PipelineDefinition {
        Self::parse(&format!(
            r#"
name: fail-fast
groups:
  - name: matrix
    fail_fast: true
    matrix:
      axes:
        - name: mode
          values: [fail, slow-a, slow-b]
    steps:
      - name: first
        run: if [ "$MATRIX_MODE" = fail ]; then exit 1; else sleep {sleep_seconds}; fi
      - name: second
        run: "true"
"#
        ))
    }

    /// A single group that sleeps before a second step.
    pub fn slow(sleep_seconds: u32) -> PipelineDefinition {
        Self::parse(&format!(
            r#"
name: slow
groups:
  - name: wait
    steps:
      - name: sleep
        run: sleep {sleep_seconds}
      - name: after
        run: "true"
"#
        ))
    }

    /// `width` independent groups of one instance each, for scheduling tests.
    pub fn wide(width: usize) -> PipelineDefinition {
        let mut yaml = String::from("name: wide\ngroups:\n");
        for i in 0..width {
            yaml.push_str(&format!(
                "  - name: g{i}\n    steps:\n      - {{ name: s, run: \"true\" }}\n"
            ));
        }
        Self::parse(&yaml)
    }
}
