#[cfg(test)]
mod tests {
    use crate::config::{CliConfig, OutputFormat};
    use pretty_assertions::assert_eq;
    use shipyard_trace::LogFormat;
    use std::path::PathBuf;

    #[test]
    fn test_set_known_keys() {
        let mut config = CliConfig::default();
        config.set("work_dir", "/tmp/work").unwrap();
        config.set("artifact_dir", "/tmp/artifacts").unwrap();
        config.set("max_runners", "8").unwrap();
        config.set("output_format", "json").unwrap();
        config.set("log_format", "json").unwrap();

        assert_eq!(config.work_dir(), PathBuf::from("/tmp/work"));
        assert_eq!(config.artifact_dir(), PathBuf::from("/tmp/artifacts"));
        assert_eq!(config.max_runners, Some(8));
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = CliConfig::default();
        assert!(config.set("max_runners", "0").is_err());
        assert!(config.set("max_runners", "many").is_err());
        assert!(config.set("output_format", "xml").is_err());
        assert!(config.set("api_url", "http://localhost").is_err());
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");

        let mut config = CliConfig::default();
        config.set("max_runners", "2").unwrap();
        config.set("output_format", "yaml").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(CliConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.output_format, OutputFormat::Table);
    }
}
