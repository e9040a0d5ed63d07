//! Job document parsing.
//!
//! A job document binds a pipeline to defaults and triggers:
//!
//! ```yaml
//! id: nightly-build        # optional, generated at registration
//! name: nightly-build
//! repository: https://github.com/acme/app.git
//! schedule: "0 2 * * *"
//! branches: [main]
//! parameters:
//!   PROFILE: release
//! pipeline:
//!   name: build
//!   stages:
//!     - name: build
//!       run: make
//! ```

use crate::pipeline::{parse_pipeline_value, scalar_string};
use crate::{ConfigError, ConfigResult};
use minici_core::job::JobDefinition;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::Path;

/// Parse a job definition from YAML text.
pub fn parse_job(yaml: &str) -> ConfigResult<JobDefinition> {
    let doc: Value = serde_yaml::from_str(yaml)?;
    let root = doc
        .as_mapping()
        .ok_or_else(|| ConfigError::invalid("job", "expected a mapping"))?;

    let name = optional_string(root, "name")?
        .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;

    let pipeline = root
        .get("pipeline")
        .ok_or_else(|| ConfigError::MissingField(format!("pipeline for job '{}'", name)))?;
    let pipeline = parse_pipeline_value(pipeline)?;

    let parameters = match root.get("parameters") {
        None | Some(Value::Null) => HashMap::new(),
        Some(Value::Mapping(entries)) => entries
            .iter()
            .map(|(k, v)| {
                let key = k
                    .as_str()
                    .ok_or_else(|| ConfigError::invalid("parameters", "keys must be strings"))?;
                Ok((key.to_string(), scalar_string(v, &format!("parameters.{}", key))?))
            })
            .collect::<ConfigResult<HashMap<_, _>>>()?,
        Some(_) => return Err(ConfigError::invalid("parameters", "expected a mapping")),
    };

    let branches = match root.get("branches") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|v| scalar_string(v, "branches"))
            .collect::<ConfigResult<Vec<_>>>()?,
        Some(value) => vec![scalar_string(value, "branches")?],
    };

    Ok(JobDefinition {
        id: optional_string(root, "id")?,
        name,
        pipeline,
        parameters,
        schedule_cron: optional_string(root, "schedule")?,
        repository: optional_string(root, "repository")?,
        branches,
    })
}

/// Load every `*.yaml` / `*.yml` job document in a directory, sorted by file name.
pub fn load_jobs_dir(dir: &Path) -> ConfigResult<Vec<JobDefinition>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)?;
            parse_job(&content).map_err(|e| {
                ConfigError::invalid(path.display().to_string(), e.to_string())
            })
        })
        .collect()
}

fn optional_string(map: &Mapping, key: &str) -> ConfigResult<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let s = scalar_string(value, key)?;
            Ok(if s.trim().is_empty() { None } else { Some(s) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
id: nightly
name: nightly-build
repository: https://example.com/app.git
schedule: "0 2 * * *"
branches: [main, release]
parameters:
  PROFILE: release
  JOBS: 4
pipeline:
  name: build
  stages:
    - name: build
      run: make
    - name: test
      run: make test
"#;

    #[test]
    fn test_parse_full_job() {
        let job = parse_job(JOB).unwrap();
        assert_eq!(job.id.as_deref(), Some("nightly"));
        assert_eq!(job.name, "nightly-build");
        assert_eq!(job.repository.as_deref(), Some("https://example.com/app.git"));
        assert_eq!(job.schedule_cron.as_deref(), Some("0 2 * * *"));
        assert_eq!(job.branches, vec!["main", "release"]);
        assert_eq!(job.parameters["JOBS"], "4");
        assert_eq!(job.pipeline.stages.len(), 2);
    }

    #[test]
    fn test_minimal_job() {
        let yaml = r#"
name: adhoc
pipeline:
  name: adhoc
  stages:
    - name: hello
      run: echo hello
"#;

        let job = parse_job(yaml).unwrap();
        assert!(job.id.is_none());
        assert!(job.schedule_cron.is_none());
        assert!(job.parameters.is_empty());
        assert!(job.branches.is_empty());
    }

    #[test]
    fn test_invalid_pipeline_rejects_job() {
        let yaml = r#"
name: broken
pipeline:
  name: broken
  stages:
    - name: no-command
"#;

        assert!(matches!(parse_job(yaml), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_missing_pipeline_rejects_job() {
        assert!(matches!(
            parse_job("name: lonely\n"),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_load_jobs_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), JOB).unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "name: first\npipeline:\n  name: p\n  stages:\n    - name: s\n      run: 'true'\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let jobs = load_jobs_dir(dir.path()).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["first", "nightly-build"]);
    }
}
