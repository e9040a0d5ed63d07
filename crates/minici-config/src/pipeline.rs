//! Pipeline document parsing.
//!
//! A pipeline is a YAML document:
//!
//! ```yaml
//! name: my-service
//! agent: local
//! stages:
//!   - name: build
//!     run: cargo build --release
//!   - name: test
//!     run: cargo test
//!     env:
//!       RUST_BACKTRACE: "1"
//!     timeout: 300
//! ```

use crate::{ConfigError, ConfigResult};
use minici_core::pipeline::{DEFAULT_AGENT, PipelineDefinition, Stage};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Parse a pipeline definition from YAML text.
pub fn parse_pipeline(yaml: &str) -> ConfigResult<PipelineDefinition> {
    let doc: Value = serde_yaml::from_str(yaml)?;
    parse_pipeline_value(&doc)
}

/// Parse a pipeline definition from an already-loaded YAML value.
pub(crate) fn parse_pipeline_value(doc: &Value) -> ConfigResult<PipelineDefinition> {
    let root = doc.as_mapping().ok_or_else(|| {
        ConfigError::invalid("pipeline", "expected a mapping with 'name' and 'stages'")
    })?;

    let name = required_string(root, "name", "pipeline name")?;

    let agent_label = match root.get("agent") {
        None | Some(Value::Null) => DEFAULT_AGENT.to_string(),
        Some(value) => non_empty(scalar_string(value, "agent")?, "agent")?,
    };

    let stages_raw = root
        .get("stages")
        .ok_or_else(|| ConfigError::MissingField("stages".to_string()))?;
    let stages_raw = stages_raw
        .as_sequence()
        .ok_or_else(|| ConfigError::invalid("stages", "expected a list of stages"))?;

    if stages_raw.is_empty() {
        return Err(ConfigError::invalid("stages", "pipeline has no stages"));
    }

    let stages = stages_raw
        .iter()
        .enumerate()
        .map(|(index, node)| parse_stage(index, node))
        .collect::<ConfigResult<Vec<_>>>()?;

    Ok(PipelineDefinition {
        name,
        agent_label,
        stages,
    })
}

fn parse_stage(index: usize, node: &Value) -> ConfigResult<Stage> {
    let map = node
        .as_mapping()
        .ok_or_else(|| ConfigError::invalid(format!("stages[{}]", index), "expected a mapping"))?;

    let name = required_string(map, "name", &format!("name for stage {}", index))?;
    let command = required_string(map, "run", &format!("run for stage '{}'", name))?;

    let env = match map.get("env") {
        None | Some(Value::Null) => HashMap::new(),
        Some(Value::Mapping(entries)) => parse_env(&name, entries)?,
        Some(_) => {
            return Err(ConfigError::invalid(
                format!("env for stage '{}'", name),
                "expected a mapping",
            ));
        }
    };

    let timeout = match map.get("timeout") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_timeout(&name, value)?),
    };

    Ok(Stage {
        name,
        command,
        env,
        timeout,
    })
}

fn parse_env(stage: &str, entries: &Mapping) -> ConfigResult<HashMap<String, String>> {
    let field = format!("env for stage '{}'", stage);
    let mut env = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::invalid(&field, "keys must be strings"))?;
        let value = scalar_string(value, &format!("{}.{}", field, key))?;
        env.insert(key.to_string(), value);
    }
    Ok(env)
}

fn parse_timeout(stage: &str, value: &Value) -> ConfigResult<Duration> {
    let field = format!("timeout for stage '{}'", stage);
    match value.as_u64() {
        Some(0) => Err(ConfigError::invalid(field, "must be greater than zero")),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Err(ConfigError::invalid(field, "expected a number of seconds")),
    }
}

// Helper functions for extracting values from YAML nodes

fn required_string(map: &Mapping, key: &str, description: &str) -> ConfigResult<String> {
    match map.get(key) {
        None | Some(Value::Null) => Err(ConfigError::MissingField(description.to_string())),
        Some(value) => non_empty(scalar_string(value, description)?, description),
    }
}

fn non_empty(value: String, description: &str) -> ConfigResult<String> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(description.to_string()))
    } else {
        Ok(value)
    }
}

/// Render a scalar node as a string. Numbers and booleans are accepted so
/// that `PORT: 8080` works without quoting.
pub(crate) fn scalar_string(value: &Value, field: &str) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigError::invalid(field, "expected a scalar value")),
    }
}
