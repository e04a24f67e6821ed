//! Scripted job outcomes.
//!
//! A script is a queue of outcomes keyed by operation name. Each started
//! operation consumes the first outcome with a matching name; operations
//! with no matching outcome fall through to the simulator's guest model.
//!
//! ```json
//! { "steps": [
//!     { "op": "vm_run_program_in_guest",
//!       "progress_events": 3,
//!       "properties": [ { "id": 3018, "value": { "type": "integer", "value": 7 } } ] },
//!     { "op": "vm_power_on", "error": 3041 }
//! ] }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use jobbridge_core::{PropertyId, PropertyValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptProperty {
    pub id: PropertyId,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedOutcome {
    pub op: String,
    /// Native error code the job completes with; `0` for success.
    #[serde(default)]
    pub error: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_events: Option<u32>,
    #[serde(default)]
    pub properties: Vec<ScriptProperty>,
    #[serde(default)]
    pub items: Vec<Vec<ScriptProperty>>,
}

impl ScriptedOutcome {
    pub fn success(op: &str) -> Self {
        Self {
            op: op.to_string(),
            error: 0,
            progress_events: None,
            properties: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn failure(op: &str, error: u16) -> Self {
        Self {
            error,
            ..Self::success(op)
        }
    }

    pub fn with_property(mut self, id: PropertyId, value: PropertyValue) -> Self {
        self.properties.push(ScriptProperty { id, value });
        self
    }

    pub fn with_progress_events(mut self, n: u32) -> Self {
        self.progress_events = Some(n);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobScript {
    #[serde(default)]
    pub steps: Vec<ScriptedOutcome>,
}

impl JobScript {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let script: JobScript = serde_json::from_str(json).context("parse job script")?;
        for (i, step) in script.steps.iter().enumerate() {
            if step.op.trim().is_empty() {
                anyhow::bail!("job script step {i}: empty op name");
            }
        }
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read job script: {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("load job script: {}", path.display()))
    }

    pub fn push(&mut self, outcome: ScriptedOutcome) {
        self.steps.push(outcome);
    }

    /// Removes and returns the first outcome scripted for `op`.
    pub fn take(&mut self, op: &str) -> Option<ScriptedOutcome> {
        let pos = self.steps.iter().position(|s| s.op == op)?;
        Some(self.steps.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SCRIPT: &str = r#"{
        "steps": [
            { "op": "vm_run_program_in_guest",
              "progress_events": 3,
              "properties": [ { "id": 3018, "value": { "type": "integer", "value": 7 } } ] },
            { "op": "vm_power_on", "error": 3041 },
            { "op": "vm_run_program_in_guest" }
        ]
    }"#;

    #[test]
    fn take_consumes_in_order_per_op() {
        let mut script = JobScript::from_json_str(SCRIPT).expect("parse");
        let first = script.take("vm_run_program_in_guest").expect("first");
        assert_eq!(first.progress_events, Some(3));
        assert_eq!(
            first.properties,
            vec![ScriptProperty {
                id: PropertyId::JOB_RESULT_GUEST_PROGRAM_EXIT_CODE,
                value: PropertyValue::Integer(7),
            }]
        );
        let second = script.take("vm_run_program_in_guest").expect("second");
        assert!(second.properties.is_empty());
        assert!(script.take("vm_run_program_in_guest").is_none());
        assert_eq!(script.take("vm_power_on").expect("power").error, 3041);
        assert!(script.is_empty());
    }

    #[test]
    fn load_reports_path_and_rejects_unknown_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("script.json");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(br#"{ "steps": [ { "op": "vm_open", "colour": 1 } ] }"#)
            .expect("write");
        drop(f);

        let err = JobScript::load(&path).expect_err("unknown field");
        let msg = format!("{err:#}");
        assert!(msg.contains("script.json"), "{msg}");
        assert!(msg.contains("colour"), "{msg}");

        let missing = JobScript::load(&dir.path().join("absent.json")).expect_err("missing");
        assert!(format!("{missing:#}").contains("read job script"));
    }

    #[test]
    fn empty_op_is_rejected() {
        let err = JobScript::from_json_str(r#"{ "steps": [ { "op": " " } ] }"#).expect_err("empty");
        assert!(err.to_string().contains("empty op name"));
    }
}
