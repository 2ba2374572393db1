// config.rs — Generation options
//
// Deserialized from the job configuration document. Option names keep their
// historical spaced spelling; unknown keys are rejected so typos surface
// instead of silently falling back to defaults.
//
// Preconditions: none.
// Postconditions: every field has a usable value after deserialization.
// Failure modes: unknown key or wrong value type fails deserialization.
// Side effects: none.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Hard ceiling on instances generated per process. Exceeding it is
    /// fatal, never truncated.
    #[serde(rename = "max instances number", default = "default_max_instances")]
    pub max_instances: usize,

    /// Extra copies requested per realized instance.
    #[serde(rename = "instance modifier", default = "default_one")]
    pub instance_modifier: usize,

    /// Copies per resource implementation when a resource drives fan-out.
    #[serde(
        rename = "instances per resource implementation",
        default = "default_one"
    )]
    pub instances_per_resource: usize,

    /// Demote unmatched-callback fatalities to warnings and skip the
    /// category.
    #[serde(rename = "ignore missed callbacks", default)]
    pub ignore_missed_callbacks: bool,

    /// Guard callback invocation on a registration flag variable.
    #[serde(rename = "add registration guards", default = "default_true")]
    pub add_registration_guards: bool,

    /// Invoke callbacks that no process dispatches to explicitly.
    #[serde(rename = "implicit callback calls", default = "default_true")]
    pub implicit_callback_calls: bool,

    /// Prune processes whose replicative receives have no peers.
    #[serde(rename = "delete unregistered processes", default = "default_true")]
    pub delete_unregistered_processes: bool,

    /// Default comment text per action type, keyed by "dispatch", "receive",
    /// "callback", "condition".
    #[serde(rename = "action comments", default)]
    pub action_comments: BTreeMap<String, String>,

    #[serde(rename = "callback comment", default = "default_callback_comment")]
    pub callback_comment: String,

    #[serde(rename = "process comment", default = "default_process_comment")]
    pub process_comment: String,

    /// Emit module-static values as globals in the generated harness.
    #[serde(rename = "convert statics to globals", default = "default_true")]
    pub convert_statics_to_globals: bool,

    /// Call actions whose scratch resources are reallocated before each
    /// invocation.
    #[serde(rename = "callback actions with reinitialization", default)]
    pub reinitialized_actions: BTreeSet<String>,
}

fn default_max_instances() -> usize {
    1000
}

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_callback_comment() -> String {
    "Invoke callback.".to_string()
}

fn default_process_comment() -> String {
    "Environment scenario.".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            max_instances: default_max_instances(),
            instance_modifier: default_one(),
            instances_per_resource: default_one(),
            ignore_missed_callbacks: false,
            add_registration_guards: default_true(),
            implicit_callback_calls: default_true(),
            delete_unregistered_processes: default_true(),
            action_comments: BTreeMap::new(),
            callback_comment: default_callback_comment(),
            process_comment: default_process_comment(),
            convert_statics_to_globals: default_true(),
            reinitialized_actions: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = GenerationConfig::default();
        assert_eq!(c.max_instances, 1000);
        assert_eq!(c.instance_modifier, 1);
        assert!(!c.ignore_missed_callbacks);
        assert!(c.delete_unregistered_processes);
        assert!(c.reinitialized_actions.is_empty());
    }

    #[test]
    fn spaced_keys() {
        let c: GenerationConfig = serde_json::from_str(
            r#"{"max instances number": 8, "ignore missed callbacks": true}"#,
        )
        .unwrap();
        assert_eq!(c.max_instances, 8);
        assert!(c.ignore_missed_callbacks);
    }

    #[test]
    fn unknown_key_rejected() {
        let r: Result<GenerationConfig, _> =
            serde_json::from_str(r#"{"max instance number": 8}"#);
        assert!(r.is_err());
    }

    #[test]
    fn action_comments_map() {
        let c: GenerationConfig = serde_json::from_str(
            r#"{"action comments": {"dispatch": "Send a signal.", "receive": "Wait."}}"#,
        )
        .unwrap();
        assert_eq!(c.action_comments["dispatch"], "Send a signal.");
    }
}
