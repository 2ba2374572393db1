// output.rs — final artifacts: the model dump and the generated C files
//
// The dump is a JSON snapshot of the concrete model, one entry per process
// instance, mirroring the input vocabulary (labels, actions, peers) so a
// reader can diff it against the environment specification that produced
// it. The C files are assembled per destination from the emission context,
// declarations first.
//
// Preconditions: translation finished.
// Postconditions: pure data out; writing to disk is the caller's business.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::instances::{InstanceModel, ProcessInstance};
use crate::process::{Action, ActionKind, Label};
use crate::translator::TranslationResult;

// ── Model dump ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ModelDump {
    pub environment: BTreeMap<String, ProcessDump>,
    pub models: BTreeMap<String, ProcessDump>,
}

#[derive(Debug, Serialize)]
pub struct ProcessDump {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub process: String,
    pub labels: BTreeMap<String, LabelDump>,
    pub actions: BTreeMap<String, ActionDump>,
}

#[derive(Debug, Serialize)]
pub struct LabelDump {
    #[serde(skip_serializing_if = "is_false")]
    pub container: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub resource: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub callback: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub parameter: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    /// Chosen implementation value, when instance generation pinned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionDump {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    /// Wired counterpart actions, keyed by peer process.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub peers: BTreeMap<String, Vec<String>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

pub fn dump_model(instances: &InstanceModel) -> ModelDump {
    ModelDump {
        environment: instances
            .event_instances
            .iter()
            .map(|i| (i.process.name.clone(), dump_instance(i)))
            .collect(),
        models: instances
            .model_instances
            .iter()
            .map(|i| (i.process.name.clone(), dump_instance(i)))
            .collect(),
    }
}

fn dump_instance(instance: &ProcessInstance) -> ProcessDump {
    ProcessDump {
        category: instance.process.category.clone(),
        comment: instance.process.comment.clone(),
        process: instance.process.expression.clone(),
        labels: instance
            .process
            .labels
            .values()
            .map(|l| (l.name.clone(), dump_label(instance, l)))
            .collect(),
        actions: instance
            .process
            .actions
            .values()
            .map(|a| (a.name.clone(), dump_action(a)))
            .collect(),
    }
}

fn dump_label(instance: &ProcessInstance, label: &Label) -> LabelDump {
    let implementation = label
        .interfaces
        .iter()
        .find_map(|id| instance.choices.get(id))
        .map(|i| i.value.clone());
    LabelDump {
        container: label.container,
        resource: label.resource,
        callback: label.callback,
        parameter: label.parameter,
        interfaces: label.interfaces.clone(),
        implementation,
    }
}

fn dump_action(action: &Action) -> ActionDump {
    let kind = match &action.kind {
        ActionKind::Dispatch { .. } => "dispatch",
        ActionKind::Receive { .. } => "receive",
        ActionKind::Call { .. } => "call",
        ActionKind::CallRetval { .. } => "call-retval",
        ActionKind::Condition => "condition",
        ActionKind::Subprocess => "subprocess",
    };
    let mut peers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for peer in &action.peers {
        peers
            .entry(peer.process.clone())
            .or_default()
            .push(peer.action.clone());
    }
    ActionDump {
        kind,
        comment: action.comment.clone(),
        condition: action.condition.clone(),
        parameters: action.parameters.clone(),
        peers,
    }
}

// ── Generated source assembly ───────────────────────────────────────────────

/// Assemble one compilable text per destination file: a provenance banner,
/// the declarations, then the definitions in emission order.
pub fn render_files(result: &TranslationResult, banner: &str) -> BTreeMap<String, String> {
    let mut files: BTreeMap<String, String> = BTreeMap::new();
    let context = &result.context;
    let names: std::collections::BTreeSet<&String> = context
        .declarations()
        .keys()
        .chain(context.definitions().keys())
        .collect();
    for name in names {
        let mut text = String::new();
        text.push_str("/* ");
        text.push_str(banner);
        text.push_str(" */\n\n");
        if let Some(declarations) = context.declarations().get(name) {
            for declaration in declarations {
                text.push_str(declaration);
                text.push('\n');
            }
            text.push('\n');
        }
        if let Some(definitions) = context.definitions().get(name) {
            for definition in definitions {
                text.push_str(definition);
                text.push('\n');
            }
        }
        files.insert(name.clone(), text);
    }
    files
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::Implementation;
    use crate::process::{Peer, Process, ProcessSpec, ProcessTemplate};

    fn instance() -> ProcessInstance {
        let spec: ProcessSpec = serde_json::from_str(
            r#"{
                "labels": {
                    "driver": {"container": true},
                    "dev": {"resource": true, "parameter": true}
                },
                "process": "(!register).[probe].(deregister)",
                "actions": {
                    "register": {"parameters": ["%driver%"]},
                    "deregister": {"parameters": ["%driver%"]},
                    "probe": {"callback": "%driver%.probe", "parameters": ["%dev%"]}
                }
            }"#,
        )
        .unwrap();
        let template = ProcessTemplate::from_spec("scenario", &spec).unwrap();
        let mut process: Process = template.instantiate("usb");
        process.name = "usb_scenario_0".to_string();
        if let Some(label) = process.labels.get_mut("driver") {
            label.interfaces.push("usb.driver".to_string());
        }
        process.add_peer(
            "register",
            Peer {
                process: "usb_register_driver".to_string(),
                action: "register".to_string(),
            },
        );
        let mut choices = BTreeMap::new();
        choices.insert(
            "usb.driver".to_string(),
            Implementation::new("skel_driver", "skel.c"),
        );
        ProcessInstance {
            process,
            base_name: "usb_scenario".to_string(),
            choices,
        }
    }

    #[test]
    fn dump_groups_environment_and_models() {
        let model = InstanceModel {
            event_instances: vec![instance()],
            model_instances: Vec::new(),
        };
        let dump = dump_model(&model);
        assert!(dump.environment.contains_key("usb_scenario_0"));
        assert!(dump.models.is_empty());
    }

    #[test]
    fn dump_serializes_peers_by_process() {
        let model = InstanceModel {
            event_instances: vec![instance()],
            model_instances: Vec::new(),
        };
        let json = serde_json::to_value(dump_model(&model)).unwrap();
        let register = &json["environment"]["usb_scenario_0"]["actions"]["register"];
        assert_eq!(register["kind"], "receive");
        assert_eq!(register["peers"]["usb_register_driver"][0], "register");
    }

    #[test]
    fn dump_omits_empty_fields() {
        let model = InstanceModel {
            event_instances: vec![instance()],
            model_instances: Vec::new(),
        };
        let json = serde_json::to_value(dump_model(&model)).unwrap();
        let probe = &json["environment"]["usb_scenario_0"]["actions"]["probe"];
        assert!(probe.get("condition").is_none());
        assert!(probe.get("peers").is_none());
        let dev = &json["environment"]["usb_scenario_0"]["labels"]["dev"];
        assert!(dev.get("container").is_none());
        assert_eq!(dev["resource"], true);
    }

    #[test]
    fn dump_records_chosen_implementation() {
        let model = InstanceModel {
            event_instances: vec![instance()],
            model_instances: Vec::new(),
        };
        let json = serde_json::to_value(dump_model(&model)).unwrap();
        assert_eq!(
            json["environment"]["usb_scenario_0"]["labels"]["driver"]["implementation"],
            "skel_driver"
        );
    }
}
