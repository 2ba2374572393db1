// End-to-end generation runs over a small USB-style module.
//
// Each test drives the full pipeline from JSON documents to generated C
// text and the model dump, checking one observable property:
// - template selection prefers the fully matched candidate
// - a process nobody can register disappears from the model
// - a two-implementation container yields two instances and a two-arm
//   dispatch choice

use emg::config::GenerationConfig;
use emg::pipeline::{run_generation, GenerationRequest};

const CATEGORIES: &str = r#"{
    "categories": {
        "usb": {
            "containers": {
                "driver": {
                    "signature": "struct usb_driver",
                    "fields": {"probe": "probe", "disconnect": "disconnect"}
                }
            },
            "resources": {
                "interface": {"signature": "struct usb_interface *"}
            },
            "callbacks": {
                "probe": {"signature": "int (*probe)(%usb.interface%)"},
                "disconnect": {"signature": "void (*disconnect)(%usb.interface%)"}
            }
        }
    },
    "kernel functions": {
        "usb_register_driver": {
            "signature": "int usb_register_driver(%usb.driver%)",
            "header": "linux/usb.h"
        }
    }
}"#;

fn scenario_actions() -> &'static str {
    r#"
        "register": {"parameters": ["%container%"]},
        "deregister": {"parameters": ["%container%"]},
        "probe": {"callback": "%container%.probe", "parameters": ["%resource%"]},
        "disconnect": {"callback": "%container%.disconnect", "parameters": ["%resource%"]}
    "#
}

fn environment(extra_template: &str) -> String {
    format!(
        r#"{{
            "environment processes": {{
                "scenario": {{
                    "labels": {{
                        "container": {{"container": true}},
                        "resource": {{"resource": true, "parameter": true}}
                    }},
                    "process": "(!register).[probe].[disconnect].(deregister)",
                    "actions": {{{actions}}}
                }}{extra_template}
            }},
            "functions models": {{
                "usb_register_driver": {{
                    "labels": {{"arg": {{"container": true, "parameter": true}}}},
                    "process": "[register].[deregister]",
                    "actions": {{
                        "register": {{"parameters": ["%arg%"]}},
                        "deregister": {{"parameters": ["%arg%"]}}
                    }}
                }}
            }}
        }}"#,
        actions = scenario_actions(),
        extra_template = extra_template,
    )
}

fn facts(drivers: &[&str]) -> String {
    let mut globals = Vec::new();
    let mut functions = vec![
        r#""skel_probe": {"signature": "int skel_probe(struct usb_interface *)", "files": ["skel.c"]}"#.to_string(),
        r#""skel_disconnect": {"signature": "void skel_disconnect(struct usb_interface *)", "files": ["skel.c"]}"#.to_string(),
        format!(
            r#""skel_init": {{"signature": "int skel_init(void)", "files": ["skel.c"], "calls": {{"usb_register_driver": [{}]}}}}"#,
            drivers
                .iter()
                .map(|d| format!(r#"["&{d}"]"#))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ];
    for driver in drivers {
        globals.push(format!(
            r#"{{
                "name": "{driver}",
                "file": "skel.c",
                "signature": "struct usb_driver",
                "fields": {{"probe": "&skel_probe", "disconnect": "&skel_disconnect"}}
            }}"#
        ));
    }
    functions.push(r#""skel_exit": {"signature": "void skel_exit(void)", "files": ["skel.c"]}"#.to_string());
    format!(
        r#"{{
            "functions": {{{functions}}},
            "global variable initializations": [{globals}],
            "init": {{"skel.c": "skel_init"}},
            "exit": {{"skel.c": "skel_exit"}}
        }}"#,
        functions = functions.join(", "),
        globals = globals.join(", "),
    )
}

fn run(environment: &str, facts: &str) -> emg::pipeline::GenerationOutput {
    let request = GenerationRequest {
        categories: CATEGORIES,
        environment,
        facts,
        config: GenerationConfig::default(),
    };
    run_generation(&request).expect("generation should succeed")
}

#[test]
fn single_driver_yields_one_scenario_instance() {
    let output = run(&environment(""), &facts(&["skel_driver"]));
    assert!(output.model.environment.contains_key("usb_scenario_0"));
    assert_eq!(output.model.environment.len(), 1);
    assert!(output.model.models.contains_key("usb_register_driver"));

    let all: String = output.files.values().cloned().collect();
    assert!(all.contains("ldv_emg_main"));
    assert!(all.contains("skel_probe("));
    assert!(all.contains("skel_disconnect("));
    assert!(all.contains("skel_init"));
    assert!(all.contains("skel_exit"));
}

#[test]
fn fully_matched_template_wins_selection() {
    // A competing template that leaves one label unmatched must lose to
    // the clean one even though it also covers both callbacks.
    let extra = format!(
        r#", "partial": {{
            "labels": {{
                "container": {{"container": true}},
                "resource": {{"resource": true, "parameter": true}},
                "mystery": {{"parameter": true}}
            }},
            "process": "(!register).[probe].[disconnect].(deregister)",
            "actions": {{{actions}}}
        }}"#,
        actions = scenario_actions()
    );
    let output = run(&environment(&extra), &facts(&["skel_driver"]));
    assert!(output.model.environment.contains_key("usb_scenario_0"));
    assert!(!output
        .model
        .environment
        .keys()
        .any(|k| k.contains("partial")));
}

#[test]
fn unregisterable_process_is_pruned() {
    // The module never calls usb_register_driver, so no model process
    // dispatches the registration signal and the scenario cannot start.
    let facts = facts(&["skel_driver"]).replace(
        r#""calls": {"usb_register_driver": [["&skel_driver"]]}"#,
        r#""calls": {}"#,
    );
    let output = run(&environment(""), &facts);
    assert!(output.model.environment.is_empty());
    assert!(output.model.models.is_empty());
}

#[test]
fn two_drivers_yield_two_instances_and_two_arm_dispatch() {
    let output = run(&environment(""), &facts(&["skel_driver", "storage_driver"]));
    assert!(output.model.environment.contains_key("usb_scenario_0"));
    assert!(output.model.environment.contains_key("usb_scenario_1"));

    let all: String = output.files.values().cloned().collect();
    assert!(all.contains("if (ldv_undef_int()) {"));
    assert!(all.contains("} else {"));
    assert!(all.contains("ldv_statevar_usb_scenario_0"));
    assert!(all.contains("ldv_statevar_usb_scenario_1"));
}

#[test]
fn capacity_ceiling_aborts_the_run() {
    let mut config = GenerationConfig::default();
    config.max_instances = 1;
    let request = GenerationRequest {
        categories: CATEGORIES,
        environment: &environment(""),
        facts: &facts(&["skel_driver", "storage_driver"]),
        config,
    };
    let err = run_generation(&request).unwrap_err();
    assert!(err
        .to_string()
        .contains("tries to generate more instances than it is allowed"));
}

#[test]
fn model_dump_mirrors_wiring() {
    let output = run(&environment(""), &facts(&["skel_driver"]));
    let json = serde_json::to_value(&output.model).unwrap();
    let register = &json["environment"]["usb_scenario_0"]["actions"]["register"];
    assert_eq!(register["kind"], "receive");
    assert_eq!(register["peers"]["usb_register_driver"][0], "register");
    let driver = &json["environment"]["usb_scenario_0"]["labels"]["container"];
    assert_eq!(driver["implementation"], "skel_driver");
}
