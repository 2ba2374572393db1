// pipeline.rs — one generation run, end to end
//
// Wires the phases together: catalog import and reference resolution,
// source-facts ingestion, process selection and label matching, instance
// generation, translation, final assembly. A run either yields the full
// artifact set or an error; partially generated output is never returned.
//
// Preconditions: the three input documents are JSON text.
// Postconditions: on success, every destination file and the model dump
//                 are present in the output, tagged with input digests.
// Failure modes: any phase error aborts the run.
// Side effects: none; the caller decides what hits the disk.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::analysis::{ingest_source_facts, SourceFacts};
use crate::config::GenerationConfig;
use crate::diag::Diagnostic;
use crate::error::{EmgError, Result};
use crate::instances::generate_instances;
use crate::interfaces::{CategorySpecification, InterfaceCatalog};
use crate::matching::{select_processes, EnvironmentSpec};
use crate::output::{dump_model, render_files, ModelDump};
use crate::translator::translate;

// ── Request and output ──────────────────────────────────────────────────────

/// The three input documents, as raw JSON text, plus configuration. Raw
/// text rather than parsed values so provenance digests cover exactly what
/// the caller supplied.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    pub categories: &'a str,
    pub environment: &'a str,
    pub facts: &'a str,
    pub config: GenerationConfig,
}

/// Input digests and the tool version, stamped into every artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub tool_version: String,
    pub categories_digest: String,
    pub environment_digest: String,
    pub facts_digest: String,
}

impl Provenance {
    fn of(request: &GenerationRequest<'_>) -> Self {
        Provenance {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            categories_digest: digest(request.categories),
            environment_digest: digest(request.environment),
            facts_digest: digest(request.facts),
        }
    }

    fn banner(&self) -> String {
        format!(
            "generated environment model, emg {} / inputs {} {} {}",
            self.tool_version,
            &self.categories_digest[..12],
            &self.environment_digest[..12],
            &self.facts_digest[..12],
        )
    }
}

fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[derive(Debug)]
pub struct GenerationOutput {
    /// Generated C text per destination file.
    pub files: BTreeMap<String, String>,
    pub model: ModelDump,
    pub provenance: Provenance,
    /// Non-fatal findings from every phase, in phase order.
    pub diagnostics: Vec<Diagnostic>,
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub fn run_generation(request: &GenerationRequest<'_>) -> Result<GenerationOutput> {
    let provenance = Provenance::of(request);
    let categories: CategorySpecification =
        parse_document("interface categories", request.categories)?;
    let environment: EnvironmentSpec =
        parse_document("environment specification", request.environment)?;
    let facts: SourceFacts = parse_document("source analysis", request.facts)?;
    let config = &request.config;

    let mut catalog = InterfaceCatalog::new();
    catalog.import_specification(categories)?;
    catalog.resolve_references()?;
    info!(
        interfaces = catalog.interfaces().count(),
        "interface catalog resolved"
    );

    let analysis = ingest_source_facts(&mut catalog, &facts, config)?;
    let called = called_functions(&facts);
    let mut diagnostics = analysis.diagnostics.clone();

    let (model, matching_diagnostics) =
        select_processes(&mut catalog, &environment, &called, config)?;
    diagnostics.extend(matching_diagnostics);
    info!(
        event_processes = model.event_processes.len(),
        model_processes = model.model_processes.len(),
        "process model selected"
    );

    let instances = generate_instances(&catalog, model, config)?;
    info!(
        event_instances = instances.event_instances.len(),
        model_instances = instances.model_instances.len(),
        "instances generated"
    );

    let translation = translate(&catalog, &instances, &analysis, config)?;
    let files = render_files(&translation, &provenance.banner());
    let model = dump_model(&instances);

    Ok(GenerationOutput {
        files,
        model,
        provenance,
        diagnostics,
    })
}

fn parse_document<T: serde::de::DeserializeOwned>(name: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|source| EmgError::Json {
        path: name.to_string(),
        source,
    })
}

/// Every function name the module was observed calling. Kernel-function
/// model selection keys off this set.
fn called_functions(facts: &SourceFacts) -> BTreeSet<String> {
    facts
        .functions
        .values()
        .flat_map(|f| f.calls.keys().cloned())
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

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

    const ENVIRONMENT: &str = r#"{
        "environment processes": {
            "scenario": {
                "labels": {
                    "container": {"container": true},
                    "resource": {"resource": true, "parameter": true}
                },
                "process": "(!register).{cycle}",
                "subprocesses": {
                    "cycle": {"process": "[probe].([disconnect].{cycle} | (deregister))"}
                },
                "actions": {
                    "register": {"parameters": ["%container%"]},
                    "deregister": {"parameters": ["%container%"]},
                    "probe": {"callback": "%container%.probe", "parameters": ["%resource%"]},
                    "disconnect": {"callback": "%container%.disconnect", "parameters": ["%resource%"]}
                }
            }
        },
        "functions models": {
            "usb_register_driver": {
                "labels": {"arg": {"container": true, "parameter": true}},
                "process": "[register].[deregister]",
                "actions": {
                    "register": {"parameters": ["%arg%"]},
                    "deregister": {"parameters": ["%arg%"]}
                }
            }
        }
    }"#;

    const FACTS: &str = r#"{
        "functions": {
            "skel_probe": {
                "signature": "int skel_probe(struct usb_interface *)",
                "files": ["skel.c"]
            },
            "skel_disconnect": {
                "signature": "void skel_disconnect(struct usb_interface *)",
                "files": ["skel.c"]
            },
            "skel_init": {
                "signature": "int skel_init(void)",
                "files": ["skel.c"],
                "calls": {"usb_register_driver": [["&skel_driver"]]}
            }
        },
        "global variable initializations": [
            {
                "name": "skel_driver",
                "file": "skel.c",
                "signature": "struct usb_driver",
                "fields": {"probe": "&skel_probe", "disconnect": "&skel_disconnect"}
            }
        ],
        "init": {"skel.c": "skel_init"},
        "exit": {}
    }"#;

    fn request() -> GenerationRequest<'static> {
        GenerationRequest {
            categories: CATEGORIES,
            environment: ENVIRONMENT,
            facts: FACTS,
            config: GenerationConfig::default(),
        }
    }

    #[test]
    fn full_run_produces_files_and_dump() {
        let output = run_generation(&request()).unwrap();
        assert!(!output.files.is_empty());
        assert!(output.model.environment.contains_key("usb_scenario_0"));
        assert!(output.model.models.contains_key("usb_register_driver"));
    }

    #[test]
    fn generated_file_carries_banner_and_entry() {
        let output = run_generation(&request()).unwrap();
        let all: String = output.files.values().cloned().collect();
        assert!(all.contains(&output.provenance.banner()));
        assert!(all.contains("ldv_emg_main"));
        assert!(all.contains("skel_init"));
    }

    #[test]
    fn digests_are_input_sensitive() {
        let a = Provenance::of(&request());
        let altered = GenerationRequest {
            facts: "{}",
            ..request()
        };
        let b = Provenance::of(&altered);
        assert_eq!(a.categories_digest, b.categories_digest);
        assert_ne!(a.facts_digest, b.facts_digest);
    }

    #[test]
    fn malformed_document_is_a_json_error() {
        let broken = GenerationRequest {
            environment: "{not json",
            ..request()
        };
        let err = run_generation(&broken).unwrap_err();
        assert!(matches!(err, EmgError::Json { .. }));
    }
}
