// matching.rs — Process selection & matching engine
//
// For each interface category with callbacks nobody invokes yet, picks the
// environment-process template that calls the most of those callbacks with
// the fewest unmatched labels, concretizes it, and wires its dispatch and
// receive actions to peer processes. Kernel-function models are concretized
// for each modeled function the module actually calls.
//
// Preconditions: catalog import and source ingestion finished.
// Postconditions: peer lists are symmetric; every chosen process has zero
//                 unmatched labels.
// Failure modes: a category no template qualifies for is fatal unless
//                demoted by configuration; errors are deferred until every
//                category has been attempted.
// Side effects: sets `called` flags through the catalog's mutation API.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::diag::Diagnostic;
use crate::error::{EmgError, Result};
use crate::interfaces::InterfaceCatalog;
use crate::process::{parse_access, ActionKind, Peer, Process, ProcessSpec, ProcessTemplate};
use crate::signature::Signature;

// ── Input shape ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct EnvironmentSpec {
    #[serde(rename = "environment processes", default)]
    pub environment_processes: BTreeMap<String, ProcessSpec>,
    /// Templates modeling kernel functions the module calls directly.
    #[serde(rename = "functions models", default)]
    pub function_models: BTreeMap<String, ProcessSpec>,
}

// ── Output ──────────────────────────────────────────────────────────────────

/// The growing set of concrete processes.
#[derive(Debug, Default)]
pub struct ProcessModel {
    pub event_processes: Vec<Process>,
    pub model_processes: Vec<Process>,
}

impl ProcessModel {
    pub fn find(&self, name: &str) -> Option<&Process> {
        self.event_processes
            .iter()
            .chain(self.model_processes.iter())
            .find(|p| p.name == name)
    }
}

// ── Match scoring ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub native_interfaces: usize,
    pub matched_calls: usize,
    pub unmatched_callbacks: usize,
    pub unmatched_labels: usize,
}

impl Score {
    fn qualifies(&self) -> bool {
        self.matched_calls >= 1 && self.unmatched_labels == 0
    }

    /// Tie-break ladder; ties keep the incumbent.
    fn beats(&self, incumbent: &Score) -> bool {
        if self.native_interfaces != incumbent.native_interfaces {
            return self.native_interfaces > incumbent.native_interfaces;
        }
        if self.native_interfaces == 0
            && self.matched_calls > incumbent.matched_calls
            && self.unmatched_callbacks <= incumbent.unmatched_callbacks
        {
            return true;
        }
        if self.matched_calls >= incumbent.matched_calls
            && self.unmatched_labels < incumbent.unmatched_labels
        {
            return true;
        }
        self.unmatched_callbacks < incumbent.unmatched_callbacks
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub fn select_processes(
    catalog: &mut InterfaceCatalog,
    spec: &EnvironmentSpec,
    called_functions: &BTreeSet<String>,
    config: &GenerationConfig,
) -> Result<(ProcessModel, Vec<Diagnostic>)> {
    let mut templates = BTreeMap::new();
    for (name, process_spec) in &spec.environment_processes {
        templates.insert(name.clone(), ProcessTemplate::from_spec(name, process_spec)?);
    }

    let mut model = ProcessModel::default();
    let mut diagnostics = Vec::new();
    let mut shortfalls: Vec<String> = Vec::new();

    let categories: Vec<String> = catalog.categories().map(str::to_string).collect();
    for category in &categories {
        if !has_uncalled_callbacks(catalog, category) {
            continue;
        }
        let candidate = choose_template(catalog, &templates, category)?;
        match candidate {
            Some((mut process, score)) => {
                debug!(
                    category = %category,
                    template = %process.template,
                    native = score.native_interfaces,
                    calls = score.matched_calls,
                    "selected process template"
                );
                process.name = format!("{}_{}", category, process.template);
                mark_called_callbacks(catalog, &process)?;
                let index = model.event_processes.len();
                model.event_processes.push(process);
                let mut visited: BTreeSet<String> =
                    [model.event_processes[index].template.clone()].into();
                establish_signal_peers(catalog, &templates, &mut model, index, &mut visited)?;
            }
            None => {
                if config.ignore_missed_callbacks {
                    warn!(category = %category, "no process template qualifies, skipped");
                    diagnostics.push(
                        Diagnostic::warning("no process template can call the category callbacks")
                            .with_context(category.clone()),
                    );
                } else {
                    shortfalls.push(category.clone());
                }
            }
        }
    }
    if !shortfalls.is_empty() {
        return Err(EmgError::matching(
            shortfalls.join(", "),
            "no process template can call the category callbacks",
        ));
    }

    concretize_function_models(catalog, spec, called_functions, &mut model)?;
    audit_unmatched_signals(&model, &mut diagnostics);

    Ok((model, diagnostics))
}

fn has_uncalled_callbacks(catalog: &InterfaceCatalog, category: &str) -> bool {
    catalog
        .callbacks_in(category)
        .iter()
        .any(|cb| !cb.called && !cb.implementations.is_empty())
}

// ── Template choice ─────────────────────────────────────────────────────────

fn choose_template(
    catalog: &InterfaceCatalog,
    templates: &BTreeMap<String, ProcessTemplate>,
    category: &str,
) -> Result<Option<(Process, Score)>> {
    let mut best: Option<(Process, Score)> = None;
    for template in templates.values() {
        let mut candidate = template.instantiate(category);
        let score = match_labels(catalog, &mut candidate, category)?;
        if !score.qualifies() {
            continue;
        }
        match &best {
            Some((_, incumbent)) if !score.beats(incumbent) => {}
            _ => best = Some((candidate, score)),
        }
    }
    Ok(best)
}

// ── Label matching fixed point ──────────────────────────────────────────────

/// Bind as many of the process's labels to the category's interfaces as the
/// fixed point allows, and score the result.
pub fn match_labels(
    catalog: &InterfaceCatalog,
    process: &mut Process,
    category: &str,
) -> Result<Score> {
    let prefix = format!("{category}.");

    // Seed: labels naming interfaces of this category are free matches.
    let mut native_interfaces = 0usize;
    for label in process.labels.values_mut() {
        for declared in label.declared_interfaces.clone() {
            if declared.starts_with(&prefix) {
                if let Some(interface) = catalog.get(&declared) {
                    label.bind(&declared, interface.signature.clone());
                    native_interfaces += 1;
                }
            }
        }
    }

    let calls: Vec<(String, String, Vec<String>)> = process
        .actions
        .values()
        .filter_map(|a| match &a.kind {
            ActionKind::Call { callback, .. } => {
                Some((a.name.clone(), callback.clone(), a.parameters.clone()))
            }
            _ => None,
        })
        .collect();

    let mut matched_callbacks: BTreeSet<String> = BTreeSet::new();
    loop {
        let before = bound_labels(process) + matched_callbacks.len();

        for (_, callback_expr, parameters) in &calls {
            let (label_name, fields) = parse_access(callback_expr)?;
            let unbound = process
                .labels
                .get(&label_name)
                .is_some_and(|l| !l.is_matched());
            if unbound {
                bind_call_container(catalog, process, category, &label_name, &fields)?;
            }

            // Terminal callbacks reachable through the access, plus
            // positional parameter binding against them.
            let accesses = process.extended_accesses(catalog, callback_expr)?;
            for access in accesses {
                let Some(terminal) = access.terminal_interface() else {
                    continue;
                };
                let Some(interface) = catalog.get(terminal) else {
                    continue;
                };
                if !interface.is_callback() {
                    continue;
                }
                matched_callbacks.insert(terminal.to_string());
                bind_call_parameters(catalog, process, &interface.signature.clone(), parameters)?;
            }
        }

        sweep_callback_labels(catalog, process, category, &matched_callbacks)?;

        if bound_labels(process) + matched_callbacks.len() == before {
            break;
        }
    }

    // Partition for the score.
    let mut matched_calls = 0usize;
    for (_, callback_expr, _) in &calls {
        let resolved = process
            .extended_accesses(catalog, callback_expr)?
            .iter()
            .filter_map(|a| a.terminal_interface().map(str::to_string))
            .any(|t| catalog.get(&t).is_some_and(|i| i.is_callback()));
        if resolved {
            matched_calls += 1;
        }
    }
    let unmatched_callbacks = catalog
        .callbacks_in(category)
        .iter()
        .filter(|cb| !matched_callbacks.contains(&cb.full_id()))
        .count();
    let unmatched_labels = process
        .labels
        .values()
        .filter(|l| !l.is_matched() && l.prior_signature.is_none() && l.value.is_none())
        .count();

    Ok(Score {
        native_interfaces,
        matched_calls,
        unmatched_callbacks,
        unmatched_labels,
    })
}

fn bound_labels(process: &Process) -> usize {
    process.labels.values().filter(|l| l.is_matched()).count()
}

/// An unmatched container label on a call: try every container of the
/// category whose field graph admits the call's tail path.
fn bind_call_container(
    catalog: &InterfaceCatalog,
    process: &mut Process,
    category: &str,
    label_name: &str,
    fields: &[String],
) -> Result<()> {
    let is_container = process
        .labels
        .get(label_name)
        .is_some_and(|l| l.container && l.declared_interfaces.is_empty());
    if !is_container {
        return Ok(());
    }
    let mut chosen: Option<(String, Signature)> = None;
    for container in catalog.containers_in(category) {
        let mut current = container.full_id();
        let mut resolves = true;
        for field in fields {
            match catalog
                .get(&current)
                .and_then(|i| i.field_interfaces.get(field).cloned())
            {
                Some(child) => current = child,
                None => {
                    resolves = false;
                    break;
                }
            }
        }
        if resolves {
            chosen = Some((container.full_id(), container.signature.clone()));
            break;
        }
    }
    if let Some((id, signature)) = chosen {
        if let Some(label) = process.labels.get_mut(label_name) {
            label.bind(&id, signature);
        }
    }
    Ok(())
}

/// Bind call parameter labels against the callback's declared parameter
/// interfaces, positionally. Resource-typed parameters only take
/// resource-capable labels.
fn bind_call_parameters(
    catalog: &InterfaceCatalog,
    process: &mut Process,
    callback_signature: &Signature,
    parameters: &[String],
) -> Result<()> {
    let param_interfaces = callback_signature.parameter_interfaces();
    for (position, access_expr) in parameters.iter().enumerate() {
        let Some(interface_id) = param_interfaces.get(position).and_then(|i| i.clone()) else {
            continue;
        };
        let Some(interface) = catalog.get(&interface_id) else {
            continue;
        };
        let (label_name, _) = parse_access(access_expr)?;
        let bindable = process.labels.get(&label_name).is_some_and(|l| {
            !l.is_matched() && (!interface.is_resource() || l.resource || !l.callback)
        });
        if bindable {
            let signature = interface.signature.clone();
            if let Some(label) = process.labels.get_mut(&label_name) {
                label.bind(&interface_id, signature);
            }
        }
    }
    Ok(())
}

/// Container-directed matching for callback labels, with a greedy fallback
/// onto any unused callback interface of the category.
fn sweep_callback_labels(
    catalog: &InterfaceCatalog,
    process: &mut Process,
    category: &str,
    matched_callbacks: &BTreeSet<String>,
) -> Result<()> {
    let container_fields: Vec<String> = process
        .labels
        .values()
        .filter(|l| l.container && l.is_matched())
        .flat_map(|l| l.interfaces.iter())
        .filter_map(|id| catalog.get(id))
        .flat_map(|c| c.field_interfaces.values().cloned())
        .collect();
    let bound_anywhere: BTreeSet<String> = process
        .labels
        .values()
        .flat_map(|l| l.interfaces.iter().cloned())
        .collect();

    let unbound: Vec<String> = process
        .labels
        .values()
        .filter(|l| l.callback && !l.is_matched())
        .map(|l| l.name.clone())
        .collect();
    for label_name in unbound {
        let directed = container_fields
            .iter()
            .find(|id| {
                !bound_anywhere.contains(*id)
                    && catalog.get(id).is_some_and(|i| i.is_callback())
            })
            .cloned();
        let fallback = || {
            catalog
                .callbacks_in(category)
                .iter()
                .map(|cb| cb.full_id())
                .find(|id| !bound_anywhere.contains(id) && !matched_callbacks.contains(id))
        };
        if let Some(id) = directed.or_else(fallback) {
            let signature = catalog.get(&id).map(|i| i.signature.clone());
            if let (Some(signature), Some(label)) =
                (signature, process.labels.get_mut(&label_name))
            {
                label.bind(&id, signature);
            }
        }
    }
    Ok(())
}

fn mark_called_callbacks(catalog: &mut InterfaceCatalog, process: &Process) -> Result<()> {
    let mut called = Vec::new();
    for action in process.actions.values() {
        if let ActionKind::Call { callback, .. } = &action.kind {
            for access in process.extended_accesses(catalog, callback)? {
                if let Some(terminal) = access.terminal_interface() {
                    if catalog.get(terminal).is_some_and(|i| i.is_callback()) {
                        called.push(terminal.to_string());
                    }
                }
            }
        }
    }
    for id in called {
        catalog.mark_called(&id);
    }
    Ok(())
}

// ── Peer wiring ─────────────────────────────────────────────────────────────

/// Wire the process at `index` against every other process in the model,
/// then pull in further templates for its still-unmatched signals. The
/// visited set bounds the recursion independent of catalog shape.
fn establish_signal_peers(
    catalog: &InterfaceCatalog,
    templates: &BTreeMap<String, ProcessTemplate>,
    model: &mut ProcessModel,
    index: usize,
    visited: &mut BTreeSet<String>,
) -> Result<()> {
    for other in 0..model.event_processes.len() {
        if other != index {
            peer_processes(&mut model.event_processes, index, other)?;
        }
    }

    let unmatched: Vec<(String, ActionKind, usize)> = {
        let process = &model.event_processes[index];
        process
            .actions
            .values()
            .filter(|a| a.is_signal() && a.peers.is_empty())
            .map(|a| (a.name.clone(), a.kind.clone(), a.parameters.len()))
            .collect()
    };
    let category = model.event_processes[index].category.clone();

    for (signal, kind, arity) in unmatched {
        if is_default_lifecycle_signal(&signal) {
            continue;
        }
        let counterpart = templates.values().find(|t| {
            !visited.contains(&t.name)
                && t.actions.get(&signal).is_some_and(|a| {
                    a.parameters.len() == arity && opposite_signal(&a.kind, &kind)
                })
        });
        let Some(template) = counterpart else {
            continue;
        };
        let mut candidate = template.instantiate(&category);
        let score = match_labels(catalog, &mut candidate, &category)?;
        if score.unmatched_labels > 0 {
            continue;
        }
        candidate.name = format!("{}_{}", category, candidate.template);
        visited.insert(template.name.clone());
        let new_index = model.event_processes.len();
        model.event_processes.push(candidate);
        establish_signal_peers(catalog, templates, model, new_index, visited)?;
    }
    Ok(())
}

fn opposite_signal(a: &ActionKind, b: &ActionKind) -> bool {
    matches!(
        (a, b),
        (ActionKind::Dispatch { .. }, ActionKind::Receive { .. })
            | (ActionKind::Receive { .. }, ActionKind::Dispatch { .. })
    )
}

fn is_default_lifecycle_signal(name: &str) -> bool {
    name == "register" || name == "deregister"
}

/// Match unmatched dispatches of one process against unmatched receives of
/// the other (both directions) by signal name, arity and pairwise label
/// compatibility; wire both peer lists and propagate one-sided bindings.
fn peer_processes(processes: &mut [Process], left: usize, right: usize) -> Result<()> {
    let pairs: Vec<(String, Vec<String>, Vec<String>)> = {
        let (a, b) = (&processes[left], &processes[right]);
        a.actions
            .values()
            .filter(|action| action.is_signal() && action.peers.is_empty())
            .filter_map(|action| {
                let counterpart = b.actions.get(&action.name)?;
                if !counterpart.is_signal() || !opposite_signal(&action.kind, &counterpart.kind) {
                    return None;
                }
                if action.parameters.len() != counterpart.parameters.len() {
                    return None;
                }
                Some((
                    action.name.clone(),
                    action.parameters.clone(),
                    counterpart.parameters.clone(),
                ))
            })
            .collect()
    };

    for (signal, left_params, right_params) in pairs {
        if !labels_pairwise_compatible(processes, left, right, &left_params, &right_params)? {
            continue;
        }
        let left_name = processes[left].name.clone();
        let right_name = processes[right].name.clone();
        processes[left].add_peer(
            &signal,
            Peer {
                process: right_name,
                action: signal.clone(),
            },
        );
        processes[right].add_peer(
            &signal,
            Peer {
                process: left_name,
                action: signal.clone(),
            },
        );
        propagate_bindings(processes, left, right, &left_params, &right_params)?;
    }
    Ok(())
}

fn labels_pairwise_compatible(
    processes: &[Process],
    left: usize,
    right: usize,
    left_params: &[String],
    right_params: &[String],
) -> Result<bool> {
    for (lp, rp) in left_params.iter().zip(right_params) {
        let (l_label, _) = processes[left].resolve_access(lp)?;
        let (r_label, _) = processes[right].resolve_access(rp)?;
        if !l_label.compatible(r_label) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Copy interface bindings from the bound side of each wired parameter pair
/// onto the unbound side.
fn propagate_bindings(
    processes: &mut [Process],
    left: usize,
    right: usize,
    left_params: &[String],
    right_params: &[String],
) -> Result<()> {
    for (lp, rp) in left_params.iter().zip(right_params) {
        let (l_name, _) = parse_access(lp)?;
        let (r_name, _) = parse_access(rp)?;
        let l_bound = processes[left].labels[&l_name].clone();
        let r_bound = processes[right].labels[&r_name].clone();
        if l_bound.is_matched() && !r_bound.is_matched() {
            if let Some(label) = processes[right].labels.get_mut(&r_name) {
                label.interfaces = l_bound.interfaces.clone();
                label.signatures = l_bound.signatures.clone();
            }
        } else if r_bound.is_matched() && !l_bound.is_matched() {
            if let Some(label) = processes[left].labels.get_mut(&l_name) {
                label.interfaces = r_bound.interfaces.clone();
                label.signatures = r_bound.signatures.clone();
            }
        }
    }
    Ok(())
}

// ── Function models ─────────────────────────────────────────────────────────

fn concretize_function_models(
    catalog: &InterfaceCatalog,
    spec: &EnvironmentSpec,
    called_functions: &BTreeSet<String>,
    model: &mut ProcessModel,
) -> Result<()> {
    for (function, process_spec) in &spec.function_models {
        if !called_functions.contains(function) {
            continue;
        }
        let Some(kernel_function) = catalog.kernel_function(function) else {
            continue;
        };
        let category = kernel_function
            .signature
            .parameter_interfaces()
            .into_iter()
            .flatten()
            .next()
            .and_then(|id| id.split('.').next().map(str::to_string))
            .unwrap_or_else(|| function.clone());
        let template = ProcessTemplate::from_spec(function, process_spec)?;
        let mut process = template.instantiate(&category);
        process.name = function.clone();
        match_labels(catalog, &mut process, &category)?;
        debug!(function = %function, category = %category, "concretized function model");
        model.model_processes.push(process);
    }

    // A model's signals may address event processes, typically the default
    // lifecycle pair.
    for model_index in 0..model.model_processes.len() {
        for event_index in 0..model.event_processes.len() {
            peer_model_with_event(model, model_index, event_index)?;
        }
    }
    Ok(())
}

fn peer_model_with_event(
    model: &mut ProcessModel,
    model_index: usize,
    event_index: usize,
) -> Result<()> {
    let pairs: Vec<String> = {
        let m = &model.model_processes[model_index];
        let e = &model.event_processes[event_index];
        m.actions
            .values()
            .filter(|a| a.is_signal() && a.peers.is_empty())
            .filter_map(|a| {
                let counterpart = e.actions.get(&a.name)?;
                (counterpart.is_signal()
                    && opposite_signal(&a.kind, &counterpart.kind)
                    && a.parameters.len() == counterpart.parameters.len())
                .then(|| a.name.clone())
            })
            .collect()
    };
    for signal in pairs {
        let model_name = model.model_processes[model_index].name.clone();
        let event_name = model.event_processes[event_index].name.clone();
        model.model_processes[model_index].add_peer(
            &signal,
            Peer {
                process: event_name,
                action: signal.clone(),
            },
        );
        model.event_processes[event_index].add_peer(
            &signal,
            Peer {
                process: model_name,
                action: signal.clone(),
            },
        );
    }
    Ok(())
}

// ── Audit ───────────────────────────────────────────────────────────────────

/// Receives still unmatched after wiring: default lifecycle signals get a
/// synthetic dispatch on the entry automaton later; anything else is a
/// permanent warning, never fatal.
fn audit_unmatched_signals(model: &ProcessModel, diagnostics: &mut Vec<Diagnostic>) {
    for process in &model.event_processes {
        for action in process.unmatched_signals(true) {
            if is_default_lifecycle_signal(&action.name) {
                debug!(
                    process = %process.name,
                    signal = %action.name,
                    "default lifecycle signal handled by the entry automaton"
                );
            } else {
                warn!(process = %process.name, signal = %action.name, "nobody can send it");
                diagnostics.push(
                    Diagnostic::warning(format!(
                        "receive '{}' has no sender, nobody can send it",
                        action.name
                    ))
                    .with_context(process.name.clone()),
                );
            }
        }
        for action in process.unmatched_signals(false) {
            debug!(
                process = %process.name,
                signal = %action.name,
                "dispatch has no audience, will no-op"
            );
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{CategorySpecification, Implementation};

    fn catalog_with_usb() -> InterfaceCatalog {
        let spec: CategorySpecification = serde_json::from_str(
            r#"{
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
            }"#,
        )
        .unwrap();
        let mut catalog = InterfaceCatalog::new();
        catalog.import_specification(spec).unwrap();
        catalog.resolve_references().unwrap();
        catalog.add_implementation("usb.probe", Implementation::new("skel_probe", "skel.c"));
        catalog.add_implementation(
            "usb.disconnect",
            Implementation::new("skel_disconnect", "skel.c"),
        );
        catalog
    }

    fn scenario_spec() -> EnvironmentSpec {
        serde_json::from_str(
            r#"{
                "environment processes": {
                    "driver_scenario": {
                        "labels": {
                            "container": {"container": true},
                            "resource": {"resource": true, "parameter": true}
                        },
                        "process": "(!register).{main}",
                        "subprocesses": {
                            "main": {"process": "[call_probe].[call_disconnect].(deregister)"}
                        },
                        "actions": {
                            "register": {"parameters": ["%container%"]},
                            "deregister": {"parameters": ["%container%"]},
                            "call_probe": {"callback": "%container%.probe", "parameters": ["%resource%"]},
                            "call_disconnect": {"callback": "%container%.disconnect", "parameters": ["%resource%"]}
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn qualifying_template_selected_and_bound() {
        let mut catalog = catalog_with_usb();
        let (model, _) = select_processes(
            &mut catalog,
            &scenario_spec(),
            &BTreeSet::new(),
            &GenerationConfig::default(),
        )
        .unwrap();
        assert_eq!(model.event_processes.len(), 1);
        let process = &model.event_processes[0];
        assert_eq!(process.name, "usb_driver_scenario");
        assert_eq!(
            process.labels["container"].interfaces,
            vec!["usb.driver".to_string()]
        );
        assert!(catalog.get("usb.probe").unwrap().called);
    }

    #[test]
    fn matching_is_deterministic() {
        let catalog = catalog_with_usb();
        let spec = scenario_spec();
        let template = ProcessTemplate::from_spec(
            "driver_scenario",
            &spec.environment_processes["driver_scenario"],
        )
        .unwrap();
        let mut first = template.instantiate("usb");
        let mut second = template.instantiate("usb");
        let score_a = match_labels(&catalog, &mut first, "usb").unwrap();
        let score_b = match_labels(&catalog, &mut second, "usb").unwrap();
        assert_eq!(score_a, score_b);
        for (name, label) in &first.labels {
            assert_eq!(label.interfaces, second.labels[name].interfaces);
        }
    }

    #[test]
    fn higher_native_count_wins() {
        // One template with a literal interface binding, one without: the
        // native match must win even though both qualify.
        let mut catalog = catalog_with_usb();
        let spec: EnvironmentSpec = serde_json::from_str(
            r#"{
                "environment processes": {
                    "anonymous": {
                        "labels": {
                            "c": {"container": true},
                            "r": {"resource": true, "parameter": true}
                        },
                        "process": "(!register).[go]",
                        "actions": {
                            "register": {"parameters": ["%c%"]},
                            "go": {"callback": "%c%.probe", "parameters": ["%r%"]}
                        }
                    },
                    "native": {
                        "labels": {
                            "c": {"container": true, "interface": "driver"},
                            "r": {"resource": true, "parameter": true}
                        },
                        "process": "(!register).[go]",
                        "actions": {
                            "register": {"parameters": ["%c%"]},
                            "go": {"callback": "%c%.probe", "parameters": ["%r%"]}
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let (model, _) = select_processes(
            &mut catalog,
            &spec,
            &BTreeSet::new(),
            &GenerationConfig::default(),
        )
        .unwrap();
        assert_eq!(model.event_processes.len(), 1);
        assert_eq!(model.event_processes[0].template, "native");
    }

    #[test]
    fn category_without_template_is_fatal_by_default() {
        let mut catalog = catalog_with_usb();
        let err = select_processes(
            &mut catalog,
            &EnvironmentSpec::default(),
            &BTreeSet::new(),
            &GenerationConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{err}").contains("usb"));
    }

    #[test]
    fn category_without_template_demotes_to_warning() {
        let mut catalog = catalog_with_usb();
        let config: GenerationConfig =
            serde_json::from_str(r#"{"ignore missed callbacks": true}"#).unwrap();
        let (model, diagnostics) = select_processes(
            &mut catalog,
            &EnvironmentSpec::default(),
            &BTreeSet::new(),
            &config,
        )
        .unwrap();
        assert!(model.event_processes.is_empty());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn function_model_concretized_for_called_function() {
        let mut catalog = catalog_with_usb();
        let mut spec = scenario_spec();
        let model_spec: ProcessSpec = serde_json::from_str(
            r#"{
                "labels": {"arg": {"container": true, "parameter": true}},
                "process": "<pre>.[register].<success> | <fail>",
                "actions": {
                    "pre": {},
                    "register": {"parameters": ["%arg%"]},
                    "success": {"statements": ["return 0;"]},
                    "fail": {"statements": ["return ldv_undef_int_negative();"]}
                }
            }"#,
        )
        .unwrap();
        spec.function_models
            .insert("usb_register_driver".into(), model_spec);
        let called: BTreeSet<String> = ["usb_register_driver".to_string()].into();
        let (model, _) = select_processes(
            &mut catalog,
            &spec,
            &called,
            &GenerationConfig::default(),
        )
        .unwrap();
        assert_eq!(model.model_processes.len(), 1);
        let register_model = &model.model_processes[0];
        assert_eq!(register_model.name, "usb_register_driver");
        // The model's register dispatch is wired to the scenario's receive.
        assert_eq!(register_model.actions["register"].peers.len(), 1);
        let event = &model.event_processes[0];
        assert!(event.actions["register"]
            .peers
            .iter()
            .any(|p| p.process == "usb_register_driver"));
    }

    #[test]
    fn peer_wiring_is_symmetric() {
        let mut catalog = catalog_with_usb();
        let mut spec = scenario_spec();
        let model_spec: ProcessSpec = serde_json::from_str(
            r#"{
                "labels": {"arg": {"container": true, "parameter": true}},
                "process": "[register]",
                "actions": {"register": {"parameters": ["%arg%"]}}
            }"#,
        )
        .unwrap();
        spec.function_models
            .insert("usb_register_driver".into(), model_spec);
        let called: BTreeSet<String> = ["usb_register_driver".to_string()].into();
        let (model, _) =
            select_processes(&mut catalog, &spec, &called, &GenerationConfig::default()).unwrap();
        for process in model
            .event_processes
            .iter()
            .chain(model.model_processes.iter())
        {
            for action in process.actions.values() {
                for peer in &action.peers {
                    let other = model.find(&peer.process).expect("peer process exists");
                    let reciprocal = &other.actions[&peer.action];
                    assert!(
                        reciprocal
                            .peers
                            .iter()
                            .any(|p| p.process == process.name && p.action == action.name),
                        "peer lists must be symmetric"
                    );
                }
            }
        }
    }
}
