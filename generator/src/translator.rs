// translator.rs — C harness emission from process automata
//
// Turns each monomorphic process instance into a control function over its
// automaton states, plus the synthetic entry automaton that sequences
// module init, registration dispatches, the nondeterministic scheduler
// loop, module exit and the final stop. Automata are scheduled by
// nondeterministic choice, never by real threads; a receive that nobody
// satisfied degenerates to a no-op.
//
// Preconditions: instance generation finished; peers reference instances.
// Postconditions: every fragment is filed under a destination file in the
//                 emission context; nothing is written to disk here.
// Failure modes: a callback access that resolves to no interface at all is
//                an internal error; zero implementations only degrade to a
//                skip comment.
// Side effects: none outside the emission context.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use tracing::debug;

use crate::analysis::ModuleAnalysis;
use crate::config::GenerationConfig;
use crate::error::{EmgError, Result};
use crate::fsa::{build_automaton, Automaton, State};
use crate::instances::{InstanceModel, ProcessInstance};
use crate::interfaces::InterfaceCatalog;
use crate::process::{parse_access, Action, ActionKind};
use crate::signature::{Signature, SignatureKind};

/// Fragments go here when no implementation pins a better location.
pub const DEFAULT_FILE: &str = "environment_model.c";

// ── Emission context ────────────────────────────────────────────────────────

/// Declarations and definitions organized by destination file, threaded
/// explicitly through every emission call. Owning it here keeps repeated
/// generation runs in one process independent.
#[derive(Debug, Default)]
pub struct EmissionContext {
    declarations: BTreeMap<String, Vec<String>>,
    definitions: BTreeMap<String, Vec<String>>,
    seen_declarations: BTreeSet<String>,
}

impl EmissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, file: &str, text: impl Into<String>) {
        let text = text.into();
        let key = format!("{file}\u{0}{text}");
        if self.seen_declarations.insert(key) {
            self.declarations
                .entry(file.to_string())
                .or_default()
                .push(text);
        }
    }

    pub fn define(&mut self, file: &str, text: impl Into<String>) {
        self.definitions
            .entry(file.to_string())
            .or_default()
            .push(text.into());
    }

    pub fn declarations(&self) -> &BTreeMap<String, Vec<String>> {
        &self.declarations
    }

    pub fn definitions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.definitions
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TranslationResult {
    pub context: EmissionContext,
    /// Names of the emitted control functions, scheduler order.
    pub control_functions: Vec<String>,
    pub entry_function: String,
}

pub fn translate(
    catalog: &InterfaceCatalog,
    instances: &InstanceModel,
    analysis: &ModuleAnalysis,
    config: &GenerationConfig,
) -> Result<TranslationResult> {
    let mut automata = BTreeMap::new();
    for instance in instances
        .event_instances
        .iter()
        .chain(instances.model_instances.iter())
    {
        automata.insert(
            instance.process.name.clone(),
            build_automaton(&instance.process)?,
        );
    }

    let translator = Translator {
        catalog,
        instances,
        analysis,
        config,
        automata,
    };
    let mut ctx = EmissionContext::new();
    let mut control_functions = Vec::new();
    for instance in instances
        .event_instances
        .iter()
        .chain(instances.model_instances.iter())
    {
        translator.emit_instance_declarations(&mut ctx, instance);
        translator.emit_control_function(&mut ctx, instance)?;
        control_functions.push(control_function_name(&instance.process.name));
    }
    let entry_function = translator.emit_entry(&mut ctx, &control_functions);
    Ok(TranslationResult {
        context: ctx,
        control_functions,
        entry_function,
    })
}

// ── Naming ──────────────────────────────────────────────────────────────────

fn control_function_name(instance: &str) -> String {
    format!("ldv_control_{instance}")
}

fn statevar_name(instance: &str) -> String {
    format!("ldv_statevar_{instance}")
}

fn registered_name(instance: &str) -> String {
    format!("ldv_registered_{instance}")
}

fn label_variable(instance: &str, label: &str) -> String {
    format!("ldv_{instance}_{label}")
}

/// One past the last state id: the automaton is finished.
fn finished_state(automaton: &Automaton) -> usize {
    automaton.states.len()
}

// ── Translator ──────────────────────────────────────────────────────────────

struct Translator<'a> {
    catalog: &'a InterfaceCatalog,
    instances: &'a InstanceModel,
    analysis: &'a ModuleAnalysis,
    config: &'a GenerationConfig,
    automata: BTreeMap<String, Automaton>,
}

impl Translator<'_> {
    fn destination_file(&self, instance: &ProcessInstance) -> String {
        instance
            .choices
            .values()
            .next()
            .map(|i| i.file.clone())
            .unwrap_or_else(|| DEFAULT_FILE.to_string())
    }

    // ── Declarations ────────────────────────────────────────────────────

    fn emit_instance_declarations(&self, ctx: &mut EmissionContext, instance: &ProcessInstance) {
        let file = self.destination_file(instance);
        let name = &instance.process.name;
        let automaton = &self.automata[name];
        let initial = automaton.initial.first().copied().unwrap_or(0);
        ctx.declare(
            &file,
            format!("unsigned int {} = {};", statevar_name(name), initial),
        );
        if self.config.add_registration_guards {
            ctx.declare(&file, format!("int {};", registered_name(name)));
        }
        for label in instance.process.labels.values() {
            let signature = label
                .interfaces
                .first()
                .and_then(|id| label.signatures.get(id))
                .or(label.prior_signature.as_ref());
            if let Some(signature) = signature {
                ctx.declare(
                    &file,
                    declare_variable(signature, &label_variable(name, &label.name)),
                );
            }
        }
    }

    // ── Control function ────────────────────────────────────────────────

    fn emit_control_function(
        &self,
        ctx: &mut EmissionContext,
        instance: &ProcessInstance,
    ) -> Result<()> {
        let name = &instance.process.name;
        let automaton = &self.automata[name];
        let mut out = String::new();
        let mut externs = Vec::new();

        let comment = instance
            .process
            .comment
            .clone()
            .unwrap_or_else(|| self.config.process_comment.clone());
        let _ = writeln!(out, "/* {} */", comment);
        let _ = writeln!(out, "void {}(void)", control_function_name(name));
        let _ = writeln!(out, "{{");
        let _ = writeln!(out, "\tswitch ({}) {{", statevar_name(name));
        for state in &automaton.states {
            let _ = writeln!(out, "\tcase {}: {{", state.id);
            self.emit_state(&mut out, instance, automaton, state, &mut externs)?;
            let _ = writeln!(out, "\t}} break;");
        }
        let _ = writeln!(out, "\tdefault:");
        let _ = writeln!(out, "\t\tbreak;");
        let _ = writeln!(out, "\t}}");
        let _ = writeln!(out, "}}");

        let file = self.destination_file(instance);
        for declaration in externs {
            ctx.declare(&file, declaration);
        }
        ctx.define(&file, out);
        debug!(process = %name, states = automaton.states.len(), "emitted control function");
        Ok(())
    }

    fn emit_state(
        &self,
        out: &mut String,
        instance: &ProcessInstance,
        automaton: &Automaton,
        state: &State,
        externs: &mut Vec<String>,
    ) -> Result<()> {
        let Some(action_name) = &state.action else {
            // Artificial jump state.
            self.emit_transition(out, instance, automaton, state, 2);
            return Ok(());
        };
        let action = instance
            .process
            .actions
            .get(action_name)
            .ok_or_else(|| {
                EmgError::internal(format!(
                    "state {} of '{}' references unknown action '{}'",
                    state.id, instance.process.name, action_name
                ))
            })?;

        self.emit_action_comment(out, action);

        let guard = self.render_guard(instance, action);
        let mut body = String::new();
        match &action.kind {
            ActionKind::Receive { .. } => {
                // Receives are driven by the sender's transfer block; an
                // unsatisfied receive stays put.
                if action.peers.is_empty() {
                    let _ = writeln!(body, "\t\t/* receive {}: no peers */", action.name);
                } else {
                    let _ = writeln!(
                        body,
                        "\t\t/* receive {}: waiting for a dispatch */",
                        action.name
                    );
                }
                out.push_str(&body);
                return Ok(());
            }
            ActionKind::Dispatch { broadcast } => {
                self.emit_dispatch(&mut body, instance, action, *broadcast)?;
            }
            ActionKind::Call { callback, retval } => {
                self.emit_call(
                    &mut body,
                    instance,
                    action,
                    callback,
                    retval.as_deref(),
                    externs,
                )?;
            }
            ActionKind::CallRetval { parameter } => {
                let variable = self.access_variable(instance, parameter)?;
                let _ = writeln!(body, "\t\t{} = ldv_undef_int();", variable);
            }
            ActionKind::Condition | ActionKind::Subprocess => {
                for statement in &action.statements {
                    let _ = writeln!(body, "\t\t{}", self.substitute(instance, statement));
                }
            }
        }

        // Guard composition: with several predecessors the guard is an
        // assumption, the branch that reached this state already implied
        // it; otherwise it is a genuine conditional around body and
        // transition.
        match guard {
            Some(guard) if state.predecessors.len() > 1 => {
                let _ = writeln!(out, "\t\tldv_assume({});", guard);
                out.push_str(&body);
                self.emit_transition(out, instance, automaton, state, 2);
            }
            Some(guard) => {
                let _ = writeln!(out, "\t\tif ({}) {{", guard);
                for line in body.lines() {
                    let _ = writeln!(out, "\t{}", line);
                }
                self.emit_transition(out, instance, automaton, state, 3);
                let _ = writeln!(out, "\t\t}}");
            }
            None => {
                out.push_str(&body);
                self.emit_transition(out, instance, automaton, state, 2);
            }
        }
        Ok(())
    }

    fn emit_action_comment(&self, out: &mut String, action: &Action) {
        let kind_key = match &action.kind {
            ActionKind::Dispatch { .. } => "dispatch",
            ActionKind::Receive { .. } => "receive",
            ActionKind::Call { .. } | ActionKind::CallRetval { .. } => "callback",
            ActionKind::Condition => "condition",
            ActionKind::Subprocess => "subprocess",
        };
        let text = action
            .comment
            .clone()
            .or_else(|| self.config.action_comments.get(kind_key).cloned());
        if let Some(text) = text {
            let _ = writeln!(out, "\t\t/* {}: {} */", action.name, text);
        }
    }

    fn render_guard(&self, instance: &ProcessInstance, action: &Action) -> Option<String> {
        if action.condition.is_empty() {
            return None;
        }
        let rendered: Vec<String> = action
            .condition
            .iter()
            .map(|c| self.substitute(instance, c))
            .collect();
        Some(rendered.join(" && "))
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    fn emit_dispatch(
        &self,
        out: &mut String,
        instance: &ProcessInstance,
        action: &Action,
        broadcast: bool,
    ) -> Result<()> {
        let blocks: Vec<String> = action
            .peers
            .iter()
            .filter_map(|peer| {
                self.receiver_block(instance, action, &peer.process, &peer.action)
                    .transpose()
            })
            .collect::<Result<_>>()?;

        if blocks.is_empty() {
            let _ = writeln!(out, "\t\t/* dispatch {}: no peers */", action.name);
            return Ok(());
        }
        if broadcast {
            for block in &blocks {
                out.push_str(block);
            }
            return Ok(());
        }
        match blocks.len() {
            1 => out.push_str(&blocks[0]),
            2 => {
                let _ = writeln!(out, "\t\tif (ldv_undef_int()) {{");
                indent_block(out, &blocks[0]);
                let _ = writeln!(out, "\t\t}} else {{");
                indent_block(out, &blocks[1]);
                let _ = writeln!(out, "\t\t}}");
            }
            _ => {
                let _ = writeln!(out, "\t\tswitch (ldv_undef_int()) {{");
                for (index, block) in blocks.iter().enumerate() {
                    let _ = writeln!(out, "\t\tcase {}:", index);
                    indent_block(out, block);
                    let _ = writeln!(out, "\t\t\tbreak;");
                }
                let _ = writeln!(out, "\t\tdefault:");
                let _ = writeln!(out, "\t\t\tldv_stop();");
                let _ = writeln!(out, "\t\t}}");
            }
        }
        Ok(())
    }

    /// The parameter-transfer and state-update block for one receiver.
    /// Returns `None` when the peer instance or its receive state vanished
    /// (pruned after wiring).
    fn receiver_block(
        &self,
        sender: &ProcessInstance,
        action: &Action,
        peer_process: &str,
        peer_action: &str,
    ) -> Result<Option<String>> {
        let Some(peer) = self.instances.find(peer_process) else {
            return Ok(None);
        };
        let Some(automaton) = self.automata.get(peer_process) else {
            return Ok(None);
        };
        let Some(receive_state) = automaton
            .states
            .iter()
            .find(|s| s.action.as_deref() == Some(peer_action))
        else {
            return Ok(None);
        };
        let Some(receive) = peer.process.actions.get(peer_action) else {
            return Ok(None);
        };

        let mut block = String::new();
        let _ = writeln!(block, "\t\t/* deliver {} to {} */", action.name, peer_process);
        for (send_expr, recv_expr) in action.parameters.iter().zip(&receive.parameters) {
            let source = self.access_variable(sender, send_expr)?;
            let target = self.access_variable(peer, recv_expr)?;
            let _ = writeln!(block, "\t\t{} = {};", target, source);
        }
        let next = receive_state
            .successors
            .first()
            .copied()
            .unwrap_or_else(|| finished_state(automaton));
        let _ = writeln!(block, "\t\t{} = {};", statevar_name(peer_process), next);
        if self.config.add_registration_guards {
            match peer_action {
                "register" => {
                    let _ = writeln!(block, "\t\t{} = 1;", registered_name(peer_process));
                }
                "deregister" => {
                    let _ = writeln!(block, "\t\t{} = 0;", registered_name(peer_process));
                }
                _ => {}
            }
        }
        Ok(Some(block))
    }

    // ── Call ────────────────────────────────────────────────────────────

    fn emit_call(
        &self,
        out: &mut String,
        instance: &ProcessInstance,
        action: &Action,
        callback: &str,
        retval: Option<&str>,
        externs: &mut Vec<String>,
    ) -> Result<()> {
        let accesses = instance.process.extended_accesses(self.catalog, callback)?;
        if accesses.is_empty() {
            let _ = writeln!(
                out,
                "\t\t/* skip {}: access {:?} resolves to no interface */",
                action.name, callback
            );
            return Ok(());
        }
        // A label bound to several callbacks means the access admits more
        // than one target; all of them are invoked unless implicit calls
        // are disabled.
        let limit = if self.config.implicit_callback_calls {
            accesses.len()
        } else {
            1
        };

        if self.should_reinitialize(action) {
            for parameter in &action.parameters {
                let variable = self.access_variable(instance, parameter)?;
                let (label_name, _) = parse_access(parameter)?;
                let is_resource = instance
                    .process
                    .labels
                    .get(&label_name)
                    .is_some_and(|l| l.resource);
                if is_resource {
                    let _ = writeln!(out, "\t\t{} = ldv_xmalloc(sizeof(*{}));", variable, variable);
                }
            }
        }

        let mut emitted = false;
        for (index, access) in accesses.iter().take(limit).enumerate() {
            let terminal = access.terminal_interface().ok_or_else(|| {
                EmgError::internal(format!("access {:?} resolved to an empty chain", callback))
            })?;
            let Some(implementation) = instance.choices.get(terminal) else {
                continue;
            };
            let Some(interface) = self.catalog.get(terminal) else {
                continue;
            };
            let target = implementation.value.trim_start_matches('&').trim();
            if self.config.convert_statics_to_globals {
                if let Some(prototype) = extern_prototype(&interface.signature, target) {
                    externs.push(prototype);
                }
            }
            let _ = writeln!(out, "\t\t/* {} */", self.config.callback_comment);

            // Arguments: declared process labels where matched, fresh
            // scratch variables elsewhere, allocated around the call.
            let mut arguments = Vec::new();
            let mut scratch: Vec<(String, bool)> = Vec::new();
            let param_interfaces = interface.signature.parameter_interfaces();
            let param_count = param_interfaces.len().max(action.parameters.len());
            for position in 0..param_count {
                if let Some(access_expr) = action.parameters.get(position) {
                    arguments.push(self.access_variable(instance, access_expr)?);
                    continue;
                }
                let variable = format!(
                    "{}_{}_arg_p{}",
                    label_variable(&instance.process.name, &action.name),
                    index,
                    position
                );
                let pointer = param_interfaces
                    .get(position)
                    .and_then(|i| i.as_ref())
                    .and_then(|id| self.catalog.get(id))
                    .map(|i| i.signature.pointer)
                    .unwrap_or(true);
                scratch.push((variable.clone(), pointer));
                arguments.push(variable);
            }

            for (variable, pointer) in &scratch {
                let _ = writeln!(out, "\t\tvoid *{};", variable);
                if *pointer {
                    let _ = writeln!(out, "\t\t{} = ldv_xmalloc(1);", variable);
                }
            }

            let invocation = format!("{}({})", target, arguments.join(", "));
            let call_line = match retval {
                Some(retval) => format!(
                    "{} = {};",
                    self.access_variable(instance, retval)?,
                    invocation
                ),
                None => format!("{};", invocation),
            };
            if self.config.add_registration_guards {
                let _ = writeln!(
                    out,
                    "\t\tif ({}) {{",
                    registered_name(&instance.process.name)
                );
                let _ = writeln!(out, "\t\t\t{}", call_line);
                let _ = writeln!(out, "\t\t}}");
            } else {
                let _ = writeln!(out, "\t\t{}", call_line);
            }

            for (variable, pointer) in &scratch {
                if *pointer {
                    let _ = writeln!(out, "\t\tldv_free({});", variable);
                }
            }
            emitted = true;
        }
        if !emitted {
            let _ = writeln!(out, "\t\t/* skip {}: no implementations */", action.name);
        }
        Ok(())
    }

    fn should_reinitialize(&self, action: &Action) -> bool {
        self.config.reinitialized_actions.contains(&action.name)
    }

    // ── Transitions ─────────────────────────────────────────────────────

    fn emit_transition(
        &self,
        out: &mut String,
        instance: &ProcessInstance,
        automaton: &Automaton,
        state: &State,
        depth: usize,
    ) {
        let pad = "\t".repeat(depth);
        let statevar = statevar_name(&instance.process.name);
        match state.successors.len() {
            0 => {
                let _ = writeln!(out, "{pad}{} = {};", statevar, finished_state(automaton));
            }
            1 => {
                let _ = writeln!(out, "{pad}{} = {};", statevar, state.successors[0]);
            }
            2 => {
                let _ = writeln!(out, "{pad}if (ldv_undef_int())");
                let _ = writeln!(out, "{pad}\t{} = {};", statevar, state.successors[0]);
                let _ = writeln!(out, "{pad}else");
                let _ = writeln!(out, "{pad}\t{} = {};", statevar, state.successors[1]);
            }
            _ => {
                let _ = writeln!(out, "{pad}switch (ldv_undef_int()) {{");
                for (index, successor) in state.successors.iter().enumerate() {
                    let _ = writeln!(out, "{pad}case {}:", index);
                    let _ = writeln!(out, "{pad}\t{} = {};", statevar, successor);
                    let _ = writeln!(out, "{pad}\tbreak;");
                }
                let _ = writeln!(out, "{pad}default:");
                let _ = writeln!(out, "{pad}\tldv_stop();");
                let _ = writeln!(out, "{pad}}}");
            }
        }
    }

    // ── Entry automaton ─────────────────────────────────────────────────

    /// The synthetic entry: module init, success branch, default
    /// registration dispatches, the scheduler loop, module exit, stop.
    fn emit_entry(&self, ctx: &mut EmissionContext, control_functions: &[String]) -> String {
        for function in control_functions {
            ctx.declare(DEFAULT_FILE, format!("void {}(void);", function));
        }
        let mut out = String::new();
        let _ = writeln!(out, "/* {} */", self.config.process_comment);
        let _ = writeln!(out, "void ldv_emg_main(void)");
        let _ = writeln!(out, "{{");
        let _ = writeln!(out, "\tint ldv_init_ret = 0;");
        if let Some(init) = self.analysis.init_functions.values().next() {
            let _ = writeln!(out, "\tldv_init_ret = {}();", init);
        } else {
            let _ = writeln!(out, "\t/* module has no init function */");
        }
        let _ = writeln!(out, "\tif (ldv_init_ret)");
        let _ = writeln!(out, "\t\tldv_stop();");

        for instance in &self.instances.event_instances {
            self.emit_default_registration(&mut out, instance);
        }

        let _ = writeln!(out, "\twhile (ldv_undef_int()) {{");
        let _ = writeln!(out, "\t\tswitch (ldv_undef_int()) {{");
        for (index, function) in control_functions.iter().enumerate() {
            let _ = writeln!(out, "\t\tcase {}:", index);
            let _ = writeln!(out, "\t\t\t{}();", function);
            let _ = writeln!(out, "\t\t\tbreak;");
        }
        let _ = writeln!(out, "\t\tdefault:");
        let _ = writeln!(out, "\t\t\tbreak;");
        let _ = writeln!(out, "\t\t}}");
        let _ = writeln!(out, "\t}}");

        if let Some(exit) = self.analysis.exit_functions.values().next() {
            let _ = writeln!(out, "\t{}();", exit);
        }
        let _ = writeln!(out, "\tldv_stop();");
        let _ = writeln!(out, "}}");

        ctx.define(DEFAULT_FILE, out);
        "ldv_emg_main".to_string()
    }

    /// An unpeered register receive gets its registration directly from the
    /// entry: assign the chosen container implementation to the receive
    /// parameters and advance the automaton past the receive state.
    fn emit_default_registration(&self, out: &mut String, instance: &ProcessInstance) {
        let name = &instance.process.name;
        let automaton = &self.automata[name];
        let Some(register) = instance.process.actions.get("register") else {
            return;
        };
        if !matches!(register.kind, ActionKind::Receive { .. }) || !register.peers.is_empty() {
            return;
        }
        let Some(state) = automaton
            .states
            .iter()
            .find(|s| s.action.as_deref() == Some("register"))
        else {
            return;
        };
        let _ = writeln!(out, "\t/* default registration of {} */", name);
        for parameter in &register.parameters {
            let Ok(accesses) = instance.process.extended_accesses(self.catalog, parameter) else {
                continue;
            };
            let Some(terminal) = accesses.first().and_then(|a| a.terminal_interface()) else {
                continue;
            };
            if let Some(implementation) = instance.choices.get(terminal) {
                if let Ok(variable) = self.access_variable(instance, parameter) {
                    let value = implementation.value.trim_start_matches('&').trim();
                    let _ = writeln!(out, "\t{} = &{};", variable, value);
                }
            }
        }
        let next = state
            .successors
            .first()
            .copied()
            .unwrap_or_else(|| finished_state(automaton));
        let _ = writeln!(out, "\t{} = {};", statevar_name(name), next);
        if self.config.add_registration_guards {
            let _ = writeln!(out, "\t{} = 1;", registered_name(name));
        }
    }

    // ── Access substitution ─────────────────────────────────────────────

    fn access_variable(&self, instance: &ProcessInstance, expression: &str) -> Result<String> {
        let (label, fields) = parse_access(expression)?;
        if !instance.process.labels.contains_key(&label) {
            return Err(EmgError::spec(
                &instance.process.name,
                format!("access {expression:?} names unknown label '{label}'"),
            ));
        }
        let mut variable = label_variable(&instance.process.name, &label);
        for field in fields {
            variable.push_str("->");
            variable.push_str(&field);
        }
        Ok(variable)
    }

    /// Textual substitution of every `%label%` token (with optional dotted
    /// field tail) in free-form condition and statement text.
    fn substitute(&self, instance: &ProcessInstance, text: &str) -> String {
        let mut out = String::new();
        let mut rest = text;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                out.push('%');
                rest = after;
                continue;
            };
            let token = &after[..end];
            let mut parts = token.split('.');
            let label = parts.next().unwrap_or_default();
            out.push_str(&label_variable(&instance.process.name, label));
            for field in parts {
                out.push_str("->");
                out.push_str(field);
            }
            rest = &after[end + 1..];
            // A dotted tail outside the token binds to the same access.
            while let Some(tail) = rest.strip_prefix('.') {
                let split = tail
                    .find(|c: char| !c.is_alphanumeric() && c != '_')
                    .unwrap_or(tail.len());
                if split == 0 {
                    break;
                }
                out.push_str("->");
                out.push_str(&tail[..split]);
                rest = &tail[split..];
            }
        }
        out.push_str(rest);
        out
    }
}

fn indent_block(out: &mut String, block: &str) {
    for line in block.lines() {
        let _ = writeln!(out, "\t{}", line);
    }
}

/// Forward declaration of a callback implementation. Module-static
/// definitions are assumed promoted to external linkage before the harness
/// is compiled; the prototype makes the call site self-contained.
fn extern_prototype(signature: &Signature, name: &str) -> Option<String> {
    let SignatureKind::Function { ret, params } = &signature.kind else {
        return None;
    };
    let ret_text = ret
        .as_ref()
        .map(|r| r.expression.clone())
        .unwrap_or_else(|| "void".to_string());
    let params_text: Vec<String> = params
        .iter()
        .map(|p| match p {
            Some(s) => s.expression.clone(),
            None => "void *".to_string(),
        })
        .collect();
    Some(format!(
        "extern {} {}({});",
        ret_text,
        name,
        params_text.join(", ")
    ))
}

/// Render a C variable declaration for a label signature.
fn declare_variable(signature: &Signature, name: &str) -> String {
    match &signature.kind {
        SignatureKind::Function { ret, params } => {
            let ret_text = ret
                .as_ref()
                .map(|r| r.expression.clone())
                .unwrap_or_else(|| "void".to_string());
            let params_text: Vec<String> = params
                .iter()
                .map(|p| match p {
                    Some(s) => s.expression.clone(),
                    None => "void *".to_string(),
                })
                .collect();
            format!("{} (*{})({});", ret_text, name, params_text.join(", "))
        }
        _ => {
            let base = signature.expression.replace('*', "");
            let base = base.trim();
            let pointer = signature.pointer || signature.expression.contains('*');
            if pointer {
                format!("{} *{};", base, name)
            } else {
                format!("{} {};", base, name)
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
