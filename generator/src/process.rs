// process.rs — Process model
//
// Processes describe participants of the generated environment: a template
// (shared, read-only, as authored in the environment-process specification)
// and its concrete copies bound to a category and to interface
// implementations. Labels are the typed slots of a process, actions the
// steps of its behavior expression.
//
// Preconditions: behavior expressions are parsed through `calculus`.
// Postconditions: a template passes usage validation before any copy of it
//                 can enter the model.
// Failure modes: unknown action or label names in expressions are fatal.
// Side effects: none; the catalog is only read here.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::calculus::{self, ProcessExpr, UsageRole};
use crate::error::{EmgError, Result};
use crate::interfaces::InterfaceCatalog;
use crate::signature::Signature;

// ── Input shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, LabelSpec>,
    pub process: String,
    #[serde(default)]
    pub subprocesses: BTreeMap<String, SubprocessSpec>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubprocessSpec {
    pub process: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LabelSpec {
    #[serde(default)]
    pub container: bool,
    #[serde(default)]
    pub resource: bool,
    #[serde(default)]
    pub callback: bool,
    #[serde(default)]
    pub parameter: bool,
    #[serde(default)]
    pub pointer: bool,
    #[serde(default)]
    pub interface: Option<OneOrMany>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub condition: Vec<String>,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub callback: Option<String>,
    #[serde(default)]
    pub retval: Option<String>,
}

// ── Labels ──────────────────────────────────────────────────────────────────

/// A typed slot within a process. `declared_interfaces` holds the literals
/// from the specification; `interfaces` grows as matching binds the label.
#[derive(Debug, Clone, Default)]
pub struct Label {
    pub name: String,
    pub container: bool,
    pub resource: bool,
    pub callback: bool,
    pub parameter: bool,
    pub pointer: bool,
    pub value: Option<String>,
    pub declared_interfaces: Vec<String>,
    pub interfaces: Vec<String>,
    pub signatures: BTreeMap<String, Signature>,
    pub prior_signature: Option<Signature>,
}

impl Label {
    fn from_spec(name: &str, spec: &LabelSpec) -> Result<Self> {
        let prior_signature = match &spec.signature {
            Some(text) => Some(Signature::parse(text)?),
            None => None,
        };
        Ok(Label {
            name: name.to_string(),
            container: spec.container,
            resource: spec.resource,
            callback: spec.callback,
            parameter: spec.parameter,
            pointer: spec.pointer,
            value: spec.value.clone(),
            declared_interfaces: match &spec.interface {
                Some(one_or_many) => match one_or_many {
                    OneOrMany::One(s) => vec![s.clone()],
                    OneOrMany::Many(v) => v.clone(),
                },
                None => Vec::new(),
            },
            interfaces: Vec::new(),
            signatures: BTreeMap::new(),
            prior_signature,
        })
    }

    pub fn is_matched(&self) -> bool {
        !self.interfaces.is_empty()
    }

    /// Bind the label to an interface, recording the signature it takes
    /// when satisfying that interface.
    pub fn bind(&mut self, interface_id: &str, signature: Signature) {
        if !self.interfaces.iter().any(|i| i == interface_id) {
            self.interfaces.push(interface_id.to_string());
        }
        self.signatures.insert(interface_id.to_string(), signature);
    }

    /// Two labels can stand on opposite ends of a signal iff they play the
    /// same role, or resolve to literally the same interface.
    pub fn compatible(&self, other: &Label) -> bool {
        if self.container && other.container {
            return true;
        }
        if self.resource && other.resource {
            return true;
        }
        if self.callback && other.callback {
            return true;
        }
        !self.interfaces.is_empty() && self.interfaces == other.interfaces
    }
}

// ── Actions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Dispatch { broadcast: bool },
    Receive { replicative: bool },
    Call { callback: String, retval: Option<String> },
    CallRetval { parameter: String },
    Condition,
    Subprocess,
}

/// A step in a process's behavior.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub comment: Option<String>,
    pub condition: Vec<String>,
    pub statements: Vec<String>,
    pub parameters: Vec<String>,
    pub peers: Vec<Peer>,
}

/// Reference to a wired counterpart action in another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub process: String,
    pub action: String,
}

impl Action {
    pub fn is_signal(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Dispatch { .. } | ActionKind::Receive { .. }
        )
    }

    pub fn is_replicative_receive(&self) -> bool {
        matches!(self.kind, ActionKind::Receive { replicative: true })
    }
}

// ── Access expressions ──────────────────────────────────────────────────────

/// Split `%label%.field.field` (or `%label.field%`) into the label name and
/// the tail field path.
pub fn parse_access(expression: &str) -> Result<(String, Vec<String>)> {
    let trimmed = expression.trim();
    let inner = trimmed.strip_prefix('%').ok_or_else(|| {
        EmgError::spec(trimmed, "label access must start with a '%label%' reference")
    })?;
    let (head, rest) = inner
        .split_once('%')
        .ok_or_else(|| EmgError::spec(trimmed, "unterminated '%label%' reference"))?;
    let mut fields: Vec<String> = head
        .split('.')
        .skip(1)
        .map(str::to_string)
        .collect();
    let label = head.split('.').next().unwrap_or_default().to_string();
    fields.extend(
        rest.split('.')
            .filter(|f| !f.is_empty())
            .map(str::to_string),
    );
    if label.is_empty() {
        return Err(EmgError::spec(trimmed, "empty label reference"));
    }
    Ok((label, fields))
}

/// A resolved interpretation of a dotted access against a chain of
/// interfaces. One access expression yields one `Access` per label
/// interface whose field graph admits the tail path.
#[derive(Debug, Clone)]
pub struct Access {
    pub expression: String,
    pub label: String,
    pub fields: Vec<String>,
    /// Interfaces traversed: the label's own interface first, then one per
    /// field step. The last entry is the terminal interface.
    pub interfaces: Vec<String>,
}

impl Access {
    pub fn terminal_interface(&self) -> Option<&str> {
        self.interfaces.last().map(String::as_str)
    }

    pub fn base_interface(&self) -> Option<&str> {
        self.interfaces.first().map(String::as_str)
    }
}

// ── Process template ────────────────────────────────────────────────────────

/// An abstract process as authored: validated labels, actions and parsed
/// behavior expressions. Copied, never mutated.
#[derive(Debug, Clone)]
pub struct ProcessTemplate {
    pub name: String,
    pub comment: Option<String>,
    pub labels: BTreeMap<String, Label>,
    pub actions: BTreeMap<String, Action>,
    pub expression: String,
    pub ast: ProcessExpr,
    pub subprocess_asts: BTreeMap<String, ProcessExpr>,
}

impl ProcessTemplate {
    /// Build and validate a template from its specification entry.
    pub fn from_spec(name: &str, spec: &ProcessSpec) -> Result<Self> {
        let ast = calculus::parse_expression(name, &spec.process)?;
        let mut subprocess_asts = BTreeMap::new();
        let mut usage: BTreeMap<String, UsageRole> = BTreeMap::new();
        ast.collect_usage(name, &mut usage)?;
        for (sub_name, sub) in &spec.subprocesses {
            let context = format!("{name}/{sub_name}");
            let sub_ast = calculus::parse_expression(&context, &sub.process)?;
            sub_ast.collect_usage(name, &mut usage)?;
            subprocess_asts.insert(sub_name.clone(), sub_ast);
        }

        // Every name in an expression must resolve; every declared action
        // and subprocess must be referenced somewhere.
        for (used, role) in &usage {
            if *role == UsageRole::Subprocess && !spec.subprocesses.contains_key(used) {
                return Err(EmgError::spec(
                    name,
                    format!("subprocess '{used}' is referenced but not declared"),
                ));
            }
        }
        for declared in spec.actions.keys() {
            if !usage.contains_key(declared) {
                return Err(EmgError::spec(
                    name,
                    format!("action '{declared}' is not used actually"),
                ));
            }
        }
        for declared in spec.subprocesses.keys() {
            if usage.get(declared) != Some(&UsageRole::Subprocess) {
                return Err(EmgError::spec(
                    name,
                    format!("subprocess '{declared}' is not used actually"),
                ));
            }
        }

        let mut labels = BTreeMap::new();
        for (label_name, label_spec) in &spec.labels {
            labels.insert(label_name.clone(), Label::from_spec(label_name, label_spec)?);
        }

        let default_spec = ActionSpec::default();
        let mut actions = BTreeMap::new();
        for (action_name, role) in &usage {
            let attrs = spec.actions.get(action_name).unwrap_or(&default_spec);
            let kind = action_kind(name, action_name, *role, attrs, &ast, &subprocess_asts)?;
            actions.insert(
                action_name.clone(),
                Action {
                    name: action_name.clone(),
                    kind,
                    comment: attrs.comment.clone(),
                    condition: attrs.condition.clone(),
                    statements: attrs.statements.clone(),
                    parameters: attrs.parameters.clone(),
                    peers: Vec::new(),
                },
            );
        }

        Ok(ProcessTemplate {
            name: name.to_string(),
            comment: spec.comment.clone(),
            labels,
            actions,
            expression: spec.process.clone(),
            ast,
            subprocess_asts,
        })
    }

    /// Clone the template into a concrete process bound to a category.
    /// Unqualified interface literals on labels are qualified against the
    /// category here; structural data is owned by the copy.
    pub fn instantiate(&self, category: &str) -> Process {
        let mut labels = self.labels.clone();
        for label in labels.values_mut() {
            for declared in &mut label.declared_interfaces {
                if !declared.contains('.') {
                    *declared = format!("{category}.{declared}");
                }
            }
        }
        Process {
            name: self.name.clone(),
            template: self.name.clone(),
            category: category.to_string(),
            comment: self.comment.clone(),
            labels,
            actions: self.actions.clone(),
            expression: self.expression.clone(),
            ast: self.ast.clone(),
            subprocess_asts: self.subprocess_asts.clone(),
        }
    }
}

/// Determine an action's kind from its syntactic role and declared
/// attributes. A `callback` attribute turns a dispatch- or condition-shaped
/// action into a call; a bare `retval` attribute makes a retval assignment.
fn action_kind(
    process: &str,
    action: &str,
    role: UsageRole,
    attrs: &ActionSpec,
    ast: &ProcessExpr,
    subprocess_asts: &BTreeMap<String, ProcessExpr>,
) -> Result<ActionKind> {
    if let Some(callback) = &attrs.callback {
        if matches!(role, UsageRole::Receive | UsageRole::Subprocess) {
            return Err(EmgError::spec(
                process,
                format!("action '{action}' declares a callback but is used as a {role}"),
            ));
        }
        return Ok(ActionKind::Call {
            callback: callback.clone(),
            retval: attrs.retval.clone(),
        });
    }
    if let Some(retval) = &attrs.retval {
        return Ok(ActionKind::CallRetval {
            parameter: retval.clone(),
        });
    }
    Ok(match role {
        UsageRole::Receive => ActionKind::Receive {
            replicative: find_signal_flag(ast, subprocess_asts, action, SignalFlag::Replicative),
        },
        UsageRole::Dispatch => ActionKind::Dispatch {
            broadcast: find_signal_flag(ast, subprocess_asts, action, SignalFlag::Broadcast),
        },
        UsageRole::Condition => ActionKind::Condition,
        UsageRole::Subprocess => ActionKind::Subprocess,
    })
}

#[derive(Clone, Copy)]
enum SignalFlag {
    Replicative,
    Broadcast,
}

fn find_signal_flag(
    ast: &ProcessExpr,
    subprocess_asts: &BTreeMap<String, ProcessExpr>,
    action: &str,
    flag: SignalFlag,
) -> bool {
    fn walk(expr: &ProcessExpr, action: &str, flag: SignalFlag) -> Option<bool> {
        match expr {
            ProcessExpr::Receive {
                name, replicative, ..
            } if name == action => match flag {
                SignalFlag::Replicative => Some(*replicative),
                SignalFlag::Broadcast => Some(false),
            },
            ProcessExpr::Dispatch {
                name, broadcast, ..
            } if name == action => match flag {
                SignalFlag::Broadcast => Some(*broadcast),
                SignalFlag::Replicative => Some(false),
            },
            ProcessExpr::Sequence(items) | ProcessExpr::Choice(items) => {
                items.iter().find_map(|item| walk(item, action, flag))
            }
            _ => None,
        }
    }
    walk(ast, action, flag)
        .or_else(|| {
            subprocess_asts
                .values()
                .find_map(|sub| walk(sub, action, flag))
        })
        .unwrap_or(false)
}

// ── Concrete process ────────────────────────────────────────────────────────

/// A concrete process in the model: a deep copy of a template, bound to a
/// category; mutated by matching and instance generation, never destroyed
/// once added.
#[derive(Debug, Clone)]
pub struct Process {
    pub name: String,
    pub template: String,
    pub category: String,
    pub comment: Option<String>,
    pub labels: BTreeMap<String, Label>,
    pub actions: BTreeMap<String, Action>,
    pub expression: String,
    pub ast: ProcessExpr,
    pub subprocess_asts: BTreeMap<String, ProcessExpr>,
}

impl Process {
    /// Resolve `%label%.field...` to the label and its tail path. An access
    /// naming a nonexistent label is fatal.
    pub fn resolve_access(&self, expression: &str) -> Result<(&Label, Vec<String>)> {
        let (label_name, fields) = parse_access(expression)?;
        let label = self.labels.get(&label_name).ok_or_else(|| {
            EmgError::spec(
                &self.name,
                format!("access {expression:?} names unknown label '{label_name}'"),
            )
        })?;
        Ok((label, fields))
    }

    /// Resolve an access expression into every interpretation admitted by
    /// the label's bound interfaces and the catalog's field graph.
    pub fn extended_accesses(
        &self,
        catalog: &InterfaceCatalog,
        expression: &str,
    ) -> Result<Vec<Access>> {
        let (label, fields) = self.resolve_access(expression)?;
        let mut accesses = Vec::new();
        for base in &label.interfaces {
            let mut chain = vec![base.clone()];
            let mut current = base.clone();
            let mut complete = true;
            for field in &fields {
                let next = catalog
                    .get(&current)
                    .and_then(|i| i.field_interfaces.get(field).cloned());
                match next {
                    Some(child) => {
                        chain.push(child.clone());
                        current = child;
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                accesses.push(Access {
                    expression: expression.trim().to_string(),
                    label: label.name.clone(),
                    fields: fields.clone(),
                    interfaces: chain,
                });
            }
        }
        Ok(accesses)
    }

    /// Signal actions without a single peer, receives or dispatches.
    pub fn unmatched_signals(&self, receives: bool) -> Vec<&Action> {
        self.actions
            .values()
            .filter(|a| a.peers.is_empty())
            .filter(|a| match a.kind {
                ActionKind::Receive { .. } => receives,
                ActionKind::Dispatch { .. } => !receives,
                _ => false,
            })
            .collect()
    }

    /// Wire a peer onto an action, ignoring duplicates.
    pub fn add_peer(&mut self, action: &str, peer: Peer) {
        if let Some(a) = self.actions.get_mut(action) {
            if !a.peers.contains(&peer) {
                a.peers.push(peer);
            }
        }
    }

    /// Drop every peer reference to a removed process.
    pub fn forget_peer_process(&mut self, process: &str) {
        for action in self.actions.values_mut() {
            action.peers.retain(|p| p.process != process);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
