// fsa.rs — Finite-state automaton construction
//
// Flattens a process's behavior expression into states and transitions:
// one state per executed action occurrence, repetition suffixes expanded
// into chains, subprocess references spliced inline with back-edges for
// repeated references (recursion in the expression becomes a loop in the
// automaton).
//
// Preconditions: the expression passed usage validation.
// Postconditions: state ids are dense, predecessors mirror successors.
// Failure modes: a label-driven repetition whose label value is not
//                numeric falls back to one with a warning.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::calculus::{ProcessExpr, Repetition};
use crate::error::{EmgError, Result};
use crate::process::Process;

/// One reachable point in a process's action graph.
#[derive(Debug, Clone)]
pub struct State {
    pub id: usize,
    /// Action executed on entering the state; `None` only for the
    /// artificial terminal state.
    pub action: Option<String>,
    pub successors: Vec<usize>,
    pub predecessors: Vec<usize>,
}

#[derive(Debug)]
pub struct Automaton {
    pub process: String,
    pub states: Vec<State>,
    pub initial: Vec<usize>,
    pub terminal: Vec<usize>,
}

impl Automaton {
    pub fn state(&self, id: usize) -> &State {
        &self.states[id]
    }
}

// ── Construction ────────────────────────────────────────────────────────────

struct Builder<'a> {
    process: &'a Process,
    states: Vec<State>,
    /// Entry states of subprocesses already spliced, for back-edges.
    subprocess_entries: BTreeMap<String, Vec<usize>>,
    in_progress: BTreeSet<String>,
    /// Artificial jump states awaiting the entries of a subprocess still
    /// under construction when they were created.
    pending_jumps: Vec<(usize, String)>,
}

/// A built expression segment: where it can be entered and where control
/// falls out of it. An empty exit list means control never falls through
/// (a back-edge swallowed it).
struct Segment {
    entries: Vec<usize>,
    exits: Vec<usize>,
}

pub fn build_automaton(process: &Process) -> Result<Automaton> {
    let mut builder = Builder {
        process,
        states: Vec::new(),
        subprocess_entries: BTreeMap::new(),
        in_progress: BTreeSet::new(),
        pending_jumps: Vec::new(),
    };
    let segment = builder.build(&process.ast)?;

    let pending = std::mem::take(&mut builder.pending_jumps);
    for (jump, name) in pending {
        let entries = builder
            .subprocess_entries
            .get(&name)
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            builder.connect(jump, entry);
        }
    }

    let mut states = builder.states;
    let edges: Vec<(usize, usize)> = states
        .iter()
        .flat_map(|s| s.successors.iter().map(|t| (s.id, *t)))
        .collect();
    for (from, to) in edges {
        states[to].predecessors.push(from);
    }
    Ok(Automaton {
        process: process.name.clone(),
        initial: segment.entries,
        terminal: segment.exits,
        states,
    })
}

impl Builder<'_> {
    fn build(&mut self, expr: &ProcessExpr) -> Result<Segment> {
        match expr {
            ProcessExpr::Null => Ok(Segment {
                entries: Vec::new(),
                exits: Vec::new(),
            }),
            ProcessExpr::Receive {
                name, repetition, ..
            }
            | ProcessExpr::Dispatch {
                name, repetition, ..
            }
            | ProcessExpr::Condition { name, repetition } => {
                let count = self.repetition_count(repetition);
                Ok(self.chain(name, count))
            }
            ProcessExpr::Subprocess { name } => self.splice_subprocess(name),
            ProcessExpr::Sequence(items) => {
                let mut entries: Vec<usize> = Vec::new();
                let mut exits: Vec<usize> = Vec::new();
                for item in items {
                    let segment = self.build(item)?;
                    if segment.entries.is_empty() {
                        continue;
                    }
                    if entries.is_empty() {
                        entries = segment.entries.clone();
                    }
                    for exit in &exits {
                        for entry in &segment.entries {
                            self.connect(*exit, *entry);
                        }
                    }
                    exits = segment.exits;
                    // Control swallowed by a back-edge: the rest of the
                    // sequence is unreachable.
                    if exits.is_empty() {
                        break;
                    }
                }
                Ok(Segment { entries, exits })
            }
            ProcessExpr::Choice(branches) => {
                let mut entries = Vec::new();
                let mut exits = Vec::new();
                for branch in branches {
                    let segment = self.build(branch)?;
                    entries.extend(segment.entries);
                    exits.extend(segment.exits);
                }
                Ok(Segment { entries, exits })
            }
        }
    }

    /// A repetition of `n` becomes a chain of `n` states for the same
    /// action.
    fn chain(&mut self, action: &str, count: u64) -> Segment {
        let mut previous: Option<usize> = None;
        let mut first = 0usize;
        for step in 0..count.max(1) {
            let id = self.states.len();
            self.states.push(State {
                id,
                action: Some(action.to_string()),
                successors: Vec::new(),
                predecessors: Vec::new(),
            });
            if let Some(prev) = previous {
                self.states[prev].successors.push(id);
            }
            if step == 0 {
                first = id;
            }
            previous = Some(id);
        }
        Segment {
            entries: vec![first],
            exits: vec![previous.unwrap_or(first)],
        }
    }

    fn repetition_count(&self, repetition: &Option<Repetition>) -> u64 {
        match repetition {
            None => 1,
            Some(Repetition::Literal(n)) => *n,
            Some(Repetition::Label(label)) => {
                let value = self
                    .process
                    .labels
                    .get(label)
                    .and_then(|l| l.value.as_ref())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                match value {
                    Some(n) => n,
                    None => {
                        warn!(
                            process = %self.process.name,
                            label = %label,
                            "repetition label has no numeric value, using 1"
                        );
                        1
                    }
                }
            }
        }
    }

    /// First reference builds the subprocess inline; later references (and
    /// self-references inside the subprocess) become a back-edge through an
    /// artificial jump state and swallow fall-through.
    fn splice_subprocess(&mut self, name: &str) -> Result<Segment> {
        if let Some(entries) = self.subprocess_entries.get(name) {
            return Ok(Segment {
                entries: entries.clone(),
                exits: Vec::new(),
            });
        }
        if self.in_progress.contains(name) {
            let jump = self.states.len();
            self.states.push(State {
                id: jump,
                action: None,
                successors: Vec::new(),
                predecessors: Vec::new(),
            });
            self.pending_jumps.push((jump, name.to_string()));
            return Ok(Segment {
                entries: vec![jump],
                exits: Vec::new(),
            });
        }
        let ast = self
            .process
            .subprocess_asts
            .get(name)
            .cloned()
            .ok_or_else(|| {
                EmgError::internal(format!(
                    "subprocess '{}' of '{}' survived validation without an expression",
                    name, self.process.name
                ))
            })?;
        self.in_progress.insert(name.to_string());
        let segment = self.build(&ast)?;
        self.in_progress.remove(name);
        self.subprocess_entries
            .insert(name.to_string(), segment.entries.clone());
        Ok(segment)
    }

    fn connect(&mut self, from: usize, to: usize) {
        if !self.states[from].successors.contains(&to) {
            self.states[from].successors.push(to);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
