// analysis.rs — Source-analysis facts ingestion
//
// Merges the opaque analyzer output (function declarations, call-argument
// traces, global-variable initializers, module init/exit maps) into the
// interface catalog: marks existing interfaces, synthesizes interfaces for
// unmatched initializer structures, records implementations, and prunes
// categories nothing can ever reach.
//
// Preconditions: catalog import finished (`resolve_references` done).
// Postconditions: every implementation value observed in the facts is
//                 recorded on some interface, or was reported.
// Failure modes: unparseable declarations are fatal; a module callback
//                absent from the analysis is fatal only in strict mode.
// Side effects: mutates the catalog (last phase allowed to, wholesale).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::diag::Diagnostic;
use crate::error::{EmgError, Result};
use crate::interfaces::{Implementation, Interface, InterfaceCatalog, InterfaceRole};
use crate::signature::{Signature, SignatureKind};

// ── Input shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct SourceFacts {
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionFacts>,
    #[serde(rename = "global variable initializations", default)]
    pub global_variables: Vec<GlobalVariable>,
    /// Module init entry points, file → function name.
    #[serde(default)]
    pub init: BTreeMap<String, String>,
    /// Module exit entry points, file → function name.
    #[serde(default)]
    pub exit: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionFacts {
    pub signature: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// Callee name → list of observed argument lists; `null` marks an
    /// argument the analyzer could not evaluate.
    #[serde(default)]
    pub calls: BTreeMap<String, Vec<Vec<Option<String>>>>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub file: String,
    /// Declared type of the variable.
    pub signature: String,
    /// Initializer field values, field name → value expression.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

// ── Output ──────────────────────────────────────────────────────────────────

/// Parsed module facts carried forward to matching and translation.
#[derive(Debug)]
pub struct ModuleAnalysis {
    /// Module and kernel function declarations, parsed.
    pub functions: BTreeMap<String, Signature>,
    pub init_functions: BTreeMap<String, String>,
    pub exit_functions: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Ingest analyzer facts into the catalog.
pub fn ingest_source_facts(
    catalog: &mut InterfaceCatalog,
    facts: &SourceFacts,
    config: &GenerationConfig,
) -> Result<ModuleAnalysis> {
    let mut ctx = IngestCtx {
        catalog,
        facts,
        functions: BTreeMap::new(),
        matched_variables: BTreeMap::new(),
        diagnostics: Vec::new(),
    };

    ctx.parse_declarations()?;

    // Mark/synthesize to a fixed point: synthesizing a container can make a
    // previously unmatched variable markable on the next pass.
    loop {
        let marked = ctx.mark_existing_interfaces()?;
        let synthesized = ctx.synthesize_interfaces()?;
        if marked == 0 && synthesized == 0 {
            break;
        }
    }

    ctx.record_call_implementations();
    ctx.check_missed_callbacks(config)?;
    prune_categories(ctx.catalog);

    Ok(ModuleAnalysis {
        functions: ctx.functions,
        init_functions: facts.init.clone(),
        exit_functions: facts.exit.clone(),
        diagnostics: ctx.diagnostics,
    })
}

// ── Ingestion context ───────────────────────────────────────────────────────

struct IngestCtx<'a> {
    catalog: &'a mut InterfaceCatalog,
    facts: &'a SourceFacts,
    functions: BTreeMap<String, Signature>,
    /// Global variable name → full id of the container it satisfies.
    matched_variables: BTreeMap<String, String>,
    diagnostics: Vec<Diagnostic>,
}

impl IngestCtx<'_> {
    fn parse_declarations(&mut self) -> Result<()> {
        for (name, info) in &self.facts.functions {
            let signature = Signature::parse(&info.signature)?;
            self.functions.insert(name.clone(), signature);
        }
        Ok(())
    }

    /// Match still-unmatched global variables against known containers and
    /// record implementations. Returns how many new matches were made.
    fn mark_existing_interfaces(&mut self) -> Result<usize> {
        let mut matched = 0usize;
        for var in &self.facts.global_variables {
            if self.matched_variables.contains_key(&var.name) {
                continue;
            }
            let var_sig = Signature::parse(&var.signature)?;
            let Some(container_id) = self.find_matching_container(&var_sig)? else {
                continue;
            };
            self.matched_variables
                .insert(var.name.clone(), container_id.clone());
            matched += 1;

            self.catalog.add_implementation(
                &container_id,
                Implementation::new(&var.name, &var.file),
            );
            let field_map = self
                .catalog
                .get(&container_id)
                .map(|c| c.field_interfaces.clone())
                .unwrap_or_default();
            for (field, value) in &var.fields {
                if let Some(child_id) = field_map.get(field) {
                    self.catalog.add_implementation(
                        child_id,
                        Implementation::new(value, &var.file)
                            .with_base(&container_id, &var.name),
                    );
                } else {
                    debug!(
                        container = %container_id,
                        field = %field,
                        "initializer field without interface, skipped"
                    );
                }
            }
        }
        Ok(matched)
    }

    fn find_matching_container(&self, var_sig: &Signature) -> Result<Option<String>> {
        for interface in self.catalog.interfaces() {
            if !interface.is_container() {
                continue;
            }
            if interface.signature.compare(var_sig)? {
                return Ok(Some(interface.full_id()));
            }
        }
        Ok(None)
    }

    /// Synthesize interfaces for unmatched initializer structures. Returns
    /// the number of interfaces created.
    fn synthesize_interfaces(&mut self) -> Result<usize> {
        let mut created = 0usize;
        for var in &self.facts.global_variables {
            if self.matched_variables.contains_key(&var.name) {
                continue;
            }
            let var_sig = Signature::parse(&var.signature)?;

            // A bare function-pointer global is itself a callback.
            if var_sig.is_function_like() {
                created += self.synthesize_callback_global(var, &var_sig)?;
                continue;
            }
            let Some(struct_name) = var_sig.struct_name().map(str::to_string) else {
                continue;
            };

            // Which initializer fields name module functions?
            let function_fields: BTreeMap<&String, &Signature> = var
                .fields
                .iter()
                .filter_map(|(field, value)| {
                    self.functions.get(value).map(|sig| (field, sig))
                })
                .collect();
            if function_fields.is_empty() {
                continue;
            }

            // Category: a field whose function matches an existing callback
            // pins the struct to that callback's category; otherwise the
            // struct founds a category of its own.
            let category = match self.category_for_fields(&function_fields)? {
                Some(category) => category,
                None => struct_name.clone(),
            };

            let container_id = format!("{}.{}", category, struct_name);
            if self.catalog.get(&container_id).is_some() {
                continue;
            }
            let mut container = Interface::new(
                &category,
                &struct_name,
                InterfaceRole::CONTAINER,
                var_sig.clone(),
            );
            for (field, func_sig) in &function_fields {
                let callback_id = format!("{}.{}", category, field);
                if self.catalog.get(&callback_id).is_none() {
                    let mut cb_sig = (*func_sig).clone();
                    cb_sig.pointer = true;
                    self.catalog.insert_interface(Interface::new(
                        &category,
                        field,
                        InterfaceRole::CALLBACK,
                        cb_sig,
                    ))?;
                    created += 1;
                }
                container
                    .field_interfaces
                    .insert((*field).clone(), callback_id);
            }
            self.catalog.insert_interface(container)?;
            created += 1;
            debug!(category = %category, variable = %var.name, "synthesized container");
        }
        Ok(created)
    }

    fn synthesize_callback_global(
        &mut self,
        var: &GlobalVariable,
        var_sig: &Signature,
    ) -> Result<usize> {
        // Reuse a category whose callbacks already share this shape.
        for category in self.catalog.categories().map(str::to_string).collect::<Vec<_>>() {
            for callback in self.catalog.callbacks_in(&category) {
                if callback.signature.compare(var_sig)? {
                    let id = callback.full_id();
                    self.catalog
                        .add_implementation(&id, Implementation::new(&var.name, &var.file));
                    self.matched_variables.insert(var.name.clone(), id);
                    return Ok(0);
                }
            }
        }
        let id = self.catalog.insert_interface(Interface::new(
            &var.name,
            &var.name,
            InterfaceRole::CALLBACK,
            var_sig.clone(),
        ))?;
        self.catalog
            .add_implementation(&id, Implementation::new(&var.name, &var.file));
        self.matched_variables.insert(var.name.clone(), id);
        Ok(1)
    }

    /// The category of the first existing callback interface any field
    /// function structurally matches, if one exists.
    fn category_for_fields(
        &self,
        function_fields: &BTreeMap<&String, &Signature>,
    ) -> Result<Option<String>> {
        for func_sig in function_fields.values() {
            for interface in self.catalog.interfaces() {
                if interface.is_callback() && interface.signature.compare(func_sig)? {
                    return Ok(Some(interface.category.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Record implementations observed as kernel-function call arguments,
    /// by parameter position.
    fn record_call_implementations(&mut self) {
        for (caller, info) in &self.facts.functions {
            for (callee, arg_lists) in &info.calls {
                let Some(kf) = self.catalog.kernel_function(callee) else {
                    continue;
                };
                let (SignatureKind::Function { params, .. }
                | SignatureKind::Macro { params, .. }) = &kf.signature.kind
                else {
                    continue;
                };
                let bindings: Vec<(usize, String)> = params
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| {
                        p.as_ref()
                            .and_then(|s| s.interface.clone())
                            .map(|id| (i, id))
                    })
                    .collect();
                let file = info
                    .files
                    .first()
                    .cloned()
                    .unwrap_or_else(|| caller.clone());
                for args in arg_lists {
                    for (pos, interface_id) in &bindings {
                        if let Some(Some(value)) = args.get(*pos) {
                            self.catalog.add_implementation(
                                interface_id,
                                Implementation::new(value, &file),
                            );
                        }
                    }
                }
            }
        }
    }

    /// Callbacks the specification expects the module to provide but the
    /// analysis never saw: warning, or fatal in strict mode.
    fn check_missed_callbacks(&mut self, config: &GenerationConfig) -> Result<()> {
        let mut missed = BTreeSet::new();
        for interface in self.catalog.interfaces() {
            if interface.is_callback()
                && !interface.implemented_in_kernel
                && interface.implementations.is_empty()
            {
                missed.insert(interface.full_id());
            }
        }
        if missed.is_empty() {
            return Ok(());
        }
        if config.ignore_missed_callbacks {
            for id in &missed {
                warn!(interface = %id, "callback has no implementation in the analysis");
                self.diagnostics.push(
                    Diagnostic::warning("callback has no implementation in the analysis")
                        .with_context(id.clone()),
                );
            }
            Ok(())
        } else {
            Err(EmgError::matching(
                missed.iter().cloned().collect::<Vec<_>>().join(", "),
                "module callbacks missing from source analysis",
            ))
        }
    }
}

// ── Category pruning ────────────────────────────────────────────────────────

/// Delete categories referenced by zero kernel functions and zero callbacks
/// of other surviving categories. Runs to a fixed point: removing one
/// category can orphan another.
pub fn prune_categories(catalog: &mut InterfaceCatalog) {
    loop {
        let categories: Vec<String> = catalog.categories().map(str::to_string).collect();
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        for kf in catalog.kernel_functions() {
            collect_referenced_categories(&kf.signature, &mut referenced);
        }
        for interface in catalog.interfaces() {
            let mut refs = BTreeSet::new();
            collect_referenced_categories(&interface.signature, &mut refs);
            for child_id in interface.field_interfaces.values() {
                if let Some(category) = child_id.split('.').next() {
                    refs.insert(category.to_string());
                }
            }
            // Self-references keep nothing alive.
            refs.remove(&interface.category);
            referenced.extend(refs);
        }

        let doomed: Vec<String> = categories
            .into_iter()
            .filter(|c| !referenced.contains(c))
            .collect();
        if doomed.is_empty() {
            return;
        }
        for category in doomed {
            debug!(category = %category, "pruning unreferenced category");
            catalog.delete_category(&category);
        }
    }
}

fn collect_referenced_categories(signature: &Signature, out: &mut BTreeSet<String>) {
    if let Some(id) = &signature.interface {
        if let Some(category) = id.split('.').next() {
            out.insert(category.to_string());
        }
    }
    match &signature.kind {
        SignatureKind::Function { ret, params } => {
            if let Some(r) = ret {
                collect_referenced_categories(r, out);
            }
            for p in params.iter().flatten() {
                collect_referenced_categories(p, out);
            }
        }
        SignatureKind::Macro { params, .. } => {
            for p in params.iter().flatten() {
                collect_referenced_categories(p, out);
            }
        }
        SignatureKind::Struct { fields, .. } => {
            for f in fields.values() {
                collect_referenced_categories(f, out);
            }
        }
        SignatureKind::Primitive | SignatureKind::Interface { .. } => {}
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
