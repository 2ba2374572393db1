// interfaces.rs — Interface catalog
//
// Named interfaces (containers, callbacks, resources) grouped into
// categories, built from the human-authored category specification and later
// extended by source-analysis ingestion. The catalog is mutated only during
// the import/ingestion phase; matching, instance generation, and translation
// take shared references and go through the narrow mutation API for the few
// sanctioned post-import changes.
//
// Preconditions: category specification deserialized from JSON.
// Postconditions: after `resolve_references`, no interface signature contains
//                 an unresolved placeholder anywhere in its tree.
// Failure modes: missing required keys, duplicate identifiers, placeholder
//                cycles — all fatal, naming the offending identifier.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use serde::Deserialize;

use crate::error::{EmgError, Result};
use crate::signature::{Signature, SignatureKind};

// ── Roles ───────────────────────────────────────────────────────────────────

bitflags! {
    /// Role set of an interface. Source data allows one identifier to carry
    /// several roles at once (a container that is also passed around as a
    /// resource), so this is a set, not a single tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceRole: u8 {
        const CONTAINER = 0b001;
        const RESOURCE  = 0b010;
        const CALLBACK  = 0b100;
    }
}

// ── Data types ──────────────────────────────────────────────────────────────

/// A concrete value known from source analysis to satisfy an interface.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Implementation {
    /// Value expression: a global variable, function name, or field
    /// initializer expression.
    pub value: String,
    /// Source file the value was observed in.
    pub file: String,
    /// Full identifier of the container interface this value sprang from,
    /// for fields taken out of a container instance.
    pub base_container: Option<String>,
    /// The container instance value itself, disambiguating entries of an
    /// array of containers.
    pub base_value: Option<String>,
}

impl Implementation {
    /// Address-of prefixes are stripped: `&skel_driver` observed as a call
    /// argument and `skel_driver` observed as a global initializer are the
    /// same implementation.
    pub fn new(value: impl Into<String>, file: impl Into<String>) -> Self {
        let value = value.into();
        Implementation {
            value: value.trim_start_matches('&').trim().to_string(),
            file: file.into(),
            base_container: None,
            base_value: None,
        }
    }

    pub fn with_base(
        mut self,
        container: impl Into<String>,
        base_value: impl Into<String>,
    ) -> Self {
        self.base_container = Some(container.into());
        self.base_value = Some(base_value.into());
        self
    }
}

/// A named role in a category.
#[derive(Debug, Clone)]
pub struct Interface {
    pub category: String,
    pub short_id: String,
    pub role: InterfaceRole,
    pub signature: Signature,
    pub headers: Vec<String>,
    pub implemented_in_kernel: bool,
    /// Has some process in the growing model invoked this callback.
    pub called: bool,
    /// Container field name → full identifier of the child interface.
    pub field_interfaces: BTreeMap<String, String>,
    pub implementations: Vec<Implementation>,
}

impl Interface {
    pub fn new(category: &str, short_id: &str, role: InterfaceRole, signature: Signature) -> Self {
        Interface {
            category: category.to_string(),
            short_id: short_id.to_string(),
            role,
            signature,
            headers: Vec::new(),
            implemented_in_kernel: false,
            called: false,
            field_interfaces: BTreeMap::new(),
            implementations: Vec::new(),
        }
    }

    /// Full identifier, globally unique within the catalog.
    pub fn full_id(&self) -> String {
        format!("{}.{}", self.category, self.short_id)
    }

    pub fn is_container(&self) -> bool {
        self.role.contains(InterfaceRole::CONTAINER)
    }

    pub fn is_callback(&self) -> bool {
        self.role.contains(InterfaceRole::CALLBACK)
    }

    pub fn is_resource(&self) -> bool {
        self.role.contains(InterfaceRole::RESOURCE)
    }
}

/// A kernel function or macro-function known to the model.
#[derive(Debug, Clone)]
pub struct KernelFunction {
    pub name: String,
    pub signature: Signature,
    pub header: String,
}

// ── Specification input shapes ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CategorySpecification {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryEntries>,
    #[serde(rename = "kernel functions", default)]
    pub kernel_functions: BTreeMap<String, KernelEntry>,
    #[serde(rename = "kernel macro-functions", default)]
    pub kernel_macros: BTreeMap<String, KernelEntry>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CategoryEntries {
    #[serde(default)]
    pub containers: BTreeMap<String, InterfaceEntry>,
    #[serde(default)]
    pub resources: BTreeMap<String, InterfaceEntry>,
    #[serde(default)]
    pub callbacks: BTreeMap<String, InterfaceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct InterfaceEntry {
    pub signature: Option<String>,
    #[serde(default)]
    pub header: HeaderSpec,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "implemented in kernel", default)]
    pub implemented_in_kernel: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
pub enum HeaderSpec {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl HeaderSpec {
    fn into_vec(self) -> Vec<String> {
        match self {
            HeaderSpec::None => Vec::new(),
            HeaderSpec::One(h) => vec![h],
            HeaderSpec::Many(hs) => hs,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct KernelEntry {
    pub signature: Option<String>,
    pub header: Option<String>,
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// The interface catalog: flat registry by full identifier plus per-category
/// membership sets. `BTreeMap` keys make every iteration order part of the
/// deterministic-matching contract.
#[derive(Debug, Default)]
pub struct InterfaceCatalog {
    interfaces: BTreeMap<String, Interface>,
    categories: BTreeMap<String, BTreeSet<String>>,
    kernel_functions: BTreeMap<String, KernelFunction>,
}

impl InterfaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Import ──────────────────────────────────────────────────────────

    /// Import a category specification. Re-declaring the same full
    /// identifier across buckets merges role flags; that is source data, not
    /// an error.
    pub fn import_specification(&mut self, spec: CategorySpecification) -> Result<()> {
        for (category, entries) in spec.categories {
            let buckets = [
                (InterfaceRole::CONTAINER, entries.containers),
                (InterfaceRole::RESOURCE, entries.resources),
                (InterfaceRole::CALLBACK, entries.callbacks),
            ];
            for (role, bucket) in buckets {
                for (short_id, entry) in bucket {
                    self.import_interface(&category, &short_id, role, entry)?;
                }
            }
        }
        for (name, entry) in spec.kernel_functions {
            self.import_kernel_function(&name, entry)?;
        }
        for (name, entry) in spec.kernel_macros {
            // Macro entries carry no mandatory header.
            let signature_text = entry.signature.ok_or_else(|| {
                EmgError::spec(&name, "missing required key 'signature'")
            })?;
            let signature = Signature::parse(&signature_text)?;
            self.kernel_functions.insert(
                name.clone(),
                KernelFunction {
                    name,
                    signature,
                    header: entry.header.unwrap_or_default(),
                },
            );
        }
        self.resolve_references()
    }

    fn import_interface(
        &mut self,
        category: &str,
        short_id: &str,
        role: InterfaceRole,
        entry: InterfaceEntry,
    ) -> Result<()> {
        let full_id = format!("{}.{}", category, short_id);
        let signature_text = entry
            .signature
            .ok_or_else(|| EmgError::spec(&full_id, "missing required key 'signature'"))?;
        let signature = Signature::parse(&signature_text)?;

        let fields: BTreeMap<String, String> = entry
            .fields
            .iter()
            .map(|(field, child)| (field.clone(), qualify(category, child)))
            .collect();

        match self.interfaces.get_mut(&full_id) {
            Some(existing) => {
                existing.role |= role;
                existing.field_interfaces.extend(fields);
                existing.headers.extend(entry.header.into_vec());
                existing.implemented_in_kernel |= entry.implemented_in_kernel;
            }
            None => {
                let mut interface = Interface::new(category, short_id, role, signature);
                interface.headers = entry.header.into_vec();
                interface.field_interfaces = fields;
                interface.implemented_in_kernel = entry.implemented_in_kernel;
                self.register(interface)?;
            }
        }
        Ok(())
    }

    fn import_kernel_function(&mut self, name: &str, entry: KernelEntry) -> Result<()> {
        let signature_text = entry
            .signature
            .ok_or_else(|| EmgError::spec(name, "missing required key 'signature'"))?;
        let header = entry
            .header
            .ok_or_else(|| EmgError::spec(name, "missing required key 'header'"))?;
        let signature = Signature::parse(&signature_text)?;
        self.kernel_functions.insert(
            name.to_string(),
            KernelFunction {
                name: name.to_string(),
                signature,
                header,
            },
        );
        Ok(())
    }

    fn register(&mut self, interface: Interface) -> Result<()> {
        let full_id = interface.full_id();
        if self.interfaces.contains_key(&full_id) {
            return Err(EmgError::internal(format!(
                "interface '{}' registered twice",
                full_id
            )));
        }
        self.categories
            .entry(interface.category.clone())
            .or_default()
            .insert(full_id.clone());
        self.interfaces.insert(full_id, interface);
        Ok(())
    }

    // ── Reference resolution ────────────────────────────────────────────

    /// Replace every placeholder reference in interface and kernel-function
    /// signatures with the referenced interface's signature plus a backlink.
    /// A top-level placeholder splices the target signature in whole.
    pub fn resolve_references(&mut self) -> Result<()> {
        // Snapshot of raw signatures: resolution reads the pre-resolution
        // state so ordering between interfaces cannot matter.
        let snapshot: BTreeMap<String, Signature> = self
            .interfaces
            .iter()
            .map(|(id, i)| (id.clone(), i.signature.clone()))
            .collect();

        let ids: Vec<String> = self.interfaces.keys().cloned().collect();
        for id in &ids {
            let category = self.interfaces[id].category.clone();
            let mut signature = self.interfaces[id].signature.clone();

            // Top-level placeholder: splice the target in.
            if let SignatureKind::Interface { reference } = &signature.kind {
                let target_id = self
                    .lookup_reference(&category, reference)
                    .ok_or_else(|| {
                        EmgError::spec(id, format!("unknown interface reference '%{reference}%'"))
                    })?;
                let target = snapshot[&target_id].clone();
                if matches!(target.kind, SignatureKind::Interface { .. }) {
                    return Err(EmgError::internal(format!(
                        "interface signature of '{}' replaced by another unresolved \
                         interface signature '{}'",
                        id, target_id
                    )));
                }
                let pointer = signature.pointer || target.pointer;
                signature = target;
                signature.pointer = pointer;
                signature.interface = Some(target_id);
            }

            let resolver = |reference: &str| {
                self.lookup_reference(&category, reference)
                    .map(|full| (full.clone(), snapshot[&full].clone()))
            };
            signature.resolve_placeholders(&resolver)?;
            if let Some(interface) = self.interfaces.get_mut(id) {
                interface.signature = signature;
            }
        }

        // Kernel-function signatures: references must resolve uniquely.
        let names: Vec<String> = self.kernel_functions.keys().cloned().collect();
        for name in &names {
            let mut signature = self.kernel_functions[name].signature.clone();
            let resolver = |reference: &str| {
                self.lookup_unique(reference)
                    .map(|full| (full.clone(), snapshot[&full].clone()))
            };
            signature.resolve_placeholders(&resolver)?;
            if let Some(function) = self.kernel_functions.get_mut(name) {
                function.signature = signature;
            }
        }

        self.attach_container_fields();
        self.trim_non_container_fields();
        Ok(())
    }

    /// Attach field signatures onto container struct signatures so that
    /// structural comparison sees the callback field set.
    fn attach_container_fields(&mut self) {
        let ids: Vec<String> = self.interfaces.keys().cloned().collect();
        for id in ids {
            if !self.interfaces[&id].is_container() {
                continue;
            }
            let field_map = self.interfaces[&id].field_interfaces.clone();
            let mut resolved: BTreeMap<String, Signature> = BTreeMap::new();
            for (field, child_id) in field_map {
                if let Some(child) = self.interfaces.get(&child_id) {
                    let mut sig = child.signature.clone();
                    sig.interface = Some(child_id);
                    resolved.insert(field, sig);
                }
            }
            if let Some(interface) = self.interfaces.get_mut(&id) {
                if let SignatureKind::Struct { fields, .. } = &mut interface.signature.kind {
                    fields.extend(resolved);
                }
            }
        }
    }

    /// Non-container structs drop their field maps after resolution.
    fn trim_non_container_fields(&mut self) {
        for interface in self.interfaces.values_mut() {
            if !interface.is_container() {
                interface.signature.drop_fields();
            }
        }
    }

    /// Resolve a `%reference%` within a category: qualified references are
    /// taken as-is, unqualified ones against the importing category.
    fn lookup_reference(&self, category: &str, reference: &str) -> Option<String> {
        let candidate = qualify(category, reference);
        if self.interfaces.contains_key(&candidate) {
            return Some(candidate);
        }
        None
    }

    /// Resolve an unqualified reference when no category context exists
    /// (kernel functions): the short identifier must be unique.
    fn lookup_unique(&self, reference: &str) -> Option<String> {
        if reference.contains('.') {
            return self
                .interfaces
                .contains_key(reference)
                .then(|| reference.to_string());
        }
        let mut matches = self
            .interfaces
            .values()
            .filter(|i| i.short_id == reference)
            .map(|i| i.full_id());
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    // ── Post-import mutation API ────────────────────────────────────────

    /// Insert an interface synthesized after import. The single sanctioned
    /// way to grow the catalog once import is done.
    pub fn insert_interface(&mut self, interface: Interface) -> Result<String> {
        let full_id = interface.full_id();
        self.register(interface)?;
        Ok(full_id)
    }

    pub fn mark_called(&mut self, full_id: &str) {
        if let Some(interface) = self.interfaces.get_mut(full_id) {
            interface.called = true;
        }
    }

    pub fn add_implementation(&mut self, full_id: &str, implementation: Implementation) {
        if let Some(interface) = self.interfaces.get_mut(full_id) {
            if !interface.implementations.contains(&implementation) {
                interface.implementations.push(implementation);
            }
        }
    }

    pub fn set_field_interface(&mut self, full_id: &str, field: &str, child_id: &str) {
        if let Some(interface) = self.interfaces.get_mut(full_id) {
            interface
                .field_interfaces
                .insert(field.to_string(), child_id.to_string());
        }
    }

    /// Remove a whole category and its interfaces.
    pub fn delete_category(&mut self, category: &str) {
        if let Some(ids) = self.categories.remove(category) {
            for id in ids {
                self.interfaces.remove(&id);
            }
        }
    }

    // ── Read access ─────────────────────────────────────────────────────

    pub fn get(&self, full_id: &str) -> Option<&Interface> {
        self.interfaces.get(full_id)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn category_interfaces(&self, category: &str) -> impl Iterator<Item = &Interface> {
        self.categories
            .get(category)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.interfaces.get(id))
    }

    pub fn containers_in(&self, category: &str) -> Vec<&Interface> {
        self.category_interfaces(category)
            .filter(|i| i.is_container())
            .collect()
    }

    pub fn callbacks_in(&self, category: &str) -> Vec<&Interface> {
        self.category_interfaces(category)
            .filter(|i| i.is_callback())
            .collect()
    }

    pub fn kernel_function(&self, name: &str) -> Option<&KernelFunction> {
        self.kernel_functions.get(name)
    }

    pub fn kernel_functions(&self) -> impl Iterator<Item = &KernelFunction> {
        self.kernel_functions.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

fn qualify(category: &str, reference: &str) -> String {
    if reference.contains('.') {
        reference.to_string()
    } else {
        format!("{}.{}", category, reference)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn usb_spec() -> CategorySpecification {
        serde_json::from_str(
            r#"{
                "categories": {
                    "usb": {
                        "containers": {
                            "driver": {
                                "signature": "struct usb_driver",
                                "header": "linux/usb.h",
                                "fields": {"probe": "probe", "disconnect": "disconnect"}
                            }
                        },
                        "resources": {
                            "device": {"signature": "struct usb_device *"}
                        },
                        "callbacks": {
                            "probe": {"signature": "int (*probe)(%usb.device%)"},
                            "disconnect": {"signature": "void (*disconnect)(%device%)"}
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
        .unwrap()
    }

    fn imported() -> InterfaceCatalog {
        let mut catalog = InterfaceCatalog::new();
        catalog.import_specification(usb_spec()).unwrap();
        catalog
    }

    #[test]
    fn import_registers_full_ids() {
        let catalog = imported();
        assert!(catalog.get("usb.driver").is_some());
        assert!(catalog.get("usb.probe").is_some());
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn roles_assigned_per_bucket() {
        let catalog = imported();
        assert!(catalog.get("usb.driver").unwrap().is_container());
        assert!(catalog.get("usb.probe").unwrap().is_callback());
        assert!(catalog.get("usb.device").unwrap().is_resource());
    }

    #[test]
    fn redeclaration_merges_roles() {
        let mut catalog = InterfaceCatalog::new();
        let spec: CategorySpecification = serde_json::from_str(
            r#"{
                "categories": {
                    "c": {
                        "containers": {"x": {"signature": "struct x_ops"}},
                        "resources": {"x": {"signature": "struct x_ops"}}
                    }
                }
            }"#,
        )
        .unwrap();
        catalog.import_specification(spec).unwrap();
        let x = catalog.get("c.x").unwrap();
        assert!(x.is_container() && x.is_resource());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn missing_signature_is_fatal() {
        let mut catalog = InterfaceCatalog::new();
        let spec: CategorySpecification = serde_json::from_str(
            r#"{"categories": {"c": {"callbacks": {"cb": {"header": "x.h"}}}}}"#,
        )
        .unwrap();
        let err = catalog.import_specification(spec).unwrap_err();
        assert!(format!("{err}").contains("c.cb"));
    }

    #[test]
    fn kernel_function_requires_header() {
        let mut catalog = InterfaceCatalog::new();
        let spec: CategorySpecification = serde_json::from_str(
            r#"{"kernel functions": {"f": {"signature": "int f(void)"}}}"#,
        )
        .unwrap();
        assert!(catalog.import_specification(spec).is_err());
    }

    #[test]
    fn nested_references_resolved() {
        let catalog = imported();
        let probe = catalog.get("usb.probe").unwrap();
        let SignatureKind::Function { params, .. } = &probe.signature.kind else {
            panic!("expected Function");
        };
        assert_eq!(
            params[0].as_ref().unwrap().interface.as_deref(),
            Some("usb.device")
        );
        // Unqualified `%device%` resolves within the category too.
        let disconnect = catalog.get("usb.disconnect").unwrap();
        let SignatureKind::Function { params, .. } = &disconnect.signature.kind else {
            panic!("expected Function");
        };
        assert_eq!(
            params[0].as_ref().unwrap().interface.as_deref(),
            Some("usb.device")
        );
    }

    #[test]
    fn kernel_function_reference_resolved() {
        let catalog = imported();
        let f = catalog.kernel_function("usb_register_driver").unwrap();
        let SignatureKind::Function { params, .. } = &f.signature.kind else {
            panic!("expected Function");
        };
        assert_eq!(
            params[0].as_ref().unwrap().interface.as_deref(),
            Some("usb.driver")
        );
    }

    #[test]
    fn container_fields_attached() {
        let catalog = imported();
        let driver = catalog.get("usb.driver").unwrap();
        let SignatureKind::Struct { fields, .. } = &driver.signature.kind else {
            panic!("expected Struct");
        };
        assert!(fields.contains_key("probe"));
        assert_eq!(
            fields["probe"].interface.as_deref(),
            Some("usb.probe")
        );
    }

    #[test]
    fn placeholder_cycle_is_fatal() {
        let mut catalog = InterfaceCatalog::new();
        let spec: CategorySpecification = serde_json::from_str(
            r#"{
                "categories": {
                    "c": {
                        "resources": {
                            "a": {"signature": "%c.b%"},
                            "b": {"signature": "%c.a%"}
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        assert!(catalog.import_specification(spec).is_err());
    }

    #[test]
    fn implementations_deduplicated() {
        let mut catalog = imported();
        let imp = Implementation::new("&skel_driver", "module.c");
        catalog.add_implementation("usb.driver", imp.clone());
        catalog.add_implementation("usb.driver", imp);
        assert_eq!(catalog.get("usb.driver").unwrap().implementations.len(), 1);
    }

    #[test]
    fn delete_category_removes_interfaces() {
        let mut catalog = imported();
        catalog.delete_category("usb");
        assert!(catalog.get("usb.driver").is_none());
        assert!(catalog.is_empty());
    }

    #[test]
    fn mark_called() {
        let mut catalog = imported();
        catalog.mark_called("usb.probe");
        assert!(catalog.get("usb.probe").unwrap().called);
    }
}
