// signature.rs — C-declaration signature engine
//
// Parses C-like declaration strings into a typed signature tree and supports
// the structural comparison the interface-matching phases rely on. The
// declaration language is flat enough for a hand-written scanner: balanced
// delimiter extraction plus top-level comma splitting.
//
// Preconditions: input is a trimmed declaration string from a specification
//                or analysis document.
// Postconditions: every accepted declaration classifies into exactly one
//                 signature kind.
// Failure modes: a string matching no classification pattern is fatal —
//                every declaration in the inputs must classify.
// Side effects: none.

use std::collections::BTreeMap;

use crate::error::{EmgError, Result};

// ── Data types ──────────────────────────────────────────────────────────────

/// The structural class of a parsed declaration. Exactly one per signature.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureKind {
    /// Function or function-pointer declaration with return value and
    /// ordered parameters. `None` parameters are opaque: type unknown or
    /// deliberately untracked, distinct from an absent parameter.
    Function {
        ret: Option<Box<Signature>>,
        params: Vec<Option<Signature>>,
    },
    /// Kernel macro-function: a bare `NAME(args)` with no declared return.
    Macro {
        name: String,
        params: Vec<Option<Signature>>,
    },
    /// `struct NAME`. Fields are attached later, during catalog resolution.
    Struct {
        name: String,
        fields: BTreeMap<String, Signature>,
    },
    /// Bare word sequence: `int`, `unsigned long`, `void`, ...
    Primitive,
    /// Unresolved interface placeholder: `%id%` or `%category.id%`. Must be
    /// replaced by the referenced interface's signature before structural
    /// comparison is meaningful.
    Interface { reference: String },
}

/// A parsed type expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// The original (normalized) declaration text.
    pub expression: String,
    pub kind: SignatureKind,
    pub pointer: bool,
    pub array: bool,
    /// Full identifier of the interface this signature was resolved from,
    /// if any. Set by catalog resolution; comparison short-circuits on it.
    pub interface: Option<String>,
}

impl Signature {
    // ── Parsing ─────────────────────────────────────────────────────────

    /// Parse a declaration string.
    ///
    /// Classification priority: function > macro > struct > primitive >
    /// interface placeholder. A string matching none of the patterns is a
    /// specification error.
    pub fn parse(expression: &str) -> Result<Signature> {
        let text = normalize(expression);
        if text.is_empty() {
            return Err(EmgError::spec(expression, "empty declaration"));
        }

        if let Some(sig) = parse_function_like(&text)? {
            return Ok(sig);
        }
        if let Some(sig) = parse_interface_placeholder(&text) {
            return Ok(sig);
        }
        if let Some(sig) = parse_struct(&text) {
            return Ok(sig);
        }
        if let Some(sig) = parse_primitive(&text) {
            return Ok(sig);
        }

        Err(EmgError::spec(
            expression,
            "declaration matches no signature pattern",
        ))
    }

    // ── Comparison ──────────────────────────────────────────────────────

    /// Structural equality.
    ///
    /// Refuses comparison while either side is an unresolved placeholder;
    /// short-circuits to interface-identity equality when both sides carry a
    /// resolved backlink; otherwise expression equality, then structural
    /// recursion. The partially-named, partially-structural struct rule is
    /// intentional: two differently-named structs with the same callback
    /// field set are compatible containers.
    pub fn compare(&self, other: &Signature) -> Result<bool> {
        if matches!(self.kind, SignatureKind::Interface { .. })
            || matches!(other.kind, SignatureKind::Interface { .. })
        {
            return Err(EmgError::internal(format!(
                "comparison of unresolved interface signature '{}' / '{}'",
                self.expression, other.expression
            )));
        }
        if let (Some(a), Some(b)) = (&self.interface, &other.interface) {
            return Ok(a == b);
        }
        if self.expression == other.expression {
            return Ok(true);
        }
        match (&self.kind, &other.kind) {
            (
                SignatureKind::Function {
                    ret: r1,
                    params: p1,
                },
                SignatureKind::Function {
                    ret: r2,
                    params: p2,
                },
            ) => {
                let ret_eq = match (r1, r2) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a.compare(b)?,
                    _ => false,
                };
                if !ret_eq {
                    return Ok(false);
                }
                compare_params(p1, p2)
            }
            (
                SignatureKind::Macro { params: p1, .. },
                SignatureKind::Macro { params: p2, .. },
            ) => compare_params(p1, p2),
            (
                SignatureKind::Struct {
                    name: n1,
                    fields: f1,
                },
                SignatureKind::Struct {
                    name: n2,
                    fields: f2,
                },
            ) => {
                if n1 == n2 {
                    return Ok(true);
                }
                if f1.is_empty() || f2.is_empty() || f1.len() != f2.len() {
                    return Ok(false);
                }
                for (name, sig) in f1 {
                    match f2.get(name) {
                        Some(other_sig) if sig.compare(other_sig)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ── Serialization ───────────────────────────────────────────────────

    /// Serialize back to declaration-like text.
    ///
    /// Functions render as `ret (*%s)(p1, p2)` with `%s` standing for the
    /// unnamed function name; opaque parameters render as `$`; parameters
    /// with a resolved interface backlink render as `%full.id%`.
    pub fn to_declaration(&self) -> String {
        match &self.kind {
            SignatureKind::Function { ret, params } => {
                let ret_text = ret
                    .as_ref()
                    .map(|r| r.param_text())
                    .unwrap_or_else(|| "void".to_string());
                format!("{} (*%s)({})", ret_text, params_text(params))
            }
            SignatureKind::Macro { name, params } => {
                format!("{}({})", name, params_text(params))
            }
            _ => self.expression.clone(),
        }
    }

    /// Parameter-position rendering: interface backlink wins over raw text.
    fn param_text(&self) -> String {
        match &self.interface {
            Some(id) => format!("%{}%", id),
            None => self.expression.clone(),
        }
    }

    // ── Resolution support ──────────────────────────────────────────────

    /// Interface binding of each parameter slot, positionally. Meaningful
    /// only after placeholder resolution; opaque slots yield `None`.
    pub fn parameter_interfaces(&self) -> Vec<Option<String>> {
        match &self.kind {
            SignatureKind::Function { params, .. } | SignatureKind::Macro { params, .. } => params
                .iter()
                .map(|p| p.as_ref().and_then(|s| s.interface.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// All interface placeholder references anywhere in the tree, outermost
    /// first.
    pub fn interface_references(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<String>) {
        match &self.kind {
            SignatureKind::Interface { reference } => refs.push(reference.clone()),
            SignatureKind::Function { ret, params } => {
                if let Some(r) = ret {
                    r.collect_references(refs);
                }
                for p in params.iter().flatten() {
                    p.collect_references(refs);
                }
            }
            SignatureKind::Macro { params, .. } => {
                for p in params.iter().flatten() {
                    p.collect_references(refs);
                }
            }
            SignatureKind::Struct { fields, .. } => {
                for f in fields.values() {
                    f.collect_references(refs);
                }
            }
            SignatureKind::Primitive => {}
        }
    }

    /// Replace every nested placeholder with the signature the resolver
    /// returns for it, attaching the interface backlink. The top-level
    /// placeholder case (signature splicing) is the catalog's job.
    ///
    /// Fails if a resolved target is itself still a placeholder: that is a
    /// specification cycle or omission, never tolerable.
    pub fn resolve_placeholders<F>(&mut self, resolver: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<(String, Signature)>,
    {
        match &mut self.kind {
            SignatureKind::Interface { .. } => Ok(()),
            SignatureKind::Function { ret, params } => {
                if let Some(r) = ret {
                    resolve_slot(r, resolver)?;
                }
                for p in params.iter_mut().flatten() {
                    resolve_slot_sig(p, resolver)?;
                }
                Ok(())
            }
            SignatureKind::Macro { params, .. } => {
                for p in params.iter_mut().flatten() {
                    resolve_slot_sig(p, resolver)?;
                }
                Ok(())
            }
            SignatureKind::Struct { fields, .. } => {
                for f in fields.values_mut() {
                    resolve_slot_sig(f, resolver)?;
                }
                Ok(())
            }
            SignatureKind::Primitive => Ok(()),
        }
    }

    /// Drop the field map of a struct signature. Applied to non-container
    /// interfaces after resolution; only containers need the map kept live.
    pub fn drop_fields(&mut self) {
        if let SignatureKind::Struct { fields, .. } = &mut self.kind {
            fields.clear();
        }
    }

    /// Struct tag name, if this is a struct signature.
    pub fn struct_name(&self) -> Option<&str> {
        match &self.kind {
            SignatureKind::Struct { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// True for function and macro signatures.
    pub fn is_function_like(&self) -> bool {
        matches!(
            self.kind,
            SignatureKind::Function { .. } | SignatureKind::Macro { .. }
        )
    }
}

fn compare_params(p1: &[Option<Signature>], p2: &[Option<Signature>]) -> Result<bool> {
    if p1.len() != p2.len() {
        return Ok(false);
    }
    for (a, b) in p1.iter().zip(p2.iter()) {
        // An opaque slot matches anything: the type is unknown, not absent.
        if let (Some(a), Some(b)) = (a, b) {
            if !a.compare(b)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn resolve_slot<F>(slot: &mut Box<Signature>, resolver: &F) -> Result<()>
where
    F: Fn(&str) -> Option<(String, Signature)>,
{
    resolve_slot_sig(slot.as_mut(), resolver)
}

fn resolve_slot_sig<F>(slot: &mut Signature, resolver: &F) -> Result<()>
where
    F: Fn(&str) -> Option<(String, Signature)>,
{
    if let SignatureKind::Interface { reference } = &slot.kind {
        let reference = reference.clone();
        if let Some((full_id, target)) = resolver(&reference) {
            if matches!(target.kind, SignatureKind::Interface { .. }) {
                return Err(EmgError::internal(format!(
                    "interface '{}' resolves to another unresolved interface signature",
                    full_id
                )));
            }
            let pointer = slot.pointer || target.pointer;
            let array = slot.array || target.array;
            *slot = target;
            slot.pointer = pointer;
            slot.array = array;
            slot.interface = Some(full_id);
        }
        return Ok(());
    }
    slot.resolve_placeholders(resolver)
}

fn params_text(params: &[Option<Signature>]) -> String {
    params
        .iter()
        .map(|p| match p {
            Some(sig) => sig.param_text(),
            None => "$".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Scanner helpers ─────────────────────────────────────────────────────────

/// Collapse runs of whitespace to single spaces.
fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract balanced delimiter content. Returns index of closing delimiter.
fn extract_balanced(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    if start >= bytes.len() || bytes[start] != open {
        return None;
    }
    let mut depth = 0;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == open {
            depth += 1;
        } else if bytes[i] == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Split a string by commas at the top level (respecting nested `()`).
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, &b) in s.as_bytes().iter().enumerate() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Index of the first top-level `(` in the string, if any.
fn first_top_level_paren(s: &str) -> Option<usize> {
    s.bytes().position(|b| b == b'(')
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

// ── Classification patterns ─────────────────────────────────────────────────

/// Function declaration (`ret name(args)`, `ret (*name)(args)`) or
/// macro-function (`NAME(args)`).
fn parse_function_like(text: &str) -> Result<Option<Signature>> {
    let Some(open) = first_top_level_paren(text) else {
        return Ok(None);
    };
    let bytes = text.as_bytes();
    let close = extract_balanced(bytes, open, b'(', b')').ok_or_else(|| {
        EmgError::spec(text, "unbalanced parentheses in declaration")
    })?;
    let head = text[..open].trim();
    let first_group = &text[open + 1..close];

    // Function-pointer form: `ret (*name)(args)` — the first group holds the
    // pointer declarator and the parameter list follows it.
    if first_group.trim_start().starts_with('*') {
        let params_open = text[close + 1..]
            .bytes()
            .position(|b| b == b'(')
            .map(|i| close + 1 + i)
            .ok_or_else(|| {
                EmgError::spec(text, "function pointer declarator without parameter list")
            })?;
        let params_close = extract_balanced(bytes, params_open, b'(', b')')
            .ok_or_else(|| EmgError::spec(text, "unbalanced parameter list"))?;
        let ret = parse_return(head)?;
        let params = parse_params(&text[params_open + 1..params_close], false)?;
        return Ok(Some(Signature {
            expression: text.to_string(),
            kind: SignatureKind::Function { ret, params },
            pointer: true,
            array: false,
            interface: None,
        }));
    }

    // Plain declaration: `ret name(args)`. A head with no return part is a
    // macro-function.
    if head.is_empty() {
        return Ok(None);
    }
    match head.rsplit_once(' ') {
        Some((ret_text, name)) if is_ident(name.trim_start_matches('*')) => {
            // A star glued to the name belongs to the return type:
            // `struct usb_device *usb_get_dev(...)`.
            let ret_text = if name.starts_with('*') {
                format!("{} *", ret_text)
            } else {
                ret_text.to_string()
            };
            let ret = parse_return(&ret_text)?;
            let params = parse_params(first_group, false)?;
            Ok(Some(Signature {
                expression: text.to_string(),
                kind: SignatureKind::Function { ret, params },
                pointer: false,
                array: false,
                interface: None,
            }))
        }
        None if is_ident(head) => {
            let params = parse_params(first_group, true)?;
            Ok(Some(Signature {
                expression: text.to_string(),
                kind: SignatureKind::Macro {
                    name: head.to_string(),
                    params,
                },
                pointer: false,
                array: false,
                interface: None,
            }))
        }
        _ => Ok(None),
    }
}

fn parse_return(ret_text: &str) -> Result<Option<Box<Signature>>> {
    let ret_text = ret_text.trim();
    if ret_text.is_empty() || ret_text == "void" {
        return Ok(None);
    }
    Ok(Some(Box::new(Signature::parse(ret_text)?)))
}

/// Parse a comma-separated parameter list. In macro position, a slot with no
/// interface placeholder is opaque: macro arguments carry no declared types.
fn parse_params(list: &str, macro_position: bool) -> Result<Vec<Option<Signature>>> {
    let list = list.trim();
    if list.is_empty() || list == "void" {
        return Ok(Vec::new());
    }
    let mut params = Vec::new();
    for token in split_top_level_commas(list) {
        let token = token.trim();
        if token == "$" || token == "..." || token.is_empty() {
            params.push(None);
        } else if macro_position && !token.contains('%') {
            params.push(None);
        } else {
            params.push(Some(Signature::parse(token)?));
        }
    }
    Ok(params)
}

/// `%name%` / `%cat.name%`, optionally pointer-prefixed.
fn parse_interface_placeholder(text: &str) -> Option<Signature> {
    let (pointer, body) = match text.strip_prefix('*') {
        Some(rest) => (true, rest.trim()),
        None => (false, text),
    };
    let inner = body.strip_prefix('%')?.strip_suffix('%')?;
    let valid = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return None;
    }
    Some(Signature {
        expression: text.to_string(),
        kind: SignatureKind::Interface {
            reference: inner.to_string(),
        },
        pointer,
        array: false,
        interface: None,
    })
}

/// `struct NAME`, optional pointer and array markers.
fn parse_struct(text: &str) -> Option<Signature> {
    let rest = text.strip_prefix("struct ")?;
    let mut words = rest.split(' ');
    let name = words.next()?;
    if !is_ident(name.trim_end_matches('*')) {
        return None;
    }
    let tail: String = words.collect::<Vec<_>>().join(" ");
    let pointer = tail.contains('*') || name.contains('*');
    let array = tail.contains("[]") || tail.contains('[');
    Some(Signature {
        expression: text.to_string(),
        kind: SignatureKind::Struct {
            name: name.trim_end_matches('*').to_string(),
            fields: BTreeMap::new(),
        },
        pointer,
        array,
        interface: None,
    })
}

/// Bare word sequence with optional `*` and `[]` markers.
fn parse_primitive(text: &str) -> Option<Signature> {
    let pointer = text.contains('*');
    let array = text.contains('[');
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '[' | ']'))
        .collect();
    let ok = stripped
        .split_whitespace()
        .all(|w| is_ident(w) || w.chars().all(|c| c.is_ascii_digit()));
    if !ok || stripped.trim().is_empty() || stripped.trim_start().starts_with("struct") {
        return None;
    }
    Some(Signature {
        expression: text.to_string(),
        kind: SignatureKind::Primitive,
        pointer,
        array,
        interface: None,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
