//! Frame variable materialization and register grouping.
//!
//! A frame's scopes expand into a flat variable tree, except the scope
//! named "registers" (case-insensitive), which is materialized into named
//! register groups instead. Children are fetched lazily and cached per
//! handle for the lifetime of one frame materialization; the cache is not
//! kept across stops.

use std::collections::HashMap;

use crate::protocol::WireVariable;
use crate::types::parse_memory_reference;

/// One node of the variable tree. `children_reference` of 0 marks a leaf;
/// anything else is an opaque peer handle for lazy child retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableHandle {
    pub name: String,
    pub value: String,
    pub raw_type: Option<String>,
    pub display_type: Option<String>,
    pub address: Option<u64>,
    pub frame_id: i64,
    pub children_reference: i64,
}

impl VariableHandle {
    pub fn from_wire(var: &WireVariable, frame_id: i64) -> Self {
        VariableHandle {
            name: var.name.clone(),
            value: var.value.clone(),
            raw_type: var.var_type.clone(),
            display_type: var.var_type.as_deref().map(display_type),
            address: var
                .memory_reference
                .as_deref()
                .and_then(parse_memory_reference),
            frame_id,
            children_reference: var.variables_reference,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children_reference == 0
    }
}

/// Collapse known generic container patterns for display: keep the payload
/// type parameters, drop allocator/comparator noise.
///
/// `std::vector<int, std::allocator<int>>` becomes `std::vector<int>`.
pub fn display_type(raw: &str) -> String {
    let Some(open) = raw.find('<') else {
        return raw.to_string();
    };
    if !raw.ends_with('>') {
        return raw.to_string();
    }
    let base = &raw[..open];
    let container = base.rsplit("::").next().unwrap_or(base);
    let keep = match container {
        "vector" | "list" | "forward_list" | "deque" | "set" | "multiset"
        | "unordered_set" | "basic_string" | "unique_ptr" | "shared_ptr" | "weak_ptr"
        | "optional" | "span" => 1,
        "map" | "multimap" | "unordered_map" | "pair" => 2,
        _ => return raw.to_string(),
    };

    let args = split_template_args(&raw[open + 1..raw.len() - 1]);
    if args.len() <= keep {
        return raw.to_string();
    }
    let kept: Vec<&str> = args.into_iter().take(keep).collect();
    format!("{base}<{}>", kept.join(", "))
}

/// Split top-level template arguments, respecting nested angle brackets.
fn split_template_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = args[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Rewrite a hex-digit-only value into canonical `0x`-prefixed lower case.
/// Anything else passes through untouched.
pub fn canonicalize_bare_hex(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("0x{}", trimmed.to_lowercase())
    } else {
        value.to_string()
    }
}

/// A named register bank view: `"{index} - {bankName}"` in encounter order.
#[derive(Debug, Clone)]
pub struct RegisterGroup {
    pub name: String,
    pub registers: Vec<VariableHandle>,
}

pub fn register_group_name(index: usize, bank: &str) -> String {
    format!("{index} - {bank}")
}

/// Normalize one leaf register: lower-case the name, canonicalize a bare
/// hex value.
pub fn normalize_register(var: &WireVariable, frame_id: i64) -> VariableHandle {
    let mut handle = VariableHandle::from_wire(var, frame_id);
    handle.name = handle.name.to_lowercase();
    handle.value = canonicalize_bare_hex(&handle.value);
    handle
}

/// Materialized view of one frame: the flat variable list, the register
/// groups, and the per-handle children cache.
pub struct FrameVariableCache {
    frame_id: i64,
    pub variables: Vec<VariableHandle>,
    pub register_groups: Vec<RegisterGroup>,
    children: HashMap<i64, Vec<VariableHandle>>,
}

impl FrameVariableCache {
    pub fn new(frame_id: i64) -> Self {
        FrameVariableCache {
            frame_id,
            variables: Vec::new(),
            register_groups: Vec::new(),
            children: HashMap::new(),
        }
    }

    pub fn frame_id(&self) -> i64 {
        self.frame_id
    }

    pub fn cached_children(&self, reference: i64) -> Option<&[VariableHandle]> {
        self.children.get(&reference).map(Vec::as_slice)
    }

    /// Cache a handle's children. Later queries for the same reference hit
    /// the cache instead of issuing another peer request.
    pub fn store_children(&mut self, reference: i64, children: Vec<VariableHandle>) {
        self.children.insert(reference, children);
    }
}

/// Whether a scope diverts into register materialization.
pub fn is_register_scope(name: &str) -> bool {
    name.eq_ignore_ascii_case("registers")
}

// ---- register view preferences (external settings collaborator) ----

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterGroupPref {
    pub name: String,
    pub expanded: bool,
}

/// Persistence seam for per-architecture register view preferences.
pub trait RegisterViewSettings: Send + Sync {
    fn stored_group_names(&self, arch: &str) -> Option<Vec<String>>;
    fn store_groups(&self, arch: &str, groups: &[RegisterGroupPref]);
}

/// Default collaborator that stores nothing.
pub struct NoRegisterViewSettings;

impl RegisterViewSettings for NoRegisterViewSettings {
    fn stored_group_names(&self, _arch: &str) -> Option<Vec<String>> {
        None
    }

    fn store_groups(&self, _arch: &str, _groups: &[RegisterGroupPref]) {}
}

/// After recomputing register groups, persist the default expand/collapse
/// toggles (only the first group expanded), but only when the stored name
/// set differs from or is missing the current group names.
pub fn sync_register_view(
    settings: &dyn RegisterViewSettings,
    arch: &str,
    groups: &[RegisterGroup],
) {
    let names: Vec<String> = groups.iter().map(|g| g.name.clone()).collect();
    if settings.stored_group_names(arch).as_deref() == Some(names.as_slice()) {
        return;
    }
    let prefs: Vec<RegisterGroupPref> = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| RegisterGroupPref {
            name,
            expanded: index == 0,
        })
        .collect();
    settings.store_groups(arch, &prefs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn wire(name: &str, value: &str, reference: i64) -> WireVariable {
        WireVariable {
            name: name.into(),
            value: value.into(),
            variables_reference: reference,
            ..Default::default()
        }
    }

    #[test]
    fn bare_hex_values_are_canonicalized() {
        assert_eq!(canonicalize_bare_hex("DEADBEEF"), "0xdeadbeef");
        assert_eq!(canonicalize_bare_hex("0"), "0x0");
        // Already prefixed or non-hex values pass through.
        assert_eq!(canonicalize_bare_hex("0x12"), "0x12");
        assert_eq!(canonicalize_bare_hex("3.14"), "3.14");
        assert_eq!(canonicalize_bare_hex(""), "");
    }

    #[test]
    fn register_normalization() {
        let handle = normalize_register(&wire("R0", "FF", 0), 1);
        assert_eq!(handle.name, "r0");
        assert_eq!(handle.value, "0xff");
        assert!(handle.is_leaf());
    }

    #[test]
    fn group_names_follow_encounter_order() {
        assert_eq!(register_group_name(0, "General"), "0 - General");
        assert_eq!(register_group_name(3, "FPU"), "3 - FPU");
    }

    #[test]
    fn display_type_collapses_known_containers() {
        assert_eq!(
            display_type("std::vector<int, std::allocator<int>>"),
            "std::vector<int>"
        );
        assert_eq!(
            display_type(
                "std::map<int, std::string, std::less<int>, std::allocator<std::pair<const int, std::string>>>"
            ),
            "std::map<int, std::string>"
        );
        // Unknown generics keep every parameter.
        assert_eq!(display_type("MyBox<A, B>"), "MyBox<A, B>");
        assert_eq!(display_type("int"), "int");
    }

    #[test]
    fn children_cache_is_idempotent() {
        let mut cache = FrameVariableCache::new(10);
        assert!(cache.cached_children(5).is_none());

        let children = vec![VariableHandle::from_wire(&wire("x", "1", 0), 10)];
        cache.store_children(5, children.clone());

        let first = cache.cached_children(5).unwrap().to_vec();
        let second = cache.cached_children(5).unwrap().to_vec();
        assert_eq!(first, children);
        assert_eq!(first, second);
    }

    #[test]
    fn register_scope_detection_is_case_insensitive() {
        assert!(is_register_scope("Registers"));
        assert!(is_register_scope("REGISTERS"));
        assert!(!is_register_scope("Locals"));
    }

    struct RecordingSettings {
        stored: Mutex<Option<Vec<String>>>,
        writes: Mutex<usize>,
    }

    impl RegisterViewSettings for RecordingSettings {
        fn stored_group_names(&self, _arch: &str) -> Option<Vec<String>> {
            self.stored.lock().unwrap().clone()
        }

        fn store_groups(&self, _arch: &str, groups: &[RegisterGroupPref]) {
            *self.stored.lock().unwrap() =
                Some(groups.iter().map(|g| g.name.clone()).collect());
            *self.writes.lock().unwrap() += 1;
        }
    }

    #[test]
    fn preferences_persist_only_on_difference() {
        let settings = RecordingSettings {
            stored: Mutex::new(None),
            writes: Mutex::new(0),
        };
        let groups = vec![
            RegisterGroup {
                name: "0 - General".into(),
                registers: Vec::new(),
            },
            RegisterGroup {
                name: "1 - FPU".into(),
                registers: Vec::new(),
            },
        ];

        // Missing preferences get written with only the first expanded.
        sync_register_view(&settings, "arm", &groups);
        assert_eq!(*settings.writes.lock().unwrap(), 1);

        // Identical group names: nothing to persist.
        sync_register_view(&settings, "arm", &groups);
        assert_eq!(*settings.writes.lock().unwrap(), 1);

        // Changed bank layout: persisted again.
        sync_register_view(&settings, "arm", &groups[..1]);
        assert_eq!(*settings.writes.lock().unwrap(), 2);
    }
}
