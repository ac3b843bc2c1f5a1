//! Module registry: event-driven load/unload tracking.
//!
//! State is created, updated and removed purely by peer "module" events;
//! the host list is a read of the last reflected records.

use std::collections::HashMap;

use crate::protocol::{Module, ModuleId};
use crate::types::MappedModule;

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleId, MappedModule>,
}

/// What a peer module event did to the registry.
#[derive(Debug)]
pub enum ModuleOutcome {
    Loaded(MappedModule),
    Changed(MappedModule),
    Unloaded(ModuleId),
    Ignored,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, reason: &str, record: Module) -> ModuleOutcome {
        match reason {
            "new" => {
                let module = MappedModule::from_record(record);
                self.modules.insert(module.id.clone(), module.clone());
                ModuleOutcome::Loaded(module)
            }
            "changed" => {
                let module = MappedModule::from_record(record);
                let known = self.modules.insert(module.id.clone(), module.clone());
                if known.is_some() {
                    ModuleOutcome::Changed(module)
                } else {
                    // A change for a module we never saw load; reflect it anyway.
                    ModuleOutcome::Loaded(module)
                }
            }
            "removed" => {
                let id = record.id;
                if self.modules.remove(&id).is_some() {
                    ModuleOutcome::Unloaded(id)
                } else {
                    ModuleOutcome::Ignored
                }
            }
            other => {
                log::debug!("module event with unknown reason '{other}'");
                ModuleOutcome::Ignored
            }
        }
    }

    pub fn get(&self, id: &ModuleId) -> Option<&MappedModule> {
        self.modules.get(id)
    }

    pub fn list(&self) -> Vec<MappedModule> {
        let mut all: Vec<MappedModule> = self.modules.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(id: ModuleId, name: &str) -> Module {
        serde_json::from_value(serde_json::json!({
            "id": match &id {
                ModuleId::Number(n) => serde_json::json!(n),
                ModuleId::Name(s) => serde_json::json!(s),
            },
            "name": name,
        }))
        .unwrap()
    }

    #[test]
    fn load_change_unload_cycle() {
        let mut registry = ModuleRegistry::new();

        match registry.apply("new", module(ModuleId::Number(1), "libc.so")) {
            ModuleOutcome::Loaded(m) => assert_eq!(m.name, "libc.so"),
            other => panic!("expected loaded, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);

        match registry.apply("changed", module(ModuleId::Number(1), "libc-2.so")) {
            ModuleOutcome::Changed(m) => assert_eq!(m.name, "libc-2.so"),
            other => panic!("expected changed, got {other:?}"),
        }

        match registry.apply("removed", module(ModuleId::Number(1), "libc-2.so")) {
            ModuleOutcome::Unloaded(ModuleId::Number(1)) => {}
            other => panic!("expected unloaded, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn string_and_integer_ids_coexist() {
        let mut registry = ModuleRegistry::new();
        registry.apply("new", module(ModuleId::Number(1), "a"));
        registry.apply("new", module(ModuleId::Name("core".into()), "b"));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&ModuleId::Name("core".into())).is_some());
    }
}
