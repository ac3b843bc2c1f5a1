//! Breakpoint registry.
//!
//! The wire protocol has no incremental add/remove: every mutation of a
//! breakpoint kind resends the complete current list of that kind (per file
//! for source breakpoints). The registry keeps the ordered descriptor lists
//! that back those full-replace calls, plus a map of peer-assigned ids to
//! host-facing records. Peer ids are authoritative; nothing here invents one.
//!
//! The registry itself is synchronous state. The driver stages a new list,
//! performs the wire call, then commits the response back here, so a failed
//! call never leaves a phantom local entry.

use std::collections::HashMap;

use crate::protocol::{
    Breakpoint, FunctionBreakpoint, InstructionBreakpoint, SourceBreakpoint,
};
use crate::types::{BreakpointKind, BreakpointOrigin, MappedBreakpoint};

#[derive(Default)]
pub struct BreakpointRegistry {
    source: HashMap<String, Vec<SourceBreakpoint>>,
    function: Vec<FunctionBreakpoint>,
    instruction: Vec<InstructionBreakpoint>,
    mapped: HashMap<i64, MappedBreakpoint>,
}

/// Resync work computed for a batch removal, one entry per affected
/// full-replace operation. Each resync is independent; a failure in one
/// does not undo another.
#[derive(Debug, Default)]
pub struct RemovePlan {
    pub source: Vec<(String, Vec<SourceBreakpoint>)>,
    pub function: Option<Vec<FunctionBreakpoint>>,
    pub instruction: Option<Vec<InstructionBreakpoint>>,
}

/// What a peer breakpoint event did to the registry.
#[derive(Debug)]
pub enum ReconcileOutcome {
    Added(MappedBreakpoint),
    Changed(MappedBreakpoint),
    Removed(i64),
    Ignored,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- staging: build the would-be full list without committing ----

    pub fn source_list_with(&self, path: &str, new: SourceBreakpoint) -> Vec<SourceBreakpoint> {
        let mut list = self.source.get(path).cloned().unwrap_or_default();
        list.push(new);
        list
    }

    pub fn function_list_with(&self, new: FunctionBreakpoint) -> Vec<FunctionBreakpoint> {
        let mut list = self.function.clone();
        list.push(new);
        list
    }

    pub fn instruction_list_with(
        &self,
        new: InstructionBreakpoint,
    ) -> Vec<InstructionBreakpoint> {
        let mut list = self.instruction.clone();
        list.push(new);
        list
    }

    // ---- commit: replace a kind's view with the peer's response ----

    /// Commit a source sync for one file. The response entries pair up with
    /// the sent descriptors in order; the returned records follow response
    /// order, so the last one is the most recently appended breakpoint.
    pub fn apply_source_sync(
        &mut self,
        path: &str,
        descriptors: Vec<SourceBreakpoint>,
        records: &[Breakpoint],
    ) -> Vec<MappedBreakpoint> {
        self.drop_mapped(|origin| {
            matches!(origin, BreakpointOrigin::Source { path: p, .. } if p == path)
        });
        let mapped: Vec<MappedBreakpoint> = descriptors
            .iter()
            .zip(records)
            .map(|(descriptor, record)| {
                MappedBreakpoint::from_record(
                    record,
                    BreakpointOrigin::Source {
                        path: path.to_string(),
                        line: descriptor.line,
                        condition: descriptor.condition.clone(),
                    },
                )
            })
            .collect();
        self.insert_mapped(&mapped);
        if descriptors.is_empty() {
            self.source.remove(path);
        } else {
            self.source.insert(path.to_string(), descriptors);
        }
        mapped
    }

    pub fn apply_function_sync(
        &mut self,
        descriptors: Vec<FunctionBreakpoint>,
        records: &[Breakpoint],
    ) -> Vec<MappedBreakpoint> {
        self.drop_mapped(|origin| matches!(origin, BreakpointOrigin::Function { .. }));
        let mapped: Vec<MappedBreakpoint> = descriptors
            .iter()
            .zip(records)
            .map(|(descriptor, record)| {
                MappedBreakpoint::from_record(
                    record,
                    BreakpointOrigin::Function {
                        name: descriptor.name.clone(),
                        condition: descriptor.condition.clone(),
                    },
                )
            })
            .collect();
        self.insert_mapped(&mapped);
        self.function = descriptors;
        mapped
    }

    pub fn apply_instruction_sync(
        &mut self,
        descriptors: Vec<InstructionBreakpoint>,
        records: &[Breakpoint],
    ) -> Vec<MappedBreakpoint> {
        self.drop_mapped(|origin| matches!(origin, BreakpointOrigin::Instruction { .. }));
        let mapped: Vec<MappedBreakpoint> = descriptors
            .iter()
            .zip(records)
            .map(|(descriptor, record)| {
                MappedBreakpoint::from_record(
                    record,
                    BreakpointOrigin::Instruction {
                        reference: descriptor.instruction_reference.clone(),
                        condition: descriptor.condition.clone(),
                    },
                )
            })
            .collect();
        self.insert_mapped(&mapped);
        self.instruction = descriptors;
        mapped
    }

    // ---- removal ----

    /// Compute the resyncs needed to remove the given peer ids. Unknown ids
    /// are skipped. Kinds and files not touched by any id are absent from
    /// the plan.
    pub fn plan_removal(&self, ids: &[i64]) -> RemovePlan {
        let mut plan = RemovePlan::default();
        let mut source: HashMap<String, Vec<SourceBreakpoint>> = HashMap::new();
        let mut function: Option<Vec<FunctionBreakpoint>> = None;
        let mut instruction: Option<Vec<InstructionBreakpoint>> = None;

        for id in ids {
            let Some(bp) = self.mapped.get(id) else {
                log::warn!("remove: unknown breakpoint id {id}");
                continue;
            };
            match &bp.origin {
                BreakpointOrigin::Source {
                    path,
                    line,
                    condition,
                } => {
                    let list = source.entry(path.clone()).or_insert_with(|| {
                        self.source.get(path).cloned().unwrap_or_default()
                    });
                    remove_first(list, |d| d.line == *line && d.condition == *condition);
                }
                BreakpointOrigin::Function { name, condition } => {
                    let list = function.get_or_insert_with(|| self.function.clone());
                    remove_first(list, |d| d.name == *name && d.condition == *condition);
                }
                BreakpointOrigin::Instruction {
                    reference,
                    condition,
                } => {
                    let list = instruction.get_or_insert_with(|| self.instruction.clone());
                    remove_first(list, |d| {
                        d.instruction_reference == *reference && d.condition == *condition
                    });
                }
            }
        }

        plan.source = source.into_iter().collect();
        plan.function = function;
        plan.instruction = instruction;
        plan
    }

    // ---- peer event reconciliation ----

    /// Apply a peer breakpoint event. An event for an id the registry has
    /// never seen (a pre-existing peer-side breakpoint) is still inserted,
    /// defaulting its origin to an instruction breakpoint so later generic
    /// operations never fail on a missing record.
    pub fn reconcile(&mut self, reason: &str, record: &Breakpoint) -> ReconcileOutcome {
        match reason {
            "removed" => {
                let Some(id) = record.id else {
                    return ReconcileOutcome::Ignored;
                };
                let Some(bp) = self.mapped.remove(&id) else {
                    return ReconcileOutcome::Ignored;
                };
                self.remove_descriptor(&bp.origin);
                ReconcileOutcome::Removed(id)
            }
            "new" | "changed" => {
                let Some(id) = record.id else {
                    return ReconcileOutcome::Ignored;
                };
                if let Some(existing) = self.mapped.get_mut(&id) {
                    existing.update_from(record);
                    ReconcileOutcome::Changed(existing.clone())
                } else {
                    let reference = record
                        .instruction_reference
                        .clone()
                        .unwrap_or_else(|| format!("{id}"));
                    let origin = BreakpointOrigin::Instruction {
                        reference: reference.clone(),
                        condition: None,
                    };
                    self.instruction.push(InstructionBreakpoint {
                        instruction_reference: reference,
                        offset: None,
                        condition: None,
                    });
                    let bp = MappedBreakpoint::from_record(record, origin);
                    self.mapped.insert(id, bp.clone());
                    ReconcileOutcome::Added(bp)
                }
            }
            other => {
                log::debug!("breakpoint event with unknown reason '{other}'");
                ReconcileOutcome::Ignored
            }
        }
    }

    // ---- queries ----

    pub fn get(&self, id: i64) -> Option<&MappedBreakpoint> {
        self.mapped.get(&id)
    }

    pub fn list(&self) -> Vec<MappedBreakpoint> {
        let mut all: Vec<MappedBreakpoint> = self.mapped.values().cloned().collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    pub fn count(&self, kind: BreakpointKind) -> usize {
        match kind {
            BreakpointKind::Source => self.source.values().map(Vec::len).sum(),
            BreakpointKind::Function => self.function.len(),
            BreakpointKind::Instruction => self.instruction.len(),
        }
    }

    // ---- internals ----

    fn drop_mapped(&mut self, matches: impl Fn(&BreakpointOrigin) -> bool) {
        self.mapped.retain(|_, bp| !matches(&bp.origin));
    }

    fn insert_mapped(&mut self, mapped: &[MappedBreakpoint]) {
        for bp in mapped {
            if let Some(id) = bp.id {
                self.mapped.insert(id, bp.clone());
            }
        }
    }

    fn remove_descriptor(&mut self, origin: &BreakpointOrigin) {
        match origin {
            BreakpointOrigin::Source {
                path,
                line,
                condition,
            } => {
                if let Some(list) = self.source.get_mut(path) {
                    remove_first(list, |d| d.line == *line && d.condition == *condition);
                    if list.is_empty() {
                        self.source.remove(path);
                    }
                }
            }
            BreakpointOrigin::Function { name, condition } => {
                remove_first(&mut self.function, |d| {
                    d.name == *name && d.condition == *condition
                });
            }
            BreakpointOrigin::Instruction {
                reference,
                condition,
            } => {
                remove_first(&mut self.instruction, |d| {
                    d.instruction_reference == *reference && d.condition == *condition
                });
            }
        }
    }
}

fn remove_first<T>(list: &mut Vec<T>, matches: impl Fn(&T) -> bool) {
    if let Some(pos) = list.iter().position(matches) {
        list.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, verified: bool) -> Breakpoint {
        Breakpoint {
            id: Some(id),
            verified,
            ..Default::default()
        }
    }

    fn source_bp(line: u32) -> SourceBreakpoint {
        SourceBreakpoint {
            line,
            condition: None,
        }
    }

    #[test]
    fn add_takes_last_response_entry() {
        let mut registry = BreakpointRegistry::new();

        let list = registry.source_list_with("main.c", source_bp(10));
        assert_eq!(list.len(), 1);
        let mapped = registry.apply_source_sync("main.c", list, &[record(1, true)]);
        assert_eq!(mapped.last().unwrap().id, Some(1));

        let list = registry.source_list_with("main.c", source_bp(20));
        assert_eq!(list.len(), 2);
        let mapped =
            registry.apply_source_sync("main.c", list, &[record(1, true), record(2, false)]);
        assert_eq!(mapped.last().unwrap().id, Some(2));
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn view_equals_last_full_replace_response() {
        let mut registry = BreakpointRegistry::new();
        let list = registry.function_list_with(FunctionBreakpoint {
            name: "main".into(),
            condition: None,
        });
        registry.apply_function_sync(list, &[record(5, true)]);

        // A later resync reassigns ids; the registry must mirror it exactly.
        let list = registry.function_list_with(FunctionBreakpoint {
            name: "helper".into(),
            condition: None,
        });
        registry.apply_function_sync(list, &[record(8, true), record(9, true)]);

        let ids: Vec<_> = registry.list().into_iter().filter_map(|b| b.id).collect();
        assert_eq!(ids, vec![8, 9]);
        assert!(registry.get(5).is_none());
    }

    #[test]
    fn removal_plan_is_partitioned_by_kind_and_path() {
        let mut registry = BreakpointRegistry::new();
        let list = registry.source_list_with("a.c", source_bp(1));
        registry.apply_source_sync("a.c", list, &[record(1, true)]);
        let list = registry.source_list_with("b.c", source_bp(2));
        registry.apply_source_sync("b.c", list, &[record(2, true)]);
        let list = registry.instruction_list_with(InstructionBreakpoint {
            instruction_reference: "0x1000".into(),
            offset: None,
            condition: None,
        });
        registry.apply_instruction_sync(list, &[record(3, true)]);

        let plan = registry.plan_removal(&[1, 3]);
        assert_eq!(plan.source.len(), 1);
        let (path, remaining) = &plan.source[0];
        assert_eq!(path, "a.c");
        assert!(remaining.is_empty());
        assert!(plan.function.is_none());
        assert_eq!(plan.instruction.as_deref(), Some(&[][..]));
    }

    #[test]
    fn unsolicited_event_defaults_to_instruction_origin() {
        let mut registry = BreakpointRegistry::new();
        let mut rec = record(42, true);
        rec.instruction_reference = Some("0x8000".into());

        match registry.reconcile("new", &rec) {
            ReconcileOutcome::Added(bp) => {
                assert_eq!(bp.origin.kind(), BreakpointKind::Instruction);
                assert_eq!(bp.id, Some(42));
            }
            other => panic!("expected added, got {other:?}"),
        }
        // The record now participates in generic operations.
        assert_eq!(registry.count(BreakpointKind::Instruction), 1);
        let plan = registry.plan_removal(&[42]);
        assert_eq!(plan.instruction.as_deref(), Some(&[][..]));
    }

    #[test]
    fn changed_event_refreshes_location_and_notifies() {
        let mut registry = BreakpointRegistry::new();
        let list = registry.source_list_with("a.c", source_bp(7));
        registry.apply_source_sync("a.c", list, &[record(1, false)]);

        // Resolution arrives after the set call returned.
        let mut rec = record(1, true);
        rec.instruction_reference = Some("0x2000".into());
        rec.line = Some(8);

        match registry.reconcile("changed", &rec) {
            ReconcileOutcome::Changed(bp) => {
                assert!(bp.verified);
                let loc = bp.location.unwrap();
                assert_eq!(loc.address, Some(0x2000));
                assert_eq!(loc.line, Some(8));
                assert_eq!(bp.origin.kind(), BreakpointKind::Source);
            }
            other => panic!("expected changed, got {other:?}"),
        }
    }

    #[test]
    fn removed_event_drops_record_and_descriptor() {
        let mut registry = BreakpointRegistry::new();
        let list = registry.source_list_with("a.c", source_bp(3));
        registry.apply_source_sync("a.c", list, &[record(4, true)]);

        match registry.reconcile("removed", &record(4, true)) {
            ReconcileOutcome::Removed(id) => assert_eq!(id, 4),
            other => panic!("expected removed, got {other:?}"),
        }
        assert!(registry.get(4).is_none());
        assert_eq!(registry.count(BreakpointKind::Source), 0);
    }
}
