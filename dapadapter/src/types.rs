//! Host-facing data model.
//!
//! These are the shapes the driver hands to the host engine: mapped
//! breakpoints and modules (always a reflection of the last peer record,
//! never locally invented), stop notifications, and output routing.

use crate::protocol::{Breakpoint, Module, ModuleId, StackFrame, Thread};

/// Parse a peer memory reference: `0x`-prefixed strings are hex, bare
/// strings are decimal first and hex as a fallback.
pub fn parse_memory_reference(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok();
    }
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| u64::from_str_radix(trimmed, 16).ok())
}

/// The three breakpoint kinds, each synchronized with its own full-replace
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    Source,
    Function,
    Instruction,
}

/// What the host originally asked for; exactly one per breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakpointOrigin {
    Source {
        path: String,
        line: u32,
        condition: Option<String>,
    },
    Function {
        name: String,
        condition: Option<String>,
    },
    Instruction {
        reference: String,
        condition: Option<String>,
    },
}

impl BreakpointOrigin {
    pub fn kind(&self) -> BreakpointKind {
        match self {
            BreakpointOrigin::Source { .. } => BreakpointKind::Source,
            BreakpointOrigin::Function { .. } => BreakpointKind::Function,
            BreakpointOrigin::Instruction { .. } => BreakpointKind::Instruction,
        }
    }
}

/// Where the peer says a breakpoint actually landed. Resolution can arrive
/// after the original set call returned, via breakpoint events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedLocation {
    pub address: Option<u64>,
    pub path: Option<String>,
    pub line: Option<u32>,
}

impl ResolvedLocation {
    /// Derive the resolved location from a peer breakpoint record.
    pub fn from_record(record: &Breakpoint) -> Option<Self> {
        let address = record
            .instruction_reference
            .as_deref()
            .and_then(parse_memory_reference)
            .map(|base| {
                let offset = record.offset.unwrap_or(0);
                base.wrapping_add_signed(offset)
            });
        let path = record.source.as_ref().and_then(|s| s.path.clone());
        let line = record.line;
        if address.is_none() && path.is_none() && line.is_none() {
            return None;
        }
        Some(ResolvedLocation {
            address,
            path,
            line,
        })
    }
}

/// A breakpoint as the host sees it: peer-assigned id, the origin the host
/// asked for, and the lazily resolved location.
#[derive(Debug, Clone)]
pub struct MappedBreakpoint {
    pub id: Option<i64>,
    pub verified: bool,
    pub message: Option<String>,
    pub origin: BreakpointOrigin,
    pub location: Option<ResolvedLocation>,
}

impl MappedBreakpoint {
    pub fn from_record(record: &Breakpoint, origin: BreakpointOrigin) -> Self {
        MappedBreakpoint {
            id: record.id,
            verified: record.verified,
            message: record.message.clone(),
            location: ResolvedLocation::from_record(record),
            origin,
        }
    }

    /// Refresh this breakpoint from a newer peer record, keeping the origin.
    pub fn update_from(&mut self, record: &Breakpoint) {
        if record.id.is_some() {
            self.id = record.id;
        }
        self.verified = record.verified;
        self.message = record.message.clone();
        self.location = ResolvedLocation::from_record(record);
    }
}

/// A loaded module as the host sees it, plus the raw peer record.
#[derive(Debug, Clone)]
pub struct MappedModule {
    pub id: ModuleId,
    pub name: String,
    pub path: Option<String>,
    pub raw: Module,
}

impl MappedModule {
    pub fn from_record(record: Module) -> Self {
        MappedModule {
            id: record.id.clone(),
            name: record.name.clone(),
            path: record.path.clone(),
            raw: record,
        }
    }
}

/// Output routing for peer "output" events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    DebuggeeStdout,
    DebuggeeStderr,
    /// Adapter/system chatter: console, telemetry, anything else.
    Debugger,
}

/// Everything the host needs to present a stop.
#[derive(Debug, Clone)]
pub struct StopNotification {
    pub reason: String,
    pub description: Option<String>,
    pub thread: Option<Thread>,
    pub frame: Option<StackFrame>,
    /// Present when the stop reason is "breakpoint" and the hit id is known.
    pub breakpoint: Option<MappedBreakpoint>,
    pub all_threads_stopped: bool,
}

/// Notifications pushed to the host engine from the event dispatch context.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Output {
        channel: OutputChannel,
        text: String,
    },
    Stopped(StopNotification),
    Continued {
        thread_id: Option<i64>,
        all_threads: bool,
    },
    Exited {
        exit_code: i64,
    },
    Terminated,
    BreakpointAdded(MappedBreakpoint),
    BreakpointChanged(MappedBreakpoint),
    BreakpointResolved {
        id: i64,
        location: ResolvedLocation,
    },
    BreakpointRemoved {
        id: i64,
    },
    ModuleLoaded(MappedModule),
    ModuleChanged(MappedModule),
    ModuleUnloaded {
        id: ModuleId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reference_parsing() {
        assert_eq!(parse_memory_reference("0x1000"), Some(0x1000));
        assert_eq!(parse_memory_reference("0XdeadBEEF"), Some(0xdead_beef));
        assert_eq!(parse_memory_reference("4096"), Some(4096));
        // Bare hex without prefix still resolves.
        assert_eq!(parse_memory_reference("ff"), Some(0xff));
        assert_eq!(parse_memory_reference("bogus!"), None);
    }

    #[test]
    fn resolved_location_from_record() {
        let record = Breakpoint {
            id: Some(2),
            verified: true,
            instruction_reference: Some("0x4000".into()),
            offset: Some(8),
            line: Some(12),
            ..Default::default()
        };
        let loc = ResolvedLocation::from_record(&record).unwrap();
        assert_eq!(loc.address, Some(0x4008));
        assert_eq!(loc.line, Some(12));

        let empty = Breakpoint::default();
        assert!(ResolvedLocation::from_record(&empty).is_none());
    }
}
