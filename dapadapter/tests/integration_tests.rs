//! Integration tests for the DAP driver adapter.
//!
//! These exercise the public API against canned peer traffic: framing,
//! registry synchronization, disassembly annotation and memory chunking.

use std::io::BufReader;

use dapadapter::breakpoints::{BreakpointRegistry, ReconcileOutcome};
use dapadapter::disasm::{self, SourceLookup};
use dapadapter::memory;
use dapadapter::protocol::*;
use dapadapter::types::{parse_memory_reference, BreakpointKind};
use dapadapter::variables::{self, FrameVariableCache};

#[test]
fn frame_codec_round_trips_a_message_stream() {
    let mut stream = Vec::new();
    stream.extend(encode_frame(
        br#"{"seq":1,"type":"response","request_seq":1,"success":true,"command":"initialize","body":{"supportsConfigurationDoneRequest":true}}"#,
    ));
    stream.extend(encode_frame(
        br#"{"seq":2,"type":"event","event":"initialized"}"#,
    ));

    let mut reader = BufReader::new(stream.as_slice());

    let first = read_frame(&mut reader).unwrap().unwrap();
    match serde_json::from_slice::<InboundMessage>(&first).unwrap() {
        InboundMessage::Response(resp) => {
            assert!(resp.success);
            let caps: Capabilities = serde_json::from_value(resp.body).unwrap();
            assert!(caps.supports_configuration_done_request);
        }
        other => panic!("expected response, got {other:?}"),
    }

    let second = read_frame(&mut reader).unwrap().unwrap();
    match serde_json::from_slice::<InboundMessage>(&second).unwrap() {
        InboundMessage::Event(ev) => assert_eq!(ev.event, "initialized"),
        other => panic!("expected event, got {other:?}"),
    }

    assert!(read_frame(&mut reader).unwrap().is_none());
}

#[test]
fn breakpoint_registry_mirrors_full_replace_responses() {
    let mut registry = BreakpointRegistry::new();

    // Two breakpoints in one file, added one at a time.
    let list = registry.source_list_with(
        "/src/app.c",
        SourceBreakpoint {
            line: 10,
            condition: None,
        },
    );
    let response: SetBreakpointsResponseBody = serde_json::from_str(
        r#"{"breakpoints":[{"id":1,"verified":true,"line":10}]}"#,
    )
    .unwrap();
    registry.apply_source_sync("/src/app.c", list, &response.breakpoints);

    let list = registry.source_list_with(
        "/src/app.c",
        SourceBreakpoint {
            line: 25,
            condition: Some("x > 3".into()),
        },
    );
    let response: SetBreakpointsResponseBody = serde_json::from_str(
        r#"{"breakpoints":[{"id":1,"verified":true,"line":10},{"id":2,"verified":false}]}"#,
    )
    .unwrap();
    let mapped = registry.apply_source_sync("/src/app.c", list, &response.breakpoints);

    // The new breakpoint is the last entry of the ordered response.
    let newest = mapped.last().unwrap();
    assert_eq!(newest.id, Some(2));
    assert!(!newest.verified);
    assert_eq!(registry.count(BreakpointKind::Source), 2);

    // Location resolution arrives later through a breakpoint event.
    let event: BreakpointEventBody = serde_json::from_str(
        r#"{"reason":"changed","breakpoint":{"id":2,"verified":true,"line":26,"instructionReference":"0x80001234"}}"#,
    )
    .unwrap();
    match registry.reconcile(&event.reason, &event.breakpoint) {
        ReconcileOutcome::Changed(bp) => {
            let location = bp.location.unwrap();
            assert_eq!(location.address, Some(0x8000_1234));
            assert_eq!(location.line, Some(26));
        }
        other => panic!("expected changed, got {other:?}"),
    }

    // Removal resyncs the remaining list for that file only.
    let plan = registry.plan_removal(&[2]);
    assert_eq!(plan.source.len(), 1);
    assert_eq!(plan.source[0].1.len(), 1);
    assert_eq!(plan.source[0].1[0].line, 10);
    assert!(plan.function.is_none());
    assert!(plan.instruction.is_none());
}

#[test]
fn disassembly_annotation_from_wire_records() {
    struct Lookup;
    impl SourceLookup for Lookup {
        fn line_text(&self, path: &str, line: u32) -> Option<String> {
            Some(format!("{path}:{line}"))
        }
    }

    let response: DisassembleResponseBody = serde_json::from_str(
        r#"{"instructions":[
            {"address":"0x1000","instruction":"push {r7, lr}","symbol":"main",
             "location":{"name":"app.c","path":"/src/app.c"},"line":5,"endLine":5},
            {"address":"0x1002","instruction":"mov r7, sp","line":5,"endLine":5},
            {"address":"0x1004","instruction":"movs r3, 1Ah","line":7,"endLine":7}
        ]}"#,
    )
    .unwrap();

    let rows = disasm::annotate(&response.instructions, &Lookup);

    assert!(rows[0].unique);
    assert!(!rows[1].unique);
    assert_eq!(rows[0].comment.as_deref(), Some("/src/app.c:5"));
    assert_eq!(rows[0].comment, rows[1].comment);

    // Line change without a location: new group, no location, no comment.
    assert!(rows[2].unique);
    assert!(rows[2].location.is_none());
    assert!(rows[2].comment.is_none());

    // Symbol carries through with offsets from the carried base.
    assert_eq!(rows[0].symbol.as_deref(), Some("main+0x0"));
    assert_eq!(rows[2].symbol.as_deref(), Some("main+0x4"));

    // Hex literal rewrite happened inside the instruction text.
    assert_eq!(rows[2].instruction, "movs r3, 0x1a");
}

#[test]
fn register_materialization_from_wire_records() {
    let banks: VariablesResponseBody = serde_json::from_str(
        r#"{"variables":[
            {"name":"General","value":"","variablesReference":101},
            {"name":"FPU","value":"","variablesReference":102}
        ]}"#,
    )
    .unwrap();
    let general: VariablesResponseBody = serde_json::from_str(
        r#"{"variables":[
            {"name":"R0","value":"DEADBEEF","variablesReference":0},
            {"name":"R1","value":"0","variablesReference":0},
            {"name":"XPSR","value":"flags = [N Z]","variablesReference":0}
        ]}"#,
    )
    .unwrap();

    let mut groups = Vec::new();
    for (index, bank) in banks.variables.iter().enumerate() {
        groups.push(variables::register_group_name(index, &bank.name));
    }
    assert_eq!(groups, vec!["0 - General", "1 - FPU"]);

    let registers: Vec<_> = general
        .variables
        .iter()
        .map(|v| variables::normalize_register(v, 1))
        .collect();
    assert_eq!(registers[0].name, "r0");
    assert_eq!(registers[0].value, "0xdeadbeef");
    assert_eq!(registers[1].value, "0x0");
    // Structured values are not bare hex and stay untouched.
    assert_eq!(registers[2].value, "flags = [N Z]");
}

#[test]
fn frame_cache_returns_identical_children_without_refetch() {
    let vars: VariablesResponseBody = serde_json::from_str(
        r#"{"variables":[
            {"name":"len","value":"4","variablesReference":0},
            {"name":"data","value":"{...}","variablesReference":0,
             "memoryReference":"0x2000"}
        ]}"#,
    )
    .unwrap();

    let mut cache = FrameVariableCache::new(77);
    let children: Vec<_> = vars
        .variables
        .iter()
        .map(|v| variables::VariableHandle::from_wire(v, 77))
        .collect();
    cache.store_children(55, children);

    let first = cache.cached_children(55).unwrap().to_vec();
    let second = cache.cached_children(55).unwrap().to_vec();
    assert_eq!(first, second);
    assert_eq!(first[1].address, Some(0x2000));
}

#[test]
fn memory_chunking_covers_oversized_ranges() {
    let length = (1u64 << 31) + 10;
    let ranges = memory::chunk_ranges(0x1_0000, length);

    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges.iter().map(|r| r.1).sum::<u64>(), length);
    for window in ranges.windows(2) {
        assert_eq!(window[0].0 + window[0].1, window[1].0);
    }

    let body: ReadMemoryResponseBody =
        serde_json::from_str(r#"{"address":"0x10000","data":"AAECAw=="}"#).unwrap();
    let chunk = memory::decode_chunk(0x1_0000, 4, body.data.as_deref()).unwrap();
    assert_eq!(chunk.data, vec![0, 1, 2, 3]);
}

#[test]
fn address_parsing_accepts_both_conventions() {
    assert_eq!(parse_memory_reference("0x200"), Some(0x200));
    assert_eq!(parse_memory_reference("512"), Some(512));
    assert_eq!(parse_memory_reference("200"), Some(200));
}
