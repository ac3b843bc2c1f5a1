//! Host-facing driver operations.
//!
//! The synchronous driver contract the host engine programs against: one
//! call in, one result or error out. Each operation issues a peer request
//! and blocks the calling context on its future. Capability-gated calls
//! fail fast before anything is sent; the fixed set of operations this
//! bridge does not provide fails immediately with an explanatory message.

use serde_json::json;

use crate::disasm::{self, AnnotatedInstruction};
use crate::memory::{self, MemoryChunk};
use crate::protocol::{
    EvaluateResponseBody, FunctionBreakpoint, GotoTargetsResponseBody, InstructionBreakpoint,
    ModulesResponseBody, ReadMemoryResponseBody, ScopesResponseBody,
    SetBreakpointsResponseBody, SourceBreakpoint, StackFrame, StackTraceResponseBody, Thread,
    ThreadsResponseBody, VariablesResponseBody, WriteMemoryResponseBody,
    DisassembleResponseBody,
};
use crate::types::{MappedBreakpoint, MappedModule};
use crate::variables::{
    self, FrameVariableCache, RegisterGroup, VariableHandle,
};
use crate::{DapError, DapSession, Result, QUERY_TIMEOUT};

/// Stepping granularity of the host's step operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGranularity {
    Line,
    Instruction,
}

impl DapSession {
    // ---- execution control ----

    /// Convenience launch for plain executable targets; callers with
    /// adapter-specific launch fields use [`DapSession::launch`] directly.
    pub async fn launch_program(
        &self,
        program: &str,
        args: &[String],
        stop_on_entry: bool,
    ) -> Result<()> {
        self.launch(json!({
            "program": program,
            "args": args,
            "stopOnEntry": stop_on_entry,
        }))
        .await
    }

    pub async fn resume(&self, thread_id: i64) -> Result<()> {
        self.shared().frame.lock().unwrap().take();
        self.shared()
            .comm
            .request("continue", json!({ "threadId": thread_id }))
            .await?;
        Ok(())
    }

    pub async fn pause(&self, thread_id: i64) -> Result<()> {
        self.shared()
            .comm
            .request("pause", json!({ "threadId": thread_id }))
            .await?;
        Ok(())
    }

    pub async fn step_over(&self, thread_id: i64, granularity: StepGranularity) -> Result<()> {
        self.step("next", thread_id, granularity).await
    }

    pub async fn step_into(&self, thread_id: i64, granularity: StepGranularity) -> Result<()> {
        self.step("stepIn", thread_id, granularity).await
    }

    pub async fn step_out(&self, thread_id: i64, granularity: StepGranularity) -> Result<()> {
        self.step("stepOut", thread_id, granularity).await
    }

    async fn step(
        &self,
        command: &'static str,
        thread_id: i64,
        granularity: StepGranularity,
    ) -> Result<()> {
        let mut arguments = json!({ "threadId": thread_id });
        if granularity == StepGranularity::Instruction {
            self.require(
                self.capabilities()?.supports_stepping_granularity,
                "instruction-level stepping",
            )?;
            arguments["granularity"] = json!("instruction");
        }
        self.shared().frame.lock().unwrap().take();
        self.shared().comm.request(command, arguments).await?;
        Ok(())
    }

    /// Run to a source line: resolve goto targets for the line, then jump
    /// to the first one.
    pub async fn goto_line(&self, thread_id: i64, path: &str, line: u32) -> Result<()> {
        self.require(
            self.capabilities()?.supports_goto_targets_request,
            "goto targets",
        )?;
        let body = self
            .shared()
            .comm
            .request(
                "gotoTargets",
                json!({ "source": { "path": path }, "line": line }),
            )
            .await?;
        let targets: GotoTargetsResponseBody = serde_json::from_value(body)?;
        let target = targets.targets.first().ok_or_else(|| DapError::Protocol(
            format!("no goto target at {path}:{line}"),
        ))?;
        self.shared().frame.lock().unwrap().take();
        self.shared()
            .comm
            .request(
                "goto",
                json!({ "threadId": thread_id, "targetId": target.id }),
            )
            .await?;
        Ok(())
    }

    // ---- inspection ----

    /// Enumerate peer threads, sorted by id. Hard-timeout bounded: a wedged
    /// peer must not hang the host on a simple query.
    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let body = self
            .shared()
            .comm
            .request_with_timeout("threads", json!({}), QUERY_TIMEOUT)
            .await?;
        let mut threads: ThreadsResponseBody = serde_json::from_value(body)?;
        threads.threads.sort_by_key(|t| t.id);
        Ok(threads.threads)
    }

    pub async fn stack_frames(
        &self,
        thread_id: i64,
        start: u32,
        levels: u32,
    ) -> Result<Vec<StackFrame>> {
        let body = self
            .shared()
            .comm
            .request(
                "stackTrace",
                json!({ "threadId": thread_id, "startFrame": start, "levels": levels }),
            )
            .await?;
        let frames: StackTraceResponseBody = serde_json::from_value(body)?;
        Ok(frames.stack_frames)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let mut arguments = json!({ "expression": expression, "context": context });
        if let Some(frame_id) = frame_id {
            arguments["frameId"] = json!(frame_id);
        }
        let body = self.shared().comm.request("evaluate", arguments).await?;
        Ok(serde_json::from_value(body)?)
    }

    // ---- variables and registers ----

    /// Materialize a frame: walk its scopes into the flat variable list and
    /// the named register groups, then reconcile the register view
    /// preferences. Replaces any previous frame materialization.
    pub async fn frame_view(
        &self,
        frame_id: i64,
    ) -> Result<(Vec<VariableHandle>, Vec<RegisterGroup>)> {
        let body = self
            .shared()
            .comm
            .request("scopes", json!({ "frameId": frame_id }))
            .await?;
        let scopes: ScopesResponseBody = serde_json::from_value(body)?;

        let mut cache = FrameVariableCache::new(frame_id);
        for scope in scopes.scopes {
            if variables::is_register_scope(&scope.name) {
                let banks = self.fetch_variables(scope.variables_reference).await?;
                for (index, bank) in banks.iter().enumerate() {
                    let name = variables::register_group_name(index, &bank.name);
                    let registers = if bank.variables_reference > 0 {
                        let leaves = self.fetch_variables(bank.variables_reference).await?;
                        let registers: Vec<VariableHandle> = leaves
                            .iter()
                            .map(|v| variables::normalize_register(v, frame_id))
                            .collect();
                        cache.store_children(bank.variables_reference, registers.clone());
                        registers
                    } else {
                        Vec::new()
                    };
                    cache.register_groups.push(RegisterGroup { name, registers });
                }
            } else {
                let vars = self.fetch_variables(scope.variables_reference).await?;
                cache.variables.extend(
                    vars.iter().map(|v| VariableHandle::from_wire(v, frame_id)),
                );
            }
        }

        variables::sync_register_view(
            self.config().register_settings.as_ref(),
            &self.config().arch,
            &cache.register_groups,
        );

        let result = (cache.variables.clone(), cache.register_groups.clone());
        *self.shared().frame.lock().unwrap() = Some(cache);
        Ok(result)
    }

    /// Resolve a handle's children lazily: the first query issues one peer
    /// request and caches the result on the materialization; repeated
    /// queries return the cached list without another request.
    pub async fn variable_children(
        &self,
        handle: &VariableHandle,
    ) -> Result<Vec<VariableHandle>> {
        if handle.is_leaf() {
            return Ok(Vec::new());
        }
        {
            let guard = self.shared().frame.lock().unwrap();
            let cache = guard
                .as_ref()
                .filter(|cache| cache.frame_id() == handle.frame_id)
                .ok_or_else(|| {
                    DapError::Protocol("variable handle outlived its frame context".into())
                })?;
            if let Some(children) = cache.cached_children(handle.children_reference) {
                return Ok(children.to_vec());
            }
        }

        let vars = self.fetch_variables(handle.children_reference).await?;
        let children: Vec<VariableHandle> = vars
            .iter()
            .map(|v| VariableHandle::from_wire(v, handle.frame_id))
            .collect();

        let mut guard = self.shared().frame.lock().unwrap();
        if let Some(cache) = guard
            .as_mut()
            .filter(|cache| cache.frame_id() == handle.frame_id)
        {
            cache.store_children(handle.children_reference, children.clone());
        }
        Ok(children)
    }

    async fn fetch_variables(&self, reference: i64) -> Result<Vec<crate::protocol::WireVariable>> {
        let body = self
            .shared()
            .comm
            .request("variables", json!({ "variablesReference": reference }))
            .await?;
        let vars: VariablesResponseBody = serde_json::from_value(body)?;
        Ok(vars.variables)
    }

    // ---- breakpoints ----

    pub async fn add_source_breakpoint(
        &self,
        path: &str,
        line: u32,
        condition: Option<String>,
    ) -> Result<MappedBreakpoint> {
        let descriptors = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .source_list_with(path, SourceBreakpoint { line, condition });
        let records = self.set_source_breakpoints(path, &descriptors).await?;
        let mapped = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .apply_source_sync(path, descriptors, &records);
        last_mapped(mapped)
    }

    pub async fn add_function_breakpoint(
        &self,
        name: &str,
        condition: Option<String>,
    ) -> Result<MappedBreakpoint> {
        self.require(
            self.capabilities()?.supports_function_breakpoints,
            "function breakpoints",
        )?;
        let descriptors = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .function_list_with(FunctionBreakpoint {
                name: name.to_string(),
                condition,
            });
        let records = self.set_function_breakpoints(&descriptors).await?;
        let mapped = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .apply_function_sync(descriptors, &records);
        last_mapped(mapped)
    }

    pub async fn add_instruction_breakpoint(
        &self,
        reference: &str,
        condition: Option<String>,
    ) -> Result<MappedBreakpoint> {
        self.require(
            self.capabilities()?.supports_instruction_breakpoints,
            "instruction breakpoints",
        )?;
        let descriptors = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .instruction_list_with(InstructionBreakpoint {
                instruction_reference: reference.to_string(),
                offset: None,
                condition,
            });
        let records = self.set_instruction_breakpoints(&descriptors).await?;
        let mapped = self
            .shared()
            .breakpoints
            .lock()
            .unwrap()
            .apply_instruction_sync(descriptors, &records);
        last_mapped(mapped)
    }

    /// Remove a batch of breakpoints by peer id. Each affected kind (and
    /// each affected file, for source breakpoints) is resynchronized with
    /// its remaining full list independently; a failure in one resync does
    /// not roll back another. The first failure is reported.
    pub async fn remove_breakpoints(&self, ids: &[i64]) -> Result<()> {
        let plan = self.shared().breakpoints.lock().unwrap().plan_removal(ids);
        let mut first_error = None;

        for (path, descriptors) in plan.source {
            match self.set_source_breakpoints(&path, &descriptors).await {
                Ok(records) => {
                    self.shared()
                        .breakpoints
                        .lock()
                        .unwrap()
                        .apply_source_sync(&path, descriptors, &records);
                }
                Err(err) => {
                    log::warn!("source breakpoint resync for {path} failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(descriptors) = plan.function {
            match self.set_function_breakpoints(&descriptors).await {
                Ok(records) => {
                    self.shared()
                        .breakpoints
                        .lock()
                        .unwrap()
                        .apply_function_sync(descriptors, &records);
                }
                Err(err) => {
                    log::warn!("function breakpoint resync failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(descriptors) = plan.instruction {
            match self.set_instruction_breakpoints(&descriptors).await {
                Ok(records) => {
                    self.shared()
                        .breakpoints
                        .lock()
                        .unwrap()
                        .apply_instruction_sync(descriptors, &records);
                }
                Err(err) => {
                    log::warn!("instruction breakpoint resync failed: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn breakpoints(&self) -> Vec<MappedBreakpoint> {
        self.shared().breakpoints.lock().unwrap().list()
    }

    async fn set_source_breakpoints(
        &self,
        path: &str,
        descriptors: &[SourceBreakpoint],
    ) -> Result<Vec<crate::protocol::Breakpoint>> {
        let body = self
            .shared()
            .comm
            .request(
                "setBreakpoints",
                json!({ "source": { "path": path }, "breakpoints": descriptors }),
            )
            .await?;
        let parsed: SetBreakpointsResponseBody = serde_json::from_value(body)?;
        Ok(parsed.breakpoints)
    }

    async fn set_function_breakpoints(
        &self,
        descriptors: &[FunctionBreakpoint],
    ) -> Result<Vec<crate::protocol::Breakpoint>> {
        let body = self
            .shared()
            .comm
            .request(
                "setFunctionBreakpoints",
                json!({ "breakpoints": descriptors }),
            )
            .await?;
        let parsed: SetBreakpointsResponseBody = serde_json::from_value(body)?;
        Ok(parsed.breakpoints)
    }

    async fn set_instruction_breakpoints(
        &self,
        descriptors: &[InstructionBreakpoint],
    ) -> Result<Vec<crate::protocol::Breakpoint>> {
        let body = self
            .shared()
            .comm
            .request(
                "setInstructionBreakpoints",
                json!({ "breakpoints": descriptors }),
            )
            .await?;
        let parsed: SetBreakpointsResponseBody = serde_json::from_value(body)?;
        Ok(parsed.breakpoints)
    }

    // ---- modules ----

    /// The modules the peer has reported through events.
    pub fn modules(&self) -> Vec<MappedModule> {
        self.shared().modules.lock().unwrap().list()
    }

    /// Explicitly enumerate peer modules. Hard-timeout bounded.
    pub async fn fetch_modules(&self) -> Result<Vec<MappedModule>> {
        self.require(self.capabilities()?.supports_modules_request, "module list")?;
        let body = self
            .shared()
            .comm
            .request_with_timeout(
                "modules",
                json!({ "startModule": 0, "moduleCount": 0 }),
                QUERY_TIMEOUT,
            )
            .await?;
        let parsed: ModulesResponseBody = serde_json::from_value(body)?;
        Ok(parsed
            .modules
            .into_iter()
            .map(MappedModule::from_record)
            .collect())
    }

    // ---- disassembly ----

    /// Disassemble around a memory reference and stitch the instruction
    /// sequence into annotated source/symbol groups.
    pub async fn disassemble(
        &self,
        memory_reference: &str,
        instruction_offset: i64,
        instruction_count: u32,
    ) -> Result<Vec<AnnotatedInstruction>> {
        self.require(
            self.capabilities()?.supports_disassemble_request,
            "disassembly",
        )?;
        let body = self
            .shared()
            .comm
            .request(
                "disassemble",
                json!({
                    "memoryReference": memory_reference,
                    "offset": 0,
                    "instructionOffset": instruction_offset,
                    "instructionCount": instruction_count,
                    "resolveSymbols": true,
                }),
            )
            .await?;
        let parsed: DisassembleResponseBody = serde_json::from_value(body)?;
        Ok(disasm::annotate(
            &parsed.instructions,
            self.config().source_lookup.as_ref(),
        ))
    }

    // ---- memory ----

    /// Read a memory range, split into protocol-legal chunks.
    pub async fn read_memory(&self, address: u64, length: u64) -> Result<Vec<MemoryChunk>> {
        self.require(
            self.capabilities()?.supports_read_memory_request,
            "memory reads",
        )?;
        let mut chunks = Vec::new();
        for (start, size) in memory::chunk_ranges(address, length) {
            let body = self
                .shared()
                .comm
                .request(
                    "readMemory",
                    json!({ "memoryReference": format!("0x{start:x}"), "count": size }),
                )
                .await?;
            let parsed: ReadMemoryResponseBody = serde_json::from_value(body)?;
            chunks.push(memory::decode_chunk(start, size, parsed.data.as_deref())?);
        }
        Ok(chunks)
    }

    pub async fn write_memory(&self, address: u64, data: &[u8]) -> Result<u64> {
        self.require(
            self.capabilities()?.supports_write_memory_request,
            "memory writes",
        )?;
        let body = self
            .shared()
            .comm
            .request(
                "writeMemory",
                json!({
                    "memoryReference": format!("0x{address:x}"),
                    "data": memory::encode_payload(data),
                }),
            )
            .await?;
        let parsed: WriteMemoryResponseBody = serde_json::from_value(body)?;
        Ok(parsed
            .bytes_written
            .map(|n| n.max(0) as u64)
            .unwrap_or(data.len() as u64))
    }

    // ---- console ----

    /// Pass host console input through to the adapter process verbatim.
    pub async fn pass_stdin(&self, input: &str) -> Result<()> {
        self.shared().comm.write_raw(input.as_bytes()).await
    }

    // ---- intentionally unsupported driver operations ----
    //
    // These are part of the host driver contract but have no counterpart in
    // this bridge; they fail immediately and are never retried.

    pub fn jump_to_address(&self, _address: u64) -> Result<()> {
        Err(DapError::NotImplemented("jump to address"))
    }

    pub fn execute_shell_command(&self, _command: &str) -> Result<()> {
        Err(DapError::NotImplemented("shell command execution"))
    }

    pub fn cancel_symbol_download(&self) -> Result<()> {
        Err(DapError::NotImplemented("symbol download cancellation"))
    }

    pub fn module_sections(&self, _module_name: &str) -> Result<()> {
        Err(DapError::NotImplemented("module section enumeration"))
    }

    pub fn add_watchpoint(&self, _expression: &str) -> Result<()> {
        Err(DapError::NotImplemented("watchpoints"))
    }

    pub fn load_core_dump(&self, _path: &str) -> Result<()> {
        Err(DapError::NotImplemented("core dump loading"))
    }

    pub fn connect_remote(&self, _endpoint: &str) -> Result<()> {
        Err(DapError::NotImplemented("remote target connection"))
    }

    pub fn attach_to_process(&self, _pid: u32) -> Result<()> {
        Err(DapError::NotImplemented("attaching to a running process"))
    }
}

fn last_mapped(mapped: Vec<MappedBreakpoint>) -> Result<MappedBreakpoint> {
    mapped
        .into_iter()
        .last()
        .ok_or_else(|| DapError::Protocol("peer returned no breakpoint records".into()))
}
