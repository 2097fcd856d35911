//! Per-computation instrumentation hook
//!
//! [`HookInspector`] is the single revm inspector the environment drives.
//! On every execution it:
//! - builds the [`Computation`] frame tree (msg, PC trace, children in
//!   invocation order, logs with ordering ids, output, error, gas figures)
//! - records the PC at every sub-call site, so the profiler can attribute
//!   child gas to the calling line
//! - traces SHA3 preimages and SSTORE'd slots for storage-key reversal
//! - applies the environment's raw-precompile table, short-circuiting
//!   intercepted calls before the EVM dispatches them
//! - runs registered opcode hooks on matching steps
//! - captures the memory image at revert sites for frame-local decoding
//!
//! The precompile and opcode-hook tables are copies installed per
//! execution; mutating the process-wide registries mid-call cannot affect a
//! computation already in flight.

use alloy::primitives::{keccak256, Address, Bytes, Log, U256};
use revm::{
    bytecode::opcode,
    context::ContextTr,
    interpreter::{
        interpreter::EthInterpreter,
        interpreter_types::{InputsTr, Jumps, MemoryTr},
        CallInputs, CallOutcome, CreateInputs, CreateOutcome, Gas,
        InstructionResult, Interpreter, InterpreterResult,
    },
    Inspector,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::env::precompiles::{PrecompileInput, PrecompileMap};
use crate::inspectors::gas::{GasMeterMode, PcGasProfile};
use crate::inspectors::tracers::{record_sha3, record_sstore, Sha3Trace, SstoreTrace};
use crate::memory::FastMem;
use crate::traits::{Reset, TraceOutput};
use crate::types::{CallMessage, Computation, RawLogEntry, VmError};
use crate::utils::error_utils::encode_error_string;

/// One observed opcode step, handed to registered opcode hooks
#[derive(Debug)]
pub struct OpcodeStep<'a> {
    /// Program counter of the step
    pub pc: usize,
    /// The opcode about to execute
    pub opcode: u8,
    /// Storage address of the running frame
    pub address: Address,
    /// Stack contents, bottom first (operands are at the end)
    pub stack: &'a [U256],
}

/// A hook invoked before a matching opcode executes
pub type OpcodeHook = Arc<dyn for<'a> Fn(&OpcodeStep<'a>) + Send + Sync>;

/// Opcode byte → hook table
pub type OpcodeHookMap = HashMap<u8, OpcodeHook>;

/// In-flight state for one frame
#[derive(Clone, Default)]
struct FrameBuilder {
    computation: Computation,
    gas_profile: PcGasProfile,
    /// PC of the step currently executing
    step_pc: usize,
    /// Gas remaining when the current step began
    step_gas_remaining: u64,
    /// Cumulative refund when the current step began
    step_gas_refunded: i64,
    /// `(offset, size)` of a SHA3 whose preimage resolves at step end
    pending_sha3: Option<(usize, usize)>,
}

/// The environment's per-call instrumentation inspector
#[derive(Clone, Default)]
pub struct HookInspector {
    frames: Vec<FrameBuilder>,
    finished: Option<Computation>,
    pub(crate) precompiles: PrecompileMap,
    pub(crate) opcode_hooks: OpcodeHookMap,
    pub(crate) gas_mode: GasMeterMode,
    pub(crate) sha3_trace: Sha3Trace,
    pub(crate) sstore_trace: SstoreTrace,
    pub(crate) start_pc: usize,
    pub(crate) fake_codesize: Option<usize>,
    log_counter: u64,
}

impl HookInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install per-execution configuration
    ///
    /// Called by the environment right before each execution; the tables
    /// are copies, per the copy-on-write discipline.
    pub fn configure(
        &mut self,
        precompiles: PrecompileMap,
        opcode_hooks: OpcodeHookMap,
        gas_mode: GasMeterMode,
        start_pc: usize,
        fake_codesize: Option<usize>,
    ) {
        self.precompiles = precompiles;
        self.opcode_hooks = opcode_hooks;
        self.gas_mode = gas_mode;
        self.start_pc = start_pc;
        self.fake_codesize = fake_codesize;
    }

    /// The finished computation tree of the last execution
    pub fn take_computation(&mut self) -> Option<Computation> {
        self.finished.take()
    }

    /// Record on the parent frame the PC at which a child frame starts
    fn record_child_site(&mut self) {
        if let Some(parent) = self.frames.last_mut() {
            let pc = parent.step_pc;
            parent.computation.child_pcs.push(pc);
        }
    }

    fn push_frame(&mut self, msg: CallMessage) {
        let mut frame = FrameBuilder::default();
        if self.frames.is_empty() {
            frame.computation.start_pc = self.start_pc;
            frame.computation.fake_codesize = self.fake_codesize;
        }
        frame.computation.msg = msg;
        self.frames.push(frame);
    }

    fn pop_frame(&mut self, result: &InterpreterResult, created: Option<Address>) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        let comp = &mut frame.computation;
        comp.output = result.output.clone();
        comp.gas_used = result.gas.spent();
        comp.gas_refunded = result.gas.refunded();
        comp.created = created;
        if !result.result.is_ok() {
            comp.error = Some(VmError {
                result: result.result,
                output: result.output.clone(),
            });
        }
        if self.gas_mode == GasMeterMode::Profiling {
            // terminating opcodes charge nothing but still need attribution
            for pc in &comp.pc_trace {
                frame.gas_profile.touch(*pc);
            }
            comp.gas_profile = Some(frame.gas_profile);
        }
        match self.frames.last_mut() {
            Some(parent) => parent.computation.children.push(frame.computation),
            None => self.finished = Some(frame.computation),
        }
    }

    /// Run an intercepted precompile, producing the frame's outcome
    fn run_precompile(
        &self,
        handler: &crate::env::precompiles::PrecompileFn,
        caller: Address,
        value: U256,
        calldata: &[u8],
        gas_limit: u64,
    ) -> InterpreterResult {
        let input = PrecompileInput {
            caller,
            value,
            calldata,
        };
        match handler(&input) {
            Ok(output) => InterpreterResult {
                result: InstructionResult::Return,
                output,
                gas: Gas::new(gas_limit),
            },
            Err(reason) => InterpreterResult {
                result: InstructionResult::Revert,
                output: encode_error_string(&reason).into(),
                gas: Gas::new(gas_limit),
            },
        }
    }
}

impl<CTX> Inspector<CTX, EthInterpreter> for HookInspector
where
    CTX: ContextTr,
{
    /// Frame entry for calls; also the interception point for raw
    /// precompiles, which short-circuit before the EVM dispatches the call
    fn call(&mut self, context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.record_child_site();

        let data = inputs.input.bytes(context);
        let msg = CallMessage {
            sender: inputs.caller,
            to: inputs.target_address,
            code_address: inputs.bytecode_address,
            value: inputs.call_value(),
            data: data.clone(),
            gas: inputs.gas_limit,
            is_static: inputs.is_static,
            is_create: false,
        };
        self.push_frame(msg);

        if let Some(handler) = self.precompiles.get(&inputs.target_address).cloned() {
            let result = self.run_precompile(
                &handler,
                inputs.caller,
                inputs.call_value(),
                &data,
                inputs.gas_limit,
            );
            return Some(CallOutcome::new(result, inputs.return_memory_offset.clone()));
        }
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        self.pop_frame(&outcome.result, None);
    }

    /// Frame entry for creations; the created address is unknown until
    /// `create_end`
    fn create(&mut self, _context: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.record_child_site();
        let msg = CallMessage {
            sender: inputs.caller,
            to: Address::ZERO,
            code_address: Address::ZERO,
            value: inputs.value,
            data: inputs.init_code.clone(),
            gas: inputs.gas_limit,
            is_static: false,
            is_create: true,
        };
        self.push_frame(msg);
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        if let (Some(address), Some(frame)) = (outcome.address, self.frames.last_mut()) {
            frame.computation.msg.to = address;
            frame.computation.msg.code_address = address;
        }
        self.pop_frame(&outcome.result, outcome.address);
    }

    fn step(&mut self, interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX) {
        let pc = interp.bytecode.pc();
        let op = interp.bytecode.opcode();
        let address = interp.input.target_address();
        let gas_mode = self.gas_mode;

        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        frame.step_pc = pc;
        frame.computation.pc_trace.push(pc);

        if gas_mode != GasMeterMode::NoMetering {
            frame.step_gas_remaining = interp.control.gas.remaining();
            frame.step_gas_refunded = interp.control.gas.refunded();
        }

        let stack = interp.stack.data();
        match op {
            // SHA3: operands are (offset, size) with offset on top. The
            // preimage is read at step end, once memory has been extended.
            opcode::KECCAK256 => {
                if stack.len() >= 2 {
                    let offset = stack[stack.len() - 1];
                    let size = stack[stack.len() - 2];
                    if size == U256::from(64) {
                        frame.pending_sha3 =
                            Some((offset.saturating_to::<usize>(), size.saturating_to::<usize>()));
                    }
                }
            }
            // SSTORE: record the touched slot against the storage address
            opcode::SSTORE => {
                if let Some(slot) = stack.last() {
                    record_sstore(&mut self.sstore_trace, address, *slot);
                }
            }
            // capture the memory image where execution is about to unwind,
            // so frame locals can be decoded afterwards
            opcode::REVERT | opcode::INVALID => {
                let size = interp.memory.size();
                let image = interp.memory.slice(0..size).to_vec();
                frame.computation.memory = Some(FastMem::from_bytes(&image));
            }
            _ => {}
        }

        if let Some(hook) = self.opcode_hooks.get(&op).cloned() {
            let step = OpcodeStep {
                pc,
                opcode: op,
                address,
                stack: interp.stack.data(),
            };
            hook(&step);
        }
    }

    fn step_end(&mut self, interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX) {
        let gas_mode = self.gas_mode;
        let Some(frame) = self.frames.last_mut() else {
            return;
        };

        if let Some((offset, size)) = frame.pending_sha3.take() {
            if offset + size <= interp.memory.size() {
                let preimage = interp.memory.slice(offset..offset + size).to_vec();
                let image = keccak256(&preimage);
                record_sha3(&mut self.sha3_trace, image, &preimage);
            }
        }

        if gas_mode == GasMeterMode::Profiling {
            let pc = frame.step_pc;
            let spent = frame
                .step_gas_remaining
                .saturating_sub(interp.control.gas.remaining());
            if spent > 0 {
                frame.gas_profile.charge(pc, spent as i64);
            }
            let refunded = interp.control.gas.refunded() - frame.step_gas_refunded;
            if refunded != 0 {
                frame.gas_profile.refund(pc, refunded);
            }
        }
    }

    fn log(&mut self, _interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX, log: Log) {
        let entry = RawLogEntry {
            log_id: self.log_counter,
            address: log.address,
            topics: log.data.topics().to_vec(),
            data: log.data.data.clone(),
        };
        self.log_counter += 1;
        if let Some(frame) = self.frames.last_mut() {
            frame.computation.logs.push(entry);
        }
    }
}

impl Reset for HookInspector {
    fn reset(&mut self) {
        self.frames.clear();
        self.finished = None;
        self.sha3_trace.clear();
        self.sstore_trace.clear();
        self.log_counter = 0;
        self.start_pc = 0;
        self.fake_codesize = None;
    }
}

impl TraceOutput for HookInspector {
    type Output = Option<Computation>;

    fn get_output(&self) -> Self::Output {
        self.finished.clone()
    }
}

impl HookInspector {
    /// Traces accumulated during the last execution, drained for merging
    /// into the environment's cumulative tables
    pub fn drain_traces(&mut self) -> (Sha3Trace, SstoreTrace) {
        (
            std::mem::take(&mut self.sha3_trace),
            std::mem::take(&mut self.sstore_trace),
        )
    }
}
