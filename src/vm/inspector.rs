use alloy::{
    eips::eip2930::AccessList,
    primitives::{Address, Bytes, U256},
    rpc::types::trace::geth::{DefaultFrame, GethDefaultTracingOptions},
};
use revm::{
    interpreter::{
        interpreter::EthInterpreter, CallInputs, CallOutcome, CreateInputs, CreateOutcome,
        Interpreter,
    },
    primitives::Log,
    Inspector,
};
use revm_inspectors::{
    access_list::AccessListInspector,
    tracing::{TracingInspector, TracingInspectorConfig},
};

/// What a call should record besides its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capture {
    /// Record a struct-log trace.
    pub trace: bool,
    /// Record the touched addresses and storage keys.
    pub access_list: bool,
}

/// Gas accounting of the outermost frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameGas {
    /// Gas spent by execution, excluding intrinsic gas.
    pub spent: u64,
    /// Refund accumulated by execution.
    pub refunded: u64,
}

/// The inspector every call runs under.
///
/// Always records the outermost frame's gas. Optionally layers a
/// [`TracingInspector`] and an [`AccessListInspector`]; each hook is forwarded
/// to the tracer first, then to the access list recorder.
#[derive(Debug, Default)]
pub struct CallInspector {
    depth: usize,
    frame_gas: Option<FrameGas>,
    tracer: Option<TracingInspector>,
    access_list: Option<AccessListInspector>,
}

impl CallInspector {
    /// An inspector recording what `capture` asks for.
    pub fn new(capture: Capture) -> Self {
        Self {
            depth: 0,
            frame_gas: None,
            tracer: capture.trace.then(|| TracingInspector::new(TracingInspectorConfig::default_geth())),
            access_list: capture.access_list.then(|| AccessListInspector::new(AccessList::default())),
        }
    }

    /// Gas of the outermost frame, if it ran.
    pub const fn frame_gas(&self) -> Option<FrameGas> {
        self.frame_gas
    }

    /// Consume the inspector, producing the recorded trace and access list.
    pub fn into_outputs(self, gas_used: u64, output: Bytes) -> (Option<DefaultFrame>, Option<AccessList>) {
        let trace = self.tracer.map(|tracer| {
            tracer.into_geth_builder().geth_traces(
                gas_used,
                output,
                GethDefaultTracingOptions::default(),
            )
        });
        let access_list = self.access_list.map(AccessListInspector::into_access_list);
        (trace, access_list)
    }

    fn record_frame_end(&mut self, gas: &revm::interpreter::Gas) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.frame_gas = Some(FrameGas {
                spent: gas.spent(),
                refunded: u64::try_from(gas.refunded()).unwrap_or_default(),
            });
        }
    }
}

impl<Ctx> Inspector<Ctx, EthInterpreter> for CallInspector
where
    TracingInspector: Inspector<Ctx, EthInterpreter>,
    AccessListInspector: Inspector<Ctx, EthInterpreter>,
{
    fn initialize_interp(&mut self, interp: &mut Interpreter<EthInterpreter>, context: &mut Ctx) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.initialize_interp(interp, context);
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.initialize_interp(interp, context);
        }
    }

    fn step(&mut self, interp: &mut Interpreter<EthInterpreter>, context: &mut Ctx) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.step(interp, context);
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.step(interp, context);
        }
    }

    fn step_end(&mut self, interp: &mut Interpreter<EthInterpreter>, context: &mut Ctx) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.step_end(interp, context);
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.step_end(interp, context);
        }
    }

    fn log(&mut self, interp: &mut Interpreter<EthInterpreter>, context: &mut Ctx, log: Log) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.log(interp, context, log.clone());
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.log(interp, context, log);
        }
    }

    fn call(&mut self, context: &mut Ctx, inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.depth += 1;
        if let Some(outcome) = self.tracer.as_mut().and_then(|t| t.call(context, inputs)) {
            return Some(outcome);
        }
        self.access_list.as_mut().and_then(|a| a.call(context, inputs))
    }

    fn call_end(&mut self, context: &mut Ctx, inputs: &CallInputs, outcome: &mut CallOutcome) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.call_end(context, inputs, outcome);
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.call_end(context, inputs, outcome);
        }
        self.record_frame_end(&outcome.result.gas);
    }

    fn create(&mut self, context: &mut Ctx, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        self.depth += 1;
        if let Some(outcome) = self.tracer.as_mut().and_then(|t| t.create(context, inputs)) {
            return Some(outcome);
        }
        self.access_list.as_mut().and_then(|a| a.create(context, inputs))
    }

    fn create_end(
        &mut self,
        context: &mut Ctx,
        inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.create_end(context, inputs, outcome);
        }
        if let Some(access_list) = self.access_list.as_mut() {
            access_list.create_end(context, inputs, outcome);
        }
        self.record_frame_end(&outcome.result.gas);
    }

    fn selfdestruct(&mut self, contract: Address, target: Address, value: U256) {
        if let Some(tracer) = self.tracer.as_mut() {
            <TracingInspector as Inspector<Ctx, EthInterpreter>>::selfdestruct(
                tracer, contract, target, value,
            );
        }
    }
}
