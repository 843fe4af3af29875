// synth.rs — Synthesizer: rewritten model + schedule → structured C program plan
//
// Turns the scheduled process network into a `SynthesizedProgram`: signal
// variables for every connected port pair and boundary port, persistent delay
// variables, the deduplicated function set, and a three-phase driver plan
// (delay latch-out, process execution in schedule order, delay latch-in).
// Everything is resolved here — types, array sizes, call styles — so that
// rendering the C text is a pure formatting step.
//
// Preconditions: the model passed rewriting and the schedule is certified.
// Postconditions: every signal in the returned program is typed and sized;
//   every driver step has been checked for type and size compatibility.
// Failure modes: undiscoverable or conflicting signal types (E0400),
//   unresolvable array sizes (E0401), process/function arity combinations
//   with no synthesis rule (E0500).
// Side effects: none. The input model is not modified; functions are renamed
//   and wrapped on an internal copy.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::ctype::{CDataType, CFunction, CVariable};
use crate::diag::{codes, Diagnostic};
use crate::id::{Id, PortRef};
use crate::model::{Model, Process, ProcessKind};
use crate::schedule::Schedule;

/// One indentation level of emitted C.
pub(crate) const INDENT: &str = "    ";

// ── Public artifact ─────────────────────────────────────────────────────────

/// A network boundary parameter of the generated entry function, plus the
/// process it feeds or drains (for the doc comment).
#[derive(Debug, Clone)]
pub struct BoundaryPort {
    pub param: CVariable,
    pub process: Id,
}

/// A persistent (static) delay state variable with its C initializer text.
#[derive(Debug, Clone)]
pub struct DelayVariable {
    pub variable: CVariable,
    pub initial_value: String,
}

/// How a process function receives its output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `out = f(a, b);` — one input parameter per in-port.
    Return,
    /// `f(a, b, &out);` shape — the last parameter receives the output.
    OutParam,
}

/// One statement of the driver plan. Each step renders to one or more C
/// statements; all types and sizes were verified at construction.
#[derive(Debug, Clone)]
pub enum Step {
    /// Element-wise (arrays) or direct (scalars) assignment.
    Copy { to: CVariable, from: CVariable },
    /// Concatenate several variables into one array (stream merge).
    Gather { to: CVariable, from: Vec<CVariable> },
    /// Split one array across several variables (stream split).
    Scatter { to: Vec<CVariable>, from: CVariable },
    /// Process function invocation.
    Call {
        function: String,
        style: CallStyle,
        inputs: Vec<CVariable>,
        output: CVariable,
    },
}

impl Step {
    /// Render this step as C statements at one indent level.
    ///
    /// Sizes are resolved before steps are built, so rendering is total; an
    /// unsized array reaching this point is a synthesizer bug.
    pub fn render(&self) -> String {
        match self {
            Step::Copy { to, from } => render_copy(to, from),
            Step::Gather { to, from } => {
                let mut code = String::new();
                let mut index = 0usize;
                for source in from {
                    let size = elements_of(source);
                    if size == 1 && !source.data_type.is_array() {
                        code.push_str(&format!(
                            "{}{}[{}] = {};\n",
                            INDENT, to.name, index, source.name
                        ));
                    } else {
                        code.push_str(&format!(
                            "{i}for (i = {start}, j = 0; i < {end}; ++i, ++j) {{\n\
                             {i}{i}{to}[i] = {from}[j];\n\
                             {i}}}\n",
                            i = INDENT,
                            start = index,
                            end = index + size,
                            to = to.name,
                            from = source.name
                        ));
                    }
                    index += size;
                }
                code
            }
            Step::Scatter { to, from } => {
                let mut code = String::new();
                let mut index = 0usize;
                for target in to {
                    let size = elements_of(target);
                    if size == 1 && !target.data_type.is_array() {
                        code.push_str(&format!(
                            "{}{} = {}[{}];\n",
                            INDENT, target.name, from.name, index
                        ));
                    } else {
                        code.push_str(&format!(
                            "{i}for (i = {start}, j = 0; i < {end}; ++i, ++j) {{\n\
                             {i}{i}{to}[j] = {from}[i];\n\
                             {i}}}\n",
                            i = INDENT,
                            start = index,
                            end = index + size,
                            to = target.name,
                            from = from.name
                        ));
                    }
                    index += size;
                }
                code
            }
            Step::Call {
                function,
                style,
                inputs,
                output,
            } => {
                let mut code = String::from(INDENT);
                if *style == CallStyle::Return {
                    code.push_str(&format!("{} = ", output.name));
                }
                code.push_str(&format!("{}(", function));
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        code.push_str(", ");
                    }
                    code.push_str(&input.name);
                }
                if *style == CallStyle::OutParam {
                    if !inputs.is_empty() {
                        code.push_str(", ");
                    }
                    code.push_str(&output.name);
                }
                code.push_str(");\n");
                code
            }
        }
    }
}

fn render_copy(to: &CVariable, from: &CVariable) -> String {
    if to.data_type.is_array() {
        format!(
            "{i}for (i = 0; i < {n}; ++i) {{\n\
             {i}{i}{to}[i] = {from}[i];\n\
             {i}}}\n",
            i = INDENT,
            n = elements_of(to),
            to = to.name,
            from = from.name
        )
    } else {
        let to_ref = if to.data_type.is_pointer() {
            format!("*{}", to.name)
        } else {
            to.name.clone()
        };
        let from_ref = if from.data_type.is_pointer() {
            format!("*{}", from.name)
        } else {
            from.name.clone()
        };
        format!("{}{} = {};\n", INDENT, to_ref, from_ref)
    }
}

fn elements_of(variable: &CVariable) -> usize {
    match variable.data_type.size() {
        Some(n) => n,
        None => {
            debug_assert!(false, "unsized array reached step rendering");
            1
        }
    }
}

/// The fully resolved program plan the code generator renders.
#[derive(Debug, Clone)]
pub struct SynthesizedProgram {
    pub network_name: String,
    /// Entry-function input parameters, in boundary declaration order.
    pub inputs: Vec<BoundaryPort>,
    /// Entry-function output parameters, in boundary declaration order.
    pub outputs: Vec<BoundaryPort>,
    /// Signal variables needing a plain declaration, in stable order.
    pub signals: Vec<CVariable>,
    /// Boundary array signals declared as aliases of a parameter:
    /// `(signal, parameter name)`.
    pub aliases: Vec<(CVariable, String)>,
    /// Persistent delay state, in schedule order.
    pub delays: Vec<DelayVariable>,
    /// Unique function definitions, callees before callers.
    pub functions: Vec<CFunction>,
    /// Scalar input parameter → signal copies.
    pub copy_in: Vec<Step>,
    /// Delay latch-out: state → out-signal, before the main phase.
    pub pre_steps: Vec<Step>,
    /// Per-process execution, in schedule order.
    pub steps: Vec<Step>,
    /// Delay latch-in: in-signal → state, after the main phase.
    pub post_steps: Vec<Step>,
    /// Signal → scalar output parameter copies.
    pub copy_out: Vec<Step>,
}

/// Result of synthesis: the program plan (absent when any error was raised)
/// plus diagnostics.
#[derive(Debug)]
pub struct SynthResult {
    pub program: Option<SynthesizedProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Synthesize a program plan from a rewritten model and its schedule.
pub fn synthesize(model: &Model, schedule: &Schedule) -> SynthResult {
    let synthesizer = Synthesizer {
        model: model.clone(),
        schedule,
        signals: BTreeMap::new(),
    };
    match synthesizer.run() {
        Ok(program) => SynthResult {
            program: Some(program),
            diagnostics: Vec::new(),
        },
        Err(diag) => SynthResult {
            program: None,
            diagnostics: vec![diag],
        },
    }
}

// ── Signal identity ─────────────────────────────────────────────────────────

/// A signal is keyed by its two endpoints; either end is absent at the
/// network boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SignalKey {
    out_end: Option<PortRef>,
    in_end: Option<PortRef>,
}

impl SignalKey {
    fn variable_name(&self) -> String {
        let left = match &self.out_end {
            Some(r) => format!("{}_{}", r.process, r.port),
            None => "network_input".to_string(),
        };
        let right = match &self.in_end {
            Some(r) => format!("{}_{}", r.process, r.port),
            None => "network_output".to_string(),
        };
        format!("v{}_to_{}", left, right)
    }

    fn describe(&self) -> String {
        let left = match &self.out_end {
            Some(r) => r.to_string(),
            None => "network input".to_string(),
        };
        let right = match &self.in_end {
            Some(r) => r.to_string(),
            None => "network output".to_string(),
        };
        format!("{} -> {}", left, right)
    }
}

/// Outcome of a directional search that may benignly run off the network
/// edge, distinguished from a hard failure that must abort synthesis.
enum Search {
    NotFound,
    Fatal(Box<Diagnostic>),
}

type Found<T> = Result<T, Search>;

// ── Synthesizer ─────────────────────────────────────────────────────────────

struct Synthesizer<'a> {
    model: Model,
    schedule: &'a Schedule,
    signals: BTreeMap<SignalKey, Option<CDataType>>,
}

impl<'a> Synthesizer<'a> {
    fn run(mut self) -> Result<SynthesizedProgram, Diagnostic> {
        self.rename_functions()?;
        self.combine_function_duplicates()?;
        self.wrap_coalesced_functions()?;
        self.combine_function_duplicates()?;

        self.create_signals()?;
        self.discover_signal_types()?;
        self.propagate_array_sizes()?;
        self.check_signals_sized()?;
        // Parallel wrappers need the per-instance sizes that only the
        // resolved signals can supply, so they are built after propagation.
        self.size_parallel_functions()?;
        self.wrap_parallel_functions()?;
        self.combine_function_duplicates()?;
        self.propagate_sizes_to_functions()?;
        self.constify_input_arrays();

        let delays = self.create_delay_variables()?;
        self.assemble(delays)
    }

    // ── Errors ──────────────────────────────────────────────────────────

    fn internal(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(message)
            .with_code(codes::E0100)
            .in_pass("synthesize")
    }

    fn scheduled_process(&self, id: &Id) -> Result<&Process, Diagnostic> {
        self.model
            .process(id)
            .ok_or_else(|| self.internal(format!("scheduled process \"{}\" not in model", id)))
    }

    // ── Function preparation ────────────────────────────────────────────

    /// Prefix every process function name with its owning process so that
    /// names stay unique after coalescing pulled foreign functions in.
    fn rename_functions(&mut self) -> Result<(), Diagnostic> {
        for id in &self.schedule.order {
            let Some(process) = self.model.process_mut(id) else {
                return Err(self.internal(format!("scheduled process \"{}\" not in model", id)));
            };
            for (counter, function) in process.kind.functions_mut().into_iter().enumerate() {
                function.name = format!("f{}_{}{}", id, function.name, counter + 1);
            }
        }
        Ok(())
    }

    /// Collapse functions with identical signature and body to the first
    /// occurrence's name. Keyed by a SHA-256 digest over the rendered
    /// signature (name excluded) and body.
    fn combine_function_duplicates(&mut self) -> Result<(), Diagnostic> {
        let mut unique: BTreeMap<String, String> = BTreeMap::new();
        for id in &self.schedule.order {
            let Some(process) = self.model.process_mut(id) else {
                return Err(Diagnostic::error(format!(
                    "scheduled process \"{}\" not in model",
                    id
                ))
                .with_code(codes::E0100)
                .in_pass("synthesize"));
            };
            for function in process.kind.functions_mut() {
                let digest = function_digest(function);
                match unique.get(&digest) {
                    Some(canonical) => {
                        if function.name != *canonical {
                            function.name = canonical.clone();
                        }
                    }
                    None => {
                        unique.insert(digest, function.name.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Give every multi-stage fused process one wrapper composing its stages
    /// through `value1..valueN` locals; the wrapper is what the driver calls.
    fn wrap_coalesced_functions(&mut self) -> Result<(), Diagnostic> {
        for id in self.schedule.order.clone() {
            let Some(process) = self.model.process(&id) else {
                continue;
            };
            let multi_stage = match &process.kind {
                ProcessKind::CoalescedMap { functions } => functions.len() > 1,
                ProcessKind::ParallelMap { functions, .. } => functions.len() > 1,
                _ => false,
            };
            if !multi_stage {
                continue;
            }
            let stages: Vec<CFunction> = process.kind.functions().into_iter().cloned().collect();
            let wrapper = build_coalesced_wrapper(&id, &stages)?;
            if let Some(process) = self.model.process_mut(&id) {
                match &mut process.kind {
                    ProcessKind::CoalescedMap { functions }
                    | ProcessKind::ParallelMap { functions, .. } => {
                        functions.insert(0, wrapper);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Give every `ParallelMap` a wrapper looping its per-instance function
    /// over `count` instances; the wrapper is what the driver calls.
    fn wrap_parallel_functions(&mut self) -> Result<(), Diagnostic> {
        for id in self.schedule.order.clone() {
            let Some(process) = self.model.process(&id) else {
                continue;
            };
            let ProcessKind::ParallelMap { count, functions } = &process.kind else {
                continue;
            };
            let Some(inner) = functions.first() else {
                return Err(self.internal(format!("parallel process \"{}\" has no function", id)));
            };
            let wrapper = build_parallel_wrapper(&id, inner, *count)?;
            if let Some(process) = self.model.process_mut(&id) {
                if let ProcessKind::ParallelMap { functions, .. } = &mut process.kind {
                    functions.insert(0, wrapper);
                }
            }
        }
        Ok(())
    }

    // ── Signals ─────────────────────────────────────────────────────────

    fn key_by_in_port(&self, owner: &Id, port: &Id) -> SignalKey {
        let here = PortRef::new(owner.clone(), port.clone());
        let out_end = self
            .model
            .process(owner)
            .and_then(|p| p.in_port(port))
            .and_then(|p| p.connection.clone());
        SignalKey {
            out_end,
            in_end: Some(here),
        }
    }

    fn key_by_out_port(&self, owner: &Id, port: &Id) -> SignalKey {
        let here = PortRef::new(owner.clone(), port.clone());
        let in_end = self
            .model
            .process(owner)
            .and_then(|p| p.out_port(port))
            .and_then(|p| p.connection.clone());
        SignalKey {
            out_end: Some(here),
            in_end,
        }
    }

    /// One signal per connected port pair plus one per boundary port, walked
    /// in schedule order.
    fn create_signals(&mut self) -> Result<(), Diagnostic> {
        for id in &self.schedule.order {
            let process = self.model.process(id).ok_or_else(|| {
                Diagnostic::error(format!("scheduled process \"{}\" not in model", id))
                    .with_code(codes::E0100)
                    .in_pass("synthesize")
            })?;
            let in_keys: Vec<SignalKey> = process
                .in_ports
                .iter()
                .map(|port| self.key_by_in_port(id, &port.id))
                .collect();
            let out_keys: Vec<SignalKey> = process
                .out_ports
                .iter()
                .map(|port| self.key_by_out_port(id, &port.id))
                .collect();
            for key in in_keys.into_iter().chain(out_keys) {
                self.signals.entry(key).or_insert(None);
            }
        }
        Ok(())
    }

    fn signal_type(&self, key: &SignalKey) -> Result<CDataType, Diagnostic> {
        match self.signals.get(key) {
            Some(Some(t)) => Ok(t.clone()),
            _ => Err(self.internal(format!("signal {} has no resolved type", key.describe()))),
        }
    }

    fn signal_variable(&self, key: &SignalKey) -> Result<CVariable, Diagnostic> {
        Ok(CVariable::new(key.variable_name(), self.signal_type(key)?))
    }

    // ── Type discovery ──────────────────────────────────────────────────

    /// A signal's type comes from the producing or consuming function
    /// signature; `Copy`/`Delay`/`Zipx`/`Unzipx` are transparent and the
    /// search continues through them.
    fn discover_signal_types(&mut self) -> Result<(), Diagnostic> {
        let keys: Vec<SignalKey> = self.signals.keys().cloned().collect();
        for key in &keys {
            let mut visited = BTreeSet::new();
            match self.type_backward(key, &mut visited) {
                Ok(_) => {}
                Err(Search::Fatal(diag)) => return Err(*diag),
                Err(Search::NotFound) => {
                    let mut visited = BTreeSet::new();
                    match self.type_forward(key, &mut visited) {
                        Ok(_) => {}
                        Err(Search::Fatal(diag)) => return Err(*diag),
                        Err(Search::NotFound) => {
                            return Err(Diagnostic::error(format!(
                                "no data type for signal {} could be found",
                                key.describe()
                            ))
                            .with_code(codes::E0400)
                            .in_pass("synthesize"));
                        }
                    }
                }
            }
        }
        self.check_end_agreement(&keys)
    }

    fn type_backward(&mut self, key: &SignalKey, visited: &mut BTreeSet<SignalKey>) -> Found<CDataType> {
        if let Some(Some(t)) = self.signals.get(key) {
            return Ok(t.clone());
        }
        if !visited.insert(key.clone()) {
            return Err(Search::NotFound);
        }
        let Some(out_end) = key.out_end.clone() else {
            return Err(Search::NotFound);
        };
        let producer = match self.model.process(&out_end.process) {
            Some(p) => p,
            None => {
                return Err(Search::Fatal(Box::new(self.internal(format!(
                    "signal {} references unknown process",
                    key.describe()
                )))));
            }
        };
        let kind = producer.kind.clone();
        let in_port_ids: Vec<Id> = producer.in_ports.iter().map(|p| p.id.clone()).collect();
        let num_in_ports = in_port_ids.len();

        let data_type = match &kind {
            ProcessKind::Map { .. }
            | ProcessKind::CoalescedMap { .. }
            | ProcessKind::ParallelMap { .. }
            | ProcessKind::ZipWithN { .. } => {
                let function = match kind.functions().first() {
                    Some(f) => (*f).clone(),
                    None => {
                        return Err(Search::Fatal(Box::new(self.internal(format!(
                            "process \"{}\" has no function",
                            out_end.process
                        )))));
                    }
                };
                match output_slot_type(&function, num_in_ports) {
                    Some(t) => t,
                    None => {
                        return Err(Search::Fatal(Box::new(
                            Diagnostic::error(format!(
                                "function \"{}\" takes {} parameters for {} in-ports; \
                                 no call style fits",
                                function.name,
                                function.num_params(),
                                num_in_ports
                            ))
                            .with_code(codes::E0500)
                            .for_process(&out_end.process)
                            .in_pass("synthesize"),
                        )));
                    }
                }
            }
            _ => {
                // Transparent: take the type of any resolvable upstream
                // signal; a stream merge makes the result an array.
                let mut found: Option<CDataType> = None;
                for port in &in_port_ids {
                    let upstream = self.key_by_in_port(&out_end.process, port);
                    match self.type_backward(&upstream, visited) {
                        Ok(t) => found = Some(t),
                        Err(Search::Fatal(diag)) => return Err(Search::Fatal(diag)),
                        Err(Search::NotFound) => {}
                    }
                }
                let mut data_type = match found {
                    Some(t) => t,
                    None => return Err(Search::NotFound),
                };
                if matches!(kind, ProcessKind::Zipx) {
                    data_type.set_is_array(true);
                }
                if matches!(kind, ProcessKind::Unzipx) && data_type.is_array() {
                    // Each split branch is a slice of unknown extent.
                    data_type.set_is_array(true);
                }
                data_type
            }
        };
        // The signature describes one instance; outside the process the
        // instances' slots lie end to end.
        let data_type = match &kind {
            ProcessKind::ParallelMap { count, .. } => widen_by_count(&data_type, *count),
            _ => data_type,
        };
        self.signals.insert(key.clone(), Some(data_type.clone()));
        Ok(data_type)
    }

    fn type_forward(&mut self, key: &SignalKey, visited: &mut BTreeSet<SignalKey>) -> Found<CDataType> {
        if let Some(Some(t)) = self.signals.get(key) {
            return Ok(t.clone());
        }
        if !visited.insert(key.clone()) {
            return Err(Search::NotFound);
        }
        let Some(in_end) = key.in_end.clone() else {
            return Err(Search::NotFound);
        };
        let consumer = match self.model.process(&in_end.process) {
            Some(p) => p,
            None => {
                return Err(Search::Fatal(Box::new(self.internal(format!(
                    "signal {} references unknown process",
                    key.describe()
                )))));
            }
        };
        let kind = consumer.kind.clone();
        let out_port_ids: Vec<Id> = consumer.out_ports.iter().map(|p| p.id.clone()).collect();
        let port_index = consumer.in_ports.iter().position(|p| p.id == in_end.port);

        let data_type = match &kind {
            ProcessKind::Map { .. }
            | ProcessKind::CoalescedMap { .. }
            | ProcessKind::ParallelMap { .. } => {
                let function = match kind.functions().first() {
                    Some(f) => (*f).clone(),
                    None => {
                        return Err(Search::Fatal(Box::new(self.internal(format!(
                            "process \"{}\" has no function",
                            in_end.process
                        )))));
                    }
                };
                match function.params.first() {
                    Some(p) => {
                        let mut t = p.data_type.clone();
                        t.set_is_const(false);
                        t
                    }
                    None => {
                        return Err(Search::Fatal(Box::new(
                            Diagnostic::error(format!(
                                "function \"{}\" has no input parameter",
                                function.name
                            ))
                            .with_code(codes::E0500)
                            .for_process(&in_end.process)
                            .in_pass("synthesize"),
                        )));
                    }
                }
            }
            ProcessKind::ZipWithN { function } => {
                let index = match port_index {
                    Some(i) => i,
                    None => {
                        return Err(Search::Fatal(Box::new(self.internal(format!(
                            "port {} not found on its process",
                            in_end
                        )))));
                    }
                };
                match function.params.get(index) {
                    Some(p) => p.data_type.clone(),
                    None => {
                        return Err(Search::Fatal(Box::new(
                            Diagnostic::error(format!(
                                "process has more in-ports than function \"{}\" has parameters",
                                function.name
                            ))
                            .with_code(codes::E0500)
                            .for_process(&in_end.process)
                            .in_pass("synthesize"),
                        )));
                    }
                }
            }
            _ => {
                let mut found: Option<CDataType> = None;
                for port in &out_port_ids {
                    let downstream = self.key_by_out_port(&in_end.process, port);
                    match self.type_forward(&downstream, visited) {
                        Ok(t) => found = Some(t),
                        Err(Search::Fatal(diag)) => return Err(Search::Fatal(diag)),
                        Err(Search::NotFound) => {}
                    }
                }
                let mut data_type = match found {
                    Some(t) => t,
                    None => return Err(Search::NotFound),
                };
                if matches!(kind, ProcessKind::Unzipx) {
                    data_type.set_is_array(true);
                }
                if matches!(kind, ProcessKind::Zipx) && data_type.is_array() {
                    data_type.set_is_array(true);
                }
                data_type
            }
        };
        let data_type = match &kind {
            ProcessKind::ParallelMap { count, .. } => widen_by_count(&data_type, *count),
            _ => data_type,
        };
        self.signals.insert(key.clone(), Some(data_type.clone()));
        Ok(data_type)
    }

    /// Where a signal directly joins two function-bearing processes, their
    /// declared element types must agree.
    fn check_end_agreement(&self, keys: &[SignalKey]) -> Result<(), Diagnostic> {
        for key in keys {
            let produced = key
                .out_end
                .as_ref()
                .and_then(|r| self.model.process(&r.process))
                .and_then(|p| direct_output_base(p));
            let consumed = match (&key.in_end, key.in_end.as_ref().and_then(|r| self.model.process(&r.process))) {
                (Some(r), Some(p)) => direct_input_base(p, &r.port),
                _ => None,
            };
            if let (Some(a), Some(b)) = (produced, consumed) {
                if a != b {
                    return Err(Diagnostic::error(format!(
                        "signal {} joins mismatched data types ({} vs {})",
                        key.describe(),
                        a.as_c(),
                        b.as_c()
                    ))
                    .with_code(codes::E0400)
                    .in_pass("synthesize"));
                }
            }
        }
        Ok(())
    }

    // ── Array-size propagation ──────────────────────────────────────────

    /// Spread known array sizes across size-transparent processes, summing
    /// branch sizes at stream merges and splits. Walks the schedule; for each
    /// process, in-port signals search backward then forward, out-port
    /// signals forward then backward. Idempotent once every size is known.
    fn propagate_array_sizes(&mut self) -> Result<(), Diagnostic> {
        for id in self.schedule.order.clone() {
            let process = self.scheduled_process(&id)?;
            let in_keys: Vec<SignalKey> = process
                .in_ports
                .iter()
                .map(|p| self.key_by_in_port(&id, &p.id))
                .collect();
            let out_keys: Vec<SignalKey> = process
                .out_ports
                .iter()
                .map(|p| self.key_by_out_port(&id, &p.id))
                .collect();
            for key in in_keys {
                let mut visited = BTreeSet::new();
                match self.size_backward(&key, &mut visited) {
                    Ok(_) => {}
                    Err(Search::Fatal(diag)) => return Err(*diag),
                    Err(Search::NotFound) => {
                        let mut visited = BTreeSet::new();
                        match self.size_forward(&key, &mut visited) {
                            Ok(_) | Err(Search::NotFound) => {}
                            Err(Search::Fatal(diag)) => return Err(*diag),
                        }
                    }
                }
            }
            for key in out_keys {
                let mut visited = BTreeSet::new();
                match self.size_forward(&key, &mut visited) {
                    Ok(_) => {}
                    Err(Search::Fatal(diag)) => return Err(*diag),
                    Err(Search::NotFound) => {
                        let mut visited = BTreeSet::new();
                        match self.size_backward(&key, &mut visited) {
                            Ok(_) | Err(Search::NotFound) => {}
                            Err(Search::Fatal(diag)) => return Err(*diag),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn size_backward(&mut self, key: &SignalKey, visited: &mut BTreeSet<SignalKey>) -> Found<usize> {
        let data_type = match self.signals.get(key) {
            Some(Some(t)) => t.clone(),
            _ => return Err(Search::NotFound),
        };
        if let Some(n) = data_type.size() {
            return Ok(n);
        }
        if !visited.insert(key.clone()) {
            return Err(Search::NotFound);
        }
        let Some(out_end) = key.out_end.clone() else {
            return Err(Search::NotFound);
        };
        let Some(producer) = self.model.process(&out_end.process) else {
            return Err(Search::NotFound);
        };
        let is_merge = matches!(producer.kind, ProcessKind::Zipx);
        let in_port_ids: Vec<Id> = producer.in_ports.iter().map(|p| p.id.clone()).collect();
        if in_port_ids.is_empty() {
            return Err(Search::NotFound);
        }
        // A data-parallel stage scales sizes instead of passing them
        // through: outside extent = per-instance extent times count.
        let parallel_extent = match &producer.kind {
            ProcessKind::ParallelMap { count, functions } => Some(
                functions
                    .first()
                    .and_then(|f| output_slot_type(f, in_port_ids.len()))
                    .and_then(|t| t.size())
                    .map(|per| per * *count),
            ),
            _ => None,
        };

        let size = if is_merge {
            // A merged stream is as long as its branches together.
            let mut total = 0usize;
            for port in &in_port_ids {
                let upstream = self.key_by_in_port(&out_end.process, port);
                total += self.size_backward(&upstream, visited)?;
            }
            total
        } else if let Some(scaled) = parallel_extent {
            match scaled {
                Some(n) => n,
                None => return Err(Search::NotFound),
            }
        } else {
            let upstream = self.key_by_in_port(&out_end.process, &in_port_ids[0]);
            self.size_backward(&upstream, visited)?
        };
        self.set_signal_size(key, size);
        Ok(size)
    }

    fn size_forward(&mut self, key: &SignalKey, visited: &mut BTreeSet<SignalKey>) -> Found<usize> {
        let data_type = match self.signals.get(key) {
            Some(Some(t)) => t.clone(),
            _ => return Err(Search::NotFound),
        };
        if let Some(n) = data_type.size() {
            return Ok(n);
        }
        if !visited.insert(key.clone()) {
            return Err(Search::NotFound);
        }
        let Some(in_end) = key.in_end.clone() else {
            return Err(Search::NotFound);
        };
        let Some(consumer) = self.model.process(&in_end.process) else {
            return Err(Search::NotFound);
        };
        let is_split = matches!(consumer.kind, ProcessKind::Unzipx);
        let out_port_ids: Vec<Id> = consumer.out_ports.iter().map(|p| p.id.clone()).collect();
        if out_port_ids.is_empty() {
            return Err(Search::NotFound);
        }
        let parallel_extent = match &consumer.kind {
            ProcessKind::ParallelMap { count, functions } => Some(
                functions
                    .first()
                    .and_then(|f| f.params.first())
                    .and_then(|p| p.data_type.size())
                    .map(|per| per * *count),
            ),
            _ => None,
        };

        let size = if is_split {
            let mut total = 0usize;
            for port in &out_port_ids {
                let downstream = self.key_by_out_port(&in_end.process, port);
                total += self.size_forward(&downstream, visited)?;
            }
            total
        } else if let Some(scaled) = parallel_extent {
            match scaled {
                Some(n) => n,
                None => return Err(Search::NotFound),
            }
        } else {
            let downstream = self.key_by_out_port(&in_end.process, &out_port_ids[0]);
            self.size_forward(&downstream, visited)?
        };
        self.set_signal_size(key, size);
        Ok(size)
    }

    fn set_signal_size(&mut self, key: &SignalKey, size: usize) {
        if let Some(Some(t)) = self.signals.get_mut(key) {
            t.set_array_size(size.max(1));
        }
    }

    fn check_signals_sized(&self) -> Result<(), Diagnostic> {
        for (key, data_type) in &self.signals {
            if let Some(t) = data_type {
                if t.is_array() && t.size().is_none() {
                    return Err(Diagnostic::error(format!(
                        "array size for signal {} could not be resolved",
                        key.describe()
                    ))
                    .with_code(codes::E0401)
                    .in_pass("synthesize"));
                }
            }
        }
        Ok(())
    }

    /// Resolve unsized per-instance arrays in data-parallel stage functions
    /// by dividing the outside signal's extent over the instances. The
    /// extent must split evenly.
    fn size_parallel_functions(&mut self) -> Result<(), Diagnostic> {
        for id in self.schedule.order.clone() {
            let process = self.scheduled_process(&id)?;
            let ProcessKind::ParallelMap { count, .. } = &process.kind else {
                continue;
            };
            let count = *count;
            let in_size = match process.in_ports.first() {
                Some(p) => {
                    let key = self.key_by_in_port(&id, &p.id);
                    self.signal_type(&key)?.size()
                }
                None => None,
            };
            let out_size = match process.out_ports.first() {
                Some(p) => {
                    let key = self.key_by_out_port(&id, &p.id);
                    self.signal_type(&key)?.size()
                }
                None => None,
            };

            let Some(process) = self.model.process_mut(&id) else {
                continue;
            };
            let mut functions = process.kind.functions_mut();
            let Some(function) = functions.first_mut() else {
                continue;
            };
            let name = function.name.clone();
            let out_param_style = function.num_params() == 2;

            if let Some(param) = function.params.first_mut() {
                let slot = &mut param.data_type;
                if slot.is_array() && slot.size().is_none() {
                    if let Some(outside) = in_size {
                        slot.set_array_size(split_evenly(&id, &name, outside, count)?);
                    }
                }
            }
            let out_slot = if out_param_style {
                match function.params.last_mut() {
                    Some(p) => &mut p.data_type,
                    None => continue,
                }
            } else {
                &mut function.return_type
            };
            if out_slot.is_array() && out_slot.size().is_none() {
                if let Some(outside) = out_size {
                    out_slot.set_array_size(split_evenly(&id, &name, outside, count)?);
                }
            }
        }
        Ok(())
    }

    /// Write resolved signal sizes back into the process function
    /// signatures, and reject leftover unsized array parameters.
    fn propagate_sizes_to_functions(&mut self) -> Result<(), Diagnostic> {
        for id in self.schedule.order.clone() {
            let process = self.scheduled_process(&id)?;
            if process.kind.functions().is_empty() {
                continue;
            }
            let in_keys: Vec<SignalKey> = process
                .in_ports
                .iter()
                .map(|p| self.key_by_in_port(&id, &p.id))
                .collect();
            let out_key = match process.out_ports.first() {
                Some(p) => self.key_by_out_port(&id, &p.id),
                None => {
                    return Err(self.internal(format!("process \"{}\" has no out port", id)));
                }
            };
            let in_types: Vec<CDataType> = in_keys
                .iter()
                .map(|k| self.signal_type(k))
                .collect::<Result<_, _>>()?;
            let out_type = self.signal_type(&out_key)?;
            let num_in_ports = in_types.len();

            let Some(process) = self.model.process_mut(&id) else {
                continue;
            };
            let mut functions = process.kind.functions_mut();
            let Some(function) = functions.first_mut() else {
                continue;
            };

            let name = function.name.clone();
            let out_param_style = function.num_params() == num_in_ports + 1;
            for (index, signal_type) in in_types.iter().enumerate() {
                if let Some(param) = function.params.get_mut(index) {
                    sync_param_size(&id, &name, &mut param.data_type, signal_type)?;
                }
            }
            if out_param_style {
                if let Some(param) = function.params.last_mut() {
                    sync_param_size(&id, &name, &mut param.data_type, &out_type)?;
                }
            } else {
                sync_param_size(&id, &name, &mut function.return_type, &out_type)?;
            }
        }

        // Nothing array-shaped may remain unsized in any function we emit.
        for id in &self.schedule.order {
            let Some(process) = self.model.process(id) else {
                continue;
            };
            for function in process.kind.functions() {
                let unsized_param = function
                    .params
                    .iter()
                    .map(|p| &p.data_type)
                    .chain(std::iter::once(&function.return_type))
                    .any(|t| t.is_array() && t.size().is_none());
                if unsized_param {
                    return Err(Diagnostic::error(format!(
                        "array size in signature of function \"{}\" could not be resolved",
                        function.name
                    ))
                    .with_code(codes::E0401)
                    .for_process(id)
                    .in_pass("synthesize"));
                }
            }
        }
        Ok(())
    }

    /// Boundary input signals of array type render as `const` aliases of the
    /// network input parameters.
    fn constify_input_arrays(&mut self) {
        let keys: Vec<SignalKey> = self
            .boundary_inputs()
            .iter()
            .map(|r| self.key_by_in_port(&r.process, &r.port))
            .collect();
        for key in keys {
            if let Some(Some(t)) = self.signals.get_mut(&key) {
                if t.is_array() {
                    t.set_is_const(true);
                }
            }
        }
    }

    // ── Delay variables ─────────────────────────────────────────────────

    /// One persistent variable per delay, numbered by schedule position.
    fn create_delay_variables(&mut self) -> Result<BTreeMap<Id, DelayVariable>, Diagnostic> {
        let mut delays: BTreeMap<Id, DelayVariable> = BTreeMap::new();
        let mut counter = 0usize;
        for id in self.schedule.order.clone() {
            let process = self.scheduled_process(&id)?;
            let ProcessKind::Delay { initial_value } = &process.kind else {
                continue;
            };
            let initial_value = initial_value.clone();
            let in_port = process
                .in_ports
                .first()
                .map(|p| p.id.clone())
                .ok_or_else(|| self.internal(format!("delay \"{}\" has no in port", id)))?;
            let key = self.key_by_in_port(&id, &in_port);
            let data_type = self.signal_type(&key)?;
            let variable = CVariable::new(format!("v_delay_element{}", counter), data_type);
            counter += 1;
            if delays
                .insert(
                    id.clone(),
                    DelayVariable {
                        variable,
                        initial_value,
                    },
                )
                .is_some()
            {
                return Err(self.internal(format!("delay \"{}\" scheduled twice", id)));
            }
        }
        Ok(delays)
    }

    // ── Boundary ────────────────────────────────────────────────────────

    /// Declared network inputs whose owning process made the schedule.
    fn boundary_inputs(&self) -> Vec<PortRef> {
        self.model
            .inputs
            .iter()
            .filter(|r| self.schedule.position(&r.process).is_some())
            .cloned()
            .collect()
    }

    fn boundary_outputs(&self) -> Vec<PortRef> {
        self.model
            .outputs
            .iter()
            .filter(|r| self.schedule.position(&r.process).is_some())
            .cloned()
            .collect()
    }

    // ── Assembly ────────────────────────────────────────────────────────

    fn assemble(
        mut self,
        delays: BTreeMap<Id, DelayVariable>,
    ) -> Result<SynthesizedProgram, Diagnostic> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut aliases: Vec<(CVariable, String)> = Vec::new();
        let mut aliased: BTreeSet<SignalKey> = BTreeSet::new();
        let mut copy_in = Vec::new();
        let mut copy_out = Vec::new();

        for (index, r) in self.boundary_inputs().iter().enumerate() {
            let key = self.key_by_in_port(&r.process, &r.port);
            let signal = self.signal_variable(&key)?;
            let mut param_type = signal.data_type.clone();
            param_type.set_is_const(true);
            let param = CVariable::new(format!("input{}", index + 1), param_type);
            if signal.data_type.is_array() {
                aliases.push((signal, param.name.clone()));
                aliased.insert(key);
            } else {
                copy_in.push(Step::Copy {
                    to: signal,
                    from: param.clone(),
                });
            }
            inputs.push(BoundaryPort {
                param,
                process: r.process.clone(),
            });
        }

        for (index, r) in self.boundary_outputs().iter().enumerate() {
            let key = self.key_by_out_port(&r.process, &r.port);
            let signal = self.signal_variable(&key)?;
            let mut param_type = signal.data_type.clone();
            if !param_type.is_array() {
                param_type.set_is_pointer(true);
            }
            let param = CVariable::new(format!("output{}", index + 1), param_type);
            if signal.data_type.is_array() {
                aliases.push((signal, param.name.clone()));
                aliased.insert(key);
            } else {
                copy_out.push(Step::Copy {
                    to: param.clone(),
                    from: signal,
                });
            }
            outputs.push(BoundaryPort {
                param,
                process: r.process.clone(),
            });
        }

        let mut signals = Vec::new();
        for key in self.signals.keys().cloned().collect::<Vec<_>>() {
            if aliased.contains(&key) {
                continue;
            }
            signals.push(self.signal_variable(&key)?);
        }

        // Driver phases, all in schedule order.
        let mut pre_steps = Vec::new();
        let mut steps = Vec::new();
        let mut post_steps = Vec::new();
        for id in self.schedule.order.clone() {
            let process = self.scheduled_process(&id)?;
            if let Some(delay) = delays.get(&id) {
                let out_port = process
                    .out_ports
                    .first()
                    .map(|p| p.id.clone())
                    .ok_or_else(|| self.internal(format!("delay \"{}\" has no out port", id)))?;
                let in_port = process
                    .in_ports
                    .first()
                    .map(|p| p.id.clone())
                    .ok_or_else(|| self.internal(format!("delay \"{}\" has no in port", id)))?;
                let out_signal = self.signal_variable(&self.key_by_out_port(&id, &out_port))?;
                let in_signal = self.signal_variable(&self.key_by_in_port(&id, &in_port))?;
                self.check_copy(&out_signal, &delay.variable)?;
                self.check_copy(&delay.variable, &in_signal)?;
                pre_steps.push(Step::Copy {
                    to: out_signal,
                    from: delay.variable.clone(),
                });
                post_steps.push(Step::Copy {
                    to: delay.variable.clone(),
                    from: in_signal,
                });
                continue;
            }
            steps.extend(self.process_step(&id)?);
        }

        // Unique function definitions, callees before callers: within one
        // process the wrapper sits first but must be emitted last.
        let mut functions = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for id in &self.schedule.order {
            let Some(process) = self.model.process(id) else {
                continue;
            };
            for function in process.kind.functions().into_iter().rev() {
                if seen.insert(function.name.clone()) {
                    functions.push(function.clone());
                }
            }
        }

        Ok(SynthesizedProgram {
            network_name: self.model.name.clone(),
            inputs,
            outputs,
            signals,
            aliases,
            delays: {
                // Schedule order, not id order.
                let mut ordered = Vec::new();
                for id in &self.schedule.order {
                    if let Some(d) = delays.get(id) {
                        ordered.push(d.clone());
                    }
                }
                ordered
            },
            functions,
            copy_in,
            pre_steps,
            steps,
            post_steps,
            copy_out,
        })
    }

    /// The driver statements for one non-delay scheduled process.
    fn process_step(&self, id: &Id) -> Result<Vec<Step>, Diagnostic> {
        let process = self.scheduled_process(id)?;
        let in_signals: Vec<CVariable> = process
            .in_ports
            .iter()
            .map(|p| self.signal_variable(&self.key_by_in_port(id, &p.id)))
            .collect::<Result<_, _>>()?;
        let out_signals: Vec<CVariable> = process
            .out_ports
            .iter()
            .map(|p| self.signal_variable(&self.key_by_out_port(id, &p.id)))
            .collect::<Result<_, _>>()?;

        match &process.kind {
            ProcessKind::Map { .. }
            | ProcessKind::ZipWithN { .. }
            | ProcessKind::ParallelMap { .. }
            | ProcessKind::CoalescedMap { .. } => {
                let function = process
                    .kind
                    .functions()
                    .first()
                    .map(|f| (*f).clone())
                    .ok_or_else(|| self.internal(format!("process \"{}\" has no function", id)))?;
                let output = out_signals
                    .first()
                    .cloned()
                    .ok_or_else(|| self.internal(format!("process \"{}\" has no out port", id)))?;
                Ok(vec![self.build_call(id, &function, in_signals, output)?])
            }
            ProcessKind::Zipx => {
                let to = out_signals
                    .first()
                    .cloned()
                    .ok_or_else(|| self.internal(format!("process \"{}\" has no out port", id)))?;
                self.check_gather(id, &to, &in_signals)?;
                Ok(vec![Step::Gather {
                    to,
                    from: in_signals,
                }])
            }
            ProcessKind::Unzipx => {
                let from = in_signals
                    .first()
                    .cloned()
                    .ok_or_else(|| self.internal(format!("process \"{}\" has no in port", id)))?;
                self.check_gather(id, &from, &out_signals)?;
                Ok(vec![Step::Scatter {
                    to: out_signals,
                    from,
                }])
            }
            ProcessKind::Copy => {
                let from = in_signals
                    .first()
                    .cloned()
                    .ok_or_else(|| self.internal(format!("process \"{}\" has no in port", id)))?;
                // One full copy per fan-out branch; a scatter would slice
                // the value instead of duplicating it.
                for to in &out_signals {
                    self.check_copy(to, &from)?;
                }
                Ok(out_signals
                    .into_iter()
                    .map(|to| Step::Copy {
                        to,
                        from: from.clone(),
                    })
                    .collect())
            }
            ProcessKind::Delay { .. } => Ok(Vec::new()),
        }
    }

    /// Verify call-style and operand compatibility, then build the call.
    fn build_call(
        &self,
        id: &Id,
        function: &CFunction,
        inputs: Vec<CVariable>,
        output: CVariable,
    ) -> Result<Step, Diagnostic> {
        let style = if function.num_params() == inputs.len() {
            CallStyle::Return
        } else if function.num_params() == inputs.len() + 1 {
            CallStyle::OutParam
        } else {
            return Err(Diagnostic::error(format!(
                "function \"{}\" takes {} parameters for {} in-ports; no call style fits",
                function.name,
                function.num_params(),
                inputs.len()
            ))
            .with_code(codes::E0500)
            .for_process(id)
            .in_pass("synthesize"));
        };

        match style {
            CallStyle::Return => {
                if output.data_type.is_array() {
                    return Err(Diagnostic::error(format!(
                        "function \"{}\" would return an array by value",
                        function.name
                    ))
                    .with_code(codes::E0500)
                    .for_process(id)
                    .with_hint("give the function a void return and a trailing output parameter")
                    .in_pass("synthesize"));
                }
                self.check_types(id, &output.data_type, &function.return_type)?;
            }
            CallStyle::OutParam => {
                if let Some(param) = function.params.last() {
                    self.check_types(id, &param.data_type, &output.data_type)?;
                }
            }
        }
        for (input, param) in inputs.iter().zip(function.params.iter()) {
            self.check_types(id, &param.data_type, &input.data_type)?;
        }

        Ok(Step::Call {
            function: function.name.clone(),
            style,
            inputs,
            output,
        })
    }

    fn check_types(&self, id: &Id, a: &CDataType, b: &CDataType) -> Result<(), Diagnostic> {
        if !a.same_base(b) {
            return Err(Diagnostic::error(format!(
                "mismatched data types (from {} to {})",
                b.base().as_c(),
                a.base().as_c()
            ))
            .with_code(codes::E0400)
            .for_process(id)
            .in_pass("synthesize"));
        }
        if a.is_array() != b.is_array() {
            return Err(Diagnostic::error("mismatched array-ness between variable and parameter")
                .with_code(codes::E0400)
                .for_process(id)
                .in_pass("synthesize"));
        }
        if let (Some(x), Some(y)) = (a.size(), b.size()) {
            if x != y {
                return Err(Diagnostic::error(format!(
                    "mismatched array sizes (from {} to {})",
                    y, x
                ))
                .with_code(codes::E0400)
                .for_process(id)
                .in_pass("synthesize"));
            }
        }
        Ok(())
    }

    fn check_copy(&self, to: &CVariable, from: &CVariable) -> Result<(), Diagnostic> {
        if !to.data_type.same_base(&from.data_type) {
            return Err(Diagnostic::error(format!(
                "cannot copy {} into {} ({} vs {})",
                from.name,
                to.name,
                from.data_type.base().as_c(),
                to.data_type.base().as_c()
            ))
            .with_code(codes::E0400)
            .in_pass("synthesize"));
        }
        if let (Some(x), Some(y)) = (to.data_type.size(), from.data_type.size()) {
            if x != y {
                return Err(Diagnostic::error(format!(
                    "cannot copy {} ({} elements) into {} ({} elements)",
                    from.name, y, to.name, x
                ))
                .with_code(codes::E0400)
                .in_pass("synthesize"));
            }
        }
        Ok(())
    }

    /// A merge/split is balanced when its branch element counts sum to the
    /// composite's size.
    fn check_gather(
        &self,
        id: &Id,
        composite: &CVariable,
        branches: &[CVariable],
    ) -> Result<(), Diagnostic> {
        let total: usize = branches.iter().map(elements_of).sum();
        if let Some(n) = composite.data_type.size() {
            if n != total {
                return Err(Diagnostic::error(format!(
                    "composite stream holds {} elements but its branches hold {}",
                    n, total
                ))
                .with_code(codes::E0400)
                .for_process(id)
                .in_pass("synthesize"));
            }
        }
        for branch in branches {
            if !branch.data_type.same_base(&composite.data_type) {
                return Err(Diagnostic::error(format!(
                    "branch {} disagrees with composite element type",
                    branch.name
                ))
                .with_code(codes::E0400)
                .for_process(id)
                .in_pass("synthesize"));
            }
        }
        Ok(())
    }
}

// ── Free helpers ────────────────────────────────────────────────────────────

/// The type a function produces: its return type when it has one input
/// parameter per in-port, the last parameter's type when it carries a
/// trailing output parameter, `None` otherwise.
fn output_slot_type(function: &CFunction, num_in_ports: usize) -> Option<CDataType> {
    if function.num_params() == num_in_ports {
        Some(function.return_type.clone())
    } else if function.num_params() == num_in_ports + 1 {
        function.params.last().map(|p| p.data_type.clone())
    } else {
        None
    }
}

fn direct_output_base(process: &Process) -> Option<crate::ctype::CBaseType> {
    let function = process.kind.functions().first().copied()?.clone();
    let num_in_ports = process.in_ports.len();
    output_slot_type(&function, num_in_ports).map(|t| t.base())
}

fn direct_input_base(process: &Process, port: &Id) -> Option<crate::ctype::CBaseType> {
    let function = process.kind.functions().first().copied()?.clone();
    let index = match process.kind {
        ProcessKind::ZipWithN { .. } => process.in_ports.iter().position(|p| &p.id == port)?,
        _ => 0,
    };
    function.params.get(index).map(|p| p.data_type.base())
}

/// The type a data-parallel stage shows the rest of the network: `count`
/// per-instance slots laid end to end. An unsized per-instance array stays
/// an unsized array.
fn widen_by_count(per_instance: &CDataType, count: usize) -> CDataType {
    let mut wide = per_instance.clone();
    match per_instance.size() {
        Some(size) => wide.set_array_size(size * count),
        None => wide.set_is_array(true),
    }
    wide
}

/// Divide an outside extent over the instances of a data-parallel stage.
fn split_evenly(
    id: &Id,
    function_name: &str,
    outside: usize,
    count: usize,
) -> Result<usize, Diagnostic> {
    if count == 0 || outside % count != 0 {
        return Err(Diagnostic::error(format!(
            "signal of {} elements does not divide over {} instances of function \"{}\"",
            outside, count, function_name
        ))
        .with_code(codes::E0401)
        .for_process(id)
        .in_pass("synthesize"));
    }
    Ok(outside / count)
}

/// Reconcile one function signature slot with the signal it carries: a slot
/// of unknown size takes the signal's size; known sizes must agree.
fn sync_param_size(
    id: &Id,
    function_name: &str,
    slot: &mut CDataType,
    signal: &CDataType,
) -> Result<(), Diagnostic> {
    match (slot.size(), signal.size()) {
        (Some(a), Some(b)) if a != b => Err(Diagnostic::error(format!(
            "function \"{}\" declares {} elements where its signal carries {}",
            function_name, a, b
        ))
        .with_code(codes::E0400)
        .for_process(id)
        .in_pass("synthesize")),
        (None, Some(b)) => {
            slot.set_array_size(b);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Digest over the rendered signature (name excluded) and body; functions
/// with equal digests are interchangeable.
fn function_digest(function: &CFunction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(function.return_type.return_type_string().as_bytes());
    for param in &function.params {
        hasher.update(param.param_decl().as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"|");
    hasher.update(function.body.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Compose multi-stage fused functions into one wrapper threading
/// `value1..valueN` locals from stage to stage.
fn build_coalesced_wrapper(id: &Id, stages: &[CFunction]) -> Result<CFunction, Diagnostic> {
    let first = stages.first().ok_or_else(|| {
        Diagnostic::error(format!("process \"{}\" has no stages to wrap", id))
            .with_code(codes::E0100)
            .in_pass("synthesize")
    })?;
    let last = stages.last().ok_or_else(|| {
        Diagnostic::error(format!("process \"{}\" has no stages to wrap", id))
            .with_code(codes::E0100)
            .in_pass("synthesize")
    })?;

    let mut params = Vec::new();
    let input_param = first.params.first().cloned().ok_or_else(|| {
        Diagnostic::error(format!(
            "stage function \"{}\" has no input parameter",
            first.name
        ))
        .with_code(codes::E0500)
        .for_process(id)
        .in_pass("synthesize")
    })?;
    params.push(input_param.clone());
    let out_param_style = last.num_params() == 2;
    if out_param_style {
        if let Some(out_param) = last.params.last() {
            params.push(out_param.clone());
        }
    }

    let mut body = String::from("{\n");
    let mut source = input_param;
    let mut destination = source.clone();
    for (index, stage) in stages.iter().enumerate() {
        let value_type = match output_slot_type(stage, 1) {
            Some(t) => t,
            None => {
                return Err(Diagnostic::error(format!(
                    "stage function \"{}\" has an unexpected number of parameters",
                    stage.name
                ))
                .with_code(codes::E0500)
                .for_process(id)
                .in_pass("synthesize"));
            }
        };
        destination = CVariable::new(format!("value{}", index + 1), value_type);
        let decl = destination.local_decl().ok_or_else(|| {
            Diagnostic::error(format!(
                "array size for intermediate value of stage \"{}\" is unknown",
                stage.name
            ))
            .with_code(codes::E0401)
            .for_process(id)
            .in_pass("synthesize")
        })?;
        body.push_str(&format!("{}{};\n", INDENT, decl));
        let style = if stage.num_params() == 1 {
            CallStyle::Return
        } else {
            CallStyle::OutParam
        };
        body.push_str(
            &Step::Call {
                function: stage.name.clone(),
                style,
                inputs: vec![source.clone()],
                output: destination.clone(),
            }
            .render(),
        );
        source = destination.clone();
    }
    if !out_param_style {
        body.push_str(&format!("{}return {};\n", INDENT, destination.name));
    }
    body.push('}');

    Ok(CFunction::new(
        format!("f{}_func_wrapper", id),
        last.return_type.clone(),
        params,
        body,
    ))
}

/// Wrap a per-instance function into a loop over `count` instances operating
/// on widened array parameters.
fn build_parallel_wrapper(
    id: &Id,
    inner: &CFunction,
    count: usize,
) -> Result<CFunction, Diagnostic> {
    let unsized_err = |name: &str| {
        Diagnostic::error(format!(
            "array size of parameter in function \"{}\" is unknown",
            name
        ))
        .with_code(codes::E0401)
        .for_process(id)
        .in_pass("synthesize")
    };

    let input = inner
        .params
        .first()
        .ok_or_else(|| unsized_err(&inner.name))?;
    let in_type = input.data_type.clone();
    let mut params = Vec::new();
    let mut body = String::from("{\n");
    body.push_str(&format!("{}int i;\n", INDENT));
    body.push_str(&format!(
        "{}for (i = 0; i < {}; ++i) {{\n",
        INDENT, count
    ));

    if inner.num_params() == 1 {
        let mut wide_in = in_type.clone();
        if in_type.is_array() {
            let per_instance = in_type.size().ok_or_else(|| unsized_err(&inner.name))?;
            wide_in.set_array_size(count * per_instance);
        } else {
            wide_in.set_is_const(true);
            wide_in.set_is_array(true);
            wide_in.set_array_size(count);
        }
        params.push(CVariable::new("input", wide_in));

        let mut wide_out = inner.return_type.clone();
        wide_out.set_is_array(true);
        wide_out.set_array_size(count);
        params.push(CVariable::new("output", wide_out));

        let argument = if in_type.is_array() {
            let per_instance = in_type.size().ok_or_else(|| unsized_err(&inner.name))?;
            format!("&input[i * {}]", per_instance)
        } else {
            "input[i]".to_string()
        };
        body.push_str(&format!(
            "{i}{i}output[i] = {f}({arg});\n",
            i = INDENT,
            f = inner.name,
            arg = argument
        ));
    } else if inner.num_params() == 2 {
        let per_in = in_type.size().ok_or_else(|| unsized_err(&inner.name))?;
        let mut wide_in = in_type.clone();
        wide_in.set_array_size(count * per_in);
        params.push(CVariable::new("input", wide_in));

        let out_type = inner
            .params
            .last()
            .map(|p| p.data_type.clone())
            .ok_or_else(|| unsized_err(&inner.name))?;
        let per_out = out_type.size().ok_or_else(|| unsized_err(&inner.name))?;
        let mut wide_out = out_type.clone();
        wide_out.set_array_size(count * per_out);
        params.push(CVariable::new("output", wide_out));

        let in_arg = if in_type.is_array() {
            format!("&input[i * {}]", per_in)
        } else {
            "input[i]".to_string()
        };
        body.push_str(&format!(
            "{i}{i}{f}({in_arg}, &output[i * {per_out}]);\n",
            i = INDENT,
            f = inner.name,
            in_arg = in_arg,
            per_out = per_out
        ));
    } else {
        return Err(Diagnostic::error(format!(
            "function \"{}\" has an unexpected number of parameters",
            inner.name
        ))
        .with_code(codes::E0500)
        .for_process(id)
        .in_pass("synthesize"));
    }

    body.push_str(&format!("{}}}\n", INDENT));
    body.push('}');

    Ok(CFunction::new(
        format!("f{}_parallel_wrapper", id),
        CDataType::scalar(crate::ctype::CBaseType::Void),
        params,
        body,
    ))
}

// ── Tests ──
