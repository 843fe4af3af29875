// model.rs — Process-network intermediate representation
//
// A directed graph of typed stream-processing nodes connected through ports.
// Processes live in an arena keyed by id; a connection is stored symmetrically
// on both ports as a `PortRef` into the arena, so there are no ownership
// cycles and navigation stays O(log n).
//
// Mutation goes through `Model` operations that keep both ends of every
// connection consistent. `validate` re-checks the full invariant set and is
// the safety net at the frontend boundary and in rewrite tests.
//
// Preconditions: callers pass ids of processes/ports they obtained from this
//               model; foreign refs are rejected, never dereferenced blindly.
// Postconditions: a mutation either succeeds and preserves all invariants or
//                 fails with `ModelError` leaving the model unchanged.
// Failure modes: `ModelError` for every rejected operation; `validate`
//               returns the complete violation list.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::ctype::CFunction;
use crate::id::{Id, PortRef};

// ── Process kinds ───────────────────────────────────────────────────────────

/// The closed set of process kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProcessKind {
    /// One input, one output, applies `function` element-wise.
    Map { function: CFunction },
    /// N inputs, one output, applies `function` to one element per input.
    ZipWithN { function: CFunction },
    /// `count` structurally identical map chains fused into a single node.
    /// `functions` holds one entry per chain stage.
    ParallelMap {
        count: usize,
        functions: Vec<CFunction>,
    },
    /// A fused chain of maps; `functions` kept in data order (first applied
    /// first).
    CoalescedMap { functions: Vec<CFunction> },
    /// Fans one input value out to each output untouched.
    Copy,
    /// Emits `initial_value` first, then forwards its input one step later.
    /// The only kind allowed to sit on a feedback cycle.
    Delay { initial_value: String },
    /// Merges N element streams into one composite (array) stream.
    Zipx,
    /// Splits one composite stream into N element streams.
    Unzipx,
}

impl ProcessKind {
    /// The kind keyword, as written in network descriptions and dumps.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessKind::Map { .. } => "map",
            ProcessKind::ZipWithN { .. } => "zipwith",
            ProcessKind::ParallelMap { .. } => "parallelmap",
            ProcessKind::CoalescedMap { .. } => "coalescedmap",
            ProcessKind::Copy => "copy",
            ProcessKind::Delay { .. } => "delay",
            ProcessKind::Zipx => "zipx",
            ProcessKind::Unzipx => "unzipx",
        }
    }

    /// All functions attached to this kind, in data order.
    pub fn functions(&self) -> Vec<&CFunction> {
        match self {
            ProcessKind::Map { function } | ProcessKind::ZipWithN { function } => vec![function],
            ProcessKind::ParallelMap { functions, .. }
            | ProcessKind::CoalescedMap { functions } => functions.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Mutable view of the attached functions.
    pub fn functions_mut(&mut self) -> Vec<&mut CFunction> {
        match self {
            ProcessKind::Map { function } | ProcessKind::ZipWithN { function } => vec![function],
            ProcessKind::ParallelMap { functions, .. }
            | ProcessKind::CoalescedMap { functions } => functions.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// True for kinds that change the element rate between their in and out
    /// sides (stream merging, splitting, and fused parallel sections).
    pub fn is_rate_changing(&self) -> bool {
        matches!(
            self,
            ProcessKind::ParallelMap { .. } | ProcessKind::Zipx | ProcessKind::Unzipx
        )
    }
}

// ── Ports ───────────────────────────────────────────────────────────────────

/// Direction of a port relative to its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortDirection {
    In,
    Out,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::In => f.write_str("in"),
            PortDirection::Out => f.write_str("out"),
        }
    }
}

/// A port of a process. The id is unique within the owning process and
/// direction; `connection` names the far end, or `None` at the network
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Port {
    pub id: Id,
    pub connection: Option<PortRef>,
}

impl Port {
    pub fn new(id: impl Into<Id>) -> Self {
        Port {
            id: id.into(),
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

// ── Process ─────────────────────────────────────────────────────────────────

/// A node of the network: a kind plus ordered in and out ports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Process {
    pub id: Id,
    pub kind: ProcessKind,
    pub in_ports: Vec<Port>,
    pub out_ports: Vec<Port>,
}

impl Process {
    /// A process with no ports yet.
    pub fn new(id: impl Into<Id>, kind: ProcessKind) -> Self {
        Process {
            id: id.into(),
            kind,
            in_ports: Vec::new(),
            out_ports: Vec::new(),
        }
    }

    /// Append an in-port. `false` if a port with this id already exists.
    pub fn add_in_port(&mut self, id: impl Into<Id>) -> bool {
        let id = id.into();
        if self.in_ports.iter().any(|p| p.id == id) {
            return false;
        }
        self.in_ports.push(Port::new(id));
        true
    }

    /// Append an out-port. `false` if a port with this id already exists.
    pub fn add_out_port(&mut self, id: impl Into<Id>) -> bool {
        let id = id.into();
        if self.out_ports.iter().any(|p| p.id == id) {
            return false;
        }
        self.out_ports.push(Port::new(id));
        true
    }

    pub fn in_port(&self, id: &Id) -> Option<&Port> {
        self.in_ports.iter().find(|p| &p.id == id)
    }

    pub fn out_port(&self, id: &Id) -> Option<&Port> {
        self.out_ports.iter().find(|p| &p.id == id)
    }

    pub fn in_port_mut(&mut self, id: &Id) -> Option<&mut Port> {
        self.in_ports.iter_mut().find(|p| &p.id == id)
    }

    pub fn out_port_mut(&mut self, id: &Id) -> Option<&mut Port> {
        self.out_ports.iter_mut().find(|p| &p.id == id)
    }

    /// A ref to one of this process's ports.
    pub fn port_ref(&self, port: &Id) -> PortRef {
        PortRef::new(self.id.clone(), port.clone())
    }

    pub fn is_delay(&self) -> bool {
        matches!(self.kind, ProcessKind::Delay { .. })
    }

    /// Structural equality for chain comparison: same kind with byte-equal
    /// functions and matching port arity. Connections and ids are ignored.
    pub fn structurally_equal(&self, other: &Process) -> bool {
        self.kind == other.kind
            && self.in_ports.len() == other.in_ports.len()
            && self.out_ports.len() == other.out_ports.len()
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// An invalid model operation or a detected invariant violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelError {
    pub message: String,
    /// The process the violation was observed at, when one exists.
    pub process: Option<Id>,
}

impl ModelError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        ModelError {
            message: message.into(),
            process: None,
        }
    }

    pub(crate) fn at(message: impl Into<String>, process: &Id) -> Self {
        ModelError {
            message: message.into(),
            process: Some(process.clone()),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ModelError {}

// ── Model ───────────────────────────────────────────────────────────────────

/// The complete network: the process arena plus the ordered boundary lists.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub name: String,
    processes: BTreeMap<Id, Process>,
    /// Network input ports (unconnected in-ports), in declaration order.
    pub inputs: Vec<PortRef>,
    /// Network output ports (unconnected out-ports), in declaration order.
    pub outputs: Vec<PortRef>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            processes: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Arena access ────────────────────────────────────────────────────

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.processes.contains_key(id)
    }

    pub fn process(&self, id: &Id) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn process_mut(&mut self, id: &Id) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    /// All processes in id order.
    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// All process ids in id order.
    pub fn process_ids(&self) -> Vec<Id> {
        self.processes.keys().cloned().collect()
    }

    /// Insert a process. Duplicate ids are rejected.
    pub fn add_process(&mut self, process: Process) -> Result<(), ModelError> {
        if self.processes.contains_key(&process.id) {
            return Err(ModelError::at(
                format!("process \"{}\" already exists", process.id),
                &process.id,
            ));
        }
        self.processes.insert(process.id.clone(), process);
        Ok(())
    }

    /// Remove a process: every connection to it is torn down symmetrically
    /// and boundary refs to it are dropped. Returns the removed process.
    pub fn remove_process(&mut self, id: &Id) -> Result<Process, ModelError> {
        if !self.processes.contains_key(id) {
            return Err(ModelError::at(format!("no process \"{}\"", id), id));
        }
        let port_refs: Vec<PortRef> = {
            let p = &self.processes[id];
            p.in_ports
                .iter()
                .chain(p.out_ports.iter())
                .map(|port| p.port_ref(&port.id))
                .collect()
        };
        for r in &port_refs {
            self.disconnect(r)?;
        }
        self.inputs.retain(|r| &r.process != id);
        self.outputs.retain(|r| &r.process != id);
        // Cannot fail: presence was checked above and disconnect does not
        // remove processes.
        self.processes
            .remove(id)
            .ok_or_else(|| ModelError::at(format!("no process \"{}\"", id), id))
    }

    /// A fresh process id starting with `prefix` that is not yet taken.
    pub fn unique_id(&self, prefix: &str) -> Id {
        let mut n = 0usize;
        loop {
            let candidate = Id::new(format!("{}{}", prefix, n));
            if !self.processes.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    // ── Port lookup ─────────────────────────────────────────────────────

    /// Resolve a port ref to the port and its direction.
    pub fn port(&self, r: &PortRef) -> Option<(PortDirection, &Port)> {
        let process = self.processes.get(&r.process)?;
        if let Some(p) = process.in_port(&r.port) {
            return Some((PortDirection::In, p));
        }
        process
            .out_port(&r.port)
            .map(|p| (PortDirection::Out, p))
    }

    /// The far end of a connected port, if any.
    pub fn connected_to(&self, r: &PortRef) -> Option<PortRef> {
        self.port(r).and_then(|(_, p)| p.connection.clone())
    }

    fn port_mut(&mut self, r: &PortRef) -> Option<(PortDirection, &mut Port)> {
        let process = self.processes.get_mut(&r.process)?;
        if process.in_ports.iter().any(|p| p.id == r.port) {
            return process
                .in_port_mut(&r.port)
                .map(|p| (PortDirection::In, p));
        }
        process
            .out_port_mut(&r.port)
            .map(|p| (PortDirection::Out, p))
    }

    fn require_port(&self, r: &PortRef) -> Result<(PortDirection, &Port), ModelError> {
        if !self.processes.contains_key(&r.process) {
            return Err(ModelError::at(
                format!("no process \"{}\"", r.process),
                &r.process,
            ));
        }
        self.port(r)
            .ok_or_else(|| ModelError::at(format!("no port \"{}\"", r), &r.process))
    }

    // ── Connections ─────────────────────────────────────────────────────

    /// Connect two ports, recording the link on both ends. One port must be
    /// an out-port and the other an in-port of a different process, and
    /// neither may already be connected.
    pub fn connect(&mut self, a: &PortRef, b: &PortRef) -> Result<(), ModelError> {
        if a == b {
            return Err(ModelError::at(
                format!("cannot connect port \"{}\" to itself", a),
                &a.process,
            ));
        }
        let (dir_a, port_a) = self.require_port(a)?;
        let (dir_b, port_b) = self.require_port(b)?;
        if a.process == b.process {
            return Err(ModelError::at(
                format!(
                    "cannot connect \"{}\" and \"{}\": both belong to the same process",
                    a, b
                ),
                &a.process,
            ));
        }
        if dir_a == dir_b {
            return Err(ModelError::at(
                format!(
                    "cannot connect \"{}\" and \"{}\": both are {}-ports",
                    a, b, dir_a
                ),
                &a.process,
            ));
        }
        if let Some(existing) = &port_a.connection {
            return Err(ModelError::at(
                format!("port \"{}\" is already connected to \"{}\"", a, existing),
                &a.process,
            ));
        }
        if let Some(existing) = &port_b.connection {
            return Err(ModelError::at(
                format!("port \"{}\" is already connected to \"{}\"", b, existing),
                &b.process,
            ));
        }
        // Both ends validated; the two writes cannot fail.
        if let Some((_, p)) = self.port_mut(a) {
            p.connection = Some(b.clone());
        }
        if let Some((_, p)) = self.port_mut(b) {
            p.connection = Some(a.clone());
        }
        Ok(())
    }

    /// Clear a connection on both ends. A no-op for an unconnected port.
    pub fn disconnect(&mut self, r: &PortRef) -> Result<(), ModelError> {
        self.require_port(r)?;
        let far = match self.port(r).and_then(|(_, p)| p.connection.clone()) {
            Some(far) => far,
            None => return Ok(()),
        };
        if let Some((_, p)) = self.port_mut(r) {
            p.connection = None;
        }
        if let Some((_, p)) = self.port_mut(&far) {
            p.connection = None;
        }
        Ok(())
    }

    /// Move an in-port (with its connection) from one process to another.
    /// The far end's back-reference and any network input entry are updated
    /// to the new location.
    pub fn move_in_port(&mut self, from: &PortRef, to: &Id) -> Result<(), ModelError> {
        self.move_port(from, to, PortDirection::In)
    }

    /// Move an out-port (with its connection) from one process to another,
    /// updating the far end and any network output entry.
    pub fn move_out_port(&mut self, from: &PortRef, to: &Id) -> Result<(), ModelError> {
        self.move_port(from, to, PortDirection::Out)
    }

    fn move_port(
        &mut self,
        from: &PortRef,
        to: &Id,
        dir: PortDirection,
    ) -> Result<(), ModelError> {
        let (found_dir, _) = self.require_port(from)?;
        if found_dir != dir {
            return Err(ModelError::at(
                format!("port \"{}\" is not an {}-port", from, dir),
                &from.process,
            ));
        }
        if !self.processes.contains_key(to) {
            return Err(ModelError::at(format!("no process \"{}\"", to), to));
        }
        {
            let target = &self.processes[to];
            let taken = match dir {
                PortDirection::In => target.in_port(&from.port).is_some(),
                PortDirection::Out => target.out_port(&from.port).is_some(),
            };
            if taken {
                return Err(ModelError::at(
                    format!(
                        "process \"{}\" already has an {}-port \"{}\"",
                        to, dir, from.port
                    ),
                    to,
                ));
            }
        }

        // Detach from the old process.
        let port = {
            let source = self
                .processes
                .get_mut(&from.process)
                .ok_or_else(|| ModelError::at(format!("no process \"{}\"", from.process), to))?;
            let ports = match dir {
                PortDirection::In => &mut source.in_ports,
                PortDirection::Out => &mut source.out_ports,
            };
            let idx = ports
                .iter()
                .position(|p| p.id == from.port)
                .ok_or_else(|| ModelError::at(format!("no port \"{}\"", from), &from.process))?;
            ports.remove(idx)
        };
        let far = port.connection.clone();

        // Attach to the new process.
        let new_ref = PortRef::new(to.clone(), from.port.clone());
        {
            let target = self
                .processes
                .get_mut(to)
                .ok_or_else(|| ModelError::at(format!("no process \"{}\"", to), to))?;
            match dir {
                PortDirection::In => target.in_ports.push(port),
                PortDirection::Out => target.out_ports.push(port),
            }
        }

        // Re-aim the far end and the boundary lists.
        if let Some(far) = far {
            if let Some((_, p)) = self.port_mut(&far) {
                p.connection = Some(new_ref.clone());
            }
        }
        let boundary = match dir {
            PortDirection::In => &mut self.inputs,
            PortDirection::Out => &mut self.outputs,
        };
        for r in boundary.iter_mut() {
            if r == from {
                *r = new_ref.clone();
            }
        }
        Ok(())
    }

    // ── Structural queries ──────────────────────────────────────────────

    /// Processes feeding this one, deduplicated, in in-port order.
    pub fn predecessors(&self, id: &Id) -> Vec<Id> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        if let Some(p) = self.processes.get(id) {
            for port in &p.in_ports {
                if let Some(far) = &port.connection {
                    if seen.insert(far.process.clone()) {
                        out.push(far.process.clone());
                    }
                }
            }
        }
        out
    }

    /// Processes fed by this one, deduplicated, in out-port order.
    pub fn successors(&self, id: &Id) -> Vec<Id> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        if let Some(p) = self.processes.get(id) {
            for port in &p.out_ports {
                if let Some(far) = &port.connection {
                    if seen.insert(far.process.clone()) {
                        out.push(far.process.clone());
                    }
                }
            }
        }
        out
    }

    /// A cycle that does not pass through any delay process, if one exists.
    /// Cycles broken by a delay are legal feedback loops.
    pub fn illegal_cycle(&self) -> Option<Vec<Id>> {
        // 0 = unvisited, 1 = on the current path, 2 = done
        fn dfs(
            model: &Model,
            id: &Id,
            state: &mut BTreeMap<Id, u8>,
            path: &mut Vec<Id>,
        ) -> Option<Vec<Id>> {
            state.insert(id.clone(), 1);
            path.push(id.clone());
            for next in model.successors(id) {
                if model.process(&next).map(|p| p.is_delay()).unwrap_or(false) {
                    continue;
                }
                match state.get(&next).copied().unwrap_or(0) {
                    0 => {
                        if let Some(cycle) = dfs(model, &next, state, path) {
                            return Some(cycle);
                        }
                    }
                    1 => {
                        if let Some(pos) = path.iter().position(|p| p == &next) {
                            return Some(path[pos..].to_vec());
                        }
                    }
                    _ => {}
                }
            }
            path.pop();
            state.insert(id.clone(), 2);
            None
        }

        let mut state: BTreeMap<Id, u8> = BTreeMap::new();
        let mut path: Vec<Id> = Vec::new();
        for id in self.processes.keys() {
            if self.processes[id].is_delay() {
                continue;
            }
            if state.get(id).copied().unwrap_or(0) == 0 {
                if let Some(cycle) = dfs(self, id, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    // ── Validation ──────────────────────────────────────────────────────

    /// Check the full invariant set. An empty result means the model is
    /// consistent.
    pub fn validate(&self) -> Vec<ModelError> {
        let mut errors = Vec::new();

        for process in self.processes.values() {
            self.check_arity(process, &mut errors);
            for (dir, port) in process
                .in_ports
                .iter()
                .map(|p| (PortDirection::In, p))
                .chain(process.out_ports.iter().map(|p| (PortDirection::Out, p)))
            {
                let here = process.port_ref(&port.id);
                match &port.connection {
                    None => {
                        let boundary = match dir {
                            PortDirection::In => &self.inputs,
                            PortDirection::Out => &self.outputs,
                        };
                        if !boundary.contains(&here) {
                            errors.push(ModelError::at(
                                format!(
                                    "port \"{}\" is unconnected and not a network {}",
                                    here,
                                    match dir {
                                        PortDirection::In => "input",
                                        PortDirection::Out => "output",
                                    }
                                ),
                                &process.id,
                            ));
                        }
                    }
                    Some(far) => {
                        if far.process == process.id {
                            errors.push(ModelError::at(
                                format!("port \"{}\" is connected within its own process", here),
                                &process.id,
                            ));
                            continue;
                        }
                        match self.port(far) {
                            None => errors.push(ModelError::at(
                                format!(
                                    "port \"{}\" is connected to nonexistent port \"{}\"",
                                    here, far
                                ),
                                &process.id,
                            )),
                            Some((far_dir, far_port)) => {
                                if far_dir == dir {
                                    errors.push(ModelError::at(
                                        format!(
                                            "ports \"{}\" and \"{}\" are both {}-ports",
                                            here, far, dir
                                        ),
                                        &process.id,
                                    ));
                                }
                                if far_port.connection.as_ref() != Some(&here) {
                                    errors.push(ModelError::at(
                                        format!(
                                            "port \"{}\" claims \"{}\" but the far end \
                                             does not point back",
                                            here, far
                                        ),
                                        &process.id,
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }

        for (list, dir, label) in [
            (&self.inputs, PortDirection::In, "input"),
            (&self.outputs, PortDirection::Out, "output"),
        ] {
            let mut seen = BTreeSet::new();
            for r in list {
                if !seen.insert(r.clone()) {
                    errors.push(ModelError::new(format!(
                        "network {} \"{}\" is listed twice",
                        label, r
                    )));
                    continue;
                }
                match self.port(r) {
                    None => errors.push(ModelError::new(format!(
                        "network {} \"{}\" does not exist",
                        label, r
                    ))),
                    Some((found_dir, port)) => {
                        if found_dir != dir {
                            errors.push(ModelError::new(format!(
                                "network {} \"{}\" is not an {}-port",
                                label, r, dir
                            )));
                        }
                        // An input must have the environment as its only
                        // writer. An output may alias a connected out-port:
                        // the environment taps the signal.
                        if dir == PortDirection::In && port.is_connected() {
                            errors.push(ModelError::new(format!(
                                "network {} \"{}\" is connected inside the network",
                                label, r
                            )));
                        }
                    }
                }
            }
        }

        if let Some(cycle) = self.illegal_cycle() {
            let names: Vec<String> = cycle.iter().map(|id| format!("\"{}\"", id)).collect();
            errors.push(ModelError::at(
                format!("cycle without a delay process: {}", names.join(" -> ")),
                &cycle[0],
            ));
        }

        errors
    }

    fn check_arity(&self, process: &Process, errors: &mut Vec<ModelError>) {
        let ins = process.in_ports.len();
        let outs = process.out_ports.len();
        let expected: Option<(&str, bool)> = match &process.kind {
            ProcessKind::Map { .. } => Some(("exactly 1 in and 1 out", ins == 1 && outs == 1)),
            ProcessKind::ZipWithN { .. } => {
                Some(("at least 1 in and exactly 1 out", ins >= 1 && outs == 1))
            }
            // Two legal shapes: one composite in/out port pair (fused
            // section form), or one in/out port pair per instance (sibling
            // fusion form).
            ProcessKind::ParallelMap { count, functions } => Some((
                "1 in and 1 out, or count ins and count outs, positive count, \
                 at least one function",
                (ins == 1 && outs == 1 || ins == *count && outs == *count)
                    && *count >= 1
                    && !functions.is_empty(),
            )),
            ProcessKind::CoalescedMap { functions } => Some((
                "exactly 1 in and 1 out with at least one function",
                ins == 1 && outs == 1 && !functions.is_empty(),
            )),
            ProcessKind::Copy => Some(("exactly 1 in and at least 1 out", ins == 1 && outs >= 1)),
            ProcessKind::Delay { .. } => Some(("exactly 1 in and 1 out", ins == 1 && outs == 1)),
            ProcessKind::Zipx => Some(("at least 1 in and exactly 1 out", ins >= 1 && outs == 1)),
            ProcessKind::Unzipx => {
                Some(("exactly 1 in and at least 1 out", ins == 1 && outs >= 1))
            }
        };
        if let Some((requirement, ok)) = expected {
            if !ok {
                errors.push(ModelError::at(
                    format!(
                        "{} process \"{}\" has {} in-port(s) and {} out-port(s), expected {}",
                        process.kind.name(),
                        process.id,
                        ins,
                        outs,
                        requirement
                    ),
                    &process.id,
                ));
            }
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "network \"{}\" ({} processes)",
            self.name,
            self.processes.len()
        )?;
        for process in self.processes.values() {
            writeln!(
                f,
                "  {} \"{}\": {} in, {} out",
                process.kind.name(),
                process.id,
                process.in_ports.len(),
                process.out_ports.len()
            )?;
            for port in &process.in_ports {
                match &port.connection {
                    Some(far) => writeln!(f, "    in  {} <- {}", port.id, far)?,
                    None => writeln!(f, "    in  {} (boundary)", port.id)?,
                }
            }
            for port in &process.out_ports {
                match &port.connection {
                    Some(far) => writeln!(f, "    out {} -> {}", port.id, far)?,
                    None => writeln!(f, "    out {} (boundary)", port.id)?,
                }
            }
        }
        if !self.inputs.is_empty() {
            let list: Vec<String> = self.inputs.iter().map(|r| r.to_string()).collect();
            writeln!(f, "  inputs: {}", list.join(", "))?;
        }
        if !self.outputs.is_empty() {
            let list: Vec<String> = self.outputs.iter().map(|r| r.to_string()).collect();
            writeln!(f, "  outputs: {}", list.join(", "))?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
