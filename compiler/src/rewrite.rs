// rewrite.rs — Fixpoint battery of structural rewrites over the process network
//
// Applies a fixed, ordered battery of semantics-preserving passes until a full
// round changes nothing. Identity processes are spliced out, degenerate
// zipwiths are normalized to maps, map chains fuse into coalesced maps, and
// structurally identical sibling chains fuse into parallel maps. A dataflow
// convergence check runs inside every round and rejects networks whose fan-out
// does not reconverge consistently.
//
// Preconditions: the input model passed `Model::validate`.
// Postconditions: on success the returned model satisfies every structural
//   invariant again, certified by `RewriteCert` (V1-V2).
// Failure modes: inconsistent dataflow (E0200) and invalid model operations
//   inside a pass (E0100) abort the battery; post-battery invariant breakage
//   is reported as E0600.
// Side effects: none. The input model is consumed and returned rewritten.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::ctype::{CDataType, CFunction};
use crate::diag::{codes, Diagnostic};
use crate::id::{Id, PortRef};
use crate::model::{Model, ModelError, Process, ProcessKind};

// ── Pass names ──────────────────────────────────────────────────────────────

const PASS_REMOVE_REDUNDANT: &str = "remove_redundant_processes";
const PASS_CONVERT_ZIPWITH1: &str = "convert_zipwith1_to_map";
const PASS_CHECK_CONVERGENCE: &str = "check_dataflow_convergence";
const PASS_COALESCE_CHAINS: &str = "coalesce_process_chains";
const PASS_SPLIT_SEGMENTS: &str = "split_data_parallel_segments";
const PASS_FUSE_SECTIONS: &str = "fuse_unzip_map_zip";
const PASS_FUSE_SIBLINGS: &str = "fuse_sibling_maps";
const PASS_COALESCE_PARALLELMAP: &str = "coalesce_parallelmap_chains";

// ── Contained sections ──────────────────────────────────────────────────────

/// A bounded subgraph between one divergence origin and one convergence
/// point: all flow leaving `start` reaches `end`, and all flow entering
/// `end` left from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedSection {
    pub start: Id,
    pub end: Id,
}

impl fmt::Display for ContainedSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.start, self.end)
    }
}

// ── Result and certificate ──────────────────────────────────────────────────

/// Machine-checkable evidence for the rewrite postconditions (V1-V2).
#[derive(Debug, Clone)]
pub struct RewriteCert {
    /// V1: The rewritten model still satisfies every structural invariant.
    pub v1_invariants_preserved: bool,
    /// V2: The battery reached a fixpoint within its round budget.
    pub v2_fixpoint_reached: bool,
}

impl crate::pass::StageCert for RewriteCert {
    fn all_pass(&self) -> bool {
        self.v1_invariants_preserved && self.v2_fixpoint_reached
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_invariants_preserved", self.v1_invariants_preserved),
            ("V2_fixpoint_reached", self.v2_fixpoint_reached),
        ]
    }
}

/// Outcome of the rewrite stage: the rewritten model plus verification
/// evidence and any diagnostics. Errors in `diagnostics` mean the model
/// must not be handed to the scheduler.
#[derive(Debug)]
pub struct RewriteResult {
    pub model: Model,
    pub cert: RewriteCert,
    pub diagnostics: Vec<Diagnostic>,
}

type PassFn = fn(&mut Model) -> Result<bool, ModelError>;

/// Knobs for the rewrite battery.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Run the fusion half of the battery (chain coalescing, sibling and
    /// section fusion). When off, only normalization and the convergence
    /// check run.
    pub coalesce: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions { coalesce: true }
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Run the full pass battery to fixpoint.
pub fn rewrite_to_fixpoint(model: Model) -> RewriteResult {
    rewrite_with_options(model, &RewriteOptions::default())
}

/// Run the pass battery to fixpoint.
///
/// Each round applies every pass once, in a fixed order; the loop stops when
/// a full round reports no change. Every pass strictly reduces the process
/// count or a chain length, so the number of changing rounds is bounded by
/// the initial process count; that bound is enforced as a backstop.
pub fn rewrite_with_options(model: Model, options: &RewriteOptions) -> RewriteResult {
    let round_budget = model.num_processes().max(1);
    let mut model = model;
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut fixpoint = false;
    let mut rounds = 0usize;

    'battery: loop {
        let mut changed = false;

        for (name, pass) in [
            (PASS_REMOVE_REDUNDANT, remove_redundant_processes as PassFn),
            (PASS_CONVERT_ZIPWITH1, convert_zipwith1_to_map as PassFn),
        ] {
            match apply_pass(&mut model, &mut diagnostics, name, pass) {
                Some(pass_changed) => changed |= pass_changed,
                None => break 'battery,
            }
        }

        let convergence = check_dataflow_convergence(&model);
        if !convergence.is_empty() {
            diagnostics.extend(convergence);
            break;
        }

        if !options.coalesce {
            if !changed {
                fixpoint = true;
                break;
            }
            rounds += 1;
            if rounds > round_budget {
                debug_assert!(false, "rewrite battery exceeded its round budget");
                break;
            }
            continue;
        }

        for (name, pass) in [
            (PASS_COALESCE_CHAINS, coalesce_process_chains as PassFn),
            (PASS_SPLIT_SEGMENTS, split_data_parallel_segments as PassFn),
            (PASS_FUSE_SECTIONS, fuse_unzip_map_zip as PassFn),
            (PASS_FUSE_SIBLINGS, fuse_sibling_maps as PassFn),
            (PASS_COALESCE_PARALLELMAP, coalesce_parallelmap_chains as PassFn),
        ] {
            match apply_pass(&mut model, &mut diagnostics, name, pass) {
                Some(pass_changed) => changed |= pass_changed,
                None => break 'battery,
            }
        }

        if !changed {
            fixpoint = true;
            break;
        }
        rounds += 1;
        if rounds > round_budget {
            debug_assert!(false, "rewrite battery exceeded its round budget");
            diagnostics.push(
                Diagnostic::error(format!(
                    "rewrite battery did not settle within {} rounds",
                    round_budget
                ))
                .with_code(codes::E0600),
            );
            break;
        }
    }

    let structural = model.validate();
    for err in &structural {
        let mut diag = Diagnostic::error(err.message.clone())
            .with_code(codes::E0600)
            .in_pass("verify_rewrite");
        if let Some(process) = &err.process {
            diag = diag.for_process(process);
        }
        diagnostics.push(diag);
    }

    let cert = RewriteCert {
        v1_invariants_preserved: structural.is_empty(),
        v2_fixpoint_reached: fixpoint,
    };
    RewriteResult {
        model,
        cert,
        diagnostics,
    }
}

/// Apply one structural pass. On failure the model is rolled back to its
/// pre-pass state and an E0100 diagnostic naming the pass is recorded;
/// `None` tells the driver to abort the battery.
fn apply_pass(
    model: &mut Model,
    diagnostics: &mut Vec<Diagnostic>,
    name: &'static str,
    pass: PassFn,
) -> Option<bool> {
    let snapshot = model.clone();
    match pass(model) {
        Ok(changed) => Some(changed),
        Err(err) => {
            *model = snapshot;
            let mut diag = Diagnostic::error(err.message.clone())
                .with_code(codes::E0100)
                .in_pass(name);
            if let Some(process) = &err.process {
                diag = diag.for_process(process);
            }
            diagnostics.push(diag);
            None
        }
    }
}

// ── Pass 1: identity removal ────────────────────────────────────────────────

/// Splice out every `Zipx`/`Unzipx` with exactly one in and one out port.
/// Such a process forwards its input untouched; its neighbors are connected
/// directly and boundary lists are updated when it sat on the network edge.
pub fn remove_redundant_processes(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    for id in model.process_ids() {
        let (in_ref, out_ref) = {
            let Some(process) = model.process(&id) else {
                continue;
            };
            if !matches!(process.kind, ProcessKind::Zipx | ProcessKind::Unzipx) {
                continue;
            }
            if process.in_ports.len() != 1 || process.out_ports.len() != 1 {
                continue;
            }
            (
                process.port_ref(&process.in_ports[0].id),
                process.port_ref(&process.out_ports[0].id),
            )
        };
        let upstream = model.connected_to(&in_ref);
        let downstream = model.connected_to(&out_ref);
        match (upstream, downstream) {
            (Some(up), Some(down)) => {
                // A tap on the identity's out-port follows the value to the
                // upstream producer.
                for r in model.outputs.iter_mut() {
                    if *r == out_ref {
                        *r = up.clone();
                    }
                }
                model.remove_process(&id)?;
                model.connect(&up, &down)?;
                changed = true;
            }
            (None, Some(down)) => {
                if tapped(model, &id) {
                    // The tap value would have no out-port left to live on.
                    continue;
                }
                // The identity sat on a network input: its consumer's port
                // takes over the boundary entry.
                model.disconnect(&out_ref)?;
                for r in model.inputs.iter_mut() {
                    if *r == in_ref {
                        *r = down.clone();
                    }
                }
                model.remove_process(&id)?;
                changed = true;
            }
            (Some(up), None) => {
                model.disconnect(&in_ref)?;
                for r in model.outputs.iter_mut() {
                    if *r == out_ref {
                        *r = up.clone();
                    }
                }
                model.remove_process(&id)?;
                changed = true;
            }
            // Connected to nothing on either side: nothing to splice onto.
            (None, None) => {}
        }
    }
    Ok(changed)
}

// ── Pass 2: arity normalization ─────────────────────────────────────────────

/// Replace every one-input `ZipWithN` with a `Map` carrying the identical
/// function. The replacement gets a fresh `_map_` id; data flow is redirected
/// and the old process destroyed.
pub fn convert_zipwith1_to_map(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    for id in model.process_ids() {
        let function = {
            let Some(process) = model.process(&id) else {
                continue;
            };
            match &process.kind {
                ProcessKind::ZipWithN { function } if process.in_ports.len() == 1 => {
                    function.clone()
                }
                _ => continue,
            }
        };
        let new_id = model.unique_id("_map_");
        model.add_process(Process::new(new_id.clone(), ProcessKind::Map { function }))?;
        redirect_data_flow(model, &id, &id, &new_id, &new_id)?;
        model.remove_process(&id)?;
        changed = true;
    }
    Ok(changed)
}

// ── Pass 3: dataflow convergence check ──────────────────────────────────────

/// Verify that every divergence origin (`Copy`/`Unzipx` with two or more out
/// ports) whose flow reconverges does so consistently: all forward flow from
/// the origin reaches the merge, all backward flow into the merge left from
/// the origin, and every origin-to-merge path crosses the same number of
/// rate-changing steps. Returns one E0200 diagnostic per violation; an empty
/// result means the model is convergence-clean.
pub fn check_dataflow_convergence(model: &Model) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for id in model.process_ids() {
        let Some(process) = model.process(&id) else {
            continue;
        };
        if !matches!(process.kind, ProcessKind::Copy | ProcessKind::Unzipx) {
            continue;
        }
        if process.out_ports.len() < 2 {
            continue;
        }
        let Some(merge) = find_merge_point(model, &id) else {
            // Fan-out that never reconverges constrains nothing.
            continue;
        };
        if !all_forward_paths_reach(model, &id, &merge) {
            diagnostics.push(
                Diagnostic::error(format!(
                    "dataflow diverging at \"{}\" does not fully reconverge at \"{}\"",
                    id, merge
                ))
                .with_code(codes::E0200)
                .for_process(&id)
                .in_pass(PASS_CHECK_CONVERGENCE),
            );
            continue;
        }
        if !all_backward_paths_reach(model, &merge, &id) {
            diagnostics.push(
                Diagnostic::error(format!(
                    "dataflow converging at \"{}\" does not all originate at \"{}\"",
                    merge, id
                ))
                .with_code(codes::E0200)
                .for_process(&id)
                .in_pass(PASS_CHECK_CONVERGENCE),
            );
            continue;
        }
        let counts = rate_step_counts(model, &id, &merge);
        if counts.len() > 1 {
            let listed: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
            diagnostics.push(
                Diagnostic::error(format!(
                    "paths from \"{}\" to \"{}\" cross unequal numbers of rate-changing \
                     steps ({})",
                    id,
                    merge,
                    listed.join(" vs ")
                ))
                .with_code(codes::E0200)
                .for_process(&id)
                .in_pass(PASS_CHECK_CONVERGENCE),
            );
        }
    }
    diagnostics
}

/// The nearest process reached by two or more distinct out-port branches of
/// `origin`, by breadth-first depth; ties break toward the smaller id.
fn find_merge_point(model: &Model, origin: &Id) -> Option<Id> {
    let origin_process = model.process(origin)?;
    let mut queue: VecDeque<(Id, usize, usize)> = VecDeque::new();
    for (branch, port) in origin_process.out_ports.iter().enumerate() {
        if let Some(far) = &port.connection {
            queue.push_back((far.process.clone(), branch, 1));
        }
    }

    let mut reached: BTreeMap<Id, BTreeSet<usize>> = BTreeMap::new();
    let mut best: Option<(usize, Id)> = None;
    while let Some((id, branch, depth)) = queue.pop_front() {
        if let Some((best_depth, _)) = &best {
            if depth > *best_depth {
                continue;
            }
        }
        let branches = reached.entry(id.clone()).or_default();
        if !branches.insert(branch) {
            continue;
        }
        if branches.len() >= 2 {
            match &best {
                None => best = Some((depth, id.clone())),
                Some((best_depth, best_id)) => {
                    if depth < *best_depth || (depth == *best_depth && id < *best_id) {
                        best = Some((depth, id.clone()));
                    }
                }
            }
            continue;
        }
        if &id == origin {
            // A feedback edge led back into the origin; not a merge.
            continue;
        }
        let Some(process) = model.process(&id) else {
            continue;
        };
        for port in &process.out_ports {
            if let Some(far) = &port.connection {
                queue.push_back((far.process.clone(), branch, depth + 1));
            }
        }
    }
    best.map(|(_, id)| id)
}

/// True if every forward path out of `from` reaches `target` before hitting
/// an unconnected out-port.
fn all_forward_paths_reach(model: &Model, from: &Id, target: &Id) -> bool {
    fn walk(
        model: &Model,
        current: &Id,
        target: &Id,
        state: &mut BTreeMap<Id, Option<bool>>,
    ) -> bool {
        match state.get(current) {
            Some(Some(settled)) => return *settled,
            // Revisit along the active path: a delay-mediated loop, which
            // cannot leave the region without passing the checks again.
            Some(None) => return true,
            None => {}
        }
        state.insert(current.clone(), None);
        let mut ok = true;
        if let Some(process) = model.process(current) {
            for port in &process.out_ports {
                match &port.connection {
                    None => ok = false,
                    Some(far) if &far.process == target => {}
                    Some(far) => {
                        if !walk(model, &far.process, target, state) {
                            ok = false;
                        }
                    }
                }
                if !ok {
                    break;
                }
            }
        }
        state.insert(current.clone(), Some(ok));
        ok
    }
    walk(model, from, target, &mut BTreeMap::new())
}

/// True if every backward path out of `from` reaches `target` before hitting
/// an unconnected in-port.
fn all_backward_paths_reach(model: &Model, from: &Id, target: &Id) -> bool {
    fn walk(
        model: &Model,
        current: &Id,
        target: &Id,
        state: &mut BTreeMap<Id, Option<bool>>,
    ) -> bool {
        match state.get(current) {
            Some(Some(settled)) => return *settled,
            Some(None) => return true,
            None => {}
        }
        state.insert(current.clone(), None);
        let mut ok = true;
        if let Some(process) = model.process(current) {
            for port in &process.in_ports {
                match &port.connection {
                    None => ok = false,
                    Some(far) if &far.process == target => {}
                    Some(far) => {
                        if !walk(model, &far.process, target, state) {
                            ok = false;
                        }
                    }
                }
                if !ok {
                    break;
                }
            }
        }
        state.insert(current.clone(), Some(ok));
        ok
    }
    walk(model, from, target, &mut BTreeMap::new())
}

/// The set of rate-changing step counts over all paths from `origin` to
/// `merge`, counting interior processes only. More than one distinct count
/// means the paths are unbalanced.
fn rate_step_counts(model: &Model, origin: &Id, merge: &Id) -> BTreeSet<usize> {
    fn walk(
        model: &Model,
        current: &Id,
        merge: &Id,
        memo: &mut BTreeMap<Id, Option<BTreeSet<usize>>>,
    ) -> BTreeSet<usize> {
        if let Some(entry) = memo.get(current) {
            // In-progress entries are loops; they contribute no finished path.
            return entry.clone().unwrap_or_default();
        }
        memo.insert(current.clone(), None);
        let mut counts = BTreeSet::new();
        if let Some(process) = model.process(current) {
            for port in &process.out_ports {
                let Some(far) = &port.connection else {
                    continue;
                };
                if &far.process == merge {
                    counts.insert(0);
                    continue;
                }
                let step = model
                    .process(&far.process)
                    .map(|p| usize::from(p.kind.is_rate_changing()))
                    .unwrap_or(0);
                for count in walk(model, &far.process, merge, memo) {
                    counts.insert(count + step);
                }
            }
        }
        memo.insert(current.clone(), Some(counts.clone()));
        counts
    }
    walk(model, origin, merge, &mut BTreeMap::new())
}

// ── Pass 4: map chain coalescing ────────────────────────────────────────────

/// Fuse every maximal linear chain of map-like processes (each link's sole
/// consumer is the next member) of length two or more into one
/// `CoalescedMap` whose function list preserves data order. The intermediate
/// signals disappear with the chain.
pub fn coalesce_process_chains(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    for id in model.process_ids() {
        if !model.contains(&id) {
            // Consumed by a fusion earlier in this sweep.
            continue;
        }
        if !is_map_like(model, &id) {
            continue;
        }
        let upstream_is_map = model
            .process(&id)
            .and_then(|p| p.in_ports.first())
            .and_then(|port| port.connection.as_ref())
            .map(|far| is_map_like(model, &far.process) && !tapped(model, &far.process))
            .unwrap_or(false);
        if upstream_is_map {
            // Not a chain head; handled when the sweep reaches the head.
            continue;
        }
        let chain = map_chain_from(model, &id);
        if chain.len() < 2 {
            continue;
        }
        let functions = chain_functions(model, &chain);
        let first = chain[0].clone();
        let last = chain[chain.len() - 1].clone();
        let new_id = model.unique_id("_coalescedmap_");
        model.add_process(Process::new(
            new_id.clone(),
            ProcessKind::CoalescedMap { functions },
        ))?;
        redirect_data_flow(model, &first, &last, &new_id, &new_id)?;
        destroy_chain(model, &first)?;
        changed = true;
    }
    Ok(changed)
}

fn is_map_like(model: &Model, id: &Id) -> bool {
    model
        .process(id)
        .map(|p| {
            matches!(
                p.kind,
                ProcessKind::Map { .. } | ProcessKind::CoalescedMap { .. }
            )
        })
        .unwrap_or(false)
}

/// A process whose out-port doubles as a network output. Such a process may
/// end a fused chain (its port moves with the redirect) but must never
/// disappear into a chain interior.
fn tapped(model: &Model, id: &Id) -> bool {
    model.outputs.iter().any(|r| &r.process == id)
}

/// The maximal map-like run starting at `head`, following single out-ports.
/// A tapped member ends the run.
fn map_chain_from(model: &Model, head: &Id) -> Vec<Id> {
    let mut chain = vec![head.clone()];
    loop {
        if chain.last().map(|id| tapped(model, id)).unwrap_or(false) {
            break;
        }
        let next = chain
            .last()
            .and_then(|id| model.process(id))
            .and_then(|p| p.out_ports.first())
            .and_then(|port| port.connection.as_ref())
            .map(|far| far.process.clone());
        match next {
            Some(n) if is_map_like(model, &n) && !chain.contains(&n) => chain.push(n),
            _ => break,
        }
    }
    chain
}

fn chain_functions(model: &Model, chain: &[Id]) -> Vec<CFunction> {
    let mut functions = Vec::new();
    for id in chain {
        if let Some(process) = model.process(id) {
            functions.extend(process.kind.functions().into_iter().cloned());
        }
    }
    functions
}

// ── Pass 5: segment splitting ───────────────────────────────────────────────

/// Insert a `Zipx`-`Unzipx` pair between consecutive stages of every
/// data-parallel section whose branch chains have more than one stage, so
/// each stage becomes its own one-stage section.
pub fn split_data_parallel_segments(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    let sections: Vec<ContainedSection> = find_contained_sections(model)
        .into_iter()
        .filter(|s| is_data_parallel(model, s))
        .collect();
    for section in sections {
        let chains: Vec<Vec<Id>> = {
            let Some(start) = model.process(&section.start) else {
                continue;
            };
            start
                .out_ports
                .iter()
                .map(|port| process_chain(model, &start.port_ref(&port.id), &section.end))
                .collect()
        };
        if chains.is_empty() || chains.iter().any(|c| c.len() <= 1) {
            continue;
        }
        let stages = chains[0].len();
        for segment in 1..stages {
            let zipx_id = model.unique_id("_zipx_");
            let mut zipx = Process::new(zipx_id.clone(), ProcessKind::Zipx);
            zipx.add_out_port("out");
            for n in 1..=chains.len() {
                zipx.add_in_port(format!("in{}", n));
            }
            model.add_process(zipx)?;

            let unzipx_id = model.unique_id("_unzipx_");
            let mut unzipx = Process::new(unzipx_id.clone(), ProcessKind::Unzipx);
            unzipx.add_in_port("in");
            for n in 1..=chains.len() {
                unzipx.add_out_port(format!("out{}", n));
            }
            model.add_process(unzipx)?;

            model.connect(
                &PortRef::new(zipx_id.clone(), "out"),
                &PortRef::new(unzipx_id.clone(), "in"),
            )?;

            for (i, chain) in chains.iter().enumerate() {
                let n = i + 1;
                let left = first_out_ref(model, &chain[segment - 1])?;
                let right = first_in_ref(model, &chain[segment])?;
                model.disconnect(&left)?;
                model.connect(&left, &PortRef::new(zipx_id.clone(), format!("in{}", n)))?;
                model.connect(
                    &PortRef::new(unzipx_id.clone(), format!("out{}", n)),
                    &right,
                )?;
            }
            changed = true;
        }
    }
    Ok(changed)
}

fn first_out_ref(model: &Model, id: &Id) -> Result<PortRef, ModelError> {
    let process = model
        .process(id)
        .ok_or_else(|| ModelError::at(format!("no process \"{}\"", id), id))?;
    process
        .out_ports
        .first()
        .map(|p| process.port_ref(&p.id))
        .ok_or_else(|| ModelError::at(format!("process \"{}\" has no out-ports", id), id))
}

fn first_in_ref(model: &Model, id: &Id) -> Result<PortRef, ModelError> {
    let process = model
        .process(id)
        .ok_or_else(|| ModelError::at(format!("no process \"{}\"", id), id))?;
    process
        .in_ports
        .first()
        .map(|p| process.port_ref(&p.id))
        .ok_or_else(|| ModelError::at(format!("process \"{}\" has no in-ports", id), id))
}

// ── Pass 6: section fusion ──────────────────────────────────────────────────

/// Replace every data-parallel section whose branch chains are one process
/// long with a single composite-form `ParallelMap`. The section boundary pair
/// and all branch processes are destroyed; the new node takes over the
/// section's outer connections.
pub fn fuse_unzip_map_zip(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    let sections: Vec<ContainedSection> = find_contained_sections(model)
        .into_iter()
        .filter(|s| is_data_parallel(model, s))
        .collect();
    for section in sections {
        if !model.contains(&section.start) || !model.contains(&section.end) {
            continue;
        }
        let (count, branch) = {
            let Some(start) = model.process(&section.start) else {
                continue;
            };
            let Some(first) = start.out_ports.first() else {
                continue;
            };
            let chain = process_chain(model, &start.port_ref(&first.id), &section.end);
            (start.out_ports.len(), chain)
        };
        if branch.len() != 1 {
            // Multi-stage branches wait for the split pass.
            continue;
        }
        if tapped(model, &section.start) || branch_members_tapped(model, &section) {
            continue;
        }
        let functions: Vec<CFunction> = model
            .process(&branch[0])
            .map(|p| p.kind.functions().into_iter().cloned().collect())
            .unwrap_or_default();
        if functions.is_empty() {
            continue;
        }
        let new_id = model.unique_id("_parallelmap_");
        model.add_process(Process::new(
            new_id.clone(),
            ProcessKind::ParallelMap { count, functions },
        ))?;
        redirect_data_flow(model, &section.start, &section.end, &new_id, &new_id)?;
        destroy_chain(model, &section.start)?;
        changed = true;
    }
    Ok(changed)
}

/// True if any process on any branch chain of `section` is tapped. Branch
/// processes are destroyed whole by section fusion, so a tap anywhere on a
/// branch blocks it.
fn branch_members_tapped(model: &Model, section: &ContainedSection) -> bool {
    let Some(start) = model.process(&section.start) else {
        return false;
    };
    start.out_ports.iter().any(|port| {
        process_chain(model, &start.port_ref(&port.id), &section.end)
            .iter()
            .any(|id| tapped(model, id))
    })
}

// ── Pass 7: sibling fusion ──────────────────────────────────────────────────

/// Fuse sibling map-like processes that share one predecessor and one
/// successor and carry byte-identical functions into an element-wise
/// `ParallelMap` with one in/out port pair per replaced sibling. The
/// predecessor and successor survive and are rewired pairwise.
pub fn fuse_sibling_maps(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;

    // Grouping key is exact: (predecessor id, successor id), then function
    // equality inside each group.
    let mut groups: BTreeMap<(Id, Id), Vec<Id>> = BTreeMap::new();
    for id in model.process_ids() {
        let Some(process) = model.process(&id) else {
            continue;
        };
        if !matches!(
            process.kind,
            ProcessKind::Map { .. } | ProcessKind::CoalescedMap { .. }
        ) {
            continue;
        }
        if process.in_ports.len() != 1 || process.out_ports.len() != 1 {
            continue;
        }
        if tapped(model, &id) {
            continue;
        }
        let (Some(pred), Some(succ)) = (
            process.in_ports[0].connection.as_ref(),
            process.out_ports[0].connection.as_ref(),
        ) else {
            continue;
        };
        groups
            .entry((pred.process.clone(), succ.process.clone()))
            .or_default()
            .push(id.clone());
    }

    for ((pred, succ), members) in groups {
        if members.len() < 2 {
            continue;
        }
        let mut buckets: Vec<Vec<Id>> = Vec::new();
        for id in members {
            let Some(process) = model.process(&id) else {
                continue;
            };
            let mut placed = false;
            for bucket in buckets.iter_mut() {
                let equal = model
                    .process(&bucket[0])
                    .map(|head| process.structurally_equal(head))
                    .unwrap_or(false);
                if equal {
                    bucket.push(id.clone());
                    placed = true;
                    break;
                }
            }
            if !placed {
                buckets.push(vec![id.clone()]);
            }
        }

        for bucket in buckets {
            if bucket.len() < 2 {
                continue;
            }
            if !model.contains(&pred) || !model.contains(&succ) {
                continue;
            }
            let mut endpoints: Vec<(PortRef, PortRef)> = Vec::new();
            let mut complete = true;
            for id in &bucket {
                let pair = model.process(id).and_then(|p| {
                    let pred_port = p.in_ports.first().and_then(|port| port.connection.clone());
                    let succ_port = p.out_ports.first().and_then(|port| port.connection.clone());
                    pred_port.zip(succ_port)
                });
                match pair {
                    Some(pair) => endpoints.push(pair),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            let functions: Vec<CFunction> = model
                .process(&bucket[0])
                .map(|p| p.kind.functions().into_iter().cloned().collect())
                .unwrap_or_default();
            if functions.is_empty() {
                continue;
            }

            let count = bucket.len();
            let new_id = model.unique_id("_parallelmap_");
            let mut parallel = Process::new(
                new_id.clone(),
                ProcessKind::ParallelMap { count, functions },
            );
            for n in 1..=count {
                parallel.add_in_port(format!("in{}", n));
                parallel.add_out_port(format!("out{}", n));
            }
            for id in &bucket {
                model.remove_process(id)?;
            }
            model.add_process(parallel)?;
            for (i, (pred_port, succ_port)) in endpoints.iter().enumerate() {
                let n = i + 1;
                model.connect(pred_port, &PortRef::new(new_id.clone(), format!("in{}", n)))?;
                model.connect(
                    &PortRef::new(new_id.clone(), format!("out{}", n)),
                    succ_port,
                )?;
            }
            changed = true;
        }
    }
    Ok(changed)
}

// ── Pass 8: parallel-map chain coalescing ───────────────────────────────────

/// Fuse maximal linear chains of composite-form `ParallelMap` processes with
/// equal counts and type-compatible consecutive functions into a single node
/// with the concatenated function list.
pub fn coalesce_parallelmap_chains(model: &mut Model) -> Result<bool, ModelError> {
    let mut changed = false;
    for id in model.process_ids() {
        if !model.contains(&id) {
            continue;
        }
        if !is_composite_parallelmap(model, &id) {
            continue;
        }
        let upstream_is_parallelmap = model
            .process(&id)
            .and_then(|p| p.in_ports.first())
            .and_then(|port| port.connection.as_ref())
            .map(|far| is_composite_parallelmap(model, &far.process) && !tapped(model, &far.process))
            .unwrap_or(false);
        if upstream_is_parallelmap {
            continue;
        }
        let mut chain = vec![id.clone()];
        loop {
            if chain.last().map(|last| tapped(model, last)).unwrap_or(false) {
                break;
            }
            let next = chain
                .last()
                .and_then(|last| model.process(last))
                .and_then(|p| p.out_ports.first())
                .and_then(|port| port.connection.as_ref())
                .map(|far| far.process.clone());
            match next {
                Some(n) if is_composite_parallelmap(model, &n) && !chain.contains(&n) => {
                    chain.push(n)
                }
                _ => break,
            }
        }
        if chain.len() < 2 || !is_parallelmap_chain_coalescable(model, &chain) {
            continue;
        }

        let count = match model.process(&chain[0]).map(|p| &p.kind) {
            Some(ProcessKind::ParallelMap { count, .. }) => *count,
            _ => continue,
        };
        let functions = chain_functions(model, &chain);
        let first = chain[0].clone();
        let last = chain[chain.len() - 1].clone();
        let new_id = model.unique_id("_parallelmap_");
        model.add_process(Process::new(
            new_id.clone(),
            ProcessKind::ParallelMap { count, functions },
        ))?;
        redirect_data_flow(model, &first, &last, &new_id, &new_id)?;
        destroy_chain(model, &first)?;
        changed = true;
    }
    Ok(changed)
}

fn is_composite_parallelmap(model: &Model, id: &Id) -> bool {
    model
        .process(id)
        .map(|p| {
            matches!(p.kind, ProcessKind::ParallelMap { .. })
                && p.in_ports.len() == 1
                && p.out_ports.len() == 1
        })
        .unwrap_or(false)
}

/// Coalescable: equal instance counts throughout, and each stage's first
/// input parameter type (const stripped) equals the previous stage's output
/// type.
fn is_parallelmap_chain_coalescable(model: &Model, chain: &[Id]) -> bool {
    let mut first_count: Option<usize> = None;
    let mut prev_output: Option<CDataType> = None;
    for id in chain {
        let Some(process) = model.process(id) else {
            return false;
        };
        let ProcessKind::ParallelMap { count, functions } = &process.kind else {
            return false;
        };
        let (Some(first_fn), Some(last_fn)) = (functions.first(), functions.last()) else {
            return false;
        };
        match first_count {
            None => first_count = Some(*count),
            Some(expected) if expected == *count => {}
            Some(_) => return false,
        }
        if let Some(prev) = &prev_output {
            let Some(first_param) = first_fn.params.first() else {
                return false;
            };
            if first_param.data_type.without_const() != *prev {
                return false;
            }
        }
        prev_output = Some(output_type_of(last_fn));
    }
    true
}

/// The data type a function produces: the return type for return-style
/// functions, the last parameter's type when the output leaves through an
/// out-parameter.
fn output_type_of(function: &CFunction) -> CDataType {
    match function.params.last() {
        Some(last) if function.params.len() > 1 => last.data_type.clone(),
        _ => function.return_type.clone(),
    }
}

// ── Section discovery ───────────────────────────────────────────────────────

/// All contained sections, discovered walking backward from the network
/// outputs. At each `Zipx` the nearest upstream `Unzipx` is probed; the pair
/// is kept iff all flow between them is contained. When a section is found
/// the walk continues from its start, skipping the interior.
pub fn find_contained_sections(model: &Model) -> Vec<ContainedSection> {
    let mut sections = Vec::new();
    let mut visited = BTreeSet::new();
    for output in model.outputs.clone() {
        collect_sections(model, &output.process, &mut visited, &mut sections);
    }
    sections
}

fn collect_sections(
    model: &Model,
    begin: &Id,
    visited: &mut BTreeSet<Id>,
    sections: &mut Vec<ContainedSection>,
) {
    if !visited.insert(begin.clone()) {
        return;
    }
    let Some(process) = model.process(begin) else {
        return;
    };
    if matches!(process.kind, ProcessKind::Zipx) {
        if let Some(diverge) = find_nearest_unzipx(model, begin) {
            if all_forward_paths_reach(model, &diverge, begin)
                && all_backward_paths_reach(model, begin, &diverge)
            {
                let section = ContainedSection {
                    start: diverge.clone(),
                    end: begin.clone(),
                };
                if !sections.contains(&section) {
                    sections.push(section);
                }
                collect_sections(model, &diverge, visited, sections);
                return;
            }
        }
    }
    let predecessors: Vec<Id> = process
        .in_ports
        .iter()
        .filter_map(|port| port.connection.as_ref())
        .map(|far| far.process.clone())
        .collect();
    for pred in predecessors {
        collect_sections(model, &pred, visited, sections);
    }
}

/// Depth-first upstream search for the first `Unzipx` above `begin`,
/// following in-ports in declaration order.
fn find_nearest_unzipx(model: &Model, begin: &Id) -> Option<Id> {
    fn search(model: &Model, current: &Id, visited: &mut BTreeSet<Id>) -> Option<Id> {
        if !visited.insert(current.clone()) {
            return None;
        }
        let process = model.process(current)?;
        if matches!(process.kind, ProcessKind::Unzipx) {
            return Some(current.clone());
        }
        for port in &process.in_ports {
            if let Some(far) = &port.connection {
                if let Some(found) = search(model, &far.process, visited) {
                    return Some(found);
                }
            }
        }
        None
    }
    let process = model.process(begin)?;
    let mut visited = BTreeSet::new();
    visited.insert(begin.clone());
    for port in &process.in_ports {
        if let Some(far) = &port.connection {
            if let Some(found) = search(model, &far.process, &mut visited) {
                return Some(found);
            }
        }
    }
    None
}

/// The processes strictly between `start` (one of the section start's out
/// ports) and `end`, following single out-ports. `end` itself is excluded.
pub(crate) fn process_chain(model: &Model, start: &PortRef, end: &Id) -> Vec<Id> {
    let mut chain = Vec::new();
    let mut port = start.clone();
    loop {
        let Some(next) = model.connected_to(&port) else {
            break;
        };
        if &next.process == end || chain.contains(&next.process) {
            break;
        }
        chain.push(next.process.clone());
        let Some(process) = model.process(&next.process) else {
            break;
        };
        let Some(out) = process.out_ports.first() else {
            break;
        };
        port = process.port_ref(&out.id);
    }
    chain
}

/// Data-parallel: every branch chain consists of map-like processes only and
/// all branch chains are pairwise structurally equal.
pub(crate) fn is_data_parallel(model: &Model, section: &ContainedSection) -> bool {
    let Some(start) = model.process(&section.start) else {
        return false;
    };
    let mut first_chain: Option<Vec<Id>> = None;
    for port in &start.out_ports {
        let chain = process_chain(model, &start.port_ref(&port.id), &section.end);
        if !chain.iter().all(|id| is_map_like(model, id)) {
            return false;
        }
        match &first_chain {
            None => {
                if chain.is_empty() {
                    return false;
                }
                first_chain = Some(chain);
            }
            Some(first) => {
                if first.len() != chain.len() {
                    return false;
                }
                for (a, b) in first.iter().zip(&chain) {
                    let equal = match (model.process(a), model.process(b)) {
                        (Some(pa), Some(pb)) => pa.structurally_equal(pb),
                        _ => false,
                    };
                    if !equal {
                        return false;
                    }
                }
            }
        }
    }
    first_chain.is_some()
}

// ── Cut-and-splice primitives ───────────────────────────────────────────────

/// Move the in-port connections (and boundary-input entries) of `old_start`
/// onto `new_start`, and the out-port connections (and boundary-output
/// entries) of `old_end` onto `new_end`. The primitive every structural pass
/// uses to splice a replacement node into the position of a removed region.
pub fn redirect_data_flow(
    model: &mut Model,
    old_start: &Id,
    old_end: &Id,
    new_start: &Id,
    new_end: &Id,
) -> Result<(), ModelError> {
    let in_refs: Vec<PortRef> = match model.process(old_start) {
        Some(p) => p.in_ports.iter().map(|port| p.port_ref(&port.id)).collect(),
        None => {
            return Err(ModelError::at(
                format!("no process \"{}\"", old_start),
                old_start,
            ))
        }
    };
    for r in in_refs {
        model.move_in_port(&r, new_start)?;
    }
    let out_refs: Vec<PortRef> = match model.process(old_end) {
        Some(p) => p.out_ports.iter().map(|port| p.port_ref(&port.id)).collect(),
        None => {
            return Err(ModelError::at(
                format!("no process \"{}\"", old_end),
                old_end,
            ))
        }
    };
    for r in out_refs {
        model.move_out_port(&r, new_end)?;
    }
    Ok(())
}

/// Destroy `start` and everything reachable forward from it. Used after
/// `redirect_data_flow` has detached a replaced region from the rest of the
/// network, so the walk cannot escape the region.
pub fn destroy_chain(model: &mut Model, start: &Id) -> Result<(), ModelError> {
    let mut pending = vec![start.clone()];
    while let Some(id) = pending.pop() {
        let next: Vec<Id> = match model.process(&id) {
            Some(process) => process
                .out_ports
                .iter()
                .filter_map(|port| port.connection.as_ref())
                .map(|far| far.process.clone())
                .collect(),
            None => continue,
        };
        pending.extend(next);
        model.remove_process(&id)?;
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
