// schedule.rs — Total execution order construction for process networks
//
// Builds one total order over all output-reachable processes, suitable for
// direct sequential translation. The search walks backward from the network
// outputs, emitting each process after its dependencies; a `Delay` is emitted
// immediately (its output depends only on held state, not on this step's
// input) and its predecessor restarts the search, which is what breaks
// feedback loops.
//
// Preconditions: the model passed `Model::validate` (in particular, every
//                cycle crosses a `Delay`).
// Postconditions: returns `ScheduleResult` whose order is certified by
//                 `ScheduleCert` (S1-S2).
// Failure modes: a cycle with no `Delay` on it is reported as E0300 and no
//                order is produced. Output-unreachable processes are excluded
//                from the order and reported as W0100 warnings.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::diag::{codes, Diagnostic};
use crate::id::Id;
use crate::model::Model;

// ── Public types ────────────────────────────────────────────────────────────

/// A total order over process ids. Position in `order` is execution position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub order: Vec<Id>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: &Id) -> Option<usize> {
        self.order.iter().position(|x| x == id)
    }
}

/// Result of schedule construction.
#[derive(Debug)]
pub struct ScheduleResult {
    pub schedule: Schedule,
    pub cert: ScheduleCert,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the schedule postconditions (S1-S2).
#[derive(Debug, Clone)]
pub struct ScheduleCert {
    /// S1: Every scheduled process's non-delay dependencies appear strictly
    /// before it. A `Delay`'s own dependencies are exempt (its output comes
    /// from state latched in the previous step), as are dependencies on a
    /// `Delay` (the value is available from the start of the step).
    pub s1_dependencies_ordered: bool,
    /// S2: The order contains every output-reachable process exactly once.
    pub s2_exact_coverage: bool,
}

impl crate::pass::StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.s1_dependencies_ordered && self.s2_exact_coverage
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("S1_dependencies_ordered", self.s1_dependencies_ordered),
            ("S2_exact_coverage", self.s2_exact_coverage),
        ]
    }
}

/// Verify schedule postconditions against the model.
pub fn verify_schedule(model: &Model, schedule: &Schedule) -> ScheduleCert {
    ScheduleCert {
        s1_dependencies_ordered: verify_s1_dependencies_ordered(model, schedule),
        s2_exact_coverage: verify_s2_exact_coverage(model, schedule),
    }
}

/// S1: For every scheduled non-delay process, every scheduled non-delay
/// predecessor sits at a strictly smaller position.
fn verify_s1_dependencies_ordered(model: &Model, schedule: &Schedule) -> bool {
    let position: BTreeMap<&Id, usize> = schedule
        .order
        .iter()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();
    for (index, id) in schedule.order.iter().enumerate() {
        let Some(process) = model.process(id) else {
            return false;
        };
        if process.is_delay() {
            continue;
        }
        for port in &process.in_ports {
            let Some(far) = &port.connection else {
                continue;
            };
            let Some(pred) = model.process(&far.process) else {
                return false;
            };
            if pred.is_delay() {
                continue;
            }
            match position.get(&far.process) {
                Some(pred_index) if *pred_index < index => {}
                _ => return false,
            }
        }
    }
    true
}

/// S2: No duplicates, and the scheduled set equals the output-reachable set.
fn verify_s2_exact_coverage(model: &Model, schedule: &Schedule) -> bool {
    let mut seen = BTreeSet::new();
    for id in &schedule.order {
        if !seen.insert(id.clone()) {
            return false;
        }
    }
    seen == output_reachable(model)
}

/// All processes reachable backward from the network output ports, crossing
/// delays. Everything outside this set cannot influence an output.
pub(crate) fn output_reachable(model: &Model) -> BTreeSet<Id> {
    let mut reachable = BTreeSet::new();
    let mut pending: Vec<Id> = model.outputs.iter().map(|r| r.process.clone()).collect();
    while let Some(id) = pending.pop() {
        if !reachable.insert(id.clone()) {
            continue;
        }
        if let Some(process) = model.process(&id) {
            for port in &process.in_ports {
                if let Some(far) = &port.connection {
                    pending.push(far.process.clone());
                }
            }
        }
    }
    reachable
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Build the total execution order for a model.
pub fn find_schedule(model: &Model) -> ScheduleResult {
    let mut diagnostics = Vec::new();

    if let Some(cycle) = model.illegal_cycle() {
        let names: Vec<String> = cycle.iter().map(|id| format!("\"{}\"", id)).collect();
        diagnostics.push(
            Diagnostic::error(format!(
                "process network has a cycle without a delay ({}); no sequential \
                 order exists",
                names.join(" -> ")
            ))
            .with_code(codes::E0300)
            .for_process(&cycle[0]),
        );
        let schedule = Schedule { order: Vec::new() };
        let cert = verify_schedule(model, &schedule);
        return ScheduleResult {
            schedule,
            cert,
            diagnostics,
        };
    }

    let order = ScheduleFinder::new(model).run();
    let schedule = Schedule { order };

    let reachable = output_reachable(model);
    for id in model.process_ids() {
        if !reachable.contains(&id) {
            diagnostics.push(
                Diagnostic::warning(format!(
                    "process \"{}\" cannot reach any network output and is not scheduled",
                    id
                ))
                .with_code(codes::W0100)
                .for_process(&id),
            );
        }
    }

    let cert = verify_schedule(model, &schedule);
    ScheduleResult {
        schedule,
        cert,
        diagnostics,
    }
}

// ── Internal search ─────────────────────────────────────────────────────────

/// A schedule fragment built from one starting point, with the rule for
/// splicing it into the total order: at the front, or directly after
/// `insertion_point` when the fragment's consumers are already placed.
struct PartialSchedule {
    order: Vec<Id>,
    at_beginning: bool,
    insertion_point: Option<Id>,
}

impl PartialSchedule {
    fn new() -> Self {
        PartialSchedule {
            order: Vec::new(),
            at_beginning: true,
            insertion_point: None,
        }
    }
}

struct ScheduleFinder<'a> {
    model: &'a Model,
    starting_points: VecDeque<Id>,
    globally_visited: BTreeSet<Id>,
}

impl<'a> ScheduleFinder<'a> {
    fn new(model: &'a Model) -> Self {
        let starting_points = model.outputs.iter().map(|r| r.process.clone()).collect();
        ScheduleFinder {
            model,
            starting_points,
            globally_visited: BTreeSet::new(),
        }
    }

    fn run(mut self) -> Vec<Id> {
        let mut order: Vec<Id> = Vec::new();
        while let Some(start) = self.starting_points.pop_front() {
            let mut locally_visited = BTreeSet::new();
            let partial = self.find_partial(&start, &mut locally_visited);
            if partial.at_beginning {
                let mut merged = partial.order;
                merged.extend(order);
                order = merged;
            } else {
                match partial
                    .insertion_point
                    .as_ref()
                    .and_then(|point| order.iter().position(|id| id == point))
                {
                    Some(index) => {
                        let tail = order.split_off(index + 1);
                        order.extend(partial.order);
                        order.extend(tail);
                    }
                    None => {
                        // Unreachable: an anchored partial's insertion point
                        // was locally visited earlier, and every locally
                        // visited process is in the order.
                        debug_assert!(false, "insertion point missing from order");
                        order.extend(partial.order);
                    }
                }
            }
            self.globally_visited.extend(locally_visited);
        }
        order
    }

    /// Depth-first backward walk from `start`. Emits each process after the
    /// partials of all its in-port predecessors, in port order.
    fn find_partial(&mut self, start: &Id, locally_visited: &mut BTreeSet<Id>) -> PartialSchedule {
        let mut partial = PartialSchedule::new();

        // Placed by an earlier starting point: anything built on top of this
        // process must slot in right after it.
        if self.globally_visited.contains(start) {
            partial.at_beginning = false;
            partial.insertion_point = Some(start.clone());
            return partial;
        }

        let model = self.model;
        let Some(process) = model.process(start) else {
            return partial;
        };

        // A delay is schedulable immediately; its input side is a fresh
        // starting point. This is the feedback break. The delay is marked
        // visited like any other process so a later walk anchors at it
        // instead of emitting it again (a tapped delay output makes the
        // delay itself a starting point).
        if process.is_delay() {
            if !locally_visited.insert(start.clone()) {
                return partial;
            }
            if let Some(far) = process
                .in_ports
                .first()
                .and_then(|port| port.connection.as_ref())
            {
                self.starting_points.push_back(far.process.clone());
            }
            partial.order.push(start.clone());
            return partial;
        }

        if !locally_visited.insert(start.clone()) {
            return partial;
        }

        let predecessors: Vec<Id> = process
            .in_ports
            .iter()
            .filter_map(|port| port.connection.as_ref())
            .map(|far| far.process.clone())
            .collect();
        for pred in predecessors {
            let sub = self.find_partial(&pred, locally_visited);
            partial.order.extend(sub.order);
            if !sub.at_beginning {
                partial.at_beginning = false;
                partial.insertion_point = sub.insertion_point;
            }
        }
        partial.order.push(start.clone());
        partial
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "schedule ({} processes)", self.order.len())?;
        for (index, id) in self.order.iter().enumerate() {
            writeln!(f, "  {}: {}", index, id)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::{CBaseType, CDataType, CFunction, CVariable};
    use crate::diag::{has_errors, DiagLevel};
    use crate::model::{Process, ProcessKind};
    use crate::pass::StageCert;

    fn model_from(source: &str) -> Model {
        let parsed = crate::parser::parse(source);
        assert!(
            parsed.errors.is_empty(),
            "parse errors: {:?}",
            parsed.errors
        );
        let net = parsed.network.expect("no network parsed");
        let result = crate::frontend::lower(&net);
        assert!(
            !has_errors(&result.diagnostics),
            "lowering errors: {:#?}",
            result.diagnostics
        );
        result.model.expect("no model produced")
    }

    fn schedule_ok(source: &str) -> ScheduleResult {
        let result = find_schedule(&model_from(source));
        assert!(
            !has_errors(&result.diagnostics),
            "unexpected schedule errors: {:#?}",
            result.diagnostics
        );
        result
    }

    fn names(schedule: &Schedule) -> Vec<&str> {
        schedule.order.iter().map(|id| id.as_str()).collect()
    }

    // ── Linear and branching networks ───────────────────────────────────

    #[test]
    fn linear_chain_runs_source_first() {
        let result = schedule_ok(
            r#"
network chain {
  fun f(x: int) -> int %{ return x + 1; }%
  map a = f;
  map b = f;
  map c = f;
  connect a.out -> b.in;
  connect b.out -> c.in;
  inputs a.in;
  outputs c.out;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["a", "b", "c"]);
        assert!(result.cert.all_pass());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn diamond_schedules_each_process_once() {
        let source = r#"
network diamond {
  fun double(x: int) -> int %{ return x * 2; }%
  map m1 = double;
  map m2 = double;
  copy c1 -> 2;
  zipx zx <- 2;
  connect c1.out1 -> m1.in;
  connect c1.out2 -> m2.in;
  connect m1.out -> zx.in1;
  connect m2.out -> zx.in2;
  inputs c1.in;
  outputs zx.out;
}
"#;
        let result = schedule_ok(source);
        let schedule = &result.schedule;
        assert_eq!(schedule.len(), 4);
        assert!(result.cert.all_pass());
        let c1 = schedule.position(&Id::new("c1")).unwrap();
        let m1 = schedule.position(&Id::new("m1")).unwrap();
        let m2 = schedule.position(&Id::new("m2")).unwrap();
        let zx = schedule.position(&Id::new("zx")).unwrap();
        assert!(c1 < m1 && c1 < m2);
        assert!(m1 < zx && m2 < zx);

        // Same model, same order.
        let again = schedule_ok(source);
        assert_eq!(again.schedule, result.schedule);
    }

    // ── Feedback loops ──────────────────────────────────────────────────

    #[test]
    fn delay_loop_yields_length_two_order() {
        // acc's out-port feeds the delay and doubles as the network output.
        let result = schedule_ok(
            r#"
network loop {
  fun step(s: int, x: int) -> int %{ return s + x; }%
  zipwith acc = step;
  delay d init "0";
  connect acc.out -> d.in;
  connect d.out -> acc.in1;
  inputs acc.in2;
  outputs acc.out;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["d", "acc"]);
        assert!(result.cert.all_pass());
    }

    #[test]
    fn tapped_delay_output_schedules_delay_once() {
        // The delay's out-port doubles as the network output, so the delay
        // itself becomes a starting point; the later walk from acc must
        // anchor at it instead of emitting it a second time.
        let result = schedule_ok(
            r#"
network loop {
  fun step(s: int, x: int) -> int %{ return s + x; }%
  zipwith acc = step;
  delay d init "0";
  connect acc.out -> d.in;
  connect d.out -> acc.in1;
  inputs acc.in2;
  outputs d.out;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["d", "acc"]);
        assert!(result.cert.all_pass());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn tapped_interior_output_schedules_once() {
        // a.out feeds b and is also listed as a network output.
        let result = schedule_ok(
            r#"
network tap {
  fun f(x: int) -> int %{ return x + 1; }%
  map a = f;
  map b = f;
  connect a.out -> b.in;
  inputs a.in;
  outputs a.out;
  outputs b.out;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["a", "b"]);
        assert!(result.cert.all_pass());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn feedback_through_copy_schedules_delay_first() {
        let result = schedule_ok(
            r#"
network feedback {
  fun step(s: int, x: int) -> int %{ return s + x; }%
  zipwith acc = step;
  copy fan -> 2;
  delay d init "0";
  connect acc.out -> fan.in;
  connect fan.out1 -> d.in;
  connect d.out -> acc.in1;
  inputs acc.in2;
  outputs fan.out2;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["d", "acc", "fan"]);
        assert!(result.cert.all_pass());
        assert!(result.diagnostics.is_empty());
    }

    // ── Unreachable processes ───────────────────────────────────────────

    #[test]
    fn closed_island_is_excluded_with_warnings() {
        let result = schedule_ok(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  map a = f;
  map b = f;
  map spin = f;
  delay d init "0";
  connect a.out -> b.in;
  connect spin.out -> d.in;
  connect d.out -> spin.in;
  inputs a.in;
  outputs b.out;
}
"#,
        );
        assert_eq!(names(&result.schedule), vec!["a", "b"]);
        assert!(result.cert.all_pass());
        let warnings: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.level == DiagLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|d| d.code == Some(codes::W0100)));
    }

    // ── Unschedulable models ────────────────────────────────────────────

    #[test]
    fn cycle_without_delay_is_fatal() {
        // Built directly: the frontend would already reject this model.
        let int = CDataType::scalar(CBaseType::Int);
        let step = CFunction::new(
            "step",
            int.clone(),
            vec![
                CVariable::new("s", int.clone()),
                CVariable::new("x", int.clone()),
            ],
            "{ return s + x; }",
        );
        let mut m = Model::new("bad");
        let mut zw = Process::new("zw", ProcessKind::ZipWithN { function: step });
        zw.add_in_port("in1");
        zw.add_in_port("in2");
        zw.add_out_port("out");
        m.add_process(zw).unwrap();
        let mut p = Process::new("m", ProcessKind::Map {
            function: CFunction::new(
                "f",
                int.clone(),
                vec![CVariable::new("x", int)],
                "{ return x; }",
            ),
        });
        p.add_in_port("in");
        p.add_out_port("out");
        m.add_process(p).unwrap();
        m.connect(
            &crate::id::PortRef::new("zw", "out"),
            &crate::id::PortRef::new("m", "in"),
        )
        .unwrap();
        m.connect(
            &crate::id::PortRef::new("m", "out"),
            &crate::id::PortRef::new("zw", "in1"),
        )
        .unwrap();
        m.inputs.push(crate::id::PortRef::new("zw", "in2"));
        m.outputs.push(crate::id::PortRef::new("zw", "out"));

        let result = find_schedule(&m);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::E0300)));
        assert!(result.schedule.is_empty());
        assert!(!result.cert.s2_exact_coverage);
        assert!(!result.cert.all_pass());
    }

    // ── Verification ────────────────────────────────────────────────────

    #[test]
    fn verify_rejects_mis_ordered_schedule() {
        let model = model_from(
            r#"
network chain {
  fun f(x: int) -> int %{ return x + 1; }%
  map a = f;
  map b = f;
  connect a.out -> b.in;
  inputs a.in;
  outputs b.out;
}
"#,
        );
        let bad = Schedule {
            order: vec![Id::new("b"), Id::new("a")],
        };
        let cert = verify_schedule(&model, &bad);
        assert!(!cert.s1_dependencies_ordered);
        assert!(cert.s2_exact_coverage);
        assert!(!cert.all_pass());
    }

    #[test]
    fn verify_rejects_duplicates_and_gaps() {
        let model = model_from(
            r#"
network chain {
  fun f(x: int) -> int %{ return x + 1; }%
  map a = f;
  map b = f;
  connect a.out -> b.in;
  inputs a.in;
  outputs b.out;
}
"#,
        );
        let duplicated = Schedule {
            order: vec![Id::new("a"), Id::new("a"), Id::new("b")],
        };
        assert!(!verify_schedule(&model, &duplicated).s2_exact_coverage);

        let missing = Schedule {
            order: vec![Id::new("a")],
        };
        assert!(!verify_schedule(&model, &missing).s2_exact_coverage);
    }

    // ── Display ─────────────────────────────────────────────────────────

    #[test]
    fn display_lists_positions() {
        let result = schedule_ok(
            r#"
network chain {
  fun f(x: int) -> int %{ return x + 1; }%
  map a = f;
  map b = f;
  connect a.out -> b.in;
  inputs a.in;
  outputs b.out;
}
"#,
        );
        let text = result.schedule.to_string();
        assert!(text.contains("schedule (2 processes)"));
        assert!(text.contains("0: a"));
        assert!(text.contains("1: b"));
    }
}
