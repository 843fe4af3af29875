// frontend.rs — AST to model lowering
//
// Builds a process-network model from a parsed .pnet description: converts
// type annotations to C data types, attaches functions to processes, creates
// the per-kind port sets, applies connect lines and boundary lists, and runs
// the full model validation.
//
// Preconditions: `net` is a parsed AST (spans intact).
// Postconditions: on success the returned model passes `Model::validate()`.
// Failure modes: name resolution and typing problems → `Diagnostic` errors
//                (model absent); model-operation rejections and validation
//                violations → `Diagnostic` errors with process context.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::ctype::{CBaseType, CDataType, CFunction, CVariable};
use crate::diag::{codes, has_errors, Diagnostic};
use crate::id::{Id, PortRef};
use crate::model::{Model, Process, ProcessKind};

/// Result of lowering: the model (absent when any error was raised) plus
/// diagnostics.
#[derive(Debug)]
pub struct FrontendResult {
    pub model: Option<Model>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower a parsed network description into a model.
pub fn lower(net: &NetworkDecl) -> FrontendResult {
    let mut lowerer = Lowerer::new(&net.name.name);
    lowerer.collect_functions(net);
    lowerer.build_processes(net);
    lowerer.apply_connections(net);
    lowerer.apply_boundaries(net);
    lowerer.validate();

    let failed = has_errors(&lowerer.diagnostics);
    FrontendResult {
        model: if failed { None } else { Some(lowerer.model) },
        diagnostics: lowerer.diagnostics,
    }
}

// ── Internal builder ────────────────────────────────────────────────────────

struct Lowerer {
    model: Model,
    functions: BTreeMap<String, CFunction>,
    diagnostics: Vec<Diagnostic>,
}

impl Lowerer {
    fn new(name: &str) -> Self {
        Lowerer {
            model: Model::new(name),
            functions: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        self.diagnostics
            .push(Diagnostic::error(message).with_code(codes::E0002));
    }

    fn error_at(&mut self, message: String, process: &Id) {
        self.diagnostics.push(
            Diagnostic::error(message)
                .with_code(codes::E0100)
                .for_process(process),
        );
    }

    // ── Functions ───────────────────────────────────────────────────────

    fn collect_functions(&mut self, net: &NetworkDecl) {
        for item in &net.items {
            let ItemKind::Fun(f) = &item.kind else {
                continue;
            };
            if self.functions.contains_key(&f.name.name) {
                self.error(format!("function \"{}\" is declared twice", f.name.name));
                continue;
            }
            let Some(function) = self.convert_function(f) else {
                continue;
            };
            self.functions.insert(f.name.name.clone(), function);
        }
    }

    fn convert_function(&mut self, f: &FunDecl) -> Option<CFunction> {
        let mut params = Vec::new();
        for p in &f.params {
            let ty = self.convert_type(&p.ty, &f.name.name, false)?;
            params.push(CVariable::new(p.name.name.clone(), ty));
        }
        let return_ty = self.convert_type(&f.return_ty, &f.name.name, true)?;
        Some(CFunction::new(
            f.name.name.clone(),
            return_ty,
            params,
            format!("{{{}}}", f.body),
        ))
    }

    fn convert_type(&mut self, ann: &TypeAnn, fun: &str, is_return: bool) -> Option<CDataType> {
        let Some(base) = CBaseType::parse(&ann.base) else {
            self.error(format!(
                "unknown type \"{}\" in function \"{}\"",
                ann.base, fun
            ));
            return None;
        };
        if base == CBaseType::Void {
            if !is_return {
                self.error(format!(
                    "function \"{}\" has a void parameter; only the return type may be void",
                    fun
                ));
                return None;
            }
            if ann.is_const || ann.array != ArrayAnn::Scalar {
                self.error(format!(
                    "function \"{}\": void cannot be const or an array",
                    fun
                ));
                return None;
            }
        }
        let mut ty = match ann.array {
            ArrayAnn::Scalar => CDataType::scalar(base),
            ArrayAnn::Unsized => CDataType::array(base),
            ArrayAnn::Sized(n) => {
                if n == 0 {
                    self.error(format!(
                        "function \"{}\": array size must be at least 1",
                        fun
                    ));
                    return None;
                }
                CDataType::array_sized(base, n as usize)
            }
        };
        ty.set_is_const(ann.is_const);
        Some(ty)
    }

    // ── Processes ───────────────────────────────────────────────────────

    fn build_processes(&mut self, net: &NetworkDecl) {
        for item in &net.items {
            let ItemKind::Proc(decl) = &item.kind else {
                continue;
            };
            let Some(process) = self.convert_process(decl) else {
                continue;
            };
            if let Err(e) = self.model.add_process(process) {
                self.error(format!("process \"{}\": {}", decl.name.name, e));
            }
        }
    }

    fn convert_process(&mut self, decl: &ProcDecl) -> Option<Process> {
        let id = Id::new(decl.name.name.clone());
        match &decl.kind {
            ProcKindDecl::Map { function } => {
                let f = self.lookup_function(function, &decl.name.name)?;
                let mut p = Process::new(id, ProcessKind::Map { function: f });
                p.add_in_port("in");
                p.add_out_port("out");
                Some(p)
            }
            ProcKindDecl::ZipWith { function } => {
                let f = self.lookup_function(function, &decl.name.name)?;
                let n = zip_arity(&f);
                if n == 0 {
                    self.error(format!(
                        "process \"{}\": function \"{}\" leaves no input parameters",
                        decl.name.name, f.name
                    ));
                    return None;
                }
                let mut p = Process::new(id, ProcessKind::ZipWithN { function: f });
                for i in 1..=n {
                    p.add_in_port(format!("in{}", i));
                }
                p.add_out_port("out");
                Some(p)
            }
            ProcKindDecl::ParallelMap {
                count, function, ..
            } => {
                if *count == 0 {
                    self.error(format!(
                        "process \"{}\": instance count must be at least 1",
                        decl.name.name
                    ));
                    return None;
                }
                let f = self.lookup_function(function, &decl.name.name)?;
                let mut p = Process::new(
                    id,
                    ProcessKind::ParallelMap {
                        count: *count as usize,
                        functions: vec![f],
                    },
                );
                p.add_in_port("in");
                p.add_out_port("out");
                Some(p)
            }
            ProcKindDecl::Copy { outs, .. } => {
                if *outs == 0 {
                    self.error(format!(
                        "process \"{}\": fan-out must be at least 1",
                        decl.name.name
                    ));
                    return None;
                }
                let mut p = Process::new(id, ProcessKind::Copy);
                p.add_in_port("in");
                for i in 1..=*outs {
                    p.add_out_port(format!("out{}", i));
                }
                Some(p)
            }
            ProcKindDecl::Zipx { ins, .. } => {
                if *ins == 0 {
                    self.error(format!(
                        "process \"{}\": in-arity must be at least 1",
                        decl.name.name
                    ));
                    return None;
                }
                let mut p = Process::new(id, ProcessKind::Zipx);
                for i in 1..=*ins {
                    p.add_in_port(format!("in{}", i));
                }
                p.add_out_port("out");
                Some(p)
            }
            ProcKindDecl::Unzipx { outs, .. } => {
                if *outs == 0 {
                    self.error(format!(
                        "process \"{}\": out-arity must be at least 1",
                        decl.name.name
                    ));
                    return None;
                }
                let mut p = Process::new(id, ProcessKind::Unzipx);
                p.add_in_port("in");
                for i in 1..=*outs {
                    p.add_out_port(format!("out{}", i));
                }
                Some(p)
            }
            ProcKindDecl::Delay { init, .. } => {
                let mut p = Process::new(
                    id,
                    ProcessKind::Delay {
                        initial_value: init.clone(),
                    },
                );
                p.add_in_port("in");
                p.add_out_port("out");
                Some(p)
            }
        }
    }

    fn lookup_function(&mut self, name: &Ident, process: &str) -> Option<CFunction> {
        match self.functions.get(&name.name) {
            Some(f) => Some(f.clone()),
            None => {
                self.error(format!(
                    "process \"{}\" refers to unknown function \"{}\"",
                    process, name.name
                ));
                None
            }
        }
    }

    // ── Connections and boundaries ──────────────────────────────────────

    fn apply_connections(&mut self, net: &NetworkDecl) {
        for item in &net.items {
            let ItemKind::Connect(c) = &item.kind else {
                continue;
            };
            let Some(from) = self.resolve_port(&c.from) else {
                continue;
            };
            let Some(to) = self.resolve_port(&c.to) else {
                continue;
            };
            if let Err(e) = self.model.connect(&from, &to) {
                let process = e.process.clone().unwrap_or_else(|| from.process.clone());
                self.error_at(e.message, &process);
            }
        }
    }

    fn apply_boundaries(&mut self, net: &NetworkDecl) {
        for item in &net.items {
            match &item.kind {
                ItemKind::Inputs(io) => {
                    for path in &io.ports {
                        if let Some(r) = self.resolve_port(path) {
                            self.model.inputs.push(r);
                        }
                    }
                }
                ItemKind::Outputs(io) => {
                    for path in &io.ports {
                        if let Some(r) = self.resolve_port(path) {
                            self.model.outputs.push(r);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve_port(&mut self, path: &PortPath) -> Option<PortRef> {
        let r = PortRef::new(path.process.name.clone(), path.port.name.clone());
        if !self.model.contains(&r.process) {
            self.error(format!("unknown process \"{}\"", path.process.name));
            return None;
        }
        if self.model.port(&r).is_none() {
            self.error(format!(
                "process \"{}\" has no port \"{}\"",
                path.process.name, path.port.name
            ));
            return None;
        }
        Some(r)
    }

    // ── Validation ──────────────────────────────────────────────────────

    fn validate(&mut self) {
        if has_errors(&self.diagnostics) {
            // Construction already failed; validation would only repeat the
            // fallout of missing pieces.
            return;
        }
        for e in self.model.validate() {
            match &e.process {
                Some(p) => {
                    let p = p.clone();
                    self.error_at(e.message, &p);
                }
                None => self
                    .diagnostics
                    .push(Diagnostic::error(e.message).with_code(codes::E0100)),
            }
        }
    }
}

/// The in-arity implied by a function: one port per input parameter. For an
/// out-parameter style function (void return) the last parameter is the
/// output and does not get a port.
fn zip_arity(f: &CFunction) -> usize {
    if f.return_type.base() == CBaseType::Void {
        f.params.len().saturating_sub(1)
    } else {
        f.params.len()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_source(source: &str) -> FrontendResult {
        let parsed = crate::parser::parse(source);
        assert!(
            parsed.errors.is_empty(),
            "parse errors: {:?}",
            parsed.errors
        );
        lower(&parsed.network.expect("no network"))
    }

    fn lower_ok(source: &str) -> Model {
        let result = lower_source(source);
        assert!(
            !has_errors(&result.diagnostics),
            "unexpected errors: {:#?}",
            result.diagnostics
        );
        result.model.expect("model absent despite no errors")
    }

    fn lower_err(source: &str) -> Vec<Diagnostic> {
        let result = lower_source(source);
        assert!(
            has_errors(&result.diagnostics),
            "expected errors, got none"
        );
        assert!(result.model.is_none());
        result.diagnostics
    }

    const DIAMOND: &str = r#"
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

    #[test]
    fn diamond_lowers_and_validates() {
        let m = lower_ok(DIAMOND);
        assert_eq!(m.name, "diamond");
        assert_eq!(m.num_processes(), 4);
        assert_eq!(m.inputs, vec![PortRef::new("c1", "in")]);
        assert_eq!(m.outputs, vec![PortRef::new("zx", "out")]);
        assert_eq!(
            m.connected_to(&PortRef::new("c1", "out1")),
            Some(PortRef::new("m1", "in"))
        );
        assert!(m.validate().is_empty());
    }

    #[test]
    fn map_gets_function_and_ports() {
        let m = lower_ok(DIAMOND);
        let p = m.process(&Id::from("m1")).unwrap();
        let ProcessKind::Map { function } = &p.kind else {
            panic!("expected Map");
        };
        assert_eq!(function.name, "double");
        assert_eq!(function.body, "{ return x * 2; }");
        assert_eq!(p.in_ports.len(), 1);
        assert_eq!(p.out_ports.len(), 1);
    }

    #[test]
    fn zipwith_arity_from_return_style_function() {
        let m = lower_ok(
            r#"
network n {
  fun add(a: int, b: int) -> int %{ return a + b; }%
  zipwith z = add;
  inputs z.in1, z.in2;
  outputs z.out;
}
"#,
        );
        let p = m.process(&Id::from("z")).unwrap();
        assert!(matches!(p.kind, ProcessKind::ZipWithN { .. }));
        assert_eq!(p.in_ports.len(), 2);
        assert_eq!(p.in_ports[0].id, Id::from("in1"));
    }

    #[test]
    fn zipwith_arity_from_out_param_style_function() {
        // void return: last parameter is the output
        let m = lower_ok(
            r#"
network n {
  fun add3(a: int, b: int, c: int, result: int) -> void %{ result = a + b + c; }%
  zipwith z = add3;
  inputs z.in1, z.in2, z.in3;
  outputs z.out;
}
"#,
        );
        let p = m.process(&Id::from("z")).unwrap();
        assert_eq!(p.in_ports.len(), 3);
    }

    #[test]
    fn zipwith_one_input_stays_zipwith() {
        // degenerate single-input zipwith is normalized by rewriting,
        // not by the frontend
        let m = lower_ok(
            r#"
network n {
  fun id(x: int) -> int %{ return x; }%
  zipwith z = id;
  inputs z.in1;
  outputs z.out;
}
"#,
        );
        let p = m.process(&Id::from("z")).unwrap();
        assert!(matches!(p.kind, ProcessKind::ZipWithN { .. }));
        assert_eq!(p.in_ports.len(), 1);
    }

    #[test]
    fn parallelmap_count_and_single_stage() {
        let m = lower_ok(
            r#"
network n {
  fun double(x: int) -> int %{ return x * 2; }%
  parallelmap pm = 4 * double;
  inputs pm.in;
  outputs pm.out;
}
"#,
        );
        let p = m.process(&Id::from("pm")).unwrap();
        let ProcessKind::ParallelMap { count, functions } = &p.kind else {
            panic!("expected ParallelMap");
        };
        assert_eq!(*count, 4);
        assert_eq!(functions.len(), 1);
    }

    #[test]
    fn delay_carries_initial_value() {
        let m = lower_ok(
            r#"
network n {
  delay d init "42";
  inputs d.in;
  outputs d.out;
}
"#,
        );
        let p = m.process(&Id::from("d")).unwrap();
        assert!(matches!(&p.kind, ProcessKind::Delay { initial_value } if initial_value == "42"));
    }

    #[test]
    fn unknown_function_is_error() {
        let diags = lower_err("network n { map m = missing; inputs m.in; outputs m.out; }");
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("unknown function \"missing\"")));
    }

    #[test]
    fn duplicate_function_is_error() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  fun f(x: int) -> int %{ return x; }%
  map m = f;
  inputs m.in;
  outputs m.out;
}
"#,
        );
        assert!(diags.iter().any(|d| d.to_string().contains("declared twice")));
    }

    #[test]
    fn duplicate_process_is_error() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  map m = f;
  map m = f;
  inputs m.in;
  outputs m.out;
}
"#,
        );
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("already exists")));
    }

    #[test]
    fn unknown_type_is_error() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: quux) -> int %{ return 0; }%
  map m = f;
  inputs m.in;
  outputs m.out;
}
"#,
        );
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("unknown type \"quux\"")));
    }

    #[test]
    fn void_parameter_is_error() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: void) -> int %{ return 0; }%
  map m = f;
  inputs m.in;
  outputs m.out;
}
"#,
        );
        assert!(diags.iter().any(|d| d.to_string().contains("void")));
    }

    #[test]
    fn connecting_a_port_twice_is_rejected() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  map a = f;
  map b = f;
  map c = f;
  connect a.out -> b.in;
  connect a.out -> c.in;
  inputs a.in;
  outputs b.out, c.out;
}
"#,
        );
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("already connected")));
        // code E0100, with the offending process attached
        assert!(diags.iter().any(|d| d.to_string().contains("E0100")));
    }

    #[test]
    fn unknown_connect_target_is_error() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  map a = f;
  connect a.out -> ghost.in;
  inputs a.in;
}
"#,
        );
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("unknown process \"ghost\"")));
    }

    #[test]
    fn unconnected_interior_port_fails_validation() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  map a = f;
  map b = f;
  connect a.out -> b.in;
  inputs a.in;
}
"#,
        );
        // b.out is neither connected nor listed as a network output
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("unconnected and not a network")));
    }

    #[test]
    fn zero_fanout_is_error() {
        let diags = lower_err("network n { copy c -> 0; inputs c.in; }");
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("fan-out must be at least 1")));
    }

    #[test]
    fn feedback_without_delay_fails_validation() {
        let diags = lower_err(
            r#"
network n {
  fun f(x: int) -> int %{ return x; }%
  fun add(a: int, b: int) -> int %{ return a + b; }%
  zipwith z = add;
  copy c -> 2;
  connect z.out -> c.in;
  connect c.out2 -> z.in2;
  inputs z.in1;
  outputs c.out1;
}
"#,
        );
        assert!(diags
            .iter()
            .any(|d| d.to_string().contains("cycle without a delay")));
    }

    #[test]
    fn feedback_through_delay_is_accepted() {
        let m = lower_ok(
            r#"
network accumulate {
  fun add(a: int, b: int) -> int %{ return a + b; }%
  zipwith z = add;
  copy c -> 2;
  delay d init "0";
  connect z.out -> c.in;
  connect c.out2 -> d.in;
  connect d.out -> z.in2;
  inputs z.in1;
  outputs c.out1;
}
"#,
        );
        assert!(m.validate().is_empty());
    }
}
