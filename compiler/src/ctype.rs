// ctype.rs — C-language type, variable, and function value objects
//
// A small structural description of the procedural target language: data
// types (base type, const/pointer/array flags, optional fixed array size),
// named variables, and function signatures with body text. Used both by the
// model (functions attached to processes) and by the synthesizer (generated
// declarations).
//
// Array sizes are mutable post-construction: they are discovered late by
// structural propagation over the network, not declared up front.
//
// Preconditions: array sizes passed to setters are >= 1 (callers validate
//   user input before construction).
// Postconditions: rendered type strings are valid C declarator fragments.
// Failure modes: rendering a local array variable with unknown size yields
//   `None`; all other operations are total.
// Side effects: none.

use serde::Serialize;
use std::fmt;

// ── Base types ─────────────────────────────────────────────────────────────

/// The closed set of C base types the synthesizer can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CBaseType {
    Char,
    UnsignedChar,
    ShortInt,
    UnsignedShortInt,
    Int,
    UnsignedInt,
    LongInt,
    UnsignedLongInt,
    Float,
    Double,
    LongDouble,
    Void,
}

impl CBaseType {
    /// The canonical C spelling.
    pub fn as_c(&self) -> &'static str {
        match self {
            CBaseType::Char => "char",
            CBaseType::UnsignedChar => "unsigned char",
            CBaseType::ShortInt => "short int",
            CBaseType::UnsignedShortInt => "unsigned short int",
            CBaseType::Int => "int",
            CBaseType::UnsignedInt => "unsigned int",
            CBaseType::LongInt => "long int",
            CBaseType::UnsignedLongInt => "unsigned long int",
            CBaseType::Float => "float",
            CBaseType::Double => "double",
            CBaseType::LongDouble => "long double",
            CBaseType::Void => "void",
        }
    }

    /// Parse a C type spelling, accepting the usual synonym forms
    /// (`short` for `short int`, `unsigned long` for `unsigned long int`, ...).
    pub fn parse(s: &str) -> Option<CBaseType> {
        match s.trim() {
            "char" => Some(CBaseType::Char),
            "unsigned char" => Some(CBaseType::UnsignedChar),
            "short int" | "short" => Some(CBaseType::ShortInt),
            "unsigned short int" | "unsigned short" => Some(CBaseType::UnsignedShortInt),
            "int" => Some(CBaseType::Int),
            "unsigned int" | "unsigned" => Some(CBaseType::UnsignedInt),
            "long int" | "long" => Some(CBaseType::LongInt),
            "unsigned long int" | "unsigned long" => Some(CBaseType::UnsignedLongInt),
            "float" => Some(CBaseType::Float),
            "double" => Some(CBaseType::Double),
            "long double" => Some(CBaseType::LongDouble),
            "void" => Some(CBaseType::Void),
            _ => None,
        }
    }
}

impl fmt::Display for CBaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_c())
    }
}

// ── Data type ──────────────────────────────────────────────────────────────

/// A C data type: base type plus const/pointer/array flags and an optional
/// fixed array size.
///
/// An array may exist with its size still unknown (`size() == None`) until
/// the synthesizer's propagation pass resolves it. Setting a size of 1
/// demotes the type to a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CDataType {
    base: CBaseType,
    is_array: bool,
    array_size: Option<usize>,
    is_pointer: bool,
    is_const: bool,
}

impl CDataType {
    /// A plain scalar type.
    pub fn scalar(base: CBaseType) -> Self {
        CDataType {
            base,
            is_array: false,
            array_size: None,
            is_pointer: false,
            is_const: false,
        }
    }

    /// An array type with unknown size.
    pub fn array(base: CBaseType) -> Self {
        CDataType {
            base,
            is_array: true,
            array_size: None,
            is_pointer: false,
            is_const: false,
        }
    }

    /// An array type with a fixed size. A size of 1 yields a scalar.
    pub fn array_sized(base: CBaseType, size: usize) -> Self {
        let mut t = CDataType::array(base);
        t.set_array_size(size);
        t
    }

    pub fn base(&self) -> CBaseType {
        self.base
    }

    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Toggle array-ness. Turning array-ness on or off discards any known
    /// size (it must be rediscovered by propagation).
    pub fn set_is_array(&mut self, is_array: bool) {
        self.is_array = is_array;
        self.array_size = None;
    }

    /// The element count: `Some(1)` for scalars, the fixed size for sized
    /// arrays, `None` for arrays whose size is not yet known.
    pub fn size(&self) -> Option<usize> {
        if self.is_array {
            self.array_size
        } else {
            Some(1)
        }
    }

    /// Fix the array size. A size of 1 demotes the type to a scalar.
    pub fn set_array_size(&mut self, size: usize) {
        debug_assert!(size >= 1, "array size must be at least 1");
        self.is_array = size != 1;
        self.array_size = Some(size);
    }

    pub fn is_pointer(&self) -> bool {
        self.is_pointer
    }

    pub fn set_is_pointer(&mut self, is_pointer: bool) {
        self.is_pointer = is_pointer;
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn set_is_const(&mut self, is_const: bool) {
        self.is_const = is_const;
    }

    /// This type with the const flag cleared, for type-compatibility checks.
    pub fn without_const(&self) -> CDataType {
        let mut t = self.clone();
        t.is_const = false;
        t
    }

    /// True if the base types agree, ignoring const/pointer/array dressing.
    pub fn same_base(&self, other: &CDataType) -> bool {
        self.base == other.base
    }

    /// Type string for a variable declaration: `const? base *?`.
    /// Array-ness is expressed by the declarator suffix, not here.
    pub fn variable_type_string(&self) -> String {
        let mut s = String::new();
        if self.is_const {
            s.push_str("const ");
        }
        s.push_str(self.base.as_c());
        if self.is_pointer {
            s.push('*');
        }
        s
    }

    /// Type string for a function input parameter: arrays decay to pointers.
    pub fn param_type_string(&self) -> String {
        let mut s = String::new();
        if self.is_const {
            s.push_str("const ");
        }
        s.push_str(self.base.as_c());
        if self.is_array {
            s.push('*');
        }
        if self.is_pointer {
            s.push('*');
        }
        s
    }

    /// Type string for a function return type (same rendering as parameters).
    pub fn return_type_string(&self) -> String {
        self.param_type_string()
    }
}

impl fmt::Display for CDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variable_type_string())?;
        if self.is_array {
            match self.array_size {
                Some(n) => write!(f, "[{}]", n)?,
                None => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

// ── Variable ───────────────────────────────────────────────────────────────

/// A named, typed variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CVariable {
    pub name: String,
    pub data_type: CDataType,
}

impl CVariable {
    pub fn new(name: impl Into<String>, data_type: CDataType) -> Self {
        CVariable {
            name: name.into(),
            data_type,
        }
    }

    /// Declaration as a local or static variable: `int x`, `float y[16]`.
    /// `None` when the variable is an array of unknown size.
    pub fn local_decl(&self) -> Option<String> {
        let mut s = format!("{} {}", self.data_type.variable_type_string(), self.name);
        if self.data_type.is_array() {
            let size = self.data_type.size()?;
            s.push_str(&format!("[{}]", size));
        }
        Some(s)
    }

    /// Declaration as a function input parameter: `const int* x`.
    pub fn param_decl(&self) -> String {
        format!("{} {}", self.data_type.param_type_string(), self.name)
    }

    /// Declaration as a pointer to this variable's type: `int* x`.
    pub fn pointer_decl(&self) -> String {
        format!("{}* {}", self.data_type.variable_type_string(), self.name)
    }
}

// ── Function ───────────────────────────────────────────────────────────────

/// A named C function: return type, ordered input parameters, body text, and
/// an optional declaration prefix line.
///
/// The body is stored with its enclosing braces. Two functions with the same
/// signature and body are interchangeable; the synthesizer relies on this for
/// duplicate elimination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CFunction {
    pub name: String,
    pub return_type: CDataType,
    pub params: Vec<CVariable>,
    pub body: String,
    pub prefix: String,
}

impl CFunction {
    pub fn new(
        name: impl Into<String>,
        return_type: CDataType,
        params: Vec<CVariable>,
        body: impl Into<String>,
    ) -> Self {
        CFunction {
            name: name.into(),
            return_type,
            params,
            body: body.into(),
            prefix: String::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// `ret name(const int* a, float b)` with no trailing semicolon or body.
    pub fn signature(&self) -> String {
        let mut s = format!("{} {}(", self.return_type.return_type_string(), self.name);
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            s.push_str(&p.param_decl());
        }
        s.push(')');
        s
    }

    /// Forward declaration: signature plus semicolon.
    pub fn prototype(&self) -> String {
        format!("{};", self.signature())
    }

    /// Full definition: optional prefix line, signature, body.
    pub fn definition(&self) -> String {
        let mut s = String::new();
        if !self.prefix.is_empty() {
            s.push_str(&self.prefix);
            s.push('\n');
        }
        s.push_str(&self.signature());
        s.push(' ');
        s.push_str(&self.body);
        s
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_type_parsing_accepts_synonyms() {
        assert_eq!(CBaseType::parse("int"), Some(CBaseType::Int));
        assert_eq!(CBaseType::parse("short"), Some(CBaseType::ShortInt));
        assert_eq!(CBaseType::parse("short int"), Some(CBaseType::ShortInt));
        assert_eq!(
            CBaseType::parse("unsigned long"),
            Some(CBaseType::UnsignedLongInt)
        );
        assert_eq!(CBaseType::parse("long double"), Some(CBaseType::LongDouble));
        assert_eq!(CBaseType::parse("quux"), None);
    }

    #[test]
    fn scalar_size_is_one() {
        let t = CDataType::scalar(CBaseType::Int);
        assert!(!t.is_array());
        assert_eq!(t.size(), Some(1));
    }

    #[test]
    fn unsized_array_has_no_size() {
        let t = CDataType::array(CBaseType::Float);
        assert!(t.is_array());
        assert_eq!(t.size(), None);
    }

    #[test]
    fn size_one_demotes_to_scalar() {
        let mut t = CDataType::array(CBaseType::Int);
        t.set_array_size(1);
        assert!(!t.is_array());
        assert_eq!(t.size(), Some(1));
    }

    #[test]
    fn set_is_array_discards_size() {
        let mut t = CDataType::array_sized(CBaseType::Int, 8);
        assert_eq!(t.size(), Some(8));
        t.set_is_array(true);
        assert_eq!(t.size(), None);
    }

    #[test]
    fn variable_type_string_renders_const_and_pointer() {
        let mut t = CDataType::scalar(CBaseType::Float);
        assert_eq!(t.variable_type_string(), "float");
        t.set_is_const(true);
        assert_eq!(t.variable_type_string(), "const float");
        t.set_is_pointer(true);
        assert_eq!(t.variable_type_string(), "const float*");
    }

    #[test]
    fn param_type_string_decays_arrays() {
        let mut t = CDataType::array_sized(CBaseType::Int, 4);
        t.set_is_const(true);
        assert_eq!(t.param_type_string(), "const int*");
        // variable rendering leaves the array to the declarator suffix
        assert_eq!(t.variable_type_string(), "const int");
    }

    #[test]
    fn equality_includes_array_size() {
        let a = CDataType::array_sized(CBaseType::Int, 4);
        let b = CDataType::array_sized(CBaseType::Int, 8);
        assert_ne!(a, b);
        assert_eq!(a, CDataType::array_sized(CBaseType::Int, 4));
    }

    #[test]
    fn without_const_compares_equal() {
        let mut a = CDataType::scalar(CBaseType::Int);
        a.set_is_const(true);
        let b = CDataType::scalar(CBaseType::Int);
        assert_ne!(a, b);
        assert_eq!(a.without_const(), b);
    }

    #[test]
    fn local_decl_forms() {
        let v = CVariable::new("x", CDataType::scalar(CBaseType::Int));
        assert_eq!(v.local_decl().as_deref(), Some("int x"));

        let v = CVariable::new("buf", CDataType::array_sized(CBaseType::Float, 16));
        assert_eq!(v.local_decl().as_deref(), Some("float buf[16]"));

        let v = CVariable::new("unsized", CDataType::array(CBaseType::Float));
        assert_eq!(v.local_decl(), None);
    }

    #[test]
    fn param_decl_forms() {
        let mut t = CDataType::array(CBaseType::Float);
        t.set_is_const(true);
        let v = CVariable::new("in", t);
        assert_eq!(v.param_decl(), "const float* in");
    }

    #[test]
    fn function_signature_and_definition() {
        let f = CFunction::new(
            "double_it",
            CDataType::scalar(CBaseType::Int),
            vec![CVariable::new("x", CDataType::scalar(CBaseType::Int))],
            "{ return x * 2; }",
        );
        assert_eq!(f.signature(), "int double_it(int x)");
        assert_eq!(f.prototype(), "int double_it(int x);");
        assert_eq!(f.definition(), "int double_it(int x) { return x * 2; }");
    }

    #[test]
    fn function_definition_with_prefix() {
        let f = CFunction::new(
            "f",
            CDataType::scalar(CBaseType::Void),
            vec![],
            "{}",
        )
        .with_prefix("static");
        assert_eq!(f.definition(), "static\nvoid f() {}");
    }
}
