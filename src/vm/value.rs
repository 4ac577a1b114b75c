use std::fmt;
use std::rc::Rc;

use super::Class;
use super::builtins::BuiltinClassId;
use super::heap::GcRef;

/// The class a value dispatches operators and methods through.
///
/// A value refers to a built-in class or a user class, never both.
#[derive(Clone)]
pub enum ClassRef {
    Builtin(BuiltinClassId),
    User(Rc<Class>),
}

impl ClassRef {
    pub fn name(&self) -> &str {
        match self {
            ClassRef::Builtin(id) => id.name(),
            ClassRef::User(class) => &class.name,
        }
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassRef::Builtin(id) => write!(f, "Builtin({})", id.name()),
            ClassRef::User(class) => write!(f, "User({})", class.name),
        }
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClassRef::Builtin(a), ClassRef::Builtin(b)) => a == b,
            (ClassRef::User(a), ClassRef::User(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Payload of a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Uninit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Byte(u8),
    Str(GcRef),
    Array(GcRef),
    Hash(GcRef),
    Object(GcRef),
}

/// A runtime value: a tagged payload plus the class it dispatches through.
///
/// Primitive literals always carry their built-in class so operator
/// dispatch never has to special-case them.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub class: Option<ClassRef>,
}

impl Default for Value {
    fn default() -> Self {
        Value::uninit()
    }
}

impl Value {
    pub fn uninit() -> Self {
        Value {
            kind: ValueKind::Uninit,
            class: None,
        }
    }

    pub fn bool(b: bool) -> Self {
        Self::builtin(ValueKind::Bool(b), BuiltinClassId::Boolean)
    }

    pub fn int(n: i64) -> Self {
        Self::builtin(ValueKind::Int(n), BuiltinClassId::Integer)
    }

    pub fn float(f: f64) -> Self {
        Self::builtin(ValueKind::Float(f), BuiltinClassId::Float)
    }

    pub fn string(r: GcRef) -> Self {
        Self::builtin(ValueKind::Str(r), BuiltinClassId::String)
    }

    pub fn array(r: GcRef) -> Self {
        Self::builtin(ValueKind::Array(r), BuiltinClassId::Array)
    }

    pub fn hash(r: GcRef) -> Self {
        Self::builtin(ValueKind::Hash(r), BuiltinClassId::Hash)
    }

    pub fn object(r: GcRef, class: Rc<Class>) -> Self {
        Value {
            kind: ValueKind::Object(r),
            class: Some(ClassRef::User(class)),
        }
    }

    fn builtin(kind: ValueKind, id: BuiltinClassId) -> Self {
        Value {
            kind,
            class: Some(ClassRef::Builtin(id)),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Float(f) => Some(f),
            ValueKind::Int(n) => Some(n as f64),
            _ => None,
        }
    }

    /// Heap handle for composite values.
    pub fn as_ref(&self) -> Option<GcRef> {
        match self.kind {
            ValueKind::Str(r) | ValueKind::Array(r) | ValueKind::Hash(r) | ValueKind::Object(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    /// Handle of an array or class instance; the only kinds whose cells the
    /// collector descends into.
    pub fn as_traced_ref(&self) -> Option<GcRef> {
        match self.kind {
            ValueKind::Array(r) | ValueKind::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn user_class(&self) -> Option<&Rc<Class>> {
        match &self.class {
            Some(ClassRef::User(class)) => Some(class),
            _ => None,
        }
    }

    pub fn builtin_class(&self) -> Option<BuiltinClassId> {
        match &self.class {
            Some(ClassRef::Builtin(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Uninit => "uninit",
            ValueKind::Bool(_) => "boolean",
            ValueKind::Int(_) => "integer",
            ValueKind::Float(_) => "float",
            ValueKind::Char(_) => "char",
            ValueKind::Byte(_) => "byte",
            ValueKind::Str(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Hash(_) => "hash",
            ValueKind::Object(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ValueKind::Uninit => write!(f, "Nil"),
            ValueKind::Bool(b) => write!(f, "{}", b),
            ValueKind::Int(n) => write!(f, "{}", n),
            ValueKind::Float(x) => write!(f, "{}", format_float(x)),
            ValueKind::Char(c) => write!(f, "{}", c),
            ValueKind::Byte(b) => write!(f, "{}", b),
            ValueKind::Str(r) | ValueKind::Array(r) | ValueKind::Hash(r) => {
                write!(f, "<{} {}>", self.type_name(), r.index())
            }
            ValueKind::Object(r) => match &self.class {
                Some(class) => write!(f, "<{} {}>", class.name(), r.index()),
                None => write!(f, "<object {}>", r.index()),
            },
        }
    }
}

/// Format a float with six significant digits, dropping trailing zeros and
/// switching to exponent notation for very large or small magnitudes.
pub fn format_float(x: f64) -> String {
    if x == 0.0 || !x.is_finite() {
        return format!("{}", x);
    }
    const PRECISION: i32 = 6;
    let exponent = x.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= PRECISION {
        let formatted = format!("{:.*e}", (PRECISION - 1) as usize, x);
        match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let mantissa = trim_fraction(mantissa);
                let exp: i32 = exp.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => formatted,
        }
    } else {
        let decimals = (PRECISION - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, x)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
