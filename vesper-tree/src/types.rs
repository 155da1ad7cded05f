#![forbid(unsafe_code)]

/// What kind of nominal type a `Type::Named` refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedKind {
    /// A value type. `is_view` marks it stack-confined: its values may wrap
    /// raw stack memory and must not outlive the producing activation.
    Struct { is_view: bool },
    /// A heap-allocated reference type.
    Class,
}

/// The resolved type of a bound expression.
///
/// The checker only reads coarse facts from types (view-ness, value-ness,
/// pointer-ness); full type structure belongs to the type system proper.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Unit,
    Bool,
    Int,
    Uint,
    Float,
    Str,
    Char,
    Named { name: String, kind: NamedKind },
    /// The built-in view over a contiguous region (stack or borrowed).
    Buffer(Box<Type>),
    Array(Box<Type>),
    Pointer(Box<Type>),
    Tuple(Vec<Type>),
    FnPtr { params: Vec<Type>, ret: Box<Type> },
    Error,
}

impl Type {
    pub fn view_struct(name: &str) -> Type {
        Type::Named {
            name: name.to_string(),
            kind: NamedKind::Struct { is_view: true },
        }
    }

    pub fn plain_struct(name: &str) -> Type {
        Type::Named {
            name: name.to_string(),
            kind: NamedKind::Struct { is_view: false },
        }
    }

    pub fn class(name: &str) -> Type {
        Type::Named {
            name: name.to_string(),
            kind: NamedKind::Class,
        }
    }

    pub fn buffer(elem: Type) -> Type {
        Type::Buffer(Box::new(elem))
    }

    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    /// Stack-confined: values of this type may not outlive the activation
    /// that produced them.
    pub fn is_view(&self) -> bool {
        match self {
            Type::Buffer(_) => true,
            Type::Named {
                kind: NamedKind::Struct { is_view },
                ..
            } => *is_view,
            Type::Tuple(elems) => elems.iter().any(Type::is_view),
            _ => false,
        }
    }

    pub fn is_value_type(&self) -> bool {
        match self {
            Type::Unit
            | Type::Bool
            | Type::Int
            | Type::Uint
            | Type::Float
            | Type::Char
            | Type::Buffer(_)
            | Type::Pointer(_)
            | Type::Tuple(_)
            | Type::FnPtr { .. } => true,
            Type::Named { kind, .. } => matches!(kind, NamedKind::Struct { .. }),
            Type::Str | Type::Array(_) | Type::Error => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Unit)
    }

    pub fn display(&self) -> String {
        match self {
            Type::Unit => "unit".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Int => "int".to_string(),
            Type::Uint => "uint".to_string(),
            Type::Float => "float".to_string(),
            Type::Str => "str".to_string(),
            Type::Char => "char".to_string(),
            Type::Named { name, .. } => name.clone(),
            Type::Buffer(elem) => format!("buffer<{}>", elem.display()),
            Type::Array(elem) => format!("[{}]", elem.display()),
            Type::Pointer(elem) => format!("*{}", elem.display()),
            Type::Tuple(elems) => {
                let inner: Vec<String> = elems.iter().map(Type::display).collect();
                format!("({})", inner.join(", "))
            }
            Type::FnPtr { params, ret } => {
                let inner: Vec<String> = params.iter().map(Type::display).collect();
                format!("fn({}) -> {}", inner.join(", "), ret.display())
            }
            Type::Error => "<error>".to_string(),
        }
    }
}
