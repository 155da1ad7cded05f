#![forbid(unsafe_code)]

use crate::types::Type;

/// How a parameter or local binds its storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// Plain by-value binding.
    None,
    /// Writable reference.
    Ref,
    /// Output reference: the callee must assign it, the caller cannot rely
    /// on its incoming value.
    Out,
    /// Read-only reference.
    In,
}

impl RefKind {
    pub fn is_by_ref(self) -> bool {
        !matches!(self, RefKind::None)
    }

    /// `ref` and `out` bindings, which the callee may write through.
    pub fn is_writable_ref(self) -> bool {
        matches!(self, RefKind::Ref | RefKind::Out)
    }

    pub fn display(self) -> &'static str {
        match self {
            RefKind::None => "by value",
            RefKind::Ref => "ref",
            RefKind::Out => "out",
            RefKind::In => "in",
        }
    }
}

/// Explicit scope-restriction annotation on a parameter or local, forcing
/// its escape scope to the current function instead of the inferred wider
/// default. `Reference` pins only the reference channel and is honored by
/// the modern rule set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pinning {
    None,
    Value,
    Reference,
}

/// Which escape-analysis rule set applies to a member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeRules {
    /// The original coarse rules: every argument contributes, mixing uses a
    /// single widest destination.
    Legacy,
    /// Pinning-aware rules: only channels the member could return
    /// contribute, mixing is pairwise by escape class.
    Modern,
}

macro_rules! symbol_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);
    };
}

symbol_id!(LocalId);
symbol_id!(ParamId);
symbol_id!(FieldId);
symbol_id!(PropertyId);
symbol_id!(EventId);
symbol_id!(MethodId);

#[derive(Clone, Debug)]
pub struct LocalSymbol {
    pub name: String,
    pub ty: Type,
    pub is_mutable: bool,
    pub ref_kind: RefKind,
    pub pinning: Pinning,
}

impl LocalSymbol {
    pub fn new(name: &str, ty: Type) -> Self {
        LocalSymbol {
            name: name.to_string(),
            ty,
            is_mutable: true,
            ref_kind: RefKind::None,
            pinning: Pinning::None,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.is_mutable = false;
        self
    }

    pub fn by_ref(mut self, kind: RefKind) -> Self {
        self.ref_kind = kind;
        self
    }

    pub fn pinned(mut self, pinning: Pinning) -> Self {
        self.pinning = pinning;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ParamSymbol {
    pub name: String,
    pub ty: Type,
    pub ref_kind: RefKind,
    pub pinning: Pinning,
    pub has_default: bool,
    pub is_variadic: bool,
}

impl ParamSymbol {
    pub fn new(name: &str, ty: Type) -> Self {
        ParamSymbol {
            name: name.to_string(),
            ty,
            ref_kind: RefKind::None,
            pinning: Pinning::None,
            has_default: false,
            is_variadic: false,
        }
    }

    pub fn by_ref(mut self, kind: RefKind) -> Self {
        self.ref_kind = kind;
        self
    }

    pub fn pinned(mut self, pinning: Pinning) -> Self {
        self.pinning = pinning;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct FieldSymbol {
    pub name: String,
    pub ty: Type,
    /// Name of the type declaring this field; readonly writes are only legal
    /// inside that type's constructors and initializers.
    pub containing_type: String,
    pub is_readonly: bool,
    pub is_static: bool,
    /// A `ref` field (modern rules only): its storage identity follows the
    /// receiver's value, not the receiver's storage.
    pub is_ref_field: bool,
    /// Fixed-length buffer embedded in its containing struct.
    pub is_fixed_buffer: bool,
}

impl FieldSymbol {
    pub fn new(name: &str, ty: Type, containing_type: &str) -> Self {
        FieldSymbol {
            name: name.to_string(),
            ty,
            containing_type: containing_type.to_string(),
            is_readonly: false,
            is_static: false,
            is_ref_field: false,
            is_fixed_buffer: false,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.is_readonly = true;
        self
    }

    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn ref_field(mut self) -> Self {
        self.is_ref_field = true;
        self
    }

    pub fn fixed_buffer(mut self) -> Self {
        self.is_fixed_buffer = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct MethodSymbol {
    pub name: String,
    pub params: Vec<ParamId>,
    pub return_type: Type,
    pub return_ref_kind: RefKind,
    pub is_static: bool,
    /// Static function invoked instance-style; its first parameter is the
    /// folded receiver.
    pub is_extension: bool,
    /// Promises not to mutate the receiver; the receiver binds as a
    /// read-only reference.
    pub is_readonly: bool,
    pub is_accessible: bool,
    /// Setter restricted to construction contexts.
    pub is_init_only: bool,
    pub escape_rules: EscapeRules,
}

impl MethodSymbol {
    pub fn new(name: &str, return_type: Type) -> Self {
        MethodSymbol {
            name: name.to_string(),
            params: Vec::new(),
            return_type,
            return_ref_kind: RefKind::None,
            is_static: false,
            is_extension: false,
            is_readonly: false,
            is_accessible: true,
            is_init_only: false,
            escape_rules: EscapeRules::Modern,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamId>) -> Self {
        self.params = params;
        self
    }

    pub fn returns_ref(mut self) -> Self {
        self.return_ref_kind = RefKind::Ref;
        self
    }

    pub fn returns_ref_readonly(mut self) -> Self {
        self.return_ref_kind = RefKind::In;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn extension(mut self) -> Self {
        self.is_static = true;
        self.is_extension = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.is_readonly = true;
        self
    }

    pub fn inaccessible(mut self) -> Self {
        self.is_accessible = false;
        self
    }

    pub fn init_only(mut self) -> Self {
        self.is_init_only = true;
        self
    }

    pub fn legacy_rules(mut self) -> Self {
        self.escape_rules = EscapeRules::Legacy;
        self
    }
}

#[derive(Clone, Debug)]
pub struct PropertySymbol {
    pub name: String,
    pub ty: Type,
    /// Indexer parameters; empty for plain properties.
    pub params: Vec<ParamId>,
    pub return_ref_kind: RefKind,
    pub get_method: Option<MethodId>,
    pub set_method: Option<MethodId>,
    pub is_static: bool,
}

impl PropertySymbol {
    pub fn new(name: &str, ty: Type) -> Self {
        PropertySymbol {
            name: name.to_string(),
            ty,
            params: Vec::new(),
            return_ref_kind: RefKind::None,
            get_method: None,
            set_method: None,
            is_static: false,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamId>) -> Self {
        self.params = params;
        self
    }

    pub fn returns_ref(mut self) -> Self {
        self.return_ref_kind = RefKind::Ref;
        self
    }

    pub fn returns_ref_readonly(mut self) -> Self {
        self.return_ref_kind = RefKind::In;
        self
    }

    pub fn with_getter(mut self, getter: MethodId) -> Self {
        self.get_method = Some(getter);
        self
    }

    pub fn with_setter(mut self, setter: MethodId) -> Self {
        self.set_method = Some(setter);
        self
    }

    pub fn static_property(mut self) -> Self {
        self.is_static = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct EventSymbol {
    pub name: String,
    pub containing_type: String,
    /// Field-like events behave as fields inside their containing type.
    pub is_field_like: bool,
    pub is_static: bool,
}

impl EventSymbol {
    pub fn new(name: &str, containing_type: &str) -> Self {
        EventSymbol {
            name: name.to_string(),
            containing_type: containing_type.to_string(),
            is_field_like: false,
            is_static: false,
        }
    }

    pub fn field_like(mut self) -> Self {
        self.is_field_like = true;
        self
    }

    pub fn static_event(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// What kind of member the current analysis unit is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Function,
    Constructor,
    /// Field or property initializer context.
    Initializer,
}

/// Identity of the member whose body is being analyzed, consulted by the
/// readonly-field, init-only, and receiver-writability rules.
#[derive(Clone, Debug)]
pub struct MemberContext {
    pub containing_type: String,
    pub kind: MemberKind,
    pub is_static: bool,
    /// The member promises not to mutate its receiver, so `this` is
    /// read-only inside it.
    pub is_readonly: bool,
}

impl MemberContext {
    pub fn function(containing_type: &str) -> Self {
        MemberContext {
            containing_type: containing_type.to_string(),
            kind: MemberKind::Function,
            is_static: false,
            is_readonly: false,
        }
    }

    pub fn constructor(containing_type: &str) -> Self {
        MemberContext {
            containing_type: containing_type.to_string(),
            kind: MemberKind::Constructor,
            is_static: false,
            is_readonly: false,
        }
    }

    pub fn initializer(containing_type: &str) -> Self {
        MemberContext {
            containing_type: containing_type.to_string(),
            kind: MemberKind::Initializer,
            is_static: false,
            is_readonly: false,
        }
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn readonly_member(mut self) -> Self {
        self.is_readonly = true;
        self
    }

    /// Construction contexts may write readonly and init-only members of
    /// their own type through `this`/`base`.
    pub fn is_construction(&self) -> bool {
        matches!(self.kind, MemberKind::Constructor | MemberKind::Initializer)
    }
}

/// Arena of resolved symbols shared by every analysis unit of a program.
/// Expressions refer into it by id; the checker only ever reads it.
#[derive(Debug, Default)]
pub struct Symbols {
    locals: Vec<LocalSymbol>,
    params: Vec<ParamSymbol>,
    fields: Vec<FieldSymbol>,
    properties: Vec<PropertySymbol>,
    events: Vec<EventSymbol>,
    methods: Vec<MethodSymbol>,
}

impl Symbols {
    pub fn new() -> Self {
        Symbols::default()
    }

    pub fn add_local(&mut self, local: LocalSymbol) -> LocalId {
        self.locals.push(local);
        LocalId(self.locals.len() as u32 - 1)
    }

    pub fn add_param(&mut self, param: ParamSymbol) -> ParamId {
        self.params.push(param);
        ParamId(self.params.len() as u32 - 1)
    }

    pub fn add_params(&mut self, params: Vec<ParamSymbol>) -> Vec<ParamId> {
        params.into_iter().map(|p| self.add_param(p)).collect()
    }

    pub fn add_field(&mut self, field: FieldSymbol) -> FieldId {
        self.fields.push(field);
        FieldId(self.fields.len() as u32 - 1)
    }

    pub fn add_property(&mut self, property: PropertySymbol) -> PropertyId {
        self.properties.push(property);
        PropertyId(self.properties.len() as u32 - 1)
    }

    pub fn add_event(&mut self, event: EventSymbol) -> EventId {
        self.events.push(event);
        EventId(self.events.len() as u32 - 1)
    }

    pub fn add_method(&mut self, method: MethodSymbol) -> MethodId {
        self.methods.push(method);
        MethodId(self.methods.len() as u32 - 1)
    }

    pub fn local(&self, id: LocalId) -> &LocalSymbol {
        &self.locals[id.0 as usize]
    }

    pub fn param(&self, id: ParamId) -> &ParamSymbol {
        &self.params[id.0 as usize]
    }

    pub fn field(&self, id: FieldId) -> &FieldSymbol {
        &self.fields[id.0 as usize]
    }

    pub fn property(&self, id: PropertyId) -> &PropertySymbol {
        &self.properties[id.0 as usize]
    }

    pub fn event(&self, id: EventId) -> &EventSymbol {
        &self.events[id.0 as usize]
    }

    pub fn method(&self, id: MethodId) -> &MethodSymbol {
        &self.methods[id.0 as usize]
    }
}
