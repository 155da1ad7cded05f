#![forbid(unsafe_code)]

use vesper_tree::{
    BoundExpr, EscapeRules, MethodId, ParamSymbol, Pinning, PropertyId, PropertySymbol, RefKind,
    Symbols, Type,
};

use crate::scope::{EscapeClass, ScopeToken};

/// Owned copy of one parameter's metadata, so synthetic signatures (inline
/// arrays, function pointers) and derived shapes need no symbol-table
/// mutation.
#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Type,
    pub ref_kind: RefKind,
    pub pinning: Pinning,
    pub has_default: bool,
    pub is_variadic: bool,
}

impl ParamInfo {
    pub fn from_symbol(param: &ParamSymbol) -> Self {
        ParamInfo {
            name: param.name.clone(),
            ty: param.ty.clone(),
            ref_kind: param.ref_kind,
            pinning: param.pinning,
            has_default: param.has_default,
            is_variadic: param.is_variadic,
        }
    }

    fn synthetic(name: &str, ty: Type, ref_kind: RefKind) -> Self {
        ParamInfo {
            name: name.to_string(),
            ty,
            ref_kind,
            pinning: Pinning::None,
            has_default: false,
            is_variadic: false,
        }
    }
}

/// How a property or indexer is being used, which picks the accessor the
/// shape is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyUse {
    Read,
    Write,
    /// Read-modify-write (`op=`, `++`): both accessors are involved, the
    /// shape follows the more capable one.
    Compound,
}

/// One argument matched to its parameter, with the ref kind it effectively
/// binds with: a plain argument supplied to an `in` parameter binds as `In`.
#[derive(Clone, Copy, Debug)]
pub struct ArgProjection<'a> {
    pub param: Option<&'a ParamInfo>,
    pub argument: &'a BoundExpr,
    pub ref_kind: RefKind,
}

/// One channel through which a call could leak a value or reference out of
/// an argument: the escape engine synthesizes the channel's scope when it
/// assembles these from a shape.
#[derive(Clone, Copy, Debug)]
pub struct EscapeContribution<'a> {
    /// `None` marks the receiver.
    pub param: Option<&'a ParamInfo>,
    pub argument: &'a BoundExpr,
    pub scope: ScopeToken,
    pub is_ref_escape: bool,
}

impl EscapeContribution<'_> {
    pub fn class(&self) -> EscapeClass {
        EscapeClass::of(self.scope)
    }

    /// The channel is a by-ref binding of view type, the only kind of channel
    /// a member returning a reference to a view could hand back.
    pub fn ref_to_view_channel(&self) -> bool {
        matches!(self.param, Some(p) if p.ref_kind.is_by_ref() && p.ty.is_view())
    }

    pub fn channel_name(&self) -> String {
        match self.param {
            Some(p) => format!("parameter '{}'", p.name),
            None => "the receiver".to_string(),
        }
    }
}

/// One place a call could write a view value back into: the receiver of a
/// non-readonly member, or a writable by-ref argument of view type.
#[derive(Clone, Copy, Debug)]
pub struct WritebackDestination<'a> {
    /// `None` marks the receiver.
    pub param: Option<&'a ParamInfo>,
    pub argument: &'a BoundExpr,
    pub scope: ScopeToken,
}

impl WritebackDestination<'_> {
    pub fn class(&self) -> EscapeClass {
        EscapeClass::of(self.scope)
    }

    pub fn channel_name(&self) -> String {
        match self.param {
            Some(p) => format!("parameter '{}'", p.name),
            None => "the receiver".to_string(),
        }
    }
}

/// One normalized, immutable description of a call-like expression,
/// regardless of surface form: plain call, indexer, user-defined operator,
/// constructor, function-pointer invocation, or inline-array access. Both
/// escape analyses and argument-mixing validation run over this shape only.
#[derive(Clone, Debug)]
pub struct CallShape<'a> {
    pub member_name: String,
    pub return_type: Type,
    pub return_ref_kind: RefKind,
    pub is_readonly_member: bool,
    pub escape_rules: EscapeRules,
    pub is_extension: bool,
    pub is_static_member: bool,
    pub params: Vec<ParamInfo>,
    pub receiver: Option<&'a BoundExpr>,
    pub args: Vec<&'a BoundExpr>,
    pub arg_ref_kinds: Vec<RefKind>,
    pub args_to_params: Option<Vec<usize>>,
    pub has_errors: bool,
}

impl<'a> CallShape<'a> {
    pub fn for_method(
        symbols: &Symbols,
        method: MethodId,
        receiver: Option<&'a BoundExpr>,
        args: &'a [BoundExpr],
        arg_ref_kinds: &[RefKind],
        args_to_params: Option<Vec<usize>>,
    ) -> Self {
        let m = symbols.method(method);
        CallShape {
            member_name: m.name.clone(),
            return_type: m.return_type.clone(),
            return_ref_kind: m.return_ref_kind,
            is_readonly_member: m.is_readonly,
            escape_rules: m.escape_rules,
            is_extension: m.is_extension,
            is_static_member: m.is_static,
            params: m.params.iter().map(|&p| ParamInfo::from_symbol(symbols.param(p))).collect(),
            receiver,
            args: args.iter().collect(),
            arg_ref_kinds: arg_ref_kinds.to_vec(),
            args_to_params,
            has_errors: any_errors(receiver, args),
        }
    }

    /// Builds the shape of a property or indexer use from the accessor the
    /// use selects.
    pub fn for_property(
        symbols: &Symbols,
        property: PropertyId,
        receiver: Option<&'a BoundExpr>,
        args: &'a [BoundExpr],
        arg_ref_kinds: &[RefKind],
        args_to_params: Option<Vec<usize>>,
        use_kind: PropertyUse,
    ) -> Self {
        let p = symbols.property(property);
        let accessor = accessor_for(symbols, p, use_kind).map(|id| symbols.method(id));
        CallShape {
            member_name: p.name.clone(),
            return_type: p.ty.clone(),
            return_ref_kind: p.return_ref_kind,
            is_readonly_member: accessor.is_some_and(|a| a.is_readonly),
            escape_rules: accessor.map_or(EscapeRules::Modern, |a| a.escape_rules),
            is_extension: false,
            is_static_member: p.is_static,
            params: p.params.iter().map(|&id| ParamInfo::from_symbol(symbols.param(id))).collect(),
            receiver,
            args: args.iter().collect(),
            arg_ref_kinds: arg_ref_kinds.to_vec(),
            args_to_params,
            has_errors: any_errors(receiver, args),
        }
    }

    pub fn for_constructor(
        symbols: &Symbols,
        ctor: MethodId,
        args: &'a [BoundExpr],
        arg_ref_kinds: &[RefKind],
        args_to_params: Option<Vec<usize>>,
    ) -> Self {
        let mut shape =
            CallShape::for_method(symbols, ctor, None, args, arg_ref_kinds, args_to_params);
        shape.is_static_member = true;
        shape
    }

    /// User-defined operators are static calls over their operands.
    pub fn for_operator(symbols: &Symbols, operator: MethodId, operands: Vec<&'a BoundExpr>) -> Self {
        let m = symbols.method(operator);
        let has_errors = operands.iter().any(|a| a.has_errors());
        CallShape {
            member_name: m.name.clone(),
            return_type: m.return_type.clone(),
            return_ref_kind: m.return_ref_kind,
            is_readonly_member: m.is_readonly,
            escape_rules: m.escape_rules,
            is_extension: false,
            is_static_member: true,
            params: m.params.iter().map(|&p| ParamInfo::from_symbol(symbols.param(p))).collect(),
            receiver: None,
            arg_ref_kinds: vec![RefKind::None; operands.len()],
            args: operands,
            args_to_params: None,
            has_errors,
        }
    }

    /// Function pointers carry a synthesized signature method; the rule set
    /// comes from the analyzing unit, not the signature.
    pub fn for_function_pointer(
        symbols: &Symbols,
        signature: MethodId,
        args: &'a [BoundExpr],
        arg_ref_kinds: &[RefKind],
        escape_rules: EscapeRules,
    ) -> Self {
        let mut shape = CallShape::for_method(symbols, signature, None, args, arg_ref_kinds, None);
        shape.is_static_member = true;
        shape.escape_rules = escape_rules;
        shape
    }

    /// Inline-array element and slice accesses are equivalent to calling a
    /// synthesized accessor taking the array by writable reference: element
    /// access returns the element by reference, slice access returns a
    /// `Buffer` over the array's storage by value.
    pub fn for_inline_array(
        receiver: &'a BoundExpr,
        argument: &'a BoundExpr,
        is_slice: bool,
        result_type: Type,
    ) -> Self {
        let member_name = if is_slice { "inline array slice" } else { "inline array element" };
        CallShape {
            member_name: member_name.to_string(),
            return_type: result_type,
            return_ref_kind: if is_slice { RefKind::None } else { RefKind::Ref },
            is_readonly_member: false,
            // Inline arrays postdate the legacy rules.
            escape_rules: EscapeRules::Modern,
            is_extension: false,
            is_static_member: true,
            params: vec![
                ParamInfo::synthetic("source", receiver.ty.clone(), RefKind::Ref),
                ParamInfo::synthetic("index", Type::Uint, RefKind::None),
            ],
            receiver: None,
            args: vec![receiver, argument],
            arg_ref_kinds: vec![RefKind::Ref, RefKind::None],
            args_to_params: None,
            has_errors: receiver.has_errors() || argument.has_errors(),
        }
    }

    /// Folds the extension receiver into the argument list and drops the
    /// receiver of a static member, yielding the shape every check runs on.
    pub fn normalized(self) -> Self {
        let shape = if self.is_extension && self.receiver.is_some() {
            self.with_extension_receiver()
        } else {
            self
        };
        if shape.is_static_member { shape.without_receiver() } else { shape }
    }

    /// Moves the receiver of a static extension function to the front of the
    /// argument list, bound the way the first parameter declares.
    pub fn with_extension_receiver(mut self) -> Self {
        if let Some(receiver) = self.receiver.take() {
            self.args.insert(0, receiver);
            self.arg_ref_kinds
                .insert(0, self.params.first().map_or(RefKind::None, |p| p.ref_kind));
            // An explicit map indexes the full parameter list, so existing
            // entries stay put; absent maps stay positional after the shift.
            if let Some(map) = &mut self.args_to_params {
                map.insert(0, 0);
            }
        }
        self
    }

    pub fn without_receiver(mut self) -> Self {
        self.receiver = None;
        self
    }

    /// Parameter index the `i`-th argument binds to, through the reorder map
    /// when present and onto the trailing variadic parameter when the
    /// argument lies past the declared list.
    pub fn param_index_for_arg(&self, i: usize) -> Option<usize> {
        let index = match &self.args_to_params {
            Some(map) => *map.get(i)?,
            None => i,
        };
        if index < self.params.len() {
            Some(index)
        } else if self.params.last().is_some_and(|p| p.is_variadic) {
            Some(self.params.len() - 1)
        } else {
            None
        }
    }

    pub fn param_has_argument(&self, param_index: usize) -> bool {
        (0..self.args.len()).any(|i| self.param_index_for_arg(i) == Some(param_index))
    }

    /// The 1:1 argument view every check iterates.
    pub fn projections(&self) -> Vec<ArgProjection<'_>> {
        (0..self.args.len())
            .map(|i| {
                let param = self.param_index_for_arg(i).map(|j| &self.params[j]);
                let declared = self.arg_ref_kinds.get(i).copied().unwrap_or(RefKind::None);
                let ref_kind = match (declared, param.map(|p| p.ref_kind)) {
                    (RefKind::None, Some(RefKind::In)) => RefKind::In,
                    _ => declared,
                };
                ArgProjection { param, argument: self.args[i], ref_kind }
            })
            .collect()
    }

    /// An `in` parameter with a default that received no argument: the
    /// compiler materializes a hidden temporary confined to the call site.
    pub fn unmatched_optional_in(&self) -> Option<&ParamInfo> {
        self.params
            .iter()
            .enumerate()
            .find(|(i, p)| {
                p.ref_kind == RefKind::In && p.has_default && !self.param_has_argument(*i)
            })
            .map(|(_, p)| p)
    }

    /// The member hands back a reference into a view: only by-ref view-typed
    /// channels can feed such a reference.
    pub fn returns_ref_to_view(&self) -> bool {
        self.return_ref_kind.is_by_ref() && self.return_type.is_view()
    }
}

fn any_errors(receiver: Option<&BoundExpr>, args: &[BoundExpr]) -> bool {
    receiver.is_some_and(|r| r.has_errors()) || args.iter().any(|a| a.has_errors())
}

/// Accessor selection: a by-reference-returning property reads and writes
/// through its getter; compound use prefers a non-readonly accessor (setter
/// first) because that accessor's receiver mutation is what escape soundness
/// must account for, and the getter stands only when both are readonly.
fn accessor_for(symbols: &Symbols, property: &PropertySymbol, use_kind: PropertyUse) -> Option<MethodId> {
    if property.return_ref_kind.is_by_ref() {
        return property.get_method;
    }
    match use_kind {
        PropertyUse::Read => property.get_method,
        PropertyUse::Write => property.set_method,
        PropertyUse::Compound => [property.set_method, property.get_method]
            .into_iter()
            .flatten()
            .find(|&id| !symbols.method(id).is_readonly)
            .or(property.get_method)
            .or(property.set_method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_tree::{span, LocalSymbol, MethodSymbol};

    fn view_ty() -> Type {
        Type::buffer(Type::Int)
    }

    fn local_expr(symbols: &mut Symbols, name: &str, ty: Type) -> BoundExpr {
        let id = symbols.add_local(LocalSymbol::new(name, ty.clone()));
        BoundExpr::local(span(0, name.len()), ty, id)
    }

    #[test]
    fn extension_receiver_folds_to_the_front() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("self", view_ty()).by_ref(RefKind::Ref),
            ParamSymbol::new("count", Type::Int),
        ]);
        let method = symbols.add_method(
            MethodSymbol::new("grow", Type::Unit).extension().with_params(params),
        );
        let receiver = local_expr(&mut symbols, "buf", view_ty());
        let args = vec![BoundExpr::literal(span(9, 1), Type::Int)];

        let shape = CallShape::for_method(&symbols, method, Some(&receiver), &args, &[RefKind::None], None)
            .normalized();
        assert!(shape.receiver.is_none());
        assert_eq!(shape.args.len(), 2);
        let projections = shape.projections();
        assert_eq!(projections[0].param.unwrap().name, "self");
        assert_eq!(projections[0].ref_kind, RefKind::Ref);
        assert_eq!(projections[1].param.unwrap().name, "count");
    }

    #[test]
    fn static_member_drops_its_type_receiver() {
        let mut symbols = Symbols::new();
        let method = symbols.add_method(MethodSymbol::new("empty", view_ty()).static_method());
        let receiver = BoundExpr::type_ref(span(0, 6), view_ty());
        let shape =
            CallShape::for_method(&symbols, method, Some(&receiver), &[], &[], None).normalized();
        assert!(shape.receiver.is_none());
        assert!(shape.args.is_empty());
    }

    #[test]
    fn plain_argument_to_in_parameter_binds_as_in() {
        let mut symbols = Symbols::new();
        let params =
            symbols.add_params(vec![ParamSymbol::new("source", Type::Int).by_ref(RefKind::In)]);
        let method =
            symbols.add_method(MethodSymbol::new("peek", Type::Int).static_method().with_params(params));
        let args = vec![BoundExpr::literal(span(5, 1), Type::Int)];
        let shape = CallShape::for_method(&symbols, method, None, &args, &[RefKind::None], None);
        assert_eq!(shape.projections()[0].ref_kind, RefKind::In);
    }

    #[test]
    fn variadic_tail_maps_onto_the_last_parameter() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("first", Type::Int),
            ParamSymbol::new("rest", Type::array(Type::Int)).variadic(),
        ]);
        let method = symbols
            .add_method(MethodSymbol::new("join", Type::Str).static_method().with_params(params));
        let args = vec![
            BoundExpr::literal(span(0, 1), Type::Int),
            BoundExpr::literal(span(2, 1), Type::Int),
            BoundExpr::literal(span(4, 1), Type::Int),
        ];
        let kinds = vec![RefKind::None; 3];
        let shape = CallShape::for_method(&symbols, method, None, &args, &kinds, None);
        let projections = shape.projections();
        assert_eq!(projections[0].param.unwrap().name, "first");
        assert_eq!(projections[1].param.unwrap().name, "rest");
        assert_eq!(projections[2].param.unwrap().name, "rest");
    }

    #[test]
    fn reorder_map_wins_over_position() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("a", Type::Int),
            ParamSymbol::new("b", Type::Int),
        ]);
        let method = symbols
            .add_method(MethodSymbol::new("pair", Type::Unit).static_method().with_params(params));
        let args =
            vec![BoundExpr::literal(span(0, 1), Type::Int), BoundExpr::literal(span(2, 1), Type::Int)];
        let kinds = vec![RefKind::None; 2];
        let shape =
            CallShape::for_method(&symbols, method, None, &args, &kinds, Some(vec![1, 0]));
        let projections = shape.projections();
        assert_eq!(projections[0].param.unwrap().name, "b");
        assert_eq!(projections[1].param.unwrap().name, "a");
    }

    #[test]
    fn unmatched_optional_in_parameter_is_found() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("value", Type::Int),
            ParamSymbol::new("options", Type::Int).by_ref(RefKind::In).with_default(),
        ]);
        let method = symbols
            .add_method(MethodSymbol::new("emit", Type::Unit).static_method().with_params(params));
        let args = vec![BoundExpr::literal(span(0, 1), Type::Int)];
        let shape = CallShape::for_method(&symbols, method, None, &args, &[RefKind::None], None);
        assert_eq!(shape.unmatched_optional_in().unwrap().name, "options");

        let full_args = vec![
            BoundExpr::literal(span(0, 1), Type::Int),
            BoundExpr::literal(span(2, 1), Type::Int),
        ];
        let kinds = vec![RefKind::None, RefKind::In];
        let shape = CallShape::for_method(&symbols, method, None, &full_args, &kinds, None);
        assert!(shape.unmatched_optional_in().is_none());
    }

    #[test]
    fn compound_property_use_prefers_the_writable_accessor() {
        let mut symbols = Symbols::new();
        let getter = symbols.add_method(MethodSymbol::new("head", view_ty()).readonly());
        let setter = symbols.add_method(MethodSymbol::new("set_head", Type::Unit));
        let property = symbols.add_property(
            PropertySymbol::new("head", view_ty()).with_getter(getter).with_setter(setter),
        );
        let receiver = local_expr(&mut symbols, "list", Type::plain_struct("List"));
        let shape = CallShape::for_property(
            &symbols,
            property,
            Some(&receiver),
            &[],
            &[],
            None,
            PropertyUse::Compound,
        );
        assert!(!shape.is_readonly_member);

        let ro_getter = symbols.add_method(MethodSymbol::new("len", Type::Int).readonly());
        let ro_setter = symbols.add_method(MethodSymbol::new("set_len", Type::Unit).readonly());
        let property = symbols.add_property(
            PropertySymbol::new("len", Type::Int).with_getter(ro_getter).with_setter(ro_setter),
        );
        let shape = CallShape::for_property(
            &symbols,
            property,
            Some(&receiver),
            &[],
            &[],
            None,
            PropertyUse::Compound,
        );
        assert!(shape.is_readonly_member);
    }

    #[test]
    fn ref_returning_property_always_uses_its_getter() {
        let mut symbols = Symbols::new();
        let getter =
            symbols.add_method(MethodSymbol::new("slot", Type::Int).returns_ref().legacy_rules());
        let setter = symbols.add_method(MethodSymbol::new("set_slot", Type::Unit));
        let property = symbols.add_property(
            PropertySymbol::new("slot", Type::Int)
                .returns_ref()
                .with_getter(getter)
                .with_setter(setter),
        );
        let receiver = local_expr(&mut symbols, "cell", Type::plain_struct("Cell"));
        let shape = CallShape::for_property(
            &symbols,
            property,
            Some(&receiver),
            &[],
            &[],
            None,
            PropertyUse::Write,
        );
        assert_eq!(shape.escape_rules, EscapeRules::Legacy);
    }

    #[test]
    fn inline_array_shapes_mirror_the_synthesized_accessors() {
        let mut symbols = Symbols::new();
        let array = local_expr(&mut symbols, "frames", Type::plain_struct("Frames"));
        let index = BoundExpr::literal(span(7, 1), Type::Uint);

        let element = CallShape::for_inline_array(&array, &index, false, Type::Int);
        assert_eq!(element.return_ref_kind, RefKind::Ref);
        assert_eq!(element.params[0].ref_kind, RefKind::Ref);
        assert!(!element.returns_ref_to_view());

        let slice = CallShape::for_inline_array(&array, &index, true, Type::buffer(Type::Int));
        assert_eq!(slice.return_ref_kind, RefKind::None);
        assert!(slice.return_type.is_view());
        assert_eq!(slice.args.len(), 2);
    }

    #[test]
    fn error_arguments_poison_the_shape() {
        let mut symbols = Symbols::new();
        let method = symbols.add_method(MethodSymbol::new("sink", Type::Unit).static_method());
        let bad = BoundExpr::error(span(0, 3), Type::Int);
        let args = vec![bad];
        let shape = CallShape::for_method(&symbols, method, None, &args, &[RefKind::None], None);
        assert!(shape.has_errors);
    }
}
