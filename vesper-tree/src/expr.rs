#![forbid(unsafe_code)]

use crate::symbol::{EventId, FieldId, LocalId, MethodId, ParamId, PropertyId, RefKind};
use crate::types::Type;
use crate::Span;

/// A type-resolved expression: every name is bound to a symbol id and every
/// node carries the type the resolver gave it. This is the shape the
/// reference-safety checks walk.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundExpr {
    pub span: Span,
    pub ty: Type,
    pub kind: ExprKind,
}

/// One arm of a bound `switch` expression, reduced to the arm's value; the
/// pattern itself is irrelevant to reference safety.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchArm {
    pub value: BoundExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// Compile-time constant.
    Literal,
    /// `default` / zero value of the node's type.
    DefaultValue,
    Local(LocalId),
    Parameter(ParamId),
    This,
    Base,
    /// `_` in a deconstruction or assignment position.
    Discard,
    /// A type used as an expression, e.g. the receiver of a static member.
    TypeRef,
    NamespaceRef,
    /// An overload set that has not been converted to a concrete function.
    FunctionGroup { name: String },
    Lambda,
    FieldAccess {
        receiver: Option<Box<BoundExpr>>,
        field: FieldId,
    },
    PropertyAccess {
        receiver: Option<Box<BoundExpr>>,
        property: PropertyId,
    },
    IndexerAccess {
        receiver: Box<BoundExpr>,
        property: PropertyId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
        /// Position i of `args` matches parameter `args_to_params[i]`; absent
        /// when arguments are already in declaration order.
        args_to_params: Option<Vec<usize>>,
    },
    /// Element or slice access on a fixed-length inline array.
    InlineArrayAccess {
        receiver: Box<BoundExpr>,
        argument: Box<BoundExpr>,
        /// A range access producing a buffer over the receiver's storage
        /// rather than a single element.
        is_slice: bool,
    },
    EventAccess {
        receiver: Option<Box<BoundExpr>>,
        event: EventId,
    },
    ArrayAccess {
        array: Box<BoundExpr>,
        indices: Vec<BoundExpr>,
    },
    PointerElementAccess {
        pointer: Box<BoundExpr>,
        index: Box<BoundExpr>,
    },
    PointerDeref {
        operand: Box<BoundExpr>,
    },
    AddressOf {
        operand: Box<BoundExpr>,
    },
    Call {
        receiver: Option<Box<BoundExpr>>,
        method: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
        args_to_params: Option<Vec<usize>>,
    },
    FunctionPointerCall {
        pointer: Box<BoundExpr>,
        /// Synthesized method describing the pointer's signature.
        signature: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
    },
    ObjectCreation {
        ctor: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
        args_to_params: Option<Vec<usize>>,
        /// Member-initializer values attached to the creation.
        initializer: Vec<BoundExpr>,
    },
    /// An interpolated-string handler conversion; safety follows the
    /// synthesized handler construction.
    InterpolatedHandler {
        construction: Box<BoundExpr>,
    },
    Conditional {
        cond: Box<BoundExpr>,
        when_true: Box<BoundExpr>,
        when_false: Box<BoundExpr>,
        /// Both branches are storage locations and the conditional denotes
        /// one of them.
        is_by_ref: bool,
    },
    Coalesce {
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    ConditionalAccess {
        receiver: Box<BoundExpr>,
        access: Box<BoundExpr>,
    },
    Assignment {
        target: Box<BoundExpr>,
        value: Box<BoundExpr>,
        /// Rebinds the target reference instead of writing through it.
        is_by_ref: bool,
    },
    CompoundAssignment {
        target: Box<BoundExpr>,
        value: Box<BoundExpr>,
        /// User-defined operator implementing the update, when one applies.
        operator: Option<MethodId>,
    },
    IncrementDecrement {
        operand: Box<BoundExpr>,
        operator: Option<MethodId>,
    },
    TupleLiteral {
        elements: Vec<BoundExpr>,
    },
    Switch {
        scrutinee: Box<BoundExpr>,
        arms: Vec<SwitchArm>,
    },
    /// Stack allocation of a buffer; the result lives exactly as long as the
    /// block that evaluates it.
    StackAlloc {
        count: Box<BoundExpr>,
    },
    Conversion {
        operand: Box<BoundExpr>,
    },
    Unary {
        operand: Box<BoundExpr>,
        operator: Option<MethodId>,
    },
    Binary {
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
        operator: Option<MethodId>,
    },
    Throw,
    /// `var x` appearing inline in an argument list.
    DeclarationExpression {
        local: LocalId,
    },
    /// A node the resolver already rejected. Checks succeed on it silently
    /// so one resolution error does not cascade.
    Error {
        original: Option<Box<BoundExpr>>,
    },
}

impl BoundExpr {
    pub fn new(span: Span, ty: Type, kind: ExprKind) -> Self {
        BoundExpr { span, ty, kind }
    }

    pub fn literal(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::Literal)
    }

    pub fn default_value(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::DefaultValue)
    }

    pub fn local(span: Span, ty: Type, id: LocalId) -> Self {
        BoundExpr::new(span, ty, ExprKind::Local(id))
    }

    pub fn parameter(span: Span, ty: Type, id: ParamId) -> Self {
        BoundExpr::new(span, ty, ExprKind::Parameter(id))
    }

    pub fn this(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::This)
    }

    pub fn base(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::Base)
    }

    pub fn discard(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::Discard)
    }

    pub fn type_ref(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::TypeRef)
    }

    pub fn namespace_ref(span: Span) -> Self {
        BoundExpr::new(span, Type::Unit, ExprKind::NamespaceRef)
    }

    pub fn function_group(span: Span, name: &str) -> Self {
        BoundExpr::new(
            span,
            Type::Unit,
            ExprKind::FunctionGroup { name: name.to_string() },
        )
    }

    pub fn field_access(span: Span, ty: Type, receiver: Option<BoundExpr>, field: FieldId) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::FieldAccess { receiver: receiver.map(Box::new), field },
        )
    }

    pub fn property_access(
        span: Span,
        ty: Type,
        receiver: Option<BoundExpr>,
        property: PropertyId,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::PropertyAccess { receiver: receiver.map(Box::new), property },
        )
    }

    pub fn indexer_access(
        span: Span,
        ty: Type,
        receiver: BoundExpr,
        property: PropertyId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::IndexerAccess {
                receiver: Box::new(receiver),
                property,
                args,
                arg_ref_kinds,
                args_to_params: None,
            },
        )
    }

    pub fn inline_array_access(
        span: Span,
        ty: Type,
        receiver: BoundExpr,
        argument: BoundExpr,
        is_slice: bool,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::InlineArrayAccess {
                receiver: Box::new(receiver),
                argument: Box::new(argument),
                is_slice,
            },
        )
    }

    pub fn event_access(span: Span, ty: Type, receiver: Option<BoundExpr>, event: EventId) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::EventAccess { receiver: receiver.map(Box::new), event },
        )
    }

    pub fn array_access(span: Span, ty: Type, array: BoundExpr, indices: Vec<BoundExpr>) -> Self {
        BoundExpr::new(span, ty, ExprKind::ArrayAccess { array: Box::new(array), indices })
    }

    pub fn pointer_element_access(
        span: Span,
        ty: Type,
        pointer: BoundExpr,
        index: BoundExpr,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::PointerElementAccess {
                pointer: Box::new(pointer),
                index: Box::new(index),
            },
        )
    }

    pub fn pointer_deref(span: Span, ty: Type, operand: BoundExpr) -> Self {
        BoundExpr::new(span, ty, ExprKind::PointerDeref { operand: Box::new(operand) })
    }

    pub fn address_of(span: Span, ty: Type, operand: BoundExpr) -> Self {
        BoundExpr::new(span, ty, ExprKind::AddressOf { operand: Box::new(operand) })
    }

    pub fn call(
        span: Span,
        ty: Type,
        receiver: Option<BoundExpr>,
        method: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Call {
                receiver: receiver.map(Box::new),
                method,
                args,
                arg_ref_kinds,
                args_to_params: None,
            },
        )
    }

    pub fn function_pointer_call(
        span: Span,
        ty: Type,
        pointer: BoundExpr,
        signature: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::FunctionPointerCall {
                pointer: Box::new(pointer),
                signature,
                args,
                arg_ref_kinds,
            },
        )
    }

    pub fn object_creation(
        span: Span,
        ty: Type,
        ctor: MethodId,
        args: Vec<BoundExpr>,
        arg_ref_kinds: Vec<RefKind>,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::ObjectCreation {
                ctor,
                args,
                arg_ref_kinds,
                args_to_params: None,
                initializer: Vec::new(),
            },
        )
    }

    pub fn interpolated_handler(span: Span, ty: Type, construction: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::InterpolatedHandler { construction: Box::new(construction) },
        )
    }

    pub fn conditional(
        span: Span,
        ty: Type,
        cond: BoundExpr,
        when_true: BoundExpr,
        when_false: BoundExpr,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Conditional {
                cond: Box::new(cond),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
                is_by_ref: false,
            },
        )
    }

    pub fn ref_conditional(
        span: Span,
        ty: Type,
        cond: BoundExpr,
        when_true: BoundExpr,
        when_false: BoundExpr,
    ) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Conditional {
                cond: Box::new(cond),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
                is_by_ref: true,
            },
        )
    }

    pub fn coalesce(span: Span, ty: Type, left: BoundExpr, right: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Coalesce { left: Box::new(left), right: Box::new(right) },
        )
    }

    pub fn conditional_access(span: Span, ty: Type, receiver: BoundExpr, access: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::ConditionalAccess {
                receiver: Box::new(receiver),
                access: Box::new(access),
            },
        )
    }

    pub fn assignment(span: Span, ty: Type, target: BoundExpr, value: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Assignment {
                target: Box::new(target),
                value: Box::new(value),
                is_by_ref: false,
            },
        )
    }

    pub fn ref_assignment(span: Span, ty: Type, target: BoundExpr, value: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Assignment {
                target: Box::new(target),
                value: Box::new(value),
                is_by_ref: true,
            },
        )
    }

    pub fn compound_assignment(span: Span, ty: Type, target: BoundExpr, value: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::CompoundAssignment {
                target: Box::new(target),
                value: Box::new(value),
                operator: None,
            },
        )
    }

    pub fn increment(span: Span, ty: Type, operand: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::IncrementDecrement { operand: Box::new(operand), operator: None },
        )
    }

    pub fn tuple(span: Span, ty: Type, elements: Vec<BoundExpr>) -> Self {
        BoundExpr::new(span, ty, ExprKind::TupleLiteral { elements })
    }

    pub fn switch(span: Span, ty: Type, scrutinee: BoundExpr, arms: Vec<BoundExpr>) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Switch {
                scrutinee: Box::new(scrutinee),
                arms: arms.into_iter().map(|value| SwitchArm { value }).collect(),
            },
        )
    }

    pub fn stack_alloc(span: Span, ty: Type, count: BoundExpr) -> Self {
        BoundExpr::new(span, ty, ExprKind::StackAlloc { count: Box::new(count) })
    }

    pub fn conversion(span: Span, ty: Type, operand: BoundExpr) -> Self {
        BoundExpr::new(span, ty, ExprKind::Conversion { operand: Box::new(operand) })
    }

    pub fn unary(span: Span, ty: Type, operand: BoundExpr) -> Self {
        BoundExpr::new(span, ty, ExprKind::Unary { operand: Box::new(operand), operator: None })
    }

    pub fn binary(span: Span, ty: Type, left: BoundExpr, right: BoundExpr) -> Self {
        BoundExpr::new(
            span,
            ty,
            ExprKind::Binary { left: Box::new(left), right: Box::new(right), operator: None },
        )
    }

    pub fn throw(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::Throw)
    }

    pub fn declaration(span: Span, ty: Type, local: LocalId) -> Self {
        BoundExpr::new(span, ty, ExprKind::DeclarationExpression { local })
    }

    /// Wraps a rejected expression in an error node, keeping its span and
    /// type so downstream passes still see a well-formed tree.
    pub fn error_marker(original: BoundExpr) -> Self {
        BoundExpr {
            span: original.span,
            ty: original.ty.clone(),
            kind: ExprKind::Error { original: Some(Box::new(original)) },
        }
    }

    pub fn error(span: Span, ty: Type) -> Self {
        BoundExpr::new(span, ty, ExprKind::Error { original: None })
    }

    /// This node was already rejected by an earlier pass.
    pub fn has_errors(&self) -> bool {
        matches!(self.kind, ExprKind::Error { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Literal | ExprKind::DefaultValue)
    }

    /// Chainable designation of a user-defined operator on compound
    /// assignment, increment, unary and binary nodes.
    pub fn with_operator(mut self, method: MethodId) -> Self {
        match &mut self.kind {
            ExprKind::CompoundAssignment { operator, .. }
            | ExprKind::IncrementDecrement { operator, .. }
            | ExprKind::Unary { operator, .. }
            | ExprKind::Binary { operator, .. } => *operator = Some(method),
            _ => {}
        }
        self
    }

    /// Chainable argument-to-parameter reordering on call-like nodes.
    pub fn with_args_to_params(mut self, map: Vec<usize>) -> Self {
        match &mut self.kind {
            ExprKind::Call { args_to_params, .. }
            | ExprKind::IndexerAccess { args_to_params, .. }
            | ExprKind::ObjectCreation { args_to_params, .. } => *args_to_params = Some(map),
            _ => {}
        }
        self
    }

    /// Chainable member-initializer list on object creations.
    pub fn with_initializer(mut self, values: Vec<BoundExpr>) -> Self {
        if let ExprKind::ObjectCreation { initializer, .. } = &mut self.kind {
            *initializer = values;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span;

    #[test]
    fn error_marker_preserves_span_and_type() {
        let original = BoundExpr::local(span(4, 2), Type::Int, LocalId(0));
        let marked = BoundExpr::error_marker(original.clone());
        assert_eq!(marked.span, original.span);
        assert_eq!(marked.ty, Type::Int);
        assert!(marked.has_errors());
        assert!(!original.has_errors());
    }

    #[test]
    fn constants_are_recognized() {
        assert!(BoundExpr::literal(span(0, 1), Type::Int).is_constant());
        assert!(BoundExpr::default_value(span(0, 7), Type::buffer(Type::Int)).is_constant());
        assert!(!BoundExpr::this(span(0, 4), Type::class("Window")).is_constant());
    }

    #[test]
    fn operator_attaches_to_compound_forms() {
        let lhs = BoundExpr::local(span(0, 1), Type::Int, LocalId(0));
        let rhs = BoundExpr::literal(span(5, 1), Type::Int);
        let expr = BoundExpr::compound_assignment(span(0, 6), Type::Int, lhs, rhs)
            .with_operator(MethodId(3));
        match expr.kind {
            ExprKind::CompoundAssignment { operator, .. } => assert_eq!(operator, Some(MethodId(3))),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
