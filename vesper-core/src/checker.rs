#![forbid(unsafe_code)]

use std::collections::HashMap;
#[cfg(debug_assertions)]
use std::collections::HashSet;

use vesper_tree::{
    BoundExpr, EscapeRules, ExprKind, FieldId, LocalId, MemberContext, ParamId, Pinning,
    PropertyId, RefKind, Span, Symbols,
};

use crate::capability::Capability;
use crate::diagnostics::{DiagnosticCode, DiagnosticSink};
use crate::scope::ScopeToken;

/// Per-unit analysis options.
#[derive(Clone, Copy, Debug)]
pub struct CheckerOptions {
    /// Rule set applied where no resolved member pins one down (function
    /// pointer signatures follow the unit, not the pointee).
    pub default_escape_rules: EscapeRules,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        CheckerOptions { default_escape_rules: EscapeRules::Modern }
    }
}

#[derive(Clone, Copy, Debug)]
struct LocalScopes {
    value: ScopeToken,
    reference: ScopeToken,
}

/// One member body's worth of reference-safety state: the running block
/// depth, the unsafe-region depth, and the declared-or-inferred escape
/// scopes of locals. The symbol table is shared and immutable.
pub struct Checker<'a> {
    pub(crate) symbols: &'a Symbols,
    member: MemberContext,
    pub(crate) options: CheckerOptions,
    depth: ScopeToken,
    unsafe_depth: u32,
    local_scopes: HashMap<LocalId, LocalScopes>,
    #[cfg(debug_assertions)]
    visited: HashSet<(usize, bool)>,
}

impl<'a> Checker<'a> {
    pub fn new(symbols: &'a Symbols, member: MemberContext) -> Self {
        Checker::with_options(symbols, member, CheckerOptions::default())
    }

    pub fn with_options(symbols: &'a Symbols, member: MemberContext, options: CheckerOptions) -> Self {
        Checker {
            symbols,
            member,
            options,
            depth: ScopeToken::TOP,
            unsafe_depth: 0,
            local_scopes: HashMap::new(),
            #[cfg(debug_assertions)]
            visited: HashSet::new(),
        }
    }

    pub fn current_depth(&self) -> ScopeToken {
        self.depth
    }

    pub fn enter_block(&mut self) {
        self.depth = self.depth.nested();
    }

    pub fn exit_block(&mut self) {
        self.depth = self.depth.enclosing();
    }

    pub fn enter_unsafe(&mut self) {
        self.unsafe_depth += 1;
    }

    pub fn exit_unsafe(&mut self) {
        debug_assert!(self.unsafe_depth > 0, "unbalanced unsafe region");
        self.unsafe_depth -= 1;
    }

    pub fn in_unsafe_region(&self) -> bool {
        self.unsafe_depth > 0
    }

    /// Registers a local at the current depth with its default scopes: value
    /// escape unrestricted (current depth when pinned by value), reference
    /// escape confined to the declaring block.
    pub fn declare_local(&mut self, id: LocalId) {
        let value = if self.symbols.local(id).pinning == Pinning::Value {
            self.depth
        } else {
            ScopeToken::UNRESTRICTED
        };
        self.local_scopes.insert(id, LocalScopes { value, reference: self.depth });
    }

    /// Registers a local with explicit scopes, as the binder does for `ref`
    /// locals inheriting their initializer's scopes and for out-variable
    /// declarations whose scopes argument mixing infers.
    pub fn declare_local_scopes(&mut self, id: LocalId, value: ScopeToken, reference: ScopeToken) {
        self.local_scopes.insert(id, LocalScopes { value, reference });
    }

    pub fn local_value_scope(&self, id: LocalId) -> ScopeToken {
        match self.local_scopes.get(&id) {
            Some(scopes) => scopes.value,
            None if self.symbols.local(id).pinning == Pinning::Value => ScopeToken::TOP,
            None => ScopeToken::UNRESTRICTED,
        }
    }

    pub fn local_ref_scope(&self, id: LocalId) -> ScopeToken {
        self.local_scopes.get(&id).map_or(ScopeToken::TOP, |scopes| scopes.reference)
    }

    pub fn set_local_value_scope(&mut self, id: LocalId, value: ScopeToken) {
        self.local_scopes
            .entry(id)
            .and_modify(|scopes| scopes.value = value)
            .or_insert(LocalScopes { value, reference: ScopeToken::TOP });
    }

    pub(crate) fn member(&self) -> &MemberContext {
        &self.member
    }

    pub(crate) fn begin_escape_pass(&mut self) {
        #[cfg(debug_assertions)]
        self.visited.clear();
    }

    #[cfg(debug_assertions)]
    pub(crate) fn note_visited(&mut self, expr: &BoundExpr, is_ref: bool) {
        let key = (expr as *const BoundExpr as usize, is_ref);
        debug_assert!(
            self.visited.insert(key),
            "expression escape-checked twice in one validation pass"
        );
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn note_visited(&mut self, _expr: &BoundExpr, _is_ref: bool) {}

    /// Classifies `expr` against `requirement`: hands the expression back
    /// unchanged when it satisfies the requirement, or wraps it in the error
    /// marker after emitting one diagnostic.
    pub fn classify(
        &mut self,
        expr: BoundExpr,
        requirement: Capability,
        sink: &mut DiagnosticSink,
    ) -> BoundExpr {
        if self.check_value(&expr, requirement, sink) {
            expr
        } else {
            BoundExpr::error_marker(expr)
        }
    }

    /// The cheap read-only classification used before any value is consumed.
    pub fn require_value(&mut self, expr: &BoundExpr, sink: &mut DiagnosticSink) -> bool {
        self.check_value(expr, Capability::VALUE, sink)
    }

    pub fn check_value(
        &mut self,
        expr: &BoundExpr,
        requirement: Capability,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if expr.has_errors() {
            return true;
        }
        if requirement.is_read_only() {
            return self.check_readable(expr, requirement, sink);
        }
        self.check_capability(expr, requirement, false, sink)
    }

    /// Read-only requirements accept everything that denotes a value; only
    /// namespaces, types, unconverted function groups, and valueless
    /// expressions fail here.
    fn check_readable(
        &self,
        expr: &BoundExpr,
        requirement: Capability,
        sink: &mut DiagnosticSink,
    ) -> bool {
        match &expr.kind {
            ExprKind::NamespaceRef => {
                sink.report(
                    DiagnosticCode::NotValue,
                    expr.span,
                    format!("a namespace cannot be used as {}", requirement.display()),
                );
                false
            }
            ExprKind::TypeRef => {
                sink.report(
                    DiagnosticCode::NotValue,
                    expr.span,
                    format!(
                        "type '{}' cannot be used as {}",
                        expr.ty.display(),
                        requirement.display()
                    ),
                );
                false
            }
            ExprKind::FunctionGroup { name } => {
                sink.report(
                    DiagnosticCode::NotValue,
                    expr.span,
                    format!("function group '{}' cannot be used as {}", name, requirement.display()),
                );
                false
            }
            _ if expr.ty.is_unit() => {
                sink.report(
                    DiagnosticCode::NotValue,
                    expr.span,
                    "this expression has no value".to_string(),
                );
                false
            }
            _ => true,
        }
    }

    /// The variable-style dispatch: every shape that can denote storage gets
    /// its own rule; everything else rejects with the "not a variable"
    /// wording family. `checking_receiver` marks the recursion into the
    /// receiver of a struct member write, which changes the wording to name
    /// the mutation rather than the assignment.
    fn check_capability(
        &mut self,
        expr: &BoundExpr,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        match &expr.kind {
            ExprKind::Error { .. } | ExprKind::Discard | ExprKind::DeclarationExpression { .. } => {
                true
            }
            ExprKind::This | ExprKind::Base => {
                self.check_self_capability(expr, requirement, checking_receiver, sink)
            }
            ExprKind::Local(id) => {
                self.check_local_capability(expr, *id, requirement, checking_receiver, sink)
            }
            ExprKind::Parameter(id) => {
                self.check_param_capability(expr, *id, requirement, checking_receiver, sink)
            }
            ExprKind::FieldAccess { receiver, field } => self.check_field_capability(
                expr,
                receiver.as_deref(),
                *field,
                requirement,
                checking_receiver,
                sink,
            ),
            ExprKind::PropertyAccess { receiver, property } => self.check_property_capability(
                expr,
                receiver.as_deref(),
                *property,
                requirement,
                checking_receiver,
                sink,
            ),
            ExprKind::IndexerAccess { receiver, property, .. } => self.check_property_capability(
                expr,
                Some(receiver),
                *property,
                requirement,
                checking_receiver,
                sink,
            ),
            ExprKind::EventAccess { event, .. } => {
                if requirement.same_checks(Capability::COMPOUND_ASSIGN) {
                    return true;
                }
                let event = self.symbols.event(*event);
                if requirement.needs_rebind() {
                    sink.report(
                        DiagnosticCode::NotRebindable,
                        expr.span,
                        format!("cannot ref-reassign event '{}'", event.name),
                    );
                    return false;
                }
                if event.is_field_like && self.member.containing_type == event.containing_type {
                    return true;
                }
                sink.report(
                    DiagnosticCode::EventNotVariable,
                    expr.span,
                    format!(
                        "event '{}' can only be used with '+=' or '-=' outside its declaring type",
                        event.name
                    ),
                );
                false
            }
            ExprKind::Call { method, .. } => {
                let method = self.symbols.method(*method);
                self.check_call_result(
                    expr,
                    &method.name,
                    method.return_ref_kind,
                    requirement,
                    checking_receiver,
                    sink,
                )
            }
            ExprKind::FunctionPointerCall { signature, .. } => {
                let signature = self.symbols.method(*signature);
                self.check_call_result(
                    expr,
                    &signature.name,
                    signature.return_ref_kind,
                    requirement,
                    checking_receiver,
                    sink,
                )
            }
            ExprKind::Unary { operator: Some(op), .. } | ExprKind::Binary { operator: Some(op), .. } => {
                let operator = self.symbols.method(*op);
                self.check_call_result(
                    expr,
                    &operator.name,
                    operator.return_ref_kind,
                    requirement,
                    checking_receiver,
                    sink,
                )
            }
            ExprKind::ArrayAccess { .. } | ExprKind::PointerDeref { .. } => {
                if requirement.needs_rebind() {
                    sink.report(
                        DiagnosticCode::NotRebindable,
                        expr.span,
                        "cannot ref-reassign an element access".to_string(),
                    );
                    return false;
                }
                true
            }
            ExprKind::PointerElementAccess { pointer, .. } => {
                if requirement.needs_rebind() {
                    sink.report(
                        DiagnosticCode::NotRebindable,
                        expr.span,
                        "cannot ref-reassign an element access".to_string(),
                    );
                    return false;
                }
                // Elements of a fixed-size buffer live inside the variable the
                // buffer is a field of.
                if let ExprKind::FieldAccess { receiver: Some(receiver), field } = &pointer.kind {
                    if self.symbols.field(*field).is_fixed_buffer {
                        return self.check_capability(receiver, requirement, true, sink);
                    }
                }
                true
            }
            ExprKind::InlineArrayAccess { receiver, is_slice, .. } => {
                if requirement.needs_rebind() {
                    sink.report(
                        DiagnosticCode::NotRebindable,
                        expr.span,
                        "cannot ref-reassign an element access".to_string(),
                    );
                    return false;
                }
                if *is_slice {
                    sink.report(
                        DiagnosticCode::NotVariable,
                        expr.span,
                        format!(
                            "a slice of an inline array cannot be used as {}",
                            requirement.display()
                        ),
                    );
                    return false;
                }
                if requirement.needs_write() {
                    return self.check_capability(receiver, Capability::WRITABLE_REF, true, sink);
                }
                true
            }
            ExprKind::Conditional { when_true, when_false, is_by_ref: true, .. } => {
                self.check_capability(when_true, requirement, checking_receiver, sink)
                    && self.check_capability(when_false, requirement, checking_receiver, sink)
            }
            ExprKind::Assignment { target, is_by_ref: true, .. } => {
                self.check_capability(target, requirement, checking_receiver, sink)
            }
            ExprKind::TupleLiteral { elements } if requirement.same_checks(Capability::ASSIGN) => {
                elements
                    .iter()
                    .all(|element| self.check_capability(element, requirement, checking_receiver, sink))
            }
            _ => {
                if requirement.needs_rebind() {
                    sink.report(
                        DiagnosticCode::NotRebindable,
                        expr.span,
                        "cannot ref-reassign this expression: it is not a ref binding".to_string(),
                    );
                    return false;
                }
                let message = if checking_receiver {
                    "cannot mutate members of this expression because it is not a variable"
                        .to_string()
                } else if expr.is_constant() {
                    format!("a constant cannot be used as {}", requirement.display())
                } else {
                    format!("this expression cannot be used as {}", requirement.display())
                };
                sink.report(DiagnosticCode::NotVariable, expr.span, message);
                false
            }
        }
    }

    fn check_self_capability(
        &self,
        expr: &BoundExpr,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let what = if matches!(expr.kind, ExprKind::Base) { "'base'" } else { "'this'" };
        if requirement.needs_rebind() {
            sink.report(
                DiagnosticCode::NotRebindable,
                expr.span,
                format!("{what} cannot be ref-reassigned"),
            );
            return false;
        }
        if requirement.needs_write() {
            if !expr.ty.is_value_type() {
                return self.report_read_only(
                    sink,
                    expr.span,
                    what,
                    "it is read-only in a class",
                    requirement,
                    checking_receiver,
                );
            }
            if self.member.is_readonly {
                return self.report_read_only(
                    sink,
                    expr.span,
                    what,
                    "the member is declared readonly",
                    requirement,
                    checking_receiver,
                );
            }
        }
        true
    }

    fn check_local_capability(
        &self,
        expr: &BoundExpr,
        id: LocalId,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let local = self.symbols.local(id);
        let what = format!("local '{}'", local.name);
        if requirement.needs_rebind() {
            if !local.ref_kind.is_by_ref() {
                sink.report(
                    DiagnosticCode::NotRebindable,
                    expr.span,
                    format!("cannot ref-reassign {what}: it is not a ref binding"),
                );
                return false;
            }
            return true;
        }
        if requirement.needs_write() {
            if local.ref_kind == RefKind::In {
                return self.report_read_only(
                    sink,
                    expr.span,
                    &what,
                    "it is a read-only reference",
                    requirement,
                    checking_receiver,
                );
            }
            if !local.is_mutable {
                return self.report_read_only(
                    sink,
                    expr.span,
                    &what,
                    "it is immutable",
                    requirement,
                    checking_receiver,
                );
            }
        }
        true
    }

    fn check_param_capability(
        &self,
        expr: &BoundExpr,
        id: ParamId,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let param = self.symbols.param(id);
        let what = format!("parameter '{}'", param.name);
        if requirement.needs_rebind() {
            if !param.ref_kind.is_by_ref() {
                sink.report(
                    DiagnosticCode::NotRebindable,
                    expr.span,
                    format!("cannot ref-reassign {what}: it is not passed by reference"),
                );
                return false;
            }
            return true;
        }
        if requirement.needs_write() && param.ref_kind == RefKind::In {
            return self.report_read_only(
                sink,
                expr.span,
                &what,
                "it is an 'in' parameter",
                requirement,
                checking_receiver,
            );
        }
        true
    }

    fn check_field_capability(
        &mut self,
        expr: &BoundExpr,
        receiver: Option<&BoundExpr>,
        id: FieldId,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let field = self.symbols.field(id);
        let what = format!("field '{}'", field.name);
        if requirement.needs_rebind() && !field.is_ref_field {
            sink.report(
                DiagnosticCode::NotRebindable,
                expr.span,
                format!("cannot ref-reassign {what}: it is not a ref field"),
            );
            return false;
        }
        if requirement.needs_write() || requirement.needs_rebind() {
            if field.is_readonly {
                let allowed = if field.is_static {
                    self.member.is_construction()
                        && self.member.is_static
                        && self.member.containing_type == field.containing_type
                } else {
                    self.member.is_construction()
                        && !self.member.is_static
                        && self.member.containing_type == field.containing_type
                        && is_self_receiver(receiver)
                };
                if !allowed {
                    return self.report_read_only(
                        sink,
                        expr.span,
                        &what,
                        "it is readonly",
                        requirement,
                        checking_receiver,
                    );
                }
            }
            // The buffer itself is not storage; its elements are, through a
            // pointer element access.
            if field.is_fixed_buffer {
                sink.report(
                    DiagnosticCode::NotVariable,
                    expr.span,
                    format!("a fixed-size buffer cannot be used as {}", requirement.display()),
                );
                return false;
            }
            // Writing an instance field of a value-type receiver mutates the
            // receiver itself.
            if !field.is_static {
                if let Some(receiver) = receiver {
                    if receiver.ty.is_value_type()
                        && !self.check_capability(receiver, Capability::WRITABLE_REF, true, sink)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn check_property_capability(
        &mut self,
        expr: &BoundExpr,
        receiver: Option<&BoundExpr>,
        id: PropertyId,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let property = self.symbols.property(id);
        let what = if property.params.is_empty() {
            format!("property '{}'", property.name)
        } else {
            format!("indexer '{}'", property.name)
        };
        if requirement.needs_rebind() {
            sink.report(
                DiagnosticCode::NotRebindable,
                expr.span,
                format!("cannot ref-reassign {what}: accessor results are not ref bindings"),
            );
            return false;
        }
        if property.return_ref_kind.is_by_ref() {
            // Reads and writes both go through the getter's reference.
            let Some(getter) = property.get_method else {
                sink.report(DiagnosticCode::GetterMissing, expr.span, format!("{what} has no getter"));
                return false;
            };
            if !self.symbols.method(getter).is_accessible {
                sink.report(
                    DiagnosticCode::GetterMissing,
                    expr.span,
                    format!("the getter of {what} is inaccessible"),
                );
                return false;
            }
            if requirement.needs_write() && property.return_ref_kind == RefKind::In {
                sink.report(
                    DiagnosticCode::CallReadOnly,
                    expr.span,
                    format!("{what} returns by read-only reference"),
                );
                return false;
            }
            return true;
        }
        if requirement.needs_address() {
            let message = if checking_receiver {
                format!("cannot mutate members of {what}: it does not return by reference")
            } else {
                format!(
                    "{what} does not return by reference and cannot be used as {}",
                    requirement.display()
                )
            };
            sink.report(DiagnosticCode::CallNotAddressable, expr.span, message);
            return false;
        }
        if requirement.needs_write() {
            let Some(setter) = property.set_method else {
                sink.report(
                    DiagnosticCode::SetterMissing,
                    expr.span,
                    format!("cannot assign to {what}: it has no setter"),
                );
                return false;
            };
            let setter = self.symbols.method(setter);
            if !setter.is_accessible {
                sink.report(
                    DiagnosticCode::SetterMissing,
                    expr.span,
                    format!("the setter of {what} is inaccessible"),
                );
                return false;
            }
            if setter.is_init_only && !(self.member.is_construction() && is_self_receiver(receiver)) {
                sink.report(
                    DiagnosticCode::InitOnlyOutsideInit,
                    expr.span,
                    format!("{what} can only be assigned during initialization of its containing type"),
                );
                return false;
            }
            if requirement.needs_read() {
                let Some(getter) = property.get_method else {
                    sink.report(
                        DiagnosticCode::GetterMissing,
                        expr.span,
                        format!("{what} has no getter"),
                    );
                    return false;
                };
                if !self.symbols.method(getter).is_accessible {
                    sink.report(
                        DiagnosticCode::GetterMissing,
                        expr.span,
                        format!("the getter of {what} is inaccessible"),
                    );
                    return false;
                }
            }
            // A settable property of a value-type receiver writes back into
            // the receiver when the setter runs.
            if !property.is_static {
                if let Some(receiver) = receiver {
                    if receiver.ty.is_value_type()
                        && !self.check_capability(receiver, Capability::WRITABLE_REF, true, sink)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn check_call_result(
        &self,
        expr: &BoundExpr,
        member_name: &str,
        return_ref_kind: RefKind,
        requirement: Capability,
        checking_receiver: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if requirement.needs_rebind() {
            sink.report(
                DiagnosticCode::NotRebindable,
                expr.span,
                format!("cannot ref-reassign the result of '{member_name}'"),
            );
            return false;
        }
        if !return_ref_kind.is_by_ref() {
            let message = if checking_receiver {
                format!(
                    "cannot mutate members of the value returned by '{member_name}': it does not return by reference"
                )
            } else {
                format!(
                    "'{member_name}' does not return by reference; its result cannot be used as {}",
                    requirement.display()
                )
            };
            sink.report(DiagnosticCode::CallNotAddressable, expr.span, message);
            return false;
        }
        if requirement.needs_write() && return_ref_kind == RefKind::In {
            sink.report(
                DiagnosticCode::CallReadOnly,
                expr.span,
                format!("'{member_name}' returns by read-only reference"),
            );
            return false;
        }
        true
    }

    fn report_read_only(
        &self,
        sink: &mut DiagnosticSink,
        span: Span,
        what: &str,
        why: &str,
        requirement: Capability,
        checking_receiver: bool,
    ) -> bool {
        let message = if checking_receiver {
            format!("cannot mutate members of {what} because {why}")
        } else if requirement.needs_write_through_ref() {
            format!("cannot pass or return {what} by writable reference because {why}")
        } else {
            format!("cannot assign to {what} because {why}")
        };
        sink.report(DiagnosticCode::ReadOnlyWrite, span, message);
        false
    }
}

/// An absent receiver is the implicit `this` of the current member.
fn is_self_receiver(receiver: Option<&BoundExpr>) -> bool {
    match receiver {
        None => true,
        Some(r) => matches!(r.kind, ExprKind::This | ExprKind::Base),
    }
}
