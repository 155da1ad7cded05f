#![forbid(unsafe_code)]

// Escape analysis. Every expression has two escape scopes: how far its
// value may travel (meaningful only for view types, whose values can embed
// stack references) and how far a reference to its storage may travel.
// Synthesis computes both bottom-up and never reports; validation re-walks
// the same structure against a required scope and reports one diagnostic
// per rejected check, on the narrowest-scoped part responsible.

use vesper_tree::{BoundExpr, EscapeRules, ExprKind, Pinning, RefKind, Span};

use crate::call_shape::{CallShape, EscapeContribution, PropertyUse, WritebackDestination};
use crate::checker::Checker;
use crate::diagnostics::{DiagnosticCode, DiagnosticSink};
use crate::scope::ScopeToken;

impl<'a> Checker<'a> {
    /// Widest scope the expression's value may escape to. Unrestricted for
    /// everything that cannot embed a stack reference.
    pub fn value_escape_scope(&self, expr: &BoundExpr) -> ScopeToken {
        if expr.has_errors() {
            return ScopeToken::UNRESTRICTED;
        }
        if expr.is_constant() || !expr.ty.is_view() {
            return ScopeToken::UNRESTRICTED;
        }
        if let Some(shape) = self.call_shape_of(expr) {
            let mut scope = self.invocation_escape_scope(&shape, false);
            if let ExprKind::ObjectCreation { initializer, .. } = &expr.kind {
                for item in initializer {
                    scope = scope.narrowest_of(self.value_escape_scope(item));
                }
            }
            return scope;
        }
        match &expr.kind {
            ExprKind::Local(id) => self.local_value_scope(*id),
            ExprKind::Parameter(id) => {
                if self.symbols.param(*id).pinning == Pinning::Value {
                    ScopeToken::TOP
                } else {
                    ScopeToken::UNRESTRICTED
                }
            }
            ExprKind::This | ExprKind::Base => ScopeToken::UNRESTRICTED,
            ExprKind::StackAlloc { .. } => self.current_depth(),
            ExprKind::FieldAccess { receiver, field } => {
                if self.symbols.field(*field).is_static {
                    ScopeToken::UNRESTRICTED
                } else {
                    receiver.as_deref().map_or(ScopeToken::UNRESTRICTED, |r| self.value_escape_scope(r))
                }
            }
            ExprKind::EventAccess { receiver, event } => {
                if self.symbols.event(*event).is_static {
                    ScopeToken::UNRESTRICTED
                } else {
                    receiver.as_deref().map_or(ScopeToken::UNRESTRICTED, |r| self.value_escape_scope(r))
                }
            }
            ExprKind::Conditional { when_true, when_false, .. } => self
                .value_escape_scope(when_true)
                .narrowest_of(self.value_escape_scope(when_false)),
            ExprKind::Coalesce { left, right } => {
                self.value_escape_scope(left).narrowest_of(self.value_escape_scope(right))
            }
            ExprKind::ConditionalAccess { receiver, access } => {
                self.value_escape_scope(receiver).narrowest_of(self.value_escape_scope(access))
            }
            ExprKind::Switch { arms, .. } => arms.iter().fold(ScopeToken::UNRESTRICTED, |scope, arm| {
                scope.narrowest_of(self.value_escape_scope(&arm.value))
            }),
            ExprKind::TupleLiteral { elements } => {
                elements.iter().fold(ScopeToken::UNRESTRICTED, |scope, element| {
                    scope.narrowest_of(self.value_escape_scope(element))
                })
            }
            ExprKind::InterpolatedHandler { construction } => self.value_escape_scope(construction),
            ExprKind::Assignment { value, .. } => self.value_escape_scope(value),
            ExprKind::Conversion { operand } => self.value_escape_scope(operand),
            // Operator nodes left after the shape dispatch are built-in.
            ExprKind::Unary { operand, .. } | ExprKind::IncrementDecrement { operand, .. } => {
                self.value_escape_scope(operand)
            }
            ExprKind::Binary { left, right, .. } => {
                self.value_escape_scope(left).narrowest_of(self.value_escape_scope(right))
            }
            ExprKind::CompoundAssignment { target, value, .. } => {
                self.value_escape_scope(target).narrowest_of(self.value_escape_scope(value))
            }
            ExprKind::DeclarationExpression { local } => self.local_value_scope(*local),
            ExprKind::Discard => self.current_depth(),
            ExprKind::ArrayAccess { .. }
            | ExprKind::PointerElementAccess { .. }
            | ExprKind::PointerDeref { .. }
            | ExprKind::AddressOf { .. }
            | ExprKind::Throw => ScopeToken::UNRESTRICTED,
            ExprKind::TypeRef | ExprKind::NamespaceRef | ExprKind::FunctionGroup { .. } => {
                debug_assert!(false, "escape scope requested for a non-value expression");
                self.current_depth()
            }
            _ => ScopeToken::UNRESTRICTED,
        }
    }

    /// Widest scope a reference to the expression's storage may escape to.
    /// Anything without durable storage is referenced through a temporary
    /// confined to the current block.
    pub fn ref_escape_scope(&self, expr: &BoundExpr) -> ScopeToken {
        if expr.has_errors() {
            return ScopeToken::UNRESTRICTED;
        }
        if let Some(shape) = self.call_shape_of(expr) {
            if shape.return_ref_kind.is_by_ref() {
                return self.invocation_escape_scope(&shape, true);
            }
            return self.current_depth();
        }
        match &expr.kind {
            ExprKind::Local(id) => self.local_ref_scope(*id),
            ExprKind::Parameter(id) => {
                let param = self.symbols.param(*id);
                if !param.ref_kind.is_by_ref() || param.pinning == Pinning::Reference {
                    ScopeToken::TOP
                } else if param.ref_kind == RefKind::Out
                    && self.options.default_escape_rules == EscapeRules::Modern
                {
                    ScopeToken::RETURN_ONLY
                } else {
                    ScopeToken::UNRESTRICTED
                }
            }
            ExprKind::This | ExprKind::Base => ScopeToken::TOP,
            ExprKind::FieldAccess { receiver, field } => {
                let field = self.symbols.field(*field);
                if field.is_static {
                    return ScopeToken::UNRESTRICTED;
                }
                match receiver.as_deref() {
                    None => ScopeToken::UNRESTRICTED,
                    Some(r) if !r.ty.is_value_type() => ScopeToken::UNRESTRICTED,
                    Some(r) => {
                        if field.is_ref_field
                            && self.options.default_escape_rules == EscapeRules::Modern
                        {
                            // The stored reference lives at least as long as
                            // any place the receiver's value could go.
                            self.value_escape_scope(r)
                        } else {
                            self.ref_escape_scope(r)
                        }
                    }
                }
            }
            ExprKind::ArrayAccess { .. }
            | ExprKind::PointerElementAccess { .. }
            | ExprKind::PointerDeref { .. } => ScopeToken::UNRESTRICTED,
            ExprKind::Conditional { when_true, when_false, is_by_ref: true, .. } => self
                .ref_escape_scope(when_true)
                .narrowest_of(self.ref_escape_scope(when_false)),
            ExprKind::Assignment { value, is_by_ref: true, .. } => self.ref_escape_scope(value),
            ExprKind::DeclarationExpression { local } => self.local_ref_scope(*local),
            _ => self.current_depth(),
        }
    }

    /// Escape scope of a call result on the requested channel: the fold over
    /// argument channels the member's rule set says the result could alias.
    pub fn invocation_escape_scope(&self, shape: &CallShape<'_>, is_ref: bool) -> ScopeToken {
        if shape.has_errors {
            return ScopeToken::UNRESTRICTED;
        }
        match shape.escape_rules {
            EscapeRules::Legacy => self.legacy_invocation_escape(shape, is_ref),
            EscapeRules::Modern => self.modern_invocation_escape(shape, is_ref),
        }
    }

    /// Legacy fold: every argument confines the result. By-ref arguments of
    /// non-view type contribute their ref escape to a by-ref result;
    /// everything else contributes its value escape.
    fn legacy_invocation_escape(&self, shape: &CallShape<'_>, is_ref: bool) -> ScopeToken {
        let depth = self.current_depth();
        let mut scope = ScopeToken::UNRESTRICTED;
        for projection in shape.projections() {
            let uses_ref =
                is_ref && projection.ref_kind.is_by_ref() && !projection.argument.ty.is_view();
            let contributed = if uses_ref {
                self.ref_escape_scope(projection.argument)
            } else {
                self.value_escape_scope(projection.argument)
            };
            scope = scope.narrowest_of(contributed);
            if scope == depth {
                // Already as narrow as anything at this call site can be.
                return scope;
            }
        }
        if is_ref && shape.unmatched_optional_in().is_some() {
            scope = scope.narrowest_of(depth);
        }
        if let Some(receiver) = shape.receiver {
            if receiver.ty.is_view() {
                scope = scope.narrowest_of(self.value_escape_scope(receiver));
            }
        }
        scope
    }

    fn modern_invocation_escape(&self, shape: &CallShape<'_>, is_ref: bool) -> ScopeToken {
        let depth = self.current_depth();
        let returns_ref_to_view = shape.returns_ref_to_view();
        let mut scope = ScopeToken::UNRESTRICTED;
        for contribution in self.escape_contributions_of(shape) {
            if !included_in_result(shape, &contribution, is_ref, returns_ref_to_view) {
                continue;
            }
            scope = scope.narrowest_of(contribution.scope);
            if scope == depth {
                break;
            }
        }
        if is_ref && shape.unmatched_optional_in().is_some() {
            scope = scope.narrowest_of(depth);
        }
        scope
    }

    /// Every channel of the call through which a value or reference could
    /// flow out of an argument, with its synthesized scope.
    pub fn escape_contributions_of<'s>(&self, shape: &'s CallShape<'s>) -> Vec<EscapeContribution<'s>> {
        let mut contributions = Vec::new();
        if let Some(receiver) = shape.receiver {
            if receiver.ty.is_view() {
                contributions.push(EscapeContribution {
                    param: None,
                    argument: receiver,
                    scope: self.value_escape_scope(receiver),
                    is_ref_escape: false,
                });
            }
        }
        for projection in shape.projections() {
            let pinning = projection.param.map_or(Pinning::None, |p| p.pinning);
            // An out channel only carries data back to the caller.
            if projection.ref_kind != RefKind::Out
                && projection.argument.ty.is_view()
                && pinning != Pinning::Value
            {
                contributions.push(EscapeContribution {
                    param: projection.param,
                    argument: projection.argument,
                    scope: self.value_escape_scope(projection.argument),
                    is_ref_escape: false,
                });
            }
            if projection.ref_kind.is_by_ref() && pinning != Pinning::Reference {
                contributions.push(EscapeContribution {
                    param: projection.param,
                    argument: projection.argument,
                    scope: self.ref_escape_scope(projection.argument),
                    is_ref_escape: true,
                });
            }
        }
        contributions
    }

    /// Every place the call could store a view value into: the receiver of
    /// a non-readonly member and each writable by-ref view argument.
    pub fn writeback_destinations_of<'s>(
        &self,
        shape: &'s CallShape<'s>,
    ) -> Vec<WritebackDestination<'s>> {
        let mut destinations = Vec::new();
        if let Some(receiver) = shape.receiver {
            if receiver.ty.is_view() && !shape.is_readonly_member {
                destinations.push(WritebackDestination {
                    param: None,
                    argument: receiver,
                    scope: self.value_escape_scope(receiver),
                });
            }
        }
        for projection in shape.projections() {
            if projection.ref_kind.is_writable_ref() && projection.argument.ty.is_view() {
                destinations.push(WritebackDestination {
                    param: projection.param,
                    argument: projection.argument,
                    scope: self.value_escape_scope(projection.argument),
                });
            }
        }
        destinations
    }

    /// Validates that `expr` may escape to `required` on the value channel
    /// (`by_ref` false) or the reference channel (`by_ref` true). Reports at
    /// most one diagnostic, placed on the narrowest-scoped part responsible.
    pub fn check_escape(
        &mut self,
        expr: &BoundExpr,
        required: ScopeToken,
        by_ref: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        self.begin_escape_pass();
        if by_ref {
            self.check_ref_escape(expr, required, sink)
        } else {
            self.check_val_escape(expr, required, sink)
        }
    }

    fn check_val_escape(
        &mut self,
        expr: &BoundExpr,
        required: ScopeToken,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if expr.has_errors() {
            return true;
        }
        if expr.is_constant() || !expr.ty.is_view() {
            return true;
        }
        self.note_visited(expr, false);
        if let Some(shape) = self.call_shape_of(expr) {
            if !self.check_invocation_escape(expr, &shape, required, false, sink) {
                return false;
            }
            if let ExprKind::ObjectCreation { initializer, .. } = &expr.kind {
                for item in initializer {
                    if !self.check_val_escape(item, required, sink) {
                        return false;
                    }
                }
            }
            return true;
        }
        match &expr.kind {
            ExprKind::Local(_)
            | ExprKind::Parameter(_)
            | ExprKind::This
            | ExprKind::Base
            | ExprKind::DeclarationExpression { .. } => {
                let scope = self.value_escape_scope(expr);
                self.check_leaf_escape(expr, scope, required, false, sink)
            }
            ExprKind::StackAlloc { .. } => {
                if self.current_depth().convertible_to(required) {
                    return true;
                }
                self.report_escape(
                    sink,
                    DiagnosticCode::EscapeStackAlloc,
                    expr.span,
                    format!("a stack-allocated buffer {}", escape_wording(required, false)),
                )
            }
            ExprKind::FieldAccess { receiver, field } => {
                if self.symbols.field(*field).is_static {
                    return true;
                }
                match receiver.as_deref() {
                    Some(r) => self.check_val_escape(r, required, sink),
                    None => true,
                }
            }
            ExprKind::EventAccess { receiver, event } => {
                if self.symbols.event(*event).is_static {
                    return true;
                }
                match receiver.as_deref() {
                    Some(r) => self.check_val_escape(r, required, sink),
                    None => true,
                }
            }
            ExprKind::Conditional { when_true, when_false, .. } => {
                self.check_val_escape(when_true, required, sink)
                    && self.check_val_escape(when_false, required, sink)
            }
            ExprKind::Coalesce { left, right } => {
                self.check_val_escape(left, required, sink)
                    && self.check_val_escape(right, required, sink)
            }
            ExprKind::ConditionalAccess { receiver, access } => {
                self.check_val_escape(receiver, required, sink)
                    && self.check_val_escape(access, required, sink)
            }
            ExprKind::Switch { arms, .. } => arms
                .iter()
                .all(|arm| self.check_val_escape(&arm.value, required, sink)),
            ExprKind::TupleLiteral { elements } => elements
                .iter()
                .all(|element| self.check_val_escape(element, required, sink)),
            ExprKind::InterpolatedHandler { construction } => {
                self.check_val_escape(construction, required, sink)
            }
            ExprKind::Assignment { value, .. } => self.check_val_escape(value, required, sink),
            ExprKind::Conversion { operand } => self.check_val_escape(operand, required, sink),
            ExprKind::Unary { operand, .. } | ExprKind::IncrementDecrement { operand, .. } => {
                self.check_val_escape(operand, required, sink)
            }
            ExprKind::Binary { left, right, .. } => {
                self.check_val_escape(left, required, sink)
                    && self.check_val_escape(right, required, sink)
            }
            ExprKind::CompoundAssignment { target, value, .. } => {
                self.check_val_escape(target, required, sink)
                    && self.check_val_escape(value, required, sink)
            }
            ExprKind::ArrayAccess { .. }
            | ExprKind::PointerElementAccess { .. }
            | ExprKind::PointerDeref { .. }
            | ExprKind::AddressOf { .. }
            | ExprKind::Throw => true,
            ExprKind::TypeRef | ExprKind::NamespaceRef | ExprKind::FunctionGroup { .. } => {
                debug_assert!(false, "escape requested for a non-value expression");
                true
            }
            _ => {
                let scope = self.value_escape_scope(expr);
                self.check_expression_escape(expr, scope, required, false, sink)
            }
        }
    }

    fn check_ref_escape(
        &mut self,
        expr: &BoundExpr,
        required: ScopeToken,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if expr.has_errors() {
            return true;
        }
        self.note_visited(expr, true);
        if let Some(shape) = self.call_shape_of(expr) {
            if shape.return_ref_kind.is_by_ref() {
                return self.check_invocation_escape(expr, &shape, required, true, sink);
            }
            let depth = self.current_depth();
            return self.check_expression_escape(expr, depth, required, true, sink);
        }
        match &expr.kind {
            ExprKind::Local(_)
            | ExprKind::Parameter(_)
            | ExprKind::This
            | ExprKind::Base
            | ExprKind::DeclarationExpression { .. } => {
                let scope = self.ref_escape_scope(expr);
                self.check_leaf_escape(expr, scope, required, true, sink)
            }
            ExprKind::FieldAccess { receiver, field } => {
                let field = self.symbols.field(*field);
                if field.is_static {
                    return true;
                }
                match receiver.as_deref() {
                    None => true,
                    Some(r) if !r.ty.is_value_type() => true,
                    Some(r) => {
                        if field.is_ref_field
                            && self.options.default_escape_rules == EscapeRules::Modern
                        {
                            self.check_val_escape(r, required, sink)
                        } else {
                            self.check_ref_escape(r, required, sink)
                        }
                    }
                }
            }
            ExprKind::ArrayAccess { .. }
            | ExprKind::PointerElementAccess { .. }
            | ExprKind::PointerDeref { .. } => true,
            ExprKind::Conditional { when_true, when_false, is_by_ref: true, .. } => {
                self.check_ref_escape(when_true, required, sink)
                    && self.check_ref_escape(when_false, required, sink)
            }
            ExprKind::Assignment { value, is_by_ref: true, .. } => {
                self.check_ref_escape(value, required, sink)
            }
            _ => {
                let scope = self.ref_escape_scope(expr);
                self.check_expression_escape(expr, scope, required, true, sink)
            }
        }
    }

    /// Re-runs the synthesis fold, but compares each included channel
    /// against `required` and blames the first channel that narrows past it.
    fn check_invocation_escape(
        &self,
        expr: &BoundExpr,
        shape: &CallShape<'_>,
        required: ScopeToken,
        is_ref: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if shape.has_errors {
            return true;
        }
        let wording = escape_wording(required, is_ref);
        match shape.escape_rules {
            EscapeRules::Legacy => {
                for projection in shape.projections() {
                    let uses_ref = is_ref
                        && projection.ref_kind.is_by_ref()
                        && !projection.argument.ty.is_view();
                    let scope = if uses_ref {
                        self.ref_escape_scope(projection.argument)
                    } else {
                        self.value_escape_scope(projection.argument)
                    };
                    if !scope.convertible_to(required) {
                        let message = match projection.param {
                            Some(p) => format!(
                                "the result of '{}' {wording} because the argument for parameter '{}' is confined to a narrower scope",
                                shape.member_name, p.name
                            ),
                            None => format!(
                                "the result of '{}' {wording} because one of its arguments is confined to a narrower scope",
                                shape.member_name
                            ),
                        };
                        return self.report_escape(
                            sink,
                            DiagnosticCode::EscapeCall,
                            projection.argument.span,
                            message,
                        );
                    }
                }
                if let Some(receiver) = shape.receiver {
                    if receiver.ty.is_view()
                        && !self.value_escape_scope(receiver).convertible_to(required)
                    {
                        let message = format!(
                            "the result of '{}' {wording} because its receiver is confined to a narrower scope",
                            shape.member_name
                        );
                        return self.report_escape(
                            sink,
                            DiagnosticCode::EscapeCallReceiver,
                            receiver.span,
                            message,
                        );
                    }
                }
            }
            EscapeRules::Modern => {
                let returns_ref_to_view = shape.returns_ref_to_view();
                for contribution in self.escape_contributions_of(shape) {
                    if !included_in_result(shape, &contribution, is_ref, returns_ref_to_view) {
                        continue;
                    }
                    if contribution.scope.convertible_to(required) {
                        continue;
                    }
                    let (code, message) = match contribution.param {
                        Some(p) => (
                            DiagnosticCode::EscapeCall,
                            format!(
                                "the result of '{}' {wording} because the argument for parameter '{}' is confined to a narrower scope",
                                shape.member_name, p.name
                            ),
                        ),
                        None => (
                            DiagnosticCode::EscapeCallReceiver,
                            format!(
                                "the result of '{}' {wording} because its receiver is confined to a narrower scope",
                                shape.member_name
                            ),
                        ),
                    };
                    return self.report_escape(sink, code, contribution.argument.span, message);
                }
            }
        }
        if is_ref && !self.current_depth().convertible_to(required) {
            if let Some(param) = shape.unmatched_optional_in() {
                let message = format!(
                    "the result of '{}' {wording} because the default argument for parameter '{}' lives only at the call site",
                    shape.member_name, param.name
                );
                return self.report_escape(sink, DiagnosticCode::EscapeCall, expr.span, message);
            }
        }
        true
    }

    /// Ref reassignment: the source must refer to storage at least as wide
    /// as the target's, and the source's value must fit the target's value
    /// scope.
    pub fn check_ref_rebind(
        &mut self,
        span: Span,
        target: &BoundExpr,
        source: &BoundExpr,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if target.has_errors() || source.has_errors() {
            return true;
        }
        let target_ref = self.ref_escape_scope(target);
        let source_ref = self.ref_escape_scope(source);
        if !source_ref.convertible_to(target_ref) {
            let message = format!(
                "cannot ref-reassign {}: {} refers to storage confined to a narrower scope",
                self.describe(target),
                self.describe(source)
            );
            if !self.report_escape(sink, DiagnosticCode::RefRebindNarrower, span, message) {
                return false;
            }
        }
        let required = self.value_escape_scope(target);
        self.begin_escape_pass();
        self.check_val_escape(source, required, sink)
    }

    /// Could this call store one argument's view into another argument whose
    /// scope is wider? Checked pairwise for modern members, against a single
    /// widest destination for legacy ones. Never downgraded in unsafe
    /// regions: the stores happen in safe code at the call site.
    pub fn check_argument_mixing(
        &mut self,
        shape: &CallShape<'_>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if shape.has_errors {
            return true;
        }
        self.infer_declaration_scopes(shape);
        match shape.escape_rules {
            EscapeRules::Legacy => self.check_legacy_mixing(shape, sink),
            EscapeRules::Modern => self.check_modern_mixing(shape, sink),
        }
    }

    /// Out-variable declarations in the argument list take their value scope
    /// from the widest thing the call could store into them: the narrowest
    /// value escape among the by-value arguments. Their storage is the
    /// current block.
    fn infer_declaration_scopes(&mut self, shape: &CallShape<'_>) {
        let mut declared = Vec::new();
        let mut value = ScopeToken::UNRESTRICTED;
        for projection in shape.projections() {
            match &projection.argument.kind {
                ExprKind::DeclarationExpression { local } => declared.push(*local),
                _ if projection.ref_kind == RefKind::None => {
                    value = value.narrowest_of(self.value_escape_scope(projection.argument));
                }
                _ => {}
            }
        }
        if declared.is_empty() {
            return;
        }
        let reference = self.current_depth();
        for local in declared {
            self.declare_local_scopes(local, value, reference);
        }
    }

    fn check_legacy_mixing(
        &mut self,
        shape: &CallShape<'_>,
        sink: &mut DiagnosticSink,
    ) -> bool {
        let depth = self.current_depth();
        let mut escape_to = depth;
        if let Some(receiver) = shape.receiver {
            if receiver.ty.is_view() && !shape.is_readonly_member {
                escape_to = escape_to.widest_of(self.value_escape_scope(receiver));
            }
        }
        for projection in shape.projections() {
            if projection.ref_kind.is_writable_ref() && projection.argument.ty.is_view() {
                escape_to = escape_to.widest_of(self.value_escape_scope(projection.argument));
            }
        }
        if escape_to == depth {
            // Nothing written by the call can leave the call site.
            return true;
        }
        if let Some(receiver) = shape.receiver {
            if receiver.ty.is_view() && !self.value_escape_scope(receiver).convertible_to(escape_to) {
                let message = format!(
                    "cannot mix arguments to '{}': the receiver is confined to a narrower scope than a destination the call can write into",
                    shape.member_name
                );
                sink.report(DiagnosticCode::ArgumentMixing, receiver.span, message);
                return false;
            }
        }
        for projection in shape.projections() {
            if !projection.argument.ty.is_view() {
                continue;
            }
            if !self.value_escape_scope(projection.argument).convertible_to(escape_to) {
                let channel = match projection.param {
                    Some(p) => format!("parameter '{}'", p.name),
                    None => "this argument".to_string(),
                };
                let message = format!(
                    "cannot mix arguments to '{}': the argument for {channel} is confined to a narrower scope than a destination the call can write into",
                    shape.member_name
                );
                sink.report(DiagnosticCode::ArgumentMixing, projection.argument.span, message);
                return false;
            }
        }
        true
    }

    fn check_modern_mixing(&mut self, shape: &CallShape<'_>, sink: &mut DiagnosticSink) -> bool {
        let destinations = self.writeback_destinations_of(shape);
        if destinations.is_empty() {
            return true;
        }
        let contributions = self.escape_contributions_of(shape);
        for destination in &destinations {
            for contribution in &contributions {
                // No view can store a reference to a view, so ref channels
                // of view-typed arguments cannot land in any destination.
                if contribution.is_ref_escape && contribution.argument.ty.is_view() {
                    continue;
                }
                // An unrestricted contribution fits any destination, so only
                // pairs the destination's class accepts need the comparison.
                if !destination.class().accepts(contribution.class()) {
                    continue;
                }
                if !contribution.scope.convertible_to(destination.scope) {
                    let message = format!(
                        "cannot mix arguments to '{}': {} is confined to a narrower scope than {}, which the call can write into",
                        shape.member_name,
                        contribution.channel_name(),
                        destination.channel_name()
                    );
                    sink.report(DiagnosticCode::ArgumentMixing, contribution.argument.span, message);
                    return false;
                }
            }
        }
        true
    }

    /// One shape for every call-like surface form; `None` for everything
    /// else. Built-in operators (no user-defined method) have no shape.
    pub(crate) fn call_shape_of<'e>(&self, expr: &'e BoundExpr) -> Option<CallShape<'e>> {
        let shape = match &expr.kind {
            ExprKind::Call { receiver, method, args, arg_ref_kinds, args_to_params } => {
                CallShape::for_method(
                    self.symbols,
                    *method,
                    receiver.as_deref(),
                    args,
                    arg_ref_kinds,
                    args_to_params.clone(),
                )
            }
            ExprKind::IndexerAccess { receiver, property, args, arg_ref_kinds, args_to_params } => {
                CallShape::for_property(
                    self.symbols,
                    *property,
                    Some(receiver),
                    args,
                    arg_ref_kinds,
                    args_to_params.clone(),
                    PropertyUse::Read,
                )
            }
            ExprKind::PropertyAccess { receiver, property } => CallShape::for_property(
                self.symbols,
                *property,
                receiver.as_deref(),
                &[],
                &[],
                None,
                PropertyUse::Read,
            ),
            ExprKind::ObjectCreation { ctor, args, arg_ref_kinds, args_to_params, .. } => {
                CallShape::for_constructor(
                    self.symbols,
                    *ctor,
                    args,
                    arg_ref_kinds,
                    args_to_params.clone(),
                )
            }
            ExprKind::FunctionPointerCall { signature, args, arg_ref_kinds, .. } => {
                CallShape::for_function_pointer(
                    self.symbols,
                    *signature,
                    args,
                    arg_ref_kinds,
                    self.options.default_escape_rules,
                )
            }
            ExprKind::InlineArrayAccess { receiver, argument, is_slice } => {
                CallShape::for_inline_array(receiver, argument, *is_slice, expr.ty.clone())
            }
            ExprKind::Unary { operand, operator: Some(op) } => {
                CallShape::for_operator(self.symbols, *op, vec![operand.as_ref()])
            }
            ExprKind::Binary { left, right, operator: Some(op) } => {
                CallShape::for_operator(self.symbols, *op, vec![left.as_ref(), right.as_ref()])
            }
            ExprKind::CompoundAssignment { target, value, operator: Some(op) } => {
                CallShape::for_operator(self.symbols, *op, vec![target.as_ref(), value.as_ref()])
            }
            ExprKind::IncrementDecrement { operand, operator: Some(op) } => {
                CallShape::for_operator(self.symbols, *op, vec![operand.as_ref()])
            }
            _ => return None,
        };
        Some(shape.normalized())
    }

    fn check_leaf_escape(
        &self,
        expr: &BoundExpr,
        scope: ScopeToken,
        required: ScopeToken,
        by_ref: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if scope.convertible_to(required) {
            return true;
        }
        let message = format!("{} {}", self.describe(expr), escape_wording(required, by_ref));
        self.report_escape(sink, DiagnosticCode::EscapeVariable, expr.span, message)
    }

    fn check_expression_escape(
        &self,
        expr: &BoundExpr,
        scope: ScopeToken,
        required: ScopeToken,
        by_ref: bool,
        sink: &mut DiagnosticSink,
    ) -> bool {
        if scope.convertible_to(required) {
            return true;
        }
        let message = format!("this expression {}", escape_wording(required, by_ref));
        self.report_escape(sink, DiagnosticCode::EscapeExpression, expr.span, message)
    }

    /// Reports an escape-family violation. Inside an unsafe region the
    /// violation is demoted to a warning and the check passes.
    fn report_escape(
        &self,
        sink: &mut DiagnosticSink,
        code: DiagnosticCode,
        span: Span,
        message: String,
    ) -> bool {
        if self.in_unsafe_region() {
            sink.report(DiagnosticCode::UnsafeEscape, span, message);
            true
        } else {
            sink.report(code, span, message);
            false
        }
    }

    fn describe(&self, expr: &BoundExpr) -> String {
        match &expr.kind {
            ExprKind::Local(id) => format!("local '{}'", self.symbols.local(*id).name),
            ExprKind::Parameter(id) => format!("parameter '{}'", self.symbols.param(*id).name),
            ExprKind::This => "'this'".to_string(),
            ExprKind::Base => "'base'".to_string(),
            ExprKind::DeclarationExpression { local } => {
                format!("local '{}'", self.symbols.local(*local).name)
            }
            ExprKind::FieldAccess { field, .. } => {
                format!("field '{}'", self.symbols.field(*field).name)
            }
            _ => "this expression".to_string(),
        }
    }
}

/// Which contributions the member could alias into its result. A member
/// returning a reference into a view can only hand back references obtained
/// through by-ref view channels; any other member may return anything it can
/// read, except that a non-view result cannot carry a reference out.
fn included_in_result(
    shape: &CallShape<'_>,
    contribution: &EscapeContribution<'_>,
    is_ref: bool,
    returns_ref_to_view: bool,
) -> bool {
    if returns_ref_to_view {
        contribution.ref_to_view_channel() && contribution.is_ref_escape == is_ref
    } else {
        is_ref || !contribution.is_ref_escape || shape.return_type.is_view()
    }
}

/// Diagnostic wording keyed to whether the required scope crosses the
/// function boundary.
fn escape_wording(required: ScopeToken, by_ref: bool) -> &'static str {
    match (required.leaves_function(), by_ref) {
        (true, false) => "cannot be returned from the function",
        (true, true) => "cannot be returned from the function by reference",
        (false, false) => "cannot escape this scope",
        (false, true) => "cannot escape this scope by reference",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_tree::{
        span, LocalSymbol, MemberContext, MethodSymbol, ParamSymbol, Symbols, Type,
    };

    fn view_ty() -> Type {
        Type::buffer(Type::Int)
    }

    #[test]
    fn stackalloc_is_confined_to_the_block_that_runs_it() {
        let symbols = Symbols::new();
        let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
        checker.enter_block();
        let alloc = BoundExpr::stack_alloc(
            span(0, 12),
            view_ty(),
            BoundExpr::literal(span(10, 2), Type::Int),
        );
        assert_eq!(checker.value_escape_scope(&alloc), ScopeToken::TOP.nested());

        let mut sink = DiagnosticSink::new();
        assert!(checker.check_escape(&alloc, checker.current_depth(), false, &mut sink));
        assert!(sink.is_empty());

        let mut sink = DiagnosticSink::new();
        assert!(!checker.check_escape(&alloc, ScopeToken::UNRESTRICTED, false, &mut sink));
        let err = sink.first_error().unwrap();
        assert_eq!(err.code, DiagnosticCode::EscapeStackAlloc);
        assert!(err.message.contains("cannot be returned from the function"));
    }

    #[test]
    fn parameters_return_freely_unless_pinned() {
        let mut symbols = Symbols::new();
        let free = symbols.add_param(ParamSymbol::new("wide", view_ty()));
        let pinned = symbols.add_param(ParamSymbol::new("held", view_ty()).pinned(Pinning::Value));
        let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));

        let expr = BoundExpr::parameter(span(0, 4), view_ty(), free);
        let mut sink = DiagnosticSink::new();
        assert!(checker.check_escape(&expr, ScopeToken::UNRESTRICTED, false, &mut sink));

        let expr = BoundExpr::parameter(span(0, 4), view_ty(), pinned);
        let mut sink = DiagnosticSink::new();
        assert!(!checker.check_escape(&expr, ScopeToken::RETURN_ONLY, false, &mut sink));
        let err = sink.first_error().unwrap();
        assert_eq!(err.code, DiagnosticCode::EscapeVariable);
        assert!(err.message.contains("parameter 'held'"));
    }

    #[test]
    fn legacy_call_results_are_confined_by_every_argument() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![ParamSymbol::new("src", view_ty())]);
        let method = symbols.add_method(
            MethodSymbol::new("tail", view_ty())
                .static_method()
                .with_params(params)
                .legacy_rules(),
        );
        let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));

        let args = vec![BoundExpr::stack_alloc(
            span(5, 12),
            view_ty(),
            BoundExpr::literal(span(15, 2), Type::Int),
        )];
        let call = BoundExpr::call(span(0, 18), view_ty(), None, method, args, vec![RefKind::None]);
        assert_eq!(checker.value_escape_scope(&call), ScopeToken::TOP);

        let mut sink = DiagnosticSink::new();
        assert!(!checker.check_escape(&call, ScopeToken::UNRESTRICTED, false, &mut sink));
        let err = sink.first_error().unwrap();
        assert_eq!(err.code, DiagnosticCode::EscapeCall);
        assert!(err.message.contains("parameter 'src'"));

        let wide_args = vec![BoundExpr::default_value(span(5, 7), view_ty())];
        let call =
            BoundExpr::call(span(0, 13), view_ty(), None, method, wide_args, vec![RefKind::None]);
        let mut sink = DiagnosticSink::new();
        assert!(checker.check_escape(&call, ScopeToken::UNRESTRICTED, false, &mut sink));
    }

    #[test]
    fn ref_to_view_returns_ignore_by_value_channels() {
        let mut symbols = Symbols::new();
        let ref_params = symbols.add_params(vec![ParamSymbol::new("src", view_ty())]);
        let by_ref = symbols.add_method(
            MethodSymbol::new("peek", view_ty())
                .static_method()
                .with_params(ref_params)
                .returns_ref(),
        );
        let val_params = symbols.add_params(vec![ParamSymbol::new("src", view_ty())]);
        let by_value = symbols.add_method(
            MethodSymbol::new("copy", view_ty()).static_method().with_params(val_params),
        );
        let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));

        let confined = || {
            BoundExpr::stack_alloc(
                span(6, 12),
                view_ty(),
                BoundExpr::literal(span(16, 2), Type::Int),
            )
        };

        // By-value channels cannot feed a reference into a view, so the
        // confined argument does not restrict the by-ref-returning call.
        let call =
            BoundExpr::call(span(0, 20), view_ty(), None, by_ref, vec![confined()], vec![RefKind::None]);
        let mut sink = DiagnosticSink::new();
        assert!(checker.check_escape(&call, ScopeToken::UNRESTRICTED, false, &mut sink));

        let call =
            BoundExpr::call(span(0, 20), view_ty(), None, by_value, vec![confined()], vec![RefKind::None]);
        let mut sink = DiagnosticSink::new();
        assert!(!checker.check_escape(&call, ScopeToken::UNRESTRICTED, false, &mut sink));
        assert_eq!(sink.first_error().unwrap().code, DiagnosticCode::EscapeCall);
    }

    #[test]
    fn contributions_skip_out_channels_and_pinned_params() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("sink", view_ty()).by_ref(RefKind::Out),
            ParamSymbol::new("held", view_ty()).pinned(Pinning::Value),
            ParamSymbol::new("open", view_ty()).by_ref(RefKind::Ref),
        ]);
        let method = symbols.add_method(
            MethodSymbol::new("fill", Type::Unit).static_method().with_params(params),
        );
        let a = symbols.add_local(LocalSymbol::new("a", view_ty()));
        let b = symbols.add_local(LocalSymbol::new("b", view_ty()));
        let c = symbols.add_local(LocalSymbol::new("c", view_ty()));
        let args = vec![
            BoundExpr::local(span(0, 1), view_ty(), a),
            BoundExpr::local(span(2, 1), view_ty(), b),
            BoundExpr::local(span(4, 1), view_ty(), c),
        ];
        let kinds = vec![RefKind::Out, RefKind::None, RefKind::Ref];
        let call = BoundExpr::call(span(0, 5), Type::Unit, None, method, args, kinds);

        let checker = Checker::new(&symbols, MemberContext::function("Lab"));
        let shape = checker.call_shape_of(&call).unwrap();
        let contributions = checker.escape_contributions_of(&shape);
        let names: Vec<(String, bool)> = contributions
            .iter()
            .map(|c| (c.channel_name(), c.is_ref_escape))
            .collect();
        assert_eq!(
            names,
            vec![
                ("parameter 'sink'".to_string(), true),
                ("parameter 'open'".to_string(), false),
                ("parameter 'open'".to_string(), true),
            ]
        );
    }

    #[test]
    fn mixing_rejects_a_confined_value_reaching_a_wide_destination() {
        let mut symbols = Symbols::new();
        let params = symbols.add_params(vec![
            ParamSymbol::new("x", view_ty()).by_ref(RefKind::Ref),
            ParamSymbol::new("y", view_ty()).by_ref(RefKind::Ref),
        ]);
        let method = symbols.add_method(
            MethodSymbol::new("exchange", Type::Unit).static_method().with_params(params),
        );
        let wide = symbols.add_local(LocalSymbol::new("a", view_ty()));
        let narrow = symbols.add_local(LocalSymbol::new("b", view_ty()));

        let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
        checker.declare_local_scopes(wide, ScopeToken::UNRESTRICTED, ScopeToken::TOP);
        checker.declare_local_scopes(narrow, ScopeToken::TOP, ScopeToken::TOP);

        let args = vec![
            BoundExpr::local(span(9, 1), view_ty(), wide),
            BoundExpr::local(span(11, 1), view_ty(), narrow),
        ];
        let call = BoundExpr::call(
            span(0, 13),
            Type::Unit,
            None,
            method,
            args,
            vec![RefKind::Ref, RefKind::Ref],
        );
        let shape = checker.call_shape_of(&call).unwrap();
        let mut sink = DiagnosticSink::new();
        assert!(!checker.check_argument_mixing(&shape, &mut sink));
        let err = sink.first_error().unwrap();
        assert_eq!(err.code, DiagnosticCode::ArgumentMixing);
        assert!(err.message.contains("cannot mix arguments to 'exchange'"));
        assert!(err.message.contains("parameter 'y'"));
        assert!(err.message.contains("parameter 'x'"));
    }
}
