use vesper_core::{Capability, Checker, DiagnosticCode, DiagnosticSink, ScopeToken};
use vesper_tree::{
    span, BoundExpr, LocalSymbol, MemberContext, MethodSymbol, ParamSymbol, RefKind, Symbols, Type,
};

fn view_ty() -> Type {
    Type::buffer(Type::Int)
}

#[test]
fn sources_must_refer_to_storage_at_least_as_wide() {
    let mut symbols = Symbols::new();
    let held = symbols.add_local(LocalSymbol::new("held", Type::Int).by_ref(RefKind::Ref));
    let fresh = symbols.add_local(LocalSymbol::new("fresh", Type::Int));
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local_scopes(held, ScopeToken::UNRESTRICTED, ScopeToken::UNRESTRICTED);
    checker.declare_local(fresh);

    let target = BoundExpr::local(span(0, 4), Type::Int, held);
    let source = BoundExpr::local(span(11, 5), Type::Int, fresh);
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_ref_rebind(span(0, 16), &target, &source, &mut sink));
    let err = sink.first_error().unwrap();
    assert_eq!(err.code, DiagnosticCode::RefRebindNarrower);
    assert!(
        err.message.contains("cannot ref-reassign local 'held'")
            && err.message.contains("local 'fresh'"),
        "unexpected error: {}",
        err.message
    );
}

#[test]
fn matching_storage_rebinds_cleanly() {
    let mut symbols = Symbols::new();
    let held = symbols.add_local(LocalSymbol::new("held", Type::Int).by_ref(RefKind::Ref));
    let fresh = symbols.add_local(LocalSymbol::new("fresh", Type::Int));
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local_scopes(held, ScopeToken::UNRESTRICTED, ScopeToken::TOP);
    checker.declare_local(fresh);

    let target = BoundExpr::local(span(0, 4), Type::Int, held);
    let source = BoundExpr::local(span(11, 5), Type::Int, fresh);
    let mut sink = DiagnosticSink::new();
    assert!(checker.check_ref_rebind(span(0, 16), &target, &source, &mut sink));
    assert!(sink.is_empty());
}

#[test]
fn rebinding_views_checks_the_value_scope_too() {
    let mut symbols = Symbols::new();
    let slot = symbols.add_local(LocalSymbol::new("slot", view_ty()).by_ref(RefKind::Ref));
    let patch = symbols.add_local(LocalSymbol::new("patch", view_ty()));
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local_scopes(slot, ScopeToken::UNRESTRICTED, ScopeToken::TOP);
    checker.declare_local_scopes(patch, ScopeToken::TOP, ScopeToken::TOP);

    // Storage widths match; the confined value is what cannot cross.
    let target = BoundExpr::local(span(0, 4), view_ty(), slot);
    let source = BoundExpr::local(span(11, 5), view_ty(), patch);
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_ref_rebind(span(0, 16), &target, &source, &mut sink));
    let err = sink.first_error().unwrap();
    assert_eq!(err.code, DiagnosticCode::EscapeVariable);
    assert!(err.message.contains("local 'patch'"), "unexpected error: {}", err.message);
}

#[test]
fn only_ref_bindings_can_be_rebound() {
    let mut symbols = Symbols::new();
    let plain = symbols.add_local(LocalSymbol::new("plain", Type::Int));
    let held = symbols.add_local(LocalSymbol::new("held", Type::Int).by_ref(RefKind::Ref));
    let current = symbols
        .add_method(MethodSymbol::new("current", Type::Int).static_method().returns_ref());
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));

    let expr = BoundExpr::local(span(0, 5), Type::Int, plain);
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_value(&expr, Capability::REF_REBIND, &mut sink));
    let err = sink.first_error().unwrap();
    assert_eq!(err.code, DiagnosticCode::NotRebindable);
    assert!(err.message.contains("not a ref binding"), "unexpected error: {}", err.message);

    let expr = BoundExpr::local(span(0, 4), Type::Int, held);
    let mut sink = DiagnosticSink::new();
    assert!(checker.check_value(&expr, Capability::REF_REBIND, &mut sink));

    // Call results are references to storage, not rebindable names.
    let call = BoundExpr::call(span(0, 9), Type::Int, None, current, vec![], vec![]);
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_value(&call, Capability::REF_REBIND, &mut sink));
    let err = sink.first_error().unwrap();
    assert_eq!(err.code, DiagnosticCode::NotRebindable);
    assert!(
        err.message.contains("cannot ref-reassign the result of 'current'"),
        "unexpected error: {}",
        err.message
    );
}

#[test]
fn ref_conditionals_narrow_to_the_tighter_branch() {
    let mut symbols = Symbols::new();
    let left = symbols.add_param(ParamSymbol::new("left", Type::Int).by_ref(RefKind::Ref));
    let right = symbols.add_local(LocalSymbol::new("right", Type::Int));
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local(right);

    let pick = BoundExpr::ref_conditional(
        span(0, 24),
        Type::Int,
        BoundExpr::literal(span(0, 4), Type::Bool),
        BoundExpr::parameter(span(7, 4), Type::Int, left),
        BoundExpr::local(span(14, 5), Type::Int, right),
    );
    assert_eq!(checker.ref_escape_scope(&pick), ScopeToken::TOP);

    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_escape(&pick, ScopeToken::RETURN_ONLY, true, &mut sink));
    let err = sink.first_error().unwrap();
    assert_eq!(err.code, DiagnosticCode::EscapeVariable);
    assert!(
        err.message.contains("local 'right'")
            && err.message.contains("cannot be returned from the function by reference"),
        "unexpected error: {}",
        err.message
    );
}
