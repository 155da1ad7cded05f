use vesper_core::{
    Capability, CallShape, Checker, DiagnosticCode, DiagnosticSink, ScopeToken, Severity,
};
use vesper_tree::{
    span, BoundExpr, LocalSymbol, MemberContext, MethodSymbol, ParamSymbol, RefKind, Symbols, Type,
};

fn view_ty() -> Type {
    Type::buffer(Type::Int)
}

fn stack_buffer() -> BoundExpr {
    BoundExpr::stack_alloc(span(0, 12), view_ty(), BoundExpr::literal(span(10, 2), Type::Int))
}

#[test]
fn unsafe_blocks_demote_escape_violations_to_warnings() {
    let symbols = Symbols::new();
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.enter_unsafe();

    let alloc = stack_buffer();
    let mut sink = DiagnosticSink::new();
    assert!(checker.check_escape(&alloc, ScopeToken::UNRESTRICTED, false, &mut sink));
    assert!(!sink.has_errors());
    assert_eq!(sink.entries().len(), 1);
    let warning = &sink.entries()[0];
    assert_eq!(warning.code, DiagnosticCode::UnsafeEscape);
    assert_eq!(warning.severity, Severity::Warning);
    assert!(
        warning.message.contains("cannot be returned from the function"),
        "unexpected warning: {}",
        warning.message
    );
}

#[test]
fn capability_rejections_stay_hard_errors() {
    let mut symbols = Symbols::new();
    let frozen = symbols.add_local(LocalSymbol::new("frozen", Type::Int).immutable());
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.enter_unsafe();

    let expr = BoundExpr::local(span(0, 6), Type::Int, frozen);
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_value(&expr, Capability::ASSIGN, &mut sink));
    assert!(sink.has_errors());
    assert_eq!(sink.first_error().unwrap().code, DiagnosticCode::ReadOnlyWrite);
}

#[test]
fn mixing_rejections_stay_hard_errors() {
    let mut symbols = Symbols::new();
    let params = symbols.add_params(vec![
        ParamSymbol::new("dst", view_ty()).by_ref(RefKind::Out),
        ParamSymbol::new("src", view_ty()),
    ]);
    let fill = symbols
        .add_method(MethodSymbol::new("fill", Type::Unit).static_method().with_params(params));
    let wide = symbols.add_local(LocalSymbol::new("wide", view_ty()));

    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local(wide);
    checker.enter_unsafe();

    // The stores the call performs happen in safe code at the call site.
    let args = vec![BoundExpr::local(span(5, 4), view_ty(), wide), stack_buffer()];
    let shape =
        CallShape::for_method(&symbols, fill, None, &args, &[RefKind::Out, RefKind::None], None)
            .normalized();
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_argument_mixing(&shape, &mut sink));
    assert!(sink.has_errors());
    assert_eq!(sink.first_error().unwrap().code, DiagnosticCode::ArgumentMixing);
}

#[test]
fn leaving_the_unsafe_region_restores_errors() {
    let symbols = Symbols::new();
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.enter_unsafe();
    checker.enter_unsafe();
    checker.exit_unsafe();
    assert!(checker.in_unsafe_region());
    checker.exit_unsafe();
    assert!(!checker.in_unsafe_region());

    let alloc = stack_buffer();
    let mut sink = DiagnosticSink::new();
    assert!(!checker.check_escape(&alloc, ScopeToken::UNRESTRICTED, false, &mut sink));
    assert!(sink.has_errors());
    assert_eq!(sink.first_error().unwrap().code, DiagnosticCode::EscapeStackAlloc);
}

#[test]
fn narrow_rebinds_inside_unsafe_warn_and_continue() {
    let mut symbols = Symbols::new();
    let slot = symbols.add_local(LocalSymbol::new("slot", view_ty()).by_ref(RefKind::Ref));
    let patch = symbols.add_local(LocalSymbol::new("patch", view_ty()));
    let mut checker = Checker::new(&symbols, MemberContext::function("Lab"));
    checker.declare_local_scopes(slot, ScopeToken::UNRESTRICTED, ScopeToken::UNRESTRICTED);
    checker.declare_local(patch);
    checker.enter_unsafe();

    // The storage gate is demoted; the value check still runs and passes.
    let target = BoundExpr::local(span(0, 4), view_ty(), slot);
    let source = BoundExpr::local(span(11, 5), view_ty(), patch);
    let mut sink = DiagnosticSink::new();
    assert!(checker.check_ref_rebind(span(0, 16), &target, &source, &mut sink));
    assert!(!sink.has_errors());
    assert_eq!(sink.entries().len(), 1);
    assert_eq!(sink.entries()[0].code, DiagnosticCode::UnsafeEscape);
}
