#![forbid(unsafe_code)]

use vesper_tree::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn display(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Every diagnostic the reference-safety checks can produce. Codes are
/// stable identifiers; the human message is composed at the report site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// Expression has no value (namespace, type, void call, bare group).
    NotValue,
    /// A storage location was required and the expression is not one.
    NotVariable,
    /// The storage exists but is readonly in this context.
    ReadOnlyWrite,
    /// Ref reassignment of something that is not a ref binding.
    NotRebindable,
    /// A call result was used by reference but the member does not return
    /// by reference.
    CallNotAddressable,
    /// A call result returns by readonly reference and was written through.
    CallReadOnly,
    /// Non-field-like event used as a variable outside its class.
    EventNotVariable,
    GetterMissing,
    SetterMissing,
    /// Init-only setter used outside a construction context.
    InitOnlyOutsideInit,
    /// A local or parameter would outlive its scope.
    EscapeVariable,
    /// Stack-allocated buffer would outlive its block.
    EscapeStackAlloc,
    /// A call result is confined by one of its arguments.
    EscapeCall,
    /// A call result is confined by its receiver.
    EscapeCallReceiver,
    /// Catch-all for other escaping expressions.
    EscapeExpression,
    /// Ref reassignment whose source ref is narrower than the target's.
    RefRebindNarrower,
    /// An escape violation inside an unsafe region, reported as a warning.
    UnsafeEscape,
    /// Arguments of one call could exchange references of unequal scopes.
    ArgumentMixing,
}

impl DiagnosticCode {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticCode::NotValue => "vesper::sema::not_value",
            DiagnosticCode::NotVariable => "vesper::sema::not_variable",
            DiagnosticCode::ReadOnlyWrite => "vesper::sema::readonly_write",
            DiagnosticCode::NotRebindable => "vesper::sema::not_rebindable",
            DiagnosticCode::CallNotAddressable => "vesper::sema::call_not_addressable",
            DiagnosticCode::CallReadOnly => "vesper::sema::call_readonly",
            DiagnosticCode::EventNotVariable => "vesper::sema::event_not_variable",
            DiagnosticCode::GetterMissing => "vesper::sema::getter_missing",
            DiagnosticCode::SetterMissing => "vesper::sema::setter_missing",
            DiagnosticCode::InitOnlyOutsideInit => "vesper::sema::init_only_outside_init",
            DiagnosticCode::EscapeVariable => "vesper::sema::escape_variable",
            DiagnosticCode::EscapeStackAlloc => "vesper::sema::escape_stackalloc",
            DiagnosticCode::EscapeCall => "vesper::sema::escape_call",
            DiagnosticCode::EscapeCallReceiver => "vesper::sema::escape_call_receiver",
            DiagnosticCode::EscapeExpression => "vesper::sema::escape_expression",
            DiagnosticCode::RefRebindNarrower => "vesper::sema::ref_rebind_narrower",
            DiagnosticCode::UnsafeEscape => "vesper::sema::unsafe_escape",
            DiagnosticCode::ArgumentMixing => "vesper::sema::argument_mixing",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticCode::UnsafeEscape => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

/// Collects diagnostics for one analysis pass. A discarded sink accepts and
/// drops everything, letting callers probe a check's outcome speculatively.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
    discard: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink { entries: Vec::new(), discard: false }
    }

    pub fn discarded() -> Self {
        DiagnosticSink { entries: Vec::new(), discard: true }
    }

    pub fn report(&mut self, code: DiagnosticCode, span: Span, message: String) {
        self.push(Diagnostic { code, severity: code.default_severity(), message, span });
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if !self.discard {
            self.entries.push(diagnostic);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.entries.iter().find(|d| d.severity == Severity::Error)
    }
}
