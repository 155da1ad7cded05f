#![forbid(unsafe_code)]

use miette::Diagnostic;
use thiserror::Error;
use vesper_tree::Span;

use crate::diagnostics::DiagnosticSink;

/// First hard error of an analysis pass, surfaced through `miette` for
/// hosts that want a rendered report instead of the raw diagnostic list.
#[derive(Debug, Error, Diagnostic)]
#[error("reference safety: {message}")]
#[diagnostic(code(vesper::sema))]
pub struct AnalysisError {
    pub message: String,
    #[label("rejected expression")]
    pub span: Span,
}

impl AnalysisError {
    pub fn from_sink(sink: &DiagnosticSink) -> Option<AnalysisError> {
        sink.first_error().map(|d| AnalysisError { message: d.message.clone(), span: d.span })
    }
}
