#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

mod expr;
mod symbol;
mod types;

pub use expr::{BoundExpr, ExprKind, SwitchArm};
pub use symbol::{
    EscapeRules, EventId, EventSymbol, FieldId, FieldSymbol, LocalId, LocalSymbol, MemberContext,
    MemberKind, MethodId, MethodSymbol, ParamId, ParamSymbol, Pinning, PropertyId, PropertySymbol,
    RefKind, Symbols,
};
pub use types::{NamedKind, Type};
