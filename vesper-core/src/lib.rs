#![forbid(unsafe_code)]

mod call_shape;
mod capability;
mod checker;
mod diagnostics;
mod error;
mod escape;
mod scope;
mod unit;

pub use call_shape::{
    ArgProjection, CallShape, EscapeContribution, ParamInfo, PropertyUse, WritebackDestination,
};
pub use capability::Capability;
pub use checker::{Checker, CheckerOptions};
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink, Severity};
pub use error::AnalysisError;
pub use scope::{EscapeClass, ScopeToken};
pub use unit::{analyze_unit, analyze_units, AnalysisUnit, Demand, UnitOutcome};
