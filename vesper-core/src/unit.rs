#![forbid(unsafe_code)]

use rayon::prelude::*;
use vesper_tree::{BoundExpr, MemberContext, Symbols};

use crate::capability::Capability;
use crate::checker::{Checker, CheckerOptions};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::error::AnalysisError;
use crate::scope::ScopeToken;

/// One requirement the binder recorded against an expression.
#[derive(Clone, Debug)]
pub enum Demand {
    /// The expression must satisfy the capability.
    Value(Capability),
    /// The expression must be able to escape to `scope` on the value or
    /// reference channel.
    Escape { scope: ScopeToken, by_ref: bool },
    /// Argument-mixing validation of a call-like expression.
    Mixing,
}

/// A member body reduced to the expressions that need checking, in source
/// order. Units are independent of one another and share only the symbol
/// table.
#[derive(Clone, Debug)]
pub struct AnalysisUnit {
    pub member: MemberContext,
    pub options: CheckerOptions,
    pub checks: Vec<(BoundExpr, Demand)>,
}

impl AnalysisUnit {
    pub fn new(member: MemberContext) -> Self {
        AnalysisUnit { member, options: CheckerOptions::default(), checks: Vec::new() }
    }

    pub fn with_options(mut self, options: CheckerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn check(mut self, expr: BoundExpr, demand: Demand) -> Self {
        self.checks.push((expr, demand));
        self
    }
}

/// Everything one unit's analysis produced.
#[derive(Clone, Debug)]
pub struct UnitOutcome {
    pub diagnostics: Vec<Diagnostic>,
    /// False when any check was rejected. Unsafe-region demotions report a
    /// warning and still count as passes.
    pub ok: bool,
}

impl UnitOutcome {
    /// The first hard error as a `Result`, for hosts that stop at one report.
    pub fn into_result(self) -> Result<(), AnalysisError> {
        match self.diagnostics.into_iter().find(|d| d.severity == Severity::Error) {
            Some(d) => Err(AnalysisError { message: d.message, span: d.span }),
            None => Ok(()),
        }
    }
}

pub fn analyze_unit(symbols: &Symbols, unit: &AnalysisUnit) -> UnitOutcome {
    let mut checker = Checker::with_options(symbols, unit.member.clone(), unit.options);
    let mut sink = DiagnosticSink::new();
    let mut ok = true;
    for (expr, demand) in &unit.checks {
        let passed = match demand {
            Demand::Value(requirement) => checker.check_value(expr, *requirement, &mut sink),
            Demand::Escape { scope, by_ref } => {
                checker.check_escape(expr, *scope, *by_ref, &mut sink)
            }
            Demand::Mixing => match checker.call_shape_of(expr) {
                Some(shape) => checker.check_argument_mixing(&shape, &mut sink),
                None => true,
            },
        };
        ok &= passed;
    }
    UnitOutcome { diagnostics: sink.into_entries(), ok }
}

/// Analyzes every unit against one shared, read-only symbol table. Units
/// never interact, so they fan out across the thread pool.
pub fn analyze_units(symbols: &Symbols, units: &[AnalysisUnit]) -> Vec<UnitOutcome> {
    units.par_iter().map(|unit| analyze_unit(symbols, unit)).collect()
}
