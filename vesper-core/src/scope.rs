#![forbid(unsafe_code)]

/// Depth-indexed escape scope. Smaller is wider: a value with a small token
/// may outlive more of the program than one with a large token.
///
/// `0` is unrestricted (heap/global lifetime), `1` is the calling frame
/// reachable only through a `ref` return, `2` is the analyzed function's
/// top block, and each nested block adds one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeToken(pub u32);

impl ScopeToken {
    pub const UNRESTRICTED: ScopeToken = ScopeToken(0);
    pub const RETURN_ONLY: ScopeToken = ScopeToken(1);
    /// Top-level block of the member being analyzed.
    pub const TOP: ScopeToken = ScopeToken(2);

    /// Scope of a block directly inside this one.
    pub fn nested(self) -> ScopeToken {
        ScopeToken(self.0 + 1)
    }

    /// Scope of the block directly containing this one.
    pub fn enclosing(self) -> ScopeToken {
        debug_assert!(self > ScopeToken::TOP, "cannot leave the top block");
        ScopeToken(self.0 - 1)
    }

    /// A value confined to `self` may be stored anywhere confined to
    /// `required` or narrower.
    pub fn convertible_to(self, required: ScopeToken) -> bool {
        self.0 <= required.0
    }

    pub fn narrowest_of(self, other: ScopeToken) -> ScopeToken {
        self.max(other)
    }

    pub fn widest_of(self, other: ScopeToken) -> ScopeToken {
        self.min(other)
    }

    pub fn is_unrestricted(self) -> bool {
        self == ScopeToken::UNRESTRICTED
    }

    pub fn is_return_only(self) -> bool {
        self == ScopeToken::RETURN_ONLY
    }

    /// Scopes wider than the function body. Selects the "cannot be returned"
    /// diagnostic wording over the "cannot escape this scope" one.
    pub fn leaves_function(self) -> bool {
        self.0 <= ScopeToken::RETURN_ONLY.0
    }
}

/// Coarse two-point image of a scope, used by the pairwise argument-mixing
/// rules: any token below `UNRESTRICTED` collapses to `ReturnOnly`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeClass {
    Unrestricted,
    ReturnOnly,
}

impl EscapeClass {
    pub fn of(scope: ScopeToken) -> EscapeClass {
        if scope.is_unrestricted() {
            EscapeClass::Unrestricted
        } else {
            EscapeClass::ReturnOnly
        }
    }

    /// Whether a destination of this class may receive a contribution of
    /// class `contribution` without further scope comparison. An
    /// unrestricted destination accepts anything; a return-only destination
    /// accepts only return-only contributions.
    pub fn accepts(self, contribution: EscapeClass) -> bool {
        match (self, contribution) {
            (EscapeClass::Unrestricted, _) => true,
            (EscapeClass::ReturnOnly, EscapeClass::ReturnOnly) => true,
            (EscapeClass::ReturnOnly, EscapeClass::Unrestricted) => false,
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            EscapeClass::Unrestricted => "unrestricted",
            EscapeClass::ReturnOnly => "return-only",
        }
    }
}
