#![forbid(unsafe_code)]

use std::ops::{BitOr, BitOrAssign};

/// What a surrounding construct demands of an expression: any combination of
/// the four primitive capabilities, plus a two-bit wording tag that picks the
/// diagnostic phrasing without changing the checks. Two requirements with
/// equal primitive bits are checked identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capability(u16);

const WORDING_MASK: u16 = 0b11;
const READ: u16 = 1 << 2;
const WRITE: u16 = 2 << 2;
const ADDRESS: u16 = 4 << 2;
const REBIND: u16 = 8 << 2;

impl Capability {
    /// Ordinary rvalue use.
    pub const VALUE: Capability = Capability(READ);
    /// Rvalue use where an unconverted function group is also acceptable.
    pub const VALUE_OR_GROUP: Capability = Capability(READ | 1);
    /// Target of a plain assignment; the old value is not read.
    pub const ASSIGN: Capability = Capability(WRITE);
    /// Target of `op=`: read, combine, write back.
    pub const COMPOUND_ASSIGN: Capability = Capability(READ | WRITE);
    /// Operand of `++`/`--`.
    pub const INCREMENT: Capability = Capability(READ | WRITE | 1);
    /// Source of an `in` argument or `ref readonly` binding.
    pub const READONLY_REF: Capability = Capability(ADDRESS | READ);
    /// Operand of unary `&`.
    pub const ADDRESS_OF: Capability = Capability(ADDRESS | READ | 1);
    /// Source of a `ref`/`out` argument or writable `ref` binding.
    pub const WRITABLE_REF: Capability = Capability(ADDRESS | READ | WRITE);
    /// Operand of `return ref`.
    pub const REF_RETURN: Capability = Capability(ADDRESS | READ | WRITE | 1);
    /// Target of `ref =`, rebinding which storage the name denotes.
    pub const REF_REBIND: Capability = Capability(REBIND);

    pub fn needs_read(self) -> bool {
        self.0 & READ != 0
    }

    pub fn needs_write(self) -> bool {
        self.0 & WRITE != 0
    }

    pub fn needs_address(self) -> bool {
        self.0 & ADDRESS != 0
    }

    pub fn needs_rebind(self) -> bool {
        self.0 & REBIND != 0
    }

    /// Requirements satisfied by any readable value, storage or not.
    pub fn is_read_only(self) -> bool {
        self.0 & (WRITE | ADDRESS | REBIND) == 0
    }

    /// Requirements only a storage location can satisfy.
    pub fn needs_variable(self) -> bool {
        !self.is_read_only()
    }

    /// Writes that go through a reference binding rather than directly into
    /// the variable, so readonly enforcement happens at binding time.
    pub fn needs_write_through_ref(self) -> bool {
        self.0 & ADDRESS != 0 && self.0 & WRITE != 0
    }

    /// Equal checks, possibly different diagnostic wording.
    pub fn same_checks(self, other: Capability) -> bool {
        self.0 & !WORDING_MASK == other.0 & !WORDING_MASK
    }

    /// Phrase naming the requirement in diagnostics, article included.
    pub fn display(self) -> &'static str {
        match self {
            Capability::VALUE => "a value",
            Capability::VALUE_OR_GROUP => "a value or function group",
            Capability::ASSIGN => "an assignment target",
            Capability::COMPOUND_ASSIGN => "a compound assignment target",
            Capability::INCREMENT => "an increment or decrement operand",
            Capability::READONLY_REF => "a read-only reference",
            Capability::ADDRESS_OF => "an address-of operand",
            Capability::WRITABLE_REF => "a writable reference",
            Capability::REF_RETURN => "a ref return",
            Capability::REF_REBIND => "a ref reassignment target",
            _ => "an expression",
        }
    }
}

impl BitOr for Capability {
    type Output = Capability;

    fn bitor(self, rhs: Capability) -> Capability {
        Capability(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capability {
    fn bitor_assign(&mut self, rhs: Capability) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wording_variants_check_identically() {
        assert!(Capability::VALUE.same_checks(Capability::VALUE_OR_GROUP));
        assert!(Capability::COMPOUND_ASSIGN.same_checks(Capability::INCREMENT));
        assert!(Capability::READONLY_REF.same_checks(Capability::ADDRESS_OF));
        assert!(Capability::WRITABLE_REF.same_checks(Capability::REF_RETURN));
        assert!(!Capability::READONLY_REF.same_checks(Capability::WRITABLE_REF));
    }

    #[test]
    fn read_only_requirements_need_no_storage() {
        assert!(Capability::VALUE.is_read_only());
        assert!(Capability::VALUE_OR_GROUP.is_read_only());
        assert!(!Capability::ASSIGN.is_read_only());
        assert!(!Capability::READONLY_REF.is_read_only());
        assert!(!Capability::REF_REBIND.is_read_only());
        assert!(Capability::ASSIGN.needs_variable());
    }

    #[test]
    fn primitive_bits_drive_the_predicates() {
        assert!(Capability::ASSIGN.needs_write());
        assert!(!Capability::ASSIGN.needs_read());
        assert!(Capability::COMPOUND_ASSIGN.needs_read());
        assert!(Capability::READONLY_REF.needs_address());
        assert!(!Capability::READONLY_REF.needs_write());
        assert!(Capability::WRITABLE_REF.needs_write_through_ref());
        assert!(!Capability::ASSIGN.needs_write_through_ref());
        assert!(Capability::REF_REBIND.needs_rebind());
        assert!(!Capability::REF_REBIND.needs_read());
    }

    #[test]
    fn union_accumulates_bits() {
        let combined = Capability::ASSIGN | Capability::READONLY_REF;
        assert!(combined.needs_write());
        assert!(combined.needs_address());
        assert!(combined.needs_read());
        assert!(combined.needs_write_through_ref());
    }

    #[test]
    fn display_names_every_requirement() {
        assert_eq!(Capability::VALUE.display(), "a value");
        assert_eq!(Capability::ASSIGN.display(), "an assignment target");
        assert_eq!((Capability::ASSIGN | Capability::REF_REBIND).display(), "an expression");
    }
}
