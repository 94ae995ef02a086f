//! Type-safe wrappers for SAT variables and literals.
//!
//! Every feature of a model owns one SAT variable. Clause sets, solver models
//! and blocking clauses are expressed with [`Lit`], a signed literal that
//! converts to and from the DIMACS integer form.
use std::fmt;
use std::ops::Neg;

/// The SAT variable of one feature: arena position + 1.
///
/// 0 terminates DIMACS clauses, so it is never a variable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// The variable of the root feature.
    pub const ROOT: Var = Var(1);

    /// Panics on 0.
    pub fn new(id: u32) -> Self {
        assert!(id > 0, "SAT variables start at 1");
        Var(id)
    }

    /// The DIMACS number of this variable.
    pub fn id(self) -> u32 {
        self.0
    }

    /// Zero-based position, convenient for indexing per-variable tables.
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Positive literal of this variable.
    pub fn pos(self) -> Lit {
        Lit(self.0 as i32)
    }

    /// Negative literal of this variable.
    pub fn neg(self) -> Lit {
        Lit(-(self.0 as i32))
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<Var> for u32 {
    fn from(var: Var) -> Self {
        var.0
    }
}

/// A signed literal: `+v` selects variable `v`, `-v` deselects it.
///
/// # Invariants
///
/// - The wrapped value is never 0
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lit(i32);

impl Lit {
    /// Creates a literal from its DIMACS integer form.
    ///
    /// Returns `None` for 0, which DIMACS reserves as the clause terminator.
    pub fn from_dimacs(value: i32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Lit(value))
        }
    }

    /// Returns the DIMACS integer form.
    pub fn to_dimacs(self) -> i32 {
        self.0
    }

    pub fn var(self) -> Var {
        Var(self.0.unsigned_abs())
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Dense code for watch lists: `2 * (var - 1)` for positive, `+ 1` for negative.
    pub(crate) fn code(self) -> usize {
        2 * self.var().index() + usize::from(self.0 < 0)
    }
}

impl Neg for Lit {
    type Output = Lit;

    fn neg(self) -> Self::Output {
        Lit(-self.0)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "~x{}", -self.0)
        } else {
            write!(f, "x{}", self.0)
        }
    }
}

impl From<Lit> for i32 {
    fn from(lit: Lit) -> Self {
        lit.0
    }
}
