//! Closure trampoline shapes.
//!
//! The sandbox exports one trampoline per arity; whether a closure may run
//! more than once is a property of the wrapper, not the trampoline. Both are
//! packed into a single `u32` when a closure is handed to the host:
//! bits 0..2 carry the arity, bit 2 marks a call-once closure.

use core::fmt;

/// Number of host arguments forwarded to the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    Zero,
    One,
    Two,
}

impl Arity {
    pub fn count(self) -> usize {
        match self {
            Arity::Zero => 0,
            Arity::One => 1,
            Arity::Two => 2,
        }
    }
}

/// Whether the sandbox environment survives an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosureKind {
    /// May be invoked any number of times; env word A is restored after each call.
    Mut,
    /// Expected to run once; env word A stays cleared after the first call.
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureShape {
    pub arity: Arity,
    pub kind: ClosureKind,
}

const ARITY_MASK: u32 = 0b11;
const ONCE_BIT: u32 = 0b100;

impl ClosureShape {
    pub const fn new(arity: Arity, kind: ClosureKind) -> Self {
        Self { arity, kind }
    }

    /// Decode the packed form. Unknown bits or arities yield `None`.
    pub fn from_u32(raw: u32) -> Option<Self> {
        if raw & !(ARITY_MASK | ONCE_BIT) != 0 {
            return None;
        }
        let arity = match raw & ARITY_MASK {
            0 => Arity::Zero,
            1 => Arity::One,
            2 => Arity::Two,
            _ => return None,
        };
        let kind = if raw & ONCE_BIT != 0 {
            ClosureKind::Once
        } else {
            ClosureKind::Mut
        };
        Some(Self { arity, kind })
    }

    pub fn as_u32(self) -> u32 {
        let arity = self.arity.count() as u32;
        match self.kind {
            ClosureKind::Mut => arity,
            ClosureKind::Once => arity | ONCE_BIT,
        }
    }
}

impl fmt::Display for ClosureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ClosureKind::Mut => "mut",
            ClosureKind::Once => "once",
        };
        write!(f, "invoke{}_{}", self.arity.count(), kind)
    }
}
