use serde::{Deserialize, Serialize};
use std::fmt;

/// Small, non-negative identifier handed out by an [`IdentRegistry`](crate::IdentRegistry).
///
/// Unique among live tracked objects at any instant. May be reissued to a
/// different object once the original owner has been reclaimed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Ident(usize);

impl Ident {
    #[inline(always)]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ident({})", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Ident> for usize {
    fn from(ident: Ident) -> Self {
        ident.0
    }
}
