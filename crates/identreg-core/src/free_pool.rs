use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::Ident;

/// Min-heap of identifiers that were issued and have since been returned.
///
/// `pop` always yields the smallest free identifier, independent of the
/// order in which identifiers were pushed.
#[derive(Debug, Clone, Default)]
pub struct FreePool {
    heap: BinaryHeap<Reverse<Ident>>,
}

impl FreePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, ident: Ident) {
        self.heap.push(Reverse(ident));
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Ident> {
        self.heap.pop().map(|Reverse(ident)| ident)
    }

    pub fn peek(&self) -> Option<Ident> {
        self.heap.peek().map(|Reverse(ident)| *ident)
    }

    pub fn contains(&self, ident: Ident) -> bool {
        self.heap.iter().any(|Reverse(i)| *i == ident)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Free identifiers in ascending order.
    pub fn to_sorted_vec(&self) -> Vec<Ident> {
        let mut out: Vec<Ident> = self.heap.iter().map(|Reverse(i)| *i).collect();
        out.sort_unstable();
        out
    }
}
