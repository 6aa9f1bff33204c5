//! How object handles expose themselves to the registry.
//!
//! A [`Trackable`] handle yields two things: an [`ObjectKey`] that identifies
//! the underlying allocation, and a [`Liveness`] probe that answers whether
//! the allocation still has strong owners. The probe never keeps the object
//! alive.

use std::sync::{Arc, Weak};

use crate::error::{IdentError, Result};

/// Identity of a tracked allocation (its data address).
///
/// Stable for as long as a weak handle to the allocation is held, since the
/// allocation itself is not released while weak handles remain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjectKey(usize);

impl ObjectKey {
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr.cast::<()>() as usize)
    }
}

/// Non-owning probe over a tracked object.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    #[inline]
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Handle types the registry can assign identifiers to.
///
/// Implement this for task or session handles that wrap an `Arc` by
/// delegating to the inner `Arc`.
pub trait Trackable {
    /// Identity key of the referenced object. Fails when the handle does not
    /// refer to a live allocation.
    fn identity(&self) -> Result<ObjectKey>;

    /// Weak probe stored alongside the allocated identifier.
    fn probe(&self) -> Box<dyn Liveness>;
}

impl<T: ?Sized + Send + Sync + 'static> Trackable for Arc<T> {
    #[inline]
    fn identity(&self) -> Result<ObjectKey> {
        Ok(ObjectKey::from_ptr(Arc::as_ptr(self)))
    }

    fn probe(&self) -> Box<dyn Liveness> {
        Box::new(Arc::downgrade(self))
    }
}

impl<T: ?Sized + Send + Sync + 'static> Trackable for Weak<T> {
    fn identity(&self) -> Result<ObjectKey> {
        // Covers both `Weak::new()` (no allocation) and objects already dropped
        if self.strong_count() == 0 {
            return Err(IdentError::Untrackable(
                "weak reference does not point at a live object".to_string(),
            ));
        }
        Ok(ObjectKey::from_ptr(self.as_ptr()))
    }

    fn probe(&self) -> Box<dyn Liveness> {
        Box::new(self.clone())
    }
}
