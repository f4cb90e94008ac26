use std::fmt;
use std::sync::{Arc, Weak};

use crate::DebugLiteral;

/// A non-owning, optional handle.
///
/// Used for back-references (exchange to connection, connection to client)
/// which must never keep their target alive.
pub(crate) struct WeakOpt<T>(Option<Weak<T>>);

impl<T> WeakOpt<T> {
    pub(crate) fn none() -> Self {
        Self(None)
    }

    pub(crate) fn downgrade(arc: &Arc<T>) -> Self {
        Self(Some(Arc::downgrade(arc)))
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<T>> {
        self.0.as_ref().and_then(Weak::upgrade)
    }

    /// Clear the handle, returning the target if it is still alive.
    pub(crate) fn take(&mut self) -> Option<Arc<T>> {
        self.0.take().and_then(|weak| weak.upgrade())
    }
}

impl<T> Default for WeakOpt<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Clone for WeakOpt<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for WeakOpt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.0 {
            Some(weak) if weak.strong_count() > 0 => "live",
            Some(_) => "dropped",
            None => "None",
        };
        f.debug_tuple("WeakOpt").field(&DebugLiteral(state)).finish()
    }
}
