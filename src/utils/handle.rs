use std::hash::Hash;
use std::marker::PhantomData;

/// Typed wrapper over a raw, client-visible object id.
///
/// The tracker never mints ids itself: they arrive through post-call hook
/// records after the forwarded call produced them. `0` is the null handle.
pub struct Handle<T> {
    pub raw: u64,
    phantom: PhantomData<T>,
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.raw)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self {
            raw: 0,
            phantom: PhantomData,
        }
    }
}

impl<T> Handle<T> {
    pub fn new(raw: u64) -> Self {
        Self {
            raw,
            phantom: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }
}
