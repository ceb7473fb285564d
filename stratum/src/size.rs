//! Compile-time byte-size arithmetic, used to lay out fixed-size page
//! structures without hand-computed magic numbers scattered through the
//! codebase.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size(usize);

impl Size {
    #[must_use]
    pub const fn b(bytes: usize) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn of<T>() -> Self {
        Self(size_of::<T>())
    }

    #[must_use]
    pub const fn subtract(self, other: Self) -> Self {
        assert!(self.0 >= other.0, "size underflow");
        Self(self.0 - other.0)
    }

    #[must_use]
    pub const fn divide(self, other: Self) -> usize {
        self.0 / other.0
    }

    #[must_use]
    pub const fn is_equal(self, other: Self) -> bool {
        self.0 == other.0
    }

    #[must_use]
    pub const fn as_bytes(self) -> usize {
        self.0
    }
}
