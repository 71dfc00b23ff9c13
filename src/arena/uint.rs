use std::fmt::Debug;

pub trait UInt: Sized + Copy + PartialOrd + Ord + Eq + Debug {
    const MAX: Self;
}

macro_rules! impl_int {
    ($($name:ident),+) => {
        $(
            impl UInt for $name {
                const MAX: Self = $name::MAX;
            }
        )+
    }
}

impl_int!(u16, u32, u64, usize);

/// An integer with its maximum value reserved as the "none" niche.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Optional<T: UInt>(T);

impl<T: UInt> Optional<T> {
    pub const NONE: Self = Self(T::MAX);

    #[inline]
    pub fn new(value: Option<T>) -> Optional<T> {
        assert!(value != Some(T::MAX));
        Self(value.unwrap_or(T::MAX))
    }
    #[inline]
    pub fn new_some(value: T) -> Optional<T> {
        assert!(value != T::MAX);
        Self(value)
    }
    #[inline]
    pub fn get(&self) -> Option<T> {
        if self.0 == T::MAX {
            None
        } else {
            Some(self.0)
        }
    }
    #[inline]
    pub fn is_some(&self) -> bool {
        self.0 != T::MAX
    }
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == T::MAX
    }
    #[inline]
    pub fn set(&mut self, value: Option<T>) {
        *self = Self::new(value);
    }
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        std::mem::replace(self, Self::NONE).get()
    }
}

impl<T: UInt> Default for Optional<T> {
    fn default() -> Self {
        Self::NONE
    }
}

impl<T: UInt> Debug for Optional<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.get().fmt(f)
    }
}

pub type OptionalU32 = Optional<u32>;

/// Smallest `n` such that `1 << n >= value`.
#[inline]
pub fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        u32::BITS - (value - 1).leading_zeros()
    }
}

#[test]
fn test_optional() {
    let mut a = OptionalU32::new_some(3);
    assert_eq!(a.get(), Some(3));
    assert_eq!(a.take(), Some(3));
    assert!(a.is_none());
    a.set(Some(0));
    assert!(a.is_some());
    assert_eq!(OptionalU32::default(), OptionalU32::NONE);
}

#[test]
fn test_ceil_log2() {
    assert_eq!(ceil_log2(1), 0);
    assert_eq!(ceil_log2(2), 1);
    assert_eq!(ceil_log2(3), 2);
    assert_eq!(ceil_log2(64), 6);
    assert_eq!(ceil_log2(65), 7);
}
