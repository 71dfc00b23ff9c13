use std::{
    fmt::Debug,
    sync::atomic::{AtomicU32, Ordering},
};

/// Position of an access in the global execution order.
///
/// Two sentinels bracket the real indices: [`ExeOrderIndex::INITIAL`] is the state a resource
/// enters a session with and [`ExeOrderIndex::FINAL`] the state it leaves with. Both mean
/// "something happened before, we don't know what" and always count as prior accesses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExeOrderIndex(u32);

impl ExeOrderIndex {
    pub const INITIAL: Self = Self(0);
    pub const FINAL: Self = Self(u32::MAX);

    #[inline]
    pub fn new(index: u32) -> Self {
        assert!(
            index != Self::INITIAL.0 && index != Self::FINAL.0,
            "{index} is reserved for a sentinel"
        );
        Self(index)
    }
    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        *self == Self::INITIAL || *self == Self::FINAL
    }
    /// Whether an access at `self` happened before an access at `later`.
    #[inline]
    pub fn is_prior_to(&self, later: ExeOrderIndex) -> bool {
        self.is_sentinel() || self.0 < later.0
    }
}

impl Debug for ExeOrderIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::INITIAL => f.write_str("Initial"),
            Self::FINAL => f.write_str("Final"),
            Self(index) => write!(f, "#{index}"),
        }
    }
}

/// Hands out monotonically increasing [`ExeOrderIndex`]es, shared between worker threads.
pub struct OrderCounter(AtomicU32);

impl OrderCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }
    pub fn next(&self) -> ExeOrderIndex {
        let index = self.0.fetch_add(1, Ordering::Relaxed);
        assert!(index < u32::MAX - 1, "Execution order indices exhausted");
        ExeOrderIndex(index)
    }
    /// The index the next call to [`OrderCounter::next`] will return.
    pub fn peek(&self) -> ExeOrderIndex {
        ExeOrderIndex(self.0.load(Ordering::Relaxed))
    }
}

impl Default for OrderCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_sentinels_are_prior() {
    let a = ExeOrderIndex::new(5);
    assert!(ExeOrderIndex::INITIAL.is_prior_to(a));
    assert!(ExeOrderIndex::FINAL.is_prior_to(a));
    assert!(ExeOrderIndex::new(4).is_prior_to(a));
    assert!(!a.is_prior_to(a));
    assert!(!ExeOrderIndex::new(6).is_prior_to(a));
}

#[test]
fn test_order_counter() {
    let counter = OrderCounter::new();
    let a = counter.next();
    let b = counter.next();
    assert!(a < b);
    assert!(!a.is_sentinel());
    assert_eq!(counter.peek().get(), b.get() + 1);
}
