/// Declares `u32` newtypes over pool [`Handle`](crate::arena::Handle)s so that resources and
/// tasks can't be mixed up.
#[macro_export]
macro_rules! simple_handle {
    ($($visibility:vis $name:ident),+) => {
        $(
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            $visibility struct $name(u32);
            impl $name {
                #[inline]
                pub fn from_handle(handle: $crate::arena::Handle) -> Self {
                    Self(handle.to_raw())
                }
                #[inline]
                pub fn handle(&self) -> $crate::arena::Handle {
                    $crate::arena::Handle::from_raw(self.0)
                }
                #[inline]
                pub fn to_raw(&self) -> u32 {
                    self.0
                }
            }
            impl std::fmt::Debug for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }
        )+
    };
}
