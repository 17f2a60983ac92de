/// Rounds `value` up to the allocator's alignment unit (8 bytes).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(4097), 4104);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::block::ALIGNMENT - 1) & !($crate::block::ALIGNMENT - 1)
  };
}
