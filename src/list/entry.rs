use crate::arena::Arena;

use super::node::NodePtr;

/// A reference to an entry of the skiplist. The key and value views stay
/// valid for the lifetime of the list, because the arenas never reclaim.
pub struct EntryRef<'a> {
  pub(super) key: &'a [u8],
  pub(super) value: &'a [u8],
}

impl<'a> EntryRef<'a> {
  /// Returns the reference to the key
  #[inline]
  pub const fn key(&self) -> &'a [u8] {
    self.key
  }

  /// Returns the reference to the value
  #[inline]
  pub const fn value(&self) -> &'a [u8] {
    self.value
  }

  /// ## Safety
  /// - `nd` must not be null and must have been allocated by `arena`, with
  ///   its value stored in `value_arena`.
  #[inline]
  pub(super) unsafe fn from_node(nd: NodePtr, arena: &'a Arena, value_arena: &'a Arena) -> Self {
    let node = nd.as_ptr();
    Self {
      key: node.get_key(arena),
      value: node.get_value(value_arena),
    }
  }
}
