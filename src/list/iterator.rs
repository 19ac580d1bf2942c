use super::{node::NodePtr, EntryRef, SkipList};

/// An iterator over the skiplist, yielding the entries in key order. The
/// current state of the iterator can be cloned by simply value copying the
/// struct.
pub struct Iter<'a, C = crate::Ascend> {
  pub(super) list: &'a SkipList<C>,
  pub(super) nd: NodePtr,
}

impl<'a, C> Clone for Iter<'a, C> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<'a, C> Copy for Iter<'a, C> {}

impl<'a, C> Iter<'a, C> {
  #[inline]
  pub(super) const fn new(list: &'a SkipList<C>) -> Self {
    Self {
      list,
      nd: list.head,
    }
  }
}

impl<'a, C> Iterator for Iter<'a, C> {
  type Item = EntryRef<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    // Safety: the iterator only ever holds nodes of `self.list`.
    unsafe {
      let next = self.list.get_next(self.nd, 0);
      if next.is_null() {
        return None;
      }

      self.nd = next;
      Some(EntryRef::from_node(
        next,
        &self.list.arena,
        &self.list.value_arena,
      ))
    }
  }
}
