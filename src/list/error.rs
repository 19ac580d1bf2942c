use crate::ArenaError;

/// Error type for the [`SkipList`](crate::SkipList).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// Indicates that one of the arenas is full. The list stays usable for
  /// lookups and for value rewrites that fit in their old slot.
  Full(ArenaError),

  /// Indicates that the key does not fit the 16-bit length field of a node.
  KeyTooLarge(u64),

  /// Indicates that the value does not fit the 32-bit size half of the
  /// packed value word.
  ValueTooLarge(u64),
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Full(e) => write!(f, "{e}"),
      Self::KeyTooLarge(size) => write!(f, "key size {} is too large", size),
      Self::ValueTooLarge(size) => write!(f, "value size {} is too large", size),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<ArenaError> for Error {
  fn from(e: ArenaError) -> Self {
    Self::Full(e)
  }
}

#[cfg(all(test, not(loom)))]
#[test]
fn test_fmt() {
  assert_eq!(
    std::format!("{}", Error::KeyTooLarge(65536)),
    "key size 65536 is too large"
  );
  assert_eq!(
    std::format!("{}", Error::ValueTooLarge(10)),
    "value size 10 is too large"
  );
  assert_eq!(
    std::format!("{}", Error::Full(ArenaError)),
    "allocation failed because arena is full",
  );
}
