//! Engine-side merge operator contract

/// An associative merge function attached to a column family
///
/// The engine resolves merges eagerly at write time, folding each operand
/// into the current value of the key.
pub trait AssociativeMerge: Send + Sync {
    /// Identity persisted in the manifest and checked on every open
    fn name(&self) -> String;

    /// Combine `existing` with `operand`
    ///
    /// `None` leaves the key as it was (absent stays absent).
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>>;
}
