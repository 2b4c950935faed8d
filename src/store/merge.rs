//! Merge operator routing
//!
//! Operators are registered per logical prefix before the store opens.
//! A prefix with dedicated shards gets its operator linked straight onto each
//! shard; everything else shares one router on the default family, which
//! picks the operator by matching `prefix 0x00` against the key.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::AssociativeMerge;

use super::key::SEPARATOR;

/// A domain-specific associative merge function
pub trait MergeOperator: Send + Sync {
    /// Stable identity; part of what the engine checks across restarts
    fn name(&self) -> &str;

    /// Value for a key that has none yet
    fn merge_nonexistent(&self, operand: &[u8]) -> Vec<u8>;

    /// Fold `operand` into `existing`
    fn merge(&self, existing: &[u8], operand: &[u8]) -> Vec<u8>;
}

/// Registered `(prefix, operator)` pairs, in registration order
pub type MergeRegistrations = Vec<(String, Arc<dyn MergeOperator>)>;

/// Router identity: `.prefix:name` for every registration not bound to a
/// dedicated family, sorted by prefix
///
/// A prefix registered twice keeps the later operator's name.
pub fn router_identity<'a>(
    registrations: &MergeRegistrations,
    dedicated: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut names: BTreeMap<&str, &str> = registrations
        .iter()
        .map(|(prefix, op)| (prefix.as_str(), op.name()))
        .collect();
    for name in dedicated {
        names.remove(name);
    }
    names
        .into_iter()
        .map(|(prefix, name)| format!(".{}:{}", prefix, name))
        .collect()
}

/// Merge entry point for the shared default family
pub struct MergeRouter {
    registrations: MergeRegistrations,
    identity: String,
}

impl MergeRouter {
    pub fn new<'a>(
        registrations: MergeRegistrations,
        dedicated: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let identity = router_identity(&registrations, dedicated);
        Self {
            registrations,
            identity,
        }
    }
}

impl AssociativeMerge for MergeRouter {
    fn name(&self) -> String {
        self.identity.clone()
    }

    /// First registration whose `prefix 0x00` starts the key wins. Without a
    /// match the operand is dropped and the write still succeeds.
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        let (_, op) = self.registrations.iter().find(|(prefix, _)| {
            key.strip_prefix(prefix.as_bytes())
                .and_then(|rest| rest.first())
                == Some(&SEPARATOR)
        })?;
        Some(match existing {
            Some(existing) => op.merge(existing, operand),
            None => op.merge_nonexistent(operand),
        })
    }
}

/// Merge entry point for a dedicated family: one operator, no lookup
pub struct MergeLinker {
    operator: Arc<dyn MergeOperator>,
}

impl MergeLinker {
    pub fn new(operator: Arc<dyn MergeOperator>) -> Self {
        Self { operator }
    }
}

impl AssociativeMerge for MergeLinker {
    fn name(&self) -> String {
        self.operator.name().to_string()
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        Some(match existing {
            Some(existing) => self.operator.merge(existing, operand),
            None => self.operator.merge_nonexistent(operand),
        })
    }
}

/// Element-wise addition of little-endian `i64` arrays
///
/// The shorter side is treated as zero-padded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Int64ArrayMergeOperator;

impl Int64ArrayMergeOperator {
    pub fn encode(values: &[i64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn decode(bytes: &[u8]) -> Vec<i64> {
        bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                i64::from_le_bytes(buf)
            })
            .collect()
    }
}

impl MergeOperator for Int64ArrayMergeOperator {
    fn name(&self) -> &str {
        "int64_array"
    }

    fn merge_nonexistent(&self, operand: &[u8]) -> Vec<u8> {
        operand.to_vec()
    }

    fn merge(&self, existing: &[u8], operand: &[u8]) -> Vec<u8> {
        let mut sum = Self::decode(existing);
        let add = Self::decode(operand);
        if sum.len() < add.len() {
            sum.resize(add.len(), 0);
        }
        for (slot, value) in sum.iter_mut().zip(add) {
            *slot = slot.wrapping_add(value);
        }
        Self::encode(&sum)
    }
}
