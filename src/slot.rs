// Slot headers: the fixed per-slot shape every batch is encoded against.
// Established once when the provider is built and shared read-only by the
// producer, the assembler and every scanner afterwards.

use std::fmt;

use crate::error::{ProviderError, Result};

// ============================================================================
// Slot / Sequence kinds
// ============================================================================

/// How one element of a slot is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotType {
    /// `dim` numbers per element, stored as a dense `rows x dim` matrix.
    Dense = 0,
    /// A list of column indices, stored as CSR without values.
    SparseNoValue = 1,
    /// A list of `[column, value]` pairs, stored as CSR with values.
    SparseWithValue = 2,
    /// A single integer per element.
    IndexOnly = 3,
}

impl TryFrom<i64> for SlotType {
    type Error = ProviderError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(SlotType::Dense),
            1 => Ok(SlotType::SparseNoValue),
            2 => Ok(SlotType::SparseWithValue),
            3 => Ok(SlotType::IndexOnly),
            other => Err(ProviderError::configuration(format!(
                "unsupported slot type code {}",
                other
            ))),
        }
    }
}

/// How many levels of sequence framing wrap the slot's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SeqType {
    #[default]
    None = 0,
    Sequence = 1,
    SubSequence = 2,
}

impl TryFrom<i64> for SeqType {
    type Error = ProviderError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(SeqType::None),
            1 => Ok(SeqType::Sequence),
            2 => Ok(SeqType::SubSequence),
            other => Err(ProviderError::configuration(format!(
                "unsupported sequence type code {}",
                other
            ))),
        }
    }
}

// ============================================================================
// SlotHeader
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHeader {
    pub dim: usize,
    pub slot_type: SlotType,
    pub seq_type: SeqType,
}

impl SlotHeader {
    pub fn new(dim: usize, slot_type: SlotType, seq_type: SeqType) -> Result<Self> {
        if dim == 0 {
            return Err(ProviderError::configuration(
                "slot dimension must be positive",
            ));
        }
        Ok(Self {
            dim,
            slot_type,
            seq_type,
        })
    }

    /// Build a header from the integer codes used by provider definitions.
    pub fn from_codes(dim: i64, slot_code: i64, seq_code: i64) -> Result<Self> {
        let dim = usize::try_from(dim).map_err(|_| {
            ProviderError::configuration(format!("slot dimension {} is negative", dim))
        })?;
        Self::new(dim, SlotType::try_from(slot_code)?, SeqType::try_from(seq_code)?)
    }

    pub fn dense(dim: usize) -> Result<Self> {
        Self::new(dim, SlotType::Dense, SeqType::None)
    }

    pub fn index(dim: usize) -> Result<Self> {
        Self::new(dim, SlotType::IndexOnly, SeqType::None)
    }

    pub fn sparse_no_value(dim: usize) -> Result<Self> {
        Self::new(dim, SlotType::SparseNoValue, SeqType::None)
    }

    pub fn sparse_with_value(dim: usize) -> Result<Self> {
        Self::new(dim, SlotType::SparseWithValue, SeqType::None)
    }

    /// Same slot, wrapped in the given sequence framing.
    pub fn with_seq(mut self, seq_type: SeqType) -> Self {
        self.seq_type = seq_type;
        self
    }
}

impl fmt::Display for SlotHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dim = {} Type = {:?} SeqType = {:?}",
            self.dim, self.slot_type, self.seq_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_codes() {
        let header = SlotHeader::from_codes(10, 2, 1).unwrap();
        assert_eq!(header.dim, 10);
        assert_eq!(header.slot_type, SlotType::SparseWithValue);
        assert_eq!(header.seq_type, SeqType::Sequence);

        let header = SlotHeader::from_codes(1, 3, 2).unwrap();
        assert_eq!(header.slot_type, SlotType::IndexOnly);
        assert_eq!(header.seq_type, SeqType::SubSequence);
    }

    #[test]
    fn test_unsupported_codes_are_configuration_errors() {
        for (dim, slot, seq) in [(4, 7, 0), (4, 0, 3), (0, 0, 0), (-1, 0, 0)] {
            let err = SlotHeader::from_codes(dim, slot, seq).unwrap_err();
            assert!(
                matches!(err, ProviderError::Configuration(_)),
                "({}, {}, {}) gave {:?}",
                dim,
                slot,
                seq,
                err
            );
        }
    }

    #[test]
    fn test_display() {
        let header = SlotHeader::dense(3).unwrap().with_seq(SeqType::Sequence);
        assert_eq!(header.to_string(), "Dim = 3 Type = Dense SeqType = Sequence");
    }
}
