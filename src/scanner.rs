//! Field scanners: per-slot encoders that turn a batch of samples into the
//! flat buffers of one [`Argument`].
//!
//! Every scanner runs in two passes over the same samples:
//!
//! 1. `start_prepare` / `prepare` / `finish_prepare` measures exactly how much
//!    storage the slot needs (rows, non-zeros, sequence offsets) and allocates
//!    it once, at `finish_prepare`.
//! 2. `start_fill` / `fill` / `finish_fill` walks the samples again and writes
//!    into the buffers at the offsets measured in pass 1.
//!
//! Sequence framing is a wrapper: a `Sequence` scanner takes one outer value
//! (itself a list), records its span in an offset array, and hands each inner
//! item to the wrapped scanner. Sub-sequences are two wrappers deep.

use crate::batch::{Argument, DenseMatrix, SlotMatrix, SparseMatrix};
use crate::error::{ProviderError, Result};
use crate::sample::Value;
use crate::slot::{SeqType, SlotHeader, SlotType};

fn offset(n: usize) -> Result<i32> {
    i32::try_from(n)
        .map_err(|_| ProviderError::protocol(format!("offset {} overflows a 32-bit index", n)))
}

/// Next entry of a cumulative offset array.
fn advance(start: i32, len: usize) -> Result<i32> {
    start.checked_add(offset(len)?).ok_or_else(|| {
        ProviderError::protocol(format!("offset {} + {} overflows a 32-bit index", start, len))
    })
}

fn unprepared(what: &str) -> ProviderError {
    ProviderError::protocol(format!("{} written before it was prepared", what))
}

// ============================================================================
// Dense
// ============================================================================

#[derive(Debug)]
pub struct DenseScanner {
    dim: usize,
    height: usize,
}

impl DenseScanner {
    fn prepare(&mut self, value: &Value) -> Result<()> {
        let len = value.list_len()?;
        if len != self.dim {
            return Err(ProviderError::protocol(format!(
                "dense element has {} values, slot dimension is {}",
                len, self.dim
            )));
        }
        self.height += 1;
        Ok(())
    }

    fn finish_prepare(&mut self, argument: &mut Argument) {
        argument.value = Some(SlotMatrix::Dense(DenseMatrix::zeros(self.height, self.dim)));
        self.height = 0;
    }

    fn fill(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        let matrix = argument.dense_mut().ok_or_else(|| unprepared("dense matrix"))?;
        if self.height >= matrix.rows {
            return Err(unprepared("dense row"));
        }
        let items = value.as_list()?;
        let row = &mut matrix.data[self.height * self.dim..(self.height + 1) * self.dim];
        for (cell, item) in row.iter_mut().zip(items) {
            *cell = item.as_f64()? as f32;
        }
        self.height += 1;
        Ok(())
    }
}

// ============================================================================
// Index
// ============================================================================

#[derive(Debug)]
pub struct IndexScanner {
    count: usize,
}

impl IndexScanner {
    fn finish_prepare(&mut self, argument: &mut Argument) {
        argument.ids = Some(vec![0; self.count]);
        self.count = 0;
    }

    fn fill(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        let ids = argument.ids.as_mut().ok_or_else(|| unprepared("index vector"))?;
        let slot = ids.get_mut(self.count).ok_or_else(|| unprepared("index"))?;
        *slot = value.as_index()?;
        self.count += 1;
        Ok(())
    }
}

// ============================================================================
// Sparse (shared by the no-value and with-value variants)
// ============================================================================

#[derive(Debug)]
pub struct SparseScanner {
    dim: usize,
    height: usize,
    nnz: usize,
}

impl SparseScanner {
    fn prepare(&mut self, value: &Value) -> Result<()> {
        self.height += 1;
        self.nnz += value.list_len()?;
        Ok(())
    }

    fn finish_prepare(&mut self, argument: &mut Argument, with_values: bool) {
        argument.value = Some(SlotMatrix::Sparse(SparseMatrix::with_shape(
            self.height,
            self.dim,
            self.nnz,
            with_values,
        )));
    }

    fn start_fill(&mut self, argument: &mut Argument) -> Result<()> {
        let matrix = argument.sparse_mut().ok_or_else(|| unprepared("sparse matrix"))?;
        matrix.rows[0] = 0;
        self.nnz = 0;
        self.height = 1;
        Ok(())
    }

    fn fill(&mut self, argument: &mut Argument, value: &Value, with_values: bool) -> Result<()> {
        let items = value.as_list()?;
        let dim = self.dim;
        let matrix = argument.sparse_mut().ok_or_else(|| unprepared("sparse matrix"))?;
        if self.height >= matrix.rows.len() || self.nnz + items.len() > matrix.cols.len() {
            return Err(unprepared("sparse row"));
        }
        matrix.rows[self.height] = advance(matrix.rows[self.height - 1], items.len())?;

        for item in items {
            let (column, cell) = if with_values {
                let pair = item.as_list()?;
                let [column, cell] = pair else {
                    return Err(ProviderError::protocol(format!(
                        "sparse value element must be a [column, value] pair, got {} elements",
                        pair.len()
                    )));
                };
                (column.as_index()?, Some(cell.as_f64()? as f32))
            } else {
                (item.as_index()?, None)
            };

            if column < 0 || column as usize >= dim {
                return Err(ProviderError::protocol(format!(
                    "sparse column {} outside [0, {})",
                    column, dim
                )));
            }
            matrix.cols[self.nnz] = column;
            if let (Some(values), Some(cell)) = (matrix.values.as_mut(), cell) {
                values[self.nnz] = cell;
            }
            self.nnz += 1;
        }
        self.height += 1;
        Ok(())
    }
}

// ============================================================================
// Sequence wrapper
// ============================================================================

/// Which offset array a sequence wrapper owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqLevel {
    Sequence,
    SubSequence,
}

#[derive(Debug)]
pub struct SequenceScanner {
    level: SeqLevel,
    inner: FieldScanner,
    count: usize,
}

impl SequenceScanner {
    fn positions<'a>(&self, argument: &'a mut Argument) -> &'a mut Option<Vec<i32>> {
        match self.level {
            SeqLevel::Sequence => &mut argument.sequence_start_positions,
            SeqLevel::SubSequence => &mut argument.sub_sequence_start_positions,
        }
    }

    fn prepare(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        self.count += 1;
        for item in value.as_list()? {
            self.inner.prepare(argument, item)?;
        }
        Ok(())
    }

    fn finish_prepare(&mut self, argument: &mut Argument) {
        *self.positions(argument) = Some(vec![0; self.count + 1]);
        self.inner.finish_prepare(argument);
    }

    fn start_fill(&mut self, argument: &mut Argument) -> Result<()> {
        let positions = self
            .positions(argument)
            .as_mut()
            .ok_or_else(|| unprepared("sequence offsets"))?;
        positions[0] = 0;
        self.count = 1;
        self.inner.start_fill(argument)
    }

    fn fill(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        let span = sequence_span(&self.inner, value)?;
        let count = self.count;
        let positions = self
            .positions(argument)
            .as_mut()
            .ok_or_else(|| unprepared("sequence offsets"))?;
        if count >= positions.len() {
            return Err(unprepared("sequence offset"));
        }
        positions[count] = advance(positions[count - 1], span)?;
        self.count += 1;

        for item in value.as_list()? {
            self.inner.fill(argument, item)?;
        }
        Ok(())
    }
}

/// Number of innermost elements under one outer value of a sequence whose
/// wrapped scanner is `inner`. Nested sequences are summed through; anything
/// else counts its direct items.
fn sequence_span(inner: &FieldScanner, value: &Value) -> Result<usize> {
    let items = value.as_list()?;
    match inner {
        FieldScanner::Sequence(nested) => items
            .iter()
            .try_fold(0, |total, item| Ok(total + sequence_span(&nested.inner, item)?)),
        _ => Ok(items.len()),
    }
}

// ============================================================================
// FieldScanner
// ============================================================================

/// Closed set of scanner variants. Dispatch is a plain `match`.
#[derive(Debug)]
pub enum FieldScanner {
    Dense(DenseScanner),
    IndexOnly(IndexScanner),
    SparseNoValue(SparseScanner),
    SparseWithValue(SparseScanner),
    Sequence(Box<SequenceScanner>),
}

impl FieldScanner {
    /// Build the scanner for a slot: the base variant from the slot type,
    /// wrapped once for sequences and twice (sub-sequence inside sequence)
    /// for sub-sequences.
    pub fn create(header: &SlotHeader) -> Self {
        let dim = header.dim;
        let base = match header.slot_type {
            SlotType::Dense => FieldScanner::Dense(DenseScanner { dim, height: 0 }),
            SlotType::IndexOnly => FieldScanner::IndexOnly(IndexScanner { count: 0 }),
            SlotType::SparseNoValue => FieldScanner::SparseNoValue(SparseScanner {
                dim,
                height: 0,
                nnz: 0,
            }),
            SlotType::SparseWithValue => FieldScanner::SparseWithValue(SparseScanner {
                dim,
                height: 0,
                nnz: 0,
            }),
        };

        match header.seq_type {
            SeqType::None => base,
            SeqType::Sequence => base.wrap(SeqLevel::Sequence),
            SeqType::SubSequence => base
                .wrap(SeqLevel::SubSequence)
                .wrap(SeqLevel::Sequence),
        }
    }

    fn wrap(self, level: SeqLevel) -> Self {
        FieldScanner::Sequence(Box::new(SequenceScanner {
            level,
            inner: self,
            count: 0,
        }))
    }

    pub fn start_prepare(&mut self, argument: &mut Argument) {
        match self {
            FieldScanner::Dense(s) => s.height = 0,
            FieldScanner::IndexOnly(s) => s.count = 0,
            FieldScanner::SparseNoValue(s) | FieldScanner::SparseWithValue(s) => {
                s.height = 0;
                s.nnz = 0;
            }
            FieldScanner::Sequence(s) => {
                s.count = 0;
                s.inner.start_prepare(argument);
            }
        }
    }

    /// Measure one value. For wrapped scanners `value` is an outer sequence;
    /// for base scanners it is a single element.
    pub fn prepare(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        match self {
            FieldScanner::Dense(s) => s.prepare(value),
            FieldScanner::IndexOnly(s) => {
                s.count += 1;
                Ok(())
            }
            FieldScanner::SparseNoValue(s) | FieldScanner::SparseWithValue(s) => s.prepare(value),
            FieldScanner::Sequence(s) => s.prepare(argument, value),
        }
    }

    /// Allocate the measured buffers.
    pub fn finish_prepare(&mut self, argument: &mut Argument) {
        match self {
            FieldScanner::Dense(s) => s.finish_prepare(argument),
            FieldScanner::IndexOnly(s) => s.finish_prepare(argument),
            FieldScanner::SparseNoValue(s) => s.finish_prepare(argument, false),
            FieldScanner::SparseWithValue(s) => s.finish_prepare(argument, true),
            FieldScanner::Sequence(s) => s.finish_prepare(argument),
        }
    }

    pub fn start_fill(&mut self, argument: &mut Argument) -> Result<()> {
        match self {
            FieldScanner::Dense(_) | FieldScanner::IndexOnly(_) => Ok(()),
            FieldScanner::SparseNoValue(s) | FieldScanner::SparseWithValue(s) => {
                s.start_fill(argument)
            }
            FieldScanner::Sequence(s) => s.start_fill(argument),
        }
    }

    pub fn fill(&mut self, argument: &mut Argument, value: &Value) -> Result<()> {
        match self {
            FieldScanner::Dense(s) => s.fill(argument, value),
            FieldScanner::IndexOnly(s) => s.fill(argument, value),
            FieldScanner::SparseNoValue(s) => s.fill(argument, value, false),
            FieldScanner::SparseWithValue(s) => s.fill(argument, value, true),
            FieldScanner::Sequence(s) => s.fill(argument, value),
        }
    }

    pub fn finish_fill(&mut self, argument: &mut Argument) {
        if let FieldScanner::Sequence(s) = self {
            s.inner.finish_fill(argument);
        }
    }
}
