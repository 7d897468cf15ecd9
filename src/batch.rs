// Finished batches: one Argument per slot, holding flat buffers the engine
// reshapes on its side (dense rows x dim, CSR triples, offset arrays).

use crate::error::Result;

// ============================================================================
// Numeric storage
// ============================================================================

/// Row-major `rows x cols` matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }
}

/// CSR matrix. `values` is `None` for slots that only carry column indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseMatrix {
    pub height: usize,
    pub width: usize,
    /// `height + 1` row offsets into `cols`.
    pub rows: Vec<i32>,
    /// `nnz` column indices.
    pub cols: Vec<i32>,
    pub values: Option<Vec<f32>>,
}

impl SparseMatrix {
    pub fn with_shape(height: usize, width: usize, nnz: usize, with_values: bool) -> Self {
        Self {
            height,
            width,
            rows: vec![0; height + 1],
            cols: vec![0; nnz],
            values: with_values.then(|| vec![0.0; nnz]),
        }
    }

    pub fn nnz(&self) -> usize {
        self.cols.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotMatrix {
    Dense(DenseMatrix),
    Sparse(SparseMatrix),
}

// ============================================================================
// Argument / Batch
// ============================================================================

/// Encoded data for one slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Argument {
    /// Dense or sparse payload (dense and sparse slots).
    pub value: Option<SlotMatrix>,
    /// One integer per element (index slots).
    pub ids: Option<Vec<i32>>,
    /// Start offset of each sequence, plus a trailing total.
    pub sequence_start_positions: Option<Vec<i32>>,
    /// Start offset of each sub-sequence, plus a trailing total.
    pub sub_sequence_start_positions: Option<Vec<i32>>,
}

impl Argument {
    pub fn dense(&self) -> Option<&DenseMatrix> {
        match &self.value {
            Some(SlotMatrix::Dense(m)) => Some(m),
            _ => None,
        }
    }

    pub fn sparse(&self) -> Option<&SparseMatrix> {
        match &self.value {
            Some(SlotMatrix::Sparse(m)) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn dense_mut(&mut self) -> Option<&mut DenseMatrix> {
        match &mut self.value {
            Some(SlotMatrix::Dense(m)) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn sparse_mut(&mut self) -> Option<&mut SparseMatrix> {
        match &mut self.value {
            Some(SlotMatrix::Sparse(m)) => Some(m),
            _ => None,
        }
    }
}

/// A multi-slot batch. `size` is the total drawn weight, `num_samples` the
/// number of records encoded. A batch without samples marks the end of a pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub size: usize,
    pub num_samples: usize,
    pub arguments: Vec<Argument>,
}

impl Batch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }
}

/// Copies a finished batch into another memory space (e.g. device memory).
/// Called synchronously before the batch is handed to the caller.
pub trait BatchTransfer: Send + Sync {
    fn transfer(&self, batch: Batch) -> Result<Batch>;
}

impl<F> BatchTransfer for F
where
    F: Fn(Batch) -> Result<Batch> + Send + Sync,
{
    fn transfer(&self, batch: Batch) -> Result<Batch> {
        self(batch)
    }
}
