//! Turns a drawn set of samples into a [`Batch`].
//!
//! Every slot gets its own scanner and argument. The prepare phase runs for all
//! slots, then the fill phase; slots are independent, so each phase fans out
//! over rayon and the join between phases guarantees every buffer is sized
//! before any write.

use rayon::prelude::*;
use tracing::debug;

use crate::batch::{Argument, Batch};
use crate::error::{ProviderError, Result};
use crate::sample::PooledSample;
use crate::scanner::FieldScanner;
use crate::slot::SlotHeader;

pub struct BatchAssembler {
    headers: Vec<SlotHeader>,
}

impl BatchAssembler {
    pub fn new(headers: Vec<SlotHeader>) -> Self {
        for (slot, header) in headers.iter().enumerate() {
            debug!(slot, %header, "Slot header");
        }
        Self { headers }
    }

    pub fn headers(&self) -> &[SlotHeader] {
        &self.headers
    }

    /// Encode `samples` slot by slot. `size` is the drawn weight reported on
    /// the batch. No samples gives the end-of-pass batch.
    pub fn assemble(&self, samples: &[PooledSample], size: usize) -> Result<Batch> {
        if samples.is_empty() {
            return Ok(Batch::empty());
        }
        let slots = self.headers.len();
        if let Some(bad) = samples.iter().find(|s| s.sample.num_fields() != slots) {
            return Err(ProviderError::protocol(format!(
                "sample has {} fields but {} slots are declared",
                bad.sample.num_fields(),
                slots
            )));
        }

        let mut lanes: Vec<(FieldScanner, Argument)> = self
            .headers
            .iter()
            .map(|header| (FieldScanner::create(header), Argument::default()))
            .collect();

        lanes
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(slot, (scanner, argument))| -> Result<()> {
                scanner.start_prepare(argument);
                for item in samples {
                    scanner
                        .prepare(argument, item.sample.field(slot)?)
                        .map_err(|e| e.in_slot(slot))?;
                }
                scanner.finish_prepare(argument);
                Ok(())
            })?;

        lanes
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(slot, (scanner, argument))| -> Result<()> {
                scanner.start_fill(argument).map_err(|e| e.in_slot(slot))?;
                for item in samples {
                    scanner
                        .fill(argument, item.sample.field(slot)?)
                        .map_err(|e| e.in_slot(slot))?;
                }
                scanner.finish_fill(argument);
                Ok(())
            })?;

        Ok(Batch {
            size,
            num_samples: samples.len(),
            arguments: lanes.into_iter().map(|(_, argument)| argument).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Sample, Value};
    use crate::slot::SeqType;

    fn pooled(fields: Vec<Value>) -> PooledSample {
        PooledSample::new(Sample::new(fields), 1)
    }

    #[test]
    fn test_multi_slot_batch() {
        let assembler = BatchAssembler::new(vec![
            SlotHeader::dense(3).unwrap(),
            SlotHeader::sparse_no_value(10).unwrap(),
            SlotHeader::index(4).unwrap(),
        ]);
        let samples = vec![
            pooled(vec![Value::from(vec![1, 2, 3]), Value::from(vec![5i64]), Value::Int(1)]),
            pooled(vec![Value::from(vec![4, 5, 6]), Value::List(vec![]), Value::Int(3)]),
            pooled(vec![Value::from(vec![7, 8, 9]), Value::from(vec![2i64, 7]), Value::Int(0)]),
        ];

        let batch = assembler.assemble(&samples, 3).unwrap();
        assert_eq!((batch.size, batch.num_samples), (3, 3));
        assert_eq!(batch.arguments.len(), 3);

        let dense = batch.arguments[0].dense().unwrap();
        assert_eq!(dense.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

        let sparse = batch.arguments[1].sparse().unwrap();
        assert_eq!(sparse.rows, vec![0, 1, 1, 3]);
        assert_eq!(sparse.cols, vec![5, 2, 7]);
        assert!(sparse.values.is_none());

        assert_eq!(batch.arguments[2].ids, Some(vec![1, 3, 0]));
    }

    #[test]
    fn test_sequence_slot_offsets() {
        let assembler =
            BatchAssembler::new(vec![SlotHeader::index(100).unwrap().with_seq(SeqType::Sequence)]);
        let samples = vec![
            pooled(vec![Value::from(vec![1, 2, 3])]),
            pooled(vec![Value::from(vec![4])]),
        ];
        let batch = assembler.assemble(&samples, 2).unwrap();
        let arg = &batch.arguments[0];
        assert_eq!(arg.ids, Some(vec![1, 2, 3, 4]));
        assert_eq!(arg.sequence_start_positions, Some(vec![0, 3, 4]));
    }

    #[test]
    fn test_errors_name_the_slot() {
        let assembler =
            BatchAssembler::new(vec![SlotHeader::dense(1).unwrap(), SlotHeader::index(4).unwrap()]);
        let samples = vec![pooled(vec![Value::from(vec![1.0]), Value::Float(0.5)])];
        let err = assembler.assemble(&samples, 1).unwrap_err();
        match err {
            ProviderError::Protocol(message) => assert!(message.starts_with("slot 1: ")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_field_count_mismatch() {
        let assembler = BatchAssembler::new(vec![SlotHeader::dense(1).unwrap()]);
        let samples = vec![pooled(vec![Value::from(vec![1.0]), Value::Int(2)])];
        assert!(matches!(
            assembler.assemble(&samples, 1),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[test]
    fn test_no_samples_is_end_of_pass() {
        let assembler = BatchAssembler::new(vec![SlotHeader::dense(2).unwrap()]);
        let batch = assembler.assemble(&[], 0).unwrap();
        assert!(batch.is_empty());
    }
}
