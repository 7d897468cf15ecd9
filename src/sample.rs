// Samples as produced by generators.
// A sample is a record with one value per slot; each value is a small tree of
// ints, floats and lists whose shape the slot header describes.

use crate::error::{ProviderError, Result};

// ============================================================================
// Value
// ============================================================================

/// One field of a sample, or one timestep / sub-sequence of that field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    List(Vec<Value>),
}

impl Value {
    /// Build a `[column, value]` element of a sparse-with-value slot.
    pub fn pair(column: i64, value: f64) -> Self {
        Value::List(vec![Value::Int(column), Value::Float(value)])
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ProviderError::protocol(format!(
                "expected a sequence, got {}",
                other.describe()
            ))),
        }
    }

    /// Numeric cell. Ints are accepted, lists are not.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::List(_) => Err(ProviderError::protocol(format!(
                "expected a number, got {}",
                self.describe()
            ))),
        }
    }

    /// Integer cell that fits the engine's 32-bit index type. Floats are never
    /// truncated into indices.
    pub fn as_index(&self) -> Result<i32> {
        match self {
            Value::Int(v) => i32::try_from(*v).map_err(|_| {
                ProviderError::protocol(format!("integer {} does not fit a 32-bit index", v))
            }),
            other => Err(ProviderError::protocol(format!(
                "expected an integer, got {}",
                other.describe()
            ))),
        }
    }

    /// Number of elements if this is a list.
    pub fn list_len(&self) -> Result<usize> {
        self.as_list().map(<[Value]>::len)
    }

    fn describe(&self) -> String {
        match self {
            Value::Int(v) => format!("int {}", v),
            Value::Float(v) => format!("float {}", v),
            Value::List(items) => format!("list of {} elements", items.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Sample
// ============================================================================

/// A full record: field `i` feeds slot `i`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    fields: Vec<Value>,
}

impl Sample {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    /// Chain-friendly field append: `Sample::default().with(vec![1, 2]).with(3)`.
    pub fn with(mut self, field: impl Into<Value>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn field(&self, slot: usize) -> Result<&Value> {
        self.fields.get(slot).ok_or_else(|| {
            ProviderError::protocol(format!(
                "sample has {} fields, slot {} is missing",
                self.fields.len(),
                slot
            ))
        })
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

/// A sample together with the batch weight computed when it was pulled.
#[derive(Debug, Clone)]
pub struct PooledSample {
    pub sample: Sample,
    pub weight: usize,
}

impl PooledSample {
    pub fn new(sample: Sample, weight: usize) -> Self {
        Self { sample, weight }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion_rules() {
        assert_eq!(Value::Int(3).as_f64().unwrap(), 3.0);
        assert_eq!(Value::Float(2.5).as_f64().unwrap(), 2.5);
        assert!(Value::from(vec![1.0]).as_f64().is_err());

        assert_eq!(Value::Int(-7).as_index().unwrap(), -7);
        assert!(Value::Float(2.0).as_index().is_err());
        assert!(Value::Int(i64::from(i32::MAX) + 1).as_index().is_err());
    }

    #[test]
    fn test_sample_fields() {
        let sample = Sample::default()
            .with(vec![1.0, 2.0, 3.0])
            .with(4)
            .with(vec![Value::pair(1, 0.5)]);

        assert_eq!(sample.num_fields(), 3);
        assert_eq!(sample.field(0).unwrap().list_len().unwrap(), 3);
        assert_eq!(sample.field(1).unwrap().as_index().unwrap(), 4);
        assert!(sample.field(3).is_err());

        let pair = &sample.field(2).unwrap().as_list().unwrap()[0];
        assert_eq!(pair, &Value::List(vec![Value::Int(1), Value::Float(0.5)]));
    }
}
