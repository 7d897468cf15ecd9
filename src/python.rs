// Python bindings. A Python "provider" object supplies the generator method and
// the settings attributes; batches come back as one dict of numpy arrays per slot.
//
// The loader thread takes the GIL for every generator and calc_batch_size call, so every
// method that may wait on it (reset, get_next_batch, close, drop) releases the
// GIL first.

use std::sync::Arc;

use numpy::PyArray1;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyFloat, PyInt, PyIterator, PyString, PyTuple};
use pyo3::{IntoPyObjectExt, Py, PyAny};

use crate::batch::{Argument, SlotMatrix};
use crate::cache::CacheKind;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::generator::{GeneratorFactory, SampleGenerator};
use crate::provider::DataProvider;
use crate::sample::{Sample, Value};
use crate::slot::SlotHeader;

impl From<ProviderError> for PyErr {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::Configuration(_) => PyValueError::new_err(message),
            ProviderError::Protocol(_) => PyTypeError::new_err(message),
            ProviderError::ForeignCall { .. } => PyRuntimeError::new_err(message),
            ProviderError::Io(_) => PyIOError::new_err(message),
        }
    }
}

// ============================================================================
// Value conversion
// ============================================================================

fn value_from_py(obj: &Bound<'_, PyAny>) -> Result<Value> {
    if obj.is_instance_of::<PyInt>() {
        return obj
            .extract::<i64>()
            .map(Value::Int)
            .map_err(|e| ProviderError::protocol(e.to_string()));
    }
    if let Ok(float) = obj.downcast::<PyFloat>() {
        return Ok(Value::Float(float.value()));
    }
    if obj.is_instance_of::<PyString>() {
        return Err(ProviderError::protocol("strings are not valid slot data"));
    }
    if let Ok(items) = obj.try_iter() {
        let values = items
            .map(|item| {
                item.map_err(|e| ProviderError::protocol(e.to_string()))
                    .and_then(|item| value_from_py(&item))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::List(values));
    }
    // numpy scalars: integers expose __index__, floats __float__.
    if let Ok(v) = obj.extract::<i64>() {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = obj.extract::<f64>() {
        return Ok(Value::Float(v));
    }
    Err(ProviderError::protocol(format!(
        "unsupported slot value of type {}",
        obj.get_type()
    )))
}

/// A yielded object becomes a sample: a tuple holds one field per slot, and a
/// provider with a single slot may yield the bare field.
fn sample_from_py(obj: &Bound<'_, PyAny>, slots: usize) -> Result<Sample> {
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        let fields = tuple
            .iter()
            .map(|field| value_from_py(&field))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Sample::new(fields));
    }
    if slots == 1 {
        return Ok(Sample::new(vec![value_from_py(obj)?]));
    }
    match value_from_py(obj)? {
        Value::List(fields) => Ok(Sample::new(fields)),
        _ => Err(ProviderError::protocol(format!(
            "expected a sequence of {} fields",
            slots
        ))),
    }
}

fn argument_to_py(py: Python<'_>, argument: Argument) -> PyResult<Py<PyAny>> {
    let dict = PyDict::new(py);
    match argument.value {
        Some(SlotMatrix::Dense(matrix)) => {
            dict.set_item("shape", (matrix.rows, matrix.cols))?;
            dict.set_item("value", PyArray1::from_vec(py, matrix.data))?;
        }
        Some(SlotMatrix::Sparse(matrix)) => {
            dict.set_item("shape", (matrix.height, matrix.width))?;
            dict.set_item("rows", PyArray1::from_vec(py, matrix.rows))?;
            dict.set_item("cols", PyArray1::from_vec(py, matrix.cols))?;
            if let Some(values) = matrix.values {
                dict.set_item("values", PyArray1::from_vec(py, values))?;
            }
        }
        None => {}
    }
    if let Some(ids) = argument.ids {
        dict.set_item("ids", PyArray1::from_vec(py, ids))?;
    }
    if let Some(starts) = argument.sequence_start_positions {
        dict.set_item("sequence_start_positions", PyArray1::from_vec(py, starts))?;
    }
    if let Some(starts) = argument.sub_sequence_start_positions {
        dict.set_item("sub_sequence_start_positions", PyArray1::from_vec(py, starts))?;
    }
    dict.into_py_any(py)
}

// ============================================================================
// Adapters for the Python callables
// ============================================================================

struct PyGenerator {
    file: String,
    iterator: Py<PyIterator>,
    calc_batch_size: Option<Py<PyAny>>,
    slots: usize,
}

impl SampleGenerator for PyGenerator {
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        Ok(self.next_weighted()?.map(|(sample, _)| sample))
    }

    /// `calc_batch_size` sees the object exactly as the generator yielded it.
    fn next_weighted(&mut self) -> Result<Option<(Sample, Option<usize>)>> {
        Python::with_gil(|py| {
            let mut iterator = self.iterator.bind(py).clone();
            let obj = match iterator.next() {
                None => return Ok(None),
                Some(Err(err)) => {
                    return Err(ProviderError::foreign(format!("generator({})", self.file), err));
                }
                Some(Ok(obj)) => obj,
            };
            let weight = match &self.calc_batch_size {
                Some(callback) => Some(weigh_py(callback.bind(py), &obj)?),
                None => None,
            };
            Ok(Some((sample_from_py(&obj, self.slots)?, weight)))
        })
    }
}

fn weigh_py(callback: &Bound<'_, PyAny>, obj: &Bound<'_, PyAny>) -> Result<usize> {
    let result = callback
        .call1((obj,))
        .map_err(|e| ProviderError::foreign("calc_batch_size", e))?;
    if !result.is_instance_of::<PyInt>() {
        return Err(ProviderError::protocol(format!(
            "calc_batch_size must return an int, got {}",
            result.get_type()
        )));
    }
    let weight: i64 = result
        .extract()
        .map_err(|e| ProviderError::protocol(e.to_string()))?;
    usize::try_from(weight)
        .map_err(|_| ProviderError::protocol(format!("calc_batch_size returned {}", weight)))
}

struct PyGeneratorFactory {
    provider: Py<PyAny>,
    calc_batch_size: Option<Py<PyAny>>,
    slots: usize,
}

impl GeneratorFactory for PyGeneratorFactory {
    fn open(&self, file: &str) -> Result<Box<dyn SampleGenerator>> {
        Python::with_gil(|py| {
            let source = format!("generator({})", file);
            let produced = self
                .provider
                .bind(py)
                .call_method1("generator", (file,))
                .map_err(|e| ProviderError::foreign(&source, e))?;
            let iterator = produced.try_iter().map_err(|e| {
                ProviderError::protocol(format!("{} did not return an iterator: {}", source, e))
            })?;
            Ok(Box::new(PyGenerator {
                file: file.to_string(),
                iterator: iterator.unbind(),
                calc_batch_size: self
                    .calc_batch_size
                    .as_ref()
                    .map(|callback| callback.clone_ref(py)),
                slots: self.slots,
            }) as Box<dyn SampleGenerator>)
        })
    }
}

// ============================================================================
// Provider settings
// ============================================================================

fn optional_attr<'py>(obj: &Bound<'py, PyAny>, name: &str) -> PyResult<Option<Bound<'py, PyAny>>> {
    if !obj.hasattr(name)? {
        return Ok(None);
    }
    let value = obj.getattr(name)?;
    Ok((!value.is_none()).then_some(value))
}

/// Slots are `(dim, type, seq_type)` tuples or objects with those attributes.
fn read_slots(provider: &Bound<'_, PyAny>) -> PyResult<Vec<SlotHeader>> {
    let mut headers = Vec::new();
    for slot in provider.getattr("slots")?.try_iter()? {
        let slot = slot?;
        let (dim, kind, seq) = match slot.extract::<(i64, i64, i64)>() {
            Ok(codes) => codes,
            Err(_) => (
                slot.getattr("dim")?.extract()?,
                slot.getattr("type")?.extract()?,
                slot.getattr("seq_type")?.extract()?,
            ),
        };
        headers.push(SlotHeader::from_codes(dim, kind, seq)?);
    }
    Ok(headers)
}

fn read_config(provider: &Bound<'_, PyAny>, seed: Option<u64>) -> PyResult<ProviderConfig> {
    let mut config = ProviderConfig::default();
    if let Some(shuffle) = optional_attr(provider, "should_shuffle")? {
        config.shuffle = shuffle.extract()?;
    }
    if let Some(size) = optional_attr(provider, "pool_size")? {
        // Non-positive sizes mean unbounded.
        let size: i64 = size.extract()?;
        config.pool_size = usize::try_from(size).ok().filter(|s| *s > 0);
    }
    if let Some(over) = optional_attr(provider, "can_over_batch_size")? {
        config.can_over_batch_size = over.extract()?;
    }
    if let Some(cache) = optional_attr(provider, "cache")? {
        config.cache = CacheKind::try_from(cache.extract::<i64>()?)?;
    }
    config.seed = seed;
    Ok(config)
}

// ============================================================================
// PyDataProvider
// ============================================================================

#[pyclass(name = "DataProvider")]
pub struct PyDataProvider {
    inner: Option<DataProvider>,
}

impl PyDataProvider {
    fn provider_mut(&mut self) -> PyResult<&mut DataProvider> {
        self.inner
            .as_mut()
            .ok_or_else(|| PyRuntimeError::new_err("data provider is closed"))
    }
}

#[pymethods]
impl PyDataProvider {
    /// Create a provider.
    ///
    /// Args:
    ///     provider: object with `generator(file)` and `slots`, plus the optional
    ///         `should_shuffle`, `pool_size`, `can_over_batch_size`,
    ///         `calc_batch_size` and `cache` attributes
    ///     file_list: file identifiers passed to `generator`
    ///     seed: optional seed for shuffling
    #[new]
    #[pyo3(signature = (provider, file_list, seed = None))]
    fn new(provider: &Bound<'_, PyAny>, file_list: Vec<String>, seed: Option<u64>) -> PyResult<Self> {
        let headers = read_slots(provider)?;
        let config = read_config(provider, seed)?;
        let factory = Arc::new(PyGeneratorFactory {
            provider: provider.clone().unbind(),
            calc_batch_size: optional_attr(provider, "calc_batch_size")?.map(Bound::unbind),
            slots: headers.len(),
        });

        let inner = DataProvider::new(config, factory, file_list, headers, None)?;
        Ok(Self { inner: Some(inner) })
    }

    fn reset(&mut self, py: Python<'_>) -> PyResult<()> {
        let provider = self.provider_mut()?;
        py.allow_threads(|| provider.reset())?;
        Ok(())
    }

    /// Returns `(size, slots)`; `size == 0` and no slots at the end of a pass.
    fn get_next_batch(&mut self, py: Python<'_>, size: usize) -> PyResult<(usize, Vec<Py<PyAny>>)> {
        let provider = self.provider_mut()?;
        let batch = py.allow_threads(|| provider.next_batch(size))?;
        if batch.is_empty() {
            return Ok((0, Vec::new()));
        }
        let slots = batch
            .arguments
            .into_iter()
            .map(|argument| argument_to_py(py, argument))
            .collect::<PyResult<Vec<_>>>()?;
        Ok((batch.size, slots))
    }

    #[getter]
    fn num_slots(&self) -> PyResult<usize> {
        match &self.inner {
            Some(provider) => Ok(provider.headers().len()),
            None => Err(PyRuntimeError::new_err("data provider is closed")),
        }
    }

    /// Stop the loader and release the buffered samples.
    fn close(&mut self, py: Python<'_>) {
        if let Some(provider) = self.inner.take() {
            py.allow_threads(move || drop(provider));
        }
    }
}

impl Drop for PyDataProvider {
    fn drop(&mut self) {
        if let Some(provider) = self.inner.take() {
            Python::with_gil(|py| py.allow_threads(move || drop(provider)));
        }
    }
}
