//! Value converter engine.
//! - ValueConverter: type-specific reconstruction of high-level values
//! - ConverterRegistry: live variablesReference -> converter claims
//! - shared field/index helpers for raw debugger dumps

mod collections;
mod guid;
mod wrappers;

pub use collections::{DictionaryConverter, HashSetConverter, ListConverter, QueueConverter};
pub use guid::GuidConverter;
pub use wrappers::{ReadOnlyWrapperConverter, TupleConverter};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::error::RequestError;
use crate::protocol::Variable;

/// Failure inside a converter. Never surfaces to the client: callers fall
/// back to forwarding the unconverted message.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has non-numeric value '{value}'")]
    MalformedField { field: &'static str, value: String },

    #[error("container {0} has no children to fetch")]
    EmptyContainer(u32),

    #[error("nested variables fetch failed: {0}")]
    Fetch(String),
}

impl From<RequestError> for ConvertError {
    fn from(err: RequestError) -> Self {
        Self::Fetch(err.to_string())
    }
}

/// Nested variables access used by converters to resolve multi-level
/// structures. Implemented by the proxy handle and by test fakes.
pub trait DebuggerClient: Send + Sync {
    fn fetch_variables(&self, variables_reference: u32) -> Result<Vec<Variable>, ConvertError>;
}

/// A type-specific strategy reconstructing a high-level value from a
/// runtime's raw field dump.
pub trait ValueConverter: Send + Sync {
    /// Converter name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this converter claims the given child variable.
    fn can_convert(&self, variable: &Variable) -> bool;

    /// Resolve the container into synthesized child variables. Fully
    /// resolved results carry `variables_reference == 0`; entries of large
    /// structures may keep their own nonzero handles for further drill-down.
    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError>;
}

/// Maps live `variablesReference` handles to the converter that claimed
/// them. Built lazily from observed variables responses, cleared in bulk on
/// every stop because handles do not survive a resume.
pub struct ConverterRegistry {
    converters: Vec<Arc<dyn ValueConverter>>,
    claimed: Mutex<HashMap<u32, Arc<dyn ValueConverter>>>,
}

impl ConverterRegistry {
    #[must_use]
    pub fn new(converters: Vec<Arc<dyn ValueConverter>>) -> Self {
        Self {
            converters,
            claimed: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in converter set. Wrapper types come before
    /// the collections so `ReadOnlyCollection` is not claimed by the
    /// dictionary/list matchers.
    #[must_use]
    pub fn with_default_converters() -> Self {
        Self::new(vec![
            Arc::new(GuidConverter),
            Arc::new(TupleConverter),
            Arc::new(ReadOnlyWrapperConverter),
            Arc::new(ListConverter),
            Arc::new(DictionaryConverter),
            Arc::new(HashSetConverter),
            Arc::new(QueueConverter),
        ])
    }

    /// Check every expandable child against the converter set; the first
    /// match claims the child's handle for later client-side redemption.
    pub fn observe_variables(&self, variables: &[Variable]) {
        let mut claimed = self.lock_claimed();
        for variable in variables {
            if variable.variables_reference == 0 {
                continue;
            }
            if let Some(converter) = self
                .converters
                .iter()
                .find(|converter| converter.can_convert(variable))
            {
                debug!(
                    reference = variable.variables_reference,
                    converter = converter.name(),
                    "claimed variable container"
                );
                claimed.insert(variable.variables_reference, Arc::clone(converter));
            }
        }
    }

    /// Converter claiming this handle, if any.
    #[must_use]
    pub fn lookup(&self, variables_reference: u32) -> Option<Arc<dyn ValueConverter>> {
        self.lock_claimed().get(&variables_reference).cloned()
    }

    /// Drop every claim. Called on `stopped`: handles from the previous stop
    /// are no longer valid, even if the debugger reuses the integers.
    pub fn invalidate_all(&self) {
        self.lock_claimed().clear();
    }

    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.lock_claimed().len()
    }

    fn lock_claimed(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<dyn ValueConverter>>> {
        match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) fn field<'a>(variables: &'a [Variable], name: &str) -> Option<&'a Variable> {
    variables.iter().find(|variable| variable.name == name)
}

pub(crate) fn int_field(variables: &[Variable], name: &'static str) -> Result<i64, ConvertError> {
    let variable = field(variables, name).ok_or(ConvertError::MissingField(name))?;
    variable
        .value
        .trim()
        .parse::<i64>()
        .map_err(|_| ConvertError::MalformedField {
            field: name,
            value: variable.value.clone(),
        })
}

pub(crate) fn count_field(variables: &[Variable], name: &'static str) -> Result<usize, ConvertError> {
    let raw = int_field(variables, name)?;
    usize::try_from(raw).map_err(|_| ConvertError::MalformedField {
        field: name,
        value: raw.to_string(),
    })
}

pub(crate) fn container_field<'a>(
    variables: &'a [Variable],
    name: &'static str,
) -> Result<&'a Variable, ConvertError> {
    let variable = field(variables, name).ok_or(ConvertError::MissingField(name))?;
    if variable.variables_reference == 0 {
        return Err(ConvertError::EmptyContainer(0));
    }
    Ok(variable)
}

/// Index parsed from an element name like `[3]`.
pub(crate) fn element_index(name: &str) -> Option<usize> {
    name.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Element variables sorted by their array index, non-element entries (raw
/// views, capacity fields) dropped.
pub(crate) fn indexed_elements(variables: Vec<Variable>) -> Vec<Variable> {
    let mut elements: Vec<(usize, Variable)> = variables
        .into_iter()
        .filter_map(|variable| element_index(&variable.name).map(|index| (index, variable)))
        .collect();
    elements.sort_by_key(|(index, _)| *index);
    elements.into_iter().map(|(_, variable)| variable).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ConvertError, DebuggerClient};
    use crate::protocol::Variable;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned container -> children map standing in for a live debugger.
    #[derive(Default)]
    pub struct FakeDebugger {
        containers: Mutex<HashMap<u32, Vec<Variable>>>,
    }

    impl FakeDebugger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, reference: u32, children: Vec<Variable>) {
            self.containers
                .lock()
                .expect("fake debugger lock")
                .insert(reference, children);
        }

        pub fn child(name: &str, value: &str, reference: u32) -> Variable {
            let mut variable = Variable::scalar(name, value, None);
            variable.variables_reference = reference;
            variable
        }
    }

    impl DebuggerClient for FakeDebugger {
        fn fetch_variables(&self, reference: u32) -> Result<Vec<Variable>, ConvertError> {
            self.containers
                .lock()
                .expect("fake debugger lock")
                .get(&reference)
                .cloned()
                .ok_or(ConvertError::EmptyContainer(reference))
        }
    }
}
