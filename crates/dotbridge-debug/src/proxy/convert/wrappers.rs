//! Tuple and read-only wrapper converters: unwrap to the underlying value.

use crate::protocol::Variable;

use super::{field, ConvertError, DebuggerClient, ValueConverter};

/// Tuples: keep `Item1..ItemN` (and `Rest`) in declaration order, hide the
/// runtime's bookkeeping fields.
pub struct TupleConverter;

impl ValueConverter for TupleConverter {
    fn name(&self) -> &'static str {
        "tuple"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        match variable.r#type.as_deref() {
            Some(name) => {
                name.starts_with("System.ValueTuple")
                    || name.starts_with("System.Tuple")
                    // C#-style rendering, e.g. "(int, string)".
                    || (name.starts_with('(') && name.ends_with(')'))
            }
            None => false,
        }
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;

        let mut items: Vec<(usize, Variable)> = children
            .iter()
            .filter_map(|child| {
                child
                    .name
                    .strip_prefix("Item")
                    .and_then(|n| n.parse::<usize>().ok())
                    .map(|index| (index, child.clone()))
            })
            .collect();
        items.sort_by_key(|(index, _)| *index);

        let mut elements: Vec<Variable> = items.into_iter().map(|(_, child)| child).collect();
        if let Some(rest) = field(&children, "Rest") {
            elements.push(rest.clone());
        }
        if elements.is_empty() {
            return Err(ConvertError::MissingField("Item1"));
        }
        Ok(elements)
    }
}

/// Read-only collection wrappers: surface the wrapped list's elements
/// instead of the wrapper's single internal field.
pub struct ReadOnlyWrapperConverter;

impl ValueConverter for ReadOnlyWrapperConverter {
    fn name(&self) -> &'static str {
        "readonly-wrapper"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        variable
            .r#type
            .as_deref()
            .is_some_and(|name| name.contains("ReadOnlyCollection"))
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;
        let inner = field(&children, "list")
            .or_else(|| field(&children, "_list"))
            .ok_or(ConvertError::MissingField("list"))?;
        if inner.variables_reference == 0 {
            return Err(ConvertError::EmptyContainer(0));
        }

        let inner_children = debugger.fetch_variables(inner.variables_reference)?;
        // The wrapped value is usually a List<T>; flatten it the same way.
        if field(&inner_children, "_items").is_some() && field(&inner_children, "_size").is_some() {
            return super::collections::ListConverter
                .try_convert(inner.variables_reference, debugger);
        }
        Ok(inner_children)
    }
}
