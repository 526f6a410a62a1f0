//! Collection converters.
//! Each flattens a collection's internal backing storage into its logical
//! elements: slack beyond the logical size is dropped and results follow
//! index order, not the debugger's field order.

use crate::protocol::Variable;

use super::{
    container_field, count_field, indexed_elements, ConvertError, DebuggerClient, ValueConverter,
};

fn type_starts_with(variable: &Variable, prefix: &str) -> bool {
    variable
        .r#type
        .as_deref()
        .is_some_and(|name| name.starts_with(prefix))
}

/// `List<T>`: logical prefix of the `_items` backing array, `_size` entries.
pub struct ListConverter;

impl ValueConverter for ListConverter {
    fn name(&self) -> &'static str {
        "list"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        type_starts_with(variable, "System.Collections.Generic.List")
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;
        resolve_array_backed(&children, "_items", "_size", debugger)
    }
}

/// `Dictionary<K,V>`: the first `_count` slots of the `_entries` node array.
/// Entries keep their own handles so key/value pairs stay expandable.
pub struct DictionaryConverter;

impl ValueConverter for DictionaryConverter {
    fn name(&self) -> &'static str {
        "dictionary"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        type_starts_with(variable, "System.Collections.Generic.Dictionary")
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;
        resolve_array_backed(&children, "_entries", "_count", debugger)
    }
}

/// `HashSet<T>`: `_slots` on older runtimes, `_entries` on current ones.
pub struct HashSetConverter;

impl ValueConverter for HashSetConverter {
    fn name(&self) -> &'static str {
        "hashset"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        type_starts_with(variable, "System.Collections.Generic.HashSet")
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;
        let buckets = if super::field(&children, "_slots").is_some() {
            "_slots"
        } else {
            "_entries"
        };
        resolve_array_backed(&children, buckets, "_count", debugger)
    }
}

/// `Queue<T>`: circular buffer over `_array`, starting at `_head` and
/// wrapping, `_size` entries long.
pub struct QueueConverter;

impl ValueConverter for QueueConverter {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        type_starts_with(variable, "System.Collections.Generic.Queue")
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;
        let array = container_field(&children, "_array")?;
        let head = count_field(&children, "_head")?;
        let size = count_field(&children, "_size")?;

        let raw = indexed_elements(debugger.fetch_variables(array.variables_reference)?);
        if size == 0 {
            return Ok(Vec::new());
        }
        let capacity = raw.len();
        if capacity == 0 || size > capacity {
            return Err(ConvertError::EmptyContainer(array.variables_reference));
        }

        let mut elements = Vec::with_capacity(size);
        for position in 0..size {
            let mut element = raw[(head + position) % capacity].clone();
            element.name = format!("[{position}]");
            elements.push(element);
        }
        Ok(elements)
    }
}

/// Shared backing-array resolution: fetch the array container, order its
/// elements by index and keep the logical prefix.
fn resolve_array_backed(
    children: &[Variable],
    array_field: &'static str,
    count_name: &'static str,
    debugger: &dyn DebuggerClient,
) -> Result<Vec<Variable>, ConvertError> {
    let array = container_field(children, array_field)?;
    let count = count_field(children, count_name)?;

    let mut elements = indexed_elements(debugger.fetch_variables(array.variables_reference)?);
    elements.truncate(count);
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeDebugger;
    use super::{ListConverter, QueueConverter, ValueConverter};
    use crate::protocol::Variable;

    fn typed(name: &str, type_name: &str, reference: u32) -> Variable {
        let mut variable = FakeDebugger::child(name, "{...}", reference);
        variable.r#type = Some(type_name.to_string());
        variable
    }

    #[test]
    fn list_drops_backing_array_slack_and_keeps_index_order() {
        let debugger = FakeDebugger::new();
        debugger.insert(
            10,
            vec![
                FakeDebugger::child("_size", "3", 0),
                FakeDebugger::child("_items", "{string[5]}", 11),
                FakeDebugger::child("_version", "7", 0),
            ],
        );
        // Deliberately shuffled: result order must come from the indices.
        debugger.insert(
            11,
            vec![
                FakeDebugger::child("[3]", "\"EXTRA1\"", 0),
                FakeDebugger::child("[0]", "\"A\"", 0),
                FakeDebugger::child("[4]", "\"EXTRA2\"", 0),
                FakeDebugger::child("[2]", "\"C\"", 0),
                FakeDebugger::child("[1]", "\"B\"", 0),
            ],
        );

        let elements = ListConverter.try_convert(10, &debugger).expect("convert");
        let values: Vec<&str> = elements.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, ["\"A\"", "\"B\"", "\"C\""]);
    }

    #[test]
    fn list_without_backing_field_reports_failure() {
        let debugger = FakeDebugger::new();
        debugger.insert(10, vec![FakeDebugger::child("_size", "3", 0)]);
        assert!(ListConverter.try_convert(10, &debugger).is_err());
    }

    #[test]
    fn queue_unwraps_ring_buffer_order() {
        let debugger = FakeDebugger::new();
        debugger.insert(
            20,
            vec![
                FakeDebugger::child("_array", "{int[4]}", 21),
                FakeDebugger::child("_head", "2", 0),
                FakeDebugger::child("_size", "3", 0),
                FakeDebugger::child("_tail", "1", 0),
            ],
        );
        debugger.insert(
            21,
            vec![
                FakeDebugger::child("[0]", "30", 0),
                FakeDebugger::child("[1]", "stale", 0),
                FakeDebugger::child("[2]", "10", 0),
                FakeDebugger::child("[3]", "20", 0),
            ],
        );

        let elements = QueueConverter.try_convert(20, &debugger).expect("convert");
        let values: Vec<&str> = elements.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, ["10", "20", "30"]);
        let names: Vec<&str> = elements.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["[0]", "[1]", "[2]"]);
    }

    #[test]
    fn converters_claim_their_generic_types() {
        assert!(ListConverter.can_convert(&typed(
            "xs",
            "System.Collections.Generic.List`1[System.String]",
            3
        )));
        assert!(ListConverter.can_convert(&typed("xs", "System.Collections.Generic.List<int>", 3)));
        assert!(!ListConverter.can_convert(&typed("xs", "System.String", 3)));
    }
}
