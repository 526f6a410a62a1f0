//! GUID reconstruction from the runtime's eleven private fields.

use crate::protocol::Variable;

use super::{int_field, ConvertError, DebuggerClient, ValueConverter};

const SHORT_FIELDS: [&str; 2] = ["_b", "_c"];
const BYTE_FIELDS: [&str; 8] = ["_d", "_e", "_f", "_g", "_h", "_i", "_j", "_k"];

/// Rebuilds `System.Guid` values from `_a`..`_k` and collapses the result to
/// a single scalar with no further drill-down.
pub struct GuidConverter;

impl ValueConverter for GuidConverter {
    fn name(&self) -> &'static str {
        "guid"
    }

    fn can_convert(&self, variable: &Variable) -> bool {
        matches!(variable.r#type.as_deref(), Some("System.Guid" | "Guid"))
    }

    fn try_convert(
        &self,
        container: u32,
        debugger: &dyn DebuggerClient,
    ) -> Result<Vec<Variable>, ConvertError> {
        let children = debugger.fetch_variables(container)?;

        let a = field_bits(&children, "_a", 0xffff_ffff)?;
        let mut text = format!("{a:08x}");
        for name in SHORT_FIELDS {
            let bits = field_bits(&children, name, 0xffff)?;
            text.push('-');
            text.push_str(&format!("{bits:04x}"));
        }
        for (position, name) in BYTE_FIELDS.iter().enumerate() {
            let bits = field_bits(&children, name, 0xff)?;
            // Canonical 8-4-4-4-12 grouping: a dash before _d and before _f.
            if position == 0 || position == 2 {
                text.push('-');
            }
            text.push_str(&format!("{bits:02x}"));
        }

        Ok(vec![Variable::scalar(
            "Value",
            text,
            Some("System.Guid".to_string()),
        )])
    }
}

/// Field value as raw bits. The runtime stores the fields signed, so a
/// negative dump is masked into its two's-complement representation.
fn field_bits(children: &[Variable], name: &'static str, mask: u64) -> Result<u64, ConvertError> {
    let value = int_field(children, name)?;
    let unsigned = u64::from_le_bytes(value.to_le_bytes());
    Ok(unsigned & mask)
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeDebugger;
    use super::{GuidConverter, ValueConverter};
    use crate::protocol::Variable;

    fn guid_fields() -> Vec<Variable> {
        let fields: [(&str, i64); 11] = [
            ("_a", 1_543_583_988),
            ("_b", 23_662),
            ("_c", 18_852),
            ("_d", 133),
            ("_e", 136),
            ("_f", 114),
            ("_g", 68),
            ("_h", 173),
            ("_i", 2),
            ("_j", 88),
            ("_k", 5),
        ];
        fields
            .into_iter()
            .map(|(name, value)| FakeDebugger::child(name, &value.to_string(), 0))
            .collect()
    }

    #[test]
    fn reconstructs_canonical_guid_text() {
        let debugger = FakeDebugger::new();
        debugger.insert(5, guid_fields());

        let converted = GuidConverter.try_convert(5, &debugger).expect("convert");
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].value, "5c0138f4-5c6e-49a4-8588-7244ad025805");
        assert_eq!(converted[0].variables_reference, 0);

        // Deterministic across repeated resolutions.
        let again = GuidConverter.try_convert(5, &debugger).expect("convert");
        assert_eq!(converted, again);
    }

    #[test]
    fn negative_fields_use_twos_complement_bits() {
        let debugger = FakeDebugger::new();
        let mut fields = guid_fields();
        fields[0] = FakeDebugger::child("_a", "-1", 0);
        debugger.insert(6, fields);

        let converted = GuidConverter.try_convert(6, &debugger).expect("convert");
        assert!(converted[0].value.starts_with("ffffffff-"));
    }

    #[test]
    fn missing_field_fails_without_panicking() {
        let debugger = FakeDebugger::new();
        let mut fields = guid_fields();
        fields.retain(|variable| variable.name != "_k");
        debugger.insert(7, fields);

        assert!(GuidConverter.try_convert(7, &debugger).is_err());
    }

    #[test]
    fn claims_guid_typed_variables_only() {
        let mut guid = FakeDebugger::child("id", "{System.Guid}", 9);
        guid.r#type = Some("System.Guid".to_string());
        assert!(GuidConverter.can_convert(&guid));

        let mut other = FakeDebugger::child("x", "1", 9);
        other.r#type = Some("System.Int32".to_string());
        assert!(!GuidConverter.can_convert(&other));
    }
}
