// Tue Jan 13 2026 - Alex

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an offset was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Emulation,
    InstructionTrace,
    /// Taken as a structural fact, never checked against the binary.
    Assumed,
    Unimplemented,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Emulation => "emulation",
            ProbeMethod::InstructionTrace => "instruction_trace",
            ProbeMethod::Assumed => "assumed",
            ProbeMethod::Unimplemented => "unimplemented",
        }
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureOffsetResult {
    pub structure_name: String,
    pub field_name: String,
    pub offset: Option<u64>,
    pub method: ProbeMethod,
    pub source: Option<String>,
    pub error: Option<String>,
}

impl StructureOffsetResult {
    pub fn new(structure_name: String, field_name: String, offset: Option<u64>) -> Self {
        Self {
            structure_name,
            field_name,
            offset,
            method: ProbeMethod::Emulation,
            source: None,
            error: None,
        }
    }

    pub fn with_method(mut self, method: ProbeMethod) -> Self {
        self.method = method;
        self
    }

    /// Function the probe emulated.
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_found(&self) -> bool {
        self.offset.is_some()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.structure_name, self.field_name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedResults {
    pub binary: Option<String>,
    pub structure_offsets: Vec<StructureOffsetResult>,
}

impl CombinedResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = Some(binary.to_string());
        self
    }

    pub fn add_structure_offset(&mut self, result: StructureOffsetResult) {
        self.structure_offsets.push(result);
    }

    pub fn total_count(&self) -> usize {
        self.structure_offsets.len()
    }

    pub fn found_count(&self) -> usize {
        self.structure_offsets.iter().filter(|r| r.is_found()).count()
    }

    pub fn assumed_count(&self) -> usize {
        self.structure_offsets
            .iter()
            .filter(|r| r.method == ProbeMethod::Assumed)
            .count()
    }

    pub fn missing(&self) -> impl Iterator<Item = &StructureOffsetResult> {
        self.structure_offsets.iter().filter(|r| !r.is_found())
    }

    pub fn merge(&mut self, other: CombinedResults) {
        self.structure_offsets.extend(other.structure_offsets);
    }

    /// Structure name -> field name -> details, in probe order.
    pub fn to_json_map(&self) -> IndexMap<String, IndexMap<String, serde_json::Value>> {
        let mut map: IndexMap<String, IndexMap<String, serde_json::Value>> = IndexMap::new();

        for result in &self.structure_offsets {
            let entry = map.entry(result.structure_name.clone()).or_default();
            entry.insert(
                result.field_name.clone(),
                serde_json::json!({
                    "offset": result.offset.map(|o| format!("0x{:x}", o)),
                    "method": result.method.as_str(),
                    "source": result.source,
                    "error": result.error,
                }),
            );
        }

        map
    }
}
