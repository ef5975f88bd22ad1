//! Analysis job model
//!
//! Jobs are plain serializable data (JSON through serde) so they can be
//! written by the CLI, shipped to workers in a `job-def` form field and read
//! back unchanged.
//!
//! Every component job has a stable key: its explicit `key`, or its position
//! in the job. Components of an output data stream job are prefixed with
//! `<producer key>/<stream name>/`, e.g. `1/tokens/0`.

use crate::descriptor::{ComponentKind, DescriptorRegistry};
use crate::error::{EngineError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A configured value; arrays are only meaningful for array properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Array(Vec<Value>),
    Single(Value),
}

impl PropertyValue {
    pub fn as_single(&self) -> Option<&Value> {
        match self {
            PropertyValue::Single(value) => Some(value),
            PropertyValue::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_single().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_single().and_then(Value::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_single().and_then(Value::as_bool)
    }

    /// All values; a single value becomes a one-element list
    pub fn into_values(self) -> Vec<Value> {
        match self {
            PropertyValue::Array(values) => values,
            PropertyValue::Single(value) => vec![value],
        }
    }

    /// String values, skipping anything that is not a string
    pub fn into_strings(self) -> Vec<String> {
        self.into_values()
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn values(&self) -> &[Value] {
        match self {
            PropertyValue::Array(values) => values,
            PropertyValue::Single(value) => std::slice::from_ref(value),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Single(value)
    }
}

impl From<Vec<Value>> for PropertyValue {
    fn from(values: Vec<Value>) -> Self {
        PropertyValue::Array(values)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Single(value.into())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Single(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Single(value.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Single(value.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Single(value.into())
    }
}

/// Property name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentConfiguration(BTreeMap<String, PropertyValue>);

impl ComponentConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// True when the property is missing, null, or an empty array
    pub fn is_unset(&self, name: &str) -> bool {
        match self.0.get(name) {
            None | Some(PropertyValue::Single(Value::Null)) => true,
            Some(PropertyValue::Array(values)) => values.is_empty(),
            Some(PropertyValue::Single(_)) => false,
        }
    }
}

/// Rows of a division: 1-based first row and an optional row limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub first_row: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,
}

impl RowRange {
    pub fn new(first_row: u64, max_rows: Option<u64>) -> Self {
        Self {
            first_row: first_row.max(1),
            max_rows,
        }
    }

    /// Range of division `index` out of `count` over `expected_rows` rows
    ///
    /// Divisions get `(expected_rows + 1) / count` rows each; the last one is
    /// left open-ended so rows added after counting are still read.
    pub fn for_division(index: usize, count: usize, expected_rows: u64) -> Self {
        let count = count.max(1) as u64;
        let index = index as u64;
        let rows_per_division = ((expected_rows + 1) / count).max(1);
        let first_row = index * rows_per_division + 1;
        let max_rows = if index + 1 == count {
            None
        } else {
            Some(rows_per_division)
        };
        Self::new(first_row, max_rows)
    }

    pub fn contains(&self, row_number: u64) -> bool {
        row_number >= self.first_row
            && self.max_rows.is_none_or(|max| row_number < self.first_row + max)
    }
}

/// A filter outcome a component depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequirement {
    /// Key of the filter
    pub component: String,
    pub outcome: String,
}

/// Consumers of one output data stream of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDataStreamJob {
    pub name: String,
    pub job: AnalysisJob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentJob {
    pub descriptor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: ComponentConfiguration,
    /// Renames the transformer's output columns; empty keeps its own names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<ComponentRequirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_data_streams: Vec<OutputDataStreamJob>,
}

impl ComponentJob {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            key: None,
            name: None,
            properties: ComponentConfiguration::new(),
            output_columns: Vec::new(),
            requirement: None,
            output_data_streams: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.set(name, value);
        self
    }

    pub fn columns_property<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = columns.into_iter().map(|c| Value::String(c.into())).collect();
        self.properties.set(name, PropertyValue::Array(values));
        self
    }

    pub fn output_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires(mut self, component: impl Into<String>, outcome: impl Into<String>) -> Self {
        self.requirement = Some(ComponentRequirement {
            component: component.into(),
            outcome: outcome.into(),
        });
        self
    }

    pub fn output_data_stream(mut self, name: impl Into<String>, job: AnalysisJob) -> Self {
        self.output_data_streams.push(OutputDataStreamJob {
            name: name.into(),
            job,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub source_columns: Vec<String>,
    #[serde(default)]
    pub components: Vec<ComponentJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_range: Option<RowRange>,
}

impl AnalysisJob {
    pub fn new<I, S>(source_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            source_columns: source_columns.into_iter().map(Into::into).collect(),
            components: Vec::new(),
            row_range: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn component(mut self, component: ComponentJob) -> Self {
        self.components.push(component);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The same job restricted to a row range
    pub fn for_division(&self, range: Option<RowRange>) -> AnalysisJob {
        AnalysisJob {
            row_range: range,
            ..self.clone()
        }
    }

    /// Key of the component at `index`, `prefix` being the key path of the
    /// enclosing output data stream ("" at the top level)
    pub fn component_key(&self, prefix: &str, index: usize) -> String {
        match self.components.get(index).and_then(|c| c.key.as_deref()) {
            Some(key) => format!("{}{}", prefix, key),
            None => format!("{}{}", prefix, index),
        }
    }

    /// Keys of every component, nested output data stream jobs included
    pub fn all_component_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.collect_keys("", &mut keys);
        keys
    }

    fn collect_keys(&self, prefix: &str, keys: &mut Vec<String>) {
        for (index, component) in self.components.iter().enumerate() {
            let key = self.component_key(prefix, index);
            keys.push(key.clone());
            for stream in &component.output_data_streams {
                stream.job.collect_keys(&stream_prefix(&key, &stream.name), keys);
            }
        }
    }

    /// Keys and descriptor names of components that cannot run distributed
    pub fn non_distributable_components(
        &self,
        registry: &DescriptorRegistry,
    ) -> Result<Vec<(String, String)>> {
        let mut found = Vec::new();
        self.collect_non_distributable("", registry, &mut found)?;
        Ok(found)
    }

    fn collect_non_distributable(
        &self,
        prefix: &str,
        registry: &DescriptorRegistry,
        found: &mut Vec<(String, String)>,
    ) -> Result<()> {
        for (index, component) in self.components.iter().enumerate() {
            let key = self.component_key(prefix, index);
            let descriptor = registry.get(&component.descriptor)?;
            if !descriptor.is_distributable() {
                found.push((key.clone(), component.descriptor.clone()));
            }
            for stream in &component.output_data_streams {
                stream.job.collect_non_distributable(
                    &stream_prefix(&key, &stream.name),
                    registry,
                    found,
                )?;
            }
        }
        Ok(())
    }

    /// Check the job graph against the registry
    ///
    /// Rejects unknown descriptors, missing required or unknown properties,
    /// requirements that do not name a filter of the same job, and duplicate
    /// keys.
    pub fn validate(&self, registry: &DescriptorRegistry) -> Result<()> {
        let mut seen = HashSet::new();
        self.validate_level("", registry, &mut seen)
    }

    fn validate_level(
        &self,
        prefix: &str,
        registry: &DescriptorRegistry,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let mut kinds = BTreeMap::new();
        for (index, component) in self.components.iter().enumerate() {
            let key = self.component_key(prefix, index);
            let descriptor = registry.get(&component.descriptor)?;
            if !seen.insert(key.clone()) {
                return Err(EngineError::configuration(key, "duplicate component key"));
            }
            kinds.insert(key.clone(), descriptor.kind());

            for property in descriptor.configured_properties() {
                if property.is_required() && component.properties.is_unset(property.name()) {
                    return Err(EngineError::configuration(
                        key,
                        format!("required property '{}' is not set", property.name()),
                    ));
                }
            }
            for (name, _) in component.properties.iter() {
                if descriptor.configured_property(name).is_none() {
                    return Err(EngineError::configuration(
                        key,
                        format!("unknown property '{}'", name),
                    ));
                }
            }
            if !component.output_data_streams.is_empty()
                && descriptor.kind() == ComponentKind::Filter
            {
                return Err(EngineError::configuration(
                    key,
                    "filters cannot publish output data streams",
                ));
            }
        }

        for (index, component) in self.components.iter().enumerate() {
            let key = self.component_key(prefix, index);
            if let Some(requirement) = &component.requirement {
                let target = format!("{}{}", prefix, requirement.component);
                match kinds.get(&target) {
                    Some(ComponentKind::Filter) => {},
                    Some(kind) => {
                        return Err(EngineError::configuration(
                            key,
                            format!("requirement target '{}' is a {}, not a filter", target, kind),
                        ))
                    },
                    None => {
                        return Err(EngineError::configuration(
                            key,
                            format!("requirement target '{}' does not exist", target),
                        ))
                    },
                }
            }
            for stream in &component.output_data_streams {
                stream.job.validate_level(&stream_prefix(&key, &stream.name), registry, seen)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn stream_prefix(key: &str, stream: &str) -> String {
    format!("{}/{}/", key, stream)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn registry() -> DescriptorRegistry {
        DescriptorRegistry::with_builtin()
    }

    #[test]
    fn test_row_range_for_division() {
        // 10 rows over 3 divisions: 3 rows each, last one open-ended
        assert_eq!(RowRange::for_division(0, 3, 10), RowRange::new(1, Some(3)));
        assert_eq!(RowRange::for_division(1, 3, 10), RowRange::new(4, Some(3)));
        assert_eq!(RowRange::for_division(2, 3, 10), RowRange::new(7, None));

        let last = RowRange::for_division(2, 3, 10);
        assert!(last.contains(10));
        assert!(!RowRange::for_division(0, 3, 10).contains(4));
    }

    #[test]
    fn test_row_ranges_cover_every_row_once() {
        for expected in 1..40_u64 {
            for count in 1..=expected.min(6) as usize {
                for row in 1..=expected {
                    let hits = (0..count)
                        .filter(|i| RowRange::for_division(*i, count, expected).contains(row))
                        .count();
                    assert_eq!(hits, 1, "row {} of {} over {} divisions", row, expected, count);
                }
            }
        }
    }

    #[test]
    fn test_component_keys_are_positional_or_explicit() {
        let tokens = AnalysisJob::new(["token"]).component(ComponentJob::new("row-count"));
        let job = AnalysisJob::new(["text"])
            .component(ComponentJob::new("row-count").key("rows"))
            .component(
                ComponentJob::new("token-stream")
                    .property("column", "text")
                    .output_data_stream("tokens", tokens),
            )
            .component(ComponentJob::new("row-count"));

        assert_eq!(job.all_component_keys(), vec!["rows", "1", "1/tokens/0", "2"]);
    }

    #[test]
    fn test_json_round_trip_preserves_arrays_and_singles() {
        let job = AnalysisJob::new(["first", "last"])
            .named("people")
            .component(
                ComponentJob::new("concat")
                    .columns_property("columns", ["first", "last"])
                    .property("separator", " "),
            );
        let json = job.to_json().unwrap();
        let back = AnalysisJob::from_json(&json).unwrap();
        assert_eq!(back, job);
        assert!(matches!(
            back.components[0].properties.get("columns"),
            Some(PropertyValue::Array(values)) if values.len() == 2
        ));
    }

    #[test]
    fn test_validate_missing_required_property() {
        let job = AnalysisJob::new(["a"]).component(ComponentJob::new("value-distribution"));
        let err = job.validate(&registry()).unwrap_err();
        assert!(err.to_string().contains("required property 'column'"));
    }

    #[test]
    fn test_validate_unknown_descriptor() {
        let job = AnalysisJob::new(["a"]).component(ComponentJob::new("levenshtein"));
        assert!(matches!(job.validate(&registry()), Err(EngineError::UnknownDescriptor(_))));
    }

    #[test]
    fn test_validate_requirement_must_target_filter() {
        let job = AnalysisJob::new(["a"])
            .component(ComponentJob::new("row-count").key("rows"))
            .component(ComponentJob::new("row-count").requires("rows", "VALID"));
        let err = job.validate(&registry()).unwrap_err();
        assert!(err.to_string().contains("not a filter"));

        let job = AnalysisJob::new(["a"])
            .component(ComponentJob::new("row-count").requires("missing", "VALID"));
        assert!(job.validate(&registry()).is_err());
    }

    #[test]
    fn test_validate_duplicate_keys() {
        let job = AnalysisJob::new(["a"])
            .component(ComponentJob::new("row-count").key("x"))
            .component(ComponentJob::new("row-count").key("x"));
        let err = job.validate(&registry()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_non_distributable_components() {
        let job = AnalysisJob::new(["a"])
            .component(ComponentJob::new("row-count"))
            .component(ComponentJob::new("first-value").property("column", "a"));
        let found = job.non_distributable_components(&registry()).unwrap();
        assert_eq!(found, vec![("1".to_string(), "first-value".to_string())]);
    }
}
