//! `tally components` command implementation

use crate::error::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use tally_engine::descriptor::ConfiguredPropertyDescriptor;
use tally_engine::{ComponentDescriptor, DescriptorRegistry};

#[derive(Debug, Serialize)]
struct ComponentInfo {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    distributable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    properties: Vec<PropertyInfo>,
}

#[derive(Debug, Serialize)]
struct PropertyInfo {
    name: String,
    #[serde(rename = "type")]
    property_type: String,
    required: bool,
    array: bool,
}

impl From<&ComponentDescriptor> for ComponentInfo {
    fn from(descriptor: &ComponentDescriptor) -> Self {
        Self {
            name: descriptor.name().to_string(),
            kind: descriptor.kind().to_string(),
            result: descriptor.result_kind().map(|k| k.to_string()),
            distributable: descriptor.is_distributable(),
            description: descriptor.description().map(str::to_string),
            properties: descriptor.configured_properties().iter().map(PropertyInfo::from).collect(),
        }
    }
}

impl From<&ConfiguredPropertyDescriptor> for PropertyInfo {
    fn from(property: &ConfiguredPropertyDescriptor) -> Self {
        Self {
            name: property.name().to_string(),
            property_type: property.property_type().to_string(),
            required: property.is_required(),
            array: property.is_array(),
        }
    }
}

impl PropertyInfo {
    /// `columns*: input column[]`, `*` marking required properties
    fn summary(&self) -> String {
        format!(
            "{}{}: {}{}",
            self.name,
            if self.required { "*" } else { "" },
            self.property_type,
            if self.array { "[]" } else { "" }
        )
    }
}

fn component_infos(registry: &DescriptorRegistry) -> Vec<ComponentInfo> {
    let mut infos: Vec<ComponentInfo> = registry.iter().map(|d| ComponentInfo::from(d.as_ref())).collect();
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    infos
}

pub fn run(json: bool) -> Result<()> {
    let infos = component_infos(&DescriptorRegistry::with_builtin());

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Name", "Kind", "Result", "Distributable", "Properties"]);
    for info in &infos {
        let properties: Vec<String> = info.properties.iter().map(PropertyInfo::summary).collect();
        table.add_row(vec![
            info.name.clone(),
            info.kind.clone(),
            info.result.clone().unwrap_or_default(),
            if info.distributable { "yes" } else { "no" }.to_string(),
            properties.join("\n"),
        ]);
    }
    println!("{table}");
    Ok(())
}
