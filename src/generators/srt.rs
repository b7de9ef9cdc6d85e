//! Shader resource tables for PlayStation targets
//!
//! Orbis and Prospero bind resources through a table passed to the entry
//! point instead of registers. Every `RES(...)` is collected into a struct
//! per update frequency; the `_Get_<name>` aliases then redirect each
//! symbolic name to its member inside the table.
//!
//! Author: Moroya Sakamoto

use super::get_alias;
use crate::reader::ResourceDecl;
use crate::types::UpdateFrequency;
use std::collections::BTreeMap;

/// Entry parameter carrying the table
pub const SRT_PARAMETER: &str = "SrtData srt : S_SRT_DATA";

#[derive(Debug, Clone)]
struct SrtEntry {
    ty: String,
    name: String,
    base: String,
}

/// Resources grouped per update frequency
#[derive(Debug, Clone, Default)]
pub struct SrtTable {
    groups: BTreeMap<UpdateFrequency, Vec<SrtEntry>>,
}

impl SrtTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource to its frequency group
    pub fn add(&mut self, resource: &ResourceDecl) {
        self.groups.entry(resource.frequency).or_default().push(SrtEntry {
            ty: resource.ty.clone(),
            name: resource.name.clone(),
            base: resource.base_name().to_string(),
        });
    }

    /// No resource was declared
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Struct declarations, table struct and aliases
    pub fn declarations(&self) -> Vec<String> {
        let mut out = vec!["// shader resource table".to_string()];
        for (freq, entries) in &self.groups {
            out.push(format!("struct {}", struct_name(*freq)));
            out.push("{".to_string());
            out.extend(entries.iter().map(|e| format!("\t{} {};", e.ty, e.name)));
            out.push("};".to_string());
        }
        out.push("struct SrtData".to_string());
        out.push("{".to_string());
        for freq in self.groups.keys() {
            out.push(format!("\t{}* {};", struct_name(*freq), member_name(*freq)));
        }
        out.push("};".to_string());
        for (freq, entries) in &self.groups {
            for e in entries {
                out.push(format!("#define {} srt.{}->{}", get_alias(&e.base), member_name(*freq), e.base));
            }
        }
        out
    }
}

fn struct_name(freq: UpdateFrequency) -> String {
    format!("SRT_{}", freq.tag())
}

fn member_name(freq: UpdateFrequency) -> String {
    format!("p_{}", freq.tag())
}
