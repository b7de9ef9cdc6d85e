//! Core vocabulary of the FSL transpiler
//!
//! Target platforms, the language family each one is generated through,
//! shader stages and update frequencies (descriptor sets).
//!
//! Author: Moroya Sakamoto

mod binary;
mod features;

pub use binary::{lines_from_text, Derivative, ExtraDependency, ShaderBinary, SourceLine};
pub use features::{Feature, FeatureSet, WaveOpsFlags};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Platforms
// ============================================================================

/// Target platform of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    /// Direct3D 11 (fxc, shader model 5.0)
    Direct3D11,
    /// Direct3D 12 (dxc)
    Direct3D12,
    /// Xbox One
    Xbox,
    /// Xbox Series
    Scarlett,
    /// PlayStation 4
    Orbis,
    /// PlayStation 5
    Prospero,
    /// Desktop Vulkan
    Vulkan,
    /// Android Vulkan
    AndroidVulkan,
    /// Nintendo Switch (Vulkan GLSL)
    Switch,
    /// Meta Quest (Vulkan GLSL, multiview)
    Quest,
    /// macOS Metal
    Macos,
    /// iOS Metal
    Ios,
    /// OpenGL ES 2.0 class devices
    Gles,
}

/// Generator family a platform is emitted through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// HLSL and its console dialects
    Hlsl,
    /// Vulkan GLSL (`#version 450`)
    Vulkan,
    /// GLSL ES 1.00
    Gles,
    /// Metal Shading Language
    Metal,
}

impl Platform {
    /// Every platform, in CLI order
    pub const ALL: [Platform; 13] = [
        Platform::Direct3D11,
        Platform::Direct3D12,
        Platform::Xbox,
        Platform::Scarlett,
        Platform::Orbis,
        Platform::Prospero,
        Platform::Vulkan,
        Platform::AndroidVulkan,
        Platform::Switch,
        Platform::Quest,
        Platform::Macos,
        Platform::Ios,
        Platform::Gles,
    ];

    /// Upper-case name used for directories, defines and the CLI
    pub fn name(self) -> &'static str {
        match self {
            Platform::Direct3D11 => "DIRECT3D11",
            Platform::Direct3D12 => "DIRECT3D12",
            Platform::Xbox => "XBOX",
            Platform::Scarlett => "SCARLETT",
            Platform::Orbis => "ORBIS",
            Platform::Prospero => "PROSPERO",
            Platform::Vulkan => "VULKAN",
            Platform::AndroidVulkan => "ANDROID_VULKAN",
            Platform::Switch => "SWITCH",
            Platform::Quest => "QUEST",
            Platform::Macos => "MACOS",
            Platform::Ios => "IOS",
            Platform::Gles => "GLES",
        }
    }

    /// Generator family
    pub fn language(self) -> Language {
        match self {
            Platform::Direct3D11
            | Platform::Direct3D12
            | Platform::Xbox
            | Platform::Scarlett
            | Platform::Orbis
            | Platform::Prospero => Language::Hlsl,
            Platform::Vulkan | Platform::AndroidVulkan | Platform::Switch | Platform::Quest => {
                Language::Vulkan
            }
            Platform::Macos | Platform::Ios => Language::Metal,
            Platform::Gles => Language::Gles,
        }
    }

    /// PlayStation targets use shader resource tables instead of registers
    #[inline(always)]
    pub fn is_console_srt(self) -> bool {
        matches!(self, Platform::Orbis | Platform::Prospero)
    }

    /// Direct3D 11 has no register spaces
    #[inline(always)]
    pub fn has_register_spaces(self) -> bool {
        self != Platform::Direct3D11
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.name() == upper)
            .ok_or_else(|| {
                let names: Vec<&str> = Platform::ALL.iter().map(|p| p.name()).collect();
                format!("Unknown platform: '{}'. Expected one of {}", s, names.join(", "))
            })
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Vertex shader
    Vert,
    /// Fragment (pixel) shader
    Frag,
    /// Compute shader
    Comp,
    /// Geometry shader
    Geom,
    /// Tessellation control (hull) shader
    Tesc,
    /// Tessellation evaluation (domain) shader
    Tese,
}

impl Stage {
    /// Keyword opening a stage block in a shader list (`#vert`)
    pub fn keyword(self) -> &'static str {
        match self {
            Stage::Vert => "vert",
            Stage::Frag => "frag",
            Stage::Comp => "comp",
            Stage::Geom => "geom",
            Stage::Tesc => "tesc",
            Stage::Tese => "tese",
        }
    }

    /// Parse a stage keyword without the leading `#`
    pub fn from_keyword(keyword: &str) -> Option<Stage> {
        match keyword {
            "vert" => Some(Stage::Vert),
            "frag" => Some(Stage::Frag),
            "comp" => Some(Stage::Comp),
            "geom" => Some(Stage::Geom),
            "tesc" => Some(Stage::Tesc),
            "tese" => Some(Stage::Tese),
            _ => None,
        }
    }

    /// Upper-case name used in `STAGE_*` defines
    pub fn define_name(self) -> &'static str {
        match self {
            Stage::Vert => "VERT",
            Stage::Frag => "FRAG",
            Stage::Comp => "COMP",
            Stage::Geom => "GEOM",
            Stage::Tesc => "TESC",
            Stage::Tese => "TESE",
        }
    }

    /// Entry marker token recognized in FSL source
    pub fn entry_marker(self) -> Option<&'static str> {
        match self {
            Stage::Vert => Some("VS_MAIN"),
            Stage::Frag => Some("PS_MAIN"),
            Stage::Comp => Some("CS_MAIN"),
            _ => None,
        }
    }

    /// Stage owning an entry marker
    pub fn from_entry_marker(marker: &str) -> Option<Stage> {
        match marker {
            "VS_MAIN" => Some(Stage::Vert),
            "PS_MAIN" => Some(Stage::Frag),
            "CS_MAIN" => Some(Stage::Comp),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Entry markers in recognition order
pub const ENTRY_MARKERS: [&str; 3] = ["VS_MAIN", "PS_MAIN", "CS_MAIN"];

// ============================================================================
// Update frequencies
// ============================================================================

/// Update frequency of a resource (descriptor set / register space)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateFrequency {
    /// Static resources
    None,
    /// Updated once per frame
    PerFrame,
    /// Updated per batch
    PerBatch,
    /// Updated per draw
    PerDraw,
    /// Root constants / user slot
    User,
    /// Additional slot `space4`
    Space4,
    /// Additional slot `space5`
    Space5,
    /// Additional slot `space6`
    Space6,
}

impl UpdateFrequency {
    /// All frequencies in set order
    pub const ALL: [UpdateFrequency; 8] = [
        UpdateFrequency::None,
        UpdateFrequency::PerFrame,
        UpdateFrequency::PerBatch,
        UpdateFrequency::PerDraw,
        UpdateFrequency::User,
        UpdateFrequency::Space4,
        UpdateFrequency::Space5,
        UpdateFrequency::Space6,
    ];

    /// Parse the tag written in FSL source
    pub fn parse(tag: &str) -> Option<UpdateFrequency> {
        let freq = match tag.trim() {
            "UPDATE_FREQ_NONE" => UpdateFrequency::None,
            "UPDATE_FREQ_PER_FRAME" => UpdateFrequency::PerFrame,
            "UPDATE_FREQ_PER_BATCH" => UpdateFrequency::PerBatch,
            "UPDATE_FREQ_PER_DRAW" => UpdateFrequency::PerDraw,
            "UPDATE_FREQ_USER" => UpdateFrequency::User,
            "space4" => UpdateFrequency::Space4,
            "space5" => UpdateFrequency::Space5,
            "space6" => UpdateFrequency::Space6,
            _ => return None,
        };
        Some(freq)
    }

    /// Tag as written in FSL source
    pub fn tag(self) -> &'static str {
        match self {
            UpdateFrequency::None => "UPDATE_FREQ_NONE",
            UpdateFrequency::PerFrame => "UPDATE_FREQ_PER_FRAME",
            UpdateFrequency::PerBatch => "UPDATE_FREQ_PER_BATCH",
            UpdateFrequency::PerDraw => "UPDATE_FREQ_PER_DRAW",
            UpdateFrequency::User => "UPDATE_FREQ_USER",
            UpdateFrequency::Space4 => "space4",
            UpdateFrequency::Space5 => "space5",
            UpdateFrequency::Space6 => "space6",
        }
    }

    /// Descriptor set / register space index
    #[inline(always)]
    pub fn index(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
