//! Target generators
//!
//! One generator per language family, all driven by the same
//! [`Scanner`](crate::reader::Scanner) state machine over the raw lines of a
//! stage block and consulting the [`Shader`] lookup tables:
//!
//! | Family | Platforms | Module |
//! |--------|-----------|--------|
//! | HLSL   | Direct3D11/12, Xbox, Scarlett, Orbis, Prospero | [`hlsl`] |
//! | Vulkan GLSL | Vulkan, Android, Switch, Quest | [`vulkan`] |
//! | GLSL ES 1.00 | GLES | [`gles`] |
//! | Metal  | macOS, iOS | [`metal`] |
//!
//! # Usage
//!
//! ```rust,ignore
//! use forge_fsl::generators::{generate_source, GenerateConfig};
//! use forge_fsl::types::Platform;
//!
//! let generated = generate_source(Platform::Vulkan, &GenerateConfig::default(), &binary)?;
//! println!("{}", generated.source);
//! ```
//!
//! Author: Moroya Sakamoto

pub mod binding;
pub mod fn_table;
pub mod gles;
pub mod hlsl;
pub mod metal;
pub mod passthrough;
pub mod srt;
pub mod vulkan;

use crate::error::FslError;
use crate::reader::macros::{find_token, matching_paren};
use crate::reader::scanner::entry_marker;
use crate::reader::{read_shader, strip_wave_ops, Shader};
use crate::types::{
    Derivative, ExtraDependency, Language, Platform, ShaderBinary, SourceLine, Stage, WaveOpsFlags,
};
use log::debug;
use std::path::Path;

/// Helper header embedded into HLSL output
pub const D3D_HEADER: &str = include_str!("../../includes/d3d.h");
/// Helper header embedded into Vulkan GLSL output
pub const VULKAN_HEADER: &str = include_str!("../../includes/vulkan.h");
/// Helper header embedded into GLSL ES output
pub const GLES_HEADER: &str = include_str!("../../includes/gles.h");
/// Helper header embedded into Metal output
pub const METAL_HEADER: &str = include_str!("../../includes/metal.h");

/// Per-run generation settings
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    /// Debug build: emit `#line` directives after rewritten constructs
    pub debug: bool,
    /// Root signature source embedded into D3D12-class output
    pub root_signature: Option<String>,
}

/// Auxiliary stage synthesized during generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryShader {
    /// Stage of the synthesized shader
    pub stage: Stage,
    /// Output filename
    pub filename: String,
    /// Generated text
    pub source: String,
}

/// Result of generating one binary for one platform
#[derive(Debug, Clone)]
pub struct GeneratedShader {
    /// Generated native source
    pub source: String,
    /// Derivatives to compile separately
    pub derivatives: Vec<Derivative>,
    /// Synthesized extra stages
    pub auxiliary: Vec<AuxiliaryShader>,
    /// Compute thread-group size
    pub num_threads: Option<[u32; 3]>,
    /// Wave operations used
    pub wave_ops: WaveOpsFlags,
}

/// Generate native source for `binary` without touching the filesystem
pub fn generate_source(
    platform: Platform,
    config: &GenerateConfig,
    binary: &ShaderBinary,
) -> Result<GeneratedShader, FslError> {
    let shader = read_shader(binary)?;
    match platform.language() {
        Language::Hlsl => hlsl::generate(platform, config, binary, &shader),
        Language::Vulkan => vulkan::generate(platform, config, binary, &shader),
        Language::Gles => gles::generate(platform, config, binary, &shader),
        Language::Metal => metal::generate(platform, config, binary, &shader),
    }
}

/// Generate `binary` for `platform` into `dst`
///
/// Auxiliary stages are written next to `dst` and returned as extra
/// dependencies; derivatives, thread-group size and wave operations are
/// recorded on the binary.
pub fn generate(
    platform: Platform,
    config: &GenerateConfig,
    binary: &mut ShaderBinary,
    dst: &Path,
) -> Result<Vec<ExtraDependency>, FslError> {
    let generated = generate_source(platform, config, binary)?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dst, &generated.source)?;
    debug!("{}: wrote {}", platform, dst.display());

    let mut extra = Vec::with_capacity(generated.auxiliary.len());
    for aux in &generated.auxiliary {
        let path = dst.with_file_name(&aux.filename);
        std::fs::write(&path, &aux.source)?;
        debug!("{}: wrote auxiliary {} stage {}", platform, aux.stage, path.display());
        extra.push(ExtraDependency { stage: aux.stage, path, filename: aux.filename.clone() });
    }

    binary.record_generation(platform, generated.derivatives, generated.num_threads, generated.wave_ops);
    Ok(extra)
}

// ============================================================================
// Shared emission helpers
// ============================================================================

/// Line sink with optional `#line` re-synchronization
pub(crate) struct Emitter {
    lines: Vec<String>,
    debug: bool,
    line_files: bool,
}

impl Emitter {
    /// `line_files`: the target accepts `#line N "file"`
    pub(crate) fn new(debug: bool, line_files: bool) -> Self {
        Self { lines: Vec::with_capacity(256), debug, line_files }
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub(crate) fn extend_text(&mut self, text: &str) {
        self.lines.extend(text.lines().map(str::to_string));
    }

    /// Point diagnostics back at the line after `source`
    pub(crate) fn resync(&mut self, source: &SourceLine) {
        if !self.debug {
            return;
        }
        if self.line_files {
            self.lines.push(format!("#line {} \"{}\"", source.line + 1, source.file.display()));
        } else {
            self.lines.push(format!("#line {}", source.line + 1));
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn insert_lines(&mut self, at: usize, lines: Vec<String>) {
        let tail = self.lines.split_off(at.min(self.lines.len()));
        self.lines.extend(lines);
        self.lines.extend(tail);
    }

    pub(crate) fn lines_mut(&mut self) -> &mut Vec<String> {
        &mut self.lines
    }

    pub(crate) fn finish(self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Header comment naming the source of a generated file
pub(crate) fn header_comment(binary: &ShaderBinary) -> Vec<String> {
    let rule = format!("//{}", "-".repeat(78));
    vec![
        rule.clone(),
        "// Generated by the Forge Shading Language transpiler, do not edit".to_string(),
        format!("// {} ({})", binary.filename, binary.source_list.display()),
        rule,
        String::new(),
    ]
}

/// `#define` lines for features and block defines active on `platform`
pub(crate) fn common_defines(binary: &ShaderBinary, shader: &Shader, platform: Platform) -> Vec<String> {
    let mut lines = vec![format!("#define {}", platform.name()), format!("#define STAGE_{}", binary.stage.define_name())];
    lines.extend(binary.features.masked_for(platform).iter().map(|f| format!("#define {}", f.name())));
    lines.extend(binary.defines.iter().map(|(name, value)| format!("#define {} {}", name, value)));
    if !shader.wave_ops.is_empty() {
        lines.push(format!("#define WAVE_OPS_FLAGS 0x{:x}", shader.wave_ops.bits()));
    }
    lines
}

/// Replace the first invocation of `name(...)` on a line with `replacement`
pub(crate) fn replace_invocation(text: &str, name: &str, replacement: &str) -> String {
    let Some(start) = find_token(text, name, 0) else {
        return text.to_string();
    };
    let end = text[start..]
        .find('(')
        .and_then(|open| matching_paren(text, start + open))
        .map_or(start + name.len(), |close| close + 1);
    format!("{}{}{}", &text[..start], replacement, &text[end..])
}

/// Replace the `RETURN(...)` invocation on a line with `replacement`
#[inline(always)]
pub(crate) fn replace_return(text: &str, replacement: &str) -> String {
    replace_invocation(text, "RETURN", replacement)
}

/// Text following the entry argument list (`{`, trailing comment)
pub(crate) fn entry_tail(text: &str) -> String {
    let text = strip_wave_ops(text);
    entry_marker(&text)
        .and_then(|m| find_token(&text, m, 0))
        .and_then(|at| text[at..].find('(').map(|open| at + open))
        .and_then(|open| matching_paren(&text, open))
        .map(|close| text[close + 1..].to_string())
        .unwrap_or_default()
}

/// Rewrite `Get(name)[index]` through `rewrite(index)`
///
/// Used by targets where an indexed resource is not a plain array.
pub(crate) fn rewrite_indexed_get(text: &str, name: &str, rewrite: impl Fn(&str) -> String) -> String {
    let pattern = format!("Get({})", name);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(&pattern) {
        let after = &rest[i + pattern.len()..];
        let boundary = rest[..i].chars().next_back().map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
        let index = after
            .starts_with('[')
            .then(|| matching_bracket(after))
            .flatten();
        match (boundary, index) {
            (true, Some(close)) => {
                out.push_str(&rest[..i]);
                out.push_str(&rewrite(after[1..close].trim()));
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str(&rest[..i + pattern.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub(crate) fn matching_bracket(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `Get(name)` to the name every target defines as `_Get_name`
#[inline(always)]
pub(crate) fn get_alias(name: &str) -> String {
    format!("_Get_{}", name)
}
