//! Shader list parsing: `#<stage> ... #end` blocks
//!
//! A shader list declares every compilation unit of a source file:
//!
//! ```text
//! #pragma FT_MULTIVIEW
//! #vert FT_INVARIANT SKINNED=1 skinned.vert
//! #include "skinned.vert.fsl"
//! #end
//! ```
//!
//! Pragmas update a feature snapshot that each block copies when it opens.
//! Includes are expanded recursively so every block carries its full body
//! and the list of files it depends on.
//!
//! Author: Moroya Sakamoto

use crate::error::{FslError, SourceLocation};
use crate::types::{Feature, FeatureSet, ShaderBinary, SourceLine, Stage};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parse a shader list file
pub fn parse_shader_list(path: &Path, include_dirs: &[PathBuf]) -> Result<Vec<ShaderBinary>, FslError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        FslError::declaration(SourceLocation::file(path), format!("Cannot read shader list: {}", e))
    })?;
    parse_shader_list_text(&text, path, include_dirs)
}

/// Parse shader list text attributed to `path`
pub fn parse_shader_list_text(
    text: &str,
    path: &Path,
    include_dirs: &[PathBuf],
) -> Result<Vec<ShaderBinary>, FslError> {
    let list_file: Arc<Path> = Arc::from(path);
    let includer = Includer::new(include_dirs);
    let mut features = FeatureSet::new();
    let mut binaries: Vec<ShaderBinary> = Vec::new();
    let mut seen: HashMap<u32, usize> = HashMap::new();
    let mut current: Option<ShaderBinary> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let location = SourceLocation::new(path, line_no);
        let trimmed = raw.trim();

        if current.is_none() {
            if let Some(pragma) = trimmed.strip_prefix("#pragma") {
                features = apply_pragma(&features, pragma.trim(), &location)?;
                continue;
            }
        }

        if let Some((stage, rest)) = stage_keyword(trimmed) {
            if let Some(open) = &current {
                return Err(FslError::declaration(
                    location,
                    format!("Stage block opened at line {} is missing #end", open.block_line),
                ));
            }
            current = Some(open_block(stage, rest, path, line_no, &features)?);
            continue;
        }

        if trimmed == "#end" {
            let Some(binary) = current.take() else {
                return Err(FslError::declaration(location, "#end without an open stage block"));
            };
            let signature = binary.signature();
            if let Some(&first) = seen.get(&signature) {
                warn!(
                    "{}: WARN: duplicate shader '{}' has the same stage, features and defines as the block at line {}, keeping the first",
                    binary.location(),
                    binary.filename,
                    binaries[first].block_line
                );
                continue;
            }
            debug!("{}: {} block '{}' ({} lines)", binary.location(), binary.stage, binary.filename, binary.lines.len());
            seen.insert(signature, binaries.len());
            binaries.push(binary);
            continue;
        }

        if let Some(binary) = current.as_mut() {
            if let Some(target) = include_target(trimmed) {
                let mut stack = vec![canonical(path)];
                let resolved = includer.resolve(target, path, &location)?;
                includer.expand(&resolved, &mut stack, &mut binary.lines, &mut binary.dependencies, &location)?;
            } else {
                binary.lines.push(SourceLine::new(raw, Arc::clone(&list_file), line_no));
            }
        }
    }

    if let Some(open) = current {
        return Err(FslError::declaration(
            open.location(),
            format!("Missing #end for {} block '{}'", open.stage, open.filename),
        ));
    }
    Ok(binaries)
}

fn apply_pragma(features: &FeatureSet, pragma: &str, location: &SourceLocation) -> Result<FeatureSet, FslError> {
    let (remove, name) = match pragma.strip_prefix('~') {
        Some(name) => (true, name.trim()),
        None => (false, pragma),
    };
    if !name.starts_with("FT_") {
        return Ok(features.clone());
    }
    let feature = Feature::parse(name)
        .ok_or_else(|| FslError::declaration(location.clone(), format!("Unknown feature '{}'", name)))?;
    Ok(if remove { features.without(feature) } else { features.with(feature) })
}

fn stage_keyword(line: &str) -> Option<(Stage, &str)> {
    let rest = line.strip_prefix('#')?;
    let keyword_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let stage = Stage::from_keyword(&rest[..keyword_len])?;
    Some((stage, rest[keyword_len..].trim()))
}

fn open_block(
    stage: Stage,
    tokens: &str,
    path: &Path,
    line_no: usize,
    features: &FeatureSet,
) -> Result<ShaderBinary, FslError> {
    let location = SourceLocation::new(path, line_no);
    let mut inline = FeatureSet::new();
    let mut defines = Vec::new();
    let mut filename = None;
    for token in tokens.split_whitespace() {
        if token.starts_with("FT_") {
            let feature = Feature::parse(token)
                .ok_or_else(|| FslError::declaration(location.clone(), format!("Unknown feature '{}'", token)))?;
            inline = inline.with(feature);
        } else if let Some((name, value)) = token.split_once('=') {
            defines.push((name.to_string(), value.to_string()));
        } else if filename.is_none() {
            filename = Some(token.to_string());
        } else {
            return Err(FslError::declaration(location, format!("Unexpected token '{}' on stage line", token)));
        }
    }
    let Some(filename) = filename else {
        return Err(FslError::declaration(location, format!("#{} block is missing an output filename", stage)));
    };
    let mut binary = ShaderBinary::new(stage, filename, path).with_features(features.union(&inline));
    binary.block_line = line_no;
    binary.defines = defines;
    Ok(binary)
}

/// Target of an `#include "path"` / `#include <path>` line
fn include_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#include")?.trim();
    let rest = rest.strip_prefix('"').or_else(|| rest.strip_prefix('<'))?;
    let end = rest.find(['"', '>'])?;
    Some(&rest[..end])
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ============================================================================
// Include expansion
// ============================================================================

struct Includer<'a> {
    include_dirs: &'a [PathBuf],
}

impl<'a> Includer<'a> {
    fn new(include_dirs: &'a [PathBuf]) -> Self {
        Self { include_dirs }
    }

    /// Resolve relative to the including file, then the include directories
    fn resolve(&self, target: &str, from: &Path, location: &SourceLocation) -> Result<PathBuf, FslError> {
        let base = from.parent().unwrap_or_else(|| Path::new(""));
        std::iter::once(base.join(target))
            .chain(self.include_dirs.iter().map(|dir| dir.join(target)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| FslError::declaration(location.clone(), format!("Cannot find include file '{}'", target)))
    }

    fn expand(
        &self,
        path: &Path,
        stack: &mut Vec<PathBuf>,
        out: &mut Vec<SourceLine>,
        dependencies: &mut std::collections::BTreeSet<PathBuf>,
        location: &SourceLocation,
    ) -> Result<(), FslError> {
        let key = canonical(path);
        if stack.contains(&key) {
            return Err(FslError::declaration(
                location.clone(),
                format!("Recursive include of '{}'", path.display()),
            ));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| FslError::declaration(location.clone(), format!("Cannot read '{}': {}", path.display(), e)))?;
        dependencies.insert(path.to_path_buf());
        stack.push(key);

        let file: Arc<Path> = Arc::from(path);
        for (index, raw) in text.lines().enumerate() {
            let line_location = SourceLocation::new(path, index + 1);
            match include_target(raw.trim()) {
                Some(target) => {
                    let resolved = self.resolve(target, path, &line_location)?;
                    self.expand(&resolved, stack, out, dependencies, &line_location)?;
                }
                None => out.push(SourceLine::new(raw, Arc::clone(&file), index + 1)),
            }
        }
        stack.pop();
        Ok(())
    }
}
