//! ShaderBinary: one compilation unit extracted from a shader list
//!
//! Author: Moroya Sakamoto

use super::{FeatureSet, Platform, Stage, WaveOpsFlags};
use crate::error::SourceLocation;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One line of FSL source with its origin after include expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Line text without the trailing newline
    pub text: String,
    /// File the line was read from
    pub file: Arc<Path>,
    /// 1-based line number in `file`
    pub line: usize,
}

impl SourceLine {
    /// Create a line
    pub fn new(text: impl Into<String>, file: Arc<Path>, line: usize) -> Self {
        Self { text: text.into(), file, line }
    }

    /// Diagnostic location of this line
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file.as_ref(), self.line)
    }
}

/// Build source lines from in-memory text (tests, benches, tools)
pub fn lines_from_text(text: &str, file: impl AsRef<Path>) -> Vec<SourceLine> {
    let file: Arc<Path> = Arc::from(file.as_ref());
    text.lines()
        .enumerate()
        .map(|(i, l)| SourceLine::new(l, Arc::clone(&file), i + 1))
        .collect()
}

/// One preprocessor variant of a shader, compiled to its own blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Derivative {
    /// `NAME=VALUE` definitions
    pub defines: Vec<String>,
}

impl Derivative {
    /// Derivative from a list of definitions
    pub fn new<I, S>(defines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { defines: defines.into_iter().map(Into::into).collect() }
    }
}

impl fmt::Display for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.defines.join(" "))
    }
}

/// Auxiliary stage synthesized by a generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraDependency {
    /// Stage of the synthesized shader
    pub stage: Stage,
    /// Path the generated text was written to
    pub path: PathBuf,
    /// Output filename of the synthesized shader
    pub filename: String,
}

/// One entry stage of a shader list, tagged with features and defines
#[derive(Debug, Clone)]
pub struct ShaderBinary {
    /// Entry stage
    pub stage: Stage,
    /// Output filename (`basic.vert`)
    pub filename: String,
    /// Shader list the block was declared in
    pub source_list: PathBuf,
    /// Line of the opening `#<stage>` keyword
    pub block_line: usize,
    /// Feature snapshot taken when the block was opened
    pub features: FeatureSet,
    /// Block-level `NAME=VALUE` defines
    pub defines: Vec<(String, String)>,
    /// Block body with includes expanded
    pub lines: Vec<SourceLine>,
    /// Every file the block depends on, the shader list included
    pub dependencies: BTreeSet<PathBuf>,
    /// Derivatives recorded per platform by generation
    pub derivatives: BTreeMap<Platform, Vec<Derivative>>,
    /// Compute thread-group size recorded by generation
    pub num_threads: Option<[u32; 3]>,
    /// Wave operations recorded by generation
    pub wave_ops: WaveOpsFlags,
}

impl ShaderBinary {
    /// New binary for an in-memory body
    pub fn new(stage: Stage, filename: impl Into<String>, source_list: impl Into<PathBuf>) -> Self {
        let source_list = source_list.into();
        let mut dependencies = BTreeSet::new();
        dependencies.insert(source_list.clone());
        Self {
            stage,
            filename: filename.into(),
            source_list,
            block_line: 0,
            features: FeatureSet::new(),
            defines: Vec::new(),
            lines: Vec::new(),
            dependencies,
            derivatives: BTreeMap::new(),
            num_threads: None,
            wave_ops: WaveOpsFlags::empty(),
        }
    }

    /// Attach a body given as text, attributed to `file`
    #[must_use]
    pub fn with_source(mut self, text: &str, file: impl AsRef<Path>) -> Self {
        self.lines = lines_from_text(text, file);
        self
    }

    /// Attach a feature snapshot
    #[must_use]
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    /// Identity used to detect duplicate blocks
    ///
    /// Two blocks collide when stage, output filename, features and defines
    /// are identical; the body is deliberately not part of the signature.
    pub fn signature(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.stage.keyword().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.filename.as_bytes());
        hasher.update(&[0]);
        for feature in self.features.iter() {
            hasher.update(feature.name().as_bytes());
            hasher.update(&[0]);
        }
        for (name, value) in &self.defines {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize()
    }

    /// Location of the opening stage keyword
    pub fn location(&self) -> SourceLocation {
        SourceLocation::new(&self.source_list, self.block_line)
    }

    /// Derivatives for a platform, a single empty one when none were recorded
    pub fn derivatives_for(&self, platform: Platform) -> Vec<Derivative> {
        match self.derivatives.get(&platform) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => vec![Derivative::default()],
        }
    }

    /// Store what generation learned about this binary on a platform
    pub fn record_generation(
        &mut self,
        platform: Platform,
        derivatives: Vec<Derivative>,
        num_threads: Option<[u32; 3]>,
        wave_ops: WaveOpsFlags,
    ) {
        self.derivatives.insert(platform, derivatives);
        if num_threads.is_some() {
            self.num_threads = num_threads;
        }
        self.wave_ops |= wave_ops;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Feature;

    #[test]
    fn test_signature_ignores_body() {
        let a = ShaderBinary::new(Stage::Vert, "a.vert", "list.fsl").with_source("one", "x.fsl");
        let b = ShaderBinary::new(Stage::Vert, "a.vert", "list.fsl").with_source("two", "y.fsl");
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_tracks_features_and_defines() {
        let a = ShaderBinary::new(Stage::Vert, "a.vert", "list.fsl");
        let b = a.clone().with_features(FeatureSet::new().with(Feature::Invariant));
        let mut c = a.clone();
        c.defines.push(("SKINNED".into(), "1".into()));
        assert_ne!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_default_derivative() {
        let bin = ShaderBinary::new(Stage::Frag, "a.frag", "list.fsl");
        assert_eq!(bin.derivatives_for(Platform::Vulkan), vec![Derivative::default()]);
    }

    #[test]
    fn test_lines_keep_origin() {
        let lines = lines_from_text("a\nb\n", "shader.fsl");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 2);
        assert_eq!(lines[1].location().to_string(), "shader.fsl(2)");
    }
}
