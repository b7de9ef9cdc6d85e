//! # Forge Shading Language
//!
//! Transpiles one annotated, platform-neutral shader source into native
//! shading languages:
//!
//! ## Targets
//!
//! - **HLSL**: Direct3D 11/12, Xbox, Scarlett, plus SRT expansion for Orbis and Prospero
//! - **Vulkan GLSL**: Vulkan, Android, Switch, Quest
//! - **GLSL ES 1.00**: legacy OpenGL ES
//! - **Metal**: macOS, iOS, with argument buffers
//!
//! ## Pipeline
//!
//! shader list → [`ShaderBinary`](types::ShaderBinary) per stage block →
//! [`Shader`](reader::Shader) description → generator → optional native
//! compile into an `@FSL` container.
//!
//! ## Example
//!
//! ```rust,ignore
//! use forge_fsl::prelude::*;
//!
//! let mut options = Options::new("shaders/Basic.fsl", "out");
//! options.languages = vec![Platform::Vulkan, Platform::Macos];
//! options.incremental = true;
//! let report = run(&options)?;
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Author
//!
//! Moroya Sakamoto

#![warn(missing_docs)]

pub mod compile;
pub mod driver;
pub mod error;
pub mod generators;
pub mod reader;
pub mod types;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::compile::{compile_binary, CompileBackend, FslContainer, NativeCompiler, ToolchainConfig};
    pub use crate::driver::{run, run_with, Options, RunReport};
    pub use crate::error::{FslError, SourceLocation};
    pub use crate::generators::{generate, generate_source, GenerateConfig, GeneratedShader};
    pub use crate::reader::{parse_shader_list, parse_shader_list_text, read_shader, Shader};
    pub use crate::types::{Derivative, Feature, FeatureSet, Platform, ShaderBinary, Stage, WaveOpsFlags};
}
