//! Binary packer
//!
//! Runs the native compiler once per derivative and packs the blobs into an
//! [`FslContainer`]. Process spawning sits behind [`CompileBackend`] so the
//! packing logic runs without any SDK installed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use forge_fsl::compile::{compile_binary, NativeCompiler, ToolchainConfig};
//!
//! let toolchain = ToolchainConfig::from_env();
//! let container = compile_binary(&NativeCompiler, &toolchain, platform, &binary, &src, &dst, false)?;
//! ```
//!
//! Author: Moroya Sakamoto

pub mod container;
pub mod diagnostics;
pub mod toolchain;

pub use container::{ContainerBlob, ContainerEntry, FslContainer, FSL_MAGIC};
pub use toolchain::{Host, Invocation, ToolchainConfig};

use crate::error::FslError;
use crate::types::{Feature, Platform, ShaderBinary};
use log::{debug, info};
use std::path::Path;
use std::process::Command;

/// Outcome of one compiler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    /// Exit status was zero
    pub success: bool,
    /// Captured stdout and stderr
    pub diagnostics: String,
}

/// Something that can run a compiler invocation
pub trait CompileBackend: Send + Sync {
    /// Run `invocation` to completion
    fn run(&self, invocation: &Invocation) -> Result<CompileOutput, FslError>;

    /// Read the blob an invocation produced
    fn read_output(&self, path: &Path) -> Result<Vec<u8>, FslError> {
        Ok(std::fs::read(path)?)
    }
}

/// Spawns the real compiler
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCompiler;

impl CompileBackend for NativeCompiler {
    fn run(&self, invocation: &Invocation) -> Result<CompileOutput, FslError> {
        debug!("running {} {}", invocation.program.display(), invocation.args.join(" "));
        let output = Command::new(&invocation.program).args(&invocation.args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FslError::Config(format!("compiler {} not found", invocation.program.display()))
            } else {
                FslError::Io(e)
            }
        })?;
        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CompileOutput { success: output.status.success(), diagnostics })
    }
}

/// Compile the generated `src` of `binary` into the container at `dst`
///
/// Every recorded derivative is compiled separately and stored under its
/// index. GLES has no compiler; the generated text is the single payload.
pub fn compile_binary(
    backend: &dyn CompileBackend,
    toolchain: &ToolchainConfig,
    platform: Platform,
    binary: &ShaderBinary,
    src: &Path,
    dst: &Path,
    debug: bool,
) -> Result<FslContainer, FslError> {
    let multiview = binary.features.masked_for(platform).contains(Feature::Multiview);
    let mut container = FslContainer::new(multiview);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match toolchain.compiler(platform)? {
        None => container.push(0, std::fs::read(src)?),
        Some(program) => {
            for (index, derivative) in binary.derivatives_for(platform).iter().enumerate() {
                let inv = toolchain::invocation(
                    toolchain,
                    program.clone(),
                    platform,
                    binary,
                    derivative,
                    index,
                    debug,
                    src,
                    dst,
                );
                let output = backend.run(&inv)?;
                if !output.success {
                    return Err(FslError::Toolchain {
                        file: src.to_path_buf(),
                        diagnostics: diagnostics::translate(&output.diagnostics, src),
                    });
                }
                let code = backend.read_output(&inv.output)?;
                // intermediate blobs only live until packed
                let _ = std::fs::remove_file(&inv.output);
                container.push(index as u64, code);
            }
        }
    }

    container.write(dst)?;
    info!("{}: compiled {} ({} derivatives)", platform, dst.display(), container.blobs.len());
    Ok(container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Derivative, FeatureSet, Stage};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records invocations and hands back canned blobs
    struct Recording {
        calls: Mutex<Vec<Invocation>>,
        blobs: HashMap<PathBuf, Vec<u8>>,
        fail_with: Option<String>,
    }

    impl Recording {
        fn new(blobs: HashMap<PathBuf, Vec<u8>>) -> Self {
            Self { calls: Mutex::new(Vec::new()), blobs, fail_with: None }
        }
    }

    impl CompileBackend for Recording {
        fn run(&self, invocation: &Invocation) -> Result<CompileOutput, FslError> {
            self.calls.lock().unwrap().push(invocation.clone());
            match &self.fail_with {
                Some(text) => Ok(CompileOutput { success: false, diagnostics: text.clone() }),
                None => Ok(CompileOutput { success: true, diagnostics: String::new() }),
            }
        }

        fn read_output(&self, path: &Path) -> Result<Vec<u8>, FslError> {
            self.blobs.get(path).cloned().ok_or_else(|| FslError::Config(format!("no blob {}", path.display())))
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("forge_fsl_compile_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn vulkan_env() -> ToolchainConfig {
        ToolchainConfig::with_vars([("FSL_COMPILER_LINUX_VK", "/vk"), ("FSL_COMPILER_VK", "/vk")], Host {
            posix: true,
            linux: true,
        })
    }

    #[test]
    fn test_two_derivatives_packed_in_order() {
        let dir = scratch("two");
        let dst = dir.join("a.frag.bin");
        let mut binary = ShaderBinary::new(Stage::Frag, "a.frag", "list.fsl");
        binary.record_generation(
            Platform::Vulkan,
            vec![Derivative::default(), Derivative::new(["VK_EXT_DESCRIPTOR_INDEXING_ENABLED=1"])],
            None,
            Default::default(),
        );
        let mut blobs = HashMap::new();
        blobs.insert(PathBuf::from(format!("{}_0.spv", dst.display())), vec![1u8; 120]);
        blobs.insert(PathBuf::from(format!("{}_1.spv", dst.display())), vec![2u8; 340]);
        let backend = Recording::new(blobs);

        let container =
            compile_binary(&backend, &vulkan_env(), Platform::Vulkan, &binary, &dir.join("a.frag"), &dst, false)
                .unwrap();
        let entries = container.entries();
        assert_eq!(entries[0].offset, 60);
        assert_eq!(entries[1].offset, 180);
        assert_eq!(std::fs::read(&dst).unwrap().len(), 520);

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].args.contains(&"-DVK_EXT_DESCRIPTOR_INDEXING_ENABLED=1".to_string()));
    }

    #[test]
    fn test_failure_reports_translated_diagnostics() {
        let dir = scratch("fail");
        let src = dir.join("a.vert");
        let binary = ShaderBinary::new(Stage::Vert, "a.vert", "list.fsl");
        let mut backend = Recording::new(HashMap::new());
        backend.fail_with = Some(format!("ERROR: {}:7: 'x' : undeclared identifier", src.display()));

        let err = compile_binary(&backend, &vulkan_env(), Platform::Vulkan, &binary, &src, &dir.join("a.bin"), false)
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), format!("{}(7): ERROR: 'x' : undeclared identifier", src.display()));
        assert!(!dir.join("a.bin").exists());
    }

    #[test]
    fn test_gles_packs_generated_text() {
        let dir = scratch("gles");
        let src = dir.join("a.frag");
        std::fs::write(&src, "void main() {}\n").unwrap();
        let binary = ShaderBinary::new(Stage::Frag, "a.frag", "list.fsl");
        let backend = Recording::new(HashMap::new());

        let env = ToolchainConfig::with_vars(Vec::<(String, String)>::new(), Host { posix: true, linux: true });
        let container = compile_binary(&backend, &env, Platform::Gles, &binary, &src, &dir.join("a.bin"), false).unwrap();
        assert_eq!(container.blobs.len(), 1);
        assert_eq!(container.blobs[0].code, b"void main() {}\n");
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_multiview_metadata_only_on_quest() {
        let dir = scratch("multiview");
        let dst = dir.join("a.vert.bin");
        let binary = ShaderBinary::new(Stage::Vert, "a.vert", "list.fsl")
            .with_features(FeatureSet::new().with(Feature::Multiview));
        let mut blobs = HashMap::new();
        blobs.insert(PathBuf::from(format!("{}_0.spv", dst.display())), vec![0u8; 4]);
        let backend = Recording::new(blobs);

        let quest =
            compile_binary(&backend, &vulkan_env(), Platform::Quest, &binary, &dir.join("a.vert"), &dst, false).unwrap();
        assert!(quest.multiview());
        let vulkan =
            compile_binary(&backend, &vulkan_env(), Platform::Vulkan, &binary, &dir.join("a.vert"), &dst, false).unwrap();
        assert!(!vulkan.multiview());
    }

    #[test]
    fn test_missing_compiler_is_config_error() {
        let binary = ShaderBinary::new(Stage::Comp, "a.comp", "list.fsl");
        let env = ToolchainConfig::with_vars(Vec::<(String, String)>::new(), Host { posix: false, linux: false });
        let err = compile_binary(
            &Recording::new(HashMap::new()),
            &env,
            Platform::Direct3D12,
            &binary,
            Path::new("a.comp"),
            Path::new("a.comp.bin"),
            false,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
