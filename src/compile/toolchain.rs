//! Native toolchain resolution and command lines
//!
//! Compilers are located through environment variables, one per platform
//! family. [`ToolchainConfig`] captures the variables once so tests can
//! inject their own map and host.
//!
//! Author: Moroya Sakamoto

use crate::error::FslError;
use crate::types::{Derivative, Feature, FeatureSet, Platform, ShaderBinary, Stage, WaveOpsFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Host properties that change compiler lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    /// POSIX host: Metal compiles through `xcrun`
    pub posix: bool,
    /// Linux host: Vulkan uses `FSL_COMPILER_LINUX_VK`
    pub linux: bool,
}

impl Host {
    /// Host this binary runs on
    pub fn current() -> Self {
        Self { posix: cfg!(unix), linux: cfg!(target_os = "linux") }
    }
}

/// Environment-derived compiler locations
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    vars: HashMap<String, String>,
    host: Host,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ToolchainConfig {
    /// Capture the process environment
    pub fn from_env() -> Self {
        Self { vars: std::env::vars().collect(), host: Host::current() }
    }

    /// Use an explicit variable map
    pub fn with_vars<I, K, V>(vars: I, host: Host) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(), host }
    }

    /// Host the command lines are built for
    #[inline(always)]
    pub fn host(&self) -> Host {
        self.host
    }

    /// Compiler executable for `platform`, `None` for GLES
    pub fn compiler(&self, platform: Platform) -> Result<Option<PathBuf>, FslError> {
        use Platform::*;
        let (var, subpath) = match platform {
            Gles => return Ok(None),
            Macos | Ios if self.host.posix => return Ok(Some(PathBuf::from("xcrun"))),
            Direct3D11 => ("FSL_COMPILER_FXC", "fxc.exe"),
            Direct3D12 => ("FSL_COMPILER_DXC", "dxc.exe"),
            Vulkan | AndroidVulkan | Switch | Quest if self.host.linux => ("FSL_COMPILER_LINUX_VK", "glslangValidator"),
            Vulkan | AndroidVulkan | Switch | Quest => ("FSL_COMPILER_VK", "glslangValidator.exe"),
            Macos => ("FSL_COMPILER_MACOS", "metal.exe"),
            Ios => ("FSL_COMPILER_IOS", "metal.exe"),
            Orbis => ("SCE_ORBIS_SDK_DIR", "host_tools/bin/orbis-wave-psslc.exe"),
            Prospero => ("SCE_PROSPERO_SDK_DIR", "host_tools/bin/prospero-wave-psslc.exe"),
            Xbox => ("GXDKLATEST", "bin/XboxOne/dxc.exe"),
            Scarlett => ("GXDKLATEST", "bin/Scarlett/dxc.exe"),
        };
        let root = self
            .vars
            .get(var)
            .ok_or_else(|| FslError::Config(format!("{} is not set, cannot compile for {}", var, platform)))?;
        Ok(Some(Path::new(root).join(subpath)))
    }

    /// Platforms whose compiler can be resolved
    pub fn available(&self) -> Vec<Platform> {
        Platform::ALL.iter().copied().filter(|p| matches!(self.compiler(*p), Ok(Some(_)))).collect()
    }
}

// ============================================================================
// Shader models
// ============================================================================

/// HLSL profile prefix of a stage
#[inline(always)]
fn hlsl_stage(stage: Stage) -> &'static str {
    match stage {
        Stage::Vert => "vs",
        Stage::Frag => "ps",
        Stage::Comp => "cs",
        Stage::Geom => "gs",
        Stage::Tesc => "hs",
        Stage::Tese => "ds",
    }
}

/// DXC/FXC target profile, `features` is `None` for Direct3D 11
pub fn dx_target(stage: Stage, features: Option<&FeatureSet>) -> String {
    let level = match features {
        None => "_5_0",
        Some(f) if f.contains(Feature::Atomics64) || f.contains(Feature::DynamicResources) => "_6_6",
        Some(f) if f.contains(Feature::Raytracing) => "_6_5",
        Some(f) if f.contains(Feature::Vrs) => "_6_4",
        Some(_) => "_6_0",
    };
    format!("{}{}", hlsl_stage(stage), level)
}

/// glslang `--target-env`
#[inline(always)]
pub fn spirv_target(features: &FeatureSet) -> &'static str {
    if features.contains(Feature::Raytracing) {
        "spirv1.4"
    } else {
        "spirv1.3"
    }
}

/// Metal language version
pub fn metal_version(platform: Platform, features: &FeatureSet, wave_ops: WaveOpsFlags) -> &'static str {
    if features.contains(Feature::Raytracing) || features.contains(Feature::Atomics64) {
        "2.4"
    } else if platform == Platform::Ios
        && (wave_ops.contains(WaveOpsFlags::ARITHMETIC) || features.contains(Feature::PrimId))
    {
        "2.3"
    } else {
        "2.2"
    }
}

// ============================================================================
// Command lines
// ============================================================================

/// One compiler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// File the compiler writes
    pub output: PathBuf,
}

/// Extension of a compiled derivative
fn blob_extension(platform: Platform) -> &'static str {
    use Platform::*;
    match platform {
        Direct3D11 => "dxbc",
        Direct3D12 | Xbox | Scarlett => "dxil",
        Orbis | Prospero => "bsh",
        Macos | Ios => "air",
        _ => "spv",
    }
}

/// Command line compiling derivative `index` of `binary` from `src`
#[allow(clippy::too_many_arguments)]
pub fn invocation(
    toolchain: &ToolchainConfig,
    program: PathBuf,
    platform: Platform,
    binary: &ShaderBinary,
    derivative: &Derivative,
    index: usize,
    debug: bool,
    src: &Path,
    dst: &Path,
) -> Invocation {
    use Platform::*;
    let features = binary.features.masked_for(platform);
    let output = PathBuf::from(format!("{}_{}.{}", dst.display(), index, blob_extension(platform)));
    let src_s = src.display().to_string();
    let out_s = output.display().to_string();
    let include = src.parent().map(|p| p.display().to_string()).unwrap_or_else(|| ".".to_string());

    let mut args: Vec<String> = derivative.defines.iter().map(|d| format!("-D{}", d)).collect();
    args.extend(features.iter().map(|f| format!("-D{}", f.name())));
    args.push(if debug { "-D_DEBUG" } else { "-DNDEBUG" }.to_string());

    match platform {
        Vulkan | AndroidVulkan | Switch | Quest => {
            if debug {
                args.push("-g".into());
            }
            args.extend(["-V".into(), src_s, "-o".into(), out_s, format!("-I{}", include)]);
            args.extend(["-S".into(), binary.stage.keyword().into()]);
            args.extend(["--target-env".into(), spirv_target(&features).into()]);
        }
        Direct3D11 => {
            if debug {
                args.push("/Zi".into());
            }
            args.extend(["/T".into(), dx_target(binary.stage, None), "/I".into(), include, "/Fo".into(), out_s, src_s]);
        }
        Direct3D12 | Xbox | Scarlett => {
            if debug {
                args.extend(["/Zi".into(), "-Qembed_debug".into()]);
            }
            args.extend(["/T".into(), dx_target(binary.stage, Some(&features)), "/I".into(), include]);
            args.extend(["/Fo".into(), out_s, src_s]);
        }
        Orbis | Prospero => {
            let suffix = if platform == Orbis { "orbis" } else { "prospero" };
            args.push("-DGNM".into());
            args.push(if debug { "-Od" } else { "-O4" }.into());
            let profile = match binary.stage {
                Stage::Vert if platform == Orbis && features.contains(Feature::PrimId) => "es",
                Stage::Vert => "vs_vs",
                Stage::Frag => "ps",
                Stage::Comp => "cs",
                _ => "gs",
            };
            if features.contains(Feature::Invariant) {
                args.push("-nofastmath".into());
            }
            args.extend(["-profile".into(), format!("sce_{}_{}", profile, suffix)]);
            args.extend([format!("-I{}", include), "-o".into(), out_s, src_s]);
        }
        Macos | Ios => {
            let (sdk, std) = if platform == Macos { ("macosx", "macos") } else { ("iphoneos", "ios") };
            if toolchain.host().posix {
                let mut prefixed = vec!["-sdk".to_string(), sdk.to_string(), "metal".to_string()];
                prefixed.append(&mut args);
                args = prefixed;
            }
            if platform == Ios {
                args.push("-mios-version-min=11.0".into());
            }
            args.extend(["-I".into(), include, "-dD".into(), src_s, "-o".into(), out_s]);
            if features.contains(Feature::Invariant) {
                args.push("-fpreserve-invariance".into());
            }
            args.push(format!("-std={}-metal{}", std, metal_version(platform, &features, binary.wave_ops)));
            args.push("-Wno-unused-variable".into());
            if debug {
                args.push("-gline-tables-only".into());
            }
        }
        Gles => {}
    }
    Invocation { program, args, output }
}
