//! Common test helpers for forge-fsl integration tests
//!
//! Author: Moroya Sakamoto

#![allow(dead_code)]

use forge_fsl::compile::{CompileOutput, Host, Invocation};
use forge_fsl::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ============================================================================
// Sample sources
// ============================================================================

pub const VERT: &str = "\
STRUCT(VSInput)
{
\tDATA(float3, Position, POSITION);
\tDATA(float2, UV, TEXCOORD0);
};
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
CBUFFER(Uniforms, UPDATE_FREQ_PER_FRAME, b0, binding = 0)
{
\tDATA(float4x4, mvp, None);
};
VSOutput VS_MAIN(VSInput(In))
{
\tINIT_MAIN;
\tVSOutput Out;
\tOut.Position = mul(Get(mvp), float4(In.Position, 1.0f));
\tOut.UV = In.UV;
\tRETURN(Out);
}
";

pub const FRAG: &str = "\
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
RES(Tex2D(float4), albedo, UPDATE_FREQ_PER_FRAME, t0, binding = 0);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 1);
float4 PS_MAIN(VSOutput(In))
{
\tINIT_MAIN;
\tRETURN(SampleTex2D(Get(albedo), Get(linearSampler), In.UV));
}
";

pub const LIST: &str = "\
#vert basic.vert
#include \"basic.vert.fsl\"
#end

#frag basic.frag
#include \"basic.frag.fsl\"
#end
";

// ============================================================================
// Workspace
// ============================================================================

/// Fresh directory under the system temp dir
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("forge_fsl_it_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write the sample sources and list, returning the list path
pub fn write_sample(dir: &Path, list: &str) -> PathBuf {
    std::fs::write(dir.join("basic.vert.fsl"), VERT).unwrap();
    std::fs::write(dir.join("basic.frag.fsl"), FRAG).unwrap();
    let path = dir.join("Basic.fsl");
    std::fs::write(&path, list).unwrap();
    path
}

/// Options writing into `dir/out`
pub fn options(dir: &Path, list: &Path, languages: &[Platform]) -> Options {
    let mut options = Options::new(list, dir.join("out"));
    options.binary_destination = Some(dir.join("bin"));
    options.languages = languages.to_vec();
    options.jobs = 2;
    options
}

/// Every compiler resolvable on a Linux host
pub fn toolchain() -> ToolchainConfig {
    ToolchainConfig::with_vars(
        [
            ("FSL_COMPILER_FXC", "/sdk/fxc"),
            ("FSL_COMPILER_DXC", "/sdk/dxc"),
            ("FSL_COMPILER_LINUX_VK", "/sdk/vk"),
            ("SCE_ORBIS_SDK_DIR", "/sdk/orbis"),
            ("SCE_PROSPERO_SDK_DIR", "/sdk/prospero"),
            ("GXDKLATEST", "/sdk/gdk"),
        ],
        Host { posix: true, linux: true },
    )
}

// ============================================================================
// Fake compiler
// ============================================================================

/// Records invocations and writes a fixed-size blob for each
pub struct FakeCompiler {
    /// Every invocation in arrival order
    pub calls: Mutex<Vec<Invocation>>,
    /// Size of the blob written per derivative
    pub blob_size: usize,
    /// Diagnostics returned as a failure
    pub fail_with: Option<String>,
}

impl FakeCompiler {
    pub fn new(blob_size: usize) -> Self {
        Self { calls: Mutex::new(Vec::new()), blob_size, fail_with: None }
    }

    pub fn failing(diagnostics: &str) -> Self {
        Self { fail_with: Some(diagnostics.to_string()), ..Self::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CompileBackend for FakeCompiler {
    fn run(&self, invocation: &Invocation) -> Result<CompileOutput, FslError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if let Some(text) = &self.fail_with {
            return Ok(CompileOutput { success: false, diagnostics: text.clone() });
        }
        std::fs::write(&invocation.output, vec![0x5A; self.blob_size])?;
        Ok(CompileOutput { success: true, diagnostics: String::new() })
    }
}

/// All files under `dir` with their contents, sorted by path
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(d) = pending.pop() {
        for entry in std::fs::read_dir(&d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let bytes = std::fs::read(&path).unwrap();
                files.push((path, bytes));
            }
        }
    }
    files.sort();
    files
}
