//! Incremental builds and compiled containers
//!
//! Author: Moroya Sakamoto

mod common;

use common::*;
use forge_fsl::compile::{FslContainer, Host};
use forge_fsl::driver::DependencyManifest;
use forge_fsl::prelude::*;
use std::time::{Duration, SystemTime};

const PLATFORMS: [Platform; 3] = [Platform::Vulkan, Platform::Direct3D12, Platform::Gles];

#[test]
fn test_rerun_is_idempotent() {
    let dir = temp_dir("idempotent");
    let list = write_sample(&dir, LIST);
    let mut opts = options(&dir, &list, &PLATFORMS);
    opts.compile = true;
    opts.incremental = true;

    let first = FakeCompiler::new(32);
    let report = run_with(&opts, &first, &toolchain()).unwrap();
    assert!(report.success(), "{:?}", report.failures);
    assert_eq!(report.generated, 6);
    assert_eq!(report.compiled, 6);
    // GLES packs text without a compiler
    assert_eq!(first.call_count(), 4);

    let before = (snapshot(&dir.join("out")), snapshot(&dir.join("bin")));
    let second = FakeCompiler::new(32);
    let report = run_with(&opts, &second, &toolchain()).unwrap();
    assert_eq!(report.skipped, 6);
    assert_eq!(report.generated, 0);
    assert_eq!(second.call_count(), 0);
    assert_eq!((snapshot(&dir.join("out")), snapshot(&dir.join("bin"))), before);
}

#[test]
fn test_touched_include_rebuilds_its_blocks() {
    let dir = temp_dir("touched");
    let list = write_sample(&dir, LIST);
    let mut opts = options(&dir, &list, &[Platform::Vulkan]);
    opts.incremental = true;
    run_with(&opts, &FakeCompiler::new(8), &toolchain()).unwrap();

    let future = SystemTime::now() + Duration::from_secs(30);
    let file = std::fs::File::options().write(true).open(dir.join("basic.frag.fsl")).unwrap();
    file.set_modified(future).unwrap();

    let report = run_with(&opts, &FakeCompiler::new(8), &toolchain()).unwrap();
    assert_eq!(report.generated, 1);
    assert_eq!(report.skipped, 1);
}

#[test]
fn test_non_incremental_always_runs() {
    let dir = temp_dir("forced");
    let list = write_sample(&dir, LIST);
    let opts = options(&dir, &list, &[Platform::Vulkan]);
    run_with(&opts, &FakeCompiler::new(8), &toolchain()).unwrap();
    let report = run_with(&opts, &FakeCompiler::new(8), &toolchain()).unwrap();
    assert_eq!(report.generated, 2);
    assert_eq!(report.skipped, 0);
}

#[test]
fn test_containers_hold_compiled_blobs() {
    let dir = temp_dir("containers");
    let list = write_sample(&dir, LIST);
    let mut opts = options(&dir, &list, &[Platform::Vulkan, Platform::Gles]);
    opts.compile = true;
    let backend = FakeCompiler::new(120);
    run_with(&opts, &backend, &toolchain()).unwrap();

    let vk = FslContainer::read(opts.binary_dir(Platform::Vulkan).join("basic.vert.bin")).unwrap();
    assert_eq!(vk.blobs.len(), 1);
    assert_eq!(vk.entries()[0].offset, 36);
    assert_eq!(vk.blobs[0].code, vec![0x5A; 120]);
    assert!(!vk.multiview());
    // intermediate derivative outputs are cleaned up
    assert!(!opts.binary_dir(Platform::Vulkan).join("basic.vert.bin_0.spv").exists());

    let gles = FslContainer::read(opts.binary_dir(Platform::Gles).join("basic.frag.bin")).unwrap();
    let text = std::fs::read(opts.platform_dir(Platform::Gles).join("basic.frag")).unwrap();
    assert_eq!(gles.blobs[0].code, text);

    let calls = backend.calls.lock().unwrap();
    let frag = calls.iter().find(|c| c.output.to_string_lossy().contains("basic.frag")).unwrap();
    assert!(frag.program.ends_with("glslangValidator"));
    assert!(frag.args.windows(2).any(|w| w == ["-S", "frag"]));
}

#[test]
fn test_compiler_failure_is_reported_and_retried() {
    let dir = temp_dir("compile_failure");
    let list = write_sample(&dir, LIST);
    let mut opts = options(&dir, &list, &[Platform::Vulkan]);
    opts.compile = true;
    opts.incremental = true;

    let failing = FakeCompiler::failing("glslang: internal error");
    let report = run_with(&opts, &failing, &toolchain()).unwrap();
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].to_string().ends_with("ERROR: glslang: internal error"));

    let manifest = DependencyManifest::path_for(&opts.destination, Platform::Vulkan, &opts.input);
    assert!(!std::fs::read_to_string(manifest).unwrap().contains("basic.vert"));

    let retry = FakeCompiler::new(8);
    let report = run_with(&opts, &retry, &toolchain()).unwrap();
    assert!(report.success());
    assert_eq!(retry.call_count(), 2);
}

#[test]
fn test_missing_compiler_is_configuration_error() {
    let dir = temp_dir("missing_compiler");
    let list = write_sample(&dir, LIST);
    let mut opts = options(&dir, &list, &[Platform::Ios]);
    opts.compile = true;
    let windows = ToolchainConfig::with_vars(Vec::<(String, String)>::new(), Host { posix: false, linux: false });
    let report = run_with(&opts, &FakeCompiler::new(8), &windows).unwrap();
    assert_eq!(report.exit_code(), 3);
}

const PRIMITIVE_FRAG: &str = "\
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
float4 PS_MAIN(VSOutput(In), SV_PrimitiveID(uint) primitiveId)
{
\tINIT_MAIN;
\tRETURN(float4(In.UV, float(primitiveId), 1.0f));
}
";

#[test]
fn test_deleted_passthrough_binary_rebuilds_its_fragment() {
    let dir = temp_dir("passthrough");
    let list = write_sample(&dir, LIST);
    std::fs::write(dir.join("basic.frag.fsl"), PRIMITIVE_FRAG).unwrap();
    let mut opts = options(&dir, &list, &[Platform::Vulkan]);
    opts.compile = true;
    opts.incremental = true;

    let report = run_with(&opts, &FakeCompiler::new(16), &toolchain()).unwrap();
    assert!(report.success(), "{:?}", report.failures);
    assert_eq!(report.compiled, 3);
    let geom = opts.binary_dir(Platform::Vulkan).join("basic_passthrough.geom.bin");
    assert!(geom.exists());

    let manifest = DependencyManifest::path_for(&opts.destination, Platform::Vulkan, &opts.input);
    let manifest = DependencyManifest::load(&manifest).unwrap();
    assert_eq!(manifest.extras("basic.frag"), ["basic_passthrough.geom".to_string()]);

    let report = run_with(&opts, &FakeCompiler::new(16), &toolchain()).unwrap();
    assert_eq!(report.skipped, 2);

    std::fs::remove_file(&geom).unwrap();
    let again = FakeCompiler::new(16);
    let report = run_with(&opts, &again, &toolchain()).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(again.call_count(), 2);
    assert!(geom.exists());
}
