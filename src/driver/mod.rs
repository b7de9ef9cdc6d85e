//! Orchestrator
//!
//! Reads a shader list, fans every stage block out to the requested
//! platforms and runs the (binary, platform) jobs on a fixed-size rayon
//! pool. Every job runs to completion; the first failure in job order
//! decides the exit code.
//!
//! Output layout:
//!
//! ```text
//! <destination>/<PLATFORM>/<filename>              generated source
//! <destination>/<PLATFORM>/<list-stem>.deps.json   dependency manifest
//! <binary_destination>/<PLATFORM>/<filename>.bin   @FSL container
//! ```
//!
//! Author: Moroya Sakamoto

pub mod cache;

pub use cache::{staleness, DependencyManifest, JobFiles, StaleReason};

use crate::compile::{compile_binary, CompileBackend, NativeCompiler, ToolchainConfig};
use crate::error::FslError;
use crate::generators::{generate, GenerateConfig};
use crate::reader::parse_shader_list;
use crate::types::{ExtraDependency, Platform, ShaderBinary};
use log::{debug, error, info};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything one run needs
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Shader list file
    pub input: PathBuf,
    /// Root of generated sources
    pub destination: PathBuf,
    /// Root of compiled containers, `destination` when unset
    pub binary_destination: Option<PathBuf>,
    /// Target platforms
    pub languages: Vec<Platform>,
    /// Extra include directories
    pub includes: Vec<PathBuf>,
    /// Report every generated, skipped and compiled file
    pub verbose: bool,
    /// Run the native compilers
    pub compile: bool,
    /// Debug build
    pub debug: bool,
    /// Skip jobs whose outputs are up to date
    pub incremental: bool,
    /// Root signature file embedded into D3D12-class output
    pub root_signature: Option<PathBuf>,
    /// Worker threads, 0 for available parallelism
    pub jobs: usize,
}

impl Options {
    /// Options for one list and destination
    pub fn new(input: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self { input: input.into(), destination: destination.into(), ..Default::default() }
    }

    /// Directory of generated sources for a platform
    #[inline(always)]
    pub fn platform_dir(&self, platform: Platform) -> PathBuf {
        self.destination.join(platform.name())
    }

    /// Directory of containers for a platform
    #[inline(always)]
    pub fn binary_dir(&self, platform: Platform) -> PathBuf {
        self.binary_destination.as_deref().unwrap_or(&self.destination).join(platform.name())
    }
}

/// What happened to one job
#[derive(Debug)]
pub enum JobOutcome {
    /// Up to date, nothing ran
    Skipped,
    /// Generated and, when requested, compiled
    Done {
        /// Containers written
        compiled: usize,
        /// Filenames of stages synthesized next to the output
        extras: Vec<String>,
    },
    /// Generation or compilation failed
    Failed(FslError),
}

/// Summary of a run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Sources generated
    pub generated: usize,
    /// Jobs skipped as up to date
    pub skipped: usize,
    /// Containers written, auxiliary stages included
    pub compiled: usize,
    /// Failures in job order
    pub failures: Vec<FslError>,
}

impl RunReport {
    /// 0 on success, else the code of the first failure
    pub fn exit_code(&self) -> i32 {
        self.failures.first().map(FslError::exit_code).unwrap_or(0)
    }

    /// True when every job succeeded
    #[inline(always)]
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run with the native compilers and the process environment
pub fn run(options: &Options) -> Result<RunReport, FslError> {
    run_with(options, &NativeCompiler, &ToolchainConfig::from_env())
}

/// Run with an explicit backend and toolchain
///
/// Errors that stop the whole run (unreadable shader list, bad worker
/// count) are returned directly; per-job failures land in the report.
pub fn run_with(
    options: &Options,
    backend: &dyn CompileBackend,
    toolchain: &ToolchainConfig,
) -> Result<RunReport, FslError> {
    let binaries = parse_shader_list(&options.input, &options.includes)?;
    let config = GenerateConfig {
        debug: options.debug,
        root_signature: match &options.root_signature {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                FslError::Config(format!("cannot read root signature {}: {}", path.display(), e))
            })?),
            None => None,
        },
    };

    let mut manifests: HashMap<Platform, DependencyManifest> = HashMap::new();
    for &platform in &options.languages {
        let path = DependencyManifest::path_for(&options.destination, platform, &options.input);
        manifests.insert(platform, DependencyManifest::load(&path)?);
    }

    let jobs: Vec<(Platform, &ShaderBinary)> =
        options.languages.iter().flat_map(|&p| binaries.iter().map(move |b| (p, b))).collect();
    debug!("{} jobs over {} platforms", jobs.len(), options.languages.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .map_err(|e| FslError::Config(format!("cannot start worker pool: {}", e)))?;

    let outcomes: Vec<JobOutcome> = pool.install(|| {
        jobs.par_iter()
            .map(|&(platform, binary)| {
                let ctx = Job { options, config: &config, backend, toolchain, manifest: &manifests[&platform] };
                ctx.run(platform, binary)
            })
            .collect()
    });

    let mut report = RunReport::default();
    for (&(platform, binary), outcome) in jobs.iter().zip(outcomes) {
        let manifest = manifests.entry(platform).or_default();
        match outcome {
            JobOutcome::Skipped => report.skipped += 1,
            JobOutcome::Done { compiled, extras } => {
                report.generated += 1;
                report.compiled += compiled;
                manifest.record(binary.filename.clone(), &binary.dependencies);
                manifest.record_extras(&binary.filename, extras);
            }
            JobOutcome::Failed(e) => {
                manifest.forget(&binary.filename);
                report.failures.push(e);
            }
        }
    }

    for (platform, manifest) in &manifests {
        manifest.save(&DependencyManifest::path_for(&options.destination, *platform, &options.input))?;
    }
    info!(
        "{} generated, {} up to date, {} compiled, {} failed",
        report.generated,
        report.skipped,
        report.compiled,
        report.failures.len()
    );
    Ok(report)
}

// ============================================================================
// Jobs
// ============================================================================

struct Job<'a> {
    options: &'a Options,
    config: &'a GenerateConfig,
    backend: &'a dyn CompileBackend,
    toolchain: &'a ToolchainConfig,
    manifest: &'a DependencyManifest,
}

#[inline(always)]
fn container_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{}.bin", filename))
}

impl Job<'_> {
    fn run(&self, platform: Platform, binary: &ShaderBinary) -> JobOutcome {
        let platform_dir = self.options.platform_dir(platform);
        let binary_dir = self.options.binary_dir(platform);
        let generated = platform_dir.join(&binary.filename);
        let container = container_path(&binary_dir, &binary.filename);
        let extras = self.manifest.extras(&binary.filename);
        let extra_sources: Vec<PathBuf> = extras.iter().map(|f| platform_dir.join(f)).collect();
        let extra_containers: Vec<PathBuf> = if self.options.compile {
            extras.iter().map(|f| container_path(&binary_dir, f)).collect()
        } else {
            Vec::new()
        };
        let files = JobFiles {
            filename: &binary.filename,
            dependencies: &binary.dependencies,
            generated: &generated,
            container: self.options.compile.then_some(container.as_path()),
            extra_sources: &extra_sources,
            extra_containers: &extra_containers,
        };
        match staleness(self.manifest, self.options.incremental, &files) {
            None => {
                info!("{}: {} is up to date", platform, generated.display());
                return JobOutcome::Skipped;
            }
            Some(reason) => debug!("{}: {} ({})", platform, binary.filename, reason),
        }

        match self.build(platform, binary.clone(), &generated, &container) {
            Ok((compiled, extras)) => JobOutcome::Done { compiled, extras },
            Err(e) => {
                error!("{}", e);
                JobOutcome::Failed(e)
            }
        }
    }

    fn build(
        &self,
        platform: Platform,
        mut binary: ShaderBinary,
        generated: &Path,
        container: &Path,
    ) -> Result<(usize, Vec<String>), FslError> {
        let extras = generate(platform, self.config, &mut binary, generated)?;
        info!("{}: generated {}", platform, generated.display());
        let names = extras.iter().map(|e| e.filename.clone()).collect();
        if !self.options.compile {
            return Ok((0, names));
        }

        compile_binary(self.backend, self.toolchain, platform, &binary, generated, container, self.options.debug)?;
        let mut compiled = 1;
        for extra in &extras {
            self.compile_extra(platform, &binary, extra)?;
            compiled += 1;
        }
        Ok((compiled, names))
    }

    /// Compile a stage synthesized during generation
    fn compile_extra(&self, platform: Platform, parent: &ShaderBinary, extra: &ExtraDependency) -> Result<(), FslError> {
        let binary = ShaderBinary::new(extra.stage, extra.filename.clone(), parent.source_list.clone())
            .with_features(parent.features.clone());
        let container = container_path(&self.options.binary_dir(platform), &extra.filename);
        compile_binary(self.backend, self.toolchain, platform, &binary, &extra.path, &container, self.options.debug)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_layout() {
        let mut options = Options::new("shaders/Basic.fsl", "out");
        assert_eq!(options.platform_dir(Platform::Gles), PathBuf::from("out/GLES"));
        assert_eq!(options.binary_dir(Platform::Gles), PathBuf::from("out/GLES"));
        options.binary_destination = Some(PathBuf::from("bin"));
        assert_eq!(options.binary_dir(Platform::Macos), PathBuf::from("bin/MACOS"));
        assert_eq!(container_path(Path::new("bin"), "a.vert"), PathBuf::from("bin/a.vert.bin"));
    }

    #[test]
    fn test_exit_code_is_first_failure() {
        let mut report = RunReport::default();
        assert_eq!(report.exit_code(), 0);
        report.failures.push(FslError::Config("no compiler".into()));
        report.failures.push(FslError::Toolchain { file: PathBuf::from("a"), diagnostics: "bad".into() });
        assert_eq!(report.exit_code(), 3);
        assert!(!report.success());
    }

    #[test]
    fn test_missing_list_is_an_error() {
        let options = Options::new(std::env::temp_dir().join("forge_fsl_no_such_list.fsl"), "out");
        assert!(run(&options).is_err());
    }
}
