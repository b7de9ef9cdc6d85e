//! Incremental build cache
//!
//! Each platform directory keeps a JSON manifest mapping generated filenames
//! to the files they were generated from. A job is skipped only when its
//! outputs exist, its recorded dependency list matches and nothing it
//! depends on is newer than what it produced. Stages synthesized next to a
//! generated file (the primitive-ID passthrough) are recorded with it and
//! count as its outputs.
//!
//! # Features
//!
//! - **Per-platform manifests**: `<dst>/<PLATFORM>/<list-stem>.deps.json`
//! - **Stable output**: entries are kept sorted so rewrites are byte-identical
//! - **mtime based**: no content hashing of sources
//!
//! Author: Moroya Sakamoto

use crate::error::FslError;
use crate::types::Platform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Generated filename to dependency list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    /// Sorted dependency lists keyed by generated filename
    pub entries: BTreeMap<String, Vec<PathBuf>>,
    /// Filenames of stages synthesized alongside a generated file
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<String>>,
}

impl DependencyManifest {
    /// Manifest path for a shader list on a platform
    pub fn path_for(destination: &Path, platform: Platform, list: &Path) -> PathBuf {
        let stem = list.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "shaders".into());
        destination.join(platform.name()).join(format!("{}.deps.json", stem))
    }

    /// Load a manifest, empty when the file does not exist
    pub fn load(path: &Path) -> Result<Self, FslError> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| FslError::Manifest(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the manifest as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), FslError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Record the dependencies of a generated file
    pub fn record(&mut self, filename: impl Into<String>, dependencies: &BTreeSet<PathBuf>) {
        self.entries.insert(filename.into(), dependencies.iter().cloned().collect());
    }

    /// Record the synthesized stages written next to a generated file
    pub fn record_extras(&mut self, filename: &str, extras: Vec<String>) {
        if extras.is_empty() {
            self.extras.remove(filename);
        } else {
            self.extras.insert(filename.to_string(), extras);
        }
    }

    /// Drop everything recorded for a generated file
    pub fn forget(&mut self, filename: &str) {
        self.entries.remove(filename);
        self.extras.remove(filename);
    }

    /// Recorded dependencies of a generated file
    #[inline(always)]
    pub fn dependencies(&self, filename: &str) -> Option<&[PathBuf]> {
        self.entries.get(filename).map(Vec::as_slice)
    }

    /// Recorded synthesized stages of a generated file
    #[inline(always)]
    pub fn extras(&self, filename: &str) -> &[String] {
        self.extras.get(filename).map_or(&[], Vec::as_slice)
    }
}

/// Why a job has to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Incremental mode is off
    Forced,
    /// Generated file does not exist
    MissingOutput,
    /// Manifest has no entry for the file
    NotRecorded,
    /// Recorded dependency list differs
    DependenciesChanged,
    /// A dependency is newer than the generated file
    NewerDependency(PathBuf),
    /// Container is missing or older than the generated file
    MissingBinary,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Forced => f.write_str("incremental build disabled"),
            StaleReason::MissingOutput => f.write_str("output missing"),
            StaleReason::NotRecorded => f.write_str("not in dependency manifest"),
            StaleReason::DependenciesChanged => f.write_str("dependency list changed"),
            StaleReason::NewerDependency(p) => write!(f, "{} changed", p.display()),
            StaleReason::MissingBinary => f.write_str("binary missing or out of date"),
        }
    }
}

/// Paths one job reads and writes
#[derive(Debug, Clone, Copy)]
pub struct JobFiles<'a> {
    /// Generated filename, the manifest key
    pub filename: &'a str,
    /// Files the job was generated from
    pub dependencies: &'a BTreeSet<PathBuf>,
    /// Generated source
    pub generated: &'a Path,
    /// Container, when compiling
    pub container: Option<&'a Path>,
    /// Synthesized stage sources
    pub extra_sources: &'a [PathBuf],
    /// Containers of synthesized stages, when compiling
    pub extra_containers: &'a [PathBuf],
}

#[inline(always)]
fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// First reason `job` must run, `None` when it is up to date
pub fn staleness(manifest: &DependencyManifest, incremental: bool, job: &JobFiles<'_>) -> Option<StaleReason> {
    if !incremental {
        return Some(StaleReason::Forced);
    }
    let Some(generated_at) = modified(job.generated) else {
        return Some(StaleReason::MissingOutput);
    };
    let Some(recorded) = manifest.dependencies(job.filename) else {
        return Some(StaleReason::NotRecorded);
    };
    if !recorded.iter().eq(job.dependencies.iter()) {
        return Some(StaleReason::DependenciesChanged);
    }
    for dep in job.dependencies {
        match modified(dep) {
            Some(t) if t <= generated_at => {}
            _ => return Some(StaleReason::NewerDependency(dep.clone())),
        }
    }
    // written in the same pass as the generated file, so only existence counts
    if job.extra_sources.iter().any(|p| !p.exists()) {
        return Some(StaleReason::MissingOutput);
    }
    for container in job.container.into_iter().chain(job.extra_containers.iter().map(PathBuf::as_path)) {
        match modified(container) {
            Some(t) if t >= generated_at => {}
            _ => return Some(StaleReason::MissingBinary),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("forge_fsl_cache_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(path: &Path, at: SystemTime) {
        std::fs::write(path, "x").unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(at).unwrap();
    }

    #[test]
    fn test_manifest_path_and_round_trip() {
        let dir = temp_dir("manifest");
        let path = DependencyManifest::path_for(&dir, Platform::Vulkan, Path::new("shaders/Basic.fsl"));
        assert_eq!(path, dir.join("VULKAN").join("Basic.deps.json"));

        assert_eq!(DependencyManifest::load(&path).unwrap(), DependencyManifest::default());
        let mut manifest = DependencyManifest::default();
        manifest.record("a.vert", &BTreeSet::from([PathBuf::from("b.fsl"), PathBuf::from("a.fsl")]));
        manifest.save(&path).unwrap();
        let loaded = DependencyManifest::load(&path).unwrap();
        assert_eq!(loaded.dependencies("a.vert").unwrap(), [PathBuf::from("a.fsl"), PathBuf::from("b.fsl")]);

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(DependencyManifest::load(&path).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn test_extras_recorded_and_forgotten() {
        let mut manifest = DependencyManifest::default();
        manifest.record("a.frag", &BTreeSet::from([PathBuf::from("a.fsl")]));
        manifest.record_extras("a.frag", vec!["a_passthrough.geom".into()]);
        assert_eq!(manifest.extras("a.frag"), ["a_passthrough.geom".to_string()]);
        assert!(manifest.extras("b.frag").is_empty());

        let text = serde_json::to_string(&manifest).unwrap();
        assert_eq!(serde_json::from_str::<DependencyManifest>(&text).unwrap(), manifest);

        manifest.forget("a.frag");
        assert!(manifest.dependencies("a.frag").is_none());
        assert!(manifest.extras("a.frag").is_empty());
        // manifests without synthesized stages keep the plain layout
        let plain: DependencyManifest = serde_json::from_str(r#"{"entries":{}}"#).unwrap();
        assert_eq!(plain, DependencyManifest::default());
        assert!(!serde_json::to_string(&plain).unwrap().contains("extras"));
    }

    #[test]
    fn test_missing_extra_outputs_are_stale() {
        let dir = temp_dir("extras");
        let now = SystemTime::now();
        let src = dir.join("a.fsl");
        let out = dir.join("a.frag");
        let geom = dir.join("a_passthrough.geom");
        let bin = dir.join("a.frag.bin");
        let geom_bin = dir.join("a_passthrough.geom.bin");
        touch(&src, now - Duration::from_secs(60));
        touch(&out, now);
        touch(&geom, now);
        touch(&bin, now + Duration::from_secs(1));
        touch(&geom_bin, now + Duration::from_secs(1));

        let deps = BTreeSet::from([src.clone()]);
        let mut manifest = DependencyManifest::default();
        manifest.record("a.frag", &deps);
        let sources = [geom.clone()];
        let containers = [geom_bin.clone()];
        let job = JobFiles {
            filename: "a.frag",
            dependencies: &deps,
            generated: &out,
            container: Some(&bin),
            extra_sources: &sources,
            extra_containers: &containers,
        };
        assert_eq!(staleness(&manifest, true, &job), None);

        std::fs::remove_file(&geom_bin).unwrap();
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::MissingBinary));
        touch(&geom_bin, now - Duration::from_secs(5));
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::MissingBinary));
        touch(&geom_bin, now + Duration::from_secs(1));

        std::fs::remove_file(&geom).unwrap();
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::MissingOutput));
    }

    #[test]
    fn test_staleness_rules() {
        let dir = temp_dir("stale");
        let now = SystemTime::now();
        let old = now - Duration::from_secs(60);
        let src = dir.join("a.fsl");
        let out = dir.join("a.vert");
        let bin = dir.join("a.vert.bin");
        touch(&src, old);
        touch(&out, now);

        let deps = BTreeSet::from([src.clone()]);
        let mut manifest = DependencyManifest::default();
        let job = JobFiles {
            filename: "a.vert",
            dependencies: &deps,
            generated: &out,
            container: None,
            extra_sources: &[],
            extra_containers: &[],
        };

        assert_eq!(staleness(&manifest, false, &job), Some(StaleReason::Forced));
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::NotRecorded));
        manifest.record("a.vert", &deps);
        assert_eq!(staleness(&manifest, true, &job), None);

        let other = BTreeSet::from([src.clone(), dir.join("b.fsl")]);
        let changed = JobFiles { dependencies: &other, ..job };
        assert_eq!(staleness(&manifest, true, &changed), Some(StaleReason::DependenciesChanged));

        let compiled = JobFiles { container: Some(&bin), ..job };
        assert_eq!(staleness(&manifest, true, &compiled), Some(StaleReason::MissingBinary));
        touch(&bin, now + Duration::from_secs(1));
        assert_eq!(staleness(&manifest, true, &compiled), None);

        touch(&src, now + Duration::from_secs(5));
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::NewerDependency(src.clone())));

        std::fs::remove_file(&out).unwrap();
        assert_eq!(staleness(&manifest, true, &job), Some(StaleReason::MissingOutput));
    }
}
