//! Feature flags and wave-operation flags
//!
//! Author: Moroya Sakamoto

use super::Platform;
use bitflags::bitflags;
use std::collections::BTreeSet;
use std::fmt;

/// Capability flag attached to a stage block (`#pragma FT_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    /// 64-bit atomics
    Atomics64,
    /// Descriptor-heap style dynamic resources
    DynamicResources,
    /// Ray queries / acceleration structures
    Raytracing,
    /// Variable rate shading
    Vrs,
    /// Single-pass stereo rendering
    Multiview,
    /// Metal indirect command buffers
    Icb,
    /// Invariant position output
    Invariant,
    /// Primitive id forwarded to fragment shaders
    PrimId,
    /// Metal: bind every resource directly instead of through argument buffers
    NoArgumentBuffers,
}

impl Feature {
    /// Every feature
    pub const ALL: [Feature; 9] = [
        Feature::Atomics64,
        Feature::DynamicResources,
        Feature::Raytracing,
        Feature::Vrs,
        Feature::Multiview,
        Feature::Icb,
        Feature::Invariant,
        Feature::PrimId,
        Feature::NoArgumentBuffers,
    ];

    /// Name as written in pragmas and defines
    pub fn name(self) -> &'static str {
        match self {
            Feature::Atomics64 => "FT_ATOMICS_64",
            Feature::DynamicResources => "FT_DYNAMIC_RESOURCES",
            Feature::Raytracing => "FT_RAYTRACING",
            Feature::Vrs => "FT_VRS",
            Feature::Multiview => "FT_MULTIVIEW",
            Feature::Icb => "FT_ICB",
            Feature::Invariant => "FT_INVARIANT",
            Feature::PrimId => "FT_PRIM_ID",
            Feature::NoArgumentBuffers => "FT_NO_AB",
        }
    }

    /// Parse an `FT_*` name
    pub fn parse(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Whether the feature means anything on a platform
    pub fn supported_on(self, platform: Platform) -> bool {
        use Platform::*;
        match self {
            Feature::Atomics64 => {
                matches!(platform, Direct3D12 | Scarlett | Prospero | Vulkan | Macos | Ios)
            }
            Feature::DynamicResources => matches!(platform, Direct3D12 | Scarlett | Prospero | Vulkan),
            Feature::Raytracing => {
                matches!(platform, Direct3D12 | Scarlett | Prospero | Vulkan | Macos | Ios)
            }
            Feature::Vrs => matches!(platform, Direct3D12 | Scarlett | Prospero | Vulkan),
            Feature::Multiview => platform == Quest,
            Feature::Icb | Feature::NoArgumentBuffers => matches!(platform, Macos | Ios),
            Feature::Invariant | Feature::PrimId => true,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// FeatureSet
// ============================================================================

/// Immutable snapshot of enabled features
///
/// Pragmas never mutate a set in place; `with`/`without` return new
/// snapshots so each stage block keeps exactly what was active when it was
/// opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet {
    features: BTreeSet<Feature>,
}

impl FeatureSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with `feature` added
    #[must_use]
    pub fn with(&self, feature: Feature) -> Self {
        let mut features = self.features.clone();
        features.insert(feature);
        Self { features }
    }

    /// Set with `feature` removed
    #[must_use]
    pub fn without(&self, feature: Feature) -> Self {
        let mut features = self.features.clone();
        features.remove(&feature);
        Self { features }
    }

    /// Union of two snapshots
    #[must_use]
    pub fn union(&self, other: &FeatureSet) -> Self {
        Self { features: self.features.union(&other.features).copied().collect() }
    }

    /// Features meaningful on `platform`
    #[must_use]
    pub fn masked_for(&self, platform: Platform) -> Self {
        Self {
            features: self.features.iter().copied().filter(|f| f.supported_on(platform)).collect(),
        }
    }

    /// Membership test
    #[inline(always)]
    pub fn contains(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Iterate in a stable order
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    /// True when no feature is enabled
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self { features: iter.into_iter().collect() }
    }
}

// ============================================================================
// Wave operations
// ============================================================================

bitflags! {
    /// Wave / subgroup operation classes requested by `ENABLE_WAVEOPS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaveOpsFlags: u32 {
        /// Lane index, lane count, elect
        const BASIC = 1 << 0;
        /// Any/all votes
        const VOTE = 1 << 1;
        /// Reductions and prefix operations
        const ARITHMETIC = 1 << 2;
        /// Ballot
        const BALLOT = 1 << 3;
        /// Shuffle
        const SHUFFLE = 1 << 4;
        /// Relative shuffle
        const SHUFFLE_RELATIVE = 1 << 5;
        /// Clustered operations
        const CLUSTERED = 1 << 6;
        /// Quad operations
        const QUAD = 1 << 7;
        /// NV partitioned operations
        const PARTITIONED_NV = 1 << 8;
    }
}

impl WaveOpsFlags {
    /// Parse one flag name as written in FSL
    pub fn parse_flag(name: &str) -> Option<WaveOpsFlags> {
        let flag = match name.trim() {
            "WAVE_OPS_NONE" => WaveOpsFlags::empty(),
            "WAVE_OPS_BASIC_BIT" => WaveOpsFlags::BASIC,
            "WAVE_OPS_VOTE_BIT" => WaveOpsFlags::VOTE,
            "WAVE_OPS_ARITHMETIC_BIT" => WaveOpsFlags::ARITHMETIC,
            "WAVE_OPS_BALLOT_BIT" => WaveOpsFlags::BALLOT,
            "WAVE_OPS_SHUFFLE_BIT" => WaveOpsFlags::SHUFFLE,
            "WAVE_OPS_SHUFFLE_RELATIVE_BIT" => WaveOpsFlags::SHUFFLE_RELATIVE,
            "WAVE_OPS_CLUSTERED_BIT" => WaveOpsFlags::CLUSTERED,
            "WAVE_OPS_QUAD_BIT" => WaveOpsFlags::QUAD,
            "WAVE_OPS_PARTITIONED_BIT_NV" => WaveOpsFlags::PARTITIONED_NV,
            "WAVE_OPS_ALL" => WaveOpsFlags::all(),
            _ => return None,
        };
        Some(flag)
    }

    /// Parse a `|`-joined flag list; `Err` carries the unknown name
    pub fn parse_list(list: &str) -> Result<WaveOpsFlags, String> {
        if list.trim().is_empty() {
            return Ok(WaveOpsFlags::all());
        }
        list.split('|').try_fold(WaveOpsFlags::empty(), |acc, name| {
            WaveOpsFlags::parse_flag(name)
                .map(|f| acc | f)
                .ok_or_else(|| name.trim().to_string())
        })
    }
}
