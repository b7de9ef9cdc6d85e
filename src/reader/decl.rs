//! Declaration model shared by every generator
//!
//! Author: Moroya Sakamoto

use super::macros::{array_base_name, macro_args, macro_name, ArrayLen};
use crate::error::SourceLocation;
use crate::types::UpdateFrequency;

// ============================================================================
// Resources
// ============================================================================

/// Access mode of a buffer or storage image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read only
    Read,
    /// Write only
    Write,
    /// Read and write
    ReadWrite,
    /// Read and write, coherent across invocations
    Coherent,
    /// Read and write in rasterizer order
    RasterOrdered,
}

impl Access {
    /// True unless read only
    #[inline(always)]
    pub fn is_writable(self) -> bool {
        self != Access::Read
    }
}

/// Class of a resource, derived from its declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `SamplerState`, `SamplerComparisonState`
    Sampler,
    /// Sampled textures (`Tex2D`, `TexCube`, `Depth2D`, ...)
    Texture,
    /// Storage images (`RTex*`, `WTex*`, `RWTex*`, `RasterizerOrderedTex*`)
    StorageTexture(Access),
    /// Structured buffers
    Buffer(Access),
    /// Byte-address buffers
    ByteBuffer(Access),
    /// Ray tracing acceleration structure
    AccelerationStructure,
}

impl ResourceKind {
    /// Classify a type as written in `RES(type, ...)`
    pub fn classify(ty: &str) -> ResourceKind {
        let name = macro_name(ty);
        if name.contains("SamplerState") || name.contains("SamplerComparisonState") {
            return ResourceKind::Sampler;
        }
        if name.contains("AccelerationStructure") {
            return ResourceKind::AccelerationStructure;
        }
        if name.contains("Buffer") {
            let access = if name.starts_with("RasterizerOrdered") {
                Access::RasterOrdered
            } else if name.contains("Coherent") {
                Access::Coherent
            } else if name.starts_with("RW") {
                Access::ReadWrite
            } else if name.starts_with('W') {
                Access::Write
            } else {
                Access::Read
            };
            return if name.ends_with("ByteBuffer") {
                ResourceKind::ByteBuffer(access)
            } else {
                ResourceKind::Buffer(access)
            };
        }
        let storage = if name.starts_with("RasterizerOrderedTex") {
            Some(Access::RasterOrdered)
        } else if name.starts_with("RWTex") {
            Some(Access::ReadWrite)
        } else if name.starts_with("WTex") {
            Some(Access::Write)
        } else if name.starts_with("RTex") {
            Some(Access::Read)
        } else {
            None
        };
        match storage {
            Some(access) => ResourceKind::StorageTexture(access),
            None => ResourceKind::Texture,
        }
    }

    /// Resources that must be bound as unordered-access views
    pub fn is_read_write(self) -> bool {
        match self {
            ResourceKind::StorageTexture(_) => true,
            ResourceKind::Buffer(a) | ResourceKind::ByteBuffer(a) => a.is_writable(),
            _ => false,
        }
    }

    /// Structured or byte-address buffer
    #[inline(always)]
    pub fn is_buffer(self) -> bool {
        matches!(self, ResourceKind::Buffer(_) | ResourceKind::ByteBuffer(_))
    }
}

/// `RES(type, name, frequency, register, binding);`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDecl {
    /// Type text (`Tex2D(float4)`)
    pub ty: String,
    /// Name, possibly array-suffixed
    pub name: String,
    /// Update frequency tag
    pub frequency: UpdateFrequency,
    /// Free-form register/modifier slot
    pub register: String,
    /// Raw binding tag (`binding = 3`)
    pub binding: String,
    /// Resolved array length
    pub len: ArrayLen,
    /// Declaration site
    pub location: SourceLocation,
}

impl ResourceDecl {
    /// Name without array suffix
    pub fn base_name(&self) -> &str {
        array_base_name(&self.name)
    }

    /// Resource class
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::classify(&self.ty)
    }

    /// Explicit binding number from the binding tag, if any
    pub fn binding_index(&self) -> Option<u32> {
        parse_binding(&self.binding)
    }

    /// Element type of `Buffer(T)` / `Tex2D(T)`
    pub fn element_type(&self) -> Option<String> {
        macro_args(&self.ty).into_iter().next()
    }

    /// Type name without template argument (`Tex2D`)
    pub fn type_name(&self) -> &str {
        macro_name(&self.ty)
    }
}

/// Number following `=` in a binding tag, or the tag itself when numeric
pub fn parse_binding(tag: &str) -> Option<u32> {
    let value = match tag.rfind('=') {
        Some(i) => &tag[i + 1..],
        None => tag,
    };
    value.trim().parse().ok()
}

// ============================================================================
// Structs and constant blocks
// ============================================================================

/// `DATA(type, name, semantic);`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    /// Type text, possibly `FLAT(T)`
    pub ty: String,
    /// Field name, possibly array-suffixed
    pub name: String,
    /// Semantic text, `None` for no semantic
    pub semantic: String,
    /// Resolved array length
    pub len: ArrayLen,
}

impl StructField {
    /// Field is declared `FLAT(T)`
    pub fn is_flat(&self) -> bool {
        macro_name(&self.ty) == "FLAT"
    }

    /// Type without the `FLAT(...)` wrapper
    pub fn base_type(&self) -> String {
        if self.is_flat() {
            macro_args(&self.ty).into_iter().next().unwrap_or_default()
        } else {
            self.ty.clone()
        }
    }

    /// Upper-case semantic
    pub fn semantic_upper(&self) -> String {
        self.semantic.to_uppercase()
    }

    /// Field carries no semantic
    pub fn has_semantic(&self) -> bool {
        !self.semantic.is_empty() && self.semantic != "None"
    }

    /// Name without array suffix
    pub fn base_name(&self) -> &str {
        array_base_name(&self.name)
    }
}

/// `STRUCT(name) { ... };`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    /// Struct name
    pub name: String,
    /// Ordered fields
    pub fields: Vec<StructField>,
    /// Declaration site
    pub location: SourceLocation,
}

/// `CBUFFER(name, frequency, register, binding) { ... };`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CBufferDecl {
    /// Block name
    pub name: String,
    /// Update frequency tag
    pub frequency: UpdateFrequency,
    /// Register slot
    pub register: String,
    /// Raw binding tag
    pub binding: String,
    /// Ordered fields
    pub fields: Vec<StructField>,
    /// Declaration site
    pub location: SourceLocation,
}

/// `PUSH_CONSTANT(name, register) { ... };`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantDecl {
    /// Block name
    pub name: String,
    /// Register slot
    pub register: String,
    /// Ordered fields
    pub fields: Vec<StructField>,
    /// Declaration site
    pub location: SourceLocation,
}

/// `GroupShared(type, name);`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSharedDecl {
    /// Element type
    pub ty: String,
    /// Name, possibly array-suffixed
    pub name: String,
    /// Resolved array length
    pub len: ArrayLen,
}

impl GroupSharedDecl {
    /// Name without array suffix
    pub fn base_name(&self) -> &str {
        array_base_name(&self.name)
    }
}

// ============================================================================
// Entry arguments
// ============================================================================

/// Built-in semantic wrappers recognized as flat entry arguments
pub const FLAT_SEMANTICS: [&str; 14] = [
    "SV_VERTEXID",
    "SV_INSTANCEID",
    "SV_GROUPID",
    "SV_DISPATCHTHREADID",
    "SV_GROUPTHREADID",
    "SV_GROUPINDEX",
    "SV_SAMPLEINDEX",
    "SV_PRIMITIVEID",
    "SV_POSITION",
    "SV_OUTPUTCONTROLPOINTID",
    "SV_DOMAINLOCATION",
    "SV_SHADINGRATE",
    "SV_ISFRONTFACE",
    "SV_COVERAGE",
];

/// Flat semantic a type text starts with, if any
pub fn flat_semantic(ty: &str) -> Option<&'static str> {
    let upper = ty.trim().to_uppercase();
    FLAT_SEMANTICS.iter().copied().find(|s| upper.starts_with(s))
}

/// Built-in entry argument such as `SV_VertexID(uint) vertexId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatArg {
    /// Upper-case semantic (`SV_VERTEXID`)
    pub semantic: &'static str,
    /// Type text as written (`SV_VertexID(uint)`)
    pub raw_type: String,
    /// Wrapped value type (`uint`)
    pub ty: String,
    /// Variable name
    pub var: String,
}

/// Struct-typed entry argument such as `VSInput(In)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructArg {
    /// Struct type
    pub ty: String,
    /// Variable name
    pub var: String,
}

/// Classified entry argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryArg {
    /// Declared-struct input
    Struct(StructArg),
    /// Built-in
    Flat(FlatArg),
}
