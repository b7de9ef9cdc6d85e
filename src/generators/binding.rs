//! Binding allocators
//!
//! Every target numbers resources differently: HLSL counts registers per
//! class and space, Vulkan takes explicit bindings from the source and only
//! checks them, Metal counts buffer/texture/sampler slots and numbers
//! argument-buffer members separately. All of them answer the same
//! question through [`BindingAllocator::allocate`].
//!
//! Author: Moroya Sakamoto

use crate::reader::{ResourceDecl, ResourceKind};
use std::collections::HashMap;

/// Binding class of a resource, independent of target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Sampler object
    Sampler,
    /// Sampled texture
    Texture,
    /// Storage image
    StorageTexture,
    /// Read-only buffer
    Buffer,
    /// Writable buffer
    StorageBuffer,
    /// Constant / uniform buffer
    ConstantBuffer,
    /// Acceleration structure
    AccelerationStructure,
}

impl BindingKind {
    /// Class of a declared resource
    pub fn of(resource: &ResourceDecl) -> BindingKind {
        match resource.kind() {
            ResourceKind::Sampler => BindingKind::Sampler,
            ResourceKind::Texture => BindingKind::Texture,
            ResourceKind::StorageTexture(_) => BindingKind::StorageTexture,
            ResourceKind::Buffer(a) | ResourceKind::ByteBuffer(a) if a.is_writable() => BindingKind::StorageBuffer,
            ResourceKind::Buffer(_) | ResourceKind::ByteBuffer(_) => BindingKind::Buffer,
            ResourceKind::AccelerationStructure => BindingKind::AccelerationStructure,
        }
    }

    /// HLSL register class letter
    pub fn hlsl_register_class(self) -> char {
        match self {
            BindingKind::Sampler => 's',
            BindingKind::ConstantBuffer => 'b',
            BindingKind::StorageTexture | BindingKind::StorageBuffer => 'u',
            BindingKind::Texture | BindingKind::Buffer | BindingKind::AccelerationStructure => 't',
        }
    }
}

/// One past the last of `count` slots starting at `first`
#[inline(always)]
fn range_end(first: u32, count: u32) -> Result<u32, String> {
    first
        .checked_add(count.max(1))
        .ok_or_else(|| format!("{} slots starting at {} overflow the binding range", count, first))
}

/// Uniform allocation interface shared by every target
pub trait BindingAllocator {
    /// Reserve `count` consecutive slots of `kind` in `space`, returning the first
    fn allocate(&mut self, kind: BindingKind, space: u32, count: u32) -> Result<u32, String>;
}

// ============================================================================
// HLSL
// ============================================================================

/// Sequential `s`/`t`/`u`/`b` registers per register space
#[derive(Debug, Default)]
pub struct HlslRegisters {
    next: HashMap<(char, u32), u32>,
    closed: HashMap<(char, u32), String>,
}

impl HlslRegisters {
    /// Fresh allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Unbounded arrays occupy the rest of their class in a space
    pub fn close(&mut self, kind: BindingKind, space: u32, owner: &str) {
        self.closed.insert((kind.hlsl_register_class(), space), owner.to_string());
    }
}

impl BindingAllocator for HlslRegisters {
    fn allocate(&mut self, kind: BindingKind, space: u32, count: u32) -> Result<u32, String> {
        let key = (kind.hlsl_register_class(), space);
        if let Some(owner) = self.closed.get(&key) {
            return Err(format!(
                "register class '{}' in space {} is taken by unbounded array '{}'",
                key.0, space, owner
            ));
        }
        let next = self.next.entry(key).or_insert(0);
        let first = *next;
        *next = range_end(first, count)?;
        Ok(first)
    }
}

// ============================================================================
// Vulkan
// ============================================================================

/// Explicit Vulkan bindings, checked for overlap within a set
#[derive(Debug, Default)]
pub struct VulkanBindings {
    used: HashMap<u32, Vec<(u32, u32, String)>>,
}

impl VulkanBindings {
    /// Fresh allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an explicit binding range
    pub fn reserve(&mut self, set: u32, binding: u32, count: u32, owner: &str) -> Result<u32, String> {
        let end = range_end(binding, count)?;
        let ranges = self.used.entry(set).or_default();
        if let Some((_, _, other)) = ranges.iter().find(|(s, e, _)| binding < *e && *s < end) {
            return Err(format!(
                "'{}' at set {} binding {} overlaps the bindings of '{}'",
                owner, set, binding, other
            ));
        }
        ranges.push((binding, end, owner.to_string()));
        Ok(binding)
    }
}

impl BindingAllocator for VulkanBindings {
    /// Next binding after every range already used in the set
    fn allocate(&mut self, _kind: BindingKind, space: u32, count: u32) -> Result<u32, String> {
        let first = self
            .used
            .get(&space)
            .and_then(|ranges| ranges.iter().map(|(_, end, _)| *end).max())
            .unwrap_or(0);
        self.reserve(space, first, count, "<implicit>")
    }
}

// ============================================================================
// Metal
// ============================================================================

/// Buffer slots 0..=3 hold argument buffers, 4 push constants, 5 the root CBV
pub const METAL_FIRST_DIRECT_BUFFER: u32 = 6;

/// Buffer slot of push constants
pub const METAL_PUSH_CONSTANT_BUFFER: u32 = 4;

/// Buffer slot of root constant buffers
pub const METAL_ROOT_CBV_BUFFER: u32 = 5;

/// Direct Metal `[[buffer]]`/`[[texture]]`/`[[sampler]]` slots
#[derive(Debug)]
pub struct MetalBindings {
    buffer: u32,
    texture: u32,
    sampler: u32,
}

impl Default for MetalBindings {
    fn default() -> Self {
        Self { buffer: METAL_FIRST_DIRECT_BUFFER, texture: 0, sampler: 0 }
    }
}

impl MetalBindings {
    /// Fresh allocator
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingAllocator for MetalBindings {
    fn allocate(&mut self, kind: BindingKind, _space: u32, count: u32) -> Result<u32, String> {
        let counter = match kind {
            BindingKind::Sampler => &mut self.sampler,
            BindingKind::Texture | BindingKind::StorageTexture => &mut self.texture,
            _ => &mut self.buffer,
        };
        let first = *counter;
        *counter = range_end(first, count)?;
        Ok(first)
    }
}

/// `[[id(n)]]` numbering of argument-buffer members, one sequence per buffer
#[derive(Debug, Default)]
pub struct ArgumentBufferIds {
    next: HashMap<u32, u32>,
}

impl ArgumentBufferIds {
    /// Fresh allocator
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingAllocator for ArgumentBufferIds {
    fn allocate(&mut self, _kind: BindingKind, space: u32, count: u32) -> Result<u32, String> {
        let next = self.next.entry(space).or_insert(0);
        let first = *next;
        *next = range_end(first, count)?;
        Ok(first)
    }
}
