//! Metal Shading Language generator
//!
//! Metal has no global resource declarations. Everything the source binds
//! with `RES`, `CBUFFER` or `PUSH_CONSTANT` becomes an entry parameter:
//!
//! - resources of frequency `UPDATE_FREQ_NONE..=UPDATE_FREQ_PER_DRAW` that
//!   are not writable are gathered into one argument buffer per frequency,
//!   bound at `[[buffer(0..=3)]]` with members numbered by `[[id(n)]]`;
//! - push constants sit at `[[buffer(4)]]`, root constant buffers at 5;
//! - everything else binds directly, buffers from slot 6, textures and
//!   samplers from 0.
//!
//! `Get(x)` expands to `_Get_x`, defined per resource to reach it through
//! the parameter that carries it. Helper functions get the same parameters
//! appended to their signatures, found by the [`CallGraph`].
//!
//! Author: Moroya Sakamoto

use super::binding::{
    ArgumentBufferIds, BindingAllocator, BindingKind, MetalBindings, METAL_PUSH_CONSTANT_BUFFER, METAL_ROOT_CBV_BUFFER,
};
use super::fn_table::{CallGraph, LANE_INDEX};
use super::{
    common_defines, entry_tail, get_alias, header_comment, replace_invocation, replace_return, Emitter, GenerateConfig,
    GeneratedShader, METAL_HEADER,
};
use crate::error::FslError;
use crate::reader::macros::{array_dim, indentation, ArrayLen};
use crate::reader::{
    BlockKind, CBufferDecl, LineEvent, PushConstantDecl, ResourceDecl, ResourceKind, Scanner, Shader, StructField,
};
use crate::types::{Derivative, Feature, Platform, ShaderBinary, SourceLine, Stage, UpdateFrequency};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Struct wrapping a non-struct value returned by an entry point
pub const STAGE_OUTPUT: &str = "FSLStageOutput";

/// Generate Metal for `platform`
pub fn generate(
    platform: Platform,
    config: &GenerateConfig,
    binary: &ShaderBinary,
    shader: &Shader,
) -> Result<GeneratedShader, FslError> {
    if !matches!(shader.stage, Stage::Vert | Stage::Frag | Stage::Comp) {
        return Err(FslError::unsupported(binary.location(), platform, format!("{} stage", shader.stage)));
    }
    for flat in shader.flat_args() {
        if flat_attribute(flat.semantic).is_none() {
            return Err(FslError::unsupported(shader.entry_location(), platform, flat.raw_type.clone()));
        }
    }
    if shader.struct_args().count() > 1 {
        return Err(FslError::unsupported(shader.entry_location(), platform, "more than one stage input struct"));
    }

    let layout = MetalLayout::build(platform, binary, shader)?;
    let mut texts: Vec<String> = shader.lines.iter().map(|l| l.text.clone()).collect();
    let graph = CallGraph::build(&texts, shader.entry_line).map_err(|overload| {
        let location = shader
            .lines
            .get(overload.line)
            .map(SourceLine::location)
            .unwrap_or_else(|| binary.location());
        FslError::unsupported(location, platform, format!("overloaded function '{}'", overload.name))
    })?;
    let entry_refs = graph.references_of(&texts[shader.entry_line.min(texts.len())..]);
    let used: BTreeSet<String> = entry_refs.iter().filter_map(|r| layout.paths.get(r).cloned()).collect();
    graph.expand(&mut texts, |name| layout.function_params(graph.references(name)));
    debug!(
        "{}: {} has {} helper functions, entry reads {} parameters",
        platform,
        binary.filename,
        graph.functions().len(),
        used.len()
    );

    let mut gen = MetalGenerator::new(platform, config, binary, shader, layout, used);
    for (index, (line, text)) in shader.lines.iter().zip(&texts).enumerate() {
        gen.line(index, line, text)?;
    }
    gen.finish()
}

// ============================================================================
// Attributes
// ============================================================================

/// Metal attribute of a flat entry argument
fn flat_attribute(semantic: &str) -> Option<&'static str> {
    match semantic {
        "SV_VERTEXID" => Some("vertex_id"),
        "SV_INSTANCEID" => Some("instance_id"),
        "SV_GROUPID" => Some("threadgroup_position_in_grid"),
        "SV_DISPATCHTHREADID" => Some("thread_position_in_grid"),
        "SV_GROUPTHREADID" => Some("thread_position_in_threadgroup"),
        "SV_GROUPINDEX" => Some("thread_index_in_threadgroup"),
        "SV_SAMPLEINDEX" => Some("sample_id"),
        "SV_PRIMITIVEID" => Some("primitive_id"),
        "SV_POSITION" => Some("position"),
        "SV_ISFRONTFACE" => Some("front_facing"),
        "SV_COVERAGE" => Some("sample_mask"),
        _ => None,
    }
}

/// Role a declared struct plays in the entry interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructRole {
    VertexInput,
    FragmentInput,
    Output,
    Plain,
}

/// Attribute suffix of a struct field, `Err` for semantics Metal lacks
fn field_attribute(role: StructRole, field: &StructField, attribute: &mut u32) -> Result<String, String> {
    let semantic = field.semantic_upper();
    let flat = if field.is_flat() { " [[flat]]" } else { "" };
    let attr = match role {
        StructRole::Plain => String::new(),
        StructRole::VertexInput => {
            let attr = format!(" [[attribute({})]]", attribute);
            *attribute += field.len.slots();
            attr
        }
        StructRole::FragmentInput => match semantic.as_str() {
            "SV_POSITION" => " [[position]]".to_string(),
            "SV_RENDERTARGETARRAYINDEX" => " [[render_target_array_index]]".to_string(),
            _ => flat.to_string(),
        },
        StructRole::Output => match semantic.as_str() {
            "SV_POSITION" => " [[position]]".to_string(),
            "SV_POINTSIZE" => " [[point_size]]".to_string(),
            "SV_DEPTH" => " [[depth(any)]]".to_string(),
            "SV_RENDERTARGETARRAYINDEX" => " [[render_target_array_index]]".to_string(),
            "SV_COVERAGE" => " [[sample_mask]]".to_string(),
            "SV_SHADINGRATE" => return Err(field.semantic.clone()),
            s => match s.strip_prefix("SV_TARGET") {
                Some(n) => format!(" [[color({})]]", n.parse::<u32>().unwrap_or(0)),
                None => flat.to_string(),
            },
        },
    };
    Ok(attr)
}

// ============================================================================
// Parameter layout
// ============================================================================

/// Argument buffer of one update frequency
#[inline(always)]
fn argument_buffer(freq: UpdateFrequency) -> String {
    format!("AB_{}", freq.tag())
}

/// Frequency is served by an argument buffer slot
#[inline(always)]
fn has_argument_buffer(freq: UpdateFrequency) -> bool {
    freq.index() <= 3
}

/// A value an entry point receives and helper functions are passed
#[derive(Debug, Clone)]
struct Param {
    /// Declaration appended to helper signatures
    decl: String,
    /// Entry parameter with its binding, `None` for entry locals
    entry: Option<String>,
}

/// Binding decisions for every declaration of a shader
#[derive(Debug, Default)]
struct MetalLayout {
    /// `Get(name)` to the path of the parameter carrying it
    paths: HashMap<String, String>,
    /// Parameters by path
    params: HashMap<String, Param>,
    /// Entry parameter order
    order: Vec<String>,
    /// Argument buffer members per frequency
    argument_buffers: BTreeMap<UpdateFrequency, Vec<String>>,
    /// `#define _Get_...` lines per declaring source line
    aliases: HashMap<usize, Vec<String>>,
}

impl MetalLayout {
    fn build(platform: Platform, binary: &ShaderBinary, shader: &Shader) -> Result<Self, FslError> {
        let no_ab = binary.features.masked_for(platform).contains(Feature::NoArgumentBuffers);
        let mut layout = MetalLayout::default();
        let mut slots = MetalBindings::new();
        let mut ids = ArgumentBufferIds::new();
        let mut scanner = Scanner::new();
        let mut direct = Vec::new();

        for (index, line) in shader.lines.iter().enumerate() {
            match scanner.next(&line.text) {
                LineEvent::Resource { .. } => {
                    let location = line.location();
                    let Some(resource) = shader.resources.iter().find(|r| r.location == location) else {
                        continue;
                    };
                    let embed = has_argument_buffer(resource.frequency) && !resource.kind().is_read_write() && !no_ab;
                    if embed {
                        layout.embed_resource(platform, index, resource, &mut ids)?;
                    } else {
                        let path = layout.direct_resource(platform, index, resource, &mut slots)?;
                        direct.push(path);
                    }
                }
                LineEvent::BlockOpen { kind: BlockKind::CBuffer, .. } => {
                    let location = line.location();
                    let Some(cbuffer) = shader.cbuffers.iter().find(|c| c.location == location) else {
                        continue;
                    };
                    let root = cbuffer.name.to_lowercase().contains("rootcbv");
                    if has_argument_buffer(cbuffer.frequency) && !no_ab && !root {
                        layout.embed_cbuffer(index, cbuffer, &mut ids)?;
                    } else {
                        let slot = if root {
                            METAL_ROOT_CBV_BUFFER
                        } else {
                            slots
                                .allocate(BindingKind::ConstantBuffer, 0, 1)
                                .map_err(|m| FslError::declaration(location.clone(), m))?
                        };
                        direct.push(layout.direct_block(index, &cbuffer.name, &cbuffer.fields, slot));
                    }
                }
                LineEvent::BlockOpen { kind: BlockKind::PushConstant, .. } => {
                    let location = line.location();
                    if let Some(push) = shader.push_constants.iter().find(|p| p.location == location) {
                        direct.push(layout.push_constant(index, push));
                    }
                }
                LineEvent::GroupShared { args } => {
                    let Some(shared) = args.get(1).and_then(|name| shader.group_shared.iter().find(|g| &g.name == name))
                    else {
                        continue;
                    };
                    let base = shared.base_name().to_string();
                    let decl = match array_dim(&shared.name) {
                        Some(dim) => format!("threadgroup {} (&{})[{}]", shared.ty, base, dim),
                        None => format!("threadgroup {}& {}", shared.ty, base),
                    };
                    layout.aliases.entry(index).or_default().push(format!("#define {} {}", get_alias(&base), base));
                    layout.paths.insert(base.clone(), base.clone());
                    layout.params.insert(base, Param { decl, entry: None });
                }
                _ => {}
            }
        }

        layout.paths.insert(LANE_INDEX.to_string(), LANE_INDEX.to_string());
        layout.params.insert(
            LANE_INDEX.to_string(),
            Param {
                decl: format!("const uint {}", LANE_INDEX),
                entry: Some(format!("uint {} [[thread_index_in_simdgroup]]", LANE_INDEX)),
            },
        );
        layout.order.push(LANE_INDEX.to_string());

        for freq in layout.argument_buffers.keys().copied().collect::<Vec<_>>() {
            let name = argument_buffer(freq);
            layout.params.insert(
                name.clone(),
                Param {
                    decl: format!("constant struct {0}& {0}", name),
                    entry: Some(format!("constant struct {0}& {0} [[buffer({1})]]", name, freq.index())),
                },
            );
            layout.order.push(name);
        }
        layout.order.extend(direct);
        Ok(layout)
    }

    fn embed_resource(
        &mut self,
        platform: Platform,
        index: usize,
        resource: &ResourceDecl,
        ids: &mut ArgumentBufferIds,
    ) -> Result<(), FslError> {
        if resource.len == ArrayLen::Unbounded {
            return Err(FslError::unsupported(
                resource.location.clone(),
                platform,
                format!("unbounded resource array '{}'", resource.name),
            ));
        }
        let base = resource.base_name().to_string();
        let ab = argument_buffer(resource.frequency);
        let id = ids
            .allocate(BindingKind::of(resource), resource.frequency.index(), resource.len.slots())
            .map_err(|m| FslError::declaration(resource.location.clone(), m))?;
        self.argument_buffers
            .entry(resource.frequency)
            .or_default()
            .push(format!("\t{} {} [[id({})]];", resource.ty, resource.name, id));
        self.aliases.entry(index).or_default().push(format!("#define {} {}.{}", get_alias(&base), ab, base));
        self.paths.insert(base, ab);
        Ok(())
    }

    fn direct_resource(
        &mut self,
        platform: Platform,
        index: usize,
        resource: &ResourceDecl,
        slots: &mut MetalBindings,
    ) -> Result<String, FslError> {
        let base = resource.base_name().to_string();
        let kind = resource.kind();
        let ty = match resource.len {
            ArrayLen::Scalar => resource.ty.clone(),
            ArrayLen::Fixed(n) if !kind.is_buffer() => format!("array<{}, {}>", resource.ty, n),
            _ => {
                return Err(FslError::unsupported(
                    resource.location.clone(),
                    platform,
                    format!("directly bound resource array '{}'", resource.name),
                ))
            }
        };
        let slot = slots
            .allocate(BindingKind::of(resource), 0, resource.len.slots())
            .map_err(|m| FslError::declaration(resource.location.clone(), m))?;
        let attribute = match kind {
            ResourceKind::Sampler => "sampler",
            ResourceKind::Texture | ResourceKind::StorageTexture(_) => "texture",
            _ => "buffer",
        };
        self.aliases.entry(index).or_default().push(format!("#define {} {}", get_alias(&base), base));
        self.paths.insert(base.clone(), base.clone());
        self.params.insert(
            base.clone(),
            Param {
                decl: format!("{} {}", ty, base),
                entry: Some(format!("{} {} [[{}({})]]", ty, base, attribute, slot)),
            },
        );
        Ok(base)
    }

    fn embed_cbuffer(
        &mut self,
        index: usize,
        cbuffer: &CBufferDecl,
        ids: &mut ArgumentBufferIds,
    ) -> Result<(), FslError> {
        let ab = argument_buffer(cbuffer.frequency);
        let id = ids
            .allocate(BindingKind::ConstantBuffer, cbuffer.frequency.index(), 1)
            .map_err(|m| FslError::declaration(cbuffer.location.clone(), m))?;
        self.argument_buffers
            .entry(cbuffer.frequency)
            .or_default()
            .push(format!("\tconstant struct {0}* {0} [[id({1})]];", cbuffer.name, id));
        let aliases = self.aliases.entry(index).or_default();
        for field in &cbuffer.fields {
            let name = field.base_name();
            aliases.push(format!("#define {} {}.{}->{}", get_alias(name), ab, cbuffer.name, name));
            self.paths.insert(name.to_string(), ab.clone());
        }
        Ok(())
    }

    fn direct_block(&mut self, index: usize, name: &str, fields: &[StructField], slot: u32) -> String {
        let aliases = self.aliases.entry(index).or_default();
        for field in fields {
            let field = field.base_name();
            aliases.push(format!("#define {} {}.{}", get_alias(field), name, field));
            self.paths.insert(field.to_string(), name.to_string());
        }
        self.params.insert(
            name.to_string(),
            Param {
                decl: format!("constant struct {0}& {0}", name),
                entry: Some(format!("constant struct {0}& {0} [[buffer({1})]]", name, slot)),
            },
        );
        name.to_string()
    }

    #[inline(always)]
    fn push_constant(&mut self, index: usize, push: &PushConstantDecl) -> String {
        self.direct_block(index, &push.name, &push.fields, METAL_PUSH_CONSTANT_BUFFER)
    }

    /// Parameters appended to a helper reading `refs`, in path order
    fn function_params(&self, refs: Option<&BTreeSet<String>>) -> Vec<(String, String)> {
        let Some(refs) = refs else {
            return Vec::new();
        };
        let paths: BTreeSet<&String> = refs.iter().filter_map(|r| self.paths.get(r)).collect();
        paths
            .into_iter()
            .filter_map(|path| self.params.get(path).map(|p| (p.decl.clone(), path.clone())))
            .collect()
    }

    /// Argument buffer struct declarations
    fn argument_buffer_decls(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (freq, members) in &self.argument_buffers {
            out.push(format!("struct {}", argument_buffer(*freq)));
            out.push("{".to_string());
            out.extend(members.iter().cloned());
            out.push("};".to_string());
        }
        out
    }
}

// ============================================================================
// Generator state
// ============================================================================

/// Field written by `RETURN` into the wrapper struct
struct OutputWrapper {
    field: &'static str,
    decl: &'static str,
}

struct MetalGenerator<'a> {
    platform: Platform,
    binary: &'a ShaderBinary,
    shader: &'a Shader,
    layout: MetalLayout,
    used: BTreeSet<String>,
    out: Emitter,
    scanner: Scanner,
    open_struct: Option<(String, usize)>,
    open_block: Option<usize>,
    attribute: u32,
    ab_at: Option<usize>,
    pinned: bool,
    early_fragment_tests: bool,
    group_shared: Vec<String>,
    wrapper: Option<OutputWrapper>,
}

impl<'a> MetalGenerator<'a> {
    fn new(
        platform: Platform,
        config: &GenerateConfig,
        binary: &'a ShaderBinary,
        shader: &'a Shader,
        layout: MetalLayout,
        used: BTreeSet<String>,
    ) -> Self {
        let mut out = Emitter::new(config.debug, true);
        for line in header_comment(binary) {
            out.push(line);
        }
        for line in common_defines(binary, shader, platform) {
            out.push(line);
        }
        out.extend_text(METAL_HEADER);
        out.push("");

        let wrapper = match (shader.stage, shader.returns_value()) {
            (Stage::Vert, true) => Some(OutputWrapper { field: "position", decl: "[[position]]" }),
            (Stage::Frag, true) if shader.returns_depth() => {
                Some(OutputWrapper { field: "depth", decl: "[[depth(any)]]" })
            }
            _ => None,
        };

        Self {
            platform,
            binary,
            shader,
            layout,
            used,
            out,
            scanner: Scanner::new(),
            open_struct: None,
            open_block: None,
            attribute: 0,
            ab_at: None,
            pinned: false,
            early_fragment_tests: false,
            group_shared: Vec::new(),
            wrapper,
        }
    }

    fn line(&mut self, index: usize, line: &SourceLine, text: &str) -> Result<(), FslError> {
        let indent = indentation(text).to_string();
        match self.scanner.next(&line.text) {
            LineEvent::BlockOpen { kind, args } => {
                let name = args.first().cloned().unwrap_or_default();
                match kind {
                    BlockKind::Struct => {
                        self.open_struct = Some((name, 0));
                        self.out.push(text);
                    }
                    BlockKind::CBuffer => {
                        self.open_block = Some(index);
                        self.out.push(replace_invocation(text, "CBUFFER", &format!("struct {}", name)));
                    }
                    BlockKind::PushConstant => {
                        self.open_block = Some(index);
                        self.out.push(replace_invocation(text, "PUSH_CONSTANT", &format!("struct {}", name)));
                    }
                }
            }
            LineEvent::Field { kind: BlockKind::Struct, args, .. } => {
                let decl = self.struct_field(&args, line)?;
                self.out.push(format!("{}{}", indent, decl));
            }
            LineEvent::Field { args, .. } => self.out.push(format!("{}{} {};", indent, args[0], args[1])),
            LineEvent::BlockClose(kind) => {
                self.out.push(text);
                if kind == BlockKind::Struct {
                    self.open_struct = None;
                } else if let Some(open) = self.open_block.take() {
                    self.emit_aliases(open);
                }
            }
            LineEvent::Resource { .. } => {
                self.out.push(format!("// {}", text.trim()));
                self.emit_aliases(index);
                self.out.resync(line);
            }
            LineEvent::GroupShared { args } => {
                self.group_shared.push(format!("threadgroup {} {};", args[0], args[1]));
                self.emit_aliases(index);
            }
            LineEvent::SrtBegin | LineEvent::SrtEnd | LineEvent::NonUniformBegin { .. } | LineEvent::NonUniformEnd => {
                self.out.push(format!("{}// {}", indent, text.trim()));
            }
            LineEvent::DeclareResources => {
                self.out.push(format!("// {}", text.trim()));
                self.ab_at = Some(self.out.len());
                self.pinned = true;
            }
            LineEvent::NumThreads { .. } => {
                if let Some([x, y, z]) = self.shader.num_threads {
                    self.out.push(format!("// [numthreads({}, {}, {})]", x, y, z));
                }
            }
            LineEvent::EarlyFragmentTests => self.early_fragment_tests = true,
            LineEvent::Entry { .. } => {
                self.entry(text);
                self.out.resync(line);
            }
            LineEvent::InitMain => {
                for decl in std::mem::take(&mut self.group_shared) {
                    self.out.push(format!("{}{}", indent, decl));
                }
                self.out.push(format!("{}//INIT_MAIN;", indent));
            }
            LineEvent::Return { value } => {
                let replacement = self.return_statement(value.as_deref());
                self.out.push(replace_return(text, &replacement));
                self.out.resync(line);
            }
            LineEvent::Blank | LineEvent::Comment | LineEvent::Define { .. } | LineEvent::Other => self.out.push(text),
        }
        Ok(())
    }

    fn emit_aliases(&mut self, index: usize) {
        if let Some(aliases) = self.layout.aliases.get(&index) {
            for alias in aliases {
                self.out.push(alias.clone());
            }
        }
        if !self.pinned {
            self.ab_at = Some(self.out.len());
        }
    }

    fn struct_role(&self, name: &str) -> StructRole {
        let shader = self.shader;
        if shader.output_struct().is_some_and(|s| s.name == name) {
            return StructRole::Output;
        }
        match (shader.stage, shader.struct_args().any(|a| a.ty == name)) {
            (Stage::Vert, true) => StructRole::VertexInput,
            (Stage::Frag, true) => StructRole::FragmentInput,
            _ => StructRole::Plain,
        }
    }

    fn struct_field(&mut self, args: &[String], line: &SourceLine) -> Result<String, FslError> {
        let Some((name, position)) = self.open_struct.clone() else {
            return Ok(format!("{} {};", args[0], args[1]));
        };
        self.open_struct = Some((name.clone(), position + 1));
        let shader = self.shader;
        let Some(field) = shader.struct_decl(&name).and_then(|s| s.fields.get(position)) else {
            return Ok(format!("{} {};", args[0], args[1]));
        };
        let role = self.struct_role(&name);
        let attr = field_attribute(role, field, &mut self.attribute)
            .map_err(|semantic| FslError::unsupported(line.location(), self.platform, semantic))?;
        Ok(format!("{} {}{};", field.base_type(), field.name, attr))
    }

    fn entry(&mut self, text: &str) {
        let shader = self.shader;
        let decls = self.layout.argument_buffer_decls();
        if !decls.is_empty() {
            let at = self.ab_at.unwrap_or(self.out.len());
            let mut block = vec!["// argument buffers".to_string()];
            block.extend(decls);
            self.out.insert_lines(at, block);
        }

        let ret = match (&self.wrapper, shader.return_type.as_deref()) {
            (Some(wrapper), Some(ty)) => {
                self.out.push(format!("struct {}", STAGE_OUTPUT));
                self.out.push("{");
                let ty = if shader.returns_depth() { "float" } else { ty };
                self.out.push(format!("\t{} {} {};", ty, wrapper.field, wrapper.decl));
                self.out.push("};");
                STAGE_OUTPUT.to_string()
            }
            (_, Some(ty)) if shader.stage != Stage::Comp => ty.to_string(),
            _ => "void".to_string(),
        };
        let keyword = match shader.stage {
            Stage::Vert => "vertex",
            Stage::Frag => "fragment",
            _ => "kernel",
        };

        let mut params = Vec::new();
        for arg in shader.struct_args() {
            params.push(format!("{} {} [[stage_in]]", arg.ty, arg.var));
        }
        for flat in shader.flat_args() {
            if let Some(attr) = flat_attribute(flat.semantic) {
                params.push(format!("{} {} [[{}]]", flat.ty, flat.var, attr));
            }
        }
        for path in &self.layout.order {
            let wanted = self.used.contains(path) || (path == LANE_INDEX && !shader.wave_ops.is_empty());
            if !wanted {
                continue;
            }
            if let Some(entry) = self.layout.params.get(path).and_then(|p| p.entry.as_ref()) {
                params.push(entry.clone());
            }
        }
        let dropped = self
            .layout
            .order
            .iter()
            .filter(|p| p.as_str() != LANE_INDEX && !self.used.contains(*p))
            .count();
        if dropped > 0 {
            debug!("{}: {} drops {} unreferenced entry parameters", self.platform, self.binary.filename, dropped);
        }

        if self.early_fragment_tests {
            self.out.push("[[early_fragment_tests]]");
        }
        let indent = indentation(text).to_string();
        self.out.push(format!("{}{} {} stageMain(", indent, keyword, ret));
        let count = params.len();
        for (i, param) in params.into_iter().enumerate() {
            let sep = if i + 1 < count { "," } else { "" };
            self.out.push(format!("\t{}{}", param, sep));
        }
        self.out.push(format!("){}", entry_tail(text)));
    }

    fn return_statement(&self, value: Option<&str>) -> String {
        match (value, &self.wrapper) {
            (None, _) => "return".to_string(),
            (Some(value), Some(wrapper)) => format!(
                "{{ {0} _fsl_out; _fsl_out.{1} = {2}; return _fsl_out; }}",
                STAGE_OUTPUT, wrapper.field, value
            ),
            (Some(value), None) => format!("return {}", value),
        }
    }

    fn finish(self) -> Result<GeneratedShader, FslError> {
        Ok(GeneratedShader {
            source: self.out.finish(),
            derivatives: vec![Derivative::default()],
            auxiliary: Vec::new(),
            num_threads: self.shader.num_threads,
            wave_ops: self.shader.wave_ops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::generate_source;
    use crate::types::{lines_from_text, FeatureSet};

    const VERT: &str = "\
STRUCT(VSInput)
{
\tDATA(float3, Position, POSITION);
\tDATA(float2, UV, TEXCOORD0);
};
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
\tDATA(FLAT(uint), DrawID, TEXCOORD1);
};
CBUFFER(Uniforms, UPDATE_FREQ_PER_FRAME, b0, binding = 0)
{
\tDATA(float4x4, mvp, None);
};
PUSH_CONSTANT(RootConstant, b1)
{
\tDATA(uint, drawId, None);
};
RES(Tex2D(float4), heightMap, UPDATE_FREQ_NONE, t0, binding = 1);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 2);
RES(Buffer(float4), offsets, UPDATE_FREQ_PER_FRAME, t1, binding = 3);
RES(RWBuffer(uint), counters, UPDATE_FREQ_PER_FRAME, u0, binding = 4);
RES(Tex2D(float4), unused, UPDATE_FREQ_USER, t2, binding = 5);

float height(float2 uv)
{
\treturn SampleLvlTex2D(Get(heightMap), Get(linearSampler), uv, 0).x;
}

float3 displace(float3 p, float2 uv)
{
\treturn p + float3(0, height(uv), 0) + Get(offsets)[Get(drawId)].xyz;
}

VSOutput VS_MAIN(VSInput(In), SV_VertexID(uint) vertexId)
{
\tINIT_MAIN;
\tVSOutput Out;
\tOut.Position = mul(Get(mvp), float4(displace(In.Position, In.UV), 1.0f));
\tOut.UV = In.UV;
\tOut.DrawID = Get(drawId);
\tRETURN(Out);
}
";

    fn binary(stage: Stage, filename: &str, text: &str) -> ShaderBinary {
        let mut binary = ShaderBinary::new(stage, filename, "list.fsl");
        binary.lines = lines_from_text(text, "shader.fsl");
        binary
    }

    fn msl(b: &ShaderBinary) -> String {
        generate_source(Platform::Macos, &GenerateConfig::default(), b).unwrap().source
    }

    #[test]
    fn test_argument_buffers() {
        let out = msl(&binary(Stage::Vert, "a.vert", VERT));
        assert!(out.contains("struct AB_UPDATE_FREQ_NONE\n{\n\tTex2D(float4) heightMap [[id(0)]];\n\tSamplerState linearSampler [[id(1)]];\n};"));
        assert!(out.contains("struct AB_UPDATE_FREQ_PER_FRAME\n{\n\tconstant struct Uniforms* Uniforms [[id(0)]];\n\tBuffer(float4) offsets [[id(1)]];\n};"));
        assert!(out.contains("#define _Get_heightMap AB_UPDATE_FREQ_NONE.heightMap"));
        assert!(out.contains("#define _Get_mvp AB_UPDATE_FREQ_PER_FRAME.Uniforms->mvp"));
        assert!(out.contains("\tconstant struct AB_UPDATE_FREQ_NONE& AB_UPDATE_FREQ_NONE [[buffer(0)]],"));
        assert!(out.contains("\tconstant struct AB_UPDATE_FREQ_PER_FRAME& AB_UPDATE_FREQ_PER_FRAME [[buffer(1)]],"));
        // argument buffers are declared after the last resource
        let decl = out.find("struct AB_UPDATE_FREQ_NONE").unwrap();
        assert!(decl > out.find("#define _Get_unused unused").unwrap());
        assert!(decl < out.find("float height(").unwrap());
    }

    #[test]
    fn test_direct_slots_and_push_constant() {
        let out = msl(&binary(Stage::Vert, "a.vert", VERT));
        assert!(out.contains("struct RootConstant"));
        assert!(out.contains("#define _Get_drawId RootConstant.drawId"));
        assert!(out.contains("\tconstant struct RootConstant& RootConstant [[buffer(4)]]"));
        // writable buffers bind directly even at argument buffer frequencies
        assert!(out.contains("#define _Get_counters counters"));
        assert!(!out.contains("RWBuffer(uint) counters [[id("));
    }

    #[test]
    fn test_dead_parameters_dropped() {
        let out = msl(&binary(Stage::Vert, "a.vert", VERT));
        assert!(!out.contains("unused [[texture(0)]]"));
        assert!(!out.contains("counters [[buffer(6)]]"));
        assert!(out.contains("#define _Get_unused unused"));
    }

    #[test]
    fn test_stage_io_attributes() {
        let out = msl(&binary(Stage::Vert, "a.vert", VERT));
        assert!(out.contains("\tfloat3 Position [[attribute(0)]];"));
        assert!(out.contains("\tfloat2 UV [[attribute(1)]];"));
        assert!(out.contains("\tfloat4 Position [[position]];"));
        assert!(out.contains("\tuint DrawID [[flat]];"));
        assert!(out.contains("vertex VSOutput stageMain(\n\tVSInput In [[stage_in]],\n\tuint vertexId [[vertex_id]],"));
        assert!(out.contains("\treturn Out;"));
    }

    #[test]
    fn test_helper_functions_receive_parameters() {
        let out = msl(&binary(Stage::Vert, "a.vert", VERT));
        assert!(out.contains("float height(float2 uv, constant struct AB_UPDATE_FREQ_NONE& AB_UPDATE_FREQ_NONE)"));
        assert!(out.contains(
            "float3 displace(float3 p, float2 uv, constant struct AB_UPDATE_FREQ_NONE& AB_UPDATE_FREQ_NONE, \
             constant struct AB_UPDATE_FREQ_PER_FRAME& AB_UPDATE_FREQ_PER_FRAME, constant struct RootConstant& RootConstant)"
        ));
        assert!(out.contains("height(uv, AB_UPDATE_FREQ_NONE)"));
        assert!(out.contains(
            "displace(In.Position, In.UV, AB_UPDATE_FREQ_NONE, AB_UPDATE_FREQ_PER_FRAME, RootConstant)"
        ));
    }

    #[test]
    fn test_no_argument_buffers_feature() {
        let b = binary(Stage::Vert, "a.vert", VERT).with_features(FeatureSet::new().with(Feature::NoArgumentBuffers));
        let out = msl(&b);
        assert!(!out.contains("struct AB_"));
        assert!(out.contains("\tconstant struct Uniforms& Uniforms [[buffer(6)]],"));
        assert!(out.contains("\tTex2D(float4) heightMap [[texture(0)]],"));
        assert!(out.contains("\tSamplerState linearSampler [[sampler(0)]],"));
        assert!(out.contains("\tBuffer(float4) offsets [[buffer(7)]]\n)"));
        assert!(out.contains("#define _Get_mvp Uniforms.mvp"));
        assert!(out.contains("float height(float2 uv, Tex2D(float4) heightMap, SamplerState linearSampler)"));
    }

    #[test]
    fn test_value_return_wrapped() {
        let src = "float4 VS_MAIN(SV_VertexID(uint) id)\n{\n\tINIT_MAIN;\n\tRETURN(float4(0, 0, 0, 1));\n}\n";
        let out = msl(&binary(Stage::Vert, "a.vert", src));
        assert!(out.contains("struct FSLStageOutput\n{\n\tfloat4 position [[position]];\n};"));
        assert!(out.contains("vertex FSLStageOutput stageMain("));
        assert!(out.contains("{ FSLStageOutput _fsl_out; _fsl_out.position = float4(0, 0, 0, 1); return _fsl_out; };"));

        let frag = "float4 PS_MAIN()\n{\n\tINIT_MAIN;\n\tRETURN(float4(1, 0, 0, 1));\n}\n";
        let out = msl(&binary(Stage::Frag, "a.frag", frag));
        assert!(out.contains("fragment float4 stageMain("));
        assert!(out.contains("\treturn float4(1, 0, 0, 1);"));
    }

    #[test]
    fn test_compute_kernel() {
        let src = "\
RES(RWTex2D(float4), output, UPDATE_FREQ_PER_FRAME, u0, binding = 0);
RES(RWBuffer(uint), counts, UPDATE_FREQ_PER_FRAME, u1, binding = 1);
GroupShared(float4, cache[64]);
void store(uint i)
{
\tGet(cache)[i] = float4(WaveGetLaneIndex(), 0, 0, 0);
}
NUM_THREADS(64, 1, 1)
ENABLE_WAVEOPS(WAVE_OPS_BASIC_BIT) void CS_MAIN(SV_GroupIndex(uint) index)
{
\tINIT_MAIN;
\tstore(index);
\tGet(counts)[index] = 1;
\tWrite2D(Get(output), uint2(index, 0), Get(cache)[index]);
\tRETURN();
}
";
        let out = msl(&binary(Stage::Comp, "a.comp", src));
        assert!(out.contains("// [numthreads(64, 1, 1)]"));
        assert!(out.contains("kernel void stageMain(\n\tuint index [[thread_index_in_threadgroup]],\n\tuint simd_lane_id [[thread_index_in_simdgroup]],\n\tRWTex2D(float4) output [[texture(0)]],\n\tRWBuffer(uint) counts [[buffer(6)]]\n)"));
        assert!(out.contains("\tthreadgroup float4 cache[64];\n\t//INIT_MAIN;"));
        assert!(out.contains("#define _Get_cache cache"));
        assert!(out.contains("void store(uint i, threadgroup float4 (&cache)[64], const uint simd_lane_id)"));
        assert!(out.contains("\tstore(index, cache, simd_lane_id);"));
    }

    #[test]
    fn test_overloads_rejected() {
        let src = "\
float f(float x) { return x; }
float f(int x) { return float(x); }
float4 PS_MAIN()
{
\tINIT_MAIN;
\tRETURN(float4(f(1.0f), 0, 0, 1));
}
";
        let err = generate_source(Platform::Macos, &GenerateConfig::default(), &binary(Stage::Frag, "a.frag", src))
            .unwrap_err();
        assert!(matches!(err, FslError::Unsupported { .. }));
        assert!(err.to_string().contains("overloaded function 'f'"));
    }

    #[test]
    fn test_group_shared_names_sharing_a_suffix() {
        let src = "\
GroupShared(float, sum);
GroupShared(float, checksum);
void accumulate(float v)
{
\tGet(sum) += v;
\tGet(checksum) += v * 2.0f;
}
NUM_THREADS(32, 1, 1)
void CS_MAIN(SV_GroupIndex(uint) index)
{
\tINIT_MAIN;
\taccumulate(float(index));
\tRETURN();
}
";
        let out = msl(&binary(Stage::Comp, "a.comp", src));
        assert_eq!(out.matches("#define _Get_sum sum").count(), 1);
        assert!(out.contains("#define _Get_checksum checksum"));
        assert!(out.contains("\tthreadgroup float sum;"));
        assert!(out.contains("\tthreadgroup float checksum;"));
        assert!(out.contains("threadgroup float& sum"));
        assert!(out.contains("threadgroup float& checksum"));
    }

    #[test]
    fn test_early_fragment_tests_and_depth() {
        let src = "EARLY_FRAGMENT_TESTS\nSV_Depth PS_MAIN(SV_Position(float4) pos)\n{\n\tINIT_MAIN;\n\tRETURN(pos.z);\n}\n";
        let out = msl(&binary(Stage::Frag, "a.frag", src));
        assert!(out.contains("[[early_fragment_tests]]\nfragment FSLStageOutput stageMain(\n\tfloat4 pos [[position]]\n)"));
        assert!(out.contains("\tfloat depth [[depth(any)]];"));
    }

    #[test]
    fn test_scalar_fragment_return_is_color() {
        let src = "float PS_MAIN(SV_Position(float4) pos)\n{\n\tINIT_MAIN;\n\tRETURN(pos.z);\n}\n";
        let out = msl(&binary(Stage::Frag, "a.frag", src));
        assert!(out.contains("fragment float stageMain(\n\tfloat4 pos [[position]]\n)"));
        assert!(!out.contains(STAGE_OUTPUT));
        assert!(!out.contains("[[depth(any)]]"));
    }

    #[test]
    fn test_unsupported_constructs() {
        let tess = binary(Stage::Tesc, "a.tesc", "");
        let err = generate(Platform::Macos, &GenerateConfig::default(), &tess, &empty_shader(Stage::Tesc)).unwrap_err();
        assert!(matches!(err, FslError::Unsupported { .. }));

        let vrs = "float4 PS_MAIN(SV_ShadingRate(uint) rate)\n{\n\tINIT_MAIN;\n\tRETURN(float4(0, 0, 0, 1));\n}\n";
        let err = generate_source(Platform::Ios, &GenerateConfig::default(), &binary(Stage::Frag, "a.frag", vrs))
            .unwrap_err();
        assert!(matches!(err, FslError::Unsupported { .. }));
        assert!(err.to_string().contains("is not supported on"));
    }

    fn empty_shader(stage: Stage) -> Shader {
        Shader {
            stage,
            lines: Vec::new(),
            return_type: None,
            entry_args: Vec::new(),
            entry_line: 0,
            structs: Vec::new(),
            cbuffers: Vec::new(),
            push_constants: Vec::new(),
            resources: Vec::new(),
            group_shared: Vec::new(),
            defines: HashMap::new(),
            wave_ops: Default::default(),
            num_threads: None,
        }
    }
}
