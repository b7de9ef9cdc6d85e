//! Vulkan GLSL generator
//!
//! Produces `#version 450` GLSL for Vulkan, Android, Switch and Quest.
//! Entry structs are flattened into `layout(location = N)` interface
//! variables that `INIT_MAIN` copies in and `RETURN` copies out; resources
//! keep the explicit `set`/`binding` written in the source.
//!
//! Non-uniform resource indexing is compiled three ways, selected by the
//! derivative defines [`DESCRIPTOR_INDEXING`] and [`DYNAMIC_INDEXING`].
//!
//! Author: Moroya Sakamoto

use super::binding::{BindingAllocator, BindingKind, VulkanBindings};
use super::passthrough::{glsl_geometry, passthrough_filename, Varying, PRIMITIVE_ID_FIELD};
use super::{
    common_defines, entry_tail, get_alias, header_comment, replace_invocation, replace_return, rewrite_indexed_get,
    AuxiliaryShader, Emitter, GenerateConfig, GeneratedShader, VULKAN_HEADER,
};
use crate::error::{FslError, SourceLocation};
use crate::reader::decl::parse_binding;
use crate::reader::macros::{array_base_name, array_dim, indentation, replace_token, resolve_uint, ArrayLen};
use crate::reader::{
    Access, BlockKind, EntryArg, LineEvent, ResourceDecl, ResourceKind, Scanner, Shader, StructDecl,
};
use crate::types::{Derivative, Feature, Platform, ShaderBinary, SourceLine, Stage, WaveOpsFlags};
use log::{debug, warn};

/// Derivative define selecting `nonuniformEXT` indexing
pub const DESCRIPTOR_INDEXING: &str = "VK_EXT_DESCRIPTOR_INDEXING_ENABLED";

/// Derivative define selecting plain dynamic indexing
pub const DYNAMIC_INDEXING: &str = "VK_FEATURE_TEXTURE_ARRAY_DYNAMIC_INDEXING_ENABLED";

/// Derivatives compiled for a Vulkan shader
///
/// Every shader gets the base variant with both switches off; shaders with
/// non-uniform indexing add the three remaining combinations.
pub fn derivatives(non_uniform: bool) -> Vec<Derivative> {
    let combos: &[(u32, u32)] = if non_uniform { &[(0, 0), (0, 1), (1, 0), (1, 1)] } else { &[(0, 0)] };
    combos
        .iter()
        .map(|(di, dyn_idx)| {
            Derivative::new([
                format!("{}={}", DESCRIPTOR_INDEXING, di),
                format!("{}={}", DYNAMIC_INDEXING, dyn_idx),
            ])
        })
        .collect()
}

/// Generate Vulkan GLSL for `platform`
pub fn generate(
    platform: Platform,
    config: &GenerateConfig,
    binary: &ShaderBinary,
    shader: &Shader,
) -> Result<GeneratedShader, FslError> {
    if matches!(shader.stage, Stage::Tesc | Stage::Tese) {
        return Err(FslError::unsupported(binary.location(), platform, format!("{} stage", shader.stage)));
    }
    let mut gen = VulkanGenerator::new(platform, config, binary, shader);
    for line in &shader.lines {
        gen.line(line)?;
    }
    gen.finish()
}

// ============================================================================
// Interface plans
// ============================================================================

/// Built-in written for an output field, by upper-case semantic
fn output_builtin(semantic: &str) -> Option<&'static str> {
    match semantic {
        "SV_POSITION" => Some("gl_Position"),
        "SV_POINTSIZE" => Some("gl_PointSize"),
        "SV_DEPTH" => Some("gl_FragDepth"),
        "SV_RENDERTARGETARRAYINDEX" => Some("gl_Layer"),
        _ => None,
    }
}

/// Built-in read for an input field, by upper-case semantic
fn input_builtin(stage: Stage, semantic: &str) -> Option<&'static str> {
    match (stage, semantic) {
        (Stage::Frag, "SV_POSITION") => Some("vec4(gl_FragCoord.xyz, 1.0 / gl_FragCoord.w)"),
        (Stage::Frag, "SV_ISFRONTFACE") => Some("gl_FrontFacing"),
        (Stage::Frag, "SV_SAMPLEINDEX") => Some("gl_SampleID"),
        (Stage::Frag, "SV_RENDERTARGETARRAYINDEX") => Some("gl_Layer"),
        (Stage::Vert, "SV_VERTEXID") => Some("gl_VertexIndex"),
        (Stage::Vert, "SV_INSTANCEID") => Some("gl_InstanceIndex"),
        _ => None,
    }
}

/// Built-in behind a flat entry argument
fn flat_builtin(semantic: &str) -> &'static str {
    match semantic {
        "SV_VERTEXID" => "gl_VertexIndex",
        "SV_INSTANCEID" => "gl_InstanceIndex",
        "SV_GROUPID" => "gl_WorkGroupID",
        "SV_DISPATCHTHREADID" => "gl_GlobalInvocationID",
        "SV_GROUPTHREADID" => "gl_LocalInvocationID",
        "SV_GROUPINDEX" => "gl_LocalInvocationIndex",
        "SV_SAMPLEINDEX" => "gl_SampleID",
        "SV_PRIMITIVEID" => "gl_PrimitiveID",
        "SV_POSITION" => "gl_FragCoord",
        "SV_OUTPUTCONTROLPOINTID" => "gl_InvocationID",
        "SV_DOMAINLOCATION" => "gl_TessCoord",
        "SV_SHADINGRATE" => "gl_ShadingRateEXT",
        "SV_ISFRONTFACE" => "gl_FrontFacing",
        _ => "gl_SampleMaskIn[0]",
    }
}

/// Interface declarations and copies for one entry struct
#[derive(Debug, Default)]
struct InterfacePlan {
    decls: Vec<String>,
    /// (field, interface expression)
    copies: Vec<(String, String)>,
    varyings: Vec<Varying>,
}

fn input_plan(stage: Stage, decl: &StructDecl, location: &mut u32) -> InterfacePlan {
    let mut plan = InterfacePlan::default();
    for field in &decl.fields {
        let base = field.base_name().to_string();
        if let Some(builtin) = input_builtin(stage, &field.semantic_upper()) {
            plan.copies.push((base, builtin.to_string()));
            continue;
        }
        let name = if stage == Stage::Vert && field.has_semantic() {
            field.semantic.clone()
        } else {
            format!("in_{}_{}", decl.name, base)
        };
        let flat = if field.is_flat() { "flat " } else { "" };
        let suffix = array_dim(&field.name).map(|d| format!("[{}]", d)).unwrap_or_default();
        plan.decls.push(format!("layout(location = {}) {}in({}) {}{};", location, flat, field.base_type(), name, suffix));
        plan.varyings.push(Varying {
            ty: field.base_type(),
            name: format!("{}_{}", decl.name, base),
            location: *location,
            flat: field.is_flat(),
        });
        plan.copies.push((base, name));
        *location += field.len.slots();
    }
    plan
}

fn output_plan(decl: &StructDecl) -> InterfacePlan {
    let mut plan = InterfacePlan::default();
    let mut location = 0u32;
    for field in &decl.fields {
        let base = field.base_name().to_string();
        let semantic = field.semantic_upper();
        if let Some(builtin) = output_builtin(&semantic) {
            plan.copies.push((base, builtin.to_string()));
            continue;
        }
        let slot = semantic
            .strip_prefix("SV_TARGET")
            .map(|n| n.parse().unwrap_or(0))
            .unwrap_or(location);
        let name = format!("out_{}_{}", decl.name, base);
        let flat = if field.is_flat() { "flat " } else { "" };
        let suffix = array_dim(&field.name).map(|d| format!("[{}]", d)).unwrap_or_default();
        plan.decls.push(format!("layout(location = {}) {}out({}) {}{};", slot, flat, field.base_type(), name, suffix));
        plan.copies.push((base, name));
        location = slot + field.len.slots();
    }
    plan
}

/// GLSL image format for a storage image element type
fn image_format(element: &str) -> &'static str {
    match element.trim() {
        "float" => "r32f",
        "float2" => "rg32f",
        "half4" | "min16float4" => "rgba16f",
        "half2" => "rg16f",
        "half" => "r16f",
        "uint" => "r32ui",
        "uint2" => "rg32ui",
        "uint4" => "rgba32ui",
        "int" => "r32i",
        "int2" => "rg32i",
        "int4" => "rgba32i",
        _ => "rgba32f",
    }
}

// ============================================================================
// Generator state
// ============================================================================

struct NonUniformBlock {
    index: String,
    max: Option<u32>,
    start: usize,
}

struct StructInput {
    ty: String,
    var: String,
    plan: InterfacePlan,
}

struct VulkanGenerator<'a> {
    platform: Platform,
    binary: &'a ShaderBinary,
    shader: &'a Shader,
    out: Emitter,
    scanner: Scanner,
    bindings: VulkanBindings,
    inputs: Vec<StructInput>,
    output: Option<InterfacePlan>,
    /// Location of the primitive id written by the pass-through stage
    primitive_location: Option<u32>,
    primitive_declared: bool,
    open_struct: Option<String>,
    open_cbuffer: Option<String>,
    open_push: Option<String>,
    nuri: Vec<NonUniformBlock>,
    non_uniform: bool,
    indexed_buffers: Vec<String>,
}

impl<'a> VulkanGenerator<'a> {
    fn new(platform: Platform, config: &GenerateConfig, binary: &'a ShaderBinary, shader: &'a Shader) -> Self {
        let mut out = Emitter::new(config.debug, false);
        for line in header_comment(binary) {
            out.push(line);
        }
        out.push("#version 450 core");
        for line in common_defines(binary, shader, platform) {
            out.push(line);
        }
        let features = binary.features.masked_for(platform);
        if platform == Platform::Quest {
            out.push("#define TARGET_QUEST");
            if features.contains(Feature::Multiview) {
                out.push("#define VR_MULTIVIEW_ENABLED 1");
                out.push("#extension GL_OVR_multiview2 : require");
                if shader.stage == Stage::Vert {
                    out.push("layout(num_views = 2) in;");
                }
            }
        }
        if features.contains(Feature::Raytracing) {
            out.push("#extension GL_EXT_ray_query : enable");
        }
        if features.contains(Feature::Atomics64) {
            out.push("#extension GL_EXT_shader_atomic_int64 : enable");
        }
        if features.contains(Feature::Vrs) && shader.stage == Stage::Frag {
            out.push("#extension GL_EXT_fragment_shading_rate : enable");
        }
        for ext in wave_extensions(shader.wave_ops) {
            out.push(format!("#extension {} : require", ext));
        }
        out.extend_text(VULKAN_HEADER);
        out.push("");

        let mut location = 0u32;
        let inputs: Vec<StructInput> = shader
            .struct_args()
            .filter_map(|arg| {
                shader.struct_decl(&arg.ty).map(|decl| StructInput {
                    ty: arg.ty.clone(),
                    var: arg.var.clone(),
                    plan: input_plan(shader.stage, decl, &mut location),
                })
            })
            .collect();
        let primitive_location =
            (shader.stage == Stage::Frag && shader.flat_arg("SV_PRIMITIVEID").is_some()).then_some(location);

        Self {
            platform,
            binary,
            shader,
            out,
            scanner: Scanner::new(),
            bindings: VulkanBindings::new(),
            inputs,
            output: shader.output_struct().map(output_plan),
            primitive_location,
            primitive_declared: false,
            open_struct: None,
            open_cbuffer: None,
            open_push: None,
            nuri: Vec::new(),
            non_uniform: false,
            indexed_buffers: Vec::new(),
        }
    }

    fn line(&mut self, line: &SourceLine) -> Result<(), FslError> {
        let text = line.text.as_str();
        let indent = indentation(text).to_string();
        match self.scanner.next(text) {
            LineEvent::BlockOpen { kind, args } => self.block_open(kind, &args, line)?,
            LineEvent::Field { args, .. } => self.out.push(format!("{}{} {};", indent, args[0], args[1])),
            LineEvent::BlockClose(kind) => self.block_close(kind, text),
            LineEvent::Resource { .. } => {
                let location = line.location();
                let shader = self.shader;
                let resource = shader
                    .resources
                    .iter()
                    .find(|r| r.location == location)
                    .ok_or_else(|| FslError::declaration(location.clone(), "Resource was not read"))?;
                self.resource(resource)?;
                self.out.resync(line);
            }
            LineEvent::GroupShared { args } => {
                self.out.push(format!("{}shared {} {};", indent, args[0], args[1]));
                let name = array_base_name(&args[1]);
                self.out.push(format!("#define {} {}", get_alias(name), name));
            }
            LineEvent::SrtBegin | LineEvent::SrtEnd | LineEvent::DeclareResources => {
                self.out.push(format!("// {}", text.trim()));
            }
            LineEvent::NumThreads { .. } => {
                if let Some([x, y, z]) = self.shader.num_threads {
                    self.out.push(format!("layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;", x, y, z));
                }
            }
            LineEvent::EarlyFragmentTests => self.out.push("layout(early_fragment_tests) in;"),
            LineEvent::NonUniformBegin { args } => {
                if !self.non_uniform {
                    debug!("{}: {} uses non-uniform indexing", self.platform, self.binary.filename);
                }
                self.non_uniform = true;
                let index = args.first().cloned().unwrap_or_default();
                let max = args.get(1).and_then(|m| resolve_uint(m, &self.shader.defines));
                self.nuri.push(NonUniformBlock { index, max, start: self.out.len() });
            }
            LineEvent::NonUniformEnd => {
                let Some(block) = self.nuri.pop() else {
                    return Err(FslError::declaration(
                        line.location(),
                        "EndNonUniformResourceIndex without a matching BeginNonUniformResourceIndex",
                    ));
                };
                self.close_non_uniform(block, &indent);
                self.out.resync(line);
            }
            LineEvent::Entry { .. } => {
                self.entry(line);
                self.out.resync(line);
            }
            LineEvent::InitMain => {
                self.init_main(&indent);
                self.out.resync(line);
            }
            LineEvent::Return { value } => {
                let replacement = self.return_statement(value.as_deref());
                let rewritten = self.rewrite_body(&replace_return(text, &replacement));
                self.out.push(rewritten);
                self.out.resync(line);
            }
            LineEvent::Blank | LineEvent::Comment | LineEvent::Define { .. } => self.out.push(text),
            LineEvent::Other => {
                let rewritten = self.rewrite_body(text);
                self.out.push(rewritten);
            }
        }
        Ok(())
    }

    fn rewrite_body(&self, text: &str) -> String {
        self.indexed_buffers.iter().fold(text.to_string(), |acc, name| {
            rewrite_indexed_get(&acc, name, |index| format!("{0}[{1}].{0}_data", name, index))
        })
    }

    fn block_open(&mut self, kind: BlockKind, args: &[String], line: &SourceLine) -> Result<(), FslError> {
        let text = line.text.as_str();
        match kind {
            BlockKind::Struct => {
                self.open_struct = args.first().cloned();
                self.out.push(text);
            }
            BlockKind::CBuffer => {
                let shader = self.shader;
                let decl = shader
                    .cbuffers
                    .iter()
                    .find(|c| c.location == line.location())
                    .ok_or_else(|| FslError::declaration(line.location(), "Constant buffer was not read"))?;
                let set = decl.frequency.index();
                let binding = self.bind(BindingKind::ConstantBuffer, set, parse_binding(&decl.binding), 1, &decl.name, &decl.location)?;
                self.out.push(replace_invocation(
                    text,
                    "CBUFFER",
                    &format!("layout(std140, set = {}, binding = {}) uniform {}", set, binding, decl.name),
                ));
                self.open_cbuffer = Some(decl.name.clone());
            }
            BlockKind::PushConstant => {
                let name = args.first().cloned().unwrap_or_default();
                self.out.push(replace_invocation(
                    text,
                    "PUSH_CONSTANT",
                    &format!("layout(push_constant) uniform {}_Block", name),
                ));
                self.open_push = Some(name);
            }
        }
        Ok(())
    }

    fn block_close(&mut self, kind: BlockKind, text: &str) {
        match kind {
            BlockKind::Struct => {
                self.out.push(text);
                let Some(name) = self.open_struct.take() else {
                    return;
                };
                let mut decls = Vec::new();
                for input in self.inputs.iter().filter(|i| i.ty == name) {
                    decls.extend(input.plan.decls.iter().cloned());
                }
                if self.shader.output_struct().is_some_and(|s| s.name == name) {
                    if let Some(plan) = &self.output {
                        decls.extend(plan.decls.iter().cloned());
                    }
                }
                if self.inputs.first().is_some_and(|i| i.ty == name) {
                    if let Some(location) = self.primitive_location {
                        decls.push(format!("layout(location = {}) flat in uint in_{};", location, PRIMITIVE_ID_FIELD));
                        self.primitive_declared = true;
                    }
                }
                for decl in decls {
                    self.out.push(decl);
                }
            }
            BlockKind::CBuffer => {
                self.out.push(text);
                let name = self.open_cbuffer.take().unwrap_or_default();
                if let Some(decl) = self.shader.cbuffers.iter().find(|c| c.name == name) {
                    for field in &decl.fields {
                        let name = field.base_name();
                        self.out.push(format!("#define {} {}", get_alias(name), name));
                    }
                }
            }
            BlockKind::PushConstant => {
                let name = self.open_push.take().unwrap_or_default();
                self.out.push(text.replacen("};", &format!("}} {};", name), 1));
                if let Some(decl) = self.shader.push_constants.iter().find(|p| p.name == name) {
                    for field in &decl.fields {
                        let field = field.base_name();
                        self.out.push(format!("#define {} {}.{}", get_alias(field), name, field));
                    }
                }
            }
        }
    }

    fn bind(
        &mut self,
        kind: BindingKind,
        set: u32,
        explicit: Option<u32>,
        count: u32,
        owner: &str,
        location: &SourceLocation,
    ) -> Result<u32, FslError> {
        let result = match explicit {
            Some(binding) => self.bindings.reserve(set, binding, count, owner),
            None => self.bindings.allocate(kind, set, count),
        };
        result.map_err(|m| FslError::declaration(location.clone(), m))
    }

    fn resource(&mut self, resource: &ResourceDecl) -> Result<(), FslError> {
        let set = resource.frequency.index();
        let base = resource.base_name().to_string();
        let binding = self.bind(
            BindingKind::of(resource),
            set,
            resource.binding_index(),
            resource.len.slots(),
            &base,
            &resource.location,
        )?;
        match resource.kind() {
            ResourceKind::Buffer(access) | ResourceKind::ByteBuffer(access) => {
                let element = match resource.kind() {
                    ResourceKind::ByteBuffer(_) => "uint".to_string(),
                    _ => resource.element_type().unwrap_or_else(|| "uint".to_string()),
                };
                let qualifier = match access {
                    Access::Read => "readonly ",
                    Access::Write => "writeonly ",
                    Access::Coherent => "coherent ",
                    Access::ReadWrite | Access::RasterOrdered => "",
                };
                let layout = format!("layout(std430, set = {}, binding = {}) {}buffer", set, binding, qualifier);
                match resource.len {
                    ArrayLen::Scalar => {
                        self.out.push(format!("{} {}", layout, base));
                        self.out.push("{");
                        self.out.push(format!("\t{} {}_data[];", element, base));
                        self.out.push("};");
                        self.out.push(format!("#define {} {}_data", get_alias(&base), base));
                    }
                    len => {
                        let dim = match len {
                            ArrayLen::Fixed(n) => n.to_string(),
                            _ => String::new(),
                        };
                        self.out.push(format!("{} {}_Block", layout, base));
                        self.out.push("{");
                        self.out.push(format!("\t{} {}_data[];", element, base));
                        self.out.push(format!("}} {}[{}];", base, dim));
                        self.out.push(format!("#define {} {}", get_alias(&base), base));
                        self.indexed_buffers.push(base);
                    }
                }
            }
            ResourceKind::StorageTexture(_) => {
                let format = image_format(&resource.element_type().unwrap_or_default());
                self.out.push(format!(
                    "layout(set = {}, binding = {}, {}) uniform {} {};",
                    set, binding, format, resource.ty, resource.name
                ));
                self.out.push(format!("#define {} {}", get_alias(&base), base));
            }
            ResourceKind::Sampler | ResourceKind::Texture | ResourceKind::AccelerationStructure => {
                self.out.push(format!(
                    "layout(set = {}, binding = {}) uniform {} {};",
                    set, binding, resource.ty, resource.name
                ));
                self.out.push(format!("#define {} {}", get_alias(&base), base));
            }
        }
        Ok(())
    }

    fn close_non_uniform(&mut self, block: NonUniformBlock, indent: &str) {
        let start = block.start.min(self.out.len());
        let body = self.out.lines_mut().split_off(start);
        let index = block.index;
        let nonuniform = format!("nonuniformEXT({})", index);
        self.out.push(format!("#if {}", DESCRIPTOR_INDEXING));
        for line in &body {
            self.out.push(replace_token(line, &index, &nonuniform));
        }
        self.out.push(format!("#elif {}", DYNAMIC_INDEXING));
        for line in &body {
            self.out.push(line.clone());
        }
        self.out.push("#else");
        match block.max {
            Some(max) => {
                for case in 0..max {
                    let keyword = if case == 0 { "if" } else { "else if" };
                    self.out.push(format!("{}{} ({} == {})", indent, keyword, index, case));
                    self.out.push(format!("{}{{", indent));
                    for line in &body {
                        self.out.push(replace_token(line, &index, &case.to_string()));
                    }
                    self.out.push(format!("{}}}", indent));
                }
            }
            None => {
                warn!(
                    "{}: {} indexes by '{}' without a bound, the fallback path keeps dynamic indexing",
                    self.platform, self.binary.filename, index
                );
                for line in &body {
                    self.out.push(line.clone());
                }
            }
        }
        self.out.push("#endif");
    }

    fn entry(&mut self, line: &SourceLine) {
        let shader = self.shader;
        if shader.returns_value() && !shader.returns_depth() {
            let ty = shader.return_type.as_deref().unwrap_or("float4");
            self.out.push(format!("layout(location = 0) out({}) out_{};", ty, ty));
        }
        if let (Some(location), false) = (self.primitive_location, self.primitive_declared) {
            self.out.push(format!("layout(location = {}) flat in uint in_{};", location, PRIMITIVE_ID_FIELD));
            self.primitive_declared = true;
        }
        if shader.stage == Stage::Vert && self.binary.features.contains(Feature::Invariant) {
            self.out.push("invariant gl_Position;");
        }
        self.out.push(format!("{}void main(){}", indentation(&line.text), entry_tail(&line.text)));
    }

    fn init_main(&mut self, indent: &str) {
        self.out.push(format!("{}//INIT_MAIN;", indent));
        for input in &self.inputs {
            self.out.push(format!("{}{} {};", indent, input.ty, input.var));
            for (field, expr) in &input.plan.copies {
                self.out.push(format!("{}{}.{} = {};", indent, input.var, field, expr));
            }
        }
        for arg in &self.shader.entry_args {
            let EntryArg::Flat(flat) = arg else {
                continue;
            };
            let source = match (flat.semantic, self.primitive_location) {
                ("SV_PRIMITIVEID", Some(_)) => format!("in_{}", PRIMITIVE_ID_FIELD),
                _ => flat_builtin(flat.semantic).to_string(),
            };
            self.out.push(format!("{}{} {} = {}({});", indent, flat.ty, flat.var, flat.ty, source));
        }
    }

    fn return_statement(&self, value: Option<&str>) -> String {
        let Some(value) = value else {
            return "return".to_string();
        };
        let shader = self.shader;
        if let (Some(plan), Some(ret)) = (&self.output, shader.return_type.as_deref()) {
            let mut stmt = format!("{{ {} _fsl_out = {}; ", ret, value);
            for (field, target) in &plan.copies {
                stmt.push_str(&format!("{} = _fsl_out.{}; ", target, field));
            }
            stmt.push_str("return; }");
            return stmt;
        }
        if shader.returns_depth() {
            return format!("{{ gl_FragDepth = {}; return; }}", value);
        }
        let ty = shader.return_type.as_deref().unwrap_or("float4");
        if shader.stage == Stage::Vert {
            format!("{{ out_{0} = {1}; gl_Position = out_{0}; return; }}", ty, value)
        } else {
            format!("{{ out_{} = {}; return; }}", ty, value)
        }
    }

    fn finish(mut self) -> Result<GeneratedShader, FslError> {
        if let Some(block) = self.nuri.pop() {
            return Err(FslError::declaration(
                self.shader.entry_location(),
                format!("BeginNonUniformResourceIndex({}) is never closed", block.index),
            ));
        }
        let mut auxiliary = Vec::new();
        if let Some(location) = self.primitive_location {
            let varyings: Vec<Varying> = self
                .inputs
                .first()
                .map(|i| i.plan.varyings.clone())
                .unwrap_or_default();
            auxiliary.push(AuxiliaryShader {
                stage: Stage::Geom,
                filename: passthrough_filename(&self.binary.filename),
                source: glsl_geometry(self.binary, &varyings, location),
            });
        }
        Ok(GeneratedShader {
            source: self.out.finish(),
            derivatives: derivatives(self.non_uniform),
            auxiliary,
            num_threads: self.shader.num_threads,
            wave_ops: self.shader.wave_ops,
        })
    }
}

/// Subgroup extensions required by a wave-ops mask
fn wave_extensions(flags: WaveOpsFlags) -> Vec<&'static str> {
    let table = [
        (WaveOpsFlags::BASIC, "GL_KHR_shader_subgroup_basic"),
        (WaveOpsFlags::VOTE, "GL_KHR_shader_subgroup_vote"),
        (WaveOpsFlags::ARITHMETIC, "GL_KHR_shader_subgroup_arithmetic"),
        (WaveOpsFlags::BALLOT, "GL_KHR_shader_subgroup_ballot"),
        (WaveOpsFlags::SHUFFLE, "GL_KHR_shader_subgroup_shuffle"),
        (WaveOpsFlags::SHUFFLE_RELATIVE, "GL_KHR_shader_subgroup_shuffle_relative"),
        (WaveOpsFlags::CLUSTERED, "GL_KHR_shader_subgroup_clustered"),
        (WaveOpsFlags::QUAD, "GL_KHR_shader_subgroup_quad"),
        (WaveOpsFlags::PARTITIONED_NV, "GL_NV_shader_subgroup_partitioned"),
    ];
    let mut exts: Vec<&'static str> = table.iter().filter(|(f, _)| flags.contains(*f)).map(|(_, e)| *e).collect();
    // every subgroup extension builds on the basic one
    if !flags.is_empty() && !flags.contains(WaveOpsFlags::BASIC) {
        exts.insert(0, "GL_KHR_shader_subgroup_basic");
    }
    exts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::generate_source;
    use crate::types::lines_from_text;

    const VERT: &str = "\
STRUCT(VSInput)
{
\tDATA(float3, Position, POSITION);
\tDATA(float2, UV, TEXCOORD0);
};
CBUFFER(Uniforms, UPDATE_FREQ_PER_FRAME, b0, binding = 0)
{
\tDATA(float4x4, mvp, None);
};
PUSH_CONSTANT(RootConstant, b1)
{
\tDATA(uint, index, None);
};
RES(Tex2D(float4), textures[4], UPDATE_FREQ_PER_FRAME, t0, binding = 1);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 0);
RES(RWBuffer(uint), counters, UPDATE_FREQ_PER_FRAME, u0, binding = 6);
RES(Buffer(float4), lights[2], UPDATE_FREQ_PER_FRAME, t5, binding = 7);
float4 VS_MAIN(VSInput(In), SV_VertexID(uint) vertexId)
{
\tINIT_MAIN;
\tfloat4 light = Get(lights)[Get(index)][vertexId];
\tRETURN(mul(Get(mvp), float4(In.Position, 1.0f)));
}
";

    const FRAG: &str = "\
STRUCT(PsIn)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
\tDATA(FLAT(uint), MaterialID, TEXCOORD1);
};
STRUCT(PsOut)
{
\tDATA(float4, Color, SV_Target0);
\tDATA(float4, Normal, SV_Target1);
};
RES(Tex2D(float4), textures[8], UPDATE_FREQ_PER_FRAME, t0, binding = 0);
RES(RWTex2D(float), heights, UPDATE_FREQ_PER_FRAME, u0, binding = 8);
PsOut PS_MAIN(PsIn(In))
{
\tINIT_MAIN;
\tPsOut Out;
\tuint slot = In.MaterialID;
\tBeginNonUniformResourceIndex(slot, 8);
\tOut.Color = SampleTex2D(Get(textures)[slot], Get(linearSampler), In.UV);
\tEndNonUniformResourceIndex();
\tOut.Normal = float4(0, 0, 1, 0);
\tRETURN(Out);
}
";

    fn binary(stage: Stage, filename: &str, text: &str) -> ShaderBinary {
        let mut binary = ShaderBinary::new(stage, filename, "list.fsl");
        binary.lines = lines_from_text(text, "shader.fsl");
        binary
    }

    fn glsl(platform: Platform, b: &ShaderBinary) -> GeneratedShader {
        generate_source(platform, &GenerateConfig::default(), b).unwrap()
    }

    #[test]
    fn test_vertex_position_output() {
        let out = glsl(Platform::Vulkan, &binary(Stage::Vert, "a.vert", VERT)).source;
        assert!(out.contains("#version 450 core"));
        assert!(out.contains("layout(location = 0) out(float4) out_float4;"));
        assert!(out.contains("{ out_float4 = mul(Get(mvp), float4(In.Position, 1.0f)); gl_Position = out_float4; return; };"));
        assert!(out.contains("layout(location = 0) in(float3) POSITION;"));
        assert!(out.contains("layout(location = 1) in(float2) TEXCOORD0;"));
        assert!(out.contains("\tIn.UV = TEXCOORD0;"));
        assert!(out.contains("\tuint vertexId = uint(gl_VertexIndex);"));
        assert!(out.contains("void main()"));
    }

    #[test]
    fn test_blocks_and_resources() {
        let out = glsl(Platform::Vulkan, &binary(Stage::Vert, "a.vert", VERT)).source;
        assert!(out.contains("layout(std140, set = 1, binding = 0) uniform Uniforms"));
        assert!(out.contains("#define _Get_mvp mvp"));
        assert!(out.contains("layout(push_constant) uniform RootConstant_Block"));
        assert!(out.contains("} RootConstant;"));
        assert!(out.contains("#define _Get_index RootConstant.index"));
        assert!(out.contains("layout(set = 1, binding = 1) uniform Tex2D(float4) textures[4];"));
        assert!(out.contains("layout(set = 0, binding = 0) uniform SamplerState linearSampler;"));
        assert!(out.contains("layout(std430, set = 1, binding = 6) buffer counters"));
        assert!(out.contains("#define _Get_counters counters_data"));
        assert!(out.contains("layout(std430, set = 1, binding = 7) readonly buffer lights_Block"));
        assert!(out.contains("} lights[2];"));
        assert!(out.contains("float4 light = lights[Get(index)].lights_data[vertexId];"));
    }

    #[test]
    fn test_overlapping_bindings_rejected() {
        let src = "\
RES(Tex2D(float4), textures[4], UPDATE_FREQ_PER_FRAME, t0, binding = 0);
RES(Tex2D(float4), albedo, UPDATE_FREQ_PER_FRAME, t4, binding = 3);
void CS_MAIN()
{
\tINIT_MAIN;
\tRETURN();
}
";
        let err = generate_source(Platform::Vulkan, &GenerateConfig::default(), &binary(Stage::Comp, "a.comp", src))
            .unwrap_err();
        assert!(matches!(err, FslError::Declaration { .. }));
        assert!(err.to_string().contains("textures"));
    }

    #[test]
    fn test_fragment_interface_and_non_uniform() {
        let generated = glsl(Platform::Vulkan, &binary(Stage::Frag, "a.frag", FRAG));
        let out = generated.source;
        assert!(out.contains("layout(location = 0) in(float2) in_PsIn_UV;"));
        assert!(out.contains("layout(location = 1) flat in(uint) in_PsIn_MaterialID;"));
        assert!(out.contains("\tIn.Position = vec4(gl_FragCoord.xyz, 1.0 / gl_FragCoord.w);"));
        assert!(out.contains("layout(location = 0) out(float4) out_PsOut_Color;"));
        assert!(out.contains("layout(location = 1) out(float4) out_PsOut_Normal;"));
        assert!(out.contains("out_PsOut_Color = _fsl_out.Color;"));
        assert!(out.contains("layout(set = 1, binding = 8, r32f) uniform RWTex2D(float) heights;"));
        assert!(out.contains("#if VK_EXT_DESCRIPTOR_INDEXING_ENABLED"));
        assert!(out.contains("Get(textures)[nonuniformEXT(slot)]"));
        assert!(out.contains("\tif (slot == 0)"));
        assert!(out.contains("\telse if (slot == 7)"));
        assert!(out.contains("Get(textures)[7]"));
        assert_eq!(generated.derivatives.len(), 4);
        assert_eq!(generated.derivatives[0].defines[0], "VK_EXT_DESCRIPTOR_INDEXING_ENABLED=0");
        assert_eq!(generated.derivatives[3].defines[1], "VK_FEATURE_TEXTURE_ARRAY_DYNAMIC_INDEXING_ENABLED=1");
    }

    #[test]
    fn test_derivatives_added_once() {
        let src = "\
RES(Tex2D(float4), textures[2], UPDATE_FREQ_NONE, t0, binding = 0);
void CS_MAIN(SV_GroupIndex(uint) i)
{
\tINIT_MAIN;
\tBeginNonUniformResourceIndex(i);
\tfloat4 a = LoadTex2D(Get(textures)[i], NO_SAMPLER, int2(0, 0), 0);
\tEndNonUniformResourceIndex();
\tBeginNonUniformResourceIndex(i);
\tfloat4 b = LoadTex2D(Get(textures)[i], NO_SAMPLER, int2(0, 0), 0);
\tEndNonUniformResourceIndex();
\tRETURN();
}
";
        let generated = glsl(Platform::Vulkan, &binary(Stage::Comp, "a.comp", src));
        assert_eq!(generated.derivatives.len(), 4);
        assert_eq!(generated.derivatives, derivatives(true));
    }

    #[test]
    fn test_unclosed_non_uniform_block() {
        let src = "void CS_MAIN(SV_GroupIndex(uint) i)\n{\n\tBeginNonUniformResourceIndex(i);\n\tRETURN();\n}\n";
        let err = generate_source(Platform::Vulkan, &GenerateConfig::default(), &binary(Stage::Comp, "a.comp", src))
            .unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn test_compute_layout_and_shared() {
        let src = "\
GroupShared(float4, cache[64]);
NUM_THREADS(64, 1, 1)
ENABLE_WAVEOPS(WAVE_OPS_BALLOT_BIT) void CS_MAIN(SV_DispatchThreadID(uint3) id)
{
\tINIT_MAIN;
\tRETURN();
}
";
        let out = glsl(Platform::Vulkan, &binary(Stage::Comp, "a.comp", src)).source;
        assert!(out.contains("shared float4 cache[64];"));
        assert!(out.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"));
        assert!(out.contains("#extension GL_KHR_shader_subgroup_basic : require"));
        assert!(out.contains("#extension GL_KHR_shader_subgroup_ballot : require"));
        assert!(out.contains("\tuint3 id = uint3(gl_GlobalInvocationID);"));
        assert!(out.contains("\treturn;"));
    }

    #[test]
    fn test_quest_multiview() {
        let b = binary(Stage::Vert, "a.vert", VERT).with_features(crate::types::FeatureSet::new().with(Feature::Multiview));
        let out = glsl(Platform::Quest, &b).source;
        assert!(out.contains("#define TARGET_QUEST"));
        assert!(out.contains("#define VR_MULTIVIEW_ENABLED 1"));
        assert!(out.contains("#extension GL_OVR_multiview2 : require"));
        let vulkan = glsl(Platform::Vulkan, &b).source;
        assert!(!vulkan.contains("VR_MULTIVIEW_ENABLED"));
    }

    #[test]
    fn test_passthrough_geometry_for_primitive_id() {
        let src = "\
STRUCT(PsIn)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
float4 PS_MAIN(PsIn(In), SV_PrimitiveID(uint) primitiveId)
{
\tINIT_MAIN;
\tRETURN(float4(In.UV, float(primitiveId), 1.0f));
}
";
        let generated = glsl(Platform::Vulkan, &binary(Stage::Frag, "basic.frag", src));
        assert!(generated.source.contains("layout(location = 1) flat in uint in_PrimitiveID;"));
        assert!(generated.source.contains("\tuint primitiveId = uint(in_PrimitiveID);"));
        assert_eq!(generated.auxiliary.len(), 1);
        let aux = &generated.auxiliary[0];
        assert_eq!(aux.filename, "basic_passthrough.geom");
        assert!(aux.source.contains("layout(location = 0) in float2 gs_in_PsIn_UV[];"));
        assert!(aux.source.contains("layout(location = 1) flat out uint gs_out_PrimitiveID;"));
    }

    #[test]
    fn test_fragment_depth_return() {
        let src = "SV_Depth PS_MAIN()\n{\n\tINIT_MAIN;\n\tRETURN(0.5f);\n}\n";
        let out = glsl(Platform::Vulkan, &binary(Stage::Frag, "a.frag", src)).source;
        assert!(out.contains("{ gl_FragDepth = 0.5f; return; };"));
        assert!(!out.contains("out_"));
    }

    #[test]
    fn test_scalar_fragment_return_is_color() {
        let src = "float PS_MAIN()\n{\n\tINIT_MAIN;\n\tRETURN(0.5f);\n}\n";
        let out = glsl(Platform::Vulkan, &binary(Stage::Frag, "a.frag", src)).source;
        assert!(out.contains("layout(location = 0) out(float) out_float;\nvoid main()"));
        assert!(out.contains("{ out_float = 0.5f; return; };"));
        assert!(!out.contains("gl_FragDepth"));
    }

    #[test]
    fn test_image_formats() {
        assert_eq!(image_format("float4"), "rgba32f");
        assert_eq!(image_format("uint"), "r32ui");
        assert_eq!(image_format("half4"), "rgba16f");
    }
}
