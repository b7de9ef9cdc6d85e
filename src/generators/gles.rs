//! GLSL ES 1.00 generator
//!
//! Legacy devices have no uniform blocks, storage buffers or unsigned types.
//! Constant blocks and buffers are packed into `uniform float4` arrays and
//! every field is read back through a `Get_<FIELD>` extraction macro; entry
//! structs travel through `attribute`/`varying` globals.
//!
//! Author: Moroya Sakamoto

use super::{
    common_defines, entry_tail, header_comment, matching_bracket, replace_return, Emitter, GenerateConfig,
    GeneratedShader, GLES_HEADER,
};
use crate::error::{FslError, SourceLocation};
use crate::reader::macros::{indentation, ArrayLen};
use crate::reader::{BlockKind, LineEvent, ResourceDecl, ResourceKind, Scanner, Shader, StructField};
use crate::types::{Derivative, Platform, ShaderBinary, SourceLine, Stage};
use log::debug;

/// Entries of the `float4` array standing in for a buffer
pub const BUFFER_CAPACITY: u32 = 256;

/// Generate GLSL ES 1.00 source
pub fn generate(
    platform: Platform,
    config: &GenerateConfig,
    binary: &ShaderBinary,
    shader: &Shader,
) -> Result<GeneratedShader, FslError> {
    if !matches!(shader.stage, Stage::Vert | Stage::Frag) {
        return Err(FslError::unsupported(
            binary.location(),
            platform,
            format!("{} stage (only vert and frag exist in GLSL ES 1.00)", shader.stage),
        ));
    }
    let mut gen = GlesGenerator::new(platform, config, binary, shader)?;
    for line in &shader.lines {
        gen.line(line)?;
    }
    Ok(GeneratedShader {
        source: gen.out.finish(),
        derivatives: vec![Derivative::default()],
        auxiliary: Vec::new(),
        num_threads: None,
        wave_ops: shader.wave_ops,
    })
}

// ============================================================================
// Uniform packing
// ============================================================================

/// Floats occupied by a native type, vec3 padded to four
pub fn float_size(ty: &str) -> Option<u32> {
    let size = match ty.trim() {
        "bool" | "int" | "uint" | "float" | "half" | "min16float" => 1,
        "int2" | "uint2" | "float2" | "half2" | "bool2" | "min16float2" => 2,
        "int3" | "uint3" | "float3" | "half3" | "bool3" | "min16float3" => 4,
        "int4" | "uint4" | "float4" | "half4" | "bool4" | "min16float4" => 4,
        "float2x2" => 4,
        "float3x3" => 12,
        "float4x4" => 16,
        _ => return None,
    };
    Some(size)
}

/// Components read back for a native type
fn float_count(ty: &str) -> Option<u32> {
    match ty.trim() {
        "int3" | "uint3" | "float3" | "half3" | "bool3" | "min16float3" => Some(3),
        "float3x3" => Some(9),
        other => float_size(other),
    }
}

#[inline(always)]
fn align_up(offset: u32, align: u32) -> u32 {
    offset.div_ceil(align) * align
}

#[inline(always)]
fn alignment(size: u32) -> u32 {
    match size {
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

/// How a `Get(...)` expression is rewritten
#[derive(Debug, Clone, PartialEq, Eq)]
enum GetRewrite {
    /// Literal text replacement (`Get(light).color` to `Get_LIGHT_COLOR`)
    Plain { from: String, to: String },
    /// `Get(name)[i]` and `Get(name)[i].member` to `MACRO(i)`
    Indexed { name: String, macro_name: String, members: Vec<(String, String)> },
}

/// Packs fields into one `uniform float4 NAME[N]` array
struct UniformPacker<'s> {
    shader: &'s Shader,
    platform: Platform,
    array: String,
    /// Float offset of the next field
    offset: u32,
    macros: Vec<String>,
    rewrites: Vec<GetRewrite>,
}

impl<'s> UniformPacker<'s> {
    fn new(shader: &'s Shader, platform: Platform, array: &str) -> Self {
        Self { shader, platform, array: array.to_string(), offset: 0, macros: Vec::new(), rewrites: Vec::new() }
    }

    /// Floats occupied by a native or declared struct type
    fn size_of(&self, ty: &str) -> Option<u32> {
        if let Some(decl) = self.shader.struct_decl(ty) {
            let mut size = 0;
            for field in &decl.fields {
                let field_size = self.size_of(&field.base_type())?;
                size = align_up(size, alignment(field_size)) + field_size * field.len.slots();
            }
            return Some(align_up(size, 4));
        }
        float_size(ty)
    }

    fn unsupported(&self, location: &SourceLocation, construct: String) -> FslError {
        FslError::unsupported(location.clone(), self.platform, construct)
    }

    /// Extraction expression of a native type at float `offset`
    fn extraction(&self, ty: &str, offset: u32, stride: Option<u32>) -> Option<String> {
        let count = float_count(ty)?;
        let slot = |vec4: u32| match stride {
            Some(stride) => format!("{}[{} + (X) * {}]", self.array, vec4, stride),
            None => format!("{}[{}]", self.array, vec4),
        };
        let parts: Vec<String> = if count % 4 == 0 {
            (0..count / 4).map(|j| slot(offset / 4 + j)).collect()
        } else {
            (0..count)
                .map(|j| {
                    let f = offset + j;
                    let swizzle = ["x", "y", "z", "w"][(f % 4) as usize];
                    format!("{}.{}", slot(f / 4), swizzle)
                })
                .collect()
        };
        Some(format!("{}({})", ty.trim(), parts.join(", ")))
    }

    /// Emit macros for `ty` at `offset`; structs recurse into their members
    fn emit(
        &mut self,
        ty: &str,
        macro_name: &str,
        offset: u32,
        stride: Option<u32>,
        location: &SourceLocation,
    ) -> Result<Vec<(String, String)>, FslError> {
        let shader = self.shader;
        if let Some(decl) = shader.struct_decl(ty) {
            let mut members = Vec::new();
            let mut member_offset = offset;
            for field in &decl.fields {
                if field.len.is_array() {
                    return Err(self.unsupported(location, format!("array member '{}' in a packed struct", field.name)));
                }
                let field_ty = field.base_type();
                let size = self
                    .size_of(&field_ty)
                    .ok_or_else(|| self.unsupported(location, format!("uniform of type '{}'", field_ty)))?;
                member_offset = align_up(member_offset, alignment(size));
                let member_macro = format!("{}_{}", macro_name, field.base_name().to_uppercase());
                let nested = self.emit(&field_ty, &member_macro, member_offset, stride, location)?;
                if nested.is_empty() {
                    members.push((field.base_name().to_string(), member_macro));
                } else {
                    members.extend(nested.into_iter().map(|(path, m)| (format!("{}.{}", field.base_name(), path), m)));
                }
                member_offset += size;
            }
            return Ok(members);
        }
        let expr = self
            .extraction(ty, offset, stride)
            .ok_or_else(|| self.unsupported(location, format!("uniform of type '{}'", ty)))?;
        let line = match stride {
            Some(_) => format!("#define {}(X) {}", macro_name, expr),
            None => format!("#define {} {}", macro_name, expr),
        };
        self.macros.push(line);
        Ok(Vec::new())
    }

    /// Pack one block field
    fn field(&mut self, field: &StructField, location: &SourceLocation) -> Result<(), FslError> {
        let ty = field.base_type();
        let name = field.base_name().to_string();
        let macro_name = format!("Get_{}", name.to_uppercase());
        let size = self
            .size_of(&ty)
            .ok_or_else(|| self.unsupported(location, format!("uniform of type '{}'", ty)))?;
        match field.len {
            ArrayLen::Unbounded => {
                return Err(self.unsupported(location, format!("unbounded uniform array '{}'", field.name)));
            }
            ArrayLen::Fixed(len) => {
                let stride = size.div_ceil(4);
                self.offset = align_up(self.offset, 4);
                self.indexed(&ty, &name, &macro_name, self.offset, stride, location)?;
                self.offset += stride * 4 * len;
            }
            ArrayLen::Scalar => {
                self.offset = align_up(self.offset, alignment(size));
                let members = self.emit(&ty, &macro_name, self.offset, None, location)?;
                if members.is_empty() {
                    self.rewrites.push(GetRewrite::Plain { from: format!("Get({})", name), to: macro_name });
                } else {
                    for (path, member_macro) in members {
                        self.rewrites.push(GetRewrite::Plain { from: format!("Get({}).{}", name, path), to: member_macro });
                    }
                }
                self.offset += size;
            }
        }
        Ok(())
    }

    /// Array of `ty` starting at `offset`, `stride` vec4s per element
    fn indexed(
        &mut self,
        ty: &str,
        name: &str,
        macro_name: &str,
        offset: u32,
        stride: u32,
        location: &SourceLocation,
    ) -> Result<(), FslError> {
        let members = self.emit(ty, macro_name, offset, Some(stride), location)?;
        self.rewrites.push(GetRewrite::Indexed {
            name: name.to_string(),
            macro_name: macro_name.to_string(),
            members,
        });
        Ok(())
    }

    /// `uniform float4` declaration covering every packed field
    fn declaration(&self, entries: u32) -> String {
        format!("uniform float4 {}[{}];", self.array, entries)
    }

    #[inline(always)]
    fn used_vec4s(&self) -> u32 {
        self.offset.div_ceil(4).max(1)
    }
}

/// Apply one indexed rewrite to a line
fn rewrite_indexed(text: &str, name: &str, macro_name: &str, members: &[(String, String)]) -> String {
    let pattern = format!("Get({})", name);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(&pattern) {
        let after = &rest[i + pattern.len()..];
        let boundary = rest[..i].chars().next_back().map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
        let close = after.starts_with('[').then(|| matching_bracket(after)).flatten();
        let (true, Some(close)) = (boundary, close) else {
            out.push_str(&rest[..i + pattern.len()]);
            rest = after;
            continue;
        };
        out.push_str(&rest[..i]);
        let index = after[1..close].trim();
        let mut tail = &after[close + 1..];
        // longest member path first
        let member = members
            .iter()
            .filter(|(path, _)| {
                tail.strip_prefix('.')
                    .and_then(|t| t.strip_prefix(path.as_str()))
                    .is_some_and(|t| !t.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
            })
            .max_by_key(|(path, _)| path.len());
        match member {
            Some((path, member_macro)) => {
                out.push_str(&format!("{}({})", member_macro, index));
                tail = &tail[1 + path.len()..];
            }
            None => out.push_str(&format!("{}({})", macro_name, index)),
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Float literals
// ============================================================================

/// Strip `f` suffixes from float literals: `1.0f` to `1.0`, `1.f` to `1.0`, `2f` to `2`
pub fn strip_float_suffixes(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push_str(&text[start..i]);
            continue;
        }
        let starts_number = c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        if !starts_number {
            let ch = text[i..].chars().next().unwrap_or_default();
            out.push(ch);
            i += ch.len_utf8().max(1);
            continue;
        }
        let start = i;
        if text[i..].starts_with("0x") || text[i..].starts_with("0X") {
            i += 2;
            while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                i += 1;
            }
            out.push_str(&text[start..i]);
            continue;
        }
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_digit() {
                i = j;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
        }
        let literal = &text[start..i];
        let suffixed = i < bytes.len()
            && (bytes[i] == b'f' || bytes[i] == b'F')
            && !bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_');
        out.push_str(literal);
        if suffixed {
            if literal.ends_with('.') {
                out.push('0');
            }
            i += 1;
        }
    }
    out
}

// ============================================================================
// Interface
// ============================================================================

/// Attribute name derived from a vertex input semantic
pub fn attribute_name(semantic: &str) -> Option<String> {
    let upper = semantic.to_uppercase();
    let name = match upper.as_str() {
        "POSITION" => "Position",
        "NORMAL" => "Normal",
        "COLOR" | "COLOR0" => "Color",
        "TANGENT" => "Tangent",
        "BINORMAL" => "Binormal",
        "JOINTS" => "Joints",
        "WEIGHTS" => "Weights",
        "TEXCOORD" | "TEXCOORD0" => "UV",
        other => {
            let n = other.strip_prefix("TEXCOORD")?;
            return n.parse::<u32>().ok().map(|n| format!("UV{}", n));
        }
    };
    Some(name.to_string())
}

/// Varying name shared by the vertex output and fragment input of a field
#[inline(always)]
fn varying_name(field: &str) -> String {
    format!("v_{}", field)
}

// ============================================================================
// Generator
// ============================================================================

struct GlesGenerator<'a> {
    platform: Platform,
    binary: &'a ShaderBinary,
    shader: &'a Shader,
    out: Emitter,
    scanner: Scanner,
    packer: Option<UniformPacker<'a>>,
    rewrites: Vec<GetRewrite>,
    open_struct: Option<String>,
    /// (field, expression) copied into the entry struct at `INIT_MAIN`
    inputs: Vec<(String, String)>,
    /// (target, field) written from the returned struct
    outputs: Vec<(String, String)>,
}

impl<'a> GlesGenerator<'a> {
    fn new(
        platform: Platform,
        config: &GenerateConfig,
        binary: &'a ShaderBinary,
        shader: &'a Shader,
    ) -> Result<Self, FslError> {
        let mut out = Emitter::new(config.debug, false);
        for line in header_comment(binary) {
            out.push(line);
        }
        out.push("#version 100");
        out.push("precision highp float;");
        out.push("precision highp int;");
        for line in common_defines(binary, shader, platform) {
            out.push(line);
        }
        out.extend_text(GLES_HEADER);
        out.push("");

        let mut gen = Self {
            platform,
            binary,
            shader,
            out,
            scanner: Scanner::new(),
            packer: None,
            rewrites: Vec::new(),
            open_struct: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        gen.plan_interface()?;
        Ok(gen)
    }

    fn unsupported(&self, location: SourceLocation, construct: impl Into<String>) -> FslError {
        FslError::unsupported(location, self.platform, construct)
    }

    /// Resolve where every entry struct field comes from and goes to
    fn plan_interface(&mut self) -> Result<(), FslError> {
        let shader = self.shader;
        for arg in shader.struct_args() {
            let Some(decl) = shader.struct_decl(&arg.ty) else {
                continue;
            };
            for field in &decl.fields {
                if field.len.is_array() {
                    return Err(self.unsupported(decl.location.clone(), format!("array varying '{}'", field.name)));
                }
                let base = field.base_name().to_string();
                let semantic = field.semantic_upper();
                let source = match (shader.stage, semantic.as_str()) {
                    (Stage::Frag, "SV_POSITION") => "vec4(gl_FragCoord.xyz, 1.0 / gl_FragCoord.w)".to_string(),
                    (Stage::Frag, "SV_ISFRONTFACE") => "gl_FrontFacing".to_string(),
                    (_, s) if s.starts_with("SV_") => {
                        return Err(self.unsupported(decl.location.clone(), format!("input semantic {}", field.semantic)));
                    }
                    (Stage::Vert, _) => attribute_name(&field.semantic).unwrap_or_else(|| base.clone()),
                    _ => varying_name(&base),
                };
                self.inputs.push((format!("{}.{}", arg.var, base), source));
            }
        }
        if let Some(decl) = shader.output_struct() {
            for field in &decl.fields {
                let base = field.base_name().to_string();
                let semantic = field.semantic_upper();
                let target = match (shader.stage, semantic.as_str()) {
                    (Stage::Vert, "SV_POSITION") => "gl_Position".to_string(),
                    (Stage::Vert, "SV_POINTSIZE") => "gl_PointSize".to_string(),
                    (Stage::Frag, "SV_TARGET") | (Stage::Frag, "SV_TARGET0") => "gl_FragColor".to_string(),
                    (Stage::Frag, "SV_DEPTH") => "gl_FragDepth".to_string(),
                    (Stage::Vert, s) if !s.starts_with("SV_") => varying_name(&base),
                    _ => {
                        return Err(self.unsupported(decl.location.clone(), format!("output semantic {}", field.semantic)));
                    }
                };
                self.outputs.push((target, base));
            }
        }
        Ok(())
    }

    fn line(&mut self, line: &SourceLine) -> Result<(), FslError> {
        let text = line.text.as_str();
        let indent = indentation(text).to_string();
        match self.scanner.next(text) {
            LineEvent::BlockOpen { kind: BlockKind::Struct, args } => {
                self.open_struct = args.first().cloned();
                self.out.push(text);
            }
            LineEvent::BlockOpen { args, .. } => {
                let name = args.first().cloned().unwrap_or_default();
                self.packer = Some(UniformPacker::new(self.shader, self.platform, &name));
            }
            LineEvent::Field { kind: BlockKind::Struct, args, .. } => {
                self.out.push(format!("{}{} {};", indent, args[0], args[1]));
            }
            LineEvent::Field { args, .. } => {
                let location = line.location();
                let len = self.field_len(&args[1]);
                let field = StructField { ty: args[0].clone(), name: args[1].clone(), semantic: args[2].clone(), len };
                if let Some(packer) = self.packer.as_mut() {
                    packer.field(&field, &location)?;
                }
            }
            LineEvent::BlockClose(BlockKind::Struct) => {
                self.out.push(text);
                if let Some(name) = self.open_struct.take() {
                    self.interface_declarations(&name);
                }
            }
            LineEvent::BlockClose(_) => {
                if let Some(packer) = self.packer.take() {
                    for m in &packer.macros {
                        self.out.push(m.clone());
                    }
                    self.out.push(packer.declaration(packer.used_vec4s()));
                    self.rewrites.extend(packer.rewrites);
                }
                self.out.resync(line);
            }
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
            LineEvent::GroupShared { .. } => {
                return Err(self.unsupported(line.location(), "GroupShared"));
            }
            LineEvent::SrtBegin | LineEvent::SrtEnd | LineEvent::DeclareResources | LineEvent::EarlyFragmentTests => {
                self.out.push(format!("// {}", text.trim()));
            }
            LineEvent::NumThreads { .. } => {
                return Err(self.unsupported(line.location(), "NUM_THREADS"));
            }
            // no descriptor indexing on these devices
            LineEvent::NonUniformBegin { .. } | LineEvent::NonUniformEnd => {}
            LineEvent::Entry { .. } => {
                self.entry(line);
                self.out.resync(line);
            }
            LineEvent::InitMain => {
                self.init_main(&indent);
                self.out.resync(line);
            }
            LineEvent::Return { value } => {
                let statement = self.return_statement(value.as_deref());
                let rewritten = self.rewrite_body(&replace_return(text, &statement));
                self.out.push(rewritten);
                self.out.resync(line);
            }
            LineEvent::Blank | LineEvent::Comment => self.out.push(text),
            LineEvent::Define { .. } | LineEvent::Other => {
                // the opening brace of a packed block has no counterpart
                if self.packer.is_some() {
                    return Ok(());
                }
                let rewritten = self.rewrite_body(text);
                self.out.push(rewritten);
            }
        }
        Ok(())
    }

    fn field_len(&self, name: &str) -> ArrayLen {
        crate::reader::macros::array_len(name, &self.shader.defines).unwrap_or(ArrayLen::Unbounded)
    }

    fn rewrite_body(&self, text: &str) -> String {
        let mut text = text.to_string();
        let mut plain: Vec<(&str, &str)> = Vec::new();
        for rewrite in &self.rewrites {
            match rewrite {
                GetRewrite::Indexed { name, macro_name, members } => {
                    text = rewrite_indexed(&text, name, macro_name, members);
                }
                GetRewrite::Plain { from, to } => plain.push((from.as_str(), to.as_str())),
            }
        }
        plain.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));
        for (from, to) in plain {
            text = text.replace(from, to);
        }
        strip_float_suffixes(&text)
    }

    fn interface_declarations(&mut self, name: &str) {
        let shader = self.shader;
        let Some(decl) = shader.struct_decl(name) else {
            return;
        };
        let is_input = shader.struct_args().any(|a| a.ty == name);
        let is_output = shader.output_struct().is_some_and(|s| s.name == name);
        if is_input {
            for field in &decl.fields {
                if field.semantic_upper().starts_with("SV_") {
                    continue;
                }
                let global = match shader.stage {
                    Stage::Vert => attribute_name(&field.semantic).unwrap_or_else(|| field.base_name().to_string()),
                    _ => varying_name(field.base_name()),
                };
                self.out.push(format!("RES_IN({}, {});", field.base_type(), global));
            }
        }
        if is_output && shader.stage == Stage::Vert {
            for field in &decl.fields {
                if !field.semantic_upper().starts_with("SV_") {
                    self.out.push(format!("RES_OUT({}, {});", field.base_type(), varying_name(field.base_name())));
                }
            }
        }
    }

    fn resource(&mut self, resource: &ResourceDecl) -> Result<(), FslError> {
        let base = resource.base_name().to_string();
        let macro_name = format!("Get_{}", base.to_uppercase());
        match resource.kind() {
            ResourceKind::Sampler => {
                self.out.push(format!("#define {} NO_SAMPLER", macro_name));
                self.rewrites.push(GetRewrite::Plain { from: format!("Get({})", base), to: macro_name });
            }
            ResourceKind::Texture => {
                self.out.push(format!("uniform {} {};", resource.ty, resource.name));
                self.out.push(format!("#define {} {}", macro_name, base));
                self.rewrites.push(GetRewrite::Plain { from: format!("Get({})", base), to: macro_name });
            }
            ResourceKind::Buffer(_) | ResourceKind::ByteBuffer(_) => {
                if resource.len.is_array() {
                    return Err(self.unsupported(
                        resource.location.clone(),
                        format!("array of buffers '{}'", resource.name),
                    ));
                }
                let element = match resource.kind() {
                    ResourceKind::ByteBuffer(_) => "uint".to_string(),
                    _ => resource.element_type().unwrap_or_else(|| "float4".to_string()),
                };
                let mut packer = UniformPacker::new(self.shader, self.platform, &base);
                let size = packer
                    .size_of(&element)
                    .ok_or_else(|| self.unsupported(resource.location.clone(), format!("buffer of '{}'", element)))?;
                packer.indexed(&element, &base, &macro_name, 0, size.div_ceil(4), &resource.location)?;
                for m in &packer.macros {
                    self.out.push(m.clone());
                }
                self.out.push(packer.declaration(BUFFER_CAPACITY));
                self.rewrites.extend(packer.rewrites);
                debug!("{}: {} packs buffer '{}' into uniforms", self.platform, self.binary.filename, base);
            }
            ResourceKind::StorageTexture(_) => {
                return Err(self.unsupported(resource.location.clone(), format!("read-write image '{}'", resource.name)));
            }
            ResourceKind::AccelerationStructure => {
                return Err(self.unsupported(
                    resource.location.clone(),
                    format!("acceleration structure '{}'", resource.name),
                ));
            }
        }
        Ok(())
    }

    fn entry(&mut self, line: &SourceLine) {
        let shader = self.shader;
        for flat in shader.flat_args() {
            if flat.semantic == "SV_INSTANCEID" {
                self.out.push(format!("uniform int {};", flat.semantic));
            }
        }
        self.out.push(format!("{}void main(){}", indentation(&line.text), entry_tail(&line.text)));
    }

    fn init_main(&mut self, indent: &str) {
        self.out.push(format!("{}//INIT_MAIN;", indent));
        let shader = self.shader;
        for arg in shader.struct_args() {
            self.out.push(format!("{}{} {};", indent, arg.ty, arg.var));
        }
        for (target, source) in &self.inputs {
            self.out.push(format!("{}{} = {};", indent, target, source));
        }
        for flat in shader.flat_args() {
            let source = match flat.semantic {
                "SV_POSITION" => "gl_FragCoord",
                "SV_ISFRONTFACE" => "gl_FrontFacing",
                other => other,
            };
            self.out.push(format!("{}{} {} = {}({});", indent, flat.ty, flat.var, flat.ty, source));
        }
    }

    fn return_statement(&self, value: Option<&str>) -> String {
        let Some(value) = value else {
            return "return".to_string();
        };
        let shader = self.shader;
        let Some(ret) = shader.return_type.as_deref() else {
            return "return".to_string();
        };
        if shader.output_struct().is_some() {
            let mut stmt = format!("{{ {} _fsl_out = {}; ", ret, value);
            for (target, field) in &self.outputs {
                stmt.push_str(&format!("{} = _fsl_out.{}; ", target, field));
            }
            stmt.push_str("return; }");
            return stmt;
        }
        match (shader.stage, ret) {
            (Stage::Vert, _) => format!("{{ gl_Position = {}; return; }}", value),
            _ if shader.returns_depth() => format!("{{ gl_FragDepth = {}; return; }}", value),
            // scalar colour splats across the target
            (_, "float") => format!("{{ gl_FragColor = float4({}); return; }}", value),
            _ => format!("{{ gl_FragColor = {}; return; }}", value),
        }
    }
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
STRUCT(VSOutput)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
STRUCT(Light)
{
\tDATA(float3, position, None);
\tDATA(float, radius, None);
};
CBUFFER(Uniforms, UPDATE_FREQ_PER_FRAME, b0, binding = 0)
{
\tDATA(float4x4, mvp, None);
\tDATA(float, scale, None);
\tDATA(Light, lights[2], None);
};
RES(Tex2D(float4), heightMap, UPDATE_FREQ_NONE, t0, binding = 1);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 2);
VSOutput VS_MAIN(VSInput(In), SV_InstanceID(uint) instance)
{
\tINIT_MAIN;
\tVSOutput Out;
\tfloat h = SampleLvlTex2D(Get(heightMap), Get(linearSampler), In.UV, 0).x * Get(scale);
\tfloat3 p = In.Position + Get(lights)[instance].position * 2.0f;
\tOut.Position = mul(Get(mvp), float4(p, 1.f));
\tOut.UV = In.UV;
\tRETURN(Out);
}
";

    fn binary(stage: Stage, filename: &str, text: &str) -> ShaderBinary {
        let mut binary = ShaderBinary::new(stage, filename, "list.fsl");
        binary.lines = lines_from_text(text, "shader.fsl");
        binary
    }

    fn gles(b: &ShaderBinary) -> Result<GeneratedShader, FslError> {
        generate_source(Platform::Gles, &GenerateConfig::default(), b)
    }

    #[test]
    fn test_uniform_packing() {
        let out = gles(&binary(Stage::Vert, "a.vert", VERT)).unwrap().source;
        assert!(out.contains("#version 100"));
        assert!(out.contains("#define Get_MVP float4x4(Uniforms[0], Uniforms[1], Uniforms[2], Uniforms[3])"));
        assert!(out.contains("#define Get_SCALE float(Uniforms[4].x)"));
        assert!(out.contains(
            "#define Get_LIGHTS_POSITION(X) float3(Uniforms[5 + (X) * 2].x, Uniforms[5 + (X) * 2].y, Uniforms[5 + (X) * 2].z)"
        ));
        assert!(out.contains("#define Get_LIGHTS_RADIUS(X) float(Uniforms[6 + (X) * 2].x)"));
        assert!(out.contains("uniform float4 Uniforms[9];"));
        assert!(!out.contains("CBUFFER"));
    }

    #[test]
    fn test_body_rewrites() {
        let out = gles(&binary(Stage::Vert, "a.vert", VERT)).unwrap().source;
        assert!(out.contains("uniform Tex2D(float4) heightMap;"));
        assert!(out.contains("#define Get_LINEARSAMPLER NO_SAMPLER"));
        assert!(out.contains("SampleLvlTex2D(Get_HEIGHTMAP, Get_LINEARSAMPLER, In.UV, 0).x * Get_SCALE;"));
        assert!(out.contains("float3 p = In.Position + Get_LIGHTS_POSITION(instance) * 2.0;"));
        assert!(out.contains("Out.Position = mul(Get_MVP, float4(p, 1.0));"));
    }

    #[test]
    fn test_interface() {
        let out = gles(&binary(Stage::Vert, "a.vert", VERT)).unwrap().source;
        assert!(out.contains("RES_IN(float3, Position);"));
        assert!(out.contains("RES_IN(float2, UV);"));
        assert!(out.contains("RES_OUT(float2, v_UV);"));
        assert!(out.contains("uniform int SV_INSTANCEID;"));
        assert!(out.contains("\tuint instance = uint(SV_INSTANCEID);"));
        assert!(out.contains("\tIn.UV = UV;"));
        assert!(out.contains("{ VSOutput _fsl_out = Out; gl_Position = _fsl_out.Position; v_UV = _fsl_out.UV; return; };"));
    }

    #[test]
    fn test_fragment_color() {
        let src = "\
STRUCT(PsIn)
{
\tDATA(float4, Position, SV_Position);
\tDATA(float2, UV, TEXCOORD0);
};
RES(Tex2D(float4), albedo, UPDATE_FREQ_NONE, t0, binding = 0);
RES(SamplerState, linearSampler, UPDATE_FREQ_NONE, s0, binding = 1);
float4 PS_MAIN(PsIn(In))
{
\tINIT_MAIN;
\tRETURN(SampleTex2D(Get(albedo), Get(linearSampler), In.UV) * 0.5f);
}
";
        let out = gles(&binary(Stage::Frag, "a.frag", src)).unwrap().source;
        assert!(out.contains("RES_IN(float2, v_UV);"));
        assert!(out.contains("\tIn.Position = vec4(gl_FragCoord.xyz, 1.0 / gl_FragCoord.w);"));
        assert!(out.contains("{ gl_FragColor = SampleTex2D(Get_ALBEDO, Get_LINEARSAMPLER, In.UV) * 0.5; return; };"));
    }

    #[test]
    fn test_scalar_fragment_return() {
        let color = "float PS_MAIN()\n{\n\tINIT_MAIN;\n\tRETURN(0.5f);\n}\n";
        let out = gles(&binary(Stage::Frag, "a.frag", color)).unwrap().source;
        assert!(out.contains("{ gl_FragColor = float4(0.5); return; };"));
        assert!(!out.contains("gl_FragDepth"));

        let depth = color.replacen("float", "SV_Depth", 1);
        let out = gles(&binary(Stage::Frag, "a.frag", &depth)).unwrap().source;
        assert!(out.contains("{ gl_FragDepth = 0.5; return; };"));
    }

    #[test]
    fn test_buffer_becomes_uniform_array() {
        let src = "\
RES(Buffer(float4), colors, UPDATE_FREQ_NONE, t0, binding = 0);
float4 PS_MAIN(SV_Position(float4) pos)
{
\tINIT_MAIN;
\tRETURN(Get(colors)[2]);
}
";
        let out = gles(&binary(Stage::Frag, "a.frag", src)).unwrap().source;
        assert!(out.contains("#define Get_COLORS(X) float4(colors[0 + (X) * 1])"));
        assert!(out.contains("uniform float4 colors[256];"));
        assert!(out.contains("gl_FragColor = Get_COLORS(2);"));
    }

    #[test]
    fn test_buffer_arrays_rejected() {
        let src = "\
RES(Buffer(float4), colors[2], UPDATE_FREQ_NONE, t0, binding = 0);
float4 PS_MAIN()
{
\tINIT_MAIN;
\tRETURN(float4(0, 0, 0, 0));
}
";
        let err = gles(&binary(Stage::Frag, "a.frag", src)).unwrap_err();
        assert!(matches!(err, FslError::Unsupported { platform: Platform::Gles, .. }));
        assert!(err.to_string().contains("colors"));
    }

    #[test]
    fn test_storage_images_and_compute_rejected() {
        let src = "RES(RWTex2D(float4), target, UPDATE_FREQ_NONE, u0, binding = 0);\nfloat4 PS_MAIN()\n{\n\tRETURN(float4(0, 0, 0, 0));\n}\n";
        assert!(matches!(gles(&binary(Stage::Frag, "a.frag", src)), Err(FslError::Unsupported { .. })));
        let comp = "void CS_MAIN()\n{\n\tRETURN();\n}\n";
        assert!(matches!(gles(&binary(Stage::Comp, "a.comp", comp)), Err(FslError::Unsupported { .. })));
    }

    #[test]
    fn test_non_uniform_markers_dropped() {
        let src = "\
RES(Tex2D(float4), textures[4], UPDATE_FREQ_NONE, t0, binding = 0);
float4 PS_MAIN()
{
\tINIT_MAIN;
\tint i = 1;
\tBeginNonUniformResourceIndex(i, 4);
\tfloat4 c = SampleTex2D(Get(textures)[i], NO_SAMPLER, float2(0.5f, 0.5f));
\tEndNonUniformResourceIndex();
\tRETURN(c);
}
";
        let out = gles(&binary(Stage::Frag, "a.frag", src)).unwrap().source;
        assert!(!out.contains("NonUniformResourceIndex"));
        assert!(out.contains("uniform Tex2D(float4) textures[4];"));
        assert!(out.contains("SampleTex2D(Get_TEXTURES[i], NO_SAMPLER, float2(0.5, 0.5))"));
    }

    #[test]
    fn test_strip_float_suffixes() {
        assert_eq!(strip_float_suffixes("1.0f + 1.f - 2f"), "1.0 + 1.0 - 2");
        assert_eq!(strip_float_suffixes("float4 x = 0x1f + 1e-3f;"), "float4 x = 0x1f + 1e-3;");
        assert_eq!(strip_float_suffixes("tex2f(a) .5f"), "tex2f(a) .5");
    }

    #[test]
    fn test_attribute_names() {
        assert_eq!(attribute_name("TEXCOORD0").as_deref(), Some("UV"));
        assert_eq!(attribute_name("texcoord3").as_deref(), Some("UV3"));
        assert_eq!(attribute_name("COLOR0").as_deref(), Some("Color"));
        assert_eq!(attribute_name("CUSTOM"), None);
    }
}
