//! HLSL generator
//!
//! Covers Direct3D 11/12, Xbox, Scarlett and the PlayStation targets. The
//! output keeps the FSL text and rewrites only declaration lines and the
//! entry point:
//!
//! - `RES(...)` gets an `s`/`t`/`u`/`b` register per (class, space), or on
//!   PlayStation a member slot in the shader resource table
//! - the entry is renamed to `main` with HLSL semantics on flat arguments
//! - `NUM_THREADS`, `EARLY_FRAGMENT_TESTS` and the root signature become
//!   entry attributes
//!
//! Author: Moroya Sakamoto

use super::binding::{BindingAllocator, BindingKind, HlslRegisters};
use super::passthrough::{hlsl_geometry, passthrough_filename, PRIMITIVE_ID_FIELD, PRIMITIVE_ID_SEMANTIC};
use super::srt::{SrtTable, SRT_PARAMETER};
use super::{
    common_defines, entry_tail, get_alias, header_comment, replace_invocation, replace_return, AuxiliaryShader,
    Emitter, GenerateConfig, GeneratedShader, D3D_HEADER,
};
use crate::error::{FslError, SourceLocation};
use crate::reader::macros::{array_base_name, indentation, macro_name, ArrayLen};
use crate::reader::{BlockKind, EntryArg, LineEvent, ResourceDecl, Scanner, Shader};
use crate::types::{Derivative, Platform, ShaderBinary, SourceLine, Stage};
use log::debug;

/// Generate HLSL for `platform`
pub fn generate(
    platform: Platform,
    config: &GenerateConfig,
    binary: &ShaderBinary,
    shader: &Shader,
) -> Result<GeneratedShader, FslError> {
    let mut gen = HlslGenerator::new(platform, config, binary, shader)?;
    for line in &shader.lines {
        gen.line(line)?;
    }
    gen.finish()
}

// ============================================================================
// Generator state
// ============================================================================

struct HlslGenerator<'a> {
    platform: Platform,
    binary: &'a ShaderBinary,
    shader: &'a Shader,
    out: Emitter,
    scanner: Scanner,
    registers: HlslRegisters,
    srt: SrtTable,
    /// Emitter position the resource table is inserted at
    srt_at: Option<usize>,
    /// `DECLARE_RESOURCES()` fixed the table position
    srt_pinned: bool,
    nuri: Vec<(String, SourceLocation)>,
    open_struct: Option<String>,
    root_signature: Option<String>,
    early_depth: bool,
    /// Fragment input variable receiving the primitive id from the pass-through stage
    passthrough: Option<PassthroughInput>,
}

struct PassthroughInput {
    ty: String,
    var: String,
    target: String,
}

impl<'a> HlslGenerator<'a> {
    fn new(
        platform: Platform,
        config: &GenerateConfig,
        binary: &'a ShaderBinary,
        shader: &'a Shader,
    ) -> Result<Self, FslError> {
        let mut out = Emitter::new(config.debug, true);
        for line in header_comment(binary) {
            out.push(line);
        }
        for line in common_defines(binary, shader, platform) {
            out.push(line);
        }
        out.extend_text(D3D_HEADER);
        out.push("");

        let root_signature = match (&config.root_signature, platform) {
            (Some(text), Platform::Direct3D12 | Platform::Xbox | Platform::Scarlett) => {
                out.extend_text(text);
                out.push("");
                Some(root_signature_name(text)?)
            }
            _ => None,
        };

        let passthrough = passthrough_input(platform, shader)?;

        Ok(Self {
            platform,
            binary,
            shader,
            out,
            scanner: Scanner::new(),
            registers: HlslRegisters::new(),
            srt: SrtTable::new(),
            srt_at: None,
            srt_pinned: false,
            nuri: Vec::new(),
            open_struct: None,
            root_signature,
            early_depth: false,
            passthrough,
        })
    }

    fn line(&mut self, line: &SourceLine) -> Result<(), FslError> {
        let text = line.text.as_str();
        let indent = indentation(text).to_string();
        match self.scanner.next(text) {
            LineEvent::BlockOpen { kind, args } => self.block_open(kind, &args, line)?,
            LineEvent::Field { kind, args, .. } => {
                let field = match kind {
                    BlockKind::Struct if args[2] != "None" => format!("{}{} {} : {};", indent, args[0], args[1], args[2]),
                    _ => format!("{}{} {};", indent, args[0], args[1]),
                };
                self.out.push(field);
                if kind != BlockKind::Struct && self.platform.is_console_srt() {
                    let name = array_base_name(&args[1]);
                    self.out.push(format!("#define {} {}", get_alias(name), name));
                }
            }
            LineEvent::BlockClose(kind) => {
                if kind == BlockKind::Struct {
                    let name = self.open_struct.take();
                    if let Some(pt) = &self.passthrough {
                        if name.as_deref() == Some(pt.ty.as_str()) {
                            self.out.push(format!(
                                "\tnointerpolation uint {} : {};",
                                PRIMITIVE_ID_FIELD, PRIMITIVE_ID_SEMANTIC
                            ));
                        }
                    }
                }
                self.out.push(text);
            }
            LineEvent::Resource { .. } => {
                let location = line.location();
                let shader = self.shader;
                let resource = shader
                    .resources
                    .iter()
                    .find(|r| r.location == location)
                    .ok_or_else(|| FslError::declaration(location.clone(), "Resource was not read"))?;
                self.resource(resource, &indent)?;
                self.out.resync(line);
            }
            LineEvent::GroupShared { args } => {
                let keyword = if self.platform.is_console_srt() { "thread_group_memory" } else { "groupshared" };
                self.out.push(format!("{}{} {} {};", indent, keyword, args[0], args[1]));
                if self.platform.is_console_srt() {
                    let name = array_base_name(&args[1]);
                    self.out.push(format!("#define {} {}", get_alias(name), name));
                }
            }
            LineEvent::SrtBegin | LineEvent::SrtEnd => self.out.push(format!("// {}", text.trim())),
            LineEvent::DeclareResources => {
                self.out.push(format!("// {}", text.trim()));
                if self.platform.is_console_srt() {
                    self.srt_at = Some(self.out.len());
                    self.srt_pinned = true;
                }
            }
            LineEvent::NumThreads { .. } => self.out.push(format!("// {}", text.trim())),
            LineEvent::EarlyFragmentTests => {
                self.early_depth = true;
                self.out.push(format!("// {}", text.trim()));
            }
            LineEvent::NonUniformBegin { args } => {
                let index = args.first().cloned().unwrap_or_default();
                self.out.push(format!("#define {0} NonUniformResourceIndex({0})", index));
                self.nuri.push((index, line.location()));
            }
            LineEvent::NonUniformEnd => {
                let Some((index, _)) = self.nuri.pop() else {
                    return Err(FslError::declaration(
                        line.location(),
                        "EndNonUniformResourceIndex without a matching BeginNonUniformResourceIndex",
                    ));
                };
                self.out.push(format!("#undef {}", index));
            }
            LineEvent::Entry { .. } => {
                self.entry(line)?;
                self.out.resync(line);
            }
            LineEvent::InitMain => {
                self.out.push(format!("{}//INIT_MAIN;", indent));
                if let Some(pt) = &self.passthrough {
                    self.out.push(format!("{}uint {} = {}.{};", indent, pt.target, pt.var, PRIMITIVE_ID_FIELD));
                }
                self.out.resync(line);
            }
            LineEvent::Return { value } => {
                let replacement = match value {
                    Some(v) => format!("return {}", v),
                    None => "return".to_string(),
                };
                self.out.push(replace_return(text, &replacement));
                self.out.resync(line);
            }
            LineEvent::Blank | LineEvent::Comment | LineEvent::Define { .. } | LineEvent::Other => {
                self.out.push(text);
            }
        }
        Ok(())
    }

    fn block_open(&mut self, kind: BlockKind, args: &[String], line: &SourceLine) -> Result<(), FslError> {
        let text = line.text.as_str();
        match kind {
            BlockKind::Struct => {
                self.open_struct = args.first().cloned();
                self.out.push(text);
            }
            BlockKind::CBuffer => {
                let decl = self
                    .shader
                    .cbuffers
                    .iter()
                    .find(|c| c.location == line.location())
                    .ok_or_else(|| FslError::declaration(line.location(), "Constant buffer was not read"))?;
                let space = decl.frequency.index();
                let slot = self
                    .registers
                    .allocate(BindingKind::ConstantBuffer, space, 1)
                    .map_err(|m| FslError::declaration(line.location(), m))?;
                let reg = self.register('b', slot, space);
                self.out.push(replace_invocation(text, "CBUFFER", &format!("cbuffer {} : {}", decl.name, reg)));
            }
            BlockKind::PushConstant => {
                let name = args.first().cloned().unwrap_or_default();
                let slot = self
                    .registers
                    .allocate(BindingKind::ConstantBuffer, 0, 1)
                    .map_err(|m| FslError::declaration(line.location(), m))?;
                let reg = self.register('b', slot, 0);
                self.out.push(replace_invocation(text, "PUSH_CONSTANT", &format!("cbuffer {} : {}", name, reg)));
            }
        }
        self.out.resync(line);
        Ok(())
    }

    fn resource(&mut self, resource: &ResourceDecl, indent: &str) -> Result<(), FslError> {
        if self.platform.is_console_srt() {
            self.srt.add(resource);
            if !self.srt_pinned {
                self.srt_at = Some(self.out.len());
            }
            return Ok(());
        }
        let kind = BindingKind::of(resource);
        let space = resource.frequency.index();
        let slot = self
            .registers
            .allocate(kind, space, resource.len.slots())
            .map_err(|m| FslError::declaration(resource.location.clone(), m))?;
        if resource.len == ArrayLen::Unbounded {
            self.registers.close(kind, space, resource.base_name());
        }
        let reg = self.register(kind.hlsl_register_class(), slot, space);
        self.out.push(format!("{}{} {} : {};", indent, resource.ty, resource.name, reg));
        Ok(())
    }

    fn register(&self, class: char, slot: u32, space: u32) -> String {
        if self.platform.has_register_spaces() && !self.platform.is_console_srt() {
            format!("register({}{}, space{})", class, slot, space)
        } else {
            format!("register({}{})", class, slot)
        }
    }

    fn entry(&mut self, line: &SourceLine) -> Result<(), FslError> {
        let shader = self.shader;
        if self.srt_at.is_none() && self.platform.is_console_srt() {
            self.srt_at = Some(self.out.len());
        }
        if let Some(name) = &self.root_signature {
            self.out.push(format!("[RootSignature({})]", name));
        }
        if let Some([x, y, z]) = shader.num_threads.filter(|_| shader.stage == Stage::Comp) {
            self.out.push(format!("[numthreads({}, {}, {})]", x, y, z));
        }
        if self.early_depth && shader.stage == Stage::Frag {
            self.out.push("[earlydepthstencil]");
        }

        let mut params = Vec::with_capacity(shader.entry_args.len() + 1);
        for arg in &shader.entry_args {
            match arg {
                EntryArg::Struct(s) => params.push(format!("{} {}", s.ty, s.var)),
                EntryArg::Flat(f) => {
                    if self.passthrough.is_some() && f.semantic == "SV_PRIMITIVEID" {
                        continue;
                    }
                    params.push(format!("{} {} : {}", f.ty, f.var, macro_name(&f.raw_type)));
                }
            }
        }
        if self.platform.is_console_srt() && !shader.resources.is_empty() {
            params.push(SRT_PARAMETER.to_string());
        }

        let ret = match shader.return_type.as_deref() {
            _ if shader.returns_depth() => "float",
            Some(ty) => ty,
            None => "void",
        };
        let semantic = match (shader.returns_value(), shader.stage) {
            (true, Stage::Vert) => " : SV_POSITION",
            (true, Stage::Frag) if shader.returns_depth() => " : SV_DEPTH",
            (true, Stage::Frag) => " : SV_TARGET",
            _ => "",
        };
        self.out.push(format!(
            "{}{} main({}){}{}",
            indentation(&line.text),
            ret,
            params.join(", "),
            semantic,
            entry_tail(&line.text)
        ));
        Ok(())
    }

    fn finish(mut self) -> Result<GeneratedShader, FslError> {
        if let Some((index, location)) = self.nuri.pop() {
            return Err(FslError::declaration(
                location,
                format!("BeginNonUniformResourceIndex({}) is never closed", index),
            ));
        }
        if !self.srt.is_empty() {
            let at = self.srt_at.unwrap_or(0);
            let mut table = vec![String::new()];
            table.extend(self.srt.declarations());
            table.push(String::new());
            self.out.insert_lines(at, table);
        }

        let mut auxiliary = Vec::new();
        let shader = self.shader;
        if let Some((pt, input)) =
            self.passthrough.as_ref().and_then(|pt| shader.struct_decl(&pt.ty).map(|input| (pt, input)))
        {
            debug!("{}: pass-through geometry stage for {} ({})", self.platform, self.binary.filename, pt.var);
            auxiliary.push(AuxiliaryShader {
                stage: Stage::Geom,
                filename: passthrough_filename(&self.binary.filename),
                source: hlsl_geometry(self.platform, self.binary, input),
            });
        }

        Ok(GeneratedShader {
            source: self.out.finish(),
            derivatives: vec![Derivative::default()],
            auxiliary,
            num_threads: self.shader.num_threads,
            wave_ops: self.shader.wave_ops,
        })
    }
}

/// First `#define` name in a root signature source
fn root_signature_name(text: &str) -> Result<String, FslError> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("#define "))
        .filter_map(|rest| rest.split_whitespace().next())
        .next()
        .map(str::to_string)
        .ok_or_else(|| FslError::Config("Root signature file has no #define naming the signature".to_string()))
}

/// PlayStation fragment shaders read `SV_PrimitiveID` through a pass-through stage
fn passthrough_input(platform: Platform, shader: &Shader) -> Result<Option<PassthroughInput>, FslError> {
    if !platform.is_console_srt() || shader.stage != Stage::Frag {
        return Ok(None);
    }
    let Some(primitive) = shader.flat_arg("SV_PRIMITIVEID") else {
        return Ok(None);
    };
    let Some(input) = shader.struct_args().next() else {
        return Err(FslError::unsupported(
            shader.entry_location(),
            platform,
            "SV_PrimitiveID without a fragment input struct",
        ));
    };
    Ok(Some(PassthroughInput { ty: input.ty.clone(), var: input.var.clone(), target: primitive.var.clone() }))
}
