//! Structured shader description
//!
//! [`read_shader`] walks the lines of one stage block once and collects the
//! lookup tables every generator consults while rewriting: structs,
//! constant blocks, resources, group-shared memory and the classified entry
//! signature.
//!
//! Author: Moroya Sakamoto

use super::decl::{
    flat_semantic, CBufferDecl, EntryArg, FlatArg, GroupSharedDecl, PushConstantDecl,
    ResourceDecl, StructArg, StructDecl, StructField,
};
use super::macros::{
    array_len, macro_args, macro_body, macro_name, matching_paren, resolve_uint, strip_comment,
};
use super::scanner::{entry_marker, BlockKind, LineEvent, Scanner};
use crate::error::{FslError, SourceLocation};
use crate::types::{ShaderBinary, SourceLine, Stage, UpdateFrequency, WaveOpsFlags};
use std::collections::HashMap;

/// Structured description of one stage block
#[derive(Debug, Clone)]
pub struct Shader {
    /// Entry stage
    pub stage: Stage,
    /// Source lines with includes expanded
    pub lines: Vec<SourceLine>,
    /// Entry return type, `None` for `void`
    pub return_type: Option<String>,
    /// Classified entry arguments in signature order
    pub entry_args: Vec<EntryArg>,
    /// Index of the entry line in `lines`
    pub entry_line: usize,
    /// Declared structs
    pub structs: Vec<StructDecl>,
    /// Constant buffers
    pub cbuffers: Vec<CBufferDecl>,
    /// Push constant blocks
    pub push_constants: Vec<PushConstantDecl>,
    /// Individually declared resources
    pub resources: Vec<ResourceDecl>,
    /// Group-shared declarations
    pub group_shared: Vec<GroupSharedDecl>,
    /// Object-like `#define`s plus the block defines
    pub defines: HashMap<String, String>,
    /// Wave operations requested by `ENABLE_WAVEOPS`
    pub wave_ops: WaveOpsFlags,
    /// `NUM_THREADS` of a compute entry
    pub num_threads: Option<[u32; 3]>,
}

impl Shader {
    /// Struct by name
    pub fn struct_decl(&self, name: &str) -> Option<&StructDecl> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// True when `name` is a declared struct
    #[inline(always)]
    pub fn is_struct(&self, name: &str) -> bool {
        self.struct_decl(name).is_some()
    }

    /// Declared struct returned by the entry point
    pub fn output_struct(&self) -> Option<&StructDecl> {
        self.return_type.as_deref().and_then(|t| self.struct_decl(t))
    }

    /// Struct-typed entry arguments
    pub fn struct_args(&self) -> impl Iterator<Item = &StructArg> {
        self.entry_args.iter().filter_map(|a| match a {
            EntryArg::Struct(s) => Some(s),
            EntryArg::Flat(_) => None,
        })
    }

    /// Flat built-in entry arguments
    pub fn flat_args(&self) -> impl Iterator<Item = &FlatArg> {
        self.entry_args.iter().filter_map(|a| match a {
            EntryArg::Flat(f) => Some(f),
            EntryArg::Struct(_) => None,
        })
    }

    /// Flat argument bound to `semantic`
    pub fn flat_arg(&self, semantic: &str) -> Option<&FlatArg> {
        self.flat_args().find(|f| f.semantic == semantic)
    }

    /// Resource by base name
    pub fn resource(&self, base_name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.base_name() == base_name)
    }

    /// Location of the entry line
    pub fn entry_location(&self) -> SourceLocation {
        self.lines
            .get(self.entry_line)
            .map(SourceLine::location)
            .unwrap_or_else(|| SourceLocation::new("<unknown>", 0))
    }

    /// Return type is a scalar/vector rather than a declared struct
    pub fn returns_value(&self) -> bool {
        self.return_type.is_some() && self.output_struct().is_none()
    }

    /// Fragment entry writing depth through an `SV_Depth` return type
    pub fn returns_depth(&self) -> bool {
        self.stage == Stage::Frag
            && self.returns_value()
            && self.return_type.as_deref().is_some_and(|t| t.to_ascii_uppercase().contains("SV_DEPTH"))
    }
}

// ============================================================================
// Reader
// ============================================================================

struct OpenBlock {
    kind: BlockKind,
    args: Vec<String>,
    fields: Vec<StructField>,
    location: SourceLocation,
}

/// Read the structured description of a shader binary
pub fn read_shader(binary: &ShaderBinary) -> Result<Shader, FslError> {
    let defines = binary.defines.iter().cloned().collect();
    read_lines(binary.stage, &binary.lines, defines)
        .map_err(|e| with_fallback_location(e, binary))
}

fn with_fallback_location(err: FslError, binary: &ShaderBinary) -> FslError {
    match err {
        FslError::Declaration { location, message } if location.line == 0 && location.file.as_os_str().is_empty() => {
            FslError::declaration(binary.location(), message)
        }
        other => other,
    }
}

/// Read a structured description from raw lines
pub fn read_lines(
    stage: Stage,
    lines: &[SourceLine],
    mut defines: HashMap<String, String>,
) -> Result<Shader, FslError> {
    let mut scanner = Scanner::new();
    let mut structs = Vec::new();
    let mut cbuffers = Vec::new();
    let mut push_constants = Vec::new();
    let mut resources = Vec::new();
    let mut group_shared = Vec::new();
    let mut open: Option<OpenBlock> = None;
    let mut entry: Option<(usize, &'static str)> = None;
    let mut wave_ops = WaveOpsFlags::empty();
    let mut num_threads = None;

    for (index, line) in lines.iter().enumerate() {
        let location = line.location();
        if let Some(flags) = parse_wave_ops(&line.text) {
            wave_ops |= flags.map_err(|name| {
                FslError::declaration(location.clone(), format!("Unknown wave operation flag '{}'", name))
            })?;
        }
        match scanner.next(&line.text) {
            LineEvent::Define { name, value } => {
                defines.insert(name, value);
            }
            LineEvent::BlockOpen { kind, args } => {
                open = Some(OpenBlock { kind, args, fields: Vec::new(), location });
            }
            LineEvent::Field { args, terminated, .. } => {
                if args.len() != 3 {
                    return Err(FslError::declaration(
                        location,
                        "Invalid struct element declaration, expected DATA(type, name, semantic)",
                    ));
                }
                if !terminated {
                    return Err(FslError::declaration(location, "Struct element must end with ';'"));
                }
                let len = array_len(&args[1], &defines).map_err(|m| FslError::declaration(location.clone(), m))?;
                if let Some(block) = open.as_mut() {
                    block.fields.push(StructField {
                        ty: args[0].clone(),
                        name: args[1].clone(),
                        semantic: args[2].clone(),
                        len,
                    });
                }
            }
            LineEvent::BlockClose(_) => {
                if let Some(block) = open.take() {
                    close_block(block, &mut structs, &mut cbuffers, &mut push_constants)?;
                }
            }
            LineEvent::Resource { args, terminated } => {
                resources.push(parse_resource(&args, terminated, &defines, location)?);
            }
            LineEvent::GroupShared { args } => {
                if args.len() != 2 {
                    return Err(FslError::declaration(
                        location,
                        "Invalid group-shared declaration, expected GroupShared(type, name);",
                    ));
                }
                let len = array_len(&args[1], &defines).map_err(|m| FslError::declaration(location, m))?;
                group_shared.push(GroupSharedDecl { ty: args[0].clone(), name: args[1].clone(), len });
            }
            LineEvent::Entry { marker } => {
                if entry.is_some() {
                    return Err(FslError::declaration(location, "Multiple entry points in one shader"));
                }
                entry = Some((index, marker));
            }
            LineEvent::NumThreads { args } => {
                num_threads = Some(parse_num_threads(&args, &defines, location)?);
            }
            _ => {}
        }
    }

    if let Some(block) = open {
        return Err(FslError::declaration(block.location, "Unterminated declaration block, missing '};'"));
    }

    let Some((entry_line, marker)) = entry else {
        let location = lines
            .first()
            .map(|l| SourceLocation::new(l.file.as_ref(), 0))
            .unwrap_or_else(|| SourceLocation::new("", 0));
        let expected = stage.entry_marker().unwrap_or("an entry marker");
        return Err(FslError::declaration(location, format!("Entry point not found, expected {}", expected)));
    };

    let entry_src = &lines[entry_line];
    if Stage::from_entry_marker(marker) != Some(stage) {
        return Err(FslError::declaration(
            entry_src.location(),
            format!("Entry marker {} does not match the {} stage", marker, stage),
        ));
    }

    let mut shader = Shader {
        stage,
        lines: lines.to_vec(),
        return_type: None,
        entry_args: Vec::new(),
        entry_line,
        structs,
        cbuffers,
        push_constants,
        resources,
        group_shared,
        defines,
        wave_ops,
        num_threads,
    };
    parse_entry_signature(&mut shader, marker)?;
    if stage == Stage::Comp && shader.num_threads.is_none() {
        shader.num_threads = Some([1, 1, 1]);
    }
    Ok(shader)
}

fn close_block(
    block: OpenBlock,
    structs: &mut Vec<StructDecl>,
    cbuffers: &mut Vec<CBufferDecl>,
    push_constants: &mut Vec<PushConstantDecl>,
) -> Result<(), FslError> {
    let OpenBlock { kind, args, fields, location } = block;
    if fields.is_empty() {
        return Err(FslError::declaration(location, "Empty struct declaration"));
    }
    match kind {
        BlockKind::Struct => {
            let name = single_arg(&args, "STRUCT(name)", &location)?;
            structs.push(StructDecl { name, fields, location });
        }
        BlockKind::CBuffer => {
            if args.len() != 4 {
                return Err(FslError::declaration(
                    location,
                    "Invalid constant buffer declaration, expected CBUFFER(name, frequency, register, binding)",
                ));
            }
            let frequency = parse_frequency(&args[1], &location)?;
            cbuffers.push(CBufferDecl {
                name: args[0].clone(),
                frequency,
                register: args[2].clone(),
                binding: args[3].clone(),
                fields,
                location,
            });
        }
        BlockKind::PushConstant => {
            if args.len() != 2 {
                return Err(FslError::declaration(
                    location,
                    "Invalid push constant declaration, expected PUSH_CONSTANT(name, register)",
                ));
            }
            push_constants.push(PushConstantDecl {
                name: args[0].clone(),
                register: args[1].clone(),
                fields,
                location,
            });
        }
    }
    Ok(())
}

fn single_arg(args: &[String], form: &str, location: &SourceLocation) -> Result<String, FslError> {
    match args {
        [name] if !name.is_empty() => Ok(name.clone()),
        _ => Err(FslError::declaration(location.clone(), format!("Invalid declaration, expected {}", form))),
    }
}

fn parse_frequency(tag: &str, location: &SourceLocation) -> Result<UpdateFrequency, FslError> {
    UpdateFrequency::parse(tag).ok_or_else(|| {
        FslError::declaration(location.clone(), format!("Unknown update frequency '{}'", tag))
    })
}

fn parse_resource(
    args: &[String],
    terminated: bool,
    defines: &HashMap<String, String>,
    location: SourceLocation,
) -> Result<ResourceDecl, FslError> {
    if args.len() != 5 {
        return Err(FslError::declaration(
            location,
            format!(
                "Invalid resource declaration with {} arguments, expected RES(type, name, frequency, register, binding)",
                args.len()
            ),
        ));
    }
    if !terminated {
        return Err(FslError::declaration(location, "Resource declaration must end with ');'"));
    }
    let frequency = parse_frequency(&args[2], &location)?;
    let len = array_len(&args[1], defines).map_err(|m| FslError::declaration(location.clone(), m))?;
    Ok(ResourceDecl {
        ty: args[0].clone(),
        name: args[1].clone(),
        frequency,
        register: args[3].clone(),
        binding: args[4].clone(),
        len,
        location,
    })
}

fn parse_num_threads(
    args: &[String],
    defines: &HashMap<String, String>,
    location: SourceLocation,
) -> Result<[u32; 3], FslError> {
    if args.len() != 3 {
        return Err(FslError::declaration(location, "Invalid NUM_THREADS, expected NUM_THREADS(x, y, z)"));
    }
    let mut dims = [1u32; 3];
    for (dim, arg) in dims.iter_mut().zip(args) {
        *dim = resolve_uint(arg, defines).ok_or_else(|| {
            FslError::declaration(location.clone(), format!("Could not resolve thread group size '{}'", arg))
        })?;
    }
    Ok(dims)
}

/// `ENABLE_WAVEOPS(...)` flags on a line, if present
fn parse_wave_ops(text: &str) -> Option<Result<WaveOpsFlags, String>> {
    let i = strip_comment(text).find("ENABLE_WAVEOPS")?;
    let body = macro_body(&text[i..]).unwrap_or("");
    Some(WaveOpsFlags::parse_list(body))
}

/// Remove an `ENABLE_WAVEOPS(...)` invocation from a line
pub fn strip_wave_ops(text: &str) -> String {
    let Some(i) = text.find("ENABLE_WAVEOPS") else {
        return text.to_string();
    };
    let end = text[i..]
        .find('(')
        .and_then(|open| matching_paren(text, i + open))
        .map_or(i + "ENABLE_WAVEOPS".len(), |close| close + 1);
    format!("{}{}", &text[..i], &text[end..])
}

fn parse_entry_signature(shader: &mut Shader, marker: &str) -> Result<(), FslError> {
    let entry = &shader.lines[shader.entry_line];
    let location = entry.location();
    let text = strip_wave_ops(&entry.text);
    let Some(at) = entry_marker(&text).and_then(|m| text.find(m)) else {
        return Err(FslError::declaration(location, "Malformed entry signature"));
    };
    let ret = text[..at].trim();
    shader.return_type = match ret {
        "" => return Err(FslError::declaration(location, "Entry point is missing a return type")),
        "void" => None,
        t => Some(t.to_string()),
    };

    let signature = &text[at + marker.len()..];
    if macro_body(signature).is_none() {
        return Err(FslError::declaration(location, "Entry signature must be on one line"));
    }
    let mut args = Vec::new();
    for arg in macro_args(signature) {
        if arg.is_empty() {
            continue;
        }
        args.push(classify_arg(&arg, shader, &location)?);
    }
    shader.entry_args = args;
    Ok(())
}

/// Classify one entry argument as flat built-in or declared struct
pub fn classify_arg(arg: &str, shader: &Shader, location: &SourceLocation) -> Result<EntryArg, FslError> {
    if let Some(semantic) = flat_semantic(arg) {
        let close = arg.find('(').and_then(|open| matching_paren(arg, open));
        let Some(close) = close else {
            return Err(FslError::declaration(
                location.clone(),
                format!("Built-in argument '{}' must be written {}(type) name", arg, semantic),
            ));
        };
        let raw_type = arg[..=close].trim().to_string();
        let var = arg[close + 1..].trim().to_string();
        if var.is_empty() {
            return Err(FslError::declaration(location.clone(), format!("Unnamed entry argument '{}'", arg)));
        }
        let ty = macro_body(&raw_type).unwrap_or("").trim().to_string();
        return Ok(EntryArg::Flat(FlatArg { semantic, raw_type, ty, var }));
    }

    let (ty, var) = if let Some(body) = macro_body(arg) {
        (macro_name(arg).to_string(), body.trim().to_string())
    } else {
        let parts: Vec<&str> = arg.split_whitespace().collect();
        match parts.as_slice() {
            [ty, var] => (ty.to_string(), var.to_string()),
            _ => {
                return Err(FslError::declaration(location.clone(), format!("Malformed entry argument '{}'", arg)))
            }
        }
    };
    if !shader.is_struct(&ty) {
        return Err(FslError::declaration(location.clone(), format!("Unknown entry argument '{}'", arg)));
    }
    Ok(EntryArg::Struct(StructArg { ty, var }))
}
