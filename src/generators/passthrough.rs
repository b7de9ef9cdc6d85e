//! Pass-through geometry stage synthesis
//!
//! Some rasterizers do not forward the primitive id to fragment shaders.
//! When a fragment entry asks for `SV_PrimitiveID`, the generator adds a
//! flat `PrimitiveID` varying to the fragment input and emits a geometry
//! shader that copies every vertex attribute unchanged and writes the
//! primitive id into that varying.
//!
//! Author: Moroya Sakamoto

use crate::reader::StructDecl;
use crate::types::{Platform, ShaderBinary};

/// Name of the varying carrying the primitive id
pub const PRIMITIVE_ID_FIELD: &str = "PrimitiveID";

/// Semantic of the primitive id varying
pub const PRIMITIVE_ID_SEMANTIC: &str = "TEXCOORD8";

/// Output filename of the pass-through stage for a fragment binary
pub fn passthrough_filename(fragment: &str) -> String {
    let stem = fragment.strip_suffix(".frag").unwrap_or(fragment);
    format!("{}_passthrough.geom", stem)
}

/// One varying forwarded by a GLSL pass-through stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varying {
    /// Type text (FSL vector names resolve through the helper header)
    pub ty: String,
    /// Field name
    pub name: String,
    /// Interface location
    pub location: u32,
    /// Non-interpolated
    pub flat: bool,
}

/// HLSL geometry shader for console targets
pub fn hlsl_geometry(platform: Platform, binary: &ShaderBinary, input: &StructDecl) -> String {
    let mut out = super::header_comment(binary);
    out.push(format!("#define {}", platform.name()));
    out.push("#define STAGE_GEOM".to_string());
    out.extend(super::D3D_HEADER.lines().map(str::to_string));
    out.push(String::new());

    let fields: Vec<String> = input
        .fields
        .iter()
        .map(|f| {
            let interp = if f.is_flat() { "nointerpolation " } else { "" };
            if f.has_semantic() {
                format!("\t{}{} {} : {};", interp, f.base_type(), f.name, f.semantic)
            } else {
                format!("\t{}{} {};", interp, f.base_type(), f.name)
            }
        })
        .collect();

    out.push("struct GSInput".to_string());
    out.push("{".to_string());
    out.extend(fields.iter().cloned());
    out.push("};".to_string());
    out.push(String::new());
    out.push("struct GSOutput".to_string());
    out.push("{".to_string());
    out.extend(fields);
    out.push(format!("\tnointerpolation uint {} : {};", PRIMITIVE_ID_FIELD, PRIMITIVE_ID_SEMANTIC));
    out.push("};".to_string());
    out.push(String::new());
    out.push("[maxvertexcount(3)]".to_string());
    out.push(
        "void main(triangle GSInput In[3], uint primitiveId : SV_PrimitiveID, inout TriangleStream<GSOutput> Out)"
            .to_string(),
    );
    out.push("{".to_string());
    out.push("\t[unroll] for (uint i = 0; i < 3; ++i)".to_string());
    out.push("\t{".to_string());
    out.push("\t\tGSOutput v;".to_string());
    for f in &input.fields {
        out.push(format!("\t\tv.{0} = In[i].{0};", f.base_name()));
    }
    out.push(format!("\t\tv.{} = primitiveId;", PRIMITIVE_ID_FIELD));
    out.push("\t\tOut.Append(v);".to_string());
    out.push("\t}".to_string());
    out.push("\tOut.RestartStrip();".to_string());
    out.push("}".to_string());

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// Vulkan GLSL geometry shader forwarding `varyings` by location
///
/// `primitive_location` is the location the fragment stage reads the
/// primitive id from.
pub fn glsl_geometry(binary: &ShaderBinary, varyings: &[Varying], primitive_location: u32) -> String {
    let mut out = super::header_comment(binary);
    out.push("#version 450 core".to_string());
    out.push("#define STAGE_GEOM".to_string());
    out.extend(super::VULKAN_HEADER.lines().map(str::to_string));
    out.push(String::new());
    out.push("layout(triangles) in;".to_string());
    out.push("layout(triangle_strip, max_vertices = 3) out;".to_string());
    out.push(String::new());
    for v in varyings {
        let flat = if v.flat { "flat " } else { "" };
        out.push(format!("layout(location = {}) {}in {} gs_in_{}[];", v.location, flat, v.ty, v.name));
        out.push(format!("layout(location = {}) {}out {} gs_out_{};", v.location, flat, v.ty, v.name));
    }
    out.push(format!("layout(location = {}) flat out uint gs_out_{};", primitive_location, PRIMITIVE_ID_FIELD));
    out.push(String::new());
    out.push("void main()".to_string());
    out.push("{".to_string());
    out.push("\tfor (int i = 0; i < 3; ++i)".to_string());
    out.push("\t{".to_string());
    out.push("\t\tgl_Position = gl_in[i].gl_Position;".to_string());
    for v in varyings {
        out.push(format!("\t\tgs_out_{0} = gs_in_{0}[i];", v.name));
    }
    out.push(format!("\t\tgs_out_{} = uint(gl_PrimitiveIDIn);", PRIMITIVE_ID_FIELD));
    out.push("\t\tEmitVertex();".to_string());
    out.push("\t}".to_string());
    out.push("\tEndPrimitive();".to_string());
    out.push("}".to_string());

    let mut text = out.join("\n");
    text.push('\n');
    text
}
