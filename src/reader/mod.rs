//! Source Reader
//!
//! Turns FSL text into structured descriptions:
//!
//! - [`shader_list`]: `#<stage> ... #end` blocks into [`ShaderBinary`](crate::types::ShaderBinary) values
//! - [`scanner`]: the line state machine shared with every generator
//! - [`shader`]: one block into a [`Shader`] lookup table
//!
//! Author: Moroya Sakamoto

pub mod decl;
pub mod macros;
pub mod scanner;
mod shader;
mod shader_list;

pub use decl::{
    Access, CBufferDecl, EntryArg, FlatArg, GroupSharedDecl, PushConstantDecl, ResourceDecl,
    ResourceKind, StructArg, StructDecl, StructField, FLAT_SEMANTICS,
};
pub use scanner::{BlockKind, LineEvent, ScanState, Scanner};
pub use shader::{read_lines, read_shader, strip_wave_ops, Shader};
pub use shader_list::{parse_shader_list, parse_shader_list_text};
