//! Line scanner shared by the source reader and every generator
//!
//! Each line is classified into a [`LineEvent`] while an explicit
//! [`ScanState`] tracks which declaration block the scan is inside.
//!
//! ```text
//!            STRUCT( / CBUFFER( / PUSH_CONSTANT(            };
//! Outside ----------------------------------------> Block ------> Outside
//!    |  BEGIN_SRT(                  END_SRT(
//!    +-------------> ResourceBlock ----------> Outside
//!    |  *_MAIN(              INIT_MAIN
//!    +---------> MainEntry -----------> InitBlock
//! ```
//!
//! Author: Moroya Sakamoto

use super::macros::{contains_token, find_token, is_comment, macro_args, macro_body, strip_comment};
use crate::types::ENTRY_MARKERS;

/// Kind of declaration block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `STRUCT(name)`
    Struct,
    /// `CBUFFER(name, freq, reg, binding)`
    CBuffer,
    /// `PUSH_CONSTANT(name, reg)`
    PushConstant,
}

/// Scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Global scope
    Outside,
    /// Inside `STRUCT(...) { ... };`
    Struct,
    /// Inside `BEGIN_SRT(...) ... END_SRT(...)`
    ResourceBlock,
    /// Inside `CBUFFER(...) { ... };`
    CBuffer,
    /// Inside `PUSH_CONSTANT(...) { ... };`
    PushConstant,
    /// After the entry signature, before `INIT_MAIN`
    MainEntry,
    /// Entry body after `INIT_MAIN`
    InitBlock,
}

impl ScanState {
    /// Block kind for the three field-carrying states
    pub fn block_kind(self) -> Option<BlockKind> {
        match self {
            ScanState::Struct => Some(BlockKind::Struct),
            ScanState::CBuffer => Some(BlockKind::CBuffer),
            ScanState::PushConstant => Some(BlockKind::PushConstant),
            _ => None,
        }
    }

    /// True once the entry signature has been seen
    pub fn in_entry(self) -> bool {
        matches!(self, ScanState::MainEntry | ScanState::InitBlock)
    }
}

/// Classified source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Empty line
    Blank,
    /// `//` comment
    Comment,
    /// `#define NAME VALUE`
    Define {
        /// Macro name
        name: String,
        /// Replacement text
        value: String,
    },
    /// Opening line of a declaration block
    BlockOpen {
        /// Which block
        kind: BlockKind,
        /// Macro arguments
        args: Vec<String>,
    },
    /// `DATA(...)` inside a block
    Field {
        /// Enclosing block
        kind: BlockKind,
        /// Macro arguments
        args: Vec<String>,
        /// Line ends with `;`
        terminated: bool,
    },
    /// `};` closing a block
    BlockClose(BlockKind),
    /// `RES(...)`
    Resource {
        /// Macro arguments
        args: Vec<String>,
        /// Line ends with `;`
        terminated: bool,
    },
    /// `GroupShared(type, name);`
    GroupShared {
        /// Macro arguments
        args: Vec<String>,
    },
    /// `BEGIN_SRT(...)`
    SrtBegin,
    /// `END_SRT(...)`
    SrtEnd,
    /// `DECLARE_RESOURCES()`
    DeclareResources,
    /// Line holding the entry marker
    Entry {
        /// `VS_MAIN`, `PS_MAIN` or `CS_MAIN`
        marker: &'static str,
    },
    /// `INIT_MAIN`
    InitMain,
    /// `RETURN(value)`
    Return {
        /// Returned expression, `None` for `RETURN()`
        value: Option<String>,
    },
    /// `NUM_THREADS(x, y, z)`
    NumThreads {
        /// Macro arguments
        args: Vec<String>,
    },
    /// `BeginNonUniformResourceIndex(index[, max])`
    NonUniformBegin {
        /// Macro arguments
        args: Vec<String>,
    },
    /// `EndNonUniformResourceIndex()`
    NonUniformEnd,
    /// `EARLY_FRAGMENT_TESTS`
    EarlyFragmentTests,
    /// Anything else, passed through by generators
    Other,
}

/// Explicit state machine over FSL lines
#[derive(Debug, Clone)]
pub struct Scanner {
    state: ScanState,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Scanner at global scope
    pub fn new() -> Self {
        Self { state: ScanState::Outside }
    }

    /// Current state
    #[inline(always)]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Classify `line` and advance the state
    pub fn next(&mut self, line: &str) -> LineEvent {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineEvent::Blank;
        }
        if is_comment(trimmed) {
            return LineEvent::Comment;
        }
        let code = strip_comment(trimmed).trim_end();

        if let Some(event) = self.common_event(code) {
            return event;
        }

        match self.state {
            ScanState::Struct | ScanState::CBuffer | ScanState::PushConstant => {
                let kind = match self.state.block_kind() {
                    Some(kind) => kind,
                    None => return LineEvent::Other,
                };
                if code.starts_with("};") {
                    self.state = ScanState::Outside;
                    LineEvent::BlockClose(kind)
                } else if code.starts_with("DATA(") {
                    LineEvent::Field { kind, args: macro_args(code), terminated: code.ends_with(';') }
                } else {
                    LineEvent::Other
                }
            }
            ScanState::ResourceBlock => {
                if code.starts_with("END_SRT(") {
                    self.state = ScanState::Outside;
                    LineEvent::SrtEnd
                } else if code.starts_with("RES(") {
                    LineEvent::Resource { args: macro_args(code), terminated: code.ends_with(';') }
                } else {
                    LineEvent::Other
                }
            }
            ScanState::Outside => self.outside_event(code),
            ScanState::MainEntry | ScanState::InitBlock => {
                if contains_token(code, "INIT_MAIN") {
                    self.state = ScanState::InitBlock;
                    LineEvent::InitMain
                } else if let Some(i) = find_token(code, "RETURN", 0) {
                    let value = macro_body(&code[i..])
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    LineEvent::Return { value }
                } else {
                    LineEvent::Other
                }
            }
        }
    }

    /// Events recognized in every state
    fn common_event(&self, code: &str) -> Option<LineEvent> {
        if code.starts_with("#define ") {
            let rest = code["#define ".len()..].trim();
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            // function-like macros are not tracked
            if !name.is_empty() && !rest[name.len()..].starts_with('(') {
                let value = rest[name.len()..].trim().to_string();
                return Some(LineEvent::Define { name, value });
            }
            return Some(LineEvent::Other);
        }
        if code.starts_with("NUM_THREADS(") {
            return Some(LineEvent::NumThreads { args: macro_args(code) });
        }
        if let Some(i) = find_token(code, "BeginNonUniformResourceIndex", 0) {
            return Some(LineEvent::NonUniformBegin { args: macro_args(&code[i..]) });
        }
        if contains_token(code, "EndNonUniformResourceIndex") {
            return Some(LineEvent::NonUniformEnd);
        }
        if code.starts_with("EARLY_FRAGMENT_TESTS") {
            return Some(LineEvent::EarlyFragmentTests);
        }
        None
    }

    fn outside_event(&mut self, code: &str) -> LineEvent {
        let open = |kind| LineEvent::BlockOpen { kind, args: macro_args(code) };
        if code.starts_with("STRUCT(") {
            self.state = ScanState::Struct;
            return open(BlockKind::Struct);
        }
        if code.starts_with("CBUFFER(") {
            self.state = ScanState::CBuffer;
            return open(BlockKind::CBuffer);
        }
        if code.starts_with("PUSH_CONSTANT(") {
            self.state = ScanState::PushConstant;
            return open(BlockKind::PushConstant);
        }
        if code.starts_with("BEGIN_SRT(") {
            self.state = ScanState::ResourceBlock;
            return LineEvent::SrtBegin;
        }
        if code.starts_with("RES(") {
            return LineEvent::Resource { args: macro_args(code), terminated: code.ends_with(';') };
        }
        if code.starts_with("GroupShared") && code.ends_with(';') {
            return LineEvent::GroupShared { args: macro_args(code) };
        }
        if code.starts_with("DECLARE_RESOURCES(") {
            return LineEvent::DeclareResources;
        }
        if let Some(marker) = entry_marker(code) {
            self.state = ScanState::MainEntry;
            return LineEvent::Entry { marker };
        }
        LineEvent::Other
    }
}

/// Entry marker invoked on a line, if any
pub fn entry_marker(code: &str) -> Option<&'static str> {
    ENTRY_MARKERS.iter().copied().find(|m| {
        find_token(code, m, 0).is_some_and(|i| code[i + m.len()..].trim_start().starts_with('('))
    })
}
