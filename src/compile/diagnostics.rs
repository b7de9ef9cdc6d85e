//! Native compiler diagnostics
//!
//! Each toolchain reports errors in its own shape. Lines that carry a file
//! and line number are rewritten to `file(line): ERROR: message` so every
//! target reports the same way; everything else passes through.
//!
//! Author: Moroya Sakamoto

use std::path::Path;

/// Rewrite compiler output, attributing unlocated failures to `src`
pub fn translate(output: &str, src: &Path) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut located = false;
    for line in output.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
        match parse_line(line) {
            Some(diag) => {
                located = true;
                lines.push(diag.to_string());
            }
            None => lines.push(line.to_string()),
        }
    }
    if !located {
        let message = if lines.is_empty() { "compilation failed".to_string() } else { lines.join(" ") };
        return format!("{}: ERROR: {}", src.display(), message);
    }
    lines.join("\n")
}

/// One located diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Reported file
    pub file: String,
    /// 1-based line
    pub line: usize,
    /// `ERROR` or `WARN`
    pub severity: &'static str,
    /// Message text
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}): {}: {}", self.file, self.line, self.severity, self.message)
    }
}

/// Parse one compiler line, `None` when it carries no location
pub fn parse_line(line: &str) -> Option<Diagnostic> {
    parse_glslang(line).or_else(|| parse_msvc(line)).or_else(|| parse_clang(line))
}

/// `ERROR: file:line: message`
fn parse_glslang(line: &str) -> Option<Diagnostic> {
    let (severity, rest) = if let Some(rest) = line.strip_prefix("ERROR: ") {
        ("ERROR", rest)
    } else {
        ("WARN", line.strip_prefix("WARNING: ")?)
    };
    let (location, message) = split_location(rest)?;
    let (file, line_no) = location.rsplit_once(':')?;
    Some(Diagnostic {
        file: file.to_string(),
        line: line_no.trim().parse().ok()?,
        severity,
        message: message.trim().to_string(),
    })
}

/// `file(line,col): error X3000: message`
fn parse_msvc(line: &str) -> Option<Diagnostic> {
    let open = line.find('(')?;
    let close = open + line[open..].find(')')?;
    let numbers = &line[open + 1..close];
    let line_no: usize = numbers.split(',').next()?.trim().parse().ok()?;
    let rest = line[close + 1..].trim_start().strip_prefix(':')?.trim_start();
    let (severity, message) = severity_and_message(rest)?;
    Some(Diagnostic { file: line[..open].trim().to_string(), line: line_no, severity, message })
}

/// `file:line:col: error: message`
fn parse_clang(line: &str) -> Option<Diagnostic> {
    let bytes = line.as_bytes();
    let drive = if bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' { 2 } else { 0 };
    let (file, after) = line[drive..].split_once(':')?;
    let (line_no, after) = after.split_once(':')?;
    let line_no: usize = line_no.trim().parse().ok()?;
    let after = match after.split_once(':') {
        Some((column, tail)) if column.trim().parse::<usize>().is_ok() => tail,
        _ => after,
    };
    let (severity, message) = severity_and_message(after.trim())?;
    Some(Diagnostic { file: format!("{}{}", &line[..drive], file), line: line_no, severity, message })
}

/// Split `error[ code]: message` / `warning[ code]: message`
fn severity_and_message(text: &str) -> Option<(&'static str, String)> {
    let lower = text.to_ascii_lowercase();
    let severity = if lower.starts_with("error") || lower.starts_with("fatal error") {
        "ERROR"
    } else if lower.starts_with("warning") {
        "WARN"
    } else {
        return None;
    };
    let (_, message) = text.split_once(':')?;
    Some((severity, message.trim().to_string()))
}

/// `location: message` where the location ends in `:line`
fn split_location(text: &str) -> Option<(&str, &str)> {
    text.match_indices(": ")
        .map(|(i, _)| i)
        .find(|&i| {
            text[..i]
                .rsplit_once(':')
                .is_some_and(|(_, n)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(|i| (&text[..i], &text[i + 1..]))
}
