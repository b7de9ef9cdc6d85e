//! Function table and resource call graph
//!
//! Metal has no global resources: everything an entry point binds arrives
//! as a parameter, so helper functions reading `Get(x)` must receive `x`
//! explicitly. [`CallGraph`] finds the global functions of a shader, the
//! names each one reads directly, and propagates those names through calls
//! until nothing changes.
//!
//! Author: Moroya Sakamoto

use crate::reader::macros::{find_token, matching_paren, strip_comment};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Reference produced by `WaveGetLaneIndex()`
pub const LANE_INDEX: &str = "simd_lane_id";

/// Headers that open a brace at global scope without being functions
const NOT_FUNCTIONS: [&str; 9] =
    ["STRUCT", "CBUFFER", "PUSH_CONSTANT", "struct", "if", "for", "while", "switch", "return"];

/// Function defined at global scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Line holding the parameter list
    pub signature_line: usize,
    /// Byte offset of the `)` closing the parameter list
    pub params_close: usize,
    /// Lines from the opening to the closing brace
    pub body: Range<usize>,
}

/// A second definition of an already defined function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overload {
    /// Function name
    pub name: String,
    /// Line of the second definition
    pub line: usize,
}

/// Global functions, their direct references and transitive closure
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    functions: Vec<Function>,
    index: HashMap<String, usize>,
    refs: Vec<BTreeSet<String>>,
}

impl CallGraph {
    /// Build the graph over `lines[..end]`
    pub fn build<S: AsRef<str>>(lines: &[S], end: usize) -> Result<Self, Overload> {
        let end = end.min(lines.len());
        let functions = function_table(&lines[..end])?;
        let index: HashMap<String, usize> =
            functions.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();

        let mut refs = Vec::with_capacity(functions.len());
        let mut calls = Vec::with_capacity(functions.len());
        for f in &functions {
            let mut direct = BTreeSet::new();
            let mut callees = BTreeSet::new();
            for line in &lines[f.body.clone()] {
                let code = strip_comment(line.as_ref());
                direct.extend(direct_references(code));
                callees.extend(called(code, &index));
            }
            refs.push(direct);
            calls.push(callees);
        }

        loop {
            let mut changed = false;
            for f in 0..functions.len() {
                for &g in &calls[f] {
                    if g == f {
                        continue;
                    }
                    let inherited: Vec<String> = refs[g].difference(&refs[f]).cloned().collect();
                    changed |= !inherited.is_empty();
                    refs[f].extend(inherited);
                }
            }
            if !changed {
                break;
            }
        }

        Ok(Self { functions, index, refs })
    }

    /// Functions in definition order
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.index.get(name).map(|&i| &self.functions[i])
    }

    /// Names `name` reads, directly or through calls
    pub fn references(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.index.get(name).map(|&i| &self.refs[i])
    }

    /// Names read by arbitrary code, including the functions it calls
    pub fn references_of<S: AsRef<str>>(&self, lines: &[S]) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for line in lines {
            let code = strip_comment(line.as_ref());
            out.extend(direct_references(code));
            for callee in called(code, &self.index) {
                out.extend(self.refs[callee].iter().cloned());
            }
        }
        out
    }

    /// Append `extra(name)` to every signature and call of the table's functions
    ///
    /// `extra` returns the parameter declarations and matching call
    /// arguments for a function; an empty list leaves it untouched.
    pub fn expand<F>(&self, lines: &mut [String], extra: F)
    where
        F: Fn(&str) -> Vec<(String, String)>,
    {
        let added: HashMap<&str, Vec<(String, String)>> = self
            .functions
            .iter()
            .map(|f| (f.name.as_str(), extra(&f.name)))
            .filter(|(_, params)| !params.is_empty())
            .collect();
        if added.is_empty() {
            return;
        }

        let signatures: HashMap<usize, &Function> =
            self.functions.iter().map(|f| (f.signature_line, f)).collect();
        for (i, line) in lines.iter_mut().enumerate() {
            let mut edits: Vec<(usize, String)> = Vec::new();
            let mut skip_at = None;
            if let Some(f) = signatures.get(&i) {
                if let Some(params) = added.get(f.name.as_str()) {
                    let decls: Vec<&str> = params.iter().map(|(decl, _)| decl.as_str()).collect();
                    edits.push((f.params_close, insertion(line, f.params_close, &decls.join(", "))));
                }
                skip_at = find_token(line, &f.name, 0);
            }
            for (name, params) in &added {
                let args: Vec<&str> = params.iter().map(|(_, arg)| arg.as_str()).collect();
                let args = args.join(", ");
                let mut from = 0;
                while let Some(at) = find_token(line, name, from) {
                    from = at + name.len();
                    if Some(at) == skip_at || line[..at].trim_end().ends_with('.') {
                        continue;
                    }
                    let Some(open) = line[from..].find(|c: char| !c.is_whitespace()).map(|o| from + o) else {
                        break;
                    };
                    if !line[open..].starts_with('(') {
                        continue;
                    }
                    if let Some(close) = matching_paren(line, open) {
                        edits.push((close, insertion(line, close, &args)));
                    }
                }
            }
            // right to left keeps earlier offsets valid
            edits.sort_by(|a, b| b.0.cmp(&a.0));
            for (at, text) in edits {
                line.insert_str(at, &text);
            }
        }
    }
}

/// Text inserted before the `)` at `close`
fn insertion(line: &str, close: usize, text: &str) -> String {
    let open = (0..close).rev().find(|&o| line.as_bytes()[o] == b'(' && matching_paren(line, o) == Some(close));
    match open {
        Some(open) if !line[open + 1..close].trim().is_empty() => format!(", {}", text),
        _ => text.to_string(),
    }
}

/// Names read directly by one line of code
fn direct_references(code: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(at) = find_token(code, "Get", from) {
        from = at + 3;
        let rest = code[from..].trim_start();
        let Some(inner) = rest.strip_prefix('(') else {
            continue;
        };
        if let Some(close) = inner.find(')') {
            let name = inner[..close].trim();
            if !name.is_empty() {
                out.push(name.to_string());
            }
        }
    }
    if find_token(code, "WaveGetLaneIndex", 0).is_some() {
        out.push(LANE_INDEX.to_string());
    }
    out
}

/// Table indices of the functions called by one line of code
fn called(code: &str, index: &HashMap<String, usize>) -> Vec<usize> {
    index
        .iter()
        .filter(|(name, _)| {
            let mut from = 0;
            while let Some(at) = find_token(code, name, from) {
                from = at + name.len();
                if code[from..].trim_start().starts_with('(') {
                    return true;
                }
            }
            false
        })
        .map(|(_, &i)| i)
        .collect()
}

// ============================================================================
// Function table
// ============================================================================

/// Global functions of `lines`, in definition order
///
/// A function is a brace opened at depth zero whose header, on the same
/// line or the previous non-blank one, ends with a parameter list preceded
/// by a return type and a name. Declaration blocks and the entry point are
/// skipped since they never open a body at global scope.
pub fn function_table<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Function>, Overload> {
    let mut functions: Vec<Function> = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(Function, usize)> = None;

    for (i, line) in lines.iter().enumerate() {
        let code = strip_comment(line.as_ref());
        for (col, c) in code.char_indices() {
            match c {
                '{' => {
                    if depth == 0 {
                        open = header(lines, i, col).map(|(signature_line, params_close, name)| {
                            (Function { name, signature_line, params_close, body: i..i + 1 }, i)
                        });
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        if let Some((mut f, start)) = open.take() {
                            f.body = start..i + 1;
                            if functions.iter().any(|g| g.name == f.name) {
                                return Err(Overload { name: f.name, line: f.signature_line });
                            }
                            functions.push(f);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(functions)
}

/// Signature line, parameter-list close and name of the header before `{`
fn header<S: AsRef<str>>(lines: &[S], line: usize, col: usize) -> Option<(usize, usize, String)> {
    let same = strip_comment(lines[line].as_ref());
    let (at, text) = if same[..col].trim().is_empty() {
        let prev = (0..line).rev().find(|&p| !strip_comment(lines[p].as_ref()).trim().is_empty())?;
        (prev, strip_comment(lines[prev].as_ref()))
    } else {
        (line, &same[..col])
    };
    let trimmed = text.trim_end();
    if trimmed.starts_with('#') || !trimmed.ends_with(')') {
        return None;
    }
    let close = trimmed.len() - 1;
    let open = (0..close).rev().find(|&o| trimmed.as_bytes()[o] == b'(' && matching_paren(trimmed, o) == Some(close))?;
    let before = trimmed[..open].trim_end();
    let name_start = before
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map_or(0, |p| p + 1);
    let name = &before[name_start..];
    let return_type = before[..name_start].trim();
    if name.is_empty() || return_type.is_empty() || return_type.contains('=') {
        return None;
    }
    let first = before.split_whitespace().next().unwrap_or_default();
    if NOT_FUNCTIONS.iter().any(|k| *k == name || first.starts_with(k)) {
        return None;
    }
    Some((at, close, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
float4 shade(float2 uv)
{
\treturn SampleTex2D(Get(albedo), Get(linearSampler), uv);
}

float lane() { return float(WaveGetLaneIndex()); }

float4 lit(float2 uv, float3 n)
{
\tfloat4 c = shade(uv);
\treturn c * Get(exposure) + lane();
}

STRUCT(VSOut)
{
\tDATA(float4, Position, SV_Position);
};

float4 PS_MAIN(VSOut(In))
{
\tRETURN(lit(In.Position.xy, float3(0, 0, 1)));
}
";

    fn lines() -> Vec<String> {
        SOURCE.lines().map(str::to_string).collect()
    }

    fn entry(lines: &[String]) -> usize {
        lines.iter().position(|l| l.contains("PS_MAIN")).unwrap()
    }

    #[test]
    fn test_function_table() {
        let lines = lines();
        let table = function_table(&lines[..entry(&lines)]).unwrap();
        let names: Vec<&str> = table.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["shade", "lane", "lit"]);
        assert_eq!(table[0].signature_line, 0);
        assert_eq!(table[0].body, 1..4);
        assert_eq!(table[1].signature_line, 5);
        assert_eq!(table[2].params_close, "float4 lit(float2 uv, float3 n".len());
    }

    #[test]
    fn test_references_propagate_through_calls() {
        let lines = lines();
        let graph = CallGraph::build(&lines, entry(&lines)).unwrap();
        let shade: Vec<&str> = graph.references("shade").unwrap().iter().map(String::as_str).collect();
        assert_eq!(shade, ["albedo", "linearSampler"]);
        let lit: Vec<&str> = graph.references("lit").unwrap().iter().map(String::as_str).collect();
        assert_eq!(lit, ["albedo", "exposure", "linearSampler", LANE_INDEX]);

        let entry_refs = graph.references_of(&lines[entry(&lines)..]);
        assert!(entry_refs.contains("exposure"));
        assert!(entry_refs.contains(LANE_INDEX));
    }

    #[test]
    fn test_overload_rejected() {
        let src = ["float f(float x) { return x; }", "float f(int x) { return x; }"];
        let err = CallGraph::build(&src, src.len()).unwrap_err();
        assert_eq!(err, Overload { name: "f".into(), line: 1 });
    }

    #[test]
    fn test_expand_signatures_and_calls() {
        let mut lines = lines();
        let end = entry(&lines);
        let graph = CallGraph::build(&lines, end).unwrap();
        graph.expand(&mut lines, |name| {
            graph
                .references(name)
                .map(|refs| refs.iter().map(|r| (format!("T {}", r), r.clone())).collect())
                .unwrap_or_default()
        });
        assert_eq!(lines[0], "float4 shade(float2 uv, T albedo, T linearSampler)");
        assert_eq!(lines[5], format!("float lane(T {0}) {{ return float(WaveGetLaneIndex()); }}", LANE_INDEX));
        assert!(lines[9].contains("shade(uv, albedo, linearSampler)"));
        assert!(lines[10].contains(&format!("lane({})", LANE_INDEX)));
        assert!(lines[end + 2].contains(&format!(
            "lit(In.Position.xy, float3(0, 0, 1), albedo, exposure, linearSampler, {})",
            LANE_INDEX
        )));
    }

    #[test]
    fn test_non_functions_skipped() {
        let src = ["STRUCT(A)", "{", "\tDATA(float, x, None);", "};", "#if defined(X)", "{", "}"];
        assert!(function_table(&src).unwrap().is_empty());
    }
}
