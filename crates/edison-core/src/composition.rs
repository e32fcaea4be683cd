//! Composition engine: extracts named sections from layered raw documents,
//! merges them per content-type strategy, and runs the template pipeline
//! over the merged result.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::CompositionError;

/// Default Jaccard similarity threshold for shingle-based deduplication.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.37;

/// Default minimum shingle count before two fragments are compared at all.
pub const DEFAULT_MIN_SHINGLES: usize = 5;

/// A named content fragment contributed by one layer (bundled/pack/user/project).
///
/// `extend` fragments are produced by `<!-- EXTEND: name -->` markers and
/// append to the base content of the same section rather than replacing it.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub section: String,
    pub content: String,
    pub layer_rank: u8,
    pub extend: bool,
}

#[allow(clippy::expect_used)] // static patterns, compiled once; a failure here is a packaging bug
static SECTION_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*SECTION:\s*([A-Za-z0-9_\-]+)\s*-->")
        .expect("static section-open pattern is valid regex")
});

#[allow(clippy::expect_used)]
static EXTEND_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*EXTEND:\s*([A-Za-z0-9_\-]+)\s*-->")
        .expect("static extend-open pattern is valid regex")
});

/// Scans a raw layered document for `SECTION`/`EXTEND` marker pairs and
/// returns the fragments they delimit, tagged with `layer_rank`.
///
/// # Errors
/// `CompositionError::SectionMismatch` if an opening marker has no matching
/// closing marker for the same name before end of input.
pub fn extract_sections(raw: &str, layer_rank: u8) -> Result<Vec<Fragment>, CompositionError> {
    let mut fragments = Vec::new();
    collect_markers(raw, &SECTION_OPEN_RE, layer_rank, false, &mut fragments)?;
    collect_markers(raw, &EXTEND_OPEN_RE, layer_rank, true, &mut fragments)?;
    Ok(fragments)
}

fn collect_markers(
    raw: &str,
    open_re: &Regex,
    layer_rank: u8,
    extend: bool,
    out: &mut Vec<Fragment>,
) -> Result<(), CompositionError> {
    for caps in open_re.captures_iter(raw) {
        let whole = caps.get(0).ok_or_else(|| CompositionError::Internal {
            detail: "section marker regex matched with no group 0".to_string(),
        })?;
        let name = &caps[1];
        let body_start = whole.end();
        let close_literal = if extend {
            "<!-- /EXTEND -->".to_string()
        } else {
            format!("<!-- /SECTION: {name} -->")
        };
        let Some(close_pos) = raw[body_start..].find(&close_literal) else {
            return Err(CompositionError::SectionMismatch { name: name.to_string() });
        };
        let content = raw[body_start..body_start + close_pos].trim().to_string();
        out.push(Fragment { section: name.to_string(), content, layer_rank, extend });
    }
    Ok(())
}

/// Per-section-type merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Highest-ranked non-extend fragment replaces the base; extend
    /// fragments append to whichever base is current at their rank.
    SectionMerge,
    /// All layers' content concatenated in rank order, then deduplicated.
    ConcatenateWithDedup,
    /// Each layer's content parsed as JSON and deep-merged.
    JsonMerge,
}

/// Merges fragments belonging to the same section according to `strategy`.
///
/// # Errors
/// `CompositionError::MalformedExpression` if `JsonMerge` is applied to
/// non-JSON content.
pub fn merge_section(
    mut fragments: Vec<Fragment>,
    strategy: MergeStrategy,
    threshold: f64,
    min_shingles: usize,
) -> Result<String, CompositionError> {
    fragments.sort_by_key(|f| f.layer_rank);

    match strategy {
        MergeStrategy::SectionMerge => {
            let mut base = String::new();
            for fragment in fragments {
                if fragment.extend {
                    if base.is_empty() {
                        base = fragment.content;
                    } else {
                        base.push_str("\n\n");
                        base.push_str(&fragment.content);
                    }
                } else {
                    base = fragment.content;
                }
            }
            Ok(base)
        }

        MergeStrategy::ConcatenateWithDedup => {
            let mut kept: Vec<String> = Vec::new();
            for fragment in fragments {
                if !is_near_duplicate(&fragment.content, &kept, threshold, min_shingles) {
                    kept.push(fragment.content);
                }
            }
            Ok(kept.join("\n\n"))
        }

        MergeStrategy::JsonMerge => {
            let mut acc = Value::Object(serde_json::Map::new());
            for fragment in fragments {
                let parsed: Value = serde_json::from_str(&fragment.content).map_err(|_| {
                    CompositionError::MalformedExpression { expr: fragment.content.clone() }
                })?;
                deep_merge_json(&mut acc, parsed);
            }
            Ok(acc.to_string())
        }
    }
}

fn deep_merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge_json(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Word-based k-shingles of `text`, lowercased, for similarity checks.
#[must_use]
pub fn shingles(text: &str, k: usize) -> BTreeSet<String> {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.len() < k {
        return BTreeSet::new();
    }
    (0..=words.len() - k).map(|i| words[i..i + k].join(" ")).collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            intersection as f64 / union as f64
        }
    }
}

/// True if `candidate`'s shingle set is too similar (Jaccard >= threshold)
/// to any fragment already in `kept`, once both have at least `min_shingles`
/// shingles (below that, comparisons are unreliable, so never dedup).
#[must_use]
pub fn is_near_duplicate(candidate: &str, kept: &[String], threshold: f64, min_shingles: usize) -> bool {
    let candidate_shingles = shingles(candidate, 5);
    if candidate_shingles.len() < min_shingles {
        return false;
    }
    kept.iter().any(|existing| {
        let existing_shingles = shingles(existing, 5);
        existing_shingles.len() >= min_shingles && jaccard(&candidate_shingles, &existing_shingles) >= threshold
    })
}

/// Closed set of template functions available to `{{fn:<name> arg1 arg2}}`.
/// User-extensible callables from the source system become a fixed,
/// well-typed enum here rather than a dynamic registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunction {
    Upper,
    Lower,
    Trim,
    Slug,
    Default,
}

impl BuiltinFunction {
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            "trim" => Some(Self::Trim),
            "slug" => Some(Self::Slug),
            "default" => Some(Self::Default),
            _ => None,
        }
    }

    #[must_use]
    pub fn call(self, args: &[&str]) -> String {
        match self {
            Self::Upper => args.first().map_or_else(String::new, |s| s.to_uppercase()),
            Self::Lower => args.first().map_or_else(String::new, |s| s.to_lowercase()),
            Self::Trim => args.first().map_or_else(String::new, |s| s.trim().to_string()),
            Self::Slug => args.first().map_or_else(String::new, |s| slugify(s)),
            Self::Default => {
                let value = args.first().copied().unwrap_or("");
                if value.is_empty() {
                    args.get(1).copied().unwrap_or("").to_string()
                } else {
                    value.to_string()
                }
            }
        }
    }
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = true;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// One include tier, searched in order (project, then active packs, then
/// bundled) when resolving `{{include:...}}`/`{{include-section:...}}`.
#[derive(Debug, Clone, Default)]
pub struct IncludeTier {
    pub files: HashMap<String, String>,
    pub sections: HashMap<String, HashMap<String, String>>,
}

/// Built-in substitution variables and resolution context for the template
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// Include resolution tiers, highest-precedence first.
    pub tiers: Vec<IncludeTier>,
    /// Merged configuration tree, for `config(path)`/`{{config.dot.path}}`.
    pub config: Value,
    pub active_packs: BTreeSet<String>,
    pub project_root: String,
    pub project_edison_dir: String,
    pub project_name: String,
    pub timestamp: String,
    pub generated_date: String,
    pub version: String,
    pub source_layers: String,
    pub output_path: String,
    pub name: String,
    pub content_type: String,
}

impl PipelineContext {
    fn resolve_include(&self, path: &str) -> Option<&str> {
        self.tiers.iter().find_map(|tier| tier.files.get(path)).map(String::as_str)
    }

    fn resolve_include_section(&self, path: &str, section: &str) -> Option<&str> {
        self.tiers
            .iter()
            .find_map(|tier| tier.sections.get(path).and_then(|sections| sections.get(section)))
            .map(String::as_str)
    }

    fn file_exists(&self, path: &str) -> bool {
        Path::new(&self.project_root).join(path).exists()
    }
}

fn json_lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for seg in path.split('.') {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A boolean expression as defined by the composition engine's conditional
/// grammar: `has-pack | config | config-eq | env | file-exists | not | and
/// | or`.
#[derive(Debug, Clone)]
enum Expr {
    HasPack(String),
    Config(String),
    ConfigEq(String, String),
    Env(String),
    FileExists(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn split_top_level_args(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(inner[start..].trim());
    parts
}

fn parse_expr(src: &str) -> Result<Expr, CompositionError> {
    let src = src.trim();
    let malformed = || CompositionError::MalformedExpression { expr: src.to_string() };
    let open = src.find('(').ok_or_else(malformed)?;
    if !src.ends_with(')') {
        return Err(malformed());
    }
    let name = &src[..open];
    let inner = &src[open + 1..src.len() - 1];
    match name {
        "has-pack" => Ok(Expr::HasPack(inner.trim().to_string())),
        "config" => Ok(Expr::Config(inner.trim().to_string())),
        "env" => Ok(Expr::Env(inner.trim().to_string())),
        "file-exists" => Ok(Expr::FileExists(inner.trim().to_string())),
        "not" => Ok(Expr::Not(Box::new(parse_expr(inner)?))),
        "config-eq" => {
            let parts = split_top_level_args(inner);
            if parts.len() != 2 {
                return Err(malformed());
            }
            Ok(Expr::ConfigEq(parts[0].to_string(), unquote(parts[1]).to_string()))
        }
        "and" => {
            let parts = split_top_level_args(inner);
            if parts.len() != 2 {
                return Err(malformed());
            }
            Ok(Expr::And(Box::new(parse_expr(parts[0])?), Box::new(parse_expr(parts[1])?)))
        }
        "or" => {
            let parts = split_top_level_args(inner);
            if parts.len() != 2 {
                return Err(malformed());
            }
            Ok(Expr::Or(Box::new(parse_expr(parts[0])?), Box::new(parse_expr(parts[1])?)))
        }
        _ => Err(malformed()),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

fn eval_expr(expr: &Expr, ctx: &PipelineContext) -> bool {
    match expr {
        Expr::HasPack(name) => ctx.active_packs.contains(name),
        Expr::Config(path) => json_lookup(&ctx.config, path).is_some_and(is_truthy),
        Expr::ConfigEq(path, expected) => {
            json_lookup(&ctx.config, path).map(render_value).as_deref() == Some(expected)
        }
        Expr::Env(name) => std::env::var(name).is_ok_and(|v| !v.is_empty()),
        Expr::FileExists(path) => ctx.file_exists(path),
        Expr::Not(inner) => !eval_expr(inner, ctx),
        Expr::And(a, b) => eval_expr(a, ctx) && eval_expr(b, ctx),
        Expr::Or(a, b) => eval_expr(a, ctx) || eval_expr(b, ctx),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().is_none_or(|f| f != 0.0),
    }
}

#[allow(clippy::expect_used)]
static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{include(?:-section:([^{}#]+)#([^{}]+)|:([^{}]+))\}\}")
        .expect("static include pattern is valid regex")
});

/// Stage 2: `{{include:path}}` and `{{include-section:path#name}}`.
///
/// # Errors
/// `CompositionError::IncludeNotFound` for an unresolved target.
pub fn stage_includes(input: &str, ctx: &PipelineContext) -> Result<String, CompositionError> {
    let mut err = None;
    let out = INCLUDE_RE.replace_all(input, |caps: &regex::Captures| {
        if let (Some(path), Some(section)) = (caps.get(1), caps.get(2)) {
            ctx.resolve_include_section(path.as_str(), section.as_str()).map_or_else(
                || {
                    err = Some(CompositionError::IncludeNotFound {
                        path: format!("{}#{}", path.as_str(), section.as_str()),
                    });
                    String::new()
                },
                ToString::to_string,
            )
        } else if let Some(path) = caps.get(3) {
            ctx.resolve_include(path.as_str()).map_or_else(
                || {
                    err = Some(CompositionError::IncludeNotFound { path: path.as_str().to_string() });
                    String::new()
                },
                ToString::to_string,
            )
        } else {
            String::new()
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(out.into_owned())
}

#[allow(clippy::expect_used)]
static INCLUDE_IF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{include-if:(.+?):([^{}:]+)\}\}").expect("static include-if pattern is valid regex")
});

/// Stage 3: `{{if:<expr>}}...{{else}}...{{/if}}` and
/// `{{include-if:<expr>:path}}`.
///
/// # Errors
/// `CompositionError::MalformedExpression` on unparsable expressions or
/// unterminated blocks; `CompositionError::IncludeNotFound` on a true
/// `include-if` branch whose target is missing.
pub fn stage_conditionals(input: &str, ctx: &PipelineContext) -> Result<String, CompositionError> {
    let resolved = resolve_if_blocks(input, ctx)?;
    let mut err = None;
    let out = INCLUDE_IF_RE.replace_all(&resolved, |caps: &regex::Captures| {
        let expr = match parse_expr(&caps[1]) {
            Ok(e) => e,
            Err(e) => {
                err = Some(e);
                return String::new();
            }
        };
        if !eval_expr(&expr, ctx) {
            return String::new();
        }
        let path = caps[2].trim();
        ctx.resolve_include(path).map_or_else(
            || {
                err = Some(CompositionError::IncludeNotFound { path: path.to_string() });
                String::new()
            },
            ToString::to_string,
        )
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(out.into_owned())
}

fn resolve_if_blocks(input: &str, ctx: &PipelineContext) -> Result<String, CompositionError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(start) = rest.find("{{if:") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + "{{if:".len()..];
        let Some(close) = after_marker.find("}}") else {
            return Err(CompositionError::MalformedExpression {
                expr: "unterminated {{if: ...}} marker".to_string(),
            });
        };
        let expr_src = after_marker[..close].trim();
        let body_start = &after_marker[close + 2..];
        let (true_branch, false_branch, remainder) = split_if_body(body_start)?;
        let truthy = eval_expr(&parse_expr(expr_src)?, ctx);
        let chosen = if truthy { true_branch } else { false_branch };
        out.push_str(&resolve_if_blocks(chosen, ctx)?);
        rest = remainder;
    }
    Ok(out)
}

fn split_if_body(body: &str) -> Result<(&str, &str, &str), CompositionError> {
    let mut depth = 0i32;
    let mut else_pos: Option<usize> = None;
    let mut idx = 0usize;
    while idx < body.len() {
        if !body.is_char_boundary(idx) {
            idx += 1;
            continue;
        }
        let tail = &body[idx..];
        if tail.starts_with("{{if:") {
            depth += 1;
            idx += "{{if:".len();
        } else if tail.starts_with("{{/if}}") {
            if depth == 0 {
                let true_branch = else_pos.map_or(&body[..idx], |p| &body[..p]);
                let false_branch = else_pos.map_or("", |p| &body[p + "{{else}}".len()..idx]);
                return Ok((true_branch, false_branch, &body[idx + "{{/if}}".len()..]));
            }
            depth -= 1;
            idx += "{{/if}}".len();
        } else if depth == 0 && else_pos.is_none() && tail.starts_with("{{else}}") {
            else_pos = Some(idx);
            idx += "{{else}}".len();
        } else {
            idx += 1;
        }
    }
    Err(CompositionError::MalformedExpression {
        expr: "unterminated {{if:...}} block (missing {{/if}})".to_string(),
    })
}

struct LoopFrame<'a> {
    item: &'a Value,
    index: usize,
    last: bool,
}

fn resolve_each_key<'a>(key: &str, ctx: &'a PipelineContext, stack: &[LoopFrame<'a>]) -> Result<Vec<&'a Value>, CompositionError> {
    let value = if key == "this" || key.starts_with("this.") {
        let frame = stack.last().ok_or_else(|| CompositionError::Internal {
            detail: "{{this...}} referenced outside a loop body".to_string(),
        })?;
        let path = key.strip_prefix("this.").unwrap_or("");
        json_lookup(frame.item, path)
    } else {
        json_lookup(&ctx.config, key)
    };
    match value {
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        _ => Err(CompositionError::LoopTargetNotArray { key: key.to_string() }),
    }
}

/// Stage 4: `{{#each key}}...{{this.field}}...{{/each}}`, with
/// `{{@index}}`/`{{@last}}` and nested loops (the outer `this` shadowed).
///
/// # Errors
/// `CompositionError::LoopTargetNotArray` if `key` does not resolve to a
/// JSON array; `CompositionError::MalformedExpression` on an unterminated
/// `{{#each}}` block.
pub fn stage_loops(input: &str, ctx: &PipelineContext) -> Result<String, CompositionError> {
    resolve_loops(input, ctx, &[])
}

fn resolve_loops<'a>(input: &str, ctx: &'a PipelineContext, stack: &[LoopFrame<'a>]) -> Result<String, CompositionError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(start) = rest.find("{{#each") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after = &rest[start + "{{#each".len()..];
        let Some(close) = after.find("}}") else {
            return Err(CompositionError::MalformedExpression {
                expr: "unterminated {{#each ...}} marker".to_string(),
            });
        };
        let key = after[..close].trim().to_string();
        let body_region = &after[close + 2..];
        let (body, remainder) = split_each_body(body_region)?;
        let items = resolve_each_key(&key, ctx, stack)?;
        let last_idx = items.len().saturating_sub(1);

        let mut rendered = String::new();
        for (index, item) in items.into_iter().enumerate() {
            let mut new_stack: Vec<LoopFrame<'a>> = Vec::with_capacity(stack.len() + 1);
            for frame in stack {
                new_stack.push(LoopFrame { item: frame.item, index: frame.index, last: frame.last });
            }
            new_stack.push(LoopFrame { item, index, last: index == last_idx });
            let substituted = substitute_this_tokens(body, &new_stack)?;
            rendered.push_str(&resolve_loops(&substituted, ctx, &new_stack)?);
        }
        out.push_str(&rendered);
        rest = remainder;
    }
    Ok(out)
}

fn split_each_body(body: &str) -> Result<(&str, &str), CompositionError> {
    let mut depth = 0i32;
    let mut idx = 0usize;
    while idx < body.len() {
        if !body.is_char_boundary(idx) {
            idx += 1;
            continue;
        }
        let tail = &body[idx..];
        if tail.starts_with("{{#each") {
            depth += 1;
            idx += "{{#each".len();
        } else if tail.starts_with("{{/each}}") {
            if depth == 0 {
                return Ok((&body[..idx], &body[idx + "{{/each}}".len()..]));
            }
            depth -= 1;
            idx += "{{/each}}".len();
        } else {
            idx += 1;
        }
    }
    Err(CompositionError::MalformedExpression {
        expr: "unterminated {{#each ...}} block (missing {{/each}})".to_string(),
    })
}

fn substitute_this_tokens(body: &str, stack: &[LoopFrame<'_>]) -> Result<String, CompositionError> {
    let frame = stack.last().ok_or_else(|| CompositionError::Internal {
        detail: "no active loop frame while substituting {{this...}}".to_string(),
    })?;
    let mut out = String::with_capacity(body.len());
    let mut idx = 0usize;
    while idx < body.len() {
        if !body.is_char_boundary(idx) {
            idx += 1;
            continue;
        }
        let tail = &body[idx..];
        if tail.starts_with("{{#each") {
            let (span_end, after_block) = copy_each_block(body, idx)?;
            out.push_str(&body[idx..span_end]);
            idx = after_block;
        } else if tail.starts_with("{{@index}}") {
            out.push_str(&frame.index.to_string());
            idx += "{{@index}}".len();
        } else if tail.starts_with("{{@last}}") {
            out.push_str(&frame.last.to_string());
            idx += "{{@last}}".len();
        } else if tail.starts_with("{{this") {
            let Some(close) = tail.find("}}") else {
                return Err(CompositionError::MalformedExpression {
                    expr: "unterminated {{this...}} marker".to_string(),
                });
            };
            let token = &tail[2..close];
            let rendered = if token == "this" {
                render_value(frame.item)
            } else if let Some(path) = token.strip_prefix("this.") {
                json_lookup(frame.item, path).map(render_value).unwrap_or_default()
            } else {
                tail[..close + 2].to_string()
            };
            out.push_str(&rendered);
            idx += close + 2;
        } else {
            let ch_len = tail.chars().next().map_or(1, char::len_utf8);
            out.push_str(&tail[..ch_len]);
            idx += ch_len;
        }
    }
    Ok(out)
}

/// Finds the end of a nested `{{#each}}...{{/each}}` block starting at
/// `start` in `body`, returning `(block_end, after_block)`.
fn copy_each_block(body: &str, start: usize) -> Result<(usize, usize), CompositionError> {
    let mut depth = 0i32;
    let mut idx = start;
    while idx < body.len() {
        if !body.is_char_boundary(idx) {
            idx += 1;
            continue;
        }
        let tail = &body[idx..];
        if tail.starts_with("{{#each") {
            depth += 1;
            idx += "{{#each".len();
        } else if tail.starts_with("{{/each}}") {
            depth -= 1;
            idx += "{{/each}}".len();
            if depth == 0 {
                return Ok((idx, idx));
            }
        } else {
            idx += 1;
        }
    }
    Err(CompositionError::MalformedExpression {
        expr: "unterminated nested {{#each ...}} block".to_string(),
    })
}

#[allow(clippy::expect_used)]
static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{fn:([a-zA-Z0-9_\-]+)\s*([^{}]*)\}\}").expect("static function-call pattern is valid regex")
});

/// Stage 5: `{{fn:<name> arg1 arg2}}` against the closed [`BuiltinFunction`]
/// set.
#[must_use]
pub fn stage_functions(input: &str) -> String {
    FUNCTION_RE
        .replace_all(input, |caps: &regex::Captures| {
            let args: Vec<&str> = caps[2].split_whitespace().collect();
            BuiltinFunction::by_name(&caps[1]).map_or_else(|| caps[0].to_string(), |f| f.call(&args))
        })
        .into_owned()
}

#[allow(clippy::expect_used)]
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_.\-]+)\s*\}\}").expect("static variable pattern is valid regex"));

/// Stage 6: `{{config.dot.path}}`, `{{project.name}}`, and built-ins
/// (`{{PROJECT_ROOT}}`, `{{timestamp}}`, etc).
#[must_use]
pub fn stage_variables(input: &str, ctx: &PipelineContext) -> String {
    VARIABLE_RE
        .replace_all(input, |caps: &regex::Captures| {
            let key = &caps[1];
            resolve_variable(key, ctx).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn resolve_variable(key: &str, ctx: &PipelineContext) -> Option<String> {
    match key {
        "PROJECT_ROOT" => Some(ctx.project_root.clone()),
        "PROJECT_EDISON_DIR" => Some(ctx.project_edison_dir.clone()),
        "timestamp" => Some(ctx.timestamp.clone()),
        "generated_date" => Some(ctx.generated_date.clone()),
        "version" => Some(ctx.version.clone()),
        "source_layers" => Some(ctx.source_layers.clone()),
        "output_path" => Some(ctx.output_path.clone()),
        "name" => Some(ctx.name.clone()),
        "content_type" => Some(ctx.content_type.clone()),
        "project.name" => Some(ctx.project_name.clone()),
        _ => key.strip_prefix("config.").and_then(|path| json_lookup(&ctx.config, path)).map(render_value),
    }
}

#[allow(clippy::expect_used)]
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{reference-section:([^{}#|]+)#([^{}|]+)\|([^{}]+)\}\}")
        .expect("static reference pattern is valid regex")
});

/// Stage 7: `{{reference-section:path#name|purpose}}` becomes an on-demand
/// pointer, not embedded content.
#[must_use]
pub fn stage_references(input: &str) -> String {
    REFERENCE_RE
        .replace_all(input, |caps: &regex::Captures| {
            format!("(see {}#{} — {})", caps[1].trim(), caps[2].trim(), caps[3].trim())
        })
        .into_owned()
}

/// Ambient cleanup: collapses blank-line runs left over from conditionals
/// and loops resolving to nothing. Not part of the documented pipeline
/// order but harmless to run before stage 8's validation.
#[must_use]
pub fn stage_tidy(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut newline_run = 0u32;
    for ch in input.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(ch);
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }
    out
}

fn strip_section_markers(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let Some(start) = rest.find("<!--") else {
            out.push_str(rest);
            break;
        };
        let Some(rel_end) = rest[start..].find("-->") else {
            out.push_str(rest);
            break;
        };
        let end = start + rel_end + "-->".len();
        let comment_body = rest[start + 4..start + rel_end].trim();
        let is_marker = comment_body.starts_with("SECTION:")
            || comment_body.starts_with("/SECTION:")
            || comment_body.starts_with("EXTEND:")
            || comment_body == "/EXTEND";
        out.push_str(&rest[..start]);
        if !is_marker {
            out.push_str(&rest[start..end]);
        }
        rest = &rest[end..];
    }
    out
}

/// Stage 8: strips leftover section markers, then fails on any remaining
/// unresolved `{{...}}` marker.
///
/// # Errors
/// `CompositionError::UnresolvedMarker` naming the first leftover marker.
pub fn stage_validate(input: &str) -> Result<String, CompositionError> {
    let stripped = strip_section_markers(input);
    if let Some(start) = stripped.find("{{") {
        if let Some(rel_end) = stripped[start..].find("}}") {
            let end = start + rel_end + 2;
            return Err(CompositionError::UnresolvedMarker { marker: stripped[start..end].to_string() });
        }
    }
    Ok(stripped)
}

/// Runs the full template pipeline (stages 2-8) over a document that has
/// already been through section/extend merge (stage 1, handled by
/// [`merge_section`] before this runs).
///
/// # Errors
/// Propagates any stage's failure.
pub fn run_pipeline(input: &str, ctx: &PipelineContext) -> Result<String, CompositionError> {
    let out = stage_includes(input, ctx)?;
    let out = stage_conditionals(&out, ctx)?;
    let out = stage_loops(&out, ctx)?;
    let out = stage_functions(&out);
    let out = stage_variables(&out, ctx);
    let out = stage_references(&out);
    let out = stage_tidy(&out);
    stage_validate(&out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn extract_sections_finds_section_and_extend_markers() {
        let bundled = "intro\n<!-- SECTION: role -->\nYou are the API Builder agent.\n<!-- /SECTION: role -->\noutro";
        let pack = "<!-- EXTEND: role -->\nAlways document new endpoints in OpenAPI.\n<!-- /EXTEND -->";

        let bundled_fragments = extract_sections(bundled, 0).unwrap();
        let pack_fragments = extract_sections(pack, 1).unwrap();

        assert_eq!(bundled_fragments.len(), 1);
        assert!(!bundled_fragments[0].extend);
        assert_eq!(pack_fragments.len(), 1);
        assert!(pack_fragments[0].extend);

        let mut fragments = bundled_fragments;
        fragments.extend(pack_fragments);
        let merged = merge_section(fragments, MergeStrategy::SectionMerge, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_SHINGLES).unwrap();
        assert!(merged.starts_with("You are the API Builder agent."));
        assert!(merged.contains("Always document new endpoints in OpenAPI."));
    }

    #[test]
    fn extract_sections_rejects_mismatched_closing_name() {
        let raw = "<!-- SECTION: role -->text<!-- /SECTION: other -->";
        let err = extract_sections(raw, 0).unwrap_err();
        assert!(matches!(err, CompositionError::SectionMismatch { .. }));
    }

    #[test]
    fn section_merge_extend_appends_to_replaced_base() {
        let fragments = vec![
            Fragment { section: "s".into(), content: "bundled".into(), layer_rank: 0, extend: false },
            Fragment { section: "s".into(), content: "project".into(), layer_rank: 1, extend: false },
            Fragment { section: "s".into(), content: "pack extension".into(), layer_rank: 2, extend: true },
        ];
        let merged = merge_section(fragments, MergeStrategy::SectionMerge, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_SHINGLES).unwrap();
        assert_eq!(merged, "project\n\npack extension");
    }

    #[test]
    fn concatenate_with_dedup_drops_near_duplicate_fragments() {
        let long = "alpha bravo charlie delta echo foxtrot golf hotel india juliet";
        let fragments = vec![
            Fragment { section: "s".into(), content: long.to_string(), layer_rank: 0, extend: false },
            Fragment { section: "s".into(), content: long.to_string(), layer_rank: 1, extend: false },
        ];
        let merged = merge_section(fragments, MergeStrategy::ConcatenateWithDedup, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_SHINGLES).unwrap();
        assert_eq!(merged, long);
    }

    #[test]
    fn json_merge_deep_merges_layers() {
        let fragments = vec![
            Fragment { section: "s".into(), content: r#"{"a": 1, "nested": {"x": 1}}"#.into(), layer_rank: 0, extend: false },
            Fragment { section: "s".into(), content: r#"{"nested": {"y": 2}}"#.into(), layer_rank: 1, extend: false },
        ];
        let merged = merge_section(fragments, MergeStrategy::JsonMerge, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_SHINGLES).unwrap();
        let value: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["nested"]["x"], 1);
        assert_eq!(value["nested"]["y"], 2);
    }

    #[test]
    fn short_fragments_below_min_shingles_never_dedup() {
        assert!(!is_near_duplicate("short text", &["short text".to_string()], 0.0, 5));
    }

    fn ctx() -> PipelineContext {
        let mut tier = IncludeTier::default();
        tier.files.insert("header".into(), "# Title".into());
        let mut sections = HashMap::new();
        sections.insert("footer".into(), "the footer section".into());
        tier.sections.insert("doc".into(), sections);

        PipelineContext {
            tiers: vec![tier],
            config: serde_json::json!({"feature": {"enabled": true}, "items": [{"name": "a"}, {"name": "b"}]}),
            active_packs: BTreeSet::from(["api-pack".to_string()]),
            project_root: "/tmp/project".into(),
            project_edison_dir: "/tmp/project/.edison".into(),
            project_name: "Edison".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            generated_date: "2026-01-01".into(),
            version: "1.0.0".into(),
            source_layers: "bundled, project".into(),
            output_path: "_generated/doc.md".into(),
            name: "doc".into(),
            content_type: "agent".into(),
        }
    }

    #[test]
    fn pipeline_resolves_includes_conditionals_loops_functions_and_variables() {
        let ctx = ctx();
        let input = "{{include:header}}\n{{if:config(feature.enabled)}}on{{else}}off{{/if}}\n\
            {{#each items}}[{{this.name}}:{{@index}}:{{@last}}]{{/each}}\n\
            {{fn:upper hi}} {{config.feature.enabled}} {{project.name}}";
        let out = run_pipeline(input, &ctx).unwrap();
        assert!(out.contains("# Title"));
        assert!(out.contains("on"));
        assert!(out.contains("[a:0:false][b:1:true]"));
        assert!(out.contains("HI"));
        assert!(out.contains("true"));
        assert!(out.contains("Edison"));
    }

    #[test]
    fn pipeline_include_section_resolves_named_section() {
        let ctx = ctx();
        let out = run_pipeline("{{include-section:doc#footer}}", &ctx).unwrap();
        assert_eq!(out, "the footer section");
    }

    #[test]
    fn pipeline_include_if_honors_expression() {
        let ctx = ctx();
        let out = run_pipeline("{{include-if:has-pack(api-pack):header}}", &ctx).unwrap();
        assert_eq!(out, "# Title");

        let out = run_pipeline("{{include-if:has-pack(missing-pack):header}}", &ctx).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn pipeline_reference_section_is_a_pointer_not_embedded() {
        let ctx = ctx();
        let out = run_pipeline("{{reference-section:doc#footer|see also}}", &ctx).unwrap();
        assert!(out.contains("see doc#footer"));
        assert!(!out.contains("the footer section"));
    }

    #[test]
    fn nested_loops_shadow_outer_this() {
        let mut ctx = ctx();
        ctx.config = serde_json::json!({
            "groups": [
                {"label": "g1", "items": [{"name": "a"}, {"name": "b"}]},
                {"label": "g2", "items": [{"name": "c"}]},
            ]
        });
        let input = "{{#each groups}}{{this.label}}:{{#each this.items}}{{this.name}}{{/each}};{{/each}}";
        let out = run_pipeline(input, &ctx).unwrap();
        assert_eq!(out, "g1:ab;g2:c;");
    }

    #[test]
    fn pipeline_errors_on_unknown_include() {
        let ctx = ctx();
        let err = run_pipeline("{{include:missing}}", &ctx).unwrap_err();
        assert!(matches!(err, CompositionError::IncludeNotFound { .. }));
    }

    #[test]
    fn pipeline_errors_on_leftover_marker() {
        let ctx = ctx();
        let err = run_pipeline("{{unresolved_var}}", &ctx).unwrap_err();
        assert!(matches!(err, CompositionError::UnresolvedMarker { .. }));
    }

    #[test]
    fn pipeline_strips_leftover_section_markers() {
        let ctx = ctx();
        let out = run_pipeline("<!-- SECTION: role -->text<!-- /SECTION: role -->", &ctx).unwrap();
        assert_eq!(out, "text");
    }
}
