//! Jade precompiler.
//!
//! Lines are first folded into a tree by indentation, then each line is
//! classified (comment, text, code, control keyword or tag) and lowered to
//! JavaScript. Expressions are evaluated against `locals` through a `with`
//! block, matching how client-side jade functions see their data.
//!
//! File-system features (`include`, `extends`, `block`) and mixins are not
//! available to a standalone render function and are rejected.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::emit::{js_string, Helper, JsEmitter};
use crate::error::{PackageError, Result};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "include", "extends", "block", "append", "prepend", "mixin", "case", "when", "default",
];

/// Characters after which an attribute value is still incomplete.
const CONTINUATION_CHARS: &[char] = &[
    '+', '-', '*', '/', '%', '=', '<', '>', '!', '&', '|', '?', ':', ',', '(', '[', '{', '.',
];

lazy_static! {
    static ref EACH_RE: Regex = Regex::new(
        r"^(?:each|for)\s+([A-Za-z_$][\w$]*)(?:\s*,\s*([A-Za-z_$][\w$]*))?\s+in\s+(.+)$"
    )
    .unwrap();
    static ref TAG_NAME_RE: Regex = Regex::new(r"^[A-Za-z][\w:-]*").unwrap();
    static ref SHORTHAND_RE: Regex = Regex::new(r"^[\w-]+").unwrap();
    /// Whitespace followed by something that starts a new attribute.
    static ref ATTR_BOUNDARY_RE: Regex =
        Regex::new(r"^\s+[A-Za-z_@][\w:@.-]*(?:\s*(?:!?=|,|$)|\s+[A-Za-z_@])").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
    children: Vec<Line>,
}

fn build_tree(source: &str) -> Vec<Line> {
    let mut roots = Vec::new();
    let mut stack: Vec<Line> = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let content = raw.trim_start_matches(|c: char| c == ' ' || c == '\t');
        if content.trim().is_empty() {
            continue;
        }
        let indent = raw.len() - content.len();
        close_lines(&mut stack, &mut roots, Some(indent));
        stack.push(Line {
            number: idx + 1,
            indent,
            text: content.trim_end().to_string(),
            children: Vec::new(),
        });
    }
    close_lines(&mut stack, &mut roots, None);
    roots
}

/// Pop every open line indented at least `indent` (all of them for `None`)
/// into its parent.
fn close_lines(stack: &mut Vec<Line>, roots: &mut Vec<Line>, indent: Option<usize>) {
    while let Some(top) = stack.pop() {
        if indent.is_some_and(|i| top.indent < i) {
            stack.push(top);
            break;
        }
        match stack.last_mut() {
            Some(parent) => parent.children.push(top),
            None => roots.push(top),
        }
    }
}

/// Children of a text block, re-indented relative to the block.
fn raw_text(lines: &[Line]) -> String {
    fn collect(lines: &[Line], base: usize, out: &mut Vec<String>) {
        for line in lines {
            out.push(format!(
                "{}{}",
                " ".repeat(line.indent.saturating_sub(base)),
                line.text
            ));
            collect(&line.children, base, out);
        }
    }
    let base = lines.iter().map(|l| l.indent).min().unwrap_or(0);
    let mut out = Vec::new();
    collect(lines, base, &mut out);
    out.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Byte index of the `close` matching the `open` at the start of `s`,
/// skipping over quoted strings.
fn find_balanced(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Leading alphabetic word followed by whitespace or end of line.
fn keyword(text: &str) -> Option<(&str, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (word, rest) = text.split_at(end);
    if word.is_empty() || !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    Some((word, rest.trim()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TAGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Flag,
    Expr { code: String, escape: bool },
}

#[derive(Debug, Clone, PartialEq)]
struct Attr {
    name: String,
    value: AttrValue,
}

#[derive(Debug, Clone, PartialEq)]
enum TagContent {
    Empty,
    Text(String),
    TextBlock,
    Expansion(String),
    Escaped(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Tag {
    name: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<Attr>,
    self_closing: bool,
    content: TagContent,
}

fn parse_tag(text: &str, line: usize) -> Result<Tag> {
    let mut rest = text;
    let name = if let Some(m) = TAG_NAME_RE.find(rest) {
        rest = &rest[m.end()..];
        m.as_str().to_string()
    } else if rest.starts_with('#') || rest.starts_with('.') {
        "div".to_string()
    } else {
        return Err(PackageError::template_syntax(
            line,
            format!("unexpected `{}`", text),
        ));
    };

    let mut id = None;
    let mut classes = Vec::new();
    let mut attrs = Vec::new();

    loop {
        if let Some(r) = rest.strip_prefix('#') {
            let m = SHORTHAND_RE.find(r).ok_or_else(|| {
                PackageError::template_syntax(line, "`#` must be followed by an id")
            })?;
            id = Some(m.as_str().to_string());
            rest = &r[m.end()..];
        } else if let Some(r) = rest.strip_prefix('.') {
            match SHORTHAND_RE.find(r) {
                Some(m) => {
                    classes.push(m.as_str().to_string());
                    rest = &r[m.end()..];
                }
                // a trailing `.` opens a text block
                None => break,
            }
        } else if rest.starts_with('(') {
            let end = find_balanced(rest, '(', ')').ok_or_else(|| {
                PackageError::template_syntax(line, "unclosed attribute list")
            })?;
            attrs.extend(parse_attrs(&rest[1..end], line)?);
            rest = &rest[end + 1..];
        } else {
            break;
        }
    }

    let mut self_closing = false;
    if let Some(r) = rest.strip_prefix('/') {
        self_closing = true;
        rest = r;
    }

    let content = if rest.is_empty() {
        TagContent::Empty
    } else if rest == "." {
        TagContent::TextBlock
    } else if let Some(r) = rest.strip_prefix(':') {
        TagContent::Expansion(r.trim().to_string())
    } else if let Some(r) = rest.strip_prefix("!=") {
        TagContent::Raw(r.trim().to_string())
    } else if let Some(r) = rest.strip_prefix('=') {
        TagContent::Escaped(r.trim().to_string())
    } else if let Some(r) = rest.strip_prefix(' ') {
        TagContent::Text(r.to_string())
    } else {
        return Err(PackageError::template_syntax(
            line,
            format!("unexpected `{}` after `{}`", rest, name),
        ));
    };

    Ok(Tag {
        name,
        id,
        classes,
        attrs,
        self_closing,
        content,
    })
}

fn parse_attrs(inner: &str, line: usize) -> Result<Vec<Attr>> {
    let mut attrs = Vec::new();
    let mut rest = inner;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == ',' || c == '!')
            .unwrap_or(rest.len());
        let raw_name = &rest[..name_end];
        let name = raw_name.trim_matches(|c: char| c == '"' || c == '\'');
        if name.is_empty() {
            return Err(PackageError::template_syntax(
                line,
                format!("malformed attribute list `({})`", inner),
            ));
        }
        rest = rest[name_end..].trim_start();

        let value = if let Some(r) = rest.strip_prefix("!=") {
            let (code, r) = take_attr_value(r, line)?;
            rest = r;
            AttrValue::Expr {
                code,
                escape: false,
            }
        } else if let Some(r) = rest.strip_prefix('=') {
            let (code, r) = take_attr_value(r, line)?;
            rest = r;
            AttrValue::Expr { code, escape: true }
        } else {
            AttrValue::Flag
        };

        attrs.push(Attr {
            name: name.to_string(),
            value,
        });
    }

    Ok(attrs)
}

/// Read one attribute value expression. It ends at a top-level comma, or at
/// top-level whitespace that is followed by the next attribute name.
fn take_attr_value(s: &str, line: usize) -> Result<(String, &str)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut end = s.len();

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                end = i;
                break;
            }
            c if c.is_whitespace() && depth == 0 => {
                let so_far = s[..i].trim();
                let incomplete = so_far.is_empty() || so_far.ends_with(CONTINUATION_CHARS);
                if !incomplete && ATTR_BOUNDARY_RE.is_match(&s[i..]) {
                    end = i;
                    break;
                }
            }
            _ => {}
        }
    }

    let code = s[..end].trim();
    if code.is_empty() {
        return Err(PackageError::template_syntax(line, "attribute value is empty"));
    }
    Ok((code.to_string(), &s[end..]))
}

fn doctype_html(kind: &str) -> String {
    match kind {
        "" | "html" | "5" => "<!DOCTYPE html>".to_string(),
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#.to_string(),
        other => format!("<!DOCTYPE {}>", other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODEGEN
// ═══════════════════════════════════════════════════════════════════════════════

struct Compiler {
    em: JsEmitter,
}

impl Compiler {
    fn block(&mut self, lines: &[Line]) -> Result<()> {
        let mut i = 0;
        while i < lines.len() {
            i = self.line(lines, i)?;
        }
        Ok(())
    }

    /// Compile `siblings[i]` and return the index of the next unconsumed sibling.
    fn line(&mut self, siblings: &[Line], i: usize) -> Result<usize> {
        let line = &siblings[i];
        let text = line.text.as_str();

        if text.starts_with("//-") {
            return Ok(i + 1);
        }
        if let Some(comment) = text.strip_prefix("//") {
            self.em.html("<!--");
            self.em.html(comment);
            if !line.children.is_empty() {
                self.em.html("\n");
                self.em.html(&raw_text(&line.children));
            }
            self.em.html("-->");
            return Ok(i + 1);
        }
        if text.starts_with('<') {
            self.interpolate(text, line.number)?;
            self.block(&line.children)?;
            return Ok(i + 1);
        }
        if let Some(piped) = text.strip_prefix('|') {
            self.no_children(line, "piped text")?;
            self.interpolate(piped.strip_prefix(' ').unwrap_or(piped), line.number)?;
            return Ok(i + 1);
        }
        if let Some(code) = text.strip_prefix('-') {
            let code = code.trim();
            if line.children.is_empty() {
                self.em.stmt(&format!("{}\n", code));
            } else {
                self.em.stmt(&format!("{}\n{{", code));
                self.block(&line.children)?;
                self.em.stmt("}");
            }
            return Ok(i + 1);
        }
        if let Some(expr) = text.strip_prefix("!=") {
            self.no_children(line, "buffered code")?;
            self.em.raw(expr.trim());
            return Ok(i + 1);
        }
        if let Some(expr) = text.strip_prefix('=') {
            self.no_children(line, "buffered code")?;
            self.em.escaped(expr.trim());
            return Ok(i + 1);
        }
        if text.starts_with('+') || text.starts_with(':') {
            return Err(PackageError::template_syntax(
                line.number,
                "mixins and filters are not supported in packaged templates",
            ));
        }

        if let Some((word, rest)) = keyword(text) {
            match word {
                "doctype" => {
                    self.em.html(&doctype_html(rest));
                    return Ok(i + 1);
                }
                "if" | "unless" => return self.conditional(siblings, i, word == "unless", rest),
                "else" => {
                    return Err(PackageError::template_syntax(
                        line.number,
                        "`else` without a matching `if`",
                    ))
                }
                "while" => {
                    self.em.stmt(&format!("while({}\n){{", rest));
                    self.block(&line.children)?;
                    self.em.stmt("}");
                    return Ok(i + 1);
                }
                "each" | "for" => {
                    let caps = EACH_RE.captures(text).ok_or_else(|| {
                        PackageError::template_syntax(
                            line.number,
                            format!("malformed `{}`; expected `{} item[, key] in expr`", word, word),
                        )
                    })?;
                    return self.each(siblings, i, &caps);
                }
                w if UNSUPPORTED_KEYWORDS.contains(&w) => {
                    return Err(PackageError::template_syntax(
                        line.number,
                        format!("`{}` is not supported in packaged templates", w),
                    ))
                }
                _ => {}
            }
        }

        let tag = parse_tag(text, line.number)?;
        self.tag(tag, line)?;
        Ok(i + 1)
    }

    fn no_children(&self, line: &Line, what: &str) -> Result<()> {
        if line.children.is_empty() {
            Ok(())
        } else {
            Err(PackageError::template_syntax(
                line.number,
                format!("{} cannot have nested content", what),
            ))
        }
    }

    fn conditional(
        &mut self,
        siblings: &[Line],
        i: usize,
        negate: bool,
        cond: &str,
    ) -> Result<usize> {
        let line = &siblings[i];
        if cond.is_empty() {
            return Err(PackageError::template_syntax(line.number, "missing condition"));
        }
        if negate {
            self.em.stmt(&format!("if(!({}\n)){{", cond));
        } else {
            self.em.stmt(&format!("if({}\n){{", cond));
        }
        self.block(&line.children)?;
        self.em.stmt("}");

        let mut j = i + 1;
        while let Some(next) = siblings.get(j) {
            if let Some(cond) = next.text.strip_prefix("else if ") {
                self.em.stmt(&format!("else if({}\n){{", cond.trim()));
                self.block(&next.children)?;
                self.em.stmt("}");
                j += 1;
            } else if next.text == "else" {
                self.em.stmt("else{");
                self.block(&next.children)?;
                self.em.stmt("}");
                j += 1;
                break;
            } else {
                break;
            }
        }
        Ok(j)
    }

    fn each(&mut self, siblings: &[Line], i: usize, caps: &Captures<'_>) -> Result<usize> {
        let line = &siblings[i];
        let value = &caps[1];
        let params = match caps.get(2) {
            Some(key) => format!("{},{}", value, key.as_str()),
            None => value.to_string(),
        };
        let id = self.em.unique_id();

        self.em.stmt(&format!(
            "var __s{id}=({expr}\n);\
             var __o{id}=(__s{id}!=null&&typeof __s{id}===\"object\"&&!Array.isArray(__s{id}))?Object.keys(__s{id}):null;\
             var __n{id}=__s{id}==null?0:(__o{id}?__o{id}.length:(__s{id}.length||0));\
             if(__n{id}>0){{for(var __i{id}=0;__i{id}<__n{id};__i{id}++){{\
             var __k{id}=__o{id}?__o{id}[__i{id}]:__i{id};(function({params}){{",
            id = id,
            expr = &caps[3],
            params = params
        ));
        self.block(&line.children)?;
        self.em.stmt(&format!(
            "}}).call(this,__s{id}[__k{id}],__k{id});}}}}",
            id = id
        ));

        match siblings.get(i + 1) {
            Some(next) if next.text == "else" => {
                self.em.stmt("else{");
                self.block(&next.children)?;
                self.em.stmt("}");
                Ok(i + 2)
            }
            _ => Ok(i + 1),
        }
    }

    fn tag(&mut self, tag: Tag, line: &Line) -> Result<()> {
        let is_void = VOID_ELEMENTS.contains(&tag.name.as_str()) || tag.self_closing;
        let has_content = tag.content != TagContent::Empty || !line.children.is_empty();
        if is_void && has_content {
            return Err(PackageError::template_syntax(
                line.number,
                format!("`{}` is self-closing and cannot have content", tag.name),
            ));
        }

        self.em.html(&format!("<{}", tag.name));

        let has_id_attr = tag.attrs.iter().any(|a| a.name == "id");
        let has_class_attr = tag.attrs.iter().any(|a| a.name == "class");
        if let (Some(id), false) = (&tag.id, has_id_attr) {
            self.em.html(&format!(" id=\"{}\"", id));
        }
        if !tag.classes.is_empty() && !has_class_attr {
            self.em.html(&format!(" class=\"{}\"", tag.classes.join(" ")));
        }

        for attr in &tag.attrs {
            match &attr.value {
                AttrValue::Flag => self.em.html(&format!(" {}", attr.name)),
                AttrValue::Expr { code, escape } if attr.name == "class" => {
                    let mut parts: Vec<String> = tag.classes.iter().map(|c| js_string(c)).collect();
                    parts.push(format!("{}\n", code));
                    self.em.stmt(&format!(
                        "__out.push(__attr(\"class\",__cls([{}]),{}));",
                        parts.join(","),
                        escape
                    ));
                }
                AttrValue::Expr { code, escape } => {
                    self.em.stmt(&format!(
                        "__out.push(__attr({},{}\n,{}));",
                        js_string(&attr.name),
                        code,
                        escape
                    ));
                }
            }
        }

        self.em.html(if tag.self_closing { "/>" } else { ">" });

        match &tag.content {
            TagContent::Empty => self.block(&line.children)?,
            TagContent::Text(text) => {
                self.interpolate(text, line.number)?;
                self.block(&line.children)?;
            }
            TagContent::TextBlock => {
                self.interpolate(&raw_text(&line.children), line.number + 1)?;
            }
            TagContent::Expansion(nested) => {
                let inner = Line {
                    number: line.number,
                    indent: line.indent + 1,
                    text: nested.clone(),
                    children: line.children.clone(),
                };
                self.line(std::slice::from_ref(&inner), 0)?;
            }
            TagContent::Escaped(expr) => {
                self.em.escaped(expr);
                self.block(&line.children)?;
            }
            TagContent::Raw(expr) => {
                self.em.raw(expr);
                self.block(&line.children)?;
            }
        }

        if !is_void {
            self.em.html(&format!("</{}>", tag.name));
        }
        Ok(())
    }

    /// Emit text with `#{escaped}` and `!{raw}` interpolations.
    fn interpolate(&mut self, text: &str, line: usize) -> Result<()> {
        let mut rest = text;
        loop {
            let bytes = rest.as_bytes();
            let found = rest
                .match_indices('{')
                .map(|(i, _)| i)
                .find(|&i| i > 0 && matches!(bytes[i - 1], b'#' | b'!'));
            let Some(brace) = found else {
                self.em.html(rest);
                return Ok(());
            };
            let marker = brace - 1;

            if marker > 0 && bytes[marker - 1] == b'\\' {
                self.em.html(&rest[..marker - 1]);
                self.em.html(&rest[marker..=brace]);
                rest = &rest[brace + 1..];
                continue;
            }

            self.em.html(&rest[..marker]);
            let after = &rest[brace..];
            let end = find_balanced(after, '{', '}').ok_or_else(|| {
                PackageError::template_syntax(line, "unclosed interpolation")
            })?;
            let expr = after[1..end].trim();
            if bytes[marker] == b'#' {
                self.em.escaped(expr);
            } else {
                self.em.raw(expr);
            }
            rest = &after[end + 1..];
        }
    }
}

/// Compile jade source into a named `template(locals)` function.
pub(crate) fn precompile(source: &str) -> Result<String> {
    let tree = build_tree(source);
    let mut compiler = Compiler {
        em: JsEmitter::new(&[Helper::Str, Helper::Esc, Helper::Cls, Helper::Attr]),
    };
    compiler.block(&tree)?;
    Ok(compiler
        .em
        .finish(|body| format!("with(locals||{{}}){{{}\n}}", body)))
}
