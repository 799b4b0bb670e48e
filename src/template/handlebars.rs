//! Handlebars precompiler.
//!
//! Supports mustache output (escaped and raw), comments, whitespace control,
//! path expressions with parent access and `@` data variables, and the
//! built-in block helpers `if`, `unless`, `each` and `with` with `else`
//! sections. Partials and custom helpers need a runtime registry the
//! packaged artifact does not ship, so they are rejected at compile time.

use lazy_static::lazy_static;
use regex::Regex;

use super::emit::{js_string, Helper, JsEmitter};
use crate::error::{PackageError, Result};

lazy_static! {
    /// Handlebars number literals; emitted into the render function verbatim.
    static ref NUMBER_RE: Regex = Regex::new(r"^-?[0-9]+(?:\.[0-9]+)?$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Tag {
        body: String,
        triple: bool,
        line: usize,
    },
}

fn line_at(source: &str, byte_idx: usize) -> usize {
    source[..byte_idx].matches('\n').count() + 1
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut cursor = 0;
    let mut trim_next = false;

    while cursor < source.len() {
        let rest = &source[cursor..];
        let Some(pos) = rest.find("{{") else {
            push_text(&mut text, rest, &mut trim_next);
            break;
        };

        // \{{ is a literal mustache opener
        if pos > 0 && rest.as_bytes()[pos - 1] == b'\\' {
            push_text(&mut text, &rest[..pos - 1], &mut trim_next);
            text.push_str("{{");
            cursor += pos + 2;
            continue;
        }

        push_text(&mut text, &rest[..pos], &mut trim_next);
        let line = line_at(source, cursor + pos);
        let after = &rest[pos + 2..];

        let (body, triple, consumed) = if after.starts_with("!--") {
            let end = after
                .find("--}}")
                .ok_or_else(|| PackageError::template_syntax(line, "unclosed comment"))?;
            (&after[..end], false, end + 4)
        } else if let Some(inner) = after.strip_prefix('{') {
            let end = inner
                .find("}}}")
                .ok_or_else(|| PackageError::template_syntax(line, "unclosed `{{{`"))?;
            (&inner[..end], true, end + 4)
        } else {
            let end = after
                .find("}}")
                .ok_or_else(|| PackageError::template_syntax(line, "unclosed `{{`"))?;
            (&after[..end], false, end + 2)
        };

        let mut body = body;
        if !triple {
            if let Some(stripped) = body.strip_prefix('~') {
                body = stripped;
                let kept = text.trim_end().len();
                text.truncate(kept);
            }
            if let Some(stripped) = body.strip_suffix('~') {
                body = stripped;
                trim_next = true;
            }
        }

        if !text.is_empty() {
            tokens.push(Token::Text(std::mem::take(&mut text)));
        }
        tokens.push(Token::Tag {
            body: body.trim().to_string(),
            triple,
            line,
        });
        cursor += pos + 2 + consumed;
    }

    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

fn push_text(text: &mut String, chunk: &str, trim_next: &mut bool) {
    if *trim_next {
        *trim_next = false;
        text.push_str(chunk.trim_start());
    } else {
        text.push_str(chunk);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum PathExpr {
    /// `../` count plus dotted segments; no segments means the context itself.
    Context { depth: usize, parts: Vec<String> },
    /// `@index`, `@key`, `@first`, `@last`.
    Data(String),
    /// `@root.a.b`
    Root(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(PathExpr),
    /// Already a valid JavaScript literal.
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockHelper {
    If,
    Unless,
    Each,
    With,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output {
        value: Operand,
        escape: bool,
        line: usize,
    },
    Block {
        helper: BlockHelper,
        arg: Operand,
        body: Vec<Node>,
        inverse: Vec<Node>,
        line: usize,
    },
}

struct Frame {
    helper: BlockHelper,
    arg: Operand,
    body: Vec<Node>,
    inverse: Vec<Node>,
    in_inverse: bool,
    /// Name a `{{/name}}` must carry to close this block.
    close_name: String,
    /// Opened by `{{else if ..}}`; closes together with its parent.
    chained: bool,
    line: usize,
}

impl Frame {
    fn into_node(self) -> Node {
        Node::Block {
            helper: self.helper,
            arg: self.arg,
            body: self.body,
            inverse: self.inverse,
            line: self.line,
        }
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-')
}

fn split_segments(s: &str, line: usize) -> Result<Vec<String>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(['.', '/'])
        .map(|seg| {
            if is_segment(seg) {
                Ok(seg.to_string())
            } else {
                Err(PackageError::template_syntax(
                    line,
                    format!("invalid path segment `{}` in `{}`", seg, s),
                ))
            }
        })
        .collect()
}

fn parse_operand(s: &str, line: usize) -> Result<Operand> {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return Ok(Operand::Literal(js_string(&s[1..s.len() - 1])));
    }
    if NUMBER_RE.is_match(s) || matches!(s, "true" | "false" | "null" | "undefined") {
        return Ok(Operand::Literal(s.to_string()));
    }

    if let Some(data) = s.strip_prefix('@') {
        let (name, tail) = match data.split_once('.') {
            Some((name, tail)) => (name, tail),
            None => (data, ""),
        };
        return match name {
            "root" => Ok(Operand::Path(PathExpr::Root(split_segments(tail, line)?))),
            "index" | "key" | "first" | "last" if tail.is_empty() => {
                Ok(Operand::Path(PathExpr::Data(name.to_string())))
            }
            _ => Err(PackageError::template_syntax(
                line,
                format!("unknown data variable `@{}`", data),
            )),
        };
    }

    let mut rest = s;
    let mut depth = 0;
    while let Some(stripped) = rest.strip_prefix("../") {
        depth += 1;
        rest = stripped;
    }
    if rest == ".." {
        depth += 1;
        rest = "";
    }
    let rest = match rest {
        "this" | "." => "",
        _ => rest
            .strip_prefix("this.")
            .or_else(|| rest.strip_prefix("this/"))
            .or_else(|| rest.strip_prefix("./"))
            .unwrap_or(rest),
    };
    Ok(Operand::Path(PathExpr::Context {
        depth,
        parts: split_segments(rest, line)?,
    }))
}

fn parse_helper(name: &str, line: usize) -> Result<BlockHelper> {
    match name {
        "if" => Ok(BlockHelper::If),
        "unless" => Ok(BlockHelper::Unless),
        "each" => Ok(BlockHelper::Each),
        "with" => Ok(BlockHelper::With),
        other => Err(PackageError::template_syntax(
            line,
            format!("unsupported block helper `{}`", other),
        )),
    }
}

/// Split `helper arg` and insist on exactly one argument.
fn helper_and_arg(opener: &str, line: usize) -> Result<(&str, &str)> {
    let opener = opener.trim();
    let (name, arg) = opener
        .split_once(char::is_whitespace)
        .ok_or_else(|| PackageError::template_syntax(line, format!("`{}` needs an argument", opener)))?;
    let arg = arg.trim();
    if arg.split_whitespace().count() != 1 {
        return Err(PackageError::template_syntax(
            line,
            format!("`{}` takes exactly one argument", name),
        ));
    }
    Ok((name, arg))
}

fn current<'s>(stack: &'s mut [Frame], root: &'s mut Vec<Node>) -> &'s mut Vec<Node> {
    match stack.last_mut() {
        Some(frame) if frame.in_inverse => &mut frame.inverse,
        Some(frame) => &mut frame.body,
        None => root,
    }
}

fn open_else(stack: &mut [Frame], line: usize) -> Result<()> {
    let frame = stack
        .last_mut()
        .ok_or_else(|| PackageError::template_syntax(line, "`else` outside of a block"))?;
    if frame.in_inverse {
        return Err(PackageError::template_syntax(line, "duplicate `else`"));
    }
    frame.in_inverse = true;
    Ok(())
}

fn close_block(stack: &mut Vec<Frame>, root: &mut Vec<Node>, name: &str, line: usize) -> Result<()> {
    let mut inner: Option<Node> = None;
    loop {
        let mut frame = stack.pop().ok_or_else(|| {
            PackageError::template_syntax(line, format!("unexpected `{{{{/{}}}}}`", name))
        })?;
        if let Some(node) = inner.take() {
            frame.inverse.push(node);
        }
        if frame.chained {
            inner = Some(frame.into_node());
            continue;
        }
        if frame.close_name != name {
            return Err(PackageError::template_syntax(
                line,
                format!(
                    "`{{{{/{}}}}}` does not close `{}` opened on line {}",
                    name, frame.close_name, frame.line
                ),
            ));
        }
        let node = frame.into_node();
        current(stack, root).push(node);
        return Ok(());
    }
}

fn parse(tokens: Vec<Token>) -> Result<Vec<Node>> {
    let mut root = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for token in tokens {
        let (body, triple, line) = match token {
            Token::Text(text) => {
                current(&mut stack, &mut root).push(Node::Text(text));
                continue;
            }
            Token::Tag { body, triple, line } => (body, triple, line),
        };

        if triple {
            let value = parse_operand(&body, line)?;
            current(&mut stack, &mut root).push(Node::Output {
                value,
                escape: false,
                line,
            });
            continue;
        }

        if body.starts_with('!') {
            continue;
        }

        if let Some(opener) = body.strip_prefix('#') {
            let (name, arg) = helper_and_arg(opener, line)?;
            stack.push(Frame {
                helper: parse_helper(name, line)?,
                arg: parse_operand(arg, line)?,
                body: Vec::new(),
                inverse: Vec::new(),
                in_inverse: false,
                close_name: name.to_string(),
                chained: false,
                line,
            });
        } else if body == "else" || body == "^" {
            open_else(&mut stack, line)?;
        } else if let Some(opener) = body.strip_prefix("else ") {
            open_else(&mut stack, line)?;
            let (name, arg) = helper_and_arg(opener, line)?;
            stack.push(Frame {
                helper: parse_helper(name, line)?,
                arg: parse_operand(arg, line)?,
                body: Vec::new(),
                inverse: Vec::new(),
                in_inverse: false,
                close_name: name.to_string(),
                chained: true,
                line,
            });
        } else if let Some(path) = body.strip_prefix('^') {
            let path = path.trim();
            stack.push(Frame {
                helper: BlockHelper::Unless,
                arg: parse_operand(path, line)?,
                body: Vec::new(),
                inverse: Vec::new(),
                in_inverse: false,
                close_name: path.to_string(),
                chained: false,
                line,
            });
        } else if let Some(name) = body.strip_prefix('/') {
            close_block(&mut stack, &mut root, name.trim(), line)?;
        } else if body.starts_with('>') {
            return Err(PackageError::template_syntax(
                line,
                "partials are not supported in packaged templates",
            ));
        } else if let Some(path) = body.strip_prefix('&') {
            let value = parse_operand(path, line)?;
            current(&mut stack, &mut root).push(Node::Output {
                value,
                escape: false,
                line,
            });
        } else if body.contains(char::is_whitespace) {
            return Err(PackageError::template_syntax(
                line,
                format!("helper calls are not supported: `{{{{{}}}}}`", body),
            ));
        } else {
            let value = parse_operand(&body, line)?;
            current(&mut stack, &mut root).push(Node::Output {
                value,
                escape: true,
                line,
            });
        }
    }

    if let Some(frame) = stack.last() {
        return Err(PackageError::template_syntax(
            frame.line,
            format!("unclosed block `{}`", frame.close_name),
        ));
    }
    Ok(root)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODEGEN
// ═══════════════════════════════════════════════════════════════════════════════

struct Scope {
    var: String,
    loop_id: Option<usize>,
}

fn lookup(var: &str, parts: &[String]) -> String {
    if parts.is_empty() {
        return var.to_string();
    }
    let keys: Vec<String> = parts.iter().map(|p| js_string(p)).collect();
    format!("__get({},[{}])", var, keys.join(","))
}

fn operand_js(op: &Operand, scopes: &[Scope], line: usize) -> Result<String> {
    let path = match op {
        Operand::Literal(lit) => return Ok(lit.clone()),
        Operand::Path(path) => path,
    };
    match path {
        PathExpr::Context { depth, parts } => {
            if *depth >= scopes.len() {
                return Err(PackageError::template_syntax(
                    line,
                    "`../` goes above the root context",
                ));
            }
            let scope = &scopes[scopes.len() - 1 - depth];
            Ok(lookup(&scope.var, parts))
        }
        PathExpr::Root(parts) => Ok(lookup("locals", parts)),
        PathExpr::Data(name) => {
            let id = scopes
                .iter()
                .rev()
                .find_map(|s| s.loop_id)
                .ok_or_else(|| {
                    PackageError::template_syntax(line, format!("`@{}` used outside `#each`", name))
                })?;
            Ok(match name.as_str() {
                "index" => format!("__i{}", id),
                "key" => format!("__k{}", id),
                "first" => format!("(__i{}===0)", id),
                _ => format!("(__i{id}===__n{id}-1)", id = id),
            })
        }
    }
}

fn emit_nodes(nodes: &[Node], em: &mut JsEmitter, scopes: &mut Vec<Scope>) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => em.html(text),
            Node::Output {
                value,
                escape,
                line,
            } => {
                let js = operand_js(value, scopes, *line)?;
                if *escape {
                    em.escaped(&js);
                } else {
                    em.raw(&js);
                }
            }
            Node::Block {
                helper,
                arg,
                body,
                inverse,
                line,
            } => {
                let arg = operand_js(arg, scopes, *line)?;
                match helper {
                    BlockHelper::If | BlockHelper::Unless => {
                        let negate = if *helper == BlockHelper::Unless { "!" } else { "" };
                        em.stmt(&format!("if({}__truthy({})){{", negate, arg));
                        emit_nodes(body, em, scopes)?;
                    }
                    BlockHelper::With => {
                        let id = em.unique_id();
                        em.stmt(&format!("var __c{id}={arg};if(__truthy(__c{id})){{", id = id, arg = arg));
                        scopes.push(Scope {
                            var: format!("__c{}", id),
                            loop_id: None,
                        });
                        emit_nodes(body, em, scopes)?;
                        scopes.pop();
                    }
                    BlockHelper::Each => {
                        let id = em.unique_id();
                        em.stmt(&format!(
                            "var __s{id}={arg};\
                             var __o{id}=(__s{id}!=null&&typeof __s{id}===\"object\"&&!Array.isArray(__s{id}))?Object.keys(__s{id}):null;\
                             var __n{id}=__s{id}==null?0:(__o{id}?__o{id}.length:(__s{id}.length||0));\
                             if(__n{id}>0){{for(var __i{id}=0;__i{id}<__n{id};__i{id}++){{\
                             var __k{id}=__o{id}?__o{id}[__i{id}]:__i{id};var __c{id}=__s{id}[__k{id}];",
                            id = id,
                            arg = arg
                        ));
                        scopes.push(Scope {
                            var: format!("__c{}", id),
                            loop_id: Some(id),
                        });
                        emit_nodes(body, em, scopes)?;
                        scopes.pop();
                        em.stmt("}");
                    }
                }
                em.stmt("}else{");
                emit_nodes(inverse, em, scopes)?;
                em.stmt("}");
            }
        }
    }
    Ok(())
}

/// Compile handlebars source into a named `template(locals)` function.
pub(crate) fn precompile(source: &str) -> Result<String> {
    let nodes = parse(tokenize(source)?)?;
    let mut em = JsEmitter::new(&[Helper::Str, Helper::Esc, Helper::Get, Helper::Truthy]);
    em.stmt("var __c0=locals;");
    let mut scopes = vec![Scope {
        var: "__c0".to_string(),
        loop_id: None,
    }];
    emit_nodes(&nodes, &mut em, &mut scopes)?;
    Ok(em.finish(|body| body.to_string()))
}
