//! Minify Module for the Component Packager
//!
//! JavaScript goes through oxc: parse, then re-emit with the minifying
//! code generator. Nothing is renamed or folded, so the output keeps the
//! exact semantics of the input.
//!
//! The output targets ES2015 runtimes. The generator prints a string as a
//! template literal when that is shortest and collapses `{c: c}` to `{c}`,
//! and it has no switch for either. ES5-only engines cannot load it.
//!
//! Stylesheets are handled by a small state machine that strips comments
//! and collapses whitespace around punctuation while leaving string
//! literals untouched.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::error::{PackageError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// JAVASCRIPT
// ═══════════════════════════════════════════════════════════════════════════════

/// Minify a classic (non-module) script. `with` statements and sloppy-mode
/// constructs are accepted, which the template runtimes rely on.
pub fn minify_script(source: &str, file: &str) -> Result<String> {
    minify_js_as(source, file, SourceType::default().with_module(false))
}

/// Minify a browser asset. Assets may be classic scripts or ES modules, so
/// the module grammar is tried when the script grammar rejects the file.
pub fn minify_asset_js(source: &str, file: &str) -> Result<String> {
    match minify_script(source, file) {
        Ok(code) => Ok(code),
        Err(script_err) => {
            minify_js_as(source, file, SourceType::default().with_module(true)).map_err(|_| script_err)
        }
    }
}

fn minify_js_as(source: &str, file: &str, source_type: SourceType) -> Result<String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PackageError::ScriptSyntax {
            file: file.to_string(),
            message,
        });
    }

    Ok(Codegen::new()
        .with_options(CodegenOptions::minify())
        .build(&ret.program)
        .code)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CSS
// ═══════════════════════════════════════════════════════════════════════════════

/// Characters that never need whitespace before them.
const NO_SPACE_BEFORE: &[char] = &['{', '}', ';', ',', '>', '~', ')'];
/// Characters that never need whitespace after them.
const NO_SPACE_AFTER: &[char] = &['{', '}', ';', ',', '>', '~', ':', '('];

enum CssState {
    Normal,
    InString(char),
    InStringEscape(char),
    AfterSlash,
    InComment,
    InCommentStar,
}

/// Minify a stylesheet. Deterministic; malformed input (an unterminated
/// comment or string) is emitted as far as it goes rather than rejected.
pub fn minify_css(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut state = CssState::Normal;
    let mut pending_space = false;

    for ch in input.chars() {
        match state {
            CssState::Normal => match ch {
                '/' => state = CssState::AfterSlash,
                c if c.is_whitespace() => pending_space = true,
                '"' | '\'' => {
                    push_css_char(&mut out, ch, &mut pending_space);
                    state = CssState::InString(ch);
                }
                _ => push_css_char(&mut out, ch, &mut pending_space),
            },
            CssState::AfterSlash => {
                if ch == '*' {
                    state = CssState::InComment;
                } else {
                    push_css_char(&mut out, '/', &mut pending_space);
                    state = CssState::Normal;
                    if ch.is_whitespace() {
                        pending_space = true;
                    } else if ch == '/' {
                        state = CssState::AfterSlash;
                    } else {
                        push_css_char(&mut out, ch, &mut pending_space);
                        if ch == '"' || ch == '\'' {
                            state = CssState::InString(ch);
                        }
                    }
                }
            }
            CssState::InComment => {
                if ch == '*' {
                    state = CssState::InCommentStar;
                }
            }
            CssState::InCommentStar => {
                state = match ch {
                    '/' => {
                        // a comment separates tokens like whitespace does
                        pending_space = true;
                        CssState::Normal
                    }
                    '*' => CssState::InCommentStar,
                    _ => CssState::InComment,
                }
            }
            CssState::InString(q) => {
                out.push(ch);
                if ch == '\\' {
                    state = CssState::InStringEscape(q);
                } else if ch == q {
                    state = CssState::Normal;
                }
            }
            CssState::InStringEscape(q) => {
                out.push(ch);
                state = CssState::InString(q);
            }
        }
    }

    if let CssState::AfterSlash = state {
        push_css_char(&mut out, '/', &mut pending_space);
    }

    out
}

fn push_css_char(out: &mut String, ch: char, pending_space: &mut bool) {
    if *pending_space {
        *pending_space = false;
        if let Some(last) = out.chars().last() {
            if !NO_SPACE_AFTER.contains(&last) && !NO_SPACE_BEFORE.contains(&ch) {
                out.push(' ');
            }
        }
    }
    if ch == '}' && out.ends_with(';') {
        out.pop();
    }
    out.push(ch);
}
