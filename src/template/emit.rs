//! Shared JavaScript emission for the template precompilers.
//!
//! Both languages lower to the same shape: a named `template(locals)`
//! function that pushes string chunks onto `__out` and joins them at the
//! end. Adjacent static chunks are merged before they are emitted.

/// Runtime helpers a compiled template can pull into its preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Helper {
    /// Stringify with null/undefined as empty.
    Str,
    /// HTML-escape.
    Esc,
    /// Safe path lookup.
    Get,
    /// Handlebars truthiness (empty arrays are falsy).
    Truthy,
    /// Attribute rendering.
    Attr,
    /// Class list flattening.
    Cls,
}

impl Helper {
    fn source(self) -> &'static str {
        match self {
            Helper::Str => r#"var __str=function(v){return v==null?"":String(v)};"#,
            Helper::Esc => {
                r#"var __escMap={"&":"&amp;","<":"&lt;",">":"&gt;","\"":"&quot;","'":"&#39;"};var __esc=function(v){return __str(v).replace(/[&<>"']/g,function(c){return __escMap[c]})};"#
            }
            Helper::Get => {
                r#"var __get=function(o,p){for(var i=0;i<p.length;i++){if(o==null)return o;o=o[p[i]]}return o};"#
            }
            Helper::Truthy => {
                r#"var __truthy=function(v){return Array.isArray(v)?v.length>0:!!v};"#
            }
            Helper::Cls => {
                r#"var __cls=function(a){var r=[];for(var i=0;i<a.length;i++){var v=a[i];if(Array.isArray(v))v=__cls(v);if(v)r.push(v)}return r.join(" ")};"#
            }
            Helper::Attr => {
                r#"var __attr=function(n,v,e){if(v===false||v==null)return "";if(v===true)return " "+n;if(Array.isArray(v))v=__cls(v);return " "+n+"=\""+(e?__esc(v):__str(v))+"\""};"#
            }
        }
    }
}

pub(crate) struct JsEmitter {
    helpers: Vec<Helper>,
    body: String,
    pending_html: String,
    next_id: usize,
}

impl JsEmitter {
    pub(crate) fn new(helpers: &[Helper]) -> Self {
        Self {
            helpers: helpers.to_vec(),
            body: String::new(),
            pending_html: String::new(),
            next_id: 0,
        }
    }

    /// A fresh numeric suffix for generated variable names.
    pub(crate) fn unique_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn html(&mut self, text: &str) {
        self.pending_html.push_str(text);
    }

    pub(crate) fn escaped(&mut self, expr: &str) {
        self.flush();
        self.body.push_str("__out.push(__esc(");
        self.body.push_str(expr);
        self.body.push_str("\n));");
    }

    pub(crate) fn raw(&mut self, expr: &str) {
        self.flush();
        self.body.push_str("__out.push(__str(");
        self.body.push_str(expr);
        self.body.push_str("\n));");
    }

    pub(crate) fn stmt(&mut self, code: &str) {
        self.flush();
        self.body.push_str(code);
    }

    fn flush(&mut self) {
        if self.pending_html.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.pending_html);
        self.body.push_str("__out.push(");
        self.body.push_str(&js_string(&chunk));
        self.body.push_str(");");
    }

    /// Close the function. `wrap` receives the statement body and may place
    /// it inside another construct (the jade runtime uses a `with` block).
    pub(crate) fn finish(mut self, wrap: impl FnOnce(&str) -> String) -> String {
        self.flush();
        let mut preamble = String::new();
        for helper in &self.helpers {
            preamble.push_str(helper.source());
        }
        format!(
            "function template(locals){{var __out=[];{}{}\nreturn __out.join(\"\");}}",
            preamble,
            wrap(&self.body)
        )
    }
}

/// Quote a string as a double-quoted JavaScript literal.
pub(crate) fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
