//! Serializable style templates.
//!
//! A template is either an inject template, whose tokens are concatenated in
//! order, or a wrapper template, whose first token is a JSON array of literal
//! fragments and whose remaining tokens are the functions spliced between
//! them.

use std::{cell::OnceCell, rc::Rc};

use serde::{Deserialize, Serialize};

use super::{StyleContext, StyleFn, Styled, TemplateValue};
use crate::core::{
    error::{Error, ParseError, Result},
    script::ScriptHost,
    value::Value,
};

/// How a template's tokens are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Source {
    /// Token values concatenated in order.
    #[serde(rename = "inject", alias = "cssInject")]
    Inject,
    /// A fragment array followed by interleaved functions.
    #[default]
    #[serde(rename = "wrapper", alias = "cssWrapper")]
    Wrapper,
}

/// Kind of a serialized template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Literal text.
    String,
    /// JSON-encoded data.
    Object,
    /// Function source.
    Function,
}

/// One serialized template token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token kind.
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Token text: literal, JSON or function source depending on kind.
    pub value: String,
}

impl Token {
    /// A literal text token.
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::String,
            value: value.into(),
        }
    }

    /// A function-source token.
    pub fn function(source: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Function,
            value: source.into(),
        }
    }

    /// A JSON data token.
    pub fn object(value: &Value) -> Self {
        Self {
            kind: TokenKind::Object,
            value: value.to_json().to_string(),
        }
    }

    /// Text used for this token when building a template key.
    fn key_text(&self) -> String {
        match self.kind {
            TokenKind::String | TokenKind::Function => self.value.clone(),
            TokenKind::Object => match serde_json::from_str(&self.value) {
                Ok(json) => Value::from_json(json).to_css_string(),
                Err(_) => self.value.clone(),
            },
        }
    }
}

/// Interpolation supplied when building an inject template.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolation {
    /// Literal text.
    Text(String),
    /// Data serialized to JSON.
    Data(Value),
    /// Function source.
    Function(String),
}

impl Interpolation {
    /// Serialize into a template token.
    fn into_token(self) -> Token {
        match self {
            Self::Text(text) => Token::string(text),
            Self::Data(value) => Token::object(&value),
            Self::Function(source) => Token::function(source),
        }
    }
}

/// A persisted style template plus its runtime styled-object pin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleTemplate {
    /// Node fields forwarded to the rendered element.
    #[serde(default)]
    pub(crate) props: Vec<String>,
    /// Serialized tokens, absent for an empty template.
    #[serde(default)]
    pub(crate) interpolated: Option<Vec<Token>>,
    /// Optional attrs function token.
    #[serde(default)]
    pub(crate) attrs_func: Option<Token>,
    /// Token assembly mode.
    #[serde(default)]
    pub(crate) source: Source,
    /// Decoded tokens, filled on first use.
    #[serde(skip)]
    decoded: OnceCell<Rc<[TemplateValue]>>,
    /// Styled object this template is currently pinned to.
    #[serde(skip)]
    pinned: Option<Rc<Styled>>,
}

impl PartialEq for StyleTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.props == other.props
            && self.interpolated == other.interpolated
            && self.attrs_func == other.attrs_func
            && self.source == other.source
    }
}

/// Split wrapper text into literal fragments and `${...}` function sources.
///
/// Slots are brace balanced, so function bodies may contain blocks. The
/// result always has one more fragment than functions.
pub fn parse_wrapper(text: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut fragments = vec![];
    let mut functions = vec![];
    let mut rest = text;
    let mut consumed = 0;
    while let Some(start) = rest.find("${") {
        fragments.push(rest[..start].to_string());
        let body_start = start + 2;
        let mut depth = 1usize;
        let mut end = None;
        for (i, c) in rest[body_start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            return Err(Error::Parse(ParseError::with_position(
                "unterminated ${ slot in style template",
                None,
                Some(consumed + start),
            )));
        };
        functions.push(rest[body_start..end].to_string());
        consumed += end + 1;
        rest = &rest[end + 1..];
    }
    fragments.push(rest.to_string());
    Ok((fragments, functions))
}

/// Build an inject template from ordered interpolations.
pub fn css_inject(
    props: impl IntoIterator<Item = impl Into<String>>,
    attrs: Option<&str>,
    parts: impl IntoIterator<Item = Interpolation>,
) -> StyleTemplate {
    StyleTemplate {
        props: props.into_iter().map(Into::into).collect(),
        interpolated: Some(parts.into_iter().map(Interpolation::into_token).collect()),
        attrs_func: attrs.map(Token::function),
        source: Source::Inject,
        ..StyleTemplate::default()
    }
}

/// Build a wrapper template from literal fragments and the functions spliced
/// between them.
pub fn css_wrapper(
    props: impl IntoIterator<Item = impl Into<String>>,
    attrs: Option<&str>,
    fragments: &[impl AsRef<str>],
    functions: &[impl AsRef<str>],
) -> StyleTemplate {
    let fragments = Value::Array(
        fragments
            .iter()
            .map(|f| Value::String(f.as_ref().to_string()))
            .collect(),
    );
    let mut tokens = vec![Token::object(&fragments)];
    tokens.extend(functions.iter().map(|f| Token::function(f.as_ref())));
    StyleTemplate {
        props: props.into_iter().map(Into::into).collect(),
        interpolated: Some(tokens),
        attrs_func: attrs.map(Token::function),
        source: Source::Wrapper,
        ..StyleTemplate::default()
    }
}

impl StyleTemplate {
    /// Parse `${...}` wrapper text into a wrapper template.
    pub fn parse(text: &str) -> Result<Self> {
        let (fragments, functions) = parse_wrapper(text)?;
        Ok(css_wrapper(
            Vec::<String>::new(),
            None,
            &fragments,
            &functions,
        ))
    }

    /// Builder: forward these node fields to the rendered element.
    pub fn with_props(mut self, props: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.props = props.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: attach an attrs function source.
    pub fn with_attrs(mut self, source: impl Into<String>) -> Self {
        self.attrs_func = Some(Token::function(source));
        self
    }

    /// Decode a template from its persisted value form.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.to_json())?)
    }

    /// Persisted value form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).map_or(Value::Null, Value::from_json)
    }

    /// Forwarded prop names.
    pub fn props(&self) -> &[String] {
        &self.props
    }

    /// Serialized tokens.
    pub fn interpolated(&self) -> Option<&[Token]> {
        self.interpolated.as_deref()
    }

    /// Attrs function token.
    pub fn attrs_func(&self) -> Option<&Token> {
        self.attrs_func.as_ref()
    }

    /// Token assembly mode.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Does the template carry no tokens?
    pub fn is_empty(&self) -> bool {
        self.interpolated.as_ref().is_none_or(Vec::is_empty)
    }

    /// Rebuild the template's source text. Wrapper templates interleave the
    /// fragments with `${function}` slots, so parsing the result yields the
    /// same fragments and functions.
    pub fn reconstruct_code(&self) -> Result<String> {
        let Some(tokens) = &self.interpolated else {
            return Ok(String::new());
        };
        match self.source {
            Source::Inject => Ok(tokens.iter().map(|t| t.value.as_str()).collect()),
            Source::Wrapper => {
                let Some((first, functions)) = tokens.split_first() else {
                    return Ok(String::new());
                };
                let fragments: Vec<String> =
                    serde_json::from_str(&first.value.replace('\n', "\\n"))?;
                let mut out = String::new();
                for (idx, fragment) in fragments.iter().enumerate() {
                    out.push_str(fragment);
                    if let Some(func) = functions.get(idx) {
                        out.push_str("${");
                        out.push_str(&func.value);
                        out.push('}');
                    }
                }
                Ok(out)
            }
        }
    }

    /// Reconstructed source with quotes and newlines escaped, as embedded in
    /// diagnostics.
    pub fn reconstruct_code_escaped(&self) -> Result<String> {
        Ok(self
            .reconstruct_code()?
            .replace('\'', "\\'")
            .replace('\n', "\\n"))
    }

    /// Key identifying the template's content within a plugin type.
    pub fn template_key(&self) -> String {
        self.interpolated
            .iter()
            .flatten()
            .map(Token::key_text)
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Replace the template with a single inject literal. Newlines are
    /// stored escaped; props and attrs are cleared and the pin is dropped.
    pub fn set_css(&mut self, text: &str) {
        *self = Self {
            interpolated: Some(vec![Token::string(text.replace('\n', "\\n"))]),
            source: Source::Inject,
            ..Self::default()
        };
    }

    /// Key of the styled object this template is pinned to.
    pub fn key(&self) -> Option<&str> {
        self.pinned.as_deref().map(Styled::key)
    }

    /// Styled object this template is pinned to.
    pub fn styled(&self) -> Option<Rc<Styled>> {
        self.pinned.clone()
    }

    /// Pin or unpin a styled object.
    pub fn set_styled(&mut self, styled: Option<Rc<Styled>>) {
        self.pinned = styled;
    }

    /// Clear the pin so the next style lookup rebuilds it.
    pub fn reset_key(&mut self) {
        self.pinned = None;
    }

    /// Decode tokens into template values, compiling function tokens once.
    pub(crate) fn decode(
        &self,
        scripts: &Rc<ScriptHost>,
        path: &str,
    ) -> Result<Option<Rc<[TemplateValue]>>> {
        let Some(tokens) = &self.interpolated else {
            return Ok(None);
        };
        if let Some(decoded) = self.decoded.get() {
            return Ok(Some(decoded.clone()));
        }
        let context = Rc::new(self.context(path));
        let values = tokens
            .iter()
            .map(|token| decode_token(token, scripts, &context))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(self.decoded.get_or_init(|| values.into()).clone()))
    }

    /// Decode the attrs function, failing if the token is not a function.
    pub(crate) fn decode_attrs(
        &self,
        scripts: &Rc<ScriptHost>,
        path: &str,
    ) -> Result<Option<StyleFn>> {
        let Some(token) = &self.attrs_func else {
            return Ok(None);
        };
        if token.kind != TokenKind::Function {
            return Err(Error::BadAttrs(token.value.clone()));
        }
        let context = Rc::new(self.context(path));
        StyleFn::compile(scripts, &token.value, context).map(Some)
    }

    /// Diagnostic context for functions decoded from this template.
    fn context(&self, path: &str) -> StyleContext {
        StyleContext {
            code: self.reconstruct_code_escaped().unwrap_or_default(),
            path: path.to_string(),
        }
    }
}

/// Decode one token.
fn decode_token(
    token: &Token,
    scripts: &Rc<ScriptHost>,
    context: &Rc<StyleContext>,
) -> Result<TemplateValue> {
    Ok(match token.kind {
        TokenKind::String => TemplateValue::Text(token.value.clone()),
        TokenKind::Object => {
            TemplateValue::Data(Value::from_json(serde_json::from_str(&token.value)?))
        }
        TokenKind::Function => {
            TemplateValue::Function(StyleFn::compile(scripts, &token.value, context.clone())?)
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_wrapper_balances_braces() -> Result<()> {
        let (fragments, functions) =
            parse_wrapper("color: ${|p| p.c}; margin: ${|p| { let m = 2; m }}px")?;
        assert_eq!(fragments, vec!["color: ", "; margin: ", "px"]);
        assert_eq!(functions, vec!["|p| p.c", "|p| { let m = 2; m }"]);
        Ok(())
    }

    #[test]
    fn parse_wrapper_rejects_unterminated() {
        let err = parse_wrapper("a ${|p| p.x").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn set_css_switches_to_inject() -> Result<()> {
        let mut t = StyleTemplate::parse("a: ${|p| p.a};")?.with_props(["a"]);
        t.set_css("color: red;");
        assert_eq!(t.source(), Source::Inject);
        assert!(t.props().is_empty());
        assert_eq!(t.attrs_func(), None);
        assert_eq!(t.reconstruct_code()?, "color: red;");

        t.set_css("a: 1;\nb: 2;");
        assert_eq!(t.interpolated().unwrap()[0].value, "a: 1;\\nb: 2;");
        Ok(())
    }

    #[test]
    fn escaped_reconstruction() -> Result<()> {
        let t = css_inject(
            Vec::<String>::new(),
            None,
            [Interpolation::Text("content: 'x';".into())],
        );
        assert_eq!(t.reconstruct_code_escaped()?, "content: \\'x\\';");
        Ok(())
    }

    #[test]
    fn template_key_joins_tokens() {
        let t = css_wrapper(Vec::<String>::new(), None, &["a", "b"], &["|p| p.x"]);
        assert_eq!(t.template_key(), "a,b-|p| p.x");
        assert_eq!(StyleTemplate::default().template_key(), "");
    }

    #[test]
    fn persisted_form() -> Result<()> {
        let t = StyleTemplate::parse("w: ${|p| p.w}px")?
            .with_props(["w"])
            .with_attrs("|p| #{}");
        let v = t.to_value();
        assert_eq!(v.get("source"), Some(&Value::String("wrapper".into())));
        let back = StyleTemplate::from_value(&v)?;
        assert_eq!(back, t);

        let legacy = serde_json::json!({
            "interpolated": [{"type": "string", "value": "x"}],
            "source": "cssInject"
        });
        let t = StyleTemplate::from_value(&Value::from_json(legacy))?;
        assert_eq!(t.source(), Source::Inject);
        Ok(())
    }

    /// Literal fragment text with no slot openings.
    fn fragment() -> impl Strategy<Value = String> {
        "[a-z :;{}$\n-]{0,12}".prop_filter("no slot openings", |s| {
            !s.contains("${")
        })
    }

    proptest! {
        #[test]
        fn wrapper_round_trip(
            parts in prop::collection::vec(("[a-z]{1,6}", fragment()), 0..5),
            head in fragment(),
        ) {
            let mut fragments = vec![head];
            let mut functions = vec![];
            for (name, frag) in parts {
                functions.push(format!("|p| p.{name}"));
                fragments.push(frag);
            }
            let template = css_wrapper(Vec::<String>::new(), None, &fragments, &functions);
            let text = template.reconstruct_code().unwrap();
            let (f2, fn2) = parse_wrapper(&text).unwrap();
            prop_assert_eq!(&f2, &fragments);
            prop_assert_eq!(&fn2, &functions);
            prop_assert_eq!(StyleTemplate::parse(&text).unwrap(), template);
        }
    }
}
