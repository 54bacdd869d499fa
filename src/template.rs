//! Step command templates: `{name}` placeholder substitution
//!
//! A minimal template language: one substitution pass over named
//! placeholders, no expressions, no nesting, no evaluation. `{{` and `}}`
//! escape literal braces (shell one-liners with awk need them). A `{...}`
//! group that is not a well-formed identifier is left as literal text.
//!
//! Templates are tokenized once and cached; tokens store ranges into the
//! original string so resolution is a single allocation-light pass.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;

/// Token representing a parsed template fragment
#[derive(Debug, Clone)]
enum Token {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// `{name}` placeholder
    Placeholder(String),
}

/// Result of rendering a template against bound parameters
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    /// Placeholders with no bound value, in order of first appearance
    pub unresolved: Vec<String>,
}

/// Template renderer with a concurrent tokenization cache
pub struct TemplateEngine {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    fn tokenize(&self, template: &str) -> Arc<Vec<Token>> {
        if let Some(cached) = self.cache.get(template) {
            return Arc::clone(&cached);
        }
        let tokens = Arc::new(tokenize(template));
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// Substitute bound parameters into the template. Unresolved placeholders
    /// are kept verbatim in the output and reported alongside it.
    pub fn render(&self, template: &str, params: &HashMap<String, String>) -> Rendered {
        let tokens = self.tokenize(template);
        let mut text = String::with_capacity(template.len() * 2);
        let mut unresolved = Vec::new();

        for token in tokens.iter() {
            match token {
                Token::Literal(range) => text.push_str(&template[range.clone()]),
                Token::Placeholder(name) => match params.get(name) {
                    Some(value) => text.push_str(value),
                    None => {
                        if !unresolved.contains(name) {
                            unresolved.push(name.clone());
                        }
                        text.push('{');
                        text.push_str(name);
                        text.push('}');
                    }
                },
            }
        }

        Rendered { text, unresolved }
    }
}

/// Collect the placeholder names a template references (for load-time
/// validation; uncached one-off pass).
pub fn placeholders(template: &str) -> BTreeSet<String> {
    tokenize(template)
        .into_iter()
        .filter_map(|token| match token {
            Token::Placeholder(name) => Some(name),
            Token::Literal(_) => None,
        })
        .collect()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(template: &str) -> Vec<Token> {
    let bytes = template.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    let flush = |tokens: &mut Vec<Token>, from: usize, to: usize| {
        if to > from {
            tokens.push(Token::Literal(from..to));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                // Escaped brace: emit the first '{' as literal, skip both
                flush(&mut tokens, literal_start, i + 1);
                i += 2;
                literal_start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                flush(&mut tokens, literal_start, i + 1);
                i += 2;
                literal_start = i;
            }
            b'{' => {
                // Candidate placeholder: identifier chars then '}'
                let name_start = i + 1;
                let mut j = name_start;
                while j < bytes.len() && is_ident_char(bytes[j] as char) {
                    j += 1;
                }
                if j > name_start && bytes.get(j) == Some(&b'}') {
                    flush(&mut tokens, literal_start, i);
                    tokens.push(Token::Placeholder(template[name_start..j].to_string()));
                    i = j + 1;
                    literal_start = i;
                } else {
                    // Not a placeholder (empty or non-identifier); literal
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flush(&mut tokens, literal_start, bytes.len());
    tokens
}
