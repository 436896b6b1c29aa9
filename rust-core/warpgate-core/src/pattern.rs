//! # Path Patterns
//!
//! Compiles route templates such as `/blog/:id` or `/:id-:pid/edit` into
//! matchers.
//!
//! ## Template Syntax
//!
//! - `:name` declares a placeholder (`name` is `[A-Za-z_][A-Za-z0-9_]*`)
//! - A placeholder captures one or more non-`/` characters up to the next literal
//! - Every other character is a case-sensitive literal
//! - Two placeholders must be separated by at least one literal character
//!
//! Templates without placeholders are static and compare by string equality.

use crate::error::{Error, Result};
use regex::Regex;

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Param(String),
}

/// Compiled route template
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// No placeholders, exact string match
    Static(String),
    /// At least one placeholder
    Dynamic {
        /// Source template
        template: String,
        /// Placeholder names in declaration order
        names: Vec<String>,
        /// Anchored regex with one group per placeholder
        regex: Regex,
    },
}

impl PathPattern {
    /// Compile a route template
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if two placeholders are adjacent or the
    /// generated expression fails to compile.
    pub fn compile(template: &str) -> Result<Self> {
        let parts = parse_template(template);

        let mut names = Vec::new();
        let mut expr = String::with_capacity(template.len() + 16);
        expr.push('^');
        let mut previous_was_param = false;
        for part in &parts {
            match part {
                Part::Literal(text) => {
                    expr.push_str(&regex::escape(text));
                    previous_was_param = false;
                }
                Part::Param(name) => {
                    if previous_was_param {
                        return Err(Error::Config(format!(
                            "route '{template}': placeholder ':{name}' directly follows another placeholder"
                        )));
                    }
                    names.push(name.clone());
                    expr.push_str("([^/]+)");
                    previous_was_param = true;
                }
            }
        }
        expr.push('$');

        if names.is_empty() {
            return Ok(Self::Static(template.to_string()));
        }

        let regex = Regex::new(&expr).map_err(|e| {
            Error::Config(format!("route '{template}': cannot compile pattern: {e}"))
        })?;

        Ok(Self::Dynamic {
            template: template.to_string(),
            names,
            regex,
        })
    }

    /// Whether the template has no placeholders
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// Source template
    #[must_use]
    pub fn template(&self) -> &str {
        match self {
            Self::Static(path) => path,
            Self::Dynamic { template, .. } => template,
        }
    }

    /// Placeholder names in declaration order
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Static(_) => &[],
            Self::Dynamic { names, .. } => names,
        }
    }

    /// Match a request path
    ///
    /// Returns the captured values in placeholder order, or `None` when the
    /// path does not match. A static pattern returns an empty capture list.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        match self {
            Self::Static(expected) => (expected == path).then(Vec::new),
            Self::Dynamic { regex, .. } => {
                let caps = regex.captures(path)?;
                Some(
                    caps.iter()
                        .skip(1)
                        .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect(),
                )
            }
        }
    }
}

/// Split a template into literal and placeholder parts
fn parse_template(template: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        let starts_name = c == ':'
            && chars
                .peek()
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
        if !starts_name {
            literal.push(c);
            continue;
        }

        let mut name = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Part::Param(name));
    }

    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_template() {
        let p = PathPattern::compile("/path/to").unwrap();
        assert!(p.is_static());
        assert_eq!(p.matches("/path/to"), Some(vec![]));
        assert_eq!(p.matches("/path/to/"), None);
        assert_eq!(p.matches("/Path/to"), None);
    }

    #[test]
    fn test_single_placeholder() {
        let p = PathPattern::compile("/path/to/:file").unwrap();
        assert!(!p.is_static());
        assert_eq!(p.names(), ["file".to_string()]);
        assert_eq!(p.matches("/path/to/a.txt"), Some(vec!["a.txt".to_string()]));
        assert_eq!(p.matches("/path/to/"), None);
        assert_eq!(p.matches("/path/to/a/b"), None);
    }

    #[test]
    fn test_multiple_segments() {
        let p = PathPattern::compile("/:user/:comments/list").unwrap();
        assert_eq!(
            p.matches("/michael/1234/list"),
            Some(vec!["michael".to_string(), "1234".to_string()])
        );
        assert_eq!(p.matches("/michael/1234/lists"), None);
    }

    #[test]
    fn test_placeholders_split_by_non_slash_literal() {
        let p = PathPattern::compile(":id-:pid/:w").unwrap();
        assert_eq!(
            p.matches("12-34/x"),
            Some(vec!["12".to_string(), "34".to_string(), "x".to_string()])
        );
        assert_eq!(p.matches("1234/x"), None);
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let p = PathPattern::compile("/files/:name.txt").unwrap();
        assert_eq!(p.matches("/files/readme.txt"), Some(vec!["readme".to_string()]));
        assert_eq!(p.matches("/files/readmeXtxt"), None);
    }

    #[test]
    fn test_colon_without_name_is_literal() {
        let p = PathPattern::compile("/time/12:30").unwrap();
        assert!(p.is_static());

        let p = PathPattern::compile("/a/:1").unwrap();
        assert!(p.is_static());
        assert!(p.matches("/a/:1").is_some());
    }

    #[test]
    fn test_adjacent_placeholders_rejected() {
        let err = PathPattern::compile("/:a:b").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_substitution_round_trip() {
        let p = PathPattern::compile("/blog/:year/:slug-:rev/view").unwrap();
        let values = ["2014", "hello_world", "7"];
        let path = format!("/blog/{}/{}-{}/view", values[0], values[1], values[2]);
        let expected: Vec<String> = values.iter().map(|s| (*s).to_string()).collect();
        assert_eq!(p.matches(&path), Some(expected));
    }

    #[test]
    fn test_substitution_round_trip_generated() {
        const PIECES: &[&str] = &[
            "a", "Z", "0", "_", "-", ".", "~", "%20", "+", "(", ")", "*", "$", "?", ":", "é",
        ];
        const LITERALS: &[&str] = &["blog", "api", "v1.0", "a+b", "x(y)", "[id]"];

        let mut seed: usize = 0x9E37_79B9;
        let mut next = move |bound: usize| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for _ in 0..500 {
            let segments = 1 + next(5);
            let mut template = Vec::new();
            let mut path = Vec::new();
            let mut values = Vec::new();

            for i in 0..segments {
                let is_param = next(2) == 0 || (i == segments - 1 && values.is_empty());
                if !is_param {
                    let literal = LITERALS[next(LITERALS.len())];
                    template.push(literal.to_string());
                    path.push(literal.to_string());
                    continue;
                }
                let value: String = (0..=next(6)).map(|_| PIECES[next(PIECES.len())]).collect();
                let suffix = if next(4) == 0 { ".json" } else { "" };
                template.push(format!(":p{i}{suffix}"));
                path.push(format!("{value}{suffix}"));
                values.push(value);
            }

            let template = format!("/{}", template.join("/"));
            let path = format!("/{}", path.join("/"));
            let pattern = PathPattern::compile(&template).unwrap();
            assert!(!pattern.is_static(), "{template}");
            assert_eq!(pattern.matches(&path), Some(values), "{template} vs {path}");
        }
    }
}
