//! Minimal reader for the KeyValues text format used by guest state files.
//!
//! Supports quoted and bare strings, nested `{ }` sections, `\` escapes
//! inside quotes and `//` line comments. Conditional suffixes like
//! `[$WIN32]` are not supported.

use crate::appstate::error::{AppStateError, AppStateResult};

/// Deepest section nesting accepted in a document
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    Str(String),
    Section(KvSection),
}

/// Ordered key/value pairs; lookups ignore ASCII case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvSection {
    entries: Vec<(String, KvValue)>,
}

impl KvSection {
    /// Parse a whole document into its top-level section
    pub fn parse(text: &str) -> AppStateResult<Self> {
        let tokens = tokenize(text)?;
        let mut cursor = 0;
        let section = parse_entries(&tokens, &mut cursor, 0)?;
        Ok(section)
    }

    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            KvValue::Str(s) => Some(s),
            KvValue::Section(_) => None,
        }
    }

    pub fn get_section(&self, key: &str) -> Option<&KvSection> {
        match self.get(key)? {
            KvValue::Section(s) => Some(s),
            KvValue::Str(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Str(String),
    Open,
    Close,
}

fn tokenize(text: &str) -> AppStateResult<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '{' => tokens.push((Token::Open, line)),
            '}' => tokens.push((Token::Close, line)),
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                let start = line;
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(other),
                            None => break,
                        },
                        Some('\n') => {
                            line += 1;
                            value.push('\n');
                        }
                        Some(other) => value.push(other),
                        None => {
                            return Err(AppStateError::Parse {
                                line: start,
                                reason: "unterminated string".to_string(),
                            })
                        }
                    }
                }
                tokens.push((Token::Str(value), start));
            }
            first => {
                let mut value = String::from(first);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | '"') {
                        break;
                    }
                    value.push(next);
                    chars.next();
                }
                tokens.push((Token::Str(value), line));
            }
        }
    }

    Ok(tokens)
}

fn parse_entries(
    tokens: &[(Token, usize)],
    cursor: &mut usize,
    depth: usize,
) -> AppStateResult<KvSection> {
    let nested = depth > 0;
    let mut section = KvSection::default();

    loop {
        let Some((token, line)) = tokens.get(*cursor) else {
            if nested {
                let line = tokens.last().map(|(_, l)| *l).unwrap_or(1);
                return Err(AppStateError::Parse {
                    line,
                    reason: "unclosed section".to_string(),
                });
            }
            return Ok(section);
        };
        *cursor += 1;

        let key = match token {
            Token::Str(key) => key.clone(),
            Token::Close if nested => return Ok(section),
            Token::Close => {
                return Err(AppStateError::Parse {
                    line: *line,
                    reason: "unexpected '}'".to_string(),
                })
            }
            Token::Open => {
                return Err(AppStateError::Parse {
                    line: *line,
                    reason: "section without a key".to_string(),
                })
            }
        };

        let value = match tokens.get(*cursor) {
            Some((Token::Str(value), _)) => {
                *cursor += 1;
                KvValue::Str(value.clone())
            }
            Some((Token::Open, l)) => {
                if depth >= MAX_DEPTH {
                    return Err(AppStateError::Parse {
                        line: *l,
                        reason: "nesting too deep".to_string(),
                    });
                }
                *cursor += 1;
                KvValue::Section(parse_entries(tokens, cursor, depth + 1)?)
            }
            Some((Token::Close, l)) => {
                return Err(AppStateError::Parse {
                    line: *l,
                    reason: format!("key {:?} has no value", key),
                })
            }
            None => {
                return Err(AppStateError::Parse {
                    line: *line,
                    reason: format!("key {:?} has no value", key),
                })
            }
        };

        section.entries.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sections() {
        let doc = r#"
            "AppState"
            {
                "appid"     "228980"
                // guest-written comment
                "UserConfig"
                {
                    "language"  "english"
                }
                bare_key    bare_value
            }
        "#;
        let root = KvSection::parse(doc).unwrap();
        let app = root.get_section("appstate").unwrap();

        assert_eq!(app.get_str("AppID"), Some("228980"));
        assert_eq!(
            app.get_section("userconfig").unwrap().get_str("language"),
            Some("english")
        );
        assert_eq!(app.get_str("bare_key"), Some("bare_value"));
        assert_eq!(app.len(), 3);
    }

    #[test]
    fn test_escapes() {
        let root = KvSection::parse(r#""path" "C:\\Games\\\"Quoted\"""#).unwrap();
        assert_eq!(root.get_str("path"), Some(r#"C:\Games\"Quoted""#));
    }

    #[test]
    fn test_structural_errors() {
        let unclosed = KvSection::parse("\"a\"\n{\n\"b\" \"c\"\n");
        assert!(matches!(unclosed, Err(AppStateError::Parse { .. })));

        let stray = KvSection::parse("\"a\" \"b\"\n}");
        assert!(matches!(stray, Err(AppStateError::Parse { line: 2, .. })));

        let dangling = KvSection::parse("\"a\"");
        assert!(matches!(dangling, Err(AppStateError::Parse { .. })));

        let unterminated = KvSection::parse("\"a\" \"b");
        assert!(matches!(unterminated, Err(AppStateError::Parse { line: 1, .. })));
    }

    fn nested_doc(depth: usize) -> String {
        format!("{}\"leaf\" \"1\"{}", "\"a\" {".repeat(depth), "}".repeat(depth))
    }

    #[test]
    fn test_nesting_limit() {
        assert!(KvSection::parse(&nested_doc(MAX_DEPTH)).is_ok());

        let too_deep = KvSection::parse(&nested_doc(MAX_DEPTH + 1));
        assert!(matches!(
            too_deep,
            Err(AppStateError::Parse { ref reason, .. }) if reason == "nesting too deep"
        ));

        // Unterminated and far deeper than the limit: rejected, not a stack overflow
        let hostile = KvSection::parse(&"\"a\" {".repeat(200_000));
        assert!(matches!(hostile, Err(AppStateError::Parse { .. })));
    }

    #[test]
    fn test_empty_document() {
        assert!(KvSection::parse("  // nothing here\n").unwrap().is_empty());
    }
}
