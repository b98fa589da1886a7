//! C/C++ token scanner.
//!
//! Comments, string and character literals, and preprocessor lines are
//! blanked out before tokenizing, so nothing inside them can look like a
//! type reference. Line numbers are 1-based and survive the blanking.

use crate::error::{PublishError, Result};
use regex::Regex;

/// One token with the line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: usize,
}

impl Token {
    pub fn is_ident(&self) -> bool {
        self.text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    token_re: Regex,
}

impl Scanner {
    pub fn new() -> Result<Self> {
        let token_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9][A-Za-z0-9_.]*|::|->|\S").map_err(
            |e| PublishError::Analysis {
                message: format!("token pattern: {}", e),
            },
        )?;
        Ok(Self { token_re })
    }

    pub fn tokenize(&self, source: &str) -> Vec<Token> {
        let code = strip_non_code(source);
        let mut tokens = Vec::new();
        for (idx, line) in code.lines().enumerate() {
            for m in self.token_re.find_iter(line) {
                tokens.push(Token {
                    text: m.as_str().to_string(),
                    line: idx + 1,
                });
            }
        }
        tokens
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
    Preprocessor,
}

/// Replace comments, literals and preprocessor lines with spaces, keeping
/// every newline where it was.
pub fn strip_non_code(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut at_line_start = true;
    let mut continued = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            out.push('\n');
            match state {
                State::LineComment => state = State::Code,
                State::Preprocessor if !continued => state = State::Code,
                // unterminated literal: recover at end of line
                State::Str | State::Char => state = State::Code,
                _ => {}
            }
            at_line_start = true;
            continue;
        }

        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' => {
                    out.push(' ');
                    state = State::Str;
                }
                '\'' => {
                    out.push(' ');
                    state = State::Char;
                }
                '#' if at_line_start => {
                    out.push(' ');
                    state = State::Preprocessor;
                }
                _ => out.push(c),
            },
            State::LineComment => out.push(' '),
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::Str | State::Char => {
                let quote = if state == State::Str { '"' } else { '\'' };
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(' ');
                        out.push(if next == '\n' { '\n' } else { ' ' });
                        continue;
                    }
                } else if c == quote {
                    state = State::Code;
                }
                out.push(' ');
            }
            State::Preprocessor => {
                if !c.is_whitespace() {
                    continued = c == '\\';
                }
                out.push(' ');
            }
        }

        if !c.is_whitespace() {
            at_line_start = false;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        Scanner::new()
            .unwrap()
            .tokenize(source)
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_comments_and_literals_skipped() {
        let src = "int a; // Widget\n/* Gadget\n more */ char* s = \"Gizmo\"; char c = 'x';\n";
        let toks = texts(src);
        assert!(toks.contains(&"a".to_string()));
        assert!(!toks.contains(&"Widget".to_string()));
        assert!(!toks.contains(&"Gadget".to_string()));
        assert!(!toks.contains(&"Gizmo".to_string()));
        assert!(!toks.contains(&"x".to_string()));
    }

    #[test]
    fn test_preprocessor_lines_skipped() {
        let toks = texts("#include <vector>\n#define MAX \\\n  Widget\nint main() {}\n");
        assert!(!toks.contains(&"vector".to_string()));
        assert!(!toks.contains(&"Widget".to_string()));
        assert!(toks.contains(&"main".to_string()));
    }

    #[test]
    fn test_line_numbers_preserved() {
        let scanner = Scanner::new().unwrap();
        let tokens = scanner.tokenize("/* one\n two */\nclass A\n{\n};\n");
        let class = tokens.iter().find(|t| t.text == "class").unwrap();
        assert_eq!(class.line, 3);
        let close = tokens.iter().find(|t| t.text == "}").unwrap();
        assert_eq!(close.line, 5);
    }

    #[test]
    fn test_scope_operator_is_one_token() {
        assert_eq!(texts("std::string"), vec!["std", "::", "string"]);
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let toks = texts("auto s = \"a\\\"Widget\"; int b;");
        assert!(!toks.contains(&"Widget".to_string()));
        assert!(toks.contains(&"b".to_string()));
    }
}
