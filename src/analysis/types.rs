//! Type table and scope extraction.
//!
//! Walks the token stream of one file with a brace stack. Non-member type
//! definitions (at namespace scope) go into the type table; class-like and
//! function bodies spanning several lines become collapsible scopes.

use super::scanner::Token;
use std::collections::HashMap;

/// Namespace recorded for types declared outside any named namespace
pub const GLOBAL_NAMESPACE: &str = "Global Namespace";

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "return", "sizeof"];
const FUNCTION_SUFFIXES: &[&str] = &[")", "const", "override", "noexcept", "final", "mutable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
    Union,
    Typedef,
    Alias,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Union => "union",
            Self::Typedef => "typedef",
            Self::Alias => "alias",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "class" => Some(Self::Class),
            "struct" => Some(Self::Struct),
            "enum" => Some(Self::Enum),
            "union" => Some(Self::Union),
            _ => None,
        }
    }
}

/// A type definition and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub name: String,
    pub kind: TypeKind,
    pub namespace: String,
    pub file: String,
}

#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: TypeEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = TypeEntry>) {
        self.entries.extend(entries);
    }

    pub fn sort_by_file(&mut self) {
        self.entries
            .sort_by(|a, b| (&a.file, &a.name).cmp(&(&b.file, &b.name)));
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A multi-line body: first and last line, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope {
    pub start: usize,
    pub end: usize,
}

/// Collapsible scopes per file.
#[derive(Debug, Clone, Default)]
pub struct ScopeTable {
    scopes: HashMap<String, Vec<Scope>>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-line scopes are dropped.
    pub fn add(&mut self, file: &str, scope: Scope) {
        if scope.end > scope.start {
            self.scopes.entry(file.to_string()).or_default().push(scope);
        }
    }

    /// Scopes of `file`, ordered by start line (outer before inner).
    pub fn scopes_of(&self, file: &str) -> Vec<Scope> {
        let mut scopes = self.scopes.get(file).cloned().unwrap_or_default();
        scopes.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        scopes
    }
}

enum Frame {
    Namespace(Option<String>),
    Type,
    Function,
    Block,
}

struct PendingType {
    kind: TypeKind,
    name: Option<String>,
    line: usize,
    saw_colon: bool,
}

/// Types and scopes found in one file.
#[derive(Debug, Default)]
pub struct FileFacts {
    pub types: Vec<TypeEntry>,
    pub scopes: Vec<Scope>,
}

/// Extract type definitions and scopes from `tokens` of `file`.
pub fn extract(file: &str, tokens: &[Token]) -> FileFacts {
    let mut facts = FileFacts::default();
    let mut stack: Vec<(Frame, usize)> = Vec::new();
    let mut pending: Option<PendingType> = None;
    let mut pending_namespace: Option<Option<String>> = None;
    let mut pending_typedef: Option<usize> = None;
    let mut paren_depth = 0usize;
    let mut paren_owner: Option<(String, usize)> = None;
    let mut last_ident: Option<String> = None;

    let at_namespace_scope =
        |stack: &[(Frame, usize)]| stack.iter().all(|(f, _)| matches!(f, Frame::Namespace(_)));
    let current_namespace = |stack: &[(Frame, usize)]| {
        stack
            .iter()
            .rev()
            .find_map(|(f, _)| match f {
                Frame::Namespace(Some(n)) => Some(n.clone()),
                _ => None,
            })
            .unwrap_or_else(|| GLOBAL_NAMESPACE.to_string())
    };

    for (i, tok) in tokens.iter().enumerate() {
        let text = tok.text.as_str();
        let prev = i.checked_sub(1).map(|p| tokens[p].text.as_str());

        match text {
            "namespace" if paren_depth == 0 && prev != Some("using") => {
                pending_namespace = Some(None);
            }
            "class" | "struct" | "enum" | "union" if paren_depth == 0 => {
                // `enum class X` is one definition
                let continues_enum = prev == Some("enum") && pending.is_some();
                if !continues_enum {
                    if let Some(kind) = TypeKind::from_keyword(text) {
                        pending = Some(PendingType {
                            kind,
                            name: None,
                            line: tok.line,
                            saw_colon: false,
                        });
                    }
                }
            }
            "typedef" if paren_depth == 0 => pending_typedef = Some(stack.len()),
            "using" if paren_depth == 0 => {
                let name = tokens.get(i + 1).filter(|t| t.is_ident());
                let assigns = tokens.get(i + 2).is_some_and(|t| t.text == "=");
                if let (Some(name), true) = (name, assigns) {
                    if at_namespace_scope(&stack) {
                        facts.types.push(TypeEntry {
                            name: name.text.clone(),
                            kind: TypeKind::Alias,
                            namespace: current_namespace(&stack),
                            file: file.to_string(),
                        });
                    }
                }
            }
            "(" => {
                paren_depth += 1;
                if paren_depth == 1 {
                    paren_owner = prev
                        .filter(|_| tokens[i - 1].is_ident())
                        .map(|p| (p.to_string(), tokens[i - 1].line));
                }
                if pending.as_ref().is_some_and(|p| !p.saw_colon) {
                    pending = None;
                }
            }
            ")" => paren_depth = paren_depth.saturating_sub(1),
            "<" | ">" | "," => {
                if pending.as_ref().is_some_and(|p| !p.saw_colon) {
                    pending = None;
                }
            }
            ":" => {
                if let Some(p) = pending.as_mut().filter(|p| p.name.is_some()) {
                    p.saw_colon = true;
                }
            }
            "=" => {
                pending = None;
                pending_namespace = None;
            }
            ";" if paren_depth == 0 => {
                pending = None;
                pending_namespace = None;
                if pending_typedef == Some(stack.len()) {
                    pending_typedef = None;
                    if let Some(name) = last_ident.take() {
                        if at_namespace_scope(&stack) {
                            facts.types.push(TypeEntry {
                                name,
                                kind: TypeKind::Typedef,
                                namespace: current_namespace(&stack),
                                file: file.to_string(),
                            });
                        }
                    }
                }
            }
            "{" => {
                let frame = if let Some(name) = pending_namespace.take() {
                    (Frame::Namespace(name), tok.line)
                } else if let Some(p) = pending.take() {
                    if let Some(name) = p.name {
                        if at_namespace_scope(&stack) {
                            facts.types.push(TypeEntry {
                                name,
                                kind: p.kind,
                                namespace: current_namespace(&stack),
                                file: file.to_string(),
                            });
                        }
                    }
                    (Frame::Type, p.line)
                } else if is_function_body(prev, paren_owner.as_ref(), &stack) {
                    let line = paren_owner.as_ref().map_or(tok.line, |(_, l)| *l);
                    (Frame::Function, line)
                } else {
                    (Frame::Block, tok.line)
                };
                paren_owner = None;
                stack.push(frame);
            }
            "}" => {
                if let Some((frame, start)) = stack.pop() {
                    if matches!(frame, Frame::Type | Frame::Function) {
                        facts.scopes.push(Scope {
                            start,
                            end: tok.line,
                        });
                    }
                }
            }
            _ if tok.is_ident() => {
                if let Some(ns) = pending_namespace.as_mut() {
                    if ns.is_none() {
                        *ns = Some(tok.text.clone());
                    }
                }
                if let Some(p) = pending.as_mut() {
                    if p.name.is_none() && !matches!(text, "final" | "alignas") {
                        p.name = Some(tok.text.clone());
                    }
                }
            }
            _ => {}
        }

        if tok.is_ident() {
            last_ident = Some(tok.text.clone());
        }
    }

    facts
}

fn is_function_body(
    prev: Option<&str>,
    owner: Option<&(String, usize)>,
    stack: &[(Frame, usize)],
) -> bool {
    let in_declaration_scope = stack
        .last()
        .map_or(true, |(f, _)| matches!(f, Frame::Namespace(_) | Frame::Type));
    let after_signature = prev.is_some_and(|p| FUNCTION_SUFFIXES.contains(&p));
    let owned = owner.is_some_and(|(name, _)| !CONTROL_KEYWORDS.contains(&name.as_str()));
    in_declaration_scope && after_signature && owned
}
