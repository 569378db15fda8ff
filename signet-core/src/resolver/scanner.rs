//! Static import extraction from Python source text
//!
//! A small tokenizer that understands strings (including prefixed and
//! triple-quoted forms), comments, bracket nesting and backslash
//! continuations. Statements are then searched for `import` and `from`
//! forms anywhere they can legally appear, which includes function bodies,
//! `try`/`if` blocks and one-line compound statements such as
//! `try: import x`. Calls to `__import__("x")` and
//! `importlib.import_module("x")` with a literal argument are reported too.

use std::fmt;

/// How an import was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b`
    Import,
    /// `from a import b`
    From,
    /// `__import__("a")` or `import_module("a")`
    Dynamic,
}

/// One imported module reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Dotted module name as written (may be empty for `from . import x`)
    pub module: String,
    /// Number of leading dots of a relative import
    pub level: usize,
    /// Names imported by a `from` import (`*` included verbatim)
    pub names: Vec<String>,
    pub kind: ImportKind,
    /// 1-based source line
    pub line: usize,
}

/// Source text that cannot be tokenized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScanError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Name(String),
    Str(String),
    Op(char),
    Other,
    Newline,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

/// Extract every import reference from `source`
pub fn scan_imports(source: &str) -> Result<Vec<ImportRef>, ScanError> {
    let tokens = tokenize(source)?;
    let mut imports = Vec::new();

    for statement in tokens.split(|t| matches!(t.tok, Tok::Newline | Tok::Op(';'))) {
        scan_statement(statement, &mut imports);
    }

    Ok(imports)
}

fn tokenize(source: &str) -> Result<Vec<Token>, ScanError> {
    let chars: Vec<char> = source.trim_start_matches('\u{feff}').chars().collect();
    let n = chars.len();
    let mut tokens = Vec::new();
    let mut open_brackets: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < n {
        let c = chars[i];
        match c {
            '\n' => {
                if open_brackets.is_empty() {
                    tokens.push(Token { tok: Tok::Newline, line });
                }
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' | '\x0c' => i += 1,
            '\\' => {
                // line continuation
                if chars.get(i + 1) == Some(&'\n') {
                    line += 1;
                    i += 2;
                } else if chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n') {
                    line += 1;
                    i += 3;
                } else {
                    i += 1;
                }
            }
            '#' => {
                while i < n && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (tok, next, lines) = read_string(&chars, i, "", line)?;
                tokens.push(Token { tok, line });
                line += lines;
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < n && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_prefix = word.len() <= 2 && word.chars().all(|p| "rRbBuUfF".contains(p));
                if is_prefix && i < n && (chars[i] == '\'' || chars[i] == '"') {
                    let (tok, next, lines) = read_string(&chars, i, &word, line)?;
                    tokens.push(Token { tok, line });
                    line += lines;
                    i = next;
                } else {
                    tokens.push(Token { tok: Tok::Name(word), line });
                }
            }
            c if c.is_ascii_digit() => {
                while i < n && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token { tok: Tok::Other, line });
            }
            '(' | '[' | '{' => {
                open_brackets.push((c, line));
                tokens.push(Token { tok: Tok::Op(c), line });
                i += 1;
            }
            ')' | ']' | '}' => {
                if open_brackets.pop().is_none() {
                    return Err(ScanError {
                        line,
                        message: format!("unmatched '{c}'"),
                    });
                }
                tokens.push(Token { tok: Tok::Op(c), line });
                i += 1;
            }
            _ => {
                tokens.push(Token { tok: Tok::Op(c), line });
                i += 1;
            }
        }
    }

    if let Some((bracket, opened)) = open_brackets.last() {
        return Err(ScanError {
            line: *opened,
            message: format!("'{bracket}' was never closed"),
        });
    }

    tokens.push(Token { tok: Tok::Newline, line });
    Ok(tokens)
}

/// Read a string literal starting at the quote `chars[start]`
///
/// Returns the token, the index after the literal and the number of newlines
/// consumed.
fn read_string(
    chars: &[char],
    start: usize,
    prefix: &str,
    line: usize,
) -> Result<(Tok, usize, usize), ScanError> {
    let n = chars.len();
    let quote = chars[start];
    let triple = start + 2 < n && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut content = String::new();
    let mut newlines = 0;
    let mut i = if triple { start + 3 } else { start + 1 };

    loop {
        if i >= n {
            let message = if triple {
                "unterminated triple-quoted string literal"
            } else {
                "unterminated string literal"
            };
            return Err(ScanError {
                line,
                message: message.to_string(),
            });
        }

        let c = chars[i];
        if c == '\\' {
            content.push(c);
            if let Some(&escaped) = chars.get(i + 1) {
                content.push(escaped);
                if escaped == '\n' {
                    newlines += 1;
                }
            }
            i += 2;
            continue;
        }

        if triple {
            if c == quote && i + 2 < n && chars[i + 1] == quote && chars[i + 2] == quote {
                i += 3;
                break;
            }
            if c == '\n' {
                newlines += 1;
            }
        } else {
            if c == '\n' {
                return Err(ScanError {
                    line,
                    message: "unterminated string literal".to_string(),
                });
            }
            if c == quote {
                i += 1;
                break;
            }
        }

        content.push(c);
        i += 1;
    }

    // f-strings and bytes can never name a module
    let literal = !prefix.chars().any(|p| matches!(p, 'f' | 'F' | 'b' | 'B'));
    let tok = if literal { Tok::Str(content) } else { Tok::Other };
    Ok((tok, i, newlines))
}

fn scan_statement(tokens: &[Token], imports: &mut Vec<ImportRef>) {
    for (i, token) in tokens.iter().enumerate() {
        let at_statement_start = i == 0 || tokens[i - 1].tok == Tok::Op(':');

        match &token.tok {
            Tok::Name(word) if word == "import" && at_statement_start => {
                parse_import(&tokens[i + 1..], token.line, imports);
            }
            Tok::Name(word) if word == "from" && at_statement_start => {
                if let Some(import) = parse_from(&tokens[i + 1..], token.line) {
                    imports.push(import);
                }
            }
            Tok::Name(word) if word == "__import__" || word == "import_module" => {
                if let Some(module) = literal_call_argument(&tokens[i + 1..]) {
                    imports.push(ImportRef {
                        module,
                        level: 0,
                        names: Vec::new(),
                        kind: ImportKind::Dynamic,
                        line: token.line,
                    });
                }
            }
            _ => {}
        }
    }
}

/// `import a.b [as c], d`
fn parse_import(tokens: &[Token], line: usize, imports: &mut Vec<ImportRef>) {
    let mut pos = 0;
    loop {
        let (module, next) = read_dotted(tokens, pos);
        if module.is_empty() {
            return;
        }
        imports.push(ImportRef {
            module,
            level: 0,
            names: Vec::new(),
            kind: ImportKind::Import,
            line,
        });
        pos = skip_alias(tokens, next);

        match tokens.get(pos).map(|t| &t.tok) {
            Some(Tok::Op(',')) => pos += 1,
            _ => return,
        }
    }
}

/// `from [.]*[a.b] import (x [as y], ...) | *`
fn parse_from(tokens: &[Token], line: usize) -> Option<ImportRef> {
    let mut pos = 0;
    let mut level = 0;
    while let Some(Tok::Op('.')) = tokens.get(pos).map(|t| &t.tok) {
        level += 1;
        pos += 1;
    }

    let (module, next) = read_dotted(tokens, pos);
    pos = next;
    if module.is_empty() && level == 0 {
        return None;
    }

    match tokens.get(pos).map(|t| &t.tok) {
        Some(Tok::Name(word)) if word == "import" => pos += 1,
        _ => return None,
    }

    let mut names = Vec::new();
    if let Some(Tok::Op('(')) = tokens.get(pos).map(|t| &t.tok) {
        pos += 1;
    }
    while let Some(token) = tokens.get(pos) {
        match &token.tok {
            Tok::Op('*') => {
                names.push("*".to_string());
                pos += 1;
            }
            Tok::Name(name) => {
                names.push(name.clone());
                pos = skip_alias(tokens, pos + 1);
            }
            _ => break,
        }
        match tokens.get(pos).map(|t| &t.tok) {
            Some(Tok::Op(',')) => pos += 1,
            _ => break,
        }
    }

    Some(ImportRef {
        module,
        level,
        names,
        kind: ImportKind::From,
        line,
    })
}

/// Read `name(.name)*` starting at `pos`; keywords end the name
fn read_dotted(tokens: &[Token], mut pos: usize) -> (String, usize) {
    let mut dotted = String::new();
    loop {
        match tokens.get(pos).map(|t| &t.tok) {
            Some(Tok::Name(name)) if name != "import" && name != "as" => {
                dotted.push_str(name);
                pos += 1;
            }
            _ => break,
        }
        match (tokens.get(pos).map(|t| &t.tok), tokens.get(pos + 1).map(|t| &t.tok)) {
            (Some(Tok::Op('.')), Some(Tok::Name(_))) => {
                dotted.push('.');
                pos += 1;
            }
            _ => break,
        }
    }
    (dotted, pos)
}

fn skip_alias(tokens: &[Token], pos: usize) -> usize {
    match (tokens.get(pos).map(|t| &t.tok), tokens.get(pos + 1).map(|t| &t.tok)) {
        (Some(Tok::Name(word)), Some(Tok::Name(_))) if word == "as" => pos + 2,
        _ => pos,
    }
}

/// `("literal")` or `("literal", ...)`; relative names are skipped
fn literal_call_argument(tokens: &[Token]) -> Option<String> {
    let open = tokens.first().map(|t| &t.tok);
    let arg = tokens.get(1).map(|t| &t.tok);
    let close = tokens.get(2).map(|t| &t.tok);

    match (open, arg, close) {
        (Some(Tok::Op('(')), Some(Tok::Str(name)), Some(Tok::Op(')')) | Some(Tok::Op(',')))
            if !name.is_empty() && !name.starts_with('.') && is_dotted_identifier(name) =>
        {
            Some(name.clone())
        }
        _ => None,
    }
}

fn is_dotted_identifier(name: &str) -> bool {
    name.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn modules(source: &str) -> Vec<(String, usize)> {
        scan_imports(source)
            .unwrap()
            .into_iter()
            .map(|i| (i.module, i.level))
            .collect()
    }

    #[test]
    fn test_plain_imports() {
        let found = modules("import os\nimport os.path as p, sys\n");
        assert_eq!(
            found,
            vec![("os".into(), 0), ("os.path".into(), 0), ("sys".into(), 0)]
        );
    }

    #[test]
    fn test_from_imports() {
        let imports = scan_imports("from world import greet, wave as w\nfrom pkg.sub import *\n").unwrap();
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].module, "world");
        assert_eq!(imports[0].names, vec!["greet", "wave"]);
        assert_eq!(imports[0].kind, ImportKind::From);
        assert_eq!(imports[1].module, "pkg.sub");
        assert_eq!(imports[1].names, vec!["*"]);
    }

    #[test]
    fn test_parenthesized_multiline_from() {
        let source = "from world import (\n    greet,\n    wave as w,  # trailing\n)\nimport sys\n";
        let imports = scan_imports(source).unwrap();
        assert_eq!(imports[0].names, vec!["greet", "wave"]);
        assert_eq!(imports[1].module, "sys");
        assert_eq!(imports[1].line, 5);
    }

    #[test]
    fn test_relative_imports() {
        let imports = scan_imports("from . import sibling\nfrom ..parent.mod import x\nfrom ... import y\n").unwrap();
        assert_eq!((imports[0].module.as_str(), imports[0].level), ("", 1));
        assert_eq!(imports[0].names, vec!["sibling"]);
        assert_eq!((imports[1].module.as_str(), imports[1].level), ("parent.mod", 2));
        assert_eq!((imports[2].module.as_str(), imports[2].level), ("", 3));
    }

    #[test]
    fn test_conditional_and_lazy_imports() {
        let source = r#"
try: import ujson as json
except ImportError: import json

if TYPE_CHECKING:
    from typing_extensions import Self

def later():
    import csv
    return csv
"#;
        let found: Vec<String> = modules(source).into_iter().map(|(m, _)| m).collect();
        assert_eq!(found, vec!["ujson", "json", "typing_extensions", "csv"]);
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let source = r#"
# import commented
text = "import not_a_module"
doc = """
import also_not
from nowhere import nothing
"""
raw = r'\'import quoted\''
import real; x = 1; import other
"#;
        let found: Vec<String> = modules(source).into_iter().map(|(m, _)| m).collect();
        assert_eq!(found, vec!["real", "other"]);
    }

    #[test]
    fn test_other_uses_of_from_keyword() {
        let source = "def g():\n    yield from gen()\n    raise ValueError('x') from None\n";
        assert!(modules(source).is_empty());
    }

    #[test]
    fn test_backslash_continuation() {
        let found = modules("import os, \\\n    sys\n");
        assert_eq!(found, vec![("os".into(), 0), ("sys".into(), 0)]);
    }

    #[test]
    fn test_dynamic_imports() {
        let source = r#"
import importlib
plugin = importlib.import_module("plugins.csv_out")
legacy = __import__('legacy_mod', fromlist=['x'])
skipped = importlib.import_module(name)
relative = importlib.import_module(".local", package="pkg")
formatted = __import__(f"mod_{n}")
"#;
        let imports = scan_imports(source).unwrap();
        let dynamic: Vec<&str> = imports
            .iter()
            .filter(|i| i.kind == ImportKind::Dynamic)
            .map(|i| i.module.as_str())
            .collect();
        assert_eq!(dynamic, vec!["plugins.csv_out", "legacy_mod"]);
    }

    #[test]
    fn test_unterminated_triple_quote_is_an_error() {
        let err = scan_imports("import os\nx = '''\nnever closed\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("triple-quoted"));
    }

    #[test]
    fn test_unclosed_bracket_is_an_error() {
        let err = scan_imports("from world import (\n    greet,\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn test_unterminated_single_quote_is_an_error() {
        assert!(scan_imports("print('Hello world)\n").is_err());
    }

    #[test]
    fn test_byte_order_mark_and_crlf() {
        let found = modules("\u{feff}import os\r\nimport sys\r\n");
        assert_eq!(found, vec![("os".into(), 0), ("sys".into(), 0)]);
    }

    #[test]
    fn test_empty_source() {
        assert!(scan_imports("").unwrap().is_empty());
        assert!(scan_imports("print('Hello world')\n").unwrap().is_empty());
    }
}
