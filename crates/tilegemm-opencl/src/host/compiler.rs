//! Front end of the host device compiler.
//!
//! Understands enough OpenCL C to accept well-formed kernels and to reject
//! broken ones with a clang-style build log: comment stripping, conditional
//! preprocessing (`#ifdef`, `#if`, `#define`, `#error`), delimiter balance,
//! `__local` array sizes and kernel signatures. Kernel bodies are not
//! type-checked.

use std::collections::HashMap;
use std::fmt;

/// One compiler error with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl Diagnostic {
    fn new(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self { line, col, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<source>:{}:{}: error: {}", self.line, self.col, self.message)
    }
}

/// Render diagnostics as a build log.
pub(crate) fn render_log(diags: &[Diagnostic]) -> String {
    let mut log = String::new();
    for d in diags {
        log.push_str(&d.to_string());
        log.push('\n');
    }
    let n = diags.len();
    log.push_str(&format!("{n} error{} generated.\n", if n == 1 { "" } else { "s" }));
    log
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Global,
    Local,
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSignature {
    pub name: String,
    pub params: Vec<ParamKind>,
}

/// Result of a successful compile.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledSource {
    pub kernels: Vec<KernelSignature>,
    pub defines: HashMap<String, String>,
}

impl CompiledSource {
    pub fn kernel(&self, name: &str) -> Option<&KernelSignature> {
        self.kernels.iter().find(|k| k.name == name)
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name.as_str()).collect()
    }

    /// Value of the `TILE_SIZE` macro, if defined as an integer.
    pub fn tile_size(&self) -> Option<usize> {
        self.defines.get("TILE_SIZE").and_then(|v| v.trim().parse().ok())
    }
}

/// Parse build options into the initial macro table.
pub(crate) fn parse_options(options: &str) -> Result<HashMap<String, String>, String> {
    let mut defines = HashMap::new();
    let mut tokens = options.split_whitespace();
    while let Some(tok) = tokens.next() {
        if let Some(rest) = tok.strip_prefix("-D") {
            let def = if rest.is_empty() { tokens.next().ok_or("-D requires a macro name")? } else { rest };
            let (name, value) = def.split_once('=').unwrap_or((def, "1"));
            if !is_identifier(name) {
                return Err(format!("invalid macro name '{name}' in -D option"));
            }
            defines.insert(name.to_string(), value.to_string());
        } else if let Some(rest) = tok.strip_prefix("-I") {
            if rest.is_empty() && tokens.next().is_none() {
                return Err("-I requires a directory".into());
            }
        } else if !(tok.starts_with("-cl-") || matches!(tok, "-w" | "-Werror")) {
            return Err(format!("unrecognized build option '{tok}'"));
        }
    }
    Ok(defines)
}

/// Compile `source` with `defines` predefined.
pub(crate) fn compile(source: &str, mut defines: HashMap<String, String>) -> Result<CompiledSource, Vec<Diagnostic>> {
    let stripped = strip_comments(source).map_err(|d| vec![d])?;
    let active = preprocess(&stripped, &mut defines)?;
    let tokens = tokenize(&active);

    let mut diags = Vec::new();
    check_delimiters(&tokens, &mut diags);
    if diags.is_empty() {
        check_local_arrays(&tokens, &defines, &mut diags);
    }
    let kernels = if diags.is_empty() { scan_kernels(&tokens, &mut diags) } else { Vec::new() };

    if diags.is_empty() { Ok(CompiledSource { kernels, defines }) } else { Err(diags) }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s.find(|c: char| !(c == '_' || c.is_ascii_alphanumeric())).unwrap_or(s.len());
    (&s[..end], &s[end..])
}

// ── comments ────────────────────────────────────────────────────────────────

/// Replace comments with spaces, keeping every newline so positions survive.
fn strip_comments(source: &str) -> Result<String, Diagnostic> {
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let (mut line, mut col) = (1usize, 1usize);
    let mut block_start = (1usize, 1usize);
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => {
                if c == '/' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    col += 2;
                    state = State::LineComment;
                    continue;
                }
                if c == '/' && chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str("  ");
                    block_start = (line, col);
                    col += 2;
                    state = State::BlockComment;
                    continue;
                }
                if c == '"' || c == '\'' {
                    state = State::Literal(c);
                }
                out.push(c);
            }
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    col += 2;
                    state = State::Code;
                    continue;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
            State::Literal(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                        col += 1;
                    }
                } else if c == quote || c == '\n' {
                    state = State::Code;
                }
            }
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    if matches!(state, State::BlockComment) {
        return Err(Diagnostic::new(block_start.0, block_start.1, "unterminated /* comment"));
    }
    Ok(out)
}

// ── preprocessor ────────────────────────────────────────────────────────────

struct Conditional {
    line: usize,
    col: usize,
    parent_active: bool,
    taken: bool,
    any_taken: bool,
    in_else: bool,
}

/// Evaluate the small `#if` subset: integers, macro names and `defined(X)`,
/// each optionally negated with `!`.
fn eval_condition(expr: &str, defines: &HashMap<String, String>) -> bool {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix('!') {
        return !eval_condition(rest, defines);
    }
    if let Some(rest) = expr.strip_prefix("defined") {
        let name = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
        return defines.contains_key(name);
    }
    if let Ok(n) = expr.parse::<i64>() {
        return n != 0;
    }
    defines.get(expr).and_then(|v| v.trim().parse::<i64>().ok()).is_some_and(|n| n != 0)
}

/// Resolve conditionals and directives. Directive and inactive lines become
/// empty lines.
fn preprocess(text: &str, defines: &mut HashMap<String, String>) -> Result<String, Vec<Diagnostic>> {
    let mut stack: Vec<Conditional> = Vec::new();
    let mut lines = Vec::new();
    let mut diags = Vec::new();

    for (idx, line) in text.split('\n').enumerate() {
        let lineno = idx + 1;
        let active = stack.last().is_none_or(|c| c.parent_active && c.taken);
        let trimmed = line.trim_start();

        let Some(directive) = trimmed.strip_prefix('#') else {
            lines.push(if active { line } else { "" });
            continue;
        };
        lines.push("");

        let col = line.len() - trimmed.len() + 1;
        let (name, rest) = split_word(directive);
        let rest = rest.trim();
        match name {
            "ifdef" | "ifndef" => {
                let defined = defines.contains_key(split_word(rest).0);
                let taken = if name == "ifdef" { defined } else { !defined };
                stack.push(Conditional { line: lineno, col, parent_active: active, taken, any_taken: taken, in_else: false });
            }
            "if" => {
                let taken = eval_condition(rest, defines);
                stack.push(Conditional { line: lineno, col, parent_active: active, taken, any_taken: taken, in_else: false });
            }
            "elif" => match stack.last_mut() {
                Some(c) if !c.in_else => {
                    c.taken = !c.any_taken && eval_condition(rest, defines);
                    c.any_taken |= c.taken;
                }
                _ => diags.push(Diagnostic::new(lineno, col, "#elif without #if")),
            },
            "else" => match stack.last_mut() {
                Some(c) if !c.in_else => {
                    c.taken = !c.any_taken;
                    c.any_taken = true;
                    c.in_else = true;
                }
                _ => diags.push(Diagnostic::new(lineno, col, "#else without #if")),
            },
            "endif" => {
                if stack.pop().is_none() {
                    diags.push(Diagnostic::new(lineno, col, "#endif without #if"));
                }
            }
            _ if !active => {}
            "define" => {
                let (macro_name, value) = split_word(rest);
                if is_identifier(macro_name) {
                    defines.insert(macro_name.to_string(), value.trim().to_string());
                } else {
                    diags.push(Diagnostic::new(lineno, col, "macro name must be an identifier"));
                }
            }
            "undef" => {
                defines.remove(split_word(rest).0);
            }
            "error" => diags.push(Diagnostic::new(lineno, col, rest)),
            "pragma" | "" => {}
            other => diags.push(Diagnostic::new(lineno, col, format!("invalid preprocessing directive '#{other}'"))),
        }
    }

    for c in stack {
        diags.push(Diagnostic::new(c.line, c.col, "unterminated conditional directive"));
    }
    if diags.is_empty() { Ok(lines.join("\n")) } else { Err(diags) }
}

// ── tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    line: usize,
    col: usize,
}

impl Token<'_> {
    fn is_ident(&self, s: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == s
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (idx, line) in text.split('\n').enumerate() {
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            let start = i;
            if c.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            let kind = if c == b'_' || c.is_ascii_alphabetic() {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                TokenKind::Ident
            } else if c.is_ascii_digit() {
                while i < bytes.len() && (bytes[i] == b'.' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                TokenKind::Number
            } else if c == b'"' || c == b'\'' {
                i += 1;
                while i < bytes.len() && bytes[i] != c {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                i = (i + 1).min(bytes.len());
                continue;
            } else if c.is_ascii() {
                i += 1;
                TokenKind::Punct(c as char)
            } else {
                // Skip the rest of a multi-byte character.
                i += 1;
                while i < bytes.len() && !line.is_char_boundary(i) {
                    i += 1;
                }
                continue;
            };
            tokens.push(Token { kind, text: &line[start..i], line: idx + 1, col: start + 1 });
        }
    }
    tokens
}

// ── checks ──────────────────────────────────────────────────────────────────

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn check_delimiters(tokens: &[Token<'_>], diags: &mut Vec<Diagnostic>) {
    let mut stack: Vec<&Token<'_>> = Vec::new();
    for tok in tokens {
        let TokenKind::Punct(c) = tok.kind else { continue };
        match c {
            '(' | '[' | '{' => stack.push(tok),
            ')' | ']' | '}' => match stack.pop() {
                Some(open) => {
                    let TokenKind::Punct(o) = open.kind else { continue };
                    if closer_for(o) != c {
                        diags.push(Diagnostic::new(
                            tok.line,
                            tok.col,
                            format!("expected '{}' to match '{o}' at {}:{}", closer_for(o), open.line, open.col),
                        ));
                        return;
                    }
                }
                None => {
                    diags.push(Diagnostic::new(tok.line, tok.col, format!("extraneous closing '{c}'")));
                    return;
                }
            },
            _ => {}
        }
    }
    if let Some(open) = stack.last() {
        if let TokenKind::Punct(o) = open.kind {
            diags.push(Diagnostic::new(
                open.line,
                open.col,
                format!("expected '{}' at end of input to match this '{o}'", closer_for(o)),
            ));
        }
    }
}

/// Every `__local` array dimension must be an integer constant.
fn check_local_arrays(tokens: &[Token<'_>], defines: &HashMap<String, String>, diags: &mut Vec<Diagnostic>) {
    let mut in_local = false;
    let mut in_brackets = false;
    for tok in tokens {
        if tok.is_ident("__local") || tok.is_ident("local") {
            in_local = true;
            continue;
        }
        if !in_local {
            continue;
        }
        match &tok.kind {
            TokenKind::Punct(';') | TokenKind::Punct(')') | TokenKind::Punct(',') if !in_brackets => in_local = false,
            TokenKind::Punct('[') => in_brackets = true,
            TokenKind::Punct(']') => in_brackets = false,
            TokenKind::Ident if in_brackets => match defines.get(tok.text) {
                None => diags.push(Diagnostic::new(
                    tok.line,
                    tok.col,
                    format!("use of undeclared identifier '{}'", tok.text),
                )),
                Some(v) if v.trim().parse::<u64>().is_err() => diags.push(Diagnostic::new(
                    tok.line,
                    tok.col,
                    format!("array size '{}' is not an integer constant", tok.text),
                )),
                Some(_) => {}
            },
            _ => {}
        }
    }
}

fn scan_kernels(tokens: &[Token<'_>], diags: &mut Vec<Diagnostic>) -> Vec<KernelSignature> {
    let mut kernels: Vec<KernelSignature> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let qualifier = &tokens[i];
        i += 1;
        if !(qualifier.is_ident("__kernel") || qualifier.is_ident("kernel")) {
            continue;
        }
        i = skip_attributes(tokens, i);
        match tokens.get(i) {
            Some(t) if t.is_ident("void") => i += 1,
            Some(t) if qualifier.text == "__kernel" => {
                diags.push(Diagnostic::new(t.line, t.col, "kernel functions must have void return type"));
                continue;
            }
            _ => continue,
        }
        i = skip_attributes(tokens, i);
        let Some(name) = tokens.get(i).filter(|t| t.kind == TokenKind::Ident) else {
            diags.push(Diagnostic::new(qualifier.line, qualifier.col, "expected kernel name"));
            continue;
        };
        i += 1;
        if !tokens.get(i).is_some_and(|t| t.is_punct('(')) {
            diags.push(Diagnostic::new(name.line, name.col, "expected '(' after kernel name"));
            continue;
        }
        let (params, next) = parse_params(tokens, i + 1);
        i = next;
        if kernels.iter().any(|k| k.name == name.text) {
            diags.push(Diagnostic::new(name.line, name.col, format!("redefinition of '{}'", name.text)));
            continue;
        }
        kernels.push(KernelSignature { name: name.text.to_string(), params });
    }
    kernels
}

fn skip_attributes(tokens: &[Token<'_>], mut i: usize) -> usize {
    while tokens.get(i).is_some_and(|t| t.is_ident("__attribute__")) {
        i += 1;
        let mut depth = 0usize;
        while let Some(t) = tokens.get(i) {
            i += 1;
            if t.is_punct('(') {
                depth += 1;
            } else if t.is_punct(')') {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
        }
    }
    i
}

/// Parse a parameter list starting just after `(`. Returns the parameter
/// kinds and the index after the closing `)`.
fn parse_params(tokens: &[Token<'_>], mut i: usize) -> (Vec<ParamKind>, usize) {
    let mut params = Vec::new();
    let mut current: Vec<&Token<'_>> = Vec::new();
    let mut depth = 0usize;
    while let Some(t) = tokens.get(i) {
        i += 1;
        if t.is_punct('(') || t.is_punct('[') {
            depth += 1;
        } else if (t.is_punct(')') || t.is_punct(']')) && depth > 0 {
            depth -= 1;
        } else if t.is_punct(')') {
            break;
        } else if t.is_punct(',') && depth == 0 {
            params.push(classify_param(&current));
            current.clear();
            continue;
        }
        current.push(t);
    }
    let is_void = current.len() == 1 && current[0].is_ident("void");
    if !current.is_empty() && !is_void {
        params.push(classify_param(&current));
    }
    (params, i)
}

fn classify_param(tokens: &[&Token<'_>]) -> ParamKind {
    let pointer = tokens.iter().any(|t| t.is_punct('*'));
    let local = tokens.iter().any(|t| t.is_ident("__local") || t.is_ident("local"));
    match (pointer, local) {
        (true, true) => ParamKind::Local,
        (true, false) => ParamKind::Global,
        (false, _) => ParamKind::Scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::MATMUL_TILED_SRC;

    fn tile(n: usize) -> HashMap<String, String> {
        HashMap::from([("TILE_SIZE".to_string(), n.to_string())])
    }

    #[test]
    fn embedded_kernel_compiles() {
        let compiled = compile(MATMUL_TILED_SRC, tile(16)).unwrap();
        let kernel = compiled.kernel("matrix_multiply").unwrap();
        assert_eq!(kernel.params.len(), 9);
        assert_eq!(&kernel.params[..3], &[ParamKind::Global; 3]);
        assert!(kernel.params[3..].iter().all(|p| *p == ParamKind::Scalar));
        assert_eq!(compiled.tile_size(), Some(16));
    }

    #[test]
    fn missing_tile_size_hits_error_directive() {
        let diags = compile(MATMUL_TILED_SRC, HashMap::new()).unwrap_err();
        assert!(diags[0].message.contains("TILE_SIZE must be defined"), "{diags:?}");
    }

    #[test]
    fn unbalanced_brace_reports_opener() {
        let src = "__kernel void k(__global float *a) {\n  a[0] = 1.0f;\n";
        let diags = compile(src, HashMap::new()).unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!((diags[0].line, diags[0].col), (1, 36));
        assert!(diags[0].message.contains("expected '}'"));
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let diags = compile("__kernel void k() { a[0) = 1; }", HashMap::new()).unwrap_err();
        assert!(diags[0].message.contains("expected ']'"), "{diags:?}");
    }

    #[test]
    fn undeclared_local_array_size() {
        let src = "__kernel void k() {\n  __local float t[N][4];\n}\n";
        let diags = compile(src, HashMap::new()).unwrap_err();
        assert_eq!(diags[0].to_string(), "<source>:2:19: error: use of undeclared identifier 'N'");
    }

    #[test]
    fn comments_and_strings_are_ignored() {
        let src = "/* } */ __kernel void k(uint n) { // {\n }\n";
        let compiled = compile(src, HashMap::new()).unwrap();
        assert_eq!(compiled.kernel_names(), vec!["k"]);
    }

    #[test]
    fn unterminated_block_comment() {
        let diags = compile("__kernel void k() {}\n/* open", HashMap::new()).unwrap_err();
        assert_eq!((diags[0].line, diags[0].col), (2, 1));
    }

    #[test]
    fn conditionals_select_branches() {
        let src = "#if 0\n__kernel void a() {}\n#elif defined(B)\n__kernel void b() {}\n#else\n__kernel void c() {}\n#endif\n";
        let with_b = HashMap::from([("B".to_string(), "1".to_string())]);
        assert_eq!(compile(src, with_b).unwrap().kernel_names(), vec!["b"]);
        assert_eq!(compile(src, HashMap::new()).unwrap().kernel_names(), vec!["c"]);
    }

    #[test]
    fn source_define_sets_tile_size() {
        let compiled = compile("#define TILE_SIZE 8\n__kernel void k() {}", HashMap::new()).unwrap();
        assert_eq!(compiled.tile_size(), Some(8));
    }

    #[test]
    fn void_and_empty_params() {
        let compiled = compile("__kernel void a(void) {}\n__kernel void b() {}", HashMap::new()).unwrap();
        assert!(compiled.kernel("a").unwrap().params.is_empty());
        assert!(compiled.kernel("b").unwrap().params.is_empty());
    }

    #[test]
    fn attributes_are_skipped() {
        let src = "__kernel __attribute__((reqd_work_group_size(16, 16, 1))) void k(__local float *s, int n) {}";
        let compiled = compile(src, HashMap::new()).unwrap();
        assert_eq!(compiled.kernel("k").unwrap().params, vec![ParamKind::Local, ParamKind::Scalar]);
    }

    #[test]
    fn non_void_kernel_rejected() {
        let diags = compile("__kernel int k() { return 0; }", HashMap::new()).unwrap_err();
        assert!(diags[0].message.contains("void return type"));
    }

    #[test]
    fn duplicate_kernel_rejected() {
        let diags = compile("__kernel void k() {}\n__kernel void k() {}", HashMap::new()).unwrap_err();
        assert_eq!(diags[0].line, 2);
        assert!(diags[0].message.contains("redefinition"));
    }

    #[test]
    fn unterminated_conditional() {
        let diags = compile("#ifdef X\n__kernel void k() {}\n", HashMap::new()).unwrap_err();
        assert!(diags[0].message.contains("unterminated conditional"));
    }

    #[test]
    fn options_parse_defines() {
        let defines = parse_options("-DTILE_SIZE=16 -D FAST -cl-mad-enable -I include -w").unwrap();
        assert_eq!(defines.get("TILE_SIZE").map(String::as_str), Some("16"));
        assert_eq!(defines.get("FAST").map(String::as_str), Some("1"));
    }

    #[test]
    fn options_reject_unknown_flag() {
        assert!(parse_options("-O9").unwrap_err().contains("-O9"));
        assert!(parse_options("-D").is_err());
        assert!(parse_options("-D1X=2").is_err());
    }

    #[test]
    fn log_ends_with_error_count() {
        let log = render_log(&[Diagnostic::new(1, 2, "boom"), Diagnostic::new(3, 4, "bang")]);
        assert!(log.starts_with("<source>:1:2: error: boom\n"));
        assert!(log.ends_with("2 errors generated.\n"));
    }
}
