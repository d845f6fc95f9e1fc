//! Minimal CMake command scanner
//!
//! Splits a build script into `name(args)` invocations with their starting
//! line. Handles line comments, bracket comments, quoted arguments,
//! bracket arguments and nested parentheses; it does not evaluate anything.

/// One command invocation in a CMake file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMakeCommand {
    /// Lower-cased command name
    pub name: String,
    /// Raw text between the outer parentheses
    pub args: String,
    /// 1-based line of the command name
    pub line: usize,
}

impl CMakeCommand {
    /// Whitespace-separated arguments with quotes and bracket delimiters removed.
    pub fn arguments(&self) -> Vec<String> {
        split_arguments(&self.args)
    }
}

/// Scan a CMake source into commands, in file order.
pub fn parse_commands(source: &str) -> Vec<CMakeCommand> {
    let chars: Vec<char> = source.chars().collect();
    let mut commands = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c == '#' {
            i = skip_comment(&chars, i, &mut line);
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            let mut j = i;
            while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
                j += 1;
            }
            if j < chars.len() && chars[j] == '(' {
                let command_line = line;
                let (args, end) = read_arguments(&chars, j + 1, &mut line);
                commands.push(CMakeCommand {
                    name: name.to_ascii_lowercase(),
                    args,
                    line: command_line,
                });
                i = end;
            }
            continue;
        }
        i += 1;
    }

    commands
}

/// Skip a `#` comment starting at `i`; returns the index after it.
fn skip_comment(chars: &[char], i: usize, line: &mut usize) -> usize {
    if let Some(level) = bracket_open_level(chars, i + 1) {
        let body_start = i + 1 + level + 2;
        return skip_bracket_body(chars, body_start, level, line);
    }
    let mut j = i;
    while j < chars.len() && chars[j] != '\n' {
        j += 1;
    }
    j
}

/// `[[`, `[=[`, `[==[` ... at `i`: returns the number of `=`.
fn bracket_open_level(chars: &[char], i: usize) -> Option<usize> {
    if chars.get(i) != Some(&'[') {
        return None;
    }
    let mut j = i + 1;
    while chars.get(j) == Some(&'=') {
        j += 1;
    }
    (chars.get(j) == Some(&'[')).then_some(j - i - 1)
}

/// Skip to just after the closing `]=*]` of the given level.
fn skip_bracket_body(chars: &[char], mut j: usize, level: usize, line: &mut usize) -> usize {
    while j < chars.len() {
        if chars[j] == '\n' {
            *line += 1;
        }
        if chars[j] == ']' {
            let mut k = j + 1;
            while chars.get(k) == Some(&'=') {
                k += 1;
            }
            if k - j - 1 == level && chars.get(k) == Some(&']') {
                return k + 1;
            }
        }
        j += 1;
    }
    chars.len()
}

/// Read up to the matching `)`; returns the raw text and the index after it.
fn read_arguments(chars: &[char], start: usize, line: &mut usize) -> (String, usize) {
    let mut depth = 1;
    let mut out = String::new();
    let mut j = start;

    while j < chars.len() {
        let c = chars[j];
        match c {
            '\n' => {
                *line += 1;
                out.push(c);
            }
            '"' => {
                out.push(c);
                j += 1;
                while j < chars.len() && chars[j] != '"' {
                    if chars[j] == '\\' && j + 1 < chars.len() {
                        out.push(chars[j]);
                        j += 1;
                    }
                    if chars[j] == '\n' {
                        *line += 1;
                    }
                    out.push(chars[j]);
                    j += 1;
                }
                if j < chars.len() {
                    out.push('"');
                }
            }
            '#' => {
                let end = skip_comment(chars, j, line);
                out.push(' ');
                j = end;
                continue;
            }
            '[' => {
                if let Some(level) = bracket_open_level(chars, j) {
                    let body_start = j + level + 2;
                    let end = skip_bracket_body(chars, body_start, level, line);
                    out.extend(&chars[j..end]);
                    j = end;
                    continue;
                }
                out.push(c);
            }
            '(' => {
                depth += 1;
                out.push(c);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return (out, j + 1);
                }
                out.push(c);
            }
            _ => out.push(c),
        }
        j += 1;
    }

    (out, chars.len())
}

/// Split raw argument text on whitespace, honouring quotes and brackets.
pub fn split_arguments(args: &str) -> Vec<String> {
    let chars: Vec<char> = args.chars().collect();
    let mut result = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    let flush = |current: &mut String, result: &mut Vec<String>| {
        if !current.is_empty() {
            result.push(std::mem::take(current));
        }
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            flush(&mut current, &mut result);
            i += 1;
        } else if c == '"' {
            i += 1;
            let mut quoted = String::new();
            while i < chars.len() && chars[i] != '"' {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                }
                quoted.push(chars[i]);
                i += 1;
            }
            i += 1;
            current.push_str(&quoted);
            if current.is_empty() {
                // An explicitly empty "" argument still counts
                result.push(String::new());
            }
        } else if let Some(level) = bracket_open_level(&chars, i) {
            let body_start = i + level + 2;
            let mut dummy_line = 0;
            let end = skip_bracket_body(&chars, body_start, level, &mut dummy_line);
            let body_end = end.saturating_sub(level + 2).max(body_start);
            current.extend(&chars[body_start..body_end.min(chars.len())]);
            i = end;
        } else {
            current.push(c);
            i += 1;
        }
    }
    flush(&mut current, &mut result);
    result
}
