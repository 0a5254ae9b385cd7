//! Tokenizer turning a command line into an argument vector.
//!
//! This is a pure function: no state survives a call.

/// Splits a raw command line into argument tokens.
///
/// # Rules
///
/// - Tokens are separated by spaces that are neither escaped nor quoted
/// - A backslash escapes the following character (spaces and quotes included)
///   and is itself removed; a trailing lone backslash is dropped
/// - A `"` or `'` opens a quoted region only when the current token is still
///   blank, or directly after a quoted region that just closed (`"a"'b'` is
///   one token `ab`); anywhere else it is an ordinary character
/// - Inside a quoted region spaces are kept verbatim; the region ends at the
///   next unescaped matching quote, which does not end the token
/// - Quote characters never appear in the output
/// - An unterminated quote closes silently at end of input
/// - Blank tokens are dropped, never emitted as empty strings
///
/// # Examples
///
/// ```
/// use action_runner::commands::tokenize;
///
/// assert!(tokenize("").is_empty());
/// assert_eq!(tokenize("a  b"), vec!["a", "b"]);
/// assert_eq!(tokenize("a \"b c\" d"), vec!["a", "b c", "d"]);
/// assert_eq!(tokenize("a \"b"), vec!["a", "b"]);
/// ```
pub fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    // Set right after a quoted region closes, so an adjacent quote reopens.
    let mut after_quote = false;

    for c in raw.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            after_quote = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(open) = quote {
            if c == open {
                quote = None;
                after_quote = true;
            } else {
                current.push(c);
            }
            continue;
        }
        match c {
            ' ' => {
                flush(&mut tokens, &mut current);
                after_quote = false;
            }
            '"' | '\'' if after_quote || is_blank(&current) => {
                quote = Some(c);
            }
            _ => {
                current.push(c);
                after_quote = false;
            }
        }
    }

    flush(&mut tokens, &mut current);
    tokens
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    let token = std::mem::take(current);
    if !is_blank(&token) {
        tokens.push(token);
    }
}
