//! Mapping record tokenizer
//!
//! A record is a whitespace separated list of `key=value` pairs. Values may
//! be wrapped in single or double quotes so they can contain whitespace, and
//! a backslash escapes the next character both inside and outside quotes.

/// Split a record into raw `key=value` tokens.
///
/// Whitespace inside a quoted span does not separate tokens, and an escaped
/// quote does not close the span.
pub(crate) fn split_tokens(line: &str) -> Result<Vec<&str>, String> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' => {
                start.get_or_insert(i);
                escaped = true;
            }
            '\'' | '"' => {
                start.get_or_insert(i);
                match quote {
                    Some(q) if q == c => quote = None,
                    Some(_) => {}
                    None => quote = Some(c),
                }
            }
            ' ' | '\t' if quote.is_none() => {
                if let Some(s) = start.take() {
                    tokens.push(&line[s..i]);
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {} quote", q));
    }
    if let Some(s) = start {
        tokens.push(&line[s..]);
    }

    Ok(tokens)
}

/// Split a token into its lowercased key and cleaned value.
pub(crate) fn split_pair(token: &str) -> Result<(String, String), String> {
    let (key, raw) = token
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, found '{}'", token))?;

    if key.is_empty() {
        return Err(format!("missing key in '{}'", token));
    }

    Ok((key.to_ascii_lowercase(), unquote(&unescape(raw))))
}

/// Drop every backslash, keeping the character it escapes.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }

    out
}

/// Remove one pair of matching surrounding quotes.
pub(crate) fn unquote(s: &str) -> String {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}
