use crate::error::GortError;
use crate::util::BoxFuture;

/// Caller-supplied resolution hooks. Implemented by the router (backed
/// by live dynamic configuration and a real worker dispatch) and, in
/// tests, by fakes.
pub trait Expander: Sync {
    /// Resolves `$NAME`/`${NAME}`. Unresolved names expand to `""`.
    fn lookup_var(&self, name: &str) -> Option<String>;

    /// Runs `source` as a nested pipeline and returns its captured
    /// stdout, to substitute in place of a `$(...)` group. `depth` is
    /// the nesting depth this call is being made at, for the caller's
    /// own deadline bookkeeping (see DESIGN.md's Open Question 3). This
    /// drives the full resolve/authorize/execute pipeline recursively,
    /// hence the boxed future rather than a synchronous return (§5: a
    /// suspension point).
    fn run_pipeline<'a>(&'a self, source: &'a str, depth: usize) -> BoxFuture<'a, Result<String, GortError>>;
}

pub const MAX_SUBSTITUTION_DEPTH: usize = 8;

/// Expands the substitution starting at `chars[i]` (which must be `$`).
/// Returns the expanded text and the number of `chars` consumed,
/// including the leading `$`.
pub(crate) async fn expand_at(
    chars: &[char],
    i: usize,
    expander: &dyn Expander,
    depth: usize,
    base_offset: usize,
) -> Result<(String, usize), GortError> {
    debug_assert_eq!(chars[i], '$');

    if i + 1 >= chars.len() {
        // A lone trailing `$` is treated as a literal.
        return Ok(("$".to_string(), 1));
    }

    match chars[i + 1] {
        '{' => {
            let close = find_matching(chars, i + 1, '{', '}').ok_or_else(|| GortError::Parse {
                offset: base_offset + i,
                message: "unterminated ${...}".to_string(),
            })?;
            let name: String = chars[i + 2..close].iter().collect();
            let value = expander.lookup_var(name.trim()).unwrap_or_default();
            Ok((value, close - i + 1))
        }
        '(' => {
            if depth + 1 > MAX_SUBSTITUTION_DEPTH {
                return Err(GortError::Parse {
                    offset: base_offset + i,
                    message: "command substitution recursion depth exceeded".to_string(),
                });
            }
            let close = find_matching(chars, i + 1, '(', ')').ok_or_else(|| GortError::Parse {
                offset: base_offset + i,
                message: "unterminated $(...)".to_string(),
            })?;
            let inner: String = chars[i + 2..close].iter().collect();
            let output = expander.run_pipeline(&inner, depth + 1).await?;
            Ok((output, close - i + 1))
        }
        c if is_name_start(c) => {
            let mut end = i + 1;
            while end < chars.len() && is_name_char(chars[end]) {
                end += 1;
            }
            let name: String = chars[i + 1..end].iter().collect();
            let value = expander.lookup_var(&name).unwrap_or_default();
            Ok((value, end - i))
        }
        _ => Ok(("$".to_string(), 1)),
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Finds the index of the `close` character matching the `open` at
/// `open_idx`, accounting for nested pairs.
fn find_matching(chars: &[char], open_idx: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut i = open_idx;
    while i < chars.len() {
        if chars[i] == open {
            depth += 1;
        } else if chars[i] == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}
