use crate::error::GortError;

use super::substitution::{self, Expander};

pub(crate) struct Stage {
    pub text: String,
    pub offset: usize,
}

/// Splits `input` on top-level, unquoted `|` into pipeline stages.
/// A stray pipe (leading, trailing, or doubled) is a parse error.
pub(crate) fn split_pipeline(input: &str) -> Result<Vec<Stage>, GortError> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut stage_start = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    let mut paren_depth = 0i32;
    let chars: Vec<(usize, char)> = input.char_indices().collect();

    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '(' if !in_single && !in_double => {
                paren_depth += 1;
                current.push(c);
            }
            ')' if !in_single && !in_double => {
                paren_depth -= 1;
                current.push(c);
            }
            '|' if !in_single && !in_double && paren_depth <= 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return Err(GortError::Parse {
                        offset,
                        message: "stray pipe".to_string(),
                    });
                }
                stages.push(Stage {
                    text: current.clone(),
                    offset: stage_start,
                });
                current.clear();
                stage_start = offset + 1;
            }
            _ => current.push(c),
        }
        i += 1;
    }

    if in_single || in_double {
        return Err(GortError::Parse {
            offset: input.len(),
            message: "unterminated quote".to_string(),
        });
    }

    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err(GortError::Parse {
            offset: stage_start,
            message: "stray pipe".to_string(),
        });
    }
    stages.push(Stage {
        text: current,
        offset: stage_start,
    });

    Ok(stages)
}

/// Tokenizes a single pipeline stage into words, expanding variable and
/// command substitutions as it goes. Whitespace outside quotes
/// separates words; quotes preserve interior whitespace.
pub(crate) async fn tokenize_stage(
    stage: &str,
    base_offset: usize,
    expander: &dyn Expander,
    depth: usize,
) -> Result<Vec<String>, GortError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut have_word = false;
    let mut in_single = false;
    let mut in_double = false;

    let chars: Vec<char> = stage.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                have_word = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                have_word = true;
            }
            '$' if !in_single => {
                let (expanded, consumed) =
                    substitution::expand_at(&chars, i, expander, depth, base_offset).await?;
                current.push_str(&expanded);
                have_word = true;
                i += consumed;
                continue;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if have_word {
                    words.push(std::mem::take(&mut current));
                    have_word = false;
                }
            }
            '>' if !in_single && !in_double => {
                return Err(GortError::Parse {
                    offset: base_offset + i,
                    message: "output redirection is not supported".to_string(),
                });
            }
            c => {
                current.push(c);
                have_word = true;
            }
        }
        i += 1;
    }

    if in_single || in_double {
        return Err(GortError::Parse {
            offset: base_offset + stage.len(),
            message: "unterminated quote".to_string(),
        });
    }

    if have_word {
        words.push(current);
    }
    Ok(words)
}
