//! Batch boundary encoding on the shell's input and decoding on its output.
//!
//! After every batch the dispatcher writes `echo <TOKEN> <index> $?`. The
//! subprocess substitutes its own last exit status, so the merged output
//! carries exactly one `<TOKEN> <index> <exit-code>` line per batch.

use super::ShellError;

/// Default token delimiting batches in the merged output stream.
pub const DEFAULT_TOKEN: &str = "RUSTY_SHELL_EOC_5f1c7a";

/// Rejects tokens the shell would glob, split, or otherwise rewrite.
pub fn validate_token(token: &str) -> Result<(), ShellError> {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if safe {
        Ok(())
    } else {
        Err(ShellError::InvalidToken {
            token: token.to_string(),
        })
    }
}

/// The line written after batch `index`. `$?` is left for the subprocess to expand.
pub fn encode_echo(token: &str, index: usize) -> String {
    format!("echo {} {} $?\n", token, index)
}

/// A parsed boundary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary<'a> {
    /// Text printed on the same line before the token, e.g. by `printf` without a newline.
    pub prefix: &'a str,
    pub index: usize,
    /// `None` when the exit-code field is missing or not numeric.
    pub exit_code: Option<i32>,
}

/// Classification of one line read from the merged output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// No token on the line.
    Output(&'a str),
    /// The token is present but the index field does not parse.
    Malformed(&'a str),
    Boundary(Boundary<'a>),
}

pub fn decode<'a>(line: &'a str, token: &str) -> Decoded<'a> {
    let Some(pos) = line.find(token) else {
        return Decoded::Output(line);
    };

    let prefix = &line[..pos];
    let rest = &line[pos + token.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return Decoded::Malformed(line);
    }

    let mut fields = rest.split_whitespace();
    let Some(index) = fields.next().and_then(|f| f.parse::<usize>().ok()) else {
        return Decoded::Malformed(line);
    };
    let exit_code = fields.next().and_then(|f| f.parse::<i32>().ok());

    Decoded::Boundary(Boundary {
        prefix,
        index,
        exit_code,
    })
}
