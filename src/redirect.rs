use std::fs::{File, OpenOptions};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ShellError;

/// Where a stage's stdin has been redirected.
#[derive(Debug)]
pub enum ReadTarget {
    /// Read from an opened file (`< file`).
    File(File),
    /// Read from an inherited file descriptor (`<&N`).
    Fd(i32),
}

/// Where a stage's stdout or stderr has been redirected.
#[derive(Debug)]
pub enum WriteTarget {
    /// Write to an opened file (`> file`, `>> file`).
    File(File),
    /// Write to an inherited file descriptor (`>&N`).
    Fd(i32),
    /// stderr only: merge into wherever stdout goes (`2>1`, `e>o`, `err>out`).
    Merge,
}

/// Per-stage stream bindings accumulated from redirection tokens.
///
/// Each stream is bound at most once; a second binding raises the matching
/// redirection error.
#[derive(Debug, Default)]
pub struct StreamBindings {
    pub stdin: Option<ReadTarget>,
    pub stdout: Option<WriteTarget>,
    pub stderr: Option<WriteTarget>,
}

// Redirection token grammar: [orig](>>|>|<)[dest], where both ends accept
// the stream names o/out, e/err, a/all, a bare `&`, or a single digit
// (possibly `&`-prefixed for fd duplication).
const REDIR_NAME: &str = "(o(?:ut)?|e(?:rr)?|a(?:ll)?|&?[0-9]?)";
static REDIR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{REDIR_NAME}(>>|>|<){REDIR_NAME}$")).expect("redirection grammar")
});

/// Does this token position a stream, as opposed to being an argument?
pub fn is_redirect(token: &str) -> bool {
    REDIR_REGEX.is_match(token)
}

/// The err-to-out merge shorthand: an err marker, `>`, and a non-empty out
/// marker, with any `&` prefixes ignored (`2>1`, `2>&1`, `e>o`, `err>out`).
fn is_err_to_out(token: &str) -> bool {
    let stripped = token.replace('&', "");
    let Some((err, out)) = stripped.split_once('>') else {
        return false;
    };
    matches!(err, "2" | "e" | "err") && matches!(out, "1" | "o" | "out")
}

/// Strip redirection tokens from a stage's token list, accumulating stream
/// bindings. Trailing `OP` and `OP file` forms are peeled off the tail until
/// none remain; a leading `< file` pair is also accepted.
pub fn extract(tokens: &mut Vec<String>) -> Result<StreamBindings, ShellError> {
    let mut bindings = StreamBindings::default();
    loop {
        let n = tokens.len();
        if n >= 3 && is_redirect(&tokens[n - 2]) {
            let loc = tokens.remove(n - 1);
            let token = tokens.remove(n - 2);
            apply(&mut bindings, &token, Some(&loc))?;
        } else if n >= 2 && is_redirect(&tokens[n - 1]) {
            let token = tokens.remove(n - 1);
            apply(&mut bindings, &token, None)?;
        } else if n >= 3 && tokens[0] == "<" {
            let token = tokens.remove(0);
            let loc = tokens.remove(0);
            apply(&mut bindings, &token, Some(&loc))?;
        } else {
            break;
        }
    }
    Ok(bindings)
}

/// Apply one redirection token (with its optional file-path argument) to the
/// stream bindings.
pub fn apply(bindings: &mut StreamBindings, token: &str, loc: Option<&str>) -> Result<(), ShellError> {
    // Special case: merging stderr into stdout.
    if is_err_to_out(token) {
        if bindings.stderr.is_some() {
            return Err(ShellError::MultipleRedirects("stderr"));
        }
        bindings.stderr = Some(WriteTarget::Merge);
        return Ok(());
    }

    let caps = REDIR_REGEX
        .captures(token)
        .ok_or_else(|| ShellError::UnrecognizedRedirect(token.to_string()))?;
    let orig = &caps[1];
    let op = &caps[2];
    let mut dest = caps[3].to_string();

    // fd duplication: `>&N` rebinds the target to file descriptor N and
    // forbids a superfluous path argument.
    let mut fd_target: Option<i32> = None;
    if let Some(digits) = dest.strip_prefix('&') {
        if let Ok(fd) = digits.parse::<i32>() {
            if loc.is_some() {
                return Err(ShellError::UnrecognizedRedirect(token.to_string()));
            }
            fd_target = Some(fd);
            dest.clear();
        }
    }

    match op {
        "<" => {
            if !orig.is_empty() || !dest.is_empty() {
                return Err(ShellError::UnrecognizedRedirect(token.to_string()));
            }
            if bindings.stdin.is_some() {
                return Err(ShellError::MultipleStdin);
            }
            bindings.stdin = Some(match fd_target {
                Some(fd) => ReadTarget::Fd(fd),
                None => ReadTarget::File(open_read(loc, token)?),
            });
            Ok(())
        }
        ">" | ">>" => {
            let append = op == ">>";
            let to_stdout;
            let to_stderr;
            match orig {
                "&" | "a" | "all" => {
                    if bindings.stderr.is_some() {
                        return Err(ShellError::MultipleRedirects("stderr"));
                    }
                    if bindings.stdout.is_some() {
                        return Err(ShellError::MultipleRedirects("stdout"));
                    }
                    to_stdout = true;
                    to_stderr = true;
                }
                "2" | "e" | "err" => {
                    if bindings.stderr.is_some() {
                        return Err(ShellError::MultipleRedirects("stderr"));
                    }
                    to_stdout = false;
                    to_stderr = true;
                }
                "" | "1" | "o" | "out" => {
                    if bindings.stdout.is_some() {
                        return Err(ShellError::MultipleRedirects("stdout"));
                    }
                    to_stdout = true;
                    to_stderr = false;
                }
                _ => return Err(ShellError::UnrecognizedRedirect(token.to_string())),
            }
            if !dest.is_empty() {
                return Err(ShellError::UnrecognizedRedirect(token.to_string()));
            }

            if let Some(fd) = fd_target {
                if to_stdout {
                    bindings.stdout = Some(WriteTarget::Fd(fd));
                }
                if to_stderr {
                    bindings.stderr = Some(WriteTarget::Fd(fd));
                }
                return Ok(());
            }

            // Open the file once; when both streams are targeted they share
            // the handle (dup'd, so writes interleave at one offset).
            let file = open_write(loc, token, append)?;
            if to_stdout && to_stderr {
                let clone = file
                    .try_clone()
                    .map_err(|_| file_error(loc, token))?;
                bindings.stdout = Some(WriteTarget::File(clone));
                bindings.stderr = Some(WriteTarget::File(file));
            } else if to_stderr {
                bindings.stderr = Some(WriteTarget::File(file));
            } else {
                bindings.stdout = Some(WriteTarget::File(file));
            }
            Ok(())
        }
        _ => Err(ShellError::UnrecognizedRedirect(token.to_string())),
    }
}

fn open_read(loc: Option<&str>, token: &str) -> Result<File, ShellError> {
    let path = loc.ok_or_else(|| ShellError::UnrecognizedRedirect(token.to_string()))?;
    File::open(path).map_err(|_| ShellError::FileOpenFailed(path.to_string()))
}

fn open_write(loc: Option<&str>, token: &str, append: bool) -> Result<File, ShellError> {
    let path = loc.ok_or_else(|| ShellError::UnrecognizedRedirect(token.to_string()))?;
    let result = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        OpenOptions::new().create(true).write(true).truncate(true).open(path)
    };
    result.map_err(|_| ShellError::FileOpenFailed(path.to_string()))
}

fn file_error(loc: Option<&str>, token: &str) -> ShellError {
    ShellError::FileOpenFailed(loc.unwrap_or(token).to_string())
}

/// Duplicate a raw file descriptor into an owned `File`.
#[cfg(unix)]
pub(crate) fn dup_fd(fd: i32) -> std::io::Result<File> {
    use std::os::fd::FromRawFd;

    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(duped) })
}
