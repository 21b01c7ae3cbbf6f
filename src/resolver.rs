use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::SHELL_NAME;
use crate::aliases::Expanded;
use crate::context::ShellContext;
use crate::error::ShellError;
use crate::parser;

/// An executable plan for one pipeline stage.
pub enum ExecPlan {
    /// An in-process callable plus its residual argument tokens.
    Callable(crate::aliases::Callable, Vec<String>),
    /// A fully-qualified argv list ready to hand to the OS.
    External(Vec<String>),
}

/// Resolve a stage's tokens into an executable plan: alias expansion first,
/// then a `PATH` lookup with script/shebang handling. When nothing matches,
/// the original tokens are returned and the spawn reports command-not-found.
pub fn resolve(ctx: &ShellContext, tokens: Vec<String>) -> Result<ExecPlan, ShellError> {
    let mut argv = tokens;
    let Some(head) = argv.first().cloned() else {
        return Ok(ExecPlan::External(argv));
    };

    match ctx.aliases().get(&head) {
        Some(Expanded::Callable(callable)) => {
            return Ok(ExecPlan::Callable(callable, argv[1..].to_vec()));
        }
        Some(Expanded::Tokens(mut expansion)) => {
            expansion.extend_from_slice(&argv[1..]);
            argv = expansion;
        }
        None => {}
    }

    let Some(head) = argv.first().cloned() else {
        return Ok(ExecPlan::External(argv));
    };

    let env = ctx.env();
    let pathext = env.pathext();
    match find_runnable(&head, &env.path_dirs(), &pathext) {
        None => Ok(ExecPlan::External(argv)),
        Some(path) => script_command(&head, &path, &argv[1..], &pathext).map(ExecPlan::External),
    }
}

/// Locate the file a bare command name refers to: an explicit path wins,
/// otherwise each `PATH` directory is searched in order. On Windows a file
/// whose stem matches and whose extension appears in `PATHEXT` also counts.
pub fn find_runnable(name: &str, dirs: &[PathBuf], pathext: &[String]) -> Option<PathBuf> {
    let as_path = Path::new(name);
    if as_path.is_file() && as_path.file_name() != Some(OsStr::new(name)) {
        return Some(PathBuf::from(name));
    }

    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .collect();
        files.sort();

        if files.iter().any(|file| file == name) {
            return Some(dir.join(name));
        }
        if cfg!(windows) {
            for file in &files {
                let candidate = Path::new(file);
                let stem_matches = candidate.file_stem() == Some(OsStr::new(name));
                let ext_matches = candidate
                    .extension()
                    .and_then(OsStr::to_str)
                    .is_some_and(|ext| {
                        let dotted = format!(".{}", ext.to_ascii_uppercase());
                        pathext.iter().any(|known| known == &dotted)
                    });
                if stem_matches && ext_matches {
                    return Some(dir.join(file));
                }
            }
        }
    }
    None
}

static SHEBANG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#![ \t]*(.+)$").expect("shebang grammar"));

/// Turn a resolved file into the argv to execute it: binaries (and, on
/// Windows, `PATHEXT` types) run directly; scripts run under their shebang
/// interpreter after normalisation; the shell itself is the fallback
/// interpreter.
pub fn script_command(
    name: &str,
    path: &Path,
    args: &[String],
    pathext: &[String],
) -> Result<Vec<String>, ShellError> {
    if !is_executable(path) {
        return Err(ShellError::PermissionDenied(name.to_string()));
    }

    let display = path.to_string_lossy().into_owned();
    let direct = |args: &[String]| {
        let mut argv = vec![display.clone()];
        argv.extend_from_slice(args);
        argv
    };

    if is_binary(path).map_err(|_| ShellError::FileOpenFailed(display.clone()))? {
        return Ok(direct(args));
    }

    if cfg!(windows) {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(|ext| format!(".{}", ext.to_ascii_uppercase()));
        if ext.is_some_and(|ext| pathext.iter().any(|known| known == &ext)) {
            return Ok(direct(args));
        }
    }

    let mut first_line = String::new();
    let file = File::open(path).map_err(|_| ShellError::FileOpenFailed(display.clone()))?;
    let _ = BufReader::new(file).read_line(&mut first_line);
    let first_line = first_line.trim_end();

    let interp: Vec<String> = match SHEBANG_REGEX
        .captures(first_line)
        .map(|caps| caps[1].trim().to_string())
        .filter(|interp| !interp.is_empty())
    {
        Some(interp) => parser::tokenize(&interp),
        None => vec![SHELL_NAME.to_string()],
    };

    let mut argv: Vec<String> = interp.iter().flat_map(|word| un_shebang(word)).collect();
    argv.push(display);
    argv.extend_from_slice(args);
    Ok(argv)
}

/// Normalise one shebang interpreter word to a stable form: `/usr/bin/env`
/// disappears, well-known bin directories reduce to the basename, python
/// variants collapse to `python`, and the shell's own name is rewritten to
/// the running executable.
pub fn un_shebang(word: &str) -> Vec<String> {
    if word == "/usr/bin/env" {
        return Vec::new();
    }
    let mut word = word.to_string();
    if ["/usr/bin", "/usr/local/bin", "/bin"]
        .iter()
        .any(|prefix| word.starts_with(prefix))
    {
        if let Some(base) = Path::new(&word).file_name().and_then(OsStr::to_str) {
            word = base.to_string();
        }
    } else if word.ends_with("python") || word.ends_with("python.exe") {
        word = "python".to_string();
    }
    if word == SHELL_NAME {
        return vec![shell_invocation()];
    }
    vec![word]
}

/// How a script should re-invoke this shell: the running executable when it
/// can be determined, the bare name otherwise.
fn shell_invocation() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.into_os_string().into_string().ok())
        .unwrap_or_else(|| SHELL_NAME.to_string())
}

/// Binary heuristic: a NUL among the first 80 bytes, before any newline.
fn is_binary(path: &Path) -> std::io::Result<bool> {
    let file = File::open(path)?;
    let mut head = Vec::with_capacity(80);
    file.take(80).read_to_end(&mut head)?;
    for &byte in &head {
        if byte == 0 {
            return Ok(true);
        }
        if byte == b'\n' {
            return Ok(false);
        }
    }
    Ok(false)
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    // On Unix, check the executable permission bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    // On Windows, being a file is sufficient; PATHEXT gates what runs.
    #[cfg(not(unix))]
    {
        true
    }
}
