use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::SHELL_NAME;
use crate::aliases::Aliases;
use crate::ast::ListItem;
use crate::builtins;
use crate::error::ShellError;
use crate::executor::{self, RunOutcome};
use crate::expand;
use crate::jobs::JobTable;
use crate::parser;

/// Handle to an injected code evaluator, installed as the `evalx`/`execx`/
/// `compilex` callables at startup.
pub trait Evaluator: Send + Sync {
    /// Evaluate an expression and return its rendered value.
    fn eval(&self, code: &str) -> Result<String, String>;
    /// Execute statements for their side effects.
    fn exec(&self, code: &str) -> Result<(), String>;
    /// Check that the code compiles without running it.
    fn compile(&self, code: &str) -> Result<(), String>;
}

/// Read-only view over the process environment consumed at spawn time.
#[derive(Debug, Default, Clone, Copy)]
pub struct Env;

impl Env {
    /// Ordered `PATH` directories.
    pub fn path_dirs(&self) -> Vec<PathBuf> {
        match std::env::var_os("PATH") {
            Some(path) => std::env::split_paths(&path).collect(),
            None => Vec::new(),
        }
    }

    /// Ordered `PATHEXT` extensions, uppercased with their leading dot.
    pub fn pathext(&self) -> Vec<String> {
        let raw = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
        raw.split(';')
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_ascii_uppercase())
            .collect()
    }

    /// Detyped string map handed to OS spawn.
    pub fn detype(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// Explicit shell state threaded through the execution core: the alias
/// table, the job registry, the environment view, and the optional
/// evaluator. Shared as an `Arc` so proxy and composite worker threads can
/// reach back into it.
pub struct ShellContext {
    aliases: Mutex<Aliases>,
    jobs: Mutex<JobTable>,
    env: Env,
    evaluator: Option<Box<dyn Evaluator>>,
    exit: Mutex<Option<i32>>,
}

impl ShellContext {
    /// A context with the default builtin callables installed.
    pub fn new() -> Arc<ShellContext> {
        Self::with_evaluator(None)
    }

    /// A context with an injected evaluator; its `eval`/`exec`/`compile`
    /// surface is installed as shell callables.
    pub fn with_evaluator(evaluator: Option<Box<dyn Evaluator>>) -> Arc<ShellContext> {
        let has_evaluator = evaluator.is_some();
        Arc::new_cyclic(|weak: &Weak<ShellContext>| {
            let mut aliases = Aliases::new();
            builtins::install(&mut aliases, weak.clone(), has_evaluator);
            ShellContext {
                aliases: Mutex::new(aliases),
                jobs: Mutex::new(JobTable::new()),
                env: Env,
                evaluator,
                exit: Mutex::new(None),
            }
        })
    }

    pub fn aliases(&self) -> MutexGuard<'_, Aliases> {
        self.aliases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn evaluator(&self) -> Option<&dyn Evaluator> {
        self.evaluator.as_deref()
    }

    /// Ask the prompt loop to terminate with `code` after the current line.
    pub fn request_exit(&self, code: i32) {
        *self.exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
    }

    pub fn exit_requested(&self) -> Option<i32> {
        *self.exit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a command list, capturing the terminal stage's stdout.
    pub fn subproc_captured(self: &Arc<Self>, cmds: &[ListItem]) -> Result<String, ShellError> {
        match executor::run_subproc(self, cmds, true)? {
            RunOutcome::Captured(output) => Ok(output),
            RunOutcome::Status(_) | RunOutcome::Background => Ok(String::new()),
        }
    }

    /// Run a command list without capturing; true iff the terminal stage's
    /// normalised status is success.
    pub fn subproc_uncaptured(self: &Arc<Self>, cmds: &[ListItem]) -> Result<bool, ShellError> {
        match executor::run_subproc(self, cmds, false)? {
            RunOutcome::Status(status) => Ok(status.is_success()),
            RunOutcome::Captured(_) | RunOutcome::Background => Ok(true),
        }
    }

    /// Parse and run one input line, printing diagnostics the way the
    /// prompt loop reports them. Returns the shell-style exit code.
    pub fn run_line(self: &Arc<Self>, line: &str) -> i32 {
        let cmds = match parser::parse_line(line) {
            Ok(Some(cmds)) => expand::expand_command_list(&cmds),
            Ok(None) => return 0,
            Err(message) => {
                eprintln!("{message}");
                return 2;
            }
        };
        match executor::run_subproc(self, &cmds, false) {
            Ok(RunOutcome::Status(status)) => status.code(),
            Ok(RunOutcome::Captured(_) | RunOutcome::Background) => 0,
            Err(err) => {
                eprintln!("{SHELL_NAME}: subprocess mode: {err}");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathext_defaults_are_uppercased() {
        let env = Env;
        let exts = env.pathext();
        assert!(exts.contains(&".EXE".to_string()));
        assert!(exts.iter().all(|ext| ext.starts_with('.')));
    }

    #[test]
    fn detype_is_a_string_map() {
        let env = Env;
        // Spawn environments inherit everything the process sees.
        assert_eq!(env.detype().len(), std::env::vars().count());
    }

    #[test]
    fn default_context_carries_builtin_callables() {
        let ctx = ShellContext::new();
        let aliases = ctx.aliases();
        for name in ["echo", "cd", "pwd", "exit", "jobs", "fg", "bg", "help"] {
            assert!(aliases.contains_key(name), "missing builtin {name}");
        }
    }

    #[test]
    fn exit_request_round_trips() {
        let ctx = ShellContext::new();
        assert_eq!(ctx.exit_requested(), None);
        ctx.request_exit(3);
        assert_eq!(ctx.exit_requested(), Some(3));
    }
}
