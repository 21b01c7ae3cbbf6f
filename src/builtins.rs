use std::io::Write;
use std::sync::Weak;

use crate::aliases::{Aliases, SimpleOutput};
use crate::context::ShellContext;
use crate::resolver;
use crate::status::ProcStatus;

/// Constant reply of the `jobs`/`fg`/`bg` callables on platforms without
/// full job control.
pub const JOB_CONTROL_MSG: &str = "Job control not implemented on this platform.\n";

/// Install the default callables into a fresh alias table. `ctx` is the
/// context under construction; callables that need shell state upgrade it
/// at call time.
pub fn install(aliases: &mut Aliases, ctx: Weak<ShellContext>, has_evaluator: bool) {
    aliases.insert_simple("echo", |args, _stdin| {
        Ok(SimpleOutput::Stdout(format!("{}\n", args.join(" "))))
    });

    aliases.insert_simple("pwd", |_args, _stdin| {
        let dir = std::env::current_dir().map_err(|e| e.to_string())?;
        Ok(SimpleOutput::Stdout(format!("{}\n", dir.display())))
    });

    aliases.insert_streams("cd", |args, _stdin, _stdout, stderr| builtin_cd(args, stderr));

    {
        let ctx = ctx.clone();
        aliases.insert_streams("exit", move |args, _stdin, _stdout, stderr| {
            let Some(ctx) = ctx.upgrade() else {
                return Some(ProcStatus::Success(false));
            };
            match args.first() {
                None => ctx.request_exit(0),
                Some(arg) => match arg.parse::<i32>() {
                    Ok(code) => ctx.request_exit(code),
                    Err(_) => {
                        let _ = writeln!(stderr, "exit: {arg}: numeric argument required");
                        ctx.request_exit(2);
                        return Some(ProcStatus::Code(2));
                    }
                },
            }
            None
        });
    }

    aliases.insert_streams("export", |args, _stdin, _stdout, stderr| {
        let mut status = None;
        for arg in args {
            if let Some((key, value)) = arg.split_once('=') {
                // One pipeline runs at a time and spawn re-reads the
                // environment, so mutation from a proxy thread is visible on
                // the next spawn.
                unsafe { std::env::set_var(key, value) };
            } else {
                let _ = writeln!(stderr, "export: usage: export VAR=value");
                status = Some(ProcStatus::Code(1));
            }
        }
        status
    });

    aliases.insert_streams("unset", |args, _stdin, _stdout, _stderr| {
        for arg in args {
            unsafe { std::env::remove_var(arg) };
        }
        None
    });

    // Job-control queries are stubs on platforms without full POSIX job
    // control; the execution core tracks jobs regardless.
    for name in ["jobs", "fg", "bg"] {
        aliases.insert_simple(name, |_args, _stdin| {
            Ok(SimpleOutput::Both(None, Some(JOB_CONTROL_MSG.to_string())))
        });
    }

    {
        let ctx = ctx.clone();
        aliases.insert_streams("help", move |args, _stdin, stdout, stderr| {
            describe_names(&ctx, args, false, stdout, stderr)
        });
    }
    {
        let ctx = ctx.clone();
        aliases.insert_streams("superhelp", move |args, _stdin, stdout, stderr| {
            describe_names(&ctx, args, true, stdout, stderr)
        });
    }

    if has_evaluator {
        let eval_ctx = ctx.clone();
        aliases.insert_streams("evalx", move |args, _stdin, stdout, stderr| {
            let Some(ctx) = eval_ctx.upgrade() else {
                return Some(ProcStatus::Success(false));
            };
            let Some(evaluator) = ctx.evaluator() else {
                return Some(ProcStatus::Success(false));
            };
            match evaluator.eval(&args.join(" ")) {
                Ok(value) => {
                    let _ = writeln!(stdout, "{value}");
                    None
                }
                Err(message) => {
                    let _ = writeln!(stderr, "evalx: {message}");
                    Some(ProcStatus::Success(false))
                }
            }
        });

        let exec_ctx = ctx.clone();
        aliases.insert_streams("execx", move |args, _stdin, _stdout, stderr| {
            let Some(ctx) = exec_ctx.upgrade() else {
                return Some(ProcStatus::Success(false));
            };
            let Some(evaluator) = ctx.evaluator() else {
                return Some(ProcStatus::Success(false));
            };
            match evaluator.exec(&args.join(" ")) {
                Ok(()) => None,
                Err(message) => {
                    let _ = writeln!(stderr, "execx: {message}");
                    Some(ProcStatus::Success(false))
                }
            }
        });

        let compile_ctx = ctx;
        aliases.insert_streams("compilex", move |args, _stdin, _stdout, stderr| {
            let Some(ctx) = compile_ctx.upgrade() else {
                return Some(ProcStatus::Success(false));
            };
            let Some(evaluator) = ctx.evaluator() else {
                return Some(ProcStatus::Success(false));
            };
            match evaluator.compile(&args.join(" ")) {
                Ok(()) => None,
                Err(message) => {
                    let _ = writeln!(stderr, "compilex: {message}");
                    Some(ProcStatus::Success(false))
                }
            }
        });
    }
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> Option<ProcStatus> {
    let target = match args.first().map(String::as_str) {
        Some("-") => match std::env::var("OLDPWD") {
            Ok(previous) => previous,
            Err(_) => {
                let _ = writeln!(stderr, "cd: OLDPWD not set");
                return Some(ProcStatus::Code(1));
            }
        },
        Some(dir) => dir.to_string(),
        None => std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    };

    if let Ok(cwd) = std::env::current_dir() {
        unsafe { std::env::set_var("OLDPWD", cwd) };
    }

    if let Err(err) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {err}");
        return Some(ProcStatus::Code(1));
    }
    None
}

/// `help`/`superhelp`: describe what each name resolves to — an alias, a
/// callable, or a `PATH` hit. The detailed form adds file information.
fn describe_names(
    ctx: &Weak<ShellContext>,
    args: &[String],
    detailed: bool,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Option<ProcStatus> {
    let Some(ctx) = ctx.upgrade() else {
        return Some(ProcStatus::Success(false));
    };
    if args.is_empty() {
        let _ = writeln!(stderr, "help: usage: help NAME...");
        return Some(ProcStatus::Code(2));
    }

    let mut status = None;
    for name in args {
        let alias = {
            let aliases = ctx.aliases();
            aliases.raw(name).map(|value| match value {
                crate::aliases::AliasValue::Tokens(tokens) => {
                    format!("{name} is an alias for `{}'", tokens.join(" "))
                }
                crate::aliases::AliasValue::Callable(_) => format!("{name} is a shell callable"),
            })
        };
        if let Some(line) = alias {
            let _ = writeln!(stdout, "{line}");
            continue;
        }

        let env = ctx.env();
        match resolver::find_runnable(name, &env.path_dirs(), &env.pathext()) {
            Some(path) => {
                let _ = writeln!(stdout, "{name} is {}", path.display());
                if detailed {
                    if let Ok(meta) = path.metadata() {
                        let _ = writeln!(stdout, "    size: {} bytes", meta.len());
                    }
                }
            }
            None => {
                let _ = writeln!(stderr, "{name}: not found");
                status = Some(ProcStatus::Code(1));
            }
        }
    }
    status
}
