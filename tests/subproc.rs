//! Library-level pipeline scenarios: proxies, externals, composites,
//! redirections, and capture mode driven through the public context API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use coral::aliases::SimpleOutput;
use coral::ast::{CommandList, ListItem, Stage};
use coral::context::ShellContext;
use coral::error::ShellError;
use coral::executor::{self, RunOutcome};

fn cmd(tokens: &[&str]) -> ListItem {
    ListItem::Stage(Stage::Cmd(tokens.iter().map(|s| s.to_string()).collect()))
}

fn pipeline(stages: &[&[&str]]) -> CommandList {
    let mut list = Vec::new();
    for (ix, stage) in stages.iter().enumerate() {
        if ix > 0 {
            list.push(ListItem::Pipe);
        }
        list.push(cmd(stage));
    }
    list
}

#[test]
fn captured_callable_pipeline_returns_its_stdout() {
    let ctx = ShellContext::new();
    let out = ctx.subproc_captured(&pipeline(&[&["echo", "hi"]])).unwrap();
    assert_eq!(out, "hi\n");
}

#[test]
fn pure_callable_pipelines_skip_the_job_registry() {
    let ctx = ShellContext::new();
    ctx.subproc_captured(&pipeline(&[&["echo", "x"]])).unwrap();
    assert!(ctx.jobs().is_empty());
}

#[test]
fn zero_stage_pipeline_is_a_noop_success() {
    let ctx = ShellContext::new();
    assert_eq!(ctx.subproc_captured(&[]).unwrap(), "");
    assert!(ctx.subproc_uncaptured(&[]).unwrap());
}

#[test]
fn uncaptured_callable_pipeline_reports_success() {
    let ctx = ShellContext::new();
    ctx.aliases().insert_simple("nothing", |_args, _stdin| Ok(SimpleOutput::Empty));
    assert!(ctx.subproc_uncaptured(&pipeline(&[&["nothing"]])).unwrap());

    ctx.aliases().insert_simple("broken", |_args, _stdin| Err("nope".to_string()));
    assert!(!ctx.subproc_uncaptured(&pipeline(&[&["broken"]])).unwrap());
}

#[test]
fn alias_expansion_binds_leading_arguments() {
    let ctx = ShellContext::new();
    ctx.aliases().insert_str("greet", "echo hello");
    let out = ctx.subproc_captured(&pipeline(&[&["greet", "world"]])).unwrap();
    assert_eq!(out, "hello world\n");
}

#[cfg(unix)]
#[test]
fn callable_pipes_into_external_stage() {
    let ctx = ShellContext::new();
    let out = ctx
        .subproc_captured(&pipeline(&[&["echo", "hi"], &["cat"]]))
        .unwrap();
    assert_eq!(out, "hi\n");
}

#[cfg(unix)]
#[test]
fn external_pipes_into_callable_stage() {
    let ctx = ShellContext::new();
    ctx.aliases().insert_simple("shout", |_args, stdin| {
        Ok(SimpleOutput::Stdout(stdin.unwrap_or("").to_uppercase()))
    });
    let out = ctx
        .subproc_captured(&pipeline(&[&["sh", "-c", "echo abc"], &["shout"]]))
        .unwrap();
    assert_eq!(out, "ABC\n");
}

#[cfg(unix)]
#[test]
fn three_stage_pipeline_chains_eof() {
    let ctx = ShellContext::new();
    let out = ctx
        .subproc_captured(&pipeline(&[&["echo", "chain"], &["cat"], &["cat"]]))
        .unwrap();
    assert_eq!(out, "chain\n");
}

#[cfg(unix)]
#[test]
fn redirected_stdout_lands_in_the_file() {
    let ctx = ShellContext::new();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out");
    let out_str = out_path.to_str().unwrap();

    let ok = ctx
        .subproc_uncaptured(&pipeline(&[&["echo", "abc"], &["cat", ">", out_str]]))
        .unwrap();
    assert!(ok);
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "abc\n");
}

#[cfg(unix)]
#[test]
fn append_mode_accumulates() {
    let ctx = ShellContext::new();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("log");
    let out_str = out_path.to_str().unwrap();

    ctx.subproc_uncaptured(&pipeline(&[&["sh", "-c", "echo one", ">", out_str]]))
        .unwrap();
    ctx.subproc_uncaptured(&pipeline(&[&["sh", "-c", "echo two", ">>", out_str]]))
        .unwrap();
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "one\ntwo\n");
}

#[cfg(unix)]
#[test]
fn stdin_redirect_feeds_the_stage() {
    let ctx = ShellContext::new();
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("input");
    std::fs::write(&in_path, "from file\n").unwrap();

    let out = ctx
        .subproc_captured(&pipeline(&[&["cat", "<", in_path.to_str().unwrap()]]))
        .unwrap();
    assert_eq!(out, "from file\n");
}

#[cfg(unix)]
#[test]
fn merged_stderr_flows_into_the_pipe() {
    let ctx = ShellContext::new();
    let out = ctx
        .subproc_captured(&pipeline(&[
            &["sh", "-c", "echo oops 1>&2", "2>1"],
            &["cat"],
        ]))
        .unwrap();
    assert_eq!(out, "oops\n");
}

#[test]
fn captured_mode_rejects_explicit_stdout_redirect() {
    let ctx = ShellContext::new();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out");

    let err = ctx
        .subproc_captured(&pipeline(&[&["echo", "x", ">", out_path.to_str().unwrap()]]))
        .unwrap_err();
    assert!(matches!(err, ShellError::MultipleRedirects("stdout")));
}

#[test]
fn piped_stage_rejects_explicit_stdin() {
    let ctx = ShellContext::new();
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("input");
    std::fs::write(&in_path, "data").unwrap();

    let mut cmds = pipeline(&[&["echo", "x"]]);
    cmds.push(ListItem::Pipe);
    cmds.push(cmd(&["cat", "<", in_path.to_str().unwrap()]));
    let err = ctx.subproc_uncaptured(&cmds).unwrap_err();
    assert!(matches!(err, ShellError::MultipleStdin));
}

#[test]
fn missing_command_reports_not_found() {
    let ctx = ShellContext::new();
    let err = ctx
        .subproc_uncaptured(&pipeline(&[&["coral-no-such-command-xyz"]]))
        .unwrap_err();
    match err {
        ShellError::CommandNotFound { name, .. } => {
            assert_eq!(name, "coral-no-such-command-xyz");
        }
        other => panic!("expected CommandNotFound, got {other:?}"),
    }
}

// ── Composite stages ──

/// A context with `ok`, `fail`, and `mark` callables; `mark` flips the flag
/// so short-circuit behaviour is observable as a side effect.
fn composite_ctx() -> (Arc<ShellContext>, Arc<AtomicBool>) {
    let ctx = ShellContext::new();
    let flag = Arc::new(AtomicBool::new(false));
    {
        let mut aliases = ctx.aliases();
        aliases.insert_simple("ok", |_args, _stdin| Ok(SimpleOutput::Empty));
        aliases.insert_simple("fail", |_args, _stdin| Err("failed".to_string()));
        let marker = Arc::clone(&flag);
        aliases.insert_simple("mark", move |_args, _stdin| {
            marker.store(true, Ordering::SeqCst);
            Ok(SimpleOutput::Stdout("marked\n".to_string()))
        });
    }
    (ctx, flag)
}

#[test]
fn and_short_circuits_on_failure() {
    let (ctx, marked) = composite_ctx();
    let cmds = vec![ListItem::Stage(Stage::And(
        pipeline(&[&["fail"]]),
        pipeline(&[&["mark"]]),
    ))];
    assert!(!ctx.subproc_uncaptured(&cmds).unwrap());
    assert!(!marked.load(Ordering::SeqCst), "cmd2 must not run");
}

#[test]
fn and_runs_second_command_on_success() {
    let (ctx, marked) = composite_ctx();
    let cmds = vec![ListItem::Stage(Stage::And(
        pipeline(&[&["ok"]]),
        pipeline(&[&["mark"]]),
    ))];
    assert!(ctx.subproc_uncaptured(&cmds).unwrap());
    assert!(marked.load(Ordering::SeqCst));
}

#[test]
fn or_short_circuits_on_success() {
    let (ctx, marked) = composite_ctx();
    let cmds = vec![ListItem::Stage(Stage::Or(
        pipeline(&[&["ok"]]),
        pipeline(&[&["mark"]]),
    ))];
    assert!(ctx.subproc_uncaptured(&cmds).unwrap());
    assert!(!marked.load(Ordering::SeqCst), "cmd2 must not run");
}

#[test]
fn or_recovers_from_failure() {
    let (ctx, marked) = composite_ctx();
    let cmds = vec![ListItem::Stage(Stage::Or(
        pipeline(&[&["fail"]]),
        pipeline(&[&["mark"]]),
    ))];
    assert!(ctx.subproc_uncaptured(&cmds).unwrap());
    assert!(marked.load(Ordering::SeqCst));
}

#[test]
fn captured_composite_returns_the_branch_output() {
    let (ctx, _marked) = composite_ctx();
    let cmds = vec![ListItem::Stage(Stage::And(
        pipeline(&[&["ok"]]),
        pipeline(&[&["mark"]]),
    ))];
    let out = ctx.subproc_captured(&cmds).unwrap();
    assert_eq!(out, "marked\n");
}

// ── Installed callables ──

struct FakeEvaluator;

impl coral::context::Evaluator for FakeEvaluator {
    fn eval(&self, code: &str) -> Result<String, String> {
        Ok(format!("eval:{code}"))
    }
    fn exec(&self, _code: &str) -> Result<(), String> {
        Ok(())
    }
    fn compile(&self, code: &str) -> Result<(), String> {
        if code.contains("bad") { Err("does not compile".to_string()) } else { Ok(()) }
    }
}

#[test]
fn evaluator_handle_is_reachable_through_evalx() {
    let ctx = ShellContext::with_evaluator(Some(Box::new(FakeEvaluator)));
    let out = ctx.subproc_captured(&pipeline(&[&["evalx", "1", "+", "1"]])).unwrap();
    assert_eq!(out, "eval:1 + 1\n");

    assert!(ctx.subproc_uncaptured(&pipeline(&[&["execx", "whatever"]])).unwrap());
    assert!(ctx.subproc_uncaptured(&pipeline(&[&["compilex", "fine"]])).unwrap());
    assert!(!ctx.subproc_uncaptured(&pipeline(&[&["compilex", "bad"]])).unwrap());
}

#[test]
fn help_describes_aliases_and_callables() {
    let ctx = ShellContext::new();
    ctx.aliases().insert_str("ll", "ls -l");

    let out = ctx.subproc_captured(&pipeline(&[&["help", "echo"]])).unwrap();
    assert!(out.contains("echo is a shell callable"), "help said: {out}");

    let out = ctx.subproc_captured(&pipeline(&[&["help", "ll"]])).unwrap();
    assert!(out.contains("ll is an alias for `ls -l'"), "help said: {out}");

    assert!(!ctx.subproc_uncaptured(&pipeline(&[&["help", "coral-nope-xyz"]])).unwrap());
}

// ── Background ──

#[cfg(unix)]
#[test]
fn background_pipeline_returns_immediately_and_registers() {
    let ctx = ShellContext::new();
    let mut cmds = pipeline(&[&["sh", "-c", "sleep 5"]]);
    cmds.push(ListItem::Background);

    let outcome = executor::run_subproc(&ctx, &cmds, false).unwrap();
    assert!(matches!(outcome, RunOutcome::Background));
    assert_eq!(ctx.jobs().len(), 1);

    ctx.jobs().kill_all_jobs();
    assert!(ctx.jobs().is_empty());
}

#[test]
fn background_proxy_pipeline_is_registered_too() {
    let ctx = ShellContext::new();
    let mut cmds = pipeline(&[&["echo", "quiet"]]);
    cmds.push(ListItem::Background);

    let outcome = executor::run_subproc(&ctx, &cmds, true).unwrap();
    assert!(matches!(outcome, RunOutcome::Background));
    // The captured entry point reports no stdout string for background runs.
    assert_eq!(ctx.jobs().len(), 1);

    // The proxy finishes promptly; a reap sweep then clears it.
    std::thread::sleep(std::time::Duration::from_millis(100));
    let messages = ctx.jobs().reap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Done"));
    assert!(ctx.jobs().is_empty());
}
