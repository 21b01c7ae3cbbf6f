use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use os_pipe::PipeReader;

use crate::SHELL_NAME;
use crate::ast::{self, CommandList, ListItem, Stage};
use crate::context::ShellContext;
use crate::error::ShellError;
use crate::job_control;
use crate::jobs::JobRecord;
use crate::proxy::{ProcProxy, ProxyInput, ProxyOutput};
use crate::redirect::{self, ReadTarget, StreamBindings, WriteTarget};
use crate::resolver::{self, ExecPlan};
use crate::status::{self, ProcStatus};
use crate::suggest;

/// Result of running a command list.
#[derive(Debug)]
pub enum RunOutcome {
    /// Captured stdout of the terminal stage.
    Captured(String),
    /// Exit status of the terminal stage.
    Status(ProcStatus),
    /// The pipeline was launched into the background; its status is unknown.
    Background,
}

/// Run a command list to completion (or launch it into the background).
///
/// With `captured` set, the terminal stage's stdout is collected and
/// returned as a string; otherwise the terminal stage writes through to the
/// shell's stdout and the normalised exit status is returned.
pub fn run_subproc(
    ctx: &Arc<ShellContext>,
    cmds: &[ListItem],
    captured: bool,
) -> Result<RunOutcome, ShellError> {
    let result = run_list(ctx, cmds, captured, None)?;
    Ok(match result.status {
        None => RunOutcome::Background,
        Some(_) if captured => RunOutcome::Captured(result.output.unwrap_or_default()),
        Some(status) => RunOutcome::Status(status),
    })
}

/// Outcome of one (possibly nested) pipeline run. `status` is `None` when
/// the pipeline went to the background.
struct ListResult {
    status: Option<ProcStatus>,
    output: Option<String>,
}

/// The reentrant pipeline core: composite stages call back into this with
/// their sub-command-lists, threading all shared state through `ctx`.
fn run_list(
    ctx: &Arc<ShellContext>,
    cmds: &[ListItem],
    captured: bool,
    initial_stdin: Option<StageOutput>,
) -> Result<ListResult, ShellError> {
    let mut items = cmds;
    let mut background = false;
    if let Some(ListItem::Background) = items.last() {
        background = true;
        items = &items[..items.len() - 1];
    }

    // Phase 1: strip redirections and resolve every stage before anything
    // starts, so redirection and resolver errors abort the whole pipeline.
    let mut plans: Vec<StagePlan> = Vec::new();
    for item in items {
        let stage = match item {
            ListItem::Stage(stage) => stage,
            ListItem::Pipe | ListItem::Background => continue,
        };
        match stage {
            Stage::Cmd(tokens) => {
                let mut tokens = tokens.clone();
                let streams = redirect::extract(&mut tokens)?;
                if tokens.is_empty() {
                    continue;
                }
                let plan = resolver::resolve(ctx, tokens)?;
                plans.push(StagePlan::Exec { plan, streams });
            }
            Stage::And(left, right) => plans.push(StagePlan::Composite {
                kind: CompositeKind::And,
                left: left.clone(),
                right: right.clone(),
            }),
            Stage::Or(left, right) => plans.push(StagePlan::Composite {
                kind: CompositeKind::Or,
                left: left.clone(),
                right: right.clone(),
            }),
        }
    }

    // A zero-stage pipeline is a no-op success.
    if plans.is_empty() {
        return Ok(ListResult {
            status: Some(ProcStatus::Success(true)),
            output: captured.then(String::new),
        });
    }

    // Phase 2: instantiate the stages left to right, chaining stdout into
    // stdin. Moving a stage's stdout handle into the next stage's stdio is
    // what closes the shell's copy and lets EOF propagate.
    let mut procs: Vec<StageProc> = Vec::new();
    let mut prev = initial_stdin;
    let count = plans.len();
    for (ix, plan) in plans.into_iter().enumerate() {
        let last = ix + 1 == count;
        let built = match plan {
            StagePlan::Exec { plan, streams } => {
                build_stage(ctx, plan, streams, prev.take(), last, captured)
            }
            StagePlan::Composite { kind, left, right } => {
                CompositeProc::spawn(Arc::clone(ctx), kind, left, right, captured, prev.take())
                    .map(StageProc::Composite)
                    .map_err(ShellError::Pipe)
            }
        };
        let mut stage = match built {
            Ok(stage) => stage,
            Err(err) => {
                // Reap whatever already started before giving up.
                for proc in &mut procs {
                    let _ = proc.wait();
                }
                return Err(err);
            }
        };
        if !last {
            prev = stage.take_stdout();
        }
        procs.push(stage);
    }

    let mut terminal = match procs.pop() {
        Some(stage) => stage,
        None => {
            return Ok(ListResult {
                status: Some(ProcStatus::Success(true)),
                output: captured.then(String::new),
            });
        }
    };

    let pids: Vec<u32> = procs
        .iter()
        .chain(std::iter::once(&terminal))
        .filter_map(StageProc::pid)
        .collect();

    if background {
        // Background jobs are registered regardless of terminal kind so that
        // shutdown cleanup can reach them.
        ctx.jobs().add_job(JobRecord {
            cmds: ast::render(cmds),
            pids,
            obj: Some(terminal),
            bg: true,
        });
        return Ok(ListResult { status: None, output: None });
    }

    // Pure in-process pipelines have no OS pid to track and skip the
    // registry; everything else becomes the active foreground job.
    let active = match &terminal {
        StageProc::Child(_) => Some(ctx.jobs().add_job(JobRecord {
            cmds: ast::render(cmds),
            pids,
            obj: None,
            bg: false,
        })),
        _ => None,
    };

    // Drain captured stdout to EOF before waiting, so a terminal stage that
    // writes more than a pipe buffer cannot deadlock against our wait.
    let mut output = None;
    if captured && !matches!(terminal, StageProc::Composite(_)) {
        let mut text = String::new();
        if let Some(mut reader) = terminal.take_stdout() {
            let _ = reader.read_to_string(&mut text);
        }
        output = Some(text);
    }

    let status = wait_for_active_job(ctx, active, &mut terminal);

    if captured && output.is_none() {
        // Composite stages buffer their inner run's capture in memory, so it
        // is only available once the wait completes.
        output = Some(match &mut terminal {
            StageProc::Composite(composite) => composite.take_output().unwrap_or_default(),
            _ => String::new(),
        });
    }

    // Reap the non-terminal stages so they do not linger as zombies.
    for proc in &mut procs {
        let _ = proc.wait();
    }

    Ok(ListResult { status: Some(status), output })
}

/// Block until the foreground job's terminal stage completes (thread join
/// for in-process stages, OS wait otherwise), then clear its activity in
/// the registry. The registry lock is never held across the wait: composite
/// branches register jobs of their own from their worker threads.
fn wait_for_active_job(
    ctx: &Arc<ShellContext>,
    active: Option<usize>,
    terminal: &mut StageProc,
) -> ProcStatus {
    let status = terminal.wait();
    if let Some(id) = active {
        ctx.jobs().complete(id, status);
    }
    status
}

/// A stage after redirection stripping and command resolution, ready to be
/// instantiated.
enum StagePlan {
    Exec { plan: ExecPlan, streams: StreamBindings },
    Composite { kind: CompositeKind, left: CommandList, right: CommandList },
}

#[derive(Debug, Clone, Copy)]
pub enum CompositeKind {
    And,
    Or,
}

/// The stdout handle of a running stage, consumable as the next stage's
/// stdin or drained for captured mode.
pub enum StageOutput {
    Child(ChildStdout),
    Pipe(PipeReader),
    /// Captured text of a composite stage's inner run.
    Buffer(Cursor<Vec<u8>>),
}

impl Read for StageOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StageOutput::Child(stdout) => stdout.read(buf),
            StageOutput::Pipe(reader) => reader.read(buf),
            StageOutput::Buffer(cursor) => cursor.read(buf),
        }
    }
}

/// An OS child stage. `stdout` holds the read end when the pipe had to be
/// created by hand (stderr merge), instead of through `Stdio::piped`.
pub struct OsChild {
    pub child: Child,
    stdout: Option<PipeReader>,
}

/// A live pipeline stage: an OS child, an in-process proc-proxy, or a
/// short-circuit composite.
pub enum StageProc {
    Child(OsChild),
    Proxy(ProcProxy),
    Composite(CompositeProc),
}

impl StageProc {
    /// OS process id; `None` for in-process stages.
    pub fn pid(&self) -> Option<u32> {
        match self {
            StageProc::Child(os) => Some(os.child.id()),
            StageProc::Proxy(_) | StageProc::Composite(_) => None,
        }
    }

    /// Take the stage's stdout handle, if any remains.
    pub fn take_stdout(&mut self) -> Option<StageOutput> {
        match self {
            StageProc::Child(os) => os
                .child
                .stdout
                .take()
                .map(StageOutput::Child)
                .or_else(|| os.stdout.take().map(StageOutput::Pipe)),
            StageProc::Proxy(proxy) => proxy.stdout.take().map(StageOutput::Pipe),
            StageProc::Composite(composite) => composite
                .take_output()
                .map(|text| StageOutput::Buffer(Cursor::new(text.into_bytes()))),
        }
    }

    /// Block until the stage completes: OS wait or worker-thread join.
    pub fn wait(&mut self) -> ProcStatus {
        match self {
            StageProc::Child(os) => match os.child.wait() {
                Ok(exit) => ProcStatus::Code(status::exit_code(exit)),
                Err(_) => ProcStatus::Code(1),
            },
            StageProc::Proxy(proxy) => proxy.wait(),
            StageProc::Composite(composite) => composite.wait(),
        }
    }

    /// Non-blocking status check; `None` while still running.
    pub fn poll(&mut self) -> Option<ProcStatus> {
        match self {
            StageProc::Child(os) => os
                .child
                .try_wait()
                .ok()
                .flatten()
                .map(|exit| ProcStatus::Code(status::exit_code(exit))),
            StageProc::Proxy(proxy) => proxy.poll(),
            StageProc::Composite(composite) => composite.poll(),
        }
    }

    /// Best-effort termination, for shutdown cleanup.
    pub fn kill(&mut self) {
        if let StageProc::Child(os) = self {
            let _ = os.child.kill();
        }
    }
}

// ── Stage construction ──

enum StdinWire {
    Default,
    Prev(StageOutput),
    File(File),
    Fd(i32),
}

enum StdoutWire {
    Default,
    Pipe,
    File(File),
    Fd(i32),
}

fn build_stage(
    ctx: &Arc<ShellContext>,
    plan: ExecPlan,
    streams: StreamBindings,
    prev: Option<StageOutput>,
    last: bool,
    captured: bool,
) -> Result<StageProc, ShellError> {
    let StreamBindings { stdin, stdout, stderr } = streams;

    // Wire stdin: an explicit binding and an upstream pipe cannot coexist.
    let stdin_wire = match (stdin, prev) {
        (Some(_), Some(_)) => return Err(ShellError::MultipleStdin),
        (Some(ReadTarget::File(file)), None) => StdinWire::File(file),
        (Some(ReadTarget::Fd(fd)), None) => StdinWire::Fd(fd),
        (None, Some(prev)) => StdinWire::Prev(prev),
        (None, None) => StdinWire::Default,
    };

    // Wire stdout: explicit redirection is only legal on the terminal stage
    // of an uncaptured pipeline; intermediate and captured stages pipe.
    let stdout_wire = match stdout {
        Some(_) if captured || !last => return Err(ShellError::MultipleRedirects("stdout")),
        Some(WriteTarget::File(file)) => StdoutWire::File(file),
        Some(WriteTarget::Fd(fd)) => StdoutWire::Fd(fd),
        Some(WriteTarget::Merge) => {
            return Err(ShellError::UnrecognizedRedirect(">".to_string()));
        }
        None if captured || !last => StdoutWire::Pipe,
        None => StdoutWire::Default,
    };

    match plan {
        ExecPlan::Callable(callable, args) => {
            let stdin = match stdin_wire {
                StdinWire::Default => ProxyInput::Empty,
                StdinWire::Prev(prev) => ProxyInput::Reader(Box::new(prev)),
                StdinWire::File(file) => ProxyInput::File(file),
                StdinWire::Fd(fd) => ProxyInput::Fd(fd),
            };
            let stdout = match stdout_wire {
                StdoutWire::Default => ProxyOutput::Inherit,
                StdoutWire::Pipe => ProxyOutput::Pipe,
                StdoutWire::File(file) => ProxyOutput::File(file),
                StdoutWire::Fd(fd) => ProxyOutput::Fd(fd),
            };
            let stderr = match stderr {
                None => ProxyOutput::Inherit,
                Some(WriteTarget::Merge) => ProxyOutput::MergeToStdout,
                Some(WriteTarget::File(file)) => ProxyOutput::File(file),
                Some(WriteTarget::Fd(fd)) => ProxyOutput::Fd(fd),
            };
            ProcProxy::new(callable, args, stdin, stdout, stderr, last)
                .map(StageProc::Proxy)
                .map_err(ShellError::Pipe)
        }
        ExecPlan::External(argv) => spawn_external(ctx, argv, stdin_wire, stdout_wire, stderr),
    }
}

fn spawn_external(
    ctx: &Arc<ShellContext>,
    argv: Vec<String>,
    stdin_wire: StdinWire,
    stdout_wire: StdoutWire,
    stderr: Option<WriteTarget>,
) -> Result<StageProc, ShellError> {
    let Some(program) = argv.first().cloned() else {
        return Err(ShellError::CommandNotFound {
            name: String::new(),
            suggestions: String::new(),
        });
    };

    let mut command = Command::new(&program);
    command.args(&argv[1..]);
    command.env_clear();
    command.envs(ctx.env().detype());
    job_control::prepare_child(&mut command);

    // A composite's buffered output cannot convert into a child's stdio
    // directly; it is fed through a pipe after the spawn.
    let (stdin_stdio, feed): (Stdio, Option<Vec<u8>>) = match stdin_wire {
        StdinWire::Default => (Stdio::inherit(), None),
        StdinWire::Prev(StageOutput::Child(stdout)) => (Stdio::from(stdout), None),
        StdinWire::Prev(StageOutput::Pipe(reader)) => (Stdio::from(reader), None),
        StdinWire::Prev(StageOutput::Buffer(cursor)) => (Stdio::piped(), Some(cursor.into_inner())),
        StdinWire::File(file) => (Stdio::from(file), None),
        StdinWire::Fd(fd) => (Stdio::from(fd_file(fd)?), None),
    };

    // Materialise stdout and stderr together: merging stderr into stdout
    // needs both ends to share one handle.
    let merge = matches!(stderr, Some(WriteTarget::Merge));
    let mut manual_stdout: Option<PipeReader> = None;
    let (stdout_stdio, stderr_stdio): (Stdio, Stdio) = match stdout_wire {
        StdoutWire::Pipe if merge => {
            let (reader, writer) = os_pipe::pipe().map_err(ShellError::Pipe)?;
            manual_stdout = Some(reader);
            let clone = writer.try_clone().map_err(ShellError::Pipe)?;
            (Stdio::from(clone), Stdio::from(writer))
        }
        StdoutWire::Pipe => (Stdio::piped(), stderr_stdio(stderr)?),
        StdoutWire::File(file) if merge => {
            let clone = file.try_clone().map_err(ShellError::Pipe)?;
            (Stdio::from(clone), Stdio::from(file))
        }
        StdoutWire::File(file) => (Stdio::from(file), stderr_stdio(stderr)?),
        StdoutWire::Fd(fd) if merge => (Stdio::from(fd_file(fd)?), Stdio::from(fd_file(fd)?)),
        StdoutWire::Fd(fd) => (Stdio::from(fd_file(fd)?), stderr_stdio(stderr)?),
        StdoutWire::Default if merge => (Stdio::inherit(), inherited_stdout()?),
        StdoutWire::Default => (Stdio::inherit(), stderr_stdio(stderr)?),
    };

    command.stdin(stdin_stdio).stdout(stdout_stdio).stderr(stderr_stdio);

    let mut child = command.spawn().map_err(|err| spawn_error(ctx, &program, err))?;

    if let Some(bytes) = feed {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&bytes);
        }
    }

    Ok(StageProc::Child(OsChild { child, stdout: manual_stdout }))
}

fn stderr_stdio(stderr: Option<WriteTarget>) -> Result<Stdio, ShellError> {
    Ok(match stderr {
        None => Stdio::inherit(),
        Some(WriteTarget::File(file)) => Stdio::from(file),
        Some(WriteTarget::Fd(fd)) => Stdio::from(fd_file(fd)?),
        // Merge is handled alongside stdout materialisation.
        Some(WriteTarget::Merge) => Stdio::inherit(),
    })
}

/// stderr merged into an inherited stdout: duplicate the shell's own fd 1.
#[cfg(unix)]
fn inherited_stdout() -> Result<Stdio, ShellError> {
    Ok(Stdio::from(fd_file(1)?))
}

#[cfg(not(unix))]
fn inherited_stdout() -> Result<Stdio, ShellError> {
    Ok(Stdio::inherit())
}

#[cfg(unix)]
fn fd_file(fd: i32) -> Result<File, ShellError> {
    redirect::dup_fd(fd).map_err(ShellError::Pipe)
}

#[cfg(not(unix))]
fn fd_file(_fd: i32) -> Result<File, ShellError> {
    Err(ShellError::UnrecognizedRedirect("fd".to_string()))
}

fn spawn_error(ctx: &Arc<ShellContext>, name: &str, err: io::Error) -> ShellError {
    match err.kind() {
        io::ErrorKind::NotFound => {
            let aliases = ctx.aliases().names();
            let suggestions = suggest::suggest_commands(name, &aliases, &ctx.env().path_dirs());
            ShellError::CommandNotFound { name: name.to_string(), suggestions }
        }
        io::ErrorKind::PermissionDenied => ShellError::PermissionDenied(name.to_string()),
        _ => ShellError::Spawn { name: name.to_string(), source: err },
    }
}

// ── Composite stages ──

/// A short-circuit `and`/`or` stage: a worker thread that reentrantly runs
/// the two sub-command-lists, strictly left to right, and records the
/// combined status. Composites never open OS pipes of their own; a captured
/// inner run is buffered in memory.
pub struct CompositeProc {
    thread: Option<JoinHandle<()>>,
    status: Arc<Mutex<Option<ProcStatus>>>,
    output: Arc<Mutex<Option<String>>>,
}

impl CompositeProc {
    pub fn spawn(
        ctx: Arc<ShellContext>,
        kind: CompositeKind,
        left: CommandList,
        right: CommandList,
        captured: bool,
        input: Option<StageOutput>,
    ) -> io::Result<CompositeProc> {
        let status = Arc::new(Mutex::new(None));
        let output = Arc::new(Mutex::new(None));
        let status_slot = Arc::clone(&status);
        let output_slot = Arc::clone(&output);

        let thread = thread::Builder::new()
            .name("composite-stage".to_string())
            .spawn(move || {
                let (status, text) = run_composite(&ctx, kind, &left, &right, captured, input);
                *output_slot.lock().unwrap_or_else(PoisonError::into_inner) = text;
                *status_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
            })?;

        Ok(CompositeProc { thread: Some(thread), status, output })
    }

    pub fn wait(&mut self) -> ProcStatus {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.poll().unwrap_or(ProcStatus::Success(false))
    }

    pub fn poll(&self) -> Option<ProcStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The captured text of the inner run; available once completed.
    pub fn take_output(&mut self) -> Option<String> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

fn run_composite(
    ctx: &Arc<ShellContext>,
    kind: CompositeKind,
    left: &[ListItem],
    right: &[ListItem],
    captured: bool,
    input: Option<StageOutput>,
) -> (ProcStatus, Option<String>) {
    // The upstream pipe, if any, feeds the first branch; by the time the
    // second branch runs it has been drained to EOF.
    let first = match run_list(ctx, left, captured, input) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("{SHELL_NAME}: subprocess mode: {err}");
            return (ProcStatus::Success(false), None);
        }
    };
    let first_ok = first.status.map(ProcStatus::is_success).unwrap_or(true);

    let short_circuit = match kind {
        CompositeKind::And => !first_ok,
        CompositeKind::Or => first_ok,
    };
    if short_circuit {
        return (ProcStatus::Success(first_ok), first.output);
    }

    match run_list(ctx, right, captured, None) {
        Ok(second) => {
            let ok = second.status.map(ProcStatus::is_success).unwrap_or(true);
            (ProcStatus::Success(ok), second.output)
        }
        Err(err) => {
            eprintln!("{SHELL_NAME}: subprocess mode: {err}");
            (ProcStatus::Success(false), None)
        }
    }
}
