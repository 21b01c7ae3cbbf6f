use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use os_pipe::{PipeReader, PipeWriter, pipe};

use crate::aliases::{Callable, SimpleOutput};
use crate::status::ProcStatus;

/// Where a proxy's stdin comes from.
pub enum ProxyInput {
    /// No binding: the callable reads an empty stream.
    Empty,
    /// Allocate a pipe; the parent keeps the write end.
    Pipe,
    DevNull,
    File(File),
    /// An inherited file descriptor, duplicated into the proxy.
    Fd(i32),
    /// An already-open reader, e.g. the previous stage's stdout.
    Reader(Box<dyn Read + Send>),
}

/// Where a proxy's stdout or stderr goes.
pub enum ProxyOutput {
    /// No binding: write through to the shell's own stream.
    Inherit,
    /// Allocate a pipe; the parent keeps the read end.
    Pipe,
    DevNull,
    File(File),
    /// An inherited file descriptor, duplicated into the proxy.
    Fd(i32),
    /// stderr only: write to the same sink as stdout.
    MergeToStdout,
}

/// An in-process callable running as a pseudo-subprocess.
///
/// The callable executes on a dedicated worker thread with pipe-backed
/// standard streams, presenting the same surface as an OS child: parent-side
/// stream handles, a blocking [`wait`](ProcProxy::wait), and a
/// [`poll`](ProcProxy::poll)-able return code.
pub struct ProcProxy {
    thread: Option<JoinHandle<()>>,
    /// Parent-side write end of the callable's stdin, when piped.
    pub stdin: Option<PipeWriter>,
    /// Parent-side read end of the callable's stdout, when piped.
    pub stdout: Option<PipeReader>,
    /// Parent-side read end of the callable's stderr, when piped.
    pub stderr: Option<PipeReader>,
    status: Arc<Mutex<Option<ProcStatus>>>,
}

impl ProcProxy {
    /// Wire up the streams and start the worker thread.
    ///
    /// `text_mode` applies universal-newline translation to the input handed
    /// to simple callables.
    pub fn new(
        callable: Callable,
        args: Vec<String>,
        stdin: ProxyInput,
        stdout: ProxyOutput,
        stderr: ProxyOutput,
        text_mode: bool,
    ) -> io::Result<ProcProxy> {
        let mut parent_stdin = None;
        let has_stdin = !matches!(stdin, ProxyInput::Empty | ProxyInput::DevNull);
        let child_stdin: Box<dyn Read + Send> = match stdin {
            ProxyInput::Empty | ProxyInput::DevNull => Box::new(io::empty()),
            ProxyInput::Pipe => {
                let (reader, writer) = pipe()?;
                parent_stdin = Some(writer);
                Box::new(reader)
            }
            ProxyInput::File(file) => Box::new(file),
            ProxyInput::Fd(fd) => Box::new(fd_reader(fd)?),
            ProxyInput::Reader(reader) => reader,
        };

        let mut parent_stdout = None;
        let stdout_sink = match stdout {
            ProxyOutput::Inherit => Sink::Stdout,
            ProxyOutput::Pipe => {
                let (reader, writer) = pipe()?;
                parent_stdout = Some(reader);
                Sink::Pipe(writer)
            }
            ProxyOutput::DevNull => Sink::Null,
            ProxyOutput::File(file) => Sink::File(file),
            ProxyOutput::Fd(fd) => Sink::File(fd_writer(fd)?),
            ProxyOutput::MergeToStdout => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "stdout cannot merge into itself",
                ));
            }
        };

        let mut parent_stderr = None;
        let stderr_sink = match stderr {
            ProxyOutput::Inherit => Sink::Stderr,
            ProxyOutput::Pipe => {
                let (reader, writer) = pipe()?;
                parent_stderr = Some(reader);
                Sink::Pipe(writer)
            }
            ProxyOutput::DevNull => Sink::Null,
            ProxyOutput::File(file) => Sink::File(file),
            ProxyOutput::Fd(fd) => Sink::File(fd_writer(fd)?),
            ProxyOutput::MergeToStdout => stdout_sink.try_clone()?,
        };

        let status = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name("proc-proxy".to_string())
            .spawn(move || {
                let result = run_callable(
                    callable,
                    &args,
                    child_stdin,
                    has_stdin,
                    stdout_sink,
                    stderr_sink,
                    text_mode,
                );
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            })?;

        Ok(ProcProxy {
            thread: Some(thread),
            stdin: parent_stdin,
            stdout: parent_stdout,
            stderr: parent_stderr,
            status,
        })
    }

    /// Block until the callable finishes (thread join) and return its status.
    pub fn wait(&mut self) -> ProcStatus {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.poll().unwrap_or(ProcStatus::Code(1))
    }

    /// The return code so far: `None` while the callable is still running.
    pub fn poll(&self) -> Option<ProcStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Child-side output destination; mirrors the parent's view of the binding
/// and materialises into a writer on the worker thread.
enum Sink {
    Stdout,
    Stderr,
    Null,
    File(File),
    Pipe(PipeWriter),
}

impl Sink {
    fn try_clone(&self) -> io::Result<Sink> {
        Ok(match self {
            Sink::Stdout => Sink::Stdout,
            Sink::Stderr => Sink::Stderr,
            Sink::Null => Sink::Null,
            Sink::File(file) => Sink::File(file.try_clone()?),
            Sink::Pipe(writer) => Sink::Pipe(writer.try_clone()?),
        })
    }

    fn into_writer(self) -> Box<dyn Write + Send> {
        match self {
            Sink::Stdout => Box::new(io::stdout()),
            Sink::Stderr => Box::new(io::stderr()),
            Sink::Null => Box::new(io::sink()),
            Sink::File(file) => Box::new(file),
            Sink::Pipe(writer) => Box::new(writer),
        }
    }
}

/// Worker-thread body: materialise the streams, run the callable, normalise
/// its result. Dropping the writers on return signals EOF downstream.
fn run_callable(
    callable: Callable,
    args: &[String],
    stdin: Box<dyn Read + Send>,
    has_stdin: bool,
    stdout: Sink,
    stderr: Sink,
    text_mode: bool,
) -> ProcStatus {
    let mut stdout = stdout.into_writer();
    let mut stderr = stderr.into_writer();

    let status = match callable {
        Callable::Simple(f) => {
            let mut reader = stdin;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut input = String::new();
                if has_stdin {
                    reader
                        .read_to_string(&mut input)
                        .map_err(|e| e.to_string())?;
                    if text_mode {
                        input = input.replace("\r\n", "\n");
                    }
                }
                let arg = has_stdin.then_some(input.as_str());
                let output = f(args, arg)?;
                write_simple_output(output, &mut stdout, &mut stderr).map_err(|e| e.to_string())
            }));
            // Errors (and panics) from a simple callable are swallowed and
            // become an unsuccessful exit.
            match outcome {
                Ok(Ok(())) => ProcStatus::Success(true),
                Ok(Err(_)) | Err(_) => ProcStatus::Success(false),
            }
        }
        Callable::Streams(f) => {
            let mut reader = BufReader::new(stdin);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                f(args, &mut reader, &mut stdout, &mut stderr)
            }));
            match outcome {
                Ok(Some(status)) => status,
                Ok(None) => ProcStatus::Success(true),
                // Panics propagate no further than the worker thread; the
                // proxy stays joinable with an error sentinel.
                Err(_) => ProcStatus::Code(1),
            }
        }
    };

    let _ = stdout.flush();
    let _ = stderr.flush();
    status
}

fn write_simple_output(
    output: SimpleOutput,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<()> {
    match output {
        SimpleOutput::Empty => Ok(()),
        SimpleOutput::Stdout(text) => stdout.write_all(text.as_bytes()),
        SimpleOutput::Both(out, err) => {
            if let Some(text) = out {
                stdout.write_all(text.as_bytes())?;
            }
            if let Some(text) = err {
                stderr.write_all(text.as_bytes())?;
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
fn fd_reader(fd: i32) -> io::Result<File> {
    crate::redirect::dup_fd(fd)
}

#[cfg(unix)]
fn fd_writer(fd: i32) -> io::Result<File> {
    crate::redirect::dup_fd(fd)
}

#[cfg(not(unix))]
fn fd_reader(_fd: i32) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "fd redirection is not supported on this platform",
    ))
}

#[cfg(not(unix))]
fn fd_writer(_fd: i32) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "fd redirection is not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn simple(f: impl Fn(&[String], Option<&str>) -> Result<SimpleOutput, String> + Send + Sync + 'static) -> Callable {
        Callable::Simple(Arc::new(f))
    }

    #[test]
    fn simple_callable_writes_stdout_through_pipe() {
        let mut proxy = ProcProxy::new(
            simple(|args, _| Ok(SimpleOutput::Stdout(format!("hi {}\n", args.join(" "))))),
            vec!["there".to_string()],
            ProxyInput::Empty,
            ProxyOutput::Pipe,
            ProxyOutput::Inherit,
            false,
        )
        .unwrap();

        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hi there\n");
        assert_eq!(proxy.wait(), ProcStatus::Success(true));
    }

    #[test]
    fn simple_callable_receives_piped_stdin() {
        let mut proxy = ProcProxy::new(
            simple(|_, stdin| Ok(SimpleOutput::Stdout(stdin.unwrap_or("").to_uppercase()))),
            Vec::new(),
            ProxyInput::Pipe,
            ProxyOutput::Pipe,
            ProxyOutput::Inherit,
            false,
        )
        .unwrap();

        proxy.stdin.take().unwrap().write_all(b"abc").unwrap();
        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "ABC");
        assert!(proxy.wait().is_success());
    }

    #[test]
    fn absent_stdin_reads_as_missing() {
        let mut proxy = ProcProxy::new(
            simple(|_, stdin| {
                assert!(stdin.is_none());
                Ok(SimpleOutput::Empty)
            }),
            Vec::new(),
            ProxyInput::Empty,
            ProxyOutput::Pipe,
            ProxyOutput::Inherit,
            false,
        )
        .unwrap();
        assert!(proxy.wait().is_success());
    }

    #[test]
    fn text_mode_translates_newlines() {
        let mut proxy = ProcProxy::new(
            simple(|_, stdin| Ok(SimpleOutput::Stdout(stdin.unwrap_or("").to_string()))),
            Vec::new(),
            ProxyInput::Pipe,
            ProxyOutput::Pipe,
            ProxyOutput::Inherit,
            true,
        )
        .unwrap();

        proxy.stdin.take().unwrap().write_all(b"a\r\nb\r\n").unwrap();
        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn simple_error_becomes_failure_without_output() {
        let mut proxy = ProcProxy::new(
            simple(|_, _| Err("boom".to_string())),
            Vec::new(),
            ProxyInput::Empty,
            ProxyOutput::Pipe,
            ProxyOutput::Pipe,
            false,
        )
        .unwrap();

        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "");
        assert_eq!(proxy.wait(), ProcStatus::Success(false));
    }

    #[test]
    fn streams_callable_reports_returned_status() {
        let mut proxy = ProcProxy::new(
            Callable::Streams(Arc::new(|_args, _stdin, stdout, stderr| {
                let _ = stdout.write_all(b"to out\n");
                let _ = stderr.write_all(b"to err\n");
                Some(ProcStatus::Code(3))
            })),
            Vec::new(),
            ProxyInput::Empty,
            ProxyOutput::Pipe,
            ProxyOutput::Pipe,
            false,
        )
        .unwrap();

        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        let mut err = String::new();
        proxy.stderr.take().unwrap().read_to_string(&mut err).unwrap();
        assert_eq!(out, "to out\n");
        assert_eq!(err, "to err\n");
        assert_eq!(proxy.wait(), ProcStatus::Code(3));
    }

    #[test]
    fn merged_stderr_shares_the_stdout_pipe() {
        let mut proxy = ProcProxy::new(
            Callable::Streams(Arc::new(|_args, _stdin, stdout, stderr| {
                let _ = stdout.write_all(b"one ");
                let _ = stdout.flush();
                let _ = stderr.write_all(b"two");
                None
            })),
            Vec::new(),
            ProxyInput::Empty,
            ProxyOutput::Pipe,
            ProxyOutput::MergeToStdout,
            false,
        )
        .unwrap();

        assert!(proxy.stderr.is_none());
        let mut out = String::new();
        proxy.stdout.take().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "one two");
        assert!(proxy.wait().is_success());
    }

    #[test]
    fn poll_reports_none_until_joined() {
        let mut proxy = ProcProxy::new(
            simple(|_, stdin| {
                // Block until the parent closes the pipe.
                let _ = stdin;
                Ok(SimpleOutput::Empty)
            }),
            Vec::new(),
            ProxyInput::Pipe,
            ProxyOutput::Inherit,
            ProxyOutput::Inherit,
            false,
        )
        .unwrap();

        // The callable cannot finish before its stdin reaches EOF.
        assert!(proxy.poll().is_none());
        drop(proxy.stdin.take());
        assert!(proxy.wait().is_success());
        assert!(proxy.poll().is_some());
    }
}
