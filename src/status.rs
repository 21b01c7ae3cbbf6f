/// Exit status of a pipeline stage.
///
/// OS children report a numeric exit code; proc-proxies report a success
/// flag. Both collapse into the same success predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Code(i32),
    Success(bool),
}

impl ProcStatus {
    /// The uniform success predicate: a boolean is itself, a code succeeds
    /// iff it is zero.
    pub fn is_success(self) -> bool {
        match self {
            ProcStatus::Code(code) => code == 0,
            ProcStatus::Success(ok) => ok,
        }
    }

    /// Shell-style numeric code, for `$?`-like reporting.
    pub fn code(self) -> i32 {
        match self {
            ProcStatus::Code(code) => code,
            ProcStatus::Success(true) => 0,
            ProcStatus::Success(false) => 1,
        }
    }
}

/// Convert an OS process status into shell-style exit code semantics.
///
/// On Unix, processes terminated by signal map to `128 + signal`.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
