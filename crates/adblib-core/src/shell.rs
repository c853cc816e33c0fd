//! Shell command results

/// Output of a shell v2 command collected in one piece
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One element of a streamed shell v2 command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommandOutputElement {
    StdoutLine(String),
    StderrLine(String),
    ExitCode(i32),
}

impl ShellCommandOutputElement {
    pub fn as_stdout(&self) -> Option<&str> {
        match self {
            ShellCommandOutputElement::StdoutLine(line) => Some(line),
            _ => None,
        }
    }

    pub fn as_stderr(&self) -> Option<&str> {
        match self {
            ShellCommandOutputElement::StderrLine(line) => Some(line),
            _ => None,
        }
    }
}
