use crate::error::{IpatoolWebError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

pub const MASK: &str = "***";

/// Flags whose following argument is always a secret, whatever its shape.
const SECRET_FLAGS: &[&str] = &["--password", "--keychain-passphrase", "--code"];

/// Credential-shaped arguments shorter than this are masked in argument
/// lists but not searched for inside free text. Values following a secret
/// flag are always searched for.
const MIN_TEXT_SECRET_LEN: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    /// Redacted.
    pub stderr: String,
    pub status: i32,
}

/// An argument that looks like an email address or a token.
pub fn is_credential_shaped(arg: &str) -> bool {
    arg.contains('@') || arg.chars().count() > 20
}

/// Masks the secret arguments of one invocation, both in the argument list
/// itself and wherever they are echoed back in the tool's output.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
    /// Subset of `secrets` replaced inside free text, longest first.
    text_secrets: Vec<String>,
}

impl Redactor {
    pub fn for_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut secrets = Vec::new();
        let mut text_secrets = Vec::new();
        let mut after_secret_flag = false;

        for arg in args {
            let arg: &str = arg.as_ref();
            if !arg.is_empty() {
                if after_secret_flag {
                    secrets.push(arg.to_string());
                    text_secrets.push(arg.to_string());
                } else if is_credential_shaped(arg) {
                    secrets.push(arg.to_string());
                    if arg.len() >= MIN_TEXT_SECRET_LEN {
                        text_secrets.push(arg.to_string());
                    }
                }
            }
            after_secret_flag = SECRET_FLAGS.contains(&arg);
        }

        // Longest first, so a secret containing another is replaced whole
        for list in [&mut secrets, &mut text_secrets] {
            list.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            list.dedup();
        }

        Self {
            secrets,
            text_secrets,
        }
    }

    pub fn args<S: AsRef<str>>(&self, args: &[S]) -> String {
        args.iter()
            .map(|arg| {
                let arg: &str = arg.as_ref();
                if self.is_secret(arg) {
                    MASK
                } else {
                    arg
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.text_secrets {
            out = out.replace(secret.as_str(), MASK);
        }
        out
    }

    fn is_secret(&self, arg: &str) -> bool {
        self.secrets.iter().any(|s| s == arg)
    }
}

/// Runs the external ipatool binary.
///
/// Each call spawns its own child process and awaits it under a hard
/// timeout; a child that outlives the timeout is killed. Nothing is shared
/// between calls, so one hung invocation only stalls its own caller.
#[derive(Debug, Clone)]
pub struct IpaTool {
    program: PathBuf,
    timeout: Duration,
}

impl IpaTool {
    pub fn new<P: AsRef<Path>>(program: P, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            timeout,
        }
    }

    pub async fn invoke<S: AsRef<str>>(&self, args: &[S]) -> Result<ToolOutput> {
        let redactor = Redactor::for_args(args);
        info!(command = %format!("ipatool {}", redactor.args(args)), "executing ipatool");

        let mut command = Command::new(&self.program);
        for arg in args {
            let arg: &str = arg.as_ref();
            command.arg(arg);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(program = %self.program.display(), "ipatool not found, is it installed?");
                return Err(IpatoolWebError::ToolNotFound(self.program.clone()));
            }
            Ok(Err(e)) => {
                error!(error = %e, "failed to start ipatool");
                return Err(e.into());
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "ipatool command timed out");
                return Err(IpatoolWebError::ToolTimeout(self.timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = redactor.text(&String::from_utf8_lossy(&output.stderr));

        if !stdout.trim().is_empty() {
            debug!(stdout = %redactor.text(stdout.trim()), "ipatool stdout");
        }
        if !stderr.trim().is_empty() {
            info!(stderr = %stderr.trim(), "ipatool stderr");
        }

        if !output.status.success() {
            error!(status = ?output.status.code(), "ipatool command failed");
            return Err(IpatoolWebError::ToolFailed {
                status: output.status.code(),
                stderr,
            });
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            status: output.status.code().unwrap_or_default(),
        })
    }
}
