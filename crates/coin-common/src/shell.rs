//! Shell command execution for the OS-facing adapters.
//!
//! Every command runs through `/bin/sh -c`, so arguments that come from
//! clients (interface names, addresses) must go through [`shellquote`].
//!
//! # Example
//!
//! ```ignore
//! use coin_common::shell::{self, OVS_DPCTL_CMD, shellquote};
//!
//! let cmd = format!("{} add-if {} {}",
//!     OVS_DPCTL_CMD, shellquote("dp0"), shellquote("eth1"));
//! let result = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{CoinCommonError, CoinCommonResult};

/// Path to the `ip` command for interface, address, route and neighbour
/// configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the DHCP client.
pub const DHCLIENT_CMD: &str = "/sbin/dhclient";

/// Path to the Open vSwitch datapath control utility.
pub const OVS_DPCTL_CMD: &str = "/usr/bin/ovs-dpctl";

/// Characters that need escaping inside shell double quotes:
/// `$`, `` ` ``, `"`, `\` and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// ```
/// use coin_common::shell::shellquote;
///
/// assert_eq!(shellquote("eth0"), "\"eth0\"");
/// assert_eq!(shellquote("a$b"), "\"a\\$b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout and stderr joined, for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Executes a shell command.
///
/// A non-zero exit is not an error here; it is logged at warn and returned
/// in the [`ExecResult`]. Only a failure to spawn is an `Err`.
pub async fn exec(cmd: &str) -> CoinCommonResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CoinCommonError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command, turning a non-zero exit into an error.
///
/// Returns stdout on success.
pub async fn exec_or_throw(cmd: &str) -> CoinCommonResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(CoinCommonError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
