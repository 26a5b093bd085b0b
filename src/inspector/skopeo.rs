use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Access, InspectMode, Inspector, InvocationOutcome};

/// Both the secure and insecure proxy variables, in both spellings.
const PROXY_ENV_VARS: &[&str] = &["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];

/// Runs `skopeo` (or a compatible binary) as a child process.
pub struct SkopeoInspector {
    cmd: String,
    timeout: Duration,
}

impl SkopeoInspector {
    pub fn new(cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cmd: cmd.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.cmd
    }

    /// `skopeo --version`, trimmed.
    pub async fn version(&self) -> std::io::Result<String> {
        let output = Command::new(&self.cmd)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: Vec<String>, access: &Access) -> InvocationOutcome {
        let shown = redact(&args);
        debug!(cmd = %self.cmd, args = %shown, proxy = access.proxy.is_some(), "running inspector");

        let mut cmd = Command::new(&self.cmd);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(proxy) = &access.proxy {
            for var in PROXY_ENV_VARS {
                cmd.env(var, proxy);
            }
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(cmd = %self.cmd, error = %e, "failed to start inspector");
                return InvocationOutcome::OtherFailure(format!(
                    "failed to run '{}': {e}",
                    self.cmd
                ));
            }
            Err(_) => {
                warn!(cmd = %self.cmd, args = %shown, "inspector timed out");
                return InvocationOutcome::OtherFailure(format!(
                    "'{} {shown}' timed out after {:?}",
                    self.cmd, self.timeout
                ));
            }
        };

        let outcome =
            InvocationOutcome::classify(output.status.success(), &output.stdout, &output.stderr);
        if !matches!(outcome, InvocationOutcome::Success(_)) {
            debug!(
                cmd = %self.cmd,
                args = %shown,
                code = output.status.code().unwrap_or(-1),
                "inspector failed"
            );
        }
        outcome
    }
}

#[async_trait]
impl Inspector for SkopeoInspector {
    async fn inspect(
        &self,
        reference: &str,
        mode: InspectMode,
        access: &Access,
    ) -> InvocationOutcome {
        self.run(inspect_args(reference, mode, access), access).await
    }

    async fn list_tags(&self, repository: &str, access: &Access) -> InvocationOutcome {
        self.run(list_tags_args(repository, access), access).await
    }
}

fn inspect_args(reference: &str, mode: InspectMode, access: &Access) -> Vec<String> {
    let mut args = vec!["inspect".to_string()];
    match mode {
        InspectMode::Standard => {}
        InspectMode::Raw => args.push("--raw".into()),
        InspectMode::Config => args.push("--config".into()),
    }
    push_creds(&mut args, access);
    args.push(format!("docker://{reference}"));
    args
}

fn list_tags_args(repository: &str, access: &Access) -> Vec<String> {
    let mut args = vec!["list-tags".to_string()];
    push_creds(&mut args, access);
    args.push(format!("docker://{repository}"));
    args
}

fn push_creds(args: &mut Vec<String>, access: &Access) {
    if let Some(creds) = &access.credentials {
        args.push("--creds".into());
        args.push(creds.as_creds_arg());
    }
}

/// Render args for logs with the password masked.
fn redact(args: &[String]) -> String {
    let mut shown = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            let user = arg.split_once(':').map(|(u, _)| u).unwrap_or_default();
            shown.push(format!("{user}:***"));
            mask_next = false;
        } else {
            mask_next = arg == "--creds";
            shown.push(arg.clone());
        }
    }
    shown.join(" ")
}
