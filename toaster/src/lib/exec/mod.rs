use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::process::{Child, Command};
use tokio_util::codec::{FramedRead, LinesCodec};

/// A launched external command. `try_status` is non-blocking so a control
/// loop can poll many handles between sleeps.
#[async_trait]
pub trait ProcessHandle: Send {
    fn try_status(&mut self) -> io::Result<Option<i32>>;
    async fn wait(&mut self) -> io::Result<i32>;
}

/// Runs shell scripts either locally or wrapped for a remote host. The
/// toolkit never parallelizes in-process; all concurrency is OS processes
/// launched through this trait.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>>;

    async fn run(&self, script: &str) -> io::Result<i32> {
        let mut handle = self.launch(script).await?;
        handle.wait().await
    }
}

pub struct ChildHandle {
    child: Child,
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    // Signal-terminated children report no code; treat that as failure.
    status.code().unwrap_or(-1)
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn try_status(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        Ok(exit_code(self.child.wait().await?))
    }
}

fn launch_streaming(mut command: Command, label: &str) -> io::Result<ChildHandle> {
    let mut child = command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
        let mut lines = futures_util::stream::select(
            FramedRead::new(stdout, LinesCodec::new()),
            FramedRead::new(stderr, LinesCodec::new()),
        );
        let label = label.to_string();
        tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => log::info!("[{label}] {line}"),
                    Err(_) => break,
                }
            }
        });
    }

    Ok(ChildHandle { child })
}

/// Runs scripts through the local shell.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
        log::debug!("sh -c {script}");
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        Ok(Box::new(launch_streaming(command, "local")?))
    }
}

/// Wraps each script in an ssh invocation against one worker host. The ssh
/// plumbing itself (keys, known hosts policy) is the operator's concern.
pub struct SshRunner {
    host: String,
}

impl SshRunner {
    pub fn new<S: Into<String>>(host: S) -> Self {
        SshRunner { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
        log::debug!("ssh {} {script}", self.host);
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg(&self.host)
            .arg(script);
        Ok(Box::new(launch_streaming(command, &self.host)?))
    }
}
