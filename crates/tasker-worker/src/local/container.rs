// A container on the local host: a directory standing in for the root
// filesystem, with processes run by the host process invoker.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use tasker_common::{
    Container, ExitStatus, ProcessIo, ProcessResult, ProcessSpec, StepContext, VolumeMount,
};
use tasker_sdk::trace::TracingTraceWriter;
use tasker_sdk::{ProcessDataReceivedEventArgs, ProcessInvoker};

use super::fs::host_path;

pub struct LocalContainer {
    handle: String,
    root: PathBuf,
    env: HashMap<String, String>,
    mounts: Vec<VolumeMount>,
}

impl LocalContainer {
    pub(crate) fn new(handle: String, root: PathBuf, env: &[String], mounts: Vec<VolumeMount>) -> Self {
        let env = env
            .iter()
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self {
            handle,
            root,
            env,
            mounts,
        }
    }

    /// Host directory the container's filesystem lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_path(&self, container_path: &str) -> PathBuf {
        host_path(&self.root, container_path)
    }

    /// Bare names are looked up on `PATH`; other relative paths are taken
    /// from the process directory.
    fn program(&self, dir: &Path, path: &str) -> String {
        if path.starts_with('/') || !path.contains('/') {
            path.to_string()
        } else {
            dir.join(path).to_string_lossy().into_owned()
        }
    }
}

#[async_trait]
impl Container for LocalContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mounts.clone()
    }

    async fn run(&self, ctx: &StepContext, spec: ProcessSpec, io: ProcessIo) -> ProcessResult {
        let dir = self.host_path(&spec.dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create process dir {}", dir.display()))?;

        if let Some(user) = &spec.user {
            tracing::warn!(target: "tasker::local", user = %user, "local runtime runs processes as the current user");
        }

        let program = self.program(&dir, &spec.path);
        tracing::debug!(target: "tasker::local", container = %self.handle, id = %spec.id, program = %program, dir = %dir.display(), "starting process");

        let mut invoker = ProcessInvoker::new(Arc::new(TracingTraceWriter::new("tasker::local")));
        let stdout = pump(invoker.take_stdout_receiver(), io.stdout);
        let stderr = pump(invoker.take_stderr_receiver(), io.stderr);

        let result = invoker
            .execute(
                &dir,
                &program,
                &spec.args,
                &self.env,
                ctx.cancellation_token().clone(),
            )
            .await;

        // The output channels close once the invoker and its readers are gone.
        drop(invoker);
        let _ = stdout.await;
        let _ = stderr.await;

        Ok(ExitStatus(result?))
    }
}

fn pump(
    receiver: Option<UnboundedReceiver<ProcessDataReceivedEventArgs>>,
    mut sink: Box<dyn Write + Send>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while let Some(line) = receiver.recv().await {
            if writeln!(sink, "{}", line.data).is_err() {
                break;
            }
        }
        let _ = sink.flush();
    })
}
