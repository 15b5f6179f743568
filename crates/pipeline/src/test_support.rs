//! Scripted encoder for pipeline tests.

use crate::encode::{EncodeSettings, Encoder, EncoderExit, ProbeError, ProgressFn, SpawnError};
use crate::progress::ProgressUpdate;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What the fake does for one input file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Writes `converted:<input name>` and exits 0
    Succeed,
    /// Writes a partial file and exits with the given code
    Fail(i32),
    /// Writes a partial file, signals `started`, then blocks until cancelled
    WaitForCancel,
    /// Like `WaitForCancel`, but never returns
    IgnoreCancel,
}

#[derive(Debug, Default)]
pub struct FakeEncoder {
    behaviors: HashMap<String, Behavior>,
    runs: AtomicUsize,
    started: Arc<Notify>,
}

impl FakeEncoder {
    /// Every input succeeds unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, input_name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(input_name.to_string(), behavior);
        self
    }

    /// Number of encoder runs started so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Notified once per blocking run after its partial write.
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        _settings: &EncodeSettings,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<EncoderExit, SpawnError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let behavior = self
            .behaviors
            .get(&name)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        let write = |contents: &[u8]| {
            fs::write(output, contents).map_err(|source| SpawnError {
                program: "fake".to_string(),
                source,
            })
        };

        match behavior {
            Behavior::Succeed => {
                on_progress(&ProgressUpdate {
                    frame: Some(1),
                    out_time: Some(Duration::from_secs(10)),
                    done: true,
                    ..ProgressUpdate::default()
                });
                write(format!("converted:{}", name).as_bytes())?;
                Ok(EncoderExit::success())
            }
            Behavior::Fail(code) => {
                write(b"partial")?;
                Ok(EncoderExit {
                    code: Some(code),
                    detail: Some("scripted failure".to_string()),
                })
            }
            Behavior::WaitForCancel => {
                write(b"partial")?;
                self.started.notify_one();
                cancel.cancelled().await;
                Ok(EncoderExit {
                    code: None,
                    detail: None,
                })
            }
            Behavior::IgnoreCancel => {
                write(b"partial")?;
                self.started.notify_one();
                std::future::pending().await
            }
        }
    }

    async fn probe_duration(&self, _input: &Path) -> Result<Duration, ProbeError> {
        Ok(Duration::from_secs(10))
    }
}
