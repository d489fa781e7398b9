use alyx_storage::{BulkTransfer, StorageResult, TransferOutput, TransferRequest};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// One observed transfer call.
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferCall {
    pub source: String,
    pub dest: String,
    pub dir: String,
    pub dry_run: bool,
}

/// Wraps a transfer, records every request and fails those for one directory.
#[allow(dead_code)]
pub struct RecordingTransfer {
    inner: Arc<dyn BulkTransfer>,
    calls: Mutex<Vec<TransferCall>>,
    fail_dir: Mutex<Option<String>>,
}

#[allow(dead_code)]
impl RecordingTransfer {
    pub fn new(inner: Arc<dyn BulkTransfer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_dir: Mutex::new(None),
        })
    }

    /// Make transfers of `dir` exit with status 23 without copying.
    pub fn fail_on(&self, dir: impl Into<String>) {
        *self.fail_dir.lock().unwrap() = Some(dir.into());
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkTransfer for RecordingTransfer {
    async fn transfer(&self, request: &TransferRequest) -> StorageResult<TransferOutput> {
        self.calls.lock().unwrap().push(TransferCall {
            source: request.source.repository.clone(),
            dest: request.dest.repository.clone(),
            dir: request.source.prefix.clone(),
            dry_run: request.dry_run,
        });
        let fail = self.fail_dir.lock().unwrap().as_deref() == Some(request.source.prefix.as_str());
        if fail {
            return Ok(TransferOutput {
                exit_status: 23,
                log: "injected failure".to_string(),
            });
        }
        self.inner.transfer(request).await
    }

    fn tool_name(&self) -> &'static str {
        "recording"
    }
}
