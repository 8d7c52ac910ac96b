//! In-memory [`ObjectStore`] with fault injection, used by the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};

use super::{ListPage, ObjectMetadata, ObjectStore, ObjectStream, StoreError};

/// Failure modes a key can be configured with.
///
/// `times` counts how many calls fail before the key behaves normally;
/// `u32::MAX` means every call fails.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// `head` returns a request error.
    HeadError { times: u32 },
    /// `head` always reports the object as missing.
    HeadMissing,
    /// `get` fails before any byte is delivered.
    GetError { times: u32 },
    /// `get` delivers `after` bytes, then the body errors out.
    Interrupted { times: u32, after: usize },
    /// `get` delivers only `deliver` bytes and ends cleanly.
    Truncated { times: u32, deliver: usize },
    /// `head` never returns.
    HeadHang,
}

#[derive(Default)]
struct Calls {
    head: HashMap<String, u32>,
    get: HashMap<String, u32>,
    list: u32,
}

pub(crate) struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    faults: Mutex<HashMap<String, Fault>>,
    duplicates: Mutex<Vec<String>>,
    calls: Mutex<Calls>,
    page_size: usize,
    failing_page: Option<usize>,
    stall_pagination: bool,
    head_latency: Option<Duration>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            duplicates: Mutex::new(Vec::new()),
            calls: Mutex::new(Calls::default()),
            page_size: 1000,
            failing_page: None,
            stall_pagination: false,
            head_latency: None,
        }
    }

    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make the listing request for page `page` (0-indexed) fail.
    pub(crate) fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// Delay every `head` call by `latency`.
    pub(crate) fn with_head_latency(mut self, latency: Duration) -> Self {
        self.head_latency = Some(latency);
        self
    }

    /// Keep handing out the same continuation token forever.
    pub(crate) fn with_stalled_pagination(mut self) -> Self {
        self.stall_pagination = true;
        self
    }

    pub(crate) fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub(crate) fn set_fault(&self, key: &str, fault: Fault) {
        self.faults.lock().unwrap().insert(key.to_string(), fault);
    }

    /// List `key` a second time on the last page.
    pub(crate) fn list_twice(&self, key: &str) {
        self.duplicates.lock().unwrap().push(key.to_string());
    }

    pub(crate) fn head_calls(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().head.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn get_calls(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_get_calls(&self) -> u32 {
        self.calls.lock().unwrap().get.values().sum()
    }

    pub(crate) fn list_calls(&self) -> u32 {
        self.calls.lock().unwrap().list
    }

    /// Consume one failure from a counted fault. Returns true if this call
    /// should fail.
    fn take_failure(times: &mut u32) -> bool {
        if *times == 0 {
            return false;
        }
        if *times != u32::MAX {
            *times -= 1;
        }
        true
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let page_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.list += 1;
            calls.list as usize - 1
        };
        if self.failing_page == Some(page_index) {
            return Err(StoreError::request("ListObjectsV2", "service unavailable"));
        }

        let start: usize = continuation.map(|t| t.parse().unwrap()).unwrap_or(0);
        let mut all: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let end = (start + self.page_size).min(all.len());
        let is_last = end >= all.len();
        let mut keys: Vec<String> = all.drain(start.min(end)..end).collect();
        if is_last {
            keys.extend(self.duplicates.lock().unwrap().iter().cloned());
        }

        let next_token = if self.stall_pagination {
            Some(start.to_string())
        } else if is_last {
            None
        } else {
            Some(end.to_string())
        };
        Ok(ListPage { keys, next_token })
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StoreError> {
        *self
            .calls
            .lock()
            .unwrap()
            .head
            .entry(key.to_string())
            .or_default() += 1;

        if let Some(latency) = self.head_latency {
            tokio::time::sleep(latency).await;
        }
        let hang = matches!(self.faults.lock().unwrap().get(key), Some(Fault::HeadHang));
        if hang {
            std::future::pending::<()>().await;
        }

        let fault = self.faults.lock().unwrap().get_mut(key).map(|fault| match fault {
            Fault::HeadMissing => Some(StoreError::NotFound {
                key: key.to_string(),
            }),
            Fault::HeadError { times } => Self::take_failure(times)
                .then(|| StoreError::request("HeadObject", "connection reset by peer")),
            _ => None,
        });
        if let Some(Some(err)) = fault {
            return Err(err);
        }

        let objects = self.objects.lock().unwrap();
        let data = objects.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        Ok(ObjectMetadata {
            size: data.len() as u64,
            last_modified: None,
        })
    }

    async fn get(&self, key: &str) -> Result<ObjectStream, StoreError> {
        *self
            .calls
            .lock()
            .unwrap()
            .get
            .entry(key.to_string())
            .or_default() += 1;

        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;

        let mut deliver = data.len();
        let mut interrupt = false;
        let mut refuse = false;
        if let Some(fault) = self.faults.lock().unwrap().get_mut(key) {
            match fault {
                Fault::GetError { times } => refuse = Self::take_failure(times),
                Fault::Interrupted { times, after } => {
                    if Self::take_failure(times) {
                        deliver = (*after).min(data.len());
                        interrupt = true;
                    }
                }
                Fault::Truncated { times, deliver: n } => {
                    if Self::take_failure(times) {
                        deliver = (*n).min(data.len());
                    }
                }
                Fault::HeadError { .. } | Fault::HeadMissing | Fault::HeadHang => {}
            }
        }
        if refuse {
            return Err(StoreError::request("GetObject", "timed out"));
        }

        let body = data.slice(..deliver);
        let mut chunks: Vec<Result<Bytes, StoreError>> = (0..body.len())
            .step_by(64)
            .map(|start| Ok(body.slice(start..(start + 64).min(body.len()))))
            .collect();
        if interrupt {
            chunks.push(Err(StoreError::Body("connection closed".into())));
        }
        Ok(stream::iter(chunks).boxed())
    }

    fn describe(&self) -> String {
        "memory://test".to_string()
    }
}
