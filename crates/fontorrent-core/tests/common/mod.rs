//! Common test utilities for `Fontorrent` integration tests.
//!
//! Provides an in-memory transfer engine and an in-memory storage host so
//! coordinator behaviour can be exercised without a network or a real
//! torrent engine.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use fontorrent_core::engine::{
    ContentFile, ContentStream, Descriptor, Engine, EngineEvent, Fingerprint, SessionHandle,
    TransferStats, Wire,
};
use fontorrent_core::error::{ContentError, EngineError, GrantError};
use fontorrent_core::export::{DirectoryHandle, FileWriteHandle, StorageHost};

pub const HASH_A: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
pub const HASH_B: &str = "08ada5a7a6183aae1e09d831df6748d566095a10";

/// Size of the chunks streamed by [`MockFile`].
pub const CHUNK_SIZE: usize = 16;

/// How a [`MockFile`] hands out its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// `read_all` returns the content
    Whole,
    /// `read_all` is unavailable; only the stream works
    StreamOnly,
    /// Content was evicted: every read fails
    Broken,
    /// Only the stream works, and it fails after the first chunk
    Truncated,
}

/// A file served by the mock engine.
#[derive(Debug, Clone)]
pub struct MockFile {
    path: String,
    content: Arc<Vec<u8>>,
    delivery: Delivery,
}

impl MockFile {
    pub fn new(path: &str, content: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            content: Arc::new(content.to_vec()),
            delivery: Delivery::Whole,
        }
    }

    /// A file of `length` bytes of `fill`.
    pub fn sized(path: &str, length: usize, fill: u8) -> Self {
        Self::new(path, &vec![fill; length])
    }

    pub fn delivered(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

impl ContentFile for MockFile {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn length(&self) -> u64 {
        self.content.len() as u64
    }

    fn downloaded(&self) -> u64 {
        self.content.len() as u64
    }

    fn progress(&self) -> f64 {
        1.0
    }

    async fn read_all(&self) -> Result<Vec<u8>, ContentError> {
        match self.delivery {
            Delivery::Whole => Ok(self.content.to_vec()),
            Delivery::StreamOnly | Delivery::Truncated => Err(ContentError::Unavailable),
            Delivery::Broken => Err(ContentError::Read(io::Error::other("piece evicted"))),
        }
    }

    fn stream(&self) -> Result<ContentStream, ContentError> {
        match self.delivery {
            Delivery::Broken => Ok(stream::iter(vec![Err(io::Error::other("piece evicted"))]).boxed()),
            Delivery::Truncated => {
                let first: Vec<u8> = self.content.iter().take(CHUNK_SIZE).copied().collect();
                Ok(stream::iter(vec![Ok(first), Err(io::Error::other("peer went away"))]).boxed())
            }
            _ => {
                let chunks: Vec<io::Result<Vec<u8>>> = self
                    .content
                    .chunks(CHUNK_SIZE)
                    .map(|chunk| Ok(chunk.to_vec()))
                    .collect();
                Ok(stream::iter(chunks).boxed())
            }
        }
    }
}

#[derive(Debug, Default)]
struct HandleState {
    name: Option<String>,
    files: Vec<MockFile>,
    stats: TransferStats,
    wires: Vec<Wire>,
    announce: Vec<String>,
}

/// A session inside the mock engine.
#[derive(Debug)]
pub struct MockHandle {
    fingerprint: Fingerprint,
    state: Mutex<HandleState>,
    events: broadcast::Sender<EngineEvent>,
    descriptor: Option<Vec<u8>>,
    fail_reannounce: AtomicBool,
    reannounces: AtomicUsize,
    destroyed: AtomicBool,
}

impl MockHandle {
    pub fn new(fingerprint: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            fingerprint: Fingerprint::new(fingerprint),
            state: Mutex::new(HandleState::default()),
            events,
            descriptor: None,
            fail_reannounce: AtomicBool::new(false),
            reannounces: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// A session whose metadata is already known.
    pub fn with_files(fingerprint: &str, name: &str, files: Vec<MockFile>) -> Self {
        let handle = Self::new(fingerprint);
        handle.set_metadata(name, files);
        handle
    }

    pub fn with_announce(self, announce: &[&str]) -> Self {
        self.state.lock().unwrap().announce = announce.iter().map(ToString::to_string).collect();
        self
    }

    pub fn with_descriptor(mut self, bytes: &[u8]) -> Self {
        self.descriptor = Some(bytes.to_vec());
        self
    }

    pub fn failing_reannounce(self) -> Self {
        self.fail_reannounce.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_metadata(&self, name: &str, files: Vec<MockFile>) {
        let mut state = self.state.lock().unwrap();
        state.name = Some(name.to_string());
        state.files = files;
    }

    pub fn set_stats(&self, stats: TransferStats) {
        self.state.lock().unwrap().stats = stats;
    }

    pub fn set_wires(&self, wires: Vec<Wire>) {
        self.state.lock().unwrap().wires = wires;
    }

    /// Push an engine event to subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn reannounces(&self) -> usize {
        self.reannounces.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn current_announce(&self) -> Vec<String> {
        self.state.lock().unwrap().announce.clone()
    }
}

impl SessionHandle for MockHandle {
    type File = MockFile;

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint.clone()
    }

    fn name(&self) -> Option<String> {
        self.state.lock().unwrap().name.clone()
    }

    fn length(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .files
            .iter()
            .map(ContentFile::length)
            .sum()
    }

    fn magnet_uri(&self) -> Option<String> {
        Some(format!("magnet:?xt=urn:btih:{}", self.fingerprint))
    }

    fn stats(&self) -> TransferStats {
        self.state.lock().unwrap().stats.clone()
    }

    fn files(&self) -> Vec<MockFile> {
        self.state.lock().unwrap().files.clone()
    }

    fn wires(&self) -> Vec<Wire> {
        self.state.lock().unwrap().wires.clone()
    }

    fn announce(&self) -> Vec<String> {
        self.current_announce()
    }

    fn set_announce(&self, urls: Vec<String>) {
        self.state.lock().unwrap().announce = urls;
    }

    fn reannounce(&self) -> Result<(), EngineError> {
        if self.fail_reannounce.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("tracker unreachable".into()));
        }
        self.reannounces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn descriptor(&self) -> Option<Vec<u8>> {
        self.descriptor.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EngineState {
    handles: Mutex<Vec<Arc<MockHandle>>>,
    adds: AtomicUsize,
}

/// In-memory transfer engine. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session the engine will hand out for its fingerprint.
    pub fn prepare(&self, handle: MockHandle) -> Arc<MockHandle> {
        let handle = Arc::new(handle);
        self.state.handles.lock().unwrap().push(Arc::clone(&handle));
        handle
    }

    pub fn handle(&self, fingerprint: &str) -> Option<Arc<MockHandle>> {
        self.state
            .handles
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.fingerprint.as_str() == fingerprint)
            .cloned()
    }

    /// Number of `add` calls the engine received.
    pub fn adds(&self) -> usize {
        self.state.adds.load(Ordering::SeqCst)
    }
}

fn fingerprint_of(descriptor: &Descriptor) -> Result<String, EngineError> {
    match descriptor {
        Descriptor::InfoHash(hash) => Ok(hash.to_ascii_lowercase()),
        Descriptor::Magnet(uri) => uri
            .split("urn:btih:")
            .nth(1)
            .map(|rest| rest.split('&').next().unwrap_or(rest).to_ascii_lowercase())
            .ok_or_else(|| EngineError::Rejected("no info hash in magnet".into())),
        Descriptor::Torrent(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if text.len() == 40 && text.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(text.to_ascii_lowercase())
            } else {
                Err(EngineError::Rejected("Invalid torrent identifier".into()))
            }
        }
        Descriptor::Bundle(paths) => Ok(format!("{:040x}", paths.len())),
    }
}

impl Engine for MockEngine {
    type Handle = MockHandle;

    async fn add(
        &self,
        descriptor: &Descriptor,
        announce: &[String],
    ) -> Result<Arc<MockHandle>, EngineError> {
        self.state.adds.fetch_add(1, Ordering::SeqCst);
        let fingerprint = fingerprint_of(descriptor)?;

        if let Some(existing) = self.handle(&fingerprint) {
            return Ok(existing);
        }

        let handle = MockHandle::new(&fingerprint);
        handle.set_announce(announce.to_vec());
        let handle = match descriptor {
            Descriptor::Bundle(paths) => {
                let files = paths
                    .iter()
                    .map(|p| MockFile::new(&p.to_string_lossy(), b"seed"))
                    .collect();
                handle.set_metadata("bundle", files);
                handle.with_descriptor(b"d8:announce0:4:infod4:name6:bundleee")
            }
            _ => handle,
        };
        Ok(self.prepare(handle))
    }
}

/// How a [`MemoryStorage`] answers a directory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Cancelled,
    Unsupported,
}

#[derive(Debug, Default)]
struct StorageState {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    directories: Mutex<Vec<String>>,
    reject: Mutex<Vec<String>>,
    picks: AtomicUsize,
}

/// In-memory storage host recording what was written.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    grant: Grant,
    state: Arc<StorageState>,
}

impl MemoryStorage {
    pub fn new(grant: Grant) -> Self {
        Self {
            grant,
            state: Arc::new(StorageState::default()),
        }
    }

    /// Make creating the file at `path` fail.
    pub fn reject(&self, path: &str) {
        self.state.reject.lock().unwrap().push(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.state.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn directories(&self) -> Vec<String> {
        self.state.directories.lock().unwrap().clone()
    }

    /// Number of directory grants requested.
    pub fn picks(&self) -> usize {
        self.state.picks.load(Ordering::SeqCst)
    }
}

impl StorageHost for MemoryStorage {
    type Directory = MemoryDirectory;

    fn is_supported(&self) -> bool {
        self.grant != Grant::Unsupported
    }

    async fn pick_directory(&self) -> Result<MemoryDirectory, GrantError> {
        self.state.picks.fetch_add(1, Ordering::SeqCst);
        match self.grant {
            Grant::Granted => Ok(MemoryDirectory {
                prefix: String::new(),
                state: Arc::clone(&self.state),
            }),
            Grant::Cancelled => Err(GrantError::Cancelled),
            Grant::Unsupported => Err(GrantError::Unsupported),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    prefix: String,
    state: Arc<StorageState>,
}

impl DirectoryHandle for MemoryDirectory {
    type Writer = MemoryWriter;

    async fn directory(&self, name: &str) -> io::Result<Self> {
        let path = format!("{}{}", self.prefix, name);
        let mut directories = self.state.directories.lock().unwrap();
        if !directories.contains(&path) {
            directories.push(path.clone());
        }
        Ok(Self {
            prefix: format!("{path}/"),
            state: Arc::clone(&self.state),
        })
    }

    async fn create_file(&self, name: &str) -> io::Result<MemoryWriter> {
        let path = format!("{}{}", self.prefix, name);
        if self.state.reject.lock().unwrap().contains(&path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "quota exceeded"));
        }
        Ok(MemoryWriter {
            path,
            buffer: Vec::new(),
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub struct MemoryWriter {
    path: String,
    buffer: Vec<u8>,
    state: Arc<StorageState>,
}

impl FileWriteHandle for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(self) -> io::Result<()> {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(self.path, self.buffer);
        Ok(())
    }
}
