//! In-process test doubles: CDN, token source, guest runtime and bootstrap
//! archive builder. Compiled for unit tests and with the `test-support`
//! feature.

use crate::auth::CdnAuthToken;
use crate::cdn::{CdnClient, CdnError, CdnResult, ChunkRequest, TokenSource};
use crate::depot::{
    AppInfo, ChunkCodec, DepotFile, DepotInfo, DepotManifest, FileChunk, ManifestInfo,
    DEFAULT_BRANCH, FLAG_DIRECTORY,
};
use crate::download::codec;
use crate::integrity::IntegrityVerifier;
use crate::progress::{emit, ProgressSender};
use crate::runtime::{GuestRuntime, RuntimeHandle, RuntimeResult};
use crate::validator::ValidatorConfig;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const CDN_BASE: &str = "https://cdn.test/";

/// Chunk size used by `publish_manifest`
pub const MANIFEST_CHUNK_SIZE: usize = 256;

/// Issues `token-N` tokens valid for a fixed lifetime
pub struct CountingTokenSource {
    lifetime_secs: i64,
    delay: Option<Duration>,
    failures: Mutex<VecDeque<CdnError>>,
    issued: AtomicU64,
}

impl CountingTokenSource {
    pub fn new(lifetime_secs: i64) -> Self {
        Self {
            lifetime_secs,
            delay: None,
            failures: Mutex::new(VecDeque::new()),
            issued: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next acquisition with `error`
    pub fn push_failure(&self, error: CdnError) {
        self.failures.lock().push_back(error);
    }

    /// Tokens successfully issued
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn acquire(&self, _app_id: u32) -> CdnResult<CdnAuthToken> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CdnAuthToken::new(
            format!("token-{n}"),
            chrono::Utc::now().timestamp() + self.lifetime_secs,
            CDN_BASE,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Serve a payload whose content does not match the chunk hash
    Corrupt,
    Network,
    Unauthorized,
}

struct StoredChunk {
    plain: Bytes,
    codec: ChunkCodec,
    payload: Bytes,
}

/// CDN backed by maps; faults are injected per chunk hash
#[derive(Default)]
pub struct MemoryCdn {
    apps: DashMap<u32, AppInfo>,
    manifests: DashMap<(u32, u64), Bytes>,
    chunks: DashMap<[u8; 20], StoredChunk>,
    faults: DashMap<[u8; 20], (Fault, u32)>,
    rejected: DashSet<String>,
    cancel_at: Mutex<Option<(u64, CancellationToken)>>,
    chunk_delay: Mutex<Option<Duration>>,
    chunk_requests: AtomicU64,
    app_info_requests: AtomicU64,
}

impl MemoryCdn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `data` into chunks, store them and describe the file
    pub fn publish_file(
        &self,
        _depot_id: u32,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
        codec: ChunkCodec,
    ) -> DepotFile {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for piece in data.chunks(chunk_size.max(1)) {
            let payload = codec::compress(piece, codec);
            let chunk = FileChunk {
                content_hash: IntegrityVerifier::calculate_sha1(piece),
                crc32: IntegrityVerifier::calculate_crc32(piece),
                offset,
                uncompressed_size: piece.len() as u32,
                compressed_size: payload.len() as u32,
            };
            self.chunks.insert(
                chunk.content_hash,
                StoredChunk {
                    plain: Bytes::copy_from_slice(piece),
                    codec,
                    payload,
                },
            );
            offset += piece.len() as u64;
            chunks.push(chunk);
        }

        DepotFile {
            filename: filename.to_string(),
            size: data.len() as u64,
            chunks,
            flags: 0,
        }
    }

    /// Publish an LZ4 manifest as the current `public` revision of a depot.
    /// Names ending in `/` become directories.
    pub fn publish_manifest(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        entries: &[(&str, Vec<u8>)],
    ) -> DepotManifest {
        let entries: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(name, data)| (*name, data.as_slice()))
            .collect();
        self.publish_manifest_chunked(app_id, depot_id, manifest_id, MANIFEST_CHUNK_SIZE, &entries)
    }

    /// `publish_manifest` with an explicit chunk size
    pub fn publish_manifest_chunked(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        chunk_size: usize,
        entries: &[(&str, &[u8])],
    ) -> DepotManifest {
        let files: Vec<DepotFile> = entries
            .iter()
            .map(|(name, data)| match name.strip_suffix('/') {
                Some(dir) => DepotFile {
                    filename: dir.to_string(),
                    size: 0,
                    chunks: Vec::new(),
                    flags: FLAG_DIRECTORY,
                },
                None => self.publish_file(depot_id, name, data, chunk_size, ChunkCodec::Lz4),
            })
            .collect();

        let manifest = DepotManifest {
            depot_id,
            manifest_id,
            creation_time: chrono::Utc::now().timestamp(),
            chunk_codec: ChunkCodec::Lz4,
            total_size: files.iter().map(|f| f.size).sum(),
            total_compressed_size: files.iter().map(|f| f.compressed_size()).sum(),
            files,
        };
        self.store_manifest(app_id, &manifest);
        manifest
    }

    /// Store `manifest` and point the app's catalog entry at it
    pub fn store_manifest(&self, app_id: u32, manifest: &DepotManifest) {
        let raw = serde_json::to_vec(manifest).unwrap_or_default();
        self.manifests
            .insert((manifest.depot_id, manifest.manifest_id), Bytes::from(raw));

        let info = ManifestInfo {
            manifest_id: manifest.manifest_id,
            size: manifest.total_size,
            download_size: manifest.total_compressed_size,
        };
        let mut app = self.apps.entry(app_id).or_insert_with(|| AppInfo {
            app_id,
            name: format!("App {app_id}"),
            depots: Vec::new(),
        });
        match app.depots.iter_mut().find(|d| d.depot_id == manifest.depot_id) {
            Some(depot) => {
                depot.manifests.insert(DEFAULT_BRANCH.to_string(), info);
            }
            None => app.depots.push(DepotInfo {
                depot_id: manifest.depot_id,
                name: format!("Depot {}", manifest.depot_id),
                manifests: HashMap::from([(DEFAULT_BRANCH.to_string(), info)]),
            }),
        }
    }

    /// Apply `fault` to the next `count` requests for a chunk
    pub fn inject(&self, hash: [u8; 20], fault: Fault, count: u32) {
        self.faults.insert(hash, (fault, count));
    }

    /// Answer every chunk request carrying `token` with 401
    pub fn reject_token(&self, token: &str) {
        self.rejected.insert(token.to_string());
    }

    /// Cancel `token` once the `n`th chunk request has been served
    pub fn cancel_after(&self, n: u64, token: CancellationToken) {
        *self.cancel_at.lock() = Some((n, token));
    }

    /// Hold every chunk response for `delay`
    pub fn delay_chunks(&self, delay: Option<Duration>) {
        *self.chunk_delay.lock() = delay;
    }

    pub fn chunk_requests(&self) -> u64 {
        self.chunk_requests.load(Ordering::SeqCst)
    }

    pub fn app_info_requests(&self) -> u64 {
        self.app_info_requests.load(Ordering::SeqCst)
    }

    fn take_fault(&self, hash: &[u8; 20]) -> Option<Fault> {
        let mut entry = self.faults.get_mut(hash)?;
        let (fault, remaining) = *entry;
        if remaining == 0 {
            return None;
        }
        entry.1 = remaining - 1;
        Some(fault)
    }
}

#[async_trait]
impl CdnClient for MemoryCdn {
    async fn app_info(&self, _token: &CdnAuthToken, app_id: u32) -> CdnResult<AppInfo> {
        self.app_info_requests.fetch_add(1, Ordering::SeqCst);
        self.apps
            .get(&app_id)
            .map(|app| app.value().clone())
            .ok_or_else(|| CdnError::NotFound(format!("app {app_id}")))
    }

    async fn fetch_manifest(
        &self,
        _token: &CdnAuthToken,
        depot_id: u32,
        manifest_id: u64,
    ) -> CdnResult<Bytes> {
        self.manifests
            .get(&(depot_id, manifest_id))
            .map(|raw| raw.value().clone())
            .ok_or_else(|| CdnError::NotFound(format!("manifest {depot_id}/{manifest_id}")))
    }

    async fn fetch_chunk(&self, token: &CdnAuthToken, request: &ChunkRequest) -> CdnResult<Bytes> {
        let delay = *self.chunk_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let served = self.chunk_requests.fetch_add(1, Ordering::SeqCst) + 1;

        if self.rejected.contains(&token.token) {
            return Err(CdnError::Unauthorized(format!("{} revoked", token.token)));
        }

        let payload = match self.take_fault(&request.content_hash) {
            Some(Fault::Network) => return Err(CdnError::Network("connection reset".into())),
            Some(Fault::Unauthorized) => return Err(CdnError::Unauthorized("token expired".into())),
            Some(Fault::Corrupt) => {
                let stored = self
                    .chunks
                    .get(&request.content_hash)
                    .ok_or_else(|| CdnError::NotFound(request.hash_hex()))?;
                let mut bad = stored.plain.to_vec();
                match bad.first_mut() {
                    Some(byte) => *byte ^= 0xff,
                    None => bad.push(0),
                }
                codec::compress(&bad, stored.codec)
            }
            None => self
                .chunks
                .get(&request.content_hash)
                .map(|stored| stored.payload.clone())
                .ok_or_else(|| CdnError::NotFound(request.hash_hex()))?,
        };

        let mut cancel_at = self.cancel_at.lock();
        if let Some((n, token)) = cancel_at.as_ref() {
            if served >= *n {
                token.cancel();
                *cancel_at = None;
            }
        }
        Ok(payload)
    }
}

/// Runtime whose preparation blocks until `release` is called
#[derive(Default)]
pub struct GatedRuntime {
    entered: Notify,
    gate: Notify,
    calls: AtomicU64,
}

impl GatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a `prepare` call is blocked on the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Number of `prepare` calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuestRuntime for GatedRuntime {
    async fn prepare(&self, progress: ProgressSender<f64>) -> RuntimeResult<RuntimeHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        emit(&progress, 0.0);
        self.entered.notify_one();
        self.gate.notified().await;
        emit(&progress, 1.0);
        Ok(RuntimeHandle {
            root: PathBuf::from("/opt/rootfs"),
            version: 1,
        })
    }
}

/// Bootstrap zip laying down the required guest libraries and an app state
/// file carrying `state_flags`, meant to be extracted into the library dir
pub fn bootstrap_zip(app_id: u32, state_flags: u32) -> Vec<u8> {
    write_bootstrap_zip(app_id, state_flags).unwrap_or_default()
}

fn write_bootstrap_zip(app_id: u32, state_flags: u32) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for lib in ValidatorConfig::default().required_libraries {
        writer.start_file(lib, options)?;
        writer.write_all(b"lib")?;
    }
    writer.start_file(
        format!("steamapps/{}", ValidatorConfig::state_file_name(app_id)),
        options,
    )?;
    write!(
        writer,
        "\"AppState\"\n{{\n\t\"appid\"\t\"{app_id}\"\n\t\"StateFlags\"\t\"{state_flags}\"\n\t\"installdir\"\t\"game\"\n}}\n"
    )?;
    Ok(writer.finish()?.into_inner())
}
