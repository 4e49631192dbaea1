//! Shared fixtures: a recording device, scripted probes and temp libraries.
#![allow(dead_code)]

use aria_index::{Indexer, IndexerConfig, IndexStore, Library, SongTags, TagReader};
use aria_server::config::AppConfig;
use aria_server::device::DeviceControl;
use aria_server::error::DeviceError;
use aria_server::gateway::FileGateway;
use aria_server::intent::IntentParser;
use aria_server::orchestrator::{Orchestrator, OrchestratorSettings};
use aria_server::probe::DurationProbe;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Speak(String),
    Ask(String),
    Play(String),
    Stop,
}

/// Device that records every command and always succeeds.
pub struct RecordingDevice {
    calls: Mutex<Vec<DeviceCall>>,
}

impl RecordingDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == DeviceCall::Stop)
            .count()
    }

    pub fn plays(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Play(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn speaks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Speak(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DeviceControl for RecordingDevice {
    async fn speak(&self, text: &str) -> Result<Value, DeviceError> {
        self.calls.lock().unwrap().push(DeviceCall::Speak(text.to_string()));
        Ok(json!({ "code": 0 }))
    }

    async fn ask(&self, text: &str) -> Result<Value, DeviceError> {
        self.calls.lock().unwrap().push(DeviceCall::Ask(text.to_string()));
        Ok(json!({ "code": 0 }))
    }

    async fn play_url(&self, url: &str) -> Result<Value, DeviceError> {
        self.calls.lock().unwrap().push(DeviceCall::Play(url.to_string()));
        Ok(json!({ "code": 0 }))
    }

    async fn stop(&self) -> Result<Value, DeviceError> {
        self.calls.lock().unwrap().push(DeviceCall::Stop);
        Ok(json!({ "code": 0 }))
    }
}

/// Probe answering from a filename -> seconds table; unknown files are
/// unprobeable.
pub struct FixedProbe {
    durations: HashMap<String, f64>,
}

impl FixedProbe {
    pub fn new(durations: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            durations: durations
                .iter()
                .map(|(name, secs)| ((*name).to_string(), *secs))
                .collect(),
        })
    }
}

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe(&self, path: &Path) -> Option<f64> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        self.durations.get(&name).copied()
    }
}

/// Tag reader returning empty tags instantly, for index fixtures.
pub struct StubReader;

impl TagReader for StubReader {
    fn read_tags(&self, _path: &Path) -> aria_index::Result<SongTags> {
        Ok(SongTags::default())
    }
}

/// Tag reader that sleeps, to keep a refresh in flight during a test.
pub struct SlowReader {
    pub delay: std::time::Duration,
}

impl TagReader for SlowReader {
    fn read_tags(&self, _path: &Path) -> aria_index::Result<SongTags> {
        std::thread::sleep(self.delay);
        Ok(SongTags::default())
    }
}

pub fn temp_library_with_reader(
    files: &[&str],
    reader: Arc<dyn TagReader>,
) -> (TempDir, Arc<Library>) {
    let dir = TempDir::new().unwrap();
    for name in files {
        std::fs::write(dir.path().join(name), b"fake audio").unwrap();
    }
    let library = Library::new(
        vec![dir.path().to_path_buf()],
        20,
        Indexer::with_reader(IndexerConfig::default(), reader),
        IndexStore::disabled(),
    );
    (dir, Arc::new(library))
}

pub fn temp_library(files: &[&str]) -> (TempDir, Arc<Library>) {
    temp_library_with_reader(files, Arc::new(StubReader))
}

pub struct Harness {
    pub device: Arc<RecordingDevice>,
    pub orchestrator: Arc<Orchestrator>,
    pub gateway: Arc<FileGateway>,
    pub dir: TempDir,
}

/// Orchestrator over a refreshed temp library. `files` pairs names with
/// probed durations; `whitelist` fills the barge-in whitelist.
pub async fn harness(files: &[(&str, f64)], whitelist: &[&str]) -> Harness {
    let names: Vec<&str> = files.iter().map(|(name, _)| *name).collect();
    let (dir, library) = temp_library(&names);
    library.refresh().await.unwrap();
    harness_with_library(dir, library, files, whitelist)
}

/// Harness whose library has no configured directories.
pub async fn harness_without_dirs() -> Harness {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(Library::new(
        Vec::new(),
        20,
        Indexer::with_reader(IndexerConfig::default(), Arc::new(StubReader)),
        IndexStore::disabled(),
    ));
    harness_with_library(dir, library, &[], &[])
}

pub fn harness_with_library(
    dir: TempDir,
    library: Arc<Library>,
    files: &[(&str, f64)],
    whitelist: &[&str],
) -> Harness {
    let device = RecordingDevice::new();
    let probe = FixedProbe::new(files);
    let gateway = FileGateway::new("http://127.0.0.1:18080");
    let config = AppConfig::default();
    let mut commands = config.commands.clone();
    commands.interrupt_whitelist_keywords =
        whitelist.iter().map(|k| (*k).to_string()).collect();
    let orchestrator = Orchestrator::new(
        device.clone(),
        probe,
        library,
        Arc::clone(&gateway),
        IntentParser::new(&commands),
        OrchestratorSettings::from_config(&config),
    );
    Harness {
        device,
        orchestrator,
        gateway,
        dir,
    }
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
