//! Message channels between the pump and the body simulator.
//!
//! Each direction carries one message at a time: the writer drops a message
//! into the channel, the reader takes it out and leaves the channel empty for
//! the next one. An empty channel is reported as `nb::Error::WouldBlock`, so
//! a reader never stalls waiting for data.

use crate::protocol::{self, ActuatorMessage, ProtocolError};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Protocol(#[from] ProtocolError),
}

pub trait SensorLink: Send {
    /// Takes the pending glucose reading, if the body has written one.
    fn read_glucose(&mut self) -> nb::Result<u16, LinkError>;
}

pub trait ActuatorLink: Send {
    fn send(&mut self, message: &ActuatorMessage) -> Result<(), LinkError>;
}

/// A single-slot message file. `put` replaces the slot atomically, `take`
/// reads the slot and removes it.
#[derive(Debug, Clone)]
pub struct PipeFile {
    path: PathBuf,
}

impl PipeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn put(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, &self.path)
    }

    pub fn take(&self) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                std::fs::remove_file(&self.path)?;
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.path.exists()
    }
}

#[derive(Debug, Clone)]
pub struct FileSensorLink {
    pipe: PipeFile,
}

impl FileSensorLink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { pipe: PipeFile::new(path) }
    }
}

impl SensorLink for FileSensorLink {
    fn read_glucose(&mut self) -> nb::Result<u16, LinkError> {
        let bytes = self
            .pipe
            .take()
            .map_err(|e| nb::Error::Other(LinkError::Io(e)))?
            .ok_or(nb::Error::WouldBlock)?;
        protocol::parse_glucose_message(&bytes).map_err(|e| nb::Error::Other(LinkError::Protocol(e)))
    }
}

#[derive(Debug, Clone)]
pub struct FileActuatorLink {
    pipe: PipeFile,
}

impl FileActuatorLink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { pipe: PipeFile::new(path) }
    }
}

impl ActuatorLink for FileActuatorLink {
    fn send(&mut self, message: &ActuatorMessage) -> Result<(), LinkError> {
        self.pipe.put(message.as_bytes())?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process sensor channel. Clones share the same queue, so a test keeps
/// one handle to feed readings while the pump owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySensorLink {
    pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl MemorySensorLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reading(&self, glucose: u16) {
        self.push_raw(glucose.to_string().as_bytes());
    }

    pub fn push_raw(&self, bytes: &[u8]) {
        lock(&self.pending).push_back(bytes.to_vec());
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl SensorLink for MemorySensorLink {
    fn read_glucose(&mut self) -> nb::Result<u16, LinkError> {
        let bytes = lock(&self.pending).pop_front().ok_or(nb::Error::WouldBlock)?;
        protocol::parse_glucose_message(&bytes).map_err(|e| nb::Error::Other(LinkError::Protocol(e)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryActuatorLink {
    sent: Arc<Mutex<Vec<ActuatorMessage>>>,
}

impl MemoryActuatorLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.as_str().to_string()).collect()
    }

    pub fn last(&self) -> Option<String> {
        lock(&self.sent).last().map(|m| m.as_str().to_string())
    }
}

impl ActuatorLink for MemoryActuatorLink {
    fn send(&mut self, message: &ActuatorMessage) -> Result<(), LinkError> {
        lock(&self.sent).push(*message);
        Ok(())
    }
}
