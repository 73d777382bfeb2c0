//! Orchestrator configuration.

use std::sync::Arc;
use std::time::Duration;

use orobas_core::{CompressionLevel, CompressionMode, ExecutionPath, Framing, JobFlags};
use orobas_deflate::{CompressOptions, HuffmanTable};
use serde::{Deserialize, Serialize};

/// Settings of multi-chunk compress and decompress operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backend selection.
    pub path: ExecutionPath,
    pub level: CompressionLevel,
    pub mode: CompressionMode,
    /// Container of streamed output. Container blocks are always raw.
    pub framing: Framing,
    /// Number of chunks the input is split into.
    pub chunk_count: usize,
    /// Fixed chunk size; takes precedence over `chunk_count`.
    pub chunk_size: Option<usize>,
    /// Descriptors kept in flight by the parallel container.
    pub slots: usize,
    /// Absolute budget of one multi-chunk operation.
    pub timeout: Duration,
    /// Re-decompress produced output.
    pub verify: bool,
    /// Restrict the accelerator to devices on this node.
    pub numa_node: Option<u32>,
    /// Table for static and canned modes.
    #[serde(skip)]
    pub table: Option<Arc<HuffmanTable>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            path: ExecutionPath::Auto,
            level: CompressionLevel::Default,
            mode: CompressionMode::Dynamic,
            framing: Framing::Raw,
            chunk_count: 7,
            chunk_size: None,
            slots: 4,
            timeout: Duration::from_secs(60),
            verify: true,
            numa_node: None,
            table: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: ExecutionPath) -> Self {
        self.path = path;
        self
    }

    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_mode(mut self, mode: CompressionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_chunk_count(mut self, chunk_count: usize) -> Self {
        self.chunk_count = chunk_count;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_numa_node(mut self, numa_node: u32) -> Self {
        self.numa_node = Some(numa_node);
        self
    }

    pub fn with_table(mut self, table: Arc<HuffmanTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Mode and verification flags; FIRST, LAST and framing are per call.
    pub fn mode_flags(&self) -> JobFlags {
        let mut flags = self.mode.flags();
        if !self.verify {
            flags |= JobFlags::OMIT_VERIFY;
        }
        flags
    }

    /// Engine options with the given framing.
    pub fn compress_options(&self, framing: Framing) -> CompressOptions {
        let mut options = CompressOptions::new(self.mode, framing).with_level(self.level);
        options.table = self.table.clone();
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.chunk_count, 7);
        assert_eq!(config.slots, 4);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.path, ExecutionPath::Auto);
        assert!(config.verify);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = OrchestratorConfig::new()
            .with_path(ExecutionPath::Software)
            .with_framing(Framing::Gzip)
            .with_chunk_size(1 << 20)
            .with_numa_node(1);
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.path, ExecutionPath::Software);
        assert_eq!(back.chunk_size, Some(1 << 20));
        assert_eq!(back.numa_node, Some(1));

        let sparse: OrchestratorConfig = serde_json::from_str(r#"{"slots": 8}"#).unwrap();
        assert_eq!(sparse.slots, 8);
        assert_eq!(sparse.chunk_count, 7);
    }

    #[test]
    fn test_mode_flags() {
        let config = OrchestratorConfig::new().with_mode(CompressionMode::Stored).with_verify(false);
        assert_eq!(config.mode_flags(), JobFlags::STORED | JobFlags::OMIT_VERIFY);
    }
}
