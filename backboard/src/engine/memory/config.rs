/// Configuration of a [`MemoryEngine`](super::MemoryEngine).
///
/// # Usage
/// ```text
/// let engine = MemoryEngine::new(MemoryEngineConfig::new().quota_bytes(64 * 1024));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryEngineConfig {
    quota_bytes: Option<usize>,
}

impl MemoryEngineConfig {
    /// A configuration without quota.
    pub fn new() -> Self {
        MemoryEngineConfig::default()
    }

    /// Limits the serialized size of the records of each database. A commit
    /// that would exceed it fails with `QuotaExceededError`.
    pub fn quota_bytes(mut self, quota: usize) -> Self {
        self.quota_bytes = Some(quota);
        self
    }

    pub fn quota(&self) -> Option<usize> {
        self.quota_bytes
    }
}
