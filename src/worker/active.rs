use dashmap::DashSet;

/// File ids currently being downloaded by some worker
#[derive(Debug, Default)]
pub struct ActiveFiles {
    files: DashSet<i64>,
}

impl ActiveFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `file_id` active. Returns false if another worker
    /// already holds it.
    pub fn try_claim(&self, file_id: i64) -> bool {
        self.files.insert(file_id)
    }

    pub fn release(&self, file_id: i64) {
        self.files.remove(&file_id);
    }

    pub fn contains(&self, file_id: i64) -> bool {
        self.files.contains(&file_id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
