use crate::depot::DepotFile;

/// Leading run of chunks already present and correct on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifiedPrefix {
    pub chunks: usize,
    pub bytes: u64,
    /// Length of the file on disk when it was scanned, `None` if absent
    pub file_len: Option<u64>,
}

impl VerifiedPrefix {
    /// Every chunk verified and nothing trails the declared size
    pub fn covers(&self, file: &DepotFile) -> bool {
        self.chunks == file.chunks.len() && self.file_len == Some(file.size)
    }
}
