use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bpq_types::header::{Header, Target, BLOCKS_PER_CHUNK};
use bpq_types::H256;
use log::info;

use crate::chain_set::ChainSet;
use crate::error::{Error, Result};
use crate::header_file::HeaderFile;
use crate::verifier;

/// File name of the root branch inside the headers directory.
pub const MAIN_FILE: &str = "blockchain_headers";
/// Subdirectory holding one file per non-root branch.
pub const FORKS_DIR: &str = "forks";

pub(crate) fn branch_file_path(dir: &Path, parent_id: Option<u64>, checkpoint: u64) -> PathBuf {
    match parent_id {
        None => dir.join(MAIN_FILE),
        Some(parent) => dir
            .join(FORKS_DIR)
            .join(format!("fork_{parent}_{checkpoint}")),
    }
}

pub(crate) struct BranchState {
    pub checkpoint: u64,
    pub parent_id: Option<u64>,
    /// Record count, cached from the file length.
    pub size: u64,
    pub file: HeaderFile,
}

/// One stored chain segment: a contiguous run of headers starting at the
/// absolute height `checkpoint`, rooted on a parent branch unless it is the
/// main chain. Everything below the checkpoint is served by the parent.
pub struct Branch {
    state: Mutex<BranchState>,
}

impl Branch {
    /// Opens the branch over whatever file currently backs it; a missing
    /// file reads as empty.
    pub(crate) fn open(
        dir: &Path,
        checkpoint: u64,
        parent_id: Option<u64>,
        hdr_size: usize,
    ) -> Result<Self> {
        let file = HeaderFile::new(branch_file_path(dir, parent_id, checkpoint));
        let size = file.size()? / hdr_size as u64;
        Ok(Branch {
            state: Mutex::new(BranchState {
                checkpoint,
                parent_id,
                size,
                file,
            }),
        })
    }

    /// Creates a fresh fork branch, truncating any stale file at its path.
    pub(crate) fn create(
        dir: &Path,
        checkpoint: u64,
        parent_id: u64,
        hdr_size: usize,
    ) -> Result<Self> {
        let branch = Self::open(dir, checkpoint, Some(parent_id), hdr_size)?;
        {
            let mut st = branch.lock();
            st.file.create_empty()?;
            st.size = 0;
        }
        Ok(branch)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BranchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn checkpoint(&self) -> u64 {
        self.lock().checkpoint
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.lock().parent_id
    }

    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Absolute height of the branch tip; `None` while nothing is stored.
    pub fn height(&self) -> Option<u64> {
        let st = self.lock();
        (st.size > 0).then(|| st.checkpoint + st.size - 1)
    }

    /// Height the next appended header must carry.
    pub(crate) fn next_height(&self) -> u64 {
        let st = self.lock();
        st.checkpoint + st.size
    }

    /// Path of the backing file.
    pub fn path(&self) -> PathBuf {
        self.lock().file.path().to_path_buf()
    }

    /// Renames the backing file to the identity-derived path if the two
    /// have drifted apart (ancestors changed identity during a swap).
    pub(crate) fn sync_path(&self, dir: &Path) -> Result<()> {
        let mut st = self.lock();
        let want = branch_file_path(dir, st.parent_id, st.checkpoint);
        if st.file.path() != want {
            info!(
                target: "chain",
                "renaming {} to {}",
                st.file.path().display(),
                want.display()
            );
            st.file.rename(want)?;
        }
        Ok(())
    }

    /// Reads the header at an absolute height, delegating below the
    /// checkpoint. An all-zero record slot reads as `None`.
    pub fn read_header(&self, chains: &ChainSet, height: u64) -> Result<Option<Header>> {
        let parent_id = {
            let st = self.lock();
            if height >= st.checkpoint {
                if st.size == 0 || height >= st.checkpoint + st.size {
                    return Ok(None);
                }
                let hdr_size = chains.hdr_size();
                let offset = (height - st.checkpoint) * hdr_size as u64;
                let raw = st.file.read_at(offset, hdr_size)?;
                drop(st);
                if raw.iter().all(|&b| b == 0) {
                    return Ok(None);
                }
                return Ok(Some(Header::deserialize(&raw, chains.params(), height)?));
            }
            st.parent_id
        };
        match parent_id.and_then(|id| chains.branch(id)) {
            Some(parent) => parent.read_header(chains, height),
            None => Ok(None),
        }
    }

    /// Canonical hash at a height: genesis for 0, the committed table entry
    /// on covered chunk boundaries, the stored header's hash otherwise.
    pub fn get_hash(&self, chains: &ChainSet, height: u64) -> Result<H256> {
        let params = chains.params();
        if height == 0 {
            return Ok(params.genesis.clone());
        }
        if height < params.checkpoints.len() as u64 * BLOCKS_PER_CHUNK
            && (height + 1) % BLOCKS_PER_CHUNK == 0
        {
            let index = (height / BLOCKS_PER_CHUNK) as usize;
            return Ok(params.checkpoints[index].0.clone());
        }
        let header = self
            .read_header(chains, height)?
            .ok_or(Error::NotFound(height))?;
        Ok(header.block_hash(params)?)
    }

    /// Target computed *from* chunk `index`, governing chunk `index + 1`.
    pub fn get_target(&self, chains: &ChainSet, index: u64) -> Result<Target> {
        let params = chains.params();
        if (index as usize) < params.checkpoints.len() {
            return Ok(params.checkpoints[index as usize].1);
        }
        let first_height = index * BLOCKS_PER_CHUNK;
        let last_height = first_height + BLOCKS_PER_CHUNK - 1;
        let first = self
            .read_header(chains, first_height)?
            .ok_or(Error::NotFound(first_height))?;
        let last = self
            .read_header(chains, last_height)?
            .ok_or(Error::NotFound(last_height))?;
        verifier::next_target(&first, &last, params)
    }

    /// Target that the headers of chunk `index` must meet.
    pub(crate) fn target_for_chunk(&self, chains: &ChainSet, index: u64) -> Result<Target> {
        if index == 0 {
            Ok(chains.params().max_target)
        } else {
            self.get_target(chains, index - 1)
        }
    }

    /// Whether this branch already records the given header at its height.
    pub fn check_header(&self, chains: &ChainSet, header: &Header) -> bool {
        let Ok(hash) = header.block_hash(chains.params()) else {
            return false;
        };
        self.get_hash(chains, header.block_height)
            .map_or(false, |h| h == hash)
    }

    /// Whether the header extends this branch: correct height (unless
    /// `check_height` is off), linked to our tip, and meeting the
    /// proof-of-work rule where the network enforces one.
    pub fn can_connect(&self, chains: &ChainSet, header: &Header, check_height: bool) -> bool {
        let height = header.block_height;
        if check_height && self.next_height() != height {
            return false;
        }
        let params = chains.params();
        if height == 0 {
            return header
                .block_hash(params)
                .map_or(false, |h| h == params.genesis);
        }
        let Ok(prev_hash) = self.get_hash(chains, height - 1) else {
            return false;
        };
        if prev_hash != header.prev_block_hash {
            return false;
        }
        if !params.pow_enabled {
            return true;
        }
        let Ok(target) = self.target_for_chunk(chains, height / BLOCKS_PER_CHUNK) else {
            return false;
        };
        verifier::verify_header(header, &prev_hash, Some(&target), params).is_ok()
    }

    /// Appends one verified header at the tip and lets the registry decide
    /// whether the branch now overtakes its parent.
    pub fn save_header(self: &Arc<Self>, chains: &ChainSet, header: &Header) -> Result<()> {
        let data = header.serialize(chains.params(), false)?;
        {
            let mut st = self.lock();
            let expected = st.checkpoint + st.size;
            if header.block_height != expected {
                return Err(Error::OutOfOrder {
                    expected,
                    got: header.block_height,
                });
            }
            let hdr_size = chains.hdr_size() as u64;
            let offset = (header.block_height - st.checkpoint) * hdr_size;
            st.file.write_at(offset, &data, true)?;
            st.size = st.file.size()? / hdr_size;
        }
        chains.swap_with_parent(self)
    }

    /// Verifies a whole chunk in memory before anything is written: each
    /// record must reserialize bit-exactly, link to its predecessor, and
    /// meet the chunk target; a table-covered chunk must end on the
    /// committed hash.
    pub(crate) fn verify_chunk(&self, chains: &ChainSet, index: u64, data: &[u8]) -> Result<()> {
        let params = chains.params();
        let hdr_size = chains.hdr_size();
        if data.len() % hdr_size != 0 {
            return Err(Error::LengthMismatch {
                expected: data.len() - data.len() % hdr_size,
                got: data.len(),
            });
        }

        let mut height = index * BLOCKS_PER_CHUNK;
        let mut prev_hash = if height == 0 {
            H256::ZERO
        } else {
            self.get_hash(chains, height - 1)?
        };
        let target = if params.pow_enabled {
            Some(self.target_for_chunk(chains, index)?)
        } else {
            None
        };

        for raw in data.chunks(hdr_size) {
            let header = Header::deserialize(raw, params, height)?;
            if header.serialize(params, false)? != raw {
                return Err(Error::InvalidField("record does not reserialize"));
            }
            verifier::verify_header(&header, &prev_hash, target.as_ref(), params)?;
            prev_hash = header.block_hash(params)?;
            height += 1;
        }

        if (index as usize) < params.checkpoints.len() && height == (index + 1) * BLOCKS_PER_CHUNK
        {
            let expected = params.checkpoints[index as usize].0.clone();
            if prev_hash != expected {
                return Err(Error::CheckpointMismatch {
                    height: height - 1,
                    expected,
                    found: prev_hash,
                });
            }
        }
        Ok(())
    }

    /// Writes an already-verified chunk. Records below the checkpoint are
    /// trimmed off; table-covered chunks are overlaid without truncation so
    /// startup refills never shrink the file.
    pub(crate) fn save_chunk(self: &Arc<Self>, chains: &ChainSet, index: u64, data: &[u8]) -> Result<()> {
        let hdr_size = chains.hdr_size() as u64;
        {
            let mut st = self.lock();
            let start = index * BLOCKS_PER_CHUNK;
            let (offset, data) = if start < st.checkpoint {
                let skip = ((st.checkpoint - start) * hdr_size) as usize;
                (0, data.get(skip..).unwrap_or(&[]))
            } else {
                ((start - st.checkpoint) * hdr_size, data)
            };
            let truncate = index as usize >= chains.params().checkpoints.len();
            st.file.write_at(offset, data, truncate)?;
            st.size = st.file.size()? / hdr_size;
        }
        chains.swap_with_parent(self)
    }

    /// Checkpoint of the highest branch forked directly off this one.
    pub fn max_child(&self, chains: &ChainSet) -> Option<u64> {
        let own = self.checkpoint();
        chains
            .branches()
            .into_iter()
            .filter(|b| b.parent_id() == Some(own))
            .map(|b| b.checkpoint())
            .max()
    }

    /// First height at which this branch is the exclusive owner of the
    /// chain suffix: past the highest direct child, or the own checkpoint.
    pub fn effective_checkpoint(&self, chains: &ChainSet) -> u64 {
        self.max_child(chains).unwrap_or_else(|| self.checkpoint())
    }

    /// Number of headers past the effective checkpoint.
    pub fn branch_size(&self, chains: &ChainSet) -> u64 {
        self.next_height()
            .saturating_sub(self.effective_checkpoint(chains))
    }

    /// Short human-readable label: the leading hex of the first hash this
    /// branch exclusively owns, zeros stripped.
    pub fn name(&self, chains: &ChainSet) -> Result<String> {
        let hash = self.get_hash(chains, self.effective_checkpoint(chains))?;
        let hex = hash.to_string();
        Ok(hex.trim_start_matches('0').chars().take(10).collect())
    }
}
