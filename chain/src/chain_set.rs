use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use bpq_types::header::{Header, Target, BLOCKS_PER_CHUNK};
use bpq_types::{H256, NetworkParams};
use log::{info, warn};

use crate::branch::{Branch, FORKS_DIR};
use crate::config::Config;
use crate::error::{Error, Result};

/// Registry of every branch, keyed by checkpoint, with the main chain at 0.
///
/// The registry lock only ever guards map access; branch mutexes are never
/// taken while it is held. `swap_with_parent` holds the two branch mutexes
/// for the whole exchange and touches the registry only to re-index.
pub struct ChainSet {
    headers_dir: PathBuf,
    params: NetworkParams,
    branches: RwLock<BTreeMap<u64, Arc<Branch>>>,
}

impl ChainSet {
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(config.headers_dir(), NetworkParams::new(config.network))
    }

    /// Opens the store at a directory, creating it on first run, and
    /// reconstructs the branch graph from the fork files found there.
    pub fn open_at(headers_dir: PathBuf, params: NetworkParams) -> Result<Self> {
        fs::create_dir_all(headers_dir.join(FORKS_DIR))?;
        let chains = ChainSet {
            headers_dir,
            params,
            branches: RwLock::new(BTreeMap::new()),
        };

        let root = Branch::open(&chains.headers_dir, 0, None, chains.hdr_size())?;
        {
            let st = root.lock();
            if !st.file.exists() {
                st.file.create_empty()?;
            }
        }
        chains.register(Arc::new(root));
        chains.load_forks()?;
        Ok(chains)
    }

    /// Loads `forks/fork_<parent>_<checkpoint>` files, parents before
    /// children, dropping any fork whose first header no longer connects.
    fn load_forks(&self) -> Result<()> {
        let mut forks: Vec<(u64, u64)> = Vec::new();
        for entry in fs::read_dir(self.headers_dir.join(FORKS_DIR))? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let mut parts = name.split('_');
            if parts.next() != Some("fork") {
                continue;
            }
            match (parts.next(), parts.next(), parts.next()) {
                (Some(parent), Some(checkpoint), None) => {
                    if let (Ok(parent), Ok(checkpoint)) = (parent.parse(), checkpoint.parse()) {
                        forks.push((parent, checkpoint));
                    }
                }
                _ => {}
            }
        }
        forks.sort_unstable();

        for (parent_id, checkpoint) in forks {
            // A well-formed fork always starts above its parent's checkpoint.
            if parent_id >= checkpoint {
                warn!(target: "chain", "malformed fork_{parent_id}_{checkpoint}, skipping");
                continue;
            }
            let branch = Arc::new(Branch::open(
                &self.headers_dir,
                checkpoint,
                Some(parent_id),
                self.hdr_size(),
            )?);
            let connects = match self.branch(parent_id) {
                Some(parent) => matches!(
                    branch.read_header(self, checkpoint),
                    Ok(Some(ref first)) if parent.can_connect(self, first, false)
                ),
                None => false,
            };
            if connects {
                self.register(branch);
            } else {
                warn!(target: "chain", "cannot connect fork_{parent_id}_{checkpoint}, skipping");
            }
        }
        Ok(())
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub(crate) fn hdr_size(&self) -> usize {
        self.params.hdr_size()
    }

    pub fn branch(&self, checkpoint: u64) -> Option<Arc<Branch>> {
        self.read_branches().get(&checkpoint).cloned()
    }

    /// All branches, ascending by checkpoint (the main chain first).
    pub fn branches(&self) -> Vec<Arc<Branch>> {
        self.read_branches().values().cloned().collect()
    }

    fn branches_desc(&self) -> Vec<Arc<Branch>> {
        self.read_branches().values().rev().cloned().collect()
    }

    fn root(&self) -> Arc<Branch> {
        self.branch(0).expect("registry always holds the root branch")
    }

    fn register(&self, branch: Arc<Branch>) {
        let checkpoint = branch.checkpoint();
        self.write_branches().insert(checkpoint, branch);
    }

    fn read_branches(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u64, Arc<Branch>>> {
        self.branches.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_branches(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u64, Arc<Branch>>> {
        self.branches.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Branch already recording this exact header, if any.
    pub fn check_header(&self, header: &Header) -> Option<Arc<Branch>> {
        self.branches()
            .into_iter()
            .find(|b| b.check_header(self, header))
    }

    /// Branch whose tip this header would extend, if any.
    pub fn can_connect(&self, header: &Header) -> Option<Arc<Branch>> {
        self.branches()
            .into_iter()
            .find(|b| b.can_connect(self, header, true))
    }

    /// Header read from the main chain.
    pub fn read_header(&self, height: u64) -> Result<Option<Header>> {
        self.root().read_header(self, height)
    }

    /// Accepts a single header: appended to the branch it extends, or, when
    /// it only attaches below some branch's tip, recorded as a new fork.
    pub fn connect_header(&self, header: &Header) -> bool {
        if let Some(branch) = self.can_connect(header) {
            return match branch.save_header(self, header) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        target: "chain",
                        "failed to save header at height {}: {e}",
                        header.block_height
                    );
                    false
                }
            };
        }

        let Some(prev_height) = header.block_height.checked_sub(1) else {
            return false;
        };
        if self.branch(header.block_height).is_some() {
            // A fork already starts at this height; nothing new to record.
            return false;
        }
        for branch in self.branches_desc() {
            // Only the branch that stores the predecessor itself may parent
            // the fork; a delegated read would invert the forest.
            if branch.checkpoint() > prev_height {
                continue;
            }
            // Forks start strictly below the tip. Extending the tip is
            // can_connect's job, and it already turned this header down.
            let Some(tip) = branch.height() else {
                continue;
            };
            if prev_height >= tip {
                continue;
            }
            let Ok(Some(prev)) = branch.read_header(self, prev_height) else {
                continue;
            };
            let Ok(prev_hash) = prev.block_hash(self.params()) else {
                continue;
            };
            if prev_hash != header.prev_block_hash {
                continue;
            }
            return match self.fork(&branch, header) {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        target: "chain",
                        "failed to fork at height {}: {e}",
                        header.block_height
                    );
                    false
                }
            };
        }
        false
    }

    /// Starts a new branch holding `header` as its first record.
    pub(crate) fn fork(&self, parent: &Arc<Branch>, header: &Header) -> Result<Arc<Branch>> {
        let checkpoint = header.block_height;
        let parent_checkpoint = parent.checkpoint();
        let branch = Arc::new(Branch::create(
            &self.headers_dir,
            checkpoint,
            parent_checkpoint,
            self.hdr_size(),
        )?);
        self.register(branch.clone());
        info!(target: "chain", "forked branch {checkpoint} off {parent_checkpoint}");
        if let Err(e) = branch.save_header(self, header) {
            self.write_branches().remove(&checkpoint);
            return Err(e);
        }
        Ok(branch)
    }

    /// Accepts a hex-encoded chunk of up to 2016 records at chunk `index`,
    /// verified in full before a single byte is written.
    pub fn connect_chunk(&self, index: u64, hex_data: &str) -> bool {
        match self.try_connect_chunk(index, hex_data) {
            Ok(()) => {
                info!(target: "chain", "validated chunk {index}");
                true
            }
            Err(e) => {
                warn!(target: "chain", "connect_chunk {index} failed: {e}");
                false
            }
        }
    }

    fn try_connect_chunk(&self, index: u64, hex_data: &str) -> Result<()> {
        let data = hex::decode(hex_data).map_err(|_| Error::InvalidField("chunk hex"))?;
        let hdr_size = self.hdr_size();
        if data.is_empty() || data.len() % hdr_size != 0 {
            return Err(Error::LengthMismatch {
                expected: hdr_size,
                got: data.len(),
            });
        }

        let start = index * BLOCKS_PER_CHUNK;
        let first = Header::deserialize(&data[..hdr_size], self.params(), start)?;

        for branch in self.branches_desc() {
            let connects = if start == 0 {
                first.prev_block_hash == H256::ZERO
            } else {
                branch
                    .get_hash(self, start - 1)
                    .map_or(false, |h| h == first.prev_block_hash)
            };
            if !connects {
                continue;
            }
            branch.verify_chunk(self, index, &data)?;
            branch.save_chunk(self, index, &data)?;
            return Ok(());
        }
        Err(Error::NotFound(start))
    }

    /// Recomputes the per-chunk `(hash, target)` table from the main chain.
    pub fn get_checkpoints(&self) -> Result<Vec<(H256, Target)>> {
        let root = self.root();
        let mut table = Vec::new();
        let Some(height) = root.height() else {
            return Ok(table);
        };
        for index in 0..height / BLOCKS_PER_CHUNK {
            let hash = root.get_hash(self, (index + 1) * BLOCKS_PER_CHUNK - 1)?;
            let target = root.get_target(self, index)?;
            table.push((hash, target));
        }
        Ok(table)
    }

    /// Promotes `child` over its parent when it has grown strictly longer
    /// than the stretch of parent it replaces: the two branches exchange
    /// file contents above the fork point, then identities, and the
    /// registry is re-indexed.
    pub(crate) fn swap_with_parent(&self, child: &Arc<Branch>) -> Result<()> {
        let Some(parent_id) = child.parent_id() else {
            return Ok(());
        };
        let Some(parent) = self.branch(parent_id) else {
            return Ok(());
        };

        let mut child_st = child.lock();
        let mut parent_st = parent.lock();
        // The pair may have been re-identified by a concurrent swap between
        // the lookup above and taking the locks.
        if child_st.parent_id != Some(parent_id) || parent_st.checkpoint != parent_id {
            return Ok(());
        }
        let Some(parent_branch_size) =
            (parent_st.checkpoint + parent_st.size).checked_sub(child_st.checkpoint)
        else {
            warn!(
                target: "chain",
                "parent tip below fork point {}, not swapping", child_st.checkpoint
            );
            return Ok(());
        };
        if parent_branch_size >= child_st.size {
            return Ok(());
        }
        info!(target: "chain", "swap {} {}", child_st.checkpoint, parent_id);

        let hdr_size = self.hdr_size() as u64;
        let my_data = child_st
            .file
            .read_at(0, (child_st.size * hdr_size) as usize)?;
        let parent_offset = (child_st.checkpoint - parent_st.checkpoint) * hdr_size;
        let parent_data = parent_st
            .file
            .read_at(parent_offset, (parent_branch_size * hdr_size) as usize)?;

        // The replaced stretch of parent becomes the demoted branch's file;
        // the child's records land in the parent file above the fork point.
        child_st.file.write_at(0, &parent_data, true)?;
        parent_st.file.write_at(parent_offset, &my_data, true)?;

        // Each write above went to the pre-swap path, which is exactly the
        // other identity's post-swap path, so exchanging whole states also
        // hands each branch the right file.
        mem::swap(&mut *child_st, &mut *parent_st);
        child_st.size = child_st.file.size()? / hdr_size;
        parent_st.size = parent_st.file.size()? / hdr_size;
        let child_checkpoint = child_st.checkpoint;
        let parent_checkpoint = parent_st.checkpoint;
        drop(child_st);
        drop(parent_st);

        {
            let mut map = self.write_branches();
            map.insert(child_checkpoint, child.clone());
            map.insert(parent_checkpoint, parent.clone());
        }

        // Branches whose identity-derived path changed move on disk.
        for branch in self.branches() {
            if Arc::ptr_eq(&branch, child) || Arc::ptr_eq(&branch, &parent) {
                continue;
            }
            branch.sync_path(&self.headers_dir)?;
        }
        Ok(())
    }
}
