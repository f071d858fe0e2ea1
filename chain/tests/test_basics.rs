use std::fs;
use std::io::Write;

use bpq_chain::{verifier, ChainSet, Config, HeaderFile};
use bpq_types::header::BLOCKS_PER_CHUNK;
use bpq_types::network::{Network, NetworkParams};
use bpq_types::{H256, Header};
use tempfile::TempDir;

fn sol(params: &NetworkParams) -> Vec<u8> {
    let mut sol = vec![0u8; params.sol_length];
    sol[0] = params.sol_length as u8 - 1;
    sol
}

fn make_header(params: &NetworkParams, height: u64, prev: H256, salt: u8) -> Header {
    Header {
        major_version: 1,
        version: 4,
        prev_block_hash: prev,
        merkle_root: H256([salt; 32]),
        witness_merkle_root: H256([0x77; 32]),
        time: 1_600_000_000 + height as u32 * 600,
        bits: 0x1d00_ffff,
        nonce: H256([0x99; 32]),
        sol: sol(params),
        block_height: height,
    }
}

/// Contiguous headers from height 0; `salt` differentiates chains.
fn build_chain(params: &NetworkParams, len: u64, salt: u8) -> Vec<Header> {
    let mut headers = Vec::with_capacity(len as usize);
    let mut prev = H256::ZERO;
    for height in 0..len {
        let header = make_header(params, height, prev, salt);
        prev = header.block_hash(params).unwrap();
        headers.push(header);
    }
    headers
}

/// Regtest parameters with the genesis pinned to the given chain's first block.
fn params_for(headers: &[Header]) -> NetworkParams {
    let mut params = NetworkParams::new(Network::Regtest);
    params.genesis = headers[0].block_hash(&params).unwrap();
    params
}

fn open(dir: &TempDir, params: &NetworkParams) -> ChainSet {
    let _ = env_logger::builder().is_test(true).try_init();
    ChainSet::open_at(dir.path().to_path_buf(), params.clone()).unwrap()
}

fn chunk_hex(params: &NetworkParams, headers: &[Header]) -> String {
    let mut data = Vec::new();
    for header in headers {
        data.extend(header.serialize(params, false).unwrap());
    }
    hex::encode(data)
}

/// Main chain of eleven blocks plus a fork branch holding a variant block 5.
fn setup_forked(dir: &TempDir) -> (ChainSet, Vec<Header>, Header) {
    let probe = NetworkParams::new(Network::Regtest);
    let main = build_chain(&probe, 11, 1);
    let params = params_for(&main);
    let chains = open(dir, &params);
    for header in &main {
        assert!(chains.connect_header(header));
    }

    let fork_start = make_header(
        &params,
        5,
        main[4].block_hash(&params).unwrap(),
        2,
    );
    assert!(chains.connect_header(&fork_start));
    (chains, main, fork_start)
}

#[test]
fn test_genesis_accept() {
    let probe = NetworkParams::new(Network::Regtest);
    let h0 = make_header(&probe, 0, H256::ZERO, 1);
    let mut params = NetworkParams::new(Network::Regtest);
    params.genesis = h0.block_hash(&params).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_header(&h0));

    let root = chains.branch(0).unwrap();
    assert_eq!(root.height(), Some(0));
    assert_eq!(root.parent_id(), None);
}

#[test]
fn test_rejects_wrong_genesis() {
    let probe = NetworkParams::new(Network::Regtest);
    let h0 = make_header(&probe, 0, H256::ZERO, 1);

    let dir = tempfile::tempdir().unwrap();
    // Stock regtest genesis cannot match a fabricated block.
    let chains = open(&dir, &NetworkParams::new(Network::Regtest));
    assert!(!chains.connect_header(&h0));
    assert_eq!(chains.branch(0).unwrap().height(), None);
}

#[test]
fn test_linear_extend() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, 2, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_header(&headers[0]));
    assert!(chains.connect_header(&headers[1]));

    assert_eq!(chains.branch(0).unwrap().height(), Some(1));
    assert_eq!(chains.read_header(1).unwrap(), Some(headers[1].clone()));
}

#[test]
fn test_bad_linkage_rejected() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, 2, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_header(&headers[0]));
    assert!(chains.connect_header(&headers[1]));

    let bad = make_header(&params, 2, H256([0xff; 32]), 1);
    assert!(!chains.connect_header(&bad));
    assert_eq!(chains.branch(0).unwrap().height(), Some(1));
    assert_eq!(chains.read_header(2).unwrap(), None);
}

#[test]
fn test_insufficient_pow_is_not_forked_onto_tip() {
    let probe = NetworkParams::new(Network::Regtest);
    let h0 = make_header(&probe, 0, H256::ZERO, 1);
    let mut params = NetworkParams::new(Network::Regtest);
    params.genesis = h0.block_hash(&params).unwrap();
    params.pow_enabled = true;
    // A 15-bit target no digest can meet, so only the work check can fail.
    params.max_target = verifier::bits_to_target(0x0300_8000).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    // Genesis identity is checked by hash, not by work.
    assert!(chains.connect_header(&h0));

    // Correct linkage and bits, insufficient work: the header must neither
    // extend the tip nor sneak in as a one-record fork above it.
    let mut h1 = make_header(&params, 1, h0.block_hash(&params).unwrap(), 1);
    h1.bits = 0x0300_8000;
    assert!(!chains.connect_header(&h1));
    assert!(chains.branch(1).is_none());
    assert_eq!(chains.branch(0).unwrap().height(), Some(0));
}

#[test]
fn test_fork_creation() {
    let dir = tempfile::tempdir().unwrap();
    let (chains, main, fork_start) = setup_forked(&dir);

    let fork = chains.branch(5).expect("fork branch registered");
    assert_eq!(fork.parent_id(), Some(0));
    assert_eq!(fork.size(), 1);
    assert_eq!(fork.height(), Some(5));
    assert!(dir.path().join("forks").join("fork_0_5").exists());

    // Main chain is untouched.
    let root = chains.branch(0).unwrap();
    assert_eq!(root.height(), Some(10));
    assert_eq!(chains.read_header(5).unwrap(), Some(main[5].clone()));

    // Both versions of block 5 resolve to their own branch.
    assert_eq!(chains.check_header(&main[5]).unwrap().checkpoint(), 0);
    assert_eq!(chains.check_header(&fork_start).unwrap().checkpoint(), 5);

    // The fork reads the shared prefix through its parent.
    assert_eq!(
        fork.read_header(&chains, 3).unwrap(),
        Some(main[3].clone())
    );
}

#[test]
fn test_reorg_via_swap() {
    let dir = tempfile::tempdir().unwrap();
    let (chains, main, fork_start) = setup_forked(&dir);
    let params = chains.params().clone();

    // Grow the fork to height 12; it overtakes the six replaced main
    // records at height 11 and gets promoted.
    let mut fork_headers = vec![fork_start];
    for height in 6..=12 {
        let prev = fork_headers
            .last()
            .unwrap()
            .block_hash(&params)
            .unwrap();
        let header = make_header(&params, height, prev, 2);
        assert!(chains.connect_header(&header));
        fork_headers.push(header);
    }

    let root = chains.branch(0).unwrap();
    assert_eq!(root.height(), Some(12));
    assert_eq!(root.parent_id(), None);
    for (height, expected) in [(4, &main[4]), (5, &fork_headers[0]), (12, &fork_headers[7])] {
        assert_eq!(
            chains.read_header(height).unwrap().as_ref(),
            Some(expected)
        );
    }

    // The replaced main suffix lives on as the demoted fork branch.
    let demoted = chains.branch(5).expect("demoted branch registered");
    assert_eq!(demoted.parent_id(), Some(0));
    assert_eq!(demoted.size(), 6);
    assert_eq!(demoted.height(), Some(10));
    assert_eq!(demoted.path(), dir.path().join("forks").join("fork_0_5"));
    for height in 5..=10 {
        assert_eq!(
            demoted.read_header(&chains, height).unwrap().as_ref(),
            Some(&main[height as usize])
        );
    }

    // The main file holds exactly the thirteen winning records.
    let main_len = fs::metadata(dir.path().join("blockchain_headers"))
        .unwrap()
        .len();
    assert_eq!(main_len, 13 * params.hdr_size() as u64);
}

#[test]
fn test_startup_reconstruction_after_reorg() {
    let dir = tempfile::tempdir().unwrap();
    let (chains, main, fork_start) = setup_forked(&dir);
    let params = chains.params().clone();

    let mut prev = fork_start.block_hash(&params).unwrap();
    for height in 6..=12 {
        let header = make_header(&params, height, prev, 2);
        assert!(chains.connect_header(&header));
        prev = header.block_hash(&params).unwrap();
    }
    drop(chains);

    let reopened = open(&dir, &params);
    assert_eq!(reopened.branches().len(), 2);
    assert_eq!(reopened.branch(0).unwrap().height(), Some(12));
    let demoted = reopened.branch(5).unwrap();
    assert_eq!(demoted.parent_id(), Some(0));
    assert_eq!(
        demoted.read_header(&reopened, 10).unwrap(),
        Some(main[10].clone())
    );
}

#[test]
fn test_startup_drops_unconnected_fork() {
    let dir = tempfile::tempdir().unwrap();
    let (chains, _main, _fork_start) = setup_forked(&dir);
    let params = chains.params().clone();
    drop(chains);

    // A fork file whose first record does not connect anywhere.
    fs::write(
        dir.path().join("forks").join("fork_0_9"),
        vec![0xffu8; params.hdr_size()],
    )
    .unwrap();

    let reopened = open(&dir, &params);
    assert!(reopened.branch(9).is_none());
    assert_eq!(reopened.branches().len(), 2);
}

#[test]
fn test_chunk_accept() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, 2 * BLOCKS_PER_CHUNK, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);

    let first = chunk_hex(&params, &headers[..BLOCKS_PER_CHUNK as usize]);
    assert!(chains.connect_chunk(0, &first));
    assert_eq!(chains.branch(0).unwrap().height(), Some(2015));

    let second = chunk_hex(&params, &headers[BLOCKS_PER_CHUNK as usize..]);
    assert!(chains.connect_chunk(1, &second));
    assert_eq!(chains.branch(0).unwrap().height(), Some(4031));

    let main_len = fs::metadata(dir.path().join("blockchain_headers"))
        .unwrap()
        .len();
    assert_eq!(main_len, 2 * BLOCKS_PER_CHUNK * params.hdr_size() as u64);

    assert_eq!(
        chains.read_header(4031).unwrap().as_ref(),
        headers.last()
    );
}

#[test]
fn test_chunk_is_all_or_nothing() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, BLOCKS_PER_CHUNK + 8, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_chunk(0, &chunk_hex(&params, &headers[..BLOCKS_PER_CHUNK as usize])));

    // Break the linkage in the middle of the second chunk.
    let mut tail: Vec<Header> = headers[BLOCKS_PER_CHUNK as usize..].to_vec();
    tail[4].prev_block_hash = H256([0xee; 32]);
    assert!(!chains.connect_chunk(1, &chunk_hex(&params, &tail)));

    assert_eq!(chains.branch(0).unwrap().height(), Some(2015));
    let main_len = fs::metadata(dir.path().join("blockchain_headers"))
        .unwrap()
        .len();
    assert_eq!(main_len, BLOCKS_PER_CHUNK * params.hdr_size() as u64);
}

#[test]
fn test_checkpoint_table_overrides_store() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, 1, 1);
    let mut params = params_for(&headers);
    let committed = H256([0xaa; 32]);
    params.checkpoints = vec![(committed.clone(), params.max_target)];

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_header(&headers[0]));
    let root = chains.branch(0).unwrap();

    // Covered boundary comes from the table even with nothing stored there.
    assert_eq!(root.get_hash(&chains, 2015).unwrap(), committed);
    // Height 0 is always the genesis.
    assert_eq!(root.get_hash(&chains, 0).unwrap(), params.genesis);
    // A covered non-boundary height still needs a stored header.
    assert!(root.get_hash(&chains, 100).is_err());
}

#[test]
fn test_zero_record_reads_as_unfilled() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, 3, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_header(&headers[0]));
    drop(chains);

    // Overlay record 2 directly, leaving a zero hole at height 1.
    let file = HeaderFile::new(dir.path().join("blockchain_headers"));
    file.write_at(
        2 * params.hdr_size() as u64,
        &headers[2].serialize(&params, false).unwrap(),
        false,
    )
    .unwrap();

    let chains = open(&dir, &params);
    assert_eq!(chains.branch(0).unwrap().height(), Some(2));
    assert_eq!(chains.read_header(1).unwrap(), None);
    assert_eq!(chains.read_header(2).unwrap(), Some(headers[2].clone()));
    assert_eq!(chains.read_header(0).unwrap(), Some(headers[0].clone()));
}

#[test]
fn test_branch_inspection_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let (chains, _main, _fork_start) = setup_forked(&dir);

    let root = chains.branch(0).unwrap();
    let fork = chains.branch(5).unwrap();

    assert_eq!(root.max_child(&chains), Some(5));
    assert_eq!(root.effective_checkpoint(&chains), 5);
    assert_eq!(root.branch_size(&chains), 6);
    assert_eq!(fork.max_child(&chains), None);
    assert_eq!(fork.effective_checkpoint(&chains), 5);
    assert_eq!(fork.branch_size(&chains), 1);
    assert_eq!(root.name(&chains).unwrap().len(), 10);
}

#[test]
fn test_open_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let mut file = fs::File::create(&config_path).unwrap();
    writeln!(file, "datadir = {:?}", dir.path()).unwrap();
    writeln!(file, "network = \"regtest\"").unwrap();

    let config = Config::load(config_path.to_str().unwrap()).unwrap();
    let chains = ChainSet::open(&config).unwrap();
    assert_eq!(chains.branches().len(), 1);
    assert!(dir.path().join("regtest").join("blockchain_headers").exists());
    assert!(dir.path().join("regtest").join("forks").is_dir());
}

#[test]
fn test_get_checkpoints_covers_full_chunks() {
    let probe = NetworkParams::new(Network::Regtest);
    let headers = build_chain(&probe, BLOCKS_PER_CHUNK + 1, 1);
    let params = params_for(&headers);

    let dir = tempfile::tempdir().unwrap();
    let chains = open(&dir, &params);
    assert!(chains.connect_chunk(0, &chunk_hex(&params, &headers[..BLOCKS_PER_CHUNK as usize])));
    assert!(chains.connect_header(&headers[BLOCKS_PER_CHUNK as usize]));

    let table = chains.get_checkpoints().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(
        table[0].0,
        headers[BLOCKS_PER_CHUNK as usize - 1]
            .block_hash(&params)
            .unwrap()
    );
}
