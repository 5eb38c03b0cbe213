use std::{fs, path::Path};

use chrono::{TimeZone, Utc};
use clap::Parser;
use serde_json::Value;
use stars_testnet::{
    FixedClock, TestnetArgs, TestnetConfig, TestnetError, TestnetSummary,
    collect::compute_candidates,
    execute::COMPOSE_FILE,
    genesis::GenesisDoc,
    init_testnet,
    modules::{
        self, BankGenesis, ClaimGenesis, CrisisGenesis, GenutilGenesis, MintGenesis, ModuleBasics,
        StakingGenesis,
    },
    node_config::NodeConfig,
};

fn config(out: &Path, extra: &[&str]) -> Result<TestnetConfig, TestnetError> {
    let mut argv =
        vec!["stars-testnet", "-o", out.to_str().unwrap(), "--chain-id", "stars-localnet"];
    argv.extend_from_slice(extra);
    TestnetConfig::from_args(TestnetArgs::try_parse_from(argv).unwrap())
}

fn clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
}

fn run(out: &Path, extra: &[&str]) -> Result<TestnetSummary, TestnetError> {
    init_testnet(&config(out, extra)?, &ModuleBasics::stargaze(), &clock())
}

#[test]
fn creates_one_directory_and_gentx_per_validator() {
    for count in [1usize, 3] {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("mytestnet");
        let summary = run(&out, &["--v", &count.to_string()]).unwrap();

        assert_eq!(summary.nodes.len(), count);
        for i in 0..count {
            assert!(out.join(format!("node{i}/starsd/config/genesis.json")).is_file());
        }
        assert!(!out.join(format!("node{count}")).exists());

        let gentxs = fs::read_dir(out.join("gentxs")).unwrap().count();
        assert_eq!(gentxs, count);
        assert_eq!(summary.gentx_files.len(), count);
        assert!(out.join(COMPOSE_FILE).is_file());
    }
}

#[test]
fn every_node_gets_the_same_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "3"]).unwrap();

    let contents: Vec<Vec<u8>> =
        summary.genesis_files.iter().map(|f| fs::read(f).unwrap()).collect();
    assert_eq!(contents.len(), 3);
    assert!(contents.windows(2).all(|pair| pair[0] == pair[1]));

    let doc = GenesisDoc::from_file(&summary.genesis_files[0]).unwrap();
    assert_eq!(doc.genesis_time, clock().0);
    assert_eq!(doc.chain_id, "stars-localnet");
    let genutil: GenutilGenesis = doc.app_state.decode(modules::GENUTIL).unwrap().unwrap();
    assert_eq!(genutil.gen_txs.len(), 3);
}

#[test]
fn canonical_state_is_node_zero_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "2"]).unwrap();

    let candidates = compute_candidates(
        &ModuleBasics::stargaze(),
        &summary.chain_id,
        &dir.path().join("gentxs"),
        &summary.collect_targets(),
    )
    .unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0], summary.app_state);
}

#[test]
fn stake_denom_and_unbonding_period_reach_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "1"]).unwrap();
    let state = &summary.app_state;

    let staking: StakingGenesis = state.decode(modules::STAKING).unwrap().unwrap();
    assert_eq!(staking.params.bond_denom, "ustarx");
    assert_eq!(staking.params.unbonding_time, "259200s");

    let crisis: CrisisGenesis = state.decode(modules::CRISIS).unwrap().unwrap();
    assert_eq!(crisis.constant_fee.denom, "ustarx");

    let mint: MintGenesis = state.decode(modules::MINT).unwrap().unwrap();
    assert_eq!(mint.params.mint_denom, "ustarx");
    assert_eq!(mint.params.start_time, clock().0);

    let claim: ClaimGenesis = state.decode(modules::CLAIM).unwrap().unwrap();
    assert_eq!(claim.params.claim_denom, "ustarx");

    let bank: BankGenesis = state.decode(modules::BANK).unwrap().unwrap();
    assert_eq!(bank.balances.len(), 1);
    assert_eq!(bank.balances[0].coins.to_string(), "1000000000ustarx");
}

#[test]
fn malformed_duration_fails_before_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("mytestnet");
    let err = run(&out, &["--unbonding-period", "72x"]).unwrap_err();
    assert!(matches!(err, TestnetError::Configuration(_)));
    assert!(!out.exists());
}

#[test]
fn repeated_runs_differ_only_in_keys() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let a = run(first.path(), &["--v", "2"]).unwrap();
    let b = run(second.path(), &["--v", "2"]).unwrap();

    assert_eq!(a.genesis_time, b.genesis_time);
    let keyed = [modules::AUTH, modules::BANK, modules::GENUTIL];
    let names: Vec<_> = a.app_state.modules().map(|(name, _)| name.clone()).collect();
    assert_eq!(names, b.app_state.modules().map(|(name, _)| name.clone()).collect::<Vec<_>>());
    for name in names.iter().filter(|n| !keyed.contains(&n.as_str())) {
        assert_eq!(a.app_state.get(name), b.app_state.get(name), "module {name} differs");
    }
    assert_ne!(a.nodes[0].node_id, b.nodes[0].node_id);
}

#[test]
fn compose_file_lists_every_node() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "2", "--docker-tag", "v1"]).unwrap();

    let rendered = fs::read_to_string(&summary.compose_file).unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
    let services = doc["services"].as_mapping().unwrap();
    assert_eq!(services.len(), 2);
    for node in ["node0", "node1"] {
        let image = doc["services"][node]["image"].as_str().unwrap();
        assert_eq!(image, "publicawesome/stargaze:v1");
    }
    assert_eq!(doc["services"]["node0"]["ports"][0].as_str().unwrap(), "26656-26658:26656-26658");
    assert_eq!(doc["services"]["node0"]["ports"][2].as_str().unwrap(), "26660:9090");
    assert_eq!(doc["services"]["node1"]["ports"][0].as_str().unwrap(), "26661-26663:26656-26658");
}

#[test]
fn peers_point_at_the_other_validators() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "3"]).unwrap();

    for node in &summary.nodes {
        let config = NodeConfig::load(&node.home).unwrap();
        let peers: Vec<&str> = config.p2p.persistent_peers.split(',').collect();
        assert_eq!(peers.len(), 2);
        assert!(!config.p2p.persistent_peers.contains(&node.node_id));
        for other in summary.nodes.iter().filter(|o| o.index != node.index) {
            assert!(peers.contains(&format!("{}@{}:26656", other.node_id, other.name).as_str()));
        }
    }
}

#[test]
fn underfunded_validator_fails_collection_and_keeps_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("mytestnet");
    let err = run(&out, &["--v", "2", "--coins", "1000ustarx"]).unwrap_err();

    assert!(matches!(err, TestnetError::Collection { ref node, .. } if node == "node0"));
    assert!(out.join("gentxs/node0.json").is_file());
    assert!(!out.join(COMPOSE_FILE).exists());
}

#[test]
fn provisioning_failure_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("mytestnet");
    let err = run(&out, &["--algo", "ed25519"]).unwrap_err();

    assert!(matches!(err, TestnetError::Provisioning { .. }));
    assert!(!out.exists());
}

#[test]
fn provisioning_failure_cleans_up_inside_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("mytestnet");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("README"), "keep me").unwrap();

    let err = run(&out, &["--algo", "ed25519"]).unwrap_err();

    assert!(matches!(err, TestnetError::Provisioning { .. }));
    let left: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(left, ["README"]);
}

#[test]
fn gentx_files_are_signed_create_validator_txs() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(dir.path(), &["--v", "1"]).unwrap();

    let tx: Value = serde_json::from_slice(&fs::read(&summary.gentx_files[0]).unwrap()).unwrap();
    let msg = &tx["body"]["messages"][0];
    assert_eq!(msg["@type"], "/cosmos.staking.v1beta1.MsgCreateValidator");
    assert_eq!(msg["value"]["amount"], "100000000");
    assert_eq!(msg["value"]["denom"], "ustarx");
    assert_eq!(tx["signatures"].as_array().unwrap().len(), 1);
    assert!(tx["body"]["memo"].as_str().unwrap().ends_with("@node0:26656"));
}
