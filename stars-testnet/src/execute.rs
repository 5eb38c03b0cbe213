use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    coin::Coin,
    collect::{CollectTarget, collect_gen_files},
    compose::{GenesisOverrides, compose_template, materialize},
    config::TestnetConfig,
    deployment::{PortAllocator, TestnetNode, render_compose},
    error::TestnetError,
    genesis::AppState,
    gentx::{GentxRequest, build_gentx, peer_memo, write_gentx},
    modules::{Balance, BaseAccount, ModuleBasics},
    post_genesis::verify_result,
    provision::{NodeIdentity, provision_node},
    utils::{OutputDirGuard, ensure_dir, write_file},
};

pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Source of wall-clock time for the mint start and the genesis time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Coordinator progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Provision(usize),
    ComposeTemplate,
    Materialize,
    Collect,
    Verify,
    RenderDeployment,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => f.write_str("init"),
            Phase::Provision(i) => write!(f, "provision({i})"),
            Phase::ComposeTemplate => f.write_str("compose-template"),
            Phase::Materialize => f.write_str("materialize"),
            Phase::Collect => f.write_str("collect"),
            Phase::Verify => f.write_str("verify"),
            Phase::RenderDeployment => f.write_str("render-deployment"),
            Phase::Done => f.write_str("done"),
        }
    }
}

/// What a successful run left on disk.
#[derive(Debug, Clone)]
pub struct TestnetSummary {
    pub output_dir: PathBuf,
    pub chain_id: String,
    pub genesis_time: DateTime<Utc>,
    pub app_state: AppState,
    pub nodes: Vec<NodeIdentity>,
    pub gentx_files: Vec<PathBuf>,
    pub genesis_files: Vec<PathBuf>,
    pub compose_file: PathBuf,
}

impl TestnetSummary {
    pub fn collect_targets(&self) -> Vec<CollectTarget> {
        self.nodes.iter().map(collect_target).collect()
    }
}

fn collect_target(node: &NodeIdentity) -> CollectTarget {
    CollectTarget {
        name: node.name.clone(),
        home: node.home.clone(),
        node_id: node.node_id.clone(),
        validator_pub_key: node.validator_pub_key.clone(),
    }
}

struct Coordinator<'a> {
    config: &'a TestnetConfig,
    basics: &'a ModuleBasics,
    clock: &'a dyn Clock,
    phase: Phase,
}

impl<'a> Coordinator<'a> {
    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    fn run(&mut self) -> Result<TestnetSummary, TestnetError> {
        let config = self.config;
        let gentxs_dir = config.gentxs_dir();
        ensure_dir(&gentxs_dir).map_err(|e| TestnetError::provisioning("gentxs", e))?;

        let mut nodes = Vec::with_capacity(config.num_validators);
        let mut accounts = Vec::with_capacity(config.num_validators);
        let mut balances = Vec::with_capacity(config.num_validators);
        let mut gentx_files = Vec::with_capacity(config.num_validators);

        for index in 0..config.num_validators {
            self.enter(Phase::Provision(index));
            let node = provision_node(config, index)?;
            let identity = node.identity;

            let request = GentxRequest {
                chain_id: &config.chain_id,
                key_name: &identity.name,
                moniker: &identity.name,
                memo: peer_memo(&identity.node_id, &identity.name),
                consensus_pub_key: identity.validator_pub_key.clone(),
                self_delegation: Coin {
                    denom: config.stake_denom.clone(),
                    amount: config.initial_staking_amount,
                },
            };
            let tx = build_gentx(node.keyring.as_ref(), &request)
                .map_err(|e| TestnetError::signing(&identity.name, e))?;
            gentx_files.push(
                write_gentx(&gentxs_dir, &identity.name, &tx)
                    .map_err(|e| TestnetError::signing(&identity.name, e))?,
            );

            accounts.push(BaseAccount::new(&identity.account.address));
            balances.push(Balance {
                address: identity.account.address.clone(),
                coins: config.initial_coins.clone(),
            });
            nodes.push(identity);
        }

        self.enter(Phase::ComposeTemplate);
        let overrides = GenesisOverrides {
            stake_denom: &config.stake_denom,
            unbonding_period: config.unbonding_period,
            now: self.clock.now(),
        };
        let template =
            compose_template(self.basics, &config.chain_id, accounts, balances, &overrides)
                .map_err(TestnetError::composition)?;

        self.enter(Phase::Materialize);
        let targets: Vec<CollectTarget> = nodes.iter().map(collect_target).collect();
        let gen_files: Vec<PathBuf> = targets.iter().map(CollectTarget::genesis_file).collect();
        materialize(&template, &gen_files).map_err(TestnetError::composition)?;

        self.enter(Phase::Collect);
        let genesis_time = self.clock.now();
        let collected =
            collect_gen_files(self.basics, &config.chain_id, &gentxs_dir, &targets, genesis_time)?;

        self.enter(Phase::Verify);
        verify_result(&targets)?;

        self.enter(Phase::RenderDeployment);
        let compose_file = render_deployment(config, &nodes)?;

        self.enter(Phase::Done);
        Ok(TestnetSummary {
            output_dir: config.output_dir.clone(),
            chain_id: config.chain_id.clone(),
            genesis_time: collected.genesis_time,
            app_state: collected.app_state,
            nodes,
            gentx_files,
            genesis_files: collected.files,
            compose_file,
        })
    }
}

fn render_deployment(
    config: &TestnetConfig,
    nodes: &[NodeIdentity],
) -> Result<PathBuf, TestnetError> {
    let mut ports = PortAllocator::new(config.starting_port);
    let testnet_nodes = nodes
        .iter()
        .map(|node| {
            ports.allocate(&node.name).ok_or_else(|| {
                TestnetError::templating(format!("no host ports left for {}", node.name))
            })
        })
        .collect::<Result<Vec<TestnetNode>, _>>()?;
    let rendered = render_compose(&testnet_nodes, &config.docker_tag, &config.node_daemon_home)
        .map_err(TestnetError::templating)?;
    write_file(COMPOSE_FILE, &config.output_dir, rendered.as_bytes())
        .map_err(TestnetError::templating)
}

/// Bootstraps a complete local testnet under `config.output_dir`.
///
/// On failure the output created by this run is removed again, except after
/// a collection failure where partial files are left for inspection.
pub fn init_testnet(
    config: &TestnetConfig,
    basics: &ModuleBasics,
    clock: &dyn Clock,
) -> Result<TestnetSummary, TestnetError> {
    info!(
        chain_id = %config.chain_id,
        validators = config.num_validators,
        output = %config.output_dir.display(),
        "=== Initializing testnet ==="
    );
    let guard = OutputDirGuard::acquire(&config.output_dir)
        .map_err(|e| TestnetError::provisioning(&config.output_dir.display().to_string(), e))?;

    let mut coordinator = Coordinator { config, basics, clock, phase: Phase::Init };
    match coordinator.run() {
        Ok(summary) => {
            guard.keep();
            info!(nodes = summary.nodes.len(), "=== Testnet initialized ===");
            Ok(summary)
        }
        Err(e) => {
            if e.keeps_partial_output() {
                let kept = guard.keep();
                warn!(phase = %coordinator.phase, "keeping partial output in {}", kept.display());
            } else {
                warn!(phase = %coordinator.phase, "aborting testnet initialization");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_render_for_logs() {
        assert_eq!(Phase::Provision(3).to_string(), "provision(3)");
        assert_eq!(Phase::RenderDeployment.to_string(), "render-deployment");
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock(Utc::now());
        assert_eq!(clock.now(), clock.now());
    }
}
