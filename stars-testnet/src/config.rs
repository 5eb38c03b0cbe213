use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

use clap::Parser;
use rand::{Rng, distributions::Alphanumeric};

use crate::{
    coin::{Coins, validate_denom},
    crypto::SigningAlgo,
    deployment::PortAllocator,
    error::TestnetError,
    genesis::MAX_CHAIN_ID_LEN,
    keyring::{KeyringBackend, Passphrase},
};

pub const DEFAULT_BOND_DENOM: &str = "ustarx";
const CHAIN_ID_SUFFIX_LEN: usize = 6;

/// Flags of the testnet command. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
pub struct TestnetArgs {
    /// Number of validators to initialize the testnet with
    #[arg(long = "v", env = "STARS_TESTNET_VALIDATORS", default_value_t = 4)]
    pub num_validators: usize,

    /// Directory to store initialization data for the testnet
    #[arg(short, long, env = "STARS_TESTNET_OUTPUT_DIR", default_value = "./mytestnet")]
    pub output_dir: PathBuf,

    /// Prefix the directory name for each node with (node results in node0, node1, ...)
    #[arg(long, env = "STARS_TESTNET_NODE_DIR_PREFIX", default_value = "node")]
    pub node_dir_prefix: String,

    /// Home directory of the node's daemon configuration
    #[arg(long, env = "STARS_TESTNET_NODE_DAEMON_HOME", default_value = "starsd")]
    pub node_daemon_home: String,

    /// Starting IP address (192.168.0.1 results in 192.168.0.1, 192.168.0.2, ...)
    #[arg(long, env = "STARS_TESTNET_STARTING_IP", default_value = "192.168.0.1")]
    pub starting_ip_address: String,

    /// First host port of the deployment; each node takes five consecutive ports
    #[arg(long, env = "STARS_TESTNET_STARTING_PORT", default_value_t = 26656)]
    pub starting_port: u16,

    /// Genesis file chain-id, if left blank will be randomly created
    #[arg(long, env = "STARS_TESTNET_CHAIN_ID", default_value = "")]
    pub chain_id: String,

    /// Minimum gas prices to accept for transactions (e.g. 0.01photino,0.001stake)
    #[arg(long, env = "STARS_TESTNET_MIN_GAS_PRICES", default_value = "0.000006ustarx")]
    pub minimum_gas_prices: String,

    /// Select keyring's backend (test|file|memory)
    #[arg(long, env = "STARS_TESTNET_KEYRING_BACKEND", default_value = "test")]
    pub keyring_backend: String,

    /// Passphrase for the file keyring backend
    #[arg(long, env = "STARS_TESTNET_KEYRING_PASSPHRASE", hide_env_values = true)]
    pub keyring_passphrase: Option<String>,

    /// Key signing algorithm to generate keys for
    #[arg(long, env = "STARS_TESTNET_ALGO", default_value = "secp256k1")]
    pub algo: String,

    /// App's stake denom
    #[arg(long, env = "STARS_TESTNET_STAKE_DENOM", default_value = DEFAULT_BOND_DENOM)]
    pub stake_denom: String,

    /// App's unbonding period
    #[arg(long, env = "STARS_TESTNET_UNBONDING_PERIOD", default_value = "72h")]
    pub unbonding_period: String,

    /// Validator genesis coins
    #[arg(long = "coins", env = "STARS_TESTNET_COINS", default_value = "1000000000ustarx")]
    pub initial_coins: String,

    /// Initial self-delegation of each validator
    #[arg(long, env = "STARS_TESTNET_INITIAL_STAKING_AMOUNT", default_value_t = 100_000_000)]
    pub initial_staking_amount: i64,

    /// Docker tag for the deployment descriptor
    #[arg(long, env = "STARS_TESTNET_DOCKER_TAG", default_value = "latest")]
    pub docker_tag: String,
}

/// Validated, immutable settings for one testnet run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestnetConfig {
    pub num_validators: usize,
    pub output_dir: PathBuf,
    pub node_dir_prefix: String,
    pub node_daemon_home: String,
    pub starting_ip: Ipv4Addr,
    pub starting_port: u16,
    pub chain_id: String,
    pub minimum_gas_prices: String,
    pub keyring_backend: KeyringBackend,
    pub keyring_passphrase: Option<Passphrase>,
    pub algo: SigningAlgo,
    pub stake_denom: String,
    pub unbonding_period: Duration,
    pub initial_coins: Coins,
    pub initial_staking_amount: u128,
    pub docker_tag: String,
}

fn invalid(msg: impl Into<String>) -> TestnetError {
    TestnetError::Configuration(msg.into())
}

fn random_chain_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CHAIN_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("chain-{suffix}")
}

/// Checks `<decimal><denom>[,<decimal><denom>...]`.
fn validate_gas_prices(prices: &str) -> Result<(), TestnetError> {
    for price in prices.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let split = price
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid(format!("gas price {price:?} has no denom")))?;
        let (amount, denom) = price.split_at(split);
        if amount.is_empty() || amount.matches('.').count() > 1 || amount.ends_with('.') {
            return Err(invalid(format!("gas price {price:?} has an invalid amount")));
        }
        validate_denom(denom).map_err(|e| invalid(format!("gas price {price:?}: {e}")))?;
    }
    Ok(())
}

fn validate_path_segment(flag: &str, value: &str) -> Result<(), TestnetError> {
    if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(invalid(format!("--{flag} must be a single directory name, got {value:?}")));
    }
    Ok(())
}

impl TestnetConfig {
    /// Validates raw flags. Runs before anything touches the filesystem.
    pub fn from_args(args: TestnetArgs) -> Result<Self, TestnetError> {
        if args.num_validators == 0 {
            return Err(invalid("--v must be at least 1"));
        }
        validate_path_segment("node-dir-prefix", &args.node_dir_prefix)?;
        validate_path_segment("node-daemon-home", &args.node_daemon_home)?;

        let starting_ip: Ipv4Addr = args
            .starting_ip_address
            .parse()
            .map_err(|e| invalid(format!("starting IP {:?}: {e}", args.starting_ip_address)))?;
        let last_offset = u32::try_from(args.num_validators - 1).ok();
        if last_offset.and_then(|offset| u32::from(starting_ip).checked_add(offset)).is_none() {
            return Err(invalid(format!(
                "starting IP {starting_ip} leaves no room for {} validators",
                args.num_validators
            )));
        }
        if !PortAllocator::fits(args.starting_port, args.num_validators) {
            return Err(invalid(format!(
                "starting port {} leaves no room for {} validators",
                args.starting_port, args.num_validators
            )));
        }

        let chain_id = match args.chain_id.trim() {
            "" => random_chain_id(),
            id if id.len() > MAX_CHAIN_ID_LEN => {
                return Err(invalid(format!(
                    "chain ID {id:?} exceeds {MAX_CHAIN_ID_LEN} characters"
                )));
            }
            id => id.to_string(),
        };

        validate_gas_prices(&args.minimum_gas_prices)?;

        let keyring_backend: KeyringBackend =
            args.keyring_backend.parse().map_err(|e| invalid(format!("{e}")))?;
        let keyring_passphrase = match (keyring_backend, args.keyring_passphrase) {
            (KeyringBackend::File, Some(passphrase)) => {
                Some(Passphrase::new(passphrase).map_err(|e| invalid(format!("{e}")))?)
            }
            (KeyringBackend::File, None) => {
                return Err(invalid("--keyring-backend file needs --keyring-passphrase"));
            }
            _ => None,
        };
        let algo: SigningAlgo = args.algo.parse().map_err(|e| invalid(format!("{e}")))?;

        validate_denom(&args.stake_denom)
            .map_err(|e| invalid(format!("stake denom: {e}")))?;

        let unbonding_period = humantime::parse_duration(&args.unbonding_period).map_err(|e| {
            invalid(format!("unbonding period {:?}: {e}", args.unbonding_period))
        })?;
        if unbonding_period.is_zero() {
            return Err(invalid("unbonding period must be positive"));
        }

        let initial_coins = Coins::parse_normalized(&args.initial_coins)
            .map_err(|e| invalid(format!("validator coins: {e}")))?;
        if initial_coins.is_empty() {
            return Err(invalid("validator coins must not be empty"));
        }

        let initial_staking_amount = u128::try_from(args.initial_staking_amount)
            .ok()
            .filter(|amount| *amount > 0)
            .ok_or_else(|| {
                invalid(format!(
                    "initial staking amount must be positive, got {}",
                    args.initial_staking_amount
                ))
            })?;

        if args.docker_tag.trim().is_empty() {
            return Err(invalid("docker tag must not be empty"));
        }

        Ok(Self {
            num_validators: args.num_validators,
            output_dir: args.output_dir,
            node_dir_prefix: args.node_dir_prefix,
            node_daemon_home: args.node_daemon_home,
            starting_ip,
            starting_port: args.starting_port,
            chain_id,
            minimum_gas_prices: args.minimum_gas_prices,
            keyring_backend,
            keyring_passphrase,
            algo,
            stake_denom: args.stake_denom,
            unbonding_period,
            initial_coins,
            initial_staking_amount,
            docker_tag: args.docker_tag,
        })
    }

    /// `node0`, `node1`, ...
    pub fn node_name(&self, index: usize) -> String {
        format!("{}{}", self.node_dir_prefix, index)
    }

    /// `<output>/<node name>/<daemon home>`
    pub fn node_home(&self, index: usize) -> PathBuf {
        self.output_dir.join(self.node_name(index)).join(&self.node_daemon_home)
    }

    pub fn gentxs_dir(&self) -> PathBuf {
        self.output_dir.join("gentxs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<TestnetConfig, TestnetError> {
        let mut argv = vec!["stars-testnet", "-o", "/tmp/stars-testnet-config"];
        argv.extend_from_slice(extra);
        TestnetConfig::from_args(TestnetArgs::try_parse_from(argv).unwrap())
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.num_validators, 4);
        assert_eq!(config.unbonding_period, Duration::from_secs(259_200));
        assert_eq!(config.initial_coins.amount_of("ustarx"), 1_000_000_000);
        assert_eq!(config.initial_staking_amount, 100_000_000);
        assert_eq!(config.keyring_backend, KeyringBackend::Test);
        assert_eq!(config.node_home(2), PathBuf::from("/tmp/stars-testnet-config/node2/starsd"));
    }

    #[test]
    fn blank_chain_id_gets_random_suffix() {
        let config = parse(&[]).unwrap();
        let suffix = config.chain_id.strip_prefix("chain-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(parse(&["--chain-id", "stargaze-dev"]).unwrap().chain_id, "stargaze-dev");
    }

    #[test]
    fn malformed_values_are_configuration_errors() {
        for flags in [
            &["--unbonding-period", "72x"][..],
            &["--coins", "lots"],
            &["--v", "0"],
            &["--stake-denom", "x"],
            &["--initial-staking-amount", "0"],
            &["--keyring-backend", "os"],
            &["--keyring-backend", "file"],
            &["--keyring-backend", "file", "--keyring-passphrase", "short"],
            &["--algo", "bls12381"],
            &["--minimum-gas-prices", "cheap"],
            &["--starting-ip-address", "not-an-ip"],
            &["--starting-port", "65530", "--v", "2"],
            &["--node-dir-prefix", "a/b"],
        ] {
            assert!(
                matches!(parse(flags), Err(TestnetError::Configuration(_))),
                "{flags:?} should be rejected"
            );
        }
    }

    #[test]
    fn oversized_values_are_configuration_errors() {
        let coins = format!("{}ustarx,1ustarx", u128::MAX);
        let validators = (u64::from(u32::MAX) + 1).to_string();
        for flags in [&["--coins", coins.as_str()][..], &["--v", validators.as_str()]] {
            assert!(
                matches!(parse(flags), Err(TestnetError::Configuration(_))),
                "{flags:?} should be rejected"
            );
        }
    }

    #[test]
    fn file_backend_takes_a_passphrase() {
        let config =
            parse(&["--keyring-backend", "file", "--keyring-passphrase", "twelve chars"]).unwrap();
        assert_eq!(config.keyring_backend, KeyringBackend::File);
        assert!(config.keyring_passphrase.is_some());
        assert!(!format!("{config:?}").contains("twelve chars"));

        let config = parse(&["--keyring-passphrase", "twelve chars"]).unwrap();
        assert_eq!(config.keyring_passphrase, None);
    }

    #[test]
    fn gas_prices_accept_decimals() {
        validate_gas_prices("0.000006ustarx,0.01uatom").unwrap();
        assert!(validate_gas_prices("1..0ustarx").is_err());
    }
}
