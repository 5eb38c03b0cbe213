//! Module genesis registry.
//!
//! The application owns its modules' genesis schemas; this registry only
//! knows each module's name, its default genesis JSON, and how to validate
//! it. Typed views exist for the modules the testnet rewrites. Fields those
//! views do not model are carried through `other` untouched.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};

use crate::{
    coin::{Coin, Coins, validate_denom},
    crypto::{ACCOUNT_ADDRESS_PREFIX, decode_address},
    genesis::{AppState, GenesisError},
    gentx::Tx,
};

pub const AUTH: &str = "auth";
pub const BANK: &str = "bank";
pub const STAKING: &str = "staking";
pub const CRISIS: &str = "crisis";
pub const GOV: &str = "gov";
pub const MINT: &str = "mint";
pub const CLAIM: &str = "claim";
pub const GENUTIL: &str = "genutil";
pub const DISTRIBUTION: &str = "distribution";
pub const SLASHING: &str = "slashing";

const DEFAULT_BOND_DENOM: &str = "stake";
const DEFAULT_APP_DENOM: &str = "ustars";
const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingParams {
    pub bond_denom: String,
    pub unbonding_time: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingGenesis {
    pub params: StakingParams,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisGenesis {
    pub constant_fee: Coin,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositParams {
    pub min_deposit: Coins,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovGenesis {
    pub deposit_params: DepositParams,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintParams {
    pub mint_denom: String,
    pub start_time: DateTime<Utc>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintGenesis {
    pub params: MintParams,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimParams {
    pub claim_denom: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimGenesis {
    pub module_account_balance: Coin,
    pub params: ClaimParams,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseAccount {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub address: String,
    pub pub_key: Option<Value>,
    pub account_number: String,
    pub sequence: String,
}

impl BaseAccount {
    pub fn new(address: &str) -> Self {
        Self {
            type_url: "/cosmos.auth.v1beta1.BaseAccount".to_string(),
            address: address.to_string(),
            pub_key: None,
            account_number: "0".to_string(),
            sequence: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthGenesis {
    pub accounts: Vec<BaseAccount>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub coins: Coins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankGenesis {
    pub balances: Vec<Balance>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenutilGenesis {
    pub gen_txs: Vec<Value>,
}

/// Encodes a duration the way the chain writes durations in JSON (`"259200s"`).
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        let nanos = format!("{:09}", d.subsec_nanos());
        format!("{}.{}s", d.as_secs(), nanos.trim_end_matches('0'))
    }
}

/// Inverse of [`format_duration`].
pub fn parse_duration(s: &str) -> Option<Duration> {
    let body = s.strip_suffix('s')?;
    let (secs, frac) = body.split_once('.').unwrap_or((body, ""));
    let secs = secs.parse::<u64>().ok()?;
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let nanos = if frac.is_empty() { 0 } else { format!("{frac:0<9}").parse::<u32>().ok()? };
    Some(Duration::new(secs, nanos))
}

/// Genesis behaviour of one application module.
pub trait AppModuleBasic {
    fn name(&self) -> &'static str;

    fn default_genesis(&self) -> Value;

    fn validate_genesis(&self, state: &Value) -> Result<(), GenesisError>;
}

/// Module whose state is validated through a typed view.
pub struct TypedModule<T> {
    name: &'static str,
    default: fn() -> T,
    validate: fn(&T) -> Result<(), String>,
}

impl<T> TypedModule<T> {
    pub fn new(
        name: &'static str,
        default: fn() -> T,
        validate: fn(&T) -> Result<(), String>,
    ) -> Self {
        Self { name, default, validate }
    }
}

impl<T: Serialize + DeserializeOwned> AppModuleBasic for TypedModule<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn default_genesis(&self) -> Value {
        serde_json::to_value((self.default)()).unwrap_or(Value::Null)
    }

    fn validate_genesis(&self, state: &Value) -> Result<(), GenesisError> {
        let typed: T = serde_json::from_value(state.clone()).map_err(|e| {
            GenesisError::ModuleDecode { module: self.name.to_string(), reason: e.to_string() }
        })?;
        (self.validate)(&typed)
            .map_err(|reason| GenesisError::InvalidModule { module: self.name.to_string(), reason })
    }
}

/// Module the testnet never decodes.
pub struct OpaqueModule {
    name: &'static str,
    default: fn() -> Value,
}

impl OpaqueModule {
    pub fn new(name: &'static str, default: fn() -> Value) -> Self {
        Self { name, default }
    }
}

impl AppModuleBasic for OpaqueModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn default_genesis(&self) -> Value {
        (self.default)()
    }

    fn validate_genesis(&self, state: &Value) -> Result<(), GenesisError> {
        if state.is_object() {
            Ok(())
        } else {
            Err(GenesisError::InvalidModule {
                module: self.name.to_string(),
                reason: "genesis state must be a JSON object".to_string(),
            })
        }
    }
}

/// Registered application modules.
pub struct ModuleBasics {
    modules: Vec<Box<dyn AppModuleBasic>>,
}

impl ModuleBasics {
    pub fn new(modules: Vec<Box<dyn AppModuleBasic>>) -> Self {
        Self { modules }
    }

    /// The Stargaze application's module set.
    pub fn stargaze() -> Self {
        Self::new(vec![
            Box::new(TypedModule::new(AUTH, default_auth, validate_auth)),
            Box::new(TypedModule::new(BANK, default_bank, validate_bank)),
            Box::new(TypedModule::new(STAKING, default_staking, validate_staking)),
            Box::new(OpaqueModule::new(DISTRIBUTION, default_distribution)),
            Box::new(OpaqueModule::new(SLASHING, default_slashing)),
            Box::new(TypedModule::new(CRISIS, default_crisis, validate_crisis)),
            Box::new(TypedModule::new(GOV, default_gov, validate_gov)),
            Box::new(TypedModule::new(MINT, default_mint, validate_mint)),
            Box::new(TypedModule::new(CLAIM, default_claim, validate_claim)),
            Box::new(TypedModule::new(GENUTIL, GenutilGenesis::default, validate_genutil)),
        ])
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|m| m.name())
    }

    pub fn default_genesis(&self) -> AppState {
        let mut state = AppState::default();
        for module in &self.modules {
            state.insert(module.name(), module.default_genesis());
        }
        state
    }

    /// Validates every registered module present in `state`.
    pub fn validate_genesis(&self, state: &AppState) -> Result<(), GenesisError> {
        for module in &self.modules {
            if let Some(raw) = state.get(module.name()) {
                module.validate_genesis(raw)?;
            }
        }
        Ok(())
    }
}

fn other(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn zero_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ZERO_TIME).map(|t| t.with_timezone(&Utc)).unwrap_or_default()
}

fn default_auth() -> AuthGenesis {
    AuthGenesis {
        accounts: Vec::new(),
        other: other(json!({
            "params": {
                "max_memo_characters": "256",
                "tx_sig_limit": "7",
                "tx_size_cost_per_byte": "10",
                "sig_verify_cost_ed25519": "590",
                "sig_verify_cost_secp256k1": "1000"
            }
        })),
    }
}

fn default_bank() -> BankGenesis {
    BankGenesis {
        balances: Vec::new(),
        other: other(json!({
            "params": { "send_enabled": [], "default_send_enabled": true },
            "supply": [],
            "denom_metadata": []
        })),
    }
}

fn default_staking() -> StakingGenesis {
    StakingGenesis {
        params: StakingParams {
            bond_denom: DEFAULT_BOND_DENOM.to_string(),
            unbonding_time: format_duration(Duration::from_secs(21 * 24 * 3600)),
            other: other(json!({
                "max_validators": 100,
                "max_entries": 7,
                "historical_entries": 10000
            })),
        },
        other: other(json!({
            "last_total_power": "0",
            "last_validator_powers": [],
            "validators": [],
            "delegations": [],
            "unbonding_delegations": [],
            "redelegations": [],
            "exported": false
        })),
    }
}

fn default_distribution() -> Value {
    json!({
        "params": {
            "community_tax": "0.020000000000000000",
            "base_proposer_reward": "0.010000000000000000",
            "bonus_proposer_reward": "0.040000000000000000",
            "withdraw_addr_enabled": true
        },
        "fee_pool": { "community_pool": [] },
        "delegator_withdraw_infos": [],
        "previous_proposer": "",
        "outstanding_rewards": [],
        "validator_accumulated_commissions": [],
        "validator_historical_rewards": [],
        "validator_current_rewards": [],
        "delegator_starting_infos": [],
        "validator_slash_events": []
    })
}

fn default_slashing() -> Value {
    json!({
        "params": {
            "signed_blocks_window": "100",
            "min_signed_per_window": "0.500000000000000000",
            "downtime_jail_duration": "600s",
            "slash_fraction_double_sign": "0.050000000000000000",
            "slash_fraction_downtime": "0.010000000000000000"
        },
        "signing_infos": [],
        "missed_blocks": []
    })
}

fn default_crisis() -> CrisisGenesis {
    CrisisGenesis {
        constant_fee: Coin { denom: DEFAULT_BOND_DENOM.to_string(), amount: 1000 },
        other: Map::new(),
    }
}

fn default_gov() -> GovGenesis {
    GovGenesis {
        deposit_params: DepositParams {
            min_deposit: Coin { denom: DEFAULT_BOND_DENOM.to_string(), amount: 10_000_000 }.into(),
            other: other(json!({ "max_deposit_period": "172800s" })),
        },
        other: other(json!({
            "starting_proposal_id": "1",
            "deposits": [],
            "votes": [],
            "proposals": [],
            "voting_params": { "voting_period": "172800s" },
            "tally_params": {
                "quorum": "0.334000000000000000",
                "threshold": "0.500000000000000000",
                "veto_threshold": "0.334000000000000000"
            }
        })),
    }
}

fn default_mint() -> MintGenesis {
    MintGenesis {
        params: MintParams {
            mint_denom: DEFAULT_APP_DENOM.to_string(),
            start_time: zero_time(),
            other: other(json!({
                "initial_annual_provisions": "1000000000000000.000000000000000000",
                "reduction_factor": "0.666666666666666667",
                "blocks_per_year": "6311520"
            })),
        },
        other: other(json!({
            "minter": { "annual_provisions": "0.000000000000000000" }
        })),
    }
}

fn default_claim() -> ClaimGenesis {
    ClaimGenesis {
        module_account_balance: Coin { denom: DEFAULT_APP_DENOM.to_string(), amount: 0 },
        params: ClaimParams {
            claim_denom: DEFAULT_APP_DENOM.to_string(),
            other: other(json!({
                "airdrop_enabled": false,
                "airdrop_start_time": ZERO_TIME,
                "duration_until_decay": "3600s",
                "duration_of_decay": "18000s"
            })),
        },
        other: other(json!({ "claim_records": [] })),
    }
}

fn check_denom(denom: &str) -> Result<(), String> {
    validate_denom(denom).map_err(|e| e.to_string())
}

fn check_unique_addresses<'a>(addresses: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for address in addresses {
        decode_address(ACCOUNT_ADDRESS_PREFIX, address).map_err(|e| e.to_string())?;
        if !seen.insert(address) {
            return Err(format!("duplicate address {address}"));
        }
    }
    Ok(())
}

fn validate_auth(state: &AuthGenesis) -> Result<(), String> {
    check_unique_addresses(state.accounts.iter().map(|a| a.address.as_str()))
}

fn validate_bank(state: &BankGenesis) -> Result<(), String> {
    check_unique_addresses(state.balances.iter().map(|b| b.address.as_str()))?;
    for balance in &state.balances {
        for coin in balance.coins.iter() {
            check_denom(&coin.denom)?;
        }
    }
    Ok(())
}

fn validate_staking(state: &StakingGenesis) -> Result<(), String> {
    check_denom(&state.params.bond_denom)?;
    match parse_duration(&state.params.unbonding_time) {
        Some(d) if !d.is_zero() => Ok(()),
        _ => Err(format!("invalid unbonding time {:?}", state.params.unbonding_time)),
    }
}

fn validate_crisis(state: &CrisisGenesis) -> Result<(), String> {
    check_denom(&state.constant_fee.denom)
}

fn validate_gov(state: &GovGenesis) -> Result<(), String> {
    if state.deposit_params.min_deposit.is_empty() {
        return Err("minimum deposit must not be empty".to_string());
    }
    state.deposit_params.min_deposit.iter().try_for_each(|c| check_denom(&c.denom))
}

fn validate_mint(state: &MintGenesis) -> Result<(), String> {
    check_denom(&state.params.mint_denom)
}

fn validate_claim(state: &ClaimGenesis) -> Result<(), String> {
    check_denom(&state.params.claim_denom)?;
    check_denom(&state.module_account_balance.denom)
}

fn validate_genutil(state: &GenutilGenesis) -> Result<(), String> {
    for raw in &state.gen_txs {
        let tx: Tx = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        tx.create_validator_msg().map_err(|e| e.to_string())?;
    }
    Ok(())
}
