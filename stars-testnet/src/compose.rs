//! Genesis template composition: module defaults, validator accounts and
//! network-wide parameter overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    coin::{Coin, Coins},
    genesis::{AppState, GenesisDoc, GenesisError},
    modules::{
        self, AuthGenesis, Balance, BankGenesis, BaseAccount, ClaimGenesis, CrisisGenesis,
        GovGenesis, MintGenesis, ModuleBasics, StakingGenesis, format_duration,
    },
};

pub const GOV_MIN_DEPOSIT: u128 = 10_000_000;

/// Network-wide values stamped into the template.
#[derive(Debug, Clone)]
pub struct GenesisOverrides<'a> {
    pub stake_denom: &'a str,
    pub unbonding_period: Duration,
    /// Mint start time.
    pub now: DateTime<Utc>,
}

/// Sorts accounts by address.
pub fn sanitize_accounts(mut accounts: Vec<BaseAccount>) -> Vec<BaseAccount> {
    accounts.sort_by(|a, b| a.address.cmp(&b.address));
    accounts
}

/// Sorts balances by address; coins are already normalized by [`Coins`].
pub fn sanitize_balances(mut balances: Vec<Balance>) -> Vec<Balance> {
    balances.sort_by(|a, b| a.address.cmp(&b.address));
    balances
}

/// Installs the genesis accounts and balances.
pub fn set_accounts(
    app_state: &mut AppState,
    accounts: Vec<BaseAccount>,
    balances: Vec<Balance>,
) -> Result<(), GenesisError> {
    if let Some(mut auth) = app_state.decode::<AuthGenesis>(modules::AUTH)? {
        auth.accounts = sanitize_accounts(accounts);
        app_state.encode(modules::AUTH, &auth)?;
    }
    if let Some(mut bank) = app_state.decode::<BankGenesis>(modules::BANK)? {
        bank.balances = sanitize_balances(balances);
        app_state.encode(modules::BANK, &bank)?;
    }
    Ok(())
}

/// Rewrites the staking, crisis, gov, mint and claim states.
///
/// Modules missing from `app_state` are skipped.
pub fn apply_overrides(
    app_state: &mut AppState,
    overrides: &GenesisOverrides<'_>,
) -> Result<(), GenesisError> {
    let denom = overrides.stake_denom;

    if let Some(mut staking) = app_state.decode::<StakingGenesis>(modules::STAKING)? {
        staking.params.bond_denom = denom.to_string();
        staking.params.unbonding_time = format_duration(overrides.unbonding_period);
        app_state.encode(modules::STAKING, &staking)?;
        debug!(bond_denom = denom, unbonding = %staking.params.unbonding_time, "staking");
    }

    if let Some(mut crisis) = app_state.decode::<CrisisGenesis>(modules::CRISIS)? {
        crisis.constant_fee.denom = denom.to_string();
        app_state.encode(modules::CRISIS, &crisis)?;
    }

    if let Some(mut gov) = app_state.decode::<GovGenesis>(modules::GOV)? {
        gov.deposit_params.min_deposit =
            Coin { denom: denom.to_string(), amount: GOV_MIN_DEPOSIT }.into();
        app_state.encode(modules::GOV, &gov)?;
    }

    if let Some(mut mint) = app_state.decode::<MintGenesis>(modules::MINT)? {
        mint.params.mint_denom = denom.to_string();
        mint.params.start_time = overrides.now;
        app_state.encode(modules::MINT, &mint)?;
    }

    if let Some(mut claim) = app_state.decode::<ClaimGenesis>(modules::CLAIM)? {
        claim.module_account_balance.denom = denom.to_string();
        claim.params.claim_denom = denom.to_string();
        app_state.encode(modules::CLAIM, &claim)?;
    }

    Ok(())
}

/// Builds the template every node starts from before collection.
pub fn compose_template(
    basics: &ModuleBasics,
    chain_id: &str,
    accounts: Vec<BaseAccount>,
    balances: Vec<Balance>,
    overrides: &GenesisOverrides<'_>,
) -> Result<GenesisDoc, GenesisError> {
    let mut app_state = basics.default_genesis();
    set_accounts(&mut app_state, accounts, balances)?;
    apply_overrides(&mut app_state, overrides)?;
    basics.validate_genesis(&app_state)?;
    Ok(GenesisDoc::new(chain_id, overrides.now, app_state))
}

/// Writes the template to each node's genesis path.
pub fn materialize(template: &GenesisDoc, gen_files: &[PathBuf]) -> Result<(), GenesisError> {
    for path in gen_files {
        write_template(template, path)?;
    }
    info!("materialized genesis template for {} nodes", gen_files.len());
    Ok(())
}

fn write_template(template: &GenesisDoc, path: &Path) -> Result<(), GenesisError> {
    template.clone().save_as(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn overrides(now: DateTime<Utc>) -> GenesisOverrides<'static> {
        GenesisOverrides {
            stake_denom: "ustarx",
            unbonding_period: Duration::from_secs(72 * 3600),
            now,
        }
    }

    #[test]
    fn overrides_rewrite_all_five_modules() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut state = ModuleBasics::stargaze().default_genesis();
        apply_overrides(&mut state, &overrides(now)).unwrap();

        let staking: StakingGenesis = state.decode(modules::STAKING).unwrap().unwrap();
        assert_eq!(staking.params.bond_denom, "ustarx");
        assert_eq!(staking.params.unbonding_time, "259200s");

        let crisis: CrisisGenesis = state.decode(modules::CRISIS).unwrap().unwrap();
        assert_eq!(crisis.constant_fee.denom, "ustarx");
        assert_eq!(crisis.constant_fee.amount, 1000);

        let gov: GovGenesis = state.decode(modules::GOV).unwrap().unwrap();
        assert_eq!(gov.deposit_params.min_deposit.to_string(), "10000000ustarx");

        let mint: MintGenesis = state.decode(modules::MINT).unwrap().unwrap();
        assert_eq!(mint.params.mint_denom, "ustarx");
        assert_eq!(mint.params.start_time, now);

        let claim: ClaimGenesis = state.decode(modules::CLAIM).unwrap().unwrap();
        assert_eq!(claim.params.claim_denom, "ustarx");
        assert_eq!(claim.module_account_balance.denom, "ustarx");
    }

    #[test]
    fn claim_balance_keeps_amount_under_new_denom() {
        let mut state = AppState::default();
        state.insert(
            modules::CLAIM,
            json!({
                "module_account_balance": { "denom": "ustars", "amount": "12345" },
                "params": { "claim_denom": "ustars", "airdrop_enabled": true }
            }),
        );
        apply_overrides(&mut state, &overrides(Utc::now())).unwrap();
        let claim = state.get(modules::CLAIM).unwrap();
        assert_eq!(
            claim["module_account_balance"],
            json!({ "denom": "ustarx", "amount": "12345" })
        );
        assert_eq!(claim["params"]["airdrop_enabled"], true);
    }

    #[test]
    fn absent_and_unrelated_modules_are_untouched() {
        let mut state = AppState::default();
        state.insert("txfees", json!({ "basedenom": "uosmo" }));
        apply_overrides(&mut state, &overrides(Utc::now())).unwrap();
        assert_eq!(state.modules().count(), 1);
        assert_eq!(state.get("txfees").unwrap()["basedenom"], "uosmo");
    }

    #[test]
    fn malformed_module_state_is_reported() {
        let mut state = AppState::default();
        state.insert(modules::STAKING, json!({ "params": 7 }));
        assert!(matches!(
            apply_overrides(&mut state, &overrides(Utc::now())),
            Err(GenesisError::ModuleDecode { .. })
        ));
    }

    #[test]
    fn accounts_and_balances_are_sorted() {
        let addresses = ["stars1zzzz", "stars1aaaa"];
        let accounts = sanitize_accounts(addresses.iter().map(|a| BaseAccount::new(a)).collect());
        assert_eq!(accounts[0].address, "stars1aaaa");
        let balances = sanitize_balances(
            addresses
                .iter()
                .map(|a| Balance { address: a.to_string(), coins: Coins::default() })
                .collect(),
        );
        assert_eq!(balances[1].address, "stars1zzzz");
    }
}
