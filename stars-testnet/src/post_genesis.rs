use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};

use crate::{
    collect::CollectTarget,
    error::TestnetError,
    genesis::{GenesisDoc, GenesisError},
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Genesis(#[from] GenesisError),

    #[error("{file}: {field} differs from node 0 ({found} != {expected})")]
    Mismatch { file: PathBuf, field: &'static str, expected: String, found: String },
}

fn mismatch(
    file: PathBuf,
    field: &'static str,
    expected: impl ToString,
    found: impl ToString,
) -> VerifyError {
    VerifyError::Mismatch { file, field, expected: expected.to_string(), found: found.to_string() }
}

fn verify_against(
    reference: &GenesisDoc,
    reference_bytes: &[u8],
    target: &CollectTarget,
) -> Result<(), VerifyError> {
    let file = target.genesis_file();
    let doc = GenesisDoc::from_file(&file)?;
    if doc.chain_id != reference.chain_id {
        return Err(mismatch(file, "chain_id", &reference.chain_id, &doc.chain_id));
    }
    if doc.genesis_time != reference.genesis_time {
        return Err(mismatch(file, "genesis_time", reference.genesis_time, doc.genesis_time));
    }
    let bytes = doc.app_state.to_bytes()?;
    if bytes != reference_bytes {
        return Err(mismatch(
            file,
            "app_state",
            format!("{} bytes", reference_bytes.len()),
            format!("{} bytes", bytes.len()),
        ));
    }
    Ok(())
}

/// Re-reads every final genesis file and checks it matches node 0's.
pub fn verify_result(targets: &[CollectTarget]) -> Result<(), TestnetError> {
    let Some(first) = targets.first() else {
        return Ok(());
    };
    let reference = GenesisDoc::from_file(&first.genesis_file())
        .map_err(|e| TestnetError::collection(&first.name, e))?;
    let reference_bytes =
        reference.app_state.to_bytes().map_err(|e| TestnetError::collection(&first.name, e))?;

    for target in &targets[1..] {
        if let Err(e) = verify_against(&reference, &reference_bytes, target) {
            error!(node = %target.name, "genesis verification failed: {e}");
            return Err(TestnetError::collection(&target.name, e));
        }
    }
    info!(
        nodes = targets.len(),
        chain_id = %reference.chain_id,
        genesis_time = %reference.genesis_time,
        "verified final genesis files"
    );
    Ok(())
}
