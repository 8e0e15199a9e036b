// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use ethereum_types::U256;

use webb_withdraw::backend::ChainDataSource;
use webb_withdraw::config::cli::{
    create_store, load_config, setup_logger, Command, Opts,
};
use webb_withdraw::context::WithdrawContext;
use webb_withdraw::merkle::{MerkleTree, PoseidonHasher};
use webb_withdraw::note::Note;
use webb_withdraw::relayer::{calculate_fee, RelayerQuery};
use webb_withdraw::types::{PoolId, TypedChainId};

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }
    let config = load_config(args.config_dir.clone())?;
    let store = create_store(&args)?;
    let ctx = WithdrawContext::new(config, Arc::new(store));
    tracing::event!(
        target: webb_withdraw::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %webb_withdraw::probe::Kind::Lifecycle,
        started = true
    );
    match &args.command {
        Command::InspectNote { note } => inspect_note(note)?,
        Command::Relayers { chain } => list_relayers(&ctx, *chain).await,
        Command::Fee { note } => quote_fees(&ctx, note).await?,
        Command::Leaves { chain, address } => {
            fetch_leaves(&ctx, PoolId::new(*chain, address.as_str())).await?
        }
        Command::Roots { chain, address } => {
            read_roots(&ctx, PoolId::new(*chain, address.as_str())).await?
        }
    }
    tracing::event!(
        target: webb_withdraw::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %webb_withdraw::probe::Kind::Lifecycle,
        shutdown = true
    );
    Ok(())
}

fn inspect_note(raw: &str) -> anyhow::Result<()> {
    let note: Note = raw.parse()?;
    let hasher = PoseidonHasher::new();
    println!("version:        {}", note.version());
    println!("backend:        {}", note.backend());
    println!("curve:          {}", note.curve());
    println!("source chain:   {}", note.source_chain_id());
    println!("dest chain:     {}", note.dest_chain_id());
    println!("token:          {}", note.token_symbol());
    println!("amount:         {}", note.amount());
    println!("denomination:   {}", note.denomination());
    println!("cross chain:    {}", note.is_cross_chain());
    println!("commitment:     {:?}", note.leaf_commitment(&hasher)?);
    println!("nullifier hash: {:?}", note.nullifier_hash(&hasher)?);
    Ok(())
}

async fn list_relayers(ctx: &WithdrawContext, chain: Option<TypedChainId>) {
    let manager = ctx.relayer_manager();
    let relayers = match chain {
        Some(chain_id) => {
            manager.discover(&RelayerQuery::chain(chain_id)).await
        }
        None => manager.relayers().await,
    };
    if relayers.is_empty() {
        println!("no reachable relayer");
        return;
    }
    for relayer in relayers {
        println!("{}", relayer);
        for supported in &relayer.chains {
            if chain.map_or(false, |c| c != supported.chain_id) {
                continue;
            }
            let beneficiary = supported.beneficiary.as_deref().unwrap_or("-");
            println!("  {} (beneficiary {})", supported.chain_id, beneficiary);
            for contract in &supported.contracts {
                println!(
                    "    {} {} {} fee {}%",
                    contract.address,
                    contract.token_symbol.as_deref().unwrap_or("?"),
                    contract.size.map(|s| s.to_string()).unwrap_or_default(),
                    contract.withdraw_fee_percentage * 100.0,
                );
            }
        }
    }
}

async fn quote_fees(ctx: &WithdrawContext, raw: &str) -> anyhow::Result<()> {
    let note: Note = raw.parse()?;
    let pool = ctx.config.resolve_pool(
        note.dest_chain_id(),
        note.token_symbol(),
        note.amount(),
    )?;
    let principle = parse_units(note.amount(), note.denomination())
        .with_context(|| format!("bad note amount {}", note.amount()))?;
    let relayers = ctx
        .relayer_manager()
        .discover(&RelayerQuery {
            address: Some(pool.address.clone()),
            ..RelayerQuery::chain(pool.chain_id)
        })
        .await;
    if relayers.is_empty() {
        println!("no relayer relays for {}", pool);
        return Ok(());
    }
    for relayer in relayers {
        let Some(contract) = relayer.contract(&pool) else {
            continue;
        };
        let fee = calculate_fee(contract.withdraw_fee_percentage, principle);
        println!(
            "{}: {}% = {} of {}",
            relayer,
            contract.withdraw_fee_percentage * 100.0,
            fee,
            principle
        );
    }
    Ok(())
}

async fn fetch_leaves(
    ctx: &WithdrawContext,
    pool: PoolId,
) -> anyhow::Result<()> {
    let synchronizer = ctx.synchronizer();
    let leaves = match ctx.backends()?.get(pool.chain_id) {
        Ok(backend) => {
            tracing::info!("Fetching the leaves of {} from its chain", pool);
            synchronizer.fetch_leaves(&*backend, &pool).await?
        }
        Err(_) => {
            let relayer = ctx
                .relayer_manager()
                .random_for_pool(&pool)
                .await
                .with_context(|| {
                    format!("no chain or relayer serves the leaves of {}", pool)
                })?;
            tracing::info!("Fetching the leaves of {} from {}", pool, relayer);
            let source = ctx.relayer_leaves_source(relayer.endpoint.clone());
            synchronizer.fetch_uncached(&source, &pool).await?
        }
    };
    let tree = MerkleTree::new(&PoseidonHasher::new(), &leaves)?;
    println!("pool:   {}", pool);
    println!("leaves: {}", leaves.len());
    println!("root:   {:?}", tree.root());
    Ok(())
}

async fn read_roots(ctx: &WithdrawContext, pool: PoolId) -> anyhow::Result<()> {
    let backend = ctx
        .backends()?
        .get(pool.chain_id)
        .with_context(|| format!("{} is not configured", pool.chain_id))?;
    println!("pool:           {}", pool);
    println!("latest root:    {:?}", backend.get_latest_root(&pool).await?);
    for root in backend.get_neighbor_roots(&pool).await? {
        println!("neighbor root:  {:?}", root);
    }
    println!("denomination:   {}", backend.denomination(&pool).await?);
    Ok(())
}

/// Scales a decimal amount, like `0.5`, to the asset's smallest unit.
fn parse_units(amount: &str, decimals: u8) -> anyhow::Result<U256> {
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    let fraction = fraction.trim_end_matches('0');
    anyhow::ensure!(
        fraction.len() <= decimals as usize,
        "more than {} decimals",
        decimals
    );
    let digits = format!("{whole}{fraction:0<width$}", width = decimals as usize);
    anyhow::ensure!(
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        "not a number"
    );
    Ok(U256::from_dec_str(&digits)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_decimal_amounts() -> anyhow::Result<()> {
        assert_eq!(parse_units("10", 2)?, U256::from(1000));
        assert_eq!(parse_units("0.5", 18)?, U256::exp10(17));
        assert_eq!(parse_units("1.250", 2)?, U256::from(125));
        assert!(parse_units("0.001", 2).is_err());
        assert!(parse_units("ten", 2).is_err());
        Ok(())
    }
}
