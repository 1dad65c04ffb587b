//! HTTP read client for Ocean-style ledger REST endpoints.
//!
//! Covers the read half of the collaborator traits. Transaction submission
//! needs key custody and is deliberately not implemented here; pair this
//! client with [`crate::DryRunSubmitter`] or an external signer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::LedgerError;
use crate::traits::{BalanceReader, BlockReader, PoolReader, PriceReader, VaultReader};
use crate::types::{
    ActivePrice, PoolLeg, PoolSnapshot, PriceRatio, TokenAmount, VaultData, VaultState,
};

const DEFAULT_BASE_URL: &str = "https://ocean.defichain.com/v0/mainnet";
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const STABLE_SYMBOL: &str = "DUSD";

/// Ocean REST client bound to one wallet address.
#[derive(Debug, Clone)]
pub struct OceanClient {
    client: reqwest::Client,
    base_url: String,
    address: String,
}

impl OceanClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            address: address.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "ledger read");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn list_pools(&self) -> Result<Vec<PoolPairDto>, LedgerError> {
        let body: Envelope<Vec<PoolPairDto>> = self.get_json("poolpairs?size=1000").await?;
        Ok(body.data)
    }
}

fn parse_dec(raw: &str, field: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw)
        .map_err(|_| LedgerError::Malformed(format!("{field}: not a decimal: {raw}")))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultDto {
    vault_id: String,
    state: String,
    #[serde(default)]
    informative_ratio: Option<String>,
    #[serde(default)]
    collateral_value: Option<String>,
    #[serde(default)]
    loan_value: Option<String>,
    #[serde(default)]
    collateral_amounts: Vec<TokenAmountDto>,
    #[serde(default)]
    loan_amounts: Vec<TokenAmountDto>,
    #[serde(default)]
    interest_amounts: Vec<TokenAmountDto>,
    loan_scheme: LoanSchemeDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAmountDto {
    symbol: String,
    amount: String,
    #[serde(default)]
    active_price: Option<ActivePriceDto>,
}

#[derive(Debug, Deserialize)]
struct ActivePriceDto {
    #[serde(default)]
    active: Option<PriceTickDto>,
    #[serde(default)]
    next: Option<PriceTickDto>,
}

#[derive(Debug, Deserialize)]
struct PriceTickDto {
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoanSchemeDto {
    min_col_ratio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolPairDto {
    id: String,
    symbol: String,
    token_a: PoolLegDto,
    token_b: PoolLegDto,
    price_ratio: PriceRatioDto,
    total_liquidity: TotalLiquidityDto,
}

#[derive(Debug, Deserialize)]
struct PoolLegDto {
    id: String,
    symbol: String,
    reserve: String,
}

#[derive(Debug, Deserialize)]
struct PriceRatioDto {
    ab: String,
    ba: String,
}

#[derive(Debug, Deserialize)]
struct TotalLiquidityDto {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AddressTokenDto {
    symbol: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct StatsDto {
    count: StatsCountDto,
}

#[derive(Debug, Deserialize)]
struct StatsCountDto {
    blocks: u64,
}

#[derive(Debug, Deserialize)]
struct BlockDto {
    time: i64,
}

fn convert_amounts(dtos: Vec<TokenAmountDto>) -> Result<SmallVec<[TokenAmount; 4]>, LedgerError> {
    dtos.into_iter()
        .map(|dto| {
            let price = match dto.active_price {
                Some(p) => Some(ActivePrice {
                    active: p
                        .active
                        .map(|t| parse_dec(&t.amount, "activePrice.active"))
                        .transpose()?,
                    next: p
                        .next
                        .map(|t| parse_dec(&t.amount, "activePrice.next"))
                        .transpose()?,
                }),
                None => None,
            };
            Ok(TokenAmount {
                symbol: dto.symbol.clone(),
                amount: parse_dec(&dto.amount, "amount")?,
                active_price: price,
            })
        })
        .collect()
}

fn convert_pool(dto: PoolPairDto) -> Result<PoolSnapshot, LedgerError> {
    // legs may come in either order; normalize so `stable` is always DUSD
    let (asset_dto, stable_dto, asset_per_stable) = if dto.token_b.symbol == STABLE_SYMBOL {
        let ab = parse_dec(&dto.price_ratio.ab, "priceRatio.ab")?;
        (dto.token_a, dto.token_b, ab)
    } else {
        let ba = parse_dec(&dto.price_ratio.ba, "priceRatio.ba")?;
        (dto.token_b, dto.token_a, ba)
    };
    Ok(PoolSnapshot {
        pair: dto.symbol,
        asset: PoolLeg {
            id: asset_dto.id,
            symbol: asset_dto.symbol,
            reserve: parse_dec(&asset_dto.reserve, "reserve")?,
        },
        stable: PoolLeg {
            id: stable_dto.id,
            symbol: stable_dto.symbol,
            reserve: parse_dec(&stable_dto.reserve, "reserve")?,
        },
        price: PriceRatio::from_asset_per_stable(asset_per_stable),
        total_shares: parse_dec(&dto.total_liquidity.token, "totalLiquidity.token")?,
    })
}

#[async_trait]
impl VaultReader for OceanClient {
    async fn vault(&self, vault_id: &str) -> Result<VaultData, LedgerError> {
        let body: Envelope<VaultDto> = self.get_json(&format!("loans/vaults/{vault_id}")).await?;
        let dto = body.data;
        let state = VaultState::from_wire(&dto.state);
        if !state.is_operable() {
            return Err(LedgerError::VaultNotActive {
                vault_id: vault_id.to_string(),
                state,
            });
        }
        Ok(VaultData {
            vault_id: dto.vault_id,
            state,
            collateral_amounts: convert_amounts(dto.collateral_amounts)?,
            loan_amounts: convert_amounts(dto.loan_amounts)?,
            interest_amounts: convert_amounts(dto.interest_amounts)?,
            collateral_value: dto
                .collateral_value
                .as_deref()
                .map(|v| parse_dec(v, "collateralValue"))
                .transpose()?
                .unwrap_or(Decimal::ZERO),
            loan_value: dto
                .loan_value
                .as_deref()
                .map(|v| parse_dec(v, "loanValue"))
                .transpose()?
                .unwrap_or(Decimal::ZERO),
            informative_ratio: dto
                .informative_ratio
                .as_deref()
                .map(|v| parse_dec(v, "informativeRatio"))
                .transpose()?
                .unwrap_or(Decimal::NEGATIVE_ONE),
            scheme_min_ratio: parse_dec(&dto.loan_scheme.min_col_ratio, "minColRatio")?,
        })
    }
}

#[async_trait]
impl PoolReader for OceanClient {
    async fn pool_by_pair(&self, pair: &str) -> Result<Option<PoolSnapshot>, LedgerError> {
        let reversed = pair
            .split_once('-')
            .map(|(a, b)| format!("{b}-{a}"));
        for dto in self.list_pools().await? {
            if dto.symbol == pair || reversed.as_deref() == Some(dto.symbol.as_str()) {
                return Ok(Some(convert_pool(dto)?));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PriceReader for OceanClient {
    async fn active_price(&self, symbol: &str) -> Result<Option<ActivePrice>, LedgerError> {
        let body: Envelope<Vec<ActivePriceDto>> = self
            .get_json(&format!("prices/{symbol}-USD/feed/active?size=1"))
            .await?;
        let Some(dto) = body.data.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(ActivePrice {
            active: dto
                .active
                .map(|t| parse_dec(&t.amount, "active"))
                .transpose()?,
            next: dto.next.map(|t| parse_dec(&t.amount, "next")).transpose()?,
        }))
    }
}

#[async_trait]
impl BalanceReader for OceanClient {
    async fn token_balance(&self, symbol: &str) -> Result<Decimal, LedgerError> {
        Ok(self
            .all_balances()
            .await?
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn all_balances(&self) -> Result<BTreeMap<String, Decimal>, LedgerError> {
        let body: Envelope<Vec<AddressTokenDto>> = self
            .get_json(&format!("address/{}/tokens?size=200", self.address))
            .await?;
        body.data
            .into_iter()
            .map(|t| Ok((t.symbol.clone(), parse_dec(&t.amount, "amount")?)))
            .collect()
    }

    async fn utxo_balance(&self) -> Result<Decimal, LedgerError> {
        let body: Envelope<String> = self
            .get_json(&format!("address/{}/balance", self.address))
            .await?;
        parse_dec(&body.data, "balance")
    }
}

#[async_trait]
impl BlockReader for OceanClient {
    async fn block_height(&self) -> Result<u64, LedgerError> {
        let body: Envelope<StatsDto> = self.get_json("stats").await?;
        Ok(body.data.count.blocks)
    }

    async fn block_time(&self) -> Result<i64, LedgerError> {
        let body: Envelope<Vec<BlockDto>> = self.get_json("blocks?size=1").await?;
        body.data
            .into_iter()
            .next()
            .map(|b| b.time)
            .ok_or_else(|| LedgerError::Malformed("empty block list".to_string()))
    }

    async fn wait_for_next_block(&self, from: u64) -> Result<u64, LedgerError> {
        loop {
            let height = self.block_height().await?;
            if height > from {
                return Ok(height);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
