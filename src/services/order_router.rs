//! Turns an executable decision into one signed exchange order.
//!
//! Size is rounded to the asset's size decimals, leverage is clamped to the
//! asset maximum and prices are snapped to a valid tick before anything is
//! sent. Every failure ends up in the returned [`OrderAttempt`].

use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::adapters::{AssetInfo, ExchangeResponse, OrderAck};
use crate::config::OrderConfig;
use crate::domain::{
    AccountSnapshot, Decision, OrderAttempt, OrderKind, OrderRequest, OrderSide, OrderStatus,
};
use crate::error::{Result, WalterError};
use crate::exchange::OrderGateway;

/// Significant figures the exchange accepts in a price
const PRICE_SIG_FIGS: i32 = 5;
/// Perp prices carry at most `MAX_PRICE_DECIMALS - szDecimals` decimals
const MAX_PRICE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickBias {
    Nearest,
    Up,
    Down,
}

/// Smallest price increment valid at `price` for an asset with `sz_decimals`
pub fn tick_size(price: Decimal, sz_decimals: u32) -> Decimal {
    let decimal_tick = Decimal::new(1, MAX_PRICE_DECIMALS.saturating_sub(sz_decimals));
    if price <= Decimal::ZERO {
        return decimal_tick;
    }

    let exponent = decimal_exponent(price);
    let sig_step = match exponent - (PRICE_SIG_FIGS - 1) {
        // integer prices are always accepted
        e if e >= 0 => Decimal::ONE,
        e => Decimal::new(1, e.unsigned_abs()),
    };

    decimal_tick.max(sig_step)
}

/// floor(log10(value)) for a positive decimal
fn decimal_exponent(value: Decimal) -> i32 {
    let ten = Decimal::TEN;
    let mut scaled = value;
    let mut exponent = 0;
    while scaled >= ten {
        scaled /= ten;
        exponent += 1;
    }
    while scaled < Decimal::ONE {
        scaled *= ten;
        exponent -= 1;
    }
    exponent
}

pub fn snap_to_tick(price: Decimal, tick: Decimal, bias: TickBias) -> Decimal {
    if tick <= Decimal::ZERO || (price % tick).is_zero() {
        return price.normalize();
    }
    let lower = (price / tick).floor() * tick;
    let upper = lower + tick;
    let snapped = match bias {
        TickBias::Up => upper,
        TickBias::Down => lower,
        TickBias::Nearest => {
            if price - lower >= tick / Decimal::TWO {
                upper
            } else {
                lower
            }
        }
    };
    snapped.normalize()
}

pub fn round_size(size: Decimal, sz_decimals: u32) -> Decimal {
    size.round_dp_with_strategy(sz_decimals, RoundingStrategy::MidpointNearestEven)
        .normalize()
}

pub struct OrderRouter {
    gateway: Arc<dyn OrderGateway>,
    coin: String,
    slippage: Decimal,
    cross_margin: bool,
    confidence_threshold: f64,
    dry_run: bool,
}

impl OrderRouter {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        coin: &str,
        config: &OrderConfig,
        confidence_threshold: f64,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            coin: coin.to_string(),
            slippage: config.slippage_pct,
            cross_margin: config.cross_margin,
            confidence_threshold,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// `None` when the decision is a hold or below the confidence threshold
    #[instrument(skip(self, decision, account), fields(action = %decision.action))]
    pub async fn route(&self, decision: &Decision, account: &AccountSnapshot) -> Option<OrderAttempt> {
        if !decision.is_executable(self.confidence_threshold) {
            info!(
                "Not routing {} (confidence {:.2}, threshold {:.2})",
                decision.action, decision.confidence, self.confidence_threshold
            );
            return None;
        }

        let mut attempt = OrderAttempt::new(&self.coin, decision);
        if let Err(e) = self.execute(decision, account, &mut attempt).await {
            warn!("Order attempt failed: {}", e);
            attempt = attempt.failed(e.to_string());
        }
        Some(attempt)
    }

    async fn execute(
        &self,
        decision: &Decision,
        account: &AccountSnapshot,
        attempt: &mut OrderAttempt,
    ) -> Result<()> {
        let side = OrderSide::from_action(decision.action)
            .ok_or_else(|| WalterError::Internal("hold decisions are never routed".to_string()))?;

        let asset = self.gateway.asset_info(&self.coin).await?;
        let size = round_size(decision.size, asset.sz_decimals);
        if size <= Decimal::ZERO {
            return Err(WalterError::OrderRejected(format!(
                "size {} rounds to zero at {} decimals",
                decision.size, asset.sz_decimals
            )));
        }
        let leverage = decision.leverage.clamp(1, asset.max_leverage.max(1));

        let (bid, ask) = self.gateway.best_prices(&self.coin).await?;
        let kind = OrderKind::for_tif(decision.tif);
        let limit_price = self.price(side, kind, bid, ask, &asset)?;

        let request = OrderRequest {
            coin: self.coin.clone(),
            asset: asset.index,
            side,
            size,
            limit_price,
            tif: decision.tif,
            kind,
            leverage,
            reduce_only: false,
        };
        attempt.request = Some(request.clone());

        if self.dry_run {
            info!(
                "[DRY RUN] Would place {} {} {} @ {} ({}, {}x)",
                side, size, self.coin, limit_price, decision.tif, leverage
            );
            attempt.status = OrderStatus::Simulated;
            return Ok(());
        }

        if account.position.leverage != Some(leverage) {
            let reply = self
                .gateway
                .update_leverage(asset.index, leverage, self.cross_margin)
                .await?;
            if let Some(message) = reply.error_message() {
                warn!("Leverage update to {}x refused: {}", leverage, message);
                attempt.status = OrderStatus::Rejected;
                attempt.error = Some(format!("leverage update to {}x refused: {}", leverage, message));
                attempt.raw_response = serde_json::to_value(&reply).ok();
                return Ok(());
            }
            attempt.leverage_updated = true;
            info!("Leverage on {} set to {}x", self.coin, leverage);
        }

        let reply = self.gateway.place_order(&request).await?;
        apply_reply(attempt, reply);
        info!(
            "Order {} {} {} @ {}: {}",
            side,
            size,
            self.coin,
            limit_price,
            attempt.status.as_str()
        );
        Ok(())
    }

    fn price(
        &self,
        side: OrderSide,
        kind: OrderKind,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        asset: &AssetInfo,
    ) -> Result<Decimal> {
        let (raw, bias) = match (kind, side) {
            (OrderKind::Market, OrderSide::Buy) => {
                let ask = ask.ok_or_else(|| no_book(&self.coin, "ask"))?;
                (ask * (Decimal::ONE + self.slippage), TickBias::Up)
            }
            (OrderKind::Market, OrderSide::Sell) => {
                let bid = bid.ok_or_else(|| no_book(&self.coin, "bid"))?;
                (bid * (Decimal::ONE - self.slippage), TickBias::Down)
            }
            (OrderKind::Limit, _) => {
                let mid = match (bid, ask) {
                    (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
                    (Some(only), None) | (None, Some(only)) => only,
                    (None, None) => return Err(no_book(&self.coin, "bid or ask")),
                };
                (mid, TickBias::Nearest)
            }
        };

        let tick = tick_size(raw, asset.sz_decimals);
        Ok(snap_to_tick(raw, tick, bias))
    }
}

fn no_book(coin: &str, side: &str) -> WalterError {
    WalterError::MarketDataUnavailable(format!("no {} in {} order book", side, coin))
}

/// Record the exchange's verdict on the attempt
fn apply_reply(attempt: &mut OrderAttempt, reply: ExchangeResponse) {
    if let Some(message) = reply.error_message() {
        attempt.status = OrderStatus::Rejected;
        attempt.error = Some(message);
    } else {
        match reply.order_acks().into_iter().next() {
            Some(OrderAck::Filled {
                oid,
                total_sz,
                avg_px,
            }) => {
                attempt.status = OrderStatus::Filled;
                attempt.exchange_order_id = Some(oid);
                attempt.filled_size = total_sz;
                attempt.avg_fill_price = avg_px;
            }
            Some(OrderAck::Resting { oid }) => {
                attempt.status = OrderStatus::Resting;
                attempt.exchange_order_id = Some(oid);
            }
            Some(OrderAck::Error(message)) => {
                attempt.status = OrderStatus::Rejected;
                attempt.error = Some(message);
            }
            None => {
                attempt.status = OrderStatus::Failed;
                attempt.error = Some("exchange reply carried no order status".to_string());
            }
        }
    }
    attempt.raw_response = serde_json::to_value(&reply).ok();
}
