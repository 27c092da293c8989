//! Guard runner: the reconciliation loop around the exit engine.
//!
//! Each tick re-reads the rules file, samples the last traded price
//! per instrument, evaluates the exit engine, and applies the
//! resulting plan through the exchange client. Failures are contained
//! per instrument; nothing inside a tick can take the loop down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::ExchangeApi;
use crate::guard::{evaluate, ExitKind, GuardBook, GuardState, Placement, Plan, RestingSell};
use crate::rules::RuleSet;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Rules file, re-read in full at the start of every tick
    pub rules_path: PathBuf,

    /// Polling interval (seconds)
    pub poll_interval_secs: u64,

    /// Whether to simulate placements and cancels instead of sending them
    pub dry_run: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("rules.json"),
            poll_interval_secs: 2,
            dry_run: true,
        }
    }
}

/// Main guard runner.
pub struct Bot<E: ExchangeApi> {
    config: BotConfig,
    exchange: E,
    book: GuardBook,
    shutdown: Arc<AtomicBool>,
}

impl<E: ExchangeApi> Bot<E> {
    pub fn new(config: BotConfig, exchange: E) -> Self {
        Self {
            config,
            exchange,
            book: GuardBook::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn book(&self) -> &GuardBook {
        &self.book
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Main run loop: tick, sleep, repeat until Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            poll_interval = self.config.poll_interval_secs,
            rules = %self.config.rules_path.display(),
            "Starting exit guard"
        );

        let mut poll_interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                // A bad tick (unreadable rules file, unexpected fault)
                // must not stop monitoring.
                error!(error = %e, "Error in guard tick");
            }
        }

        info!(instruments = self.book.len(), "Exit guard stopped");
        Ok(())
    }

    /// Single iteration: full rules reload, then every instrument once.
    async fn tick(&mut self) -> Result<()> {
        let rules = RuleSet::load(&self.config.rules_path)?;
        debug!(instruments = rules.len(), "Guard tick");
        self.run_cycle(&rules).await;
        Ok(())
    }

    /// Evaluate and reconcile every instrument in `rules` once.
    ///
    /// Instruments are processed independently: one instrument's API
    /// failure never touches another's guard state.
    pub async fn run_cycle(&mut self, rules: &RuleSet) {
        for (instrument, rule) in rules.iter() {
            let state = self.book.ensure(instrument).clone();

            let last = match self.exchange.ticker(instrument).await {
                Ok(ticker) => ticker.last,
                Err(e) => {
                    warn!(instrument = %instrument, error = %e, "Failed to read price, skipping");
                    continue;
                }
            };
            debug!(instrument = %instrument, price = %last, "Price sample");

            let plan = evaluate(&state, last, rule);
            if plan.is_empty() {
                continue;
            }

            let next = self.apply_plan(instrument, state, plan, last).await;
            self.book.commit(instrument, next);
        }
    }

    /// Apply a plan in emitted order and return the state to commit.
    ///
    /// A cancel failure is logged and does not block the placement; a
    /// failed placement leaves the resting slot clear so the next tick
    /// retries while the trigger condition persists.
    async fn apply_plan(
        &self,
        instrument: &str,
        state: GuardState,
        plan: Plan,
        last: Decimal,
    ) -> GuardState {
        let mut next = state;

        if let Some(order_id) = plan.cancel_target {
            info!(
                instrument = %instrument,
                order_id = %order_id,
                price = %last,
                "Stop trigger outranks resting target sell, cancelling it"
            );
            if let Err(e) = self.cancel(instrument, &order_id).await {
                warn!(
                    instrument = %instrument,
                    order_id = %order_id,
                    error = %e,
                    "Cancel failed, proceeding with placement anyway"
                );
            }
            // Cleared regardless of the cancel outcome.
            next.resting = RestingSell::None;
        }

        if let Some(placement) = plan.placement {
            self.sweep_open_orders(instrument).await;

            match self.place(instrument, &placement).await {
                Ok(order_id) => {
                    info!(
                        instrument = %instrument,
                        kind = placement.kind.as_str(),
                        price = %placement.price,
                        quantity = %placement.quantity,
                        order_id = %order_id,
                        "Protective sell placed"
                    );
                    next.resting = match placement.kind {
                        ExitKind::Stop => RestingSell::Stop { order_id },
                        ExitKind::Target => RestingSell::Target { order_id },
                    };
                }
                Err(e) => {
                    warn!(
                        instrument = %instrument,
                        kind = placement.kind.as_str(),
                        error = %e,
                        "Placement failed, will retry next tick"
                    );
                }
            }
        }

        next
    }

    /// Best-effort clear of anything already resting on the exchange
    /// for this instrument. Local state is not authoritative: a stale
    /// or manually placed order would otherwise collide with the new
    /// sell.
    async fn sweep_open_orders(&self, instrument: &str) {
        let orders = match self.exchange.open_orders(instrument).await {
            Ok(orders) => orders,
            Err(e) => {
                if self.config.dry_run {
                    debug!(instrument = %instrument, error = %e, "Open-order sweep unavailable in dry run");
                } else {
                    warn!(instrument = %instrument, error = %e, "Could not list open orders before placing, proceeding");
                }
                return;
            }
        };

        for order in orders {
            debug!(
                instrument = %instrument,
                order_id = %order.id,
                "Clearing resting order before placement"
            );
            if let Err(e) = self.cancel(instrument, &order.id).await {
                warn!(
                    instrument = %instrument,
                    order_id = %order.id,
                    error = %e,
                    "Failed to clear resting order"
                );
            }
        }
    }

    async fn cancel(&self, instrument: &str, order_id: &str) -> Result<()> {
        if self.config.dry_run {
            info!(
                instrument = %instrument,
                order_id = %order_id,
                "[DRY RUN] Would cancel order"
            );
            return Ok(());
        }
        self.exchange.cancel_order(order_id).await
    }

    async fn place(&self, instrument: &str, placement: &Placement) -> Result<String> {
        if self.config.dry_run {
            info!(
                instrument = %instrument,
                kind = placement.kind.as_str(),
                price = %placement.price,
                quantity = %placement.quantity,
                "[DRY RUN] Would place limit sell"
            );
            return Ok(dry_run_order_id(instrument, placement.kind));
        }
        self.exchange
            .place_limit_sell(instrument, placement.quantity, placement.price)
            .await
    }
}

/// Deterministic placeholder id so dry-run state transitions mirror
/// live mode exactly.
pub fn dry_run_order_id(instrument: &str, kind: ExitKind) -> String {
    format!("dry-run-{}-{}", instrument.to_lowercase(), kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Order, OrderSide, Ticker};
    use crate::rules::ExitRule;
    use anyhow::{bail, Context};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Ticker(String),
        OpenOrders(String),
        PlaceLimitSell {
            instrument: String,
            quantity: Decimal,
            price: Decimal,
        },
        CancelOrder(String),
    }

    impl Call {
        fn is_mutation(&self) -> bool {
            matches!(self, Call::PlaceLimitSell { .. } | Call::CancelOrder(_))
        }
    }

    /// Tiny in-memory exchange: placements rest on the book until
    /// cancelled, every call is recorded, and failures are injectable.
    #[derive(Default)]
    struct MockExchange {
        prices: Mutex<HashMap<String, Decimal>>,
        open: Mutex<Vec<Order>>,
        calls: Mutex<Vec<Call>>,
        fail_ticker_for: Mutex<Option<String>>,
        fail_placement: Mutex<bool>,
        next_id: Mutex<u32>,
    }

    impl MockExchange {
        fn new() -> Self {
            Self::default()
        }

        fn set_price(&self, instrument: &str, price: Decimal) {
            self.prices
                .lock()
                .unwrap()
                .insert(instrument.to_string(), price);
        }

        fn fail_ticker(&self, instrument: Option<&str>) {
            *self.fail_ticker_for.lock().unwrap() = instrument.map(str::to_string);
        }

        fn fail_placement(&self, fail: bool) {
            *self.fail_placement.lock().unwrap() = fail;
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn mutation_count(&self) -> usize {
            self.calls().iter().filter(|c| c.is_mutation()).count()
        }

        fn open_order_ids(&self) -> Vec<String> {
            self.open.lock().unwrap().iter().map(|o| o.id.clone()).collect()
        }
    }

    #[async_trait]
    impl ExchangeApi for MockExchange {
        async fn ticker(&self, instrument: &str) -> Result<Ticker> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Ticker(instrument.to_string()));

            if self.fail_ticker_for.lock().unwrap().as_deref() == Some(instrument) {
                bail!("simulated ticker outage");
            }

            let price = self
                .prices
                .lock()
                .unwrap()
                .get(instrument)
                .copied()
                .context("no price configured")?;

            Ok(Ticker {
                bid: price,
                ask: price,
                last: price,
            })
        }

        async fn open_orders(&self, instrument: &str) -> Result<Vec<Order>> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::OpenOrders(instrument.to_string()));

            Ok(self
                .open
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.instrument == instrument)
                .cloned()
                .collect())
        }

        async fn place_limit_sell(
            &self,
            instrument: &str,
            quantity: Decimal,
            price: Decimal,
        ) -> Result<String> {
            self.calls.lock().unwrap().push(Call::PlaceLimitSell {
                instrument: instrument.to_string(),
                quantity,
                price,
            });

            if *self.fail_placement.lock().unwrap() {
                bail!("simulated placement rejection");
            }

            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = format!("order-{}", next_id);

            self.open.lock().unwrap().push(Order {
                id: id.clone(),
                instrument: instrument.to_string(),
                side: OrderSide::Sell,
                quantity,
                quantity_remaining: quantity,
                limit: price,
            });

            Ok(id)
        }

        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::CancelOrder(order_id.to_string()));

            self.open.lock().unwrap().retain(|o| o.id != order_id);
            Ok(())
        }
    }

    fn btc_xyz_rule() -> ExitRule {
        ExitRule {
            stop_trigger: dec!(0.0010),
            stop_limit: dec!(0.00095),
            target_trigger: dec!(0.0015),
            target: dec!(0.0016),
            quantity: dec!(100),
        }
    }

    fn ruleset(entries: &[(&str, &ExitRule)]) -> RuleSet {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, r)| ((*k).to_string(), serde_json::to_value(r).unwrap()))
            .collect();
        RuleSet::from_json(&serde_json::Value::Object(map).to_string()).unwrap()
    }

    fn live_bot(exchange: MockExchange) -> Bot<MockExchange> {
        Bot::new(
            BotConfig {
                dry_run: false,
                ..Default::default()
            },
            exchange,
        )
    }

    #[tokio::test]
    async fn stop_target_wait_scenario() {
        let exchange = MockExchange::new();
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = live_bot(exchange);

        // Tick 1: price under the stop trigger places the stop sell.
        bot.exchange().set_price("BTC-XYZ", dec!(0.0008));
        bot.run_cycle(&rules).await;

        let state = bot.book().get("BTC-XYZ").unwrap();
        assert!(state.stop_sell_open());
        assert!(!state.target_sell_open());
        assert!(bot.exchange().calls().contains(&Call::PlaceLimitSell {
            instrument: "BTC-XYZ".to_string(),
            quantity: dec!(100),
            price: dec!(0.00095),
        }));
        let stop_order_id = state.order_id().unwrap().to_string();

        // Tick 2: price over the target trigger sweeps the resting
        // stop off the books and places the target sell.
        bot.exchange().set_price("BTC-XYZ", dec!(0.0020));
        bot.run_cycle(&rules).await;

        let state = bot.book().get("BTC-XYZ").unwrap();
        assert!(!state.stop_sell_open());
        assert!(state.target_sell_open());
        assert!(bot
            .exchange()
            .calls()
            .contains(&Call::CancelOrder(stop_order_id)));
        assert!(bot.exchange().calls().contains(&Call::PlaceLimitSell {
            instrument: "BTC-XYZ".to_string(),
            quantity: dec!(100),
            price: dec!(0.0016),
        }));

        // Tick 3: wait zone leaves everything alone.
        let mutations_before = bot.exchange().mutation_count();
        bot.exchange().set_price("BTC-XYZ", dec!(0.0012));
        bot.run_cycle(&rules).await;

        let state = bot.book().get("BTC-XYZ").unwrap();
        assert!(state.target_sell_open());
        assert_eq!(bot.exchange().mutation_count(), mutations_before);
    }

    #[tokio::test]
    async fn pinned_price_places_exactly_once() {
        let exchange = MockExchange::new();
        exchange.set_price("BTC-XYZ", dec!(0.0008));
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = live_bot(exchange);

        for _ in 0..5 {
            bot.run_cycle(&rules).await;
        }

        let placements = bot
            .exchange()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::PlaceLimitSell { .. }))
            .count();
        assert_eq!(placements, 1);
        assert!(bot.book().get("BTC-XYZ").unwrap().stop_sell_open());
    }

    #[tokio::test]
    async fn stop_cancels_resting_target_before_placing() {
        let exchange = MockExchange::new();
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = live_bot(exchange);

        // Seed a resting target sell.
        bot.exchange().set_price("BTC-XYZ", dec!(0.0020));
        bot.run_cycle(&rules).await;
        let target_id = bot
            .book()
            .get("BTC-XYZ")
            .unwrap()
            .order_id()
            .unwrap()
            .to_string();

        // Price collapses through the stop trigger.
        bot.exchange().set_price("BTC-XYZ", dec!(0.0009));
        bot.run_cycle(&rules).await;

        let state = bot.book().get("BTC-XYZ").unwrap();
        assert!(state.stop_sell_open());
        assert!(!state.target_sell_open());

        // Cancel of the target comes before the sweep and placement.
        let calls = bot.exchange().calls();
        let cancel_pos = calls
            .iter()
            .position(|c| *c == Call::CancelOrder(target_id.clone()))
            .expect("target order was cancelled");
        let place_pos = calls
            .iter()
            .rposition(|c| {
                matches!(c, Call::PlaceLimitSell { price, .. } if *price == dec!(0.00095))
            })
            .expect("stop sell was placed");
        let sweep_pos = calls
            .iter()
            .rposition(|c| *c == Call::OpenOrders("BTC-XYZ".to_string()))
            .expect("open orders were swept");
        assert!(cancel_pos < sweep_pos);
        assert!(sweep_pos < place_pos);

        // Only the stop sell is left resting on the exchange side.
        assert_eq!(bot.exchange().open_order_ids().len(), 1);
    }

    #[tokio::test]
    async fn ticker_failure_isolates_instruments() {
        let exchange = MockExchange::new();
        exchange.set_price("BTC-AAA", dec!(0.0008));
        exchange.set_price("BTC-BBB", dec!(0.0008));
        exchange.fail_ticker(Some("BTC-AAA"));

        let rule = btc_xyz_rule();
        let rules = ruleset(&[("BTC-AAA", &rule), ("BTC-BBB", &rule)]);
        let mut bot = live_bot(exchange);

        bot.run_cycle(&rules).await;

        // The failing instrument is untouched, the healthy one traded.
        let aaa = bot.book().get("BTC-AAA").unwrap();
        assert!(!aaa.stop_sell_open());
        assert!(bot.book().get("BTC-BBB").unwrap().stop_sell_open());
        assert!(!bot
            .exchange()
            .calls()
            .iter()
            .any(|c| matches!(c, Call::PlaceLimitSell { instrument, .. } if instrument == "BTC-AAA")));
    }

    #[tokio::test]
    async fn failed_placement_retries_next_tick() {
        let exchange = MockExchange::new();
        exchange.set_price("BTC-XYZ", dec!(0.0008));
        exchange.fail_placement(true);
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = live_bot(exchange);

        bot.run_cycle(&rules).await;
        assert!(!bot.book().get("BTC-XYZ").unwrap().stop_sell_open());

        // Exchange recovers; the persisting trigger retries.
        bot.exchange().fail_placement(false);
        bot.run_cycle(&rules).await;
        assert!(bot.book().get("BTC-XYZ").unwrap().stop_sell_open());
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations_but_tracks_state() {
        let exchange = MockExchange::new();
        exchange.set_price("BTC-XYZ", dec!(0.0008));
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = Bot::new(BotConfig::default(), exchange);
        assert!(bot.config.dry_run);

        bot.run_cycle(&rules).await;

        let state = bot.book().get("BTC-XYZ").unwrap();
        assert!(state.stop_sell_open());
        assert_eq!(
            state.order_id(),
            Some(dry_run_order_id("BTC-XYZ", ExitKind::Stop).as_str())
        );
        assert_eq!(bot.exchange().mutation_count(), 0);
    }

    #[tokio::test]
    async fn dry_run_transitions_match_live_mode() {
        let prices = [dec!(0.0008), dec!(0.0020), dec!(0.0012), dec!(0.0010)];
        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);

        let mut transitions: Vec<Vec<(bool, bool)>> = Vec::new();
        for dry_run in [false, true] {
            let exchange = MockExchange::new();
            let mut bot = Bot::new(
                BotConfig {
                    dry_run,
                    ..Default::default()
                },
                exchange,
            );

            let mut seen = Vec::new();
            for price in prices {
                bot.exchange().set_price("BTC-XYZ", price);
                bot.run_cycle(&rules).await;
                let state = bot.book().get("BTC-XYZ").unwrap();
                seen.push((state.stop_sell_open(), state.target_sell_open()));
            }
            if dry_run {
                assert_eq!(bot.exchange().mutation_count(), 0);
            }
            transitions.push(seen);
        }

        assert_eq!(transitions[0], transitions[1]);
    }

    #[tokio::test]
    async fn sweep_clears_manually_placed_orders() {
        let exchange = MockExchange::new();
        exchange.set_price("BTC-XYZ", dec!(0.0008));
        // A conditional sell someone placed by hand.
        exchange.open.lock().unwrap().push(Order {
            id: "manual-1".to_string(),
            instrument: "BTC-XYZ".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(50),
            quantity_remaining: dec!(50),
            limit: dec!(0.0030),
        });

        let rules = ruleset(&[("BTC-XYZ", &btc_xyz_rule())]);
        let mut bot = live_bot(exchange);
        bot.run_cycle(&rules).await;

        assert!(bot
            .exchange()
            .calls()
            .contains(&Call::CancelOrder("manual-1".to_string())));
        // Only our stop sell remains.
        assert_eq!(bot.exchange().open_order_ids().len(), 1);
        assert!(bot.book().get("BTC-XYZ").unwrap().stop_sell_open());
    }
}
