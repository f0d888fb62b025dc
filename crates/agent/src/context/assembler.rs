//! Context assembly: bound prior exchanges by a token budget.
//!
//! # Algorithm
//!
//! 1. Keep the most recent `max_pairs` exchanges.
//! 2. Walk them in the configured [`Retention`] order.
//! 3. Charge each exchange `count(user) + count(assistant) + pair_overhead`.
//! 4. Accept while `running_total + cost <= floor(budget * safety_factor)`;
//!    stop at the first exchange that does not fit. Cheaper later exchanges
//!    are never reconsidered.
//! 5. Emit accepted exchanges as user/assistant turns in chronological order.
//!
//! # Timestamps
//!
//! When every exchange carries a timestamp, those are used. Otherwise every
//! exchange gets a synthetic one: exchange `i` of `n` is placed at
//! `now - (n + 5 - i) * pair_spacing`, and its reply `reply_offset` later,
//! so the emitted turns are strictly increasing in time.
//!
//! # Determinism
//!
//! Identical inputs (including `now`) always produce identical outputs.

use chrono::{DateTime, TimeDelta, Utc};
use ctxprompt_config::ContextConfig;
use ctxprompt_core::error::ValidationError;
use ctxprompt_core::history::{BoundedContext, Exchange, HistoryTurn, Retention};
use ctxprompt_core::message::Role;
use ctxprompt_core::provider::TokenCounter;
use std::sync::Arc;
use tracing::debug;

use crate::context::token::HeuristicTokenCounter;

/// Synthetic timestamps end this many pair slots before "now".
const SYNTHETIC_LEAD_SLOTS: usize = 5;

/// Assembly policy.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Nominal token budget.
    pub budget: usize,
    /// Most recent exchanges considered at all.
    pub max_pairs: usize,
    /// Fraction of `budget` that history may use, in (0, 1].
    pub safety_factor: f64,
    /// Framing cost charged once per exchange.
    pub pair_overhead: usize,
    pub retention: Retention,
    pub reply_offset: TimeDelta,
    pub pair_spacing: TimeDelta,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            budget: 16_384,
            max_pairs: 20,
            safety_factor: 0.8,
            pair_overhead: 5,
            retention: Retention::OldestFirst,
            reply_offset: TimeDelta::seconds(15),
            pair_spacing: TimeDelta::seconds(30),
        }
    }
}

impl TryFrom<&ContextConfig> for AssemblerConfig {
    type Error = ValidationError;

    fn try_from(config: &ContextConfig) -> Result<Self, Self::Error> {
        let seconds = |name: &str, secs: i64| {
            TimeDelta::try_seconds(secs).ok_or_else(|| {
                ValidationError::InvalidParameter(format!("{name} out of range: {secs}"))
            })
        };

        Ok(Self {
            budget: config.token_cap,
            max_pairs: config.history_cap,
            safety_factor: config.safety_factor,
            pair_overhead: config.pair_overhead,
            retention: config.retention,
            reply_offset: seconds("reply_offset_secs", config.reply_offset_secs)?,
            pair_spacing: seconds("pair_spacing_secs", config.pair_spacing_secs)?,
        })
    }
}

/// Stateless assembler: owns its policy and token counter, nothing per call.
#[derive(Clone)]
pub struct ContextAssembler {
    config: AssemblerConfig,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default(), Arc::new(HeuristicTokenCounter))
    }
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self { config, counter }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// The cap totals are checked against.
    pub fn limit(&self) -> usize {
        (self.config.budget as f64 * self.config.safety_factor).floor() as usize
    }

    /// Reject a policy that could never produce a meaningful bound.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config.budget == 0 {
            return Err(ValidationError::InvalidBudget("budget must be > 0".into()));
        }
        let factor = self.config.safety_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ValidationError::InvalidBudget(format!(
                "safety factor must be in (0, 1], got {factor}"
            )));
        }
        // A reply must land strictly between its question and the next one.
        let (offset, spacing) = (self.config.reply_offset, self.config.pair_spacing);
        if offset <= TimeDelta::zero() || offset >= spacing {
            return Err(ValidationError::InvalidParameter(format!(
                "reply offset ({}s) must be > 0 and below pair spacing ({}s)",
                offset.num_seconds(),
                spacing.num_seconds()
            )));
        }
        Ok(())
    }

    /// Tokens charged for one exchange.
    pub fn pair_cost(&self, exchange: &Exchange) -> usize {
        self.counter.count(&exchange.user)
            + self.counter.count(&exchange.assistant)
            + self.config.pair_overhead
    }

    pub fn build(&self, history: &[Exchange]) -> Result<BoundedContext, ValidationError> {
        self.build_at(history, Utc::now())
    }

    /// [`build`](Self::build) with an explicit "now" for synthetic timestamps.
    pub fn build_at(
        &self,
        history: &[Exchange],
        now: DateTime<Utc>,
    ) -> Result<BoundedContext, ValidationError> {
        self.validate()?;
        let limit = self.limit();

        let window_start = history.len().saturating_sub(self.config.max_pairs);
        let window = &history[window_start..];

        let order: Box<dyn Iterator<Item = usize>> = match self.config.retention {
            Retention::OldestFirst => Box::new(0..window.len()),
            Retention::NewestFirst => Box::new((0..window.len()).rev()),
        };

        let mut accepted = Vec::new();
        let mut total = 0usize;
        for index in order {
            let cost = self.pair_cost(&window[index]);
            if total + cost > limit {
                debug!(index, cost, total, limit, "Exchange exceeds budget, stopping");
                break;
            }
            total += cost;
            accepted.push(index);
        }
        accepted.sort_unstable();

        let synthesize = window.iter().any(|e| e.created_at.is_none());
        let mut turns = Vec::with_capacity(accepted.len() * 2);
        for index in accepted {
            let exchange = &window[index];
            let asked_at = match exchange.created_at {
                Some(t) if !synthesize => t,
                _ => self.synthetic_time(now, window.len(), index)?,
            };
            let replied_at = asked_at
                .checked_add_signed(self.config.reply_offset)
                .ok_or_else(|| out_of_range(asked_at))?;
            turns.push(HistoryTurn {
                role: Role::User,
                text: exchange.user.clone(),
                created_at: asked_at,
            });
            turns.push(HistoryTurn {
                role: Role::Assistant,
                text: exchange.assistant.clone(),
                created_at: replied_at,
            });
        }

        debug!(
            considered = window.len(),
            pairs = turns.len() / 2,
            tokens = total,
            limit,
            "Assembled bounded context"
        );

        Ok(BoundedContext {
            turns,
            total_tokens: total,
            limit,
        })
    }

    fn synthetic_time(
        &self,
        now: DateTime<Utc>,
        len: usize,
        index: usize,
    ) -> Result<DateTime<Utc>, ValidationError> {
        i32::try_from(len - index + SYNTHETIC_LEAD_SLOTS)
            .ok()
            .and_then(|slots| self.config.pair_spacing.checked_mul(slots))
            .and_then(|back| now.checked_sub_signed(back))
            .ok_or_else(|| out_of_range(now))
    }
}

fn out_of_range(base: DateTime<Utc>) -> ValidationError {
    ValidationError::InvalidParameter(format!(
        "synthetic history timestamps overflow around {base}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Counter where every text costs its length in chars.
    fn char_counter() -> Arc<dyn TokenCounter> {
        Arc::new(|text: &str| text.chars().count())
    }

    fn assembler(budget: usize, retention: Retention) -> ContextAssembler {
        ContextAssembler::new(
            AssemblerConfig {
                budget,
                retention,
                pair_overhead: 0,
                ..AssemblerConfig::default()
            },
            char_counter(),
        )
    }

    /// An exchange costing exactly `tokens` under `char_counter` with zero overhead.
    fn exchange(tag: char, tokens: usize) -> Exchange {
        let half = tokens / 2;
        Exchange::new(tag.to_string().repeat(half), tag.to_string().repeat(tokens - half))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn user_texts(ctx: &BoundedContext) -> Vec<String> {
        ctx.turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.text.clone())
            .collect()
    }

    #[test]
    fn empty_history_is_empty() {
        let ctx = assembler(100, Retention::OldestFirst).build_at(&[], now()).unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_tokens, 0);
    }

    #[test]
    fn exact_fit_is_included() {
        let history = vec![exchange('a', 40), exchange('b', 40), exchange('c', 40)];
        let ctx = assembler(100, Retention::OldestFirst)
            .build_at(&history, now())
            .unwrap();
        assert_eq!(ctx.limit, 80);
        assert_eq!(ctx.pair_count(), 2);
        assert_eq!(ctx.total_tokens, 80);
        assert_eq!(user_texts(&ctx), vec!["a".repeat(20), "b".repeat(20)]);
    }

    #[test]
    fn newest_first_keeps_recent_exchanges() {
        let history = vec![exchange('a', 40), exchange('b', 40), exchange('c', 40)];
        let ctx = assembler(100, Retention::NewestFirst)
            .build_at(&history, now())
            .unwrap();
        assert_eq!(ctx.total_tokens, 80);
        // Still chronological on output.
        assert_eq!(user_texts(&ctx), vec!["b".repeat(20), "c".repeat(20)]);
    }

    #[test]
    fn oversized_single_pair_yields_empty() {
        let history = vec![exchange('x', 500)];
        let ctx = assembler(100, Retention::OldestFirst)
            .build_at(&history, now())
            .unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_tokens, 0);
    }

    #[test]
    fn greedy_stops_at_first_overflow() {
        // The third exchange is cheap, but the second already overflowed.
        let history = vec![exchange('a', 50), exchange('b', 50), exchange('c', 2)];
        let ctx = assembler(100, Retention::OldestFirst)
            .build_at(&history, now())
            .unwrap();
        assert_eq!(user_texts(&ctx), vec!["a".repeat(25)]);
        assert_eq!(ctx.total_tokens, 50);
    }

    #[test]
    fn pair_overhead_is_charged() {
        let assembler = ContextAssembler::new(
            AssemblerConfig {
                budget: 100,
                pair_overhead: 5,
                ..AssemblerConfig::default()
            },
            char_counter(),
        );
        // 36 + 5 = 41 per pair; two pairs = 82 > 80.
        let history = vec![exchange('a', 36), exchange('b', 36)];
        let ctx = assembler.build_at(&history, now()).unwrap();
        assert_eq!(ctx.pair_count(), 1);
        assert_eq!(ctx.total_tokens, 41);
    }

    #[test]
    fn total_never_exceeds_limit() {
        let history: Vec<_> = (0..50)
            .map(|i| exchange('z', 3 + (i * 7) % 29))
            .collect();
        for budget in [1, 10, 57, 100, 333, 1000] {
            for retention in [Retention::OldestFirst, Retention::NewestFirst] {
                let a = ContextAssembler::new(
                    AssemblerConfig {
                        budget,
                        retention,
                        max_pairs: 50,
                        ..AssemblerConfig::default()
                    },
                    char_counter(),
                );
                let ctx = a.build_at(&history, now()).unwrap();
                assert!(ctx.total_tokens <= a.limit());
                assert_eq!(ctx.turns.len() % 2, 0);
            }
        }
    }

    #[test]
    fn window_keeps_most_recent_pairs() {
        let history: Vec<_> = "abcdef".chars().map(|c| exchange(c, 2)).collect();
        let a = ContextAssembler::new(
            AssemblerConfig {
                budget: 1000,
                max_pairs: 3,
                pair_overhead: 0,
                ..AssemblerConfig::default()
            },
            char_counter(),
        );
        let ctx = a.build_at(&history, now()).unwrap();
        assert_eq!(user_texts(&ctx), vec!["d", "e", "f"]);
    }

    #[test]
    fn synthetic_timestamps_are_increasing() {
        let history = vec![exchange('a', 4), exchange('b', 4), exchange('c', 4)];
        let ctx = assembler(1000, Retention::OldestFirst)
            .build_at(&history, now())
            .unwrap();

        assert!(ctx.turns.windows(2).all(|w| w[0].created_at < w[1].created_at));
        // First of three: now - (3 + 5 - 0) * 30s; reply 15s later.
        assert_eq!(ctx.turns[0].created_at, now() - TimeDelta::seconds(240));
        assert_eq!(ctx.turns[1].created_at, now() - TimeDelta::seconds(225));
        assert!(ctx.turns.last().unwrap().created_at < now());
    }

    #[test]
    fn real_timestamps_are_kept() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let history = vec![
            exchange('a', 4).at(t0),
            exchange('b', 4).at(t0 + TimeDelta::minutes(5)),
        ];
        let ctx = assembler(1000, Retention::OldestFirst)
            .build_at(&history, now())
            .unwrap();
        assert_eq!(ctx.turns[0].created_at, t0);
        assert_eq!(ctx.turns[1].created_at, t0 + TimeDelta::seconds(15));
        assert_eq!(ctx.turns[2].created_at, t0 + TimeDelta::minutes(5));
    }

    #[test]
    fn invalid_budget_rejected() {
        let err = assembler(0, Retention::OldestFirst)
            .build_at(&[], now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBudget(_)));

        let bad_factor = ContextAssembler::new(
            AssemblerConfig {
                safety_factor: 1.5,
                ..AssemblerConfig::default()
            },
            char_counter(),
        );
        assert!(bad_factor.validate().is_err());
    }

    #[test]
    fn heuristic_counter_by_default() {
        let a = ContextAssembler::default();
        // "test" = 1, "abcdefgh" = 2, overhead 5.
        assert_eq!(a.pair_cost(&Exchange::new("test", "abcdefgh")), 8);
    }

    #[test]
    fn from_context_config() {
        let config = ContextConfig {
            token_cap: 4096,
            retention: Retention::NewestFirst,
            ..ContextConfig::default()
        };
        let a = AssemblerConfig::try_from(&config).unwrap();
        assert_eq!(a.budget, 4096);
        assert_eq!(a.retention, Retention::NewestFirst);
        assert_eq!(a.pair_spacing, TimeDelta::seconds(30));
    }

    #[test]
    fn unrepresentable_spacing_rejected() {
        let config = ContextConfig {
            pair_spacing_secs: i64::MAX,
            ..ContextConfig::default()
        };
        assert!(matches!(
            AssemblerConfig::try_from(&config),
            Err(ValidationError::InvalidParameter(_))
        ));
    }

    fn with_timing(reply_offset: i64, pair_spacing: i64) -> ContextAssembler {
        ContextAssembler::new(
            AssemblerConfig {
                reply_offset: TimeDelta::seconds(reply_offset),
                pair_spacing: TimeDelta::seconds(pair_spacing),
                ..AssemblerConfig::default()
            },
            char_counter(),
        )
    }

    #[test]
    fn reply_offset_must_fit_inside_spacing() {
        let history = vec![exchange('a', 4), exchange('b', 4)];
        for (offset, spacing) in [(45, 30), (30, 30), (0, 30), (-5, 30), (15, -30)] {
            let err = with_timing(offset, spacing)
                .build_at(&history, now())
                .unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidParameter(_)),
                "offset {offset}, spacing {spacing}"
            );
        }
    }

    #[test]
    fn huge_spacing_is_an_error_not_a_panic() {
        let history = vec![exchange('a', 4)];
        let a = with_timing(15, TimeDelta::MAX.num_seconds() / 2);
        assert!(matches!(
            a.build_at(&history, now()),
            Err(ValidationError::InvalidParameter(_))
        ));
    }
}
