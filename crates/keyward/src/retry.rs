use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Full passes over the endpoint list.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each sleep between rounds.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffConfig {
    /// No sleeping between rounds. Used by tests and by the receipt poller, which paces itself.
    pub const fn immediate(rounds: usize) -> Self {
        Self {
            rounds,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }

    fn delay_after_round(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(factor).min(max_ms);
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            // Thread-local RNG must not live across an await.
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
        };
        Duration::from_millis(ms.saturating_add(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds, for up to `cfg.rounds` rounds,
/// backing off between rounds.
///
/// `is_final` marks errors that another endpoint would not change (a node rejecting a
/// transaction, for example); those are returned immediately.
pub async fn with_endpoint_failover<E, T, Fut>(
    endpoints: &[E],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&E) -> Fut + Send,
    is_final: impl Fn(&eyre::Report) -> bool + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    E: std::fmt::Display + Sync,
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no rpc endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("invalid backoff config: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..cfg.rounds {
        for endpoint in endpoints {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) if is_final(&e) => return Err(e.wrap_err(label)),
                Err(e) => {
                    tracing::debug!(
                        %endpoint,
                        round,
                        op = label,
                        error = %format!("{e:#}"),
                        "rpc endpoint failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < cfg.rounds {
            tokio::time::sleep(cfg.delay_after_round(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(label))
}

/// Error predicate for operations where every failure is worth retrying elsewhere.
pub const fn never_final(_: &eyre::Report) -> bool {
    false
}
