use std::time::Duration;

/// Cache validity rules for probe results. Two regimes: during bootstrap the
/// anonymity networks are still converging, so successes are re-verified
/// quickly and failures are retried on a short leash instead of being
/// cached into permanence. After bootstrap both settle to five minutes.
pub const BOOTSTRAP_OK_TTL: Duration = Duration::from_secs(60);
pub const BOOTSTRAP_FAILED_TTL: Duration = Duration::from_secs(120);
pub const OPERATIONAL_TTL: Duration = Duration::from_secs(300);

pub fn in_bootstrap(system_age: Duration, bootstrap_window: Duration) -> bool {
    system_age < bootstrap_window
}

/// TTL applicable to a cache entry, chosen by the entry's OWN last outcome.
pub fn ttl_for(bootstrap: bool, last_ok: bool) -> Duration {
    match (bootstrap, last_ok) {
        (true, true) => BOOTSTRAP_OK_TTL,
        (true, false) => BOOTSTRAP_FAILED_TTL,
        (false, _) => OPERATIONAL_TTL,
    }
}

pub fn is_fresh(entry_age: Duration, bootstrap: bool, last_ok: bool) -> bool {
    entry_age < ttl_for(bootstrap, last_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: fn(u64) -> Duration = Duration::from_secs;

    #[test]
    fn bootstrap_mode_boundary() {
        let window = S(1800);
        assert!(in_bootstrap(S(0), window));
        assert!(in_bootstrap(S(1799), window));
        assert!(!in_bootstrap(S(1800), window));
        assert!(!in_bootstrap(S(7200), window));
    }

    #[test]
    fn ttl_table() {
        assert_eq!(ttl_for(true, true), S(60));
        assert_eq!(ttl_for(true, false), S(120));
        assert_eq!(ttl_for(false, true), S(300));
        assert_eq!(ttl_for(false, false), S(300));
    }

    #[test]
    fn failed_endpoint_in_bootstrap_goes_stale_within_retry_interval() {
        // A failed endpoint must be re-probed within ~120s during bootstrap,
        // even while successful entries are still fresh.
        assert!(is_fresh(S(119), true, false));
        assert!(!is_fresh(S(120), true, false));
        assert!(is_fresh(S(59), true, true));
        assert!(!is_fresh(S(60), true, true));
    }

    #[test]
    fn operational_ttl_is_uniform() {
        assert!(is_fresh(S(299), false, false));
        assert!(!is_fresh(S(300), false, false));
        assert!(is_fresh(S(299), false, true));
        assert!(!is_fresh(S(300), false, true));
    }
}
