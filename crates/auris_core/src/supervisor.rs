//! Component H: the outer reconnect loop. A session that errors gets
//! retried with exponential backoff (0.5s, doubling, capped at 10s); a
//! session that ran cleanly for at least two seconds resets the backoff,
//! so a flaky connection doesn't escalate to the cap on every retry while
//! a connection that dies instantly (bad credentials, DNS failure) doesn't
//! hammer the endpoint at the fast end of the range either.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::capture::AudioInput;
use crate::playback::AudioOutput;
use crate::protocol::RealtimeClient;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const MIN_CLEAN_LIFETIME: Duration = Duration::from_secs(2);

/// Compute the next backoff given the previous one and whether the last
/// session ran for at least [`MIN_CLEAN_LIFETIME`].
pub fn next_backoff(previous: Duration, last_session_lifetime: Duration) -> Duration {
    if last_session_lifetime >= MIN_CLEAN_LIFETIME {
        INITIAL_BACKOFF
    } else {
        (previous * 2).min(MAX_BACKOFF)
    }
}

/// Run realtime sessions forever, reconnecting with backoff. Only returns
/// if the caller's audio handles are dropped from under it, which normal
/// shutdown paths don't do; callers run this inside a task they abort.
pub async fn run_forever(client: &RealtimeClient, audio_in: Arc<AudioInput>, audio_out: Arc<AudioOutput>) -> ! {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let started = std::time::Instant::now();
        if let Err(e) = client.run_one_session(audio_in.clone(), audio_out.clone()).await {
            warn!(error = %e, backoff_s = backoff.as_secs_f64(), "realtime_session_error");
        }

        backoff = next_backoff(backoff, started.elapsed());
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_backoff_resets_after_clean_session() {
        let backoff = next_backoff(Duration::from_secs(4), Duration::from_secs(3));
        assert_eq!(backoff, INITIAL_BACKOFF);
    }

    #[test]
    fn test_next_backoff_doubles_on_quick_failure() {
        let backoff = next_backoff(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_next_backoff_caps_at_ten_seconds() {
        let backoff = next_backoff(Duration::from_secs(8), Duration::from_millis(10));
        assert_eq!(backoff, MAX_BACKOFF);
    }

    #[test]
    fn test_next_backoff_exact_min_lifetime_resets() {
        let backoff = next_backoff(Duration::from_secs(4), MIN_CLEAN_LIFETIME);
        assert_eq!(backoff, INITIAL_BACKOFF);
    }
}
