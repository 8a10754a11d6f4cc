use crate::checks::{Checks, STATUS_IS_101};
use crate::config::DriverConfig;
use crate::event::Event;
use crate::message::Broadcast;
use crate::metrics::RunCounters;
use crate::payload::PayloadSource;
use crate::request::client_url;
use crate::session::{connect, Session};
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;

// One virtual user, end to end: a single connection attempt (no retries),
// the periodic send cycle, message-shape validation on everything received,
// and a hard deadline on the whole session. Every failure stays local to
// this user, the only global effect is what gets recorded in the shared
// accumulators.
pub async fn run_virtual_user(
    index: usize,
    config: Arc<DriverConfig>,
    checks: Arc<Checks>,
    counters: Arc<RunCounters>,
    payloads: Arc<dyn PayloadSource>,
) {
    counters.session_started();

    let url = match client_url(&config.target, &config.username_prefix, index) {
        Ok(url) => url,
        Err(err) => {
            error!("vu {}: invalid target: {}", index, err);
            checks.record(STATUS_IS_101, false);
            counters.session_failed();
            return;
        }
    };

    let (session, mut events) = match connect(&url, config.connect_timeout).await {
        Ok(pair) => {
            checks.record(STATUS_IS_101, true);
            info!("vu {}: connected", index);
            pair
        }
        Err(err) => {
            warn!("vu {}: handshake failed: {}", index, err);
            checks.record(STATUS_IS_101, false);
            counters.session_failed();
            return;
        }
    };

    let deadline = tokio::time::sleep(config.session_deadline);
    tokio::pin!(deadline);

    let cycle = send_cycle(index, &session, &config, &counters, payloads.as_ref()).fuse();
    tokio::pin!(cycle);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                // Upper bound on the whole session: cancels the send cycle
                // wherever it is and forces the close. The cycle may already
                // have closed on its own, close() absorbs the race.
                session.close();
                debug!("vu {}: session deadline reached", index);
                break;
            }
            _ = &mut cycle => {}
            event = events.next() => match event {
                Some(Event::Message(text)) => {
                    counters.message_received(text.len());
                    match Broadcast::decode(&text) {
                        Ok(broadcast) => broadcast.record_checks(&checks),
                        Err(err) => {
                            counters.decode_failure();
                            warn!("vu {}: failed to parse message: {}", index, err);
                        }
                    }
                }
                Some(Event::Binary(payload)) => {
                    counters.message_received(payload.len());
                }
                Some(Event::Error(err)) => {
                    error!("vu {}: {}", index, err);
                }
                Some(Event::Closed) | None => {
                    info!("vu {}: disconnected", index);
                    break;
                }
            }
        }
    }

    counters.session_completed();
}

// The periodic half of the workload. Each tick sends, in this order, the
// tagged short message, the small random payload and the large one, then
// waits out the delay and closes. The loop keeps ticking after that, the
// next send finds the session closed and ends the cycle, so a session that
// outlives one full round still closes exactly once from this path.
async fn send_cycle(
    index: usize,
    session: &Session,
    config: &DriverConfig,
    counters: &RunCounters,
    payloads: &dyn PayloadSource,
) {
    loop {
        tokio::time::sleep(config.tick_period).await;

        let batch = [
            format!("Message from VU {}", index),
            payloads.string(config.small_payload),
            payloads.string(config.large_payload),
        ];

        for text in batch {
            let size = text.len();
            match session.send_text(text) {
                Ok(()) => counters.message_sent(size),
                Err(err) => {
                    debug!("vu {}: send cycle stopped: {}", index, err);
                    return;
                }
            }
        }

        tokio::time::sleep(config.post_send_delay).await;
        session.close();
    }
}
