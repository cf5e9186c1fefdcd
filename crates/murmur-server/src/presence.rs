//! Presence fan-out.
//!
//! The presence set is never stored: it is the key set of the session map,
//! recomputed and pushed as a full replacement after every registry
//! mutation. A client that misses one update is corrected by the next.

use std::collections::HashMap;

use tracing::{debug, trace};

use murmur_shared::{PushEvent, UserId};

use crate::registry::{ConnectionHandle, ConnectionId};

/// Identities with a live handle, sorted for stable output.
pub fn presence_set(sessions: &HashMap<UserId, ConnectionHandle>) -> Vec<UserId> {
    let mut online: Vec<UserId> = sessions
        .iter()
        .filter(|(_, handle)| !handle.is_closed())
        .map(|(id, _)| id.clone())
        .collect();
    online.sort();
    online
}

/// Push the current presence set to every registered connection.
/// Returns how many connections accepted it.
pub fn broadcast_presence(sessions: &HashMap<UserId, ConnectionHandle>) -> usize {
    let online = presence_set(sessions);
    let count = online.len();
    let event = PushEvent::PresenceSet(online);

    let delivered = fan_out(sessions.values(), &event);
    trace!(online = count, delivered, "Broadcast presence set");
    delivered
}

/// Push `event` to every connection other than `origin`.
pub fn broadcast_except(
    sessions: &HashMap<UserId, ConnectionHandle>,
    origin: ConnectionId,
    event: &PushEvent,
) -> usize {
    let delivered = fan_out(sessions.values().filter(|h| h.id() != origin), event);
    debug!(kind = event.kind(), origin = %origin, delivered, "Relayed client event");
    delivered
}

fn fan_out<'a>(handles: impl Iterator<Item = &'a ConnectionHandle>, event: &PushEvent) -> usize {
    let mut delivered = 0;
    for handle in handles {
        match handle.push(event.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                debug!(user = %handle.identity(), error = %e, "Dropping event for closed connection");
            }
        }
    }
    delivered
}
