//! Cheap pre-dispatch predicates over raw events

use kestrel_core::{RawEvent, SubEventKind};

/// Lowest priority, for events with no sub-events
pub const PRIORITY_EMPTY: u8 = 10;

/// Does this event warrant any processing at all?
///
/// Full refreshes always do. Other events are judged by their first
/// sub-event alone. Thread replies and chat joins only arrive inside full
/// refreshes and are not accepted on their own.
pub fn is_relevant(event: &RawEvent) -> bool {
    if event.is_full_refresh() {
        return true;
    }
    let Some(first) = event.sub_events().first() else {
        return false;
    };
    matches!(
        first.kind,
        SubEventKind::MessageSent
            | SubEventKind::MessageReceived
            | SubEventKind::ChannelCreated
            | SubEventKind::ChannelJoined
            | SubEventKind::ChannelLeft
            | SubEventKind::ChannelInvited
            | SubEventKind::DmCreated
            | SubEventKind::InvitationAccepted
            | SubEventKind::NewIdentityUpdated
            | SubEventKind::InvitationPayloadUpdated
            | SubEventKind::ReactionUpdated
            | SubEventKind::ChatInitialized
    )
}

/// Processing priority, lower is more urgent. Decided by the first sub-event.
pub fn priority(event: &RawEvent) -> u8 {
    let Some(first) = event.sub_events().first() else {
        return PRIORITY_EMPTY;
    };
    match first.kind {
        SubEventKind::MessageSent | SubEventKind::MessageReceived => 1,
        SubEventKind::MessageSentThread | SubEventKind::ReactionUpdated => 2,
        SubEventKind::ChannelCreated | SubEventKind::DmCreated => 3,
        SubEventKind::ChannelJoined | SubEventKind::ChannelLeft | SubEventKind::InvitationAccepted => 4,
        SubEventKind::ChannelInvited
        | SubEventKind::NewIdentityUpdated
        | SubEventKind::InvitationPayloadUpdated => 5,
        SubEventKind::ChatInitialized | SubEventKind::ChatJoined => 6,
        SubEventKind::Unknown(_) => 7,
    }
}
