//! Refresh actions and dispatch planning

use std::collections::BTreeSet;

use kestrel_core::{RawEvent, SubEventKind};

/// Something the host must re-fetch. Declaration order is execution priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefreshAction {
    /// Catch up on the active conversation's messages
    Messages,
    /// Channel roster
    Channels,
    /// Direct-message list
    Dms,
    /// Membership of the active channel
    Members,
}

impl RefreshAction {
    pub const ALL: [RefreshAction; 4] = [
        RefreshAction::Messages,
        RefreshAction::Channels,
        RefreshAction::Dms,
        RefreshAction::Members,
    ];

    /// Roster-type actions are debounced by the runtime
    #[inline]
    pub fn is_roster(self) -> bool {
        matches!(self, RefreshAction::Channels | RefreshAction::Dms)
    }

    /// Actions triggered by one sub-event kind
    pub fn for_kind(kind: &SubEventKind) -> &'static [RefreshAction] {
        use RefreshAction::*;
        match kind {
            SubEventKind::MessageSent
            | SubEventKind::MessageSentThread
            | SubEventKind::MessageReceived
            | SubEventKind::ReactionUpdated => &[Messages],
            SubEventKind::ChannelCreated => &[Channels],
            SubEventKind::ChannelJoined | SubEventKind::ChannelLeft | SubEventKind::ChannelInvited => {
                &[Channels, Members]
            }
            SubEventKind::DmCreated
            | SubEventKind::InvitationAccepted
            | SubEventKind::NewIdentityUpdated
            | SubEventKind::InvitationPayloadUpdated => &[Dms],
            SubEventKind::ChatInitialized | SubEventKind::ChatJoined => &[Channels, Dms, Members],
            SubEventKind::Unknown(_) => &[],
        }
    }
}

/// Deduplicated, priority-ordered set of actions for one batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    actions: BTreeSet<RefreshAction>,
}

impl RefreshPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan for a batch of (already coalesced) events
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a RawEvent>) -> Self {
        let mut plan = RefreshPlan::new();
        for event in events {
            plan.add_event(event);
        }
        plan
    }

    pub fn add_event(&mut self, event: &RawEvent) {
        let mut recognised = false;
        for sub in event.sub_events() {
            recognised |= sub.kind.is_known();
            self.actions.extend(RefreshAction::for_kind(&sub.kind).iter().copied());
        }
        // A full refresh that names nothing specific re-derives everything
        if event.is_full_refresh() && !recognised {
            self.actions.extend(RefreshAction::ALL);
        }
    }

    pub fn insert(&mut self, action: RefreshAction) -> bool {
        self.actions.insert(action)
    }

    pub fn contains(&self, action: RefreshAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn merge(&mut self, other: RefreshPlan) {
        self.actions.extend(other.actions);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Actions in execution order
    pub fn iter(&self) -> impl Iterator<Item = RefreshAction> + '_ {
        self.actions.iter().copied()
    }
}

impl IntoIterator for RefreshPlan {
    type Item = RefreshAction;
    type IntoIter = std::collections::btree_set::IntoIter<RefreshAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}
