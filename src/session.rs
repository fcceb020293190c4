//! Client session state, held per connection instead of as ambient globals.
//!
//! Four slices: identity, active room, live subscription, and composer/modal.
//! Transitions return [`Effect`]s describing subscription churn so the caller
//! (and tests) can see exactly which teardowns and establishments a change
//! caused.

use crate::{identity::UserId, rooms::RoomCode};

/// Subscription side effects a state transition asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Unsubscribe(RoomCode),
    Subscribe(RoomCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentitySlice {
    Unauthenticated,
    Authenticated { user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionSlice {
    Idle,
    Live { code: RoomCode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComposerSlice {
    draft: String,
    join_input: String,
    modal_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    identity: IdentitySlice,
    active_room: Option<RoomCode>,
    subscription: SubscriptionSlice,
    composer: ComposerSlice,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    /// Fresh session: unauthenticated, no room, join/create modal showing.
    pub fn new() -> Self {
        Self {
            identity: IdentitySlice::Unauthenticated,
            active_room: None,
            subscription: SubscriptionSlice::Idle,
            composer: ComposerSlice {
                draft: String::new(),
                join_input: String::new(),
                modal_open: true,
            },
        }
    }

    /// Terminal identity transition. A subscription can only come up after
    /// this has happened.
    pub fn authenticate(&mut self, user_id: UserId) -> Vec<Effect> {
        self.identity = IdentitySlice::Authenticated { user_id };
        self.resync_subscription()
    }

    /// Activates a room that the directory has confirmed (created or found),
    /// dismissing the modal and swapping the live subscription over.
    pub fn enter_room(&mut self, code: RoomCode) -> Vec<Effect> {
        self.active_room = Some(code);
        self.composer.modal_open = false;
        self.composer.join_input.clear();
        self.resync_subscription()
    }

    /// Reconciles the subscription slice with "authenticated AND room set",
    /// tearing down the old subscription before establishing the new one.
    fn resync_subscription(&mut self) -> Vec<Effect> {
        let desired = match (&self.identity, &self.active_room) {
            (IdentitySlice::Authenticated { .. }, Some(code)) => Some(code.clone()),
            _ => None,
        };

        let mut effects = Vec::new();
        match (&self.subscription, desired) {
            (SubscriptionSlice::Live { code }, Some(want)) if *code == want => {}
            (SubscriptionSlice::Live { code }, Some(want)) => {
                effects.push(Effect::Unsubscribe(code.clone()));
                effects.push(Effect::Subscribe(want.clone()));
                self.subscription = SubscriptionSlice::Live { code: want };
            }
            (SubscriptionSlice::Live { code }, None) => {
                effects.push(Effect::Unsubscribe(code.clone()));
                self.subscription = SubscriptionSlice::Idle;
            }
            (SubscriptionSlice::Idle, Some(want)) => {
                effects.push(Effect::Subscribe(want.clone()));
                self.subscription = SubscriptionSlice::Live { code: want };
            }
            (SubscriptionSlice::Idle, None) => {}
        }
        effects
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match &self.identity {
            IdentitySlice::Authenticated { user_id } => Some(user_id),
            IdentitySlice::Unauthenticated => None,
        }
    }

    pub fn active_room(&self) -> Option<&RoomCode> {
        self.active_room.as_ref()
    }

    pub fn subscription_live(&self) -> bool {
        matches!(self.subscription, SubscriptionSlice::Live { .. })
    }

    /// Records that the live subscription could not be established or has
    /// terminated. The active room, draft, and last snapshot stay as they
    /// are; sends are gated off until a room is (re-)entered.
    pub fn subscription_lost(&mut self) {
        self.subscription = SubscriptionSlice::Idle;
    }

    pub fn modal_visible(&self) -> bool {
        self.composer.modal_open
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.composer.draft
    }

    /// Clear only after the append succeeded; a failed send keeps the draft
    /// so the user can retry.
    pub fn clear_draft(&mut self) {
        self.composer.draft.clear();
    }

    pub fn set_join_input(&mut self, text: impl Into<String>) {
        self.composer.join_input = text.into();
    }

    pub fn join_input(&self) -> &str {
        &self.composer.join_input
    }

    /// What a send would write: the trimmed draft, addressed to the live
    /// subscription's room. `None` (a pure no-op) when the draft trims to
    /// empty or no subscription is live.
    pub fn outgoing(&self) -> Option<(RoomCode, String)> {
        let SubscriptionSlice::Live { code } = &self.subscription else {
            return None;
        };
        let text = self.composer.draft.trim();
        (!text.is_empty()).then(|| (code.clone(), text.to_owned()))
    }
}
