// Reconciliation of inbound socket frames into store state.

use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use tokio::time::Instant;

use super::Shared;
use crate::transport::frames::{MessageEvent, StatusEvent, TypingEvent, UserUpdateEvent};
use crate::transport::{EventKind, InboundFrame};

/// Frame kinds the store subscribes to for every session.
pub(crate) const HANDLED_KINDS: [EventKind; 7] = [
    EventKind::ChatMessage,
    EventKind::FileMessage,
    EventKind::UserStatus,
    EventKind::UserUpdate,
    EventKind::UserProfileUpdate,
    EventKind::TypingIndicator,
    EventKind::Error,
];

pub(crate) fn reconcile(shared: &Arc<Shared>, frame: &InboundFrame) {
    match frame {
        InboundFrame::ChatMessage(event) | InboundFrame::FileMessage(event) => {
            on_message(shared, event)
        }
        InboundFrame::UserStatus(event) => on_status(shared, event),
        InboundFrame::UserUpdate(event) | InboundFrame::UserProfileUpdate(event) => {
            on_user_update(shared, event)
        }
        InboundFrame::TypingIndicator(event) => on_typing(shared, event),
        InboundFrame::Error(event) => {
            warn!("Server reported error: {}", event.message);
            shared.report_error(event.message.clone());
        }
        InboundFrame::Other { kind, .. } => debug!("Store ignores '{}' frames", kind),
    }
}

fn on_message(shared: &Shared, event: &MessageEvent) {
    let message = event.to_message();
    shared.mutate(|state| {
        let Some(active_id) = state.active_id() else {
            return;
        };
        if !state.insert_message(message.clone()) {
            debug!("Message {} already in timeline", message.id);
        }
        state.record_last_message(active_id, &message);
    });
}

fn on_status(shared: &Shared, event: &StatusEvent) {
    shared.mutate(|state| {
        if event.is_online() {
            state.online.insert(event.user_id);
        } else {
            state.online.remove(&event.user_id);
        }
    });
}

fn on_user_update(shared: &Shared, event: &UserUpdateEvent) {
    if let Some(old) = &event.old_username {
        info!(
            "User {} changed identity (was '{}')",
            event.user.id, old
        );
    }
    shared.mutate(|state| {
        state.apply_user_update(&event.user);
        if let Some(system) = event.system_message() {
            state.insert_message(system);
        }
    });
}

fn on_typing(shared: &Arc<Shared>, event: &TypingEvent) {
    let username = event.username.clone();
    if !event.is_typing {
        shared.mutate(|state| {
            state.typing.remove(&username);
        });
        return;
    }

    let deadline = Instant::now() + shared.settings.typing_timeout;
    shared.mutate(|state| {
        state.typing.insert(username.clone(), deadline);
    });

    let weak: Weak<Shared> = Arc::downgrade(shared);
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(shared) = weak.upgrade() {
            shared.mutate_if(|state| state.expire_typing(&username, deadline));
        }
    });
}
