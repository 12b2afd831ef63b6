//! Routes validated inbound messages into the state machines and turns the
//! results into broadcasts. Errors go back to the sender only; they never
//! close the connection and never mutate state.

use crate::engine::{self, NextStoryOutcome};
use crate::room::{JoinOutcome, Room, Tx};
use storypoker_protocol::{ClientToServer, ErrorCode, Role, ServerToClient, SessionStatus};

/// Handles JOIN for a freshly attached connection. The snapshot goes to the
/// joiner before any PARTICIPANT_JOINED broadcast so a (re)joining client
/// never misses context. Returns false when the join was rejected and no
/// seat exists; such a connection must stay in the pre-join state.
pub fn handle_join(room: &mut Room, account_id: &str, display_name: &str, role: Role, tx: Tx) -> bool {
    if room.session.status == SessionStatus::Completed {
        let _ = tx.send(ServerToClient::Error {
            code: ErrorCode::SessionClosed,
            message: "session is completed; no further actions are accepted".into(),
        });
        return false;
    }
    let outcome = room.join(account_id, display_name, role, tx);
    tracing::info!(
        room = %room.session.room_code,
        account = %account_id,
        ?outcome,
        "participant joined"
    );
    room.send_to(
        account_id,
        ServerToClient::State {
            snapshot: room.snapshot(),
        },
    );
    // Duplicate JOIN from a still-online connection is idempotent.
    if outcome != JoinOutcome::AlreadyOnline {
        if let Some(participant) = room.participant(account_id) {
            room.broadcast(&ServerToClient::ParticipantJoined { participant });
        }
    }
    true
}

/// Handles everything after JOIN. `sender` is the authenticated account id
/// of the connection this message arrived on; any facilitator claim inside
/// the message itself is ignored.
pub fn dispatch(room: &mut Room, sender: &str, msg: ClientToServer) {
    match msg {
        ClientToServer::Join {
            account_id,
            display_name,
            role,
            ..
        } => {
            // Re-JOIN on an existing connection: reuse the seat's channel.
            match room.seat(sender).map(|s| s.tx.clone()) {
                Some(tx) if account_id == sender => {
                    handle_join(room, &account_id, &display_name, role, tx);
                }
                _ => room.send_err_to(
                    sender,
                    ErrorCode::InvalidTransition,
                    "cannot switch account on an established connection",
                ),
            }
        }

        ClientToServer::Vote { story_id, hours } => {
            let (display_name, role) = match room.seat(sender) {
                Some(seat) => (seat.display_name.clone(), seat.role),
                None => {
                    room.send_err_to(
                        sender,
                        ErrorCode::InvalidTransition,
                        "join the room before voting",
                    );
                    return;
                }
            };
            match engine::cast_vote(&mut room.session, story_id, sender, &display_name, role, hours)
            {
                Ok(()) => {
                    tracing::debug!(room = %room.session.room_code, account = %sender, %role, "vote cast");
                    room.broadcast(&ServerToClient::VoteCast {
                        story_id,
                        voter_account_id: sender.to_string(),
                        role,
                    });
                }
                Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
            }
        }

        ClientToServer::Reveal { story_id } => {
            match engine::reveal(&mut room.session, sender, story_id) {
                Ok(votes) => {
                    tracing::info!(room = %room.session.room_code, %story_id, votes = votes.len(), "votes revealed");
                    room.broadcast(&ServerToClient::VotesRevealed { story_id, votes });
                }
                Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
            }
        }

        ClientToServer::SetFinal {
            story_id,
            sa_hours,
            dev_hours,
            qa_hours,
        } => {
            match engine::set_final(
                &mut room.session,
                sender,
                story_id,
                sa_hours,
                dev_hours,
                qa_hours,
            ) {
                Ok(applied) => {
                    tracing::info!(room = %room.session.room_code, %story_id, "story completed");
                    room.broadcast(&ServerToClient::StoryCompleted {
                        story_id,
                        sa_hours: applied.sa,
                        dev_hours: applied.dev,
                        qa_hours: applied.qa,
                    });
                }
                Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
            }
        }

        ClientToServer::NextStory => match engine::next_story(&mut room.session, sender) {
            Ok(NextStoryOutcome::Advanced(story_id)) => {
                tracing::info!(room = %room.session.room_code, %story_id, "advanced to next story");
                room.broadcast(&ServerToClient::CurrentStoryChanged { story_id });
            }
            Ok(NextStoryOutcome::SessionFinished) => {
                tracing::info!(room = %room.session.room_code, "no stories left, session completed");
                room.broadcast(&ServerToClient::SessionCompleted);
            }
            Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
        },

        ClientToServer::StartSession => match engine::start_session(&mut room.session, sender) {
            // The whole room flips state at once, so everyone gets a fresh
            // snapshot rather than a patch event.
            Ok(first_story) => {
                tracing::info!(room = %room.session.room_code, %first_story, "session started");
                room.broadcast(&ServerToClient::State {
                    snapshot: room.snapshot(),
                });
            }
            Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
        },

        ClientToServer::CompleteSession => {
            match engine::complete_session(&mut room.session, sender) {
                Ok(()) => {
                    tracing::info!(room = %room.session.room_code, "session completed by facilitator");
                    room.broadcast(&ServerToClient::SessionCompleted);
                }
                Err(e) => room.send_err_to(sender, e.code(), e.to_string()),
            }
        }
    }
}
