use storypoker_protocol::{
    ErrorCode, Participant, Role, ServerToClient, Session, SessionSnapshot,
};
use tokio::sync::mpsc;

pub type Tx = mpsc::UnboundedSender<ServerToClient>;

/// A participant's seat in the room. Survives disconnects so a rejoin with
/// the same account id resumes the same identity.
pub struct Seat {
    pub account_id: String,
    pub display_name: String,
    pub role: Role,
    pub is_online: bool,
    pub tx: Tx,
}

pub struct Room {
    pub session: Session,
    pub seats: Vec<Seat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    New,
    Reconnected,
    /// Duplicate JOIN from a connection that never went offline.
    AlreadyOnline,
}

impl Room {
    pub fn new(session: Session) -> Self {
        Room {
            session,
            seats: vec![],
        }
    }

    pub fn seat(&self, account_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.account_id == account_id)
    }

    /// Upserts a seat. A known account id gets its channel swapped and comes
    /// back online; display name and role may be corrected on rejoin.
    pub fn join(&mut self, account_id: &str, display_name: &str, role: Role, tx: Tx) -> JoinOutcome {
        match self.seats.iter_mut().find(|s| s.account_id == account_id) {
            Some(seat) => {
                let was_online = seat.is_online;
                seat.display_name = display_name.to_string();
                seat.role = role;
                seat.is_online = true;
                seat.tx = tx;
                if was_online {
                    JoinOutcome::AlreadyOnline
                } else {
                    JoinOutcome::Reconnected
                }
            }
            None => {
                self.seats.push(Seat {
                    account_id: account_id.to_string(),
                    display_name: display_name.to_string(),
                    role,
                    is_online: true,
                    tx,
                });
                JoinOutcome::New
            }
        }
    }

    /// Marks a seat offline, keeping the record for rejoin. Returns true if
    /// the seat was actually online.
    pub fn mark_offline(&mut self, account_id: &str) -> bool {
        match self.seats.iter_mut().find(|s| s.account_id == account_id) {
            Some(seat) if seat.is_online => {
                seat.is_online = false;
                true
            }
            _ => false,
        }
    }

    pub fn participant(&self, account_id: &str) -> Option<Participant> {
        self.seat(account_id).map(|s| Participant {
            account_id: s.account_id.clone(),
            display_name: s.display_name.clone(),
            role: s.role,
            is_facilitator: s.account_id == self.session.facilitator_account_id,
            is_online: s.is_online,
        })
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.seats
            .iter()
            .map(|s| Participant {
                account_id: s.account_id.clone(),
                display_name: s.display_name.clone(),
                role: s.role,
                is_facilitator: s.account_id == self.session.facilitator_account_id,
                is_online: s.is_online,
            })
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot(self.participants())
    }

    /// Fan-out to every online seat. A failed send marks that seat offline
    /// and announces the departure to everyone still reachable.
    pub fn broadcast(&mut self, ev: &ServerToClient) {
        let mut dropped: Vec<String> = vec![];
        for seat in self.seats.iter_mut().filter(|s| s.is_online) {
            if seat.tx.send(ev.clone()).is_err() {
                seat.is_online = false;
                dropped.push(seat.account_id.clone());
            }
        }
        for account_id in dropped {
            tracing::warn!(
                room = %self.session.room_code,
                account = %account_id,
                "outbound channel closed, marking participant offline"
            );
            self.broadcast(&ServerToClient::ParticipantLeft { account_id });
        }
    }

    pub fn send_to(&self, account_id: &str, ev: ServerToClient) {
        if let Some(seat) = self.seat(account_id) {
            let _ = seat.tx.send(ev);
        }
    }

    pub fn send_err_to(&self, account_id: &str, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(room = %self.session.room_code, account = %account_id, ?code, %message, "rejected");
        self.send_to(account_id, ServerToClient::Error { code, message });
    }

    /// A room is torn down once the session completed and the last
    /// participant dropped off.
    pub fn is_abandoned(&self) -> bool {
        self.session.status == storypoker_protocol::SessionStatus::Completed
            && self.seats.iter().all(|s| !s.is_online)
    }
}
