//! Client-side mirror of the room. The server is authoritative: every
//! (re)join replaces the local snapshot wholesale, and incremental events
//! patch it in between. There is no event cursor to track; missing context
//! is recovered by the next STATE.

use storypoker_protocol::{
    ClientToServer, Participant, Role, ServerToClient, SessionSnapshot, SessionStatus, StoryStatus,
    StoryView, VoteView,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Joined,
}

/// Who this client joins as. `is_facilitator` is advisory UI state; the
/// server decides authorization from the session itself.
#[derive(Debug, Clone)]
pub struct Identity {
    pub account_id: String,
    pub display_name: String,
    pub role: Role,
    pub is_facilitator: bool,
}

impl Identity {
    pub fn join_message(&self) -> ClientToServer {
        ClientToServer::Join {
            account_id: self.account_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            is_facilitator: self.is_facilitator,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingVote {
    story_id: Uuid,
    hours: i32,
}

pub struct Reconciler {
    pub identity: Identity,
    pub phase: ConnectionPhase,
    pub snapshot: Option<SessionSnapshot>,
    pending_vote: Option<PendingVote>,
}

impl Reconciler {
    pub fn new(identity: Identity) -> Self {
        Reconciler {
            identity,
            phase: ConnectionPhase::Disconnected,
            snapshot: None,
            pending_vote: None,
        }
    }

    pub fn on_connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    pub fn on_disconnect(&mut self) {
        // Keep the last snapshot for display; it gets replaced on the next
        // successful join.
        self.phase = ConnectionPhase::Disconnected;
    }

    /// Builds the VOTE message and mirrors it locally so the UI shows
    /// "you voted" before the server confirms.
    pub fn cast_vote(&mut self, story_id: Uuid, hours: i32) -> ClientToServer {
        self.pending_vote = Some(PendingVote { story_id, hours });
        let me = self.identity.clone();
        if let Some(snapshot) = &mut self.snapshot {
            if let Some(story) = snapshot.story_mut(story_id) {
                upsert_own_vote(&mut story.votes, &me, Some(hours));
            }
        }
        ClientToServer::Vote { story_id, hours }
    }

    pub fn apply(&mut self, event: ServerToClient) {
        match event {
            ServerToClient::State { snapshot } => {
                // Wholesale replacement; the server won any argument, and an
                // unconfirmed optimistic vote is simply gone.
                self.phase = ConnectionPhase::Joined;
                self.snapshot = Some(snapshot);
                self.pending_vote = None;
            }
            ServerToClient::ParticipantJoined { participant } => {
                if let Some(snapshot) = &mut self.snapshot {
                    match snapshot
                        .participants
                        .iter_mut()
                        .find(|p| p.account_id == participant.account_id)
                    {
                        Some(p) => *p = participant,
                        None => snapshot.participants.push(participant),
                    }
                }
            }
            ServerToClient::ParticipantLeft { account_id } => {
                if let Some(snapshot) = &mut self.snapshot {
                    if let Some(p) = snapshot
                        .participants
                        .iter_mut()
                        .find(|p| p.account_id == account_id)
                    {
                        p.is_online = false;
                    }
                }
            }
            ServerToClient::VoteCast {
                story_id,
                voter_account_id,
                role,
            } => self.apply_vote_cast(story_id, voter_account_id, role),
            ServerToClient::VotesRevealed { story_id, votes } => {
                if let Some(story) = self.story_mut(story_id) {
                    story.status = StoryStatus::Revealed;
                    story.votes = votes;
                }
            }
            ServerToClient::StoryCompleted {
                story_id,
                sa_hours,
                dev_hours,
                qa_hours,
            } => {
                if let Some(story) = self.story_mut(story_id) {
                    story.status = StoryStatus::Completed;
                    story.final_sa_hours = sa_hours;
                    story.final_dev_hours = dev_hours;
                    story.final_qa_hours = qa_hours;
                }
            }
            ServerToClient::CurrentStoryChanged { story_id } => {
                if let Some(snapshot) = &mut self.snapshot {
                    snapshot.current_story_id = Some(story_id);
                    if let Some(story) = snapshot.story_mut(story_id) {
                        story.status = StoryStatus::Voting;
                        story.votes.clear();
                    }
                }
            }
            ServerToClient::SessionCompleted => {
                if let Some(snapshot) = &mut self.snapshot {
                    snapshot.status = SessionStatus::Completed;
                    snapshot.current_story_id = None;
                }
            }
            // Errors are transient; the failed action simply didn't happen,
            // so local state stays as the server last told us.
            ServerToClient::Error { .. } => {}
        }
    }

    fn apply_vote_cast(&mut self, story_id: Uuid, voter_account_id: String, role: Role) {
        let own = voter_account_id == self.identity.account_id && role == self.identity.role;
        // Our own echo keeps the hours we typed; everyone else is just
        // "has voted" until reveal.
        let hours = match (own, self.pending_vote) {
            (true, Some(p)) if p.story_id == story_id => {
                self.pending_vote = None;
                Some(p.hours)
            }
            _ => None,
        };
        let display_name = self
            .snapshot
            .as_ref()
            .and_then(|s| {
                s.participants
                    .iter()
                    .find(|p| p.account_id == voter_account_id)
                    .map(|p| p.display_name.clone())
            })
            .unwrap_or_else(|| voter_account_id.clone());
        if let Some(story) = self.story_mut(story_id) {
            match story
                .votes
                .iter_mut()
                .find(|v| v.voter_account_id == voter_account_id && v.voter_role == role)
            {
                Some(v) => {
                    v.has_voted = true;
                    if hours.is_some() {
                        v.vote_hours = hours;
                    }
                }
                None => story.votes.push(VoteView {
                    voter_account_id,
                    voter_display_name: display_name,
                    voter_role: role,
                    has_voted: true,
                    vote_hours: hours,
                }),
            }
        }
    }

    fn story_mut(&mut self, story_id: Uuid) -> Option<&mut StoryView> {
        self.snapshot.as_mut().and_then(|s| s.story_mut(story_id))
    }

    pub fn me(&self) -> Option<&Participant> {
        self.snapshot.as_ref().and_then(|s| {
            s.participants
                .iter()
                .find(|p| p.account_id == self.identity.account_id)
        })
    }

    pub fn current_story(&self) -> Option<&StoryView> {
        self.snapshot.as_ref().and_then(|s| s.current_story())
    }
}

fn upsert_own_vote(votes: &mut Vec<VoteView>, me: &Identity, hours: Option<i32>) {
    match votes
        .iter_mut()
        .find(|v| v.voter_account_id == me.account_id && v.voter_role == me.role)
    {
        Some(v) => {
            v.has_voted = true;
            v.vote_hours = hours;
        }
        None => votes.push(VoteView {
            voter_account_id: me.account_id.clone(),
            voter_display_name: me.display_name.clone(),
            voter_role: me.role,
            has_voted: true,
            vote_hours: hours,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storypoker_protocol::{Participant, SessionStatus};

    fn identity() -> Identity {
        Identity {
            account_id: "dev1".into(),
            display_name: "Ana".into(),
            role: Role::Dev,
            is_facilitator: false,
        }
    }

    fn snapshot_with_voting_story() -> (SessionSnapshot, Uuid) {
        let story_id = Uuid::new_v4();
        let snapshot = SessionSnapshot {
            id: Uuid::new_v4(),
            team_id: "team-7".into(),
            epic_key: "PLAT-100".into(),
            facilitator_account_id: "facil".into(),
            status: SessionStatus::Active,
            room_code: "ROOM42".into(),
            current_story_id: Some(story_id),
            stories: vec![StoryView {
                id: story_id,
                story_key: None,
                title: "Checkout flow".into(),
                needs_sa: true,
                needs_dev: true,
                needs_qa: false,
                status: StoryStatus::Voting,
                final_sa_hours: None,
                final_dev_hours: None,
                final_qa_hours: None,
                order_index: 0,
                votes: vec![],
            }],
            participants: vec![
                Participant {
                    account_id: "facil".into(),
                    display_name: "Franka".into(),
                    role: Role::Sa,
                    is_facilitator: true,
                    is_online: true,
                },
                Participant {
                    account_id: "dev1".into(),
                    display_name: "Ana".into(),
                    role: Role::Dev,
                    is_facilitator: false,
                    is_online: true,
                },
            ],
        };
        (snapshot, story_id)
    }

    #[test]
    fn state_snapshot_replaces_wholesale_and_joins() {
        let mut rec = Reconciler::new(identity());
        rec.on_connecting();
        assert_eq!(rec.phase, ConnectionPhase::Connecting);

        let (snapshot, _) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });
        assert_eq!(rec.phase, ConnectionPhase::Joined);
        assert_eq!(rec.snapshot.as_ref().unwrap().stories.len(), 1);
    }

    #[test]
    fn others_votes_arrive_without_hours() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, story_id) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });

        rec.apply(ServerToClient::VoteCast {
            story_id,
            voter_account_id: "facil".into(),
            role: Role::Sa,
        });

        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        let vote = story.vote_for("facil", Role::Sa).unwrap();
        assert!(vote.has_voted);
        assert_eq!(vote.vote_hours, None);
        assert_eq!(vote.voter_display_name, "Franka");
    }

    #[test]
    fn own_vote_echoes_optimistically_and_confirms() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, story_id) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });

        let msg = rec.cast_vote(story_id, 8);
        assert_eq!(msg, ClientToServer::Vote { story_id, hours: 8 });
        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        let mine = story.vote_for("dev1", Role::Dev).unwrap();
        assert!(mine.has_voted);
        assert_eq!(mine.vote_hours, Some(8));

        // Server confirmation keeps the local hours.
        rec.apply(ServerToClient::VoteCast {
            story_id,
            voter_account_id: "dev1".into(),
            role: Role::Dev,
        });
        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        assert_eq!(story.vote_for("dev1", Role::Dev).unwrap().vote_hours, Some(8));
    }

    #[test]
    fn resync_snapshot_drops_unconfirmed_optimistic_vote() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, story_id) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State {
            snapshot: snapshot.clone(),
        });
        rec.cast_vote(story_id, 8);

        // Reconnect before the server saw the vote: its snapshot wins.
        rec.on_disconnect();
        assert_eq!(rec.phase, ConnectionPhase::Disconnected);
        rec.apply(ServerToClient::State { snapshot });
        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        assert!(story.vote_for("dev1", Role::Dev).is_none());
    }

    #[test]
    fn reveal_and_completion_update_story_status() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, story_id) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });

        rec.apply(ServerToClient::VotesRevealed {
            story_id,
            votes: vec![VoteView {
                voter_account_id: "dev1".into(),
                voter_display_name: "Ana".into(),
                voter_role: Role::Dev,
                has_voted: true,
                vote_hours: Some(8),
            }],
        });
        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        assert_eq!(story.status, StoryStatus::Revealed);
        assert_eq!(story.votes[0].vote_hours, Some(8));

        rec.apply(ServerToClient::StoryCompleted {
            story_id,
            sa_hours: Some(5),
            dev_hours: Some(8),
            qa_hours: None,
        });
        let story = rec.snapshot.as_ref().unwrap().story(story_id).unwrap();
        assert_eq!(story.status, StoryStatus::Completed);
        assert_eq!(story.final_dev_hours, Some(8));
    }

    #[test]
    fn current_story_change_resets_votes() {
        let mut rec = Reconciler::new(identity());
        let (mut snapshot, story_id) = snapshot_with_voting_story();
        let second = StoryView {
            id: Uuid::new_v4(),
            story_key: None,
            title: "Retry queue".into(),
            needs_sa: false,
            needs_dev: true,
            needs_qa: false,
            status: StoryStatus::Pending,
            final_sa_hours: None,
            final_dev_hours: None,
            final_qa_hours: None,
            order_index: 1,
            votes: vec![],
        };
        let second_id = second.id;
        snapshot.stories.push(second);
        rec.apply(ServerToClient::State { snapshot });

        rec.apply(ServerToClient::CurrentStoryChanged { story_id: second_id });
        let snapshot = rec.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.current_story_id, Some(second_id));
        assert_eq!(
            snapshot.story(second_id).unwrap().status,
            StoryStatus::Voting
        );
        let _ = story_id;
    }

    #[test]
    fn reconnect_passes_through_connecting_before_rejoining() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, _) = snapshot_with_voting_story();
        rec.on_connecting();
        rec.apply(ServerToClient::State {
            snapshot: snapshot.clone(),
        });
        assert_eq!(rec.phase, ConnectionPhase::Joined);

        rec.on_disconnect();
        assert_eq!(rec.phase, ConnectionPhase::Disconnected);
        rec.on_connecting();
        assert_eq!(rec.phase, ConnectionPhase::Connecting);
        rec.apply(ServerToClient::State { snapshot });
        assert_eq!(rec.phase, ConnectionPhase::Joined);
    }

    #[test]
    fn session_completed_clears_current_story() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, _) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });
        rec.apply(ServerToClient::SessionCompleted);
        let snapshot = rec.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.current_story_id, None);
    }

    #[test]
    fn participant_left_marks_offline_but_keeps_record() {
        let mut rec = Reconciler::new(identity());
        let (snapshot, _) = snapshot_with_voting_story();
        rec.apply(ServerToClient::State { snapshot });
        rec.apply(ServerToClient::ParticipantLeft {
            account_id: "facil".into(),
        });
        let snapshot = rec.snapshot.as_ref().unwrap();
        let facil = snapshot
            .participants
            .iter()
            .find(|p| p.account_id == "facil")
            .unwrap();
        assert!(!facil.is_online);
        assert_eq!(snapshot.participants.len(), 2);
    }
}
