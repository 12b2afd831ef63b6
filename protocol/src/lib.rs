use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sentinel hour value meaning "I can't estimate this".
pub const UNSURE_HOURS: i32 = -1;

/// ---- Roles ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Sa,
    Dev,
    Qa,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sa => write!(f, "SA"),
            Role::Dev => write!(f, "DEV"),
            Role::Qa => write!(f, "QA"),
        }
    }
}

/// ---- Lifecycle states ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Preparing,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryStatus {
    Pending,
    Voting,
    Revealed,
    Completed,
}

/// ---- Votes ----
///
/// One row per (story, voter, role). A re-vote before reveal overwrites the
/// earlier row; `vote_hours` stays hidden from other participants until the
/// story is revealed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub voter_account_id: String,
    pub voter_display_name: String,
    pub voter_role: Role,
    pub vote_hours: Option<i32>,
    pub has_voted: bool,
    pub voted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: Uuid,
    pub story_key: Option<String>,
    pub title: String,
    pub needs_sa: bool,
    pub needs_dev: bool,
    pub needs_qa: bool,
    pub status: StoryStatus,
    pub final_sa_hours: Option<i32>,
    pub final_dev_hours: Option<i32>,
    pub final_qa_hours: Option<i32>,
    pub order_index: u32,
    pub votes: Vec<Vote>,
}

impl Story {
    pub fn new(
        title: impl Into<String>,
        story_key: Option<String>,
        needs_sa: bool,
        needs_dev: bool,
        needs_qa: bool,
        order_index: u32,
    ) -> Self {
        Story {
            id: Uuid::new_v4(),
            story_key,
            title: title.into(),
            needs_sa,
            needs_dev,
            needs_qa,
            status: StoryStatus::Pending,
            final_sa_hours: None,
            final_dev_hours: None,
            final_qa_hours: None,
            order_index,
            votes: vec![],
        }
    }

    pub fn needs_role(&self, role: Role) -> bool {
        match role {
            Role::Sa => self.needs_sa,
            Role::Dev => self.needs_dev,
            Role::Qa => self.needs_qa,
        }
    }

    /// Upserts the vote row keyed by (voter, role). Last write wins.
    pub fn record_vote(&mut self, account_id: &str, display_name: &str, role: Role, hours: i32) {
        match self
            .votes
            .iter_mut()
            .find(|v| v.voter_account_id == account_id && v.voter_role == role)
        {
            Some(v) => {
                v.voter_display_name = display_name.to_string();
                v.vote_hours = Some(hours);
                v.has_voted = true;
                v.voted_at = Some(Utc::now());
            }
            None => {
                self.votes.push(Vote {
                    id: Uuid::new_v4(),
                    voter_account_id: account_id.to_string(),
                    voter_display_name: display_name.to_string(),
                    voter_role: role,
                    vote_hours: Some(hours),
                    has_voted: true,
                    voted_at: Some(Utc::now()),
                });
            }
        }
    }

    /// Client-facing view of this story. Vote hours are withheld until the
    /// story has been revealed.
    pub fn public_view(&self) -> StoryView {
        let hidden = matches!(self.status, StoryStatus::Pending | StoryStatus::Voting);
        StoryView {
            id: self.id,
            story_key: self.story_key.clone(),
            title: self.title.clone(),
            needs_sa: self.needs_sa,
            needs_dev: self.needs_dev,
            needs_qa: self.needs_qa,
            status: self.status,
            final_sa_hours: self.final_sa_hours,
            final_dev_hours: self.final_dev_hours,
            final_qa_hours: self.final_qa_hours,
            order_index: self.order_index,
            votes: self
                .votes
                .iter()
                .map(|v| VoteView {
                    voter_account_id: v.voter_account_id.clone(),
                    voter_display_name: v.voter_display_name.clone(),
                    voter_role: v.voter_role,
                    has_voted: v.has_voted,
                    vote_hours: if hidden { None } else { v.vote_hours },
                })
                .collect(),
        }
    }

    /// Full rows with hours, as carried by VOTES_REVEALED.
    pub fn revealed_votes(&self) -> Vec<VoteView> {
        self.votes
            .iter()
            .map(|v| VoteView {
                voter_account_id: v.voter_account_id.clone(),
                voter_display_name: v.voter_display_name.clone(),
                voter_role: v.voter_role,
                has_voted: v.has_voted,
                vote_hours: v.vote_hours,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub team_id: String,
    pub epic_key: String,
    pub facilitator_account_id: String,
    pub status: SessionStatus,
    pub room_code: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stories: Vec<Story>,
    pub current_story_id: Option<Uuid>,
}

impl Session {
    pub fn new(
        team_id: impl Into<String>,
        epic_key: impl Into<String>,
        facilitator_account_id: impl Into<String>,
        room_code: impl Into<String>,
    ) -> Self {
        Session {
            id: Uuid::new_v4(),
            team_id: team_id.into(),
            epic_key: epic_key.into(),
            facilitator_account_id: facilitator_account_id.into(),
            status: SessionStatus::Preparing,
            room_code: room_code.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stories: vec![],
            current_story_id: None,
        }
    }

    pub fn story(&self, id: Uuid) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn story_mut(&mut self, id: Uuid) -> Option<&mut Story> {
        self.stories.iter_mut().find(|s| s.id == id)
    }

    pub fn current_story(&self) -> Option<&Story> {
        self.current_story_id.and_then(|id| self.story(id))
    }

    /// Next story to visit, by order_index.
    pub fn next_pending(&self) -> Option<&Story> {
        self.stories
            .iter()
            .filter(|s| s.status == StoryStatus::Pending)
            .min_by_key(|s| s.order_index)
    }

    pub fn snapshot(&self, participants: Vec<Participant>) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            team_id: self.team_id.clone(),
            epic_key: self.epic_key.clone(),
            facilitator_account_id: self.facilitator_account_id.clone(),
            status: self.status,
            room_code: self.room_code.clone(),
            current_story_id: self.current_story_id,
            stories: self.stories.iter().map(Story::public_view).collect(),
            participants,
        }
    }
}

/// ---- Presence ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub account_id: String,
    pub display_name: String,
    pub role: Role,
    pub is_facilitator: bool,
    pub is_online: bool,
}

/// ---- Client-facing snapshot ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub voter_account_id: String,
    pub voter_display_name: String,
    pub voter_role: Role,
    pub has_voted: bool,
    pub vote_hours: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryView {
    pub id: Uuid,
    pub story_key: Option<String>,
    pub title: String,
    pub needs_sa: bool,
    pub needs_dev: bool,
    pub needs_qa: bool,
    pub status: StoryStatus,
    pub final_sa_hours: Option<i32>,
    pub final_dev_hours: Option<i32>,
    pub final_qa_hours: Option<i32>,
    pub order_index: u32,
    pub votes: Vec<VoteView>,
}

impl StoryView {
    pub fn vote_for(&self, account_id: &str, role: Role) -> Option<&VoteView> {
        self.votes
            .iter()
            .find(|v| v.voter_account_id == account_id && v.voter_role == role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub team_id: String,
    pub epic_key: String,
    pub facilitator_account_id: String,
    pub status: SessionStatus,
    pub room_code: String,
    pub current_story_id: Option<Uuid>,
    pub stories: Vec<StoryView>,
    pub participants: Vec<Participant>,
}

impl SessionSnapshot {
    pub fn story(&self, id: Uuid) -> Option<&StoryView> {
        self.stories.iter().find(|s| s.id == id)
    }

    pub fn story_mut(&mut self, id: Uuid) -> Option<&mut StoryView> {
        self.stories.iter_mut().find(|s| s.id == id)
    }

    pub fn current_story(&self) -> Option<&StoryView> {
        self.current_story_id.and_then(|id| self.story(id))
    }
}

/// ---- Error taxonomy ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotAuthorized,
    InvalidTransition,
    RoleNotRequired,
    VotingClosed,
    SessionClosed,
    MalformedMessage,
}

/// ---- Wire messages ----
///
/// Inbound messages are a flat object with a `type` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientToServer {
    #[serde(rename_all = "camelCase")]
    Join {
        account_id: String,
        display_name: String,
        role: Role,
        /// Advisory only. Authorization is keyed off the session's
        /// facilitator account id, never this flag.
        #[serde(default)]
        is_facilitator: bool,
    },
    #[serde(rename_all = "camelCase")]
    Vote { story_id: Uuid, hours: i32 },
    #[serde(rename_all = "camelCase")]
    Reveal { story_id: Uuid },
    #[serde(rename_all = "camelCase")]
    SetFinal {
        story_id: Uuid,
        #[serde(default)]
        sa_hours: Option<i32>,
        #[serde(default)]
        dev_hours: Option<i32>,
        #[serde(default)]
        qa_hours: Option<i32>,
    },
    NextStory,
    StartSession,
    CompleteSession,
}

/// Outbound events are `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerToClient {
    State {
        snapshot: SessionSnapshot,
    },
    ParticipantJoined {
        participant: Participant,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { account_id: String },
    /// Someone voted. Never carries hours; those arrive with VOTES_REVEALED.
    #[serde(rename_all = "camelCase")]
    VoteCast {
        story_id: Uuid,
        voter_account_id: String,
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    VotesRevealed {
        story_id: Uuid,
        votes: Vec<VoteView>,
    },
    #[serde(rename_all = "camelCase")]
    StoryCompleted {
        story_id: Uuid,
        sa_hours: Option<i32>,
        dev_hours: Option<i32>,
        qa_hours: Option<i32>,
    },
    #[serde(rename_all = "camelCase")]
    CurrentStoryChanged { story_id: Uuid },
    SessionCompleted,
    Error { code: ErrorCode, message: String },
}

/// ---- Room codes ----
pub mod room_code {
    use rand::Rng;

    // No 0/O or 1/I, codes get read out loud in standups.
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    const LEN: usize = 6;

    pub fn generate() -> String {
        let mut rng = rand::thread_rng();
        (0..LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}
