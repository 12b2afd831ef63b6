//! Session, story and vote state machines. Everything here mutates a
//! `Session` synchronously; callers hold the room lock and turn the results
//! into broadcasts.

use chrono::Utc;
use storypoker_protocol::{Role, Session, SessionStatus, Story, StoryStatus, VoteView, UNSURE_HOURS};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("only the facilitator can {0}")]
    NotAuthorized(&'static str),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("this story does not take a {0} estimate")]
    RoleNotRequired(Role),
    #[error("voting is closed for this story")]
    VotingClosed,
    #[error("session is completed; no further actions are accepted")]
    SessionClosed,
}

impl SessionError {
    pub fn code(&self) -> storypoker_protocol::ErrorCode {
        use storypoker_protocol::ErrorCode::*;
        match self {
            SessionError::NotAuthorized(_) => NotAuthorized,
            SessionError::InvalidTransition(_) => InvalidTransition,
            SessionError::RoleNotRequired(_) => RoleNotRequired,
            SessionError::VotingClosed => VotingClosed,
            SessionError::SessionClosed => SessionClosed,
        }
    }
}

/// Final hours as actually applied to a story (un-needed roles stripped).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalHours {
    pub sa: Option<i32>,
    pub dev: Option<i32>,
    pub qa: Option<i32>,
}

#[derive(Debug, PartialEq)]
pub enum NextStoryOutcome {
    /// The given story is now VOTING.
    Advanced(Uuid),
    /// No PENDING stories remained; the session is now COMPLETED.
    SessionFinished,
}

fn ensure_open(session: &Session) -> Result<(), SessionError> {
    if session.status == SessionStatus::Completed {
        return Err(SessionError::SessionClosed);
    }
    Ok(())
}

fn ensure_facilitator(
    session: &Session,
    issuer: &str,
    action: &'static str,
) -> Result<(), SessionError> {
    if session.facilitator_account_id != issuer {
        return Err(SessionError::NotAuthorized(action));
    }
    Ok(())
}

/// Stories may only be appended while the session is still PREPARING; the
/// progression order is frozen once the session goes ACTIVE.
pub fn add_story(session: &mut Session, mut story: Story) -> Result<Uuid, SessionError> {
    ensure_open(session)?;
    if session.status != SessionStatus::Preparing {
        return Err(SessionError::InvalidTransition(
            "stories can only be added while the session is preparing".into(),
        ));
    }
    story.order_index = session.stories.len() as u32;
    story.status = StoryStatus::Pending;
    let id = story.id;
    session.stories.push(story);
    Ok(id)
}

fn advance_to_voting(story: &mut Story) {
    // Stories are visited once, but clear stale votes anyway.
    story.votes.clear();
    story.status = StoryStatus::Voting;
}

/// PREPARING → ACTIVE. Picks the first pending story and opens it for
/// voting. Returns the id of that story.
pub fn start_session(session: &mut Session, issuer: &str) -> Result<Uuid, SessionError> {
    ensure_open(session)?;
    ensure_facilitator(session, issuer, "start the session")?;
    if session.status != SessionStatus::Preparing {
        return Err(SessionError::InvalidTransition(
            "session has already started".into(),
        ));
    }
    if session.stories.is_empty() {
        return Err(SessionError::InvalidTransition(
            "cannot start a session with no stories".into(),
        ));
    }
    let first = session
        .next_pending()
        .map(|s| s.id)
        .expect("non-empty preparing session has a pending story");
    session.status = SessionStatus::Active;
    session.started_at = Some(Utc::now());
    session.current_story_id = Some(first);
    advance_to_voting(session.story_mut(first).unwrap());
    Ok(first)
}

/// Upserts a vote on the current VOTING story. `hours` is a non-negative
/// integer or the "unsure" sentinel.
pub fn cast_vote(
    session: &mut Session,
    story_id: Uuid,
    voter_account_id: &str,
    voter_display_name: &str,
    role: Role,
    hours: i32,
) -> Result<(), SessionError> {
    ensure_open(session)?;
    if hours < 0 && hours != UNSURE_HOURS {
        return Err(SessionError::InvalidTransition(format!(
            "vote hours must be non-negative or {UNSURE_HOURS} for unsure, got {hours}"
        )));
    }
    let story = session
        .story_mut(story_id)
        .ok_or_else(|| SessionError::InvalidTransition("unknown story".into()))?;
    match story.status {
        StoryStatus::Voting => {}
        StoryStatus::Revealed => return Err(SessionError::VotingClosed),
        other => {
            return Err(SessionError::InvalidTransition(format!(
                "story is {other:?}, not open for voting"
            )))
        }
    }
    if !story.needs_role(role) {
        return Err(SessionError::RoleNotRequired(role));
    }
    story.record_vote(voter_account_id, voter_display_name, role, hours);
    Ok(())
}

/// VOTING → REVEALED. From here every participant sees all hours and no
/// further votes are accepted.
pub fn reveal(
    session: &mut Session,
    issuer: &str,
    story_id: Uuid,
) -> Result<Vec<VoteView>, SessionError> {
    ensure_open(session)?;
    ensure_facilitator(session, issuer, "reveal votes")?;
    let story = session
        .story_mut(story_id)
        .ok_or_else(|| SessionError::InvalidTransition("unknown story".into()))?;
    if story.status != StoryStatus::Voting {
        return Err(SessionError::InvalidTransition(format!(
            "story is {:?}, only a voting story can be revealed",
            story.status
        )));
    }
    story.status = StoryStatus::Revealed;
    Ok(story.revealed_votes())
}

/// REVEALED → COMPLETED. Hours supplied for roles the story does not need
/// are ignored, not an error.
pub fn set_final(
    session: &mut Session,
    issuer: &str,
    story_id: Uuid,
    sa_hours: Option<i32>,
    dev_hours: Option<i32>,
    qa_hours: Option<i32>,
) -> Result<FinalHours, SessionError> {
    ensure_open(session)?;
    ensure_facilitator(session, issuer, "finalize estimates")?;
    let story = session
        .story_mut(story_id)
        .ok_or_else(|| SessionError::InvalidTransition("unknown story".into()))?;
    if story.status != StoryStatus::Revealed {
        return Err(SessionError::InvalidTransition(format!(
            "story is {:?}, estimates can only be finalized after reveal",
            story.status
        )));
    }
    let applied = FinalHours {
        sa: if story.needs_sa { sa_hours } else { None },
        dev: if story.needs_dev { dev_hours } else { None },
        qa: if story.needs_qa { qa_hours } else { None },
    };
    story.final_sa_hours = applied.sa;
    story.final_dev_hours = applied.dev;
    story.final_qa_hours = applied.qa;
    story.status = StoryStatus::Completed;
    Ok(applied)
}

/// Advances past a COMPLETED current story. When nothing is left to
/// estimate, the session itself completes instead.
pub fn next_story(session: &mut Session, issuer: &str) -> Result<NextStoryOutcome, SessionError> {
    ensure_open(session)?;
    ensure_facilitator(session, issuer, "advance to the next story")?;
    if session.status != SessionStatus::Active {
        return Err(SessionError::InvalidTransition(
            "session is not active".into(),
        ));
    }
    match session.current_story() {
        Some(s) if s.status == StoryStatus::Completed => {}
        Some(s) => {
            return Err(SessionError::InvalidTransition(format!(
                "current story is {:?}, finalize it before advancing",
                s.status
            )))
        }
        None => {
            return Err(SessionError::InvalidTransition(
                "no current story to advance from".into(),
            ))
        }
    }
    match session.next_pending().map(|s| s.id) {
        Some(next) => {
            session.current_story_id = Some(next);
            advance_to_voting(session.story_mut(next).unwrap());
            Ok(NextStoryOutcome::Advanced(next))
        }
        None => {
            finish(session);
            Ok(NextStoryOutcome::SessionFinished)
        }
    }
}

/// Explicit facilitator end of an ACTIVE session.
pub fn complete_session(session: &mut Session, issuer: &str) -> Result<(), SessionError> {
    ensure_open(session)?;
    ensure_facilitator(session, issuer, "complete the session")?;
    if session.status != SessionStatus::Active {
        return Err(SessionError::InvalidTransition(
            "only an active session can be completed".into(),
        ));
    }
    finish(session);
    Ok(())
}

fn finish(session: &mut Session) {
    session.status = SessionStatus::Completed;
    session.completed_at = Some(Utc::now());
    session.current_story_id = None;
}
