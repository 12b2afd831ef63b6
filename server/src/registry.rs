//! Process-wide room registry: room code → live room. Rooms are created by
//! the session-create call and torn down once the session has completed and
//! the last participant disconnected. Each room has its own lock so
//! unrelated rooms never contend; the map lock is held only for
//! lookup/insert/remove.

use crate::engine;
use crate::room::Room;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use storypoker_protocol::{room_code, Session, SessionStatus, Story, StoryView};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStory {
    pub title: String,
    #[serde(default)]
    pub story_key: Option<String>,
    pub needs_sa: bool,
    pub needs_dev: bool,
    pub needs_qa: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub team_id: String,
    pub epic_key: String,
    pub facilitator_account_id: String,
    #[serde(default)]
    pub stories: Vec<NewStory>,
}

/// Contract shape returned to the dashboard that created the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub id: Uuid,
    pub team_id: String,
    pub epic_key: String,
    pub room_code: String,
    pub status: SessionStatus,
    pub stories: Vec<StoryView>,
    pub current_story_id: Option<Uuid>,
}

pub struct Registry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_session(&self, req: CreateSessionRequest) -> CreateSessionResponse {
        let mut rooms = self.rooms.lock();
        let code = loop {
            let candidate = room_code::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut session = Session::new(
            req.team_id,
            req.epic_key,
            req.facilitator_account_id,
            code.clone(),
        );
        for s in req.stories {
            // A fresh PREPARING session always accepts stories.
            engine::add_story(
                &mut session,
                Story::new(s.title, s.story_key, s.needs_sa, s.needs_dev, s.needs_qa, 0),
            )
            .expect("preparing session accepts stories");
        }

        let response = CreateSessionResponse {
            id: session.id,
            team_id: session.team_id.clone(),
            epic_key: session.epic_key.clone(),
            room_code: session.room_code.clone(),
            status: session.status,
            stories: session.stories.iter().map(Story::public_view).collect(),
            current_story_id: session.current_story_id,
        };

        tracing::info!(room = %code, session = %session.id, "session created");
        rooms.insert(code, Arc::new(Mutex::new(Room::new(session))));
        response
    }

    pub fn get(&self, code: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.lock().get(code).cloned()
    }

    /// Drops the room if the session completed and nobody is connected.
    pub fn remove_if_abandoned(&self, code: &str) {
        let mut rooms = self.rooms.lock();
        let abandoned = match rooms.get(code) {
            Some(room) => room.lock().is_abandoned(),
            None => false,
        };
        if abandoned {
            rooms.remove(code);
            tracing::info!(room = %code, "room archived and torn down");
        }
    }

    #[cfg(test)]
    pub fn contains(&self, code: &str) -> bool {
        self.rooms.lock().contains_key(code)
    }
}
