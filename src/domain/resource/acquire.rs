//! The single scheduler session.

use crate::api::response_dto::AcquireResponseDto;
use crate::domain::resource::request::RequestHandle;
use crate::domain::rset::ResourceSet;
use crate::domain::utils::id::ClientId;
use crate::domain::utils::idset::{self, Idset};
use crate::error::Error;

#[derive(Debug)]
enum SessionState {
    /// Waiting for R to be defined.
    Parked,
    Active {
        /// Ranks the session was handed, R minus excluded at start. Fixed for
        /// the session's lifetime: ranks un-excluded later need a new session.
        valid: Idset,
        /// Last `up` set the session was told about.
        up: Idset,
    },
}

#[derive(Debug)]
struct Session {
    handle: RequestHandle,
    state: SessionState,
}

#[derive(Debug, Default)]
pub struct Acquire {
    session: Option<Session>,
}

fn send(handle: &RequestHandle, response: &AcquireResponseDto) -> bool {
    match serde_json::to_value(response) {
        Ok(value) => handle.respond(value),
        Err(e) => handle.respond_error(e.into()),
    }
}

impl Acquire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_parked(&self) -> bool {
        matches!(self.session, Some(Session { state: SessionState::Parked, .. }))
    }

    /// Parks a new session. Answers `Busy` and returns false if one exists.
    pub fn request(&mut self, handle: RequestHandle) -> bool {
        if let Some(session) = &self.session {
            log::debug!("acquire: rejecting {}, session held by {}", handle.client(), session.handle.client());
            handle.respond_error(Error::Busy("an acquire session is already active".to_string()));
            return false;
        }
        self.session = Some(Session { handle, state: SessionState::Parked });
        true
    }

    /// Sends the first response to a parked session. `up` is the current
    /// set of available ranks.
    pub fn start(&mut self, r: &ResourceSet, excluded: &Idset, up: &Idset) {
        let Some(session) = self.session.as_mut() else { return };
        if !matches!(session.state, SessionState::Parked) {
            return;
        }
        let valid = r.ranks().difference(excluded);
        let up = up.intersect(&valid);
        let response = AcquireResponseDto { resources: Some(r.remove_ranks(excluded).to_value()), up: Some(up.clone()), down: None };
        if send(&session.handle, &response) {
            log::info!("acquire: session started for {} (up {})", session.handle.client(), up);
            session.state = SessionState::Active { valid, up };
        } else {
            self.session = None;
        }
    }

    /// Sends `{up?, down?}` if the available set changed.
    pub fn refresh(&mut self, up: &Idset) {
        let Some(session) = self.session.as_mut() else { return };
        let SessionState::Active { valid, up: last } = &mut session.state else { return };

        let up = up.intersect(valid);
        let (added, removed) = idset::diff(last, &up);
        if added.is_none() && removed.is_none() {
            return;
        }
        *last = up;
        let response = AcquireResponseDto { resources: None, up: added, down: removed };
        if !send(&session.handle, &response) {
            log::debug!("acquire: session owner is gone");
            self.session = None;
        }
    }

    /// Ends the session with `Canceled` if it matches. Returns true if so.
    pub fn cancel(&mut self, client: &ClientId, matchtag: u32) -> bool {
        match self.session.take() {
            Some(session) if session.handle.is_from(client, Some(matchtag)) => {
                session.handle.respond_error(Error::Canceled("acquire canceled".to_string()));
                true
            }
            other => {
                self.session = other;
                false
            }
        }
    }

    /// Frees the slot without a response if `client` owns it.
    pub fn disconnect(&mut self, client: &ClientId) {
        if self.session.as_ref().is_some_and(|s| s.handle.is_from(client, None)) {
            log::debug!("acquire: {} disconnected", client);
            self.session = None;
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.handle.respond_error(Error::Canceled("module unloaded".to_string()));
        }
    }
}
