use crate::model::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use std::collections::BTreeSet;
use std::convert::Infallible;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("stored session is malformed: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("session storage failed: {0}")]
    Storage(#[from] sled::Error),
}

/// What a successful login leaves behind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub identity: Identity,
    pub credential: Credential,
}

pub trait SessionStore {
    fn get(&self) -> Result<Option<Session>, SessionError>;
    fn set(&self, identity: Identity, credential: Credential) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

/// Stored form of a session, with the moment it stops being valid.
#[derive(Serialize, Deserialize)]
struct Stored {
    session: Session,
    expires_at: DateTime<Utc>,
}

impl Stored {
    fn decode(data: &[u8]) -> Result<Stored, SessionError> {
        Ok(bincode::deserialize(data)?)
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

const SESSIONS: &'static [u8] = b"sessions";
const FAVORITES: &'static [u8] = b"favorites";

/// All sessions of the server. Every login lives for `ttl`.
#[derive(Clone)]
pub struct Sessions {
    db: sled::Db,
    ttl: Duration,
}

impl Sessions {
    pub fn new(db: sled::Db, ttl: Duration) -> Sessions {
        Sessions { db, ttl }
    }

    /// Opens the persisted session named by `key`, which need not exist yet.
    pub fn session(&self, key: &str) -> sled::Result<SessionSlot> {
        Ok(SessionSlot {
            sessions: self.db.open_tree(SESSIONS)?,
            favorites: self.db.open_tree(FAVORITES)?,
            key: key.as_bytes().to_vec(),
            ttl: self.ttl,
        })
    }

    /// Deletes every session that expired or can no longer be read, together
    /// with its favorites. Returns the deleted keys.
    pub fn sweep(&self) -> Result<Vec<String>, SessionError> {
        let now = Utc::now();
        let mut dead = Vec::new();
        for entry in self.db.open_tree(SESSIONS)?.iter() {
            let (key, data) = entry?;
            let live = Stored::decode(&data).map_or(false, |stored| stored.is_live(now));
            if !live {
                dead.push(String::from_utf8_lossy(&key).into_owned());
            }
        }
        for key in &dead {
            self.session(key)?.clear()?;
        }
        Ok(dead)
    }
}

/// One visitor's session inside the shared database.
pub struct SessionSlot {
    sessions: sled::Tree,
    favorites: sled::Tree,
    key: Vec<u8>,
    ttl: Duration,
}

impl SessionStore for SessionSlot {
    /// An expired session reads as absent.
    fn get(&self) -> Result<Option<Session>, SessionError> {
        let stored = match self.sessions.get(&self.key)? {
            Some(data) => Stored::decode(&data)?,
            None => return Ok(None),
        };
        Ok(Some(stored)
            .filter(|stored| stored.is_live(Utc::now()))
            .map(|stored| stored.session))
    }

    fn set(&self, identity: Identity, credential: Credential) -> Result<(), SessionError> {
        let data = bincode::serialize(&Stored {
            session: Session {
                identity,
                credential,
            },
            expires_at: Utc::now() + self.ttl,
        })?;
        self.sessions.insert(&self.key, data)?;
        self.sessions.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        (&self.sessions, &self.favorites)
            .transaction(
                |(sessions, favorites)| -> ConflictableTransactionResult<(), Infallible> {
                    sessions.remove(self.key.as_slice())?;
                    favorites.remove(self.key.as_slice())?;
                    Ok(())
                },
            )
            .map_err(|e: TransactionError<Infallible>| match e {
                TransactionError::Storage(s) => s,
                TransactionError::Abort(never) => match never {},
            })?;
        self.sessions.flush()?;
        Ok(())
    }
}

impl SessionSlot {
    pub fn favorites(&self) -> Result<BTreeSet<String>, SessionError> {
        Ok(self
            .favorites
            .get(&self.key)?
            .map(|d| bincode::deserialize(&d))
            .transpose()?
            .unwrap_or_default())
    }

    /// Flips the favorite flag of `movie_id` and returns the new state.
    pub fn toggle_favorite(&self, movie_id: &str) -> Result<bool, SessionError> {
        let mut favorites = self.favorites()?;
        let liked = if favorites.remove(movie_id) {
            false
        } else {
            favorites.insert(movie_id.to_owned())
        };
        self.favorites
            .insert(&self.key, bincode::serialize(&favorites)?)?;
        Ok(liked)
    }
}
