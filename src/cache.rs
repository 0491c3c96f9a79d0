use crate::model::{Credential, MovieRecord};
use crate::service::{MovieService, ServiceError};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Base collection as last fetched for each session.
#[derive(Default)]
pub struct CatalogCache {
    entries: Mutex<HashMap<String, Vec<MovieRecord>>>,
}

pub struct Snapshot {
    pub movies: Vec<MovieRecord>,
    /// A previous copy existed and the fetched list differs from it.
    pub replaced: bool,
}

impl CatalogCache {
    /// Returns the cached list for `session`, fetching it when missing or
    /// when `refresh` is set.
    pub async fn load(
        &self,
        session: &str,
        service: &dyn MovieService,
        credential: &Credential,
        refresh: bool,
    ) -> Result<Snapshot, ServiceError> {
        if !refresh {
            if let Some(movies) = self.entries.lock().get(session) {
                return Ok(Snapshot {
                    movies: movies.clone(),
                    replaced: false,
                });
            }
        }

        let movies = service.list(credential).await?;
        debug!("fetched {} movies for session {}", movies.len(), session);
        // whichever response lands last wins
        let previous = self
            .entries
            .lock()
            .insert(session.to_owned(), movies.clone());
        Ok(Snapshot {
            replaced: previous.map_or(false, |previous| previous != movies),
            movies,
        })
    }

    pub fn invalidate(&self, session: &str) {
        self.entries.lock().remove(session);
    }
}
