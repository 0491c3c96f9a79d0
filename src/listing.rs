//! Search, genre facets and pagination over a fetched movie list.
//!
//! Everything here is pure: the same base collection and [`FilterState`]
//! always produce the same [`Listing`].

use crate::model::MovieRecord;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

pub const PAGE_SIZES: [usize; 4] = [5, 10, 15, 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageSize(usize);

impl PageSize {
    pub fn new(size: usize) -> Option<PageSize> {
        if PAGE_SIZES.contains(&size) {
            Some(PageSize(size))
        } else {
            None
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize(10)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<'a> {
    pub visible: Vec<&'a MovieRecord>,
    pub total_pages: usize,
    pub total_matches: usize,
}

impl<'a> Listing<'a> {
    pub fn is_empty(&self) -> bool {
        self.total_matches == 0
    }
}

fn matches_query(movie: &MovieRecord, needle: &str) -> bool {
    movie.title.to_lowercase().contains(needle)
        || movie.genre.to_lowercase().contains(needle)
        || movie.director.to_lowercase().contains(needle)
}

pub fn derive<'a>(
    base: &'a [MovieRecord],
    query: &str,
    selected_genres: &BTreeSet<String>,
    page: usize,
    page_size: usize,
) -> Listing<'a> {
    // the query is matched as typed, only case is folded
    let needle = query.to_lowercase();
    let filtered: Vec<&MovieRecord> = base
        .iter()
        .filter(|movie| needle.is_empty() || matches_query(movie, &needle))
        .filter(|movie| selected_genres.is_empty() || selected_genres.contains(&movie.genre))
        .collect();

    let total_matches = filtered.len();
    let total_pages = if page_size == 0 {
        0
    } else {
        (total_matches + page_size - 1) / page_size
    };
    let visible = match page.checked_sub(1) {
        Some(index) if page_size > 0 => filtered
            .into_iter()
            .skip(index.saturating_mul(page_size))
            .take(page_size)
            .collect(),
        _ => Vec::new(),
    };

    Listing {
        visible,
        total_pages,
        total_matches,
    }
}

/// Distinct genres of `base` in order of first appearance.
pub fn genres(base: &[MovieRecord]) -> Vec<&str> {
    let mut seen = HashSet::new();
    base.iter()
        .map(|movie| movie.genre.as_str())
        .filter(|genre| seen.insert(*genre))
        .collect()
}

/// Filter inputs of a dashboard. Every setter that changes what is matched
/// puts the view back on page 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    query: String,
    selected_genres: BTreeSet<String>,
    page: usize,
    page_size: PageSize,
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState {
            query: String::new(),
            selected_genres: BTreeSet::new(),
            page: 1,
            page_size: PageSize::default(),
        }
    }
}

impl FilterState {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn selected_genres(&self) -> &BTreeSet<String> {
        &self.selected_genres
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn set_query(&mut self, query: &str) {
        if self.query != query {
            self.query = query.to_owned();
            self.page = 1;
        }
    }

    pub fn toggle_genre(&mut self, genre: &str) {
        if !self.selected_genres.remove(genre) {
            self.selected_genres.insert(genre.to_owned());
        }
        self.page = 1;
    }

    pub fn clear_genres(&mut self) {
        if !self.selected_genres.is_empty() {
            self.selected_genres.clear();
            self.page = 1;
        }
    }

    pub fn set_page_size(&mut self, page_size: PageSize) {
        if self.page_size != page_size {
            self.page_size = page_size;
            self.page = 1;
        }
    }

    /// Called when a different base collection was fetched.
    pub fn base_changed(&mut self) {
        self.page = 1;
    }

    pub fn go_to(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn prev(&mut self) {
        self.page = self.page.saturating_sub(1).max(1);
    }

    pub fn next(&mut self, total_pages: usize) {
        self.page = (self.page + 1).min(total_pages.max(1));
    }

    pub fn derive<'a>(&self, base: &'a [MovieRecord]) -> Listing<'a> {
        derive(
            base,
            &self.query,
            &self.selected_genres,
            self.page,
            self.page_size.get(),
        )
    }

    /// Reads `q`, repeated `genre`, `page` and `per_page`. Values that do
    /// not parse fall back to their defaults.
    pub fn from_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> FilterState {
        let mut state = FilterState::default();
        let mut page = 1;
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                "q" => state.query = value.to_owned(),
                "genre" => {
                    state.selected_genres.insert(value.to_owned());
                }
                "page" => page = value.parse().unwrap_or(1),
                "per_page" => {
                    if let Some(size) = value.parse().ok().and_then(PageSize::new) {
                        state.page_size = size;
                    }
                }
                _ => {}
            }
        }
        state.go_to(page);
        state
    }

    pub fn from_query_string(query: &str) -> FilterState {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
        FilterState::from_pairs(&pairs)
    }

    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if !self.query.is_empty() {
            pairs.push(("q", self.query.clone()));
        }
        for genre in &self.selected_genres {
            pairs.push(("genre", genre.clone()));
        }
        if self.page != 1 {
            pairs.push(("page", self.page.to_string()));
        }
        if self.page_size != PageSize::default() {
            pairs.push(("per_page", self.page_size.get().to_string()));
        }
        serde_urlencoded::to_string(&pairs).unwrap_or_default()
    }

    /// Link to `path` showing this state.
    pub fn href(&self, path: &str) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            path.to_owned()
        } else {
            format!("{}?{}", path, query)
        }
    }
}
