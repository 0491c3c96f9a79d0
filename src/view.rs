use crate::listing::{FilterState, PageSize, PAGE_SIZES};
use crate::model::Role;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Banner {
    pub message: String,
    pub severity: &'static str,
}

impl Banner {
    pub fn success(message: impl Into<String>) -> Banner {
        Banner {
            message: message.into(),
            severity: "success",
        }
    }

    pub fn info(message: impl Into<String>) -> Banner {
        Banner {
            message: message.into(),
            severity: "info",
        }
    }

    pub fn error(message: impl Into<String>) -> Banner {
        Banner {
            message: message.into(),
            severity: "error",
        }
    }
}

/// Outcome of a redirecting action, shown once on the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Created,
    Updated,
    Deleted,
    FavoriteAdded,
    FavoriteRemoved,
    SignedUp,
    LoggedOut,
}

impl Notice {
    const ALL: [Notice; 7] = [
        Notice::Created,
        Notice::Updated,
        Notice::Deleted,
        Notice::FavoriteAdded,
        Notice::FavoriteRemoved,
        Notice::SignedUp,
        Notice::LoggedOut,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Notice::Created => "created",
            Notice::Updated => "updated",
            Notice::Deleted => "deleted",
            Notice::FavoriteAdded => "favorite_added",
            Notice::FavoriteRemoved => "favorite_removed",
            Notice::SignedUp => "signed_up",
            Notice::LoggedOut => "logout",
        }
    }

    pub fn parse(key: &str) -> Option<Notice> {
        Notice::ALL.iter().copied().find(|notice| notice.key() == key)
    }

    pub fn banner(self) -> Banner {
        match self {
            Notice::Created => Banner::success("Movie created!"),
            Notice::Updated => Banner::success("Movie updated!"),
            Notice::Deleted => Banner::info("Movie deleted!"),
            Notice::FavoriteAdded => Banner::success("Added to favorites!"),
            Notice::FavoriteRemoved => Banner::info("Removed from favorites!"),
            Notice::SignedUp => Banner::success("Signup successful! Please login."),
            Notice::LoggedOut => Banner::info("You have been logged out."),
        }
    }
}

/// Adds `pairs` to the query string of `href`.
pub fn append(href: &str, pairs: &[(&str, &str)]) -> String {
    let extra = serde_urlencoded::to_string(pairs).unwrap_or_default();
    let separator = if href.contains('?') { '&' } else { '?' };
    format!("{}{}{}", href, separator, extra)
}

pub fn with_notice(href: &str, notice: Notice) -> String {
    append(href, &[("notice", notice.key())])
}

pub fn with_error(href: &str, message: &str) -> String {
    append(href, &[("error", message)])
}

/// Same view, refetching the base collection first.
pub fn with_refresh(href: &str) -> String {
    append(href, &[("refresh", "1")])
}

/// Banner carried in a query string: an `error` wins over a `notice`.
pub fn banner_from_query(query: &str) -> Option<Banner> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
    if let Some(message) = param(&pairs, "error") {
        return Some(Banner::error(message));
    }
    param(&pairs, "notice")
        .and_then(Notice::parse)
        .map(Notice::banner)
}

fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NavItem {
    pub label: &'static str,
    pub href: &'static str,
}

pub fn nav(role: Option<Role>) -> Vec<NavItem> {
    let item = |label, href| NavItem { label, href };
    match role {
        Some(Role::Admin) => vec![
            item("Admin Dashboard", "/admin"),
            item("Logout", "/logout"),
        ],
        Some(Role::User) => vec![item("User Dashboard", "/user"), item("Logout", "/logout")],
        None => vec![item("Login", "/"), item("Signup", "/signup")],
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PageLink {
    pub number: usize,
    pub href: String,
    pub current: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Pager {
    pub pages: Vec<PageLink>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Pagination controls for `state`, or nothing when one page holds it all.
pub fn pager(state: &FilterState, total_pages: usize, path: &str) -> Option<Pager> {
    if total_pages <= 1 {
        return None;
    }
    let link = |change: &dyn Fn(&mut FilterState)| {
        let mut target = state.clone();
        change(&mut target);
        target.href(path)
    };
    let pages = (1..=total_pages)
        .map(|number| PageLink {
            number,
            href: link(&|s: &mut FilterState| s.go_to(number)),
            current: number == state.page(),
        })
        .collect();
    Some(Pager {
        pages,
        prev: if state.page() > 1 {
            Some(link(&|s: &mut FilterState| s.prev()))
        } else {
            None
        },
        next: if state.page() < total_pages {
            Some(link(&|s: &mut FilterState| s.next(total_pages)))
        } else {
            None
        },
    })
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PageSizeOption {
    pub size: usize,
    pub selected: bool,
}

pub fn page_size_options(current: PageSize) -> Vec<PageSizeOption> {
    PAGE_SIZES
        .iter()
        .map(|&size| PageSizeOption {
            size,
            selected: size == current.get(),
        })
        .collect()
}

pub fn added_label(created_at: Option<DateTime<Utc>>) -> String {
    match created_at {
        Some(at) => at.format("%Y-%m-%d").to_string(),
        None => "N/A".to_owned(),
    }
}
