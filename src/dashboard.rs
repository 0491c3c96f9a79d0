//! Admin and user dashboards.
//!
//! Both views work on the session's cached base collection and derive the
//! visible page from the query string on every request.

use crate::listing::{genres, FilterState};
use crate::model::*;
use crate::view::*;
use crate::{admit, log_error, page_context, redirect, render, Cache, Db, Service, Tera};
use actix_identity::Identity as AuthCookie;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const ADMIN_VIEW: &str = "/admin";
const USER_VIEW: &str = "/user";

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route(ADMIN_VIEW, web::get().to(admin))
        .route("/admin/movies", web::post().to(create_movie))
        .route("/admin/movies/{id}", web::post().to(update_movie))
        .route("/admin/movies/{id}/delete", web::post().to(delete_movie))
        .route(USER_VIEW, web::get().to(user))
        .route("/user/favorites/{id}", web::post().to(toggle_favorite));
}

#[derive(Deserialize)]
struct DashboardParams {
    new: Option<String>,
    edit: Option<String>,
    refresh: Option<String>,
}

#[derive(Serialize)]
struct Card<'a> {
    movie: &'a MovieRecord,
    added: String,
    liked: bool,
    edit: Option<String>,
    delete: Option<String>,
}

fn cards<'a>(movies: &[&'a MovieRecord], favorites: &BTreeSet<String>) -> Vec<Card<'a>> {
    movies
        .iter()
        .map(|movie| Card {
            movie,
            added: added_label(movie.created_at),
            liked: favorites.contains(&movie.id),
            edit: None,
            delete: None,
        })
        .collect()
}

/// Percent-encodes `id` for use as a path segment.
fn segment(id: &str) -> String {
    serde_urlencoded::to_string(&[("", id)])
        .map(|encoded| encoded[1..].replace('+', "%20"))
        .unwrap_or_default()
}

/// Admin cards link to their edit form and delete action, keeping `state`.
fn admin_cards<'a>(movies: &[&'a MovieRecord], state: &FilterState) -> Vec<Card<'a>> {
    let back = state.href(ADMIN_VIEW);
    let mut cards = cards(movies, &BTreeSet::new());
    for card in &mut cards {
        card.edit = Some(append(&back, &[("edit", card.movie.id.as_str())]));
        let delete = format!("/admin/movies/{}/delete", segment(&card.movie.id));
        card.delete = Some(state.href(&delete));
    }
    cards
}

/// Admin movie form as posted; every field arrives as text.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
struct MovieForm {
    title: String,
    #[serde(default)]
    description: String,
    director: String,
    release_year: String,
    genre: String,
    #[serde(default)]
    avatar: String,
}

impl MovieForm {
    fn fields(&self) -> Result<MovieFields, String> {
        let required = [
            ("Title", &self.title),
            ("Director", &self.director),
            ("Genre", &self.genre),
        ];
        for (label, value) in required.iter() {
            if value.trim().is_empty() {
                return Err(format!("{} is required", label));
            }
        }
        let release_year = self
            .release_year
            .trim()
            .parse()
            .map_err(|_| "Release year must be a number".to_owned())?;
        Ok(MovieFields {
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            director: self.director.trim().to_owned(),
            release_year,
            genre: self.genre.trim().to_owned(),
            avatar: self.avatar.trim().to_owned(),
        })
    }
}

impl From<&MovieRecord> for MovieForm {
    fn from(movie: &MovieRecord) -> Self {
        let fields = MovieFields::from(movie);
        MovieForm {
            title: fields.title,
            description: fields.description,
            director: fields.director,
            release_year: fields.release_year.to_string(),
            genre: fields.genre,
            avatar: fields.avatar,
        }
    }
}

#[derive(Serialize)]
struct MovieFormView {
    heading: &'static str,
    submit: &'static str,
    action: String,
    values: MovieForm,
}

#[derive(Serialize)]
struct GenreChip<'a> {
    name: &'a str,
    selected: bool,
    href: String,
}

fn chip<'a>(state: &FilterState, name: &'a str) -> GenreChip<'a> {
    let mut target = state.clone();
    target.toggle_genre(name);
    GenreChip {
        name,
        selected: state.selected_genres().contains(name),
        href: target.href(USER_VIEW),
    }
}

async fn admin(
    req: HttpRequest,
    params: web::Query<DashboardParams>,
    id: AuthCookie,
    tera: Tera,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::Admin)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let mut ctx = page_context(Some(Role::Admin), req.query_string());
    let mut state = FilterState::from_query_string(req.query_string());
    let movies = match cache
        .load(
            &visitor.key,
            service.get_ref(),
            &visitor.session.credential,
            params.refresh.is_some(),
        )
        .await
    {
        Ok(snapshot) => {
            if snapshot.replaced {
                state.base_changed();
            }
            snapshot.movies
        }
        Err(err) => {
            ctx.insert("banner", &Banner::error(err.to_string()));
            Vec::new()
        }
    };

    if params.new.is_some() {
        ctx.insert(
            "form",
            &MovieFormView {
                heading: "Add Movie",
                submit: "Create",
                action: state.href("/admin/movies"),
                values: MovieForm::default(),
            },
        );
    } else if let Some(edit) = &params.edit {
        match movies.iter().find(|movie| &movie.id == edit) {
            Some(movie) => ctx.insert(
                "form",
                &MovieFormView {
                    heading: "Edit Movie",
                    submit: "Update",
                    action: state.href(&format!("/admin/movies/{}", segment(&movie.id))),
                    values: MovieForm::from(movie),
                },
            ),
            None => ctx.insert("banner", &Banner::error("Movie not found")),
        }
    }

    let listing = state.derive(&movies);
    ctx.insert("name", &visitor.session.identity.name);
    ctx.insert("cards", &admin_cards(&listing.visible, &state));
    ctx.insert("empty", &listing.is_empty());
    ctx.insert("pager", &pager(&state, listing.total_pages, ADMIN_VIEW));
    ctx.insert("page_sizes", &page_size_options(state.page_size()));
    ctx.insert("back", &state.href(ADMIN_VIEW));
    ctx.insert("new", &append(&state.href(ADMIN_VIEW), &[("new", "")]));
    ctx.insert("refresh", &with_refresh(&state.href(ADMIN_VIEW)));
    render(&tera, "admin.html", &ctx)
}

/// Where a finished admin action lands, with its outcome. The listing keeps
/// its page size and starts over at page 1.
fn after_mutation(mut state: FilterState, result: Result<Notice, String>) -> HttpResponse {
    state.base_changed();
    let back = state.href(ADMIN_VIEW);
    match result {
        Ok(notice) => redirect(&with_notice(&back, notice)),
        Err(message) => redirect(&with_error(&back, &message)),
    }
}

async fn create_movie(
    req: HttpRequest,
    form: web::Form<MovieForm>,
    id: AuthCookie,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::Admin)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let state = FilterState::from_query_string(req.query_string());
    let fields = match form.fields() {
        Ok(fields) => fields,
        Err(message) => {
            let retry = append(&state.href(ADMIN_VIEW), &[("new", "")]);
            return Ok(redirect(&with_error(&retry, &message)));
        }
    };
    let result = service.create(&visitor.session.credential, &fields).await;
    cache.invalidate(&visitor.key);
    Ok(after_mutation(state, match result {
        Ok(movie) => {
            info!("{} created movie {}", visitor.session.identity.name, movie.id);
            Ok(Notice::Created)
        }
        Err(err) => {
            debug!("create failed: {:?}", err);
            Err(err.to_string())
        }
    }))
}

async fn update_movie(
    req: HttpRequest,
    path: web::Path<String>,
    form: web::Form<MovieForm>,
    id: AuthCookie,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::Admin)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let movie_id = path.into_inner();
    let state = FilterState::from_query_string(req.query_string());
    let fields = match form.fields() {
        Ok(fields) => fields,
        Err(message) => {
            let retry = append(&state.href(ADMIN_VIEW), &[("edit", movie_id.as_str())]);
            return Ok(redirect(&with_error(&retry, &message)));
        }
    };
    let result = service
        .update(&visitor.session.credential, &movie_id, &fields)
        .await;
    cache.invalidate(&visitor.key);
    Ok(after_mutation(state, match result {
        Ok(movie) => {
            info!("{} updated movie {}", visitor.session.identity.name, movie.id);
            Ok(Notice::Updated)
        }
        Err(err) => {
            debug!("update of {} failed: {:?}", movie_id, err);
            Err(err.to_string())
        }
    }))
}

async fn delete_movie(
    req: HttpRequest,
    path: web::Path<String>,
    id: AuthCookie,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::Admin)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let movie_id = path.into_inner();
    let state = FilterState::from_query_string(req.query_string());
    let result = service.delete(&visitor.session.credential, &movie_id).await;
    cache.invalidate(&visitor.key);
    Ok(after_mutation(state, match result {
        Ok(()) => {
            info!("{} deleted movie {}", visitor.session.identity.name, movie_id);
            Ok(Notice::Deleted)
        }
        Err(err) => {
            debug!("delete of {} failed: {:?}", movie_id, err);
            Err(err.to_string())
        }
    }))
}

async fn user(
    req: HttpRequest,
    params: web::Query<DashboardParams>,
    id: AuthCookie,
    tera: Tera,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::User)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let mut ctx = page_context(Some(Role::User), req.query_string());
    let mut state = FilterState::from_query_string(req.query_string());
    let movies = match cache
        .load(
            &visitor.key,
            service.get_ref(),
            &visitor.session.credential,
            params.refresh.is_some(),
        )
        .await
    {
        Ok(snapshot) => {
            if snapshot.replaced {
                state.base_changed();
            }
            snapshot.movies
        }
        Err(err) => {
            ctx.insert("banner", &Banner::error(err.to_string()));
            Vec::new()
        }
    };
    let favorites = visitor
        .slot
        .favorites()
        .map_err(|err| log_error(err, "Database error"))?;

    let listing = state.derive(&movies);
    let chips: Vec<GenreChip> = genres(&movies)
        .into_iter()
        .map(|genre| chip(&state, genre))
        .collect();
    let selected: Vec<GenreChip> = state
        .selected_genres()
        .iter()
        .map(|genre| chip(&state, genre))
        .collect();
    let clear_genres = if selected.is_empty() {
        None
    } else {
        let mut target = state.clone();
        target.clear_genres();
        Some(target.href(USER_VIEW))
    };

    ctx.insert("name", &visitor.session.identity.name);
    ctx.insert("query", state.query());
    ctx.insert("page_size", &state.page_size());
    ctx.insert("page_sizes", &page_size_options(state.page_size()));
    ctx.insert("genres", &chips);
    ctx.insert("selected", &selected);
    ctx.insert("clear_genres", &clear_genres);
    ctx.insert("cards", &cards(&listing.visible, &favorites));
    ctx.insert("empty", &listing.is_empty());
    ctx.insert("pager", &pager(&state, listing.total_pages, USER_VIEW));
    ctx.insert("back", &state.to_query_string());
    ctx.insert("refresh", &with_refresh(&state.href(USER_VIEW)));
    render(&tera, "user.html", &ctx)
}

#[derive(Deserialize)]
struct FavoriteForm {
    #[serde(default)]
    back: String,
}

async fn toggle_favorite(
    path: web::Path<String>,
    form: web::Form<FavoriteForm>,
    id: AuthCookie,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let visitor = match admit(&id, &db, Role::User)? {
        Ok(visitor) => visitor,
        Err(bounce) => return Ok(bounce),
    };
    let liked = visitor
        .slot
        .toggle_favorite(path.as_str())
        .map_err(|err| log_error(err, "Database error"))?;
    // favoriting is not a filter change, so the page survives
    let state = FilterState::from_query_string(&form.back);
    let notice = if liked {
        Notice::FavoriteAdded
    } else {
        Notice::FavoriteRemoved
    };
    Ok(redirect(&with_notice(&state.href(USER_VIEW), notice)))
}
