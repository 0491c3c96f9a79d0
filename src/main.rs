mod cache;
mod config;
mod dashboard;
mod guard;
mod listing;
mod model;
mod service;
mod session;
mod view;

use actix_identity::{CookieIdentityPolicy, Identity as AuthCookie, IdentityService};
use actix_web::cookie::time;
use actix_web::{error, middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use cache::CatalogCache;
use config::Config;
use guard::GuardDecision;
use log::{debug, info};
use model::*;
use serde::{Deserialize, Serialize};
use service::{HttpMovieService, MovieService};
use session::*;
use std::sync::Arc;
use std::time::Duration;
use view::*;

type Tera = web::Data<tera::Tera>;
type Db = web::Data<Sessions>;
type Service = web::Data<dyn MovieService>;
type Cache = web::Data<CatalogCache>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("location", location))
        .finish()
}

fn render(
    tera: &tera::Tera,
    template: &str,
    ctx: &tera::Context,
) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

/// Context shared by every page: navigation and the one-shot banner.
fn page_context(role: Option<Role>, query: &str) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("nav", &nav(role));
    if let Some(banner) = banner_from_query(query) {
        ctx.insert("banner", &banner);
    }
    ctx
}

fn session_slot(
    id: &AuthCookie,
    db: &Sessions,
) -> actix_web::Result<Option<(String, SessionSlot)>> {
    match id.identity() {
        Some(key) => {
            let slot = db
                .session(&key)
                .map_err(|err| log_error(err, "Database error"))?;
            Ok(Some((key, slot)))
        }
        None => Ok(None),
    }
}

/// A visitor the guard let through.
struct Visitor {
    key: String,
    slot: SessionSlot,
    session: Session,
}

/// Guards a protected view. `Err` carries the redirect to send instead.
fn admit(
    id: &AuthCookie,
    db: &Sessions,
    required: Role,
) -> actix_web::Result<Result<Visitor, HttpResponse>> {
    let decision = match session_slot(id, db)? {
        Some((key, slot)) => match guard::admit(&slot, Some(required)) {
            Ok(session) => return Ok(Ok(Visitor { key, slot, session })),
            Err(decision) => decision,
        },
        None => GuardDecision::RedirectToLogin,
    };
    debug!("{:?} for {} view", decision, required);
    Ok(Err(redirect(
        decision.location().unwrap_or(guard::LOGIN_VIEW),
    )))
}

async fn index(
    req: HttpRequest,
    id: AuthCookie,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if let Some((_key, slot)) = session_slot(&id, &db)? {
        if let Ok(session) = guard::admit(&slot, None) {
            return Ok(redirect(session.identity.role.home()));
        }
    }
    let ctx = page_context(None, req.query_string());
    render(&tera, "login.html", &ctx)
}

#[derive(Serialize, Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: AuthCookie,
    tera: Tera,
    db: Db,
    service: Service,
    cache: Cache,
) -> actix_web::Result<HttpResponse> {
    match service.login(&params.email, &params.password).await {
        Ok(session) => {
            if let Some((old_key, old)) = session_slot(&id, &db)? {
                old.clear().map_err(|err| log_error(err, "Database error"))?;
                cache.invalidate(&old_key);
            }
            let key = uuid::Uuid::new_v4().to_string();
            let Session {
                identity,
                credential,
            } = session;
            let home = identity.role.home();
            info!("{} signed in as {}", identity.name, identity.role);
            db.session(&key)
                .map_err(|err| log_error(err, "Database error"))?
                .set(identity, credential)
                .map_err(|err| log_error(err, "Database error"))?;
            id.remember(key);
            Ok(redirect(home))
        }
        Err(err) => {
            debug!("login rejected: {:?}", err);
            let mut ctx = page_context(None, "");
            ctx.insert("banner", &Banner::error(err.to_string()));
            ctx.insert("email", &params.email);
            render(&tera, "login.html", &ctx)
        }
    }
}

async fn signup(tera: Tera) -> actix_web::Result<HttpResponse> {
    let ctx = page_context(None, "");
    render(&tera, "signup.html", &ctx)
}

#[derive(Serialize, Deserialize)]
struct SignupParams {
    name: String,
    email: String,
    password: String,
}

async fn signup_post(
    params: web::Form<SignupParams>,
    tera: Tera,
    service: Service,
) -> actix_web::Result<HttpResponse> {
    match service
        .signup(&params.name, &params.email, &params.password)
        .await
    {
        Ok(()) => Ok(redirect(&with_notice(guard::LOGIN_VIEW, Notice::SignedUp))),
        Err(err) => {
            debug!("signup rejected: {:?}", err);
            let mut ctx = page_context(None, "");
            ctx.insert("banner", &Banner::error(err.to_string()));
            ctx.insert("name", &params.name);
            ctx.insert("email", &params.email);
            render(&tera, "signup.html", &ctx)
        }
    }
}

async fn logout(id: AuthCookie, db: Db, cache: Cache) -> actix_web::Result<HttpResponse> {
    if let Some((key, slot)) = session_slot(&id, &db)? {
        slot.clear().map_err(|err| log_error(err, "Database error"))?;
        cache.invalidate(&key);
    }
    id.forget();
    Ok(redirect(&with_notice(guard::LOGIN_VIEW, Notice::LoggedOut)))
}

/// Cookie carrying the session key. It expires together with the stored session.
fn identity_policy(key: &[u8], secure: bool, ttl: chrono::Duration) -> CookieIdentityPolicy {
    CookieIdentityPolicy::new(key)
        .name("auth-cookie")
        .secure(secure)
        .max_age(time::Duration::seconds(ttl.num_seconds()))
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Periodically drops expired sessions and their cached catalogs.
async fn sweep_sessions(sessions: Db, cache: Cache) {
    let mut interval = actix_rt::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match sessions.sweep() {
            Ok(keys) => {
                for key in &keys {
                    cache.invalidate(key);
                }
                if !keys.is_empty() {
                    info!("swept {} expired sessions", keys.len());
                }
            }
            Err(err) => debug!("session sweep failed: {:?}", err),
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/login", web::post().to(login_post))
        .route("/signup", web::get().to(signup))
        .route("/signup", web::post().to(signup_post))
        .route("/logout", web::get().to(logout));
    dashboard::routes(cfg);
}

fn startup_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("cineflix=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env().map_err(startup_error)?;
    let tera = web::Data::new(tera::Tera::new(&config.templates).map_err(startup_error)?);
    let db = web::Data::new(Sessions::new(
        sled::open(&config.data_dir).map_err(startup_error)?,
        config.session_ttl,
    ));
    let service: Arc<dyn MovieService> = Arc::new(HttpMovieService::new(&config.api_url));
    let service = web::Data::from(service);
    let cache = web::Data::new(CatalogCache::default());
    info!(
        "serving on {} against catalog api {}",
        config.bind, config.api_url
    );

    actix_rt::spawn(sweep_sessions(db.clone(), cache.clone()));

    let cookie_key = config.cookie_key.clone();
    let secure = config.secure_cookie;
    let ttl = config.session_ttl;
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(identity_policy(&cookie_key, secure, ttl)))
            .app_data(tera.clone())
            .app_data(db.clone())
            .app_data(service.clone())
            .app_data(cache.clone())
            .configure(routes)
    })
    .bind(&config.bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{movie, StubService};
    use actix_web::{cookie::Cookie, http::StatusCode, test};

    fn tera() -> tera::Tera {
        tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*")).unwrap()
    }

    fn ttl() -> chrono::Duration {
        chrono::Duration::hours(2)
    }

    fn catalog() -> Arc<StubService> {
        Arc::new(
            StubService::default()
                .with_account("ada@example.com", "pw", "Ada", Role::Admin)
                .with_account("sam@example.com", "pw", "Sam", Role::User)
                .with_movies(vec![
                    movie("1", "Dune", "Sci-Fi"),
                    movie("2", "Her", "Drama"),
                ]),
        )
    }

    macro_rules! test_app {
        ($service:expr, $db:expr) => {
            test::init_service(
                App::new()
                    .wrap(IdentityService::new(identity_policy(&[0; 32], false, ttl())))
                    .app_data(web::Data::new(tera()))
                    .app_data(web::Data::new(Sessions::new($db.clone(), ttl())))
                    .app_data(web::Data::from($service.clone() as Arc<dyn MovieService>))
                    .app_data(web::Data::new(CatalogCache::default()))
                    .configure(routes),
            )
            .await
        };
    }

    macro_rules! sign_in {
        ($app:expr, $email:expr) => {{
            let req = test::TestRequest::post()
                .uri("/login")
                .set_form(&[("email", $email), ("password", "pw")])
                .to_request();
            let resp = test::call_service(&$app, req).await;
            assert_eq!(resp.status(), StatusCode::FOUND);
            let location = location(&resp);
            let cookie: Cookie<'static> = resp
                .response()
                .cookies()
                .find(|c| c.name() == "auth-cookie")
                .expect("identity cookie")
                .into_owned();
            (location, cookie)
        }};
    }

    macro_rules! page {
        ($app:expr, $req:expr) => {{
            let body = test::call_and_read_body(&$app, $req.to_request()).await;
            String::from_utf8(body.to_vec()).unwrap()
        }};
    }

    fn location<B>(resp: &actix_web::dev::ServiceResponse<B>) -> String {
        resp.headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned()
    }

    fn get(uri: &str, cookie: &Cookie<'static>) -> test::TestRequest {
        test::TestRequest::get().uri(uri).cookie(cookie.clone())
    }

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[actix_rt::test]
    async fn anonymous_visitors_are_sent_to_login() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        for uri in ["/admin", "/user"].iter() {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/");
        }
        let body = page!(app, test::TestRequest::get().uri("/"));
        assert!(body.contains("Sign In"));
    }

    #[actix_rt::test]
    async fn admin_sees_catalog_but_not_user_view() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (home, cookie) = sign_in!(app, "ada@example.com");
        assert_eq!(home, "/admin");

        let body = page!(app, get("/admin", &cookie));
        assert!(body.contains("Dune") && body.contains("Her"));

        let resp = test::call_service(&app, get("/user", &cookie).to_request()).await;
        assert_eq!(location(&resp), "/");
        let resp = test::call_service(&app, get("/", &cookie).to_request()).await;
        assert_eq!(location(&resp), "/admin");
    }

    #[actix_rt::test]
    async fn user_filters_and_pages() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (home, cookie) = sign_in!(app, "sam@example.com");
        assert_eq!(home, "/user");

        let resp = test::call_service(&app, get("/admin", &cookie).to_request()).await;
        assert_eq!(location(&resp), "/");

        let body = page!(app, get("/user?q=dune", &cookie));
        assert!(body.contains("<h3>Dune</h3>"));
        assert!(!body.contains("<h3>Her</h3>"));

        let body = page!(app, get("/user?genre=Drama", &cookie));
        assert!(body.contains("<h3>Her</h3>"));
        assert!(!body.contains("<h3>Dune</h3>"));

        let body = page!(app, get("/user?genre=Western", &cookie));
        assert!(body.contains("No movies found."));

        let body = page!(app, get("/user?page=5&per_page=5", &cookie));
        assert!(!body.contains("<h3>Dune</h3>"));
    }

    #[actix_rt::test]
    async fn wrong_password_shows_message() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("email", "ada@example.com"), ("password", "nope")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("Invalid credentials"));
    }

    #[actix_rt::test]
    async fn signup_then_conflict() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let form = [("name", "Kim"), ("email", "kim@example.com"), ("password", "pw")];

        let req = test::TestRequest::post().uri("/signup").set_form(&form).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/?notice=signed_up");

        let req = test::TestRequest::post().uri("/signup").set_form(&form).to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert!(String::from_utf8_lossy(&body).contains("User already exists"));

        let (home, _) = sign_in!(app, "kim@example.com");
        assert_eq!(home, "/user");
    }

    #[actix_rt::test]
    async fn admin_mutations_refetch_the_list() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "ada@example.com");
        test::call_service(&app, get("/admin", &cookie).to_request()).await;

        let req = test::TestRequest::post()
            .uri("/admin/movies")
            .cookie(cookie.clone())
            .set_form(&[
                ("title", "Heat"),
                ("director", "Mann"),
                ("release_year", "1995"),
                ("genre", "Crime"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/admin?notice=created");
        let body = page!(app, get("/admin?notice=created", &cookie));
        assert!(body.contains("Heat"));
        assert!(body.contains("Movie created!"), "notice banner missing");

        let req = test::TestRequest::post()
            .uri("/admin/movies/2")
            .cookie(cookie.clone())
            .set_form(&[
                ("title", "Her (2013)"),
                ("director", "Jonze"),
                ("release_year", "2013"),
                ("genre", "Drama"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/admin?notice=updated");
        assert_eq!(service.movies.lock()[1].title, "Her (2013)");

        let req = test::TestRequest::post()
            .uri("/admin/movies/1/delete")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/admin?notice=deleted");
        let body = page!(app, get("/admin", &cookie));
        assert!(!body.contains("Dune"));
    }

    #[actix_rt::test]
    async fn failed_update_surfaces_service_message() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "ada@example.com");
        let req = test::TestRequest::post()
            .uri("/admin/movies/missing")
            .cookie(cookie.clone())
            .set_form(&[
                ("title", "X"),
                ("director", "Y"),
                ("release_year", "2000"),
                ("genre", "Z"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/admin?error=Movie+not+found");
    }

    #[actix_rt::test]
    async fn favorites_keep_the_listing() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");

        let req = test::TestRequest::post()
            .uri("/user/favorites/1")
            .cookie(cookie.clone())
            .set_form(&[("back", "q=dune&page=2")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/user?q=dune&page=2&notice=favorite_added");

        let body = page!(app, get("/user", &cookie));
        assert!(body.contains("Liked"));

        let req = test::TestRequest::post()
            .uri("/user/favorites/1")
            .cookie(cookie.clone())
            .set_form(&[("back", "")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/user?notice=favorite_removed");
    }

    #[actix_rt::test]
    async fn logout_clears_the_stored_session() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");

        let resp = test::call_service(&app, get("/logout", &cookie).to_request()).await;
        assert_eq!(location(&resp), "/?notice=logout");

        // a replayed cookie no longer names a session
        let resp = test::call_service(&app, get("/user", &cookie).to_request()).await;
        assert_eq!(location(&resp), "/");
        assert!(db.open_tree("sessions").unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn corrupt_session_is_treated_as_signed_out() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");

        let sessions = db.open_tree("sessions").unwrap();
        let keys: Vec<sled::IVec> = sessions.iter().keys().map(|k| k.unwrap()).collect();
        assert_eq!(keys.len(), 1);
        for key in keys {
            sessions.insert(key, &[0xffu8][..]).unwrap();
        }
        let resp = test::call_service(&app, get("/user", &cookie).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");

        let body = page!(app, get("/", &cookie));
        assert!(body.contains("Sign In"));
    }

    #[actix_rt::test]
    async fn refresh_link_keeps_the_filters() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");

        let body = page!(app, get("/user?q=dune&genre=Sci-Fi&per_page=5", &cookie));
        assert!(body.contains("user?q=dune&amp;genre=Sci-Fi&amp;per_page=5&amp;refresh=1"));
    }

    #[actix_rt::test]
    async fn changed_catalog_goes_back_to_first_page() {
        let service = Arc::new(
            StubService::default()
                .with_account("sam@example.com", "pw", "Sam", Role::User)
                .with_movies(
                    (1..=6)
                        .map(|n| movie(&n.to_string(), &format!("Movie {}", n), "Drama"))
                        .collect(),
                ),
        );
        let db = temp_db();
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");

        let body = page!(app, get("/user?page=2&per_page=5", &cookie));
        assert!(body.contains(r#"<span class="current">2</span>"#));
        assert!(body.contains("<h3>Movie 6</h3>"));

        // same list again: the page stays
        let body = page!(app, get("/user?page=2&per_page=5&refresh=1", &cookie));
        assert!(body.contains(r#"<span class="current">2</span>"#));

        service.movies.lock().push(movie("7", "Movie 7", "Drama"));
        let body = page!(app, get("/user?page=2&per_page=5&refresh=1", &cookie));
        assert!(body.contains(r#"<span class="current">1</span>"#));
        assert!(!body.contains(r#"<span class="current">2</span>"#));
        assert!(body.contains("<h3>Movie 1</h3>"));
    }

    #[actix_rt::test]
    async fn admin_mutation_keeps_page_size() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "ada@example.com");

        let req = test::TestRequest::post()
            .uri("/admin/movies/2/delete?page=2&per_page=5")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/admin?per_page=5&notice=deleted");
    }

    #[actix_rt::test]
    async fn session_cookie_expires_with_the_session() {
        let (service, db) = (catalog(), temp_db());
        let app = test_app!(service, db);
        let (_, cookie) = sign_in!(app, "sam@example.com");
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(2)));
    }
}
