use crate::model::*;
use crate::session::Session;
use async_trait::async_trait;
use log::debug;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Network error: {0}")]
    Transport(String),
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

/// The remote catalog and account API.
#[async_trait]
pub trait MovieService: Send + Sync {
    async fn list(&self, credential: &Credential) -> Result<Vec<MovieRecord>, ServiceError>;
    async fn create(
        &self,
        credential: &Credential,
        fields: &MovieFields,
    ) -> Result<MovieRecord, ServiceError>;
    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        fields: &MovieFields,
    ) -> Result<MovieRecord, ServiceError>;
    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), ServiceError>;
    async fn login(&self, email: &str, password: &str) -> Result<Session, ServiceError>;
    async fn signup(&self, name: &str, email: &str, password: &str) -> Result<(), ServiceError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SavedMovie {
    Wrapped { movie: MovieRecord },
    Bare(MovieRecord),
}

impl SavedMovie {
    fn into_record(self) -> MovieRecord {
        match self {
            SavedMovie::Wrapped { movie } | SavedMovie::Bare(movie) => movie,
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    user: Identity,
    token: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Maps a failed response to the error the caller shows, preferring the
/// server's own `message`.
pub fn classify(status: StatusCode, body: &str, fallback: Option<&str>) -> ServiceError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| match fallback {
            Some(fallback) => fallback.to_owned(),
            None => format!("Request failed ({})", status.as_u16()),
        });
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized(message),
        StatusCode::CONFLICT => ServiceError::Conflict(message),
        _ => ServiceError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

pub struct HttpMovieService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMovieService {
    pub fn new(base_url: &str) -> Self {
        HttpMovieService {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        fallback: Option<&str>,
    ) -> Result<Response, ServiceError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("catalog api answered {}: {}", status, body);
        Err(classify(status, &body, fallback))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        fallback: Option<&str>,
    ) -> Result<T, ServiceError> {
        Ok(self.send(request, fallback).await?.json().await?)
    }
}

#[async_trait]
impl MovieService for HttpMovieService {
    async fn list(&self, credential: &Credential) -> Result<Vec<MovieRecord>, ServiceError> {
        let request = self
            .client
            .get(self.url("/movies"))
            .bearer_auth(credential.as_str());
        self.send_json(request, None).await
    }

    async fn create(
        &self,
        credential: &Credential,
        fields: &MovieFields,
    ) -> Result<MovieRecord, ServiceError> {
        let request = self
            .client
            .post(self.url("/movies"))
            .bearer_auth(credential.as_str())
            .json(fields);
        let saved: SavedMovie = self.send_json(request, None).await?;
        Ok(saved.into_record())
    }

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        fields: &MovieFields,
    ) -> Result<MovieRecord, ServiceError> {
        let request = self
            .client
            .put(self.url(&format!("/movies/{}", id)))
            .bearer_auth(credential.as_str())
            .json(fields);
        let saved: SavedMovie = self.send_json(request, None).await?;
        Ok(saved.into_record())
    }

    async fn delete(&self, credential: &Credential, id: &str) -> Result<(), ServiceError> {
        let request = self
            .client
            .delete(self.url(&format!("/movies/{}", id)))
            .bearer_auth(credential.as_str());
        self.send(request, None).await?;
        Ok(())
    }

    async fn login(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        let request = self
            .client
            .post(self.url("/api/login"))
            .json(&LoginRequest { email, password });
        let response: LoginResponse = self.send_json(request, Some("Login failed")).await?;
        Ok(Session {
            identity: response.user,
            credential: Credential::new(response.token),
        })
    }

    async fn signup(&self, name: &str, email: &str, password: &str) -> Result<(), ServiceError> {
        let request = self
            .client
            .post(self.url("/api/signup"))
            .json(&SignupRequest {
                name,
                email,
                password,
            });
        self.send(request, Some("Signup failed")).await?;
        Ok(())
    }
}
