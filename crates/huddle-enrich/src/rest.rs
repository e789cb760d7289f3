//! REST-backed [`EntityDirectory`]: `GET {base}/{collection}/{id}` with
//! bearer auth.

use async_trait::async_trait;
use huddle_core::{Credential, EntityKind};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::directory::{EntityDirectory, Meeting, Project, Task, User};
use crate::error::LookupError;

#[derive(Debug, Clone)]
pub struct RestDirectory {
    client: reqwest::Client,
    base_url: Url,
    credential: Option<Credential>,
}

impl RestDirectory {
    pub fn new(base_url: &str) -> Result<Self, LookupError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, LookupError> {
        let base_url = Url::parse(base_url).map_err(|e| LookupError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client,
            base_url,
            credential: None,
        })
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/meetings/{id}` and friends. The id is percent-encoded as one
    /// path segment.
    pub fn entity_url(&self, kind: EntityKind, id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(collection(kind)).push(id);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<T, LookupError> {
        let url = self.entity_url(kind, id);
        let mut request = self.client.get(url.clone());
        if let Some(credential) = self.credential.as_ref().filter(|c| c.is_valid()) {
            request = request.bearer_auth(credential.token());
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupError::Http(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LookupError::Decode(e.to_string()))
    }
}

fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Meeting => "meetings",
        EntityKind::Project => "projects",
        EntityKind::Task => "tasks",
        EntityKind::User => "users",
    }
}

#[async_trait]
impl EntityDirectory for RestDirectory {
    async fn fetch_meeting(&self, id: &str) -> Result<Meeting, LookupError> {
        self.get(EntityKind::Meeting, id).await
    }

    async fn fetch_project(&self, id: &str) -> Result<Project, LookupError> {
        self.get(EntityKind::Project, id).await
    }

    async fn fetch_task(&self, id: &str) -> Result<Task, LookupError> {
        self.get(EntityKind::Task, id).await
    }

    async fn fetch_user(&self, id: &str) -> Result<User, LookupError> {
        self.get(EntityKind::User, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn entity_url_joins_collection_and_encodes_id() {
        let dir = RestDirectory::new("http://api.local/v1/").unwrap();
        assert_eq!(
            dir.entity_url(EntityKind::Meeting, "42").as_str(),
            "http://api.local/v1/meetings/42"
        );
        assert_eq!(
            dir.entity_url(EntityKind::User, "a/b").as_str(),
            "http://api.local/v1/users/a%2Fb"
        );

        let bare = RestDirectory::new("http://api.local").unwrap();
        assert_eq!(
            bare.entity_url(EntityKind::Project, "7").as_str(),
            "http://api.local/projects/7"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(RestDirectory::new("not a url"), Err(LookupError::InvalidUrl(_))));
        assert!(matches!(RestDirectory::new("mailto:ops@example.com"), Err(LookupError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn fetches_meeting_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meetings/42"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 42, "title": "Sprint Review"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = RestDirectory::new(&server.uri())
            .unwrap()
            .with_credential(Some(Credential::new("tok")));
        let meeting = dir.fetch_meeting("42").await.unwrap();
        assert_eq!(meeting.title, "Sprint Review");
    }

    #[tokio::test]
    async fn missing_entity_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = RestDirectory::new(&server.uri()).unwrap();
        let err = dir.fetch_user("9").await.unwrap_err();
        assert_eq!(
            err,
            LookupError::NotFound {
                kind: EntityKind::User,
                id: "9".into()
            }
        );
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/3"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = RestDirectory::new(&server.uri()).unwrap();
        match dir.fetch_project("3").await.unwrap_err() {
            LookupError::Status { status, url } => {
                assert_eq!(status, 503);
                assert!(url.ends_with("/projects/3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_without_display_field_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 5})))
            .mount(&server)
            .await;

        let dir = RestDirectory::new(&server.uri()).unwrap();
        assert!(matches!(dir.fetch_task("5").await, Err(LookupError::Decode(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = RestDirectory::new(&format!("http://127.0.0.1:{port}")).unwrap();
        assert!(matches!(dir.fetch_meeting("1").await, Err(LookupError::Http(_))));
    }
}
