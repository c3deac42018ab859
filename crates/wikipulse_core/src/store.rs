use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};

use crate::config::PulseConfig;
use crate::error::PulseError;
use crate::stats::StatsDocument;

/// Persistence for the stats document.
///
/// `read` treats a missing document as empty. `write` replaces the whole
/// document; concurrent writers race and the last one wins.
pub trait StatsStore {
    fn read(&self, key: &str) -> Result<StatsDocument, PulseError>;
    fn write(&self, document: &StatsDocument, key: &str) -> Result<(), PulseError>;
    fn describe(&self, key: &str) -> String;
}

/// Pick the backend the `local` flag asks for.
pub fn open_store(local: bool, config: &PulseConfig) -> Result<Box<dyn StatsStore>, PulseError> {
    if local {
        return Ok(Box::new(LocalFileStore::new(config.data_dir())));
    }
    Ok(Box::new(RemoteObjectStore::from_config(config)?))
}

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of `key` under the data directory.
    ///
    /// Keys are relative paths that stay inside the root: absolute keys and
    /// `..` components are refused.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, String> {
        let relative = Path::new(key);
        let mut has_name = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("key {key:?} escapes the data directory"));
                }
            }
        }
        if !has_name {
            return Err(format!("key {key:?} does not name a file"));
        }
        Ok(self.root.join(relative))
    }
}

impl StatsStore for LocalFileStore {
    fn read(&self, key: &str) -> Result<StatsDocument, PulseError> {
        let path = self.path_for(key).map_err(|message| read_error(key, message))?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                log::info!("no stats document at {}, starting empty", path.display());
                return Ok(StatsDocument::new());
            }
            Err(error) => return Err(read_error(key, format!("{}: {error}", path.display()))),
        };
        serde_json::from_str(&content)
            .map_err(|error| read_error(key, format!("{}: {error}", path.display())))
    }

    fn write(&self, document: &StatsDocument, key: &str) -> Result<(), PulseError> {
        let path = self.path_for(key).map_err(|message| write_error(key, message))?;
        ensure_parent_dir(&path).map_err(|message| write_error(key, message))?;
        let rendered = render_document(document, key)?;
        fs::write(&path, rendered)
            .map_err(|error| write_error(key, format!("{}: {error}", path.display())))
    }

    fn describe(&self, key: &str) -> String {
        match self.path_for(key) {
            Ok(path) => normalize_path(&path),
            Err(_) => format!("{} (rejected key {key:?})", normalize_path(&self.root)),
        }
    }
}

/// Objects addressed as `endpoint/bucket/key`, read and written anonymously.
#[derive(Debug, Clone)]
pub struct RemoteObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    user_agent: String,
}

impl RemoteObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        user_agent: &str,
        timeout_ms: u64,
    ) -> Result<Self, PulseError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|error| {
                PulseError::Setup(format!("failed to build object store client: {error}"))
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            bucket: bucket.trim().trim_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        })
    }

    pub fn from_config(config: &PulseConfig) -> Result<Self, PulseError> {
        Self::new(
            &config.storage_endpoint(),
            &config.bucket(),
            &config.user_agent(),
            config.timeout_ms(),
        )
    }

    pub fn object_url(&self, key: &str) -> Result<Url, PulseError> {
        let raw = format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        );
        Url::parse(&raw)
            .map_err(|error| PulseError::Setup(format!("invalid object URL {raw}: {error}")))
    }
}

impl StatsStore for RemoteObjectStore {
    fn read(&self, key: &str) -> Result<StatsDocument, PulseError> {
        let url = self.object_url(key)?;
        log::debug!("reading stats object {url}");
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", self.user_agent.clone())
            .send()
            .map_err(|error| read_error(key, error.to_string()))?;
        let status = response.status();
        // Missing and forbidden objects both mean no prior data.
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            log::info!("no stats object at {url} (HTTP {}), starting empty", status.as_u16());
            return Ok(StatsDocument::new());
        }
        if !status.is_success() {
            return Err(read_error(key, format!("HTTP {} from {url}", status.as_u16())));
        }
        let body = response
            .text()
            .map_err(|error| read_error(key, format!("failed to read response body: {error}")))?;
        serde_json::from_str(&body).map_err(|error| read_error(key, format!("{url}: {error}")))
    }

    fn write(&self, document: &StatsDocument, key: &str) -> Result<(), PulseError> {
        let url = self.object_url(key)?;
        let rendered = render_document(document, key)?;
        log::debug!("writing {} bytes to stats object {url}", rendered.len());
        let response = self
            .client
            .put(url.clone())
            .header("User-Agent", self.user_agent.clone())
            .header("Content-Type", "application/json")
            .body(rendered)
            .send()
            .map_err(|error| write_error(key, error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(write_error(
                key,
                format!("HTTP {} from {url} (bucket {})", status.as_u16(), self.bucket),
            ));
        }
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        self.object_url(key)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("{}/{}/{key}", self.endpoint, self.bucket))
    }
}

fn render_document(document: &StatsDocument, key: &str) -> Result<String, PulseError> {
    serde_json::to_string_pretty(document)
        .map_err(|error| write_error(key, format!("failed to serialize document: {error}")))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent)
        .map_err(|error| format!("failed to create parent directory {}: {error}", parent.display()))
}

fn read_error(key: &str, message: String) -> PulseError {
    PulseError::StorageRead {
        key: key.to_string(),
        message,
    }
}

fn write_error(key: &str, message: String) -> PulseError {
    PulseError::StorageWrite {
        key: key.to_string(),
        message,
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{LocalFileStore, RemoteObjectStore, StatsStore};
    use crate::error::PulseError;
    use crate::stats::{ArticleStat, StatsDocument};

    const OBJECT_PATH: &str = "/parsed-wiki/parsed_wiki.json";

    fn sample_document() -> StatsDocument {
        let mut document = StatsDocument::new();
        document.upsert(
            "Ukraine",
            ArticleStat {
                latest_update_time: NaiveDate::from_ymd_opt(2022, 7, 21)
                    .and_then(|date| date.and_hms_opt(1, 3, 0)),
                number_update_time: 40,
            },
        );
        document.upsert(
            "Movies",
            ArticleStat {
                latest_update_time: None,
                number_update_time: 0,
            },
        );
        document
    }

    fn remote(endpoint: &str) -> RemoteObjectStore {
        RemoteObjectStore::new(endpoint, "parsed-wiki", "wikipulse-test", 5_000).expect("store")
    }

    async fn serve_object(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    async fn read_remote(server: &MockServer) -> Result<StatsDocument, PulseError> {
        let endpoint = server.uri();
        tokio::task::spawn_blocking(move || remote(&endpoint).read("parsed_wiki.json"))
            .await
            .expect("blocking read")
    }

    async fn write_remote(server: &MockServer, document: StatsDocument) -> Result<(), PulseError> {
        let endpoint = server.uri();
        tokio::task::spawn_blocking(move || remote(&endpoint).write(&document, "parsed_wiki.json"))
            .await
            .expect("blocking write")
    }

    #[test]
    fn local_read_of_missing_file_is_empty() {
        let temp = tempdir().expect("tempdir");
        let store = LocalFileStore::new(temp.path());
        let document = store.read("parsed_wiki.json").expect("read");
        assert!(document.is_empty());
    }

    #[test]
    fn local_write_then_read_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = LocalFileStore::new(temp.path());
        let document = sample_document();
        store.write(&document, "nested/stats.json").expect("write");
        assert!(temp.path().join("nested").join("stats.json").exists());

        let reread = store.read("nested/stats.json").expect("read");
        assert_eq!(reread, document);

        let file = temp.path().join("nested").join("stats.json");
        let first = fs::read_to_string(&file).expect("file");
        store.write(&reread, "nested/stats.json").expect("rewrite");
        let second = fs::read_to_string(&file).expect("file");
        assert_eq!(first, second);
    }

    #[test]
    fn local_write_overwrites_in_full() {
        let temp = tempdir().expect("tempdir");
        let store = LocalFileStore::new(temp.path());
        store.write(&sample_document(), "stats.json").expect("write");
        store.write(&StatsDocument::new(), "stats.json").expect("overwrite");
        assert!(store.read("stats.json").expect("read").is_empty());
    }

    #[test]
    fn local_read_rejects_malformed_document() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("stats.json"),
            r#"{"Ukraine": {"latest_update_time": "soon", "number_update_time": 4}}"#,
        )
        .expect("write fixture");
        let store = LocalFileStore::new(temp.path());
        let error = store.read("stats.json").expect_err("must fail");
        assert_eq!(error.code(), "storage_read_failed");
    }

    #[test]
    fn local_keys_stay_inside_the_data_directory() {
        let store = LocalFileStore::new("/srv/wikipulse-data");
        let inside = store.path_for("./nested/stats.json").expect("relative key");
        assert!(inside.starts_with("/srv/wikipulse-data"));

        for key in ["/tmp/escape.json", "../escape.json", "nested/../../escape.json", "", "."] {
            assert!(store.path_for(key).is_err(), "accepted {key:?}");
        }
    }

    #[test]
    fn local_store_refuses_escaping_keys() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("data");
        let store = LocalFileStore::new(&root);
        let outside = temp.path().join("outside.json");
        fs::write(&outside, "{}").expect("write fixture");
        let absolute = outside.to_string_lossy().into_owned();

        let error = store.read(&absolute).expect_err("read must fail");
        assert_eq!(error.code(), "storage_read_failed");

        let error = store
            .write(&sample_document(), "../outside.json")
            .expect_err("write must fail");
        assert_eq!(error.code(), "storage_write_failed");
        assert_eq!(fs::read_to_string(&outside).expect("outside file"), "{}");
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn remote_missing_object_is_empty() {
        let server = serve_object(404, "<Error><Code>NoSuchKey</Code></Error>").await;
        assert!(read_remote(&server).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn remote_forbidden_object_is_empty() {
        let server = serve_object(403, "").await;
        assert!(read_remote(&server).await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn remote_read_parses_existing_object() {
        let server = serve_object(
            200,
            r#"{"Football": {"latest_update_time": "2022-07-17T13:29:00", "number_update_time": 6}}"#,
        )
        .await;
        let document = read_remote(&server).await.expect("read");
        assert_eq!(document.get("Football").map(|stat| stat.number_update_time), Some(6));
    }

    #[tokio::test]
    async fn remote_server_error_fails_the_read() {
        let server = serve_object(500, "").await;
        let error = read_remote(&server).await.expect_err("must fail");
        assert_eq!(error.code(), "storage_read_failed");
    }

    #[tokio::test]
    async fn remote_write_puts_the_whole_document() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let document = sample_document();
        write_remote(&server, document.clone()).await.expect("write");

        let requests = server.received_requests().await.expect("recorded requests");
        assert_eq!(requests.len(), 1);
        let sent: StatsDocument = serde_json::from_slice(&requests[0].body).expect("sent document");
        assert_eq!(sent, document);
    }

    #[tokio::test]
    async fn remote_write_failure_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string("<Error><Code>NoSuchBucket</Code></Error>"),
            )
            .mount(&server)
            .await;

        let error = write_remote(&server, sample_document()).await.expect_err("must fail");
        assert_eq!(error.code(), "storage_write_failed");
        assert!(error.to_string().contains("parsed-wiki"));
    }
}
