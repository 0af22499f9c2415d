//! Repository transports.

use super::pack::{parse_object_id, ObjectId, ObjectStore, PackError};
use super::pkt_line::{write_data, write_delim, write_flush, Packet, PktReader};
use super::{Credential, SourceError, SourceTree};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";
const UPLOAD_PACK_REQUEST: &str = "application/x-git-upload-pack-request";
const PROTOCOL_HEADER: &str = "Git-Protocol";
const PROTOCOL_V2: &str = "version=2";

/// Sideband channels of a packfile section
const BAND_DATA: u8 = 1;
const BAND_PROGRESS: u8 = 2;
const BAND_ERROR: u8 = 3;

/// Fetches the content of a repository
#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Fetch the default branch of `repository`
    async fn fetch(
        &self,
        repository: &str,
        credential: Option<&Credential>,
    ) -> Result<SourceTree, SourceError>;
}

/// Shallow fetches over git's smart HTTP protocol (version 2)
///
/// The default branch is resolved with `ls-refs`, its tip fetched with
/// `deepen 1` and the returned pack decoded in memory. Nothing touches the
/// filesystem; credentials travel only in the `Authorization` header.
#[derive(Debug, Clone)]
pub struct HttpGitTransport {
    client: reqwest::Client,
}

impl HttpGitTransport {
    /// # Errors
    ///
    /// Returns [`SourceError::Unreachable`] if the HTTP client cannot be
    /// built.
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("git/2.0 heimdall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn unreachable(repository: &str, what: impl std::fmt::Display) -> SourceError {
    SourceError::Unreachable(format!("{repository}: {what}"))
}

fn invalid_response(repository: &str, err: PackError) -> SourceError {
    unreachable(repository, format_args!("invalid git response: {err}"))
}

/// Base URL of the repository; only http(s) is supported
fn repository_url(repository: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(repository.trim())
        .map_err(|e| unreachable(repository, format_args!("invalid repository URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unreachable(
            repository,
            format_args!("unsupported scheme '{}', use https", url.scheme()),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, path: &str, repository: &str) -> Result<Url, SourceError> {
    base.join(path)
        .map_err(|e| unreachable(repository, format_args!("invalid repository URL: {e}")))
}

/// Default branch tip from an `ls-refs` response
fn parse_head(body: &[u8]) -> Result<Option<ObjectId>, PackError> {
    for packet in PktReader::new(body) {
        let Some(line) = packet?.line() else {
            continue;
        };
        let mut fields = line.split(|&b| b == b' ');
        let (Some(id), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        if name == b"HEAD" {
            return Ok(parse_object_id(id));
        }
    }
    Ok(None)
}

/// Whether a capability advertisement announces protocol version 2
fn is_v2_advertisement(body: &[u8]) -> Result<bool, PackError> {
    for packet in PktReader::new(body) {
        match packet?.line() {
            Some(line) if line.starts_with(b"# service=") => {}
            Some(line) => return Ok(line == b"version 2"),
            None => {}
        }
    }
    Ok(false)
}

fn remote_error(message: &[u8]) -> PackError {
    PackError::Remote(String::from_utf8_lossy(message).trim().to_owned())
}

/// Pack bytes from the `packfile` section of a `fetch` response
fn extract_pack(body: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut pack = Vec::new();
    let mut in_packfile = false;
    for packet in PktReader::new(body) {
        match packet? {
            Packet::Data(data) if !in_packfile => {
                if data.strip_suffix(b"\n").unwrap_or(data) == b"packfile" {
                    in_packfile = true;
                } else if let Some(message) = data.strip_prefix(b"ERR ") {
                    return Err(remote_error(message));
                }
            }
            Packet::Data(data) => match data.split_first() {
                Some((&BAND_DATA, chunk)) => pack.extend_from_slice(chunk),
                Some((&BAND_PROGRESS, _)) => {}
                Some((&BAND_ERROR, message)) => return Err(remote_error(message)),
                Some((&band, _)) => return Err(PackError::UnknownBand(band)),
                None => {}
            },
            Packet::Flush | Packet::ResponseEnd if in_packfile => break,
            _ => {}
        }
    }
    if !in_packfile {
        return Err(PackError::NoPackfile);
    }
    Ok(pack)
}

/// Protocol v2 header plus `Authorization` when a credential is given
fn with_headers(
    builder: reqwest::RequestBuilder,
    credential: Option<&Credential>,
) -> reqwest::RequestBuilder {
    let builder = builder.header(PROTOCOL_HEADER, PROTOCOL_V2);
    match credential {
        Some(credential) => {
            builder.header(AUTHORIZATION, credential.basic_authorization().as_str())
        }
        None => builder,
    }
}

async fn send(
    builder: reqwest::RequestBuilder,
    repository: &str,
    what: &str,
) -> Result<Vec<u8>, SourceError> {
    let response = builder
        .send()
        .await
        .map_err(|e| unreachable(repository, format_args!("{what} failed: {e}")))?;
    match response.status() {
        status if status.is_success() => {}
        status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            return Err(unreachable(
                repository,
                format_args!("{what} rejected ({status}), check repository credentials"),
            ));
        }
        status => {
            return Err(unreachable(repository, format_args!("{what} failed ({status})")));
        }
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| unreachable(repository, format_args!("{what} body: {e}")))?;
    Ok(body.to_vec())
}

impl HttpGitTransport {
    async fn upload_pack(
        &self,
        base: &Url,
        body: Vec<u8>,
        credential: Option<&Credential>,
        repository: &str,
        what: &str,
    ) -> Result<Vec<u8>, SourceError> {
        let url = endpoint(base, UPLOAD_PACK_SERVICE, repository)?;
        let builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, UPLOAD_PACK_REQUEST)
            .body(body);
        send(with_headers(builder, credential), repository, what).await
    }
}

#[async_trait]
impl SourceTransport for HttpGitTransport {
    async fn fetch(
        &self,
        repository: &str,
        credential: Option<&Credential>,
    ) -> Result<SourceTree, SourceError> {
        let base = repository_url(repository)?;

        let mut refs_url = endpoint(&base, "info/refs", repository)?;
        refs_url.set_query(Some("service=git-upload-pack"));
        let advertisement = send(
            with_headers(self.client.get(refs_url), credential),
            repository,
            "capability advertisement",
        )
        .await?;
        if !is_v2_advertisement(&advertisement).map_err(|e| invalid_response(repository, e))? {
            return Err(unreachable(repository, "server does not support git protocol v2"));
        }

        let mut ls_refs = Vec::new();
        write_data(&mut ls_refs, "command=ls-refs\n");
        write_delim(&mut ls_refs);
        write_data(&mut ls_refs, "symrefs\n");
        write_data(&mut ls_refs, "ref-prefix HEAD\n");
        write_flush(&mut ls_refs);
        let refs = self
            .upload_pack(&base, ls_refs, credential, repository, "ls-refs")
            .await?;
        let head = parse_head(&refs)
            .map_err(|e| invalid_response(repository, e))?
            .ok_or_else(|| unreachable(repository, "repository has no default branch"))?;
        debug!(repository, head = %hex::encode(head), "Resolved default branch");

        let mut fetch = Vec::new();
        write_data(&mut fetch, "command=fetch\n");
        write_delim(&mut fetch);
        write_data(&mut fetch, "no-progress\n");
        write_data(&mut fetch, "ofs-delta\n");
        write_data(&mut fetch, "deepen 1\n");
        write_data(&mut fetch, &format!("want {}\n", hex::encode(head)));
        write_data(&mut fetch, "done\n");
        write_flush(&mut fetch);
        let response = self
            .upload_pack(&base, fetch, credential, repository, "fetch")
            .await?;

        let pack = extract_pack(&response).map_err(|e| invalid_response(repository, e))?;
        let tree = tokio::task::spawn_blocking(move || {
            ObjectStore::from_pack(&pack).and_then(|store| store.checkout(&head))
        })
        .await
        .map_err(|e| unreachable(repository, format_args!("pack decode task failed: {e}")))?
        .map_err(|e| invalid_response(repository, e))?;

        debug!(repository, files = tree.len(), "Fetched configuration repository");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(lines: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            if line.is_empty() {
                write_flush(&mut out);
            } else {
                out.extend_from_slice(format!("{:04x}", line.len() + 4).as_bytes());
                out.extend_from_slice(line);
            }
        }
        out
    }

    #[test]
    fn test_repository_url_requires_http() {
        assert!(repository_url("git@github.com:org/repo.git").is_err());
        assert!(repository_url("ssh://git@host/repo.git").is_err());
        let url = repository_url("https://git.example.com/org/config.git").unwrap();
        assert_eq!(
            endpoint(&url, "info/refs", "r").unwrap().as_str(),
            "https://git.example.com/org/config.git/info/refs"
        );
    }

    #[test]
    fn test_v2_advertisement_with_service_preamble() {
        let body = packets(&[
            b"# service=git-upload-pack\n",
            b"",
            b"version 2\n",
            b"ls-refs\n",
            b"",
        ]);
        assert!(is_v2_advertisement(&body).unwrap());

        let v0 = packets(&[
            b"# service=git-upload-pack\n",
            b"",
            b"0123456789012345678901234567890123456789 HEAD\0multi_ack\n",
            b"",
        ]);
        assert!(!is_v2_advertisement(&v0).unwrap());
    }

    #[test]
    fn test_parse_head() {
        let id = "0123456789abcdef0123456789abcdef01234567";
        let line = format!("{id} HEAD symref-target:refs/heads/main\n");
        let body = packets(&[line.as_bytes(), b""]);
        assert_eq!(parse_head(&body).unwrap().map(hex::encode).as_deref(), Some(id));
        assert_eq!(parse_head(&packets(&[b""])).unwrap(), None);
    }

    #[test]
    fn test_extract_pack_demultiplexes_sideband() {
        let body = packets(&[
            b"shallow-info\n",
            b"shallow 0123456789abcdef0123456789abcdef01234567\n",
            b"packfile\n",
            b"\x02Counting objects\n",
            b"\x01PACK",
            b"\x01rest",
            b"",
        ]);
        assert_eq!(extract_pack(&body).unwrap(), b"PACKrest".to_vec());
    }

    #[test]
    fn test_extract_pack_reports_remote_errors() {
        let body = packets(&[b"packfile\n", b"\x03upload-pack: not our ref\n", b""]);
        let err = extract_pack(&body).unwrap_err();
        assert!(err.to_string().contains("not our ref"));

        let err = extract_pack(&packets(&[b"ERR access denied\n"])).unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }

    mod smart_http {
        use super::*;
        use crate::source::pack::tests::sample_repository;
        use axum::body::Bytes;
        use axum::extract::State;
        use axum::http::{HeaderMap, StatusCode as HttpStatus};
        use axum::routing::{get, post};
        use axum::Router;
        use std::sync::Arc;

        const DOCUMENT: &[u8] = b"configVersion: v1\n";

        struct Remote {
            pack: Vec<u8>,
            head: ObjectId,
            authorization: Option<&'static str>,
        }

        impl Remote {
            fn authorized(&self, headers: &HeaderMap) -> bool {
                let sent = headers.get("authorization").and_then(|v| v.to_str().ok());
                self.authorization.is_none_or(|expected| sent == Some(expected))
            }
        }

        fn pkt(out: &mut Vec<u8>, payload: &[u8]) {
            out.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
            out.extend_from_slice(payload);
        }

        async fn info_refs(
            State(remote): State<Arc<Remote>>,
            headers: HeaderMap,
        ) -> (HttpStatus, Vec<u8>) {
            if !remote.authorized(&headers) {
                return (HttpStatus::UNAUTHORIZED, Vec::new());
            }
            let mut out = Vec::new();
            pkt(&mut out, b"version 2\n");
            pkt(&mut out, b"ls-refs\n");
            pkt(&mut out, b"fetch=shallow\n");
            write_flush(&mut out);
            (HttpStatus::OK, out)
        }

        async fn upload_pack(
            State(remote): State<Arc<Remote>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> (HttpStatus, Vec<u8>) {
            if !remote.authorized(&headers) {
                return (HttpStatus::UNAUTHORIZED, Vec::new());
            }
            let mut out = Vec::new();
            if body.windows(15).any(|w| w == b"command=ls-refs") {
                let line = format!(
                    "{} HEAD symref-target:refs/heads/main\n",
                    hex::encode(remote.head)
                );
                pkt(&mut out, line.as_bytes());
                write_flush(&mut out);
            } else {
                pkt(&mut out, b"packfile\n");
                for chunk in remote.pack.chunks(1000) {
                    let mut band = vec![BAND_DATA];
                    band.extend_from_slice(chunk);
                    pkt(&mut out, &band);
                }
                write_flush(&mut out);
            }
            (HttpStatus::OK, out)
        }

        async fn serve(authorization: Option<&'static str>) -> String {
            let (pack, head) = sample_repository(DOCUMENT);
            let remote = Arc::new(Remote {
                pack,
                head,
                authorization,
            });
            let router = Router::new()
                .route("/org/config.git/info/refs", get(info_refs))
                .route("/org/config.git/git-upload-pack", post(upload_pack))
                .with_state(remote);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, router).await });
            format!("http://{address}/org/config.git")
        }

        #[tokio::test]
        async fn test_fetches_default_branch_in_memory() {
            let repository = serve(None).await;
            let transport = HttpGitTransport::new(Duration::from_secs(5)).unwrap();

            let tree = transport.fetch(&repository, None).await.unwrap();
            assert_eq!(tree.len(), 2);
            assert_eq!(tree.open("deploy/app.yaml"), Some(DOCUMENT));
        }

        #[tokio::test]
        async fn test_sends_basic_credentials() {
            let repository = serve(Some("Basic dXNlcjpwYXNz")).await;
            let transport = HttpGitTransport::new(Duration::from_secs(5)).unwrap();

            let err = transport.fetch(&repository, None).await.unwrap_err();
            assert!(err.to_string().contains("check repository credentials"));

            let credential = Credential::new("user", "pass");
            let tree = transport.fetch(&repository, Some(&credential)).await.unwrap();
            assert!(tree.open("deploy/app.yaml").is_some());
        }
    }
}
