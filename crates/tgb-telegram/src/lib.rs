//! Telegram adapter.
//!
//! `BotApiTransport` implements the `tgb-core` transport port over the Bot API
//! with plain HTTP calls, so every call gets its own timeout. `probe` uses
//! teloxide for the registry helpers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};

pub mod probe;

use tgb_core::{
    config::Config,
    domain::{BotToken, ChatId, FileHandle, MessageId, RemotePart},
    errors::Error,
    transport::{BackupTransport, DeleteOutcome, RemotePath},
    Result,
};

/// Bot API envelope: `{ ok, result?, description?, error_code?, parameters? }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    document: Option<SentDocument>,
}

#[derive(Debug, Deserialize)]
struct SentDocument {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BotApiTransport {
    http: reqwest::Client,
    api_base: String,
    file_base: String,
    api_timeout: Duration,
    upload_timeout: Duration,
    download_timeout: Duration,
}

impl BotApiTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.api_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: cfg.api_base_url.trim_end_matches('/').to_string(),
            file_base: cfg.file_base_url.trim_end_matches('/').to_string(),
            api_timeout: cfg.api_timeout,
            upload_timeout: cfg.upload_timeout,
            download_timeout: cfg.download_timeout,
        })
    }

    fn method_url(&self, token: &BotToken, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, token.expose())
    }

    fn file_url(&self, token: &BotToken, path: &RemotePath) -> String {
        format!(
            "{}/bot{}/{}",
            self.file_base,
            token.expose(),
            path.0.trim_start_matches('/')
        )
    }

    /// Send a prepared request and unwrap the Bot API envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        token: &BotToken,
        method: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| network_error(method, &e, token))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| network_error(method, &e, token))?;

        let env: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) if status.is_success() => {
                return Err(Error::rejected(format!("{method}: malformed response: {e}")))
            }
            Err(_) => {
                return Err(Error::rejected(format!(
                    "{method}: HTTP {status}: {}",
                    snippet(&body)
                )))
            }
        };

        let ApiResponse {
            ok,
            result,
            description,
            error_code,
            parameters,
        } = env;
        match result {
            Some(result) if ok && status.is_success() => Ok(result),
            _ => Err(rejection(method, status, description, error_code, parameters)),
        }
    }
}

#[async_trait]
impl BackupTransport for BotApiTransport {
    async fn upload_part(
        &self,
        credential: &BotToken,
        destination: &ChatId,
        bytes: Vec<u8>,
        display_name: &str,
        caption: &str,
    ) -> Result<RemotePart> {
        let len = bytes.len();
        let document = reqwest::multipart::Part::bytes(bytes)
            .file_name(display_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| Error::Config(format!("multipart: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", destination.0.clone())
            .text("caption", caption.to_string())
            .part("document", document);

        let req = self
            .http
            .post(self.method_url(credential, "sendDocument"))
            .timeout(self.upload_timeout)
            .multipart(form);
        let msg: SentMessage = self.call(credential, "sendDocument", req).await?;

        let document = msg.document.ok_or_else(|| {
            Error::rejected("sendDocument: response carries no document".to_string())
        })?;
        tracing::debug!(
            chat = %destination,
            file = display_name,
            bytes = len,
            message_id = msg.message_id,
            "part uploaded"
        );
        Ok(RemotePart {
            file_handle: FileHandle(document.file_id),
            message_handle: MessageId(msg.message_id),
        })
    }

    async fn resolve_handle(
        &self,
        credential: &BotToken,
        handle: &FileHandle,
    ) -> Result<RemotePath> {
        let req = self
            .http
            .get(self.method_url(credential, "getFile"))
            .timeout(self.api_timeout)
            .query(&[("file_id", handle.0.as_str())]);

        let file: TgFile = match self.call(credential, "getFile", req).await {
            Ok(f) => f,
            Err(Error::RemoteRejected { description, .. }) if is_unknown_file(&description) => {
                return Err(Error::NotFound(format!("file {}: {description}", handle.0)))
            }
            Err(e) => return Err(e),
        };

        file.file_path
            .filter(|p| !p.is_empty())
            .map(RemotePath)
            .ok_or_else(|| Error::NotFound(format!("file {} has no download path", handle.0)))
    }

    async fn fetch_bytes(&self, credential: &BotToken, path: &RemotePath) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(self.file_url(credential, path))
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| network_error("file download", &e, credential))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("remote file {}", path.0)));
        }
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(Error::rejected(format!(
                "file download: HTTP {status}: {}",
                snippet(&body)
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| network_error("file download", &e, credential))?;
        Ok(bytes.to_vec())
    }

    async fn delete_message(
        &self,
        credential: &BotToken,
        destination: &ChatId,
        message: MessageId,
    ) -> DeleteOutcome {
        let req = self
            .http
            .post(self.method_url(credential, "deleteMessage"))
            .timeout(self.api_timeout)
            .json(&serde_json::json!({
                "chat_id": destination.0,
                "message_id": message.0,
            }));

        match self.call::<bool>(credential, "deleteMessage", req).await {
            Ok(true) => DeleteOutcome::ok(),
            Ok(false) => DeleteOutcome::failed("deleteMessage returned false"),
            Err(e) => DeleteOutcome::failed(e.to_string()),
        }
    }

    async fn send_html(&self, credential: &BotToken, destination: &ChatId, html: &str) -> Result<()> {
        let req = self
            .http
            .post(self.method_url(credential, "sendMessage"))
            .timeout(self.api_timeout)
            .json(&serde_json::json!({
                "chat_id": destination.0,
                "text": html,
                "parse_mode": "HTML",
            }));

        let msg: SentMessage = self.call(credential, "sendMessage", req).await?;
        tracing::debug!(chat = %destination, message_id = msg.message_id, "notice sent");
        Ok(())
    }
}

fn rejection(
    method: &str,
    status: reqwest::StatusCode,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
) -> Error {
    let description = description.unwrap_or_else(|| match error_code {
        Some(code) => format!("error code {code}"),
        None => format!("HTTP {status}"),
    });
    Error::RemoteRejected {
        description: format!("{method}: {description}"),
        retry_after: parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs),
    }
}

fn network_error(what: &str, e: &reqwest::Error, token: &BotToken) -> Error {
    let kind = if e.is_timeout() { "timed out" } else { "request failed" };
    Error::Unreachable(redact(&format!("{what} {kind}: {e}"), token))
}

/// reqwest errors embed the request URL, which carries the token.
pub(crate) fn redact(msg: &str, token: &BotToken) -> String {
    let secret = token.expose();
    if secret.is_empty() {
        return msg.to_string();
    }
    msg.replace(secret, "***")
}

fn is_unknown_file(description: &str) -> bool {
    let d = description.to_ascii_lowercase();
    d.contains("file not found") || d.contains("invalid file_id") || d.contains("wrong file_id")
}

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(200).collect()
}

#[cfg(test)]
pub(crate) mod mock {
    //! Minimal HTTP server on a tokio listener that answers canned responses.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[derive(Debug)]
    pub struct Captured {
        pub head: String,
        pub body: Vec<u8>,
    }

    impl Captured {
        pub fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or_default()
        }

        pub fn body_text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    pub struct MockBotApi {
        listener: TcpListener,
        pub base_url: String,
    }

    impl MockBotApi {
        pub async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock server");
            let port = listener.local_addr().unwrap().port();
            let base_url = format!("http://127.0.0.1:{port}");
            Self { listener, base_url }
        }

        /// Answer one connection per response, in order, and hand back what
        /// was received.
        pub fn serve(self, responses: Vec<(u16, Vec<u8>)>) -> JoinHandle<Vec<Captured>> {
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for (status, body) in responses {
                    let (mut stream, _) = self.listener.accept().await.unwrap();
                    seen.push(read_request(&mut stream).await);
                    let head = format!(
                        "HTTP/1.1 {status} X\r\n\
                         Content-Type: application/json\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\
                         \r\n",
                        body.len()
                    );
                    stream.write_all(head.as_bytes()).await.unwrap();
                    stream.write_all(&body).await.unwrap();
                    stream.shutdown().await.unwrap();
                }
                seen
            })
        }

        /// Accept one connection and never answer.
        pub fn stall(self) -> JoinHandle<()> {
            tokio::spawn(async move {
                let (stream, _) = self.listener.accept().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                drop(stream);
            })
        }
    }

    pub fn json(status: u16, body: &str) -> (u16, Vec<u8>) {
        (status, body.as_bytes().to_vec())
    }

    async fn read_request(stream: &mut TcpStream) -> Captured {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let lower = head.to_ascii_lowercase();
        let mut body = buf[header_end..].to_vec();

        if let Some(len) = header_value(&lower, "content-length").and_then(|v| v.parse().ok()) {
            while body.len() < len {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed mid-body");
                body.extend_from_slice(&chunk[..n]);
            }
        } else if header_value(&lower, "transfer-encoding").is_some_and(|v| v.contains("chunked")) {
            while find(&body, b"0\r\n\r\n").is_none() {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed mid-body");
                body.extend_from_slice(&chunk[..n]);
            }
            body = dechunk(&body);
        }
        Captured { head, body }
    }

    fn header_value<'a>(lower_head: &'a str, name: &str) -> Option<&'a str> {
        lower_head.lines().find_map(|l| {
            let (k, v) = l.split_once(':')?;
            (k.trim() == name).then(|| v.trim())
        })
    }

    fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
        hay.windows(needle.len()).position(|w| w == needle)
    }

    fn dechunk(mut raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let Some(eol) = find(raw, b"\r\n") else { break };
            let size_str = String::from_utf8_lossy(&raw[..eol]);
            let size = usize::from_str_radix(size_str.split(';').next().unwrap_or("0").trim(), 16)
                .unwrap_or(0);
            if size == 0 {
                break;
            }
            let start = eol + 2;
            out.extend_from_slice(&raw[start..start + size]);
            raw = &raw[start + size + 2..];
        }
        out
    }
}
