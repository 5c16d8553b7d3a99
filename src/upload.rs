use async_trait::async_trait;
use uuid::Uuid;

/// Errors from externalizing a capture. Never fatal to the monitor loop;
/// a failed upload just leaves the presence image reference unchanged.
#[derive(Debug)]
pub enum UploadError {
    /// Transport-level failure (connect, TLS, body read).
    Http(reqwest::Error),
    /// Host answered with a non-success status.
    Status(reqwest::StatusCode),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Http(e) => write!(f, "upload request failed: {e}"),
            UploadError::Status(status) => {
                write!(f, "upload rejected with status {status}")
            }
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Http(e) => Some(e),
            UploadError::Status(_) => None,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Http(e)
    }
}

/// Externalizes an in-memory image and returns its public URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, png_bytes: Vec<u8>) -> Result<String, UploadError>;
}

/// Client for uguu-style temp-file hosts.
///
/// `POST {endpoint}/upload?output=text` with a single multipart `files[]`
/// part; the trimmed 2xx body is the retrieval URL. No retry here; the
/// loop simply uploads again next tick.
pub struct TempHostClient {
    client: reqwest::Client,
    endpoint: String,
}

impl TempHostClient {
    pub fn new(endpoint: &str, user_agent: &str) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Uploader for TempHostClient {
    async fn upload(&self, png_bytes: Vec<u8>) -> Result<String, UploadError> {
        // Filename is single-use; collisions don't matter, it just has to
        // look like a PNG to the host.
        let filename = format!("{}.png", Uuid::new_v4());
        let part = reqwest::multipart::Part::bytes(png_bytes)
            .file_name(filename)
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new().part("files[]", part);

        let response = self
            .client
            .post(format!("{}/upload", self.endpoint))
            .query(&[("output", "text")])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }

        Ok(response.text().await?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server: accepts a single connection, drains the
    /// request until the multipart terminator, answers with `status_line`
    /// and `body`, then closes. Returns the bound endpoint.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                // Multipart bodies end with "--<boundary>--\r\n".
                if request.ends_with(b"--\r\n") {
                    break;
                }
            }

            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_upload_returns_trimmed_url_on_success() {
        let endpoint =
            serve_once("HTTP/1.1 200 OK", "https://files.example/abc.png\n").await;
        let client = TempHostClient::new(&endpoint, "vigil-test").unwrap();

        let url = client.upload(vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(url, "https://files.example/abc.png");
    }

    #[tokio::test]
    async fn test_upload_non_2xx_is_typed_status_error() {
        let endpoint =
            serve_once("HTTP/1.1 500 Internal Server Error", "nope").await;
        let client = TempHostClient::new(&endpoint, "vigil-test").unwrap();

        let err = client.upload(vec![1, 2, 3]).await.unwrap_err();
        match err {
            UploadError::Status(status) => assert_eq!(status.as_u16(), 500),
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_refused_connection_is_http_error() {
        // Bind then immediately drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client =
            TempHostClient::new(&format!("http://127.0.0.1:{port}"), "vigil-test").unwrap();
        let err = client.upload(vec![0]).await.unwrap_err();
        assert!(matches!(err, UploadError::Http(_)));
    }

    #[test]
    fn test_endpoint_trailing_slash_is_normalized() {
        let client = TempHostClient::new("https://uguu.se/", "vigil").unwrap();
        assert_eq!(client.endpoint, "https://uguu.se");
    }
}
