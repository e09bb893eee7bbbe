use std::time::Duration;

use crate::error::BlobError;
use crate::sanitize::redact_url;

/// Body size accepted when no limit is configured.
pub const DEFAULT_MAX_FETCH_BYTES: usize = 10 * 1024 * 1024;

/// Downloads `http(s)` blobs with a bounded client timeout and body size.
#[derive(Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration) -> Result<Self, BlobError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlobError::Http {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            max_bytes: DEFAULT_MAX_FETCH_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Fetches `url`, refusing bodies over the size limit. The declared
    /// length is checked first; the body is read in chunks so an
    /// undeclared or understated length stops at the limit.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, BlobError> {
        let http_error = |reason: String| BlobError::Http {
            url: redact_url(url),
            reason,
        };
        let too_large = || BlobError::TooLarge {
            url: redact_url(url),
            limit: self.max_bytes,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_error(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(format!("HTTP {}", status.as_u16())));
        }

        let declared = response.content_length();
        if declared.is_some_and(|len| len > self.max_bytes as u64) {
            return Err(too_large());
        }

        let capacity = declared.map_or(0, |len| len as usize);
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| http_error(e.without_url().to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(http_error("empty response body".to_string()));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serves one canned HTTP response on a local port.
    fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let _ = stream.write_all(&response);
            }
        });
        format!("http://{}/blob.png", addr)
    }

    fn with_length(body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn chunked(body: &[u8]) -> Vec<u8> {
        let mut response =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_vec();
        for part in body.chunks(16) {
            response.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
            response.extend_from_slice(part);
            response.extend_from_slice(b"\r\n");
        }
        response.extend_from_slice(b"0\r\n\r\n");
        response
    }

    fn fetcher(max_bytes: usize) -> RemoteFetcher {
        RemoteFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(max_bytes)
    }

    #[tokio::test]
    async fn test_fetch_within_limit() {
        let url = serve_once(with_length(&[7u8; 32]));
        assert_eq!(fetcher(64).fetch(&url).await.unwrap(), vec![7u8; 32]);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected() {
        let url = serve_once(with_length(&[7u8; 128]));
        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { limit: 64, .. }), "{}", err);
    }

    #[tokio::test]
    async fn test_undeclared_body_stops_at_limit() {
        let url = serve_once(chunked(&[7u8; 128]));
        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { .. }), "{}", err);

        let url = serve_once(chunked(&[7u8; 48]));
        assert_eq!(fetcher(64).fetch(&url).await.unwrap().len(), 48);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec());
        let err = fetcher(64).fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }
}
