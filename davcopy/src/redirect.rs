//! Redirect following for methods reqwest will not redirect on its own.
//!
//! reqwest only replays GET/HEAD-style requests across 3xx responses.
//! WebDAV `COPY` has to be chased by hand, keeping method, headers and body
//! intact on every hop.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use http::header::{HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, Method};
use reqwest::{Body, Client, Response};
use url::Url;

use crate::error::{Error, Result};

/// Redirect responses tolerated before giving up
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

const CHUNK_SIZE: usize = 64 * 1024;

/// A body source that can be rewound between hops
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

struct Source {
    reader: Box<dyn ReadSeek>,
    // Bumped on every rewind; a stream left over from an earlier hop stops.
    generation: u64,
}

/// A seekable body, rewound to offset zero and streamed on every hop
pub struct SeekableBody {
    source: Arc<Mutex<Source>>,
}

impl SeekableBody {
    /// Seek back to the start, invalidating streams handed out earlier.
    async fn rewind(&self) -> Result<u64> {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let mut guard = lock(&source)?;
            guard.reader.seek(SeekFrom::Start(0))?;
            guard.generation += 1;
            Ok(guard.generation)
        })
        .await
        .map_err(|e| Error::BodyReplay(io::Error::other(e)))?
        .map_err(Error::BodyReplay)
    }

    /// Chunks read from the current position, ending early if the body is
    /// rewound again before the stream is drained.
    fn chunks(&self, generation: u64) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        stream::try_unfold(self.source.clone(), move |source| async move {
            let (source, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = read_chunk(&source, generation);
                (source, chunk)
            })
            .await
            .map_err(io::Error::other)?;
            Ok::<_, io::Error>(chunk?.map(|bytes| (bytes, source)))
        })
    }

    async fn stream(&self) -> Result<Body> {
        let generation = self.rewind().await?;
        if generation > 1 {
            tracing::debug!("Rewind request body");
        }
        Ok(Body::wrap_stream(self.chunks(generation)))
    }
}

fn lock(source: &Mutex<Source>) -> io::Result<MutexGuard<'_, Source>> {
    source
        .lock()
        .map_err(|_| io::Error::other("request body lock poisoned"))
}

fn read_chunk(source: &Mutex<Source>, generation: u64) -> io::Result<Option<Bytes>> {
    let mut guard = lock(source)?;
    if guard.generation != generation {
        return Ok(None);
    }

    let mut buf = vec![0; CHUNK_SIZE];
    let n = loop {
        match guard.reader.read(&mut buf) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    };
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(Bytes::from(buf)))
}

impl fmt::Debug for SeekableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeekableBody").finish_non_exhaustive()
    }
}

/// Request bodies that can be replayed across redirects.
///
/// There is no one-shot streaming variant: a body that cannot be rewound has
/// to be buffered into [`RequestBody::Buffered`] before it reaches the
/// executor. A [`RequestBody::Seekable`] body is sent from offset zero on
/// every hop, whatever its position when handed in. Seek failures are
/// [`Error::BodyReplay`]; read failures while streaming abort the request
/// and come back as [`Error::Transport`].
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Buffered(Bytes),
    Seekable(SeekableBody),
}

impl RequestBody {
    pub fn seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        RequestBody::Seekable(SeekableBody {
            source: Arc::new(Mutex::new(Source {
                reader: Box::new(reader),
                generation: 0,
            })),
        })
    }

    async fn payload(&self) -> Result<Option<Body>> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Buffered(bytes) => Ok(Some(Body::from(bytes.clone()))),
            RequestBody::Seekable(body) => body.stream().await.map(Some),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Buffered(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Buffered(bytes.into())
    }
}

/// A fully formed request the executor can send more than once
#[derive(Debug)]
pub struct ReplayableRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ReplayableRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }
}

struct RedirectState {
    remaining: usize,
    hops: usize,
}

/// Send `request`, following up to [`DEFAULT_MAX_REDIRECTS`] redirects.
pub async fn execute_with_redirects(client: &Client, request: ReplayableRequest) -> Result<Response> {
    execute_with_limit(client, request, DEFAULT_MAX_REDIRECTS).await
}

/// Send `request`, following redirects until a non-3xx response arrives.
///
/// The `max_redirects`-th redirect response fails with
/// [`Error::TooManyRedirects`] without being followed. The request, and with
/// it the body handle, is dropped on every exit path.
pub async fn execute_with_limit(
    client: &Client,
    mut request: ReplayableRequest,
    max_redirects: usize,
) -> Result<Response> {
    let mut state = RedirectState {
        remaining: max_redirects,
        hops: 0,
    };

    loop {
        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = request.body.payload().await? {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_redirection() {
            if state.hops > 0 {
                tracing::debug!("{} after {} redirect(s)", status, state.hops);
            }
            return Ok(response);
        }

        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            return Err(Error::TooManyRedirects(max_redirects));
        }

        let location = response.headers().get(LOCATION).ok_or_else(|| {
            Error::Redirect(format!(
                "{} from {} has no Location header",
                status, request.url
            ))
        })?;
        let location = location
            .to_str()
            .map_err(|e| Error::Redirect(format!("unreadable Location header: {}", e)))?;
        let next = request
            .url
            .join(location)
            .map_err(|e| Error::Redirect(format!("invalid Location {:?}: {}", location, e)))?;

        tracing::debug!("Following redirect: {}", next);
        request.url = next;
        state.hops += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::TryStreamExt;
    use std::io::Cursor;

    async fn drain(body: &SeekableBody, generation: u64) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.chunks(generation).try_collect().await.unwrap();
        chunks.concat()
    }

    fn seekable(data: &[u8]) -> SeekableBody {
        match RequestBody::seekable(Cursor::new(data.to_vec())) {
            RequestBody::Seekable(body) => body,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn buffered_body_is_reused() {
        let body = RequestBody::from(b"payload".to_vec());
        for _ in 0..2 {
            let sent = body.payload().await.unwrap().unwrap();
            assert_eq!(sent.as_bytes(), Some(&b"payload"[..]));
        }
    }

    #[tokio::test]
    async fn seekable_body_rewinds_on_replay() {
        let body = seekable(b"0123456789");
        let first = body.rewind().await.unwrap();
        assert_eq!(drain(&body, first).await, b"0123456789");
        // Without the rewind the cursor would be at EOF.
        let second = body.rewind().await.unwrap();
        assert_eq!(drain(&body, second).await, b"0123456789");
    }

    #[tokio::test]
    async fn large_body_streams_in_chunks() {
        let data: Vec<u8> = (0..3 * CHUNK_SIZE + 17).map(|i| i as u8).collect();
        let body = seekable(&data);
        let generation = body.rewind().await.unwrap();
        let chunks: Vec<Bytes> = body.chunks(generation).try_collect().await.unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn stale_stream_stops_after_rewind() {
        let body = seekable(b"0123456789");
        let stale = body.rewind().await.unwrap();
        body.rewind().await.unwrap();
        assert!(drain(&body, stale).await.is_empty());
    }

    #[tokio::test]
    async fn empty_body_sends_nothing() {
        let body = RequestBody::default();
        assert!(body.payload().await.unwrap().is_none());
    }
}
