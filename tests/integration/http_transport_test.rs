// HttpTransport against a loopback HTTP/1.1 origin

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use reelcache::cache::CacheError;
use reelcache::clock::SystemClock;
use reelcache::config::DownloadConfig;
use reelcache::download::{HttpTransport, Transport};
use reelcache::pool::NullDecoderFactory;
use reelcache::CacheManager;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use super::support::test_config;

const VIDEO_BODY: &[u8] = b"\x00\x00\x00\x18ftypmp42 fake video payload";

/// Minimal origin: `/video.mp4` returns VIDEO_BODY, anything else 404
struct TestOrigin {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl TestOrigin {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);

                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).await.is_err() {
                        return;
                    }
                    loop {
                        let mut header = String::new();
                        match reader.read_line(&mut header).await {
                            Ok(0) => break,
                            Ok(_) if header == "\r\n" => break,
                            Ok(_) => {}
                            Err(_) => return,
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body): (&str, &[u8]) = if path == "/video.mp4" {
                        ("200 OK", VIDEO_BODY)
                    } else {
                        ("404 Not Found", b"missing")
                    };
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Type: video/mp4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = write.write_all(head.as_bytes()).await;
                    let _ = write.write_all(body).await;
                    let _ = write.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_open_streams_body_with_length() {
    let origin = TestOrigin::start().await;
    let transport = HttpTransport::new(&DownloadConfig::default()).unwrap();

    let response = assert_ok!(transport.open(&origin.url("/video.mp4")).await);
    assert_eq!(response.content_length, Some(VIDEO_BODY.len() as u64));

    let chunks: Vec<_> = response.body.collect().await;
    let body: Vec<u8> = chunks
        .into_iter()
        .flat_map(|chunk| chunk.unwrap().to_vec())
        .collect();
    assert_eq!(body, VIDEO_BODY);
}

#[tokio::test]
async fn test_non_success_status_is_transfer_failure() {
    let origin = TestOrigin::start().await;
    let transport = HttpTransport::new(&DownloadConfig::default()).unwrap();

    let err = assert_err!(transport.open(&origin.url("/gone.mp4")).await);

    match err {
        CacheError::TransferFailed { url, reason } => {
            assert!(url.ends_with("/gone.mp4"));
            assert!(reason.contains("404"), "reason was {}", reason);
        }
        other => panic!("expected TransferFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_origin_is_transfer_failure() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let transport = HttpTransport::new(&DownloadConfig::default()).unwrap();

    let err = assert_err!(transport.open(&format!("http://{}/video.mp4", addr)).await);
    assert!(matches!(err, CacheError::TransferFailed { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manager_downloads_over_http_once() {
    let origin = TestOrigin::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), 1024 * 1024);
    let transport = Arc::new(HttpTransport::new(&config.download).unwrap());
    let manager = CacheManager::init_with_clock(
        config,
        transport,
        Arc::new(NullDecoderFactory),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();

    let url = origin.url("/video.mp4");
    let fetches = (0..5).map(|_| manager.fetch(&url));
    let paths = futures::future::join_all(fetches).await;

    for path in &paths {
        let path = path.as_ref().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), VIDEO_BODY);
    }
    assert_eq!(origin.requests(), 1);

    assert_ok!(manager.fetch(&url).await);
    assert_eq!(origin.requests(), 1, "served from the cache");
    assert_ok!(manager.shutdown().await);
}
