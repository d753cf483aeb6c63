// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests.
//!
//! Files are harvested, spooled and published to an in-process aggregator
//! that speaks just enough Lumberjack to decode frames and acknowledge them.
//! The aggregator is plain TCP; TLS is covered by the exporter unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use logship::bounded_channel::bounded;
use logship::exporters::lumberjack::codec::{self, COMPRESSED_FRAME, DataFrame, WINDOW_FRAME};
use logship::exporters::lumberjack::{Backoff, Connector, ExporterError, Publisher, PublisherConfig};
use logship::receivers::file::{
    FileGroup, HarvesterConfig, HarvesterContext, ProgressStore, Prospector, ProspectorConfig,
    Registrar, Registry, StartAt,
};
use logship::topology::spooler::{SpoolConfig, Spooler};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: &str) -> Result<TcpStream, ExporterError> {
        Ok(TcpStream::connect(addr).await?)
    }
}

/// Accepts connections, decodes every payload and acknowledges it.
async fn start_aggregator() -> (String, mpsc::UnboundedReceiver<DataFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut header = [0u8; 6];
                loop {
                    if conn.read_exact(&mut header).await.is_err() {
                        return;
                    }
                    assert_eq!(&header[0..2], WINDOW_FRAME);
                    let window = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);

                    conn.read_exact(&mut header).await.unwrap();
                    assert_eq!(&header[0..2], COMPRESSED_FRAME);
                    let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
                    let mut body = vec![0u8; len as usize];
                    conn.read_exact(&mut body).await.unwrap();

                    let frames = codec::decode_compressed(&body).unwrap();
                    assert_eq!(frames.len() as u32, window);
                    for frame in frames {
                        let _ = tx.send(frame);
                    }
                    conn.write_all(b"1A\0\0\0\0").await.unwrap();
                }
            });
        }
    });

    (addr, rx)
}

/// One file group shipping to one aggregator, with progress recorded in
/// `progress_file`.
fn start_pipeline(
    server: &str,
    pattern: &Path,
    progress_file: &Path,
    cancel: &CancellationToken,
) {
    let store = ProgressStore::new(progress_file);
    let progress = store.load().unwrap();

    let harvester_config = HarvesterConfig {
        start_at: StartAt::Beginning,
        idle_timeout: Duration::from_secs(60),
        open_retry_delay: Duration::from_millis(50),
        eof_poll_interval: Duration::from_millis(20),
        partial_line_delay: Duration::from_millis(20),
    };
    let ctx = HarvesterContext::new(Arc::new(Registry::new()), harvester_config, None);

    let (events_tx, events_rx) = bounded(16);
    let (pages_tx, pages_rx) = bounded(1);
    let (acked_tx, acked_rx) = bounded(1);

    let group = FileGroup {
        paths: vec![pattern.display().to_string()],
        fields: BTreeMap::from([("type".to_string(), "app".to_string())]),
        ..Default::default()
    };
    let prospector = Prospector::new(
        ctx,
        group,
        events_tx,
        ProspectorConfig {
            scan_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(3600),
        },
    )
    .unwrap();
    tokio::spawn(prospector.run(progress, cancel.clone()));

    let spooler = Spooler::new(
        events_rx,
        pages_tx,
        SpoolConfig {
            max_size: 1024,
            idle_timeout: Duration::from_millis(100),
        },
    );
    tokio::spawn(spooler.start(cancel.clone()));

    let publisher = Publisher::new(
        0,
        server,
        TcpConnector,
        PublisherConfig {
            timeout: Duration::from_secs(5),
            backoff: Backoff {
                base: Duration::from_millis(10),
                jitter: Duration::from_millis(10),
            },
            host: "test-host".to_string(),
        },
        pages_rx,
        acked_tx,
    );
    tokio::spawn(publisher.run(cancel.clone()));

    tokio::spawn(Registrar::new(acked_rx, store).run(cancel.clone()));
}

async fn next_frames(rx: &mut mpsc::UnboundedReceiver<DataFrame>, n: usize) -> Vec<DataFrame> {
    let mut frames = Vec::with_capacity(n);
    while frames.len() < n {
        let frame = timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for frames")
            .expect("aggregator stopped");
        frames.push(frame);
    }
    frames
}

fn value(frame: &DataFrame, key: &str) -> String {
    String::from_utf8_lossy(frame.get(key).unwrap_or_default()).into_owned()
}

async fn wait_for_progress(progress_file: &Path, source: &str, offset: u64) {
    let store = ProgressStore::new(progress_file);
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        if let Ok(progress) = store.load() {
            if progress.get(source).map(|s| s.offset) == Some(offset) {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "progress for {} never reached {}",
            source,
            offset
        );
        sleep(Duration::from_millis(20)).await;
    }
}

fn setup() -> (TempDir, PathBuf, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();
    let app_log = logs.join("app.log");
    let progress_file = dir.path().join("progress.json");
    (dir, logs.join("*.log"), app_log, progress_file)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lines_reach_aggregator_and_progress_is_recorded() {
    let (_dir, pattern, app_log, progress_file) = setup();
    std::fs::write(&app_log, "first line\nsecond\nthird\n").unwrap();

    let (server, mut frames_rx) = start_aggregator().await;
    let cancel = CancellationToken::new();
    start_pipeline(&server, &pattern, &progress_file, &cancel);

    let frames = next_frames(&mut frames_rx, 3).await;
    let source = app_log.display().to_string();

    let lines: Vec<_> = frames.iter().map(|f| value(f, "line")).collect();
    assert_eq!(lines, vec!["first line", "second", "third"]);
    let offsets: Vec<_> = frames.iter().map(|f| value(f, "offset")).collect();
    assert_eq!(offsets, vec!["0", "11", "18"]);
    for frame in &frames {
        assert_eq!(value(frame, "file"), source);
        assert_eq!(value(frame, "host"), "test-host");
        assert_eq!(value(frame, "type"), "app");
        assert_eq!(value(frame, "rotated"), "false");
    }
    assert_eq!(frames[1].sequence, frames[0].sequence.wrapping_add(1));

    wait_for_progress(&progress_file, &source, 24).await;
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_resumes_after_acknowledged_lines() {
    let (_dir, pattern, app_log, progress_file) = setup();
    std::fs::write(&app_log, "one\ntwo\n").unwrap();
    let source = app_log.display().to_string();

    let (server, mut frames_rx) = start_aggregator().await;
    let first_run = CancellationToken::new();
    start_pipeline(&server, &pattern, &progress_file, &first_run);

    next_frames(&mut frames_rx, 2).await;
    wait_for_progress(&progress_file, &source, 8).await;
    first_run.cancel();
    // the first run's harvester is detached; let it see its last lines
    // before more are written
    sleep(Duration::from_millis(100)).await;

    let (server, mut frames_rx) = start_aggregator().await;
    let second_run = CancellationToken::new();
    start_pipeline(&server, &pattern, &progress_file, &second_run);

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&app_log)
        .unwrap();
    std::io::Write::write_all(&mut file, b"three\n").unwrap();

    let frames = next_frames(&mut frames_rx, 1).await;
    assert_eq!(value(&frames[0], "line"), "three");
    assert_eq!(value(&frames[0], "offset"), "8");

    wait_for_progress(&progress_file, &source, 14).await;
    second_run.cancel();
}
