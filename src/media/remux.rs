use super::{error::MediaError, fetcher::ByteStream};
use crate::config::{RemuxConfig, ToolsConfig};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use std::{io, net::Ipv4Addr, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    process::{Child, ChildStdout, Command},
    sync::mpsc,
    task::{AbortHandle, JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 8;
const STDERR_LIMIT: usize = 16 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const AUDIO_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxState {
    Idle,
    Piping,
    Completed,
    Failed,
}

#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Combine a video-only and an audio-only stream into one fragmented MP4.
    async fn remux(&self, video: ByteStream, audio: ByteStream) -> Result<ByteStream, MediaError>;
}

pub struct FfmpegRemuxer {
    binary: String,
    audio_codec: String,
    audio_bitrate: String,
}

impl FfmpegRemuxer {
    pub fn new(tools: &ToolsConfig, remux: &RemuxConfig) -> Self {
        Self {
            binary: tools.ffmpeg_path.clone(),
            audio_codec: remux.audio_codec.clone(),
            audio_bitrate: remux.audio_bitrate.clone(),
        }
    }

    /// Video arrives on stdin, audio over a loopback socket, output on stdout.
    fn args(&self, audio_port: u16) -> Vec<String> {
        let audio_input = format!("tcp://127.0.0.1:{audio_port}");
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-i",
            audio_input.as_str(),
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "copy",
            "-c:a",
            self.audio_codec.as_str(),
            "-b:a",
            self.audio_bitrate.as_str(),
            "-f",
            "mp4",
            "-movflags",
            "frag_keyframe+empty_moov+default_base_moof",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub async fn test_availability(binary: &str) -> bool {
        match Command::new(binary).arg("-version").output().await {
            Ok(output) if output.status.success() => {
                let version_line = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("unknown")
                    .to_string();
                info!("✅ ffmpeg is available: {}", version_line);
                true
            }
            Ok(_) => {
                warn!("❌ ffmpeg command failed");
                false
            }
            Err(e) => {
                warn!("❌ ffmpeg not found: {} (required for remuxing muted formats)", e);
                false
            }
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, video: ByteStream, audio: ByteStream) -> Result<ByteStream, MediaError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| MediaError::RemuxFailure(format!("failed to bind audio socket: {e}")))?;
        let audio_port = listener
            .local_addr()
            .map_err(|e| MediaError::RemuxFailure(e.to_string()))?
            .port();

        let mut child = Command::new(&self.binary)
            .args(self.args(audio_port))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::RemuxFailure(format!("failed to spawn ffmpeg: {e}")))?;

        info!("ffmpeg spawned, audio input on 127.0.0.1:{}", audio_port);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::RemuxFailure("ffmpeg stdin unavailable".to_string()))?;

        let video_feed = tokio::spawn(feed(video, stdin));
        let audio_feed = tokio::spawn(async move {
            let socket = accept_audio(listener, AUDIO_ACCEPT_TIMEOUT).await?;
            feed(audio, socket).await
        });

        RemuxSession::start(child, vec![("video", video_feed), ("audio", audio_feed)])
    }
}

/// Takes the first loopback peer as ffmpeg's audio input and closes the
/// listener. The port is not authenticated: another local process that
/// connects first would be fed the audio instead. The window is bounded by
/// `timeout`, which covers ffmpeg's startup.
async fn accept_audio(listener: TcpListener, timeout: Duration) -> io::Result<TcpStream> {
    let (socket, peer) = tokio::time::timeout(timeout, listener.accept())
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                "ffmpeg did not connect for audio input",
            )
        })??;
    debug!("ffmpeg connected for audio from {}", peer);
    Ok(socket)
}

/// Copies an upstream stream into one of the transcoder's inputs.
async fn feed<W>(mut input: ByteStream, mut sink: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = input.next().await {
        sink.write_all(&chunk?).await?;
    }
    sink.shutdown().await
}

type FeederResult = (&'static str, Result<io::Result<()>, JoinError>);

/// Kills the process and aborts every helper task however the session ends.
struct Teardown {
    child: Child,
    tasks: Vec<AbortHandle>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// One running transcoder process and the tasks feeding it.
struct RemuxSession {
    state: RemuxState,
    teardown: Teardown,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    feeders: FuturesUnordered<BoxFuture<'static, FeederResult>>,
}

impl RemuxSession {
    /// Starts supervising `child` and returns its stdout as a byte stream.
    fn start(
        mut child: Child,
        feeders: Vec<(&'static str, JoinHandle<io::Result<()>>)>,
    ) -> Result<ByteStream, MediaError> {
        let mut tasks: Vec<AbortHandle> = feeders.iter().map(|(_, h)| h.abort_handle()).collect();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(|stderr| {
            let handle = tokio::spawn(read_stderr(stderr));
            tasks.push(handle.abort_handle());
            handle
        });

        let teardown = Teardown { child, tasks };
        let stdout = stdout
            .ok_or_else(|| MediaError::RemuxFailure("ffmpeg stdout unavailable".to_string()))?;

        let feeders = feeders
            .into_iter()
            .map(|(name, handle)| async move { (name, handle.await) }.boxed())
            .collect();

        let session = Self {
            state: RemuxState::Idle,
            teardown,
            stdout,
            stderr,
            feeders,
        };

        let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        tokio::spawn(session.supervise(tx));

        Ok(Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx))))
    }

    fn transition(&mut self, next: RemuxState) {
        debug!("Remux state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn supervise(mut self, tx: mpsc::Sender<io::Result<Bytes>>) {
        self.transition(RemuxState::Piping);

        let mut total: u64 = 0;
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);

        let piped: Result<(), String> = loop {
            buf.reserve(CHUNK_SIZE);
            tokio::select! {
                biased;

                _ = tx.closed() => {
                    info!("Client disconnected after {} bytes, tearing down ffmpeg", total);
                    self.transition(RemuxState::Failed);
                    return;
                }

                Some((name, result)) = self.feeders.next(), if !self.feeders.is_empty() => {
                    match flatten(result) {
                        Ok(()) => debug!("{} input fully written to ffmpeg", name),
                        Err(e) => break Err(format!("{name} input failed: {e}")),
                    }
                }

                read = self.stdout.read_buf(&mut buf) => match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        total += n as u64;
                        if tx.send(Ok(buf.split().freeze())).await.is_err() {
                            info!("Client disconnected after {} bytes, tearing down ffmpeg", total);
                            self.transition(RemuxState::Failed);
                            return;
                        }
                    }
                    Err(e) => break Err(format!("failed to read ffmpeg output: {e}")),
                },
            }
        };

        let outcome = match piped {
            Ok(()) => self.finish().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.transition(RemuxState::Completed);
                info!("Remux completed, streamed {} bytes", total);
            }
            Err(e) => {
                self.transition(RemuxState::Failed);
                let _ = self.teardown.child.start_kill();
                let stderr = self.collect_stderr().await;
                error!("Remux failed after {} bytes: {} (ffmpeg: {})", total, e, stderr.trim());
                let _ = tx.send(Err(io::Error::other(e))).await;
            }
        }
    }

    /// Output reached EOF: the process must exit cleanly and both inputs
    /// must have been written in full.
    async fn finish(&mut self) -> Result<(), String> {
        let status = self
            .teardown
            .child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for ffmpeg: {e}"))?;

        if !status.success() {
            let stderr = self.collect_stderr().await;
            return Err(format!("ffmpeg exited with {}: {}", status, stderr.trim()));
        }

        let feeders = &mut self.feeders;
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async move {
            while let Some((name, result)) = feeders.next().await {
                flatten(result).map_err(|e| format!("{name} input failed: {e}"))?;
            }
            Ok::<(), String>(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => Err("inputs still open after ffmpeg exited".to_string()),
        }
    }

    async fn collect_stderr(&mut self) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(Duration::from_secs(1), handle).await {
            Ok(Ok(stderr)) => stderr,
            _ => String::new(),
        }
    }
}

/// Keeps the first `STDERR_LIMIT` bytes but drains the pipe to the end so the
/// process never blocks on a full stderr.
async fn read_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = STDERR_LIMIT.saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Failed to read ffmpeg stderr: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn flatten(result: Result<io::Result<()>, JoinError>) -> io::Result<()> {
    result.unwrap_or_else(|e| Err(io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::oneshot;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        Box::pin(stream::iter(items))
    }

    async fn drain(mut output: ByteStream) -> (Vec<u8>, Option<io::Error>) {
        let mut bytes = Vec::new();
        while let Some(item) = output.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => return (bytes, Some(e)),
            }
        }
        (bytes, None)
    }

    #[cfg(unix)]
    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_ffmpeg_args() {
        let remuxer = FfmpegRemuxer::new(&ToolsConfig::default(), &RemuxConfig::default());
        let args = remuxer.args(40123);
        let joined = args.join(" ");

        assert!(joined.contains("-i pipe:0 -i tcp://127.0.0.1:40123"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac -b:a 192k"));
        assert!(joined.contains("-movflags frag_keyframe+empty_moov"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[tokio::test]
    async fn test_accept_audio_times_out_without_peer() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let err = accept_audio(listener, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_accept_audio_takes_one_peer_then_closes() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (socket, client) = tokio::join!(
            accept_audio(listener, Duration::from_secs(5)),
            TcpStream::connect(addr)
        );
        let mut socket = socket.unwrap();
        let mut client = client.unwrap();

        socket.write_all(b"aac").await.unwrap();
        socket.shutdown().await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"aac");

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_streams_output() {
        let mut child = spawn_shell("cat");
        let stdin = child.stdin.take().unwrap();
        let feeder = tokio::spawn(feed(chunks(&[b"hello ", b"world"]), stdin));

        let output = RemuxSession::start(child, vec![("video", feeder)]).unwrap();
        let (bytes, err) = drain(output).await;

        assert!(err.is_none());
        assert_eq!(bytes, b"hello world");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_reports_process_failure() {
        let mut child = spawn_shell("cat >/dev/null; echo boom >&2; exit 3");
        let stdin = child.stdin.take().unwrap();
        let feeder = tokio::spawn(feed(chunks(&[b"data"]), stdin));

        let output = RemuxSession::start(child, vec![("video", feeder)]).unwrap();
        let (_, err) = drain(output).await;

        let err = err.expect("stream must end with an error");
        assert!(err.to_string().contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_reports_input_failure() {
        let mut child = spawn_shell("cat");
        let stdin = child.stdin.take().unwrap();
        let input: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("upstream reset")),
        ]));
        let feeder = tokio::spawn(feed(input, stdin));

        let output = RemuxSession::start(child, vec![("audio", feeder)]).unwrap();
        let (_, err) = drain(output).await;

        let err = err.expect("stream must end with an error");
        assert!(err.to_string().contains("audio input failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_output_releases_inputs() {
        let mut child = spawn_shell("cat");
        let stdin = child.stdin.take().unwrap();

        let (released_tx, released_rx) = oneshot::channel::<()>();
        let input: ByteStream = Box::pin(stream::pending::<io::Result<Bytes>>().map(move |item| {
            let _held = &released_tx;
            item
        }));
        let feeder = tokio::spawn(feed(input, stdin));

        let output = RemuxSession::start(child, vec![("video", feeder)]).unwrap();
        drop(output);

        let released = tokio::time::timeout(Duration::from_secs(5), released_rx).await;
        assert!(matches!(released, Ok(Err(_))));
    }

    #[tokio::test]
    #[ignore] // Requires ffmpeg to be installed
    async fn test_ffmpeg_remux() {
        async fn generate(args: &[&str]) -> Bytes {
            let output = Command::new("ffmpeg").args(args).output().await.unwrap();
            assert!(output.status.success());
            Bytes::from(output.stdout)
        }

        let video = generate(&[
            "-loglevel", "error", "-f", "lavfi", "-i", "testsrc=duration=1:size=160x120:rate=10",
            "-c:v", "mpeg4", "-f", "mp4", "-movflags", "frag_keyframe+empty_moov", "pipe:1",
        ])
        .await;
        let audio = generate(&[
            "-loglevel", "error", "-f", "lavfi", "-i", "sine=duration=1", "-c:a", "aac", "-f",
            "adts", "pipe:1",
        ])
        .await;

        let remuxer = FfmpegRemuxer::new(&ToolsConfig::default(), &RemuxConfig::default());
        let output = remuxer
            .remux(
                Box::pin(stream::iter(vec![Ok::<_, io::Error>(video)])),
                Box::pin(stream::iter(vec![Ok::<_, io::Error>(audio)])),
            )
            .await
            .unwrap();
        let (bytes, err) = drain(output).await;

        assert!(err.is_none());
        assert_eq!(&bytes[4..8], b"ftyp");
    }
}
