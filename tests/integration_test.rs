use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use prefork_server::client::send_greeting;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

const SERVER: &str = env!("CARGO_BIN_EXE_prefork-server");
const CLIENT: &str = env!("CARGO_BIN_EXE_prefork-client");

/// Generous bound for anything involving process startup or a drain.
const PATIENCE: Duration = Duration::from_secs(20);

// --- Helpers ---

/// A server process whose log lines (from the supervisor and every worker) are captured.
struct ServerProcess {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    seen: Vec<String>,
}

impl ServerProcess {
    fn spawn(args: &[&str]) -> Self {
        let mut child = Command::new(SERVER)
            .args(args)
            .env("RUST_LOG", "info")
            .env_remove("PREFORK_WORKERS")
            .env_remove("PREFORK_BACKLOG")
            .env_remove("PREFORK_BIND")
            .env_remove("PREFORK_DRAIN_TIMEOUT")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let (tx, lines) = mpsc::unbounded_channel();
        forward_lines(child.stdout.take().unwrap(), tx.clone());
        forward_lines(child.stderr.take().unwrap(), tx);
        Self {
            child,
            lines,
            seen: Vec::new(),
        }
    }

    fn count(&self, needle: &str) -> usize {
        self.seen.iter().filter(|line| line.contains(needle)).count()
    }

    /// Waits until at least `count` log lines contain `needle`.
    async fn wait_for(&mut self, needle: &str, count: usize) {
        let waited = tokio::time::timeout(PATIENCE, async {
            while self.count(needle) < count {
                match self.lines.recv().await {
                    Some(line) => self.seen.push(line),
                    None => break,
                }
            }
        })
        .await;
        assert!(
            waited.is_ok() && self.count(needle) >= count,
            "expected {count} x {needle:?}, got log:\n{}",
            self.seen.join("\n")
        );
    }

    /// Reads the remaining output until every process holding the pipes is gone.
    async fn drain_output(&mut self) {
        let _ = tokio::time::timeout(PATIENCE, async {
            while let Some(line) = self.lines.recv().await {
                self.seen.push(line);
            }
        })
        .await;
    }

    fn signal(&self, signal: Signal) {
        let pid = self.child.id().expect("server already reaped");
        kill(Pid::from_raw(pid as i32), signal).unwrap();
    }

    async fn wait(&mut self) -> ExitStatus {
        tokio::time::timeout(PATIENCE, self.child.wait())
            .await
            .expect("server did not exit")
            .unwrap()
    }
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

// --- Server Tests ---

#[tokio::test]
async fn test_two_workers_serve_then_drain_on_sigint() {
    let port = free_port();
    let port_arg = port.to_string();
    let mut server = ServerProcess::spawn(&[
        "--workers",
        "2",
        "--backlog",
        "5",
        "--bind",
        "127.0.0.1",
        &port_arg,
    ]);
    server.wait_for("Worker started", 2).await;

    send_greeting("127.0.0.1", port, b"ping-one").await.unwrap();
    send_greeting("127.0.0.1", port, b"ping-two").await.unwrap();
    server.wait_for("ping-one", 1).await;
    server.wait_for("ping-two", 1).await;
    server.wait_for("Closed", 2).await;

    server.signal(Signal::SIGINT);
    let status = server.wait().await;
    assert!(status.success(), "server exited with {status}");

    server.drain_output().await;
    assert_eq!(server.count("Worker reaped"), 2);
    assert_eq!(server.count("Worker stopped"), 2);
    assert_eq!(server.count("Connection failed"), 0);
    assert!(server.count("Listener closed") >= 1);
}

#[tokio::test]
async fn test_single_worker_serves_concurrent_clients() {
    let port = free_port();
    let port_arg = port.to_string();
    let mut server =
        ServerProcess::spawn(&["--workers", "1", "--bind", "127.0.0.1", &port_arg]);
    server.wait_for("Worker started", 1).await;

    let clients: Vec<_> = (0..5)
        .map(|i| {
            tokio::spawn(async move {
                let message = format!("client-{i}");
                send_greeting("127.0.0.1", port, message.as_bytes()).await
            })
        })
        .collect();
    for client in clients {
        client.await.unwrap().unwrap();
    }
    server.wait_for("Received", 5).await;

    server.signal(Signal::SIGTERM);
    assert!(server.wait().await.success());
    server.drain_output().await;
    assert_eq!(server.count("Worker reaped"), 1);
}

#[tokio::test]
async fn test_idle_client_does_not_hold_up_shutdown() {
    let port = free_port();
    let port_arg = port.to_string();
    let mut server = ServerProcess::spawn(&[
        "--workers",
        "1",
        "--drain-timeout",
        "3",
        "--bind",
        "127.0.0.1",
        &port_arg,
    ]);
    server.wait_for("Worker started", 1).await;

    // Connected, silent, and kept open past the shutdown.
    let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    server.wait_for("Accepted", 1).await;

    server.signal(Signal::SIGINT);
    assert!(server.wait().await.success());

    server.drain_output().await;
    assert_eq!(server.count("Worker stopped"), 1);
    assert_eq!(server.count("Drain timeout exceeded"), 0);
    assert!(server
        .seen
        .iter()
        .any(|line| line.contains("Worker reaped") && line.contains("exit status: 0")));
}

#[tokio::test]
async fn test_bind_conflict_exits_with_failure_and_spawns_nothing() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port_arg = occupied.local_addr().unwrap().port().to_string();

    let mut server = ServerProcess::spawn(&["--workers", "2", "--bind", "127.0.0.1", &port_arg]);
    let status = server.wait().await;
    assert!(!status.success());

    server.drain_output().await;
    assert_eq!(server.count("Worker spawned"), 0);
    assert!(server.count("Failed to bind") >= 1, "log:\n{}", server.seen.join("\n"));
}

#[tokio::test]
async fn test_worker_entry_point_rejects_a_non_socket() {
    // stdin is /dev/null, not a listening socket.
    let mut worker = ServerProcess::spawn(&["worker", "--ordinal", "1", "--listen-fd", "0"]);
    assert!(!worker.wait().await.success());
}

// --- Client Tests ---

#[tokio::test]
async fn test_client_sends_default_greeting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client = Command::new(CLIENT)
        .args([port.to_string().as_str(), "--host", "127.0.0.1"])
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let (mut stream, _) = tokio::time::timeout(PATIENCE, listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"La peche ?");

    let status = tokio::time::timeout(PATIENCE, client.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_client_fails_when_nobody_listens() {
    let status = Command::new(CLIENT)
        .args([free_port().to_string().as_str(), "--host", "127.0.0.1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .unwrap();
    assert!(!status.success());
}
