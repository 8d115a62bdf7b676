//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real Keygate listeners in tests,
//! and `RespTestClient`, a minimal RESP client for talking to them.

use crate::crypto_fixtures::TestSigningKey;
use keygate::config::Config;
use keygate::gate::CommandAuthorizationGate;
use keygate::server::GatewayServer;
use keygate::store::MemoryStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Organization the harness configures by default.
pub const TEST_ORGANIZATION: &str = "acme";

/// Namespace the harness configures by default.
pub const TEST_NAMESPACE: &str = "vault";

/// Test harness for spawning a Keygate server in E2E tests.
///
/// The server uses an in-memory backend and binds to 127.0.0.1:0.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_auth_flow() -> anyhow::Result<()> {
///     let key = TestSigningKey::generate()?;
///     let server = TestGatewayServer::spawn(&key).await?;
///     let mut client = server.client().await?;
///
///     assert_eq!(client.command(&["PING"]).await?, TestReply::simple("PONG"));
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    gate: Arc<CommandAuthorizationGate>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TestGatewayServer {
    /// Spawn with default settings: org `acme`, namespace `vault`, `SET` gated.
    pub async fn spawn(key: &TestSigningKey) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(key, &[]).await
    }

    /// Spawn with extra `KEYGATE_*` variables layered over the defaults.
    pub async fn spawn_with_vars(
        key: &TestSigningKey,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("KEYGATE_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "KEYGATE_JWT_ORGANIZATION".to_string(),
                TEST_ORGANIZATION.to_string(),
            ),
            (
                "KEYGATE_JWT_NAMESPACE".to_string(),
                TEST_NAMESPACE.to_string(),
            ),
            ("KEYGATE_JWT_PUBLIC_KEY".to_string(), key.public_key_pem()),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let gate = Arc::new(
            CommandAuthorizationGate::from_config(&config, Arc::new(MemoryStore::new()))
                .map_err(|e| anyhow::anyhow!("Failed to build gate: {}", e))?,
        );

        let server = GatewayServer::bind(&config.bind_address, Arc::clone(&gate))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = server
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.child_token()));

        Ok(Self {
            addr,
            gate,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The gate behind the server, for inspecting cache and registry state.
    pub fn gate(&self) -> &CommandAuthorizationGate {
        &self.gate
    }

    /// Open a new client connection.
    pub async fn client(&self) -> Result<RespTestClient, anyhow::Error> {
        RespTestClient::connect(self.addr).await
    }

    /// Stop accepting, close all connections and wait for the server task.
    pub async fn shutdown(mut self) -> Result<(), anyhow::Error> {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
        }
        Ok(())
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A decoded RESP reply as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestReply {
    Simple(String),
    Error(String),
    Bulk(Option<Vec<u8>>),
}

impl TestReply {
    pub fn simple(text: &str) -> Self {
        TestReply::Simple(text.to_string())
    }

    pub fn error(text: &str) -> Self {
        TestReply::Error(text.to_string())
    }

    pub fn bulk(data: &[u8]) -> Self {
        TestReply::Bulk(Some(data.to_vec()))
    }

    pub fn null() -> Self {
        TestReply::Bulk(None)
    }

    pub fn ok() -> Self {
        Self::simple("OK")
    }
}

/// Minimal RESP client for tests.
pub struct RespTestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RespTestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, anyhow::Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", addr, e))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Send a command as a RESP array and read one reply.
    pub async fn command(&mut self, args: &[&str]) -> Result<TestReply, anyhow::Error> {
        let mut frame = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            frame.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            frame.extend_from_slice(arg.as_bytes());
            frame.extend_from_slice(b"\r\n");
        }
        self.send_raw(&frame).await?;
        self.read_reply().await
    }

    /// Write raw bytes without reading a reply.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), anyhow::Error> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one reply.
    pub async fn read_reply(&mut self) -> Result<TestReply, anyhow::Error> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("connection closed by server");
        }
        let line = line.trim_end_matches("\r\n");
        let (kind, rest) = line.split_at(1);

        match kind {
            "+" => Ok(TestReply::Simple(rest.to_string())),
            "-" => Ok(TestReply::Error(rest.to_string())),
            "$" => {
                let len: i64 = rest.parse()?;
                if len < 0 {
                    return Ok(TestReply::Bulk(None));
                }
                let mut data = vec![0u8; usize::try_from(len)? + 2];
                self.reader.read_exact(&mut data).await?;
                data.truncate(data.len() - 2);
                Ok(TestReply::Bulk(Some(data)))
            }
            other => anyhow::bail!("unexpected reply type {other:?}"),
        }
    }

    /// True once the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.reader.read(&mut buf).await, Ok(0) | Err(_))
    }
}
