//! Shared helpers: an in-memory fake engine driven line by line.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, LinesCodec};

use yate_extmodule::{Client, ClientBuilder, ClientOptions};

/// How long a test waits for a line before failing.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(5);

/// The engine side of an in-memory connection.
pub struct FakeEngine {
    lines: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeEngine {
    /// Next line written by the client.
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(LINE_TIMEOUT, self.lines.next())
            .await
            .expect("timed out waiting for a client line")
            .expect("client stream ended")
            .expect("client line is valid")
    }

    /// Assert the next client line equals `expected`.
    pub async fn expect(&mut self, expected: &str) {
        let line = self.next_line().await;
        assert_eq!(line, expected, "unexpected line from client");
    }

    /// Assert the client writes nothing for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(item) = tokio::time::timeout(wait, self.lines.next()).await {
            panic!("expected no line from client, got {item:?}");
        }
    }

    /// Send one line to the client.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write to client");
        self.writer.flush().await.expect("flush to client");
    }

    /// Expect `request`, then answer with `response`.
    pub async fn reply(&mut self, request: &str, response: &str) {
        self.expect(request).await;
        self.send(response).await;
    }

    /// Close the engine's sending direction; the client reads EOF.
    pub async fn shutdown_write(&mut self) {
        self.writer.shutdown().await.expect("shutdown engine writer");
    }

    /// Assert the client closes its sending direction.
    pub async fn expect_eof(&mut self) {
        let item = tokio::time::timeout(LINE_TIMEOUT, self.lines.next())
            .await
            .expect("timed out waiting for client EOF");
        assert!(item.is_none(), "expected EOF, got {item:?}");
    }
}

/// Complete one `setlocal` round trip.
///
/// The reader handles lines in arrival order, so once this returns every
/// line the engine sent before has been dispatched (inline mode).
pub async fn round_trip(client: &Client, engine: &mut FakeEngine) {
    let request = tokio::spawn({
        let client = client.clone();
        async move { client.get_local("sync").await }
    });
    engine
        .reply("%%>setlocal:sync:", "%%<setlocal:sync:done:true")
        .await;
    assert_eq!(request.await.unwrap().unwrap(), "done");
}

/// Connect a client built from `builder` to a fresh fake engine.
///
/// The connect line is consumed and checked against `%%>connect:global`
/// only when `expect_global` is set.
pub async fn connect_builder(builder: ClientBuilder, expect_global: bool) -> (Client, FakeEngine) {
    let (client_side, engine_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (engine_read, engine_write) = tokio::io::split(engine_side);

    let client = builder
        .connect_stream(client_read, client_write)
        .await
        .expect("client connects");

    let mut engine = FakeEngine {
        lines: FramedRead::new(engine_read, LinesCodec::new()),
        writer: engine_write,
    };
    if expect_global {
        engine.expect("%%>connect:global").await;
    }
    (client, engine)
}

/// Connect a default client and consume its connect line.
pub async fn connect() -> (Client, FakeEngine) {
    connect_builder(Client::builder(ClientOptions::default()), true).await
}

/// Extract the message id from a `%%>message:<id>:...` request line.
pub fn message_id(line: &str) -> String {
    assert!(line.starts_with("%%>message:"), "not a message request: {line}");
    line.split(':').nth(1).expect("id field").to_owned()
}
