use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command};

/// One JSON line back to the client: `{"ok": ...}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Value),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl Reply {
    pub fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Reply::Ok(value),
            Err(e) => Reply::error("internal", e.to_string()),
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Reply::Error(ErrorBody {
            code,
            message: message.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"error":{{"code":"internal","message":"{e}"}}}}"#)
        })
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::error(e.code(), e.to_string())
    }
}

/// Turns command lines into engine calls.
pub struct Handler {
    engine: Arc<Engine>,
}

impl Handler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        let cmd = match sql::parse_sql(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
                return Reply::error(e.code(), e.to_string());
            }
        };

        let label = command_label(&cmd);
        let start = Instant::now();
        let reply = match self.execute_command(cmd).await {
            Ok(reply) => reply,
            Err(e) => e.into(),
        };
        let status = if reply.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        reply
    }

    async fn execute_command(&self, cmd: Command) -> Result<Reply, EngineError> {
        let engine = &self.engine;
        Ok(match cmd {
            Command::InitializeSlots { count } => Reply::ok(engine.initialize_slots(count).await?),
            Command::Arrive { plate, requested_at } => {
                Reply::ok(engine.arrive(&plate, requested_at).await?)
            }
            Command::Depart { plate } => Reply::ok(engine.depart(&plate).await?),
            Command::SelectStatus => Reply::ok(engine.status().await),
            Command::SelectSlots => Reply::ok(engine.list_slots()),
            Command::SelectQueue => Reply::ok(engine.list_queue()),
            Command::SelectSessions { plate } => Reply::ok(engine.sessions(plate.as_deref())),
            Command::SelectVehicle { plate } => Reply::ok(engine.vehicle(&plate)),
        })
    }
}

/// Serve one client: one command per line in, one JSON reply per line out.
/// Returns when the client closes the connection.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let handler = Handler::new(engine);

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                // The codec stops yielding after an error, so this is the last reply.
                let reply = Reply::error("limit_exceeded", format!("line longer than {MAX_LINE_LEN} bytes"));
                framed.send(reply.to_line()).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let reply = handler.handle_line(&line).await;
        framed.send(reply.to_line()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::clock::ManualClock;
    use crate::drainer::DrainQueue;
    use crate::rent::Tariff;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkway_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Arc<Engine> {
        let clock = Arc::new(ManualClock::new(0));
        Arc::new(Engine::new(test_wal_path(name), clock, Tariff::default(), DrainQueue::detached()).unwrap())
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(Reply::ok(3).to_line(), r#"{"ok":3}"#);
        assert_eq!(
            Reply::error("not_found", "gone").to_line(),
            r#"{"error":{"code":"not_found","message":"gone"}}"#
        );
    }

    #[tokio::test]
    async fn handler_maps_errors_to_codes() {
        let handler = Handler::new(engine("codes.wal"));

        let Reply::Error(body) = handler.handle_line("SELECT * FROM nowhere").await else {
            panic!("expected error");
        };
        assert_eq!(body.code, "syntax_error");

        let Reply::Error(body) = handler.handle_line("INSERT INTO slots (count) VALUES (-1)").await else {
            panic!("expected error");
        };
        assert_eq!(body.code, "invalid_argument");

        let Reply::Error(body) = handler.handle_line("DELETE FROM sessions WHERE plate = 'AB-123'").await else {
            panic!("expected error");
        };
        assert_eq!(body.code, "not_found");
    }

    #[tokio::test]
    async fn handler_runs_commands() {
        let handler = Handler::new(engine("commands.wal"));
        let reply = handler.handle_line("INSERT INTO slots (count) VALUES (2)").await;
        assert_eq!(reply, Reply::Ok(serde_json::json!({"added": 2, "totalSlots": 2})));

        let reply = handler.handle_line("INSERT INTO arrivals (plate) VALUES ('AB-123')").await;
        assert_eq!(
            reply,
            Reply::Ok(serde_json::json!({
                "status": "parked",
                "plate": "AB-123",
                "slotId": 1,
                "freeSlotsRemaining": 1
            }))
        );
    }

    #[tokio::test]
    async fn connection_answers_every_line() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(process_connection(server, engine("duplex.wal")));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        write
            .write_all(b"INSERT INTO slots (count) VALUES (1)\nSELECT * FROM status\nnonsense\n")
            .await
            .unwrap();

        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, r#"{"ok":{"added":1,"totalSlots":1}}"#);
        let second = lines.next_line().await.unwrap().unwrap();
        assert_eq!(second, r#"{"ok":{"totalSlots":1,"freeSlots":1,"queuedVehicles":0}}"#);
        let third: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(third["error"]["code"], "syntax_error");

        drop(write);
        drop(lines);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn overlong_line_gets_a_final_reply() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(process_connection(server, engine("overlong.wal")));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        let mut line = vec![b'x'; MAX_LINE_LEN + 10];
        line.push(b'\n');
        write.write_all(&line).await.unwrap();

        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], "limit_exceeded");
        task.await.unwrap().unwrap();
    }
}
