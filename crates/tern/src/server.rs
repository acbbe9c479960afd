//
// server.rs
//
// Line-delimited JSON driver: one task owns the session and interleaves
// requests, host callbacks and diagnostic steps
//

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::config::ProjectServiceConfig;
use crate::host::{HostEvent, TokioHost};
use crate::service::ProjectService;
use crate::session::{BasicLanguageService, Session};

async fn write_pending<W: AsyncWrite + Unpin>(
    output: &mut UnboundedReceiver<Value>,
    writer: &mut W,
) -> anyhow::Result<()> {
    let mut wrote = false;
    while let Ok(message) = output.try_recv() {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        wrote = true;
    }
    if wrote {
        writer.flush().await?;
    }
    Ok(())
}

/// Serve requests read from `input` until it ends.
///
/// Input lines are handled first, then host events; a waiting diagnostic
/// step runs only when neither is ready.
pub async fn run<R, W>(
    mut session: Session,
    mut output: UnboundedReceiver<Value>,
    mut host_events: UnboundedReceiver<HostEvent>,
    input: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        write_pending(&mut output, &mut writer).await?;
        let has_immediate = session.has_immediate();
        tokio::select! {
            biased;
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !line.trim().is_empty() {
                        session.handle_message(&line);
                    }
                }
                None => {
                    log::info!("Input closed, shutting down");
                    break;
                }
            },
            Some(event) = host_events.recv() => session.on_host_event(event),
            _ = tokio::task::yield_now(), if has_immediate => {
                session.run_immediate();
            }
        }
    }
    write_pending(&mut output, &mut writer).await
}

/// Serve on stdin/stdout against the real file system.
pub async fn run_stdio(config: ProjectServiceConfig) -> anyhow::Result<()> {
    let (host, host_events) = TokioHost::new()?;
    let service = ProjectService::new(Arc::new(host), config);
    let (tx, rx) = unbounded_channel();
    let session = Session::new(service, Box::new(BasicLanguageService), tx);
    let stdin = BufReader::new(tokio::io::stdin());
    run(session, rx, host_events, stdin, tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryHost;
    use serde_json::json;

    fn session_over(host: Arc<MemoryHost>) -> (Session, UnboundedReceiver<Value>) {
        let service = ProjectService::new(host, ProjectServiceConfig::default());
        let (tx, rx) = unbounded_channel();
        (Session::new(service, Box::new(BasicLanguageService), tx), rx)
    }

    fn output_lines(bytes: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_requests_until_input_ends() {
        let host = Arc::new(MemoryHost::with_current_directory("/p"));
        host.add_file("/p/tsconfig.json", "{}");
        host.add_file("/p/a.ts", "export const a = 1;\n");
        host.take_events();
        let (session, output) = session_over(host);
        let (_events_tx, events_rx) = unbounded_channel();

        let input = [
            json!({ "seq": 1, "type": "request", "command": "open", "arguments": { "file": "a.ts" } }).to_string(),
            String::new(),
            json!({ "seq": 2, "type": "request", "command": "projectInfo", "arguments": { "file": "a.ts" } })
                .to_string(),
        ]
        .join("\n");
        let mut written = Vec::new();
        run(session, output, events_rx, input.as_bytes(), &mut written)
            .await
            .unwrap();

        let messages = output_lines(&written);
        let responses: Vec<&Value> = messages.iter().filter(|m| m["type"] == "response").collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["request_seq"], 1);
        assert_eq!(responses[1]["body"]["configFileName"], "/p/tsconfig.json");
        assert!(messages.iter().any(|m| m["event"] == "projectLoadingStart"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_run_on_host_timers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "function f() {\n").unwrap();
        let file = file.to_string_lossy().to_string();

        let (host, host_events) = TokioHost::new().unwrap();
        let service = ProjectService::new(Arc::new(host), ProjectServiceConfig::default());
        let (tx, rx) = unbounded_channel();
        let session = Session::new(service, Box::new(BasicLanguageService), tx);

        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let task = tokio::spawn(run(session, rx, host_events, BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        let requests = [
            json!({ "seq": 1, "type": "request", "command": "open", "arguments": { "file": file } }),
            json!({ "seq": 2, "type": "request", "command": "geterr", "arguments": { "files": [file], "delay": 100 } }),
        ];
        for request in &requests {
            client_write
                .write_all(format!("{}\n", request).as_bytes())
                .await
                .unwrap();
        }

        let mut events = Vec::new();
        let mut lines = BufReader::new(client_read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            let message: Value = serde_json::from_str(&line).unwrap();
            if message["type"] == "event" {
                let done = message["event"] == "requestCompleted";
                events.push(message);
                if done {
                    break;
                }
            }
        }
        drop(client_write);
        task.await.unwrap().unwrap();

        let names: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["syntaxDiag", "semanticDiag", "requestCompleted"]);
        assert_eq!(events[0]["body"]["diagnostics"][0]["text"], "'}' expected.");
        assert_eq!(events[2]["body"]["request_seq"], 2);
    }
}
