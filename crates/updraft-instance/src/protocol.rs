//! ---
//! upd_section: "04-instance"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Single-instance lock and activation relay."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Line protocol between launches: `activate <pid>\n`, answered `ok\n`.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const ACTIVATE: &str = "activate";
const OK: &str = "ok";

/// Request from a later launch to bring the running instance forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    /// Process id of the requesting launch, when it sent one.
    pub pid: Option<u32>,
}

impl Activation {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        if parts.next()? != ACTIVATE {
            return None;
        }
        let pid = parts.next().and_then(|raw| raw.parse().ok());
        Some(Self { pid })
    }

    fn encode(self) -> String {
        match self.pid {
            Some(pid) => format!("{ACTIVATE} {pid}\n"),
            None => format!("{ACTIVATE}\n"),
        }
    }
}

/// Holder side: read one request, forward it and acknowledge.
pub(crate) async fn serve<S>(stream: S, activations: &mpsc::UnboundedSender<Activation>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    timeout(REPLY_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "activation request timed out"))??;

    match Activation::parse(&line) {
        Some(activation) => {
            debug!(pid = ?activation.pid, "activation requested");
            let _ = activations.send(activation);
            writer.write_all(format!("{OK}\n").as_bytes()).await?;
        }
        None => {
            warn!(request = line.trim(), "unknown instance request");
            writer.write_all(b"error\n").await?;
        }
    }
    writer.flush().await
}

/// Launcher side: ask the holder to activate. Returns whether it acknowledged.
pub(crate) async fn request_activation<S>(stream: S) -> io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let request = Activation {
        pid: Some(std::process::id()),
    };
    writer.write_all(request.encode().as_bytes()).await?;
    writer.flush().await?;

    let mut reply = String::new();
    let mut reader = BufReader::new(reader);
    match timeout(REPLY_TIMEOUT, reader.read_line(&mut reply)).await {
        Ok(read) => {
            read?;
            Ok(reply.trim() == OK)
        }
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requests() {
        assert_eq!(
            Activation::parse("activate 42\n"),
            Some(Activation { pid: Some(42) })
        );
        assert_eq!(Activation::parse("activate"), Some(Activation { pid: None }));
        assert_eq!(Activation::parse("shutdown\n"), None);
        assert_eq!(Activation::parse(""), None);
    }

    #[tokio::test]
    async fn request_is_acknowledged_over_duplex() {
        let (client, server) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let holder = tokio::spawn(async move { serve(server, &tx).await });

        assert!(request_activation(client).await.expect("request"));
        holder.await.expect("join").expect("serve");
        let activation = rx.recv().await.expect("activation");
        assert_eq!(activation.pid, Some(std::process::id()));
    }
}
