// MPD client
// Minimal implementation of the MPD text protocol, enough to observe playback
// Protocol reference: https://mpd.readthedocs.io/en/latest/protocol.html

use super::{parse_duration, parse_track_number, Connector, PlayerConnection, Song, Status};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

type Attrs = HashMap<String, String>;

enum Reply {
    Ok(Attrs),
    Ack(String),
}

/// Opens connections to one MPD server
#[derive(Debug, Clone)]
pub struct MpdConnector {
    address: String,
    password: Option<String>,
}

impl MpdConnector {
    pub fn new(address: String, password: Option<String>) -> Self {
        Self { address, password }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Connector for MpdConnector {
    type Connection = MpdConnection;

    async fn connect(&self) -> Result<MpdConnection> {
        MpdConnection::connect(&self.address, self.password.as_deref()).await
    }
}

pub struct MpdConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    closed: bool,
}

impl MpdConnection {
    /// Connect, check the greeting and authenticate if a password is given
    pub async fn connect(address: &str, password: Option<&str>) -> Result<Self> {
        let stream = timeout(COMMAND_TIMEOUT, TcpStream::connect(address))
            .await
            .with_context(|| format!("Timed out connecting to MPD at {}", address))?
            .with_context(|| format!("Failed to connect to MPD at {}", address))?;

        let (read, write) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read),
            writer: write,
            closed: false,
        };

        let greeting = timeout(COMMAND_TIMEOUT, conn.read_line())
            .await
            .context("Timed out waiting for MPD greeting")?
            .context("Failed to read MPD greeting")?;
        if !greeting.starts_with("OK MPD") {
            anyhow::bail!("Unexpected MPD greeting: {}", greeting);
        }
        log::debug!("Connected to {} ({})", address, greeting);

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            conn.command(&format!("password {}", quote(password)))
                .await
                .context("MPD authentication failed")?;
        }

        Ok(conn)
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "MPD closed the connection"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn exchange(&mut self, command: &str) -> io::Result<Reply> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut attrs = Attrs::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(Reply::Ok(attrs));
            }
            if let Some(message) = line.strip_prefix("ACK ") {
                return Ok(Reply::Ack(message.to_string()));
            }
            let (key, value) = line.split_once(": ").ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("can't parse line: {}", line))
            })?;
            attrs.insert(key.to_string(), value.to_string());
        }
    }

    /// Run one command. I/O failures and timeouts mark the connection closed.
    async fn command(&mut self, command: &str) -> Result<Attrs> {
        let verb = command.split(' ').next().unwrap_or(command);
        if self.closed {
            anyhow::bail!("MPD connection is closed ({})", verb);
        }

        let reply = match timeout(COMMAND_TIMEOUT, self.exchange(command)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.closed = true;
                return Err(e).with_context(|| format!("MPD command '{}' failed", verb));
            }
            Err(_) => {
                self.closed = true;
                anyhow::bail!("MPD command '{}' timed out", verb);
            }
        };

        match reply {
            Reply::Ok(attrs) => Ok(attrs),
            Reply::Ack(message) => anyhow::bail!("MPD rejected '{}': {}", verb, message),
        }
    }
}

/// Quote an argument the way MPD's tokenizer expects
fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn parse_status(attrs: &Attrs) -> Result<Status> {
    if attrs.get("state").map(String::as_str) != Some("play") {
        return Ok(Status::default());
    }

    // "time" is "elapsed:total" in whole seconds
    let (elapsed, length) = attrs
        .get("time")
        .and_then(|time| time.split_once(':'))
        .context("MPD status has no time field")?;
    let elapsed: u64 = elapsed.parse().context("Invalid elapsed time in MPD status")?;
    let length: u64 = length.parse().context("Invalid track length in MPD status")?;

    Ok(Status {
        playing: true,
        position: super::Position { elapsed, length },
    })
}

fn parse_song(attrs: &Attrs) -> Song {
    let field = |key: &str| attrs.get(key).cloned().unwrap_or_default();
    let duration = attrs
        .get("duration")
        .or_else(|| attrs.get("Time"))
        .map(|raw| parse_duration(raw))
        .unwrap_or(0);

    Song {
        file: field("file"),
        title: field("Title"),
        artist: field("Artist"),
        album: field("Album"),
        album_artist: field("AlbumArtist"),
        track_number: attrs.get("Track").and_then(|raw| parse_track_number(raw)),
        duration,
    }
}

impl PlayerConnection for MpdConnection {
    async fn status(&mut self) -> Result<Status> {
        let attrs = self.command("status").await?;
        parse_status(&attrs)
    }

    async fn play_time(&mut self) -> Result<u64> {
        let attrs = self.command("stats").await?;
        attrs
            .get("playtime")
            .context("MPD stats has no playtime field")?
            .parse()
            .context("Invalid playtime in MPD stats")
    }

    async fn current_song(&mut self) -> Result<Song> {
        let attrs = self.command("currentsong").await?;
        Ok(parse_song(&attrs))
    }

    async fn ping(&mut self) -> Result<()> {
        self.command("ping").await.map(|_| ())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // MPD does not answer "close"
        self.writer.write_all(b"close\n").await.context("Failed to send close to MPD")?;
        self.writer.shutdown().await.context("Failed to shut down MPD connection")?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
