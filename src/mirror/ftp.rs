//! Minimal anonymous FTP client for directory listings.
//!
//! Only the commands needed to walk the nightly-build tree are implemented:
//! login, `CWD`, passive-mode `NLST` and `QUIT`. Data connections use `PASV`
//! over IPv4 and `EPSV` (RFC 2428) over IPv6. Every network operation is
//! bounded by the configured I/O timeout.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{ListingFuture, ReleaseListing};
use crate::config::MirrorSettings;

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Errors raised by the FTP client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FtpError {
    /// Raised when a socket operation fails.
    #[error("{operation} failed: {message}")]
    Io {
        /// Operation that failed (for example `connect to host:21`).
        operation: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when an operation exceeds the I/O timeout.
    #[error("timed out during {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
    },
    /// Raised when the server closes the control connection mid-reply.
    #[error("server closed the control connection")]
    ConnectionClosed,
    /// Raised when a reply line does not start with a three digit code.
    #[error("malformed reply line: {line:?}")]
    MalformedReply {
        /// Raw reply line.
        line: String,
    },
    /// Raised when a passive-mode reply carries no usable port.
    #[error("malformed passive mode reply: {text:?}")]
    MalformedPassive {
        /// Reply text returned by the server.
        text: String,
    },
    /// Raised when the server answers a command with an unexpected code.
    #[error("{command} rejected with {code}: {text}")]
    UnexpectedReply {
        /// Command that was sent.
        command: String,
        /// Reply code.
        code: u16,
        /// Reply text.
        text: String,
    },
}

/// A complete (possibly multi-line) server reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FtpReply {
    /// Three digit reply code.
    pub code: u16,
    /// Reply text with line breaks preserved between continuation lines.
    pub text: String,
}

/// Anonymous FTP session positioned at the nightly-build root.
#[derive(Debug)]
pub struct FtpMirror {
    control: BufReader<TcpStream>,
    io_timeout: Duration,
}

impl FtpMirror {
    /// Connects, logs in anonymously and changes into the configured root.
    ///
    /// # Errors
    ///
    /// Returns [`FtpError`] when the server is unreachable, rejects the
    /// anonymous login, or the root directory does not exist.
    pub async fn connect(settings: &MirrorSettings) -> Result<Self, FtpError> {
        let host = settings.host.trim_start_matches('[').trim_end_matches(']');
        let stream = bounded(
            settings.io_timeout,
            &format!("connect to {}", settings.authority()),
            TcpStream::connect((host, settings.port)),
        )
        .await?;
        debug!(peer = ?stream.peer_addr().ok(), "connected to release mirror");

        let mut mirror = Self {
            control: BufReader::new(stream),
            io_timeout: settings.io_timeout,
        };
        let mut greeting = mirror.read_reply().await?;
        if greeting.code == 120 {
            greeting = mirror.read_reply().await?;
        }
        expect_code("greeting", &greeting, &[220])?;

        mirror.login().await?;
        mirror.change_dir(&settings.root).await?;
        Ok(mirror)
    }

    /// Sends `QUIT` and drops the control connection.
    ///
    /// # Errors
    ///
    /// Returns [`FtpError`] when the command cannot be sent or answered.
    pub async fn quit(mut self) -> Result<(), FtpError> {
        self.command("QUIT").await.map(|_| ())
    }

    async fn login(&mut self) -> Result<(), FtpError> {
        let user = self.command(&format!("USER {ANONYMOUS_USER}")).await?;
        match user.code {
            230 => Ok(()),
            331 | 332 => {
                let pass = self
                    .command(&format!("PASS {ANONYMOUS_PASSWORD}"))
                    .await?;
                expect_code("PASS", &pass, &[202, 230])
            }
            _ => Err(unexpected("USER", user)),
        }
    }

    async fn change_dir(&mut self, path: &str) -> Result<(), FtpError> {
        let reply = self.command(&format!("CWD {path}")).await?;
        expect_code("CWD", &reply, &[200, 250])
    }

    /// Lists names in `path` (or the current directory) over a passive data
    /// connection. "No files" replies (450/550) yield an empty listing.
    async fn name_list(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        let peer = self
            .control
            .get_ref()
            .peer_addr()
            .map_err(|err| io_error("resolve control peer", &err))?;
        let port = self.passive_port(peer).await?;
        let mut data = bounded(
            self.io_timeout,
            "open data connection",
            TcpStream::connect(SocketAddr::new(peer.ip(), port)),
        )
        .await?;

        let command = path.map_or_else(|| String::from("NLST"), |dir| format!("NLST {dir}"));
        let reply = self.command(&command).await?;
        match reply.code {
            125 | 150 | 226 | 250 => {}
            450 | 550 => {
                debug!(%command, code = reply.code, "listing reported no files");
                return Ok(Vec::new());
            }
            _ => return Err(unexpected(&command, reply)),
        }

        let mut payload = Vec::new();
        bounded(
            self.io_timeout,
            "read listing",
            data.read_to_end(&mut payload),
        )
        .await?;
        drop(data);

        if matches!(reply.code, 125 | 150) {
            let done = self.read_reply().await?;
            expect_code(&command, &done, &[226, 250])?;
        }

        Ok(parse_name_list(&String::from_utf8_lossy(&payload)))
    }

    /// Asks the server for a data port: `EPSV` when the control connection
    /// runs over IPv6, `PASV` otherwise.
    async fn passive_port(&mut self, peer: SocketAddr) -> Result<u16, FtpError> {
        if peer.is_ipv6() {
            let reply = self.command("EPSV").await?;
            expect_code("EPSV", &reply, &[229])?;
            parse_extended_passive_port(&reply.text)
        } else {
            let reply = self.command("PASV").await?;
            expect_code("PASV", &reply, &[227])?;
            parse_passive_port(&reply.text)
        }
    }

    async fn command(&mut self, line: &str) -> Result<FtpReply, FtpError> {
        debug!(command = line, "sending FTP command");
        let wire = format!("{line}\r\n");
        bounded(
            self.io_timeout,
            "send command",
            self.control.get_mut().write_all(wire.as_bytes()),
        )
        .await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<FtpReply, FtpError> {
        let first = self.read_line().await?;
        let (code, continued, text) = parse_reply_line(&first)?;
        let mut lines = vec![text.to_owned()];

        if continued {
            loop {
                let line = self.read_line().await?;
                let closing =
                    matches!(parse_reply_line(&line), Ok((next_code, false, _)) if next_code == code);
                if closing {
                    lines.push(line.get(4..).unwrap_or_default().to_owned());
                    break;
                }
                lines.push(line);
            }
        }

        Ok(FtpReply {
            code,
            text: lines.join("\n"),
        })
    }

    async fn read_line(&mut self) -> Result<String, FtpError> {
        let mut line = String::new();
        let read = bounded(
            self.io_timeout,
            "read reply",
            self.control.read_line(&mut line),
        )
        .await?;
        if read == 0 {
            return Err(FtpError::ConnectionClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

impl ReleaseListing for FtpMirror {
    type Error = FtpError;

    fn list_releases(&mut self) -> ListingFuture<'_, Vec<String>, Self::Error> {
        Box::pin(self.name_list(None))
    }

    fn list_release<'a>(
        &'a mut self,
        release: &'a str,
    ) -> ListingFuture<'a, Vec<String>, Self::Error> {
        Box::pin(self.name_list(Some(release)))
    }
}

async fn bounded<T, F>(limit: Duration, operation: &str, future: F) -> Result<T, FtpError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(io_error(operation, &err)),
        Err(_) => Err(FtpError::Timeout {
            operation: operation.to_owned(),
        }),
    }
}

fn io_error(operation: &str, err: &std::io::Error) -> FtpError {
    FtpError::Io {
        operation: operation.to_owned(),
        message: err.to_string(),
    }
}

fn unexpected(command: &str, reply: FtpReply) -> FtpError {
    FtpError::UnexpectedReply {
        command: command.to_owned(),
        code: reply.code,
        text: reply.text,
    }
}

fn expect_code(command: &str, reply: &FtpReply, accepted: &[u16]) -> Result<(), FtpError> {
    if accepted.contains(&reply.code) {
        Ok(())
    } else {
        Err(unexpected(command, reply.clone()))
    }
}

/// Splits a reply line into its code, whether it opens a multi-line reply
/// (`123-`), and its text.
pub(crate) fn parse_reply_line(line: &str) -> Result<(u16, bool, &str), FtpError> {
    let malformed = || FtpError::MalformedReply {
        line: line.to_owned(),
    };
    let digits = line.get(..3).ok_or_else(malformed)?;
    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(malformed());
    }
    let code = digits.parse::<u16>().map_err(|_| malformed())?;
    match line.as_bytes().get(3) {
        None => Ok((code, false, "")),
        Some(b' ') => Ok((code, false, line.get(4..).unwrap_or_default())),
        Some(b'-') => Ok((code, true, line.get(4..).unwrap_or_default())),
        Some(_) => Err(malformed()),
    }
}

/// Extracts the data port from a `227 Entering Passive Mode
/// (h1,h2,h3,h4,p1,p2)` reply. The announced host is ignored in favour of
/// the control connection's peer.
pub(crate) fn parse_passive_port(text: &str) -> Result<u16, FtpError> {
    let malformed = || FtpError::MalformedPassive {
        text: text.to_owned(),
    };
    let inner = match (text.find('('), text.find(')')) {
        (Some(open), Some(close)) if open < close => text.get(open + 1..close).unwrap_or_default(),
        _ => text
            .trim_start_matches(|ch: char| !ch.is_ascii_digit())
            .split(|ch: char| !(ch.is_ascii_digit() || ch == ','))
            .next()
            .unwrap_or_default(),
    };
    let fields = inner
        .split(',')
        .map(|field| field.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed())?;
    let [_, _, _, _, high, low] = fields.as_slice() else {
        return Err(malformed());
    };
    Ok((u16::from(*high) << 8) | u16::from(*low))
}

/// Extracts the data port from a `229 Entering Extended Passive Mode
/// (|||port|)` reply. The delimiter is whatever character follows `(`.
pub(crate) fn parse_extended_passive_port(text: &str) -> Result<u16, FtpError> {
    let malformed = || FtpError::MalformedPassive {
        text: text.to_owned(),
    };
    let open = text.find('(').ok_or_else(malformed)?;
    let inner = text.get(open + 1..).ok_or_else(malformed)?;
    let close = inner.find(')').ok_or_else(malformed)?;
    let fields = inner.get(..close).ok_or_else(malformed)?;
    let delimiter = fields.chars().next().ok_or_else(malformed)?;
    let parts: Vec<&str> = fields.split(delimiter).collect();
    let ["", "", "", port, ""] = parts.as_slice() else {
        return Err(malformed());
    };
    port.parse::<u16>().map_err(|_| malformed())
}

/// Splits an `NLST` payload into names, dropping blanks and the `.`/`..`
/// entries some servers include.
pub(crate) fn parse_name_list(payload: &str) -> Vec<String> {
    payload
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_owned)
        .collect()
}
