//! Raw IMAP over rustls, one connection per poll cycle.
//!
//! The protocol code is blocking and generic over the byte stream so it can
//! be driven by a scripted server in tests. `ImapSession` moves the
//! connection onto the blocking pool for every command.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::channels::traits::{MailboxSession, MailboxTransport};
use crate::config::EmailConfig;
use crate::error::TransportError;

/// Socket read/write timeout; bounds a single hung server.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// `{1234}` at the end of a response line announces a literal of that size.
static LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}\r?\n?$").unwrap());

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Protocol ────────────────────────────────────────────────────────

/// Everything the server sent for one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged lines, CRLF included.
    lines: Vec<String>,
    /// Literal payloads in the order they arrived.
    literals: Vec<Vec<u8>>,
    /// The tagged completion line.
    status: String,
}

/// A blocking IMAP client connection.
pub struct ImapConnection<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    #[cfg(test)]
    fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(TransportError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read the server greeting.
    pub fn greeting(&mut self) -> Result<(), TransportError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(TransportError::Command {
                command: "greeting".into(),
                reason: line.trim().to_string(),
            })
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Response, TransportError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;

            if let Some(len) = literal_len(&line) {
                if len > MAX_LITERAL_BYTES {
                    return Err(TransportError::Command {
                        command: cmd.split_whitespace().next().unwrap_or(cmd).to_string(),
                        reason: format!("server announced a {len}-byte literal"),
                    });
                }
                let mut literal = vec![0_u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }

            if line.starts_with(&format!("{tag} ")) {
                response.status = line;
                break;
            }
            response.lines.push(line);
        }

        if tagged_ok(&tag, &response.status) {
            Ok(response)
        } else {
            let verb = cmd.split_whitespace().next().unwrap_or(cmd);
            Err(TransportError::Command {
                command: verb.to_string(),
                reason: response.status.trim().to_string(),
            })
        }
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        self.command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .map(|_| ())
            .map_err(|_| TransportError::LoginRejected {
                user: username.to_string(),
            })
    }

    pub fn select(&mut self, mailbox: &str) -> Result<(), TransportError> {
        self.command(&format!("SELECT {}", quote(mailbox))).map(|_| ())
    }

    /// Sequence numbers of unseen messages, in server order (oldest first).
    pub fn search_unseen(&mut self) -> Result<Vec<String>, TransportError> {
        let response = self.command("SEARCH UNSEEN")?;
        Ok(parse_search(&response.lines))
    }

    /// Whole message without setting `\Seen`.
    pub fn fetch(&mut self, id: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.command(&format!("FETCH {id} BODY.PEEK[]"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Command {
                command: "FETCH".into(),
                reason: format!("no message body returned for {id}"),
            })
    }

    pub fn mark_seen(&mut self, id: &str) -> Result<(), TransportError> {
        self.command(&format!("STORE {id} +FLAGS (\\Seen)")).map(|_| ())
    }

    pub fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

/// Quote a string for use as an IMAP quoted-string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal_len(line: &str) -> Option<usize> {
    LITERAL
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().parse().unwrap_or(usize::MAX))
}

fn tagged_ok(tag: &str, line: &str) -> bool {
    line.strip_prefix(tag)
        .is_some_and(|rest| rest.trim_start().starts_with("OK"))
}

fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Reverse to latest-first and keep at most `window` ids.
pub fn latest_first(mut ids: Vec<String>, window: usize) -> Vec<String> {
    ids.reverse();
    ids.truncate(window);
    ids
}

// ── Transport ───────────────────────────────────────────────────────

/// Open TCP + TLS, read the greeting, log in and select the mailbox.
fn open_tls(config: &EmailConfig) -> Result<ImapConnection<TlsStream>, TransportError> {
    use secrecy::ExposeSecret;

    let connect_err = |reason: String| TransportError::Connect {
        host: config.imap_host.clone(),
        port: config.imap_port,
        reason,
    };

    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(|e| connect_err(e.to_string()))?;
    let tls = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;

    let mut conn = ImapConnection::new(rustls::StreamOwned::new(tls, tcp));
    conn.greeting()?;
    conn.login(&config.username, config.password.expose_secret())?;
    conn.select(&config.mailbox)?;
    Ok(conn)
}

/// Production `MailboxTransport` over IMAPS.
pub struct ImapTransport {
    config: EmailConfig,
    unread_window: usize,
}

impl ImapTransport {
    pub fn new(config: EmailConfig, unread_window: usize) -> Self {
        Self {
            config,
            unread_window,
        }
    }
}

#[async_trait]
impl MailboxTransport for ImapTransport {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, TransportError> {
        let config = self.config.clone();
        let conn = tokio::task::spawn_blocking(move || open_tls(&config))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))??;

        info!(host = %self.config.imap_host, mailbox = %self.config.mailbox, "Connected to email server");
        Ok(Box::new(ImapSession::new(conn, self.unread_window)))
    }
}

/// Async facade over a blocking `ImapConnection`.
pub struct ImapSession<S: Read + Write> {
    conn: Option<ImapConnection<S>>,
    unread_window: usize,
}

impl<S> ImapSession<S>
where
    S: Read + Write + Send + 'static,
{
    pub fn new(conn: ImapConnection<S>, unread_window: usize) -> Self {
        Self {
            conn: Some(conn),
            unread_window,
        }
    }

    /// Run `op` on the blocking pool. A panicking op loses the connection.
    async fn run<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapConnection<S>) -> Result<T, TransportError> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or(TransportError::Closed)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl<S> MailboxSession for ImapSession<S>
where
    S: Read + Write + Send + 'static,
{
    async fn list_unread(&mut self) -> Result<Vec<String>, TransportError> {
        let ids = self.run(|c| c.search_unseen()).await?;
        debug!(unseen = ids.len(), "Searched unseen messages");
        Ok(latest_first(ids, self.unread_window))
    }

    async fn fetch(&mut self, handle: &str) -> Result<Vec<u8>, TransportError> {
        let handle = handle.to_string();
        self.run(move |c| c.fetch(&handle)).await
    }

    async fn mark_seen(&mut self, handle: &str) -> Result<(), TransportError> {
        let handle = handle.to_string();
        self.run(move |c| c.mark_seen(&handle)).await
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .run(|c| {
                c.logout();
                Ok(())
            })
            .await
        {
            warn!(error = %e, "IMAP session close failed");
        }
        self.conn = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Plays back canned server output and records what the client wrote.
    struct ScriptedServer {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedServer {
        fn new(script: &[u8]) -> Self {
            Self {
                input: Cursor::new(script.to_vec()),
                written: Vec::new(),
            }
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Read for ScriptedServer {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedServer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn conn(script: &[u8]) -> ImapConnection<ScriptedServer> {
        ImapConnection::new(ScriptedServer::new(script))
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_len_detects_announcement() {
        assert_eq!(literal_len("* 1 FETCH (BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_len("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len("A1 OK done\r\n"), None);
    }

    #[test]
    fn tagged_ok_checks_tag_and_status() {
        assert!(tagged_ok("A3", "A3 OK SEARCH completed\r\n"));
        assert!(!tagged_ok("A3", "A3 NO no such mailbox\r\n"));
        assert!(!tagged_ok("A3", "A4 OK other\r\n"));
    }

    #[test]
    fn latest_first_reverses_and_limits() {
        let ids = (1..=5).map(|i| i.to_string()).collect();
        assert_eq!(latest_first(ids, 3), vec!["5", "4", "3"]);
        assert!(latest_first(Vec::new(), 100).is_empty());
    }

    #[test]
    fn greeting_accepts_ok() {
        let mut c = conn(b"* OK IMAP4rev1 ready\r\n");
        assert!(c.greeting().is_ok());

        let mut c = conn(b"* BYE go away\r\n");
        assert!(c.greeting().is_err());
    }

    #[test]
    fn login_sends_quoted_credentials() {
        let mut c = conn(b"A1 OK LOGIN completed\r\n");
        c.login("me@example.com", "secret").unwrap();
        assert_eq!(
            c.get_ref().written(),
            "A1 LOGIN \"me@example.com\" \"secret\"\r\n"
        );
    }

    #[test]
    fn login_rejected() {
        let mut c = conn(b"A1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n");
        assert!(matches!(
            c.login("me@example.com", "wrong"),
            Err(TransportError::LoginRejected { .. })
        ));
    }

    #[test]
    fn search_collects_ids() {
        let mut c = conn(b"* SEARCH 2 5 9\r\nA1 OK SEARCH completed\r\n");
        assert_eq!(c.search_unseen().unwrap(), vec!["2", "5", "9"]);
    }

    #[test]
    fn search_empty_mailbox() {
        let mut c = conn(b"* SEARCH\r\nA1 OK SEARCH completed\r\n");
        assert!(c.search_unseen().unwrap().is_empty());
    }

    #[test]
    fn fetch_reads_literal_by_length() {
        // The body contains a line that looks like a tagged response.
        let body = b"From: a@example.com\r\nSubject: x\r\n\r\nA1 OK not really\r\n";
        let mut script = format!("* 9 FETCH (BODY[] {{{}}}\r\n", body.len()).into_bytes();
        script.extend_from_slice(body);
        script.extend_from_slice(b")\r\nA1 OK FETCH completed\r\n");

        let mut c = conn(&script);
        assert_eq!(c.fetch("9").unwrap(), body.to_vec());
        assert_eq!(c.get_ref().written(), "A1 FETCH 9 BODY.PEEK[]\r\n");
    }

    #[test]
    fn oversized_literal_is_refused() {
        let mut c = conn(b"* 9 FETCH (BODY[] {99999999999}\r\nA1 OK FETCH completed\r\n");
        assert!(matches!(
            c.fetch("9"),
            Err(TransportError::Command { command, .. }) if command == "FETCH"
        ));
    }

    #[test]
    fn overflowing_literal_size_is_refused() {
        assert_eq!(
            literal_len("* 1 FETCH (BODY[] {99999999999999999999999}\r\n"),
            Some(usize::MAX)
        );
    }

    #[test]
    fn fetch_without_literal_is_error() {
        let mut c = conn(b"A1 OK FETCH completed\r\n");
        assert!(c.fetch("9").is_err());
    }

    #[test]
    fn closed_connection_is_reported() {
        let mut c = conn(b"");
        assert!(matches!(c.search_unseen(), Err(TransportError::Closed)));
    }

    #[test]
    fn tags_increment_per_command() {
        let mut c = conn(b"A1 OK\r\nA2 OK\r\n");
        c.mark_seen("3").unwrap();
        c.logout();
        assert_eq!(
            c.get_ref().written(),
            "A1 STORE 3 +FLAGS (\\Seen)\r\nA2 LOGOUT\r\n"
        );
    }

    #[tokio::test]
    async fn session_lists_latest_first_within_window() {
        let script = b"* SEARCH 1 2 3 4\r\nA1 OK\r\nA2 OK\r\n";
        let mut session = ImapSession::new(conn(script), 2);
        assert_eq!(session.list_unread().await.unwrap(), vec!["4", "3"]);

        session.close().await;
        assert!(matches!(
            session.list_unread().await,
            Err(TransportError::Closed)
        ));
    }
}
