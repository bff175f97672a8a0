//! Terminal session - one spawned process plus its emulation state
//!
//! The session owns the pty pair and a vt100 parser fed by a dedicated reader
//! thread. Everything the rest of the crate needs from the emulation is the
//! narrow surface here: `is_running`, `title`, `exit_status`, `write`,
//! `reset`. State changes travel upward only as [`SessionEvent`]s.

use crate::launcher::{LaunchError, LaunchSpec};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

/// Opaque session identity. Stable for the session's lifetime; sessions
/// compare equal by identity, never by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Asynchronous state changes emitted by a session's reader thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    OutputChanged(SessionId),
    TitleChanged(SessionId),
    Bell(SessionId),
    ClipboardText(SessionId, String),
    ColorsChanged(SessionId),
    Finished(SessionId, i32),
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match *self {
            SessionEvent::OutputChanged(id)
            | SessionEvent::TitleChanged(id)
            | SessionEvent::Bell(id)
            | SessionEvent::ClipboardText(id, _)
            | SessionEvent::ColorsChanged(id)
            | SessionEvent::Finished(id, _) => id,
        }
    }
}

/// A live (or finished but not yet removed) terminal session. Cheap to clone;
/// clones share the same underlying process and emulation state.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
    name: Arc<Mutex<String>>,
    parser: Arc<Mutex<vt100::Parser>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    killer: Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>,
    running: Arc<AtomicBool>,
    exit_status: Arc<Mutex<Option<i32>>>,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Session {
    /// Spawn the resolved launch spec on a fresh pty. The session only exists
    /// if the spawn succeeded; a failed spawn leaves nothing behind.
    pub fn spawn(
        spec: &LaunchSpec,
        rows: u16,
        cols: u16,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Self, LaunchError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.executable);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;
        // Closing our copy of the slave is what lets the reader see EOF when
        // the child exits.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let killer = child.clone_killer();
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        let session = Self {
            id: SessionId::new(),
            pid,
            command: spec.display_name.clone(),
            started_at: Utc::now(),
            name: Arc::new(Mutex::new(String::new())),
            parser: Arc::new(Mutex::new(vt100::Parser::new(rows, cols, 1000))),
            writer: Arc::new(Mutex::new(writer)),
            master: Arc::new(Mutex::new(pair.master)),
            killer: Arc::new(Mutex::new(killer)),
            running: Arc::new(AtomicBool::new(true)),
            exit_status: Arc::new(Mutex::new(None)),
        };
        session.start_reader_thread(reader, child, events);
        Ok(session)
    }

    /// Reader thread: feeds the emulator, derives events, and on EOF reaps
    /// the child and records the exit status. This is the only place the exit
    /// status is ever set.
    fn start_reader_thread(
        &self,
        mut reader: Box<dyn Read + Send>,
        mut child: Box<dyn Child + Send + Sync>,
        events: UnboundedSender<SessionEvent>,
    ) {
        let id = self.id;
        let parser = Arc::clone(&self.parser);
        let running = Arc::clone(&self.running);
        let exit_status = Arc::clone(&self.exit_status);

        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let mut osc = OscScanner::default();
            let mut last_title = String::new();
            let mut last_bell = 0usize;

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let bytes = &buf[..n];
                        let (title, bells) = {
                            let mut p = match parser.lock() {
                                Ok(p) => p,
                                Err(_) => break,
                            };
                            p.process(bytes);
                            let screen = p.screen();
                            (screen.title().to_string(), screen.audible_bell_count())
                        };

                        let _ = events.send(SessionEvent::OutputChanged(id));
                        if title != last_title {
                            last_title = title;
                            let _ = events.send(SessionEvent::TitleChanged(id));
                        }
                        if bells > last_bell {
                            last_bell = bells;
                            let _ = events.send(SessionEvent::Bell(id));
                        }
                        for event in osc.scan(bytes) {
                            match event {
                                OscEvent::Clipboard(text) => {
                                    let _ = events.send(SessionEvent::ClipboardText(id, text));
                                }
                                OscEvent::ColorsChanged => {
                                    let _ = events.send(SessionEvent::ColorsChanged(id));
                                }
                            }
                        }
                    }
                    Err(_) => break,
                }
            }

            let status = child
                .wait()
                .map(|s| s.exit_code() as i32)
                .unwrap_or(-1);
            if let Ok(mut slot) = exit_status.lock() {
                *slot = Some(status);
            }
            running.store(false, Ordering::SeqCst);
            let _ = events.send(SessionEvent::Finished(id, status));
        });
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The process label the session was launched as.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set iff the process has actually exited.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status.lock().ok().and_then(|s| *s)
    }

    /// User-settable session name; empty when unset.
    pub fn name(&self) -> String {
        self.name.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn set_name(&self, name: &str) {
        if let Ok(mut slot) = self.name.lock() {
            *slot = name.to_string();
        }
    }

    /// Title reported by the running process via the emulator; empty when the
    /// process has not set one.
    pub fn title(&self) -> String {
        self.parser
            .lock()
            .map(|p| p.screen().title().to_string())
            .unwrap_or_default()
    }

    /// Presentation label: `[index] name title`, skipping empty parts.
    pub fn display_label(&self, index: usize) -> String {
        let mut label = format!("[{}]", index + 1);
        let name = self.name();
        if !name.is_empty() {
            label.push(' ');
            label.push_str(&name);
        }
        let title = self.title();
        if !title.is_empty() {
            label.push(' ');
            label.push_str(&title);
        }
        label
    }

    pub fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("writer lock poisoned"))?;
        writer.write_all(data)?;
        writer.flush()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> std::io::Result<()> {
        if let Ok(master) = self.master.lock() {
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        if let Ok(mut parser) = self.parser.lock() {
            parser.set_size(rows, cols);
        }
        Ok(())
    }

    /// Plain-text contents of the emulated screen, for the view layer.
    pub fn screen_contents(&self) -> String {
        self.parser
            .lock()
            .map(|p| p.screen().contents())
            .unwrap_or_default()
    }

    /// Reset the emulation state (RIS).
    pub fn reset(&self) {
        if let Ok(mut parser) = self.parser.lock() {
            parser.process(b"\x1bc");
        }
    }

    /// Ask the process to terminate. Does nothing for an already finished
    /// session; never waits.
    pub fn finish_if_running(&self) {
        if !self.is_running() {
            return;
        }
        if self.pid != 0 {
            match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGHUP) {
                Ok(()) => return,
                Err(err) => {
                    warn!(pid = self.pid, %err, "SIGHUP failed, falling back to kill");
                }
            }
        }
        if let Ok(mut killer) = self.killer.lock() {
            let _ = killer.kill();
        }
    }
}

/// What the OSC scanner can surface beyond what vt100 exposes.
enum OscEvent {
    Clipboard(String),
    ColorsChanged,
}

const MAX_PENDING_OSC: usize = 8192;

/// Incremental scanner for OSC sequences that may split across reads.
#[derive(Default)]
struct OscScanner {
    pending: Vec<u8>,
}

impl OscScanner {
    fn scan(&mut self, chunk: &[u8]) -> Vec<OscEvent> {
        self.pending.extend_from_slice(chunk);
        let buf = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        let mut pos = 0;

        while let Some(offset) = find_osc_start(&buf[pos..]) {
            let start = pos + offset;
            match find_terminator(&buf[start + 2..]) {
                Some((body_len, term_len)) => {
                    if let Some(event) = parse_osc_body(&buf[start + 2..start + 2 + body_len]) {
                        events.push(event);
                    }
                    pos = start + 2 + body_len + term_len;
                }
                None => {
                    // Unterminated sequence; carry it into the next read
                    // unless it has grown past any sane size.
                    if buf.len() - start <= MAX_PENDING_OSC {
                        self.pending = buf[start..].to_vec();
                    }
                    return events;
                }
            }
        }

        // A lone trailing ESC may be the start of the next introducer.
        if buf.last() == Some(&0x1b) {
            self.pending.push(0x1b);
        }
        events
    }
}

fn find_osc_start(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == [0x1b, b']'])
}

/// Length of the sequence body and of its terminator (BEL or ST).
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    for (i, &byte) in buf.iter().enumerate() {
        if byte == 0x07 {
            return Some((i, 1));
        }
        if byte == 0x1b && buf.get(i + 1) == Some(&b'\\') {
            return Some((i, 2));
        }
    }
    None
}

fn parse_osc_body(body: &[u8]) -> Option<OscEvent> {
    let text = String::from_utf8_lossy(body);
    let mut fields = text.splitn(2, ';');
    let code = fields.next()?;
    let rest = fields.next().unwrap_or("");

    match code {
        // OSC 52: clipboard write. Payload is `Pc;<base64>`; queries ("?")
        // are not clipboard content.
        "52" => {
            let payload = rest.rsplit(';').next().unwrap_or("");
            if payload.is_empty() || payload == "?" {
                return None;
            }
            let decoded = BASE64.decode(payload).ok()?;
            Some(OscEvent::Clipboard(
                String::from_utf8_lossy(&decoded).into_owned(),
            ))
        }
        // Palette and default color changes.
        "4" | "10" | "11" | "12" | "104" | "110" | "111" => Some(OscEvent::ColorsChanged),
        _ => None,
    }
}
