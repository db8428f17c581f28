//! Driver for one serial-attached terminal.
//!
//! A background reader task tags every received line: leading `I` or `K`
//! are asynchronous events (RFID reads, keypresses), `#` and NUL are
//! comment/garbage, everything else answers the most recent request. The
//! foreground side writes one-line commands whose reply must echo the
//! command's first byte within two seconds; any timeout, mismatch or I/O
//! error sets the error flag, which makes the pump loop return so the
//! supervisor can reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use earl_core::constants::{
    DRAIN_SILENCE_WINDOW, IDLE_TICK, LIVENESS_TICK_INTERVAL, MAX_LCD_COLS, MAX_LCD_ROWS,
    RESPONSE_TIMEOUT,
};
use earl_core::{Error, Result, Tone};

use crate::codec::TerminalCodec;
use crate::traits::{Terminal, TerminalEventHandler};

type LineSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, TerminalCodec>;

pub struct SerialTerminal {
    name: String,
    writer: LineSink,
    response_rx: mpsc::Receiver<String>,
    event_rx: mpsc::Receiver<String>,
    error_state: Arc<AtomicBool>,
    last_lcd: [String; MAX_LCD_ROWS],
    log_prefix: String,
    reader: JoinHandle<()>,
}

impl SerialTerminal {
    /// Open the serial device and perform the connect handshake.
    pub async fn open(port: &str, baudrate: u32) -> Result<SerialTerminal> {
        let stream = tokio_serial::new(port, baudrate)
            .open_native_async()
            .map_err(|err| Error::SerialOpen {
                port: port.to_string(),
                reason: err.to_string(),
            })?;
        Self::from_stream(stream, &format!("{port}:{baudrate}")).await
    }

    /// Drive the protocol over any byte stream. Production wires in the
    /// serial port; tests use an in-memory duplex.
    pub async fn from_stream<S>(stream: S, label: &str) -> Result<SerialTerminal>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (event_tx, event_rx) = mpsc::channel(10);
        let (response_tx, response_rx) = mpsc::channel(10);
        let error_state = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(input_scan_loop(
            FramedRead::new(read_half, TerminalCodec::new()),
            event_tx,
            response_tx,
            error_state.clone(),
            label.to_string(),
        ));

        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let mut terminal = SerialTerminal {
            name: String::new(),
            writer: FramedWrite::new(write_half, TerminalCodec::new()),
            response_rx,
            event_rx,
            error_state,
            last_lcd: Default::default(),
            log_prefix: label.to_string(),
            reader,
        };

        terminal.discard_initial_input().await;
        terminal.name = terminal.request_name().await;
        if terminal.has_error() || terminal.name.is_empty() {
            terminal.shutdown();
            return Err(Error::NameHandshake {
                port: label.to_string(),
            });
        }
        Ok(terminal)
    }

    pub fn has_error(&self) -> bool {
        self.error_state.load(Ordering::SeqCst)
    }

    fn set_error(&self) {
        self.error_state.store(true, Ordering::SeqCst);
    }

    /// Tear the connection down. The reader task is stopped; a new
    /// terminal has to be constructed to talk again.
    pub fn shutdown(&self) {
        self.set_error();
        self.reader.abort();
    }

    /// Deliver terminal events to `handler` until an I/O problem or a
    /// failed liveness probe. Returning from here means reconnect.
    pub async fn run_event_loop<H: TerminalEventHandler>(&mut self, handler: &mut H) {
        handler.init(self).await;
        let mut tick_count: u32 = 0;
        let mut last_tick = Instant::now();

        while !self.has_error() {
            // If events come in back to back the idle arm below starves;
            // inject the tick handlers rely on for their timeouts.
            if last_tick.elapsed() > 4 * IDLE_TICK {
                handler.handle_tick(self).await;
                last_tick = Instant::now();
            }

            let line = tokio::select! {
                line = self.event_rx.recv() => match line {
                    Some(line) => Some(line),
                    None => break, // reader gone
                },
                _ = tokio::time::sleep(IDLE_TICK) => None,
            };

            match line {
                Some(line) => match line.as_bytes().first().copied() {
                    Some(b'I') => {
                        if let Some(rfid) = parse_rfid_event(&line[1..]) {
                            handler.handle_rfid(self, &rfid).await;
                        }
                    }
                    Some(b'K') => {
                        if let Some(&key) = line.as_bytes().get(1) {
                            handler.handle_keypress(self, key).await;
                        }
                    }
                    _ => warn!("{}: unexpected input '{line}'", self.log_prefix),
                },
                None => {
                    handler.handle_tick(self).await;
                    last_tick = Instant::now();
                    tick_count += 1;
                    if tick_count % LIVENESS_TICK_INTERVAL == 0 && !self.verify_connected().await {
                        break;
                    }
                }
            }
        }
        handler.handle_shutdown(self).await;
    }

    /// Send one command line and wait for its echo-tagged response.
    /// Empty return means the error flag is set.
    async fn send_and_await_response(&mut self, to_send: &str) -> String {
        if self.writer.send(to_send.to_string()).await.is_err() {
            self.set_error();
            return String::new();
        }
        match timeout(RESPONSE_TIMEOUT, self.response_rx.recv()).await {
            Ok(Some(result)) => {
                if result.as_bytes().first() == to_send.as_bytes().first() {
                    result
                } else {
                    warn!(
                        "{}: unexpected response, wanted '{}', got '{result}'",
                        self.log_prefix,
                        &to_send[..1]
                    );
                    self.set_error();
                    String::new()
                }
            }
            // The terminal answers instantly when alive. Timeout: bad.
            Ok(None) | Err(_) => {
                self.set_error();
                String::new()
            }
        }
    }

    /// The first connect may catch the line mid-garbage. Send one dummy
    /// name request to blow out the TX side and discard everything until
    /// a quiet window.
    async fn discard_initial_input(&mut self) {
        if self.writer.send("n".to_string()).await.is_err() {
            self.set_error();
            return;
        }
        loop {
            tokio::select! {
                event = self.event_rx.recv() => if event.is_none() { break },
                response = self.response_rx.recv() => if response.is_none() { break },
                _ = tokio::time::sleep(DRAIN_SILENCE_WINDOW) => break,
            }
        }
    }

    async fn request_name(&mut self) -> String {
        let result = self.send_and_await_response("n").await;
        if result.is_empty() {
            return String::new();
        }
        result[1..].trim().to_string()
    }

    /// Regularly confirm we still talk to the same terminal, catching
    /// cables plugged around between boxes.
    async fn verify_connected(&mut self) -> bool {
        let fresh = self.request_name().await;
        if self.has_error() {
            info!("{}: error pinging terminal '{}'", self.log_prefix, self.name);
            return false;
        }
        if fresh != self.name {
            info!(
                "{}: name change ('{fresh}', was '{}')",
                self.log_prefix, self.name
            );
            return false;
        }
        true
    }
}

impl Terminal for SerialTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_lcd(&mut self, row: usize, text: &str) {
        if row >= MAX_LCD_ROWS {
            return;
        }
        let text: String = text.chars().take(MAX_LCD_COLS).collect();
        let content = format!("M{row}{text}");
        if self.last_lcd[row] == content {
            return;
        }
        self.send_and_await_response(&content).await;
        self.last_lcd[row] = content;
    }

    async fn show_color(&mut self, colors: &str) {
        self.send_and_await_response(&format!("L{colors}")).await;
    }

    async fn buzz_speaker(&mut self, tone: Tone, duration: Duration) {
        self.send_and_await_response(&format!("T{}{}", tone.code(), duration.as_millis()))
            .await;
    }
}

impl Drop for SerialTerminal {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Background task: read lines off the wire and route them.
async fn input_scan_loop<R>(
    mut lines: FramedRead<R, TerminalCodec>,
    event_tx: mpsc::Sender<String>,
    response_tx: mpsc::Sender<String>,
    error_state: Arc<AtomicBool>,
    log_prefix: String,
) where
    R: AsyncRead + Unpin,
{
    while let Some(item) = lines.next().await {
        let line = match item {
            Ok(line) => line,
            Err(err) => {
                if !error_state.swap(true, Ordering::SeqCst) {
                    warn!("{log_prefix}: reading input: {err}");
                }
                return;
            }
        };
        match line.as_bytes().first().copied() {
            // Comment lines and obvious garbage.
            None | Some(b'#') | Some(0) => {}
            // Asynchronous events: keypresses and RFID reads.
            Some(b'I') | Some(b'K') => {
                if event_tx.send(line).await.is_err() {
                    return;
                }
            }
            // Everything else responds to something we requested.
            _ => {
                if response_tx.send(line).await.is_err() {
                    return;
                }
            }
        }
    }
    debug!("{log_prefix}: input stream ended");
    error_state.store(true, Ordering::SeqCst);
}

/// RFID events arrive as `<len> <hex>` with `len` counting tag bytes.
/// Only a payload whose hex length matches is surfaced, and handlers get
/// the bare hex code.
fn parse_rfid_event(payload: &str) -> Option<String> {
    let mut parts = payload.split_whitespace();
    let len: usize = parts.next()?.parse().ok()?;
    let hex = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    if !hex.is_empty() && hex.len() == 2 * len {
        Some(hex.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    /// What the simulated firmware on the far side of the line does.
    struct FirmwareScript {
        /// Names returned by successive `n` requests; the last one repeats.
        names: Vec<&'static str>,
        /// Event lines pushed unprompted before the first request arrives.
        unsolicited: Vec<&'static str>,
        /// Event lines pushed right after the handshake's name request.
        events_after_handshake: Vec<&'static str>,
        /// Reply to `T` requests with a wrong echo byte.
        garble_buzz: bool,
    }

    impl Default for FirmwareScript {
        fn default() -> Self {
            FirmwareScript {
                names: vec!["gate"],
                unsolicited: Vec::new(),
                events_after_handshake: Vec::new(),
                garble_buzz: false,
            }
        }
    }

    #[derive(Default)]
    struct FirmwareLog {
        /// Every `M` command line received, in order.
        lcd: Mutex<Vec<String>>,
    }

    fn spawn_firmware(
        stream: DuplexStream,
        script: FirmwareScript,
    ) -> Arc<FirmwareLog> {
        let log = Arc::new(FirmwareLog::default());
        let seen = log.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(stream);
            let mut lines = FramedRead::new(read_half, TerminalCodec::new());
            let mut out = FramedWrite::new(write_half, TerminalCodec::new());
            for event in &script.unsolicited {
                if out.send(event.to_string()).await.is_err() {
                    return;
                }
            }
            let mut name_requests = 0usize;
            while let Some(Ok(line)) = lines.next().await {
                let reply = match line.as_bytes().first().copied() {
                    Some(b'n') => {
                        let name = script.names[name_requests.min(script.names.len() - 1)];
                        name_requests += 1;
                        format!("n{name}")
                    }
                    Some(b'M') => {
                        seen.lcd.lock().unwrap().push(line.clone());
                        "Mok".to_string()
                    }
                    Some(b'T') if script.garble_buzz => "X".to_string(),
                    Some(b'T') => "Tok".to_string(),
                    Some(b'L') => "Lok".to_string(),
                    _ => continue,
                };
                if out.send(reply).await.is_err() {
                    return;
                }
                // The dummy drain request and the real one are both 'n'.
                if line.as_bytes().first().copied() == Some(b'n') && name_requests == 2 {
                    for event in &script.events_after_handshake {
                        if out.send(event.to_string()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        log
    }

    /// Handler double that records callbacks.
    #[derive(Default)]
    struct RecordingHandler {
        keys: Vec<u8>,
        rfids: Vec<String>,
        ticks: usize,
        shutdowns: usize,
    }

    impl TerminalEventHandler for RecordingHandler {
        async fn init(&mut self, _terminal: &mut impl Terminal) {}
        async fn handle_keypress(&mut self, _terminal: &mut impl Terminal, key: u8) {
            self.keys.push(key);
        }
        async fn handle_rfid(&mut self, _terminal: &mut impl Terminal, rfid: &str) {
            self.rfids.push(rfid.to_string());
        }
        async fn handle_tick(&mut self, _terminal: &mut impl Terminal) {
            self.ticks += 1;
        }
        async fn handle_shutdown(&mut self, _terminal: &mut impl Terminal) {
            self.shutdowns += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_reports_name() {
        let (near, far) = tokio::io::duplex(1024);
        spawn_firmware(far, FirmwareScript::default());

        let terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        assert_eq!(terminal.name(), "gate");
        assert!(!terminal.has_error());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_survives_initial_garbage() {
        let (near, far) = tokio::io::duplex(1024);
        spawn_firmware(
            far,
            FirmwareScript {
                unsolicited: vec!["#boot noise", "K3"],
                ..Default::default()
            },
        );

        let terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        assert_eq!(terminal.name(), "gate");
    }

    #[tokio::test(start_paused = true)]
    async fn dead_line_fails_the_handshake() {
        let (near, far) = tokio::io::duplex(1024);
        // Nobody on the other end: hold the far side open but mute.
        let result = SerialTerminal::from_stream(near, "test").await;
        drop(far);
        assert!(matches!(result, Err(Error::NameHandshake { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn lcd_writes_truncate_and_suppress_repeats() {
        let (near, far) = tokio::io::duplex(1024);
        let log = spawn_firmware(far, FirmwareScript::default());

        let mut terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        let long = "a line much longer than the display has columns";
        terminal.write_lcd(0, long).await;
        terminal.write_lcd(0, long).await; // identical: not retransmitted
        terminal.write_lcd(1, "second row").await;
        terminal.write_lcd(9, "no such row").await;

        let lcd = log.lcd.lock().unwrap();
        assert_eq!(lcd.len(), 2);
        // Truncated to the 24 display columns, row prefix in front.
        assert_eq!(lcd[0], "M0a line much longer than ");
        assert_eq!(lcd[1], "M1second row");
    }

    #[tokio::test(start_paused = true)]
    async fn response_echo_mismatch_sets_error() {
        let (near, far) = tokio::io::duplex(1024);
        spawn_firmware(
            far,
            FirmwareScript {
                garble_buzz: true,
                ..Default::default()
            },
        );

        let mut terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        terminal
            .buzz_speaker(Tone::High, Duration::from_millis(500))
            .await;
        assert!(terminal.has_error());
    }

    #[tokio::test(start_paused = true)]
    async fn pump_loop_routes_events_to_the_handler() {
        let (near, far) = tokio::io::duplex(1024);
        // Events right after the handshake; later liveness probes see a
        // different name, which is the loop's exit.
        spawn_firmware(
            far,
            FirmwareScript {
                names: vec!["gate", "gate", "elevator"],
                events_after_handshake: vec!["K1", "K#", "I4 deadbeef", "I4 dead", "I4"],
                ..Default::default()
            },
        );

        let mut terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        let mut handler = RecordingHandler::default();
        terminal.run_event_loop(&mut handler).await;

        assert_eq!(handler.keys, vec![b'1', b'#']);
        // Only the well-formed RFID payload surfaces, as bare hex.
        assert_eq!(handler.rfids, vec!["deadbeef".to_string()]);
        assert_eq!(handler.shutdowns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_probe_detects_renamed_terminal() {
        let (near, far) = tokio::io::duplex(1024);
        // Handshake answers "gate" (dummy and real request), later probes
        // see "elevator": someone replugged the cable.
        spawn_firmware(
            far,
            FirmwareScript {
                names: vec!["gate", "gate", "elevator"],
                ..Default::default()
            },
        );

        let mut terminal = SerialTerminal::from_stream(near, "test").await.unwrap();
        let mut handler = RecordingHandler::default();
        // Paused time auto-advances: ten idle ticks pass, the probe runs
        // and the loop exits on the name change.
        terminal.run_event_loop(&mut handler).await;

        assert!(handler.ticks >= LIVENESS_TICK_INTERVAL as usize);
        assert_eq!(handler.shutdowns, 1);
    }

    #[test]
    fn rfid_payload_parsing() {
        assert_eq!(parse_rfid_event("4 deadbeef"), Some("deadbeef".to_string()));
        assert_eq!(parse_rfid_event("8  04a224b9c15e80"), None); // 14 != 16
        assert_eq!(parse_rfid_event("4 dead"), None);
        assert_eq!(parse_rfid_event("4"), None);
        assert_eq!(parse_rfid_event(""), None);
        assert_eq!(parse_rfid_event("x deadbeef"), None);
        assert_eq!(parse_rfid_event("4 dead beef"), None);
        assert_eq!(parse_rfid_event("0 "), None);
    }
}
