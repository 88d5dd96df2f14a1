//! Terminal dashboard for a single BLE central session
//!
//! Run with: cargo run --example session_dashboard
//!
//! One list shows the discovered peripherals while scanning. Once a session
//! exists the same list shows its services, its characteristics and the last
//! received value.
//!
//! ## Keyboard Controls
//!
//! | Key | Action |
//! |-----|--------|
//! | `Up/Down` | Navigate peripheral list |
//! | `Enter` | Connect to selected peripheral |
//! | `D` | Disconnect |
//! | `W` | Send a message to the last characteristic |
//! | `S` | Start/stop scanning |
//! | `Q/Esc` | Quit |

use ble_central_session::{
    display_uuid, service_name, BtleplugCentral, ConnectionState, DiscoveredPeripheral, Result,
    SessionConfig, SessionEvent, SessionManager,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{block::Title, *},
};
use std::io::{self, stdout, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Log severity level
#[derive(Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn style(&self) -> Style {
        match self {
            LogLevel::Info => Style::default().fg(Color::Cyan),
            LogLevel::Warn => Style::default().fg(Color::Yellow),
            LogLevel::Error => Style::default().fg(Color::Red),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Event log entry
struct LogEntry {
    timestamp: Instant,
    level: LogLevel,
    message: String,
}

/// Application state
struct App {
    manager: Arc<SessionManager<BtleplugCentral>>,
    events: broadcast::Receiver<SessionEvent>,
    peripherals: Vec<DiscoveredPeripheral>,
    selected: usize,
    event_log: Vec<LogEntry>,
    start_time: Instant,
}

impl App {
    async fn new() -> Result<Self> {
        let (manager, _pump) = SessionManager::with_btleplug(SessionConfig::default()).await?;
        let events = manager.subscribe();

        Ok(Self {
            manager,
            events,
            peripherals: Vec::new(),
            selected: 0,
            event_log: Vec::new(),
            start_time: Instant::now(),
        })
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.event_log.push(LogEntry {
            timestamp: Instant::now(),
            level,
            message: message.into(),
        });
        if self.event_log.len() > 200 {
            self.event_log.remove(0);
        }
    }

    /// Pull pending events into the log and refresh the list.
    fn update(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.record_event(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.log(LogLevel::Warn, format!("Skipped {} events", skipped));
                }
                Err(_) => break,
            }
        }

        self.peripherals = self.manager.discovered_peripherals();
        if self.selected >= self.peripherals.len() {
            self.selected = self.peripherals.len().saturating_sub(1);
        }
    }

    fn record_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AdapterStateChanged(state) => {
                self.log(LogLevel::Info, format!("Adapter {}", state));
            }
            SessionEvent::PeripheralDiscovered(_) => {}
            SessionEvent::SessionStateChanged { peripheral, state } => {
                self.log(LogLevel::Info, format!("{}: {}", peripheral, state));
            }
            SessionEvent::ValueReceived {
                characteristic,
                value,
            } => {
                self.log(
                    LogLevel::Info,
                    format!(
                        "{} -> {}",
                        display_uuid(&characteristic),
                        String::from_utf8_lossy(&value)
                    ),
                );
            }
            SessionEvent::SessionFailed(failure) => {
                self.log(LogLevel::Error, failure.to_string());
            }
        }
    }

    fn select_next(&mut self) {
        if !self.peripherals.is_empty() {
            self.selected = (self.selected + 1) % self.peripherals.len();
        }
    }

    fn select_prev(&mut self) {
        if !self.peripherals.is_empty() {
            self.selected = self
                .selected
                .checked_sub(1)
                .unwrap_or(self.peripherals.len() - 1);
        }
    }

    fn toggle_scanning(&mut self) {
        let result = if self.manager.is_scanning() {
            self.manager.stop_scan()
        } else {
            self.manager.start_scan()
        };
        if let Err(e) = result {
            self.log(LogLevel::Error, e.to_string());
        }
    }

    fn connect_selected(&mut self) {
        let Some(peripheral) = self.peripherals.get(self.selected).cloned() else {
            return;
        };
        self.log(
            LogLevel::Info,
            format!("Connecting to {}", peripheral.display_name()),
        );
        if let Err(e) = self.manager.connect(&peripheral.id) {
            self.log(LogLevel::Error, e.to_string());
        }
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.manager.disconnect() {
            self.log(LogLevel::Error, e.to_string());
        }
    }

    fn send_message(&mut self) {
        match self.manager.send_message(b"Message from central") {
            Ok(()) => self.log(LogLevel::Info, "Message sent"),
            Err(e) => self.log(LogLevel::Warn, e.to_string()),
        }
    }
}

/// Main terminal type alias
type Terminal = ratatui::Terminal<CrosstermBackend<Stdout>>;

fn setup_terminal() -> io::Result<Terminal> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

fn render_ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Min(10),    // List
            Constraint::Length(10), // Event log
            Constraint::Length(1),  // Status bar
        ])
        .split(frame.area());

    render_header(frame, chunks[0], app);
    if app.manager.session().is_some() {
        render_session(frame, chunks[1], app);
    } else {
        render_peripheral_list(frame, chunks[1], app);
    }
    render_event_log(frame, chunks[2], app);
    render_status_bar(frame, chunks[3], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let elapsed = app.start_time.elapsed();
    let title = format!(
        " BLE CENTRAL SESSION | Adapter: {} | Uptime: {:02}:{:02}:{:02} ",
        app.manager.adapter_state(),
        elapsed.as_secs() / 3600,
        (elapsed.as_secs() % 3600) / 60,
        elapsed.as_secs() % 60
    );

    let header = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Title::from(title).alignment(Alignment::Center))
        .title(
            Title::from(" [Q] Quit ")
                .alignment(Alignment::Right)
                .position(block::Position::Top),
        );

    frame.render_widget(header, area);
}

fn render_peripheral_list(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .peripherals
        .iter()
        .enumerate()
        .map(|(i, peripheral)| {
            let style = if i == app.selected {
                Style::default().bg(Color::DarkGray).fg(Color::White)
            } else if !peripheral.connectable {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            let rssi = peripheral
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "? dBm".to_string());

            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<24} ", peripheral.display_name()), style),
                Span::styled(format!("{:>8} ", rssi), style),
                Span::styled(peripheral.id.to_string(), style),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Discovered Peripherals ")
            .title(
                Title::from(if app.manager.is_scanning() {
                    " [Scanning] "
                } else {
                    " [Stopped] "
                })
                .alignment(Alignment::Right),
            ),
    );

    frame.render_widget(list, area);
}

fn render_session(frame: &mut Frame, area: Rect, app: &App) {
    let Some(session) = app.manager.session() else {
        return;
    };

    let mut items: Vec<ListItem> = Vec::new();
    items.push(ListItem::new(Line::from(Span::styled(
        "Services",
        Style::default().add_modifier(Modifier::BOLD),
    ))));
    for service in &session.services {
        let name = service_name(&service.uuid).unwrap_or("");
        items.push(ListItem::new(format!("  {} {}", display_uuid(&service.uuid), name)));
    }

    items.push(ListItem::new(Line::from(Span::styled(
        "Characteristics",
        Style::default().add_modifier(Modifier::BOLD),
    ))));
    for characteristic in &session.characteristics {
        let style = if characteristic.notifying {
            Style::default().fg(Color::Green)
        } else {
            Style::default()
        };
        let flags = format!(
            "{}{}",
            if characteristic.can_notify() { "N" } else { "-" },
            if characteristic.can_write() { "W" } else { "-" },
        );
        items.push(ListItem::new(Line::from(Span::styled(
            format!("  {} {}", flags, display_uuid(&characteristic.uuid)),
            style,
        ))));
    }

    items.push(ListItem::new(Line::from(Span::styled(
        "Last value",
        Style::default().add_modifier(Modifier::BOLD),
    ))));
    let last = session
        .last_payload
        .as_ref()
        .and_then(|p| p.text.clone())
        .unwrap_or_else(|| "-".to_string());
    items.push(ListItem::new(format!("  {}", last)));

    let state_color = match session.state {
        ConnectionState::Subscribed => Color::Green,
        ConnectionState::Disconnected => Color::Red,
        state if state.is_transitioning() => Color::Magenta,
        state if state.is_discovering() => Color::Blue,
        _ => Color::Yellow,
    };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", session.peripheral_id))
            .title(
                Title::from(Span::styled(
                    format!(" [{}] ", session.state),
                    Style::default().fg(state_color),
                ))
                .alignment(Alignment::Right),
            ),
    );

    frame.render_widget(list, area);
}

fn render_event_log(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .event_log
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| {
            let elapsed = entry.timestamp.elapsed();
            let mins = elapsed.as_secs() / 60;
            let secs = elapsed.as_secs() % 60;

            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:02}:{:02} ", mins, secs),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("[{}] ", entry.level.label()), entry.level.style()),
                Span::raw(&entry.message),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Event Log "));

    frame.render_widget(list, area);
}

fn render_status_bar(frame: &mut Frame, area: Rect, app: &App) {
    let status = format!(
        " Peripherals: {} | Session: {} | [Enter] Connect [D] Disconnect [W] Write [S] Scan ",
        app.peripherals.len(),
        app.manager.connection_state()
    );

    let paragraph =
        Paragraph::new(status).style(Style::default().bg(Color::DarkGray).fg(Color::White));

    frame.render_widget(paragraph, area);
}

async fn run_app(terminal: &mut Terminal, mut app: App) -> Result<()> {
    // Give the adapter a moment to report power-on, then scan
    tokio::time::sleep(Duration::from_millis(500)).await;
    app.toggle_scanning();

    loop {
        app.update();

        terminal
            .draw(|frame| render_ui(frame, &app))
            .map_err(|e| ble_central_session::Error::Internal(format!("Draw error: {}", e)))?;

        let has_event = event::poll(Duration::from_millis(100))
            .map_err(|e| ble_central_session::Error::Internal(format!("Poll error: {}", e)))?;

        if has_event {
            let event = event::read()
                .map_err(|e| ble_central_session::Error::Internal(format!("Read error: {}", e)))?;

            if let Event::Key(key) = event {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => break,
                        KeyCode::Down => app.select_next(),
                        KeyCode::Up => app.select_prev(),
                        KeyCode::Enter => app.connect_selected(),
                        KeyCode::Char('d') | KeyCode::Char('D') => app.disconnect(),
                        KeyCode::Char('w') | KeyCode::Char('W') => app.send_message(),
                        KeyCode::Char('s') | KeyCode::Char('S') => app.toggle_scanning(),
                        _ => {}
                    }
                }
            }
        }

        // Let the pump and callback tasks run
        tokio::task::yield_now().await;
    }

    app.manager.shutdown()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to a file so output does not interfere with the TUI
    if let Ok(log_file) = std::fs::File::create("session_dashboard.log") {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("ble_central_session=debug".parse().unwrap()),
            )
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(log_file))
            .init();
    }

    // Setup terminal
    let mut terminal = setup_terminal().map_err(|e| {
        ble_central_session::Error::Internal(format!("Failed to setup terminal: {}", e))
    })?;

    let app = match App::new().await {
        Ok(app) => app,
        Err(e) => {
            let _ = restore_terminal(&mut terminal);
            return Err(e);
        }
    };

    let result = run_app(&mut terminal, app).await;

    // Restore terminal
    let _ = restore_terminal(&mut terminal);

    result
}
