use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::api::RecordFetcher;
use crate::domain::{Identity, ScanState};
use crate::scanner::{ScanReport, Scanner};

const EVENTS_MAX: usize = 8;

#[derive(Debug)]
struct ViewState {
    processed: usize,
    total: usize,
    status: String,
    events: VecDeque<String>,
}

/// Interactive progress view for one scan. `p` pauses, `r` resumes,
/// `c`/`q`/Esc cancels.
pub struct Tui {
    state: Arc<Mutex<ViewState>>,
    started: Instant,
}

impl Default for Tui {
    fn default() -> Self {
        Self::new()
    }
}

impl Tui {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ViewState {
                processed: 0,
                total: 0,
                status: "starting".to_string(),
                events: VecDeque::new(),
            })),
            started: Instant::now(),
        }
    }

    pub fn run<F: RecordFetcher + 'static>(
        &mut self,
        scanner: &mut Scanner<F>,
        identities: Vec<Identity>,
    ) -> miette::Result<ScanReport> {
        let progress_state = self.state.clone();
        scanner.set_progress_callback(move |processed, total| {
            if let Ok(mut state) = progress_state.lock() {
                state.processed = processed;
                state.total = total;
            }
        });
        let status_state = self.state.clone();
        scanner.set_status_callback(move |message| {
            if let Ok(mut state) = status_state.lock() {
                state.status = message.to_string();
                push_event(&mut state.events, message.to_string());
            }
        });

        if let Ok(mut state) = self.state.lock() {
            state.total = identities.len();
        }
        self.started = Instant::now();
        scanner.start(identities)?;

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let outcome = loop {
            scanner.pump_events();
            let scan_state = scanner.state().clone();
            if let Ok(state) = self.state.lock() {
                let elapsed = self.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, &state, &scan_state, elapsed))
                    .into_diagnostic()?;
            }

            if scanner.is_finished() {
                break scanner.wait();
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    handle_key(scanner, key);
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        outcome.map_err(miette::Report::new)
    }
}

fn handle_key<F: RecordFetcher + 'static>(scanner: &mut Scanner<F>, key: KeyEvent) {
    if key.kind != KeyEventKind::Press {
        return;
    }
    match key.code {
        KeyCode::Char('p') | KeyCode::Char(' ') => scanner.pause(),
        KeyCode::Char('r') => scanner.resume(),
        KeyCode::Char('c') | KeyCode::Char('q') | KeyCode::Esc => scanner.cancel(),
        _ => {}
    }
}

fn draw_ui(frame: &mut ratatui::Frame, state: &ViewState, scan_state: &ScanState, elapsed: Duration) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(2),
        ])
        .split(frame.area());

    let state_color = match scan_state {
        ScanState::Running => Color::Cyan,
        ScanState::Paused => Color::Yellow,
        ScanState::Completed => Color::Green,
        ScanState::Cancelled | ScanState::Failed(_) => Color::Red,
        ScanState::Idle => Color::Gray,
    };
    let header = Paragraph::new(vec![Line::from(vec![
        Span::styled(
            "SPT-SCAN",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   State: "),
        Span::styled(scan_state.to_string(), Style::default().fg(state_color)),
        Span::raw(format!("   Elapsed: {}s", elapsed.as_secs())),
    ])])
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let ratio = if state.total == 0 {
        0.0
    } else {
        (state.processed as f64 / state.total as f64).clamp(0.0, 1.0)
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(state_color))
        .ratio(ratio)
        .label(format!("{}/{}", state.processed, state.total));
    frame.render_widget(gauge, chunks[1]);

    let mut lines = vec![Line::from(vec![
        Span::styled("Status: ", Style::default().fg(Color::Gray)),
        Span::raw(state.status.clone()),
    ])];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    let events = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Recent"))
        .wrap(Wrap { trim: true });
    frame.render_widget(events, chunks[2]);

    let keys = Paragraph::new(Line::from(Span::styled(
        "p pause   r resume   c cancel",
        Style::default().fg(Color::Gray),
    )));
    frame.render_widget(keys, chunks[3]);
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}
