use crate::{
    config::AppConfig,
    ledger::{BreakdownRow, TeamTotals},
    report::{format_cost, format_token_count, render_compact},
    usage::LedgerSnapshot,
};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
};
use std::{
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;

pub async fn run(config: Arc<AppConfig>, snapshots: watch::Receiver<LedgerSnapshot>) -> Result<()> {
    let tick = tick_rate(config.display.refresh_hz);
    let source = config.events.path.clone();

    tokio::task::spawn_blocking(move || run_blocking(source, snapshots, tick)).await?
}

/// Redraw interval for a refresh rate, never shorter than 1 ms.
fn tick_rate(refresh_hz: u64) -> Duration {
    Duration::from_millis((1000 / refresh_hz.max(1)).max(1))
}

fn run_blocking(
    source: PathBuf,
    snapshots: watch::Receiver<LedgerSnapshot>,
    tick_rate: Duration,
) -> Result<()> {
    let mut terminal = setup_terminal()?;

    let loop_result: Result<()> = (|| -> Result<()> {
        loop {
            let view = SidebarView::from_snapshot(&snapshots.borrow());

            terminal.draw(|frame| draw_ui(frame, &source, &view))?;

            if event::poll(tick_rate)? {
                if let Event::Key(key) = event::read()? {
                    if key.code == KeyCode::Char('q')
                        || (key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL))
                    {
                        break Ok(());
                    }
                }
            }
        }
    })();

    let restore_result = restore_terminal(terminal);

    match (loop_result, restore_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(loop_err), Ok(())) => Err(loop_err),
        (Ok(()), Err(restore_err)) => Err(restore_err),
        (Err(loop_err), Err(restore_err)) => Err(loop_err.context(restore_err.to_string())),
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;
    Ok(terminal)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(())
}

/// Everything one frame needs, computed from a published ledger snapshot.
struct SidebarView {
    title: String,
    totals: TeamTotals,
    rows: Vec<BreakdownRow>,
    events_recorded: u64,
    active_session: Option<String>,
    updated: Option<String>,
}

impl SidebarView {
    fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        Self {
            title: snapshot.session_title().to_string(),
            totals: snapshot.ledger.render_totals(),
            rows: snapshot.ledger.session_breakdown_rows(),
            events_recorded: snapshot.events_recorded,
            active_session: snapshot.ledger.active_session_id().map(str::to_string),
            updated: snapshot
                .updated_at
                .map(|ts| ts.with_timezone(&chrono::Local).format("%H:%M:%S").to_string()),
        }
    }

    fn status_line(&self, source: &Path) -> String {
        let updated = self.updated.as_deref().unwrap_or("waiting for events");
        let mut line = format!(
            "{} | {} events | last update {}",
            source.display(),
            format_token_count(self.events_recorded),
            updated
        );
        if let Some(active) = self.active_session.as_deref() {
            line.push_str(" | active ");
            line.push_str(active);
        }
        line
    }
}

fn draw_ui(frame: &mut Frame, source: &Path, view: &SidebarView) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(5)])
        .split(frame.size());

    render_totals(frame, layout[0], source, view);
    render_breakdown(frame, layout[1], &view.rows);
}

fn render_totals(frame: &mut Frame, area: Rect, source: &Path, view: &SidebarView) {
    let lines = vec![
        Line::styled(
            render_compact(&view.totals),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Line::styled(view.status_line(source), Style::default().fg(Color::DarkGray)),
    ];
    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .title(format!("{} (press 'q' to quit)", view.title))
            .borders(Borders::ALL),
    );
    frame.render_widget(paragraph, area);
}

fn render_breakdown(frame: &mut Frame, area: Rect, rows: &[BreakdownRow]) {
    let header = Row::new(vec!["Agent", "Input", "Output", "Tokens", "Context", "Cost"]).style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let table_rows: Vec<Row> = if rows.is_empty() {
        vec![Row::new(vec!["No session usage yet", "–", "–", "–", "–", "–"])]
    } else {
        rows.iter()
            .map(|row| {
                let usage = &row.usage;
                let line = Row::new(vec![
                    Cell::from(row.label.clone()),
                    Cell::from(format_token_count(usage.input_tokens)),
                    Cell::from(format_token_count(usage.output_tokens)),
                    Cell::from(format_token_count(usage.total_tokens())),
                    Cell::from(format_context(usage.context_length, usage.context_limit)),
                    Cell::from(format_cost(usage.cost)),
                ]);
                if row.is_active {
                    line.style(
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD),
                    )
                } else {
                    line
                }
            })
            .collect()
    };

    let widths = [
        Constraint::Min(18),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(12),
        Constraint::Length(22),
        Constraint::Length(10),
    ];
    let table = Table::new(table_rows, widths)
        .header(header)
        .block(
            Block::default()
                .title("Session Breakdown")
                .borders(Borders::ALL),
        )
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn format_context(length: u64, limit: u64) -> String {
    if limit == 0 {
        return "–".to_string();
    }
    let percent = length as f64 / limit as f64 * 100.0;
    format!(
        "{}/{} ({:.0}%)",
        format_token_count(length),
        format_token_count(limit),
        percent
    )
}
