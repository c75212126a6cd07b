use chrono::{DateTime, Utc};
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};

use crate::actions::ActionState;
use crate::app::{App, InputMode};
use crate::model::{ResourceItem, relative_age};
use crate::state::{ChannelStatus, CollectionState, Phase};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);

pub fn render(frame: &mut Frame, app: &App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let scope = app.scope();
    let snapshot = app.snapshot();
    let (phase_fg, phase_bg) = match snapshot.phase {
        Phase::Error => (Color::Black, ERROR),
        Phase::Loading => (Color::Black, WARN),
        Phase::Loaded | Phase::Idle => (Color::White, PL_D),
    };

    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(app.backend(), 28)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" project {} / cluster {} ", scope.project.0, scope.cluster.0),
        Color::White,
        PL_B,
        PL_C,
    );
    push_powerline_segment(
        &mut spans,
        format!(" ns {} ", compact_text(scope.namespace_label(), 24)),
        Color::White,
        PL_C,
        phase_bg,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {} ", snapshot.phase.title()),
        phase_fg,
        phase_bg,
        BG,
    );
    spans.push(Span::styled(
        format!("  {}", channel_label(&snapshot.channel)),
        Style::default().fg(channel_color(&snapshot.channel)),
    ));

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(area);

    render_table(frame, chunks[0], app);
    render_detail(frame, chunks[1], app);
}

fn render_table(frame: &mut Frame, area: Rect, app: &App) {
    let snapshot = app.snapshot();
    let mut title = format!("Resources ({})", snapshot.items.len());
    if snapshot.is_stale() {
        title.push_str(" · stale");
    }
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if snapshot.phase == Phase::Error {
            Style::default().fg(ERROR)
        } else {
            Style::default().fg(ACCENT)
        })
        .style(Style::default().bg(PANEL));

    if let Some((message, color)) = placeholder(snapshot) {
        let panel = Paragraph::new(Text::from(message))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block)
            .style(Style::default().fg(color));
        frame.render_widget(panel, area);
        return;
    }

    let headers = ["Name", "Namespace", "Status", "Ref", "Updated", "Action"];
    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(*header).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let now = Utc::now();
    let rows = snapshot
        .items
        .iter()
        .map(|item| item_row(snapshot, item, now));
    let constraints = [
        Constraint::Percentage(30),
        Constraint::Percentage(14),
        Constraint::Percentage(16),
        Constraint::Percentage(10),
        Constraint::Percentage(10),
        Constraint::Percentage(20),
    ];

    let table = Table::new(rows, constraints)
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let mut state = TableState::default();
    state.select(app.selected_index());
    frame.render_stateful_widget(table, area, &mut state);
}

fn item_row<'a>(snapshot: &CollectionState, item: &'a ResourceItem, now: DateTime<Utc>) -> Row<'a> {
    let (action, action_color) = action_cell(snapshot, item);
    Row::new(vec![
        Cell::from(item.name.as_str()).style(Style::default().fg(Color::White)),
        Cell::from(item.namespace.as_deref().unwrap_or("-")).style(Style::default().fg(MUTED)),
        Cell::from(item.status.label()).style(Style::default().fg(status_color(item))),
        Cell::from(item.reference()).style(Style::default().fg(MUTED)),
        Cell::from(relative_age(item.updated_at, now)).style(Style::default().fg(MUTED)),
        Cell::from(action).style(Style::default().fg(action_color)),
    ])
}

fn render_detail(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .title("Details")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(MUTED))
        .style(Style::default().bg(PANEL));

    let Some(item) = app.selected_item() else {
        frame.render_widget(
            Paragraph::new("Nothing selected")
                .block(block)
                .style(Style::default().fg(MUTED)),
            area,
        );
        return;
    };

    let mut lines = vec![
        detail_line("kind", item.kind.title().to_string()),
        detail_line("name", item.name.clone()),
        detail_line("status", item.status.label()),
        detail_line("updated", item.updated_at.format("%Y-%m-%d %H:%M UTC").to_string()),
    ];
    let details = &item.details;
    if let Some(revision) = details.revision {
        lines.push(detail_line("revision", revision.to_string()));
    }
    if let Some(chart) = &details.chart {
        lines.push(detail_line("chart", chart.clone()));
    }
    if let Some(title) = &details.pr_title {
        lines.push(detail_line("pull request", title.clone()));
    }
    if let Some(url) = item.pull_request_url() {
        lines.push(detail_line("link", url));
    }
    if let Some(merge) = item.merge_info() {
        lines.push(detail_line("merge", merge));
    }
    if let Some(subdomain) = &details.subdomain {
        lines.push(detail_line("url", format!("https://{subdomain}")));
    }
    if let Some(workflow) = &details.last_workflow_url {
        lines.push(detail_line("workflow", workflow.clone()));
    }
    if app.snapshot().awaiting_refresh(&item.id) {
        lines.push(Line::from(Span::styled(
            "waiting for updated status…",
            Style::default().fg(WARN),
        )));
    }

    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(block),
        area,
    );
}

fn detail_line(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:>12} "), Style::default().fg(MUTED)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let confirming = app.input_mode() == InputMode::Confirm;
    let (mode_label, mode_fg, mode_bg) = if confirming {
        (" confirm ", Color::Black, WARN)
    } else {
        (" nrm ", Color::White, PL_A)
    };
    let status_bg = if confirming { WARN } else { PL_B };
    let status_fg = if confirming { Color::Black } else { Color::White };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, mode_label, mode_fg, mode_bg, status_bg);
    let width_hint = area.width.saturating_sub(12).max(24) as usize;
    let status = match app.confirmation_prompt() {
        Some(prompt) => format!("{prompt}? [y/n]"),
        None => app.status().to_string(),
    };
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&status, width_hint)),
        status_fg,
        status_bg,
        BG,
    );
    if !confirming && area.width > 100 {
        spans.push(Span::styled(
            "  j/k move · d delete · e activate · r re-run · R refresh · tab ns · a all · q quit",
            Style::default().fg(MUTED),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

/// Message shown instead of the table when there are no rows to draw.
fn placeholder(snapshot: &CollectionState) -> Option<(&'static str, Color)> {
    if snapshot.is_empty_result() {
        return Some(("No resources found in this namespace.", MUTED));
    }
    if !snapshot.items.is_empty() {
        return None;
    }

    match snapshot.phase {
        Phase::Idle | Phase::Loaded => Some(("Waiting for a scope…", MUTED)),
        Phase::Loading => Some(("Loading resources…", WARN)),
        Phase::Error => Some(("Error connecting to cluster.", ERROR)),
    }
}

fn action_cell(snapshot: &CollectionState, item: &ResourceItem) -> (String, Color) {
    match snapshot.action_state(&item.id) {
        ActionState::Running(kind) => (kind.progress_label().to_string(), WARN),
        ActionState::Failed(kind) => (format!("{} failed", kind.title().to_lowercase()), ERROR),
        ActionState::Idle if snapshot.awaiting_refresh(&item.id) => ("refreshing…".to_string(), MUTED),
        ActionState::Idle => (String::new(), MUTED),
    }
}

fn status_color(item: &ResourceItem) -> Color {
    if item.status.is_failure() {
        ERROR
    } else if item.status.is_transitional() {
        WARN
    } else {
        Color::White
    }
}

fn channel_label(status: &ChannelStatus) -> String {
    match status {
        ChannelStatus::Closed => "○ offline".to_string(),
        ChannelStatus::Connecting => "◌ connecting".to_string(),
        ChannelStatus::Live => "● live".to_string(),
        ChannelStatus::Lost(reason) => format!("◍ polling ({})", compact_text(reason, 32)),
    }
}

fn channel_color(status: &ChannelStatus) -> Color {
    match status {
        ChannelStatus::Live => ACCENT,
        ChannelStatus::Lost(_) => WARN,
        ChannelStatus::Closed | ChannelStatus::Connecting => MUTED,
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("\u{e0b0}", Style::default().fg(bg).bg(next_bg)));
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}
