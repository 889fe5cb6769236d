use crate::view::{ConnectionIndicator, DashboardView, FrameView};
use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const COMPACT_WIDTH: u16 = 80;

#[derive(Clone, Copy)]
pub struct DashboardTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

pub fn dashboard_theme() -> DashboardTheme {
    DashboardTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

pub fn render_ui(frame: &mut Frame, view: &DashboardView<'_>) {
    let size = frame.size();
    let theme = dashboard_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(size);
    frame.render_widget(render_header(view, theme, size.width), layout[0]);
    frame.render_widget(render_counters(view, theme, size.width), layout[1]);

    let body = body_areas(layout[2], stacked(size.width));
    frame.render_widget(render_video(view, theme, body[0].width), body[0]);
    frame.render_widget(render_alerts(view, theme, body[1].width), body[1]);
}

/// Video beside alerts, or stacked on narrow terminals.
fn body_areas(area: Rect, compact: bool) -> std::rc::Rc<[Rect]> {
    if compact {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(0)])
            .split(area)
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(area)
    }
}

fn panel(title: &'static str, theme: DashboardTheme, bg: Color) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(bg))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_header(view: &DashboardView<'_>, theme: DashboardTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let (dot, color) = connection_marker(view.connection, theme);
    let status_fields = vec![
        "Vigil Surveillance".to_string(),
        format!("Stream: {}", if view.frame.is_live() { "live" } else { "idle" }),
        format!("Alerts: {}", view.alerts.len()),
    ];
    let status_line = join_fitting(&status_fields, inner_width.saturating_sub(16).max(12));

    let note = match view.status_note.as_deref() {
        Some(note) => note.to_string(),
        None if stacked(width) => "q quit".to_string(),
        None => "receiving live updates (q quit)".to_string(),
    };

    Paragraph::new(Text::from(vec![
        Line::from(vec![
            Span::styled(format!("{dot} "), Style::default().fg(color)),
            Span::styled(
                format!("{:<14}", view.connection.label()),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(status_line, Style::default().fg(theme.text)),
        ]),
        Line::from(Span::styled(
            truncate_to(&note, inner_width.max(12)),
            Style::default().fg(if view.status_note.is_some() {
                theme.warn
            } else {
                theme.muted
            }),
        )),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(panel("Status", theme, theme.bg))
}

fn render_counters(
    view: &DashboardView<'_>,
    theme: DashboardTheme,
    width: u16,
) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let fields: Vec<String> = view
        .counters()
        .iter()
        .map(|row| format!("{}: {}", row.label, row.count))
        .collect();
    Paragraph::new(Line::from(Span::styled(
        join_fitting(&fields, inner_width.max(12)),
        Style::default().fg(theme.text),
    )))
    .style(Style::default().fg(theme.text).bg(theme.surface))
    .block(panel("Detections", theme, theme.surface))
}

fn render_video(view: &DashboardView<'_>, theme: DashboardTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let lines = match view.frame {
        FrameView::Live(frame) => vec![
            Line::from(Span::styled(
                "LIVE",
                Style::default()
                    .fg(theme.critical)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                truncate_to(
                    &format!("frame: {}", format_bytes(frame.approx_bytes())),
                    inner_width.max(8),
                ),
                Style::default().fg(theme.text),
            )),
            Line::from(Span::styled(
                format!(
                    "received: {}",
                    frame.received_at.with_timezone(&Local).format("%H:%M:%S")
                ),
                Style::default().fg(theme.muted),
            )),
        ],
        FrameView::NoStream => vec![Line::from(Span::styled(
            "No stream active",
            Style::default().fg(theme.muted),
        ))],
    };
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel("Live Video", theme, theme.surface))
}

fn render_alerts(view: &DashboardView<'_>, theme: DashboardTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let mut lines = vec![Line::from(Span::styled(
        format!("Recent Alerts ({})", view.alerts.len()),
        Style::default()
            .fg(theme.accent)
            .add_modifier(Modifier::BOLD),
    ))];
    if view.alerts.is_empty() {
        lines.push(Line::from(Span::styled(
            "No alerts yet",
            Style::default().fg(theme.muted),
        )));
    }
    for row in &view.alerts {
        let fields = vec![row.local_time(), row.rule_name.clone(), row.summary.clone()];
        lines.push(Line::from(Span::styled(
            join_fitting(&fields, inner_width.max(12)),
            Style::default().fg(theme.text),
        )));
    }
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel("Alerts", theme, theme.surface))
}

fn connection_marker(indicator: ConnectionIndicator, theme: DashboardTheme) -> (&'static str, Color) {
    match indicator {
        ConnectionIndicator::Connected => ("●", theme.ok),
        ConnectionIndicator::Connecting => ("○", theme.warn),
        ConnectionIndicator::Disconnected => ("○", theme.critical),
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

const ELLIPSIS: &str = "...";
const FIELD_SEPARATOR: &str = " | ";

/// Cuts `text` to at most `width` chars, marking the cut with `...`.
fn truncate_to(text: &str, width: usize) -> String {
    match text.char_indices().nth(width) {
        None => text.to_string(),
        Some(_) if width <= ELLIPSIS.len() => ELLIPSIS[..width].to_string(),
        Some(_) => {
            let cut = text
                .char_indices()
                .nth(width - ELLIPSIS.len())
                .map_or(text.len(), |(at, _)| at);
            format!("{}{ELLIPSIS}", &text[..cut])
        }
    }
}

/// Joins the non-blank fields with ` | `, stopping at the first one that
/// would overflow `width`. A lone oversized first field is truncated.
fn join_fitting(fields: &[String], width: usize) -> String {
    let mut fields = fields.iter().filter(|field| !field.trim().is_empty());
    let Some(first) = fields.next() else {
        return String::new();
    };
    let mut line = truncate_to(first, width);
    let mut used = line.chars().count();
    for field in fields {
        let extra = FIELD_SEPARATOR.len() + field.chars().count();
        if used + extra > width {
            break;
        }
        line.push_str(FIELD_SEPARATOR);
        line.push_str(field);
        used += extra;
    }
    line
}

fn stacked(width: u16) -> bool {
    width < COMPACT_WIDTH
}
