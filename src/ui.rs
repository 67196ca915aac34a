use chrono::Local;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, Paragraph, Row as TableRow, Table, TableState, Wrap,
};

use crate::app::{App, Banner};
use crate::input::InputMode;
use crate::model::{Row, StatusClass, ViewKind};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const INFO: Color = Color::Rgb(125, 211, 252);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const SEPARATOR: &str = " ┃ ";
const DEBUG_PANE_LINES: u16 = 5;

pub fn render(frame: &mut Frame, app: &App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let clock = Local::now().format("%H:%M:%S").to_string();
    render_header(frame, root[0], app, &clock);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if let Some(detail) = app.detail() {
        render_detail(frame, app, &detail.title, &detail.lines, detail.scroll, detail.is_pending());
    }
    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App, clock: &str) {
    frame.render_widget(
        Paragraph::new(build_header_line(app, clock)).style(Style::default().bg(BG)),
        area,
    );
}

fn build_header_line(app: &App, clock: &str) -> Line<'static> {
    let router = app.router();
    let context = if router.database().is_empty() {
        router.namespace().to_string()
    } else {
        format!("{}.{}", router.database(), router.namespace())
    };
    let separator = || Span::styled(SEPARATOR, Style::default().fg(MUTED));

    Line::from(vec![
        Span::styled(
            format!("floe v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        separator(),
        Span::styled(
            format!(
                "Context: {} | User: {}",
                compact_text(&context, 40),
                compact_text(app.user(), 24)
            ),
            Style::default().fg(Color::White),
        ),
        separator(),
        Span::styled(
            router.title(),
            Style::default().fg(WARN).add_modifier(Modifier::BOLD),
        ),
        separator(),
        Span::styled(clock.to_string(), Style::default().fg(MUTED)),
    ])
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    let banner = app.banner();
    let mut constraints = Vec::with_capacity(3);
    if banner.is_some() {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Min(3));
    if app.debug_enabled() {
        constraints.push(Constraint::Length(DEBUG_PANE_LINES + 2));
    }
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let mut next = 0;
    if let Some(banner) = banner {
        render_banner(frame, chunks[next], banner);
        next += 1;
    }
    render_table(frame, chunks[next], app);
    if app.debug_enabled() {
        render_debug_pane(frame, chunks[next + 1], app);
    }
}

fn render_banner(frame: &mut Frame, area: Rect, banner: Banner<'_>) {
    let (text, style) = match banner {
        Banner::Notice(text) => (text, Style::default().fg(WARN)),
        Banner::Error(text) => (text, Style::default().fg(ERROR).add_modifier(Modifier::BOLD)),
        Banner::Empty(text) => (text, Style::default().fg(INFO)),
    };
    let line = compact_text(text, area.width.saturating_sub(1) as usize);
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(format!(" {line}"), style)))
            .style(Style::default().bg(BG)),
        area,
    );
}

fn render_table(frame: &mut Frame, area: Rect, app: &App) {
    let table = app.table();
    let headers = table.columns();
    let status_column = table.status_column();

    let header_row = TableRow::new(headers.iter().map(|header| {
        Cell::from(header.clone()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = table.visible_rows().map(|row| {
        TableRow::new(row.cells.iter().enumerate().map(|(index, value)| {
            let fg = if Some(index) == status_column {
                status_color(StatusClass::classify(value))
            } else {
                Color::White
            };
            Cell::from(value.clone()).style(Style::default().fg(fg))
        }))
    });

    let title = if table.filter().is_empty() {
        format!("{} ({})", app.router().title(), table.total_len())
    } else {
        format!(
            "{} ({}/{})",
            app.router().title(),
            table.visible_len(),
            table.total_len()
        )
    };
    let focused = app.detail().is_none() && !app.show_help();
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL));

    let widget = Table::new(rows, column_constraints(headers.len()))
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
    if table.visible_len() > 0 {
        state.select(Some(table.selected_index().saturating_sub(1)));
    }
    frame.render_stateful_widget(widget, area, &mut state);
}

fn status_color(class: StatusClass) -> Color {
    match class {
        StatusClass::Running => ACCENT,
        StatusClass::Starting => WARN,
        StatusClass::Stopped => ERROR,
        StatusClass::Suspended => MUTED,
        StatusClass::Unknown => Color::White,
    }
}

fn render_debug_pane(frame: &mut Frame, area: Rect, app: &App) {
    let lines = app.debug_lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(DEBUG_PANE_LINES as usize);
    let text = lines[start..]
        .iter()
        .map(|line| Line::from(line.to_string()))
        .collect::<Vec<_>>();

    let pane = Paragraph::new(text)
        .block(
            Block::default()
                .title("Debug")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(MUTED))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(MUTED));
    frame.render_widget(pane, area);
}

fn render_detail(
    frame: &mut Frame,
    app: &App,
    title: &str,
    lines: &[String],
    scroll: u16,
    pending: bool,
) {
    let area = centered_rect(80, 70, frame.area());
    frame.render_widget(Clear, area);

    let title = if pending {
        format!("{title} {}", app.spinner_frame())
    } else {
        title.to_string()
    };
    let text = Text::from(
        lines
            .iter()
            .map(|line| detail_line(line))
            .collect::<Vec<_>>(),
    );
    let paragraph = Paragraph::new(text)
        .block(
            Block::default()
                .title(title)
                .title_bottom(Line::from(" esc close  j/k scroll ").alignment(Alignment::Right))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));

    frame.render_widget(paragraph, area);
}

fn detail_line(line: &str) -> Line<'static> {
    if let Some((key, value)) = line.split_once(": ")
        && !key.starts_with(' ')
        && !key.is_empty()
    {
        let style = if key == "Error" || key.ends_with("failed") {
            Style::default().fg(ERROR)
        } else {
            Style::default().fg(ACCENT)
        };
        return Line::from(vec![
            Span::styled(format!("{key}: "), style),
            Span::raw(value.to_string()),
        ]);
    }
    if line.trim_start().starts_with("Error:") {
        return Line::from(Span::styled(line.to_string(), Style::default().fg(ERROR)));
    }
    Line::from(line.to_string())
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    let (label, label_bg) = match app.mode() {
        InputMode::Normal => (" nrm ", PL_A),
        InputMode::Filter => (" flt ", WARN),
        InputMode::Command => (" cmd ", ACCENT),
    };
    let label_fg = if app.mode() == InputMode::Normal {
        Color::White
    } else {
        Color::Black
    };

    match app.mode() {
        InputMode::Normal => {
            push_powerline_segment(&mut spans, label, label_fg, label_bg, BG);
            let hints = if app.is_loading() {
                Span::styled(
                    format!(
                        " {} Fetching {}...",
                        app.spinner_frame(),
                        app.current_view().noun()
                    ),
                    Style::default().fg(WARN),
                )
            } else {
                Span::styled(format!(" {}", footer_hints(app)), Style::default().fg(MUTED))
            };
            spans.push(hints);
        }
        InputMode::Filter | InputMode::Command => {
            let prefix = if app.mode() == InputMode::Filter { '/' } else { ':' };
            push_powerline_segment(&mut spans, label, label_fg, label_bg, PL_B);
            push_powerline_segment(
                &mut spans,
                format!(" {prefix}{}█ ", app.input()),
                Color::White,
                PL_B,
                BG,
            );
            let hints = if app.mode() == InputMode::Filter {
                " enter Done  esc Clear"
            } else {
                " enter Run  esc Cancel"
            };
            spans.push(Span::styled(hints, Style::default().fg(MUTED)));
        }
    }

    let right_spans = build_footer_glance_spans(app);
    let min_left = 24u16;
    let right_width = (spans_width(&right_spans) as u16).min(area.width.saturating_sub(min_left));
    if right_width == 0 {
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(right_spans))
            .style(Style::default().bg(BG))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn footer_hints(app: &App) -> &'static str {
    if app.detail().is_some() {
        return "j/k scroll  esc close  ? help  q quit";
    }
    if app.router().parent().is_some() {
        return "j/k move  enter detail  b back  / filter  : cmd  ctrl+r refresh  ? help  q quit";
    }
    "j/k move  enter detail  i instances  s/p/r views  / filter  : cmd  n schema  ? help  q quit"
}

fn build_footer_glance_spans(app: &App) -> Vec<Span<'static>> {
    let table = app.table();
    let mut spans = Vec::new();
    if !table.filter().is_empty() {
        spans.push(Span::styled(
            format!(" /{} ", compact_text(table.filter(), 16)),
            Style::default().fg(WARN),
        ));
    }
    push_powerline_segment(
        &mut spans,
        format!(" {} ", table.selection_summary()),
        Color::White,
        PL_B,
        BG,
    );
    spans
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
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(Span::styled(
            format!(
                "floe help  view:{}  schema:{}",
                app.current_view().short_token(),
                app.namespace()
            ),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    let views = ViewKind::ALL
        .iter()
        .map(|view| format!("{} ({})", view.title(), view.short_token()))
        .collect::<Vec<_>>()
        .join("  ");
    lines.push(Line::from(Span::styled(
        format!("Views: {views}"),
        Style::default().fg(MUTED),
    )));
    lines.extend(HELP_LINES.iter().map(|line| Line::from(*line)));

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

const HELP_LINES: &[&str] = &[
    "Move: j/k or arrows  ctrl+d/ctrl+u or PgDn/PgUp page  g/G top/bottom",
    "Detail: enter open  esc close  j/k scroll while open",
    "Views: s services  p pools  r repos  i instances of selected service  b back",
    "Filter: / type to narrow rows live  enter keep  esc clear",
    "Command: : then enter  n opens :ns",
    "Refresh: ctrl+r or F5  (also automatic)",
    "Quit: q  ctrl+c",
    "",
    "Commands:",
    "  svc | service | services",
    "  pool | pools | cp",
    "  repo | repos | image | images",
    "  inst | instances",
    "  ns | namespace | schema <name>",
    "  help | ?",
];

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

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}

/// Plain box-drawn table for non-interactive output. Each column is padded to its widest
/// cell (header included).
pub fn render_box_table(columns: &[String], rows: &[Row]) -> String {
    let mut widths = columns
        .iter()
        .map(|column| column.chars().count())
        .collect::<Vec<_>>();
    for row in rows {
        for (index, cell) in row.cells.iter().enumerate().take(widths.len()) {
            widths[index] = widths[index].max(cell.chars().count());
        }
    }

    let rule = |left: char, middle: char, right: char| {
        let mut line = String::new();
        line.push(left);
        for (index, width) in widths.iter().enumerate() {
            if index > 0 {
                line.push(middle);
            }
            line.push_str(&"─".repeat(width + 2));
        }
        line.push(right);
        line.push('\n');
        line
    };
    let mut out = rule('┌', '┬', '┐');
    out.push_str(&box_record(&widths, columns));
    out.push_str(&rule('├', '┼', '┤'));
    for row in rows {
        out.push_str(&box_record(&widths, &row.cells));
    }
    out.push_str(&rule('└', '┴', '┘'));
    out
}

fn box_record(widths: &[usize], cells: &[String]) -> String {
    let mut line = String::from("│");
    for (index, width) in widths.iter().enumerate() {
        let cell = cells.get(index).map(String::as_str).unwrap_or("");
        let pad = width.saturating_sub(cell.chars().count());
        line.push(' ');
        line.push_str(cell);
        line.push_str(&" ".repeat(pad + 1));
        line.push('│');
    }
    line.push('\n');
    line
}
