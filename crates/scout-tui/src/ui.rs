use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use scout_core::{ChatRole, Phase, ResearchStatus, StepStatus, StreamKind, Theme, View};

use crate::app::{App, HealthState, InputMode, TextInput};

/// Colors for one theme.
#[derive(Debug, Clone, Copy)]
struct Palette {
    text: Color,
    muted: Color,
    accent: Color,
    user: Color,
    assistant: Color,
    border: Color,
    editing: Color,
    ok: Color,
    error: Color,
    bar_bg: Color,
    bar_fg: Color,
    highlight_bg: Color,
    highlight_fg: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                text: Color::White,
                muted: Color::DarkGray,
                accent: Color::Cyan,
                user: Color::Cyan,
                assistant: Color::Yellow,
                border: Color::DarkGray,
                editing: Color::Yellow,
                ok: Color::Green,
                error: Color::Red,
                bar_bg: Color::DarkGray,
                bar_fg: Color::White,
                highlight_bg: Color::Blue,
                highlight_fg: Color::White,
            },
            Theme::Light => Self {
                text: Color::Black,
                muted: Color::Gray,
                accent: Color::Blue,
                user: Color::Blue,
                assistant: Color::Magenta,
                border: Color::Gray,
                editing: Color::Magenta,
                ok: Color::Green,
                error: Color::Red,
                bar_bg: Color::Gray,
                bar_fg: Color::Black,
                highlight_bg: Color::LightBlue,
                highlight_fg: Color::Black,
            },
        }
    }
}

/// Ensure the selected item in a list is visible by adjusting the ListState offset.
fn ensure_selected_visible(state: &mut ListState, visible_height: usize) {
    let visible_height = visible_height.max(1);

    if let Some(selected) = state.selected() {
        let min_offset = selected.saturating_sub(visible_height - 1);
        let new_offset = state.offset().clamp(min_offset, selected);
        if new_offset != state.offset() {
            *state.offset_mut() = new_offset;
        }
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let palette = Palette::for_theme(app.theme);

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, &palette, frame, header_area);

    app.main_area = None;
    app.side_area = None;
    match app.view {
        View::Chat => render_chat_view(app, &palette, frame, body_area),
        View::Research => render_research_view(app, &palette, frame, body_area),
        View::History => render_history_view(app, &palette, frame, body_area),
    }

    render_footer(app, &palette, frame, footer_area);
}

fn render_header(app: &App, palette: &Palette, frame: &mut Frame, area: Rect) {
    let bar = Style::default().bg(palette.bar_bg).fg(palette.bar_fg);

    let mut spans = vec![Span::styled(" Scout ", bar.fg(palette.accent).bold())];
    for view in View::all() {
        let label = format!(" {} ", view.display_name());
        if view == app.view {
            spans.push(Span::styled(label, bar.add_modifier(Modifier::BOLD | Modifier::REVERSED)));
        } else {
            spans.push(Span::styled(label, bar));
        }
    }

    let (dot, health_text, health_color) = match &app.health {
        HealthState::Unknown => ("○", "unknown".to_string(), palette.muted),
        HealthState::Checking => ("◌", "checking".to_string(), palette.muted),
        HealthState::Healthy(status) => ("●", status.clone(), palette.ok),
        HealthState::Degraded(reason) => ("●", reason.clone(), palette.error),
    };
    spans.push(Span::styled("  ", bar));
    spans.push(Span::styled(dot, bar.fg(health_color)));
    spans.push(Span::styled(format!(" {health_text} "), bar));
    spans.push(Span::styled(app.client.base_url().to_string(), bar.fg(palette.muted)));
    spans.push(Span::styled(format!(" v{}", env!("CARGO_PKG_VERSION")), bar.fg(palette.muted)));

    let header = Paragraph::new(Line::from(spans)).style(bar);
    frame.render_widget(header, area);
}

fn render_footer(app: &App, palette: &Palette, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(palette.editing).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Editing => " EDIT ",
        InputMode::Normal => match app.view {
            View::Chat => " CHAT ",
            View::Research => " AGENT ",
            View::History => " HISTORY ",
        },
    };

    let key_style = Style::default().bg(palette.bar_bg).fg(palette.bar_fg);
    let label_style = Style::default().fg(palette.text);

    let keys: &[(&str, &str)] = match (app.view, app.input_mode) {
        (_, InputMode::Editing) => &[("Enter", "send"), ("Esc", "stop editing")],
        (View::Chat, InputMode::Normal) => &[
            ("i", "type"),
            ("j/k", "scroll"),
            ("n", "new chat"),
            ("Esc", "cancel"),
            ("Tab", "view"),
            ("t", "theme"),
            ("q", "quit"),
        ],
        (View::Research, InputMode::Normal) => &[
            ("i", "query"),
            ("j/k", "report"),
            ("Esc", "cancel"),
            ("Tab", "view"),
            ("t", "theme"),
            ("q", "quit"),
        ],
        (View::History, InputMode::Normal) => &[
            ("j/k", "select"),
            ("Enter", "open"),
            ("d", "delete"),
            ("r", "refresh"),
            ("Tab", "view"),
            ("q", "quit"),
        ],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in keys {
        spans.push(Span::styled(format!(" {key} "), key_style));
        spans.push(Span::styled(format!(" {label} "), label_style));
    }
    if let Some(message) = &app.status_message {
        spans.push(Span::styled(format!("  {message}"), Style::default().fg(palette.muted)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_chat_view(app: &mut App, palette: &Palette, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(area);

    app.main_area = Some(chat_area);
    // Inner size minus borders, for scroll calculations
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);
    if app.follow_tail {
        app.scroll_chat_to_bottom();
    }

    let streaming = matches!(
        app.reconciler.phase(),
        Phase::Streaming { kind: StreamKind::Chat, .. }
    );
    let title = match app.client.model() {
        Some(model) => format!(" Chat: {model} "),
        None => " Chat ".to_string(),
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(title);

    let messages = app.reconciler.messages();
    let chat_text = if messages.is_empty() {
        Text::from(Span::styled(
            "Press i to ask something...",
            Style::default().fg(palette.muted),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        let last = messages.len() - 1;

        for (i, msg) in messages.iter().enumerate() {
            let (label, color) = match msg.role {
                ChatRole::User => ("You:", palette.user),
                ChatRole::Assistant => ("AI:", palette.assistant),
            };
            lines.push(Line::from(Span::styled(
                label,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )));

            let live = streaming && i == last && msg.role == ChatRole::Assistant;
            if msg.content.is_empty() && msg.error.is_none() {
                let placeholder = if live {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    format!("Thinking{}", ".".repeat(app.animation_frame as usize + 1))
                } else {
                    "(no reply)".to_string()
                };
                lines.push(Line::from(Span::styled(
                    placeholder,
                    Style::default().fg(palette.muted).add_modifier(Modifier::ITALIC),
                )));
            } else if !msg.content.is_empty() {
                let count = msg.content.lines().count();
                for (n, line) in msg.content.lines().enumerate() {
                    let mut spans = vec![Span::styled(line, Style::default().fg(palette.text))];
                    if live && n + 1 == count {
                        spans.push(Span::styled("▌", Style::default().fg(palette.accent)));
                    }
                    lines.push(Line::from(spans));
                }
            }
            if let Some(error) = &msg.error {
                lines.push(Line::from(Span::styled(
                    format!("Error: {error}"),
                    Style::default().fg(palette.error),
                )));
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    let editing = app.input_mode == InputMode::Editing;
    render_input(frame, palette, input_area, &app.chat_input, " Message ", editing);
}

fn render_research_view(app: &mut App, palette: &Palette, frame: &mut Frame, area: Rect) {
    let [left_area, report_area] =
        Layout::horizontal([Constraint::Percentage(45), Constraint::Percentage(55)]).areas(area);
    let [input_area, steps_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(left_area);

    app.main_area = Some(steps_area);
    app.side_area = Some(report_area);

    let editing = app.input_mode == InputMode::Editing;
    render_input(frame, palette, input_area, &app.research_input, " Research query ", editing);

    let phase = app.reconciler.phase();
    let researching = matches!(phase, Phase::Streaming { kind: StreamKind::Research, .. });
    let phase_label = match phase {
        Phase::Idle => String::new(),
        Phase::Streaming { .. } => {
            format!("running{}", ".".repeat(app.animation_frame as usize + 1))
        }
        Phase::Completed => "done".to_string(),
        Phase::Failed(_) => "failed".to_string(),
        Phase::Cancelled => "cancelled".to_string(),
    };
    let title = match app.reconciler.research_query() {
        Some(query) if phase_label.is_empty() => format!(" {query} "),
        Some(query) => format!(" {query} ({phase_label}) "),
        None => " Pipeline ".to_string(),
    };
    let steps_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(title);

    let mut lines: Vec<Line> = app
        .reconciler
        .steps()
        .iter()
        .map(|step| {
            let (marker, color) = match step.status {
                StepStatus::Pending => ("○", palette.muted),
                StepStatus::Active => ("◐", palette.accent),
                StepStatus::Done => ("✓", palette.ok),
                StepStatus::Failed => ("✗", palette.error),
                StepStatus::Unknown => ("?", palette.muted),
            };
            let mut spans = vec![
                Span::styled(format!("{marker} "), Style::default().fg(color)),
                Span::styled(step.key.clone(), Style::default().fg(palette.text).bold()),
            ];
            if !step.detail.is_empty() {
                spans.push(Span::styled(
                    format!("  {}", step.detail),
                    Style::default().fg(palette.muted),
                ));
            }
            Line::from(spans)
        })
        .collect();

    if lines.is_empty() && app.reconciler.research_query().is_none() {
        lines.push(Line::from(Span::styled(
            "Press i to start a research run",
            Style::default().fg(palette.muted),
        )));
    } else if lines.is_empty() && researching {
        lines.push(Line::from(Span::styled(
            "Waiting for the first step...",
            Style::default().fg(palette.muted).italic(),
        )));
    }
    if let Some(id) = app.reconciler.research_id() {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("job {id}"),
            Style::default().fg(palette.muted),
        )));
    }
    if let Some(error) = app.reconciler.error() {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("Error: {error}"),
            Style::default().fg(palette.error).bold(),
        )));
    }

    let steps = Paragraph::new(Text::from(lines))
        .block(steps_block)
        .wrap(Wrap { trim: true });
    frame.render_widget(steps, steps_area);

    let report_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(" Report ");
    let report_text = match app.reconciler.report() {
        Some(report) => Text::styled(report.to_string(), Style::default().fg(palette.text)),
        None if researching => Text::styled(
            "The report appears here when the run completes.",
            Style::default().fg(palette.muted).italic(),
        ),
        None => Text::default(),
    };

    // Keep scroll within the wrapped report
    let inner_width = report_area.width.saturating_sub(2).max(1) as usize;
    let report_lines: usize = app
        .reconciler
        .report()
        .map(|r| r.lines().map(|l| l.chars().count() / inner_width + 1).sum())
        .unwrap_or(0);
    let max_scroll = report_lines.saturating_sub(report_area.height.saturating_sub(2) as usize);
    app.report_scroll = app.report_scroll.min(max_scroll.min(u16::MAX as usize) as u16);

    let report = Paragraph::new(report_text)
        .block(report_block)
        .wrap(Wrap { trim: false })
        .scroll((app.report_scroll, 0));
    frame.render_widget(report, report_area);
}

fn render_history_view(app: &mut App, palette: &Palette, frame: &mut Frame, area: Rect) {
    app.main_area = Some(area);

    let title = if app.history_loading {
        " Recent research (loading...) ".to_string()
    } else {
        format!(" Recent research ({}) ", app.history.len())
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(title);

    if let Some(error) = &app.history_error {
        let text = Paragraph::new(Span::styled(
            format!("Could not load history: {error}"),
            Style::default().fg(palette.error),
        ))
        .block(block)
        .wrap(Wrap { trim: true });
        frame.render_widget(text, area);
        return;
    }
    if app.history.is_empty() {
        let message = if app.history_loading { "" } else { "No research runs yet" };
        let text = Paragraph::new(Span::styled(message, Style::default().fg(palette.muted)))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = app
        .history
        .iter()
        .map(|item| {
            let status_color = match item.status {
                ResearchStatus::Completed => palette.ok,
                ResearchStatus::Failed | ResearchStatus::Cancelled => palette.error,
                _ => palette.accent,
            };
            let mut spans = vec![
                Span::styled(
                    format!("{:<10}", item.status.as_str()),
                    Style::default().fg(status_color),
                ),
                Span::styled(item.query.clone(), Style::default().fg(palette.text)),
            ];
            if let Some(created) = &item.created_at {
                spans.push(Span::styled(
                    format!("  {created}"),
                    Style::default().fg(palette.muted),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(palette.highlight_bg)
                .fg(palette.highlight_fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    ensure_selected_visible(&mut app.history_state, area.height.saturating_sub(2) as usize);
    frame.render_stateful_widget(list, area, &mut app.history_state);
}

/// Single-line input box with horizontal scrolling to keep the cursor visible.
fn render_input(
    frame: &mut Frame,
    palette: &Palette,
    area: Rect,
    input: &TextInput,
    title: &str,
    editing: bool,
) {
    let border = if editing { palette.editing } else { palette.border };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title.to_string());

    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else {
        (input.cursor + 1).saturating_sub(inner_width)
    };

    let visible_text: String = input.text.chars().skip(scroll_offset).take(inner_width).collect();
    let paragraph = Paragraph::new(visible_text)
        .style(Style::default().fg(palette.user))
        .block(block);
    frame.render_widget(paragraph, area);

    if editing {
        let cursor_x = (input.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};
    use scout_core::{ApiClient, Config, PipelineStep, StreamEvent};
    use tokio::sync::mpsc;

    fn test_app(view: View) -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let mut config = Config::new();
        config.mode = view;
        App::new(&config, client, tx)
    }

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn ensure_selected_visible_clamps_offset() {
        let mut state = ListState::default();
        state.select(Some(12));
        ensure_selected_visible(&mut state, 5);
        assert_eq!(state.offset(), 8);

        state.select(Some(2));
        ensure_selected_visible(&mut state, 5);
        assert_eq!(state.offset(), 2);
    }

    #[test]
    fn chat_view_renders_roles_and_error() {
        let mut app = test_app(View::Chat);
        let request = app.reconciler.begin_chat("hello there");
        app.reconciler.apply(request, StreamEvent::Error("backend offline".into()));

        let screen = draw(&mut app);
        assert!(screen.contains("You:"));
        assert!(screen.contains("hello there"));
        assert!(screen.contains("Error: backend offline"));
        assert_eq!(app.chat_height, 13);
    }

    #[test]
    fn research_view_renders_steps_and_report() {
        let mut app = test_app(View::Research);
        let request = app.reconciler.begin_research("rust async");
        app.reconciler.apply(
            request,
            StreamEvent::Step(PipelineStep::new("search", StepStatus::Done, "12 sources")),
        );
        app.reconciler.apply(request, StreamEvent::Complete { report: Some("Summary".into()) });

        let screen = draw(&mut app);
        assert!(screen.contains("✓ search"));
        assert!(screen.contains("12 sources"));
        assert!(screen.contains("Summary"));
        assert!(screen.contains("(done)"));
        assert!(app.side_area.is_some());
    }
}
