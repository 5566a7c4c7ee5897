use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use scout_core::{Health, View};
use tracing::warn;

use crate::app::{App, HealthState, InputMode};
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.on_tick(),
        AppEvent::Stream { request, event } => app.apply_stream_event(request, event),
        AppEvent::ResearchStarted { request, id } => {
            app.reconciler.attach_research_id(request, id);
        }
        AppEvent::Health(result) => app.health = health_state(result),
        AppEvent::HistoryLoaded(Ok(items)) => {
            app.history_error = None;
            app.set_history(items);
        }
        AppEvent::HistoryLoaded(Err(e)) => {
            warn!(error = %e, "could not load history");
            app.history_loading = false;
            app.history_error = Some(e);
        }
        AppEvent::JobLoaded { ticket, result } => app.job_loaded(ticket, result),
        AppEvent::Deleted(Ok(id)) => {
            app.remove_history_item(&id);
            app.status_message = Some(format!("Deleted {id}"));
        }
        AppEvent::Deleted(Err(e)) => app.status_message = Some(format!("Delete failed: {e}")),
    }
    Ok(())
}

fn health_state(result: Result<Health, String>) -> HealthState {
    match result {
        Ok(health) if health.is_ok() => HealthState::Healthy(health.status),
        Ok(health) => HealthState::Degraded(health.status),
        Err(e) => HealthState::Degraded(e),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Tab => app.switch_view(app.view.next()),
        KeyCode::Char('t') => app.toggle_theme(),
        KeyCode::Char('r') => {
            app.check_health();
            if app.view == View::History {
                app.refresh_history();
            }
        }

        KeyCode::Esc => app.cancel_active(),

        KeyCode::Char('i') if app.view != View::History => app.input_mode = InputMode::Editing,

        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
        KeyCode::Char('g') => app.scroll_top(),
        KeyCode::Char('G') => app.scroll_bottom(),

        KeyCode::Char('n') if app.view == View::Chat => app.new_conversation(),

        KeyCode::Enter if app.view == View::History => app.open_selected_history(),
        KeyCode::Char('d') if app.view == View::History => app.delete_selected_history(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    let view = app.view;
    let input = match view {
        View::Chat => &mut app.chat_input,
        View::Research => &mut app.research_input,
        View::History => {
            app.input_mode = InputMode::Normal;
            return;
        }
    };

    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => {
            app.input_mode = InputMode::Normal;
            match view {
                View::Chat => app.submit_chat(),
                View::Research => app.submit_research(),
                View::History => {}
            }
        }
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) => input.insert(c),
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    // Position-based scrolling: only the panel under the pointer moves
    let in_main = app.main_area.is_some_and(|r| point_in_rect(x, y, r));
    let in_side = app.side_area.is_some_and(|r| point_in_rect(x, y, r));
    if !in_main && !in_side {
        return;
    }

    let lines = if app.view == View::History { 1 } else { 3 };
    match mouse.kind {
        MouseEventKind::ScrollDown => {
            for _ in 0..lines {
                app.scroll_down();
            }
        }
        MouseEventKind::ScrollUp => {
            for _ in 0..lines {
                app.scroll_up();
            }
        }
        _ => {}
    }
}
