use std::path::PathBuf;

use futures_util::StreamExt;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use scout_core::{
    ApiClient, Config, EventStream, ResearchJob, ResearchSummary, Reconciler, RequestId,
    StreamEvent, Theme, Transition, View,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tui::{AppEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Result of the last `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Checking,
    Healthy(String),
    Degraded(String),
}

/// The one in-flight request task. Dropping the handle aborts the task,
/// which drops its response body and closes the connection.
pub struct ActiveStream {
    pub request: RequestId,
    task: JoinHandle<()>,
}

impl ActiveStream {
    fn new(request: RequestId, task: JoinHandle<()>) -> Self {
        Self { request, task }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A single-line text input with a character-indexed cursor.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    pub text: String,
    pub cursor: usize,
}

impl TextInput {
    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.text.chars().count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.text.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.chars().count();
    }

    /// Take the trimmed contents, leaving the input empty.
    pub fn take(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.text);
        self.cursor = 0;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub view: View,
    pub input_mode: InputMode,
    pub theme: Theme,

    // Inputs
    pub chat_input: TextInput,
    pub research_input: TextInput,

    // Stream state
    pub reconciler: Reconciler,
    pub active: Option<ActiveStream>,

    // Chat scroll state
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_tail: bool,

    // Research report scroll
    pub report_scroll: u16,

    // History
    pub history: Vec<ResearchSummary>,
    pub history_state: ListState,
    pub history_loading: bool,
    pub history_error: Option<String>,
    pub history_limit: usize,
    /// Ticket of the job load the history view is waiting on.
    pending_open: Option<u64>,
    open_seq: u64,

    // Header / status line
    pub health: HealthState,
    pub status_message: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
    ticks: u32,

    // Panel areas for mouse hit-testing (updated during render)
    pub main_area: Option<Rect>,
    pub side_area: Option<Rect>,

    pub client: ApiClient,
    events: EventSender,
    config_path: Option<PathBuf>,
}

/// Re-check health every ~30s of 300ms ticks.
const HEALTH_EVERY_TICKS: u32 = 100;

impl App {
    pub fn new(config: &Config, client: ApiClient, events: EventSender) -> Self {
        Self {
            should_quit: false,
            view: config.mode,
            input_mode: InputMode::Normal,
            theme: config.theme,

            chat_input: TextInput::default(),
            research_input: TextInput::default(),

            reconciler: Reconciler::new(),
            active: None,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,

            report_scroll: 0,

            history: Vec::new(),
            history_state: ListState::default(),
            history_loading: false,
            history_error: None,
            history_limit: config.history_limit.max(1),
            pending_open: None,
            open_seq: 0,

            health: HealthState::Unknown,
            status_message: None,

            animation_frame: 0,
            ticks: 0,

            main_area: None,
            side_area: None,

            client,
            events,
            config_path: None,
        }
    }

    /// Persist theme and mode changes to this config file.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.reconciler.is_streaming()
    }

    // Request lifecycle

    /// Close the active stream, if any. Safe to call when idle.
    pub fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            info!(request = %active.request, "closing active stream");
        }
        if self.reconciler.cancel() {
            self.status_message = Some("Cancelled".to_string());
        }
    }

    pub fn submit_chat(&mut self) {
        let Some(text) = self.chat_input.take() else {
            return;
        };
        self.cancel_active();
        self.status_message = None;

        let request = self.reconciler.begin_chat(text);
        let history = self.reconciler.transcript().request_history();
        let client = self.client.clone();
        let tx = self.events.clone();

        let task = tokio::spawn(async move {
            match client.chat_stream(&history).await {
                Ok(events) => forward(events, request, &tx).await,
                Err(e) => {
                    warn!(error = %e, "chat request failed");
                    let _ = tx.send(AppEvent::Stream {
                        request,
                        event: StreamEvent::Error(e.to_string()),
                    });
                }
            }
        });

        self.active = Some(ActiveStream::new(request, task));
        self.follow_tail = true;
        self.scroll_chat_to_bottom();
    }

    pub fn submit_research(&mut self) {
        let Some(query) = self.research_input.take() else {
            return;
        };
        self.cancel_active();
        self.status_message = None;
        self.report_scroll = 0;

        let request = self.reconciler.begin_research(query.clone());
        let client = self.client.clone();
        let tx = self.events.clone();

        let task = tokio::spawn(async move {
            match client.start_research(&query).await {
                Ok(created) => {
                    let _ = tx.send(AppEvent::ResearchStarted {
                        request,
                        id: created.id.clone(),
                    });
                    forward(client.follow_research(&created.id), request, &tx).await;
                }
                Err(e) => {
                    warn!(error = %e, "could not start research");
                    let _ = tx.send(AppEvent::Stream {
                        request,
                        event: StreamEvent::Error(e.to_string()),
                    });
                }
            }
        });

        self.active = Some(ActiveStream::new(request, task));
    }

    /// Show a stored job in the research view, following it if still running.
    pub fn show_job(&mut self, job: ResearchJob) {
        self.cancel_active();
        self.status_message = None;
        self.view = View::Research;
        self.report_scroll = 0;

        if let Some(request) = self.reconciler.resume_research(&job) {
            let events = self.client.follow_research(&job.id);
            let tx = self.events.clone();
            let task = tokio::spawn(async move { forward(events, request, &tx).await });
            self.active = Some(ActiveStream::new(request, task));
        }
    }

    pub fn apply_stream_event(&mut self, request: RequestId, event: StreamEvent) {
        let transition = self.reconciler.apply(request, event);
        debug!(%request, ?transition, "applied stream event");

        match transition {
            Transition::Appended if self.follow_tail => self.scroll_chat_to_bottom(),
            Transition::Finished | Transition::Failed => {
                if self.active.as_ref().is_some_and(|a| a.request == request) {
                    self.active = None;
                }
                if self.view == View::History {
                    self.refresh_history();
                }
            }
            _ => {}
        }
    }

    /// Start over with an empty transcript.
    pub fn new_conversation(&mut self) {
        self.cancel_active();
        self.reconciler.clear_chat();
        self.chat_scroll = 0;
        self.follow_tail = true;
        self.status_message = None;
    }

    // Navigation

    /// Switch views. Leaving a view closes its stream.
    pub fn switch_view(&mut self, view: View) {
        if view == self.view {
            return;
        }
        self.cancel_active();
        self.pending_open = None;
        self.input_mode = InputMode::Normal;
        self.view = view;
        if view == View::History {
            self.refresh_history();
        }
        if view != View::History {
            self.save_preferences();
        }
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        self.save_preferences();
    }

    fn save_preferences(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        let mode = match self.view {
            View::History => View::Research,
            other => other,
        };
        if let Err(e) = Config::save_preferences(path, mode, self.theme) {
            warn!(error = %e, "could not save preferences");
        }
    }

    // Background requests

    pub fn check_health(&mut self) {
        self.health = HealthState::Checking;
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.health().await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::Health(result));
        });
    }

    pub fn refresh_history(&mut self) {
        self.history_loading = true;
        self.history_error = None;
        let client = self.client.clone();
        let tx = self.events.clone();
        let limit = self.history_limit;
        tokio::spawn(async move {
            let result = client.list_research(limit).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::HistoryLoaded(result));
        });
    }

    pub fn open_selected_history(&mut self) {
        let Some(item) = self.selected_history() else {
            return;
        };
        let id = item.id.clone();
        self.status_message = Some(format!("Loading {id}..."));
        self.open_seq += 1;
        let ticket = self.open_seq;
        self.pending_open = Some(ticket);

        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client.get_research(&id).await.map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::JobLoaded { ticket, result });
        });
    }

    /// Apply a finished job load. Only the latest load started from the
    /// history view counts, and only while that view is still showing.
    pub fn job_loaded(&mut self, ticket: u64, result: Result<ResearchJob, String>) {
        if self.pending_open != Some(ticket) || self.view != View::History {
            debug!(ticket, "dropping stale job load");
            return;
        }
        self.pending_open = None;
        match result {
            Ok(job) => self.show_job(job),
            Err(e) => self.status_message = Some(format!("Could not open: {e}")),
        }
    }

    pub fn delete_selected_history(&mut self) {
        let Some(item) = self.selected_history() else {
            return;
        };
        let id = item.id.clone();
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = client
                .delete_research(&id)
                .await
                .map(|_| id)
                .map_err(|e| e.to_string());
            let _ = tx.send(AppEvent::Deleted(result));
        });
    }

    pub fn set_history(&mut self, items: Vec<ResearchSummary>) {
        self.history_loading = false;
        self.history = items;
        let selected = match self.history_state.selected() {
            _ if self.history.is_empty() => None,
            Some(i) => Some(i.min(self.history.len() - 1)),
            None => Some(0),
        };
        self.history_state.select(selected);
    }

    pub fn remove_history_item(&mut self, id: &str) {
        self.history.retain(|item| item.id != id);
        let items = std::mem::take(&mut self.history);
        self.set_history(items);
    }

    pub fn selected_history(&self) -> Option<&ResearchSummary> {
        self.history_state.selected().and_then(|i| self.history.get(i))
    }

    pub fn history_nav_down(&mut self) {
        let len = self.history.len();
        if len > 0 {
            let i = self.history_state.selected().unwrap_or(0);
            self.history_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn history_nav_up(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        self.history_state.select(Some(i.saturating_sub(1)));
    }

    /// Tick animation frame and the periodic health check (called by Tick event)
    pub fn on_tick(&mut self) {
        if self.is_streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % HEALTH_EVERY_TICKS == 0 && self.health != HealthState::Checking {
            self.check_health();
        }
    }

    // Scrolling

    pub fn scroll_down(&mut self) {
        match self.view {
            View::Chat => {
                self.chat_scroll = self.chat_scroll.saturating_add(1).min(self.max_chat_scroll());
                self.follow_tail = self.chat_scroll >= self.max_chat_scroll();
            }
            View::Research => self.report_scroll = self.report_scroll.saturating_add(1),
            View::History => self.history_nav_down(),
        }
    }

    pub fn scroll_up(&mut self) {
        match self.view {
            View::Chat => {
                self.chat_scroll = self.chat_scroll.saturating_sub(1);
                self.follow_tail = false;
            }
            View::Research => self.report_scroll = self.report_scroll.saturating_sub(1),
            View::History => self.history_nav_up(),
        }
    }

    pub fn scroll_top(&mut self) {
        match self.view {
            View::Chat => {
                self.chat_scroll = 0;
                self.follow_tail = false;
            }
            View::Research => self.report_scroll = 0,
            View::History => {
                if !self.history.is_empty() {
                    self.history_state.select(Some(0));
                }
            }
        }
    }

    pub fn scroll_bottom(&mut self) {
        match self.view {
            View::Chat => {
                self.follow_tail = true;
                self.scroll_chat_to_bottom();
            }
            View::Research => {}
            View::History => {
                if !self.history.is_empty() {
                    self.history_state.select(Some(self.history.len() - 1));
                }
            }
        }
    }

    /// Scroll chat to bottom so the streaming reply stays visible
    pub fn scroll_chat_to_bottom(&mut self) {
        self.chat_scroll = self.max_chat_scroll();
    }

    fn max_chat_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.chat_content_lines().saturating_sub(visible_height)
    }

    /// Wrapped line count of the transcript as rendered.
    pub fn chat_content_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in self.reconciler.messages() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "AI:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count / wrap_width + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            if let Some(error) = &msg.error {
                let char_count = error.chars().count() + "Error: ".len();
                total_lines = total_lines.saturating_add((char_count / wrap_width + 1) as u16);
            } else if msg.content.is_empty() {
                total_lines = total_lines.saturating_add(1); // "Thinking..." placeholder
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }
        total_lines
    }
}

/// Pump a stream into the event loop, tagged with its request id.
async fn forward(mut events: EventStream, request: RequestId, tx: &EventSender) {
    while let Some(event) = events.next().await {
        if tx.send(AppEvent::Stream { request, event }).is_err() {
            break;
        }
    }
}
