use crate::input::{Action, Command, InputMode, InputState, parse_command};
use crate::model::{FetchScope, ViewKind};
use crate::router::ViewRouter;
use crate::scheduler::{
    DetailOutcome, FetchCycleState, FetchOutcome, FetchResult, RefreshScheduler, key_value_lines,
    row_pairs,
};
use crate::table::FilterableTable;
use std::collections::VecDeque;
use tracing::debug;

const DEBUG_LINE_LIMIT: usize = 200;
const DETAIL_PAGE: u16 = 10;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Refresh,
    Describe { name: String, scope: FetchScope },
}

#[derive(Debug, Clone)]
pub struct DetailOverlay {
    pub title: String,
    pub lines: Vec<String>,
    pub scroll: u16,
    pending: Option<u64>,
}

impl DetailOverlay {
    fn ready(title: String, lines: Vec<String>) -> Self {
        Self {
            title,
            lines,
            scroll: 0,
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn max_scroll(&self) -> u16 {
        u16::try_from(self.lines.len().saturating_sub(1)).unwrap_or(u16::MAX)
    }

    fn scroll_by(&mut self, delta: i32) {
        let next = i32::from(self.scroll).saturating_add(delta);
        self.scroll = next.clamp(0, i32::from(self.max_scroll())) as u16;
    }
}

/// Banner shown between the header and the table, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner<'a> {
    Notice(&'a str),
    Error(&'a str),
    Empty(&'a str),
}

/// UI-thread state. Only the event loop mutates it; background work reports back through
/// [`App::apply_fetch`] and [`App::apply_detail`].
#[derive(Debug)]
pub struct App {
    running: bool,
    user: String,
    table: FilterableTable,
    input: InputState,
    router: ViewRouter,
    cycle: FetchCycleState,
    detail: Option<DetailOverlay>,
    notice: Option<String>,
    show_help: bool,
    debug_enabled: bool,
    debug_lines: VecDeque<String>,
    spinner_tick: usize,
}

impl App {
    pub fn new(user: String, database: String, namespace: String, debug_enabled: bool) -> Self {
        let router = ViewRouter::new(database, namespace);
        let descriptor = router.descriptor();
        let mut table = FilterableTable::default();
        table.clear(descriptor.column_labels());
        table.set_status_column(descriptor.status_column);

        Self {
            running: true,
            user,
            table,
            input: InputState::default(),
            router,
            cycle: FetchCycleState::default(),
            detail: None,
            notice: None,
            show_help: false,
            debug_enabled,
            debug_lines: VecDeque::new(),
            spinner_tick: 0,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn mode(&self) -> InputMode {
        self.input.mode()
    }

    pub fn input(&self) -> &str {
        self.input.buffer()
    }

    pub fn table(&self) -> &FilterableTable {
        &self.table
    }

    pub fn router(&self) -> &ViewRouter {
        &self.router
    }

    pub fn current_view(&self) -> ViewKind {
        self.router.current()
    }

    pub fn namespace(&self) -> &str {
        self.router.namespace()
    }

    pub fn detail(&self) -> Option<&DetailOverlay> {
        self.detail.as_ref()
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled
    }

    pub fn debug_lines(&self) -> impl Iterator<Item = &str> {
        self.debug_lines.iter().map(String::as_str)
    }

    pub fn is_loading(&self) -> bool {
        self.cycle.is_loading(self.router.current())
    }

    pub fn spinner_frame(&self) -> &'static str {
        SPINNER_FRAMES[self.spinner_tick % SPINNER_FRAMES.len()]
    }

    pub fn advance_spinner(&mut self) {
        self.spinner_tick = self.spinner_tick.wrapping_add(1);
    }

    pub fn banner(&self) -> Option<Banner<'_>> {
        if let Some(notice) = &self.notice {
            return Some(Banner::Notice(notice));
        }
        if let Some(error) = self.cycle.last_error() {
            return Some(Banner::Error(error));
        }
        self.cycle.empty_notice().map(Banner::Empty)
    }

    /// Periodic and on-demand fetches only run while the table has focus.
    pub fn fetch_allowed(&self) -> bool {
        self.input.is_normal() && self.detail.is_none()
    }

    /// Asks the scheduler for a fetch of the current view. Returns whether one was started.
    pub fn start_refresh(&mut self, scheduler: &mut RefreshScheduler) -> bool {
        if !self.fetch_allowed() {
            return false;
        }
        let target = self.router.target();
        let scope = self.router.scope_for(&target);
        scheduler.request_fetch(&mut self.cycle, target, scope)
    }

    pub fn await_detail(&mut self, seq: u64) {
        if let Some(detail) = self.detail.as_mut() {
            detail.pending = Some(seq);
        }
    }

    pub fn push_debug_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.trim().is_empty() {
            return;
        }
        if self.debug_lines.len() == DEBUG_LINE_LIMIT {
            self.debug_lines.pop_front();
        }
        self.debug_lines.push_back(line.trim_end().to_string());
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(normalize_status_text(notice.into()));
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if matches!(action, Action::Quit | Action::Interrupt) {
            self.running = false;
            return AppCommand::None;
        }

        if self.show_help && !matches!(action, Action::ToggleHelp) {
            self.show_help = false;
        }

        if !self.input.is_normal() {
            return self.apply_input_action(action);
        }
        if self.detail.is_some() {
            return self.apply_detail_action(action);
        }

        match action {
            Action::Down => {
                self.table.move_selection(1);
                AppCommand::None
            }
            Action::Up => {
                self.table.move_selection(-1);
                AppCommand::None
            }
            Action::PageDown => {
                self.table.page_selection(1);
                AppCommand::None
            }
            Action::PageUp => {
                self.table.page_selection(-1);
                AppCommand::None
            }
            Action::Top => {
                self.table.jump_top();
                AppCommand::None
            }
            Action::Bottom => {
                self.table.jump_bottom();
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::OpenDetail => self.open_detail(),
            Action::Escape => {
                if !self.table.filter().is_empty() {
                    self.table.set_filter("");
                } else {
                    self.notice = None;
                }
                AppCommand::None
            }
            Action::StartFilter => {
                self.notice = None;
                let seed = self.table.filter().to_string();
                self.input.begin(InputMode::Filter, seed);
                AppCommand::None
            }
            Action::StartCommand => {
                self.notice = None;
                self.input.begin(InputMode::Command, "");
                AppCommand::None
            }
            Action::StartNamespace => {
                self.notice = None;
                self.input.begin(InputMode::Command, "ns ");
                AppCommand::None
            }
            Action::SwitchView(view) => self.switch_view(view),
            Action::DrillIn => self.drill_in(),
            Action::Back => {
                if self.router.back() {
                    self.after_view_change()
                } else {
                    AppCommand::None
                }
            }
            Action::Refresh => {
                self.notice = None;
                AppCommand::Refresh
            }
            Action::SubmitInput
            | Action::CancelInput
            | Action::Backspace
            | Action::DeleteWord
            | Action::InputChar(_)
            | Action::Quit
            | Action::Interrupt => AppCommand::None,
        }
    }

    fn apply_input_action(&mut self, action: Action) -> AppCommand {
        match action {
            Action::InputChar(c) => {
                self.input.push(c);
                self.sync_live_filter();
                AppCommand::None
            }
            Action::Backspace => {
                self.input.backspace();
                self.sync_live_filter();
                AppCommand::None
            }
            Action::DeleteWord => {
                self.input.delete_word();
                self.sync_live_filter();
                AppCommand::None
            }
            Action::CancelInput => {
                let mode = self.input.mode();
                self.input.reset();
                if mode == InputMode::Filter {
                    self.table.set_filter("");
                }
                AppCommand::None
            }
            Action::SubmitInput => match self.input.commit() {
                (InputMode::Filter, text) => {
                    self.table.set_filter(text);
                    AppCommand::None
                }
                (InputMode::Command, text) => self.run_command(&text),
                (InputMode::Normal, _) => AppCommand::None,
            },
            _ => AppCommand::None,
        }
    }

    fn apply_detail_action(&mut self, action: Action) -> AppCommand {
        let Some(detail) = self.detail.as_mut() else {
            return AppCommand::None;
        };
        match action {
            Action::Down => detail.scroll_by(1),
            Action::Up => detail.scroll_by(-1),
            Action::PageDown => detail.scroll_by(i32::from(DETAIL_PAGE)),
            Action::PageUp => detail.scroll_by(-i32::from(DETAIL_PAGE)),
            Action::Top => detail.scroll = 0,
            Action::Bottom => detail.scroll = detail.max_scroll(),
            Action::Escape | Action::OpenDetail => self.detail = None,
            Action::ToggleHelp => self.show_help = !self.show_help,
            _ => {}
        }
        AppCommand::None
    }

    fn sync_live_filter(&mut self) {
        if self.input.mode() == InputMode::Filter {
            let text = self.input.buffer().to_string();
            self.table.set_filter(text);
        }
    }

    fn run_command(&mut self, line: &str) -> AppCommand {
        match parse_command(line) {
            Command::Empty => AppCommand::None,
            Command::View(ViewKind::Instances) if self.router.current() == ViewKind::Services => {
                self.drill_in()
            }
            Command::View(view) => self.switch_view(view),
            Command::Namespace(None) => {
                self.set_notice("Usage: :ns <schema>");
                AppCommand::None
            }
            Command::Namespace(Some(namespace)) => {
                if !self.router.set_namespace(&namespace) {
                    return AppCommand::None;
                }
                debug!(namespace = %self.router.namespace(), "namespace changed");
                self.after_view_change()
            }
            Command::Help => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Command::Unknown(token) => {
                self.set_notice(format!("Unknown command: {token}"));
                AppCommand::None
            }
        }
    }

    fn switch_view(&mut self, view: ViewKind) -> AppCommand {
        match self.router.switch_view(view) {
            Ok(()) => self.after_view_change(),
            Err(error) => {
                self.set_notice(error.to_string());
                AppCommand::None
            }
        }
    }

    fn drill_in(&mut self) -> AppCommand {
        let selected = self.table.selected_row().cloned();
        match self.router.drill_into(selected.as_ref()) {
            Ok(()) => self.after_view_change(),
            Err(error) => {
                self.set_notice(error.to_string());
                AppCommand::None
            }
        }
    }

    fn after_view_change(&mut self) -> AppCommand {
        let descriptor = self.router.descriptor();
        debug!(view = %descriptor.kind, parent = ?self.router.parent(), "view changed");
        self.table.clear(descriptor.column_labels());
        self.table.set_status_column(descriptor.status_column);
        self.input.reset();
        self.cycle.clear_banners();
        self.notice = None;
        self.detail = None;
        AppCommand::Refresh
    }

    fn open_detail(&mut self) -> AppCommand {
        let Some(row) = self.table.selected_row().cloned() else {
            return AppCommand::None;
        };

        if self.router.current() == ViewKind::Services {
            let identity = self.router.descriptor().identity_column;
            let name = row.cells.get(identity).cloned().unwrap_or(row.key);
            let scope = self.router.scope_for(&self.router.target());
            self.detail = Some(DetailOverlay {
                title: format!("Service {name}"),
                lines: vec![format!("Describing {name}...")],
                scroll: 0,
                pending: None,
            });
            return AppCommand::Describe { name, scope };
        }

        let lines = key_value_lines(row_pairs(self.table.columns(), &row));
        let title = format!("{} {}", self.router.current().title(), row.key);
        self.detail = Some(DetailOverlay::ready(title, lines));
        AppCommand::None
    }

    /// Applies a finished describe. Outcomes for a closed or re-targeted overlay are ignored.
    pub fn apply_detail(&mut self, outcome: DetailOutcome) {
        let Some(detail) = self.detail.as_mut() else {
            return;
        };
        if detail.pending != Some(outcome.seq) {
            return;
        }
        detail.lines = outcome.lines;
        detail.pending = None;
        detail.scroll = 0;
    }

    /// Applies a finished fetch. Completions for a target the user has navigated away from
    /// are dropped; the return value asks for a fresh fetch when the dropped one belonged to
    /// the current view.
    pub fn apply_fetch(&mut self, outcome: FetchOutcome) -> AppCommand {
        self.cycle.release(outcome.target.view, outcome.seq);

        let current = self.router.target();
        if outcome.target != current {
            debug!(view = %outcome.target.view, seq = outcome.seq, "discarding stale fetch");
            let retry = outcome.target.view == current.view
                && !matches!(outcome.result, FetchResult::Cancelled);
            return if retry {
                AppCommand::Refresh
            } else {
                AppCommand::None
            };
        }

        match outcome.result {
            FetchResult::Rows(set) => {
                let notice = set
                    .is_empty()
                    .then(|| self.router.empty_notice(&current));
                self.cycle.record_rows(notice);

                let previous = self.table.selected_row().map(|row| row.key.clone());
                self.table.set_data(set.columns, set.rows);
                if let Some(key) = previous {
                    self.table.select_key(&key);
                }
            }
            FetchResult::Failed(error) => {
                let banner = format!(
                    "Error fetching {}: {} (ctrl+r to retry)",
                    current.view.noun(),
                    summarize_error_line(&error)
                );
                self.cycle.record_error(normalize_status_text(banner));
            }
            FetchResult::Cancelled => {}
        }
        AppCommand::None
    }
}

fn summarize_error_line(error: &str) -> String {
    error
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

fn normalize_status_text(status: String) -> String {
    const MAX_STATUS_LEN: usize = 180;
    if status.chars().count() <= MAX_STATUS_LEN {
        return status;
    }

    let mut shortened = status
        .chars()
        .take(MAX_STATUS_LEN.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}
