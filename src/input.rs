use crate::model::ViewKind;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Filter,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Interrupt,
    Down,
    Up,
    PageDown,
    PageUp,
    Top,
    Bottom,
    ToggleHelp,
    OpenDetail,
    Escape,
    StartFilter,
    StartCommand,
    StartNamespace,
    SwitchView(ViewKind),
    DrillIn,
    Back,
    Refresh,
    SubmitInput,
    CancelInput,
    Backspace,
    DeleteWord,
    InputChar(char),
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Interrupt);
    }
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Filter | InputMode::Command => map_input_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::Refresh)
        }
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::PageDown)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::PageUp),
        KeyCode::Char(_) if key.modifiers.contains(KeyModifiers::CONTROL) => None,
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('/') => Some(Action::StartFilter),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char(';') if key.modifiers.contains(KeyModifiers::SHIFT) => {
            Some(Action::StartCommand)
        }
        KeyCode::Char('n') => Some(Action::StartNamespace),
        KeyCode::Char('s') => Some(Action::SwitchView(ViewKind::Services)),
        KeyCode::Char('p') => Some(Action::SwitchView(ViewKind::Pools)),
        KeyCode::Char('r') => Some(Action::SwitchView(ViewKind::Repos)),
        KeyCode::Char('i') => Some(Action::DrillIn),
        KeyCode::Char('b') => Some(Action::Back),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Enter => Some(Action::OpenDetail),
        KeyCode::Esc => Some(Action::Escape),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Char('w') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::DeleteWord)
        }
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

/// Transient text buffer for the Filter and Command modes. Only one mode is active at a time.
#[derive(Debug, Clone)]
pub struct InputState {
    mode: InputMode,
    buffer: String,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            mode: InputMode::Normal,
            buffer: String::new(),
        }
    }
}

impl InputState {
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_normal(&self) -> bool {
        self.mode == InputMode::Normal
    }

    pub fn begin(&mut self, mode: InputMode, seed: impl Into<String>) {
        self.mode = mode;
        self.buffer = seed.into();
    }

    pub fn push(&mut self, c: char) {
        self.buffer.push(c);
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    pub fn delete_word(&mut self) {
        while self.buffer.ends_with(' ') {
            self.buffer.pop();
        }
        while !self.buffer.ends_with(' ') && !self.buffer.is_empty() {
            self.buffer.pop();
        }
    }

    /// Returns to Normal and hands back the trimmed text together with the mode it was typed in.
    pub fn commit(&mut self) -> (InputMode, String) {
        let mode = self.mode;
        let text = self.buffer.trim().to_string();
        self.reset();
        (mode, text)
    }

    pub fn reset(&mut self) {
        self.mode = InputMode::Normal;
        self.buffer.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    View(ViewKind),
    Namespace(Option<String>),
    Help,
    Unknown(String),
}

/// Parses the `:` mini-language. Only the first token is case-insensitive.
pub fn parse_command(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Command::Empty;
    };

    match first.to_ascii_lowercase().as_str() {
        "ns" | "namespace" | "schema" => Command::Namespace(parts.next().map(str::to_string)),
        "help" | "?" => Command::Help,
        token => match ViewKind::from_token(token) {
            Some(view) => Command::View(view),
            None => Command::Unknown(first.to_string()),
        },
    }
}
