use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use chatwire::models::{Conversation, ConversationId, Message, MessageId, MessageType, UserId};
use chatwire::store::Snapshot;

use crate::utils::format_file_size;

pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// What the user asked for. The main loop turns these into store actions.
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Quit,
    Select(Conversation),
    Send(String),
    SendFile(PathBuf),
    Search(String),
    OpenChat(UserId),
    LoadMore(u32),
    MarkRead(MessageId),
    DismissError,
    InputChanged,
}

/// A line typed into the input box.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Text(String),
    File(PathBuf),
    Search(String),
    Dm(usize),
    More,
    Read,
    Help,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Text(line.to_string());
    };
    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    match name {
        "file" if !argument.is_empty() => Command::File(PathBuf::from(argument)),
        "search" => Command::Search(argument.to_string()),
        "dm" => match argument.parse::<usize>() {
            Ok(index) if index > 0 => Command::Dm(index),
            _ => Command::Unknown(line.to_string()),
        },
        "more" => Command::More,
        "read" => Command::Read,
        "help" => Command::Help,
        // "//text" sends "/text"
        _ if rest.starts_with('/') => Command::Text(rest.to_string()),
        _ => Command::Unknown(line.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Turns input edits into typing start/stop frames: start on the first edit,
/// stop once the input is cleared, sent, or left idle.
pub struct TypingTracker {
    typing: bool,
    last_edit: Option<Instant>,
    idle: Duration,
}

impl TypingTracker {
    pub fn new(idle: Duration) -> Self {
        TypingTracker {
            typing: false,
            last_edit: None,
            idle,
        }
    }

    pub fn update(&mut self, has_text: bool, edited: bool, now: Instant) -> Option<TypingSignal> {
        if edited {
            self.last_edit = Some(now);
        }
        if has_text && edited && !self.typing {
            self.typing = true;
            return Some(TypingSignal::Start);
        }
        if !self.typing {
            return None;
        }
        let idle = self
            .last_edit
            .map(|last| now.duration_since(last) >= self.idle)
            .unwrap_or(true);
        if !has_text || idle {
            self.typing = false;
            return Some(TypingSignal::Stop);
        }
        None
    }

    pub fn sent(&mut self) -> Option<TypingSignal> {
        if self.typing {
            self.typing = false;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tab {
    Conversations,
    Messages,
}

pub struct ChatUI {
    input: Input,
    active_tab: Tab,
    selected: usize,
    selected_result: usize,
    next_page: u32,
    active_id: Option<ConversationId>,
    help_visible: bool,
    notice: Option<String>,
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            input: Input::default(),
            active_tab: Tab::Conversations,
            selected: 0,
            selected_result: 0,
            next_page: 2,
            active_id: None,
            help_visible: false,
            notice: None,
        }
    }

    pub fn has_input(&self) -> bool {
        !self.input.value().trim().is_empty()
    }

    pub fn set_notice(&mut self, notice: &str) {
        self.notice = Some(notice.to_string());
    }

    /// Keep the selection on the active conversation and reset paging when it changes.
    pub fn sync(&mut self, snapshot: &Snapshot) {
        let active_id = snapshot.active.as_ref().map(|c| c.id);
        if active_id != self.active_id {
            self.active_id = active_id;
            self.next_page = 2;
            if let Some(index) = active_id
                .and_then(|id| snapshot.conversations.iter().position(|c| c.id == id))
            {
                self.selected = index;
            }
        }
        if self.selected >= snapshot.conversations.len() {
            self.selected = snapshot.conversations.len().saturating_sub(1);
        }
        if self.selected_result >= snapshot.search_results.len() {
            self.selected_result = 0;
        }
    }

    fn searching(snapshot: &Snapshot) -> bool {
        snapshot.search_loading || !snapshot.search_results.is_empty()
    }

    fn next_page(&mut self) -> u32 {
        let page = self.next_page;
        self.next_page += 1;
        page
    }

    pub fn handle_input(&mut self, snapshot: &Snapshot) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(10))? {
            return Ok(None);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }

        if self.help_visible {
            // Any key closes the help dialog
            self.help_visible = false;
            return Ok(None);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Ok(Some(UiAction::Quit)),
            KeyCode::Tab => {
                self.active_tab = match self.active_tab {
                    Tab::Conversations => Tab::Messages,
                    Tab::Messages => Tab::Conversations,
                };
            }
            KeyCode::Char('h') if ctrl => self.help_visible = true,
            KeyCode::Char('e') if ctrl => return Ok(Some(UiAction::DismissError)),
            KeyCode::Char('s') if ctrl => return Ok(Some(UiAction::Search(String::new()))),
            KeyCode::PageUp => {
                if snapshot.active.is_some() {
                    return Ok(Some(UiAction::LoadMore(self.next_page())));
                }
            }
            KeyCode::Up | KeyCode::Down if self.active_tab == Tab::Conversations => {
                let up = key.code == KeyCode::Up;
                let (index, len) = if Self::searching(snapshot) {
                    (&mut self.selected_result, snapshot.search_results.len())
                } else {
                    (&mut self.selected, snapshot.conversations.len())
                };
                if len > 0 {
                    *index = if up { (*index + len - 1) % len } else { (*index + 1) % len };
                }
            }
            KeyCode::Enter if self.active_tab == Tab::Conversations => {
                if Self::searching(snapshot) {
                    if let Some(user) = snapshot.search_results.get(self.selected_result) {
                        return Ok(Some(UiAction::OpenChat(user.id)));
                    }
                } else if let Some(conversation) = snapshot.conversations.get(self.selected) {
                    self.active_tab = Tab::Messages;
                    return Ok(Some(UiAction::Select(conversation.clone())));
                }
            }
            KeyCode::Enter => {
                let line = self.input.value().to_string();
                self.input = Input::default();
                return Ok(self.command_action(parse_command(&line), snapshot));
            }
            _ if self.active_tab == Tab::Messages => {
                if self.input.handle_event(&Event::Key(key)).is_some() {
                    return Ok(Some(UiAction::InputChanged));
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn command_action(&mut self, command: Command, snapshot: &Snapshot) -> Option<UiAction> {
        debug!("UI command: {:?}", command);
        match command {
            Command::Text(text) if text.is_empty() => None,
            Command::Text(text) => Some(UiAction::Send(text)),
            Command::File(path) => Some(UiAction::SendFile(path)),
            Command::Search(query) => {
                self.selected_result = 0;
                if !query.is_empty() {
                    self.active_tab = Tab::Conversations;
                }
                Some(UiAction::Search(query))
            }
            Command::Dm(index) => match snapshot.search_results.get(index - 1) {
                Some(user) => Some(UiAction::OpenChat(user.id)),
                None => {
                    self.set_notice(&format!("No search result #{}", index));
                    None
                }
            },
            Command::More => snapshot
                .active
                .as_ref()
                .map(|_| UiAction::LoadMore(self.next_page())),
            Command::Read => snapshot.newest().map(|m| UiAction::MarkRead(m.id)),
            Command::Help => {
                self.help_visible = true;
                None
            }
            Command::Unknown(line) => {
                self.set_notice(&format!("Unknown command: {}", line));
                None
            }
        }
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, snapshot: &Snapshot) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages
                Constraint::Length(1), // Typing indicator
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Status line
            ])
            .split(chunks[1]);

        let focus = |tab: Tab| {
            if self.active_tab == tab {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            }
        };

        if Self::searching(snapshot) {
            self.draw_search_results(frame, snapshot, chunks[0], focus(Tab::Conversations));
        } else {
            self.draw_conversations(frame, snapshot, chunks[0], focus(Tab::Conversations));
        }

        draw_messages(frame, snapshot, chat_chunks[0]);

        let typing = match snapshot.typing_users.len() {
            0 => String::new(),
            1 => format!("{} is typing...", snapshot.typing_users[0]),
            _ => format!("{} are typing...", snapshot.typing_users.join(", ")),
        };
        frame.render_widget(
            Paragraph::new(typing).style(Style::default().fg(Color::Gray)),
            chat_chunks[1],
        );

        let input_widget = Paragraph::new(self.input.value()).block(
            Block::default()
                .title("Message (/help for commands)")
                .borders(Borders::ALL)
                .border_style(focus(Tab::Messages)),
        );
        frame.render_widget(input_widget, chat_chunks[2]);

        frame.render_widget(self.status_line(snapshot), chat_chunks[3]);

        if self.active_tab == Tab::Messages {
            frame.set_cursor(
                chat_chunks[2].x + self.input.cursor() as u16 + 1,
                chat_chunks[2].y + 1,
            );
        }

        if self.help_visible {
            draw_help_dialog(frame, size);
        }
    }

    fn draw_conversations<B: Backend>(
        &self,
        frame: &mut Frame<B>,
        snapshot: &Snapshot,
        area: Rect,
        border: Style,
    ) {
        let items: Vec<ListItem> = snapshot
            .conversations
            .iter()
            .enumerate()
            .map(|(i, conversation)| {
                let online = conversation
                    .other_participant
                    .as_ref()
                    .map(|other| snapshot.is_online(other.id))
                    .unwrap_or(false);
                let marker = if i == self.selected { ">" } else { " " };
                let dot = if online { "● " } else { "○ " };
                let unread = if conversation.unread_count > 0 {
                    format!(" ({})", conversation.unread_count)
                } else {
                    String::new()
                };
                let style = if snapshot.active.as_ref().map(|a| a.id) == Some(conversation.id) {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(format!(
                    "{}{}{}{}",
                    marker,
                    dot,
                    conversation.display_name(),
                    unread
                ))
                .style(style)
            })
            .collect();

        let title = if snapshot.loading && snapshot.conversations.is_empty() {
            "Conversations (loading...)"
        } else {
            "Conversations (Tab to focus)"
        };
        let list = List::new(items).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border),
        );
        frame.render_widget(list, area);
    }

    fn draw_search_results<B: Backend>(
        &self,
        frame: &mut Frame<B>,
        snapshot: &Snapshot,
        area: Rect,
        border: Style,
    ) {
        let items: Vec<ListItem> = snapshot
            .search_results
            .iter()
            .enumerate()
            .map(|(i, user)| {
                let marker = if i == self.selected_result { ">" } else { " " };
                ListItem::new(format!(
                    "{}{}. {} (@{})",
                    marker,
                    i + 1,
                    user.display_name(),
                    user.username
                ))
            })
            .collect();

        let title = if snapshot.search_loading {
            "Search (searching...)"
        } else {
            "Search (Enter to chat, Ctrl+S to close)"
        };
        let list = List::new(items).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(border),
        );
        frame.render_widget(list, area);
    }

    fn status_line(&self, snapshot: &Snapshot) -> Paragraph<'static> {
        let (connection, connection_style) = match (&snapshot.active, snapshot.connected) {
            (None, _) => ("no conversation", Style::default().fg(Color::Gray)),
            (Some(_), true) => ("live", Style::default().fg(Color::Green)),
            (Some(_), false) => ("offline (HTTP)", Style::default().fg(Color::Red)),
        };

        let mut spans = vec![
            Span::styled("ESC quit | TAB switch | PgUp older | Ctrl+H help [", Style::default().fg(Color::Gray)),
            Span::styled(connection, connection_style),
            Span::styled("]", Style::default().fg(Color::Gray)),
        ];
        if snapshot.loading_more {
            spans.push(Span::styled(" loading older...", Style::default().fg(Color::Gray)));
        }
        if let Some(error) = &snapshot.error {
            spans.push(Span::styled(format!(" {}", error), Style::default().fg(Color::Red)));
        } else if let Some(notice) = &self.notice {
            spans.push(Span::styled(format!(" {}", notice), Style::default().fg(Color::Yellow)));
        }
        Paragraph::new(Line::from(spans))
    }
}

fn message_lines(message: &Message, width: usize) -> Vec<ListItem<'static>> {
    let timestamp = message
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");

    let body = match message.attachment() {
        Some(attachment) => format!(
            "{} [file: {} ({})]",
            message.content,
            attachment.file_name,
            format_file_size(attachment.file_size)
        ),
        None => message.content.clone(),
    };
    let full = match message.message_type {
        MessageType::System => format!("[{}] * {}", timestamp, body),
        _ => format!("[{}] {}: {}", timestamp, message.sender.display_name(), body),
    };

    let style = match message.message_type {
        MessageType::System => Style::default().fg(Color::Gray),
        MessageType::File | MessageType::Image => Style::default().fg(Color::Cyan),
        MessageType::Text => Style::default(),
    };

    wrap(&full, width.max(1))
        .into_iter()
        .map(|line| ListItem::new(Text::from(line.into_owned())).style(style))
        .collect()
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, snapshot: &Snapshot, area: Rect) {
    let wrap_width = area.width.saturating_sub(2) as usize;

    let items: Vec<ListItem> = snapshot
        .timeline()
        .flat_map(|m| message_lines(m, wrap_width))
        .collect();

    let title = match &snapshot.active {
        Some(conversation) if snapshot.loading => format!("{} (loading...)", conversation.display_name()),
        Some(conversation) => conversation.display_name(),
        None => "Select a conversation".to_string(),
    };

    // Select the last line so the list scrolls to the newest message
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_width = 64.min(area.width.saturating_sub(4));
    let popup_height = 18.min(area.height.saturating_sub(4));
    let popup_area = Rect::new(
        (area.width - popup_width) / 2,
        (area.height - popup_height) / 2,
        popup_width,
        popup_height,
    );

    let shortcuts = [
        ("ESC", "Quit"),
        ("Tab", "Switch between conversations and input"),
        ("Up/Down", "Move through conversations or search results"),
        ("Enter", "Open conversation / send message"),
        ("PgUp", "Load older messages"),
        ("Ctrl+S", "Close search results"),
        ("Ctrl+E", "Dismiss error"),
        ("/file PATH", "Send a file (10 MB max)"),
        ("/search TEXT", "Search users"),
        ("/dm N", "Open a private chat with search result N"),
        ("/more", "Load older messages"),
        ("/read", "Mark the newest message read"),
    ];
    let items: Vec<ListItem> = shortcuts
        .iter()
        .map(|(key, description)| ListItem::new(format!("{:<14} {}", key, description)))
        .collect();

    f.render_widget(Clear, popup_area);
    let list = List::new(items)
        .block(
            Block::default()
                .title("Help (any key to close)")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .style(Style::default().fg(Color::Green));
    f.render_widget(list, popup_area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
