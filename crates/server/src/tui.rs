use std::collections::VecDeque;

use log::Level;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Tabs};
use railsync::{NetworkStats, PeerId, PlayerInfo, ServerStats};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Log,
    Players,
}

impl Tab {
    const ALL: [Tab; 2] = [Tab::Log, Tab::Players];

    fn title(self) -> &'static str {
        match self {
            Tab::Log => "Log",
            Tab::Players => "Players",
        }
    }

    fn index(self) -> usize {
        match self {
            Tab::Log => 0,
            Tab::Players => 1,
        }
    }
}

struct LogLine {
    level: Level,
    text: String,
}

/// Everything the dashboard needs besides the live server numbers.
pub struct TuiState {
    lines: VecDeque<LogLine>,
    scroll: usize,
    tab: Tab,
    selected: usize,
    pending_kick: Option<PeerId>,
}

/// Numbers sampled from the server once per frame.
pub struct Snapshot<'a> {
    pub uptime_secs: u64,
    pub port: u16,
    pub max_players: usize,
    pub stats: ServerStats,
    pub network: &'a NetworkStats,
    pub players: &'a [PlayerInfo],
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            scroll: 0,
            tab: Tab::Log,
            selected: 0,
            pending_kick: None,
        }
    }

    pub fn log(&mut self, level: Level, text: impl Into<String>) {
        if self.lines.len() == MAX_LOG_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            level,
            text: text.into(),
        });
    }

    pub fn log_info(&mut self, text: impl Into<String>) {
        self.log(Level::Info, text);
    }

    pub fn log_warn(&mut self, text: impl Into<String>) {
        self.log(Level::Warn, text);
    }

    pub fn log_error(&mut self, text: impl Into<String>) {
        self.log(Level::Error, text);
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn prev_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len()];
    }

    /// Scroll is counted in lines up from the newest entry.
    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 10).min(self.lines.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(10);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn request_kick(&mut self, players: &[PlayerInfo]) {
        if let Some(player) = players.get(self.selected) {
            self.pending_kick = Some(player.id);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<PeerId> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, snapshot: &Snapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], snapshot);
    render_capacity(frame, chunks[1], snapshot);
    render_network(frame, chunks[2], snapshot.network);
    render_tabs(frame, chunks[3], state.tab);
    match state.tab {
        Tab::Log => render_log(frame, chunks[4], state),
        Tab::Players => render_players(frame, chunks[4], state, snapshot.players),
    }
    render_help(frame, chunks[5], state.tab);
}

fn render_header(frame: &mut Frame, area: Rect, snapshot: &Snapshot) {
    let title = format!(
        " Railsync Server - Uptime: {} ",
        format_duration(snapshot.uptime_secs)
    );

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let stats = &snapshot.stats;
    let text = format!(
        "Port: {}  |  Connections: {}  |  Loading: {}  |  Logins: {} accepted / {} denied",
        snapshot.port,
        stats.connected,
        stats.players.saturating_sub(stats.ready),
        stats.logins_accepted,
        stats.logins_denied
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, snapshot: &Snapshot) {
    let block = Block::default()
        .title(" Players ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let max = snapshot.max_players.max(1);
    let ratio = snapshot.stats.ready as f64 / max as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!(
            "{}/{} players",
            snapshot.stats.ready, snapshot.max_players
        ));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, net: &NetworkStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv / {} resent",
                    net.packets_sent, net.packets_received, net.packets_resent
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("RTT: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.1}ms (+/- {:.1}ms)", net.rtt_ms, net.rtt_variance),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Packet Loss: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:.1}%", net.packet_loss_percent),
                Style::default().fg(if net.packet_loss_percent > 5.0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_tabs(frame: &mut Frame, area: Rect, active: Tab) {
    let tabs = Tabs::new(Tab::ALL.iter().map(|tab| tab.title()))
        .block(Block::default().borders(Borders::ALL))
        .select(active.index())
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(tabs, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.lines.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);
    let lines: Vec<Line> = state
        .lines
        .range(start..end)
        .map(|line| {
            Line::from(vec![
                Span::styled(
                    format!("{:<5} ", line.level),
                    Style::default().fg(level_color(line.level)),
                ),
                Span::raw(line.text.as_str()),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_players(frame: &mut Frame, area: Rect, state: &TuiState, players: &[PlayerInfo]) {
    let block = Block::default()
        .title(" Connected ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    if players.is_empty() {
        let empty = Paragraph::new("No players connected")
            .block(block)
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let lines: Vec<Line> = players
        .iter()
        .enumerate()
        .map(|(index, player)| {
            let status = if player.ready { "playing" } else { "loading" };
            let text = format!(
                "{:>3}  {:<24} {:>5}ms  {}",
                player.id, player.username, player.ping, status
            );
            let style = if index == state.selected {
                Style::default().fg(Color::Black).bg(Color::Cyan)
            } else {
                Style::default().fg(Color::White)
            };
            Line::styled(text, style)
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect, tab: Tab) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let help = match tab {
        Tab::Log => "q/ESC quit  |  Tab switch  |  PgUp/PgDn scroll  |  End follow",
        Tab::Players => "q/ESC quit  |  Tab switch  |  Up/Down select  |  k kick",
    };
    let text = Paragraph::new(help).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::White,
        Level::Debug | Level::Trace => Color::DarkGray,
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: u8, name: &str) -> PlayerInfo {
        PlayerInfo {
            id: PeerId(id),
            username: name.to_string(),
            ping: 20,
            ready: true,
        }
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..MAX_LOG_LINES + 5 {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.lines.len(), MAX_LOG_LINES);
        assert_eq!(state.lines[0].text, "line 5");
    }

    #[test]
    fn test_kick_targets_selection() {
        let players = [player(0, "alice"), player(4, "bob")];
        let mut state = TuiState::new();

        state.select_next(players.len());
        state.request_kick(&players);

        assert_eq!(state.take_pending_kick(), Some(PeerId(4)));
        assert_eq!(state.take_pending_kick(), None);
    }

    #[test]
    fn test_selection_wraps() {
        let mut state = TuiState::new();
        state.select_prev(3);
        assert_eq!(state.selected, 2);
        state.select_next(3);
        assert_eq!(state.selected, 0);
        state.select_next(0);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn test_tabs_cycle() {
        let mut state = TuiState::new();
        state.next_tab();
        assert_eq!(state.active_tab(), Tab::Players);
        state.next_tab();
        assert_eq!(state.active_tab(), Tab::Log);
        state.prev_tab();
        assert_eq!(state.active_tab(), Tab::Players);
    }

    #[test]
    fn test_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_duration(3725), "01:02:05");
    }
}
