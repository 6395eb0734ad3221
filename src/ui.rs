use anyhow::Result;
use bnf_map_checker::period::format_period;
use bnf_map_checker::{CollisionRecord, ReconciliationReport};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

const PAGE_STEP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Lingering,
    Collisions,
    PartialCodes,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Lingering => Page::Collisions,
            Page::Collisions => Page::PartialCodes,
            Page::PartialCodes => Page::Lingering,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Lingering => Page::PartialCodes,
            Page::Collisions => Page::Lingering,
            Page::PartialCodes => Page::Collisions,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Lingering => "Old Codes After Change",
            Page::Collisions => "New Code Usage",
            Page::PartialCodes => "Partial Codes",
        }
    }
}

pub struct App {
    pub report: ReconciliationReport,
    pub current_page: Page,
    pub lingering_state: TableState,
    pub collisions_state: TableState,
    pub partial_state: TableState,
    pub coexisting_only: bool,
    pub show_detail: bool,
}

impl App {
    pub fn new(report: ReconciliationReport) -> Self {
        let mut app = Self {
            report,
            current_page: Page::Lingering,
            lingering_state: TableState::default(),
            collisions_state: TableState::default(),
            partial_state: TableState::default(),
            coexisting_only: false,
            show_detail: false,
        };
        app.reset_selection(Page::Lingering);
        app.reset_selection(Page::Collisions);
        app.reset_selection(Page::PartialCodes);
        app
    }

    pub fn visible_collisions(&self) -> Vec<&CollisionRecord> {
        self.report
            .collisions
            .iter()
            .filter(|c| !self.coexisting_only || c.coexisting())
            .collect()
    }

    fn row_count(&self, page: Page) -> usize {
        match page {
            Page::Lingering => self.report.reconciled.len(),
            Page::Collisions => self.visible_collisions().len(),
            Page::PartialCodes => self.report.partial_matches.len(),
        }
    }

    fn state_mut(&mut self, page: Page) -> &mut TableState {
        match page {
            Page::Lingering => &mut self.lingering_state,
            Page::Collisions => &mut self.collisions_state,
            Page::PartialCodes => &mut self.partial_state,
        }
    }

    fn reset_selection(&mut self, page: Page) {
        let selected = if self.row_count(page) > 0 { Some(0) } else { None };
        self.state_mut(page).select(selected);
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn toggle_coexisting_only(&mut self) {
        self.coexisting_only = !self.coexisting_only;
        self.reset_selection(Page::Collisions);
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    /// Move the selection by `delta` rows; single steps wrap around the ends
    fn move_selection(&mut self, delta: isize) {
        let page = self.current_page;
        let len = self.row_count(page);
        if len == 0 {
            return;
        }
        let current = self.state_mut(page).selected().unwrap_or(0) as isize;
        let last = len as isize - 1;
        let next = match delta {
            1 if current >= last => 0,
            -1 if current == 0 => last,
            _ => (current + delta).clamp(0, last),
        };
        self.state_mut(page).select(Some(next as usize));
    }

    pub fn next(&mut self) {
        self.move_selection(1);
    }

    pub fn previous(&mut self) {
        self.move_selection(-1);
    }

    pub fn page_down(&mut self) {
        self.move_selection(PAGE_STEP as isize);
    }

    pub fn page_up(&mut self) {
        self.move_selection(-(PAGE_STEP as isize));
    }

    pub fn home(&mut self) {
        let page = self.current_page;
        self.reset_selection(page);
    }

    pub fn end(&mut self) {
        let page = self.current_page;
        let len = self.row_count(page);
        if len > 0 {
            self.state_mut(page).select(Some(len - 1));
        }
    }

    /// Collision record for the selected lingering rule
    pub fn selected_collision(&self) -> Option<&CollisionRecord> {
        let record = self
            .lingering_state
            .selected()
            .and_then(|i| self.report.reconciled.get(i))?;
        self.report.collisions.iter().find(|c| {
            c.old_code == record.old_code
                && c.new_code == record.new_code
                && c.old_name == record.name
                && c.effective_date == record.effective_date
        })
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('x') if app.current_page == Page::Collisions => {
                    app.toggle_coexisting_only()
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.home(),
                KeyCode::End => app.end(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Lingering {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[1]);

        render_lingering(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Lingering => render_lingering(f, chunks[1], app),
            Page::Collisions => render_collisions(f, chunks[1], app),
            Page::PartialCodes => render_partial(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Lingering, Page::Collisions, Page::PartialCodes];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    let stats = &app.report.stats;
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Facts: {}", stats.facts_considered),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Lingering: {}", app.report.reconciled.len()),
        Style::default().fg(Color::Red),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Coexisting: {}", app.report.coexisting_count()),
        Style::default().fg(Color::Magenta),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn framed<'a>(table: Table<'a>, title: &'a str) -> Table<'a> {
    table
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(title),
        )
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("→ ")
}

fn render_lingering(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.report.reconciled.iter().map(|r| {
        Row::new(vec![
            Cell::from(r.old_code.clone()),
            Cell::from(r.new_code.clone()),
            Cell::from(truncate(&r.name, 40)),
            Cell::from(format_period(r.effective_date)),
            Cell::from(r.total_items.to_string()).style(Style::default().fg(Color::Red)),
            Cell::from(format_period(r.latest_period)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(17),
            Constraint::Length(17),
            Constraint::Length(42),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(12),
        ],
    )
    .header(header_row(&["Old Code", "New Code", "Name", "Changed", "Items", "Latest"]));

    let table = framed(table, " Prescribing After Change Date ");
    f.render_stateful_widget(table, area, &mut app.lingering_state);
}

fn render_collisions(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_collisions()
        .into_iter()
        .map(|c| {
            let color = if c.coexisting() { Color::Magenta } else { Color::Green };
            Row::new(vec![
                Cell::from(c.old_code.clone()),
                Cell::from(c.new_code.clone()),
                Cell::from(truncate(&c.old_name, 30)),
                Cell::from(c.old_code_items.to_string()),
                Cell::from(c.new_code_items.to_string()).style(Style::default().fg(color)),
                Cell::from(truncate(&c.new_code_names.join("; "), 30)),
            ])
        })
        .collect();

    let title = if app.coexisting_only {
        " New Code Usage (coexisting only) "
    } else {
        " New Code Usage "
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(17),
            Constraint::Length(17),
            Constraint::Length(32),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Min(20),
        ],
    )
    .header(header_row(&[
        "Old Code",
        "New Code",
        "Old Name",
        "Old Items",
        "New Items",
        "Names On New Code",
    ]));

    f.render_stateful_widget(framed(table, title), area, &mut app.collisions_state);
}

fn render_partial(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.report.partial_matches.iter().map(|p| {
        Row::new(vec![
            Cell::from(p.old_code.clone()),
            Cell::from(p.new_code.clone()),
            Cell::from(p.matched_code.clone()),
            Cell::from(truncate(&p.name, 40)),
            Cell::from(p.total_items.to_string()),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(17),
            Constraint::Length(17),
            Constraint::Length(17),
            Constraint::Length(42),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Old Code", "New Code", "Matched Code", "Name", "Items"]));

    f.render_stateful_widget(framed(table, " Family-Level Matches "), area, &mut app.partial_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &mut App) {
    let page = app.current_page;
    let total = app.row_count(page);
    let selected = app.state_mut(page).selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Details | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    if page == Page::Collisions {
        status_spans.push(Span::styled("x", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" Coexisting only | "));
    }
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let label = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let lines = match (
        app.lingering_state.selected().and_then(|i| app.report.reconciled.get(i)),
        app.selected_collision(),
    ) {
        (Some(record), collision) => {
            let mut lines = vec![
                Line::from(vec![
                    Span::styled("Old code:  ", label),
                    Span::raw(record.old_code.clone()),
                ]),
                Line::from(vec![
                    Span::styled("New code:  ", label),
                    Span::raw(record.new_code.clone()),
                ]),
                Line::from(vec![
                    Span::styled("Name:      ", label),
                    Span::raw(record.name.clone()),
                ]),
                Line::from(vec![
                    Span::styled("Changed:   ", label),
                    Span::raw(format_period(record.effective_date)),
                ]),
                Line::from(vec![
                    Span::styled("Items:     ", label),
                    Span::raw(record.total_items.to_string()),
                ]),
                Line::from(vec![
                    Span::styled("Latest:    ", label),
                    Span::raw(format_period(record.latest_period)),
                ]),
                Line::from(""),
            ];
            match collision {
                Some(c) if c.new_code_items > 0 => {
                    lines.push(Line::from(Span::styled(
                        "New code already carries prescribing:",
                        Style::default().fg(Color::Magenta),
                    )));
                    lines.push(Line::from(format!("  {} items", c.new_code_items)));
                    if let Some(latest) = c.new_code_latest_period {
                        lines.push(Line::from(format!("  latest {}", format_period(latest))));
                    }
                    for name in &c.new_code_names {
                        lines.push(Line::from(format!("  • {}", name)));
                    }
                }
                _ => lines.push(Line::from(Span::styled(
                    "No prescribing under the new code",
                    Style::default().fg(Color::Green),
                ))),
            }
            lines
        }
        (None, _) => vec![Line::from("No row selected")],
    };

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Detail "),
    );

    f.render_widget(panel, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
