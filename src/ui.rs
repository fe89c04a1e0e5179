use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Cell, Clear, Paragraph, Row, Table, Tabs, Wrap},
};

use crate::domain::{EvcConfig, HELP_TEXT, Tab};
use crate::model::{
    InsertFocus, LoadState, Model, NoticeLevel, UpdateFocus, ViewerFocus,
};
use crate::pipeline::cell_text;

pub const TABBAR_HEIGHT: u16 = 1;
pub const STATUSLINE_HEIGHT: u16 = 1;
pub const DIRECTORY_WIDTH: u16 = 28;
pub const MAX_COLUMN_WIDTH: u16 = 24;

pub struct ConsoleUI;

impl ConsoleUI {
    pub fn new(_config: &EvcConfig) -> Self {
        ConsoleUI
    }

    pub fn draw(&self, model: &Model, frame: &mut Frame) {
        let [tabbar, body, statusline] = Layout::vertical([
            Constraint::Length(TABBAR_HEIGHT),
            Constraint::Min(1),
            Constraint::Length(STATUSLINE_HEIGHT),
        ])
        .areas(frame.area());

        self.draw_tabs(model, frame, tabbar);
        match model.tab {
            Tab::VIEWER => self.draw_viewer(model, frame, body),
            Tab::INSERT => self.draw_insert(model, frame, body),
            Tab::UPDATE => self.draw_update(model, frame, body),
        }
        self.draw_statusline(model, frame, statusline);

        if model.show_help() {
            self.draw_help(frame);
        }
    }

    fn draw_tabs(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let selected = match model.tab {
            Tab::VIEWER => 0,
            Tab::INSERT => 1,
            Tab::UPDATE => 2,
        };
        let tabs = Tabs::new(vec![" 1 View ", " 2 Insert ", " 3 Update "])
            .select(selected)
            .style(Style::default().fg(Color::DarkGray))
            .highlight_style(Style::default().fg(Color::Cyan).bold());
        frame.render_widget(tabs, area);
    }

    // Table directory shared by all three tabs. Shows name and row count.
    fn draw_directory(
        &self,
        model: &Model,
        frame: &mut Frame,
        area: Rect,
        curser: usize,
        selected: Option<&str>,
        focused: bool,
    ) {
        let border = if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::bordered().title(" Tables ").border_style(border);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let mut lines: Vec<Line> = Vec::new();
        if model.directory.load == LoadState::LOADING {
            lines.push(Line::from(" Loading ...".dark_gray()));
        }
        for (idx, table) in model.directory.tables.iter().enumerate() {
            let count = model
                .directory
                .count_of(&table.name)
                .map(|c| format!(" ({c})"))
                .unwrap_or_default();
            let marker = if selected == Some(table.name.as_str()) {
                "* "
            } else {
                "  "
            };
            let mut style = Style::default();
            if focused && idx == curser {
                style = style.add_modifier(Modifier::REVERSED);
            }
            lines.push(Line::from(Span::styled(
                format!("{marker}{}{count}", table.name),
                style,
            )));
        }
        frame.render_widget(Paragraph::new(lines), inner);
    }

    fn draw_viewer(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let [left, right] = Layout::horizontal([
            Constraint::Length(DIRECTORY_WIDTH),
            Constraint::Min(10),
        ])
        .areas(area);
        self.draw_directory(
            model,
            frame,
            left,
            model.viewer.table_curser,
            model.viewer.table.as_deref(),
            model.viewer.focus == ViewerFocus::TABLES,
        );

        let viewer = &model.viewer;
        let title = viewer
            .table
            .as_deref()
            .map(|t| format!(" {t} "))
            .unwrap_or_else(|| " Data ".to_string());
        let border = if viewer.focus == ViewerFocus::GRID {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::bordered().title(title).border_style(border);
        let inner = block.inner(right);
        frame.render_widget(block, right);

        match viewer.load {
            LoadState::EMPTY => {
                frame.render_widget(
                    Paragraph::new(" Select a table and press Enter").dark_gray(),
                    inner,
                );
            }
            LoadState::LOADING => {
                frame.render_widget(Paragraph::new(" Loading ...").dark_gray(), inner);
            }
            LoadState::LOADED => {
                let [grid, footer] =
                    Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(inner);
                self.draw_grid(
                    frame,
                    grid,
                    &viewer.columns,
                    &viewer.rows,
                    viewer.page_rows(),
                    viewer.curser_row,
                    viewer.curser_column,
                    viewer.sort.column.as_deref(),
                    viewer.sort.ascending,
                    viewer.search_column_name(),
                    viewer.focus == ViewerFocus::GRID,
                );
                let footer_text = grid_footer(
                    viewer.page.current_page,
                    viewer.page.total_pages(viewer.mask.len()),
                    viewer.mask.len(),
                    viewer.search_column_name(),
                    &viewer.search_query,
                );
                frame.render_widget(Paragraph::new(footer_text).dark_gray(), footer);
            }
        }
    }

    fn draw_insert(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let [left, right] = Layout::horizontal([
            Constraint::Length(DIRECTORY_WIDTH),
            Constraint::Min(10),
        ])
        .areas(area);
        self.draw_directory(
            model,
            frame,
            left,
            model.insert.table_curser,
            model.insert.table.as_deref(),
            model.insert.focus == InsertFocus::TABLES,
        );

        let insert = &model.insert;
        let title = insert
            .table
            .as_deref()
            .map(|t| format!(" Insert into {t} "))
            .unwrap_or_else(|| " Insert ".to_string());
        let focused = insert.focus == InsertFocus::FORM;
        self.draw_form_panel(frame, right, &title, insert.load, &insert.form, focused);
    }

    fn draw_update(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let [left, right] = Layout::horizontal([
            Constraint::Length(DIRECTORY_WIDTH),
            Constraint::Min(10),
        ])
        .areas(area);
        self.draw_directory(
            model,
            frame,
            left,
            model.update_tab.table_curser,
            model.update_tab.table.as_deref(),
            model.update_tab.focus == UpdateFocus::TABLES,
        );

        let update = &model.update_tab;
        let [picker_area, form_area] =
            Layout::vertical([Constraint::Min(8), Constraint::Min(6)]).areas(right);

        let title = update
            .table
            .as_deref()
            .map(|t| format!(" {t} "))
            .unwrap_or_else(|| " Records ".to_string());
        let border = if update.focus == UpdateFocus::RECORDS {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::bordered().title(title).border_style(border);
        let inner = block.inner(picker_area);
        frame.render_widget(block, picker_area);

        match update.load {
            LoadState::EMPTY => {
                frame.render_widget(
                    Paragraph::new(" Select a table and press Enter").dark_gray(),
                    inner,
                );
            }
            LoadState::LOADING => {
                frame.render_widget(Paragraph::new(" Loading ...").dark_gray(), inner);
            }
            LoadState::LOADED => {
                let [grid, footer] =
                    Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(inner);
                self.draw_grid(
                    frame,
                    grid,
                    &update.columns,
                    &update.rows,
                    update.page_rows(),
                    update.curser_row,
                    update.curser_column,
                    update.sort.column.as_deref(),
                    update.sort.ascending,
                    update.search_column_name(),
                    update.focus == UpdateFocus::RECORDS,
                );
                let footer_text = grid_footer(
                    update.page.current_page,
                    update.page.total_pages(update.mask.len()),
                    update.mask.len(),
                    update.search_column_name(),
                    &update.search_query,
                );
                frame.render_widget(Paragraph::new(footer_text).dark_gray(), footer);
            }
        }

        let form_title = " Edit record ".to_string();
        let focused = update.focus == UpdateFocus::FORM;
        self.draw_form_panel(frame, form_area, &form_title, update.load, &update.form, focused);
    }

    // The data grid: header with sort/search markers, one row per record of
    // the current page, the curser cell highlighted.
    #[allow(clippy::too_many_arguments)]
    fn draw_grid(
        &self,
        frame: &mut Frame,
        area: Rect,
        columns: &[String],
        rows: &[crate::api::Record],
        page_rows: &[usize],
        curser_row: usize,
        curser_column: usize,
        sort_column: Option<&str>,
        sort_ascending: bool,
        search_column: Option<&str>,
        focused: bool,
    ) {
        if columns.is_empty() {
            return;
        }

        let header_cells: Vec<Cell> = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut label = name.clone();
                if sort_column == Some(name.as_str()) {
                    label.push_str(if sort_ascending { " ^" } else { " v" });
                }
                if search_column == Some(name.as_str()) {
                    label.push_str(" ?");
                }
                let mut style = Style::default().fg(Color::White).bold();
                if focused && idx == curser_column {
                    style = style.bg(Color::Blue);
                }
                Cell::from(label).style(style)
            })
            .collect();

        let body_rows: Vec<Row> = page_rows
            .iter()
            .enumerate()
            .map(|(vidx, &ridx)| {
                let cells: Vec<Cell> = columns
                    .iter()
                    .enumerate()
                    .map(|(cidx, column)| {
                        let text = cell_text(rows[ridx].get(column));
                        let mut style = Style::default();
                        if focused && vidx == curser_row {
                            style = style.add_modifier(Modifier::REVERSED);
                            if cidx == curser_column {
                                style = style.add_modifier(Modifier::BOLD);
                            }
                        }
                        Cell::from(text).style(style)
                    })
                    .collect();
                Row::new(cells)
            })
            .collect();

        let widths = column_widths(columns, rows, page_rows);
        let table = Table::new(body_rows, widths).header(Row::new(header_cells));
        frame.render_widget(table, area);
    }

    fn draw_form_panel(
        &self,
        frame: &mut Frame,
        area: Rect,
        title: &str,
        load: LoadState,
        form: &crate::model::Form,
        focused: bool,
    ) {
        let border = if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::bordered().title(title.to_string()).border_style(border);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if load == LoadState::LOADING {
            frame.render_widget(Paragraph::new(" Loading ...").dark_gray(), inner);
            return;
        }
        if form.is_empty() {
            let hint = match load {
                LoadState::EMPTY => " Select a table first",
                _ => " Pick a record first",
            };
            frame.render_widget(Paragraph::new(hint).dark_gray(), inner);
            return;
        }

        let label_width = form
            .fields
            .iter()
            .map(|f| f.name.chars().count())
            .max()
            .unwrap_or(0);
        let mut lines: Vec<Line> = Vec::new();
        for (idx, field) in form.fields.iter().enumerate() {
            let mut style = Style::default();
            if !field.editable {
                style = style.fg(Color::DarkGray);
            }
            if focused && idx == form.curser {
                style = style.add_modifier(Modifier::REVERSED);
            }
            let lock = if field.editable { " " } else { "*" };
            lines.push(Line::from(Span::styled(
                format!(" {lock}{:label_width$} : {}", field.name, field.value),
                style,
            )));
        }
        let mut submit_style = Style::default().fg(Color::Green);
        if focused && form.on_submit() {
            submit_style = submit_style.add_modifier(Modifier::REVERSED);
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("  [ submit ]", submit_style)));
        frame.render_widget(Paragraph::new(lines), inner);
    }

    fn draw_statusline(&self, model: &Model, frame: &mut Frame, area: Rect) {
        if let Some(label) = model.input_label() {
            let input = &model.last_input;
            let prompt = format!(" {label}> {}", input.input);
            frame.render_widget(Paragraph::new(prompt.clone()), area);
            let curser_x = area.x
                + (label.chars().count() + 3 + input.curser_pos)
                    .min(area.width.saturating_sub(1) as usize) as u16;
            frame.set_cursor_position((curser_x, area.y));
            return;
        }
        if let Some(notice) = model.active_notice() {
            let style = match notice.level {
                NoticeLevel::INFO => Style::default().fg(Color::Gray),
                NoticeLevel::SUCCESS => Style::default().fg(Color::Green),
                NoticeLevel::ERROR => Style::default().fg(Color::Red),
            };
            frame.render_widget(
                Paragraph::new(format!(" {}", notice.text)).style(style),
                area,
            );
            return;
        }
        frame.render_widget(
            Paragraph::new(" ? help  q quit").dark_gray(),
            area,
        );
    }

    fn draw_help(&self, frame: &mut Frame) {
        let area = centered_rect(frame.area(), 60, 24);
        frame.render_widget(Clear, area);
        let popup = Paragraph::new(HELP_TEXT)
            .wrap(Wrap { trim: false })
            .block(Block::bordered().title(" Help ").border_style(
                Style::default().fg(Color::Cyan),
            ));
        frame.render_widget(popup, area);
    }
}

fn grid_footer(
    current_page: usize,
    total_pages: usize,
    nrecords: usize,
    search_column: Option<&str>,
    search_query: &str,
) -> String {
    let mut footer = format!(" Page {current_page} of {total_pages} ({nrecords} records)");
    if let Some(column) = search_column {
        footer.push_str(&format!("  search {column} ~ \"{search_query}\""));
    }
    footer
}

// Width per column: widest page cell or the header, capped
fn column_widths(
    columns: &[String],
    rows: &[crate::api::Record],
    page_rows: &[usize],
) -> Vec<Constraint> {
    columns
        .iter()
        .map(|column| {
            let mut width = column.chars().count() + 2; // room for the sort marker
            for &ridx in page_rows {
                width = width.max(cell_text(rows[ridx].get(column)).chars().count());
            }
            Constraint::Length((width as u16).min(MAX_COLUMN_WIDTH))
        })
        .collect()
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn footer_reports_page_and_search() {
        assert_eq!(
            grid_footer(2, 3, 25, None, ""),
            " Page 2 of 3 (25 records)"
        );
        assert_eq!(
            grid_footer(1, 1, 0, Some("nome"), "bd"),
            " Page 1 of 1 (0 records)  search nome ~ \"bd\""
        );
    }

    #[test]
    fn column_widths_count_chars_not_bytes() {
        let columns = vec!["descrição".to_string()];
        let mut row = crate::api::Record::new();
        row.insert("descrição".to_string(), "São Paulo".into());
        let widths = column_widths(&columns, &[row], &[0]);
        // "descrição" is 9 chars plus the 2-char sort marker
        assert_eq!(widths[0], Constraint::Length(11));
    }

    #[test]
    fn centered_rect_is_clamped_to_the_area() {
        let area = Rect::new(0, 0, 40, 10);
        let rect = centered_rect(area, 60, 24);
        assert_eq!(rect.width, 40);
        assert_eq!(rect.height, 10);
    }
}
