use std::collections::HashMap;
use std::time::Instant;

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use serde_json::Value;
use tracing::{debug, error, info, trace};

use crate::api::{ApiClient, ApiEvent, Record, TableColumns, TableData, TableInfo};
use crate::domain::{
    EvcConfig, EvcError, Message, Tab, UPDATE_PAGE_SIZE, VIEWER_PAGE_SIZE,
};
use crate::inputter::{InputResult, Inputter};
use crate::pipeline::{self, PageState, SortConfig};

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

// Load state of a table consuming component. A failed fetch always falls back
// to EMPTY, never sticks in LOADING.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadState {
    EMPTY,
    LOADING,
    LOADED,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Overlay {
    NONE,
    HELP,
    INPUT(InputTarget),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum InputTarget {
    SEARCH(Tab),
    FIELD(Tab, usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoticeLevel {
    INFO,
    SUCCESS,
    ERROR,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub created: Instant,
}

// The table directory is fetched once at startup and shared by all tabs.
// Counts trickle in from the backend after the names.
pub struct Directory {
    pub tables: Vec<TableInfo>,
    pub counts: HashMap<String, u64>,
    pub load: LoadState,
}

impl Directory {
    fn empty() -> Self {
        Directory {
            tables: Vec::new(),
            counts: HashMap::new(),
            load: LoadState::EMPTY,
        }
    }

    pub fn count_of(&self, name: &str) -> Option<u64> {
        self.counts.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub editable: bool,
}

// Generated form over a table's columns. The curser walks the editable fields
// plus a trailing virtual submit row.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pub fields: Vec<FormField>,
    pub curser: usize,
}

impl Form {
    // Insert form: every column except the primary key, all empty
    pub fn for_insert(columns: &[String], primary_key: Option<&str>) -> Self {
        let fields = columns
            .iter()
            .filter(|c| Some(c.as_str()) != primary_key)
            .map(|c| FormField {
                name: c.clone(),
                value: String::new(),
                editable: true,
            })
            .collect();
        let mut form = Form { fields, curser: 0 };
        form.curser = form.first_editable();
        form
    }

    // Update form: every column pre-filled from the record, the primary key
    // shown but not editable
    pub fn for_update(columns: &[String], record: &Record, primary_key: Option<&str>) -> Self {
        let fields = columns
            .iter()
            .map(|c| FormField {
                name: c.clone(),
                value: pipeline::cell_text(record.get(c)),
                editable: Some(c.as_str()) != primary_key,
            })
            .collect();
        let mut form = Form { fields, curser: 0 };
        form.curser = form.first_editable();
        form
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // The curser position that means "submit"
    pub fn submit_pos(&self) -> usize {
        self.fields.len()
    }

    pub fn on_submit(&self) -> bool {
        self.curser == self.submit_pos()
    }

    fn first_editable(&self) -> usize {
        self.fields
            .iter()
            .position(|f| f.editable)
            .unwrap_or(self.submit_pos())
    }

    pub fn move_down(&mut self) {
        if self.curser >= self.fields.len() {
            return;
        }
        let next = self.fields[self.curser + 1..]
            .iter()
            .position(|f| f.editable)
            .map(|off| self.curser + 1 + off)
            .unwrap_or(self.submit_pos());
        self.curser = next;
    }

    pub fn move_up(&mut self) {
        if let Some(prev) = self.fields[..self.curser]
            .iter()
            .rposition(|f| f.editable)
        {
            self.curser = prev;
        }
    }

    pub fn set_value(&mut self, idx: usize, value: String) {
        if let Some(field) = self.fields.get_mut(idx) {
            field.value = value;
        }
    }

    // Name of the first required field that is still empty, if any. Every
    // editable field is required.
    pub fn first_missing(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.editable && f.value.is_empty())
            .map(|f| f.name.as_str())
    }

    // Values as typed; no coercion happens client side
    pub fn payload(&self) -> Record {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), Value::String(f.value.clone())))
            .collect()
    }

    pub fn clear_values(&mut self) {
        for field in self.fields.iter_mut() {
            field.value.clear();
        }
        self.curser = self.first_editable();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerFocus {
    TABLES,
    GRID,
}

pub struct ViewerState {
    pub focus: ViewerFocus,
    pub table_curser: usize,
    pub table: Option<String>,
    pub load: LoadState,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    // Filtered and sorted mapping of view position to row index
    pub mask: Vec<usize>,
    pub curser_row: usize, // within the current page
    pub curser_column: usize,
    pub search_column: Option<usize>,
    pub search_query: String,
    pub sort: SortConfig,
    pub page: PageState,
    pub generation: u64,
}

impl ViewerState {
    fn empty() -> Self {
        ViewerState {
            focus: ViewerFocus::TABLES,
            table_curser: 0,
            table: None,
            load: LoadState::EMPTY,
            columns: Vec::new(),
            rows: Vec::new(),
            mask: Vec::new(),
            curser_row: 0,
            curser_column: 0,
            search_column: None,
            search_query: String::new(),
            sort: SortConfig::default(),
            page: PageState::new(VIEWER_PAGE_SIZE),
            generation: 0,
        }
    }

    pub fn search_column_name(&self) -> Option<&str> {
        self.search_column
            .and_then(|idx| self.columns.get(idx))
            .map(|c| c.as_str())
    }

    // Row indices of the current page, in view order
    pub fn page_rows(&self) -> &[usize] {
        &self.mask[self.page.slice(self.mask.len())]
    }

    fn refresh_mask(&mut self) {
        self.mask = pipeline::apply(
            &self.rows,
            self.search_column_name(),
            &self.search_query,
            &self.sort,
        );
        let page_len = self.page_rows().len();
        self.curser_row = std::cmp::min(self.curser_row, page_len.saturating_sub(1));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertFocus {
    TABLES,
    FORM,
}

pub struct InsertState {
    pub focus: InsertFocus,
    pub table_curser: usize,
    pub table: Option<String>,
    pub load: LoadState,
    pub form: Form,
    pub generation: u64,
}

impl InsertState {
    fn empty() -> Self {
        InsertState {
            focus: InsertFocus::TABLES,
            table_curser: 0,
            table: None,
            load: LoadState::EMPTY,
            form: Form::default(),
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateFocus {
    TABLES,
    RECORDS,
    FORM,
}

pub struct UpdateState {
    pub focus: UpdateFocus,
    pub table_curser: usize,
    pub table: Option<String>,
    pub load: LoadState,
    pub columns: Vec<String>,
    pub primary_key: Option<String>,
    pub rows: Vec<Record>,
    pub mask: Vec<usize>,
    pub curser_row: usize,
    pub curser_column: usize,
    pub search_column: Option<usize>,
    pub search_query: String,
    pub sort: SortConfig,
    pub page: PageState,
    // Index into rows of the record being edited
    pub selected: Option<usize>,
    pub form: Form,
    pub generation: u64,
}

impl UpdateState {
    fn empty() -> Self {
        UpdateState {
            focus: UpdateFocus::TABLES,
            table_curser: 0,
            table: None,
            load: LoadState::EMPTY,
            columns: Vec::new(),
            primary_key: None,
            rows: Vec::new(),
            mask: Vec::new(),
            curser_row: 0,
            curser_column: 0,
            search_column: None,
            search_query: String::new(),
            sort: SortConfig::default(),
            page: PageState::new(UPDATE_PAGE_SIZE),
            selected: None,
            form: Form::default(),
            generation: 0,
        }
    }

    pub fn search_column_name(&self) -> Option<&str> {
        self.search_column
            .and_then(|idx| self.columns.get(idx))
            .map(|c| c.as_str())
    }

    pub fn page_rows(&self) -> &[usize] {
        &self.mask[self.page.slice(self.mask.len())]
    }

    fn refresh_mask(&mut self) {
        self.mask = pipeline::apply(
            &self.rows,
            self.search_column_name(),
            &self.search_query,
            &self.sort,
        );
        let page_len = self.page_rows().len();
        self.curser_row = std::cmp::min(self.curser_row, page_len.saturating_sub(1));
    }

    // Identifier of the selected record, taken from the metadata provided
    // primary key. Never assumes the first column is the key.
    pub fn target_id(&self) -> Result<String, String> {
        let record = self
            .selected
            .and_then(|idx| self.rows.get(idx))
            .ok_or_else(|| "No record selected".to_string())?;
        let pk = self
            .primary_key
            .as_deref()
            .ok_or_else(|| "Table has no primary key; cannot update".to_string())?;
        match record.get(pk) {
            Some(Value::Null) | None => Err(format!("Selected record has no value for {pk}")),
            Some(value) => Ok(pipeline::cell_text(Some(value))),
        }
    }
}

pub struct Model {
    pub status: Status,
    pub tab: Tab,
    overlay: Overlay,
    config: EvcConfig,
    api: ApiClient,
    pub directory: Directory,
    pub viewer: ViewerState,
    pub insert: InsertState,
    pub update_tab: UpdateState,
    pub notice: Option<Notice>,
    input: Inputter,
    pub last_input: InputResult,
    clipboard: Option<Clipboard>,
}

impl Model {
    pub fn init(config: &EvcConfig, api: ApiClient) -> Self {
        let mut model = Model {
            status: Status::READY,
            tab: Tab::VIEWER,
            overlay: Overlay::NONE,
            config: config.clone(),
            api,
            directory: Directory::empty(),
            viewer: ViewerState::empty(),
            insert: InsertState::empty(),
            update_tab: UpdateState::empty(),
            notice: None,
            input: Inputter::default(),
            last_input: InputResult::default(),
            clipboard: Clipboard::new().ok(),
        };
        model.directory.load = LoadState::LOADING;
        model.api.fetch_tables();
        model.notify(NoticeLevel::INFO, "Loading tables ...");
        model
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    // While an input overlay is open the controller forwards raw key events
    pub fn raw_keyevents(&self) -> bool {
        matches!(self.overlay, Overlay::INPUT(_))
    }

    pub fn show_help(&self) -> bool {
        self.overlay == Overlay::HELP
    }

    // Prompt label for the status line while an input overlay is open
    pub fn input_label(&self) -> Option<String> {
        match self.overlay {
            Overlay::INPUT(InputTarget::SEARCH(tab)) => {
                let column = match tab {
                    Tab::VIEWER => self.viewer.search_column_name(),
                    Tab::UPDATE => self.update_tab.search_column_name(),
                    Tab::INSERT => None,
                };
                Some(format!("search {}", column.unwrap_or("?")))
            }
            Overlay::INPUT(InputTarget::FIELD(tab, idx)) => {
                let form = match tab {
                    Tab::INSERT => &self.insert.form,
                    Tab::UPDATE => &self.update_tab.form,
                    Tab::VIEWER => return None,
                };
                form.fields.get(idx).map(|f| f.name.clone())
            }
            _ => None,
        }
    }

    // The notice currently worth showing, if it has not aged out
    pub fn active_notice(&self) -> Option<&Notice> {
        self.notice
            .as_ref()
            .filter(|n| n.created.elapsed().as_secs() < self.config.notice_timeout)
    }

    fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        trace!("Notice [{:?}]: {}", level, text);
        self.notice = Some(Notice {
            level,
            text,
            created: Instant::now(),
        });
    }

    pub fn update(&mut self, message: Message) -> Result<(), EvcError> {
        match message {
            Message::Api(event) => self.handle_api(event),
            Message::RawKey(key) => self.raw_input(key),
            Message::Quit => self.quit(),
            Message::Help => self.overlay = Overlay::HELP,
            Message::SwitchTab(tab) => {
                if self.overlay == Overlay::NONE {
                    self.tab = tab;
                }
            }
            Message::Resize(width, height) => {
                trace!("UI was resized to {width}x{height}");
            }
            Message::Exit if self.overlay == Overlay::HELP => self.overlay = Overlay::NONE,
            _ if self.overlay == Overlay::HELP => {}
            msg => match self.tab {
                Tab::VIEWER => self.update_viewer(msg),
                Tab::INSERT => self.update_insert(msg),
                Tab::UPDATE => self.update_update(msg),
            },
        }
        Ok(())
    }

    // ----------------------- api event handling --------------------------- //

    fn handle_api(&mut self, event: ApiEvent) {
        match event {
            ApiEvent::Tables(Ok(tables)) => {
                info!("Loaded {} tables", tables.len());
                for t in tables.iter() {
                    if let Some(count) = t.record_count {
                        self.directory.counts.insert(t.name.clone(), count);
                    }
                }
                self.notify(NoticeLevel::INFO, format!("Loaded {} tables", tables.len()));
                self.directory.tables = tables;
                self.directory.load = LoadState::LOADED;
            }
            ApiEvent::Tables(Err(e)) => {
                error!("Fetching tables failed: {:?}", e);
                self.directory = Directory::empty();
                self.notify(NoticeLevel::ERROR, e.user_message());
            }
            ApiEvent::TableCounts(counts) => {
                trace!("Received {} table counts", counts.len());
                self.directory.counts.extend(counts);
            }
            ApiEvent::TableData {
                tab,
                table,
                generation,
                result,
            } => self.handle_table_data(tab, table, generation, result),
            ApiEvent::TableColumns {
                tab,
                table,
                generation,
                result,
            } => self.handle_table_columns(tab, table, generation, result),
            ApiEvent::Inserted { table, result } => match result {
                Ok(()) => {
                    info!("Insert into {table} succeeded");
                    self.insert.form.clear_values();
                    self.notify(NoticeLevel::SUCCESS, "Record inserted");
                }
                Err(e) => {
                    error!("Insert into {table} failed: {:?}", e);
                    self.notify(NoticeLevel::ERROR, e.user_message());
                }
            },
            ApiEvent::Updated { table, result } => match result {
                Ok(()) => {
                    info!("Update of {table} succeeded");
                    self.update_tab.selected = None;
                    self.update_tab.form = Form::default();
                    self.update_tab.focus = UpdateFocus::RECORDS;
                    self.notify(NoticeLevel::SUCCESS, "Record updated");
                    self.reload_update_rows();
                }
                Err(e) => {
                    // The form stays populated for correction
                    error!("Update of {table} failed: {:?}", e);
                    self.notify(NoticeLevel::ERROR, e.user_message());
                }
            },
        }
    }

    fn handle_table_data(
        &mut self,
        tab: Tab,
        table: String,
        generation: u64,
        result: Result<TableData, EvcError>,
    ) {
        match tab {
            Tab::VIEWER => {
                if generation != self.viewer.generation {
                    trace!("Dropping stale rows for {table} (generation {generation})");
                    return;
                }
                match result {
                    Ok(data) => {
                        info!("Loaded {} rows of {table}", data.rows.len());
                        self.notify(
                            NoticeLevel::INFO,
                            format!("Loaded {} rows of {table}", data.rows.len()),
                        );
                        self.viewer.columns = data.columns;
                        self.viewer.rows = data.rows;
                        self.viewer.load = LoadState::LOADED;
                        self.viewer.focus = ViewerFocus::GRID;
                        self.viewer.curser_column = 0;
                        self.viewer.curser_row = 0;
                        self.viewer.refresh_mask();
                    }
                    Err(e) => {
                        error!("Loading rows of {table} failed: {:?}", e);
                        self.viewer.load = LoadState::EMPTY;
                        self.viewer.rows.clear();
                        self.viewer.columns.clear();
                        self.viewer.mask.clear();
                        self.notify(NoticeLevel::ERROR, e.user_message());
                    }
                }
            }
            Tab::UPDATE => {
                if generation != self.update_tab.generation {
                    trace!("Dropping stale rows for {table} (generation {generation})");
                    return;
                }
                match result {
                    Ok(data) => {
                        info!("Loaded {} rows of {table} for update", data.rows.len());
                        self.update_tab.columns = data.columns;
                        self.update_tab.rows = data.rows;
                        self.update_tab.load = LoadState::LOADED;
                        if self.update_tab.focus == UpdateFocus::TABLES {
                            self.update_tab.focus = UpdateFocus::RECORDS;
                        }
                        self.update_tab.curser_row = 0;
                        self.update_tab.curser_column = 0;
                        self.update_tab.refresh_mask();
                    }
                    Err(e) => {
                        error!("Loading rows of {table} for update failed: {:?}", e);
                        self.update_tab.load = LoadState::EMPTY;
                        self.update_tab.rows.clear();
                        self.update_tab.mask.clear();
                        self.notify(NoticeLevel::ERROR, e.user_message());
                    }
                }
            }
            Tab::INSERT => {
                debug!("Unexpected row data for the insert tab, ignoring");
            }
        }
    }

    fn handle_table_columns(
        &mut self,
        tab: Tab,
        table: String,
        generation: u64,
        result: Result<TableColumns, EvcError>,
    ) {
        match tab {
            Tab::INSERT => {
                if generation != self.insert.generation {
                    trace!("Dropping stale columns for {table} (generation {generation})");
                    return;
                }
                match result {
                    Ok(meta) => {
                        self.insert.form =
                            Form::for_insert(&meta.columns, meta.primary_key.as_deref());
                        self.insert.load = LoadState::LOADED;
                        self.insert.focus = InsertFocus::FORM;
                        self.notify(NoticeLevel::INFO, format!("Insert into {table}"));
                    }
                    Err(e) => {
                        error!("Loading columns of {table} failed: {:?}", e);
                        self.insert.load = LoadState::EMPTY;
                        self.insert.form = Form::default();
                        self.notify(NoticeLevel::ERROR, e.user_message());
                    }
                }
            }
            Tab::UPDATE => {
                if generation != self.update_tab.generation {
                    trace!("Dropping stale columns for {table} (generation {generation})");
                    return;
                }
                match result {
                    Ok(meta) => {
                        self.update_tab.primary_key = meta.primary_key;
                    }
                    Err(e) => {
                        // Rows may still display; updating will refuse without a key
                        error!("Loading columns of {table} failed: {:?}", e);
                        self.update_tab.primary_key = None;
                        self.notify(NoticeLevel::ERROR, e.user_message());
                    }
                }
            }
            Tab::VIEWER => {
                debug!("Unexpected column data for the viewer tab, ignoring");
            }
        }
    }

    // ------------------------- viewer tab ---------------------------------- //

    fn update_viewer(&mut self, msg: Message) {
        match self.viewer.focus {
            ViewerFocus::TABLES => match msg {
                Message::MoveUp => {
                    self.viewer.table_curser = self.viewer.table_curser.saturating_sub(1)
                }
                Message::MoveDown => {
                    let last = self.directory.tables.len().saturating_sub(1);
                    self.viewer.table_curser = std::cmp::min(self.viewer.table_curser + 1, last);
                }
                Message::Enter => self.select_viewer_table(),
                Message::Exit => self.notice = None,
                _ => (),
            },
            ViewerFocus::GRID => match msg {
                Message::MoveUp => {
                    self.viewer.curser_row = self.viewer.curser_row.saturating_sub(1)
                }
                Message::MoveDown => {
                    let last = self.viewer.page_rows().len().saturating_sub(1);
                    self.viewer.curser_row = std::cmp::min(self.viewer.curser_row + 1, last);
                }
                Message::MoveLeft => {
                    self.viewer.curser_column = self.viewer.curser_column.saturating_sub(1)
                }
                Message::MoveRight => {
                    let last = self.viewer.columns.len().saturating_sub(1);
                    self.viewer.curser_column =
                        std::cmp::min(self.viewer.curser_column + 1, last);
                }
                Message::ToggleSort => {
                    if let Some(column) = self.viewer.columns.get(self.viewer.curser_column) {
                        let column = column.clone();
                        self.viewer.sort.toggle(&column);
                        self.viewer.refresh_mask();
                    }
                }
                Message::CycleSearchColumn => {
                    self.viewer.search_column =
                        cycle_column(self.viewer.search_column, self.viewer.columns.len());
                    self.viewer.refresh_mask();
                }
                Message::EnterSearch => {
                    if self.viewer.search_column.is_some() {
                        self.begin_input(
                            InputTarget::SEARCH(Tab::VIEWER),
                            &self.viewer.search_query.clone(),
                        );
                    } else {
                        self.notify(NoticeLevel::INFO, "Pick a search column first (c)");
                    }
                }
                Message::PageNext => {
                    self.viewer.page.next(self.viewer.mask.len());
                    self.viewer.curser_row = 0;
                }
                Message::PagePrev => {
                    self.viewer.page.prev();
                    self.viewer.curser_row = 0;
                }
                Message::CopyCell => self.copy_viewer_cell(),
                Message::CopyRow => self.copy_viewer_row(),
                Message::Refresh => self.select_current_viewer_table(),
                Message::Exit => self.viewer.focus = ViewerFocus::TABLES,
                _ => (),
            },
        }
    }

    fn select_viewer_table(&mut self) {
        let Some(table) = self
            .directory
            .tables
            .get(self.viewer.table_curser)
            .map(|t| t.name.clone())
        else {
            return;
        };
        self.viewer.table = Some(table);
        self.select_current_viewer_table();
    }

    // (Re)load the rows of the selected table. Resets the page, clears the
    // old rows before the fetch resolves and bumps the generation so a still
    // outstanding fetch for the previous table cannot land here.
    fn select_current_viewer_table(&mut self) {
        let Some(table) = self.viewer.table.clone() else {
            return;
        };
        self.viewer.page.reset();
        self.viewer.rows.clear();
        self.viewer.mask.clear();
        self.viewer.columns.clear();
        self.viewer.curser_row = 0;
        self.viewer.search_column = None;
        self.viewer.search_query.clear();
        self.viewer.sort.clear();
        self.viewer.load = LoadState::LOADING;
        self.viewer.generation += 1;
        self.api
            .fetch_table_data(Tab::VIEWER, &table, self.viewer.generation);
        self.notify(NoticeLevel::INFO, format!("Loading rows of {table} ..."));
    }

    fn viewer_cell(&self) -> Option<String> {
        let row_idx = *self.viewer.page_rows().get(self.viewer.curser_row)?;
        let column = self.viewer.columns.get(self.viewer.curser_column)?;
        Some(pipeline::cell_text(self.viewer.rows[row_idx].get(column)))
    }

    fn copy_viewer_cell(&mut self) {
        if let Some(cell) = self.viewer_cell() {
            self.copy_to_clipboard(cell);
        }
    }

    fn copy_viewer_row(&mut self) {
        let Some(&row_idx) = self.viewer.page_rows().get(self.viewer.curser_row) else {
            return;
        };
        let row = &self.viewer.rows[row_idx];
        let content = self
            .viewer
            .columns
            .iter()
            .map(|c| wrap_cell_content(&pipeline::cell_text(row.get(c))))
            .collect::<Vec<String>>()
            .join(",");
        self.copy_to_clipboard(content);
    }

    fn copy_to_clipboard(&mut self, content: String) {
        trace!("Copying to clipboard: {}", content);
        match self.clipboard.as_mut().map(|c| c.set_text(content)) {
            Some(Ok(_)) => self.notify(NoticeLevel::INFO, "Copied to clipboard"),
            Some(Err(e)) => {
                error!("Clipboard error: {:?}", e);
                self.notify(NoticeLevel::ERROR, "Clipboard is not available");
            }
            None => self.notify(NoticeLevel::ERROR, "Clipboard is not available"),
        }
    }

    // ------------------------- insert tab ---------------------------------- //

    fn update_insert(&mut self, msg: Message) {
        match self.insert.focus {
            InsertFocus::TABLES => match msg {
                Message::MoveUp => {
                    self.insert.table_curser = self.insert.table_curser.saturating_sub(1)
                }
                Message::MoveDown => {
                    let last = self.directory.tables.len().saturating_sub(1);
                    self.insert.table_curser = std::cmp::min(self.insert.table_curser + 1, last);
                }
                Message::Enter => self.select_insert_table(),
                Message::Exit => self.notice = None,
                _ => (),
            },
            InsertFocus::FORM => match msg {
                Message::MoveUp => self.insert.form.move_up(),
                Message::MoveDown => self.insert.form.move_down(),
                Message::Enter => {
                    if self.insert.form.on_submit() {
                        self.submit_insert();
                    } else {
                        self.begin_field_edit(Tab::INSERT);
                    }
                }
                Message::Exit => self.insert.focus = InsertFocus::TABLES,
                _ => (),
            },
        }
    }

    fn select_insert_table(&mut self) {
        let Some(table) = self
            .directory
            .tables
            .get(self.insert.table_curser)
            .map(|t| t.name.clone())
        else {
            return;
        };
        self.insert.table = Some(table.clone());
        self.insert.form = Form::default();
        self.insert.load = LoadState::LOADING;
        self.insert.generation += 1;
        self.api
            .fetch_table_columns(Tab::INSERT, &table, self.insert.generation);
        self.notify(NoticeLevel::INFO, format!("Loading columns of {table} ..."));
    }

    fn submit_insert(&mut self) {
        let Some(table) = self.insert.table.clone() else {
            return;
        };
        // Required field validation happens before any network call
        if let Some(missing) = self.insert.form.first_missing() {
            let missing = missing.to_string();
            self.notify(NoticeLevel::ERROR, format!("{missing} is required"));
            return;
        }
        self.api.insert(&table, self.insert.form.payload());
        self.notify(NoticeLevel::INFO, "Inserting record ...");
    }

    // ------------------------- update tab ---------------------------------- //

    fn update_update(&mut self, msg: Message) {
        match self.update_tab.focus {
            UpdateFocus::TABLES => match msg {
                Message::MoveUp => {
                    self.update_tab.table_curser = self.update_tab.table_curser.saturating_sub(1)
                }
                Message::MoveDown => {
                    let last = self.directory.tables.len().saturating_sub(1);
                    self.update_tab.table_curser =
                        std::cmp::min(self.update_tab.table_curser + 1, last);
                }
                Message::Enter => self.select_update_table(),
                Message::Exit => self.notice = None,
                _ => (),
            },
            UpdateFocus::RECORDS => match msg {
                Message::MoveUp => {
                    self.update_tab.curser_row = self.update_tab.curser_row.saturating_sub(1)
                }
                Message::MoveDown => {
                    let last = self.update_tab.page_rows().len().saturating_sub(1);
                    self.update_tab.curser_row =
                        std::cmp::min(self.update_tab.curser_row + 1, last);
                }
                Message::MoveLeft => {
                    self.update_tab.curser_column =
                        self.update_tab.curser_column.saturating_sub(1)
                }
                Message::MoveRight => {
                    let last = self.update_tab.columns.len().saturating_sub(1);
                    self.update_tab.curser_column =
                        std::cmp::min(self.update_tab.curser_column + 1, last);
                }
                Message::ToggleSort => {
                    if let Some(column) =
                        self.update_tab.columns.get(self.update_tab.curser_column)
                    {
                        let column = column.clone();
                        self.update_tab.sort.toggle(&column);
                        self.update_tab.refresh_mask();
                    }
                }
                Message::CycleSearchColumn => {
                    self.update_tab.search_column =
                        cycle_column(self.update_tab.search_column, self.update_tab.columns.len());
                    self.update_tab.refresh_mask();
                }
                Message::EnterSearch => {
                    if self.update_tab.search_column.is_some() {
                        self.begin_input(
                            InputTarget::SEARCH(Tab::UPDATE),
                            &self.update_tab.search_query.clone(),
                        );
                    } else {
                        self.notify(NoticeLevel::INFO, "Pick a search column first (c)");
                    }
                }
                Message::PageNext => {
                    self.update_tab.page.next(self.update_tab.mask.len());
                    self.update_tab.curser_row = 0;
                }
                Message::PagePrev => {
                    self.update_tab.page.prev();
                    self.update_tab.curser_row = 0;
                }
                Message::Enter => self.select_update_record(),
                Message::Refresh => self.reload_update_rows(),
                Message::Exit => self.update_tab.focus = UpdateFocus::TABLES,
                _ => (),
            },
            UpdateFocus::FORM => match msg {
                Message::MoveUp => self.update_tab.form.move_up(),
                Message::MoveDown => self.update_tab.form.move_down(),
                Message::Enter => {
                    if self.update_tab.form.on_submit() {
                        self.submit_update();
                    } else {
                        self.begin_field_edit(Tab::UPDATE);
                    }
                }
                Message::Exit => self.update_tab.focus = UpdateFocus::RECORDS,
                _ => (),
            },
        }
    }

    fn select_update_table(&mut self) {
        let Some(table) = self
            .directory
            .tables
            .get(self.update_tab.table_curser)
            .map(|t| t.name.clone())
        else {
            return;
        };
        self.update_tab.table = Some(table.clone());
        self.update_tab.selected = None;
        self.update_tab.form = Form::default();
        self.update_tab.primary_key = None;
        self.update_tab.page.reset();
        self.update_tab.rows.clear();
        self.update_tab.mask.clear();
        self.update_tab.columns.clear();
        self.update_tab.search_column = None;
        self.update_tab.search_query.clear();
        self.update_tab.sort.clear();
        self.update_tab.load = LoadState::LOADING;
        self.update_tab.generation += 1;
        // Rows for the picker and metadata for the primary key
        self.api
            .fetch_table_data(Tab::UPDATE, &table, self.update_tab.generation);
        self.api
            .fetch_table_columns(Tab::UPDATE, &table, self.update_tab.generation);
        self.notify(NoticeLevel::INFO, format!("Loading rows of {table} ..."));
    }

    fn reload_update_rows(&mut self) {
        let Some(table) = self.update_tab.table.clone() else {
            return;
        };
        self.update_tab.load = LoadState::LOADING;
        self.update_tab.generation += 1;
        self.api
            .fetch_table_data(Tab::UPDATE, &table, self.update_tab.generation);
    }

    fn select_update_record(&mut self) {
        let Some(&row_idx) = self.update_tab.page_rows().get(self.update_tab.curser_row)
        else {
            return;
        };
        let record = &self.update_tab.rows[row_idx];
        self.update_tab.form = Form::for_update(
            &self.update_tab.columns,
            record,
            self.update_tab.primary_key.as_deref(),
        );
        self.update_tab.selected = Some(row_idx);
        self.update_tab.focus = UpdateFocus::FORM;
    }

    fn submit_update(&mut self) {
        let Some(table) = self.update_tab.table.clone() else {
            return;
        };
        if let Some(missing) = self.update_tab.form.first_missing() {
            let missing = missing.to_string();
            self.notify(NoticeLevel::ERROR, format!("{missing} is required"));
            return;
        }
        match self.update_tab.target_id() {
            Ok(id) => {
                self.api.update(&table, &id, self.update_tab.form.payload());
                self.notify(NoticeLevel::INFO, "Updating record ...");
            }
            Err(reason) => self.notify(NoticeLevel::ERROR, reason),
        }
    }

    // ------------------------ input overlay -------------------------------- //

    fn begin_input(&mut self, target: InputTarget, initial: &str) {
        trace!("Entering input overlay for {:?}", target);
        self.overlay = Overlay::INPUT(target);
        self.input.start(initial);
        self.last_input = self.input.get();
    }

    fn begin_field_edit(&mut self, tab: Tab) {
        let form = match tab {
            Tab::INSERT => &self.insert.form,
            Tab::UPDATE => &self.update_tab.form,
            Tab::VIEWER => return,
        };
        let idx = form.curser;
        let Some(field) = form.fields.get(idx) else {
            return;
        };
        let initial = field.value.clone();
        self.begin_input(InputTarget::FIELD(tab, idx), &initial);
    }

    fn raw_input(&mut self, key: KeyEvent) {
        let Overlay::INPUT(target) = self.overlay else {
            return;
        };
        self.last_input = self.input.read(key);
        let result = self.last_input.clone();

        // The search filters live while typing
        if let InputTarget::SEARCH(tab) = target {
            match tab {
                Tab::VIEWER => {
                    self.viewer.search_query = result.input.clone();
                    self.viewer.refresh_mask();
                }
                Tab::UPDATE => {
                    self.update_tab.search_query = result.input.clone();
                    self.update_tab.refresh_mask();
                }
                Tab::INSERT => {}
            }
        }

        if result.finished {
            self.overlay = Overlay::NONE;
            if let InputTarget::FIELD(tab, idx) = target
                && !result.canceled
            {
                match tab {
                    Tab::INSERT => {
                        self.insert.form.set_value(idx, result.input);
                        self.insert.form.move_down();
                    }
                    Tab::UPDATE => {
                        self.update_tab.form.set_value(idx, result.input);
                        self.update_tab.form.move_down();
                    }
                    Tab::VIEWER => {}
                }
            }
        }
    }
}

fn cycle_column(current: Option<usize>, ncolumns: usize) -> Option<usize> {
    match current {
        None if ncolumns > 0 => Some(0),
        None => None,
        Some(idx) if idx + 1 < ncolumns => Some(idx + 1),
        Some(_) => None,
    }
}

// CSV-style quoting for row copies
fn wrap_cell_content(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.chars().any(|c| c == ' ' || c == '\t' || c == ',');
    let mut out = String::from(c);

    if needs_escaping {
        out = out.replace("\"", "\"\"");
    }
    if needs_wrapping || needs_escaping {
        out = format!("\"{out}\"");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::mpsc;

    fn test_model() -> Model {
        let config = EvcConfig::default();
        let (tx, rx) = mpsc::channel();
        // The receiver is leaked so worker sends never error in tests
        std::mem::forget(rx);
        let api = ApiClient::new(&config, tx).unwrap();
        let mut model = Model::init(&config, api);
        model.directory.tables = vec![
            TableInfo {
                name: "evento".to_string(),
                record_count: Some(3),
            },
            TableInfo {
                name: "local".to_string(),
                record_count: None,
            },
        ];
        model.directory.load = LoadState::LOADED;
        model
    }

    fn record(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    fn event_rows() -> Vec<Record> {
        vec![
            record(json!({"id": 1, "nome": "B"})),
            record(json!({"id": 2, "nome": "A"})),
            record(json!({"id": 3, "nome": "A"})),
        ]
    }

    #[test]
    fn selecting_a_table_clears_rows_and_resets_the_page() {
        let mut model = test_model();
        model.viewer.rows = event_rows();
        model.viewer.mask = vec![0, 1, 2];
        model.viewer.page.current_page = 2;

        model.update(Message::Enter).unwrap();

        assert_eq!(model.viewer.table.as_deref(), Some("evento"));
        assert_eq!(model.viewer.page.current_page, 1);
        assert!(model.viewer.rows.is_empty());
        assert_eq!(model.viewer.load, LoadState::LOADING);
    }

    #[test]
    fn fresh_table_data_is_applied() {
        let mut model = test_model();
        model.viewer.table = Some("evento".to_string());
        model.viewer.load = LoadState::LOADING;
        model.viewer.generation = 4;

        model
            .update(Message::Api(ApiEvent::TableData {
                tab: Tab::VIEWER,
                table: "evento".to_string(),
                generation: 4,
                result: Ok(TableData {
                    columns: vec!["id".to_string(), "nome".to_string()],
                    rows: event_rows(),
                }),
            }))
            .unwrap();

        assert_eq!(model.viewer.load, LoadState::LOADED);
        assert_eq!(model.viewer.focus, ViewerFocus::GRID);
        assert_eq!(model.viewer.mask, vec![0, 1, 2]);
    }

    #[test]
    fn stale_table_data_is_dropped() {
        let mut model = test_model();
        model.viewer.table = Some("local".to_string());
        model.viewer.load = LoadState::LOADING;
        model.viewer.generation = 5;

        // A response from an earlier, superseded fetch arrives late
        model
            .update(Message::Api(ApiEvent::TableData {
                tab: Tab::VIEWER,
                table: "evento".to_string(),
                generation: 4,
                result: Ok(TableData {
                    columns: vec!["id".to_string()],
                    rows: event_rows(),
                }),
            }))
            .unwrap();

        assert_eq!(model.viewer.load, LoadState::LOADING);
        assert!(model.viewer.rows.is_empty());
    }

    #[test]
    fn failed_fetch_falls_back_to_empty_with_an_error_notice() {
        let mut model = test_model();
        model.viewer.table = Some("evento".to_string());
        model.viewer.load = LoadState::LOADING;
        model.viewer.generation = 1;

        model
            .update(Message::Api(ApiEvent::TableData {
                tab: Tab::VIEWER,
                table: "evento".to_string(),
                generation: 1,
                result: Err(EvcError::ApiError("Table not found".to_string())),
            }))
            .unwrap();

        assert_eq!(model.viewer.load, LoadState::EMPTY);
        assert!(model.viewer.rows.is_empty());
        let notice = model.active_notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::ERROR);
        assert_eq!(notice.text, "Table not found");
    }

    #[test]
    fn insert_form_excludes_the_primary_key() {
        let columns = vec!["id".to_string(), "nome".to_string(), "data".to_string()];
        let form = Form::for_insert(&columns, Some("id"));
        let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["nome", "data"]);
        assert!(form.fields.iter().all(|f| f.editable));
        assert!(!form.payload().contains_key("id"));
    }

    #[test]
    fn update_form_prefills_and_locks_the_primary_key() {
        let columns = vec!["id".to_string(), "nome".to_string()];
        let rec = record(json!({"id": 7, "nome": "Semana de BD"}));
        let form = Form::for_update(&columns, &rec, Some("id"));
        assert_eq!(form.fields[0].value, "7");
        assert!(!form.fields[0].editable);
        assert_eq!(form.fields[1].value, "Semana de BD");
        assert!(form.fields[1].editable);
        // The curser starts on the first editable field
        assert_eq!(form.curser, 1);
    }

    #[test]
    fn missing_required_field_blocks_the_insert() {
        let mut model = test_model();
        model.tab = Tab::INSERT;
        model.insert.table = Some("evento".to_string());
        model.insert.form = Form::for_insert(
            &vec!["id".to_string(), "nome".to_string(), "data".to_string()],
            Some("id"),
        );
        model.insert.form.set_value(0, "Semana de BD".to_string());
        model.insert.form.curser = model.insert.form.submit_pos();
        model.insert.focus = InsertFocus::FORM;

        model.update(Message::Enter).unwrap();

        let notice = model.active_notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::ERROR);
        assert_eq!(notice.text, "data is required");
    }

    #[test]
    fn update_target_comes_from_the_metadata_primary_key() {
        let mut state = UpdateState::empty();
        state.columns = vec!["nome".to_string(), "codigo".to_string()];
        state.rows = vec![record(json!({"nome": "x", "codigo": 42}))];
        state.selected = Some(0);

        // Not the first column
        state.primary_key = Some("codigo".to_string());
        assert_eq!(state.target_id().unwrap(), "42");

        state.primary_key = None;
        assert!(state.target_id().is_err());
    }

    #[test]
    fn form_curser_walks_editable_fields_to_submit() {
        let columns = vec!["id".to_string(), "a".to_string(), "b".to_string()];
        let rec = record(json!({"id": 1, "a": "x", "b": "y"}));
        let mut form = Form::for_update(&columns, &rec, Some("id"));
        assert_eq!(form.curser, 1);
        form.move_down();
        assert_eq!(form.curser, 2);
        form.move_down();
        assert!(form.on_submit());
        form.move_up();
        assert_eq!(form.curser, 2);
    }

    #[test]
    fn moving_down_past_the_submit_row_stays_put() {
        let columns = vec!["nome".to_string()];
        let mut form = Form::for_insert(&columns, None);
        form.move_down();
        assert!(form.on_submit());
        form.move_down();
        assert!(form.on_submit());
    }

    #[test]
    fn wrap_cell_content_quotes_like_csv() {
        assert_eq!(wrap_cell_content("plain"), "plain");
        assert_eq!(wrap_cell_content("a b"), "\"a b\"");
        assert_eq!(wrap_cell_content("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn cycling_the_search_column_wraps_through_none() {
        assert_eq!(cycle_column(None, 2), Some(0));
        assert_eq!(cycle_column(Some(0), 2), Some(1));
        assert_eq!(cycle_column(Some(1), 2), None);
        assert_eq!(cycle_column(None, 0), None);
    }
}
