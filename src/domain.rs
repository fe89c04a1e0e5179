use std::io::Error;

use ratatui::crossterm::event::KeyEvent;

use crate::api::ApiEvent;

// Records shown per page in the viewer grid and the update record picker.
pub const VIEWER_PAGE_SIZE: usize = 10;
pub const UPDATE_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct EvcConfig {
    pub base_url: String,
    pub event_poll_time: u64,
    pub request_timeout: u64,
    pub notice_timeout: u64,
}

impl Default for EvcConfig {
    fn default() -> Self {
        EvcConfig {
            base_url: "http://127.0.0.1:5000".to_string(),
            event_poll_time: 100,
            request_timeout: 10,
            notice_timeout: 5,
        }
    }
}

#[derive(Debug)]
pub enum EvcError {
    IoError(Error),
    HttpError(reqwest::Error),
    JsonError(serde_json::Error),
    // Non-2xx response; holds the server provided error message when there is one
    ApiError(String),
    InvalidResponse(String),
}

impl EvcError {
    // The message shown in the status line
    pub fn user_message(&self) -> String {
        match self {
            EvcError::IoError(e) => format!("IO error: {e}"),
            EvcError::HttpError(e) => format!("Request failed: {e}"),
            EvcError::JsonError(e) => format!("Malformed response: {e}"),
            EvcError::ApiError(msg) => msg.clone(),
            EvcError::InvalidResponse(msg) => msg.clone(),
        }
    }
}

impl From<Error> for EvcError {
    fn from(err: Error) -> Self {
        EvcError::IoError(err)
    }
}

impl From<reqwest::Error> for EvcError {
    fn from(err: reqwest::Error) -> Self {
        EvcError::HttpError(err)
    }
}

impl From<serde_json::Error> for EvcError {
    fn from(err: serde_json::Error) -> Self {
        EvcError::JsonError(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    VIEWER,
    INSERT,
    UPDATE,
}

#[derive(Debug)]
pub enum Message {
    Quit,
    Help,
    Enter,
    Exit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    PageNext,
    PagePrev,
    SwitchTab(Tab),
    ToggleSort,
    CycleSearchColumn,
    EnterSearch,
    Refresh,
    CopyCell,
    CopyRow,
    RawKey(KeyEvent),
    Api(ApiEvent),
    Resize(usize, usize),
}

pub const HELP_TEXT: &str = "\
 evc - event database console

 Global
   1 / 2 / 3     switch tab (view / insert / update)
   ?             this help
   q             quit
   Esc           back / close

 Viewer tab
   Up/Down       select table, Enter loads it
   Left/Right    move column curser
   s             toggle sort on the curser column
   c             cycle the search column
   /             enter a search query
   n / p         next / previous page
   y / Y         copy cell / row to clipboard
   r             reload the current table

 Insert / Update tab
   Up/Down       select table or field
   Enter         load table, pick record, next field
   Enter on [submit]  send the form
";
