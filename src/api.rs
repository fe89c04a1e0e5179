use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, trace};

use crate::domain::{EvcConfig, EvcError, Tab};

// One row of a table, column name to scalar value
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(default, rename = "recordCount")]
    pub record_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableColumns {
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

// Responses delivered back to the event loop. Data and column responses carry
// the generation they were requested under so the model can drop responses
// that were superseded by a later table select.
#[derive(Debug)]
pub enum ApiEvent {
    Tables(Result<Vec<TableInfo>, EvcError>),
    TableCounts(HashMap<String, u64>),
    TableData {
        tab: Tab,
        table: String,
        generation: u64,
        result: Result<TableData, EvcError>,
    },
    TableColumns {
        tab: Tab,
        table: String,
        generation: u64,
        result: Result<TableColumns, EvcError>,
    },
    Inserted {
        table: String,
        result: Result<(), EvcError>,
    },
    Updated {
        table: String,
        result: Result<(), EvcError>,
    },
}

// Thin client over the backend REST service. Every request runs on its own
// worker thread and reports back over the channel; nothing here blocks the UI.
pub struct ApiClient {
    base_url: String,
    http: Client,
    tx: Sender<ApiEvent>,
}

impl ApiClient {
    pub fn new(config: &EvcConfig, tx: Sender<ApiEvent>) -> Result<Self, EvcError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(ApiClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            tx,
        })
    }

    // GET /tables, then fan out one count request per table and deliver the
    // joined map as a second event. The counts have no ordering dependency
    // between them.
    pub fn fetch_tables(&self) {
        let http = self.http.clone();
        let base = self.base_url.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            debug!("GET {base}/tables");
            let result: Result<Vec<TableInfo>, EvcError> =
                get_json(&http, &format!("{base}/tables"));
            let tables = match &result {
                Ok(t) => t.clone(),
                Err(_) => Vec::new(),
            };
            if tx.send(ApiEvent::Tables(result)).is_err() {
                return;
            }

            if tables.is_empty() {
                return;
            }
            let counts: HashMap<String, u64> = tables
                .par_iter()
                .filter_map(|t| {
                    let url = format!("{base}/table/{}/count", t.name);
                    match get_json::<CountResponse>(&http, &url) {
                        Ok(c) => Some((t.name.clone(), c.count)),
                        Err(e) => {
                            error!("Count for {} failed: {:?}", t.name, e);
                            None
                        }
                    }
                })
                .collect();
            trace!("Fetched {} table counts", counts.len());
            let _ = tx.send(ApiEvent::TableCounts(counts));
        });
    }

    // GET /table/{name}, full row set
    pub fn fetch_table_data(&self, tab: Tab, table: &str, generation: u64) {
        let http = self.http.clone();
        let url = format!("{}/table/{}", self.base_url, table);
        let tx = self.tx.clone();
        let table = table.to_string();
        thread::spawn(move || {
            debug!("GET {url} (generation {generation})");
            let result = get_json::<TableData>(&http, &url).map(|mut data| {
                // The backend occasionally pads empty objects into the row set
                data.rows.retain(|row| !row.is_empty());
                data
            });
            let _ = tx.send(ApiEvent::TableData {
                tab,
                table,
                generation,
                result,
            });
        });
    }

    // GET /table/{name}/columns
    pub fn fetch_table_columns(&self, tab: Tab, table: &str, generation: u64) {
        let http = self.http.clone();
        let url = format!("{}/table/{}/columns", self.base_url, table);
        let tx = self.tx.clone();
        let table = table.to_string();
        thread::spawn(move || {
            debug!("GET {url} (generation {generation})");
            let result = get_json::<TableColumns>(&http, &url);
            let _ = tx.send(ApiEvent::TableColumns {
                tab,
                table,
                generation,
                result,
            });
        });
    }

    // POST /insert/{name} with the form data map as JSON body
    pub fn insert(&self, table: &str, payload: Record) {
        let http = self.http.clone();
        let url = format!("{}/insert/{}", self.base_url, table);
        let tx = self.tx.clone();
        let table = table.to_string();
        thread::spawn(move || {
            debug!("POST {url}");
            let result = send_json(http.post(&url), &Value::Object(payload));
            let _ = tx.send(ApiEvent::Inserted { table, result });
        });
    }

    // PUT /table/{name}/update/{id} with the form data map as JSON body
    pub fn update(&self, table: &str, id: &str, payload: Record) {
        let http = self.http.clone();
        let url = format!("{}/table/{}/update/{}", self.base_url, table, id);
        let tx = self.tx.clone();
        let table = table.to_string();
        thread::spawn(move || {
            debug!("PUT {url}");
            let result = send_json(http.put(&url), &Value::Object(payload));
            let _ = tx.send(ApiEvent::Updated { table, result });
        });
    }
}

fn get_json<T: DeserializeOwned>(http: &Client, url: &str) -> Result<T, EvcError> {
    let response = http.get(url).send()?;
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(EvcError::ApiError(error_message(status, &body)));
    }
    serde_json::from_str(&body)
        .map_err(|e| EvcError::InvalidResponse(format!("Unexpected response shape: {e}")))
}

fn send_json(
    request: reqwest::blocking::RequestBuilder,
    payload: &Value,
) -> Result<(), EvcError> {
    let response = request.json(payload).send()?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().unwrap_or_default();
        Err(EvcError::ApiError(error_message(status, &body)))
    }
}

// Prefer the server provided message, fall back to the bare status
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(e) => e.error,
        Err(_) => format!("Server returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_info_with_and_without_count() {
        let with: Vec<TableInfo> =
            serde_json::from_str(r#"[{"name": "evento", "recordCount": 12}]"#).unwrap();
        assert_eq!(with[0].name, "evento");
        assert_eq!(with[0].record_count, Some(12));

        let without: Vec<TableInfo> = serde_json::from_str(r#"[{"name": "local"}]"#).unwrap();
        assert_eq!(without[0].record_count, None);
    }

    #[test]
    fn table_columns_allows_missing_primary_key() {
        let cols: TableColumns =
            serde_json::from_str(r#"{"columns": ["id", "nome"], "primary_key": "id"}"#).unwrap();
        assert_eq!(cols.primary_key.as_deref(), Some("id"));

        let cols: TableColumns =
            serde_json::from_str(r#"{"columns": ["a", "b"], "primary_key": null}"#).unwrap();
        assert_eq!(cols.primary_key, None);
    }

    #[test]
    fn table_data_decodes_rows() {
        let data: TableData = serde_json::from_str(
            r#"{"columns": ["id", "nome"], "rows": [{"id": 1, "nome": "Semana de BD"}]}"#,
        )
        .unwrap();
        assert_eq!(data.columns, vec!["id", "nome"]);
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0]["nome"], Value::from("Semana de BD"));
    }

    #[test]
    fn missing_rows_key_is_a_decode_error() {
        let result: Result<TableData, _> =
            serde_json::from_str(r#"{"columns": ["id", "nome"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn error_message_prefers_server_text() {
        let msg = error_message(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": "Table not found"}"#,
        );
        assert_eq!(msg, "Table not found");

        let msg = error_message(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(msg, "Server returned 502 Bad Gateway");
    }
}
