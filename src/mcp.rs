//! MCP tool server.
//!
//! Speaks newline-delimited JSON-RPC 2.0 on stdio. Every tool is a thin
//! wrapper over the HTTP API, dispatched in-process through [`ApiClient`].
//! Stdout carries protocol messages only; logs go to stderr.

mod client;
mod tools;

pub use client::{ApiClient, ToolError, ToolResult};
pub use tools::{ToolSpec, call_tool, tools};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "shelflife";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn failure(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

fn tool_list() -> Value {
    let tools: Vec<Value> = tools()
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": t.input_schema(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

async fn call(client: &ApiClient, id: Value, params: &Value) -> Value {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return failure(id, INVALID_PARAMS, "Missing tool name".to_string());
    };
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match call_tool(client, name, arguments).await {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            success(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": client::is_error(&value),
                }),
            )
        }
        Err(e @ (ToolError::InvalidArguments(_) | ToolError::UnknownTool(_))) => {
            failure(id, INVALID_PARAMS, e.to_string())
        }
        Err(e) => {
            tracing::error!(tool = %name, error = %e, "Tool call failed");
            success(
                id,
                json!({
                    "content": [{ "type": "text", "text": e.to_string() }],
                    "isError": true,
                }),
            )
        }
    }
}

/// Handle one JSON-RPC message. Notifications get no response.
pub async fn handle_message(client: &ApiClient, message: &Value) -> Option<Value> {
    let id = message.get("id").filter(|id| !id.is_null())?.clone();
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

    tracing::debug!(method, "MCP request");

    let response = match method {
        "initialize" => success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }),
        ),
        "ping" => success(id, json!({})),
        "tools/list" => success(id, tool_list()),
        "tools/call" => call(client, id, &params).await,
        other => failure(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
    };
    Some(response)
}

/// Serve tools on stdin/stdout until stdin closes.
pub async fn serve_stdio(client: ApiClient) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    tracing::info!("MCP server listening on stdio");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(message) => handle_message(&client, &message).await,
            Err(e) => Some(failure(Value::Null, PARSE_ERROR, format!("Parse error: {e}"))),
        };

        if let Some(response) = response {
            let mut out = response.to_string();
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("stdin closed, MCP server stopping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Database, NewBook};
    use crate::id;
    use crate::server::{AppState, create_router};

    fn client_with(config: Config) -> (ApiClient, Database) {
        let db = Database::open_memory().unwrap();
        let state = AppState::new(config, db.clone()).unwrap();
        (ApiClient::new(create_router(state)), db)
    }

    fn client() -> (ApiClient, Database) {
        client_with(Config::default())
    }

    async fn fake_client() -> (ApiClient, Database) {
        let mut config = Config::default();
        config.openlibrary.base_url = crate::tests::spawn_fake_openlibrary().await;
        config.openlibrary.covers_url = config.openlibrary.base_url.clone();
        client_with(config)
    }

    fn seed(db: &Database, title: &str, author: &str) -> i64 {
        db.create_book(&NewBook {
            title: title.to_string(),
            author: author.to_string(),
            ..Default::default()
        })
        .unwrap()
        .id
    }

    async fn tool(client: &ApiClient, name: &str, arguments: Value) -> Value {
        call_tool(client, name, arguments).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let (client, _) = client();
        let response = handle_message(
            &client,
            &json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        )
        .await
        .unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "shelflife");
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let (client, _) = client();
        let message = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(handle_message(&client, &message).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (client, _) = client();
        let response = handle_message(&client, &json!({ "id": "a", "method": "resources/list" }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (client, _) = client();
        let response = handle_message(&client, &json!({ "id": 2, "method": "tools/list" }))
            .await
            .unwrap();
        let listed = response["result"]["tools"].as_array().unwrap();
        assert_eq!(listed.len(), 18);
        let add = listed.iter().find(|t| t["name"] == "add_book").unwrap();
        assert_eq!(add["inputSchema"]["required"], json!(["title", "author"]));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let (client, _) = client();
        let unknown = handle_message(
            &client,
            &json!({ "id": 3, "method": "tools/call", "params": { "name": "nope" } }),
        )
        .await
        .unwrap();
        assert_eq!(unknown["error"]["code"], INVALID_PARAMS);

        let bad = handle_message(
            &client,
            &json!({
                "id": 4,
                "method": "tools/call",
                "params": { "name": "get_book", "arguments": { "title": "Dune" } },
            }),
        )
        .await
        .unwrap();
        assert_eq!(bad["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tool_call_wraps_result_as_text() {
        let (client, db) = client();
        seed(&db, "Dune", "Frank Herbert");
        let response = handle_message(
            &client,
            &json!({
                "id": 5,
                "method": "tools/call",
                "params": {
                    "name": "get_book",
                    "arguments": { "title": "Dune", "author": "Frank Herbert" },
                },
            }),
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["isError"], false);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let book: Value = serde_json::from_str(text).unwrap();
        assert_eq!(book["title"], "Dune");
    }

    #[tokio::test]
    async fn test_get_missing_book_is_error_value() {
        let (client, _) = client();
        let value = tool(
            &client,
            "get_book",
            json!({ "title": "Missing", "author": "Nobody" }),
        )
        .await;
        assert_eq!(value["error"], true);
        assert_eq!(value["status"], 404);
    }

    #[tokio::test]
    async fn test_search_books() {
        let (client, db) = client();
        seed(&db, "Dune", "Frank Herbert");
        seed(&db, "Emma", "Jane Austen");

        let found = tool(&client, "search_books", json!({ "author": "herbert" })).await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let rejected = tool(&client, "search_books", json!({ "limit": 0 })).await;
        assert_eq!(rejected, json!([]));
    }

    #[tokio::test]
    async fn test_shelve_book_creates_exclusive_shelf() {
        let (client, db) = client();
        let book_id = seed(&db, "Dune", "Frank Herbert");

        let args = json!({ "title": "Dune", "author": "Frank Herbert", "shelf": "to-read" });
        tool(&client, "shelve_book", args).await;
        let args = json!({ "title": "Dune", "author": "Frank Herbert", "shelf": "read" });
        tool(&client, "shelve_book", args).await;

        let to_read = db.get_shelf(id::name_id("to-read")).unwrap();
        assert!(to_read.shelf.is_exclusive);
        assert!(to_read.books.is_empty());

        let shelf = tool(&client, "browse_shelf", json!({ "shelf_name": "read" })).await;
        assert_eq!(shelf["books"][0]["id"], book_id);
    }

    #[tokio::test]
    async fn test_review_book_upserts() {
        let (client, db) = client();
        seed(&db, "Dune", "Frank Herbert");

        let first = json!({ "title": "Dune", "author": "Frank Herbert", "rating": 4.0 });
        let created = tool(&client, "review_book", first).await;
        assert_eq!(created["rating"], 4.0);

        let second = json!({ "title": "Dune", "author": "Frank Herbert", "review_text": "Spice." });
        let updated = tool(&client, "review_book", second).await;
        assert_eq!(updated["id"], created["id"]);
        assert_eq!(updated["review_text"], "Spice.");

        let reviews = tool(&client, "get_reviews", json!({ "min_rating": 3.5 })).await;
        assert_eq!(reviews.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tag_books_reports_missing_by_name() {
        let (client, db) = client();
        seed(&db, "Dune", "Frank Herbert");

        let result = tool(
            &client,
            "tag_books",
            json!({
                "tag": "desert",
                "books": [
                    { "title": "Dune", "author": "Frank Herbert" },
                    { "title": "Ghost", "author": "Nobody" },
                ],
            }),
        )
        .await;
        assert_eq!(result["not_found"], json!(["Ghost by Nobody"]));

        let tagged = tool(&client, "browse_tag", json!({ "tag_name": "desert" })).await;
        assert_eq!(tagged.as_array().unwrap().len(), 1);
        let unknown = tool(&client, "browse_tag", json!({ "tag_name": "none" })).await;
        assert_eq!(unknown, json!([]));
    }

    #[tokio::test]
    async fn test_reading_flow() {
        let (client, db) = client();
        seed(&db, "Dune", "Frank Herbert");
        let book = json!({ "title": "Dune", "author": "Frank Herbert" });

        let mut start = book.clone();
        start["started_at"] = json!("2024-03-01");
        let reading = tool(&client, "start_reading", start).await;
        assert_eq!(reading["started_at"], "2024-03-01");

        let mut progress = book.clone();
        progress["page"] = json!(120);
        progress["progress_date"] = json!("2024-03-05");
        let entry = tool(&client, "log_reading_progress", progress).await;
        assert_eq!(entry["page"], 120);

        let mut finish = book.clone();
        finish["finished_at"] = json!("2024-03-15");
        let finished = tool(&client, "finish_reading", finish).await;
        assert_eq!(finished["duration_days"], 14);

        let history = tool(&client, "get_reading_history", book).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reading_profile() {
        let (client, db) = client();
        let dune = seed(&db, "Dune", "Frank Herbert");
        seed(&db, "Emma", "Jane Austen");
        db.create_review(dune, &crate::db::ReviewInput { rating: Some(5.0), review_text: None })
            .unwrap();
        db.tag_book(dune, "classic").unwrap();

        let profile = tool(&client, "reading_profile", json!({})).await;
        assert_eq!(profile["total_books"], 2);
        assert_eq!(profile["total_reviews"], 1);
        assert_eq!(profile["rating_distribution"], json!({ "5.0": 1 }));
        assert_eq!(profile["top_tags"], json!([{ "name": "classic", "count": 1 }]));
        assert_eq!(profile["recent_books"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_goodreads_csv() {
        let (client, _) = client();
        let args = json!({ "csv_content": crate::goodreads::tests::SAMPLE_CSV });
        let result = tool(&client, "import_goodreads_csv", args).await;
        assert_eq!(result["books_created"], 2);
        assert_eq!(result["reviews_created"], 1);
    }

    #[tokio::test]
    async fn test_import_goodreads_csv_over_two_megabytes() {
        let (client, db) = client();
        let csv = crate::goodreads::tests::padded_export(300, 8_000);
        assert!(csv.len() > 2 * 1024 * 1024);

        let result = tool(&client, "import_goodreads_csv", json!({ "csv_content": csv })).await;
        assert_eq!(result.get("error"), None);
        assert_eq!(result["books_created"], 300);
        assert_eq!(result["reviews_created"], 300);
        assert_eq!(db.count_books().unwrap(), 300);
    }

    #[tokio::test]
    async fn test_import_goodreads_missing_file() {
        let (client, _) = client();
        let result = tool(
            &client,
            "import_goodreads",
            json!({ "file_path": "/nonexistent/goodreads.csv" }),
        )
        .await;
        assert_eq!(result["error"], true);
        assert_eq!(result["detail"], "File not found: /nonexistent/goodreads.csv");
    }

    #[tokio::test]
    async fn test_import_goodreads_file() {
        let (client, _) = client();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, crate::goodreads::tests::SAMPLE_CSV).unwrap();

        let args = json!({ "file_path": path.to_string_lossy() });
        let result = tool(&client, "import_goodreads", args).await;
        assert_eq!(result["books_created"], 2);
    }

    #[tokio::test]
    async fn test_add_book_resolves_and_shelves() {
        let (client, db) = fake_client().await;

        let book = tool(
            &client,
            "add_book",
            json!({ "title": "dune", "author": "herbert", "shelf": "to-read" }),
        )
        .await;
        assert_eq!(book["title"], "Dune");
        assert_eq!(book["author"], "Frank Herbert");
        assert_eq!(book["id"], id::book_id("Dune", "Frank Herbert"));

        let shelf = db.get_shelf(id::name_id("to-read")).unwrap();
        assert_eq!(shelf.books.len(), 1);

        let again = tool(&client, "add_book", json!({ "title": "Dune", "author": "Frank Herbert" })).await;
        assert_eq!(again["status"], 409);
    }

    #[tokio::test]
    async fn test_lookup_book() {
        let (client, _) = fake_client().await;
        let candidates = tool(&client, "lookup_book", json!({ "title": "Dune", "limit": 1 })).await;
        assert_eq!(candidates.as_array().unwrap().len(), 1);
        assert_eq!(candidates[0]["title"], "Dune");

        let rejected = tool(&client, "lookup_book", json!({ "title": "Dune", "limit": 50 })).await;
        assert_eq!(rejected, json!([]));
    }
}
