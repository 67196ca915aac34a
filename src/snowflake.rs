use crate::config::Config;
use crate::model::{FetchScope, Row, RowSet, humanize_age, parse_timestamp};
use crate::provider::DataProvider;
use crate::router::{INSTANCE_COLUMNS, POOL_COLUMNS, REPO_COLUMNS, SERVICE_COLUMNS};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{Duration, sleep};
use tracing::debug;

const STATEMENTS_PATH: &str = "/api/v2/statements";
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const STATEMENT_IN_PROGRESS: &str = "333334";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Client for the Snowflake SQL API (`/api/v2/statements`).
pub struct SnowflakeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    token_type: String,
    warehouse: Option<String>,
    role: Option<String>,
    statement_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

/// Column names plus raw cell values of one statement result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Option<String>>>,
}

impl ResultTable {
    /// One map per row keyed by lower-cased column name. Null cells are left out.
    pub fn records(&self) -> Vec<HashMap<String, String>> {
        self.data
            .iter()
            .map(|values| {
                self.columns
                    .iter()
                    .zip(values)
                    .filter_map(|(column, value)| {
                        value
                            .as_ref()
                            .map(|value| (column.to_lowercase(), value.clone()))
                    })
                    .collect()
            })
            .collect()
    }

    /// Column/value pairs of the first row, in result order. Nulls become empty strings.
    pub fn first_row_pairs(&self) -> Vec<(String, String)> {
        let Some(values) = self.data.first() else {
            return Vec::new();
        };
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.to_lowercase(), value.clone().unwrap_or_default()))
            .collect()
    }
}

impl SnowflakeClient {
    pub fn new(config: &Config, statement_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("floe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            token: config.token.clone(),
            token_type: config.token_type.clone(),
            warehouse: non_empty(&config.warehouse).map(str::to_string),
            role: non_empty(&config.role).map(str::to_string),
            statement_timeout,
        })
    }

    /// Startup connectivity check.
    pub async fn ping(&self, scope: &FetchScope) -> Result<String> {
        let table = self
            .query("SELECT CURRENT_VERSION()", scope)
            .await
            .context("ping Snowflake")?;
        let version = table
            .data
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .unwrap_or_default();
        Ok(version)
    }

    pub async fn query(&self, statement: &str, scope: &FetchScope) -> Result<ResultTable> {
        debug!("SQL: {statement}");
        let body = StatementRequest {
            statement,
            timeout: self.statement_timeout.as_secs().max(1),
            database: non_empty(&scope.database),
            schema: non_empty(&scope.namespace),
            warehouse: self.warehouse.as_deref(),
            role: self.role.as_deref(),
        };

        let response = self
            .http
            .post(format!("{}{STATEMENTS_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, &self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .context("failed to reach Snowflake SQL API")?;
        let mut payload = read_statement(response).await?;

        while payload.code.as_deref() == Some(STATEMENT_IN_PROGRESS) {
            let handle = payload
                .statement_handle
                .clone()
                .context("statement still running but no handle was returned")?;
            sleep(POLL_INTERVAL).await;
            payload = self.fetch_partition(&handle, None).await?;
        }

        let meta = payload.result_set_meta_data.take().unwrap_or_default();
        let mut data = std::mem::take(&mut payload.data);
        if meta.partition_info.len() > 1 {
            let handle = payload
                .statement_handle
                .clone()
                .context("result has several partitions but no statement handle")?;
            for partition in 1..meta.partition_info.len() {
                let next = self.fetch_partition(&handle, Some(partition)).await?;
                data.extend(next.data);
            }
        }

        let columns = meta.row_type.into_iter().map(|column| column.name).collect();
        Ok(ResultTable { columns, data })
    }

    async fn fetch_partition(
        &self,
        handle: &str,
        partition: Option<usize>,
    ) -> Result<StatementResponse> {
        let mut request = self
            .http
            .get(format!("{}{STATEMENTS_PATH}/{handle}", self.base_url))
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, &self.token_type)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(partition) = partition {
            request = request.query(&[("partition", partition)]);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to fetch statement {handle}"))?;
        read_statement(response).await
    }
}

async fn read_statement(response: reqwest::Response) -> Result<StatementResponse> {
    let status = response.status();
    let text = response
        .text()
        .await
        .context("failed to read SQL API response")?;

    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(StatementResponse::default());
        }
        return serde_json::from_str(&text).context("invalid SQL API response");
    }

    let message = serde_json::from_str::<StatementResponse>(&text)
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or_else(|| text.trim().to_string());
    if status == StatusCode::UNAUTHORIZED {
        bail!("authentication failed ({status}): {message}");
    }
    bail!("SQL API returned {status}: {message}")
}

#[async_trait]
impl DataProvider for SnowflakeClient {
    async fn list_services(&self, scope: &FetchScope) -> Result<RowSet> {
        let table = self
            .query(&show_services_query(scope), scope)
            .await
            .context("query services")?;
        Ok(service_rows(&table, &scope.namespace))
    }

    async fn list_compute_pools(&self, scope: &FetchScope) -> Result<RowSet> {
        let table = self
            .query("SHOW COMPUTE POOLS", scope)
            .await
            .context("query compute pools")?;
        Ok(pool_rows(&table))
    }

    async fn list_image_repositories(&self, scope: &FetchScope) -> Result<RowSet> {
        let table = self
            .query(&show_image_repositories_query(scope), scope)
            .await
            .context("query image repositories")?;
        Ok(repo_rows(&table))
    }

    async fn list_service_instances(&self, scope: &FetchScope) -> Result<RowSet> {
        let service = scope
            .parent
            .as_deref()
            .context("no service selected for instances")?;
        let table = self
            .query(&show_service_instances_query(scope, service), scope)
            .await
            .with_context(|| format!("query instances of {service}"))?;
        Ok(instance_rows(&table))
    }

    async fn describe_service(
        &self,
        scope: &FetchScope,
        name: &str,
    ) -> Result<Vec<(String, String)>> {
        let table = self
            .query(&describe_service_query(scope, name), scope)
            .await
            .with_context(|| format!("describe service {name}"))?;
        Ok(table.first_row_pairs())
    }
}

pub fn quote_identifier(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn schema_reference(scope: &FetchScope) -> Option<String> {
    match (non_empty(&scope.database), non_empty(&scope.namespace)) {
        (Some(database), Some(schema)) => Some(format!(
            "{}.{}",
            quote_identifier(database),
            quote_identifier(schema)
        )),
        (None, Some(schema)) => Some(quote_identifier(schema)),
        _ => None,
    }
}

fn qualified_name(scope: &FetchScope, name: &str) -> String {
    match schema_reference(scope) {
        Some(schema) => format!("{schema}.{}", quote_identifier(name)),
        None => quote_identifier(name),
    }
}

pub fn show_services_query(scope: &FetchScope) -> String {
    match schema_reference(scope) {
        Some(schema) => format!("SHOW SERVICES IN SCHEMA {schema}"),
        None => "SHOW SERVICES".to_string(),
    }
}

pub fn show_image_repositories_query(scope: &FetchScope) -> String {
    match schema_reference(scope) {
        Some(schema) => format!("SHOW IMAGE REPOSITORIES IN SCHEMA {schema}"),
        None => "SHOW IMAGE REPOSITORIES".to_string(),
    }
}

pub fn show_service_instances_query(scope: &FetchScope, service: &str) -> String {
    format!(
        "SHOW SERVICE INSTANCES IN SERVICE {}",
        qualified_name(scope, service)
    )
}

pub fn describe_service_query(scope: &FetchScope, service: &str) -> String {
    format!("DESCRIBE SERVICE {}", qualified_name(scope, service))
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn field<'a>(record: &'a HashMap<String, String>, keys: &[&str]) -> &'a str {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .map(|value| value.as_str())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_default()
}

fn age_of(record: &HashMap<String, String>, keys: &[&str]) -> String {
    humanize_age(parse_timestamp(field(record, keys)))
}

pub fn service_rows(table: &ResultTable, default_schema: &str) -> RowSet {
    let rows = table
        .records()
        .iter()
        .map(|record| {
            let name = field(record, &["name"]);
            let namespace = match field(record, &["schema_name"]) {
                "" => default_schema,
                schema => schema,
            };
            Row::new(
                name,
                vec![
                    namespace.to_string(),
                    name.to_string(),
                    field(record, &["status", "state"]).to_uppercase(),
                    field(record, &["compute_pool"]).to_string(),
                    age_of(record, &["created_on"]),
                ],
            )
        })
        .collect();
    RowSet::new(SERVICE_COLUMNS, rows)
}

pub fn pool_rows(table: &ResultTable) -> RowSet {
    let rows = table
        .records()
        .iter()
        .map(|record| {
            let name = field(record, &["name"]);
            Row::new(
                name,
                vec![
                    name.to_string(),
                    field(record, &["state", "status"]).to_uppercase(),
                    field(record, &["min_nodes"]).to_string(),
                    field(record, &["max_nodes"]).to_string(),
                    field(record, &["instance_family"]).to_string(),
                    age_of(record, &["created_on"]),
                ],
            )
        })
        .collect();
    RowSet::new(POOL_COLUMNS, rows)
}

pub fn repo_rows(table: &ResultTable) -> RowSet {
    let rows = table
        .records()
        .iter()
        .map(|record| {
            let name = field(record, &["name"]);
            Row::new(
                name,
                vec![
                    name.to_string(),
                    field(record, &["repository_url"]).to_string(),
                    field(record, &["owner"]).to_string(),
                    age_of(record, &["created_on"]),
                ],
            )
        })
        .collect();
    RowSet::new(REPO_COLUMNS, rows)
}

pub fn instance_rows(table: &ResultTable) -> RowSet {
    let rows = table
        .records()
        .iter()
        .map(|record| {
            let instance = field(record, &["instance_id", "instance_name", "name"]);
            Row::new(
                instance,
                vec![
                    instance.to_string(),
                    field(record, &["status", "state"]).to_uppercase(),
                    field(record, &["node", "node_name", "ip_address"]).to_string(),
                    age_of(record, &["start_time", "created_on", "creation_time"]),
                ],
            )
        })
        .collect();
    RowSet::new(INSTANCE_COLUMNS, rows)
}

#[cfg(test)]
mod tests {
    use super::{
        ResultTable, SnowflakeClient, describe_service_query, instance_rows, pool_rows,
        quote_identifier, service_rows, show_image_repositories_query, show_services_query,
        show_service_instances_query,
    };
    use crate::config::Config;
    use crate::model::FetchScope;
    use crate::provider::DataProvider;
    use serde_json::json;
    use tokio::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scope(database: &str, schema: &str) -> FetchScope {
        FetchScope {
            database: database.to_string(),
            namespace: schema.to_string(),
            parent: None,
        }
    }

    fn table(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> ResultTable {
        ResultTable {
            columns: columns.iter().map(|column| column.to_string()).collect(),
            data: rows
                .into_iter()
                .map(|row| row.into_iter().map(|cell| cell.map(str::to_string)).collect())
                .collect(),
        }
    }

    fn client_for(server: &MockServer) -> SnowflakeClient {
        let config = Config {
            account: "acme".to_string(),
            user: "ops".to_string(),
            token: "secret".to_string(),
            token_type: "PROGRAMMATIC_ACCESS_TOKEN".to_string(),
            host: server.uri(),
            warehouse: "WH".to_string(),
            ..Config::default()
        };
        SnowflakeClient::new(&config, Duration::from_secs(10)).expect("client")
    }

    #[test]
    fn queries_quote_identifiers() {
        assert_eq!(quote_identifier("my\"db"), "\"my\"\"db\"");
        assert_eq!(
            show_services_query(&scope("DB", "PUBLIC")),
            "SHOW SERVICES IN SCHEMA \"DB\".\"PUBLIC\""
        );
        assert_eq!(
            show_services_query(&scope("", "PUBLIC")),
            "SHOW SERVICES IN SCHEMA \"PUBLIC\""
        );
        assert_eq!(show_services_query(&scope("", "")), "SHOW SERVICES");
        assert_eq!(
            show_image_repositories_query(&scope("DB", "APP")),
            "SHOW IMAGE REPOSITORIES IN SCHEMA \"DB\".\"APP\""
        );
        assert_eq!(
            show_service_instances_query(&scope("DB", "APP"), "web"),
            "SHOW SERVICE INSTANCES IN SERVICE \"DB\".\"APP\".\"web\""
        );
        assert_eq!(
            describe_service_query(&scope("", ""), "web"),
            "DESCRIBE SERVICE \"web\""
        );
    }

    #[test]
    fn service_rows_normalize_columns() {
        let result = table(
            &["NAME", "SCHEMA_NAME", "STATUS", "COMPUTE_POOL", "CREATED_ON"],
            vec![
                vec![Some("web"), Some("APP"), Some("running"), Some("POOL_A"), None],
                vec![Some("worker"), None, Some("Suspended"), Some("POOL_B"), Some("garbage")],
            ],
        );
        let rows = service_rows(&result, "PUBLIC");
        assert_eq!(rows.columns, vec!["NAMESPACE", "NAME", "STATUS", "POOL", "AGE"]);
        assert_eq!(rows.rows[0].cells, vec!["APP", "web", "RUNNING", "POOL_A", ""]);
        assert_eq!(rows.rows[1].cells, vec!["PUBLIC", "worker", "SUSPENDED", "POOL_B", ""]);
        assert_eq!(rows.rows[1].key, "worker");
    }

    #[test]
    fn pool_and_instance_rows_fall_back_between_columns() {
        let pools = pool_rows(&table(
            &["name", "state", "min_nodes", "max_nodes", "instance_family"],
            vec![vec![Some("P1"), Some("idle"), Some("1"), Some("3"), Some("CPU_X64_XS")]],
        ));
        assert_eq!(pools.rows[0].cells, vec!["P1", "IDLE", "1", "3", "CPU_X64_XS", ""]);

        let instances = instance_rows(&table(
            &["instance_id", "status", "ip_address"],
            vec![vec![Some("0"), Some("ready"), Some("10.0.0.4")]],
        ));
        assert_eq!(instances.rows[0].cells, vec!["0", "READY", "10.0.0.4", ""]);
    }

    #[test]
    fn first_row_pairs_keep_result_order() {
        let result = table(
            &["NAME", "STATUS", "COMMENT"],
            vec![vec![Some("web"), Some("RUNNING"), None]],
        );
        assert_eq!(
            result.first_row_pairs(),
            vec![
                ("name".to_string(), "web".to_string()),
                ("status".to_string(), "RUNNING".to_string()),
                ("comment".to_string(), String::new()),
            ]
        );
        assert!(ResultTable::default().first_row_pairs().is_empty());
    }

    #[tokio::test]
    async fn list_services_posts_statement_with_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .and(header("authorization", "Bearer secret"))
            .and(header(
                "x-snowflake-authorization-token-type",
                "PROGRAMMATIC_ACCESS_TOKEN",
            ))
            .and(body_partial_json(json!({
                "statement": "SHOW SERVICES IN SCHEMA \"DB\".\"PUBLIC\"",
                "database": "DB",
                "schema": "PUBLIC",
                "warehouse": "WH",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "090001",
                "statementHandle": "h-1",
                "resultSetMetaData": {
                    "rowType": [{"name": "name"}, {"name": "status"}, {"name": "compute_pool"}],
                    "partitionInfo": [{"rowCount": 1}]
                },
                "data": [["web", "running", "POOL_A"]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rows = client
            .list_services(&scope("DB", "PUBLIC"))
            .await
            .expect("services");
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].cells, vec!["PUBLIC", "web", "RUNNING", "POOL_A", ""]);
    }

    #[tokio::test]
    async fn running_statement_is_polled_and_partitions_are_merged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "code": "333334",
                "statementHandle": "h-2",
                "message": "Asynchronous execution in progress."
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/statements/h-2"))
            .and(query_param("partition", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["P2", "ACTIVE"]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/statements/h-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "090001",
                "statementHandle": "h-2",
                "resultSetMetaData": {
                    "rowType": [{"name": "name"}, {"name": "state"}],
                    "partitionInfo": [{"rowCount": 1}, {"rowCount": 1}]
                },
                "data": [["P1", "IDLE"]]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pools = client
            .list_compute_pools(&scope("DB", "PUBLIC"))
            .await
            .expect("pools");
        let names = pools
            .rows
            .iter()
            .map(|row| row.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["P1", "P2"]);
        assert_eq!(pools.rows[1].cells[1], "ACTIVE");
    }

    #[tokio::test]
    async fn api_errors_surface_the_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": "002003",
                "message": "Schema 'DB.NOPE' does not exist or not authorized."
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let error = client
            .list_image_repositories(&scope("DB", "NOPE"))
            .await
            .expect_err("should fail");
        let rendered = format!("{error:#}");
        assert!(rendered.contains("query image repositories"), "{rendered}");
        assert!(rendered.contains("does not exist"), "{rendered}");
    }

    #[tokio::test]
    async fn instances_require_a_parent_service() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let error = client
            .list_service_instances(&scope("DB", "PUBLIC"))
            .await
            .expect_err("no parent");
        assert!(error.to_string().contains("no service selected"));
    }

    #[tokio::test]
    async fn describe_returns_lowercased_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .and(body_partial_json(json!({
                "statement": "DESCRIBE SERVICE \"DB\".\"PUBLIC\".\"web\""
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultSetMetaData": {
                    "rowType": [{"name": "NAME"}, {"name": "DNS_NAME"}],
                    "partitionInfo": [{"rowCount": 1}]
                },
                "data": [["web", "web.abc.svc.spcs.internal"]]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pairs = client
            .describe_service(&scope("DB", "PUBLIC"), "web")
            .await
            .expect("describe");
        assert_eq!(pairs[1].0, "dns_name");
        assert_eq!(pairs[1].1, "web.abc.svc.spcs.internal");
    }
}
