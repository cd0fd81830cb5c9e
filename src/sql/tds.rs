//! SQL Server connector over TDS.

use async_trait::async_trait;
use std::net::SocketAddr;
use tiberius::{AuthMethod, Client, ColumnData, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::address::DEFAULT_PORT;
use super::{
    Credential, Query, QueryOptions, QueryOutput, Row, ServerAddress, ServerMessage, SqlConnector, SqlError,
    SqlParam, SqlValue,
};

const APPLICATION_NAME: &str = "agwarden";

type TdsClient = Client<Compat<TcpStream>>;

/// Connector that speaks TDS to SQL Server via `tiberius`.
#[derive(Debug, Clone, Default)]
pub struct TdsConnector;

impl TdsConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect(
        &self,
        server: &ServerAddress,
        database: &str,
        options: &QueryOptions,
    ) -> Result<TdsClient, SqlError> {
        let mut config = Config::new();
        config.host(&server.host);
        if let Some(port) = server.port {
            config.port(port);
        } else if server.instance.is_none() {
            config.port(DEFAULT_PORT);
        }
        if let Some(instance) = &server.instance {
            config.instance_name(instance);
        }
        config.database(database);
        config.application_name(APPLICATION_NAME);
        config.trust_cert();
        config.authentication(auth_method(server, &options.credential)?);

        let tcp = open_stream(server, &config, options).await?;
        tcp.set_nodelay(true).map_err(|e| connection_error(server, e))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| connection_error(server, e))
    }
}

#[async_trait]
impl SqlConnector for TdsConnector {
    async fn run(
        &self,
        server: &ServerAddress,
        database: &str,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<QueryOutput, SqlError> {
        let mut client = self.connect(server, database, options).await?;

        let result = tokio::time::timeout(options.command_timeout, run_query(&mut client, query)).await;
        let output = match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(execution_error(server, e)),
            Err(_) => Err(SqlError::Timeout {
                server: server.to_string(),
                timeout: options.command_timeout,
            }),
        };

        // Closed on both paths; a failed close after a failed batch is expected.
        if let Err(e) = client.close().await {
            tracing::debug!("Closing connection to {} failed: {}", server, e);
        }

        output
    }
}

async fn run_query(client: &mut TdsClient, query: &Query) -> tiberius::Result<QueryOutput> {
    let mut statement = tiberius::Query::new(query.text.as_str());
    for param in &query.params {
        match param {
            SqlParam::Text(value) => statement.bind(value.as_str()),
            SqlParam::Int(value) => statement.bind(*value),
        }
    }

    let stream = statement.query(client).await?;
    let rows = stream.into_first_result().await?;

    Ok(QueryOutput::rows(rows.into_iter().map(convert_row).collect()))
}

/// Open the TCP stream, honoring named instances and multi-subnet listeners.
async fn open_stream(
    server: &ServerAddress,
    config: &Config,
    options: &QueryOptions,
) -> Result<TcpStream, SqlError> {
    let timeout = options.connect_timeout;

    if server.instance.is_some() && server.port.is_none() {
        return match tokio::time::timeout(timeout, TcpStream::connect_named(config)).await {
            Ok(result) => result.map_err(|e| connection_error(server, e)),
            Err(_) => Err(connect_timeout(server, options)),
        };
    }

    if !options.multi_subnet_failover {
        return match tokio::time::timeout(timeout, TcpStream::connect(config.get_addr())).await {
            Ok(result) => result.map_err(|e| connection_error(server, e)),
            Err(_) => Err(connect_timeout(server, options)),
        };
    }

    // A listener spanning subnets resolves to one address per subnet; only the
    // one hosting the primary accepts connections.
    let port = server.port.unwrap_or(DEFAULT_PORT);
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((server.host.as_str(), port))
        .await
        .map_err(|e| connection_error(server, format!("DNS resolution failed: {}", e)))?
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                tracing::debug!("Connected to {} via {}", server, addr);
                return Ok(stream);
            }
            Ok(Err(e)) => last_error = Some(connection_error(server, format!("{}: {}", addr, e))),
            Err(_) => last_error = Some(connect_timeout(server, options)),
        }
    }

    Err(last_error.unwrap_or_else(|| connection_error(server, "no addresses resolved")))
}

fn auth_method(server: &ServerAddress, credential: &Credential) -> Result<AuthMethod, SqlError> {
    match credential {
        Credential::SqlLogin { user, password } => Ok(AuthMethod::sql_server(user, password)),
        #[cfg(windows)]
        Credential::Integrated => Ok(AuthMethod::Integrated),
        #[cfg(not(windows))]
        Credential::Integrated => Err(connection_error(
            server,
            "integrated authentication is only available on Windows; configure a SQL login",
        )),
    }
}

fn convert_row(row: tiberius::Row) -> Row {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut out = Row::new();
    for (name, data) in names.into_iter().zip(row) {
        out.push(name, convert_value(data));
    }
    out
}

fn convert_value(data: ColumnData<'static>) -> SqlValue {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(v as i64)),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(v as f64)),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.map(|s| SqlValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Text(g.to_string())),
        ColumnData::Numeric(v) => {
            v.map(|n| SqlValue::Float(n.value() as f64 / 10f64.powi(n.scale() as i32)))
        }
        // Dates are converted to text in the statements themselves.
        other => Some(SqlValue::Text(format!("{:?}", other))),
    };
    value.unwrap_or(SqlValue::Null)
}

fn connection_error(server: &ServerAddress, reason: impl std::fmt::Display) -> SqlError {
    SqlError::Connection {
        server: server.to_string(),
        reason: reason.to_string(),
    }
}

fn connect_timeout(server: &ServerAddress, options: &QueryOptions) -> SqlError {
    connection_error(
        server,
        format!("connect timed out after {:?}", options.connect_timeout),
    )
}

fn execution_error(server: &ServerAddress, err: tiberius::error::Error) -> SqlError {
    match err {
        tiberius::error::Error::Server(token) => SqlError::Execution {
            server: server.to_string(),
            message: ServerMessage {
                number: token.code(),
                line: token.line(),
                message: token.message().to_string(),
            },
        },
        other => connection_error(server, other),
    }
}
