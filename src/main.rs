use futures::{SinkExt as _, StreamExt as _};
use log::{error, info};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Decoder as _;

use hivewrite::catalog::LocalCatalog;
use hivewrite::config::Config;
use hivewrite::error::{Error, Result};
use hivewrite::insert::{InsertContext, Values};
use hivewrite::protocol::{Request, RequestCodec, Response};
use hivewrite::storage::TableName;
use hivewrite::store::LocalFileStore;

/// Handles shared by every connection.
struct Service {
    catalog: Arc<LocalCatalog>,
    inserts: InsertContext,
}

impl Service {
    fn execute(&self, request: Request) -> Result<Response> {
        match request {
            Request::CreateTable(request) => {
                self.catalog.create_table(request.into_descriptor()?)?;
                Ok(Response::Ok)
            }
            Request::Insert { table, rows } => {
                let table = TableName::try_from(table.as_str())?;
                let mut source = Values::new(rows);
                let written = self.inserts.insert_into(&table, &mut source)?;
                Ok(Response::RowsWritten(written))
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::load().unwrap_or_else(|error| {
        eprintln!("{error}");
        std::process::exit(1);
    });

    env_logger::Builder::from_default_env()
        .filter_level(config.get_log_level())
        .init();

    let catalog = LocalCatalog::open(config.get_warehouse_dir()).unwrap_or_else(|error| {
        panic!(
            "Failed to open warehouse {}: {}.",
            config.get_warehouse_dir().display(),
            error
        )
    });
    let catalog = Arc::new(catalog);
    let inserts = InsertContext::new(
        catalog.clone(),
        Arc::new(LocalFileStore),
        config.get_writer_threads(),
        config.get_file_write_attempts(),
    )
    .unwrap_or_else(|error| panic!("{error}"));
    let service = Arc::new(Service { catalog, inserts });

    let max_conn = Arc::new(Semaphore::new(config.get_max_connections()));

    let listener = TcpListener::bind(config.get_tcp_socket_addr())
        .await
        .unwrap_or_else(|error| {
            panic!(
                "Failed to bind to {}: {}.",
                config.get_tcp_socket_addr(),
                error
            )
        });

    info!("Insert service listening on {}", config.get_tcp_socket_addr());
    info!("Warehouse directory: {}", config.get_warehouse_dir().display());
    info!("Log level: {:?}", config.get_log_level());
    info!("Writer threads: {}", config.get_writer_threads());

    loop {
        let Ok(connection_permit) = Arc::clone(&max_conn).acquire_owned().await else {
            break;
        };
        match listener.accept().await {
            Ok((mut socket, addr)) => {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if handle_connection(&mut socket, service).await.is_err() {
                        error!("Could not send to {addr}. Closing connection.");
                    }
                    drop(socket);
                    drop(connection_permit);
                });
            }
            Err(error) => error!("Failed to accept connection: {error}"),
        }
    }
}

async fn handle_connection(socket: &mut TcpStream, service: Arc<Service>) -> Result<()> {
    let mut transport = RequestCodec.framed(socket);

    while let Some(request) = transport.next().await {
        let output = match request {
            Ok(request) => {
                let service = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || service.execute(request)).await {
                    Ok(output) => output.map_err(|error| error.to_string()),
                    Err(join_error) => Err(format!("Insert task failed: {join_error}")),
                }
            }
            Err(error) => Err(error.to_string()),
        };

        if let Err(send_error) = transport.send(output).await {
            error!("Failed to send response: {send_error}");
            return Err(Error::SendResponse);
        }
    }
    info!("Connection closed.");
    Ok(())
}
