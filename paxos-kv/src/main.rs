use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use paxos_kv::{
    cli::{Cli, ClientArgs, Command, ServeArgs},
    client::Client,
    command::TextCommand,
    error::RpcError,
    legacy,
    replica::Replica,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => run_client(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.to_config()?;
    let replica = Arc::new(Replica::from_config(&config));

    let listener = TcpListener::bind(&config.endpoint).await?;
    let server = Server::new(listener, Arc::clone(&replica));
    info!(
        protocol = ?replica.protocol(),
        peers = ?config.peer_endpoints(),
        "replica listening on {}",
        server.local_addr()?
    );

    let (legacy_stop, legacy_stopped) = oneshot::channel::<()>();
    let legacy_task = match args.legacy_listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            info!("legacy protocol listening on {}", listener.local_addr()?);
            let replica = Arc::clone(&replica);
            Some(tokio::spawn(async move {
                let shutdown = async {
                    let _ = legacy_stopped.await;
                };
                legacy::serve_until(listener, replica, shutdown).await
            }))
        }
        None => None,
    };

    let result = server.run_until_ctrl_c().await;
    let _ = legacy_stop.send(());
    if let Some(task) = legacy_task {
        if let Err(err) = task.await? {
            warn!("legacy server exited with error: {err:?}");
        }
    }
    if let Err(err) = result {
        warn!("replica exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let command = TextCommand::from_parts(&args.command)?;
    let mut client = Client::new(&args.server);
    if let Some(ms) = args.deadline_ms {
        client = client.with_deadline(Duration::from_millis(ms));
    }

    let result = match &command {
        TextCommand::Put { key, value } => client
            .put(key, value)
            .await
            .map(|_| format!("key={} & value={} has been added!", key.to_lowercase(), value.to_lowercase())),
        TextCommand::Get { key } => client
            .get(key)
            .await
            .map(|value| format!("value of key={} is: {value}", key.to_lowercase())),
        TextCommand::Delete { key } => client
            .delete(key)
            .await
            .map(|_| format!("KeyValue pair of key={} has been deleted!", key.to_lowercase())),
    };

    match result {
        Ok(line) => {
            println!("{line}");
            Ok(())
        }
        Err(RpcError::Status(status)) => bail!("{:?}: {}", status.code, status.message),
        Err(err) => Err(err.into()),
    }
}
