//! Startup, modes and signal handling

use crate::cli::Mode;
use crate::settings::Settings;
use anyhow::Context;
use cloudstack::{CloudStackClient, MetadataServer};
use eipwatch::{Engine, resolve_instance_id};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the engine from `settings` and run the selected mode
pub async fn run(settings: &Settings) -> anyhow::Result<()> {
    let client = CloudStackClient::new(settings.client_config())
        .context("could not build the API client")?;

    let metadata =
        MetadataServer::new(METADATA_TIMEOUT).context("could not build the metadata client")?;
    let instance_id = resolve_instance_id(settings.config.watch.instance_id.clone(), &metadata)
        .await
        .context("could not determine the local instance id")?;

    let engine = Engine::new(settings.engine_config()?, Arc::new(client), &instance_id)
        .await
        .context("could not initialise the engine")?;
    let engine = Arc::new(engine);

    match settings.mode {
        Mode::Watch => {
            let priorities = adjust_priority_on_signal(Arc::clone(&engine))
                .context("could not install priority signal handlers")?;
            let terminated = termination().context("could not install termination handlers")?;
            let result = execute(engine, Mode::Watch, terminated).await;
            priorities.abort();
            result
        }
        mode => execute(engine, mode, std::future::pending()).await,
    }
}

/// Run `mode` on an initialised engine
///
/// Watch mode runs until `shutdown` completes or the listener fails, then
/// releases the address if held.
pub async fn execute<F>(engine: Arc<Engine>, mode: Mode, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    match mode {
        Mode::Associate => engine
            .associate()
            .await
            .context("could not associate the address"),
        Mode::Disassociate => engine
            .disassociate()
            .await
            .context("could not disassociate the address"),
        Mode::Watch => {
            engine.log_info().await;
            let result = tokio::select! {
                result = Arc::clone(&engine).run() => result.context("heartbeat listener failed"),
                () = shutdown => Ok(()),
            };
            engine.shutdown().await;
            result
        }
    }
}

/// Completes on SIGTERM or SIGINT
fn termination() -> std::io::Result<impl Future<Output = ()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = interrupt.recv() => info!("Received SIGINT"),
        }
    })
}

/// SIGUSR1 lowers the priority value, SIGUSR2 raises it
fn adjust_priority_on_signal(engine: Arc<Engine>) -> std::io::Result<JoinHandle<()>> {
    let mut lower = signal(SignalKind::user_defined1())?;
    let mut raise = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = lower.recv() => {
                    if let Err(e) = engine.lower_priority().await {
                        warn!(error = %e, "Cannot lower priority");
                    }
                }
                Some(()) = raise.recv() => {
                    if let Err(e) = engine.raise_priority().await {
                        warn!(error = %e, "Cannot raise priority");
                    }
                }
                else => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eipwatch::memory::InMemoryDirectory;
    use eipwatch::{Directory, EngineConfig, NicId, PeerSource, Role};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::oneshot;
    use tokio_test::assert_ok;

    const EIP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);
    const NIC: NicId = NicId::from_u128(1);

    async fn create_test_engine(directory: &Arc<InMemoryDirectory>) -> Arc<Engine> {
        directory
            .add_instance("vm-a", None, Ipv4Addr::new(10, 0, 0, 1), NIC)
            .await;

        let config = EngineConfig {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            address: IpAddr::V4(EIP),
            interval: Duration::from_millis(100),
            peers: PeerSource::Static(Vec::new()),
            ..Default::default()
        };

        Arc::new(
            Engine::new(config, Arc::clone(directory) as Arc<dyn Directory>, "vm-a")
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_associate_and_disassociate() {
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = create_test_engine(&directory).await;

        assert_ok!(execute(Arc::clone(&engine), Mode::Associate, std::future::pending()).await);
        assert_eq!(directory.holders(EIP).await, vec![NIC]);

        assert_ok!(execute(engine, Mode::Disassociate, std::future::pending()).await);
        assert!(directory.holders(EIP).await.is_empty());
    }

    #[tokio::test]
    async fn test_disassociate_without_attachment_fails() {
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = create_test_engine(&directory).await;

        assert!(execute(engine, Mode::Disassociate, std::future::pending()).await.is_err());
    }

    #[tokio::test]
    async fn test_watch_until_shutdown_releases_address() {
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = create_test_engine(&directory).await;
        let (stop, stopped) = oneshot::channel::<()>();

        let watch = tokio::spawn(execute(Arc::clone(&engine), Mode::Watch, async move {
            let _ = stopped.await;
        }));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(engine.role().await, Role::Master);
        assert_eq!(directory.holders(EIP).await, vec![NIC]);

        stop.send(()).unwrap();
        assert_ok!(watch.await.unwrap());

        assert_eq!(engine.role().await, Role::Backup);
        assert!(directory.holders(EIP).await.is_empty());
    }
}
