//! Loopback failover example
//!
//! Runs two engines on 127.0.0.1 and 127.0.0.2 against an in-memory
//! directory, then stops the master and lets the backup take over.
//!
//! Usage:
//!   cargo run --example loopback_pair [priority_a] [priority_b]

use eipwatch::memory::InMemoryDirectory;
use eipwatch::{Directory, Engine, EngineConfig, HeartbeatListener, NicId, PeerSource, Role};
use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const EIP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

fn listener(ip: Ipv4Addr) -> Result<(HeartbeatListener, SocketAddrV4), Box<dyn std::error::Error>> {
    let listener = HeartbeatListener::bind(SocketAddr::from((ip, 0)))?;
    match listener.local_addr()? {
        SocketAddr::V4(addr) => Ok((listener, addr)),
        SocketAddr::V6(addr) => Err(format!("unexpected IPv6 listener {addr}").into()),
    }
}

async fn report(directory: &InMemoryDirectory, engines: &[(&str, &Arc<Engine>)]) {
    for (name, engine) in engines {
        let stats = engine.stats().await;
        println!(
            "  {name}: role={} priority={} sent={} received={} remediations={}",
            engine.role().await,
            engine.priority().await,
            stats.adverts_sent,
            stats.heartbeats_received,
            stats.remediations
        );
    }
    println!("  {EIP} attached to {:?}", directory.holders(EIP).await);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("eipwatch=info")
        .init();

    let args: Vec<String> = env::args().collect();
    let priority_a: u8 = args.get(1).and_then(|p| p.parse().ok()).unwrap_or(10);
    let priority_b: u8 = args.get(2).and_then(|p| p.parse().ok()).unwrap_or(20);

    let (ip_a, ip_b) = (Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2));
    let (nic_a, nic_b) = (NicId::from_u128(0xa), NicId::from_u128(0xb));

    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_instance("vm-a", None, ip_a, nic_a).await;
    directory.add_instance("vm-b", None, ip_b, nic_b).await;

    let (listener_a, addr_a) = listener(ip_a)?;
    let (listener_b, addr_b) = listener(ip_b)?;

    let config = |listen: SocketAddrV4, priority: u8, peer: SocketAddrV4| EngineConfig {
        listen: SocketAddr::V4(listen),
        address: EIP.into(),
        priority,
        interval: Duration::from_millis(250),
        peers: PeerSource::Static(vec![peer]),
        ..Default::default()
    };

    let shared = Arc::clone(&directory) as Arc<dyn Directory>;
    let a = Arc::new(Engine::new(config(addr_a, priority_a, addr_b), Arc::clone(&shared), "vm-a").await?);
    let b = Arc::new(Engine::new(config(addr_b, priority_b, addr_a), shared, "vm-b").await?);

    println!("Watching {EIP} with vm-a (priority {priority_a}) and vm-b (priority {priority_b})");

    let run_a = tokio::spawn(Arc::clone(&a).serve(listener_a));
    let run_b = tokio::spawn(Arc::clone(&b).serve(listener_b));

    sleep(Duration::from_secs(2)).await;
    println!("After election:");
    report(&directory, &[("vm-a", &a), ("vm-b", &b)]).await;

    let (master, survivor) = if a.role().await == Role::Master {
        run_a.abort();
        ("vm-a", run_b)
    } else {
        run_b.abort();
        ("vm-b", run_a)
    };
    println!("Stopped {master} without releasing the address");

    sleep(Duration::from_secs(2)).await;
    println!("After failover:");
    report(&directory, &[("vm-a", &a), ("vm-b", &b)]).await;

    survivor.abort();
    a.shutdown().await;
    b.shutdown().await;
    println!("Shut down, {EIP} attached to {:?}", directory.holders(EIP).await);

    Ok(())
}
