use crate::*;

/// A REGISTRO reaches every session and shows up in LISTAR afterwards.
#[tokio::test]
async fn test_registration_is_announced_and_listed() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    gw.announce("semaforo", 8001, DeviceKind::Actuator).await?;
    client.expect("[REGISTRO] semaforo:ATUADOR:8001").await?;

    client.send("LISTAR").await?;
    client.expect("[REGISTRO] semaforo:ATUADOR:8001").await?;

    let record = gw.registry.get("semaforo").context("device not registered")?;
    assert_eq!(record.addr.to_string(), "127.0.0.1");
    assert_eq!(record.command_port, 8001);

    gw.stop().await
}

/// A session that connects later receives the current registry right after
/// the banner.
#[tokio::test]
async fn test_late_session_receives_snapshot() -> Result<()> {
    let gw = start_gateway().await?;
    gw.announce("poste", 8002, DeviceKind::Actuator).await?;
    gw.announce("radar", 8003, DeviceKind::Mixed).await?;
    wait_until(|| gw.registry.len() == 2).await?;

    let mut client = gw.connect().await?;
    client.expect(BANNER).await?;
    client.expect("[REGISTRO] poste:ATUADOR:8002").await?;
    client.expect("[REGISTRO] radar:MISTO:8003").await?;
    client.sync().await?;

    gw.stop().await
}

/// Repeating the same REGISTRO leaves exactly one entry; a changed REGISTRO
/// replaces it.
#[tokio::test]
async fn test_reregistration_is_idempotent() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    for _ in 0..3 {
        gw.announce("camera", 8004, DeviceKind::Actuator).await?;
        client.expect("[REGISTRO] camera:ATUADOR:8004").await?;
    }
    assert_eq!(gw.registry.len(), 1);

    gw.announce("camera", 8014, DeviceKind::Mixed).await?;
    client.expect("[REGISTRO] camera:MISTO:8014").await?;

    client.send("LISTAR").await?;
    client.expect("[REGISTRO] camera:MISTO:8014").await?;
    client.sync().await?;
    assert_eq!(gw.registry.len(), 1);

    gw.stop().await
}

/// DESREGISTRO removes the device and is announced; LISTAR no longer shows it.
#[tokio::test]
async fn test_deregistration_removes_device() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    gw.announce("semaforo", 8001, DeviceKind::Actuator).await?;
    client.expect("[REGISTRO] semaforo:ATUADOR:8001").await?;

    gw.withdraw("semaforo").await?;
    client.expect("[DESREGISTRO] semaforo").await?;
    assert!(!gw.registry.contains("semaforo"));

    client.send("LISTAR").await?;
    client.sync().await?;

    gw.stop().await
}

/// Withdrawing an id that was never registered changes nothing and tells
/// nobody.
#[tokio::test]
async fn test_deregistration_of_unknown_device_is_silent() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    gw.withdraw("fantasma").await?;
    // Give the datagram time to land before checking nothing was sent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.sync().await?;
    assert!(gw.registry.is_empty());

    gw.stop().await
}

/// Garbage on the discovery port is dropped and the listener keeps going.
#[tokio::test]
async fn test_malformed_discovery_datagrams_are_dropped() -> Result<()> {
    let gw = start_gateway().await?;
    let mut client = gw.connect_ready().await?;

    send_datagram(gw.addrs.discovery, b"\xff\xff\xff\xff").await?;
    send_datagram(gw.addrs.discovery, b"").await?;
    let truncated = register_bytes("semaforo", 8001, DeviceKind::Actuator);
    send_datagram(gw.addrs.discovery, &truncated[..truncated.len() - 3]).await?;

    gw.announce("poste", 8002, DeviceKind::Actuator).await?;
    client.expect("[REGISTRO] poste:ATUADOR:8002").await?;
    assert_eq!(gw.registry.len(), 1);

    gw.stop().await
}

/// A multicast interface the host does not own leaves the gateway without a
/// DISCOVERY sender; startup still succeeds and DISCOVERY is acknowledged.
#[tokio::test]
async fn test_unusable_multicast_interface_is_not_fatal() -> Result<()> {
    let mut config = test_config();
    config.network.multicast_interface = "192.0.2.1".parse()?;

    let gateway = Gateway::bind(&config).await?;
    assert!(!gateway.can_solicit());
    drop(gateway);

    let gw = start_gateway_with(config).await?;
    let mut client = gw.connect_ready().await?;
    client.send("DISCOVERY").await?;
    client.expect("[OK] DISCOVERY enviado").await?;

    gw.announce("semaforo", 8001, DeviceKind::Actuator).await?;
    client.expect("[REGISTRO] semaforo:ATUADOR:8001").await?;

    gw.stop().await
}
